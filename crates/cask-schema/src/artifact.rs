//! Artifact declarations.
//!
//! An artifact is one activatable unit of a cask. The set of kinds is
//! closed; activation behavior lives in the engine and dispatches on the
//! variant.

use serde::{Deserialize, Serialize};

/// A staged item copied into a configured target directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Moved {
    /// Path relative to the staged directory.
    pub source: String,
    /// Target name inside the kind's directory; defaults to the source basename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// A staged item copied to an explicit absolute target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocated {
    /// Path relative to the staged directory.
    pub source: String,
    /// Absolute destination path (`~` expands to the home directory).
    pub target: String,
}

/// An executable symlinked into the binary directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binary {
    /// Path relative to the staged directory.
    pub source: String,
    /// Link name; defaults to the source basename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// A macOS installer package run with `installer(8)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pkg {
    /// Path of the `.pkg` relative to the staged directory.
    pub path: String,
    /// Pass `-allowUntrusted` to the installer.
    #[serde(default)]
    pub allow_untrusted: bool,
    /// Receipt identifiers to forget on uninstall.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub receipts: Vec<String>,
}

/// An executable invocation, relative to the staged directory unless absolute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    /// Executable path.
    pub executable: String,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Run through `sudo`.
    #[serde(default)]
    pub sudo: bool,
}

/// A bundled installer: either instructions for the user or a script to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installer {
    /// Instructions shown to the user; nothing is executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual: Option<String>,
    /// Script executed during install.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<Script>,
}

/// Removal directives run when the cask is uninstalled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UninstallDirectives {
    /// launchd job labels to remove.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub launchctl: Vec<String>,
    /// Package receipt identifiers to forget.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pkgutil: Vec<String>,
    /// Uninstall script.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<Script>,
    /// Files or directories to delete.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete: Vec<String>,
    /// Directories to remove if empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rmdir: Vec<String>,
}

/// Removal directives run only by `zap`, typically user data and preferences.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZapDirectives {
    /// Files or directories to delete.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delete: Vec<String>,
    /// Files or directories to move to the user's Trash.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trash: Vec<String>,
    /// Directories to remove if empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rmdir: Vec<String>,
}

/// One artifact of a cask, tagged by `kind`.
///
/// ```toml
/// [[artifacts]]
/// kind = "app"
/// source = "Foo.app"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactSpec {
    /// Application bundle copied into the applications directory.
    App(Moved),
    /// Font copied into the fonts directory.
    Font(Moved),
    /// Preference pane copied into the preference panes directory.
    Prefpane(Moved),
    /// Quick Look plugin copied into the plugins directory.
    Qlplugin(Moved),
    /// Service copied into the services directory.
    Service(Moved),
    /// Arbitrary staged item copied to an explicit target.
    Artifact(Relocated),
    /// Executable symlinked into the binary directory.
    Binary(Binary),
    /// Installer package.
    Pkg(Pkg),
    /// Bundled installer (manual instructions or script).
    Installer(Installer),
    /// Keep the staged tree without activating anything.
    StageOnly,
    /// Extra removal work done on uninstall.
    Uninstall(UninstallDirectives),
    /// Extra removal work done on zap.
    Zap(ZapDirectives),
}

impl ArtifactSpec {
    /// Short kind name, as written in descriptors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::App(_) => "app",
            Self::Font(_) => "font",
            Self::Prefpane(_) => "prefpane",
            Self::Qlplugin(_) => "qlplugin",
            Self::Service(_) => "service",
            Self::Artifact(_) => "artifact",
            Self::Binary(_) => "binary",
            Self::Pkg(_) => "pkg",
            Self::Installer(_) => "installer",
            Self::StageOnly => "stage_only",
            Self::Uninstall(_) => "uninstall",
            Self::Zap(_) => "zap",
        }
    }

    /// Whether this is the stage-only marker.
    pub fn is_stage_only(&self) -> bool {
        matches!(self, Self::StageOnly)
    }

    /// Human-readable label for messages, e.g. `app 'Foo.app'`.
    pub fn describe(&self) -> String {
        match self {
            Self::App(m) | Self::Font(m) | Self::Prefpane(m) | Self::Qlplugin(m) | Self::Service(m) => {
                format!("{} '{}'", self.kind_name(), m.source)
            }
            Self::Artifact(r) => format!("artifact '{}'", r.source),
            Self::Binary(b) => format!("binary '{}'", b.source),
            Self::Pkg(p) => format!("pkg '{}'", p.path),
            Self::Installer(i) => match &i.script {
                Some(s) => format!("installer script '{}'", s.executable),
                None => "installer manual".to_string(),
            },
            Self::StageOnly | Self::Uninstall(_) | Self::Zap(_) => self.kind_name().to_string(),
        }
    }
}
