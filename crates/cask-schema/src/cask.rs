//! The cask descriptor.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactSpec;
use crate::url::{SourceUrl, deserialize_source_url};
use crate::{Arch, Checksum, MacOsRequirement, SchemaError, Token, Version};

/// Explicit container declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container format name (`zip`, `dmg`, `naked`, ...). Autodetected when absent.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Path of an inner container, relative to the first extraction, to unpack in turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<String>,
}

/// Requirements that must hold before a cask is fetched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependsOn {
    /// macOS release constraint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub macos: Option<MacOsRequirement>,
    /// Supported CPU architectures; empty means any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arch: Vec<Arch>,
    /// Requires an X11 server.
    #[serde(default)]
    pub x11: bool,
    /// Formula names installed through the platform package manager.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub formula: Vec<String>,
    /// Other casks installed first, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cask: Vec<Token>,
}

impl DependsOn {
    /// Whether nothing is required.
    pub fn is_empty(&self) -> bool {
        self.macos.is_none()
            && self.arch.is_empty()
            && !self.x11
            && self.formula.is_empty()
            && self.cask.is_empty()
    }
}

/// Casks that must not be installed alongside this one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictsWith {
    /// Conflicting cask tokens.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cask: Vec<Token>,
}

/// A parsed and validated cask descriptor.
///
/// ```toml
/// token = "foo"
/// version = "1.0"
/// sha256 = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
/// url = "https://example.com/Foo-1.0.zip"
///
/// [[artifacts]]
/// kind = "app"
/// source = "Foo.app"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cask {
    /// Unique identifier.
    pub token: Token,
    /// Declared version, possibly `latest`.
    pub version: Version,
    /// Expected checksum of the download; `None` when undeclared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<Checksum>,
    /// Source location and download options.
    #[serde(deserialize_with = "deserialize_source_url")]
    pub url: SourceUrl,
    /// Display names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name: Vec<String>,
    /// Project homepage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    /// Explicit container declaration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerSpec>,
    /// Preconditions checked before fetching.
    #[serde(default)]
    pub depends_on: DependsOn,
    /// Casks that block installation when present.
    #[serde(default)]
    pub conflicts_with: ConflictsWith,
    /// The application updates itself.
    #[serde(default)]
    pub auto_updates: bool,
    /// Grant accessibility access after activation.
    #[serde(default)]
    pub accessibility_access: bool,
    /// Notes shown to the user before installing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caveats: Option<String>,
    /// Activatable units, in install order.
    #[serde(default)]
    pub artifacts: Vec<ArtifactSpec>,
    /// Descriptor text this value was parsed from.
    #[serde(skip)]
    pub source: Option<String>,
}

impl Cask {
    /// Parse and validate a TOML descriptor, keeping the text.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Parse`] on malformed input and
    /// [`SchemaError::Invalid`] when validation fails.
    pub fn parse(text: &str) -> Result<Self, SchemaError> {
        let mut cask: Self = toml::from_str(text)?;
        cask.source = Some(text.to_string());
        cask.validate()?;
        Ok(cask)
    }

    /// Read a descriptor from disk.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Io`] if the file cannot be read, otherwise as
    /// [`Cask::parse`].
    pub fn from_file(path: &Path) -> Result<Self, SchemaError> {
        let text = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// The descriptor as TOML: the original text when available.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Serialize`] if a constructed value cannot be rendered.
    pub fn to_toml(&self) -> Result<String, SchemaError> {
        match &self.source {
            Some(text) => Ok(text.clone()),
            None => Ok(toml::to_string(self)?),
        }
    }

    /// Check cross-field rules serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Invalid`] naming the violated rule.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let invalid = |reason: &str| SchemaError::Invalid {
            token: self.token.to_string(),
            reason: reason.to_string(),
        };

        if self.token.is_empty() {
            return Err(invalid("token must not be empty"));
        }

        let stage_only = self.artifacts.iter().filter(|a| a.is_stage_only()).count();
        if stage_only > 0 && self.artifacts.len() > stage_only {
            return Err(invalid("stage_only cannot be combined with other artifacts"));
        }

        for artifact in &self.artifacts {
            if let ArtifactSpec::Installer(i) = artifact
                && i.manual.is_some() == i.script.is_some()
            {
                return Err(invalid("installer needs exactly one of 'manual' or 'script'"));
            }
        }

        Ok(())
    }

    /// Whether the descriptor only stages files.
    pub fn is_stage_only(&self) -> bool {
        self.artifacts.iter().any(ArtifactSpec::is_stage_only)
    }

    /// Explicit container type, if any.
    pub fn container_type(&self) -> Option<&str> {
        self.container.as_ref().and_then(|c| c.kind.as_deref())
    }

    /// Nested container path, if any.
    pub fn nested_container(&self) -> Option<&str> {
        self.container.as_ref().and_then(|c| c.nested.as_deref())
    }
}
