//! CPU architectures and macOS release versions used by `depends_on`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::SchemaError;

/// Target CPU architecture.
///
/// A descriptor lists the architectures it runs on; the engine compares
/// the list against the host reported by the platform collaborator.
///
/// # Example
///
/// ```
/// use cask_schema::Arch;
///
/// let current = Arch::current();
/// println!("Running on: {}", current);
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// ARM64 architecture (Apple Silicon: M1, M2, M3, etc.)
    #[default]
    Arm64,
    /// `x86_64` architecture (Intel Macs)
    #[serde(alias = "intel")]
    X86_64,
}

impl Arch {
    /// Get the current architecture
    pub fn current() -> Self {
        #[cfg(target_arch = "aarch64")]
        {
            Self::Arm64
        }
        #[cfg(not(target_arch = "aarch64"))]
        {
            Self::X86_64
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arm64 => "arm64",
            Self::X86_64 => "x86_64",
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "arm64" | "aarch64" | "arm" => Ok(Self::Arm64),
            "x86_64" | "amd64" | "intel" => Ok(Self::X86_64),
            _ => Err(format!("Unknown architecture: {s}")),
        }
    }
}

/// Release names accepted in place of numeric versions.
const RELEASE_NAMES: &[(&str, &str)] = &[
    ("lion", "10.7"),
    ("mountain_lion", "10.8"),
    ("mavericks", "10.9"),
    ("yosemite", "10.10"),
    ("el_capitan", "10.11"),
    ("sierra", "10.12"),
    ("high_sierra", "10.13"),
    ("mojave", "10.14"),
    ("catalina", "10.15"),
    ("big_sur", "11"),
    ("monterey", "12"),
    ("ventura", "13"),
    ("sonoma", "14"),
    ("sequoia", "15"),
];

/// A dotted macOS version such as `10.12` or `14.4.1`.
///
/// Missing trailing components compare as zero, so `11` equals `11.0.0`.
#[derive(Debug, Clone)]
pub struct OsVersion(Vec<u32>);

impl OsVersion {
    /// Parse a dotted version or a release name (`sierra`, `big_sur`, ...).
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidOsVersion`] if a component is not numeric.
    pub fn parse(s: &str) -> Result<Self, SchemaError> {
        let s = s.trim().trim_start_matches(':');
        let numeric = RELEASE_NAMES
            .iter()
            .find(|(name, _)| *name == s)
            .map_or(s, |(_, v)| *v);

        numeric
            .split('.')
            .map(|part| {
                part.parse::<u32>()
                    .map_err(|_| SchemaError::InvalidOsVersion(s.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    fn component(&self, i: usize) -> u32 {
        self.0.get(i).copied().unwrap_or(0)
    }
}

impl PartialEq for OsVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for OsVersion {}

impl Ord for OsVersion {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|o| o.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    }
}

impl PartialOrd for OsVersion {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for OsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u32::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

impl std::str::FromStr for OsVersion {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Comparison operator of a `depends_on.macos` constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// `>=`
    AtLeast,
    /// `>`
    Newer,
    /// `<=`
    AtMost,
    /// `<`
    Older,
    /// `==`
    Exactly,
}

impl Comparator {
    fn symbol(self) -> &'static str {
        match self {
            Self::AtLeast => ">=",
            Self::Newer => ">",
            Self::AtMost => "<=",
            Self::Older => "<",
            Self::Exactly => "==",
        }
    }
}

/// The `depends_on.macos` constraint.
///
/// Written either as a single comparison (`">= 10.12"`, `"sierra"`) or as a
/// list of acceptable releases (`["10.12", "10.13"]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacOsRequirement {
    /// A single comparison against the host version.
    Compare(Comparator, OsVersion),
    /// The host must be one of these releases.
    AnyOf(Vec<OsVersion>),
}

impl MacOsRequirement {
    /// Parse the single-comparison form.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidOsVersion`] for an unparsable version.
    pub fn parse(s: &str) -> Result<Self, SchemaError> {
        let s = s.trim();
        let (cmp, rest) = [
            (">=", Comparator::AtLeast),
            ("<=", Comparator::AtMost),
            ("==", Comparator::Exactly),
            (">", Comparator::Newer),
            ("<", Comparator::Older),
        ]
        .iter()
        .find_map(|&(sym, cmp)| s.strip_prefix(sym).map(|rest| (cmp, rest)))
        .unwrap_or((Comparator::Exactly, s));

        Ok(Self::Compare(cmp, OsVersion::parse(rest)?))
    }

    /// Whether `host` satisfies the constraint.
    pub fn is_satisfied_by(&self, host: &OsVersion) -> bool {
        match self {
            Self::Compare(cmp, v) => match cmp {
                Comparator::AtLeast => host >= v,
                Comparator::Newer => host > v,
                Comparator::AtMost => host <= v,
                Comparator::Older => host < v,
                Comparator::Exactly => host == v,
            },
            Self::AnyOf(list) => list.iter().any(|v| v == host),
        }
    }
}

impl std::fmt::Display for MacOsRequirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compare(cmp, v) => write!(f, "{} {v}", cmp.symbol()),
            Self::AnyOf(list) => {
                let parts: Vec<String> = list.iter().map(ToString::to_string).collect();
                write!(f, "one of {}", parts.join(", "))
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MacOsRepr {
    One(String),
    Many(Vec<String>),
}

impl<'de> Deserialize<'de> for MacOsRequirement {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match MacOsRepr::deserialize(deserializer)? {
            MacOsRepr::One(s) => Self::parse(&s).map_err(serde::de::Error::custom),
            MacOsRepr::Many(list) => list
                .iter()
                .map(|s| OsVersion::parse(s))
                .collect::<Result<Vec<_>, _>>()
                .map(Self::AnyOf)
                .map_err(serde::de::Error::custom),
        }
    }
}

impl Serialize for MacOsRequirement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Compare(cmp, v) => serializer.collect_str(&format_args!("{} {v}", cmp.symbol())),
            Self::AnyOf(list) => {
                let parts: Vec<String> = list.iter().map(ToString::to_string).collect();
                parts.serialize(serializer)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> OsVersion {
        OsVersion::parse(s).unwrap()
    }

    #[test]
    fn test_os_version_ordering_pads_components() {
        assert_eq!(v("11"), v("11.0.0"));
        assert!(v("10.13") > v("10.12.6"));
        assert!(v("10.9") < v("10.10"));
    }

    #[test]
    fn test_release_names() {
        assert_eq!(v("sierra"), v("10.12"));
        assert_eq!(v(":big_sur"), v("11"));
    }

    #[test]
    fn test_requirement_comparisons() {
        let req = MacOsRequirement::parse(">= 10.12").unwrap();
        assert!(req.is_satisfied_by(&v("10.12")));
        assert!(req.is_satisfied_by(&v("14.1")));
        assert!(!req.is_satisfied_by(&v("10.11.6")));

        let req = MacOsRequirement::parse("< high_sierra").unwrap();
        assert!(req.is_satisfied_by(&v("10.12")));
        assert!(!req.is_satisfied_by(&v("10.13")));

        let bare = MacOsRequirement::parse("13").unwrap();
        assert!(bare.is_satisfied_by(&v("13.0")));
    }

    #[test]
    fn test_arch_aliases() {
        assert_eq!("aarch64".parse::<Arch>().unwrap(), Arch::Arm64);
        assert_eq!("intel".parse::<Arch>().unwrap(), Arch::X86_64);
        assert!("sparc".parse::<Arch>().is_err());
    }
}
