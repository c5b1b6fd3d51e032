//! Checksum declarations.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::SchemaError;

/// Sentinel checksum string: the descriptor explicitly opts out of verification.
pub const NO_CHECK: &str = "no_check";

/// A validated SHA256 digest (64 hex characters)
///
/// This newtype ensures that all digests in the system are validated at deserialization time,
/// preventing invalid hex strings from propagating through the codebase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Create a new `Sha256Digest`, validating the input.
    ///
    /// Accepts strings with or without a `sha256:` prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the hex portion is not exactly 64 ASCII hex characters.
    pub fn new(s: impl Into<String>) -> Result<Self, SchemaError> {
        let s = s.into();
        let hex = s.strip_prefix("sha256:").unwrap_or(&s);

        if hex.len() != 64 {
            return Err(SchemaError::InvalidDigest(format!(
                "expected 64 hex characters, got {} in '{s}'",
                hex.len()
            )));
        }

        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SchemaError::InvalidDigest(format!(
                "contains non-hex characters in '{s}'"
            )));
        }

        Ok(Self(hex.to_lowercase()))
    }

    /// Get the digest as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Sha256Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Sha256Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The checksum declared by a descriptor.
///
/// A descriptor either pins a digest or explicitly opts out with `no_check`.
/// A missing checksum is represented by `Option::None` on the descriptor,
/// not by a variant here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Checksum {
    /// Verify the download against this digest.
    Sha256(Sha256Digest),
    /// Skip verification (the `no_check` sentinel).
    NoCheck,
}

impl Checksum {
    /// Parse either the `no_check` sentinel or a digest.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidDigest`] for anything else.
    pub fn parse(s: &str) -> Result<Self, SchemaError> {
        if s == NO_CHECK {
            Ok(Self::NoCheck)
        } else {
            Sha256Digest::new(s).map(Self::Sha256)
        }
    }

    /// Whether the descriptor opted out of verification.
    pub fn is_no_check(&self) -> bool {
        matches!(self, Self::NoCheck)
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sha256(d) => write!(f, "{d}"),
            Self::NoCheck => f.write_str(NO_CHECK),
        }
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_digest_accepts_prefix_and_uppercase() {
        let d = Sha256Digest::new(format!("sha256:{}", DIGEST.to_uppercase())).unwrap();
        assert_eq!(d.as_str(), DIGEST);
    }

    #[test]
    fn test_digest_rejects_short_and_non_hex() {
        assert!(Sha256Digest::new("abc").is_err());
        let bad = format!("{}z", &DIGEST[..63]);
        assert!(Sha256Digest::new(bad).is_err());
    }

    #[test]
    fn test_checksum_sentinel() {
        assert!(Checksum::parse("no_check").unwrap().is_no_check());
        assert_eq!(
            Checksum::parse(DIGEST).unwrap().to_string(),
            DIGEST.to_string()
        );
    }
}
