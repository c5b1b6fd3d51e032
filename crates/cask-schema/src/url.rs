//! Download source declaration.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// How the source is transported to the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Plain HTTP(S) GET.
    #[default]
    Plain,
    /// HTTP POST carrying [`SourceUrl::data`] as a form body.
    Post,
    /// Subversion checkout.
    #[serde(alias = "subversion")]
    Svn,
}

/// The source location of a cask plus its download options.
///
/// Written either as a bare string (`url = "https://..."`) or as a table
/// with options.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceUrl {
    /// The URL itself.
    pub url: String,
    /// Transport override; `plain` when absent.
    #[serde(default)]
    pub using: Transport,
    /// Extra HTTP request headers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Cookies sent with the request.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cookies: BTreeMap<String, String>,
    /// `Referer` header value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    /// Form fields for [`Transport::Post`].
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    /// Pinned VCS revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Named external sub-checkouts and their pinned revisions.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub revisions: BTreeMap<String, String>,
    /// Accept certificates that fail verification.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub trust_cert: bool,
}

impl SourceUrl {
    /// A plain URL with no options.
    pub fn plain(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// The last path segment of the URL, without query or fragment.
    pub fn basename(&self) -> &str {
        let without_query = self.url.split(['?', '#']).next().unwrap_or("");
        without_query
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("")
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SourceUrlRepr {
    Bare(String),
    Full(Box<FullSourceUrl>),
}

#[derive(Deserialize)]
struct FullSourceUrl {
    url: String,
    #[serde(default)]
    using: Transport,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    cookies: BTreeMap<String, String>,
    #[serde(default)]
    referer: Option<String>,
    #[serde(default)]
    data: BTreeMap<String, String>,
    #[serde(default)]
    revision: Option<String>,
    #[serde(default)]
    revisions: BTreeMap<String, String>,
    #[serde(default)]
    trust_cert: bool,
}

/// Deserialize either the bare-string or the table form of a [`SourceUrl`].
///
/// # Errors
///
/// Propagates the deserializer's error when neither form matches.
pub fn deserialize_source_url<'de, D>(deserializer: D) -> Result<SourceUrl, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match SourceUrlRepr::deserialize(deserializer)? {
        SourceUrlRepr::Bare(url) => SourceUrl::plain(url),
        SourceUrlRepr::Full(full) => {
            let full = *full;
            SourceUrl {
                url: full.url,
                using: full.using,
                headers: full.headers,
                cookies: full.cookies,
                referer: full.referer,
                data: full.data,
                revision: full.revision,
                revisions: full.revisions,
                trust_cert: full.trust_cert,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basename_strips_query() {
        let url = SourceUrl::plain("https://example.com/dl/Foo-1.0.dmg?x=1#frag");
        assert_eq!(url.basename(), "Foo-1.0.dmg");
    }

    #[test]
    fn test_basename_trailing_slash() {
        let url = SourceUrl::plain("https://example.com/latest/");
        assert_eq!(url.basename(), "latest");
    }
}
