//! Normalized absolute resource identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// An absolute URL identifying a page or asset.
///
/// Two refs are equal when their normalized string forms are equal.
/// Normalization resolves against a base and drops the fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceRef(Url);

impl ResourceRef {
    /// Parse an absolute URL.
    pub fn parse(raw: &str) -> Result<Self, url::ParseError> {
        Ok(Self::from_url(Url::parse(raw.trim())?))
    }

    /// Resolve a possibly-relative href against a base URL.
    ///
    /// Returns `None` for hrefs that never identify a fetchable resource
    /// (`javascript:`, `mailto:`, `tel:`, bare fragments, empty strings).
    pub fn resolve(base: &Url, href: &str) -> Option<Self> {
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            return None;
        }

        let url = base.join(href).ok()?;
        match url.scheme() {
            "http" | "https" | "file" => Some(Self::from_url(url)),
            _ => None,
        }
    }

    fn from_url(mut url: Url) -> Self {
        url.set_fragment(None);
        Self(url)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    /// Last non-empty path segment, used for staged download filenames.
    pub fn file_name(&self) -> Option<String> {
        self.0
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
            .map(|s| s.to_string())
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for ResourceRef {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://www.example.org/multimedia/").unwrap()
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let relative = ResourceRef::resolve(&base(), "/aid/42/page.htm").unwrap();
        assert_eq!(relative.as_str(), "https://www.example.org/aid/42/page.htm");

        let sibling = ResourceRef::resolve(&base(), "list.htm").unwrap();
        assert_eq!(
            sibling.as_str(),
            "https://www.example.org/multimedia/list.htm"
        );

        let absolute = ResourceRef::resolve(&base(), "https://cdn.example.org/a.mp3").unwrap();
        assert_eq!(absolute.as_str(), "https://cdn.example.org/a.mp3");
    }

    #[test]
    fn test_resolve_drops_fragment() {
        let a = ResourceRef::resolve(&base(), "/page#top").unwrap();
        let b = ResourceRef::resolve(&base(), "/page").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_resolve_rejects_non_navigable() {
        assert!(ResourceRef::resolve(&base(), "").is_none());
        assert!(ResourceRef::resolve(&base(), "#more").is_none());
        assert!(ResourceRef::resolve(&base(), "javascript:void(0)").is_none());
        assert!(ResourceRef::resolve(&base(), "mailto:x@example.org").is_none());
    }

    #[test]
    fn test_file_name() {
        let r = ResourceRef::parse("https://x.org/media/audio/lesson-1.mp3?x=1").unwrap();
        assert_eq!(r.file_name().as_deref(), Some("lesson-1.mp3"));
        let root = ResourceRef::parse("https://x.org/").unwrap();
        assert_eq!(root.file_name(), None);
    }
}
