//! Ordered fallback selector chains.
//!
//! A rule is written `css` (element text) or `css@attr` (attribute value).
//! Chains are tried in order; which rules contribute depends on the
//! evaluation mode.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::driver::PageDriver;

/// What a rule reads from each matched element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    Text,
    Attribute(String),
}

/// One `(pattern, extractor)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SelectorRule {
    pub css: String,
    pub source: ValueSource,
}

impl SelectorRule {
    pub fn text(css: impl Into<String>) -> Self {
        Self {
            css: css.into(),
            source: ValueSource::Text,
        }
    }

    pub fn attr(css: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            css: css.into(),
            source: ValueSource::Attribute(name.into()),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("empty selector rule".to_string());
        }
        if let Some((css, attr)) = raw.rsplit_once('@') {
            let is_attr_name = !attr.is_empty()
                && attr
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'));
            if is_attr_name {
                let css = css.trim();
                if css.is_empty() {
                    return Err(format!("selector rule {:?} has no CSS part", raw));
                }
                return Ok(Self::attr(css, attr));
            }
        }
        Ok(Self::text(raw))
    }

    /// Non-empty values from matching elements, in document order.
    pub async fn values<D: PageDriver>(&self, driver: &D) -> anyhow::Result<Vec<String>> {
        let mut out = Vec::new();
        for element in driver.find_all(&self.css).await? {
            let value = match &self.source {
                ValueSource::Text => driver.text_of(&element).await?,
                ValueSource::Attribute(name) => driver.attribute_of(&element, name).await?,
            };
            if let Some(value) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
                out.push(value);
            }
        }
        Ok(out)
    }
}

impl TryFrom<String> for SelectorRule {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SelectorRule> for String {
    fn from(rule: SelectorRule) -> Self {
        rule.to_string()
    }
}

impl fmt::Display for SelectorRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ValueSource::Text => f.write_str(&self.css),
            ValueSource::Attribute(name) => write!(f, "{}@{}", self.css, name),
        }
    }
}

/// Ordered list of rules evaluated until one succeeds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectorChain(Vec<SelectorRule>);

impl SelectorChain {
    pub fn new(rules: Vec<SelectorRule>) -> Self {
        Self(rules)
    }

    /// Build from `css` / `css@attr` strings.
    pub fn parse<S: AsRef<str>>(rules: &[S]) -> Result<Self, String> {
        rules
            .iter()
            .map(|r| SelectorRule::parse(r.as_ref()))
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn rules(&self) -> &[SelectorRule] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    async fn rule_values<D: PageDriver>(rule: &SelectorRule, driver: &D) -> Vec<String> {
        match rule.values(driver).await {
            Ok(values) => values,
            Err(e) => {
                warn!("Selector {} failed: {}", rule, e);
                Vec::new()
            }
        }
    }

    /// First non-empty value of the first rule that yields one.
    pub async fn first<D: PageDriver>(&self, driver: &D) -> Option<String> {
        for rule in &self.0 {
            if let Some(value) = Self::rule_values(rule, driver).await.into_iter().next() {
                debug!("Selector {} matched", rule);
                return Some(value);
            }
        }
        None
    }

    /// All values of the first rule that yields any.
    pub async fn first_all<D: PageDriver>(&self, driver: &D) -> Vec<String> {
        for rule in &self.0 {
            let values = Self::rule_values(rule, driver).await;
            if !values.is_empty() {
                debug!("Selector {} matched {} values", rule, values.len());
                return values;
            }
        }
        Vec::new()
    }

    /// Union of every rule's values, first occurrence kept.
    pub async fn collect<D: PageDriver>(&self, driver: &D) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for rule in &self.0 {
            for value in Self::rule_values(rule, driver).await {
                if seen.insert(value.clone()) {
                    out.push(value);
                }
            }
        }
        out
    }
}

impl<S: AsRef<str>> FromIterator<S> for SelectorChain {
    /// Malformed rules are dropped; intended for built-in defaults.
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .filter_map(|r| SelectorRule::parse(r.as_ref()).ok())
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_rule() {
        let rule = SelectorRule::parse("h1.title").unwrap();
        assert_eq!(rule.css, "h1.title");
        assert_eq!(rule.source, ValueSource::Text);
    }

    #[test]
    fn test_parse_attribute_rule() {
        let rule = SelectorRule::parse("a[href$='.mp3']@href").unwrap();
        assert_eq!(rule.css, "a[href$='.mp3']");
        assert_eq!(rule.source, ValueSource::Attribute("href".into()));
        assert_eq!(rule.to_string(), "a[href$='.mp3']@href");
    }

    #[test]
    fn test_parse_at_inside_selector() {
        // '@' followed by something that is not an attribute name stays CSS
        let rule = SelectorRule::parse("a[href*='x@y.org']").unwrap();
        assert_eq!(rule.source, ValueSource::Text);
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(SelectorRule::parse("  ").is_err());
        assert!(SelectorRule::parse("@href").is_err());
    }

    #[test]
    fn test_chain_serde_round_trip() {
        let chain: SelectorChain =
            serde_json::from_str(r#"["a.download@href", "audio source@src", "h1"]"#).unwrap();
        assert_eq!(chain.rules().len(), 3);
        assert_eq!(
            chain.rules()[1].source,
            ValueSource::Attribute("src".into())
        );
        let json = serde_json::to_string(&chain).unwrap();
        assert_eq!(json, r#"["a.download@href","audio source@src","h1"]"#);
    }
}
