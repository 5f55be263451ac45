//! Page driver abstraction over a live browsing session.
//!
//! The crawl core only talks to pages through this trait, so traversal,
//! challenge detection and extraction work the same against a headless
//! Chromium tab or a plain HTTP session.

use async_trait::async_trait;

use crate::models::ResourceRef;

/// Operations the crawler needs from a browsing session.
///
/// A driver holds exactly one current page. `navigate` and `activate`
/// replace it; every other method queries it.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Handle to an element on the current page.
    type Element: Send + Sync;

    /// Load a URL and wait for the page to settle.
    async fn navigate(&mut self, target: &ResourceRef) -> anyhow::Result<()>;

    /// All elements matching a CSS selector, in document order.
    async fn find_all(&self, selector: &str) -> anyhow::Result<Vec<Self::Element>>;

    /// Rendered text of an element, trimmed.
    async fn text_of(&self, element: &Self::Element) -> anyhow::Result<Option<String>>;

    async fn attribute_of(
        &self,
        element: &Self::Element,
        name: &str,
    ) -> anyhow::Result<Option<String>>;

    /// Whether the element would occupy space on screen.
    async fn is_visible(&self, element: &Self::Element) -> anyhow::Result<bool>;

    /// Click or otherwise activate the element, waiting for any navigation.
    async fn activate(&mut self, element: &Self::Element) -> anyhow::Result<()>;

    /// Type a value into a form field.
    async fn fill(&mut self, element: &Self::Element, value: &str) -> anyhow::Result<()>;

    async fn current_url(&self) -> anyhow::Result<ResourceRef>;

    async fn title(&self) -> anyhow::Result<String>;

    /// Visible text of the document body.
    async fn body_text(&self) -> anyhow::Result<String>;

    /// Whether a person can see and interact with the page.
    fn has_window(&self) -> bool {
        false
    }
}
