//! Page driver over plain HTTP responses.
//!
//! Pages are fetched with a [`PageFetcher`] and queried with CSS selectors.
//! Nothing is executed, so visibility is judged from the markup alone: the
//! `hidden` attribute, hidden inputs, and inline `display:none` or
//! `visibility:hidden` on the element or any ancestor.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::{debug, info};

use super::{FetchedResource, PageFetcher};
use crate::models::ResourceRef;
use crate::scrapers::driver::PageDriver;

/// Snapshot of an element taken when it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlElement {
    pub tag: String,
    pub text: String,
    pub attributes: Vec<(String, String)>,
    pub visible: bool,
}

impl HtmlElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

struct LoadedPage {
    url: ResourceRef,
    html: String,
}

/// Static HTML driver. Non-HTML responses are saved to the download
/// directory when one is configured, the way a browser would.
pub struct HtmlPageDriver<F: PageFetcher> {
    fetcher: F,
    download_dir: Option<PathBuf>,
    current: Option<LoadedPage>,
}

impl<F: PageFetcher> HtmlPageDriver<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            download_dir: None,
            current: None,
        }
    }

    /// Save non-HTML navigations into `dir`.
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    fn page(&self) -> anyhow::Result<&LoadedPage> {
        self.current
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No page loaded"))
    }

    async fn save_download(
        &self,
        dir: &Path,
        target: &ResourceRef,
        resource: &FetchedResource,
    ) -> anyhow::Result<PathBuf> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create download dir {}", dir.display()))?;

        let name = ResourceRef::parse(&resource.final_url)
            .ok()
            .and_then(|r| r.file_name())
            .or_else(|| target.file_name())
            .unwrap_or_else(|| "download".to_string());
        let name = with_content_extension(name, &resource.content_type);
        let final_path = unique_download_path(dir, &name);
        let partial = PathBuf::from(format!("{}.part", final_path.display()));

        tokio::fs::write(&partial, &resource.body).await?;
        tokio::fs::rename(&partial, &final_path).await?;
        info!(
            "Downloaded {} ({} bytes) to {}",
            target,
            resource.body.len(),
            final_path.display()
        );
        Ok(final_path)
    }
}

/// Give an extensionless download name one from its content type, the way
/// a browser names `/download?id=5` served as `audio/mpeg`.
fn with_content_extension(name: String, content_type: &str) -> String {
    if Path::new(&name).extension().is_some() {
        return name;
    }
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    match mime_guess::get_mime_extensions_str(essence).and_then(|exts| exts.first()) {
        Some(ext) => format!("{}.{}", name, ext),
        None => name,
    }
}

/// `name`, or `stem (n).ext` if taken.
fn unique_download_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("download");
    let ext = path.extension().and_then(|e| e.to_str());
    (1..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{} ({}).{}", stem, n, ext)),
            None => dir.join(format!("{} ({})", stem, n)),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

fn parse_selector(selector: &str) -> anyhow::Result<Selector> {
    Selector::parse(selector).map_err(|e| anyhow::anyhow!("Invalid selector {:?}: {:?}", selector, e))
}

fn hides_subtree(el: &ElementRef) -> bool {
    let v = el.value();
    if matches!(
        v.name(),
        "script" | "style" | "noscript" | "template" | "head"
    ) {
        return true;
    }
    if v.attr("hidden").is_some() {
        return true;
    }
    if v.name() == "input"
        && v
            .attr("type")
            .is_some_and(|t| t.eq_ignore_ascii_case("hidden"))
    {
        return true;
    }
    if let Some(style) = v.attr("style") {
        let style: String = style
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        if style.contains("display:none") || style.contains("visibility:hidden") {
            return true;
        }
    }
    false
}

fn is_rendered(el: &ElementRef) -> bool {
    !hides_subtree(el) && el.ancestors().filter_map(ElementRef::wrap).all(|a| !hides_subtree(&a))
}

/// Text of rendered descendants, whitespace collapsed.
fn rendered_text(el: &ElementRef) -> String {
    fn walk(el: &ElementRef, out: &mut String) {
        for child in el.children() {
            match child.value() {
                Node::Text(text) => {
                    out.push_str(text);
                    out.push(' ');
                }
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        if !hides_subtree(&child_el) {
                            walk(&child_el, out);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    let mut raw = String::new();
    walk(el, &mut raw);
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn select_elements(html: &str, selector: &str) -> anyhow::Result<Vec<HtmlElement>> {
    let selector = parse_selector(selector)?;
    let document = Html::parse_document(html);
    Ok(document
        .select(&selector)
        .map(|el| HtmlElement {
            tag: el.value().name().to_string(),
            text: rendered_text(&el),
            attributes: el
                .value()
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            visible: is_rendered(&el),
        })
        .collect())
}

fn document_title(html: &str) -> String {
    let document = Html::parse_document(html);
    parse_selector("title")
        .ok()
        .and_then(|sel| {
            document
                .select(&sel)
                .next()
                .map(|t| t.text().collect::<String>().trim().to_string())
        })
        .unwrap_or_default()
}

fn document_body_text(html: &str) -> String {
    let document = Html::parse_document(html);
    match parse_selector("body")
        .ok()
        .and_then(|sel| document.select(&sel).next())
    {
        Some(body) => rendered_text(&body),
        None => rendered_text(&document.root_element()),
    }
}

#[async_trait]
impl<F: PageFetcher> PageDriver for HtmlPageDriver<F> {
    type Element = HtmlElement;

    async fn navigate(&mut self, target: &ResourceRef) -> anyhow::Result<()> {
        let resource = self.fetcher.fetch(target.as_str()).await?;

        if resource.is_html() {
            let url = ResourceRef::parse(&resource.final_url).unwrap_or_else(|_| target.clone());
            let html = String::from_utf8_lossy(&resource.body).into_owned();
            debug!("Loaded {} ({} bytes of HTML)", url, html.len());
            self.current = Some(LoadedPage { url, html });
            return Ok(());
        }

        match self.download_dir.clone() {
            Some(dir) => {
                self.save_download(&dir, target, &resource).await?;
                self.current = Some(LoadedPage {
                    url: target.clone(),
                    html: String::new(),
                });
                Ok(())
            }
            None => anyhow::bail!(
                "{} returned {} and no download directory is configured",
                target,
                resource.content_type
            ),
        }
    }

    async fn find_all(&self, selector: &str) -> anyhow::Result<Vec<HtmlElement>> {
        select_elements(&self.page()?.html, selector)
    }

    async fn text_of(&self, element: &HtmlElement) -> anyhow::Result<Option<String>> {
        Ok(Some(element.text.clone()).filter(|t| !t.is_empty()))
    }

    async fn attribute_of(
        &self,
        element: &HtmlElement,
        name: &str,
    ) -> anyhow::Result<Option<String>> {
        Ok(element.attr(name).map(|v| v.to_string()))
    }

    async fn is_visible(&self, element: &HtmlElement) -> anyhow::Result<bool> {
        Ok(element.visible)
    }

    async fn activate(&mut self, element: &HtmlElement) -> anyhow::Result<()> {
        let href = element
            .attr("href")
            .ok_or_else(|| anyhow::anyhow!("<{}> has no link target", element.tag))?
            .to_string();
        let base = self.page()?.url.clone();
        let target = ResourceRef::resolve(base.url(), &href)
            .ok_or_else(|| anyhow::anyhow!("Unresolvable link target {:?}", href))?;
        self.navigate(&target).await
    }

    async fn fill(&mut self, element: &HtmlElement, _value: &str) -> anyhow::Result<()> {
        anyhow::bail!(
            "Form input on <{}> requires the browser driver",
            element.tag
        )
    }

    async fn current_url(&self) -> anyhow::Result<ResourceRef> {
        Ok(self.page()?.url.clone())
    }

    async fn title(&self) -> anyhow::Result<String> {
        Ok(document_title(&self.page()?.html))
    }

    async fn body_text(&self) -> anyhow::Result<String> {
        Ok(document_body_text(&self.page()?.html))
    }
}
