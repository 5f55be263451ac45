//! Page drivers and the crawl core built on them.

pub mod browser;
pub mod captcha;
pub mod driver;
pub mod extract;
pub mod http_client;
pub mod ledger;
pub mod selectors;
pub mod traversal;

#[cfg(feature = "browser")]
pub use browser::BrowserPageDriver;
pub use browser::{BrowserEngineConfig, BrowserEngineType};
pub use captcha::{CaptchaGate, ChallengeSignal, GateState};
pub use driver::PageDriver;
pub use extract::Extractor;
pub use http_client::{FetchedResource, HtmlElement, HtmlPageDriver, HttpFetcher, PageFetcher};
pub use ledger::VisitationLedger;
pub use selectors::{SelectorChain, SelectorRule, ValueSource};
pub use traversal::Traversal;
