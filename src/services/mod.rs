//! Service layer: session setup, discovery, retrieval and publishing.
//!
//! Services take a page driver and a [`RunContext`](crate::context::RunContext)
//! and report progress through run events, so the CLI only renders.

pub mod artifacts;
pub mod auth;
pub mod discovery;
pub mod object_store;
pub mod pipeline;
pub mod placement;
pub mod retrieval;

pub use artifacts::RunRecorder;
pub use auth::{
    establish_session, AnonymousAuthenticator, AuthStatus, Authenticator, ConsoleOperator,
    Credentials, FormAuthenticator, LoginOutcome, Operator, SessionContext, SessionMethod,
};
pub use discovery::DiscoveryService;
pub use object_store::{FsObjectStore, HttpObjectStore, ObjectStore, StoredObject};
pub use pipeline::{Pipeline, PipelineOutcome};
pub use placement::{derive_storage_key, sanitize_header_value, PlacementDeriver};
pub use retrieval::Retriever;
