//! # Daptin Client
//!
//! Client SDK for a Daptin server.
//!
//! This crate provides:
//! - Asset Upload Engine: stream, presigned and multipart uploads with
//!   progress, resumable sessions and batch uploads
//! - Model Synchronization Engine: schema discovery, descriptor caching and
//!   registration with a resource registry
//! - Action Dispatcher: named server actions and typed response instructions
//! - Stats, server configuration and aggregation passthrough clients
//! - `HttpTransport`, `TokenProvider`, `SessionStore` and `ResourceRegistry`
//!   seams, with reqwest, file and in-memory implementations
//!
//! ## Concurrency model
//!
//! Every engine runs on the caller's task. Independent requests are fanned
//! out cooperatively with `futures` combinators; multipart parts are sent
//! one at a time. Shared state sits behind `parking_lot` locks that are never
//! held across an `.await`.
//!
//! ## Key Invariants
//!
//! - Authenticated calls without a token fail before any request is sent
//! - Presigned storage requests never carry the API credentials
//! - No automatic retries
//! - Upload progress never decreases and never exceeds the total

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod actions;
mod aggregate;
mod api;
mod client;
mod config;
mod error;
mod http;
mod registry;
mod remote_config;
mod session_store;
mod stats;
mod token;
mod transport;
pub mod upload;
mod world;

pub use actions::{ActionManager, ActionSet, InstructionHandler, LoggingInstructionHandler};
pub use aggregate::AggregateClient;
pub use api::ApiContext;
pub use client::DaptinClient;
pub use config::{ClientConfig, DEFAULT_SESSION_KEY_PREFIX};
pub use error::{ClientError, ClientResult};
pub use http::ReqwestTransport;
pub use registry::{
    JsonApiRegistry, ListQuery, MemoryRegistry, Resource, ResourceRegistry, JSON_API_CONTENT_TYPE,
};
pub use remote_config::ConfigManager;
pub use session_store::{FileSessionStore, MemorySessionStore, SessionStore};
pub use stats::{StatsManager, StatsRequest};
pub use token::{StaticToken, StoredToken, TokenProvider, TOKEN_KEY};
pub use transport::{
    ensure_success, ByteStream, HttpRequest, HttpResponse, HttpTransport, Journal, Method,
    MockReply, MockTransport, RecordedRequest, RequestBody,
};
pub use upload::{
    AssetManager, FileSource, MemorySource, PartRecord, ProgressCallback, UploadOptions,
    UploadSession, UploadSource, UploadState,
};
pub use world::{WorldManager, BOOTSTRAP_TYPES, IMAGE_TYPE};

pub use daptin_protocol as protocol;
