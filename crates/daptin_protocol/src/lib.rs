//! # Daptin Protocol
//!
//! Wire types for the Daptin client SDK.
//!
//! This crate provides:
//! - `UploadInitResponse`, the tagged answer to an upload session init
//! - Multipart part planning (`plan_parts`)
//! - `ProgressEvent` and the persisted `ResumableSession` record
//! - `TypeDescriptor`, `World` and the JSON:API field-map transform
//! - `ActionDescriptor` and typed action response instructions
//! - `AggregateRequest`, the aggregation query builder
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod aggregate;
mod error;
mod model;
mod upload;

pub use action::{
    ActionDescriptor, ActionResponse, ClientInstruction, FileDownload, Notification,
};
pub use aggregate::{AggregateRequest, FilterValue};
pub use error::{ProtocolError, ProtocolResult};
pub use model::{
    is_join_table, json_api_model, ColumnEntry, ColumnInfo, FieldMap, FieldSpec, StateMachine,
    StateMachineEvent, StreamDescriptor, TypeDescriptor, World, JOIN_TABLE_MARKER,
};
pub use upload::{
    part_size, plan_parts, strip_etag_quotes, CompleteMultipartRequest, CompletedPart,
    IssuedPart, MultipartInit, PartPlan, PartRange, PartUrlResponse, PresignedInit,
    ProgressEvent, ResumableSession, StreamInit, UploadInitResponse, UploadStrategy, UploadTarget,
    DEFAULT_MAX_PARTS, MIN_PART_SIZE,
};
