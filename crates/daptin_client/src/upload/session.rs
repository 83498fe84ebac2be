//! Upload session state machine.

use crate::error::{ClientError, ClientResult};
use chrono::{DateTime, Utc};
use daptin_protocol::{CompletedPart, ProgressEvent, UploadStrategy, UploadTarget};
use std::fmt;

/// The lifecycle state of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadState {
    /// Created locally, no init call made yet.
    Uninitialized,
    /// The server issued an upload id.
    Initialized,
    /// Bytes are being sent.
    Transferring,
    /// The server acknowledged completion.
    Completed,
    /// A multipart upload was explicitly aborted.
    Aborted,
    /// Never completed; the server may hold partial data.
    Abandoned,
}

impl UploadState {
    /// Returns the state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadState::Uninitialized => "uninitialized",
            UploadState::Initialized => "initialized",
            UploadState::Transferring => "transferring",
            UploadState::Completed => "completed",
            UploadState::Aborted => "aborted",
            UploadState::Abandoned => "abandoned",
        }
    }

    /// Returns true if `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: UploadState) -> bool {
        use UploadState::*;
        matches!(
            (*self, next),
            (Uninitialized, Initialized)
                | (Initialized, Transferring)
                | (Transferring, Completed)
                | (Transferring, Aborted)
                | (Initialized, Abandoned)
                | (Transferring, Abandoned)
        )
    }

    /// Returns true for states with no successor.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadState::Completed | UploadState::Aborted | UploadState::Abandoned
        )
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRecord {
    /// 1-indexed part number.
    pub part_number: u32,
    /// URL the part was sent to.
    pub presigned_url: String,
    /// ETag returned by the store, without quotes.
    pub etag: Option<String>,
    /// Bytes in the part.
    pub size: u64,
}

/// One in-flight or finished file transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSession {
    /// Server-assigned session id.
    pub upload_id: String,
    /// Negotiated strategy.
    pub strategy: UploadStrategy,
    /// Asset column the upload writes into.
    pub target: UploadTarget,
    /// Size of the source.
    pub total_bytes: u64,
    /// Bytes acknowledged so far; never decreases and never exceeds `total_bytes`.
    pub uploaded_bytes: u64,
    /// Parts sent so far, in ascending part number. Multipart only.
    pub parts: Vec<PartRecord>,
    /// Current lifecycle state.
    pub state: UploadState,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
}

impl UploadSession {
    /// Creates an uninitialized session.
    pub fn new(
        upload_id: impl Into<String>,
        strategy: UploadStrategy,
        target: UploadTarget,
        total_bytes: u64,
    ) -> Self {
        Self {
            upload_id: upload_id.into(),
            strategy,
            target,
            total_bytes,
            uploaded_bytes: 0,
            parts: Vec::new(),
            state: UploadState::Uninitialized,
            created_at: Utc::now(),
        }
    }

    /// Moves the session to `next`.
    pub fn transition(&mut self, next: UploadState) -> ClientResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(ClientError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Adds `bytes` to the acknowledged count, capped at the total.
    pub fn record_progress(&mut self, bytes: u64) -> u64 {
        self.uploaded_bytes = self
            .uploaded_bytes
            .saturating_add(bytes)
            .min(self.total_bytes);
        self.uploaded_bytes
    }

    /// Raises the acknowledged count to `loaded`; lower values are ignored.
    pub fn set_uploaded(&mut self, loaded: u64) -> u64 {
        self.uploaded_bytes = self.uploaded_bytes.max(loaded.min(self.total_bytes));
        self.uploaded_bytes
    }

    /// Returns a progress event for the current count.
    pub fn progress(&self) -> ProgressEvent {
        ProgressEvent::new(self.upload_id.clone(), self.uploaded_bytes, self.total_bytes)
    }

    /// Returns the parts list for completion.
    ///
    /// Fails if any part lacks an ETag.
    pub fn completed_parts(&self) -> ClientResult<Vec<CompletedPart>> {
        self.parts
            .iter()
            .map(|part| match &part.etag {
                Some(etag) if !etag.is_empty() => Ok(CompletedPart {
                    part_number: part.part_number,
                    etag: etag.clone(),
                }),
                _ => Err(ClientError::missing_etag(part.part_number)),
            })
            .collect()
    }
}
