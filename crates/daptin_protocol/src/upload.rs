//! Upload session wire types and multipart planning.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Smallest part cloud object stores accept for any part but the last (5 MiB).
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Part cap applied when the server does not announce one.
pub const DEFAULT_MAX_PARTS: u64 = 10_000;

/// The transfer strategy negotiated for one upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStrategy {
    /// Bytes are streamed through the Daptin server.
    Stream,
    /// Bytes go straight to cloud storage through one presigned URL.
    Presigned,
    /// Bytes go to cloud storage in sequential presigned parts.
    Multipart,
}

impl UploadStrategy {
    /// Returns the wire name of the strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStrategy::Stream => "stream",
            UploadStrategy::Presigned => "presigned",
            UploadStrategy::Multipart => "multipart",
        }
    }

    /// Parses a wire name, returning `None` for unrecognized values.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "stream" => Some(UploadStrategy::Stream),
            "presigned" => Some(UploadStrategy::Presigned),
            "multipart" => Some(UploadStrategy::Multipart),
            _ => None,
        }
    }
}

impl fmt::Display for UploadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The asset column an upload writes into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadTarget {
    /// Resource type name.
    pub type_name: String,
    /// Reference id of the resource.
    pub resource_id: String,
    /// Asset column on the resource.
    pub column_name: String,
    /// File name stored on the server.
    pub file_name: String,
}

impl UploadTarget {
    /// Creates a new upload target.
    pub fn new(
        type_name: impl Into<String>,
        resource_id: impl Into<String>,
        column_name: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            resource_id: resource_id.into(),
            column_name: column_name.into(),
            file_name: file_name.into(),
        }
    }
}

/// Init answer for an upload streamed through the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInit {
    /// Server-assigned session id.
    pub upload_id: String,
}

/// Init answer for a single-shot presigned upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedInit {
    /// Server-assigned session id.
    pub upload_id: String,
    /// URL the bytes are sent to.
    pub presigned_url: String,
    /// HTTP method the storage expects.
    pub method: String,
    /// Extra headers the storage requires.
    pub headers: BTreeMap<String, String>,
    /// Expiry of the presigned URL, in seconds since the epoch.
    pub expires_at: Option<i64>,
}

/// A part URL the server issued together with the init answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedPart {
    /// 1-indexed part number.
    pub part_number: u32,
    /// URL the part bytes are sent to.
    #[serde(alias = "url")]
    pub presigned_url: String,
    /// HTTP method the storage expects.
    #[serde(default = "default_part_method")]
    pub method: String,
    /// Extra headers the storage requires.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl IssuedPart {
    /// Returns the part URL in the shape of a per-part URL answer.
    pub fn to_part_url(&self) -> PartUrlResponse {
        PartUrlResponse {
            presigned_url: self.presigned_url.clone(),
            method: self.method.clone(),
            headers: self.headers.clone(),
        }
    }
}

/// Init answer for a chunked multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartInit {
    /// Server-assigned session id.
    pub upload_id: String,
    /// Id of the multipart upload in the object store, when the server exposes it.
    pub multipart_upload_id: Option<String>,
    /// Minimum size of every part except the last.
    pub min_part_size: u64,
    /// Maximum number of parts the store accepts.
    pub max_parts: u64,
    /// Server path serving per-part presigned URLs.
    pub part_url_endpoint: Option<String>,
    /// Server path aborting the multipart upload.
    pub abort_endpoint: Option<String>,
    /// Server path completing the multipart upload.
    pub complete_multipart_endpoint: Option<String>,
    /// Part URLs issued up front, in ascending part number. Empty when part
    /// URLs are requested one at a time.
    pub parts: Vec<IssuedPart>,
}

impl MultipartInit {
    /// Plans the parts for a file of `file_size` bytes.
    pub fn plan(&self, file_size: u64) -> ProtocolResult<PartPlan> {
        plan_parts(file_size, self.min_part_size, self.max_parts)
    }

    /// Returns true if the server issued every part URL up front.
    pub fn has_issued_parts(&self) -> bool {
        !self.parts.is_empty()
    }

    /// Looks up the issued URL of `part_number`.
    pub fn issued_part(&self, part_number: u32) -> Option<&IssuedPart> {
        self.parts.iter().find(|part| part.part_number == part_number)
    }

    /// Returns the id to pass when aborting the multipart upload.
    pub fn abort_upload_id(&self) -> &str {
        self.multipart_upload_id
            .as_deref()
            .unwrap_or(self.upload_id.as_str())
    }
}

/// The server's answer to an upload session init, keyed by `upload_type`.
///
/// An unrecognized `upload_type` selects [`UploadInitResponse::Stream`]. A
/// missing one selects [`UploadInitResponse::Presigned`] when a presigned URL
/// or issued parts are present, and stream otherwise. A presigned answer
/// carrying `presigned_data.parts` decodes as [`UploadInitResponse::Multipart`]
/// with the parts issued up front.
///
/// Presigned and multipart fields may arrive at the top level or nested in a
/// `presigned_data` object; top-level values win.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawUploadInit")]
pub enum UploadInitResponse {
    /// Stream through the server.
    Stream(StreamInit),
    /// Single presigned URL.
    Presigned(PresignedInit),
    /// Chunked multipart upload.
    Multipart(MultipartInit),
}

impl UploadInitResponse {
    /// Decodes an init response from a JSON body.
    pub fn from_json(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Returns the server-assigned session id.
    pub fn upload_id(&self) -> &str {
        match self {
            UploadInitResponse::Stream(init) => &init.upload_id,
            UploadInitResponse::Presigned(init) => &init.upload_id,
            UploadInitResponse::Multipart(init) => &init.upload_id,
        }
    }

    /// Returns the negotiated strategy.
    pub fn strategy(&self) -> UploadStrategy {
        match self {
            UploadInitResponse::Stream(_) => UploadStrategy::Stream,
            UploadInitResponse::Presigned(_) => UploadStrategy::Presigned,
            UploadInitResponse::Multipart(_) => UploadStrategy::Multipart,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawPresignedData {
    upload_type: Option<String>,
    presigned_url: Option<String>,
    method: Option<String>,
    headers: Option<BTreeMap<String, String>>,
    expires_at: Option<Value>,
    upload_id: Option<String>,
    min_part_size: Option<u64>,
    max_parts: Option<u64>,
    part_url_endpoint: Option<String>,
    abort_endpoint: Option<String>,
    complete_multipart_endpoint: Option<String>,
    #[serde(default)]
    parts: Vec<IssuedPart>,
}

#[derive(Debug, Deserialize)]
struct RawUploadInit {
    upload_id: Option<String>,
    upload_type: Option<String>,
    presigned_url: Option<String>,
    method: Option<String>,
    headers: Option<BTreeMap<String, String>>,
    expires_at: Option<Value>,
    #[serde(alias = "s3_upload_id")]
    multipart_upload_id: Option<String>,
    min_part_size: Option<u64>,
    max_parts: Option<u64>,
    part_url_endpoint: Option<String>,
    abort_endpoint: Option<String>,
    complete_multipart_endpoint: Option<String>,
    presigned_data: Option<RawPresignedData>,
}

fn epoch_seconds(value: Option<Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

impl TryFrom<RawUploadInit> for UploadInitResponse {
    type Error = ProtocolError;

    fn try_from(raw: RawUploadInit) -> ProtocolResult<Self> {
        let nested = raw.presigned_data.unwrap_or_default();

        let upload_id = raw
            .upload_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ProtocolError::invalid_structure("upload init carries no upload_id"))?;

        let mut parts = nested.parts;
        parts.sort_by_key(|part| part.part_number);
        let has_url = raw.presigned_url.is_some() || nested.presigned_url.is_some();

        let strategy = match raw.upload_type.as_deref().or(nested.upload_type.as_deref()) {
            Some(name) => UploadStrategy::parse(name).unwrap_or(UploadStrategy::Stream),
            None if has_url || !parts.is_empty() => UploadStrategy::Presigned,
            None => UploadStrategy::Stream,
        };
        let strategy = match strategy {
            UploadStrategy::Presigned if !parts.is_empty() => UploadStrategy::Multipart,
            other => other,
        };

        match strategy {
            UploadStrategy::Stream => Ok(Self::Stream(StreamInit { upload_id })),
            UploadStrategy::Presigned => {
                let presigned_url = raw.presigned_url.or(nested.presigned_url).ok_or_else(|| {
                    ProtocolError::invalid_structure("presigned upload carries no presigned_url")
                })?;
                Ok(Self::Presigned(PresignedInit {
                    upload_id,
                    presigned_url,
                    method: raw
                        .method
                        .or(nested.method)
                        .unwrap_or_else(|| "PUT".to_string())
                        .to_ascii_uppercase(),
                    headers: raw.headers.or(nested.headers).unwrap_or_default(),
                    expires_at: epoch_seconds(raw.expires_at).or(epoch_seconds(nested.expires_at)),
                }))
            }
            UploadStrategy::Multipart => Ok(Self::Multipart(MultipartInit {
                upload_id,
                multipart_upload_id: raw.multipart_upload_id.or(nested.upload_id),
                min_part_size: raw
                    .min_part_size
                    .or(nested.min_part_size)
                    .unwrap_or(MIN_PART_SIZE),
                max_parts: raw
                    .max_parts
                    .or(nested.max_parts)
                    .unwrap_or(if parts.is_empty() {
                        DEFAULT_MAX_PARTS
                    } else {
                        parts.len() as u64
                    }),
                part_url_endpoint: raw.part_url_endpoint.or(nested.part_url_endpoint),
                abort_endpoint: raw.abort_endpoint.or(nested.abort_endpoint),
                complete_multipart_endpoint: raw
                    .complete_multipart_endpoint
                    .or(nested.complete_multipart_endpoint),
                parts,
            })),
        }
    }
}

/// Computes the multipart part size.
///
/// The result is `max(min_part_size, ceil(file_size / max_parts))`, so the
/// part count never exceeds `max_parts` and no part but the last falls under
/// `min_part_size`. Never returns zero.
pub fn part_size(file_size: u64, min_part_size: u64, max_parts: u64) -> u64 {
    let spread = file_size.div_ceil(max_parts.max(1));
    min_part_size.max(spread).max(1)
}

/// Splits `file_size` bytes into contiguous, 1-indexed parts.
///
/// Fails when the layout needs more parts than a `u32` part number can count.
pub fn plan_parts(file_size: u64, min_part_size: u64, max_parts: u64) -> ProtocolResult<PartPlan> {
    let plan = PartPlan {
        file_size,
        part_size: part_size(file_size, min_part_size, max_parts),
    };
    if plan.len() > u64::from(u32::MAX) {
        return Err(ProtocolError::Validation(format!(
            "{file_size} bytes in {}-byte parts exceeds {} parts",
            plan.part_size,
            u32::MAX
        )));
    }
    Ok(plan)
}

/// A contiguous byte range `[start, end)` uploaded as one part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    /// 1-indexed part number.
    pub part_number: u32,
    /// First byte of the part.
    pub start: u64,
    /// One past the last byte of the part.
    pub end: u64,
}

impl PartRange {
    /// Number of bytes in the part.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Returns true if the part holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// The part layout of one multipart upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    /// Total bytes to upload.
    pub file_size: u64,
    /// Size of every part except possibly the last.
    pub part_size: u64,
}

impl PartPlan {
    /// Number of parts in the plan.
    pub fn len(&self) -> u64 {
        self.file_size.div_ceil(self.part_size)
    }

    /// Returns true if there is nothing to upload.
    pub fn is_empty(&self) -> bool {
        self.file_size == 0
    }

    /// Iterates the parts in ascending part-number order.
    pub fn iter(&self) -> PartIter {
        PartIter {
            plan: *self,
            offset: 0,
        }
    }
}

impl IntoIterator for PartPlan {
    type Item = PartRange;
    type IntoIter = PartIter;

    fn into_iter(self) -> PartIter {
        self.iter()
    }
}

/// Iterator over the parts of a [`PartPlan`].
#[derive(Debug, Clone)]
pub struct PartIter {
    plan: PartPlan,
    offset: u64,
}

impl Iterator for PartIter {
    type Item = PartRange;

    fn next(&mut self) -> Option<PartRange> {
        if self.offset >= self.plan.file_size {
            return None;
        }
        let start = self.offset;
        let end = start
            .saturating_add(self.plan.part_size)
            .min(self.plan.file_size);
        let part_number = u32::try_from(start / self.plan.part_size + 1).ok()?;
        self.offset = end;
        Some(PartRange {
            part_number,
            start,
            end,
        })
    }
}

/// The server's answer when asked for one part's presigned URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartUrlResponse {
    /// URL the part bytes are sent to.
    #[serde(alias = "url")]
    pub presigned_url: String,
    /// HTTP method the storage expects.
    #[serde(default = "default_part_method")]
    pub method: String,
    /// Extra headers the storage requires.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_part_method() -> String {
    "PUT".to_string()
}

/// One acknowledged part, as sent to the completion endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    /// 1-indexed part number.
    pub part_number: u32,
    /// ETag returned by the object store, without quotes.
    pub etag: String,
}

/// Body of the multipart completion call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteMultipartRequest {
    /// Server-assigned session id.
    pub upload_id: String,
    /// Every uploaded part with its ETag.
    pub parts: Vec<CompletedPart>,
}

/// Removes the quotes object stores put around ETag values.
pub fn strip_etag_quotes(etag: &str) -> String {
    etag.trim().replace('"', "")
}

/// A progress notification for one upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Bytes transferred so far.
    pub loaded: u64,
    /// Total bytes of the upload.
    pub total: u64,
    /// `loaded / total * 100`.
    pub percent: f64,
    /// Session the event belongs to.
    pub upload_id: String,
}

impl ProgressEvent {
    /// Creates an event, deriving the percentage.
    pub fn new(upload_id: impl Into<String>, loaded: u64, total: u64) -> Self {
        let percent = if total == 0 {
            100.0
        } else {
            loaded as f64 / total as f64 * 100.0
        };
        Self {
            loaded,
            total,
            percent,
            upload_id: upload_id.into(),
        }
    }

    /// Tags the event with the position of its file in a batch.
    ///
    /// `index` is 0-based; the suffix is 1-based (`<id>_file_2_of_5`).
    pub fn for_file(mut self, index: usize, count: usize) -> Self {
        self.upload_id = format!("{}_file_{}_of_{}", self.upload_id, index + 1, count);
        self
    }
}

/// The locally persisted descriptor of a resumable upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumableSession {
    /// Resource type name.
    pub type_name: String,
    /// Reference id of the resource.
    pub resource_id: String,
    /// Asset column on the resource.
    pub column_name: String,
    /// File name stored on the server.
    pub file_name: String,
    /// Size of the file in bytes.
    pub file_size: u64,
    /// MIME type of the file.
    pub file_type: String,
    /// Server-assigned session id.
    pub upload_id: String,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
}

impl ResumableSession {
    /// Returns the storage key of a session: `<prefix>_<upload_id>`.
    pub fn storage_key(prefix: &str, upload_id: &str) -> String {
        format!("{prefix}_{upload_id}")
    }

    /// Returns the upload target the session writes into.
    pub fn target(&self) -> UploadTarget {
        UploadTarget::new(
            self.type_name.clone(),
            self.resource_id.clone(),
            self.column_name.clone(),
            self.file_name.clone(),
        )
    }

    /// Encodes the session as JSON.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a session from JSON.
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    const MIB: u64 = 1024 * 1024;

    fn decode(value: Value) -> ProtocolResult<UploadInitResponse> {
        UploadInitResponse::from_json(value.to_string().as_bytes())
    }

    #[test]
    fn missing_upload_type_defaults_to_stream() {
        let init = decode(json!({"upload_id": "u-1"})).unwrap();
        assert_eq!(init.strategy(), UploadStrategy::Stream);
        assert_eq!(init.upload_id(), "u-1");
    }

    #[test]
    fn unknown_upload_type_defaults_to_stream() {
        let init = decode(json!({"upload_id": "u-1", "upload_type": "carrier-pigeon"})).unwrap();
        assert_eq!(init, UploadInitResponse::Stream(StreamInit { upload_id: "u-1".into() }));
    }

    #[test]
    fn presigned_flat_shape() {
        let init = decode(json!({
            "upload_id": "u-2",
            "upload_type": "presigned",
            "presigned_url": "https://bucket.example.com/obj?sig=1",
            "method": "post",
            "headers": {"x-amz-acl": "private"},
            "expires_at": 1700000000
        }))
        .unwrap();

        match init {
            UploadInitResponse::Presigned(p) => {
                assert_eq!(p.presigned_url, "https://bucket.example.com/obj?sig=1");
                assert_eq!(p.method, "POST");
                assert_eq!(p.headers.get("x-amz-acl").map(String::as_str), Some("private"));
                assert_eq!(p.expires_at, Some(1_700_000_000));
            }
            other => panic!("expected presigned, got {other:?}"),
        }
    }

    #[test]
    fn presigned_nested_shape() {
        let init = decode(json!({
            "upload_id": "u-3",
            "presigned_data": {
                "upload_type": "presigned",
                "presigned_url": "https://storage.example.com/put",
                "expires_at": "1700000100"
            }
        }))
        .unwrap();

        match init {
            UploadInitResponse::Presigned(p) => {
                assert_eq!(p.presigned_url, "https://storage.example.com/put");
                assert_eq!(p.method, "PUT");
                assert!(p.headers.is_empty());
                assert_eq!(p.expires_at, Some(1_700_000_100));
            }
            other => panic!("expected presigned, got {other:?}"),
        }
    }

    #[test]
    fn presigned_without_url_is_rejected() {
        let err = decode(json!({"upload_id": "u-4", "upload_type": "presigned"})).unwrap_err();
        assert!(err.to_string().contains("presigned_url"));
    }

    #[test]
    fn bare_presigned_url_selects_presigned() {
        let init = decode(json!({
            "upload_id": "u-9",
            "presigned_url": "https://bucket.example.com/obj"
        }))
        .unwrap();
        assert_eq!(init.strategy(), UploadStrategy::Presigned);

        let init = decode(json!({
            "upload_id": "u-9",
            "upload_type": "stream",
            "presigned_url": "https://bucket.example.com/obj"
        }))
        .unwrap();
        assert_eq!(init.strategy(), UploadStrategy::Stream);
    }

    #[test]
    fn presigned_with_issued_parts_is_multipart() {
        let init = decode(json!({
            "upload_id": "u1",
            "upload_type": "presigned",
            "presigned_data": {
                "parts": [
                    {"part_number": 2, "presigned_url": "https://s3/p2"},
                    {"part_number": 1, "presigned_url": "https://s3/p1", "headers": {"x-amz-acl": "private"}}
                ],
                "complete_multipart_endpoint": "/asset/doc/1/file/upload?operation=complete"
            }
        }))
        .unwrap();

        match init {
            UploadInitResponse::Multipart(m) => {
                assert!(m.has_issued_parts());
                assert_eq!(
                    m.parts.iter().map(|p| p.part_number).collect::<Vec<_>>(),
                    vec![1, 2]
                );
                assert_eq!(m.max_parts, 2);
                assert_eq!(m.min_part_size, MIN_PART_SIZE);
                let first = m.issued_part(1).unwrap().to_part_url();
                assert_eq!(first.presigned_url, "https://s3/p1");
                assert_eq!(first.method, "PUT");
                assert_eq!(first.headers.get("x-amz-acl").map(String::as_str), Some("private"));
                assert!(m.issued_part(3).is_none());
                assert_eq!(m.plan(6 * MIB).unwrap().len(), 2);
            }
            other => panic!("expected multipart, got {other:?}"),
        }
    }

    #[test]
    fn issued_parts_without_upload_type_are_multipart() {
        let init = decode(json!({
            "upload_id": "u1",
            "presigned_data": {"parts": [{"part_number": 1, "url": "https://s3/p1"}]}
        }))
        .unwrap();
        assert_eq!(init.strategy(), UploadStrategy::Multipart);
    }

    #[test]
    fn missing_upload_id_is_rejected() {
        assert!(decode(json!({"upload_type": "stream"})).is_err());
        assert!(decode(json!({"upload_id": "", "upload_type": "stream"})).is_err());
    }

    #[test]
    fn multipart_defaults() {
        let init = decode(json!({"upload_id": "u-5", "upload_type": "multipart"})).unwrap();
        match init {
            UploadInitResponse::Multipart(m) => {
                assert_eq!(m.min_part_size, MIN_PART_SIZE);
                assert_eq!(m.max_parts, DEFAULT_MAX_PARTS);
                assert_eq!(m.abort_upload_id(), "u-5");
            }
            other => panic!("expected multipart, got {other:?}"),
        }
    }

    #[test]
    fn multipart_nested_fields() {
        let init = decode(json!({
            "upload_id": "u-6",
            "upload_type": "multipart",
            "presigned_data": {
                "upload_id": "s3-abc",
                "min_part_size": 1024,
                "max_parts": 3,
                "complete_multipart_endpoint": "/asset/doc/1/file/upload?operation=complete"
            }
        }))
        .unwrap();

        match init {
            UploadInitResponse::Multipart(m) => {
                assert_eq!(m.multipart_upload_id.as_deref(), Some("s3-abc"));
                assert_eq!(m.abort_upload_id(), "s3-abc");
                assert_eq!(m.min_part_size, 1024);
                assert_eq!(m.max_parts, 3);
                assert!(m.complete_multipart_endpoint.is_some());
            }
            other => panic!("expected multipart, got {other:?}"),
        }
    }

    #[test]
    fn twelve_mib_in_five_mib_parts() {
        let plan = plan_parts(12 * MIB, 5 * MIB, 10_000).unwrap();
        assert_eq!(plan.part_size, 5 * MIB);
        let parts: Vec<_> = plan.iter().collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(
            parts.iter().map(PartRange::len).collect::<Vec<_>>(),
            vec![5 * MIB, 5 * MIB, 2 * MIB]
        );
        assert_eq!(
            parts.iter().map(|p| p.part_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(parts.iter().map(PartRange::len).sum::<u64>(), 12 * MIB);
    }

    #[test]
    fn part_cap_grows_part_size() {
        // 100 bytes, min 10, at most 4 parts -> 25-byte parts
        let plan = plan_parts(100, 10, 4).unwrap();
        assert_eq!(plan.part_size, 25);
        assert_eq!(plan.len(), 4);
    }

    #[test]
    fn empty_file_has_no_parts() {
        let plan = plan_parts(0, MIN_PART_SIZE, DEFAULT_MAX_PARTS).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.iter().count(), 0);
    }

    #[test]
    fn part_count_beyond_u32_is_rejected() {
        let err = plan_parts(u64::MAX, 1, u64::MAX).unwrap_err();
        assert!(matches!(err, ProtocolError::Validation(_)));

        let edge = plan_parts(u64::from(u32::MAX), 1, u64::MAX).unwrap();
        assert_eq!(edge.len(), u64::from(u32::MAX));
    }

    #[test]
    fn zero_limits_never_yield_zero_part_size() {
        assert_eq!(part_size(10, 0, 0), 10);
        assert_eq!(part_size(0, 0, 0), 1);
    }

    #[test]
    fn etag_quotes_are_stripped() {
        assert_eq!(strip_etag_quotes("\"abc123\""), "abc123");
        assert_eq!(strip_etag_quotes("abc123"), "abc123");
    }

    #[test]
    fn progress_percent_and_batch_suffix() {
        let event = ProgressEvent::new("u-7", 25, 100);
        assert!((event.percent - 25.0).abs() < f64::EPSILON);

        let tagged = event.for_file(1, 3);
        assert_eq!(tagged.upload_id, "u-7_file_2_of_3");
        assert_eq!(tagged.loaded, 25);

        assert!((ProgressEvent::new("empty", 0, 0).percent - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn resumable_session_uses_camel_case_keys() {
        let session = ResumableSession {
            type_name: "document".into(),
            resource_id: "r-1".into(),
            column_name: "file".into(),
            file_name: "report.pdf".into(),
            file_size: 42,
            file_type: "application/pdf".into(),
            upload_id: "u-8".into(),
            created_at: Utc::now(),
        };
        let value: Value = serde_json::from_str(&session.to_json().unwrap()).unwrap();
        for key in [
            "typeName",
            "resourceId",
            "columnName",
            "fileName",
            "fileSize",
            "fileType",
            "uploadId",
            "createdAt",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(
            ResumableSession::storage_key("daptin_upload", "u-8"),
            "daptin_upload_u-8"
        );
        assert_eq!(session.target().file_name, "report.pdf");
    }

    proptest! {
        #[test]
        fn part_count_matches_formula(
            file_size in 0u64..(64 * MIB),
            min in 1u64..(8 * MIB),
            max_parts in 1u64..20_000,
        ) {
            let plan = plan_parts(file_size, min, max_parts).unwrap();
            let expected_size = min.max(file_size.div_ceil(max_parts));
            prop_assert_eq!(plan.part_size, expected_size.max(1));

            let parts: Vec<_> = plan.iter().collect();
            prop_assert_eq!(parts.len() as u64, file_size.div_ceil(plan.part_size));
            prop_assert!(parts.len() as u64 <= max_parts);

            if let Some((last, rest)) = parts.split_last() {
                for part in rest {
                    prop_assert_eq!(part.len(), plan.part_size);
                }
                prop_assert!(last.len() <= plan.part_size);
                prop_assert!(!last.is_empty());
            }
        }

        #[test]
        fn parts_cover_file_exactly(
            file_size in 0u64..(32 * MIB),
            min in 1u64..(4 * MIB),
            max_parts in 1u64..10_000,
        ) {
            let mut uploaded = 0u64;
            for (i, part) in plan_parts(file_size, min, max_parts).unwrap().iter().enumerate() {
                prop_assert_eq!(part.start, uploaded);
                prop_assert_eq!(part.part_number as usize, i + 1);
                uploaded += part.len();
            }
            prop_assert_eq!(uploaded, file_size);
        }
    }
}
