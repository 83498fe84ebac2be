//! Asset Upload Engine.
//!
//! Moves a byte source into an asset column of a resource. The server picks
//! the strategy at init time:
//!
//! - **stream**: one authenticated `PUT` through the Daptin server, progress
//!   reported as the transport consumes each chunk
//! - **presigned**: one request straight to cloud storage on a separate,
//!   unauthenticated transport
//! - **multipart**: sequential presigned parts, one in flight at a time,
//!   each acknowledged by an ETag, then a completion call listing every part.
//!   Part URLs are requested per part unless the init answer issued them all
//!
//! Resumable sessions persist only their identity; resuming restarts the
//! whole transfer. Cancelling removes the local record and never contacts
//! the server. Abandoned sessions are not collected.

mod session;
mod source;

pub use session::{PartRecord, UploadSession, UploadState};
pub use source::{FileSource, MemorySource, UploadSource, DEFAULT_CONTENT_TYPE};

use crate::api::ApiContext;
use crate::error::{ClientError, ClientResult};
use crate::session_store::SessionStore;
use crate::transport::{ensure_success, ByteStream, HttpRequest, HttpTransport, Method};
use chrono::Utc;
use daptin_protocol::{
    CompleteMultipartRequest, CompletedPart, MultipartInit, PartUrlResponse, PresignedInit,
    ProgressEvent, ResumableSession, UploadInitResponse, UploadStrategy, UploadTarget,
};
use futures::StreamExt;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Receives progress events synchronously.
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Per-upload options.
#[derive(Clone, Default)]
pub struct UploadOptions {
    /// Progress callback.
    pub on_progress: Option<ProgressCallback>,
    /// Extra metadata merged into the completion body.
    pub metadata: Map<String, Value>,
    /// Overrides the source's MIME type.
    pub content_type: Option<String>,
}

impl fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadOptions")
            .field("on_progress", &self.on_progress.is_some())
            .field("metadata", &self.metadata)
            .field("content_type", &self.content_type)
            .finish()
    }
}

impl UploadOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    /// Adds one completion metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Overrides the MIME type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(callback) = &self.on_progress {
            callback(&event);
        }
    }
}

/// Drives uploads and tracks their sessions.
pub struct AssetManager {
    api: ApiContext,
    storage: Arc<dyn HttpTransport>,
    store: Arc<dyn SessionStore>,
    sessions: RwLock<BTreeMap<String, UploadSession>>,
}

impl fmt::Debug for AssetManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetManager")
            .field("api", &self.api)
            .field("sessions", &self.sessions.read().len())
            .finish_non_exhaustive()
    }
}

impl AssetManager {
    /// Creates an engine.
    ///
    /// `storage` carries presigned traffic to third-party storage and must not
    /// inject credentials.
    pub fn new(
        api: ApiContext,
        storage: Arc<dyn HttpTransport>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            api,
            storage,
            store,
            sessions: RwLock::new(BTreeMap::new()),
        }
    }

    fn upload_url(&self, target: &UploadTarget, query: &[(&str, &str)]) -> ClientResult<String> {
        self.api.url(
            &[
                "asset",
                &target.type_name,
                &target.resource_id,
                &target.column_name,
                "upload",
            ],
            query,
        )
    }

    fn session_key(&self, upload_id: &str) -> String {
        ResumableSession::storage_key(&self.api.config().session_key_prefix, upload_id)
    }

    fn track(&self, session: &UploadSession) {
        self.sessions
            .write()
            .insert(session.upload_id.clone(), session.clone());
    }

    /// Moves a tracked session to `state` when that transition is legal.
    fn mark(&self, upload_id: &str, state: UploadState) {
        if let Some(session) = self.sessions.write().get_mut(upload_id) {
            if let Err(err) = session.transition(state) {
                debug!(upload_id, error = %err, "tracked session left unchanged");
            }
        }
    }

    /// Returns a tracked session.
    pub fn session(&self, upload_id: &str) -> Option<UploadSession> {
        self.sessions.read().get(upload_id).cloned()
    }

    /// Returns every tracked session.
    pub fn sessions(&self) -> Vec<UploadSession> {
        self.sessions.read().values().cloned().collect()
    }

    /// Forgets completed and aborted sessions; returns how many were dropped.
    pub fn prune_finished(&self) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| {
            !matches!(s.state, UploadState::Completed | UploadState::Aborted)
        });
        before - sessions.len()
    }

    /// Builds the download URL of an asset without fetching it.
    pub fn asset_url(
        &self,
        type_name: &str,
        resource_id: &str,
        column_name: &str,
        file_name: &str,
    ) -> ClientResult<String> {
        self.api.url(
            &["asset", type_name, resource_id, column_name],
            &[("filename", file_name)],
        )
    }

    /// Opens an upload session; the server picks the strategy.
    pub async fn init_upload(
        &self,
        target: &UploadTarget,
        file_size: u64,
        file_type: &str,
    ) -> ClientResult<UploadInitResponse> {
        let url = self.upload_url(
            target,
            &[("operation", "init"), ("filename", &target.file_name)],
        )?;
        let request = self
            .api
            .authorized(HttpRequest::post(url))?
            .header("X-File-Name", target.file_name.as_str())
            .header("X-File-Size", file_size.to_string())
            .header("X-File-Type", file_type)
            .json(Value::Object(Map::new()));

        let response = self.api.send(request).await?;
        let init = UploadInitResponse::from_json(&response.body)?;
        info!(
            upload_id = init.upload_id(),
            strategy = %init.strategy(),
            file = %target.file_name,
            "upload initialized"
        );
        Ok(init)
    }

    /// Uploads `source` into an asset column.
    ///
    /// The file name falls back to the source name, then to `upload`.
    pub async fn upload_file(
        &self,
        type_name: &str,
        resource_id: &str,
        column_name: &str,
        source: Arc<dyn UploadSource>,
        file_name: Option<&str>,
        options: &UploadOptions,
    ) -> ClientResult<UploadSession> {
        let file_name = file_name
            .map(str::to_string)
            .or_else(|| source.name())
            .unwrap_or_else(|| "upload".to_string());
        let target = UploadTarget::new(type_name, resource_id, column_name, file_name);
        let file_type = options
            .content_type
            .clone()
            .unwrap_or_else(|| source.content_type());
        let total = source.size();

        let init = self.init_upload(&target, total, &file_type).await?;
        let mut session =
            UploadSession::new(init.upload_id(), init.strategy(), target, total);
        session.transition(UploadState::Initialized)?;
        session.transition(UploadState::Transferring)?;
        self.track(&session);

        let outcome = self
            .transfer(&mut session, &init, source, &file_type, options)
            .await;
        if let Err(err) = outcome {
            warn!(upload_id = %session.upload_id, error = %err, "upload abandoned");
            session.transition(UploadState::Abandoned)?;
            self.track(&session);
            return Err(err);
        }

        session.transition(UploadState::Completed)?;
        self.track(&session);
        info!(
            upload_id = %session.upload_id,
            bytes = session.uploaded_bytes,
            strategy = %session.strategy,
            "upload completed"
        );
        Ok(session)
    }

    async fn transfer(
        &self,
        session: &mut UploadSession,
        init: &UploadInitResponse,
        source: Arc<dyn UploadSource>,
        file_type: &str,
        options: &UploadOptions,
    ) -> ClientResult<()> {
        match init {
            UploadInitResponse::Stream(_) => {
                self.restream(session, source, file_type, options).await
            }
            UploadInitResponse::Presigned(presigned) => {
                self.transfer_presigned(session, presigned, source, file_type, options)
                    .await?;
                self.complete_upload(
                    &session.target,
                    &session.upload_id,
                    completion_metadata(session.total_bytes, file_type, options),
                )
                .await
            }
            UploadInitResponse::Multipart(multipart) => {
                self.transfer_multipart(session, multipart, source, file_type, options)
                    .await?;
                let parts = session.completed_parts()?;
                self.complete_multipart_upload(
                    &session.target,
                    &session.upload_id,
                    &parts,
                    multipart.complete_multipart_endpoint.as_deref(),
                )
                .await
            }
        }
    }

    async fn transfer_stream(
        &self,
        session: &mut UploadSession,
        source: Arc<dyn UploadSource>,
        file_type: &str,
        options: &UploadOptions,
    ) -> ClientResult<()> {
        let target = &session.target;
        let url = self.api.url(
            &[
                "asset",
                &target.type_name,
                &target.resource_id,
                &target.column_name,
                &target.file_name,
                "upload",
            ],
            &[
                ("operation", "stream"),
                ("upload_id", &session.upload_id),
                ("filename", &target.file_name),
            ],
        )?;

        let loaded = Arc::new(AtomicU64::new(0));
        let body = self.progress_stream(session, source, loaded.clone(), options);
        let request = self
            .api
            .authorized(HttpRequest::new(Method::Put, url))?
            .header("Content-Type", file_type)
            .stream(body, session.total_bytes);

        debug!(upload_id = %session.upload_id, bytes = session.total_bytes, "streaming upload");
        self.api.send(request).await?;
        self.finish_streamed(session, &loaded, options);
        Ok(())
    }

    async fn transfer_presigned(
        &self,
        session: &mut UploadSession,
        presigned: &PresignedInit,
        source: Arc<dyn UploadSource>,
        file_type: &str,
        options: &UploadOptions,
    ) -> ClientResult<()> {
        let method = Method::parse(&presigned.method).ok_or_else(|| {
            ClientError::Upload(format!("unsupported presigned method {}", presigned.method))
        })?;

        let loaded = Arc::new(AtomicU64::new(0));
        let body = self.progress_stream(session, source, loaded.clone(), options);
        let request = storage_request(method, &presigned.presigned_url, &presigned.headers, file_type)
            .stream(body, session.total_bytes);

        debug!(upload_id = %session.upload_id, method = %method, "uploading to presigned URL");
        ensure_success(self.storage.send(request).await?)?;
        self.finish_streamed(session, &loaded, options);
        Ok(())
    }

    async fn transfer_multipart(
        &self,
        session: &mut UploadSession,
        multipart: &MultipartInit,
        source: Arc<dyn UploadSource>,
        file_type: &str,
        options: &UploadOptions,
    ) -> ClientResult<()> {
        let plan = multipart.plan(session.total_bytes)?;
        if multipart.has_issued_parts() && plan.len() != multipart.parts.len() as u64 {
            return Err(ClientError::Upload(format!(
                "server issued {} part URLs for {} parts",
                multipart.parts.len(),
                plan.len()
            )));
        }
        debug!(
            upload_id = %session.upload_id,
            part_size = plan.part_size,
            parts = plan.len(),
            issued = multipart.has_issued_parts(),
            "multipart upload planned"
        );

        for part in plan {
            let part_url = if multipart.has_issued_parts() {
                multipart
                    .issued_part(part.part_number)
                    .map(|issued| issued.to_part_url())
                    .ok_or_else(|| {
                        ClientError::Upload(format!("no URL issued for part {}", part.part_number))
                    })?
            } else {
                self.part_url(
                    &session.target,
                    &session.upload_id,
                    part.part_number,
                    multipart.part_url_endpoint.as_deref(),
                )
                .await?
            };
            let method = Method::parse(&part_url.method).ok_or_else(|| {
                ClientError::Upload(format!("unsupported part method {}", part_url.method))
            })?;

            let chunk = source.read_range(part.start, part.end).await?;
            let request =
                storage_request(method, &part_url.presigned_url, &part_url.headers, file_type)
                    .bytes(chunk);
            let response = ensure_success(self.storage.send(request).await?)?;

            let etag = response
                .header("etag")
                .map(daptin_protocol::strip_etag_quotes)
                .filter(|etag| !etag.is_empty());
            session.parts.push(PartRecord {
                part_number: part.part_number,
                presigned_url: part_url.presigned_url,
                etag: etag.clone(),
                size: part.len(),
            });
            if etag.is_none() {
                return Err(ClientError::missing_etag(part.part_number));
            }

            session.record_progress(part.len());
            self.track(session);
            debug!(upload_id = %session.upload_id, part = part.part_number, "part uploaded");
            options.emit(session.progress());
        }

        if plan.is_empty() {
            options.emit(session.progress());
        }
        Ok(())
    }

    async fn part_url(
        &self,
        target: &UploadTarget,
        upload_id: &str,
        part_number: u32,
        endpoint: Option<&str>,
    ) -> ClientResult<PartUrlResponse> {
        let part_number = part_number.to_string();
        let query = [("upload_id", upload_id), ("part_number", part_number.as_str())];
        let url = match endpoint {
            Some(endpoint) => self.api.resolve(endpoint, &query)?,
            None => self.upload_url(target, &query)?,
        };
        self.api
            .send_json(self.api.authorized(HttpRequest::get(url))?)
            .await
    }

    /// Streams `source` in configured chunks, counting and reporting each
    /// chunk as the transport pulls it.
    fn progress_stream(
        &self,
        session: &UploadSession,
        source: Arc<dyn UploadSource>,
        loaded: Arc<AtomicU64>,
        options: &UploadOptions,
    ) -> ByteStream {
        let total = session.total_bytes;
        let chunk_size = self.api.config().stream_chunk_size;
        let upload_id = session.upload_id.clone();
        let callback = options.on_progress.clone();

        source
            .stream_range(0, total, chunk_size)
            .inspect(move |chunk| {
                if let Ok(chunk) = chunk {
                    let sent = loaded.fetch_add(chunk.len() as u64, Ordering::SeqCst)
                        + chunk.len() as u64;
                    if let Some(callback) = &callback {
                        callback(&ProgressEvent::new(upload_id.clone(), sent, total));
                    }
                }
            })
            .boxed()
    }

    fn finish_streamed(&self, session: &mut UploadSession, loaded: &AtomicU64, options: &UploadOptions) {
        session.set_uploaded(loaded.load(Ordering::SeqCst));
        self.track(session);
        if session.total_bytes == 0 {
            options.emit(session.progress());
        }
    }

    /// Tells the server a single-shot upload has landed.
    pub async fn complete_upload(
        &self,
        target: &UploadTarget,
        upload_id: &str,
        metadata: Map<String, Value>,
    ) -> ClientResult<()> {
        let url = self.upload_url(
            target,
            &[
                ("operation", "complete"),
                ("upload_id", upload_id),
                ("filename", &target.file_name),
            ],
        )?;
        let request = self
            .api
            .authorized(HttpRequest::post(url))?
            .json(Value::Object(metadata));
        self.api.send(request).await?;
        self.mark(upload_id, UploadState::Completed);
        Ok(())
    }

    /// Completes a multipart upload with every acknowledged part.
    ///
    /// `endpoint` is the server-provided completion path, if any.
    pub async fn complete_multipart_upload(
        &self,
        target: &UploadTarget,
        upload_id: &str,
        parts: &[CompletedPart],
        endpoint: Option<&str>,
    ) -> ClientResult<()> {
        if let Some(part) = parts.iter().find(|p| p.etag.is_empty()) {
            return Err(ClientError::missing_etag(part.part_number));
        }

        let url = match endpoint {
            Some(endpoint) => self.api.resolve(endpoint, &[])?,
            None => self.upload_url(
                target,
                &[
                    ("operation", "complete"),
                    ("upload_id", upload_id),
                    ("filename", &target.file_name),
                ],
            )?,
        };
        let body = serde_json::to_value(CompleteMultipartRequest {
            upload_id: upload_id.to_string(),
            parts: parts.to_vec(),
        })?;
        let request = self.api.authorized(HttpRequest::post(url))?.json(body);
        self.api.send(request).await?;
        self.mark(upload_id, UploadState::Completed);
        Ok(())
    }

    /// Aborts a multipart upload on the server.
    ///
    /// `upload_id` is the object-store multipart id when the server exposes
    /// one; `endpoint` is the server-provided abort path, if any.
    pub async fn abort_multipart_upload(
        &self,
        target: &UploadTarget,
        upload_id: &str,
        endpoint: Option<&str>,
    ) -> ClientResult<()> {
        let query = [("upload_id", upload_id), ("filename", target.file_name.as_str())];
        let url = match endpoint {
            Some(endpoint) => self.api.resolve(endpoint, &query)?,
            None => self.upload_url(target, &query)?,
        };
        let request = self
            .api
            .authorized(HttpRequest::new(Method::Delete, url))?;
        self.api.send(request).await?;
        info!(upload_id, "multipart upload aborted");
        self.mark(upload_id, UploadState::Aborted);
        Ok(())
    }

    /// Opens a session and persists its identity without transferring bytes.
    pub async fn create_resumable_upload(
        &self,
        type_name: &str,
        resource_id: &str,
        column_name: &str,
        file_name: &str,
        file_size: u64,
        file_type: &str,
    ) -> ClientResult<String> {
        let target = UploadTarget::new(type_name, resource_id, column_name, file_name);
        let init = self.init_upload(&target, file_size, file_type).await?;
        let upload_id = init.upload_id().to_string();

        let record = ResumableSession {
            type_name: type_name.to_string(),
            resource_id: resource_id.to_string(),
            column_name: column_name.to_string(),
            file_name: file_name.to_string(),
            file_size,
            file_type: file_type.to_string(),
            upload_id: upload_id.clone(),
            created_at: Utc::now(),
        };
        self.store
            .set(&self.session_key(&upload_id), &record.to_json()?)?;

        let mut session = UploadSession::new(&upload_id, init.strategy(), target, file_size);
        session.transition(UploadState::Initialized)?;
        self.track(&session);
        debug!(upload_id = %upload_id, "resumable session persisted");
        Ok(upload_id)
    }

    /// Re-runs a persisted session's transfer from the first byte.
    ///
    /// Fails with [`ClientError::SessionNotFound`] if no record exists. The
    /// record is removed only after the server acknowledges completion.
    pub async fn resume_upload(
        &self,
        upload_id: &str,
        source: Arc<dyn UploadSource>,
        options: &UploadOptions,
    ) -> ClientResult<UploadSession> {
        let key = self.session_key(upload_id);
        let record = self
            .store
            .get(&key)?
            .ok_or_else(|| ClientError::SessionNotFound(upload_id.to_string()))?;
        let record = ResumableSession::from_json(&record)?;

        let mut session = UploadSession::new(
            upload_id,
            UploadStrategy::Stream,
            record.target(),
            source.size(),
        );
        session.created_at = record.created_at;
        session.transition(UploadState::Initialized)?;
        session.transition(UploadState::Transferring)?;
        self.track(&session);

        let file_type = options
            .content_type
            .clone()
            .unwrap_or_else(|| record.file_type.clone());
        let outcome = self
            .restream(&mut session, source, &file_type, options)
            .await;
        if let Err(err) = outcome {
            warn!(upload_id, error = %err, "resumed upload abandoned");
            session.transition(UploadState::Abandoned)?;
            self.track(&session);
            return Err(err);
        }

        self.store.remove(&key)?;
        session.transition(UploadState::Completed)?;
        self.track(&session);
        info!(upload_id, "resumed upload completed");
        Ok(session)
    }

    /// Streams the whole source through the server, then completes.
    async fn restream(
        &self,
        session: &mut UploadSession,
        source: Arc<dyn UploadSource>,
        file_type: &str,
        options: &UploadOptions,
    ) -> ClientResult<()> {
        self.transfer_stream(session, source, file_type, options)
            .await?;
        self.complete_upload(
            &session.target,
            &session.upload_id,
            completion_metadata(session.total_bytes, file_type, options),
        )
        .await
    }

    /// Forgets a resumable session locally. The server is not contacted.
    pub async fn cancel_upload(&self, upload_id: &str) -> ClientResult<()> {
        self.store.remove(&self.session_key(upload_id))?;
        self.mark(upload_id, UploadState::Abandoned);
        debug!(upload_id, "resumable session removed");
        Ok(())
    }

    /// Uploads several sources one after another.
    ///
    /// Progress events are tagged `<upload_id>_file_<i>_of_<n>`.
    pub async fn upload_multiple_files(
        &self,
        type_name: &str,
        resource_id: &str,
        column_name: &str,
        sources: &[Arc<dyn UploadSource>],
        options: &UploadOptions,
    ) -> ClientResult<Vec<UploadSession>> {
        let count = sources.len();
        let mut sessions = Vec::with_capacity(count);
        for (index, source) in sources.iter().enumerate() {
            let mut file_options = options.clone();
            if let Some(callback) = options.on_progress.clone() {
                file_options.on_progress = Some(Arc::new(move |event: &ProgressEvent| {
                    callback(&event.clone().for_file(index, count))
                }));
            }
            let session = self
                .upload_file(
                    type_name,
                    resource_id,
                    column_name,
                    source.clone(),
                    None,
                    &file_options,
                )
                .await?;
            sessions.push(session);
        }
        Ok(sessions)
    }

    /// Lists the persisted resumable sessions, oldest first.
    pub fn pending_uploads(&self) -> ClientResult<Vec<ResumableSession>> {
        let prefix = format!("{}_", self.api.config().session_key_prefix);
        let mut pending = Vec::new();
        for key in self.store.keys()? {
            if !key.starts_with(&prefix) {
                continue;
            }
            let Some(json) = self.store.get(&key)? else {
                continue;
            };
            match ResumableSession::from_json(&json) {
                Ok(record) => pending.push(record),
                Err(err) => warn!(key = %key, error = %err, "skipping unreadable session record"),
            }
        }
        pending.sort_by_key(|record| record.created_at);
        Ok(pending)
    }
}

fn completion_metadata(size: u64, file_type: &str, options: &UploadOptions) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("size".to_string(), Value::from(size));
    metadata.insert("type".to_string(), Value::from(file_type));
    metadata.extend(options.metadata.clone());
    metadata
}

/// A request to third-party storage. Never carries credentials.
fn storage_request(
    method: Method,
    url: &str,
    headers: &BTreeMap<String, String>,
    file_type: &str,
) -> HttpRequest {
    let mut request = HttpRequest::new(method, url);
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("content-type") || name.eq_ignore_ascii_case("authorization")
        {
            continue;
        }
        request = request.header(name.as_str(), value.as_str());
    }
    request.header("Content-Type", file_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::session_store::MemorySessionStore;
    use crate::token::StaticToken;
    use crate::transport::{MockReply, MockTransport};
    use serde_json::json;

    fn manager(api: Arc<MockTransport>, storage: Arc<MockTransport>) -> AssetManager {
        AssetManager::new(
            ApiContext::new(
                ClientConfig::new("http://localhost:6336").with_stream_chunk_size(4),
                api,
                Arc::new(StaticToken::new("jwt")),
            ),
            storage,
            Arc::new(MemorySessionStore::new()),
        )
    }

    #[test]
    fn asset_url_is_built_not_fetched() {
        let api = Arc::new(MockTransport::new());
        let manager = manager(api.clone(), Arc::new(MockTransport::new()));
        let url = manager
            .asset_url("document", "r-1", "file", "a b.png")
            .unwrap();
        assert_eq!(
            url,
            "http://localhost:6336/asset/document/r-1/file?filename=a+b.png"
        );
        assert_eq!(api.request_count(), 0);
    }

    #[test]
    fn storage_requests_drop_credentials() {
        let headers = BTreeMap::from([
            ("Authorization".to_string(), "Bearer leaked".to_string()),
            ("x-amz-acl".to_string(), "private".to_string()),
            ("Content-Type".to_string(), "text/plain".to_string()),
        ]);
        let request = storage_request(Method::Put, "https://s3/x", &headers, "image/png");
        assert_eq!(request.header_value("authorization"), None);
        assert_eq!(request.header_value("x-amz-acl"), Some("private"));
        assert_eq!(request.header_value("content-type"), Some("image/png"));
    }

    #[test]
    fn completion_metadata_merges_caller_entries() {
        let options = UploadOptions::new()
            .with_metadata("size", json!(1))
            .with_metadata("caption", json!("cat"));
        let metadata = completion_metadata(10, "image/png", &options);
        assert_eq!(metadata["size"], json!(1));
        assert_eq!(metadata["type"], json!("image/png"));
        assert_eq!(metadata["caption"], json!("cat"));
    }

    #[tokio::test]
    async fn init_upload_sends_file_headers() {
        let api = Arc::new(MockTransport::new());
        api.on(
            Method::Post,
            "operation=init",
            MockReply::json(json!({"upload_id": "u1", "upload_type": "stream"})),
        );
        let manager = manager(api.clone(), Arc::new(MockTransport::new()));

        let init = manager
            .init_upload(&UploadTarget::new("document", "r1", "file", "a.txt"), 42, "text/plain")
            .await
            .unwrap();
        assert_eq!(init.upload_id(), "u1");

        let request = &api.requests()[0];
        assert_eq!(request.header("X-File-Name"), Some("a.txt"));
        assert_eq!(request.header("X-File-Size"), Some("42"));
        assert_eq!(request.header("X-File-Type"), Some("text/plain"));
        assert_eq!(request.header("Authorization"), Some("Bearer jwt"));
    }

    #[tokio::test]
    async fn stream_upload_reports_chunk_progress() {
        let api = Arc::new(MockTransport::new());
        api.on(
            Method::Post,
            "operation=init",
            MockReply::json(json!({"upload_id": "u1"})),
        )
        .on(Method::Put, "operation=stream", MockReply::status(200))
        .on(Method::Post, "operation=complete", MockReply::status(200));
        let manager = manager(api.clone(), Arc::new(MockTransport::new()));

        let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = events.clone();
        let options = UploadOptions::new().with_progress(move |e| sink.lock().push(e.loaded));

        let session = manager
            .upload_file(
                "document",
                "r1",
                "file",
                Arc::new(MemorySource::new(&b"0123456789"[..])),
                Some("a.bin"),
                &options,
            )
            .await
            .unwrap();

        assert_eq!(session.strategy, UploadStrategy::Stream);
        assert_eq!(session.state, UploadState::Completed);
        assert_eq!(session.uploaded_bytes, 10);
        assert_eq!(*events.lock(), vec![4, 8, 10]);

        let put = &api.requests_to("operation=stream")[0];
        assert!(put.url.contains("/asset/document/r1/file/a.bin/upload"));
        assert!(put.url.contains("upload_id=u1"));
        assert_eq!(&put.body[..], b"0123456789");

        let complete = &api.requests_to("operation=complete")[0];
        assert_eq!(complete.json().unwrap()["size"], json!(10));
    }

    #[tokio::test]
    async fn failed_transfer_abandons_session() {
        let api = Arc::new(MockTransport::new());
        api.on(
            Method::Post,
            "operation=init",
            MockReply::json(json!({"upload_id": "u1"})),
        )
        .on(Method::Put, "operation=stream", MockReply::status(500));
        let manager = manager(api.clone(), Arc::new(MockTransport::new()));

        let err = manager
            .upload_file(
                "document",
                "r1",
                "file",
                Arc::new(MemorySource::new(&b"abc"[..])),
                None,
                &UploadOptions::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(manager.session("u1").unwrap().state, UploadState::Abandoned);
        assert!(api.requests_to("operation=complete").is_empty());
        assert_eq!(manager.prune_finished(), 0);
    }

    #[tokio::test]
    async fn upload_file_name_falls_back() {
        let api = Arc::new(MockTransport::new());
        api.on(
            Method::Post,
            "operation=init",
            MockReply::json(json!({"upload_id": "u1"})),
        )
        .on(Method::Put, "operation=stream", MockReply::status(200))
        .on(Method::Post, "operation=complete", MockReply::status(200));
        let manager = manager(api.clone(), Arc::new(MockTransport::new()));

        let session = manager
            .upload_file(
                "document",
                "r1",
                "file",
                Arc::new(MemorySource::new(&b"abc"[..])),
                None,
                &UploadOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(session.target.file_name, "upload");
        assert_eq!(manager.prune_finished(), 1);
        assert!(manager.sessions().is_empty());
    }
}
