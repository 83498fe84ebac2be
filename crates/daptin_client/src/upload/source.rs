//! Byte sources for uploads.

use crate::transport::ByteStream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// MIME type used when a source does not know its own.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A file-like source of bytes with a known size.
#[async_trait]
pub trait UploadSource: Send + Sync + 'static {
    /// Total number of bytes.
    fn size(&self) -> u64;

    /// MIME type of the content.
    fn content_type(&self) -> String {
        DEFAULT_CONTENT_TYPE.to_string()
    }

    /// Name of the source, if it has one.
    fn name(&self) -> Option<String> {
        None
    }

    /// Reads the bytes in `[start, end)`.
    async fn read_range(&self, start: u64, end: u64) -> io::Result<Bytes>;

    /// Streams the bytes in `[start, end)` in reads of at most `chunk_size`
    /// bytes. The stream ends after the first error.
    fn stream_range(self: Arc<Self>, start: u64, end: u64, chunk_size: usize) -> ByteStream {
        let chunk_size = chunk_size.max(1) as u64;
        futures::stream::try_unfold(start, move |offset| {
            let source = self.clone();
            async move {
                if offset >= end {
                    return Ok(None);
                }
                let next = offset.saturating_add(chunk_size).min(end);
                let chunk = source.read_range(offset, next).await?;
                Ok(Some((chunk, next)))
            }
        })
        .boxed()
    }
}

fn check_range(start: u64, end: u64, size: u64) -> io::Result<()> {
    if start > end || end > size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("range {start}..{end} outside source of {size} bytes"),
        ));
    }
    Ok(())
}

/// A source held in memory.
#[derive(Debug)]
pub struct MemorySource {
    data: Bytes,
    content_type: String,
    name: Option<String>,
    largest_read: AtomicU64,
}

impl MemorySource {
    /// Creates a source over `data`.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            name: None,
            largest_read: AtomicU64::new(0),
        }
    }

    /// Sets the MIME type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Sets the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns the size of the largest range read so far.
    pub fn largest_read(&self) -> u64 {
        self.largest_read.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UploadSource for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn content_type(&self) -> String {
        self.content_type.clone()
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    async fn read_range(&self, start: u64, end: u64) -> io::Result<Bytes> {
        check_range(start, end, self.size())?;
        self.largest_read.fetch_max(end - start, Ordering::SeqCst);
        // Bounds were checked against the in-memory length, so these fit in usize.
        Ok(self.data.slice(start as usize..end as usize))
    }
}

/// A source reading a local file on demand.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    size: u64,
    content_type: String,
}

fn guess_content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("tif" | "tiff") => "image/tiff",
        Some("svg") => "image/svg+xml",
        Some("pdf") => "application/pdf",
        Some("json") => "application/json",
        Some("zip") => "application/zip",
        Some("txt") => "text/plain",
        Some("csv") => "text/csv",
        Some("html" | "htm") => "text/html",
        Some("mp4") => "video/mp4",
        Some("mp3") => "audio/mpeg",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

impl FileSource {
    /// Opens `path`, recording its size and guessing its MIME type.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        Ok(Self {
            content_type: guess_content_type(&path).to_string(),
            size: metadata.len(),
            path,
        })
    }

    /// Overrides the guessed MIME type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl UploadSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn content_type(&self) -> String {
        self.content_type.clone()
    }

    fn name(&self) -> Option<String> {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
    }

    async fn read_range(&self, start: u64, end: u64) -> io::Result<Bytes> {
        check_range(start, end, self.size)?;
        let mut file = File::open(&self.path).await?;
        file.seek(io::SeekFrom::Start(start)).await?;
        read_chunk(&mut file, end - start).await
    }

    /// Opens the file once and reads it sequentially.
    fn stream_range(self: Arc<Self>, start: u64, end: u64, chunk_size: usize) -> ByteStream {
        if let Err(err) = check_range(start, end, self.size) {
            return futures::stream::once(async move { Err(err) }).boxed();
        }
        let chunk_size = chunk_size.max(1) as u64;
        futures::stream::try_unfold((None::<File>, start), move |(file, offset)| {
            let path = self.path.clone();
            async move {
                if offset >= end {
                    return Ok(None);
                }
                let mut file = match file {
                    Some(file) => file,
                    None => {
                        let mut file = File::open(&path).await?;
                        file.seek(io::SeekFrom::Start(offset)).await?;
                        file
                    }
                };
                let len = (end - offset).min(chunk_size);
                let chunk = read_chunk(&mut file, len).await?;
                Ok(Some((chunk, (Some(file), offset + len))))
            }
        })
        .boxed()
    }
}

async fn read_chunk(file: &mut File, len: u64) -> io::Result<Bytes> {
    let len = usize::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "range too large"))?;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}
