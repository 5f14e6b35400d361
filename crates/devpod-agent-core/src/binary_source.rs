//! The prioritized chain of providers that supply an agent binary image for
//! a given architecture: embedded executable, on-disk cache, HTTP download.
//!
//! The driver depends only on [`BinarySource`], never on a concrete
//! variant, so sources stay swappable in tests.

use std::io;
use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::arch::{binary_file_name, Arch};
use crate::cache::BinaryCache;

/// Name reported in [`crate::metrics_source_name`]-shaped diagnostics and in
/// `InjectionMetrics::binary_source`.
pub type SourceName = &'static str;

pub const SOURCE_LOCAL_EXECUTABLE: SourceName = "local_executable";
pub const SOURCE_LOCAL_CACHE: SourceName = "local_cache";
pub const SOURCE_HTTP_DOWNLOAD: SourceName = "http_download";

#[derive(Debug, thiserror::Error)]
pub enum BinarySourceError {
    #[error("architecture mismatch: source declined for a non-matching target")]
    ArchMismatch,
    #[error("no binary source produced an image for this architecture")]
    NotFound,
    #[error("http request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http download from {url} returned status {status}")]
    BadStatus { url: String, status: u16 },
    #[error("http download from {url} returned Content-Type `{content_type}`, looks like a landing page rather than a binary")]
    UnexpectedContentType { url: String, content_type: String },
    #[error("I/O error while reading binary source: {0}")]
    Io(#[from] io::Error),
}

/// A single readable stream of an agent binary image.
pub type BinaryStream = Pin<Box<dyn AsyncRead + Send>>;

#[async_trait::async_trait]
pub trait BinarySource: Send + Sync {
    /// Attempts to produce a readable stream of the agent binary for
    /// `arch`. Returns `Ok(None)` when this source declines (e.g. an
    /// architecture mismatch, a cold cache, a 404); returns `Err` only for
    /// genuine failures the chain should not paper over (a corrupt
    /// response, an I/O error opening an existing cache file).
    async fn get_binary(
        &self,
        arch: Arch,
    ) -> Result<Option<(BinaryStream, SourceName)>, BinarySourceError>;
}

/// The ordered chain: embedded executable, then file cache, then HTTP
/// download. Queried left-to-right until one source yields a reader.
pub struct BinarySourceChain {
    sources: Vec<Box<dyn BinarySource>>,
}

impl BinarySourceChain {
    pub fn new(sources: Vec<Box<dyn BinarySource>>) -> Self {
        Self { sources }
    }

    /// The conventional ordering named in spec.md §4.3: embedded, cache,
    /// HTTP.
    pub fn standard(cache: BinaryCache, base_url: String, http_client: reqwest::Client) -> Self {
        Self::new(vec![
            Box::new(LocalExecutableSource::default()),
            Box::new(FileCacheSource::new(cache.clone())),
            Box::new(HttpDownloadSource::new(base_url, http_client, cache)),
        ])
    }

    /// Queries sources left-to-right. A source returning `Ok(None)` simply
    /// declines; a source returning `Err` is logged and treated the same
    /// way, since spec.md §7's propagation policy states the chain as a
    /// whole surfaces only [`BinarySourceError::NotFound`] to its caller —
    /// per-source failures (a download 404, a transient HTTP error) must
    /// not prevent trying the next source.
    pub async fn get_binary(
        &self,
        arch: Arch,
    ) -> Result<(BinaryStream, SourceName), BinarySourceError> {
        for source in &self.sources {
            match source.get_binary(arch).await {
                Ok(Some(found)) => return Ok(found),
                Ok(None) => continue,
                Err(e) => {
                    tracing::debug!(error = %e, "binary source declined with an error");
                    continue;
                }
            }
        }
        Err(BinarySourceError::NotFound)
    }
}

/// Returns the current process's own binary file, iff the requested
/// architecture matches the host's and the host is Linux (the only
/// platform the remote agent binary is ever produced for).
#[derive(Default)]
pub struct LocalExecutableSource {
    /// Override for tests; `None` means "use `std::env::current_exe`".
    exe_path: Option<std::path::PathBuf>,
}

impl LocalExecutableSource {
    pub fn with_exe_path(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            exe_path: Some(path.into()),
        }
    }
}

#[async_trait::async_trait]
impl BinarySource for LocalExecutableSource {
    async fn get_binary(
        &self,
        arch: Arch,
    ) -> Result<Option<(BinaryStream, SourceName)>, BinarySourceError> {
        if !cfg!(target_os = "linux") || Arch::host() != Some(arch) {
            return Ok(None);
        }
        let path = match &self.exe_path {
            Some(p) => p.clone(),
            None => std::env::current_exe()?,
        };
        let file = tokio::fs::File::open(&path).await?;
        Ok(Some((Box::pin(file), SOURCE_LOCAL_EXECUTABLE)))
    }
}

/// Opens `<cache>/devpod-linux-<arch>` if present.
pub struct FileCacheSource {
    cache: BinaryCache,
}

impl FileCacheSource {
    pub fn new(cache: BinaryCache) -> Self {
        Self { cache }
    }
}

#[async_trait::async_trait]
impl BinarySource for FileCacheSource {
    async fn get_binary(
        &self,
        arch: Arch,
    ) -> Result<Option<(BinaryStream, SourceName)>, BinarySourceError> {
        match self.cache.open(arch).await? {
            Some(file) => Ok(Some((Box::pin(file), SOURCE_LOCAL_CACHE))),
            None => Ok(None),
        }
    }
}

/// Issues `GET <base>/devpod-linux-<arch>`. Rejects non-2xx responses and
/// responses whose `Content-Type` contains `text/html` (a misconfigured URL
/// returning a landing page rather than a binary). Tees the response body
/// to the cache directory while streaming; a fully-drained response is
/// synced and renamed into the canonical cache path, a failed one is
/// cleaned up.
pub struct HttpDownloadSource {
    base_url: String,
    client: reqwest::Client,
    cache: BinaryCache,
}

impl HttpDownloadSource {
    pub fn new(base_url: String, client: reqwest::Client, cache: BinaryCache) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            cache,
        }
    }

    fn url_for(&self, arch: Arch) -> String {
        format!("{}/{}", self.base_url, binary_file_name(arch))
    }
}

#[async_trait::async_trait]
impl BinarySource for HttpDownloadSource {
    async fn get_binary(
        &self,
        arch: Arch,
    ) -> Result<Option<(BinaryStream, SourceName)>, BinarySourceError> {
        let url = self.url_for(arch);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| BinarySourceError::Http {
                url: url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(BinarySourceError::BadStatus {
                url,
                status: response.status().as_u16(),
            });
        }

        if let Some(content_type) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if content_type.contains("text/html") {
                return Err(BinarySourceError::UnexpectedContentType {
                    url,
                    content_type: content_type.to_string(),
                });
            }
        }

        let writer = match self.cache.begin_write(arch).await {
            Ok(writer) => Some(writer),
            Err(_) => None, // degrade to pass-through per spec.md §4.3
        };

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(io::Error::other));
        let teed = TeeToCache::new(stream, writer);
        Ok(Some((Box::pin(teed), SOURCE_HTTP_DOWNLOAD)))
    }
}

/// Events sent from the reader side of [`TeeToCache`] to the task that owns
/// the cache [`crate::cache::CacheWriter`], since committing a chunk is
/// async but `poll_read` is not.
enum TeeEvent {
    Chunk(bytes::Bytes),
    Finish,
    Abort,
}

/// Wraps a byte stream, writing every chunk the consumer reads to a cache
/// temp file on a background task; finalizes (sync + rename) on clean EOF,
/// removes the temp file on any stream error. When no writer is supplied
/// (cache directory could not be created), this is a pure pass-through.
struct TeeToCache<S> {
    stream: S,
    tee: Option<tokio::sync::mpsc::UnboundedSender<TeeEvent>>,
    /// Remainder of a stream chunk that didn't fit in the last `poll_read`'s
    /// `ReadBuf`. `reqwest`'s chunk sizes routinely exceed the fixed buffer
    /// a reader like `tokio::io::copy` supplies, so a chunk must be able to
    /// span more than one `poll_read` call.
    pending: Option<bytes::Bytes>,
}

impl<S> TeeToCache<S> {
    fn new(stream: S, writer: Option<crate::cache::CacheWriter>) -> Self {
        let tee = writer.map(|mut writer| {
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<TeeEvent>();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Some(TeeEvent::Chunk(bytes)) => {
                            if writer.write_all(&bytes).await.is_err() {
                                writer.abort().await;
                                return;
                            }
                        }
                        Some(TeeEvent::Finish) => {
                            let _ = writer.finish().await;
                            return;
                        }
                        Some(TeeEvent::Abort) | None => {
                            // `None` means the reader was dropped (e.g. the
                            // caller cancelled mid-transfer) without sending
                            // an explicit Finish/Abort; treat the same way
                            // so the temp file never survives.
                            writer.abort().await;
                            return;
                        }
                    }
                }
            });
            tx
        });
        Self { stream, tee, pending: None }
    }
}

impl<S> AsyncRead for TeeToCache<S>
where
    S: futures_util::Stream<Item = io::Result<bytes::Bytes>> + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        use std::task::Poll;
        let this = self.get_mut();

        loop {
            if let Some(chunk) = this.pending.take() {
                let take = chunk.len().min(buf.remaining());
                buf.put_slice(&chunk[..take]);
                if take < chunk.len() {
                    this.pending = Some(chunk.slice(take..));
                }
                return Poll::Ready(Ok(()));
            }

            match Pin::new(&mut this.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    if let Some(tee) = &this.tee {
                        let _ = tee.send(TeeEvent::Chunk(chunk.clone()));
                    }
                    this.pending = Some(chunk);
                }
                Poll::Ready(Some(Err(e))) => {
                    if let Some(tee) = this.tee.take() {
                        let _ = tee.send(TeeEvent::Abort);
                    }
                    return Poll::Ready(Err(e));
                }
                Poll::Ready(None) => {
                    if let Some(tee) = this.tee.take() {
                        let _ = tee.send(TeeEvent::Finish);
                    }
                    return Poll::Ready(Ok(()));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_executable_declines_on_arch_mismatch() {
        let source = LocalExecutableSource::with_exe_path("/proc/self/exe");
        let other_arch = match Arch::host() {
            Some(Arch::Amd64) => Arch::Arm64,
            _ => Arch::Amd64,
        };
        let result = source.get_binary(other_arch).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn file_cache_source_declines_on_cold_cache() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileCacheSource::new(BinaryCache::new(dir.path()));
        assert!(source.get_binary(Arch::Amd64).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn chain_falls_through_to_next_source() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BinaryCache::new(dir.path());
        cache.set(Arch::Amd64, b"cached-binary").await.unwrap();

        let chain = BinarySourceChain::new(vec![
            Box::new(LocalExecutableSource::with_exe_path("/nonexistent/path")),
            Box::new(FileCacheSource::new(cache)),
        ]);

        let (mut stream, name) = chain.get_binary(Arch::Amd64).await.unwrap();
        assert_eq!(name, SOURCE_LOCAL_CACHE);
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"cached-binary");
    }

    #[tokio::test]
    async fn tee_to_cache_splits_chunks_larger_than_the_reader_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BinaryCache::new(dir.path());
        let writer = cache.begin_write(Arch::Amd64).await.unwrap();

        // A single 10 KiB chunk, much larger than the 512-byte reads below,
        // exercising the carry-over path a raw network frame would hit.
        let payload = vec![0xAB_u8; 10 * 1024];
        let stream = futures_util::stream::iter(vec![Ok::<_, io::Error>(bytes::Bytes::from(
            payload.clone(),
        ))]);
        let mut teed = TeeToCache::new(stream, Some(writer));

        let mut out = Vec::new();
        let mut buf = [0u8; 512];
        loop {
            let n = teed.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, payload);

        // Give the background writer task a beat to finish the rename.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let cached = tokio::fs::read(cache.path(Arch::Amd64)).await.unwrap();
        assert_eq!(cached, payload);
    }

    #[tokio::test]
    async fn chain_exhausted_returns_not_found() {
        let chain = BinarySourceChain::new(vec![Box::new(
            LocalExecutableSource::with_exe_path("/nonexistent/path"),
        )]);
        let err = chain.get_binary(Arch::Arm64).await.unwrap_err();
        assert!(matches!(err, BinarySourceError::NotFound));
    }
}
