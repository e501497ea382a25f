//! Photo transmission
//!
//! `transmit` defines the wire order: chunks strictly by index, each split
//! into write-sized pieces, with the first failed write aborting the whole
//! upload. `HttpUploader` streams those writes as one POST body.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::{SegmentedPhoto, UploadError};

/// Upload endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Endpoint receiving the raw photo body
    pub url: String,
    /// Whole-request timeout (milliseconds)
    pub timeout_ms: u64,
    /// Size of each body write (bytes)
    pub write_chunk_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:5001/upload".to_string(),
            timeout_ms: 60_000,
            write_chunk_bytes: 16_384,
        }
    }
}

impl UploadConfig {
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.url.is_empty() {
            return Err(UploadError::Config("upload url is empty".into()));
        }
        if self.timeout_ms == 0 {
            return Err(UploadError::Config("timeout_ms must be non-zero".into()));
        }
        if self.write_chunk_bytes == 0 {
            return Err(UploadError::Config("write_chunk_bytes must be non-zero".into()));
        }
        Ok(())
    }
}

/// How an upload cycle ended. Every variant is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// 2xx response
    Delivered { status: u16, bytes: usize },
    /// The server answered with a non-2xx status
    Rejected { status: u16 },
    /// No usable response: transport, write or timeout failure
    Failed(UploadError),
}

impl UploadOutcome {
    pub fn from_status(status: u16, bytes: usize) -> Self {
        if (200..300).contains(&status) {
            UploadOutcome::Delivered { status, bytes }
        } else {
            UploadOutcome::Rejected { status }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Delivered { .. })
    }

    /// A response status was received, successful or not
    pub fn is_completed(&self) -> bool {
        !matches!(self, UploadOutcome::Failed(_))
    }
}

/// Destination of ordered photo writes
pub trait ChunkSink: Send {
    fn write(&mut self, bytes: &[u8]) -> impl Future<Output = Result<(), UploadError>> + Send;
}

/// Write `photo` to `sink` in index order. Returns the byte count written.
pub async fn transmit<S: ChunkSink>(
    photo: &SegmentedPhoto,
    sink: &mut S,
    write_size: usize,
) -> Result<usize, UploadError> {
    let mut written = 0usize;
    for slice in photo.write_slices(write_size) {
        if let Err(e) = sink.write(slice).await {
            warn!(
                "Upload aborted after {}/{} bytes: {}",
                written,
                photo.total_len(),
                e
            );
            return Err(e);
        }
        written += slice.len();
    }
    debug!("Transmitted {} bytes", written);
    Ok(written)
}

/// Sink feeding a streaming request body
pub struct ChannelSink {
    tx: mpsc::Sender<Result<Vec<u8>, io::Error>>,
    offset: usize,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Result<Vec<u8>, io::Error>>) -> Self {
        Self { tx, offset: 0 }
    }
}

impl ChunkSink for ChannelSink {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), UploadError> {
        self.tx
            .send(Ok(bytes.to_vec()))
            .await
            .map_err(|_| UploadError::Write {
                offset: self.offset,
                reason: "request body closed".to_string(),
            })?;
        self.offset += bytes.len();
        Ok(())
    }
}

/// Photo uploader capability. The call completes when the cycle is over.
pub trait PhotoUploader: Send + Sync {
    fn upload(&self, photo: &SegmentedPhoto) -> impl Future<Output = UploadOutcome> + Send;
}

/// Streams the photo as a single HTTP POST body
pub struct HttpUploader {
    client: reqwest::Client,
    config: UploadConfig,
}

impl HttpUploader {
    pub fn new(config: UploadConfig) -> Result<Self, UploadError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| UploadError::Config(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }
}

impl PhotoUploader for HttpUploader {
    async fn upload(&self, photo: &SegmentedPhoto) -> UploadOutcome {
        info!(
            "Uploading photo {} ({} bytes) to {}",
            photo.id(),
            photo.total_len(),
            self.config.url
        );

        let (tx, rx) = mpsc::channel::<Result<Vec<u8>, io::Error>>(2);
        let request = self
            .client
            .post(&self.config.url)
            .header(CONTENT_TYPE, photo.content_type())
            .header(CONTENT_LENGTH, photo.total_len())
            .header("X-Photo-Id", photo.id().to_string())
            .header("X-Captured-At", photo.captured_at().to_rfc3339())
            .body(reqwest::Body::wrap_stream(ReceiverStream::new(rx)))
            .send();

        let write_size = self.config.write_chunk_bytes;
        let writer = async move {
            let mut sink = ChannelSink::new(tx);
            transmit(photo, &mut sink, write_size).await
            // sink dropped here, ending the body stream
        };

        let (response, written) = tokio::join!(request, writer);

        let outcome = match (response, written) {
            (Err(e), _) if e.is_timeout() => UploadOutcome::Failed(UploadError::Timeout),
            (Err(e), _) => UploadOutcome::Failed(UploadError::Transport(e.to_string())),
            (Ok(_), Err(e)) => UploadOutcome::Failed(e),
            (Ok(response), Ok(bytes)) => {
                UploadOutcome::from_status(response.status().as_u16(), bytes)
            }
        };

        match &outcome {
            UploadOutcome::Delivered { status, bytes } => {
                info!("Photo upload succeeded: HTTP {}, {} bytes", status, bytes)
            }
            UploadOutcome::Rejected { status } => {
                warn!("Photo upload completed with HTTP {}", status)
            }
            UploadOutcome::Failed(e) => warn!("Photo upload failed: {}", e),
        }
        outcome
    }
}

/// Uploader returning a preset outcome after a delay; records every call
pub struct MockUploader {
    outcome: Mutex<UploadOutcome>,
    delay: Duration,
    calls: AtomicU32,
    uploaded_bytes: Mutex<Vec<usize>>,
}

impl MockUploader {
    pub fn new(outcome: UploadOutcome, delay: Duration) -> Self {
        Self {
            outcome: Mutex::new(outcome),
            delay,
            calls: AtomicU32::new(0),
            uploaded_bytes: Mutex::new(Vec::new()),
        }
    }

    /// Always answers HTTP 200 immediately
    pub fn succeeding() -> Self {
        Self::new(
            UploadOutcome::Delivered {
                status: 200,
                bytes: 0,
            },
            Duration::ZERO,
        )
    }

    pub fn set_outcome(&self, outcome: UploadOutcome) {
        if let Ok(mut slot) = self.outcome.lock() {
            *slot = outcome;
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Total size of each uploaded photo, in call order
    pub fn uploaded_bytes(&self) -> Vec<usize> {
        self.uploaded_bytes
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }
}

impl PhotoUploader for MockUploader {
    async fn upload(&self, photo: &SegmentedPhoto) -> UploadOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut sizes) = self.uploaded_bytes.lock() {
            sizes.push(photo.total_len());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let outcome = self
            .outcome
            .lock()
            .map(|o| o.clone())
            .unwrap_or(UploadOutcome::Failed(UploadError::NoStatus));
        match outcome {
            UploadOutcome::Delivered { status, .. } => UploadOutcome::Delivered {
                status,
                bytes: photo.total_len(),
            },
            other => other,
        }
    }
}

impl<T: PhotoUploader + ?Sized> PhotoUploader for std::sync::Arc<T> {
    fn upload(&self, photo: &SegmentedPhoto) -> impl Future<Output = UploadOutcome> + Send {
        (**self).upload(photo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PhotoConfig, TieredAllocator};
    use camera_capture::{Frame, PixelFormat, SourceId};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn photo(len: usize) -> SegmentedPhoto {
        let data: Vec<u8> = (0..len).map(|i| (i % 253) as u8).collect();
        let frame = Frame::new(&SourceId::new(), data, 64, 64, PixelFormat::Jpeg, 0, 1, 0);
        let config = PhotoConfig {
            max_chunk_bytes: 4096,
            ..Default::default()
        };
        let alloc = TieredAllocator::new(1 << 20, 0);
        SegmentedPhoto::create(&frame, &alloc, &config).unwrap()
    }

    struct VecSink {
        received: Vec<Vec<u8>>,
        fail_at: Option<usize>,
    }

    impl ChunkSink for VecSink {
        async fn write(&mut self, bytes: &[u8]) -> Result<(), UploadError> {
            if self.fail_at == Some(self.received.len()) {
                return Err(UploadError::Write {
                    offset: 0,
                    reason: "injected".into(),
                });
            }
            self.received.push(bytes.to_vec());
            Ok(())
        }
    }

    #[test]
    fn test_outcome_classification() {
        assert!(UploadOutcome::from_status(200, 10).is_success());
        assert!(UploadOutcome::from_status(204, 0).is_success());
        let rejected = UploadOutcome::from_status(500, 10);
        assert!(!rejected.is_success());
        assert!(rejected.is_completed());
        assert!(!UploadOutcome::Failed(UploadError::NoStatus).is_completed());
    }

    #[tokio::test]
    async fn test_transmit_in_order() {
        let photo = photo(10_000);
        let mut sink = VecSink {
            received: Vec::new(),
            fail_at: None,
        };
        let written = transmit(&photo, &mut sink, 1024).await.unwrap();
        assert_eq!(written, 10_000);
        // 4096 + 4096 + 1808, each split into 1024-byte writes
        assert_eq!(sink.received.len(), 4 + 4 + 2);
        let joined: Vec<u8> = sink.received.concat();
        let expected: Vec<u8> = (0..10_000).map(|i| (i % 253) as u8).collect();
        assert_eq!(joined, expected);
    }

    #[tokio::test]
    async fn test_transmit_aborts_on_write_failure() {
        let photo = photo(10_000);
        let mut sink = VecSink {
            received: Vec::new(),
            fail_at: Some(3),
        };
        let result = transmit(&photo, &mut sink, 1024).await;
        assert!(result.is_err());
        assert_eq!(sink.received.len(), 3);
    }

    /// Minimal HTTP/1.1 server: reads one request and answers `status`.
    async fn serve_once(status: u16) -> (String, oneshot::Receiver<(String, Vec<u8>)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/upload", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut tmp = [0u8; 4096];
            let header_end = loop {
                let n = socket.read(&mut tmp).await.unwrap();
                assert!(n > 0, "connection closed before headers");
                buf.extend_from_slice(&tmp[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
            let length: usize = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse().ok())
                        .flatten()
                })
                .unwrap();
            let mut body = buf[header_end..].to_vec();
            while body.len() < length {
                let n = socket.read(&mut tmp).await.unwrap();
                assert!(n > 0, "connection closed before body end");
                body.extend_from_slice(&tmp[..n]);
            }
            let response = format!(
                "HTTP/1.1 {} Test\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = tx.send((head, body));
        });

        (url, rx)
    }

    fn uploader(url: String) -> HttpUploader {
        HttpUploader::new(UploadConfig {
            url,
            timeout_ms: 5_000,
            write_chunk_bytes: 1024,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_http_upload_delivers_body() {
        let (url, received) = serve_once(200).await;
        let photo = photo(10_000);

        let outcome = uploader(url).upload(&photo).await;
        assert_eq!(
            outcome,
            UploadOutcome::Delivered {
                status: 200,
                bytes: 10_000
            }
        );

        let (head, body) = received.await.unwrap();
        let head = head.to_ascii_lowercase();
        assert!(head.contains("content-type: image/jpeg"));
        assert!(head.contains(&format!("x-photo-id: {}", photo.id())));
        assert_eq!(body.len(), 10_000);
        let expected: Vec<u8> = (0..10_000).map(|i| (i % 253) as u8).collect();
        assert_eq!(body, expected);
    }

    #[tokio::test]
    async fn test_http_error_status_is_rejected() {
        let (url, _received) = serve_once(503).await;
        let outcome = uploader(url).upload(&photo(2048)).await;
        assert_eq!(outcome, UploadOutcome::Rejected { status: 503 });
        assert!(outcome.is_completed());
    }

    #[tokio::test]
    async fn test_unreachable_server_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/upload", listener.local_addr().unwrap());
        drop(listener);

        let outcome = uploader(url).upload(&photo(2048)).await;
        assert!(matches!(outcome, UploadOutcome::Failed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_uploader_records_calls() {
        let mock = MockUploader::new(
            UploadOutcome::Failed(UploadError::Timeout),
            Duration::from_secs(2),
        );
        let photo = photo(3000);
        let outcome = mock.upload(&photo).await;
        assert_eq!(outcome, UploadOutcome::Failed(UploadError::Timeout));

        mock.set_outcome(UploadOutcome::Delivered { status: 201, bytes: 0 });
        let outcome = mock.upload(&photo).await;
        assert_eq!(outcome, UploadOutcome::Delivered { status: 201, bytes: 3000 });
        assert_eq!(mock.calls(), 2);
        assert_eq!(mock.uploaded_bytes(), vec![3000, 3000]);
    }

    #[test]
    fn test_rejects_empty_url() {
        let config = UploadConfig {
            url: String::new(),
            ..Default::default()
        };
        assert!(HttpUploader::new(config).is_err());
    }

    #[test]
    fn test_rejects_zero_write_chunk() {
        let config = UploadConfig {
            write_chunk_bytes: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(UploadError::Config(_))));
        assert!(HttpUploader::new(config).is_err());
        assert!(UploadConfig::default().validate().is_ok());
    }
}
