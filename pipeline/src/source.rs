//! Frame acquisition.
//!
//! Streams MJPEG bytes from a recorded file or a live HTTP URL, splits out
//! complete JPEG images on SOI/EOI markers, decodes them to grayscale and
//! pushes them into the bounded frame queue. The queue never blocks
//! acquisition: a full queue drops the current frame, bounding memory and
//! favoring recency over completeness under overload.

use bytes::BytesMut;
use futures_util::StreamExt;
use std::time::Duration;
use tilewatch_common::config::StreamConfig;
use tilewatch_common::frame::Frame;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

const SOI: &[u8] = &[0xFF, 0xD8, 0xFF];
const EOI: &[u8] = &[0xFF, 0xD9];

const FILE_CHUNK: usize = 64 * 1024;

/// What acquisition hands the processing task.
#[derive(Debug)]
pub enum SourceItem {
    Frame(Frame),
    /// Emitted exactly once, when a finite recorded source reaches
    /// end-of-stream.
    EndOfStream,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to open {0}: {1}")]
    Open(String, std::io::Error),
    #[error("read error: {0}")]
    Read(std::io::Error),
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
}

enum SourceEnd {
    /// Recorded file fully consumed.
    Finite,
    /// Live stream ended; reconnect.
    Live,
    /// Processing side went away; stop acquiring.
    Closed,
}

/// Acquisition task body. Runs for the process lifetime on a live source;
/// returns after the sentinel on a recorded one.
pub async fn run_acquisition(cfg: StreamConfig, tx: mpsc::Sender<SourceItem>) {
    let retry = Duration::from_secs(cfg.retry_secs);
    let mut acq = Acquisition {
        skip: 0,
        seq: 0,
        dropped: 0,
        frame_skip: cfg.frame_skip,
        tx,
    };
    loop {
        let result = if let Some(path) = &cfg.source_path {
            info!(path = %path, "opening recorded source");
            acq.stream_file(path).await
        } else if let Some(url) = &cfg.source_url {
            info!(url = %url, "connecting to live stream");
            acq.stream_http(url).await
        } else {
            error!("no frame source configured");
            return;
        };
        match result {
            Ok(SourceEnd::Finite) => {
                info!(frames = acq.seq, dropped = acq.dropped, "recorded source ended");
                let _ = acq.tx.send(SourceItem::EndOfStream).await;
                return;
            }
            Ok(SourceEnd::Live) => {
                info!("live stream ended, reconnecting in {:?}", retry);
            }
            Ok(SourceEnd::Closed) => {
                info!("frame queue closed, stopping acquisition");
                return;
            }
            Err(e) => {
                error!(error = %e, "frame source error, retrying in {:?}", retry);
            }
        }
        tokio::time::sleep(retry).await;
    }
}

struct Acquisition {
    /// Frames left to discard before the next emitted one.
    skip: u32,
    seq: u64,
    dropped: u64,
    frame_skip: u32,
    tx: mpsc::Sender<SourceItem>,
}

impl Acquisition {
    async fn stream_file(&mut self, path: &str) -> Result<SourceEnd, SourceError> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| SourceError::Open(path.to_string(), e))?;
        let mut splitter = JpegSplitter::default();
        let mut chunk = vec![0u8; FILE_CHUNK];
        loop {
            let n = file.read(&mut chunk).await.map_err(SourceError::Read)?;
            if n == 0 {
                return Ok(SourceEnd::Finite);
            }
            splitter.push(&chunk[..n]);
            while let Some(jpeg) = splitter.next_image() {
                if !self.emit(&jpeg) {
                    return Ok(SourceEnd::Closed);
                }
            }
        }
    }

    async fn stream_http(&mut self, url: &str) -> Result<SourceEnd, SourceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(SourceError::HttpConnect)?;
        let response = client.get(url).send().await.map_err(SourceError::HttpConnect)?;
        if !response.status().is_success() {
            return Err(SourceError::HttpStatus(response.status().as_u16()));
        }
        info!(status = %response.status(), "connected to stream");

        let mut byte_stream = response.bytes_stream();
        let mut splitter = JpegSplitter::default();
        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(SourceError::HttpStream)?;
            splitter.push(&chunk);
            while let Some(jpeg) = splitter.next_image() {
                if !self.emit(&jpeg) {
                    return Ok(SourceEnd::Closed);
                }
            }
        }
        Ok(SourceEnd::Live)
    }

    /// Decode and enqueue one JPEG. Returns false when the receiver is gone.
    fn emit(&mut self, jpeg: &[u8]) -> bool {
        if self.skip > 0 {
            self.skip -= 1;
            return true;
        }
        self.skip = self.frame_skip;

        let gray = match image::load_from_memory(jpeg) {
            Ok(img) => img.to_luma8(),
            Err(e) => {
                warn!(error = %e, bytes = jpeg.len(), "undecodable frame, skipping");
                return true;
            }
        };
        let (width, height) = (gray.width(), gray.height());
        let frame = Frame::new(gray.into_raw(), width, height, self.seq);
        self.seq += 1;
        match self.tx.try_send(SourceItem::Frame(frame)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                if self.dropped % 60 == 1 {
                    debug!(dropped = self.dropped, "frame queue full, dropping");
                }
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Incremental JPEG splitter over an MJPEG byte stream. Works on raw
/// concatenated JPEG files and on multipart HTTP streams alike: part
/// headers never contain a JPEG start-of-image sequence, so scanning for
/// SOI/EOI markers skips them.
#[derive(Default)]
struct JpegSplitter {
    buf: BytesMut,
}

impl JpegSplitter {
    fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    fn next_image(&mut self) -> Option<Vec<u8>> {
        match find_subsequence(&self.buf, SOI) {
            Some(start) => {
                // Discard garbage ahead of the frame start.
                let _ = self.buf.split_to(start);
            }
            None => {
                // No frame start anywhere. A source that never produces one
                // (non-MJPEG body, corrupted feed) must not accumulate; only
                // the last bytes could still complete a split marker.
                if self.buf.len() >= SOI.len() {
                    let keep_from = self.buf.len() - (SOI.len() - 1);
                    let _ = self.buf.split_to(keep_from);
                }
                return None;
            }
        }
        let end = SOI.len() + find_subsequence(&self.buf[SOI.len()..], EOI)?;
        let image = self.buf[..end + EOI.len()].to_vec();
        let _ = self.buf.split_to(end + EOI.len());
        Some(image)
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
