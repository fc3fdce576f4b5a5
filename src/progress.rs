//! Streaming upload bodies with progress instrumentation.
//!
//! Files are never buffered whole: the multipart part wraps a
//! `ReaderStream` over the file, so peak memory is bounded by the stream's
//! chunk size regardless of file size. The stream adapter counts bytes as
//! the HTTP client pulls them and emits a throttled `progress` event.

use crate::error::UploadError;
use crate::events::EventSink;
use crate::protocol::{OutputEvent, ProgressPayload};
use bytes::Bytes;
use futures::Stream;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio_util::io::ReaderStream;

/// Minimum spacing between progress events for one file.
pub const PROGRESS_REPORT_INTERVAL: Duration = Duration::from_secs(2);

/// Stream adapter that counts transferred bytes and reports progress.
pub struct ProgressStream<S> {
    inner: S,
    file_path: String,
    total_bytes: u64,
    transferred: u64,
    first_byte_at: Option<Instant>,
    last_report: Instant,
    interval: Duration,
    sink: Arc<EventSink>,
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, file_path: String, total_bytes: u64, sink: Arc<EventSink>) -> Self {
        Self::with_interval(inner, file_path, total_bytes, sink, PROGRESS_REPORT_INTERVAL)
    }

    fn with_interval(
        inner: S,
        file_path: String,
        total_bytes: u64,
        sink: Arc<EventSink>,
        interval: Duration,
    ) -> Self {
        Self {
            inner,
            file_path,
            total_bytes,
            transferred: 0,
            first_byte_at: None,
            last_report: Instant::now(),
            interval,
            sink,
        }
    }

    fn record(&mut self, chunk_len: usize) {
        let now = Instant::now();
        let started = *self.first_byte_at.get_or_insert(now);
        self.transferred += chunk_len as u64;

        if now.duration_since(self.last_report) < self.interval {
            return;
        }
        self.last_report = now;

        let elapsed = now.duration_since(started).as_secs_f64();
        let speed = if elapsed > 0.0 {
            self.transferred as f64 / elapsed
        } else {
            0.0
        };
        let percentage = if self.total_bytes > 0 {
            (self.transferred as f64 / self.total_bytes as f64) * 100.0
        } else {
            0.0
        };
        let eta_seconds = if speed > 0.0 {
            ((self.total_bytes.saturating_sub(self.transferred)) as f64 / speed) as u64
        } else {
            0
        };

        self.sink.emit(&OutputEvent::progress(
            self.file_path.as_str(),
            &ProgressPayload {
                bytes_transferred: self.transferred,
                total_bytes: self.total_bytes,
                speed,
                percentage,
                eta_seconds,
            },
        ));
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.record(chunk.len());
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}

/// Opens `path` and builds a progress-instrumented multipart part streaming
/// its contents. Returns the part and the file size.
pub async fn progress_file_part(
    path: &str,
    sink: Arc<EventSink>,
) -> Result<(reqwest::multipart::Part, u64), UploadError> {
    progress_file_part_named(path, file_basename(path), sink).await
}

/// Same as [`progress_file_part`] but with an explicit upload filename.
pub async fn progress_file_part_named(
    path: &str,
    file_name: String,
    sink: Arc<EventSink>,
) -> Result<(reqwest::multipart::Part, u64), UploadError> {
    let file = tokio::fs::File::open(path).await?;
    let total = file.metadata().await?.len();
    let stream = ProgressStream::new(ReaderStream::new(file), path.to_string(), total, sink);
    let part = reqwest::multipart::Part::stream_with_length(
        reqwest::Body::wrap_stream(stream),
        total,
    )
    .file_name(file_name);
    Ok((part, total))
}

/// Final component of a path, as uploaded filenames are derived from it.
pub fn file_basename(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventCapture;
    use futures::StreamExt;

    fn chunks(sizes: &[usize]) -> Vec<std::io::Result<Bytes>> {
        sizes
            .iter()
            .map(|&n| Ok(Bytes::from(vec![0u8; n])))
            .collect()
    }

    #[tokio::test]
    async fn reports_monotonic_progress_within_total() {
        let capture = EventCapture::new();
        let sink = Arc::new(capture.sink());
        let source = futures::stream::iter(chunks(&[100, 200, 300, 400]));
        let mut stream = ProgressStream::with_interval(
            source,
            "/tmp/a.jpg".to_string(),
            1000,
            sink,
            Duration::ZERO,
        );

        let mut pulled = 0u64;
        while let Some(chunk) = stream.next().await {
            pulled += chunk.unwrap().len() as u64;
        }
        assert_eq!(pulled, 1000);

        let events = capture.events();
        assert!(!events.is_empty());
        let mut previous = 0u64;
        for event in &events {
            assert_eq!(event["type"], "progress");
            let transferred = event["data"]["bytes_transferred"].as_u64().unwrap();
            let total = event["data"]["total_bytes"].as_u64().unwrap();
            assert_eq!(total, 1000);
            assert!(transferred >= previous, "progress went backwards");
            assert!(transferred <= total, "progress exceeded total");
            previous = transferred;
        }
        assert_eq!(previous, 1000);
    }

    #[tokio::test]
    async fn throttles_reports_to_interval() {
        let capture = EventCapture::new();
        let sink = Arc::new(capture.sink());
        let source = futures::stream::iter(chunks(&[10, 10, 10, 10]));
        let mut stream = ProgressStream::with_interval(
            source,
            "/tmp/a.jpg".to_string(),
            40,
            sink,
            Duration::from_secs(60),
        );
        while stream.next().await.is_some() {}

        // Nothing can be due within a 60s window.
        assert!(capture.events().is_empty());
    }

    #[tokio::test]
    async fn part_streams_file_contents() {
        use std::io::Write;
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[7u8; 2048]).unwrap();
        let capture = EventCapture::new();
        let (part, total) = progress_file_part(
            &tmp.path().to_string_lossy(),
            Arc::new(capture.sink()),
        )
        .await
        .unwrap();
        assert_eq!(total, 2048);
        drop(part);
    }

    #[test]
    fn basename_strips_directories() {
        assert_eq!(file_basename("/tmp/photos/cat.jpg"), "cat.jpg");
        assert_eq!(file_basename("cat.jpg"), "cat.jpg");
    }
}
