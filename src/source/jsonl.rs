//! Newline-delimited JSON replay of recorded detection batches.
//!
//! Each line is one frame:
//!
//! ```json
//! {"offset_ms": 40, "detectors": {"primary": [{"confidence": 0.7, "class": "fight", "box": [0, 0, 64, 64]}]}, "media": "clips/a.mp4"}
//! ```
//!
//! `offset_ms` is relative to the moment the source was opened.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::time::Instant;
use tracing::info;

use super::{DetectionSource, SourceError};
use crate::detect::{DetectionRecord, FrameBatch};

#[derive(Debug, Deserialize)]
struct BatchLine {
    #[serde(default)]
    offset_ms: u64,
    #[serde(default)]
    detectors: BTreeMap<String, Vec<DetectionRecord>>,
    #[serde(default)]
    media: Option<PathBuf>,
}

pub struct JsonLinesSource<R> {
    lines: Lines<R>,
    line_no: usize,
    base: Instant,
    last: Instant,
    realtime: bool,
}

impl JsonLinesSource<BufReader<tokio::fs::File>> {
    pub async fn open(path: &Path, realtime: bool) -> Result<Self, SourceError> {
        let file = tokio::fs::File::open(path).await?;
        info!(path = %path.display(), realtime, "replaying detection batches");
        Ok(Self::new(BufReader::new(file), realtime))
    }
}

impl JsonLinesSource<BufReader<tokio::io::Stdin>> {
    pub fn stdin(realtime: bool) -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), realtime)
    }
}

impl<R: AsyncBufRead + Unpin> JsonLinesSource<R> {
    /// With `realtime`, each batch is held back until its offset has elapsed.
    pub fn new(reader: R, realtime: bool) -> Self {
        let base = Instant::now();
        Self {
            lines: reader.lines(),
            line_no: 0,
            base,
            last: base,
            realtime,
        }
    }

    fn parse(&mut self, line: &str) -> Result<FrameBatch, SourceError> {
        let parsed: BatchLine =
            serde_json::from_str(line).map_err(|e| SourceError::Malformed {
                line: self.line_no,
                reason: e.to_string(),
            })?;

        // A batch earlier than its predecessor is rejected; `last` stays put.
        let timestamp = self.base + Duration::from_millis(parsed.offset_ms);
        if timestamp < self.last {
            return Err(SourceError::Malformed {
                line: self.line_no,
                reason: format!(
                    "offset_ms {} is earlier than the previous batch ({} ms)",
                    parsed.offset_ms,
                    self.last.duration_since(self.base).as_millis()
                ),
            });
        }
        self.last = timestamp;

        let mut batch = FrameBatch::new(timestamp);
        for (detector, records) in parsed.detectors {
            batch = batch.with_detector(detector, records);
        }
        batch.media = parsed.media;
        Ok(batch)
    }
}

#[async_trait::async_trait]
impl<R: AsyncBufRead + Unpin + Send> DetectionSource for JsonLinesSource<R> {
    async fn next_batch(&mut self) -> Result<Option<FrameBatch>, SourceError> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(None),
                // The undecodable line has already been consumed.
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    self.line_no += 1;
                    return Err(SourceError::Malformed {
                        line: self.line_no,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e.into()),
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }

            let batch = self.parse(&line)?;
            if self.realtime {
                tokio::time::sleep_until(batch.timestamp).await;
            }
            return Ok(Some(batch));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(text: &'static str) -> JsonLinesSource<&'static [u8]> {
        JsonLinesSource::new(text.as_bytes(), false)
    }

    #[tokio::test]
    async fn test_parses_batches_and_skips_blank_lines() {
        let mut src = source(
            r#"{"offset_ms": 0, "detectors": {"primary": [{"confidence": 0.5, "class": "fight"}]}}

{"offset_ms": 250, "detectors": {"primary": [], "object": [{"confidence": 0.9, "class": "knife", "box": [1, 2, 3, 4]}]}, "media": "clip.mp4"}
"#,
        );

        let first = src.next_batch().await.unwrap().unwrap();
        assert_eq!(first.records_of("primary").len(), 1);
        assert_eq!(first.records_of("primary")[0].classification, "fight");

        let second = src.next_batch().await.unwrap().unwrap();
        assert_eq!(
            second.timestamp.duration_since(first.timestamp),
            Duration::from_millis(250)
        );
        assert_eq!(second.records_of("object")[0].confidence, 0.9);
        assert_eq!(second.media, Some(PathBuf::from("clip.mp4")));

        assert!(src.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_line_is_transient_and_stream_continues() {
        let mut src = source("not json\n{\"offset_ms\": 10}\n");

        let err = src.next_batch().await.unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(err, SourceError::Malformed { line: 1, .. }));

        let batch = src.next_batch().await.unwrap().unwrap();
        assert!(batch.detectors.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_transient_and_stream_continues() {
        let bytes: &'static [u8] = b"{\"offset_ms\": 0}\n{\"offset_ms\": \xff}\n{\"offset_ms\": 20}\n";
        let mut src = JsonLinesSource::new(bytes, false);

        let first = src.next_batch().await.unwrap().unwrap();

        let err = src.next_batch().await.unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(err, SourceError::Malformed { line: 2, .. }));

        let third = src.next_batch().await.unwrap().unwrap();
        assert_eq!(
            third.timestamp.duration_since(first.timestamp),
            Duration::from_millis(20)
        );
        assert!(src.next_batch().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_backwards_offset_is_rejected_without_moving_the_clock() {
        let mut src = source(
            "{\"offset_ms\": 0}\n{\"offset_ms\": 3600000}\n{\"offset_ms\": 1000}\n{\"offset_ms\": 3620000}\n",
        );
        let a = src.next_batch().await.unwrap().unwrap();
        let b = src.next_batch().await.unwrap().unwrap();

        let err = src.next_batch().await.unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(err, SourceError::Malformed { line: 3, .. }));

        let d = src.next_batch().await.unwrap().unwrap();
        assert_eq!(b.timestamp.duration_since(a.timestamp), Duration::from_secs(3600));
        assert_eq!(d.timestamp.duration_since(b.timestamp), Duration::from_secs(20));
    }
}
