//! Detection evidence, severity fusion, and incident history.

pub mod incident;
pub mod tracker;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

pub use self::incident::{ChannelOutcome, Incident, IncidentLog};
pub use self::tracker::{SeverityTracker, TrackerSettings};

/// Severity levels derived from the detection window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SeverityLevel {
    #[serde(alias = "none")]
    None,
    #[serde(alias = "mild")]
    Mild,
    #[serde(alias = "high")]
    High,
}

impl std::fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeverityLevel::None => write!(f, "NONE"),
            SeverityLevel::Mild => write!(f, "MILD"),
            SeverityLevel::High => write!(f, "HIGH"),
        }
    }
}

/// Result of one evaluation of the detection window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeverityAssessment {
    pub level: SeverityLevel,
    pub count: usize,
    pub max_confidence: f64,
}

impl SeverityAssessment {
    pub fn none() -> Self {
        Self {
            level: SeverityLevel::None,
            count: 0,
            max_confidence: 0.0,
        }
    }
}

/// Pixel-space box as `(x1, y1, x2, y2)`, serialised as a 4-element array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl From<[i32; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [i32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<BoundingBox> for [i32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {}, {})", self.x1, self.y1, self.x2, self.y2)
    }
}

/// A single classified detection as reported by one detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub confidence: f64,
    #[serde(rename = "class", default)]
    pub classification: String,
    #[serde(rename = "box", default, skip_serializing_if = "Option::is_none")]
    pub region: Option<BoundingBox>,
}

impl DetectionRecord {
    pub fn new(confidence: f64, classification: impl Into<String>) -> Self {
        Self {
            confidence,
            classification: classification.into(),
            region: None,
        }
    }

    pub fn with_region(mut self, region: impl Into<BoundingBox>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Confidence is a finite probability.
    pub fn is_valid(&self) -> bool {
        self.confidence.is_finite() && (0.0..=1.0).contains(&self.confidence)
    }
}

/// Everything one detector reported for a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorOutput {
    pub detector: String,
    pub records: Vec<DetectionRecord>,
}

/// All detector outputs for one sampled frame.
#[derive(Debug, Clone)]
pub struct FrameBatch {
    pub timestamp: Instant,
    pub detectors: Vec<DetectorOutput>,
    /// Evidence clip recorded by the capture layer, if any.
    pub media: Option<PathBuf>,
}

impl FrameBatch {
    pub fn new(timestamp: Instant) -> Self {
        Self {
            timestamp,
            detectors: Vec::new(),
            media: None,
        }
    }

    pub fn with_detector(
        mut self,
        detector: impl Into<String>,
        records: Vec<DetectionRecord>,
    ) -> Self {
        self.detectors.push(DetectorOutput {
            detector: detector.into(),
            records,
        });
        self
    }

    pub fn with_media(mut self, media: impl Into<PathBuf>) -> Self {
        self.media = Some(media.into());
        self
    }

    /// Records of the named detector, empty if it reported nothing.
    pub fn records_of(&self, detector: &str) -> &[DetectionRecord] {
        self.detectors
            .iter()
            .find(|d| d.detector == detector)
            .map(|d| d.records.as_slice())
            .unwrap_or(&[])
    }
}

/// A detection admitted into the severity window. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub timestamp: Instant,
    pub confidence: f64,
    pub classification: String,
    pub region: Option<BoundingBox>,
}

impl Detection {
    pub fn from_record(timestamp: Instant, record: &DetectionRecord) -> Self {
        Self {
            timestamp,
            confidence: record.confidence,
            classification: record.classification.clone(),
            region: record.region,
        }
    }
}
