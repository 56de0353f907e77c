//! Human-readable alert text and the enrichment sections.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Local};

use crate::alert::Annotation;
use crate::detect::{FrameBatch, SeverityAssessment, SeverityLevel};

/// Round to two decimals for display.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Collect every non-primary detector's output, records sorted by
/// confidence (highest first). Detectors that reported nothing are skipped.
pub fn annotations(batch: &FrameBatch, primary: &str) -> Vec<Annotation> {
    batch
        .detectors
        .iter()
        .filter(|d| d.detector != primary && !d.records.is_empty())
        .map(|d| {
            let mut records = d.records.clone();
            records.sort_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(Ordering::Equal)
            });
            Annotation {
                detector: d.detector.clone(),
                records,
            }
        })
        .collect()
}

/// Render the alert body.
///
/// `sections` maps detector names to their section headings; a detector
/// without an entry gets the heading `Detector <name>`.
pub fn compose(
    title: &str,
    assessment: &SeverityAssessment,
    annotations: &[Annotation],
    sections: &BTreeMap<String, String>,
    at: DateTime<Local>,
) -> String {
    let mut text = format!(
        "\u{1F6A8} {}\nDate: {}\nTime: {}\nSeverity: {}\nConfidence: {:.2}\nDetections: {}",
        title,
        at.format("%Y-%m-%d"),
        at.format("%I:%M %p"),
        assessment.level,
        assessment.max_confidence,
        assessment.count,
    );

    for ann in annotations {
        let heading = sections
            .get(&ann.detector)
            .cloned()
            .unwrap_or_else(|| format!("Detector {}", ann.detector));
        let _ = write!(text, "\n\n{}:", heading);
        for rec in &ann.records {
            let _ = write!(text, "\n - Confidence: {:.2}", rec.confidence);
            if !rec.classification.is_empty() {
                let _ = write!(text, ", Class: {}", rec.classification);
            }
            if let Some(region) = rec.region {
                let _ = write!(text, ", Box: {}", region);
            }
        }
    }

    text
}

/// One line of the status board's alert log.
pub fn log_line(at: DateTime<Local>, level: SeverityLevel, max_confidence: f64, count: usize) -> String {
    format!(
        "{} - {} alert (Confidence: {:.2}, Detections: {})",
        at.format("%H:%M:%S"),
        level,
        max_confidence,
        count
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::DetectionRecord;
    use chrono::TimeZone;
    use tokio::time::Instant;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn test_compose_headline() {
        let a = SeverityAssessment {
            level: SeverityLevel::High,
            count: 26,
            max_confidence: 0.854,
        };
        let text = compose("Violent Activity Detected!", &a, &[], &BTreeMap::new(), at());
        assert!(text.starts_with("\u{1F6A8} Violent Activity Detected!\n"));
        assert!(text.contains("Date: 2024-03-09\n"));
        assert!(text.contains("Time: 02:05 PM\n"));
        assert!(text.contains("Severity: HIGH\n"));
        assert!(text.contains("Confidence: 0.85\n"));
        assert!(text.ends_with("Detections: 26"));
    }

    #[test]
    fn test_annotations_sorted_and_rendered() {
        let batch = FrameBatch::new(Instant::now())
            .with_detector("primary", vec![DetectionRecord::new(0.7, "fight")])
            .with_detector(
                "object",
                vec![
                    DetectionRecord::new(0.41, "bat"),
                    DetectionRecord::new(0.93, "knife").with_region([10, 20, 30, 40]),
                ],
            )
            .with_detector("classifier", vec![]);

        let anns = annotations(&batch, "primary");
        assert_eq!(anns.len(), 1);
        assert_eq!(anns[0].detector, "object");
        assert_eq!(anns[0].records[0].classification, "knife");
        assert_eq!(anns[0].records[1].classification, "bat");

        let mut sections = BTreeMap::new();
        sections.insert("object".to_string(), "Lethal Objects Detected".to_string());
        let a = SeverityAssessment {
            level: SeverityLevel::Mild,
            count: 21,
            max_confidence: 0.7,
        };
        let text = compose("t", &a, &anns, &sections, at());
        assert!(text.contains(
            "\n\nLethal Objects Detected:\n - Confidence: 0.93, Class: knife, Box: (10, 20, 30, 40)\n - Confidence: 0.41, Class: bat"
        ));
    }

    #[test]
    fn test_unnamed_section_uses_detector_name() {
        let anns = vec![Annotation {
            detector: "pose".to_string(),
            records: vec![DetectionRecord::new(0.5, "")],
        }];
        let text = compose("t", &SeverityAssessment::none(), &anns, &BTreeMap::new(), at());
        assert!(text.ends_with("Detector pose:\n - Confidence: 0.50"));
    }

    #[test]
    fn test_log_line_format() {
        assert_eq!(
            log_line(at(), SeverityLevel::Mild, 0.5, 25),
            "14:05:07 - MILD alert (Confidence: 0.50, Detections: 25)"
        );
    }
}
