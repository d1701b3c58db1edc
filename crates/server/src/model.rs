use artifacts::UploadRecord;
use chrono::{DateTime, SecondsFormat, Utc};
use detector::Detection;
use serde::Serialize;
use std::path::PathBuf;

/// Outcome of one processed unit: a still image or a single video frame.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub source: UploadRecord,
    pub detections: Vec<Detection>,
    pub output_path: PathBuf,
    pub url: String,
    pub detection_count: usize,
    pub completed_at: DateTime<Utc>,
    pub frame: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultSummary {
    pub filename: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<u32>,
    pub detection_count: usize,
    pub detections: Vec<Detection>,
}

impl From<&DetectionResult> for ResultSummary {
    fn from(result: &DetectionResult) -> Self {
        Self {
            filename: result.source.original_filename.clone(),
            url: result.url.clone(),
            frame: result.frame,
            detection_count: result.detection_count,
            detections: result.detections.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileError {
    pub filename: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseEnvelope {
    pub success: bool,
    pub message: String,
    pub results: Vec<ResultSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FileError>,
    pub detection_count: usize,
    pub timestamp: String,
}

impl ResponseEnvelope {
    /// Envelope for a processed batch; `success` only when nothing failed.
    pub fn from_batch(message: impl Into<String>, results: &[DetectionResult], errors: Vec<FileError>) -> Self {
        Self {
            success: errors.is_empty(),
            message: message.into(),
            detection_count: results.iter().map(|r| r.detection_count).sum(),
            results: results.iter().map(ResultSummary::from).collect(),
            errors,
            timestamp: now(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            results: Vec::new(),
            errors: Vec::new(),
            detection_count: 0,
            timestamp: now(),
        }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use artifacts::MediaKind;
    use detector::BoundingBox;

    fn result(name: &str, count: usize, frame: Option<u32>) -> DetectionResult {
        let detection = Detection {
            class_id: 0,
            label: "person".to_string(),
            confidence: 0.9,
            bbox: BoundingBox::from_corners(0.0, 0.0, 10.0, 10.0),
        };
        DetectionResult {
            source: UploadRecord {
                original_filename: name.to_string(),
                sanitized_filename: format!("x_{}", name),
                storage_path: PathBuf::from(name),
                kind: MediaKind::Image,
                size_bytes: 1,
                received_at: Utc::now(),
            },
            detections: vec![detection; count],
            output_path: PathBuf::from("out.jpg"),
            url: "/static/images/exp/out.jpg".to_string(),
            detection_count: count,
            completed_at: Utc::now(),
            frame,
        }
    }

    #[test]
    fn test_envelope_sums_successful_results() {
        let results = vec![result("a.png", 2, None), result("b.png", 3, None)];
        let envelope = ResponseEnvelope::from_batch("done", &results, Vec::new());

        assert!(envelope.success);
        assert_eq!(envelope.detection_count, 5);
        assert_eq!(envelope.results[1].filename, "b.png");
    }

    #[test]
    fn test_envelope_json_shape() {
        let errors = vec![FileError {
            filename: "c.png".to_string(),
            message: "Object detection failed".to_string(),
        }];
        let envelope = ResponseEnvelope::from_batch("partial", &[result("a.png", 1, Some(4))], errors);
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["results"][0]["frame"], 4);
        assert_eq!(json["results"][0]["detections"][0]["label"], "person");
        assert_eq!(json["errors"][0]["filename"], "c.png");
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let envelope = ResponseEnvelope::from_batch("ok", &[result("a.png", 0, None)], Vec::new());
        let json = serde_json::to_value(&envelope).unwrap();

        assert!(json.get("errors").is_none());
        assert!(json["results"][0].get("frame").is_none());
    }
}
