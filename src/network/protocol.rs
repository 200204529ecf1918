use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::monitor::AnalysisRequest;
use crate::utils::now_epoch_ms;

/// Frames the client writes to the analysis stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    QualityAnalysisRequest {
        text: String,
        prompt: String,
        client_timestamp: u64,
        platform: String,
    },
    Heartbeat {
        client_timestamp: u64,
        module: String,
        platform: String,
    },
}

impl OutboundFrame {
    pub fn analysis(request: &AnalysisRequest) -> Self {
        Self::QualityAnalysisRequest {
            text: request.text.clone(),
            prompt: request.text.clone(),
            client_timestamp: request.client_timestamp,
            platform: request.platform.clone(),
        }
    }

    pub fn heartbeat(module: &str, platform: &str) -> Self {
        Self::Heartbeat {
            client_timestamp: now_epoch_ms(),
            module: module.to_string(),
            platform: platform.to_string(),
        }
    }
}

/// One analysis response. Every field is optional on the wire: a payload
/// without `quality_metrics` on non-empty input means "still analyzing",
/// not an error.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisEvent {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub quality_metrics: Option<QualityMetrics>,
    #[serde(default)]
    pub main_intent: Option<IntentClassification>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QualityMetrics {
    #[serde(default)]
    pub clarity_score: f32,
    #[serde(default, rename = "ambiguity_score")]
    pub specificity: f32,
    #[serde(default)]
    pub intent_clarity: f32,
    #[serde(default)]
    pub depth_of_prompt: f32,
}

impl QualityMetrics {
    pub fn mean_score(&self) -> f32 {
        (self.clarity_score + self.specificity + self.intent_clarity + self.depth_of_prompt) / 4.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentClassification {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
}

/// Parses one inbound payload defensively. Malformed payloads are dropped
/// here and never reach a caller as an error.
pub fn parse_inbound(payload: &str) -> Option<AnalysisEvent> {
    match serde_json::from_str::<AnalysisEvent>(payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!("dropped malformed stream payload: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(text: &str) -> AnalysisRequest {
        AnalysisRequest {
            text: text.to_string(),
            client_timestamp: 1_700_000_000_000,
            platform: "chatgpt".to_string(),
        }
    }

    #[test]
    fn analysis_frame_serializes_with_wire_type_tag() {
        let frame = OutboundFrame::analysis(&request("Write me a poem"));
        let serialized = serde_json::to_string(&frame).expect("frame should serialize");

        assert!(serialized.contains("\"type\":\"quality_analysis_request\""));
        assert!(serialized.contains("\"text\":\"Write me a poem\""));
        assert!(serialized.contains("\"prompt\":\"Write me a poem\""));
        assert!(serialized.contains("\"platform\":\"chatgpt\""));
    }

    #[test]
    fn heartbeat_frame_carries_module_and_platform() {
        let frame = OutboundFrame::heartbeat("quality_feedback", "web");
        let serialized = serde_json::to_string(&frame).expect("frame should serialize");

        assert!(serialized.contains("\"type\":\"heartbeat\""));
        assert!(serialized.contains("\"module\":\"quality_feedback\""));
        assert!(serialized.contains("\"client_timestamp\""));
    }

    #[test]
    fn inbound_event_parses_metrics_and_intent() {
        let payload = r#"{
            "prompt": "Write me a poem",
            "quality_metrics": {
                "clarity_score": 0.9,
                "ambiguity_score": 0.7,
                "intent_clarity": 0.8,
                "depth_of_prompt": 0.8
            },
            "main_intent": {"category": "creative_writing", "description": "poetry request"}
        }"#;

        let event = parse_inbound(payload).expect("payload should parse");
        let metrics = event.quality_metrics.expect("metrics should be present");
        assert!((metrics.mean_score() - 0.8).abs() < 1e-6);
        assert_eq!(
            event.main_intent.map(|intent| intent.category),
            Some("creative_writing".to_string())
        );
    }

    #[test]
    fn inbound_event_without_metrics_is_not_an_error() {
        let event = parse_inbound(r#"{"prompt": "half-typed"}"#).expect("payload should parse");
        assert!(event.quality_metrics.is_none());
        assert!(event.main_intent.is_none());
    }

    #[test]
    fn malformed_payload_is_dropped() {
        assert!(parse_inbound("not json at all").is_none());
        assert!(parse_inbound("[1, 2, 3]").is_none());
    }
}
