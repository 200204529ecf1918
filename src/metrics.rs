use std::collections::VecDeque;

use serde::Serialize;

use crate::utils::now_epoch_ms;

const DEFAULT_WINDOW_SIZE: usize = 256;
const ANALYSIS_P95_TARGET_MS: u64 = 1_500;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSummary {
    pub samples: usize,
    pub average_ms: u64,
    pub p95_ms: u64,
    pub max_ms: u64,
}

impl MetricSummary {
    fn empty() -> Self {
        Self {
            samples: 0,
            average_ms: 0,
            p95_ms: 0,
            max_ms: 0,
        }
    }
}

#[derive(Debug)]
struct RollingWindow {
    values: VecDeque<u64>,
    capacity: usize,
}

impl RollingWindow {
    fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn record(&mut self, value_ms: u64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value_ms);
    }

    fn summary(&self) -> MetricSummary {
        if self.values.is_empty() {
            return MetricSummary::empty();
        }

        let samples = self.values.len();
        let sum: u64 = self.values.iter().sum();
        let max_ms = self.values.iter().copied().max().unwrap_or(0);

        let mut sorted: Vec<u64> = self.values.iter().copied().collect();
        sorted.sort_unstable();
        let p95_index = ((samples as f64 * 0.95).ceil() as usize)
            .saturating_sub(1)
            .min(samples - 1);

        MetricSummary {
            samples,
            average_ms: sum / samples as u64,
            p95_ms: sorted[p95_index],
            max_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackReport {
    pub generated_at_ms: u64,
    pub analysis_roundtrip: MetricSummary,
    pub enhance: MetricSummary,
    pub sent_analysis_requests: u64,
    pub malformed_frames: u64,
    pub stale_results: u64,
    pub stream_failures: u64,
    pub stream_degraded: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub struct RuntimeMetrics {
    analysis_roundtrip_ms: RollingWindow,
    enhance_ms: RollingWindow,
    sent_analysis_requests: u64,
    malformed_frames: u64,
    stale_results: u64,
    stream_failures: u64,
    stream_degraded: bool,
}

impl RuntimeMetrics {
    pub fn new() -> Self {
        Self {
            analysis_roundtrip_ms: RollingWindow::new(DEFAULT_WINDOW_SIZE),
            enhance_ms: RollingWindow::new(DEFAULT_WINDOW_SIZE),
            sent_analysis_requests: 0,
            malformed_frames: 0,
            stale_results: 0,
            stream_failures: 0,
            stream_degraded: false,
        }
    }

    pub fn record_analysis_request(&mut self) {
        self.sent_analysis_requests += 1;
    }

    pub fn record_analysis_roundtrip(&mut self, roundtrip_ms: u64) {
        self.analysis_roundtrip_ms.record(roundtrip_ms);
    }

    pub fn record_enhance(&mut self, enhance_ms: u64) {
        self.enhance_ms.record(enhance_ms);
    }

    pub fn record_malformed_frame(&mut self) {
        self.malformed_frames += 1;
    }

    pub fn record_stale_result(&mut self) {
        self.stale_results += 1;
    }

    pub fn record_stream_failure(&mut self) {
        self.stream_failures += 1;
    }

    pub fn mark_stream_degraded(&mut self) {
        self.stream_degraded = true;
    }

    pub fn report(&self) -> FeedbackReport {
        let analysis_roundtrip = self.analysis_roundtrip_ms.summary();
        let enhance = self.enhance_ms.summary();

        let mut warnings = Vec::new();
        if self.stream_degraded {
            warnings.push("Quality stream is degraded; reconnect cap exhausted.".to_string());
        }
        if self.malformed_frames > 0 {
            warnings.push(format!(
                "Dropped {} malformed stream payloads.",
                self.malformed_frames
            ));
        }
        if analysis_roundtrip.samples > 0 && analysis_roundtrip.p95_ms > ANALYSIS_P95_TARGET_MS {
            warnings.push(format!(
                "Analysis P95 latency {}ms exceeded target {}ms.",
                analysis_roundtrip.p95_ms, ANALYSIS_P95_TARGET_MS
            ));
        }

        FeedbackReport {
            generated_at_ms: now_epoch_ms(),
            analysis_roundtrip,
            enhance,
            sent_analysis_requests: self.sent_analysis_requests,
            malformed_frames: self.malformed_frames,
            stale_results: self.stale_results,
            stream_failures: self.stream_failures,
            stream_degraded: self.stream_degraded,
            warnings,
        }
    }
}

impl Default for RuntimeMetrics {
    fn default() -> Self {
        Self::new()
    }
}
