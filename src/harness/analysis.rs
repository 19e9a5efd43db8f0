//! Per-call records and their aggregate analysis

use crate::domain::{ConcurrencyLevel, RunId};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::fmt::Write as _;
use std::sync::LazyLock;
use std::time::Duration;

static CAPACITY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)capacity|maximum|full|limit").expect("capacity pattern is valid")
});

static DUPLICATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)already|duplicate|exists").expect("duplicate pattern is valid")
});

/// Ratio of duration standard deviation to mean above which contention is flagged
pub const DEFAULT_VARIANCE_RATIO: f64 = 0.5;

/// Outcome and timing of one simulated caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallRecord {
    pub index: usize,
    pub success: bool,
    pub duration: Duration,
    /// When the call started, relative to the start of the run
    pub started_at: Duration,
    pub error: Option<String>,
}

/// Heuristic signal of contention or incorrect concurrency handling
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RaceIndicator {
    /// Failures whose message reads like a capacity limit was hit
    CapacityViolation { count: usize },
    /// Failures whose message reads like a duplicate action was rejected
    DuplicateOperation { count: usize },
    /// Call durations vary widely relative to their mean
    HighDurationVariance { std_dev_ms: f64, mean_ms: f64 },
}

impl fmt::Display for RaceIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityViolation { count } => {
                write!(f, "{count} failure(s) mention capacity limits")
            }
            Self::DuplicateOperation { count } => {
                write!(f, "{count} failure(s) mention duplicate operations")
            }
            Self::HighDurationVariance {
                std_dev_ms,
                mean_ms,
            } => write!(
                f,
                "duration std dev {std_dev_ms:.2}ms exceeds tolerance for mean {mean_ms:.2}ms"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunAnalysis {
    pub total: usize,
    pub successes: usize,
    pub failures: usize,
    /// Fraction of calls that succeeded, 0.0 to 1.0
    pub success_rate: f64,
    pub min_duration: Duration,
    pub avg_duration: Duration,
    pub max_duration: Duration,
    pub std_dev: Duration,
    pub indicators: Vec<RaceIndicator>,
}

impl RunAnalysis {
    pub fn from_records(records: &[CallRecord], variance_ratio: f64) -> Self {
        let total = records.len();
        let successes = records.iter().filter(|record| record.success).count();
        let failures = total - successes;

        let secs: Vec<f64> = records
            .iter()
            .map(|record| record.duration.as_secs_f64())
            .collect();
        let (mean, std_dev) = mean_and_std_dev(&secs);

        let mut indicators = Vec::new();
        let failure_messages = records
            .iter()
            .filter(|record| !record.success)
            .filter_map(|record| record.error.as_deref());

        let (capacity, duplicate) =
            failure_messages.fold((0, 0), |(capacity, duplicate), message| {
                (
                    capacity + usize::from(CAPACITY_PATTERN.is_match(message)),
                    duplicate + usize::from(DUPLICATE_PATTERN.is_match(message)),
                )
            });
        if capacity > 0 {
            indicators.push(RaceIndicator::CapacityViolation { count: capacity });
        }
        if duplicate > 0 {
            indicators.push(RaceIndicator::DuplicateOperation { count: duplicate });
        }
        if total > 1 && mean > 0.0 && std_dev > mean * variance_ratio {
            indicators.push(RaceIndicator::HighDurationVariance {
                std_dev_ms: std_dev * 1000.0,
                mean_ms: mean * 1000.0,
            });
        }

        Self {
            total,
            successes,
            failures,
            success_rate: if total == 0 {
                0.0
            } else {
                successes as f64 / total as f64
            },
            min_duration: records
                .iter()
                .map(|record| record.duration)
                .min()
                .unwrap_or_default(),
            avg_duration: Duration::from_secs_f64(mean),
            max_duration: records
                .iter()
                .map(|record| record.duration)
                .max()
                .unwrap_or_default(),
            std_dev: Duration::from_secs_f64(std_dev),
            indicators,
        }
    }

    pub fn has_race_indicators(&self) -> bool {
        !self.indicators.is_empty()
    }
}

fn mean_and_std_dev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    let variance = values
        .iter()
        .map(|value| (value - mean).powi(2))
        .sum::<f64>()
        / count;
    (mean, variance.sqrt())
}

/// One completed harness invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarnessRun {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub concurrency_level: ConcurrencyLevel,
    /// Wall time from the first launch to the last completion
    pub total_duration: Duration,
    /// One record per call, in launch order
    pub records: Vec<CallRecord>,
    pub analysis: RunAnalysis,
}

impl HarnessRun {
    pub fn failure_messages(&self) -> impl Iterator<Item = &str> {
        self.records
            .iter()
            .filter_map(|record| record.error.as_deref())
    }

    /// Human-readable summary of the run
    pub fn report(&self) -> String {
        let analysis = &self.analysis;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Run {} ({} concurrent calls, {:.2}ms total)",
            self.run_id,
            self.concurrency_level,
            millis(self.total_duration)
        );
        let _ = writeln!(
            out,
            "  succeeded: {}/{} ({:.1}%)",
            analysis.successes,
            analysis.total,
            analysis.success_rate * 100.0
        );
        let _ = writeln!(
            out,
            "  durations: min {:.2}ms, avg {:.2}ms, max {:.2}ms, std dev {:.2}ms",
            millis(analysis.min_duration),
            millis(analysis.avg_duration),
            millis(analysis.max_duration),
            millis(analysis.std_dev)
        );
        if analysis.indicators.is_empty() {
            let _ = writeln!(out, "  race indicators: none");
        } else {
            let _ = writeln!(out, "  race indicators:");
            for indicator in &analysis.indicators {
                let _ = writeln!(out, "    - {indicator}");
            }
        }
        out
    }
}

impl fmt::Display for HarnessRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.report())
    }
}

pub(crate) fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
