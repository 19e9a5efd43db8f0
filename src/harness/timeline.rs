//! Execution timelines for diagnosing interleavings

use crate::coordination::pessimistic::panic_message;
use crate::domain::ConcurrencyLevel;
use crate::harness::analysis::{millis, HarnessRun};
use crate::harness::ConcurrencyHarness;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt::Display;
use std::fmt::Write as _;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventKind {
    Start,
    Success,
    Error,
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEvent {
    pub index: usize,
    pub kind: TimelineEventKind,
    /// Time since the run started; same origin as `CallRecord::started_at`
    pub offset: Duration,
    pub detail: Option<String>,
}

/// Time-ordered events of every call in a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Timeline {
    events: Vec<TimelineEvent>,
}

impl Timeline {
    fn from_events(mut events: Vec<TimelineEvent>) -> Self {
        events.sort_by(|a, b| {
            a.offset
                .cmp(&b.offset)
                .then(a.index.cmp(&b.index))
                .then(a.kind.cmp(&b.kind))
        });
        Self { events }
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn for_call(&self, index: usize) -> impl Iterator<Item = &TimelineEvent> {
        self.events.iter().filter(move |event| event.index == index)
    }

    /// Largest number of calls that were in flight at the same time
    pub fn max_overlap(&self) -> usize {
        let mut in_flight = 0_usize;
        let mut peak = 0;
        for event in &self.events {
            match event.kind {
                TimelineEventKind::Start => {
                    in_flight += 1;
                    peak = peak.max(in_flight);
                }
                TimelineEventKind::End => in_flight = in_flight.saturating_sub(1),
                TimelineEventKind::Success | TimelineEventKind::Error => {}
            }
        }
        peak
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for event in &self.events {
            let _ = write!(
                out,
                "{:>10.3}ms  call {:>4}  {:?}",
                millis(event.offset),
                event.index,
                event.kind
            );
            if let Some(detail) = &event.detail {
                let _ = write!(out, "  {detail}");
            }
            out.push('\n');
        }
        out
    }
}

/// A harness run together with its reconstructed timeline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugRun {
    pub run: HarnessRun,
    pub timeline: Timeline,
}

struct TimelineRecorder {
    origin: Instant,
    events: Mutex<Vec<TimelineEvent>>,
}

impl TimelineRecorder {
    fn new(origin: Instant) -> Self {
        Self {
            origin,
            events: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, index: usize, kind: TimelineEventKind, detail: Option<String>) {
        let offset = Instant::now().saturating_duration_since(self.origin);
        self.events.lock().push(TimelineEvent {
            index,
            kind,
            offset,
            detail,
        });
    }

    fn timeline(&self) -> Timeline {
        Timeline::from_events(self.events.lock().clone())
    }
}

impl ConcurrencyHarness {
    /// Run a simulation while recording start/success/error/end events per call
    pub async fn debug_concurrent_operation<F, Fut, P, T, E>(
        &self,
        operation: F,
        concurrency: ConcurrencyLevel,
        params: P,
    ) -> DebugRun
    where
        F: Fn(usize, P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        P: Clone + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let origin = Instant::now();
        let recorder = Arc::new(TimelineRecorder::new(origin));
        let operation = Arc::new(operation);

        let traced = {
            let recorder = Arc::clone(&recorder);
            move |index: usize, params: P| {
                let recorder = Arc::clone(&recorder);
                let operation = Arc::clone(&operation);
                async move {
                    recorder.record(index, TimelineEventKind::Start, None);
                    let result = AssertUnwindSafe(async move { (*operation)(index, params).await })
                        .catch_unwind()
                        .await;
                    match &result {
                        Ok(Ok(_)) => recorder.record(index, TimelineEventKind::Success, None),
                        Ok(Err(error)) => recorder.record(
                            index,
                            TimelineEventKind::Error,
                            Some(error.to_string()),
                        ),
                        Err(panic) => recorder.record(
                            index,
                            TimelineEventKind::Error,
                            Some(panic_message(&**panic)),
                        ),
                    }
                    recorder.record(index, TimelineEventKind::End, None);
                    match result {
                        Ok(outcome) => outcome,
                        Err(panic) => std::panic::resume_unwind(panic),
                    }
                }
            }
        };

        let run = self
            .simulate_from(origin, traced, concurrency, params)
            .await;
        DebugRun {
            run,
            timeline: recorder.timeline(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(n: usize) -> ConcurrencyLevel {
        ConcurrencyLevel::try_new(n).expect("valid level")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_call_gets_a_bracketed_timeline() {
        let harness = ConcurrencyHarness::default();

        let debug = harness
            .debug_concurrent_operation(
                |index, ()| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    if index == 2 {
                        Err("already checked in".to_string())
                    } else {
                        Ok(index)
                    }
                },
                level(4),
                (),
            )
            .await;

        assert_eq!(debug.timeline.events().len(), 12);
        for index in 0..4 {
            let kinds: Vec<_> = debug.timeline.for_call(index).map(|e| e.kind).collect();
            let expected = if index == 2 {
                TimelineEventKind::Error
            } else {
                TimelineEventKind::Success
            };
            assert_eq!(
                kinds,
                vec![TimelineEventKind::Start, expected, TimelineEventKind::End]
            );
        }
        assert!(debug.timeline.max_overlap() > 1);
        assert_eq!(debug.run.analysis.failures, 1);
        assert!(debug.timeline.render().contains("already checked in"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_timeline_shares_the_run_clock() {
        let harness = ConcurrencyHarness::default();

        let debug = harness
            .debug_concurrent_operation(
                |_index, ()| async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok::<_, String>(())
                },
                level(6),
                (),
            )
            .await;

        for record in &debug.run.records {
            let offsets: Vec<_> = debug
                .timeline
                .for_call(record.index)
                .map(|event| event.offset)
                .collect();
            let (Some(first), Some(last)) = (offsets.first(), offsets.last()) else {
                panic!("call {} has no timeline events", record.index);
            };
            assert!(*first >= record.started_at);
            assert!(*last <= record.started_at + record.duration);
        }
    }

    #[tokio::test]
    async fn test_panics_are_recorded_before_the_call_fails() {
        let harness = ConcurrencyHarness::default();

        let debug = harness
            .debug_concurrent_operation(
                |_index, ()| async move {
                    if true {
                        panic!("scanner offline");
                    }
                    Ok::<_, String>(())
                },
                level(1),
                (),
            )
            .await;

        let kinds: Vec<_> = debug.timeline.events().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TimelineEventKind::Start,
                TimelineEventKind::Error,
                TimelineEventKind::End
            ]
        );
        assert_eq!(debug.run.records[0].error.as_deref(), Some("scanner offline"));
    }

    #[test]
    fn test_overlap_counts_concurrent_starts() {
        let at = |index, kind, millis| TimelineEvent {
            index,
            kind,
            offset: Duration::from_millis(millis),
            detail: None,
        };
        let timeline = Timeline::from_events(vec![
            at(0, TimelineEventKind::Start, 0),
            at(1, TimelineEventKind::Start, 1),
            at(0, TimelineEventKind::End, 5),
            at(2, TimelineEventKind::Start, 6),
            at(1, TimelineEventKind::End, 7),
            at(2, TimelineEventKind::End, 8),
        ]);
        assert_eq!(timeline.max_overlap(), 2);
    }
}
