use std::future::Future;

use futures_util::future::join_all;
use tracing::{info, warn};

use crate::error::PushError;

/// Per-target results of one fan-out, in target order.
#[derive(Debug)]
pub struct FanOutReport<C, T> {
    pub results: Vec<(C, Result<T, PushError>)>,
}

impl<C, T> FanOutReport<C, T> {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|(_, result)| result.is_ok()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.results.len() - self.success_count()
    }

    pub fn all_failed(&self) -> bool {
        !self.results.is_empty() && self.success_count() == 0
    }

    pub fn successes(&self) -> impl Iterator<Item = (&C, &T)> {
        self.results
            .iter()
            .filter_map(|(target, result)| result.as_ref().ok().map(|value| (target, value)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&C, &PushError)> {
        self.results
            .iter()
            .filter_map(|(target, result)| result.as_ref().err().map(|err| (target, err)))
    }
}

/// Runs `op` against every target concurrently and waits for all of them.
///
/// A failing target never cancels its siblings. Dropping the returned future
/// cancels every call still in flight.
pub async fn fan_out<C, T, F, Fut>(what: &str, targets: Vec<C>, op: F) -> FanOutReport<C, T>
where
    C: Clone,
    F: Fn(C) -> Fut,
    Fut: Future<Output = Result<T, PushError>>,
{
    if targets.is_empty() {
        info!("{what}: no targets");
        return FanOutReport {
            results: Vec::new(),
        };
    }

    let outcomes = join_all(targets.iter().cloned().map(&op)).await;
    let report = FanOutReport {
        results: targets.into_iter().zip(outcomes).collect(),
    };

    if report.failure_count() > 0 {
        warn!(
            "{what}: {} of {} targets failed",
            report.failure_count(),
            report.results.len()
        );
    }
    report
}
