//! Matrix scheduler: every leg in its own task, bounded by `max_parallel`.

use std::sync::Arc;
use std::time::Instant;

use cimatrix_core::{obs, LegReport, MatrixLeg, PipelineError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{warn, Instrument};

use crate::cancel::CancelToken;
use crate::leg::{cancelled_report, LegExecutor};

/// Result of running the whole matrix: one report per leg, in matrix order.
#[derive(Debug, Clone)]
pub struct MatrixRun {
    pub legs: Vec<LegReport>,
    pub cancelled: bool,
}

pub struct MatrixScheduler {
    max_parallel: usize,
}

impl MatrixScheduler {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
        }
    }

    /// Run every leg and wait for all of them (the single join barrier).
    ///
    /// A failing leg never stops its siblings. Cancellation stops legs that
    /// are running and keeps queued ones from starting.
    pub async fn run(
        &self,
        legs: &[MatrixLeg],
        executor: Arc<dyn LegExecutor>,
        cancel: CancelToken,
    ) -> MatrixRun {
        // Never more permits than legs; also stays under MAX_PERMITS.
        let permits = self.max_parallel.min(legs.len().max(1));
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut tasks: Vec<(usize, MatrixLeg, JoinHandle<LegReport>)> = Vec::with_capacity(legs.len());

        for (index, leg) in legs.iter().cloned().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let executor = Arc::clone(&executor);
            let cancel = cancel.clone();
            let span = obs::leg_span(index, &leg);
            let task_leg = leg.clone();

            let task = tokio::spawn(
                async move {
                    let start = Instant::now();
                    let elapsed = || start.elapsed().as_millis() as u64;

                    let _permit = tokio::select! {
                        permit = semaphore.acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => return cancelled_report(index, task_leg, elapsed()),
                        },
                        _ = cancel.cancelled() => return cancelled_report(index, task_leg, elapsed()),
                    };
                    if cancel.is_cancelled() {
                        return cancelled_report(index, task_leg, elapsed());
                    }

                    tokio::select! {
                        report = executor.run_leg(index, task_leg.clone()) => report,
                        _ = cancel.cancelled() => {
                            let report = cancelled_report(index, task_leg, elapsed());
                            obs::emit_leg_finished(&report);
                            report
                        }
                    }
                }
                .instrument(span),
            );
            tasks.push((index, leg, task));
        }

        let mut reports = Vec::with_capacity(tasks.len());
        for (index, leg, task) in tasks {
            let report = match task.await {
                Ok(report) => report,
                Err(e) => {
                    warn!(index = index, leg = %leg, error = %e, "leg task did not complete");
                    let err = PipelineError::Command {
                        program: format!("leg {}", leg.slug()),
                        reason: e.to_string(),
                    };
                    LegReport::failed(index, leg, Vec::new(), &err, 0)
                }
            };
            reports.push(report);
        }

        MatrixRun {
            legs: reports,
            cancelled: cancel.is_cancelled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use async_trait::async_trait;
    use cimatrix_core::{LegStatus, StepResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Executor that fails chosen legs and tracks peak concurrency.
    struct FakeLegs {
        fail: Vec<usize>,
        delay: Duration,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeLegs {
        fn new(fail: Vec<usize>, delay: Duration) -> Self {
            Self {
                fail,
                delay,
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LegExecutor for FakeLegs {
        async fn run_leg(&self, index: usize, leg: MatrixLeg) -> LegReport {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.fail.contains(&index) {
                let err = PipelineError::TestFailure {
                    step: "main".to_string(),
                    exit_code: 1,
                };
                LegReport::failed(index, leg, vec![StepResult::new("main", 1, 1)], &err, 1)
            } else {
                LegReport::passed(index, leg, vec![StepResult::new("main", 0, 1)], 1)
            }
        }
    }

    fn legs(n: usize) -> Vec<MatrixLeg> {
        (0..n).map(|i| MatrixLeg::new(format!("3.{}", i), i % 2 == 0)).collect()
    }

    #[tokio::test]
    async fn test_failing_leg_does_not_stop_siblings() {
        let executor = Arc::new(FakeLegs::new(vec![1], Duration::from_millis(5)));
        let run = MatrixScheduler::new(4)
            .run(&legs(4), executor, CancelToken::never())
            .await;

        assert!(!run.cancelled);
        assert_eq!(run.legs.len(), 4);
        let statuses: Vec<LegStatus> = run.legs.iter().map(|l| l.status).collect();
        assert_eq!(
            statuses,
            vec![LegStatus::Passed, LegStatus::Failed, LegStatus::Passed, LegStatus::Passed]
        );
    }

    #[tokio::test]
    async fn test_reports_keep_matrix_order() {
        let executor = Arc::new(FakeLegs::new(vec![], Duration::from_millis(1)));
        let input = legs(6);
        let run = MatrixScheduler::new(3).run(&input, executor, CancelToken::never()).await;
        let order: Vec<MatrixLeg> = run.legs.iter().map(|l| l.leg.clone()).collect();
        assert_eq!(order, input);
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let executor = Arc::new(FakeLegs::new(vec![], Duration::from_millis(20)));
        MatrixScheduler::new(2)
            .run(&legs(6), executor.clone(), CancelToken::never())
            .await;
        assert!(executor.peak.load(Ordering::SeqCst) <= 2);
        assert!(executor.peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_huge_max_parallel_runs_every_leg_at_once() {
        let executor = Arc::new(FakeLegs::new(vec![], Duration::from_millis(20)));
        let run = MatrixScheduler::new(usize::MAX)
            .run(&legs(3), executor.clone(), CancelToken::never())
            .await;
        assert_eq!(run.legs.len(), 3);
        assert!(run.legs.iter().all(|l| l.status == LegStatus::Passed));
        assert!(executor.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_cancel_stops_running_and_queued_legs() {
        let executor = Arc::new(FakeLegs::new(vec![], Duration::from_secs(30)));
        let (handle, token) = cancel_pair();

        let scheduler = MatrixScheduler::new(1);
        let input = legs(3);
        let run = tokio::join!(scheduler.run(&input, executor, token), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        })
        .0;

        assert!(run.cancelled);
        assert!(run.legs.iter().all(|l| l.status == LegStatus::Cancelled));
    }
}
