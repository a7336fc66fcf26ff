//! The executor that runs [`Job`]s. There are two dispatch modes:
//! - [`Executor::run_pool`] fans independent jobs out to a number of workers pulling from one
//!   bounded queue, and reports one result per job once every worker is done;
//! - [`Executor::run_atomic`] runs an ordered list of statement jobs as a single store
//!   transaction, so either all of them take effect or none does.
//!
//! Both modes observe the cancellation token the executor was built with.

use crate::concurrency;
use crate::job::{Job, JobId, Sequenced};
use crate::ledger::{self, LedgerWriter, RowId, Statement};
use crate::swallow_panic;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Does the actual work for one job.
#[async_trait]
pub trait Handler<J>: Send + Sync + 'static {
    type Output: Send + 'static;
    type Error: std::error::Error + Send + 'static;

    async fn handle(&self, job: &J) -> Result<Self::Output, Self::Error>;
}

/// Executes statement jobs one statement at a time against a ledger writer.
pub struct StatementHandler {
    writer: Arc<dyn LedgerWriter>,
}

impl StatementHandler {
    pub fn new(writer: Arc<dyn LedgerWriter>) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl Handler<Job> for StatementHandler {
    type Output = RowId;
    type Error = ledger::Error;

    async fn handle(&self, job: &Job) -> Result<RowId, ledger::Error> {
        self.writer.execute(job.statement()).await
    }
}

#[derive(Debug, Error)]
pub enum JobError<E> {
    #[error("{0}")]
    Failed(E),
    #[error("cancelled")]
    Cancelled,
    #[error("handler panicked")]
    Panicked,
    #[error("job was never run")]
    Lost,
}

pub type Outcome<T, E> = Result<T, JobError<E>>;

/// Per-job results of a pool run, ordered by job id.
#[derive(Debug)]
pub struct Report<T, E> {
    results: Vec<(JobId, Outcome<T, E>)>,
}

impl<T, E> Default for Report<T, E> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
        }
    }
}

impl<T, E> Report<T, E> {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|(_, outcome)| outcome.is_ok())
    }

    pub fn get(&self, id: JobId) -> Option<&Outcome<T, E>> {
        self.results
            .iter()
            .find(|(job, _)| *job == id)
            .map(|(_, outcome)| outcome)
    }

    pub fn results(&self) -> &[(JobId, Outcome<T, E>)] {
        &self.results
    }

    pub fn failures(&self) -> impl Iterator<Item = (JobId, &JobError<E>)> {
        self.results
            .iter()
            .filter_map(|(id, outcome)| outcome.as_ref().err().map(|e| (*id, e)))
    }

    /// All outputs in job order, or the first failure.
    pub fn into_result(self) -> Result<Vec<T>, (JobId, JobError<E>)> {
        self.results
            .into_iter()
            .map(|(id, outcome)| outcome.map_err(|e| (id, e)))
            .collect()
    }
}

pub struct Executor {
    cancel: CancellationToken,
    target: &'static str,
}

impl Executor {
    /// `target` is the log target job outcomes are reported under.
    pub fn new(cancel: CancellationToken, target: &'static str) -> Self {
        Self { cancel, target }
    }

    /// Runs every job exactly once on `worker_count` workers (at least one) and waits for all of
    /// them. A failing job does not stop the others; its error is part of the report.
    pub async fn run_pool<J, H>(
        &self,
        jobs: Vec<J>,
        worker_count: usize,
        handler: Arc<H>,
    ) -> Report<H::Output, H::Error>
    where
        J: Sequenced + Send + 'static,
        H: Handler<J>,
    {
        if jobs.is_empty() {
            return Report::default();
        }
        let ids: Vec<JobId> = jobs.iter().map(Sequenced::id).collect();
        let (sender, receiver) = mpsc::channel(jobs.len());
        let queue = Arc::new(Mutex::new(receiver));

        let mut workers = JoinSet::new();
        for worker in 0..worker_count.max(1) {
            workers.spawn(work(
                worker,
                Arc::clone(&queue),
                Arc::clone(&handler),
                self.cancel.clone(),
                self.target,
            ));
        }

        for job in jobs {
            // The queue has room for every job, so this only fails if all workers are gone.
            if sender.send(job).await.is_err() {
                break;
            }
        }
        drop(sender);

        let mut results = Vec::with_capacity(ids.len());
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(done) => results.extend(done),
                Err(e) => log::error!(target: self.target, "worker failed: {}", e),
            }
        }
        for id in ids {
            if !results.iter().any(|(done, _)| *done == id) {
                log::error!(target: self.target, "job {} was never run", id);
                results.push((id, Err(JobError::Lost)));
            }
        }
        results.sort_by_key(|(id, _)| *id);
        Report { results }
    }

    /// Runs the statement jobs in order inside one store transaction. Concurrency conflicts
    /// reported by the store are retried; any other failure rolls everything back.
    pub async fn run_atomic(
        &self,
        jobs: &[Job],
        writer: &dyn LedgerWriter,
    ) -> Result<Vec<(JobId, RowId)>, ledger::Error> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        let statements: Vec<Statement> = jobs.iter().map(|job| job.statement().clone()).collect();
        for job in jobs {
            log::debug!(
                target: self.target,
                "job {}: {} {}",
                job.id(),
                job.statement().text(),
                job.statement().args()
            );
        }

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ledger::Error::Cancelled),
            result = concurrency::retry_loop(|| writer.execute_atomic(&statements)) => result,
        };

        match result {
            Ok(rows) => {
                for (job, row) in jobs.iter().zip(&rows) {
                    log::info!(
                        target: self.target,
                        "successfully executed job {} (row {})",
                        job.id(),
                        row
                    );
                }
                Ok(jobs.iter().map(Sequenced::id).zip(rows).collect())
            }
            Err(e) => {
                log::error!(
                    target: self.target,
                    "error executing jobs {}..={}, nothing was committed: {}",
                    jobs[0].id(),
                    jobs[jobs.len() - 1].id(),
                    e
                );
                Err(e)
            }
        }
    }
}

async fn work<J, H>(
    worker: usize,
    queue: Arc<Mutex<mpsc::Receiver<J>>>,
    handler: Arc<H>,
    cancel: CancellationToken,
    target: &'static str,
) -> Vec<(JobId, Outcome<H::Output, H::Error>)>
where
    J: Sequenced + Send + 'static,
    H: Handler<J>,
{
    let mut results = Vec::new();
    loop {
        let job = queue.lock().await.recv().await;
        let Some(job) = job else { break };
        let id = job.id();

        let outcome = if cancel.is_cancelled() {
            Err(JobError::Cancelled)
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(JobError::Cancelled),
                outcome = swallow_panic(handler.handle(&job)) => match outcome {
                    Some(Ok(output)) => Ok(output),
                    Some(Err(e)) => Err(JobError::Failed(e)),
                    None => Err(JobError::Panicked),
                },
            }
        };

        match &outcome {
            Ok(_) => log::info!(
                target: target,
                "worker {} successfully executed job {}",
                worker,
                id
            ),
            Err(e) => log::error!(
                target: target,
                "worker {} error executing job {}: {}",
                worker,
                id,
                e
            ),
        }
        results.push((id, outcome));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account;
    use crate::ledger::memory::MemoryLedger;
    use crate::ledger::LedgerReader;
    use crate::money::Money;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Numbered(JobId);

    impl Sequenced for Numbered {
        fn id(&self) -> JobId {
            self.0
        }
    }

    #[derive(Debug, Error)]
    #[error("job {0} failed")]
    struct TestError(u32);

    #[derive(Default)]
    struct Recorder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Handler<Numbered> for Recorder {
        type Output = u32;
        type Error = TestError;

        async fn handle(&self, job: &Numbered) -> Result<u32, TestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            match job.0 .0 {
                3 => Err(TestError(3)),
                5 => panic!("job 5 blew up"),
                n => Ok(n * 10),
            }
        }
    }

    fn numbered(count: u32) -> Vec<Numbered> {
        (1..=count).map(|n| Numbered(JobId(n))).collect()
    }

    fn executor() -> Executor {
        Executor::new(CancellationToken::new(), "test")
    }

    #[tokio::test]
    async fn empty_job_list_returns_immediately() {
        let handler = Arc::new(Recorder::default());
        let report = executor().run_pool(Vec::new(), 4, Arc::clone(&handler)).await;
        assert!(report.is_empty());
        assert!(report.all_succeeded());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_job_runs_exactly_once() {
        let handler = Arc::new(Recorder::default());
        let jobs: Vec<Numbered> = numbered(20)
            .into_iter()
            .filter(|job| !matches!(job.0, JobId(3) | JobId(5)))
            .collect();
        let report = executor().run_pool(jobs, 4, Arc::clone(&handler)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 18);
        assert_eq!(report.len(), 18);
        assert!(report.all_succeeded());
        let outputs = report.into_result().unwrap();
        assert_eq!(outputs[0], 10);
        assert_eq!(outputs[17], 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failures_do_not_stop_siblings() {
        let handler = Arc::new(Recorder::default());
        let report = executor().run_pool(numbered(6), 6, Arc::clone(&handler)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 6);
        assert_eq!(report.len(), 6);
        assert!(!report.all_succeeded());
        assert!(matches!(
            report.get(JobId(3)),
            Some(Err(JobError::Failed(TestError(3))))
        ));
        assert!(matches!(report.get(JobId(5)), Some(Err(JobError::Panicked))));
        assert!(matches!(report.get(JobId(6)), Some(Ok(60))));
        let failed: Vec<JobId> = report.failures().map(|(id, _)| id).collect();
        assert_eq!(failed, vec![JobId(3), JobId(5)]);
        assert!(matches!(report.into_result(), Err((JobId(3), _))));
    }

    #[tokio::test]
    async fn zero_workers_still_drains_the_queue() {
        let handler = Arc::new(Recorder::default());
        let report = executor().run_pool(numbered(2), 0, Arc::clone(&handler)).await;
        assert_eq!(report.len(), 2);
        assert!(report.all_succeeded());
    }

    #[tokio::test]
    async fn cancelled_context_skips_jobs() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let handler = Arc::new(Recorder::default());
        let report = Executor::new(cancel, "test")
            .run_pool(numbered(4), 2, Arc::clone(&handler))
            .await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(report.len(), 4);
        assert!(report
            .results()
            .iter()
            .all(|(_, outcome)| matches!(outcome, Err(JobError::Cancelled))));
    }

    #[tokio::test]
    async fn statement_jobs_run_against_the_writer() {
        let ledger = Arc::new(MemoryLedger::new());
        let ada = ledger.open("ada@example.com", 10).await;
        let jobs = Job::sequence([
            Statement::AdjustBalance {
                account: ada.account.id,
                delta: Money(5),
            },
            Statement::AdjustBalance {
                account: account::Id(99),
                delta: Money(5),
            },
        ]);
        let handler = Arc::new(StatementHandler::new(ledger.clone()));
        let report = executor().run_pool(jobs, 2, handler).await;
        assert!(matches!(report.get(JobId(1)), Some(Ok(_))));
        assert!(matches!(
            report.get(JobId(2)),
            Some(Err(JobError::Failed(ledger::Error::NotFound(_))))
        ));
        assert_eq!(ledger.balance(ada.account.id), Money(15));
    }

    #[tokio::test]
    async fn atomic_run_commits_everything() {
        let ledger = MemoryLedger::new();
        let ada = ledger.open("ada@example.com", 100).await;
        let bob = ledger.open("bob@example.com", 0).await;
        let jobs = Job::sequence([
            Statement::AdjustBalance {
                account: ada.account.id,
                delta: Money(-40),
            },
            Statement::AdjustBalance {
                account: bob.account.id,
                delta: Money(40),
            },
            Statement::AppendTransaction {
                receiver: bob.user.id,
                sender: ada.user.id,
                amount: Money(40),
            },
        ]);
        let rows = executor().run_atomic(&jobs, &ledger).await.unwrap();
        assert_eq!(
            rows.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            vec![JobId(1), JobId(2), JobId(3)]
        );
        assert_eq!(ledger.balance(ada.account.id), Money(60));
        assert_eq!(ledger.balance(bob.account.id), Money(40));
        assert_eq!(ledger.ledger().len(), 1);
    }

    #[tokio::test]
    async fn atomic_run_rolls_back_on_failure() {
        let ledger = MemoryLedger::new();
        let ada = ledger.open("ada@example.com", 100).await;
        let bob = ledger.open("bob@example.com", 0).await;
        ledger.set_fail_appends(true);
        let jobs = Job::sequence([
            Statement::AdjustBalance {
                account: ada.account.id,
                delta: Money(-40),
            },
            Statement::AdjustBalance {
                account: bob.account.id,
                delta: Money(40),
            },
            Statement::AppendTransaction {
                receiver: bob.user.id,
                sender: ada.user.id,
                amount: Money(40),
            },
        ]);
        let result = executor().run_atomic(&jobs, &ledger).await;
        assert!(matches!(result, Err(ledger::Error::ExecutionFailure(_))));
        assert_eq!(ledger.balance(ada.account.id), Money(100));
        assert_eq!(ledger.balance(bob.account.id), Money(0));
        assert!(ledger.ledger().is_empty());
        assert_eq!(
            ledger.current_balance(&ada.user.email).await.unwrap(),
            Money(100)
        );
    }

    #[tokio::test]
    async fn atomic_run_respects_cancellation() {
        let ledger = MemoryLedger::new();
        let ada = ledger.open("ada@example.com", 100).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let jobs = Job::sequence([Statement::AdjustBalance {
            account: ada.account.id,
            delta: Money(-40),
        }]);
        let result = Executor::new(cancel, "test").run_atomic(&jobs, &ledger).await;
        assert!(matches!(result, Err(ledger::Error::Cancelled)));
        assert_eq!(ledger.balance(ada.account.id), Money(100));
    }
}
