//! Worker runner — drives a [`FieldPipeline`] on its poll interval until
//! shutdown, and runs groups of workers side by side.

use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::pipeline::{CycleReport, FieldPipeline};
use super::Shutdown;
use crate::models::CardField;

/// Totals over every cycle a worker ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSummary {
    pub field: CardField,
    pub worker_id: String,
    pub cycles: usize,
    pub committed: usize,
    pub sentinels: usize,
    pub retried: usize,
    pub failed: usize,
    pub contended: usize,
    pub store_errors: usize,
}

impl WorkerSummary {
    fn new(field: CardField, worker_id: &str) -> Self {
        Self {
            field,
            worker_id: worker_id.to_string(),
            cycles: 0,
            committed: 0,
            sentinels: 0,
            retried: 0,
            failed: 0,
            contended: 0,
            store_errors: 0,
        }
    }

    fn record(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.committed += report.committed;
        self.sentinels += report.sentinels;
        self.retried += report.retried;
        self.failed += report.failed;
        self.contended += report.contended;
        self.store_errors += report.store_errors;
    }

    /// Fields moved to done (values and sentinels).
    pub fn completed(&self) -> usize {
        self.committed + self.sentinels
    }
}

/// A single extraction worker bound to one field.
pub struct ExtractionWorker {
    pipeline: FieldPipeline,
}

impl ExtractionWorker {
    pub fn new(pipeline: FieldPipeline) -> Self {
        Self { pipeline }
    }

    pub fn field(&self) -> CardField {
        self.pipeline.field()
    }

    pub fn poll_interval(&self) -> Duration {
        self.pipeline.spec().poll_interval
    }

    /// Run cycles until `shutdown` fires, sleeping the poll interval
    /// between them. The current candidate is always finished first.
    pub async fn run(&self, shutdown: Shutdown) -> WorkerSummary {
        let field = self.field();
        let worker = self.pipeline.worker_id().to_string();
        let interval = self.poll_interval();
        let mut summary = WorkerSummary::new(field, &worker);

        info!(%field, %worker, ?interval, "Extraction worker started");

        while !shutdown.is_triggered() {
            let report = self.pipeline.run_cycle(&shutdown).await;
            log_cycle(field, &report);
            summary.record(&report);

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.wait() => break,
            }
        }

        info!(
            %field,
            %worker,
            cycles = summary.cycles,
            completed = summary.completed(),
            failed = summary.failed,
            "Extraction worker stopped"
        );
        summary
    }

    /// Run a single cycle.
    pub async fn run_once(&self) -> WorkerSummary {
        let field = self.field();
        let mut summary = WorkerSummary::new(field, self.pipeline.worker_id());
        let report = self.pipeline.run_cycle(&Shutdown::never()).await;
        log_cycle(field, &report);
        summary.record(&report);
        summary
    }
}

fn log_cycle(field: CardField, report: &CycleReport) {
    if report.is_idle() {
        debug!(%field, "No pending cards");
        return;
    }
    info!(
        %field,
        candidates = report.candidates,
        committed = report.committed,
        sentinels = report.sentinels,
        retried = report.retried,
        failed = report.failed,
        contended = report.contended,
        store_errors = report.store_errors,
        interrupted = report.interrupted,
        "Cycle finished"
    );
}

/// A set of workers run as independent tasks.
#[derive(Default)]
pub struct WorkerPool {
    workers: Vec<ExtractionWorker>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, worker: ExtractionWorker) {
        self.workers.push(worker);
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Run every worker until `shutdown` fires and all of them have stopped.
    pub async fn run(self, shutdown: Shutdown) -> Vec<WorkerSummary> {
        let mut tasks = JoinSet::new();
        for worker in self.workers {
            let shutdown = shutdown.clone();
            tasks.spawn(async move { worker.run(shutdown).await });
        }
        Self::join_all(tasks).await
    }

    /// Run one cycle of every worker concurrently.
    pub async fn run_once(self) -> Vec<WorkerSummary> {
        let mut tasks = JoinSet::new();
        for worker in self.workers {
            tasks.spawn(async move { worker.run_once().await });
        }
        Self::join_all(tasks).await
    }

    async fn join_all(mut tasks: JoinSet<WorkerSummary>) -> Vec<WorkerSummary> {
        let mut summaries = Vec::new();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(summary) => summaries.push(summary),
                Err(e) => error!("Worker task failed: {}", e),
            }
        }
        summaries.sort_by(|a, b| (a.field, &a.worker_id).cmp(&(b.field, &b.worker_id)));
        summaries
    }
}
