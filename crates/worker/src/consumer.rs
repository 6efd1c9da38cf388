use std::sync::Arc;
use std::time::{Duration, Instant};

use questflow_domain::ingestion::{Disposition, EntryOutcome, SubmissionIngestor, disposition};
use questflow_domain::ports::submission_log::{
    GroupStart, LogEntry, ReadBlock, SubmissionLog, SubmissionLogError,
};
use questflow_domain::ports::submissions::SubmissionRepository;
use questflow_infra::config::AppConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::observability;

#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub group: String,
    pub consumer_prefix: String,
    pub concurrency: usize,
    pub batch_size: usize,
    pub block: ReadBlock,
    pub fetch_backoff: Duration,
    pub claim_min_idle: Duration,
    pub max_deliveries: u64,
}

impl WorkerSettings {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            group: config.submission_group_name.clone(),
            consumer_prefix: config.worker_consumer_prefix.clone(),
            concurrency: config.worker_concurrency.max(1),
            batch_size: config.worker_batch_size.max(1),
            block: ReadBlock::from_millis(config.worker_block_ms),
            fetch_backoff: Duration::from_millis(config.worker_fetch_backoff_ms),
            claim_min_idle: Duration::from_millis(config.worker_claim_min_idle_ms),
            max_deliveries: config.worker_max_deliveries.max(1),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Fetching,
    Processing,
    Acknowledging,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub acknowledged: usize,
    pub left_pending: usize,
    pub dead_lettered: usize,
}

/// One named member of the consumer group. Entries it fails to finish stay
/// pending under its name until a claim cycle, its own or another worker's,
/// takes them over.
pub struct ConsumerWorker {
    name: String,
    log: Arc<dyn SubmissionLog>,
    ingestor: SubmissionIngestor,
    settings: Arc<WorkerSettings>,
    state: WorkerState,
}

impl ConsumerWorker {
    pub fn new(
        name: impl Into<String>,
        log: Arc<dyn SubmissionLog>,
        ingestor: SubmissionIngestor,
        settings: Arc<WorkerSettings>,
    ) -> Self {
        Self {
            name: name.into(),
            log,
            ingestor,
            settings,
            state: WorkerState::Idle,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(consumer = %self.name, group = %self.settings.group, "consumer started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            // Only the fetch is cancelled on shutdown; a fetched batch is always finished.
            let fetched = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                fetched = self.fetch() => fetched,
            };
            match fetched {
                Ok(entries) => {
                    self.handle_batch(entries).await;
                }
                Err(err) => {
                    self.set_state(WorkerState::Idle);
                    observability::register_fetch_error();
                    warn!(
                        consumer = %self.name,
                        error = %err,
                        backoff_ms = self.settings.fetch_backoff.as_millis() as u64,
                        "fetch failed, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(self.settings.fetch_backoff) => {}
                    }
                }
            }
        }
        self.set_state(WorkerState::Idle);
        info!(consumer = %self.name, "consumer stopped");
    }

    /// One fetch and process round.
    #[cfg(test)]
    pub async fn run_cycle(&mut self) -> Result<CycleReport, SubmissionLogError> {
        let entries = match self.fetch().await {
            Ok(entries) => entries,
            Err(err) => {
                self.set_state(WorkerState::Idle);
                return Err(err);
            }
        };
        Ok(self.handle_batch(entries).await)
    }

    /// Stale pending entries first, then new ones. The read does not block
    /// when the claim already produced work.
    async fn fetch(&mut self) -> Result<Vec<LogEntry>, SubmissionLogError> {
        self.set_state(WorkerState::Fetching);
        let batch_size = self.settings.batch_size;
        let mut entries = self
            .log
            .claim_stale(
                &self.settings.group,
                &self.name,
                self.settings.claim_min_idle,
                batch_size,
            )
            .await?;
        if !entries.is_empty() {
            observability::register_reclaimed(entries.len());
            debug!(consumer = %self.name, count = entries.len(), "reclaimed stale entries");
        }
        if entries.len() < batch_size {
            let block = if entries.is_empty() {
                self.settings.block
            } else {
                ReadBlock::NoWait
            };
            let fresh = self
                .log
                .read_group(
                    &self.settings.group,
                    &self.name,
                    batch_size - entries.len(),
                    block,
                )
                .await?;
            entries.extend(fresh);
        }
        Ok(entries)
    }

    async fn handle_batch(&mut self, entries: Vec<LogEntry>) -> CycleReport {
        let mut report = CycleReport {
            fetched: entries.len(),
            ..CycleReport::default()
        };
        for entry in entries {
            self.set_state(WorkerState::Processing);
            let started = Instant::now();
            let outcome = self.ingestor.process(&entry).await;
            observability::register_entry_processed(
                outcome.as_str(),
                started.elapsed().as_secs_f64() * 1000.0,
            );
            self.log_outcome(&entry, &outcome);

            self.set_state(WorkerState::Acknowledging);
            match disposition(&entry, &outcome, self.settings.max_deliveries) {
                Disposition::Ack => {
                    match self.log.ack(&self.settings.group, &entry.entry_id).await {
                        Ok(()) => report.acknowledged += 1,
                        Err(err) => {
                            observability::register_ack_error();
                            report.left_pending += 1;
                            warn!(
                                consumer = %self.name,
                                entry_id = %entry.entry_id,
                                error = %err,
                                "ack failed, entry stays pending"
                            );
                        }
                    }
                }
                Disposition::LeavePending => {
                    report.left_pending += 1;
                }
                Disposition::DeadLetter(letter) => {
                    match self.log.dead_letter(&self.settings.group, &letter).await {
                        Ok(()) => {
                            observability::register_dead_letter(outcome.as_str());
                            report.dead_lettered += 1;
                            error!(
                                consumer = %self.name,
                                entry_id = %entry.entry_id,
                                delivery_count = entry.delivery_count,
                                reason = %letter.reason,
                                "entry moved to dead-letter stream"
                            );
                        }
                        Err(err) => {
                            report.left_pending += 1;
                            error!(
                                consumer = %self.name,
                                entry_id = %entry.entry_id,
                                error = %err,
                                "dead-lettering failed, entry stays pending"
                            );
                        }
                    }
                }
            }
        }
        self.set_state(WorkerState::Idle);
        report
    }

    fn set_state(&mut self, next: WorkerState) {
        if self.state != next {
            debug!(consumer = %self.name, from = ?self.state, to = ?next, "state transition");
            self.state = next;
        }
    }

    fn log_outcome(&self, entry: &LogEntry, outcome: &EntryOutcome) {
        match outcome {
            EntryOutcome::Persisted { form_id, .. } => info!(
                consumer = %self.name,
                entry_id = %entry.entry_id,
                form_id,
                result = outcome.as_str(),
                "submission persisted"
            ),
            EntryOutcome::Malformed(reason) => warn!(
                consumer = %self.name,
                entry_id = %entry.entry_id,
                delivery_count = entry.delivery_count,
                reason = %reason,
                "malformed entry"
            ),
            EntryOutcome::PersistFailed(reason) => warn!(
                consumer = %self.name,
                entry_id = %entry.entry_id,
                delivery_count = entry.delivery_count,
                reason = %reason,
                "failed to persist submission"
            ),
        }
    }
}

/// `concurrency` workers sharing one group, stopped together through a watch channel.
pub struct ConsumerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    names: Vec<String>,
}

impl ConsumerPool {
    /// Makes sure the group exists, then spawns the workers. A group that
    /// cannot be created is fatal.
    pub async fn start(
        log: Arc<dyn SubmissionLog>,
        repository: Arc<dyn SubmissionRepository>,
        settings: WorkerSettings,
    ) -> Result<Self, SubmissionLogError> {
        log.ensure_group(&settings.group, GroupStart::Beginning)
            .await?;

        let instance = instance_id();
        let settings = Arc::new(settings);
        let ingestor = SubmissionIngestor::new(repository);
        let (shutdown, receiver) = watch::channel(false);
        let mut handles = Vec::with_capacity(settings.concurrency);
        let mut names = Vec::with_capacity(settings.concurrency);
        for index in 0..settings.concurrency {
            let name = format!("{}-{instance}-{index}", settings.consumer_prefix);
            let worker = ConsumerWorker::new(
                name.clone(),
                log.clone(),
                ingestor.clone(),
                settings.clone(),
            );
            handles.push(tokio::spawn(worker.run(receiver.clone())));
            names.push(name);
        }
        observability::set_active_consumers(names.len());
        info!(
            group = %settings.group,
            consumers = names.len(),
            "consumer pool started"
        );
        Ok(Self {
            shutdown,
            handles,
            names,
        })
    }

    pub fn consumer_names(&self) -> &[String] {
        &self.names
    }

    /// Signals every worker and waits for in-flight batches to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(err) = handle.await {
                error!(error = %err, "consumer task failed");
            }
        }
        observability::set_active_consumers(0);
        info!("consumer pool stopped");
    }
}

/// Random suffix of a v7 uuid; the leading hex digits are the timestamp.
fn instance_id() -> String {
    let id = questflow_domain::util::uuid_v7_without_dashes();
    id[id.len().saturating_sub(12)..].to_string()
}
