use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};

use crate::ports::BoxFuture;
use crate::ports::submission_log::{
    DeadLetter, GroupStart, LogEntry, ReadBlock, SubmissionLog, SubmissionLogError,
};

/// Process-local [`SubmissionLog`] with consumer-group semantics: a
/// per-group cursor, a pending set with delivery counts, and claiming of
/// idle entries. Clones share the same log.
#[derive(Clone, Default)]
pub struct InMemorySubmissionLog {
    inner: Arc<Mutex<LogState>>,
    appended: Arc<Notify>,
}

#[derive(Default)]
struct LogState {
    entries: Vec<StoredEntry>,
    positions: HashMap<String, usize>,
    groups: HashMap<String, GroupState>,
    dead_letters: Vec<DeadLetter>,
    failing_appends: usize,
}

struct StoredEntry {
    entry_id: String,
    payload: Option<String>,
}

#[derive(Default)]
struct GroupState {
    next_index: usize,
    pending: BTreeMap<usize, PendingEntry>,
}

struct PendingEntry {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

impl InMemorySubmissionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry as-is, `None` meaning an entry without a payload field.
    pub async fn append_raw(&self, payload: Option<String>) -> String {
        let mut state = self.inner.lock().await;
        let entry_id = state.push(payload);
        drop(state);
        self.appended.notify_waiters();
        entry_id
    }

    /// Makes the next `count` appends fail as if the log were unreachable.
    pub async fn fail_next_appends(&self, count: usize) {
        self.inner.lock().await.failing_appends = count;
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn pending_count(&self, group: &str) -> usize {
        let state = self.inner.lock().await;
        state
            .groups
            .get(group)
            .map(|group| group.pending.len())
            .unwrap_or(0)
    }

    pub async fn pending_consumer(&self, group: &str, entry_id: &str) -> Option<String> {
        let state = self.inner.lock().await;
        let index = *state.positions.get(entry_id)?;
        state
            .groups
            .get(group)?
            .pending
            .get(&index)
            .map(|pending| pending.consumer.clone())
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.lock().await.dead_letters.clone()
    }

    async fn read_available(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<LogEntry>, SubmissionLogError> {
        let mut state = self.inner.lock().await;
        let LogState {
            entries, groups, ..
        } = &mut *state;
        let group_state = groups
            .get_mut(group)
            .ok_or_else(|| SubmissionLogError::Operation(format!("NOGROUP no such group '{group}'")))?;
        let start = group_state.next_index;
        let end = entries.len().min(start.saturating_add(count));
        let now = Instant::now();
        let mut delivered = Vec::with_capacity(end.saturating_sub(start));
        for (index, entry) in entries.iter().enumerate().take(end).skip(start) {
            group_state.pending.insert(
                index,
                PendingEntry {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    delivery_count: 1,
                },
            );
            delivered.push(LogEntry {
                entry_id: entry.entry_id.clone(),
                payload: entry.payload.clone(),
                delivery_count: 1,
            });
        }
        group_state.next_index = end.max(start);
        Ok(delivered)
    }
}

impl LogState {
    fn push(&mut self, payload: Option<String>) -> String {
        let index = self.entries.len();
        let entry_id = format!("{}-{index}", crate::util::now_ms());
        self.positions.insert(entry_id.clone(), index);
        self.entries.push(StoredEntry {
            entry_id: entry_id.clone(),
            payload,
        });
        entry_id
    }

    fn ack(&mut self, group: &str, entry_id: &str) -> Result<(), SubmissionLogError> {
        let group_state = self
            .groups
            .get_mut(group)
            .ok_or_else(|| SubmissionLogError::Operation(format!("NOGROUP no such group '{group}'")))?;
        if let Some(index) = self.positions.get(entry_id) {
            group_state.pending.remove(index);
        }
        Ok(())
    }
}

impl SubmissionLog for InMemorySubmissionLog {
    fn append(&self, payload: &str) -> BoxFuture<'_, Result<String, SubmissionLogError>> {
        let payload = payload.to_string();
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            if state.failing_appends > 0 {
                state.failing_appends -= 1;
                return Err(SubmissionLogError::Unavailable(
                    "simulated append failure".into(),
                ));
            }
            let entry_id = state.push(Some(payload));
            drop(state);
            self.appended.notify_waiters();
            Ok(entry_id)
        })
    }

    fn ensure_group(
        &self,
        group: &str,
        start: GroupStart,
    ) -> BoxFuture<'_, Result<(), SubmissionLogError>> {
        let group = group.to_string();
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            let next_index = match start {
                GroupStart::Beginning => 0,
                GroupStart::Tail => state.entries.len(),
            };
            state.groups.entry(group).or_insert_with(|| GroupState {
                next_index,
                pending: BTreeMap::new(),
            });
            Ok(())
        })
    }

    fn read_group(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block: ReadBlock,
    ) -> BoxFuture<'_, Result<Vec<LogEntry>, SubmissionLogError>> {
        let group = group.to_string();
        let consumer = consumer.to_string();
        Box::pin(async move {
            let deadline = match block {
                ReadBlock::NoWait => return self.read_available(&group, &consumer, count).await,
                ReadBlock::For(timeout) => Some(tokio::time::Instant::now() + timeout),
                ReadBlock::Forever => None,
            };
            loop {
                let notified = self.appended.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                let entries = self.read_available(&group, &consumer, count).await?;
                if !entries.is_empty() {
                    return Ok(entries);
                }
                match deadline {
                    Some(deadline) => {
                        if tokio::time::timeout_at(deadline, notified).await.is_err() {
                            return Ok(Vec::new());
                        }
                    }
                    None => notified.await,
                }
            }
        })
    }

    fn claim_stale(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> BoxFuture<'_, Result<Vec<LogEntry>, SubmissionLogError>> {
        let group = group.to_string();
        let consumer = consumer.to_string();
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            let LogState {
                entries, groups, ..
            } = &mut *state;
            let group_state = groups.get_mut(&group).ok_or_else(|| {
                SubmissionLogError::Operation(format!("NOGROUP no such group '{group}'"))
            })?;
            let now = Instant::now();
            let mut claimed = Vec::new();
            for (index, pending) in group_state.pending.iter_mut() {
                if claimed.len() >= count {
                    break;
                }
                if now.duration_since(pending.delivered_at) < min_idle {
                    continue;
                }
                pending.consumer = consumer.clone();
                pending.delivered_at = now;
                pending.delivery_count += 1;
                let entry = &entries[*index];
                claimed.push(LogEntry {
                    entry_id: entry.entry_id.clone(),
                    payload: entry.payload.clone(),
                    delivery_count: pending.delivery_count,
                });
            }
            Ok(claimed)
        })
    }

    fn ack(&self, group: &str, entry_id: &str) -> BoxFuture<'_, Result<(), SubmissionLogError>> {
        let group = group.to_string();
        let entry_id = entry_id.to_string();
        Box::pin(async move { self.inner.lock().await.ack(&group, &entry_id) })
    }

    fn dead_letter(
        &self,
        group: &str,
        letter: &DeadLetter,
    ) -> BoxFuture<'_, Result<(), SubmissionLogError>> {
        let group = group.to_string();
        let letter = letter.clone();
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            let source_id = letter.source_id.clone();
            state.dead_letters.push(letter);
            state.ack(&group, &source_id)
        })
    }
}
