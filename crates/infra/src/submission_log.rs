use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use questflow_domain::ports::BoxFuture;
use questflow_domain::ports::submission_log::{
    DeadLetter, GroupStart, LogEntry, ReadBlock, SubmissionLog, SubmissionLogError,
};
use redis::Value;
use redis::aio::ConnectionManager;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use tokio::sync::Mutex;

const DEFAULT_STREAM_KEY: &str = "questflow:submissions";
const DEFAULT_DEAD_LETTER_KEY: &str = "questflow:submissions:dead";
const PAYLOAD_FIELD: &str = "payload";

type Connect<C> = Arc<dyn Fn() -> BoxFuture<'static, redis::RedisResult<C>> + Send + Sync>;

/// Connections reserved for blocking reads, one per consumer name. A
/// blocked XREADGROUP holds its connection until the server answers, so it
/// must never share one with acks, claims or another consumer's read.
struct ReaderConnections<C> {
    connect: Connect<C>,
    by_consumer: Mutex<HashMap<String, C>>,
}

impl<C: Clone> ReaderConnections<C> {
    fn new(connect: Connect<C>) -> Self {
        Self {
            connect,
            by_consumer: Mutex::new(HashMap::new()),
        }
    }

    async fn get(&self, consumer: &str) -> redis::RedisResult<C> {
        let mut by_consumer = self.by_consumer.lock().await;
        if let Some(conn) = by_consumer.get(consumer) {
            return Ok(conn.clone());
        }
        let conn = (self.connect)().await?;
        by_consumer.insert(consumer.to_string(), conn.clone());
        Ok(conn)
    }

    /// Forgets the consumer's connection; the next blocking read opens a new one.
    async fn release(&self, consumer: &str) {
        self.by_consumer.lock().await.remove(consumer);
    }
}

fn needs_dedicated_reader(block: ReadBlock) -> bool {
    !matches!(block, ReadBlock::NoWait)
}

/// [`SubmissionLog`] on a Redis stream with consumer groups.
///
/// Non-blocking commands share one multiplexed connection. Blocking reads
/// go through a per-consumer connection.
#[derive(Clone)]
pub struct RedisSubmissionLog {
    manager: ConnectionManager,
    readers: Arc<ReaderConnections<ConnectionManager>>,
    stream_key: String,
    dead_letter_key: String,
}

impl RedisSubmissionLog {
    pub async fn connect(redis_url: &str) -> Result<Self, SubmissionLogError> {
        Self::connect_with_keys(redis_url, DEFAULT_STREAM_KEY, DEFAULT_DEAD_LETTER_KEY).await
    }

    pub async fn connect_with_keys(
        redis_url: &str,
        stream_key: impl Into<String>,
        dead_letter_key: impl Into<String>,
    ) -> Result<Self, SubmissionLogError> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| SubmissionLogError::Unavailable(err.to_string()))?;
        let manager = ConnectionManager::new(client.clone())
            .await
            .map_err(|err| SubmissionLogError::Unavailable(err.to_string()))?;
        let connect: Connect<ConnectionManager> = Arc::new(
            move || -> BoxFuture<'static, redis::RedisResult<ConnectionManager>> {
                let client = client.clone();
                Box::pin(async move { ConnectionManager::new(client).await })
            },
        );
        Ok(Self {
            manager,
            readers: Arc::new(ReaderConnections::new(connect)),
            stream_key: stream_key.into(),
            dead_letter_key: dead_letter_key.into(),
        })
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    pub async fn stream_len(&self) -> Result<u64, SubmissionLogError> {
        let mut conn = self.manager.clone();
        redis::cmd("XLEN")
            .arg(&self.stream_key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)
    }
}

fn map_redis_error(err: redis::RedisError) -> SubmissionLogError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        SubmissionLogError::Unavailable(err.to_string())
    } else {
        SubmissionLogError::Operation(err.to_string())
    }
}

fn is_busy_group(err: &redis::RedisError) -> bool {
    err.code() == Some("BUSYGROUP")
}

fn to_log_entry(stream_id: &StreamId, delivery_count: u64) -> LogEntry {
    LogEntry {
        entry_id: stream_id.id.clone(),
        payload: stream_id.get::<String>(PAYLOAD_FIELD),
        delivery_count,
    }
}

fn read_reply_entries(reply: Option<StreamReadReply>) -> Vec<LogEntry> {
    reply
        .map(|reply| {
            reply
                .keys
                .iter()
                .flat_map(|key| key.ids.iter())
                .map(|stream_id| to_log_entry(stream_id, 1))
                .collect()
        })
        .unwrap_or_default()
}

/// Pairs claimed entries with the delivery count XPENDING reported; the
/// claim itself is one more delivery.
fn claimed_entries(claimed: StreamClaimReply, delivered: &HashMap<String, u64>) -> Vec<LogEntry> {
    claimed
        .ids
        .iter()
        .map(|stream_id| {
            let previous = delivered.get(&stream_id.id).copied().unwrap_or(1);
            to_log_entry(stream_id, previous + 1)
        })
        .collect()
}

fn dead_letter_fields(letter: &DeadLetter) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("source_id", letter.source_id.clone()),
        ("reason", letter.reason.clone()),
        ("delivery_count", letter.delivery_count.to_string()),
        (
            "dead_lettered_at",
            questflow_domain::util::format_ms_rfc3339(letter.dead_lettered_at_ms),
        ),
    ];
    if let Some(payload) = &letter.payload {
        fields.push((PAYLOAD_FIELD, payload.clone()));
    }
    fields
}

impl SubmissionLog for RedisSubmissionLog {
    fn append(&self, payload: &str) -> BoxFuture<'_, Result<String, SubmissionLogError>> {
        let payload = payload.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            redis::cmd("XADD")
                .arg(&self.stream_key)
                .arg("*")
                .arg(PAYLOAD_FIELD)
                .arg(payload)
                .query_async(&mut conn)
                .await
                .map_err(map_redis_error)
        })
    }

    fn ensure_group(
        &self,
        group: &str,
        start: GroupStart,
    ) -> BoxFuture<'_, Result<(), SubmissionLogError>> {
        let group = group.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let created: Result<String, redis::RedisError> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(&self.stream_key)
                .arg(&group)
                .arg(start.as_stream_id())
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;
            match created {
                Ok(_) => {
                    tracing::info!(stream = %self.stream_key, group = %group, "created consumer group");
                    Ok(())
                }
                Err(err) if is_busy_group(&err) => Ok(()),
                Err(err) => Err(map_redis_error(err)),
            }
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
            let dedicated = needs_dedicated_reader(block);
            let mut conn = if dedicated {
                self.readers.get(&consumer).await.map_err(map_redis_error)?
            } else {
                self.manager.clone()
            };
            let mut command = redis::cmd("XREADGROUP");
            command
                .arg("GROUP")
                .arg(&group)
                .arg(&consumer)
                .arg("COUNT")
                .arg(count.max(1));
            match block {
                ReadBlock::NoWait => {}
                ReadBlock::For(duration) => {
                    command.arg("BLOCK").arg(duration.as_millis().max(1) as u64);
                }
                ReadBlock::Forever => {
                    command.arg("BLOCK").arg(0);
                }
            }
            command.arg("STREAMS").arg(&self.stream_key).arg(">");
            let reply: Option<StreamReadReply> = match command.query_async(&mut conn).await {
                Ok(reply) => reply,
                Err(err) => {
                    if dedicated {
                        self.readers.release(&consumer).await;
                    }
                    return Err(map_redis_error(err));
                }
            };
            Ok(read_reply_entries(reply))
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
        let min_idle_ms = min_idle.as_millis() as u64;
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let pending: StreamPendingCountReply = redis::cmd("XPENDING")
                .arg(&self.stream_key)
                .arg(&group)
                .arg("IDLE")
                .arg(min_idle_ms)
                .arg("-")
                .arg("+")
                .arg(count.max(1))
                .query_async(&mut conn)
                .await
                .map_err(map_redis_error)?;
            if pending.ids.is_empty() {
                return Ok(Vec::new());
            }
            let delivered: HashMap<String, u64> = pending
                .ids
                .iter()
                .map(|entry| (entry.id.clone(), entry.times_delivered as u64))
                .collect();
            let ids: Vec<&str> = pending.ids.iter().map(|entry| entry.id.as_str()).collect();
            let claimed: StreamClaimReply = redis::cmd("XCLAIM")
                .arg(&self.stream_key)
                .arg(&group)
                .arg(&consumer)
                .arg(min_idle_ms)
                .arg(&ids)
                .query_async(&mut conn)
                .await
                .map_err(map_redis_error)?;
            Ok(claimed_entries(claimed, &delivered))
        })
    }

    fn ack(&self, group: &str, entry_id: &str) -> BoxFuture<'_, Result<(), SubmissionLogError>> {
        let group = group.to_string();
        let entry_id = entry_id.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let _: i64 = redis::cmd("XACK")
                .arg(&self.stream_key)
                .arg(&group)
                .arg(&entry_id)
                .query_async(&mut conn)
                .await
                .map_err(map_redis_error)?;
            Ok(())
        })
    }

    fn dead_letter(
        &self,
        group: &str,
        letter: &DeadLetter,
    ) -> BoxFuture<'_, Result<(), SubmissionLogError>> {
        let group = group.to_string();
        let source_id = letter.source_id.clone();
        let fields = dead_letter_fields(letter);
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let mut pipeline = redis::pipe();
            pipeline.atomic();
            let xadd = pipeline.cmd("XADD").arg(&self.dead_letter_key).arg("*");
            for (field, value) in &fields {
                xadd.arg(*field).arg(value);
            }
            pipeline
                .cmd("XACK")
                .arg(&self.stream_key)
                .arg(&group)
                .arg(&source_id);
            let _: Vec<Value> = pipeline
                .query_async(&mut conn)
                .await
                .map_err(map_redis_error)?;
            Ok(())
        })
    }
}
