use std::collections::HashSet;
use std::sync::Arc;

use questflow_domain::DomainResult;
use questflow_domain::error::DomainError;
use questflow_domain::filter::Predicate;
use questflow_domain::ports::BoxFuture;
use questflow_domain::ports::submissions::{InsertOutcome, SubmissionRepository};
use questflow_domain::query::{Bindings, QueryExpr};
use questflow_domain::submissions::SubmissionRecord;
use questflow_domain::util::{format_ms_rfc3339, parse_rfc3339_ms};
use serde::{Deserialize, Serialize};
use serde_json::{Value, to_value};
use surrealdb::{Surreal, engine::remote::ws::Client};
use tokio::sync::RwLock;

use super::map_surreal_error;
use crate::db::DbConfig;

const SELECT_COLUMNS: &str = "record_id, envelope_id, form_id, submitter_id, answers, \
     client_ip, user_agent, <string>created_at AS created_at";

/// Records kept in process, queried by evaluating the lowered predicate
/// against each record's document form.
#[derive(Default)]
pub struct InMemorySubmissionRepository {
    store: Arc<RwLock<SubmissionStore>>,
}

#[derive(Default)]
struct SubmissionStore {
    records: Vec<SubmissionRecord>,
    envelopes: HashSet<String>,
}

impl InMemorySubmissionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn select(&self, query: QueryExpr) -> Vec<SubmissionRecord> {
        let store = self.store.read().await;
        let mut records: Vec<SubmissionRecord> = store
            .records
            .iter()
            .filter(|record| query.eval(&record.to_document()))
            .cloned()
            .collect();
        records.sort_by(|left, right| {
            left.created_at_ms
                .cmp(&right.created_at_ms)
                .then_with(|| left.record_id.cmp(&right.record_id))
        });
        records
    }
}

impl SubmissionRepository for InMemorySubmissionRepository {
    fn insert(&self, record: &SubmissionRecord) -> BoxFuture<'_, DomainResult<InsertOutcome>> {
        let record = record.clone();
        Box::pin(async move {
            let mut store = self.store.write().await;
            if !store.envelopes.insert(record.envelope_id.clone()) {
                return Ok(InsertOutcome::Duplicate);
            }
            store.records.push(record);
            Ok(InsertOutcome::Inserted)
        })
    }

    fn find_by_form(&self, form_id: u64) -> BoxFuture<'_, DomainResult<Vec<SubmissionRecord>>> {
        Box::pin(async move { Ok(self.select(Predicate::for_form(form_id).to_query()).await) })
    }

    fn find_matching(
        &self,
        predicate: &Predicate,
    ) -> BoxFuture<'_, DomainResult<Vec<SubmissionRecord>>> {
        let query = predicate.to_query();
        Box::pin(async move { Ok(self.select(query).await) })
    }
}

#[derive(Clone)]
pub struct SurrealSubmissionRepository {
    client: Arc<Surreal<Client>>,
}

#[derive(Debug, Serialize)]
struct SurrealSubmissionCreateRow {
    record_id: String,
    envelope_id: String,
    form_id: u64,
    submitter_id: Option<u64>,
    answers: Value,
    client_ip: String,
    user_agent: String,
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct SurrealSubmissionRow {
    record_id: String,
    envelope_id: String,
    form_id: u64,
    #[serde(default)]
    submitter_id: Option<u64>,
    #[serde(default)]
    answers: Value,
    #[serde(default)]
    client_ip: String,
    #[serde(default)]
    user_agent: String,
    created_at: String,
}

impl SurrealSubmissionRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    pub async fn new(db_config: &DbConfig) -> anyhow::Result<Self> {
        Ok(Self::with_client(crate::db::connect(db_config).await?))
    }

    /// Index backing the per-form, time-ordered reads.
    pub async fn ensure_schema(&self) -> DomainResult<()> {
        self.client
            .query(
                "DEFINE INDEX IF NOT EXISTS submission_form_created \
                 ON TABLE submission FIELDS form_id, created_at",
            )
            .await
            .map_err(map_surreal_error)?
            .check()
            .map_err(map_surreal_error)?;
        Ok(())
    }

    fn build_payload(record: &SubmissionRecord) -> SurrealSubmissionCreateRow {
        SurrealSubmissionCreateRow {
            record_id: record.record_id.clone(),
            envelope_id: record.envelope_id.clone(),
            form_id: record.form_id,
            submitter_id: record.submitter_id,
            answers: record.answers.clone(),
            client_ip: record.client_ip.clone(),
            user_agent: record.user_agent.clone(),
            created_at: format_ms_rfc3339(record.created_at_ms),
        }
    }

    fn decode_rows(rows: Vec<Value>) -> DomainResult<Vec<SubmissionRecord>> {
        rows.into_iter()
            .map(|row| {
                let row = serde_json::from_value::<SurrealSubmissionRow>(row).map_err(|err| {
                    DomainError::Validation(format!("invalid submission row: {err}"))
                })?;
                Ok(SubmissionRecord {
                    record_id: row.record_id,
                    envelope_id: row.envelope_id,
                    form_id: row.form_id,
                    submitter_id: row.submitter_id,
                    answers: row.answers,
                    client_ip: row.client_ip,
                    user_agent: row.user_agent,
                    created_at_ms: parse_rfc3339_ms(&row.created_at)?,
                })
            })
            .collect()
    }

    async fn select(&self, query: QueryExpr) -> DomainResult<Vec<SubmissionRecord>> {
        let mut bindings = Bindings::new();
        let condition = query.to_surrealql(&mut bindings);
        let statement = format!(
            "SELECT {SELECT_COLUMNS} FROM submission WHERE {condition} \
             ORDER BY created_at ASC, record_id ASC"
        );
        let mut pending = self.client.query(statement);
        for (name, value) in bindings.into_vec() {
            pending = pending.bind((name, value));
        }
        let mut response = pending.await.map_err(map_surreal_error)?;
        let rows: Vec<Value> = response.take(0).map_err(map_surreal_error)?;
        Self::decode_rows(rows)
    }
}

impl SubmissionRepository for SurrealSubmissionRepository {
    fn insert(&self, record: &SubmissionRecord) -> BoxFuture<'_, DomainResult<InsertOutcome>> {
        let envelope_id = record.envelope_id.clone();
        let payload = Self::build_payload(record);
        let client = self.client.clone();
        Box::pin(async move {
            let payload = to_value(payload)
                .map_err(|err| DomainError::Validation(format!("invalid payload: {err}")))?;
            let created = client
                .query(
                    "CREATE type::record('submission', $envelope_id) SET \
                        record_id = $payload.record_id, \
                        envelope_id = $payload.envelope_id, \
                        form_id = $payload.form_id, \
                        submitter_id = $payload.submitter_id, \
                        answers = $payload.answers, \
                        client_ip = $payload.client_ip, \
                        user_agent = $payload.user_agent, \
                        created_at = <datetime>$payload.created_at",
                )
                .bind(("envelope_id", envelope_id.clone()))
                .bind(("payload", payload))
                .await
                .and_then(|mut response| response.take::<Vec<Value>>(0));
            match created.map_err(map_surreal_error) {
                Ok(_) => Ok(InsertOutcome::Inserted),
                Err(DomainError::Conflict) => {
                    tracing::debug!(envelope_id = %envelope_id, "submission already persisted");
                    Ok(InsertOutcome::Duplicate)
                }
                Err(err) => Err(err),
            }
        })
    }

    fn find_by_form(&self, form_id: u64) -> BoxFuture<'_, DomainResult<Vec<SubmissionRecord>>> {
        Box::pin(async move { self.select(Predicate::for_form(form_id).to_query()).await })
    }

    fn find_matching(
        &self,
        predicate: &Predicate,
    ) -> BoxFuture<'_, DomainResult<Vec<SubmissionRecord>>> {
        let query = predicate.to_query();
        Box::pin(async move { self.select(query).await })
    }
}
