use std::collections::HashMap;
use std::sync::Arc;

use questflow_domain::DomainResult;
use questflow_domain::error::DomainError;
use questflow_domain::forms::{Form, FormDefinition, FormStatus};
use questflow_domain::ports::BoxFuture;
use questflow_domain::ports::forms::FormRepository;
use questflow_domain::util::parse_rfc3339_ms;
use serde::Deserialize;
use serde_json::Value;
use surrealdb::{Surreal, engine::remote::ws::Client};
use tokio::sync::RwLock;

use super::map_surreal_error;
use crate::db::DbConfig;

#[derive(Default)]
pub struct InMemoryFormRepository {
    store: Arc<RwLock<HashMap<u64, Form>>>,
}

impl InMemoryFormRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a form.
    pub async fn put(&self, form: Form) {
        self.store.write().await.insert(form.form_id, form);
    }
}

impl FormRepository for InMemoryFormRepository {
    fn get(&self, form_id: u64) -> BoxFuture<'_, DomainResult<Option<Form>>> {
        Box::pin(async move { Ok(self.store.read().await.get(&form_id).cloned()) })
    }

    fn get_by_key(&self, form_key: &str) -> BoxFuture<'_, DomainResult<Option<Form>>> {
        let form_key = form_key.to_string();
        Box::pin(async move {
            Ok(self
                .store
                .read()
                .await
                .values()
                .find(|form| form.form_key == form_key)
                .cloned())
        })
    }
}

#[derive(Clone)]
pub struct SurrealFormRepository {
    client: Arc<Surreal<Client>>,
}

#[derive(Debug, Deserialize)]
struct SurrealFormRow {
    form_id: u64,
    form_key: String,
    creator_id: u64,
    title: String,
    status: u8,
    #[serde(default)]
    definition: Value,
    created_at: String,
    updated_at: String,
}

impl SurrealFormRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    pub async fn new(db_config: &DbConfig) -> anyhow::Result<Self> {
        Ok(Self::with_client(crate::db::connect(db_config).await?))
    }

    fn decode_row(row: Value) -> DomainResult<Form> {
        let row = serde_json::from_value::<SurrealFormRow>(row)
            .map_err(|err| DomainError::Validation(format!("invalid form row: {err}")))?;
        let status = FormStatus::from_code(row.status).ok_or_else(|| {
            DomainError::Validation(format!("unknown form status code {}", row.status))
        })?;
        let definition = if row.definition.is_null() {
            FormDefinition::default()
        } else {
            FormDefinition::parse(&row.definition)?
        };
        Ok(Form {
            form_id: row.form_id,
            form_key: row.form_key,
            creator_id: row.creator_id,
            title: row.title,
            status,
            definition,
            created_at_ms: parse_rfc3339_ms(&row.created_at)?,
            updated_at_ms: parse_rfc3339_ms(&row.updated_at)?,
        })
    }

    async fn select_one(
        &self,
        condition: &str,
        name: &'static str,
        value: Value,
    ) -> DomainResult<Option<Form>> {
        let statement = format!(
            "SELECT form_id, form_key, creator_id, title, status, definition, \
                    <string>created_at AS created_at, <string>updated_at AS updated_at \
             FROM form WHERE {condition} LIMIT 1"
        );
        let mut response = self
            .client
            .query(statement)
            .bind((name, value))
            .await
            .map_err(map_surreal_error)?;
        let rows: Vec<Value> = response.take(0).map_err(map_surreal_error)?;
        rows.into_iter().next().map(Self::decode_row).transpose()
    }
}

impl FormRepository for SurrealFormRepository {
    fn get(&self, form_id: u64) -> BoxFuture<'_, DomainResult<Option<Form>>> {
        Box::pin(async move {
            self.select_one("form_id = $form_id", "form_id", Value::from(form_id))
                .await
        })
    }

    fn get_by_key(&self, form_key: &str) -> BoxFuture<'_, DomainResult<Option<Form>>> {
        let form_key = form_key.to_string();
        Box::pin(async move {
            self.select_one("form_key = $form_key", "form_key", Value::String(form_key))
                .await
        })
    }
}
