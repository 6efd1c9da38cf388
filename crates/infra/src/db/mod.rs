use std::sync::Arc;

use surrealdb::{
    Surreal,
    engine::remote::ws::{Client, Ws},
    opt::auth::Root,
};

use crate::config::AppConfig;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl DbConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            endpoint: config.surreal_endpoint.clone(),
            namespace: config.surreal_ns.clone(),
            database: config.surreal_db.clone(),
            username: config.surreal_user.clone(),
            password: config.surreal_pass.clone(),
        }
    }
}

/// Opens one authenticated websocket session shared by every Surreal repository.
pub async fn connect(db_config: &DbConfig) -> anyhow::Result<Arc<Surreal<Client>>> {
    let db = Surreal::<Client>::init();
    db.connect::<Ws>(&db_config.endpoint).await?;
    db.signin(Root {
        username: db_config.username.clone(),
        password: db_config.password.clone(),
    })
    .await?;
    db.use_ns(&db_config.namespace)
        .use_db(&db_config.database)
        .await?;
    tracing::info!(
        endpoint = %db_config.endpoint,
        namespace = %db_config.namespace,
        database = %db_config.database,
        "connected to surrealdb"
    );
    Ok(Arc::new(db))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_config_copies_surreal_settings() {
        let app = AppConfig {
            app_env: "test".into(),
            log_level: "debug".into(),
            data_backend: "surreal".into(),
            surreal_endpoint: "ws://db:8000".into(),
            surreal_ns: "ns".into(),
            surreal_db: "db".into(),
            surreal_user: "user".into(),
            surreal_pass: "pass".into(),
            redis_url: "redis://cache:6379".into(),
            submission_stream_key: "s".into(),
            submission_group_name: "g".into(),
            dead_letter_stream_key: "d".into(),
            worker_consumer_prefix: "c".into(),
            worker_concurrency: 1,
            worker_batch_size: 1,
            worker_block_ms: 0,
            worker_fetch_backoff_ms: 0,
            worker_claim_min_idle_ms: 0,
            worker_max_deliveries: 1,
            producer_append_attempts: 1,
            producer_append_backoff_ms: 0,
            metrics_addr: "127.0.0.1:0".into(),
        };
        let db = DbConfig::from_app_config(&app);
        assert_eq!(db.endpoint, "ws://db:8000");
        assert_eq!(db.namespace, "ns");
        assert_eq!(db.database, "db");
        assert_eq!(db.username, "user");
        assert_eq!(db.password, "pass");
    }
}
