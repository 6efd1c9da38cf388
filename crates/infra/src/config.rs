use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub log_level: String,
    pub data_backend: String,
    pub surreal_endpoint: String,
    pub surreal_ns: String,
    pub surreal_db: String,
    pub surreal_user: String,
    pub surreal_pass: String,
    pub redis_url: String,
    pub submission_stream_key: String,
    pub submission_group_name: String,
    pub dead_letter_stream_key: String,
    pub worker_consumer_prefix: String,
    pub worker_concurrency: usize,
    pub worker_batch_size: usize,
    pub worker_block_ms: u64,
    pub worker_fetch_backoff_ms: u64,
    pub worker_claim_min_idle_ms: u64,
    pub worker_max_deliveries: u64,
    pub producer_append_attempts: u32,
    pub producer_append_backoff_ms: u64,
    pub metrics_addr: String,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_builder(config::Config::builder())
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, config::ConfigError> {
        let cfg = builder
            .set_default("app_env", "development")?
            .set_default("log_level", "info")?
            .set_default("data_backend", "memory")?
            .set_default("surreal_endpoint", "ws://127.0.0.1:8000")?
            .set_default("surreal_ns", "questflow")?
            .set_default("surreal_db", "forms")?
            .set_default("surreal_user", "root")?
            .set_default("surreal_pass", "root")?
            .set_default("redis_url", "redis://127.0.0.1:6379")?
            .set_default("submission_stream_key", "questflow:submissions")?
            .set_default("submission_group_name", "submission-consumers")?
            .set_default("dead_letter_stream_key", "questflow:submissions:dead")?
            .set_default("worker_consumer_prefix", "consumer")?
            .set_default("worker_concurrency", 1)?
            .set_default("worker_batch_size", 10)?
            .set_default("worker_block_ms", 5000)?
            .set_default("worker_fetch_backoff_ms", 2000)?
            .set_default("worker_claim_min_idle_ms", 30000)?
            .set_default("worker_max_deliveries", 5)?
            .set_default("producer_append_attempts", 3)?
            .set_default("producer_append_backoff_ms", 100)?
            .set_default("metrics_addr", "0.0.0.0:9464")?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn uses_surreal(&self) -> bool {
        self.data_backend.eq_ignore_ascii_case("surreal")
    }

    /// Rejects settings the worker cannot run with.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        let invalid = |message: &str| Err(config::ConfigError::Message(message.to_string()));
        if self.worker_concurrency == 0 {
            return invalid("worker_concurrency must be at least 1");
        }
        if self.worker_batch_size == 0 {
            return invalid("worker_batch_size must be at least 1");
        }
        if self.worker_max_deliveries == 0 {
            return invalid("worker_max_deliveries must be at least 1");
        }
        if self.producer_append_attempts == 0 {
            return invalid("producer_append_attempts must be at least 1");
        }
        if !matches!(
            self.data_backend.to_ascii_lowercase().as_str(),
            "memory" | "surreal"
        ) {
            return Err(config::ConfigError::Message(format!(
                "unknown data_backend '{}', expected 'memory' or 'surreal'",
                self.data_backend
            )));
        }
        if self.submission_stream_key == self.dead_letter_stream_key {
            return invalid("dead_letter_stream_key must differ from submission_stream_key");
        }
        Ok(())
    }
}
