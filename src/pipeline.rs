//! Orchestrator: question → generated SQL → sanitized → validated → rows.
//!
//! Each call is independent and owns every intermediate value. There is no
//! retry or caching between stages.

use crate::config::AppConfig;
use crate::db::{init_pool, Executor, PgQueryRunner, QueryRunner};
use crate::error::{Result, Text2SqlError};
use crate::llm::{generate_or_empty, LlmClient, MockSqlGenerator, SqlGenerator};
use crate::prompt::{build_prompt, SchemaContext};
use crate::sanitizer::sanitize;
use crate::validator::{QueryValidator, ValidatorPolicy};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Everything produced for one question.
#[derive(Debug, Clone, Serialize)]
pub struct Text2SqlResponse {
    pub request_id: Uuid,
    pub sql_query: String,
    pub sanitized_query: String,
    pub validated_query: String,
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub row_count: usize,
}

#[derive(Clone)]
pub struct Text2SqlPipeline {
    generator: Arc<dyn SqlGenerator>,
    validator: QueryValidator,
    executor: Executor,
    schema: SchemaContext,
}

impl Text2SqlPipeline {
    pub fn new(
        generator: Arc<dyn SqlGenerator>,
        validator: QueryValidator,
        executor: Executor,
        schema: SchemaContext,
    ) -> Self {
        Self {
            generator,
            validator,
            executor,
            schema,
        }
    }

    /// Wire the production pipeline from configuration. Uses the canned
    /// generator when no API key is configured or `force_mock` is set.
    pub fn from_config(config: &AppConfig, force_mock: bool) -> Result<Self> {
        let generator: Arc<dyn SqlGenerator> = if force_mock || config.llm.is_dummy() {
            warn!("No LLM API key configured - using canned SQL generator");
            Arc::new(MockSqlGenerator)
        } else {
            Arc::new(LlmClient::from_config(&config.llm))
        };

        let pool = init_pool(&config.database, 10)?;
        let runner: Arc<dyn QueryRunner> = Arc::new(PgQueryRunner::new(pool));

        let validator = QueryValidator::new(ValidatorPolicy {
            max_rows: config.max_rows,
            cap_existing_limit: config.cap_existing_limit,
        });
        let schema = SchemaContext::load(config.schema_context_path.as_deref())?;

        Ok(Self::new(
            generator,
            validator,
            Executor::new(runner, config.query_timeout),
            schema,
        ))
    }

    pub fn schema(&self) -> &SchemaContext {
        &self.schema
    }

    pub async fn generate_and_execute(&self, question: &str) -> Result<Text2SqlResponse> {
        let request_id = Uuid::new_v4();
        let span = info_span!("generate_sql", %request_id, schema = %self.schema.version);
        self.run(request_id, question).instrument(span).await
    }

    async fn run(&self, request_id: Uuid, question: &str) -> Result<Text2SqlResponse> {
        info!("Question: {}", question.trim());

        let prompt = build_prompt(question, &self.schema);
        let raw_sql = generate_or_empty(self.generator.as_ref(), &prompt).await;
        let sanitized_sql = sanitize(&raw_sql);

        if sanitized_sql.is_empty() {
            warn!("Generator produced nothing usable");
            return Err(Text2SqlError::GenerationFailed);
        }

        let approved = self.validator.validate(&sanitized_sql).map_err(|rejection| {
            warn!(reason = rejection.code(), "Query rejected: {}", sanitized_sql);
            rejection
        })?;
        info!("Query approved: {}", approved);

        let result = self.executor.run(&approved).await.into_result()?;

        Ok(Text2SqlResponse {
            request_id,
            sql_query: raw_sql,
            sanitized_query: sanitized_sql,
            validated_query: approved.into_inner(),
            row_count: result.row_count(),
            rows: result.to_records(),
            columns: result.columns,
        })
    }
}
