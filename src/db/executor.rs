//! Executor for approved queries.
//!
//! The executor never lets a database failure escape as a panic or a bare
//! error: every call ends in an [`ExecutionOutcome`], and a failed outcome
//! carries the cause instead of partial rows.

use crate::db::result::ResultSet;
use crate::error::{Result, Text2SqlError};
use crate::validator::ApprovedQuery;
use async_trait::async_trait;
use sqlx::{Column as _, Executor as _, PgPool, Statement as _};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Downstream query execution: finalized SQL in, rows and column names out.
#[async_trait]
pub trait QueryRunner: Send + Sync {
    async fn fetch(&self, sql: &str) -> Result<ResultSet>;
}

/// Runs queries on Postgres, one pooled connection per query.
#[derive(Clone)]
pub struct PgQueryRunner {
    pool: PgPool,
}

impl PgQueryRunner {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryRunner for PgQueryRunner {
    async fn fetch(&self, sql: &str) -> Result<ResultSet> {
        // Released back to the pool when `conn` drops, on every path.
        let mut conn = self.pool.acquire().await?;

        // Prepared (extended protocol), so a smuggled second statement is
        // refused by the server. The statement also names the columns when
        // no row comes back.
        let statement = (&mut *conn).prepare(sql).await?;
        let columns = statement
            .columns()
            .iter()
            .map(|column| column.name().to_string())
            .collect();

        let rows = statement.query().fetch_all(&mut *conn).await?;

        Ok(ResultSet::from_pg_rows(columns, &rows))
    }
}

/// What happened when an approved query ran.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed(ResultSet),
    Failed { cause: String },
}

impl ExecutionOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ExecutionOutcome::Failed { .. })
    }

    /// The rows, or an empty result when execution failed.
    pub fn into_result_set(self) -> ResultSet {
        match self {
            ExecutionOutcome::Completed(result) => result,
            ExecutionOutcome::Failed { .. } => ResultSet::empty(),
        }
    }

    pub fn into_result(self) -> Result<ResultSet> {
        match self {
            ExecutionOutcome::Completed(result) => Ok(result),
            ExecutionOutcome::Failed { cause } => Err(Text2SqlError::ExecutionFailed(cause)),
        }
    }
}

#[derive(Clone)]
pub struct Executor {
    runner: Arc<dyn QueryRunner>,
    timeout: Duration,
}

impl Executor {
    pub fn new(runner: Arc<dyn QueryRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    pub async fn run(&self, query: &ApprovedQuery) -> ExecutionOutcome {
        let started = Instant::now();

        match tokio::time::timeout(self.timeout, self.runner.fetch(query.as_str())).await {
            Ok(Ok(result)) => {
                info!(
                    rows = result.row_count(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Query executed"
                );
                ExecutionOutcome::Completed(result)
            }
            Ok(Err(e)) => {
                error!("Database execution error: {}", e);
                ExecutionOutcome::Failed { cause: e.to_string() }
            }
            Err(_) => {
                error!("Query exceeded {:?} timeout", self.timeout);
                ExecutionOutcome::Failed {
                    cause: format!("Query exceeded {:?} timeout", self.timeout),
                }
            }
        }
    }
}
