use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use text2sql::db::{Executor, QueryRunner, ResultSet};
use text2sql::llm::SqlGenerator;
use text2sql::prompt::SchemaContext;
use text2sql::{QueryValidator, Result, Text2SqlError, Text2SqlPipeline};

struct CannedGenerator(&'static str);

#[async_trait]
impl SqlGenerator for CannedGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Ok(self.0.to_string())
    }

    fn name(&self) -> &str {
        "canned"
    }
}

/// Three customers; records what it ran.
#[derive(Default)]
struct CustomersDb {
    ran: Mutex<Vec<String>>,
}

#[async_trait]
impl QueryRunner for CustomersDb {
    async fn fetch(&self, sql: &str) -> Result<ResultSet> {
        self.ran.lock().unwrap().push(sql.to_string());
        Ok(ResultSet::new(
            vec!["customer_id".to_string()],
            vec![vec![json!("ALFKI")], vec![json!("ANATR")], vec![json!("ANTON")]],
        ))
    }
}

struct DownDb;

#[async_trait]
impl QueryRunner for DownDb {
    async fn fetch(&self, _sql: &str) -> Result<ResultSet> {
        Err(Text2SqlError::Database("connection refused".to_string()))
    }
}

fn pipeline(sql: &'static str, runner: Arc<dyn QueryRunner>) -> Text2SqlPipeline {
    Text2SqlPipeline::new(
        Arc::new(CannedGenerator(sql)),
        QueryValidator::default(),
        Executor::new(runner, Duration::from_secs(5)),
        SchemaContext::builtin(),
    )
}

#[tokio::test]
async fn test_customer_ids_end_to_end() {
    let db = Arc::new(CustomersDb::default());
    let response = pipeline("SELECT customer_id FROM customers", db.clone())
        .generate_and_execute("List every customer id")
        .await
        .unwrap();

    assert_eq!(response.sql_query, "SELECT customer_id FROM customers");
    assert_eq!(response.sanitized_query, "SELECT customer_id FROM customers");
    assert_eq!(response.validated_query, "SELECT customer_id FROM customers LIMIT 1000;");
    assert_eq!(response.columns, vec!["customer_id"]);
    assert_eq!(response.row_count, 3);
    assert_eq!(*db.ran.lock().unwrap(), vec!["SELECT customer_id FROM customers LIMIT 1000;"]);
}

#[tokio::test]
async fn test_database_failure_is_reported_not_empty() {
    let err = pipeline("SELECT customer_id FROM customers", Arc::new(DownDb))
        .generate_and_execute("List every customer id")
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 500);
    assert_eq!(err.reason_code(), "ExecutionFailed");
    assert!(err.to_string().contains("connection refused"));
}

#[tokio::test]
async fn test_catalog_access_is_blocked() {
    let db = Arc::new(CustomersDb::default());
    let err = pipeline("SELECT usename, passwd FROM pg_catalog.pg_shadow", db.clone())
        .generate_and_execute("show me the passwords")
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 400);
    assert_eq!(err.reason_code(), "SystemSchemaAccessBlocked");
    assert!(db.ran.lock().unwrap().is_empty());
}
