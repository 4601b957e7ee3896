//! Prompt construction for SQL generation.
//!
//! The schema description handed to the generator is configuration, not
//! logic: the built-in copy is the same DDL `apply-schema` runs, and a
//! deployment can point `SCHEMA_CONTEXT_PATH` at a different file.

use crate::error::Result;
use std::path::Path;
use tracing::info;

const BUILTIN_SCHEMA: &str = include_str!("../schema/northwind.sql");
const BUILTIN_VERSION: &str = "northwind-v1";

/// Versioned schema description supplied to the generator.
#[derive(Debug, Clone)]
pub struct SchemaContext {
    pub version: String,
    pub ddl: String,
}

impl SchemaContext {
    pub fn builtin() -> Self {
        Self {
            version: BUILTIN_VERSION.to_string(),
            ddl: BUILTIN_SCHEMA.to_string(),
        }
    }

    /// Load a schema context from a file. The version is taken from a
    /// `-- schema-context: <version>` line when present, else the file stem.
    pub fn from_file(path: &Path) -> Result<Self> {
        let ddl = std::fs::read_to_string(path)?;
        let version = ddl
            .lines()
            .find_map(|line| line.trim().strip_prefix("-- schema-context:"))
            .map(|v| v.trim().to_string())
            .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "custom".to_string());
        info!("Loaded schema context {} from {}", version, path.display());
        Ok(Self { version, ddl })
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::builtin()),
        }
    }

    /// The DDL text handed to the generator.
    pub fn ddl(&self) -> &str {
        &self.ddl
    }
}

pub const QUESTION_MARKER: &str = "This is the question you are required to answer:";
pub const SCHEMA_MARKER: &str = "Here is the relevant context of the database:";

pub fn build_prompt(question: &str, schema: &SchemaContext) -> String {
    format!(
        r#"You are a helpful assistant specializing in data analysis in a PostgreSQL warehouse.
Answer the question by providing a single read-only SQL SELECT statement that is compatible with PostgreSQL.
Return only the SQL, optionally inside a ```sql code block.
{}
{}

{}
{}"#,
        QUESTION_MARKER,
        question.trim(),
        SCHEMA_MARKER,
        schema.ddl.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_schema_lists_tables() {
        let schema = SchemaContext::builtin();
        for table in [
            "countries", "regions", "cities", "customers", "employees", "suppliers",
            "categories", "products", "shippers", "orders", "order_details",
        ] {
            assert!(schema.ddl.contains(&format!("CREATE TABLE IF NOT EXISTS {} (", table)), "{}", table);
        }
        assert_eq!(schema.version, "northwind-v1");
    }

    #[test]
    fn test_prompt_contains_question_and_schema() {
        let prompt = build_prompt("  How many orders were shipped?  ", &SchemaContext::builtin());
        assert!(prompt.contains("How many orders were shipped?\n"));
        assert!(prompt.contains("order_details"));
        assert!(prompt.contains("PostgreSQL"));
    }

    #[test]
    fn test_from_file_reads_version_tag() {
        let dir = std::env::temp_dir().join(format!("text2sql-schema-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tiny.sql");
        std::fs::write(&path, "-- schema-context: tiny-2\nCREATE TABLE t (id INT);\n").unwrap();

        let schema = SchemaContext::load(Some(&path)).unwrap();
        assert_eq!(schema.version, "tiny-2");
        assert!(schema.ddl().contains("CREATE TABLE t"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
