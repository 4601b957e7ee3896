//! Natural-language questions over the Northwind database.
//!
//! A question becomes a prompt, the prompt becomes generated SQL, and that
//! SQL only reaches Postgres after sanitization and the read-only safety
//! gate have approved it.

pub mod config;
pub mod db;
pub mod error;
pub mod ingestion;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod rate_limit;
pub mod sanitizer;
pub mod server;
pub mod validator;

pub use error::{Rejection, Result, Text2SqlError};
pub use pipeline::{Text2SqlPipeline, Text2SqlResponse};
pub use validator::{ApprovedQuery, QueryValidator, ValidatorPolicy};
