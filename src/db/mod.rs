//! Database module: connection setup, the executor for approved queries,
//! and the tabular result type.

pub mod connection;
pub mod executor;
pub mod result;

pub use connection::{connect_checked, init_pool};
pub use executor::{ExecutionOutcome, Executor, PgQueryRunner, QueryRunner};
pub use result::ResultSet;
