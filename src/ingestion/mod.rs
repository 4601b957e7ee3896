//! Northwind ingestion: normalized CSV exports into the Postgres schema.

pub mod csv_source;
pub mod loader;
pub mod location;

pub use csv_source::{to_snake_case, CsvTable};
pub use loader::{apply_schema, NorthwindLoader, TableLoad, TableReport, NORTHWIND_PLAN};
pub use location::{Location, LocationResolver, LocationStore};
