//! Northwind loader - normalized CSVs into Postgres, in foreign-key order

use crate::error::Text2SqlError;
use crate::ingestion::csv_source::CsvTable;
use crate::ingestion::location::{Location, LocationResolver};
use anyhow::{Context, Result};
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

lazy_static! {
    static ref PLAIN_TYPE_NAME: Regex = Regex::new(r"^[a-z_][a-z0-9_]*$").unwrap();
    static ref WHOLE_FLOAT: Regex = Regex::new(r"^(-?\d+)\.0+$").unwrap();
}

/// CSV columns folded into a single city foreign key.
#[derive(Debug, Clone, Copy)]
pub struct LocationColumns {
    pub city: &'static str,
    pub region: &'static str,
    pub country: &'static str,
    pub target: &'static str,
}

const LOCATION: LocationColumns = LocationColumns {
    city: "city",
    region: "region",
    country: "country",
    target: "city_id",
};

const SHIP_LOCATION: LocationColumns = LocationColumns {
    city: "ship_city",
    region: "ship_region",
    country: "ship_country",
    target: "ship_city_id",
};

const ORDER_COLUMNS: &[&str] = &[
    "order_id",
    "customer_id",
    "employee_id",
    "order_date",
    "required_date",
    "shipped_date",
    "ship_via",
    "freight",
    "ship_name",
    "ship_postal_code",
];

/// How one CSV file lands in one table.
#[derive(Debug, Clone, Copy)]
pub struct TableLoad {
    pub file: &'static str,
    pub table: &'static str,
    pub location: Option<LocationColumns>,
    pub conflict_column: Option<&'static str>,
    /// Restricts the inserted CSV columns; `None` takes every column the
    /// table has.
    pub columns: Option<&'static [&'static str]>,
}

impl TableLoad {
    const fn plain(file: &'static str, table: &'static str, id: &'static str) -> Self {
        Self {
            file,
            table,
            location: None,
            conflict_column: Some(id),
            columns: None,
        }
    }

    const fn located(file: &'static str, table: &'static str, id: &'static str) -> Self {
        Self {
            file,
            table,
            location: Some(LOCATION),
            conflict_column: Some(id),
            columns: None,
        }
    }
}

/// Parents before children.
pub const NORTHWIND_PLAN: &[TableLoad] = &[
    TableLoad::plain("Category.csv", "categories", "category_id"),
    TableLoad::located("Customer.csv", "customers", "customer_id"),
    TableLoad::located("Employee.csv", "employees", "employee_id"),
    TableLoad::located("Supplier.csv", "suppliers", "supplier_id"),
    TableLoad::plain("Product.csv", "products", "product_id"),
    TableLoad::plain("Shipper.csv", "shippers", "shipper_id"),
    TableLoad {
        file: "Order.csv",
        table: "orders",
        location: Some(SHIP_LOCATION),
        conflict_column: Some("order_id"),
        columns: Some(ORDER_COLUMNS),
    },
    TableLoad {
        file: "Order Detail.csv",
        table: "order_details",
        location: None,
        conflict_column: None,
        columns: None,
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReport {
    pub table: String,
    pub rows: usize,
    pub skipped_columns: Vec<String>,
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `3.0` into an integer column becomes `3`; anything else passes through.
pub fn normalize_cell(value: &str, udt_name: &str) -> String {
    if matches!(udt_name, "int2" | "int4" | "int8") {
        if let Some(caps) = WHOLE_FLOAT.captures(value) {
            return caps[1].to_string();
        }
    }
    value.to_string()
}

/// Parameterized insert, every placeholder cast to its column's type.
pub fn build_insert(table: &str, columns: &[(String, String)], conflict_column: Option<&str>) -> String {
    let names = columns.iter().map(|(name, _)| quote_ident(name)).join(", ");
    let placeholders = columns
        .iter()
        .enumerate()
        .map(|(idx, (_, udt))| format!("${}::{}", idx + 1, udt))
        .join(", ");

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        names,
        placeholders
    );
    if let Some(conflict) = conflict_column {
        sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", quote_ident(conflict)));
    }
    sql
}

/// Which CSV columns go into the insert, paired with their type.
struct ColumnPlan {
    /// (CSV index, column name, udt name)
    columns: Vec<(usize, String, String)>,
    skipped: Vec<String>,
    location: Option<(LocationColumns, [Option<usize>; 3], String)>,
}

fn plan_columns(load: &TableLoad, csv: &CsvTable, table_types: &HashMap<String, String>) -> Result<ColumnPlan> {
    let location_names: Vec<&str> = load
        .location
        .map(|loc| vec![loc.city, loc.region, loc.country])
        .unwrap_or_default();

    let mut columns = Vec::new();
    let mut skipped = Vec::new();
    for (idx, header) in csv.headers.iter().enumerate() {
        if location_names.contains(&header.as_str()) {
            continue;
        }
        if let Some(allowed) = load.columns {
            if !allowed.contains(&header.as_str()) {
                skipped.push(header.clone());
                continue;
            }
        }
        match table_types.get(header) {
            Some(udt) => columns.push((idx, header.clone(), udt.clone())),
            None => skipped.push(header.clone()),
        }
    }

    // Location only applies when the CSV carries city and country.
    let location = match load.location {
        Some(loc) if csv.column_index(loc.city).is_some() && csv.column_index(loc.country).is_some() => {
            let udt = table_types.get(loc.target).cloned().ok_or_else(|| {
                Text2SqlError::Ingestion(format!("Table {} has no column {}", load.table, loc.target))
            })?;
            let indices = [
                csv.column_index(loc.city),
                csv.column_index(loc.region),
                csv.column_index(loc.country),
            ];
            Some((loc, indices, udt))
        }
        _ => None,
    };

    Ok(ColumnPlan {
        columns,
        skipped,
        location,
    })
}

pub struct NorthwindLoader {
    pool: PgPool,
    data_dir: PathBuf,
    plan: Vec<TableLoad>,
}

impl NorthwindLoader {
    pub fn new(pool: PgPool, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            data_dir: data_dir.into(),
            plan: NORTHWIND_PLAN.to_vec(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Every file the plan needs, before any row is written.
    pub fn check_files(&self) -> Result<()> {
        missing_files(&self.data_dir, &self.plan)
    }

    pub async fn load_all(&self) -> Result<Vec<TableReport>> {
        self.check_files()?;

        let mut resolver = LocationResolver::new();
        let mut reports = Vec::with_capacity(self.plan.len());
        for load in &self.plan {
            let report = self.load_table(load, &mut resolver).await?;
            info!("Loaded {} rows into {}", report.rows, report.table);
            reports.push(report);
        }
        Ok(reports)
    }

    async fn load_table(&self, load: &TableLoad, resolver: &mut LocationResolver) -> Result<TableReport> {
        let path = self.data_dir.join(load.file);
        let csv = CsvTable::from_path(&path)?;

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        let table_types = column_types(&mut *tx, load.table).await?;
        if table_types.is_empty() {
            return Err(Text2SqlError::Ingestion(format!("Table {} does not exist", load.table)).into());
        }

        let plan = plan_columns(load, &csv, &table_types)?;
        if !plan.skipped.is_empty() {
            warn!("{}: ignoring columns {}", load.file, plan.skipped.iter().join(", "));
        }

        let mut insert_columns: Vec<(String, String)> = plan
            .columns
            .iter()
            .map(|(_, name, udt)| (name.clone(), udt.clone()))
            .collect();
        if let Some((loc, _, udt)) = &plan.location {
            insert_columns.push((loc.target.to_string(), udt.clone()));
        }
        let sql = build_insert(load.table, &insert_columns, load.conflict_column);

        let mut rows = 0;
        for record in &csv.records {
            let city_id = match &plan.location {
                Some((_, [city, region, country], _)) => {
                    let cell = |idx: &Option<usize>| idx.and_then(|i| record[i].as_deref());
                    match Location::from_cells(cell(city), cell(region), cell(country)) {
                        Some(location) => Some(
                            resolver
                                .resolve(&mut *tx, &location)
                                .await
                                .with_context(|| format!("Failed to resolve location for {}", load.table))?,
                        ),
                        None => None,
                    }
                }
                None => None,
            };

            let mut query = sqlx::query(&sql);
            for (idx, _, udt) in &plan.columns {
                query = query.bind(record[*idx].as_deref().map(|value| normalize_cell(value, udt)));
            }
            if plan.location.is_some() {
                query = query.bind(city_id);
            }

            let result = query.execute(&mut *tx).await;
            if let Err(e) = result {
                resolver.clear();
                return Err(e).with_context(|| format!("Failed to insert row {} of {}", rows + 1, load.file));
            }
            rows += 1;
        }

        if let Err(e) = tx.commit().await {
            resolver.clear();
            return Err(e).with_context(|| format!("Failed to commit {}", load.table));
        }

        Ok(TableReport {
            table: load.table.to_string(),
            rows,
            skipped_columns: plan.skipped,
        })
    }
}

pub fn missing_files(data_dir: &Path, plan: &[TableLoad]) -> Result<()> {
    let missing: Vec<String> = plan
        .iter()
        .map(|load| data_dir.join(load.file))
        .filter(|path| !path.is_file())
        .map(|path| path.display().to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(Text2SqlError::Ingestion(format!("Missing required CSV files: {}", missing.join(", "))).into())
    }
}

/// Column name to Postgres type name for a table in the current schema.
async fn column_types(conn: &mut PgConnection, table: &str) -> Result<HashMap<String, String>> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT column_name::text, udt_name::text FROM information_schema.columns \
         WHERE table_schema = current_schema() AND table_name = $1",
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await
    .with_context(|| format!("Failed to read columns of {}", table))?;

    let mut types = HashMap::new();
    for (name, udt) in rows {
        if !PLAIN_TYPE_NAME.is_match(&udt) {
            return Err(Text2SqlError::Ingestion(format!("Unsupported type {} for {}.{}", udt, table, name)).into());
        }
        types.insert(name, udt);
    }
    Ok(types)
}

/// Run a DDL script, statements and all, in one round-trip.
pub async fn apply_schema(pool: &PgPool, path: &Path) -> Result<()> {
    let ddl = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema file {}", path.display()))?;
    sqlx::raw_sql(&ddl)
        .execute(pool)
        .await
        .with_context(|| format!("Failed to apply {}", path.display()))?;
    info!("Applied schema from {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn types(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(n, t)| (n.to_string(), t.to_string())).collect()
    }

    #[test]
    fn test_plan_order_respects_foreign_keys() {
        let tables: Vec<&str> = NORTHWIND_PLAN.iter().map(|l| l.table).collect();
        let pos = |t: &str| tables.iter().position(|x| *x == t).unwrap();

        assert!(pos("customers") < pos("orders"));
        assert!(pos("employees") < pos("orders"));
        assert!(pos("shippers") < pos("orders"));
        assert!(pos("suppliers") < pos("products"));
        assert!(pos("categories") < pos("products"));
        assert!(pos("orders") < pos("order_details"));
        assert_eq!(tables.last(), Some(&"order_details"));
    }

    #[test]
    fn test_build_insert() {
        let cols = vec![
            ("category_id".to_string(), "int4".to_string()),
            ("category_name".to_string(), "varchar".to_string()),
        ];
        assert_eq!(
            build_insert("categories", &cols, Some("category_id")),
            "INSERT INTO \"categories\" (\"category_id\", \"category_name\") VALUES ($1::int4, $2::varchar) ON CONFLICT (\"category_id\") DO NOTHING"
        );
        assert!(!build_insert("order_details", &cols, None).contains("ON CONFLICT"));
    }

    #[test]
    fn test_normalize_cell() {
        assert_eq!(normalize_cell("3.0", "int4"), "3");
        assert_eq!(normalize_cell("-12.00", "int2"), "-12");
        assert_eq!(normalize_cell("3.5", "int4"), "3.5");
        assert_eq!(normalize_cell("3.0", "numeric"), "3.0");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_plan_columns_folds_location() {
        let csv = CsvTable::from_reader(
            "CustomerID,CompanyName,City,Region,Country,Extra\nALFKI,Alfreds,Berlin,,Germany,x\n".as_bytes(),
        )
        .unwrap();
        let load = NORTHWIND_PLAN.iter().find(|l| l.table == "customers").unwrap();
        let table = types(&[
            ("customer_id", "varchar"),
            ("company_name", "varchar"),
            ("city_id", "int4"),
        ]);

        let plan = plan_columns(load, &csv, &table).unwrap();
        let names: Vec<&str> = plan.columns.iter().map(|(_, n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["customer_id", "company_name"]);
        assert_eq!(plan.skipped, vec!["extra"]);

        let (loc, indices, udt) = plan.location.unwrap();
        assert_eq!(loc.target, "city_id");
        assert_eq!(indices, [Some(2), Some(3), Some(4)]);
        assert_eq!(udt, "int4");
    }

    #[test]
    fn test_plan_columns_order_allow_list() {
        let csv = CsvTable::from_reader(
            "OrderID,CustomerID,Freight,ShipCity,ShipRegion,ShipCountry,ShipAddress\n1,ALFKI,3.5,Berlin,,Germany,Street\n"
                .as_bytes(),
        )
        .unwrap();
        let load = NORTHWIND_PLAN.iter().find(|l| l.table == "orders").unwrap();
        let table = types(&[
            ("order_id", "int4"),
            ("customer_id", "varchar"),
            ("freight", "numeric"),
            ("ship_address", "text"),
            ("ship_city_id", "int4"),
        ]);

        let plan = plan_columns(load, &csv, &table).unwrap();
        let names: Vec<&str> = plan.columns.iter().map(|(_, n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["order_id", "customer_id", "freight"]);
        assert_eq!(plan.skipped, vec!["ship_address"]);
        assert_eq!(plan.location.unwrap().0.target, "ship_city_id");
    }

    #[test]
    fn test_missing_files_reported_before_load() {
        let dir = std::env::temp_dir().join(format!("northwind-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("Category.csv"), "category_id\n1\n").unwrap();

        let err = missing_files(&dir, NORTHWIND_PLAN).unwrap_err().to_string();
        assert!(err.contains("Order Detail.csv"));
        assert!(!err.contains("Category.csv"));

        for load in NORTHWIND_PLAN {
            std::fs::write(dir.join(load.file), "id\n").unwrap();
        }
        assert!(missing_files(&dir, NORTHWIND_PLAN).is_ok());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
