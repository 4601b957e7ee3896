//! CSV source - reads a normalized Northwind CSV into named columns

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use lazy_static::lazy_static;
use regex::Regex;
use std::io::Read;
use std::path::Path;

lazy_static! {
    static ref WORD_BOUNDARY: Regex = Regex::new(r"(.)([A-Z][a-z]+)").unwrap();
    static ref LOWER_UPPER: Regex = Regex::new(r"([a-z0-9])([A-Z])").unwrap();
}

/// `CamelCase`, `PascalCase` and `mixedCASEString` to snake_case. Spaces are
/// removed, not turned into underscores.
pub fn to_snake_case(s: &str) -> String {
    let compact: String = s.trim().chars().filter(|c| *c != ' ').collect();
    let step = WORD_BOUNDARY.replace_all(&compact, "${1}_${2}");
    LOWER_UPPER.replace_all(&step, "${1}_${2}").to_lowercase()
}

/// A CSV file with snake_case headers. Blank cells are `None`.
#[derive(Debug, Clone)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub records: Vec<Vec<Option<String>>>,
}

impl CsvTable {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open CSV file {}", path.display()))?;
        Self::from_reader(file).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = rdr
            .headers()
            .context("Failed to read CSV headers")?
            .iter()
            .map(to_snake_case)
            .collect::<Vec<_>>();

        let mut records = Vec::new();
        for result in rdr.records() {
            let record = result.context("Failed to read CSV record")?;
            let row = (0..headers.len())
                .map(|idx| {
                    record
                        .get(idx)
                        .map(str::trim)
                        .filter(|cell| !cell.is_empty())
                        .map(str::to_string)
                })
                .collect();
            records.push(row);
        }

        Ok(Self { headers, records })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
