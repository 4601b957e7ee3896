//! Query Safety Gate
//!
//! Decides whether a sanitized candidate may run as a read-only, bounded
//! query. Checks run in a fixed order and stop at the first failure:
//!
//! 1. statement type (must start with SELECT)
//! 2. deny-listed keywords anywhere in the text, as whole words
//! 3. system catalog references
//! 4. row bounding (append `LIMIT <max>` when no LIMIT is present)
//!
//! This is an allow-list gate over text, not a SQL parser. A LIMIT that is
//! already present is trusted unless `cap_existing_limit` is set.

use crate::error::Rejection;
use crate::sanitizer::strip_comments;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

pub const DEFAULT_MAX_ROWS: u64 = 1000;

pub const DENY_LIST: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "TRUNCATE", "CREATE", "GRANT", "REVOKE",
];

lazy_static! {
    static ref LEADING_SELECT: Regex = Regex::new(r"(?i)^SELECT\b").unwrap();
    static ref DENY_LIST_WORDS: Regex = Regex::new(&format!(r"(?i)\b({})\b", DENY_LIST.join("|"))).unwrap();
    static ref SYSTEM_SCHEMA: Regex = Regex::new(r"(?i)\b(pg_catalog|information_schema)\b").unwrap();
    static ref LIMIT_WORD: Regex = Regex::new(r"(?i)\bLIMIT\b").unwrap();
    static ref LIMIT_VALUE: Regex = Regex::new(r"(?i)\bLIMIT\s+(\d+)").unwrap();
}

/// A query the gate has approved. Only [`QueryValidator::validate`] can
/// build one, so holding an `ApprovedQuery` means the checks ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ApprovedQuery(String);

impl ApprovedQuery {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ApprovedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Knobs for row bounding.
#[derive(Debug, Clone)]
pub struct ValidatorPolicy {
    pub max_rows: u64,
    /// Rewrite a literal LIMIT above `max_rows` down to `max_rows`.
    pub cap_existing_limit: bool,
}

impl Default for ValidatorPolicy {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            cap_existing_limit: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryValidator {
    policy: ValidatorPolicy,
}

impl QueryValidator {
    pub fn new(policy: ValidatorPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ValidatorPolicy {
        &self.policy
    }

    pub fn validate(&self, candidate: &str) -> Result<ApprovedQuery, Rejection> {
        let trimmed = candidate.trim();

        if !LEADING_SELECT.is_match(trimmed) {
            return Err(Rejection::NotASelectStatement);
        }

        if let Some(found) = DENY_LIST_WORDS.find(candidate) {
            return Err(Rejection::DangerousKeyword(found.as_str().to_ascii_uppercase()));
        }

        if SYSTEM_SCHEMA.is_match(candidate) {
            return Err(Rejection::SystemSchemaAccessBlocked);
        }

        Ok(ApprovedQuery(self.bound_rows(candidate)))
    }

    fn bound_rows(&self, candidate: &str) -> String {
        // A LIMIT inside a comment bounds nothing, and a trailing `--` would
        // swallow an appended one, so bounding works on the comment-free text.
        let code = strip_comments(candidate);
        if !LIMIT_WORD.is_match(&code) {
            let body = strip_trailing_semicolon(&code);
            debug!("Appending LIMIT {} to query", self.policy.max_rows);
            return format!("{} LIMIT {};", body, self.policy.max_rows);
        }

        let max_rows = self.policy.max_rows;
        let oversized = LIMIT_VALUE
            .captures_iter(&code)
            .filter_map(|caps| caps.get(1).and_then(|m| m.as_str().parse::<u128>().ok()))
            .any(|value| value > max_rows as u128);

        if !oversized {
            return candidate.to_string();
        }

        if self.policy.cap_existing_limit {
            warn!("Capping existing LIMIT to {}", max_rows);
            LIMIT_VALUE
                .replace_all(candidate, |caps: &regex::Captures| {
                    let value = caps[1].parse::<u128>().unwrap_or(u128::MAX);
                    if value > max_rows as u128 {
                        format!("LIMIT {}", max_rows)
                    } else {
                        caps[0].to_string()
                    }
                })
                .into_owned()
        } else {
            warn!("Existing LIMIT exceeds {} rows and is trusted as-is", max_rows);
            candidate.to_string()
        }
    }
}

/// Trailing whitespace, then one `;`, then whitespace again.
fn strip_trailing_semicolon(sql: &str) -> &str {
    let trimmed = sql.trim();
    match trimmed.strip_suffix(';') {
        Some(stripped) => stripped.trim_end(),
        None => trimmed,
    }
}
