//! Table include/exclude filtering
//!
//! Patterns use glob syntax (`*` any run of characters, `?` one character)
//! and match case-insensitively against `database.table`. A pattern without
//! a dot matches the table name in any database.
//!
//! ```rust
//! use sluice_cdc::common::TableFilter;
//!
//! let filter = TableFilter::new(&["shop.*".into()], &["shop.audit_*".into()]).unwrap();
//! assert!(filter.allows("shop", "orders"));
//! assert!(!filter.allows("shop", "audit_log"));
//! assert!(!filter.allows("crm", "contacts"));
//! ```

use regex::Regex;

use crate::common::{CdcError, Result};

/// One compiled glob.
#[derive(Debug, Clone)]
struct TablePattern {
    regex: Regex,
    qualified: bool,
}

impl TablePattern {
    fn new(pattern: &str) -> Result<Self> {
        let escaped = regex::escape(pattern);
        let body = escaped.replace(r"\*", ".*").replace(r"\?", ".");
        let regex = regex::RegexBuilder::new(&format!("^{}$", body))
            .case_insensitive(true)
            .build()
            .map_err(|e| CdcError::config(format!("Invalid table pattern '{}': {}", pattern, e)))?;
        Ok(Self {
            regex,
            qualified: pattern.contains('.'),
        })
    }

    fn matches(&self, database: &str, table: &str) -> bool {
        if self.qualified {
            self.regex.is_match(&format!("{}.{}", database, table))
        } else {
            self.regex.is_match(table)
        }
    }
}

/// Include/exclude rule set. Empty include list means "everything".
#[derive(Debug, Clone, Default)]
pub struct TableFilter {
    include: Vec<TablePattern>,
    exclude: Vec<TablePattern>,
}

impl TableFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: include
                .iter()
                .map(|p| TablePattern::new(p))
                .collect::<Result<_>>()?,
            exclude: exclude
                .iter()
                .map(|p| TablePattern::new(p))
                .collect::<Result<_>>()?,
        })
    }

    /// Filter that lets every table through.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Exclusions win over inclusions.
    pub fn allows(&self, database: &str, table: &str) -> bool {
        if self.exclude.iter().any(|p| p.matches(database, table)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|p| p.matches(database, table))
    }
}
