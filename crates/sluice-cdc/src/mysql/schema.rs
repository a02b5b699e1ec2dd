//! Schema context for row decoding
//!
//! Row events only carry a numeric table id. The [`SchemaContext`] maps those
//! ids to [`TableDescriptor`]s built from TABLE_MAP events; it is owned and
//! mutated by the session loop alone and rebuilt on every connection, since the
//! source assigns table ids per connection.
//!
//! Column names are not needed for decoding. They come from TABLE_MAP optional
//! metadata when the source writes it (`binlog_row_metadata=FULL`), otherwise
//! from a [`ColumnNameResolver`], otherwise they are positional (`@1`, `@2`, ...).

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

use super::decoder::{ColumnType, TableMapEvent};
use crate::common::Result;

/// One column of a table as described by the binlog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub column_type: ColumnType,
    /// Type metadata from the table map (length, precision/scale, fsp, ...)
    pub metadata: u16,
    pub nullable: bool,
    pub unsigned: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, column_type: ColumnType, metadata: u16) -> Self {
        Self {
            name: name.into(),
            column_type,
            metadata,
            nullable: true,
            unsigned: false,
        }
    }

    pub fn with_unsigned(mut self, unsigned: bool) -> Self {
        self.unsigned = unsigned;
        self
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

/// Table layout registered under a table id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub database: String,
    pub table: String,
    columns: Vec<ColumnDescriptor>,
    names: Arc<[String]>,
    primary_key: Vec<usize>,
}

impl TableDescriptor {
    pub fn new(
        database: impl Into<String>,
        table: impl Into<String>,
        columns: Vec<ColumnDescriptor>,
    ) -> Self {
        let names = columns.iter().map(|c| c.name.clone()).collect();
        Self {
            database: database.into(),
            table: table.into(),
            columns,
            names,
            primary_key: Vec::new(),
        }
    }

    /// Build a descriptor from a table map.
    ///
    /// Names embedded in the event win over `resolved`; names whose count does
    /// not match the column count are discarded in favour of positional names.
    pub fn from_table_map(map: &TableMapEvent, resolved: Option<Vec<String>>) -> Self {
        let count = map.column_count();
        let names = map
            .column_names
            .clone()
            .or(resolved)
            .filter(|names| {
                let matches = names.len() == count;
                if !matches {
                    debug!(
                        "Column name count {} does not match {} columns of {}.{}",
                        names.len(),
                        count,
                        map.schema_name,
                        map.table_name
                    );
                }
                matches
            })
            .unwrap_or_else(|| positional_names(count));

        let columns = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| ColumnDescriptor {
                name,
                column_type: map.column_types[i],
                metadata: map.column_metadata.get(i).copied().unwrap_or(0),
                nullable: map.nullable.get(i).copied().unwrap_or(true),
                unsigned: map.unsigned.get(i).copied().unwrap_or(false),
            })
            .collect();

        let mut descriptor = Self::new(map.schema_name.clone(), map.table_name.clone(), columns);
        descriptor.primary_key = map.primary_key.clone();
        descriptor
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    /// Shared column name list; cloning is a reference count bump.
    pub fn column_names(&self) -> Arc<[String]> {
        Arc::clone(&self.names)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Primary key column indexes, when the source reported them.
    pub fn primary_key(&self) -> &[usize] {
        &self.primary_key
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }
}

fn positional_names(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("@{}", i)).collect()
}

/// Table id → descriptor map for the current connection.
#[derive(Debug, Default)]
pub struct SchemaContext {
    tables: HashMap<u64, Arc<TableDescriptor>>,
}

impl SchemaContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or overwrite the descriptor for `table_id`.
    pub fn register(&mut self, table_id: u64, descriptor: Arc<TableDescriptor>) {
        self.tables.insert(table_id, descriptor);
    }

    pub fn get(&self, table_id: u64) -> Option<&Arc<TableDescriptor>> {
        self.tables.get(&table_id)
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Looks up column names for a table outside the binlog.
#[async_trait]
pub trait ColumnNameResolver: Send + Sync {
    /// Column names in ordinal order, or `None` if the table is unknown.
    async fn column_names(&self, database: &str, table: &str) -> Result<Option<Vec<String>>>;
}

/// Column name cache keyed by `(database, table)`.
///
/// Uses simple FIFO eviction when the cache exceeds the maximum size to prevent
/// unbounded memory growth.
#[derive(Debug)]
pub struct ColumnNameCache {
    tables: HashMap<(String, String), Vec<String>>,
    insertion_order: VecDeque<(String, String)>,
    max_entries: usize,
}

impl Default for ColumnNameCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ColumnNameCache {
    const DEFAULT_MAX_ENTRIES: usize = 1000;

    pub fn new() -> Self {
        Self::with_max_entries(Self::DEFAULT_MAX_ENTRIES)
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            tables: HashMap::new(),
            insertion_order: VecDeque::new(),
            max_entries,
        }
    }

    pub fn get(&self, database: &str, table: &str) -> Option<&Vec<String>> {
        self.tables.get(&(database.to_string(), table.to_string()))
    }

    pub fn insert(&mut self, database: &str, table: &str, names: Vec<String>) {
        use std::collections::hash_map::Entry;

        let key = (database.to_string(), table.to_string());
        match self.tables.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                entry.insert(names);
            }
            Entry::Vacant(entry) => {
                self.insertion_order.push_back(key);
                entry.insert(names);

                while self.tables.len() > self.max_entries {
                    let Some(oldest) = self.insertion_order.pop_front() else {
                        break;
                    };
                    self.tables.remove(&oldest);
                    debug!("Evicted column names for {}.{}", oldest.0, oldest.1);
                }
            }
        }
    }

    /// Drop every entry for `database`, or everything when `None`.
    pub fn invalidate(&mut self, database: Option<&str>) {
        match database {
            Some(db) => {
                self.tables.retain(|(d, _), _| d != db);
                self.insertion_order.retain(|(d, _)| d != db);
            }
            None => {
                self.tables.clear();
                self.insertion_order.clear();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Resolves names for table maps that do not carry them: cache first, then
/// the resolver. Lookup failures degrade to positional names.
pub(crate) struct ColumnNames {
    resolver: Option<Arc<dyn ColumnNameResolver>>,
    cache: ColumnNameCache,
}

impl ColumnNames {
    pub fn new(resolver: Option<Arc<dyn ColumnNameResolver>>) -> Self {
        Self {
            resolver,
            cache: ColumnNameCache::new(),
        }
    }

    pub async fn lookup(&mut self, map: &TableMapEvent) -> Option<Vec<String>> {
        if map.column_names.is_some() {
            return None;
        }
        if let Some(names) = self.cache.get(&map.schema_name, &map.table_name) {
            return Some(names.clone());
        }
        let resolver = self.resolver.as_ref()?;

        match resolver
            .column_names(&map.schema_name, &map.table_name)
            .await
        {
            Ok(Some(names)) => {
                debug!(
                    "Resolved {} column names for {}.{}",
                    names.len(),
                    map.schema_name,
                    map.table_name
                );
                self.cache
                    .insert(&map.schema_name, &map.table_name, names.clone());
                Some(names)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(
                    "Failed to resolve column names for {}.{}: {}",
                    map.schema_name, map.table_name, e
                );
                None
            }
        }
    }

    /// Schema changed; cached names may be stale.
    ///
    /// Everything is dropped: a DDL statement may name tables outside the
    /// default database it was issued from.
    pub fn invalidate(&mut self) {
        self.cache.invalidate(None);
    }
}

#[cfg(feature = "information-schema")]
pub use information_schema::InformationSchemaResolver;

#[cfg(feature = "information-schema")]
mod information_schema {
    use super::*;
    use crate::common::CdcError;
    use mysql_async::prelude::*;
    use mysql_async::{OptsBuilder, Pool};

    const COLUMNS_QUERY: &str = r#"
        SELECT COLUMN_NAME
        FROM INFORMATION_SCHEMA.COLUMNS
        WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
        ORDER BY ORDINAL_POSITION
    "#;

    /// Column names from `INFORMATION_SCHEMA.COLUMNS` over a separate
    /// `mysql_async` connection pool.
    ///
    /// Names reflect the table's current definition, which can differ from the
    /// definition the binlog rows were written with while replaying history.
    pub struct InformationSchemaResolver {
        pool: Pool,
    }

    impl InformationSchemaResolver {
        pub fn new(host: &str, port: u16, user: &str, password: Option<&str>) -> Self {
            let opts = OptsBuilder::default()
                .ip_or_hostname(host)
                .tcp_port(port)
                .user(Some(user))
                .pass(password);
            Self {
                pool: Pool::new(opts),
            }
        }

        pub async fn disconnect(self) -> Result<()> {
            self.pool
                .disconnect()
                .await
                .map_err(|e| CdcError::connection(format!("metadata pool disconnect: {}", e)))
        }
    }

    impl std::fmt::Debug for InformationSchemaResolver {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("InformationSchemaResolver").finish_non_exhaustive()
        }
    }

    #[async_trait]
    impl ColumnNameResolver for InformationSchemaResolver {
        async fn column_names(&self, database: &str, table: &str) -> Result<Option<Vec<String>>> {
            let mut conn = self
                .pool
                .get_conn()
                .await
                .map_err(|e| CdcError::connection(format!("metadata connection: {}", e)))?;
            let names: Vec<String> = conn
                .exec(COLUMNS_QUERY, (database, table))
                .await
                .map_err(|e| CdcError::protocol(format!("INFORMATION_SCHEMA query: {}", e)))?;
            Ok((!names.is_empty()).then_some(names))
        }
    }
}
