//! Rows event → mutation translation
//!
//! One [`Mutation`] per row, in the order the rows appear in the event. Column
//! names and order come from the registered [`TableDescriptor`]; update images
//! are paired by their position in the event.

use std::sync::Arc;
use tracing::trace;

use super::decoder::{RowData, RowsEvent, RowsKind};
use super::schema::{SchemaContext, TableDescriptor};
use crate::common::{CdcError, Mutation, MutationMetadata, Position, Result, TableFilter, Value};

/// Where the rows event sits in the stream.
#[derive(Debug, Clone, Copy)]
pub struct EventContext<'a> {
    /// Position just past the rows event
    pub position: &'a Position,
    pub timestamp: u32,
    pub server_id: u32,
    pub gtid: Option<&'a str>,
}

/// Outcome of translating one rows event.
#[derive(Debug, Clone, PartialEq)]
pub enum Translated {
    Mutations(Vec<Mutation>),
    /// The table is excluded; carries the number of rows dropped
    Filtered { rows: usize },
}

/// Stateless translator applying the table filter.
#[derive(Debug, Clone, Default)]
pub struct MutationTranslator {
    filter: TableFilter,
}

impl MutationTranslator {
    pub fn new(filter: TableFilter) -> Self {
        Self { filter }
    }

    pub fn translate(
        &self,
        rows: &RowsEvent,
        schema: &SchemaContext,
        ctx: EventContext<'_>,
    ) -> Result<Translated> {
        let table = schema
            .get(rows.table_id)
            .ok_or(CdcError::MissingTableMap(rows.table_id))?;

        if !self.filter.allows(&table.database, &table.table) {
            trace!(
                "Filtered {} row(s) of {}",
                rows.rows.len(),
                table.qualified_name()
            );
            return Ok(Translated::Filtered {
                rows: rows.rows.len(),
            });
        }

        let mutations = rows
            .rows
            .iter()
            .enumerate()
            .map(|(row_index, row)| {
                let metadata = MutationMetadata {
                    position: ctx.position.clone(),
                    timestamp: ctx.timestamp,
                    server_id: ctx.server_id,
                    gtid: ctx.gtid.map(str::to_string),
                    row_index,
                };
                to_mutation(rows.kind, table, row, metadata)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Translated::Mutations(mutations))
    }
}

fn image(table: &TableDescriptor, values: Option<&Vec<Value>>, which: &str) -> Result<Vec<Value>> {
    let values = values.ok_or_else(|| {
        CdcError::decode(format!(
            "row of {} lacks its {} image",
            table.qualified_name(),
            which
        ))
    })?;
    if values.len() != table.columns().len() {
        return Err(CdcError::decode(format!(
            "{} image of {} has {} values for {} columns",
            which,
            table.qualified_name(),
            values.len(),
            table.columns().len()
        )));
    }
    Ok(values.clone())
}

fn to_mutation(
    kind: RowsKind,
    table: &Arc<TableDescriptor>,
    row: &RowData,
    metadata: MutationMetadata,
) -> Result<Mutation> {
    let columns = table.column_names();
    Ok(match kind {
        RowsKind::Write => Mutation::Insert {
            new_values: image(table, row.after.as_ref(), "after")?,
            table: Arc::clone(table),
            columns,
            metadata,
        },
        RowsKind::Update => Mutation::Update {
            old_values: image(table, row.before.as_ref(), "before")?,
            new_values: image(table, row.after.as_ref(), "after")?,
            table: Arc::clone(table),
            columns,
            metadata,
        },
        RowsKind::Delete => Mutation::Delete {
            old_values: image(table, row.before.as_ref(), "before")?,
            table: Arc::clone(table),
            columns,
            metadata,
        },
    })
}
