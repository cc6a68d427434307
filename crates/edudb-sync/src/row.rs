//! Ordered column/value rows, decoupled from any driver type.

use std::collections::HashMap;

use crate::value::{from_pg, SqlValue};

/// One table row: column names paired with values, in column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new() -> Self {
        Row { columns: Vec::new() }
    }

    /// Build from a driver row, typed off the row's own column metadata.
    pub fn from_pg(row: &tokio_postgres::Row) -> std::result::Result<Row, String> {
        let mut out = Row::new();
        for idx in 0..row.columns().len() {
            let name = row.columns()[idx].name().to_string();
            out.push(name, from_pg(row, idx)?);
        }
        Ok(out)
    }

    pub fn push(&mut self, name: impl Into<String>, value: SqlValue) {
        self.columns.push((name.into(), value));
    }

    /// Value of the named column, if present.
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(c, _)| c == name)
            .map(|(_, v)| v)
    }

    /// Replace the named column's value, appending if it is absent.
    pub fn set(&mut self, name: &str, value: SqlValue) {
        match self.columns.iter_mut().find(|(c, _)| c == name) {
            Some((_, slot)) => *slot = value,
            None => self.columns.push((name.to_string(), value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(c, _)| c.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Convert a camelCase or PascalCase name to snake_case.
///
/// Runs of capitals stay together until the last letter of the run
/// ("HTMLFile" becomes "html_file"), and digits split like lowercase
/// letters do ("sha256Hash" becomes "sha256_hash").
pub fn camel_to_snake(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev_lower = i > 0
                && (chars[i - 1].is_ascii_lowercase() || chars[i - 1].is_ascii_digit());
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            let prev_upper = i > 0 && chars[i - 1].is_ascii_uppercase();
            if prev_lower || (prev_upper && next_lower) {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Match a snapshot key against the destination's columns.
///
/// Exact names win; otherwise the key is normalized to snake_case and
/// looked up again, so older camelCase exports land on today's schema.
/// Returns the destination column name and its `udt_name`.
pub fn resolve_column<'a>(
    key: &str,
    dest_columns: &'a HashMap<String, String>,
) -> Option<(&'a str, &'a str)> {
    if let Some((name, udt)) = dest_columns.get_key_value(key) {
        return Some((name.as_str(), udt.as_str()));
    }
    let snake = camel_to_snake(key);
    dest_columns
        .get_key_value(snake.as_str())
        .map(|(name, udt)| (name.as_str(), udt.as_str()))
}
