//! Schema data structures
//!
//! This module defines the normalized schema document produced by discovery:
//! tables, columns, primary keys and foreign keys, in the order the vendor
//! metadata yielded them.

use crate::database::dialect::DatabaseKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a column in a database table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name
    pub name: String,
    /// Vendor type name (e.g., "varchar", "NUMBER", "int4")
    pub type_name: String,
    /// Declared size: character length or numeric precision
    pub size: Option<i64>,
    /// Whether the column is nullable
    pub nullable: bool,
    /// Default value (if any)
    pub default_value: Option<String>,
}

impl fmt::Display for ColumnDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.type_name)?;
        if let Some(size) = self.size {
            write!(f, "({})", size)?;
        }
        if !self.nullable {
            write!(f, " NOT NULL")?;
        }
        if let Some(ref default) = self.default_value {
            write!(f, " DEFAULT {}", default)?;
        }
        Ok(())
    }
}

/// Foreign key reference information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyDescriptor {
    /// Local column name
    pub column: String,
    /// Referenced table name
    pub referenced_table: String,
    /// Referenced column name
    pub referenced_column: String,
}

/// Represents a discovered table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Table name
    pub name: String,
    /// Table kind as reported by the vendor (always "TABLE" for discovery)
    pub kind: String,
    /// Table columns
    pub columns: Vec<ColumnDescriptor>,
    /// Primary key columns (ordered)
    pub primary_keys: Vec<String>,
    /// Imported foreign keys
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
}

impl TableDescriptor {
    /// Create a new table
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            columns: Vec::new(),
            primary_keys: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Get a column by name
    pub fn get_column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Format table schema for display
    pub fn format_schema(&self) -> String {
        let mut result = format!("Table: {}\n", self.name);

        if !self.primary_keys.is_empty() {
            result.push_str(&format!("  Primary Key: {}\n", self.primary_keys.join(", ")));
        }

        if !self.foreign_keys.is_empty() {
            result.push_str("  Foreign Keys:\n");
            for fk in &self.foreign_keys {
                result.push_str(&format!(
                    "    {} -> {}({})\n",
                    fk.column, fk.referenced_table, fk.referenced_column
                ));
            }
        }

        result.push_str("  Columns:\n");
        for column in &self.columns {
            result.push_str(&format!("    {}\n", column));
        }

        result
    }
}

impl fmt::Display for TableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_schema())
    }
}

/// Normalized description of a database at a point in time.
///
/// Immutable once produced; a new discovery replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDocument {
    /// Vendor of the described database
    pub database_kind: DatabaseKind,
    /// Database name the discovery was filtered to
    pub database_name: String,
    /// Tables in vendor metadata order
    pub tables: Vec<TableDescriptor>,
    /// Discovery timestamp
    pub discovered_at: DateTime<Utc>,
}

impl SchemaDocument {
    pub fn new(database_kind: DatabaseKind, database_name: impl Into<String>, tables: Vec<TableDescriptor>) -> Self {
        Self {
            database_kind,
            database_name: database_name.into(),
            tables,
            discovered_at: Utc::now(),
        }
    }

    /// Get a table by name
    pub fn get_table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Get all table names
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Format the entire schema as context for SQL generation.
    ///
    /// This is the representation handed to the text-generation collaborator
    /// and printed by the REPL.
    pub fn format_for_prompt(&self) -> String {
        let mut result = String::new();

        result.push_str(&format!("Database: {} ({})\n", self.database_name, self.database_kind));
        result.push_str(&format!(
            "Discovered at: {}\n\n",
            self.discovered_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        result.push_str(&format!("Contains {} tables\n\n", self.tables.len()));

        for table in &self.tables {
            result.push_str(&table.format_schema());
            result.push('\n');
        }

        result
    }
}

impl fmt::Display for SchemaDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_for_prompt())
    }
}

/// A schema document held by the cache
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSchema {
    pub document: SchemaDocument,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CachedSchema {
    /// Whether the entry is still valid at `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}
