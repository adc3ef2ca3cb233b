//! Terminal rendering of hub results

use crate::database::datasource::DataSourceConnection;
use crate::database::schema::{SchemaDocument, TableDescriptor};
use crate::query::history::ExecutionRecord;
use crate::query::result::QueryResponse;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use serde_json::Value;

/// Longest SQL snippet shown in the history listing
const SQL_PREVIEW_CHARS: usize = 60;

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn preview(sql: &str) -> String {
    let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= SQL_PREVIEW_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(SQL_PREVIEW_CHARS).collect();
    format!("{}...", cut)
}

/// Render an execution response: the rows, an affected count or the error
pub fn render_response(response: &QueryResponse) -> String {
    if !response.is_success() {
        return format!(
            "✗ {} after {} ms: {}",
            response.status,
            response.elapsed_ms,
            response.error_message.as_deref().unwrap_or("no details")
        );
    }

    let columns = response.columns.as_deref().unwrap_or_default();
    if columns.is_empty() {
        return format!(
            "✓ {} row(s) affected ({} ms)",
            response.rows_returned, response.elapsed_ms
        );
    }

    let mut table = new_table();
    table.set_header(columns.iter().map(|c| c.name.clone()));
    for row in response.rows.as_deref().unwrap_or_default() {
        table.add_row(
            columns
                .iter()
                .map(|c| row.get(&c.name).map(cell).unwrap_or_default()),
        );
    }

    format!(
        "{}\n✓ {} row(s) returned ({} ms)",
        table, response.rows_returned, response.elapsed_ms
    )
}

pub fn render_sources(sources: &[DataSourceConnection], current: Option<&str>) -> String {
    if sources.is_empty() {
        return "No data sources configured.".to_string();
    }

    let mut table = new_table();
    table.set_header(vec!["", "Name", "Kind", "Address", "Status", "Last tested"]);
    for source in sources {
        let marker = if Some(source.name.as_str()) == current { "*" } else { "" };
        table.add_row(vec![
            marker.to_string(),
            source.name.clone(),
            source.kind.to_string(),
            format!("{}:{}/{}", source.host, source.port, source.database),
            source.status.to_string(),
            source
                .last_tested_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "never".to_string()),
        ]);
    }
    table.to_string()
}

/// One line per table with column and key counts
pub fn render_schema(document: &SchemaDocument) -> String {
    let mut table = new_table();
    table.set_header(vec!["Table", "Kind", "Columns", "Primary key", "Foreign keys"]);
    for t in &document.tables {
        table.add_row(vec![
            t.name.clone(),
            t.kind.clone(),
            t.columns.len().to_string(),
            t.primary_keys.join(", "),
            t.foreign_keys.len().to_string(),
        ]);
    }
    format!(
        "Database: {} ({}), {} table(s)\n{}",
        document.database_name,
        document.database_kind,
        document.tables.len(),
        table
    )
}

pub fn render_table(descriptor: &TableDescriptor) -> String {
    let mut table = new_table();
    table.set_header(vec!["Column", "Type", "Nullable", "Default", "Key"]);
    for column in &descriptor.columns {
        let mut keys = Vec::new();
        if descriptor.primary_keys.contains(&column.name) {
            keys.push("PK".to_string());
        }
        for fk in descriptor.foreign_keys.iter().filter(|fk| fk.column == column.name) {
            keys.push(format!("FK → {}.{}", fk.referenced_table, fk.referenced_column));
        }

        let type_name = match column.size {
            Some(size) => format!("{}({})", column.type_name, size),
            None => column.type_name.clone(),
        };
        table.add_row(vec![
            column.name.clone(),
            type_name,
            if column.nullable { "YES" } else { "NO" }.to_string(),
            column.default_value.clone().unwrap_or_default(),
            keys.join(", "),
        ]);
    }
    format!("{} ({})\n{}", descriptor.name, descriptor.kind, table)
}

pub fn render_history(records: &[ExecutionRecord]) -> String {
    if records.is_empty() {
        return "No executions yet.".to_string();
    }

    let mut table = new_table();
    table.set_header(vec!["Executed at", "Status", "Rows", "ms", "SQL"]);
    for record in records {
        table.add_row(vec![
            record.executed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            record.status.to_string(),
            record.rows.to_string(),
            record.elapsed_ms.to_string(),
            preview(&record.sql_text),
        ]);
    }
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::dialect::DatabaseKind;
    use crate::database::schema::{ColumnDescriptor, ForeignKeyDescriptor};
    use crate::query::history::ExecutionStatus;
    use crate::query::result::ResultColumn;
    use serde_json::json;
    use uuid::Uuid;

    fn response(status: ExecutionStatus) -> QueryResponse {
        QueryResponse {
            execution_id: Uuid::new_v4(),
            status,
            columns: None,
            rows: None,
            rows_returned: 0,
            elapsed_ms: 12,
            error_message: None,
        }
    }

    #[test]
    fn test_render_rows() {
        let mut row = serde_json::Map::new();
        row.insert("id".to_string(), json!(1));
        row.insert("email".to_string(), Value::Null);

        let mut ok = response(ExecutionStatus::Success);
        ok.columns = Some(vec![
            ResultColumn::new("id", "INT4", false),
            ResultColumn::new("email", "TEXT", true),
        ]);
        ok.rows = Some(vec![row]);
        ok.rows_returned = 1;

        let out = render_response(&ok);
        assert!(out.contains("email"));
        assert!(out.contains("NULL"));
        assert!(out.contains("1 row(s) returned"));
    }

    #[test]
    fn test_render_affected_and_failure() {
        let mut affected = response(ExecutionStatus::Success);
        affected.columns = Some(Vec::new());
        affected.rows = Some(Vec::new());
        affected.rows_returned = 3;
        assert!(render_response(&affected).contains("3 row(s) affected"));

        let mut failed = response(ExecutionStatus::TimedOut);
        failed.error_message = Some("Query timed out after 30s".to_string());
        let out = render_response(&failed);
        assert!(out.contains("TIMEOUT"));
        assert!(out.contains("timed out"));
    }

    #[test]
    fn test_render_table_marks_keys() {
        let mut orders = TableDescriptor::new("orders", "TABLE");
        orders.columns.push(ColumnDescriptor {
            name: "id".to_string(),
            type_name: "int".to_string(),
            size: Some(10),
            nullable: false,
            default_value: None,
        });
        orders.columns.push(ColumnDescriptor {
            name: "customer_id".to_string(),
            type_name: "int".to_string(),
            size: Some(10),
            nullable: true,
            default_value: None,
        });
        orders.primary_keys.push("id".to_string());
        orders.foreign_keys.push(ForeignKeyDescriptor {
            column: "customer_id".to_string(),
            referenced_table: "customers".to_string(),
            referenced_column: "id".to_string(),
        });

        let out = render_table(&orders);
        assert!(out.contains("PK"));
        assert!(out.contains("customers.id"));

        let document = SchemaDocument::new(DatabaseKind::MySql, "shop", vec![orders]);
        assert!(render_schema(&document).contains("1 table(s)"));
    }

    #[test]
    fn test_preview_truncates() {
        let long = format!("SELECT {} FROM t", "a, ".repeat(40));
        assert!(preview(&long).ends_with("..."));
        assert_eq!(preview("SELECT\n  1"), "SELECT 1");
    }
}
