//! Command handlers for CLI
//!
//! This module implements all `/` commands for the Query Hub CLI.

use crate::cli::render;
use crate::config::SharedState;
use crate::database::datasource::DataSourceConnection;
use crate::error::{QueryHubError, Result};
use crate::hub::QueryRequest;

/// Executions shown by `/history`
const HISTORY_LIMIT: usize = 20;

/// Command types
#[derive(Debug, Clone, PartialEq)]
pub enum CommandType {
    /// List data sources
    Sources,
    /// Select the current data source
    Use { source: String },
    /// Test connectivity
    Probe { source: Option<String> },
    /// Show the schema, or one table of it
    Schema { source: Option<String>, table: Option<String> },
    /// Drop the cached schema
    Refresh { source: Option<String> },
    /// Run SQL against a named data source
    Run { source: String, sql: String },
    /// Recent executions
    History,
    /// Show help message
    Help,
    /// Exit the application
    Quit,
    /// Bare SQL against the current data source
    Sql { text: String },
}

/// Parsed command
#[derive(Debug, Clone)]
pub struct Command {
    /// The type of command
    pub command_type: CommandType,
}

fn arg(parts: &[&str], index: usize) -> Option<String> {
    parts.get(index).map(|s| s.to_string())
}

impl Command {
    /// Parse a command from user input
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();

        // Check if it's a command (starts with /)
        if !input.starts_with('/') {
            return Ok(Command {
                command_type: CommandType::Sql {
                    text: input.to_string(),
                },
            });
        }

        let parts: Vec<&str> = input.split_whitespace().collect();
        let cmd = parts[0];

        let command_type = match cmd {
            "/sources" => CommandType::Sources,
            "/use" => match arg(&parts, 1) {
                Some(source) => CommandType::Use { source },
                None => {
                    return Err(QueryHubError::InvalidCommandSyntax {
                        command: cmd.to_string(),
                        expected: "/use <source>".to_string(),
                    })
                }
            },
            "/probe" => CommandType::Probe { source: arg(&parts, 1) },
            "/schema" => CommandType::Schema {
                source: arg(&parts, 1),
                table: arg(&parts, 2),
            },
            "/refresh" => CommandType::Refresh { source: arg(&parts, 1) },
            "/run" => {
                // The SQL keeps its original spacing
                let rest = input[cmd.len()..].trim_start();
                match rest.split_once(char::is_whitespace) {
                    Some((source, sql)) if !sql.trim().is_empty() => CommandType::Run {
                        source: source.to_string(),
                        sql: sql.trim().to_string(),
                    },
                    _ => {
                        return Err(QueryHubError::InvalidCommandSyntax {
                            command: cmd.to_string(),
                            expected: "/run <source> <sql>".to_string(),
                        })
                    }
                }
            }
            "/history" => CommandType::History,
            "/help" => CommandType::Help,
            "/quit" | "/exit" => CommandType::Quit,
            _ => return Err(QueryHubError::UnknownCommand(cmd.to_string())),
        };

        Ok(Command { command_type })
    }
}

/// Resolve a named source, falling back to the current one
async fn resolve_source(state: &SharedState, name: Option<&str>) -> Result<DataSourceConnection> {
    let state = state.read().await;
    match name {
        Some(name) => state.hub.find_data_source(name, &state.principal).await,
        None => state.current_source.clone().ok_or_else(|| {
            QueryHubError::InvalidInput("No data source selected. Use /use <source> first.".to_string())
        }),
    }
}

async fn run_sql(state: &SharedState, source: &DataSourceConnection, sql: &str) -> Result<String> {
    let (hub, principal) = {
        let state = state.read().await;
        (state.hub.clone(), state.principal.clone())
    };
    let response = hub
        .execute_query(QueryRequest::new(source.id, sql), &principal)
        .await?;
    Ok(render::render_response(&response))
}

/// Handle a command and return the result message
pub async fn handle_command(command: &Command, state: SharedState) -> Result<String> {
    match &command.command_type {
        CommandType::Sources => {
            let state = state.read().await;
            let sources = state.hub.list_data_sources(&state.principal).await?;
            Ok(render::render_sources(&sources, state.current_source_name()))
        }
        CommandType::Use { source } => {
            let found = resolve_source(&state, Some(source)).await?;
            let message = format!("✓ Using {} ({})", found.name, found.kind);
            state.write().await.set_current_source(found);
            Ok(message)
        }
        CommandType::Probe { source } => {
            let found = resolve_source(&state, source.as_deref()).await?;
            let state = state.read().await;
            let outcome = state.hub.probe_connection(&found.id, &state.principal).await?;
            if outcome.success {
                Ok(format!("✓ {}: {} ({} ms)", found.name, outcome.message, outcome.elapsed_ms))
            } else {
                Ok(format!("✗ {}: {}", found.name, outcome.message))
            }
        }
        CommandType::Schema { source, table } => {
            let found = resolve_source(&state, source.as_deref()).await?;
            let state = state.read().await;
            let document = state.hub.get_schema(&found.id, &state.principal).await?;
            match table {
                Some(name) => document
                    .get_table(name)
                    .map(render::render_table)
                    .ok_or_else(|| QueryHubError::NotFound(format!("Table {} in {}", name, found.name))),
                None => Ok(render::render_schema(&document)),
            }
        }
        CommandType::Refresh { source } => {
            let found = resolve_source(&state, source.as_deref()).await?;
            let state = state.read().await;
            state.hub.clear_schema_cache(&found.id, &state.principal).await?;
            Ok(format!("✓ Schema cache cleared for {}", found.name))
        }
        CommandType::Run { source, sql } => {
            let found = resolve_source(&state, Some(source)).await?;
            run_sql(&state, &found, sql).await
        }
        CommandType::Sql { text } => {
            let found = resolve_source(&state, None).await?;
            run_sql(&state, &found, text).await
        }
        CommandType::History => {
            let state = state.read().await;
            let records = state.hub.recent_executions(&state.principal, HISTORY_LIMIT).await?;
            Ok(render::render_history(&records))
        }
        CommandType::Help => {
            let help = r#"
Query Hub Commands

Data Sources:
  /sources                    List configured data sources
  /use <source>               Select the data source bare SQL runs against
  /probe [source]             Test connectivity

Schema:
  /schema [source] [table]    Show the (cached) schema or one table
  /refresh [source]           Drop the cached schema

Queries:
  /run <source> <sql>         Run SQL against a data source
  /history                    Show recent executions

Session:
  /help                       Show this help message
  /quit, /exit                Exit Query Hub

Any text without a / prefix runs as SQL against the current data source.

Examples:
  /use warehouse
  /schema warehouse orders
  SELECT * FROM orders WHERE status = 'open'
"#;
            Ok(help.to_string())
        }
        CommandType::Quit => Ok("Goodbye!".to_string()),
    }
}

/// Format an error for display
pub fn format_error(error: &QueryHubError) -> String {
    format!("Error: {}", error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sources_command() {
        let cmd = Command::parse("/sources").unwrap();
        assert_eq!(cmd.command_type, CommandType::Sources);
    }

    #[test]
    fn test_parse_use_command() {
        let cmd = Command::parse("/use warehouse").unwrap();
        assert_eq!(
            cmd.command_type,
            CommandType::Use {
                source: "warehouse".to_string()
            }
        );
    }

    #[test]
    fn test_parse_optional_source() {
        let cmd = Command::parse("/probe").unwrap();
        assert_eq!(cmd.command_type, CommandType::Probe { source: None });

        let cmd = Command::parse("/refresh crm").unwrap();
        assert_eq!(
            cmd.command_type,
            CommandType::Refresh {
                source: Some("crm".to_string())
            }
        );
    }

    #[test]
    fn test_parse_schema_command() {
        let cmd = Command::parse("/schema warehouse orders").unwrap();
        assert_eq!(
            cmd.command_type,
            CommandType::Schema {
                source: Some("warehouse".to_string()),
                table: Some("orders".to_string())
            }
        );
    }

    #[test]
    fn test_parse_run_keeps_sql_intact() {
        let cmd = Command::parse("/run crm SELECT  name FROM t WHERE x = 'a b'").unwrap();
        assert_eq!(
            cmd.command_type,
            CommandType::Run {
                source: "crm".to_string(),
                sql: "SELECT  name FROM t WHERE x = 'a b'".to_string()
            }
        );
    }

    #[test]
    fn test_parse_quit_command() {
        let cmd1 = Command::parse("/quit").unwrap();
        assert_eq!(cmd1.command_type, CommandType::Quit);

        let cmd2 = Command::parse("/exit").unwrap();
        assert_eq!(cmd2.command_type, CommandType::Quit);
    }

    #[test]
    fn test_parse_bare_sql() {
        let cmd = Command::parse("SELECT 1").unwrap();
        assert_eq!(
            cmd.command_type,
            CommandType::Sql {
                text: "SELECT 1".to_string()
            }
        );
    }

    #[test]
    fn test_parse_invalid_command() {
        let result = Command::parse("/invalid");
        assert!(matches!(result, Err(QueryHubError::UnknownCommand(_))));
    }

    #[test]
    fn test_parse_missing_args() {
        assert!(Command::parse("/use").is_err());
        assert!(Command::parse("/run").is_err());
        assert!(Command::parse("/run crm").is_err());
    }
}
