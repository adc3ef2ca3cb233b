//! REPL implementation
//!
//! This module implements the interactive Read-Eval-Print Loop for Query Hub.

use crate::cli::commands::{self, format_error, Command};
use crate::config::SharedState;
use crate::error::{QueryHubError, Result};
use rustyline::completion::Completer;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::Context;
use rustyline::Helper;
use rustyline::{CompletionType, Config, Editor};
use std::path::PathBuf;
use tracing::debug;

const COMMANDS: &[&str] = &[
    "/sources", "/use", "/probe", "/schema", "/refresh", "/run", "/history", "/help", "/quit", "/exit",
];

/// Query Hub command completer
struct QueryHubCompleter;

impl Completer for QueryHubCompleter {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        _pos: usize,
        _ctx: &Context<'_>,
    ) -> std::result::Result<(usize, Vec<String>), ReadlineError> {
        // Only the command word completes
        if line.starts_with('/') && !line.contains(char::is_whitespace) {
            let matches: Vec<String> = COMMANDS
                .iter()
                .filter(|cmd| cmd.starts_with(line))
                .map(|s| s.to_string())
                .collect();
            Ok((0, matches))
        } else {
            Ok((0, vec![]))
        }
    }
}

impl Hinter for QueryHubCompleter {
    type Hint = String;
}

impl Highlighter for QueryHubCompleter {}

impl Validator for QueryHubCompleter {}

impl Helper for QueryHubCompleter {}

/// Query Hub REPL
pub struct Repl {
    /// The rustyline editor
    editor: Editor<QueryHubCompleter, DefaultHistory>,
    /// Whether the REPL should continue running
    running: bool,
    /// Shared application state
    state: SharedState,
    history_path: PathBuf,
}

impl Repl {
    /// Create a new REPL instance
    pub fn new(state: SharedState) -> Result<Self> {
        let config = Config::builder()
            .history_ignore_space(true)
            .completion_type(CompletionType::List)
            .auto_add_history(true)
            .build();

        let mut editor = Editor::<QueryHubCompleter, DefaultHistory>::with_config(config).map_err(|e| {
            QueryHubError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to initialize editor: {}", e),
            ))
        })?;

        editor.set_helper(Some(QueryHubCompleter));

        let history_path = dirs::home_dir()
            .map(|p| p.join(".query-hub").join("history"))
            .unwrap_or_else(|| ".query-hub-history".into());

        if let Err(e) = editor.load_history(&history_path) {
            // History file doesn't exist or is unreadable, that's fine
            debug!(error = %e, "could not load history");
        }

        Ok(Self {
            editor,
            running: true,
            state,
            history_path,
        })
    }

    fn prompt(&self, current: Option<&str>) -> String {
        match current {
            Some(name) => format!("{}> ", name),
            None => "> ".to_string(),
        }
    }

    /// Run the REPL loop
    pub async fn run(&mut self) -> Result<()> {
        self.print_welcome().await;

        while self.running {
            let prompt = {
                let state = self.state.read().await;
                self.prompt(state.current_source_name())
            };

            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let line = line.trim();

                    if line.is_empty() {
                        continue;
                    }

                    match Command::parse(line) {
                        Ok(command) => {
                            self.handle_command(command).await;
                        }
                        Err(e) => {
                            println!("{}", format_error(&e));
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!();
                    self.running = false;
                }
                Err(err) => {
                    println!("Error: {:?}", err);
                    self.running = false;
                }
            }
        }

        self.save_history();
        Ok(())
    }

    fn save_history(&mut self) {
        if let Some(parent) = self.history_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = self.editor.save_history(&self.history_path) {
            debug!(error = %e, "could not save history");
        }
    }

    async fn print_welcome(&self) {
        println!();
        println!("Query Hub v{}", env!("CARGO_PKG_VERSION"));
        println!("MySQL · PostgreSQL · SQL Server · Oracle");
        println!();
        let state = self.state.read().await;
        if let Some(name) = state.current_source_name() {
            println!("Current data source: {}", name);
        }
        println!("Type /help for available commands, or SQL to run it.");
        println!();
    }

    /// Handle a command
    async fn handle_command(&mut self, command: Command) {
        if command.command_type == commands::CommandType::Quit {
            self.running = false;
        }

        match commands::handle_command(&command, self.state.clone()).await {
            Ok(msg) => {
                println!("{}", msg);
            }
            Err(e) => {
                println!("{}", format_error(&e));
            }
        }
    }
}
