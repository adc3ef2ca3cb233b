//! Query module
//!
//! SQL rewriting, statement execution, uniform results and execution history.

pub mod executor;
pub mod history;
pub mod result;
pub mod saved;
pub mod sql;

// Re-exports
pub use executor::{ExecutionPlan, QueryExecutor};
pub use history::{ExecutionLog, ExecutionRecord, ExecutionStatus, MemoryExecutionLog, SqliteExecutionLog};
pub use result::{ProbeOutcome, QueryResponse, ResultColumn, ResultRow, StatementOutcome, TabularResult};
pub use saved::{InMemorySavedQueries, SavedQuery, SavedQuerySource, SqlGenerator};
pub use sql::{apply_limit, apply_parameters, apply_row_limit};
