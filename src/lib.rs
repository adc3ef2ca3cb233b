//! Query Hub Library
//!
//! Vendor-agnostic query execution and schema discovery for MySQL,
//! PostgreSQL, SQL Server and Oracle. [`hub::QueryHub`] is the entry point.
//! The interactive binary is in src/main.rs.

pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod hub;
pub mod query;
pub mod storage;

pub use error::{QueryHubError, Result};
pub use hub::{QueryHub, QueryHubBuilder, QueryRequest};
