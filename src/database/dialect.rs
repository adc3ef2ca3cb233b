//! Database dialects
//!
//! Every vendor-specific detail the engine needs before it has a connection
//! lives in one table keyed by [`DatabaseKind`]: display name, default port,
//! connection-string template and the way a row limit is expressed.

use crate::error::QueryHubError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Supported database vendors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    /// MySQL/MariaDB
    MySql,
    /// PostgreSQL
    PostgreSql,
    /// Microsoft SQL Server
    SqlServer,
    /// Oracle Database
    Oracle,
}

/// How a dialect expresses "at most n rows"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitStyle {
    /// Trailing `LIMIT n`
    Limit,
    /// Trailing `FETCH FIRST n ROWS ONLY`
    FetchFirst,
    /// No textual rewrite; the executor stops reading after n rows
    RowCapOnly,
}

/// Static per-vendor description
#[derive(Debug)]
pub struct DialectProfile {
    pub name: &'static str,
    pub default_port: u16,
    /// Template with `{host}`, `{port}`, `{database}` and `{tls}` placeholders
    pub template: &'static str,
    pub tls_on: &'static str,
    pub tls_off: &'static str,
    /// Separator placed before the first extra parameter
    pub params_lead: &'static str,
    /// Separator placed between extra parameters
    pub params_join: &'static str,
    pub limit_style: LimitStyle,
}

const MYSQL: DialectProfile = DialectProfile {
    name: "MySQL",
    default_port: 3306,
    template: "mysql://{host}:{port}/{database}?timezone=%2B00:00&ssl-mode={tls}",
    tls_on: "REQUIRED",
    tls_off: "DISABLED",
    params_lead: "&",
    params_join: "&",
    limit_style: LimitStyle::Limit,
};

const POSTGRESQL: DialectProfile = DialectProfile {
    name: "PostgreSQL",
    default_port: 5432,
    template: "postgres://{host}:{port}/{database}?sslmode={tls}",
    tls_on: "require",
    tls_off: "disable",
    params_lead: "&",
    params_join: "&",
    limit_style: LimitStyle::Limit,
};

const SQLSERVER: DialectProfile = DialectProfile {
    name: "SQL Server",
    default_port: 1433,
    template: "jdbc:sqlserver://{host}:{port};databaseName={database};encrypt={tls}",
    tls_on: "true",
    tls_off: "false",
    params_lead: ";",
    params_join: ";",
    limit_style: LimitStyle::RowCapOnly,
};

const ORACLE: DialectProfile = DialectProfile {
    name: "Oracle",
    default_port: 1521,
    template: "{tls}{host}:{port}/{database}",
    tls_on: "tcps://",
    tls_off: "//",
    params_lead: "?",
    params_join: "&",
    limit_style: LimitStyle::FetchFirst,
};

impl DatabaseKind {
    pub const ALL: [DatabaseKind; 4] = [
        DatabaseKind::MySql,
        DatabaseKind::PostgreSql,
        DatabaseKind::SqlServer,
        DatabaseKind::Oracle,
    ];

    /// The dialect table entry for this vendor
    pub fn profile(self) -> &'static DialectProfile {
        match self {
            DatabaseKind::MySql => &MYSQL,
            DatabaseKind::PostgreSql => &POSTGRESQL,
            DatabaseKind::SqlServer => &SQLSERVER,
            DatabaseKind::Oracle => &ORACLE,
        }
    }

    /// Port used when a data source is created without one
    pub fn default_port(self) -> u16 {
        self.profile().default_port
    }

    pub fn name(self) -> &'static str {
        self.profile().name
    }

    pub fn limit_style(self) -> LimitStyle {
        self.profile().limit_style
    }
}

impl FromStr for DatabaseKind {
    type Err = QueryHubError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(DatabaseKind::MySql),
            "postgresql" | "postgres" | "pg" => Ok(DatabaseKind::PostgreSql),
            "sqlserver" | "mssql" | "sql server" => Ok(DatabaseKind::SqlServer),
            "oracle" => Ok(DatabaseKind::Oracle),
            _ => Err(QueryHubError::UnsupportedDatabaseType(s.to_string())),
        }
    }
}

impl std::fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Build the connection string for a vendor.
///
/// Credentials are never part of the string; drivers attach them separately.
pub fn connection_string(kind: DatabaseKind, host: &str, port: u16, database: &str, tls: bool) -> String {
    let profile = kind.profile();
    profile
        .template
        .replace("{host}", host)
        .replace("{port}", &port.to_string())
        .replace("{database}", database)
        .replace("{tls}", if tls { profile.tls_on } else { profile.tls_off })
}

/// Append free-form driver parameters using the vendor's separators.
pub fn append_params(kind: DatabaseKind, base: &str, params: &BTreeMap<String, String>) -> String {
    if params.is_empty() {
        return base.to_string();
    }
    let profile = kind.profile();
    let joined = params
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(profile.params_join);
    format!("{}{}{}", base, profile.params_lead, joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mysql_connection_string() {
        let url = connection_string(DatabaseKind::MySql, "db.local", 3307, "shop", true);
        assert_eq!(url, "mysql://db.local:3307/shop?timezone=%2B00:00&ssl-mode=REQUIRED");

        let url = connection_string(DatabaseKind::MySql, "db.local", 3307, "shop", false);
        assert!(url.contains("db.local:3307/shop"));
        assert!(url.contains("timezone="));
        assert!(url.ends_with("ssl-mode=DISABLED"));
    }

    #[test]
    fn test_postgres_connection_string() {
        assert_eq!(
            connection_string(DatabaseKind::PostgreSql, "pg", 5432, "analytics", true),
            "postgres://pg:5432/analytics?sslmode=require"
        );
        assert_eq!(
            connection_string(DatabaseKind::PostgreSql, "pg", 5432, "analytics", false),
            "postgres://pg:5432/analytics?sslmode=disable"
        );
    }

    #[test]
    fn test_sqlserver_connection_string() {
        assert_eq!(
            connection_string(DatabaseKind::SqlServer, "mssql", 1433, "erp", true),
            "jdbc:sqlserver://mssql:1433;databaseName=erp;encrypt=true"
        );
    }

    #[test]
    fn test_oracle_connection_string() {
        assert_eq!(
            connection_string(DatabaseKind::Oracle, "ora", 1521, "XEPDB1", false),
            "//ora:1521/XEPDB1"
        );
        assert_eq!(
            connection_string(DatabaseKind::Oracle, "ora", 2484, "XEPDB1", true),
            "tcps://ora:2484/XEPDB1"
        );
    }

    #[test]
    fn test_connection_string_is_deterministic() {
        for kind in DatabaseKind::ALL {
            let first = connection_string(kind, "h", 1, "d", true);
            let second = connection_string(kind, "h", 1, "d", true);
            assert_eq!(first, second);
            assert!(first.contains("h:1"), "{} lost host:port", kind);
            assert!(first.contains('d'));
        }
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(DatabaseKind::MySql.default_port(), 3306);
        assert_eq!(DatabaseKind::PostgreSql.default_port(), 5432);
        assert_eq!(DatabaseKind::SqlServer.default_port(), 1433);
        assert_eq!(DatabaseKind::Oracle.default_port(), 1521);
    }

    #[test]
    fn test_append_params() {
        let mut params = BTreeMap::new();
        params.insert("application_name".to_string(), "hub".to_string());
        params.insert("connect_timeout".to_string(), "5".to_string());

        let base = connection_string(DatabaseKind::PostgreSql, "pg", 5432, "a", false);
        assert_eq!(
            append_params(DatabaseKind::PostgreSql, &base, &params),
            "postgres://pg:5432/a?sslmode=disable&application_name=hub&connect_timeout=5"
        );

        let base = connection_string(DatabaseKind::Oracle, "ora", 1521, "svc", false);
        assert_eq!(
            append_params(DatabaseKind::Oracle, &base, &params),
            "//ora:1521/svc?application_name=hub&connect_timeout=5"
        );

        let base = connection_string(DatabaseKind::SqlServer, "ms", 1433, "erp", false);
        assert!(append_params(DatabaseKind::SqlServer, &base, &params).ends_with(";application_name=hub;connect_timeout=5"));

        assert_eq!(append_params(DatabaseKind::MySql, "x", &BTreeMap::new()), "x");
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("postgres".parse::<DatabaseKind>().unwrap(), DatabaseKind::PostgreSql);
        assert_eq!("MySQL".parse::<DatabaseKind>().unwrap(), DatabaseKind::MySql);
        assert_eq!("mssql".parse::<DatabaseKind>().unwrap(), DatabaseKind::SqlServer);
        assert_eq!("oracle".parse::<DatabaseKind>().unwrap(), DatabaseKind::Oracle);
        assert!("sqlite".parse::<DatabaseKind>().is_err());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(DatabaseKind::SqlServer.to_string(), "SQL Server");
        assert_eq!(DatabaseKind::PostgreSql.to_string(), "PostgreSQL");
    }

    #[test]
    fn test_limit_styles() {
        assert_eq!(DatabaseKind::MySql.limit_style(), LimitStyle::Limit);
        assert_eq!(DatabaseKind::Oracle.limit_style(), LimitStyle::FetchFirst);
        assert_eq!(DatabaseKind::SqlServer.limit_style(), LimitStyle::RowCapOnly);
    }
}
