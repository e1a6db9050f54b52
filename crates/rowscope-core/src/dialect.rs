//! Placeholder dialects.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder style used by a driver for bound arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// `?` for every argument (MySQL, SQLite and friends).
    #[default]
    QuestionMark,
    /// `$1`, `$2`, ... (Postgres family).
    Dollar,
    /// `@p1`, `@p2`, ... (SQL Server family).
    AtP,
}

impl Dialect {
    /// Select the dialect from a driver name as reported by a connection
    /// wrapper (`"postgres"`, `"pgx"`, `"sqlite3"`, `"sqlserver"`, ...).
    ///
    /// Unrecognized names fall back to [`Dialect::QuestionMark`].
    pub fn from_driver_name(driver: &str) -> Self {
        let driver = driver.trim().to_ascii_lowercase();
        if driver.starts_with("postgres")
            || driver.starts_with("pg")
            || driver.contains("cockroach")
            || driver == "redshift"
        {
            Dialect::Dollar
        } else if driver.contains("sqlserver")
            || driver.contains("mssql")
            || driver.contains("azuresql")
        {
            Dialect::AtP
        } else {
            Dialect::QuestionMark
        }
    }

    /// Render the placeholder for the 1-based argument position `n`.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::QuestionMark => "?".to_string(),
            Dialect::Dollar => format!("${}", n),
            Dialect::AtP => format!("@p{}", n),
        }
    }

    /// Whether placeholders carry explicit argument numbers.
    pub fn is_numbered(&self) -> bool {
        !matches!(self, Dialect::QuestionMark)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::QuestionMark => write!(f, "question_mark"),
            Dialect::Dollar => write!(f, "dollar"),
            Dialect::AtP => write!(f, "at_p"),
        }
    }
}
