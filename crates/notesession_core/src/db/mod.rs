//! Storage for the note hierarchy: one SQLite file holding the `notes`
//! table (titles, icons, parent links, sibling order and state flags).
//!
//! `open_db` hands `NoteStore` a connection that is already at the latest
//! schema; repositories refuse connections that skipped this step.
//! Schema upgrades run as named steps inside a single transaction and the
//! reached step is recorded in `PRAGMA user_version`. A file written by a
//! newer build is refused rather than downgraded.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Failures while opening or upgrading the note database.
#[derive(Debug)]
pub enum DbError {
    /// Connection setup or pragma failure outside a migration step.
    Sqlite(rusqlite::Error),
    /// One migration script failed; the whole upgrade was rolled back.
    Migration {
        version: u32,
        name: &'static str,
        source: rusqlite::Error,
    },
    /// The file was written by a newer build of this crate.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Migration {
                version,
                name,
                source,
            } => write!(f, "migration {version} ({name}) failed: {source}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "note database is at schema {db_version}, this build knows up to {latest_supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Migration { source, .. } => Some(source),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

#[cfg(test)]
mod tests {
    use super::DbError;
    use std::error::Error;

    #[test]
    fn migration_error_names_the_failed_step() {
        let err = DbError::Migration {
            version: 1,
            name: "init_notes",
            source: rusqlite::Error::InvalidQuery,
        };
        let message = err.to_string();
        assert!(message.starts_with("migration 1 (init_notes) failed:"), "{message}");
        assert!(err.source().is_some());
    }

    #[test]
    fn newer_schema_error_reports_both_versions() {
        let err = DbError::UnsupportedSchemaVersion {
            db_version: 9,
            latest_supported: 1,
        };
        assert_eq!(
            err.to_string(),
            "note database is at schema 9, this build knows up to 1"
        );
        assert!(err.source().is_none());
    }
}
