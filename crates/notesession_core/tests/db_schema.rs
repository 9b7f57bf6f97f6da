use notesession_core::db::migrations::latest_version;
use notesession_core::db::{open_db, open_db_in_memory};
use notesession_core::{NoteStore, RepoError, SessionConfig, SqliteNoteRepository, StoreError};
use rusqlite::Connection;

#[test]
fn open_db_creates_notes_table_with_expected_columns() {
    let conn = open_db_in_memory().unwrap();
    assert_eq!(schema_version(&conn), latest_version());

    let mut stmt = conn.prepare("PRAGMA table_info(notes);").unwrap();
    let columns: Vec<String> = stmt
        .query_map([], |row| row.get(1))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    for expected in [
        "note_uuid",
        "title",
        "icon",
        "parent_uuid",
        "sort_order",
        "is_trashed",
        "is_locked",
        "is_offline_enabled",
        "created_at",
        "last_edited_at",
    ] {
        assert!(columns.iter().any(|name| name == expected), "missing {expected}");
    }
}

#[test]
fn flag_columns_reject_non_boolean_values() {
    let conn = open_db_in_memory().unwrap();
    let result = conn.execute(
        "INSERT INTO notes (note_uuid, is_trashed) VALUES ('bad-flag', 2);",
        [],
    );
    assert!(result.is_err());
}

#[test]
fn reopening_a_file_keeps_schema_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notesession.db");

    drop(open_db(&path).unwrap());
    let conn = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn), latest_version());
}

#[test]
fn repository_rejects_unmigrated_connection() {
    let conn = Connection::open_in_memory().unwrap();
    match SqliteNoteRepository::try_new(&conn) {
        Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        }) => {
            assert_eq!(expected_version, latest_version());
            assert_eq!(actual_version, 0);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("unmigrated connection must be rejected"),
    }

    let result = NoteStore::new(conn, &SessionConfig::default());
    assert!(matches!(
        result,
        Err(StoreError::Repo(RepoError::UninitializedConnection { .. }))
    ));
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}
