//! Note repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide persistence APIs over the canonical `notes` table.
//! - Keep SQL details and sibling ordering inside the repository boundary.
//! - Re-validate hierarchy moves inside the committing transaction.
//!
//! # Invariants
//! - Child listing is deterministic: `sort_order ASC, note_uuid ASC`.
//! - A committed move never introduces a parent cycle.
//! - Rows are never deleted; trash is a flag.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::note::{Note, NoteDraft, NoteId, DEFAULT_NOTE_TITLE};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const NOTE_SELECT_SQL: &str = "SELECT
    note_uuid,
    title,
    icon,
    parent_uuid,
    sort_order,
    is_trashed,
    is_locked,
    is_offline_enabled,
    created_at,
    last_edited_at
FROM notes";

pub type RepoResult<T> = Result<T, RepoError>;

/// Errors from note repository operations.
#[derive(Debug)]
pub enum RepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Target note does not exist.
    NotFound(NoteId),
    /// Re-parenting would place a note under itself or a descendant.
    CycleDetected { note_id: NoteId, parent_id: NoteId },
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Persisted data cannot be converted to a valid note.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "note not found: {id}"),
            Self::CycleDetected { note_id, parent_id } => write!(
                f,
                "move would create cycle: note {note_id} under parent {parent_id}"
            ),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "note repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "note repository requires table `{table}`")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted note data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Boolean state flags that can be toggled on a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteFlag {
    Trashed,
    Locked,
    OfflineEnabled,
}

impl NoteFlag {
    fn column(self) -> &'static str {
        match self {
            Self::Trashed => "is_trashed",
            Self::Locked => "is_locked",
            Self::OfflineEnabled => "is_offline_enabled",
        }
    }
}

/// Repository interface for note records.
pub trait NoteRepository {
    /// Inserts one note from an already-normalized draft.
    fn insert_note(&self, draft: &NoteDraft) -> RepoResult<Note>;
    /// Loads one note by id, trashed or not.
    fn get_note(&self, id: NoteId) -> RepoResult<Option<Note>>;
    /// Loads the parent pointer of one note. Outer `None` means unknown id.
    fn parent_of(&self, id: NoteId) -> RepoResult<Option<Option<NoteId>>>;
    /// Lists every note, trashed included, in sibling order.
    fn list_all(&self) -> RepoResult<Vec<Note>>;
    /// Lists trashed notes, most recently edited first.
    fn list_trashed(&self) -> RepoResult<Vec<Note>>;
    /// Writes title and/or icon and bumps `last_edited_at`.
    fn update_metadata(
        &self,
        id: NoteId,
        title: Option<&str>,
        icon: Option<Option<&str>>,
    ) -> RepoResult<()>;
    /// Re-parents one note, appending it to the new sibling list.
    fn move_note(&self, id: NoteId, new_parent: Option<NoteId>) -> RepoResult<()>;
    /// Sets one state flag without touching `last_edited_at`.
    fn set_flag(&self, id: NoteId, flag: NoteFlag, value: bool) -> RepoResult<()>;
}

/// SQLite-backed note repository.
pub struct SqliteNoteRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteNoteRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_note_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl NoteRepository for SqliteNoteRepository<'_> {
    fn insert_note(&self, draft: &NoteDraft) -> RepoResult<Note> {
        let id = Uuid::new_v4();
        let sort_order = next_sort_order(self.conn, draft.parent_id)?;
        self.conn.execute(
            "INSERT INTO notes (
                note_uuid,
                title,
                icon,
                parent_uuid,
                sort_order,
                is_offline_enabled
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                id.to_string(),
                draft.title.as_deref().unwrap_or(DEFAULT_NOTE_TITLE),
                draft.icon.as_deref(),
                draft.parent_id.map(|value| value.to_string()),
                sort_order,
                bool_to_int(draft.is_offline_enabled),
            ],
        )?;
        load_note(self.conn, id)?.ok_or(RepoError::NotFound(id))
    }

    fn get_note(&self, id: NoteId) -> RepoResult<Option<Note>> {
        load_note(self.conn, id)
    }

    fn parent_of(&self, id: NoteId) -> RepoResult<Option<Option<NoteId>>> {
        load_parent(self.conn, id)
    }

    fn list_all(&self) -> RepoResult<Vec<Note>> {
        query_notes(
            self.conn,
            &format!("{NOTE_SELECT_SQL} ORDER BY sort_order ASC, note_uuid ASC;"),
        )
    }

    fn list_trashed(&self) -> RepoResult<Vec<Note>> {
        query_notes(
            self.conn,
            &format!(
                "{NOTE_SELECT_SQL} WHERE is_trashed = 1 ORDER BY last_edited_at DESC, note_uuid ASC;"
            ),
        )
    }

    fn update_metadata(
        &self,
        id: NoteId,
        title: Option<&str>,
        icon: Option<Option<&str>>,
    ) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut changed = 0;
        if let Some(title) = title {
            changed += tx.execute(
                "UPDATE notes
                 SET title = ?2,
                     last_edited_at = (strftime('%s', 'now') * 1000)
                 WHERE note_uuid = ?1;",
                params![id.to_string(), title],
            )?;
        }
        if let Some(icon) = icon {
            changed += tx.execute(
                "UPDATE notes
                 SET icon = ?2,
                     last_edited_at = (strftime('%s', 'now') * 1000)
                 WHERE note_uuid = ?1;",
                params![id.to_string(), icon],
            )?;
        }
        if changed == 0 && load_parent(&tx, id)?.is_none() {
            return Err(RepoError::NotFound(id));
        }
        tx.commit()?;
        Ok(())
    }

    fn move_note(&self, id: NoteId, new_parent: Option<NoteId>) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        if load_parent(&tx, id)?.is_none() {
            return Err(RepoError::NotFound(id));
        }
        if let Some(parent_id) = new_parent {
            // Re-validated inside the write transaction.
            if detect_cycle(id, parent_id, |cursor| load_parent(&tx, cursor))? {
                return Err(RepoError::CycleDetected {
                    note_id: id,
                    parent_id,
                });
            }
        }

        let sort_order = next_sort_order(&tx, new_parent)?;
        tx.execute(
            "UPDATE notes
             SET parent_uuid = ?2,
                 sort_order = ?3,
                 last_edited_at = (strftime('%s', 'now') * 1000)
             WHERE note_uuid = ?1;",
            params![
                id.to_string(),
                new_parent.map(|value| value.to_string()),
                sort_order,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn set_flag(&self, id: NoteId, flag: NoteFlag, value: bool) -> RepoResult<()> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE notes SET {} = ?2 WHERE note_uuid = ?1;",
                flag.column()
            ),
            params![id.to_string(), bool_to_int(value)],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }
        Ok(())
    }
}

/// Walks the ancestor chain of `candidate_parent` and reports whether
/// `note_id` appears on it (or the parent is the note itself).
///
/// `parent_of` returns `None` for unknown ids. An unknown candidate parent is
/// `NotFound`; a dangling pointer further up simply ends the chain. A chain
/// that revisits a node is already corrupt and is reported as a cycle.
pub fn detect_cycle<F>(
    note_id: NoteId,
    candidate_parent: NoteId,
    mut parent_of: F,
) -> RepoResult<bool>
where
    F: FnMut(NoteId) -> RepoResult<Option<Option<NoteId>>>,
{
    let mut visited = HashSet::new();
    let mut cursor = Some(candidate_parent);
    while let Some(current) = cursor {
        if current == note_id || !visited.insert(current) {
            return Ok(true);
        }
        cursor = match parent_of(current)? {
            Some(parent) => parent,
            None if current == candidate_parent => {
                return Err(RepoError::NotFound(candidate_parent));
            }
            None => None,
        };
    }
    Ok(false)
}

fn load_note(conn: &Connection, id: NoteId) -> RepoResult<Option<Note>> {
    let mut stmt = conn.prepare(&format!("{NOTE_SELECT_SQL} WHERE note_uuid = ?1;"))?;
    let mut rows = stmt.query([id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_note_row(row)?));
    }
    Ok(None)
}

fn load_parent(conn: &Connection, id: NoteId) -> RepoResult<Option<Option<NoteId>>> {
    let value: Option<Option<String>> = conn
        .query_row(
            "SELECT parent_uuid FROM notes WHERE note_uuid = ?1;",
            [id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    match value {
        None => Ok(None),
        Some(None) => Ok(Some(None)),
        Some(Some(text)) => Ok(Some(Some(parse_uuid(&text, "notes.parent_uuid")?))),
    }
}

fn query_notes(conn: &Connection, sql: &str) -> RepoResult<Vec<Note>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let mut notes = Vec::new();
    while let Some(row) = rows.next()? {
        notes.push(parse_note_row(row)?);
    }
    Ok(notes)
}

fn next_sort_order(conn: &Connection, parent: Option<NoteId>) -> RepoResult<i64> {
    let next = if let Some(parent) = parent {
        conn.query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1
             FROM notes
             WHERE parent_uuid = ?1;",
            [parent.to_string()],
            |row| row.get(0),
        )?
    } else {
        conn.query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1
             FROM notes
             WHERE parent_uuid IS NULL;",
            [],
            |row| row.get(0),
        )?
    };
    Ok(next)
}

fn parse_note_row(row: &Row<'_>) -> RepoResult<Note> {
    let id_text: String = row.get("note_uuid")?;
    let parent_id = row
        .get::<_, Option<String>>("parent_uuid")?
        .map(|value| parse_uuid(&value, "notes.parent_uuid"))
        .transpose()?;

    Ok(Note {
        id: parse_uuid(&id_text, "notes.note_uuid")?,
        title: row.get("title")?,
        icon: row.get("icon")?,
        parent_id,
        is_trashed: parse_bool(row, "is_trashed")?,
        is_locked: parse_bool(row, "is_locked")?,
        is_offline_enabled: parse_bool(row, "is_offline_enabled")?,
        last_edited_at: row.get("last_edited_at")?,
        created_at: row.get("created_at")?,
        sort_order: row.get("sort_order")?,
    })
}

fn parse_bool(row: &Row<'_>, column: &'static str) -> RepoResult<bool> {
    match row.get::<_, i64>(column)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid {column} value `{other}` in notes.{column}"
        ))),
    }
}

fn bool_to_int(value: bool) -> i64 {
    i64::from(value)
}

fn parse_uuid(value: &str, column: &'static str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn ensure_note_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = 'notes'
        );",
        [],
        |row| row.get(0),
    )?;
    if exists != 1 {
        return Err(RepoError::MissingRequiredTable("notes"));
    }
    Ok(())
}
