//! Folder snapshot repository — cached folder metadata and item counters.

use rusqlite::{params, Connection, Row};

use super::DatabaseError;

/// A cached folder snapshot row.
#[derive(Debug, Clone)]
pub struct FolderRow {
    pub id: String,
    pub account_id: String,
    pub name: String,
    pub folder_path: Option<String>,
    pub item_count: i64,
    pub updated_at: String,
}

impl FolderRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            account_id: row.get("account_id")?,
            name: row.get("name")?,
            folder_path: row.get("folder_path")?,
            item_count: row.get("item_count")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts or refreshes a folder snapshot, preserving its item counter.
pub fn upsert(conn: &Connection, folder: &FolderRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO folders (id, account_id, name, folder_path, item_count, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
           account_id = ?2, name = ?3, folder_path = ?4, updated_at = ?6",
        params![
            folder.id,
            folder.account_id,
            folder.name,
            folder.folder_path,
            folder.item_count,
            folder.updated_at,
        ],
    )?;
    Ok(())
}

/// Finds a folder snapshot by id.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<FolderRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM folders WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], FolderRow::from_row)?;
    match rows.next() {
        Some(Ok(row)) => Ok(Some(row)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

/// Adjusts a folder's cached item count by the given delta.
///
/// Inserted messages pass +1, removed messages -1. The counter never
/// goes below zero. Folder reassignment of an existing message is not
/// supported here.
pub fn adjust_item_count(
    conn: &Connection,
    folder_id: &str,
    delta: i64,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE folders SET item_count = MAX(item_count + ?2, 0), updated_at = ?3
         WHERE id = ?1",
        params![folder_id, delta, updated_at],
    )?;
    Ok(())
}
