//! Mail item repository — archived mail metadata in `mail_items`.
//!
//! Rows are written by the extraction workers as messages are fetched.
//! The table doubles as the lookup source for resolving a message task's
//! final mail id from its provisional id. Inserting or deleting a row
//! adjusts the owning folder's cached item counter.

use rusqlite::{params, Connection, Row};

use super::{folder_repo, DatabaseError};

/// A raw archived mail row.
#[derive(Debug, Clone)]
pub struct MailItemRow {
    /// Final mail id assigned by the mail store.
    pub id: String,
    /// Provisional id the message was discovered under.
    pub message_id: String,
    pub subject: Option<String>,
    pub sent_time: Option<String>,
    pub sender_name: Option<String>,
    pub folder_id: Option<String>,
    pub unread: bool,
    pub has_attachments: bool,
    pub size: i64,
    pub processed_at: String,
}

impl MailItemRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            message_id: row.get("message_id")?,
            subject: row.get("subject")?,
            sent_time: row.get("sent_time")?,
            sender_name: row.get("sender_name")?,
            folder_id: row.get("folder_id")?,
            unread: row.get("unread")?,
            has_attachments: row.get("has_attachments")?,
            size: row.get("size")?,
            processed_at: row.get("processed_at")?,
        })
    }
}

/// Inserts an archived mail row and increments its folder counter.
///
/// Re-inserting an existing id replaces the row without double-counting.
pub fn insert(conn: &Connection, mail: &MailItemRow) -> Result<(), DatabaseError> {
    let existing = find_by_id(conn, &mail.id)?;

    conn.execute(
        "INSERT OR REPLACE INTO mail_items (id, message_id, subject, sent_time, sender_name,
         folder_id, unread, has_attachments, size, processed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            mail.id,
            mail.message_id,
            mail.subject,
            mail.sent_time,
            mail.sender_name,
            mail.folder_id,
            mail.unread,
            mail.has_attachments,
            mail.size,
            mail.processed_at,
        ],
    )?;

    if existing.is_none() {
        if let Some(folder_id) = &mail.folder_id {
            folder_repo::adjust_item_count(conn, folder_id, 1, &mail.processed_at)?;
        }
    }
    Ok(())
}

/// Deletes an archived mail row and decrements its folder counter.
pub fn delete(conn: &Connection, id: &str, deleted_at: &str) -> Result<bool, DatabaseError> {
    let existing = match find_by_id(conn, id)? {
        Some(row) => row,
        None => return Ok(false),
    };

    conn.execute("DELETE FROM mail_items WHERE id = ?1", params![id])?;

    if let Some(folder_id) = &existing.folder_id {
        folder_repo::adjust_item_count(conn, folder_id, -1, deleted_at)?;
    }
    Ok(true)
}

/// Finds an archived mail row by its final id.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<MailItemRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM mail_items WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], MailItemRow::from_row)?;
    match rows.next() {
        Some(Ok(row)) => Ok(Some(row)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

/// Finds the most recently processed mail row for a provisional id.
///
/// Ties break on the latest `processed_at`; rowid is the final
/// deterministic tie-break for equal timestamps.
pub fn find_latest_by_provisional(
    conn: &Connection,
    message_id: &str,
) -> Result<Option<MailItemRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM mail_items WHERE message_id = ?1
         ORDER BY processed_at DESC, rowid DESC LIMIT 1",
    )?;
    let mut rows = stmt.query_map(params![message_id], MailItemRow::from_row)?;
    match rows.next() {
        Some(Ok(row)) => Ok(Some(row)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{folder_repo::FolderRow, Database};

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_mail(id: &str, message_id: &str, processed_at: &str) -> MailItemRow {
        MailItemRow {
            id: id.to_string(),
            message_id: message_id.to_string(),
            subject: Some("Hello".to_string()),
            sent_time: Some("2026-01-10 08:15:00".to_string()),
            sender_name: Some("Alice".to_string()),
            folder_id: Some("f1".to_string()),
            unread: false,
            has_attachments: true,
            size: 2048,
            processed_at: processed_at.to_string(),
        }
    }

    fn setup_folder(conn: &Connection) {
        folder_repo::upsert(
            conn,
            &FolderRow {
                id: "f1".to_string(),
                account_id: "acct-1".to_string(),
                name: "Inbox".to_string(),
                folder_path: None,
                item_count: 0,
                updated_at: "2026-02-01 09:00:00".to_string(),
            },
        )
        .unwrap();
    }

    #[test]
    fn test_insert_increments_folder_counter() {
        let db = test_db();
        db.with_conn(|conn| {
            setup_folder(conn);
            insert(conn, &sample_mail("e1", "m1", "2026-02-01 09:01:00"))?;
            insert(conn, &sample_mail("e2", "m2", "2026-02-01 09:02:00"))?;

            let folder = folder_repo::find_by_id(conn, "f1")?.unwrap();
            assert_eq!(folder.item_count, 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_reinsert_does_not_double_count() {
        let db = test_db();
        db.with_conn(|conn| {
            setup_folder(conn);
            insert(conn, &sample_mail("e1", "m1", "2026-02-01 09:01:00"))?;
            // Same final id again (reprocessing) — row replaced, counter untouched.
            insert(conn, &sample_mail("e1", "m1", "2026-02-01 09:05:00"))?;

            let folder = folder_repo::find_by_id(conn, "f1")?.unwrap();
            assert_eq!(folder.item_count, 1);

            let found = find_by_id(conn, "e1")?.unwrap();
            assert_eq!(found.processed_at, "2026-02-01 09:05:00");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_delete_decrements_folder_counter() {
        let db = test_db();
        db.with_conn(|conn| {
            setup_folder(conn);
            insert(conn, &sample_mail("e1", "m1", "2026-02-01 09:01:00"))?;

            assert!(delete(conn, "e1", "2026-02-01 09:10:00")?);
            assert!(!delete(conn, "e1", "2026-02-01 09:11:00")?);

            let folder = folder_repo::find_by_id(conn, "f1")?.unwrap();
            assert_eq!(folder.item_count, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_find_latest_by_provisional_prefers_newest() {
        let db = test_db();
        db.with_conn(|conn| {
            setup_folder(conn);
            insert(conn, &sample_mail("e1", "m1", "2026-02-01 09:01:00"))?;
            insert(conn, &sample_mail("e2", "m1", "2026-02-01 09:05:00"))?;
            insert(conn, &sample_mail("e3", "m1", "2026-02-01 09:03:00"))?;

            let latest = find_latest_by_provisional(conn, "m1")?.unwrap();
            assert_eq!(latest.id, "e2");

            assert!(find_latest_by_provisional(conn, "unknown")?.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_find_latest_tie_breaks_on_rowid() {
        let db = test_db();
        db.with_conn(|conn| {
            setup_folder(conn);
            insert(conn, &sample_mail("e1", "m1", "2026-02-01 09:01:00"))?;
            insert(conn, &sample_mail("e2", "m1", "2026-02-01 09:01:00"))?;

            // Equal timestamps: the later insert wins.
            let latest = find_latest_by_provisional(conn, "m1")?.unwrap();
            assert_eq!(latest.id, "e2");
            Ok(())
        })
        .unwrap();
    }
}
