//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_task_info_table",
        sql: include_str!("sql/001_create_task_info.sql"),
    },
    Migration {
        version: 2,
        description: "create_mail_tasks_table",
        sql: include_str!("sql/002_create_mail_tasks.sql"),
    },
    Migration {
        version: 3,
        description: "create_task_progress_table",
        sql: include_str!("sql/003_create_task_progress.sql"),
    },
    Migration {
        version: 4,
        description: "create_mail_items_table",
        sql: include_str!("sql/004_create_mail_items.sql"),
    },
    Migration {
        version: 5,
        description: "create_folders_table",
        sql: include_str!("sql/005_create_folders.sql"),
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    // Create the migrations tracking table.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        conn.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_all(&conn).unwrap();
        // Running again should be a no-op.
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_all_tables_exist() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        for table in [
            "task_info",
            "mail_tasks",
            "task_progress",
            "mail_items",
            "folders",
        ] {
            let found: Option<String> = conn
                .query_row(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(found.as_deref(), Some(table));
        }
    }

    #[test]
    fn test_mail_id_uniqueness_allows_multiple_nulls() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        conn.execute(
            "INSERT INTO mail_tasks (task_id, message_id, created_at) VALUES ('t', 'm1', '2026-01-01 00:00:00')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO mail_tasks (task_id, message_id, created_at) VALUES ('t', 'm2', '2026-01-01 00:00:00')",
            [],
        )
        .unwrap();

        // Two NULL mail_ids coexist; duplicate non-NULL ones do not.
        conn.execute("UPDATE mail_tasks SET mail_id='x' WHERE message_id='m1'", [])
            .unwrap();
        let err = conn.execute("UPDATE mail_tasks SET mail_id='x' WHERE message_id='m2'", []);
        assert!(err.is_err());
    }
}
