//! Forward-only schema migrations.
//!
//! The schema version lives in `schema_meta`; [`run_migrations`] walks it up to
//! [`CURRENT_SCHEMA_VERSION`] one step at a time.

use rusqlite::{Connection, OptionalExtension};

use crate::embedding::EMBEDDING_DIM;

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'schema_version'",
        [],
        |row| {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().unwrap_or(0))
        },
    )
}

fn update_schema_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE schema_meta SET value = ?1 WHERE key = 'schema_version'",
        [version.to_string()],
    )?;
    Ok(())
}

/// The embedding model that produced the stored fragment vectors, if recorded.
pub fn get_embedding_model(conn: &Connection) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'embedding_model'",
        [],
        |row| row.get::<_, String>(0),
    )
    .optional()
}

pub fn set_embedding_model(conn: &Connection, model: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('embedding_model', ?1)",
        [model],
    )?;
    Ok(())
}

/// Run any pending migrations, each inside its own transaction.
pub fn run_migrations(conn: &mut Connection) -> rusqlite::Result<()> {
    let mut version = get_schema_version(conn)?;
    tracing::debug!(schema_version = version, target = CURRENT_SCHEMA_VERSION, "checking migrations");

    while version < CURRENT_SCHEMA_VERSION {
        let next = version + 1;
        tracing::info!(from = version, to = next, "running migration");

        let tx = conn.transaction()?;
        match next {
            2 => migrate_v1_to_v2(&tx)?,
            _ => {
                tracing::error!(version = next, "unknown migration target");
                break;
            }
        }
        update_schema_version(&tx, next)?;
        tx.commit()?;
        version = next;
    }

    Ok(())
}

/// v1 -> v2: fragment vectors move from a BLOB column on `fragments` into the
/// `fragment_vectors` vec0 index. Rows whose width the index cannot hold were
/// unreachable by any query and are dropped.
fn migrate_v1_to_v2(conn: &Connection) -> rusqlite::Result<()> {
    if !has_column(conn, "fragments", "embedding")? {
        return Ok(());
    }

    let moved = conn.execute(
        "INSERT INTO fragment_vectors (fragment_seq, user_id, embedding) \
         SELECT seq, user_id, embedding FROM fragments WHERE dims = ?1 ORDER BY seq",
        [EMBEDDING_DIM as i64],
    )?;
    let dropped = conn.execute("DELETE FROM fragments WHERE dims != ?1", [EMBEDDING_DIM as i64])?;
    conn.execute_batch(
        "DROP INDEX IF EXISTS idx_fragments_user;
         ALTER TABLE fragments DROP COLUMN embedding;
         ALTER TABLE fragments DROP COLUMN dims;",
    )?;

    tracing::info!(moved, dropped, "fragment vectors moved to vec0 index");
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|name| name == column))
}

/// Outcome of comparing the configured embedding model with the recorded one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelCheck {
    /// Recorded and configured agree.
    Matches,
    /// Nothing indexed under another model; the configured one is now recorded.
    Recorded,
    /// Stored vectors came from `stored`; they are not comparable with new ones.
    Mismatch { stored: String },
}

/// Record `configured` as the fragment model unless existing vectors were
/// produced by a different one.
pub fn reconcile_embedding_model(conn: &Connection, configured: &str) -> rusqlite::Result<ModelCheck> {
    match get_embedding_model(conn)? {
        Some(stored) if stored == configured => Ok(ModelCheck::Matches),
        Some(stored) => {
            let indexed: i64 =
                conn.query_row("SELECT COUNT(*) FROM fragments", [], |row| row.get(0))?;
            if indexed > 0 {
                return Ok(ModelCheck::Mismatch { stored });
            }
            set_embedding_model(conn, configured)?;
            Ok(ModelCheck::Recorded)
        }
        None => {
            set_embedding_model(conn, configured)?;
            Ok(ModelCheck::Recorded)
        }
    }
}
