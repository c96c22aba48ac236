//! SQL DDL for all Olivia tables.
//!
//! Defines `users`, `conversations`, `turns` (the append-only transcript),
//! `fragments` (long-term memory text), the `fragment_vectors` vec0 index and
//! `schema_meta`. All DDL uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

use super::migrations::CURRENT_SCHEMA_VERSION;
use crate::embedding::EMBEDDING_DIM;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    last_activity TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversations_user ON conversations(user_id);

-- seq is the creation order of a turn; turns are never updated.
CREATE TABLE IF NOT EXISTS turns (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    role TEXT NOT NULL CHECK(role IN ('user','model')),
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_turns_conversation ON turns(conversation_id, seq);

CREATE TABLE IF NOT EXISTS fragments (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    turn_id TEXT NOT NULL REFERENCES turns(id) ON DELETE CASCADE,
    conversation_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    text TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_fragments_conversation ON fragments(conversation_id);

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// KNN index over fragment embeddings, keyed by `fragments.seq` and
/// partitioned by owner so a search only ever visits one user's vectors.
fn vec_table_sql() -> String {
    format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS fragment_vectors USING vec0(\
             fragment_seq integer primary key, \
             user_id text partition key, \
             embedding float[{EMBEDDING_DIM}] distance_metric=cosine\
         );"
    )
}

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
///
/// A fresh database is created at the latest layout, so it starts at
/// [`CURRENT_SCHEMA_VERSION`]. Existing databases keep their recorded version
/// and are brought forward by the migrations.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute_batch(&vec_table_sql())?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        [CURRENT_SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for name in [
            "users",
            "conversations",
            "turns",
            "fragments",
            "fragment_vectors",
            "schema_meta",
        ] {
            assert!(tables.contains(&name.to_string()), "missing table {name}");
        }

        let version: String = conn
            .query_row("SELECT vec_version()", [], |r| r.get(0))
            .unwrap();
        assert!(!version.is_empty());
    }

    #[test]
    fn schema_is_idempotent() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }

    #[test]
    fn turn_role_is_constrained() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO users (id, email, first_name, created_at) VALUES ('u', 'u@x', 'U', 'now');
             INSERT INTO conversations (id, user_id, title, last_activity, created_at)
                 VALUES ('c', 'u', 't', 'now', 'now');",
        )
        .unwrap();

        let bad = conn.execute(
            "INSERT INTO turns (id, conversation_id, user_id, role, content, created_at)
             VALUES ('t1', 'c', 'u', 'system', 'hi', 'now')",
            [],
        );
        assert!(bad.is_err());
    }
}
