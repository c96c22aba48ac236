//! Users, conversations and the append-only turn transcript.

use anyhow::{bail, Result};
use rusqlite::{params, Connection, OptionalExtension};

use super::now_timestamp;
use super::types::{Identity, NewTurn, Role, Turn};

/// Register a user. Credential handling lives outside this crate; this only
/// creates the identity record the gate resolves tokens against.
pub fn create_user(
    conn: &Connection,
    email: &str,
    first_name: &str,
    last_name: &str,
) -> Result<Identity> {
    let id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO users (id, email, first_name, last_name, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, email, first_name, last_name, now_timestamp()],
    )?;
    Ok(Identity {
        id,
        email: email.to_string(),
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
    })
}

pub fn find_user(conn: &Connection, user_id: &str) -> Result<Option<Identity>> {
    let identity = conn
        .query_row(
            "SELECT id, email, first_name, last_name FROM users WHERE id = ?1",
            params![user_id],
            |row| {
                Ok(Identity {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    first_name: row.get(2)?,
                    last_name: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(identity)
}

/// Create an empty conversation owned by `user_id`. Returns its id.
pub fn create_conversation(conn: &Connection, user_id: &str, title: &str) -> Result<String> {
    let id = uuid::Uuid::now_v7().to_string();
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO conversations (id, user_id, title, last_activity, created_at) VALUES (?1, ?2, ?3, ?4, ?4)",
        params![id, user_id, title, now],
    )?;
    Ok(id)
}

/// Append a turn. The conversation must exist and belong to the turn's author.
pub fn insert_turn(conn: &Connection, turn: &NewTurn) -> Result<Turn> {
    let id = uuid::Uuid::now_v7().to_string();
    let created_at = now_timestamp();

    let rows = conn.execute(
        "INSERT INTO turns (id, conversation_id, user_id, role, content, created_at) \
         SELECT ?1, c.id, ?3, ?4, ?5, ?6 FROM conversations c WHERE c.id = ?2 AND c.user_id = ?3",
        params![
            id,
            turn.conversation_id,
            turn.author_id,
            turn.role.as_str(),
            turn.content,
            created_at,
        ],
    )?;
    if rows == 0 {
        bail!(
            "conversation {} not found for user {}",
            turn.conversation_id,
            turn.author_id
        );
    }

    Ok(Turn {
        id,
        seq: conn.last_insert_rowid(),
        conversation_id: turn.conversation_id.clone(),
        author_id: turn.author_id.clone(),
        role: turn.role,
        content: turn.content.clone(),
        created_at,
    })
}

/// Move `last_activity` forward to `at`. Never moves it backwards, so
/// out-of-order touches from concurrent exchanges are harmless.
pub fn touch_conversation(conn: &Connection, conversation_id: &str, at: &str) -> Result<()> {
    let rows = conn.execute(
        "UPDATE conversations SET last_activity = MAX(last_activity, ?1) WHERE id = ?2",
        params![at, conversation_id],
    )?;
    if rows == 0 {
        bail!("conversation not found: {conversation_id}");
    }
    Ok(())
}

/// All turns of a conversation, oldest first.
pub fn load_transcript(conn: &Connection, conversation_id: &str) -> Result<Vec<Turn>> {
    let mut stmt = conn.prepare(
        "SELECT id, seq, conversation_id, user_id, role, content, created_at \
         FROM turns WHERE conversation_id = ?1 ORDER BY seq ASC",
    )?;
    let rows = stmt
        .query_map(params![conversation_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, seq, conversation_id, author_id, role, content, created_at)| {
            let role: Role = role.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            Ok(Turn {
                id,
                seq,
                conversation_id,
                author_id,
                role,
                content,
                created_at,
            })
        })
        .collect()
}

pub fn last_activity(conn: &Connection, conversation_id: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT last_activity FROM conversations WHERE id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub fn count_turns(conn: &Connection, conversation_id: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM turns WHERE conversation_id = ?1",
        params![conversation_id],
        |row| row.get(0),
    )?)
}
