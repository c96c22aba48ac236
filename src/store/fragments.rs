//! Long-term memory fragments: one embedded copy of a turn's text per row.
//!
//! Text and provenance live in `fragments`; the vector lives in the
//! `fragment_vectors` vec0 index under the same `seq`, partitioned by user.
//! Similarity is cosine distance.

use anyhow::{ensure, Result};
use rusqlite::{params, Connection};

use super::types::{FragmentMetadata, MemoryFragment};
use super::{embedding_to_bytes, now_timestamp};
use crate::embedding::EMBEDDING_DIM;

/// Store a fragment and its vector atomically. Returns the fragment id.
pub fn insert_fragment(
    conn: &Connection,
    embedding: &[f32],
    metadata: &FragmentMetadata,
) -> Result<String> {
    ensure!(
        embedding.len() == EMBEDDING_DIM,
        "expected a {EMBEDDING_DIM}-dimensional embedding, got {}",
        embedding.len()
    );

    let id = uuid::Uuid::now_v7().to_string();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO fragments (id, turn_id, conversation_id, user_id, text, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id,
            metadata.turn_id,
            metadata.conversation_id,
            metadata.user_id,
            metadata.text,
            now_timestamp(),
        ],
    )?;
    let seq = tx.last_insert_rowid();
    tx.execute(
        "INSERT INTO fragment_vectors (fragment_seq, user_id, embedding) VALUES (?1, ?2, ?3)",
        params![seq, metadata.user_id, embedding_to_bytes(embedding)],
    )?;
    tx.commit()?;
    Ok(id)
}

/// Nearest fragments owned by `user_id`, most similar first.
///
/// The KNN search runs inside the user's partition. Ties on distance fall back
/// to insertion order, so identical input always yields the identical ranking.
pub fn query_fragments(
    conn: &Connection,
    user_id: &str,
    embedding: &[f32],
    limit: usize,
) -> Result<Vec<MemoryFragment>> {
    ensure!(
        embedding.len() == EMBEDDING_DIM,
        "expected a {EMBEDDING_DIM}-dimensional query, got {}",
        embedding.len()
    );
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "WITH knn AS ( \
             SELECT fragment_seq, distance FROM fragment_vectors \
             WHERE embedding MATCH ?1 AND k = ?2 AND user_id = ?3 \
         ) \
         SELECT f.id, f.conversation_id, f.user_id, f.text, f.turn_id, knn.distance \
         FROM knn JOIN fragments f ON f.seq = knn.fragment_seq \
         ORDER BY knn.distance ASC, f.seq ASC",
    )?;

    let fragments = stmt
        .query_map(
            params![embedding_to_bytes(embedding), limit as i64, user_id],
            |row| {
                Ok(MemoryFragment {
                    id: row.get(0)?,
                    metadata: FragmentMetadata {
                        conversation_id: row.get(1)?,
                        user_id: row.get(2)?,
                        text: row.get(3)?,
                        turn_id: row.get(4)?,
                    },
                    distance: row.get(5)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(fragments)
}

pub fn count_fragments(conn: &Connection, conversation_id: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM fragments WHERE conversation_id = ?1",
        params![conversation_id],
        |row| row.get(0),
    )?)
}
