use anyhow::{Context, Result};

use olivia::config::OliviaConfig;
use olivia::db;

/// Print row counts and a health check for the configured database.
pub fn stats(config: &OliviaConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `olivia serve` to create it.");
        return Ok(());
    }

    let conn = db::open_database(&db_path).context("failed to open database")?;
    let report = db::check_database_health(&conn).context("health check failed")?;
    let stored_model = db::migrations::get_embedding_model(&conn)?;

    println!("Olivia Statistics");
    println!("{}", "=".repeat(40));
    println!("  Database:          {}", db_path.display());
    println!("  Schema version:    {}", report.schema_version);
    println!("  sqlite-vec:        {}", report.sqlite_vec_version);
    println!();
    println!("  Users:             {}", report.user_count);
    println!("  Conversations:     {}", report.conversation_count);
    println!("  Turns:             {}", report.turn_count);
    println!("  Fragments:         {}", report.fragment_count);
    println!();
    println!(
        "  Embedding model:   {} (configured: {})",
        stored_model.as_deref().unwrap_or("(not set)"),
        config.embedding.model
    );
    if stored_model.is_some_and(|m| m != config.embedding.model) {
        println!("  WARNING: fragments indexed by another model will not be retrieved.");
    }
    println!(
        "  Integrity check:   {}",
        if report.integrity_ok { "PASSED" } else { "FAILED" }
    );

    Ok(())
}
