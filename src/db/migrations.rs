use anyhow::Context;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory holding the `NNN_name.sql` files, in lookup order: `MIGRATIONS_DIR`,
/// `./migrations`, then the crate's own `migrations/` next to `Cargo.toml`.
fn migrations_dir() -> Option<PathBuf> {
    let candidates = [
        std::env::var("MIGRATIONS_DIR").ok().map(PathBuf::from),
        Some(PathBuf::from("migrations")),
        Some(Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")),
    ];
    candidates.into_iter().flatten().find(|p| p.is_dir())
}

pub fn run_migrations(conn: &mut Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .context("failed to create migrations table")?;

    let Some(dir) = migrations_dir() else {
        anyhow::bail!("migrations directory not found");
    };

    let mut entries: Vec<_> = fs::read_dir(&dir)
        .with_context(|| format!("failed to read migrations directory {}", dir.display()))?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "sql")
                .unwrap_or(false)
        })
        .collect();

    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();

        let already_applied: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM _migrations WHERE name = ?1",
                [&name],
                |row| row.get(0),
            )
            .context("failed to check migration status")?;

        if already_applied {
            continue;
        }

        let sql = fs::read_to_string(entry.path())
            .with_context(|| format!("failed to read migration file: {name}"))?;

        apply_migration(conn, &name, &sql)?;
        tracing::info!(migration = %name, "applied migration");
    }

    Ok(())
}

/// Applies one file and records it in the same transaction. A file that fails
/// partway is rolled back whole when the transaction drops.
fn apply_migration(conn: &mut Connection, name: &str, sql: &str) -> anyhow::Result<()> {
    let tx = conn
        .transaction()
        .with_context(|| format!("failed to begin migration: {name}"))?;
    tx.execute_batch(sql)
        .with_context(|| format!("failed to apply migration: {name}"))?;
    tx.execute("INSERT INTO _migrations (name) VALUES (?1)", [name])
        .with_context(|| format!("failed to record migration: {name}"))?;
    tx.commit()
        .with_context(|| format!("failed to commit migration: {name}"))?;
    Ok(())
}
