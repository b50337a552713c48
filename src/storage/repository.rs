use rusqlite::{params, Connection, OptionalExtension};

// ── Cache entries ──────────────────────────────────────────────────

pub fn get_entry(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM cache_entries WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_entry(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO cache_entries (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at",
        params![key, value],
    )?;
    Ok(())
}

pub fn remove_entry(conn: &Connection, key: &str) -> Result<bool, rusqlite::Error> {
    let count = conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
    Ok(count > 0)
}

pub fn clear_entries(conn: &Connection) -> Result<usize, rusqlite::Error> {
    conn.execute("DELETE FROM cache_entries", [])
}

pub fn count_entries(conn: &Connection) -> Result<i64, rusqlite::Error> {
    conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))",
        params![key, value],
    )?;
    Ok(())
}

pub fn unset_config(conn: &Connection, key: &str) -> Result<bool, rusqlite::Error> {
    let count = conn.execute("DELETE FROM app_config WHERE key = ?1", params![key])?;
    Ok(count > 0)
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    #[tokio::test]
    async fn test_config_round_trip() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                set_config(conn, "team_id", "42")?;
                set_config(conn, "team_id", "43")?;
                let val = get_config(conn, "team_id")?;
                assert_eq!(val, Some("43".to_string()));

                let missing = get_config(conn, "nonexistent")?;
                assert_eq!(missing, None);

                assert!(unset_config(conn, "team_id")?);
                assert!(!unset_config(conn, "team_id")?);
                assert_eq!(get_config(conn, "team_id")?, None);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_list_config_sorted() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                set_config(conn, "page_size", "300")?;
                set_config(conn, "api_base", "https://api.example.com")?;
                let items = list_config(conn)?;
                assert_eq!(
                    items,
                    vec![
                        ("api_base".to_string(), "https://api.example.com".to_string()),
                        ("page_size".to_string(), "300".to_string()),
                    ]
                );
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_entry_crud() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                set_entry(conn, "https://api.example.com/customers", "[]")?;
                set_entry(conn, "https://api.example.com/customers/1", "{\"id\":1}")?;
                set_entry(conn, "https://api.example.com/activities", "[]")?;
                assert_eq!(count_entries(conn)?, 3);

                assert_eq!(
                    get_entry(conn, "https://api.example.com/customers/1")?.as_deref(),
                    Some("{\"id\":1}")
                );

                assert!(remove_entry(conn, "https://api.example.com/customers/1")?);
                assert!(!remove_entry(conn, "https://api.example.com/customers/1")?);
                assert_eq!(get_entry(conn, "https://api.example.com/customers/1")?, None);

                assert_eq!(clear_entries(conn)?, 2);
                assert_eq!(count_entries(conn)?, 0);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }
}
