// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::Result;
use sklad_app::{EntityKind, TabKind};
use sklad_local::{LAST_TAB_KEY, Preferences, validate_state_path};
use sklad_testkit::temp_state_path;

#[test]
fn validate_state_path_rejects_uri_forms() {
    assert!(validate_state_path("file:state.db").is_err());
    assert!(validate_state_path("https://example.com/state.db").is_err());
    assert!(validate_state_path("state.db?mode=ro").is_err());
    assert!(validate_state_path("").is_err());
    assert!(validate_state_path("/tmp/sklad/state.db").is_ok());
    assert!(validate_state_path(":memory:").is_ok());
}

#[test]
fn missing_tab_defaults_to_first() -> Result<()> {
    let prefs = Preferences::open_memory()?;
    assert_eq!(prefs.last_tab()?, None);
    assert_eq!(prefs.restore_tab(), TabKind::ALL[0]);
    Ok(())
}

#[test]
fn last_tab_survives_reopen() -> Result<()> {
    let (_dir, path) = temp_state_path()?;
    {
        let prefs = Preferences::open(&path)?;
        prefs.put_last_tab(TabKind::Entity(EntityKind::Product))?;
        prefs.put_last_tab(TabKind::Reports)?;
    }

    let prefs = Preferences::open(&path)?;
    assert_eq!(prefs.last_tab()?, Some(TabKind::Reports));
    let rows: i64 = prefs
        .raw_connection()
        .query_row("SELECT COUNT(*) FROM settings", [], |row| row.get(0))?;
    assert_eq!(rows, 1, "upsert keeps a single key");
    Ok(())
}

#[test]
fn unknown_saved_tab_falls_back() -> Result<()> {
    let prefs = Preferences::open_memory()?;
    prefs.raw_connection().execute(
        "INSERT INTO settings (key, value, updated_at) VALUES (?, 'dashboard', '2026-01-01T00:00:00Z')",
        [LAST_TAB_KEY],
    )?;
    assert_eq!(prefs.last_tab()?, None);
    assert_eq!(prefs.restore_tab(), TabKind::default());
    Ok(())
}

#[test]
fn open_rejects_settings_table_without_required_columns() -> Result<()> {
    let (_dir, path) = temp_state_path()?;
    {
        let conn = rusqlite::Connection::open(&path)?;
        conn.execute_batch("CREATE TABLE settings (key TEXT PRIMARY KEY, value TEXT NOT NULL);")?;
    }
    let error = match Preferences::open(&path) {
        Ok(_) => panic!("schema without updated_at should be rejected"),
        Err(error) => error,
    };
    assert!(error.to_string().contains("updated_at"), "{error}");
    Ok(())
}
