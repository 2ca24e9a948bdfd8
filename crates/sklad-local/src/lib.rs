// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use rusqlite::{Connection, OptionalExtension, params};
use sklad_app::TabKind;
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const APP_NAME: &str = "sklad";
pub const LAST_TAB_KEY: &str = "ui.last_tab";

const SETTINGS_COLUMNS: [&str; 3] = ["key", "value", "updated_at"];

/// Client-side state that outlives a session: a small sqlite key/value table.
pub struct Preferences {
    conn: Connection,
}

impl Preferences {
    pub fn open(path: &Path) -> Result<Self> {
        let printable = path.to_string_lossy().to_string();
        validate_state_path(&printable)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create state directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open state store at {}", path.display()))?;
        configure_connection(&conn)?;
        let prefs = Self { conn };
        prefs.bootstrap()?;
        Ok(prefs)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory state store")?;
        let prefs = Self { conn };
        prefs.bootstrap()?;
        Ok(prefs)
    }

    pub fn raw_connection(&self) -> &Connection {
        &self.conn
    }

    fn bootstrap(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS settings (
                  key TEXT PRIMARY KEY,
                  value TEXT NOT NULL,
                  updated_at TEXT NOT NULL
                );
                ",
            )
            .context("create settings table")?;
        validate_schema(&self.conn)
    }

    fn get_raw(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("read setting {key}"))
    }

    fn put_raw(&self, key: &str, value: &str) -> Result<()> {
        let now = now_rfc3339()?;
        self.conn
            .execute(
                "
                INSERT INTO settings (key, value, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                  value = excluded.value,
                  updated_at = excluded.updated_at
                ",
                params![key, value, now],
            )
            .with_context(|| format!("upsert setting {key}"))?;
        Ok(())
    }

    /// The tab to reopen, or `None` when nothing usable was saved.
    pub fn last_tab(&self) -> Result<Option<TabKind>> {
        let Some(raw) = self.get_raw(LAST_TAB_KEY)? else {
            return Ok(None);
        };
        let tab = TabKind::parse(raw.trim());
        if tab.is_none() {
            tracing::warn!(value = %raw, "ignoring unknown saved tab");
        }
        Ok(tab)
    }

    pub fn put_last_tab(&self, tab: TabKind) -> Result<()> {
        self.put_raw(LAST_TAB_KEY, tab.as_str())
    }

    /// Last saved tab, falling back to the first tab on any problem.
    pub fn restore_tab(&self) -> TabKind {
        match self.last_tab() {
            Ok(Some(tab)) => tab,
            Ok(None) => TabKind::default(),
            Err(error) => {
                tracing::warn!(%error, "could not read saved tab");
                TabKind::default()
            }
        }
    }
}

pub fn default_state_path() -> Result<PathBuf> {
    if let Some(override_path) = env::var_os("SKLAD_STATE_PATH") {
        return Ok(PathBuf::from(override_path));
    }

    let data_root = dirs::data_local_dir().ok_or_else(|| {
        anyhow!("cannot resolve data directory; set SKLAD_STATE_PATH to a writable file path")
    })?;
    Ok(data_root.join(APP_NAME).join("state.db"))
}

pub fn validate_state_path(path: &str) -> Result<()> {
    if path.is_empty() {
        bail!("state path must not be empty");
    }
    if path == ":memory:" {
        return Ok(());
    }

    if let Some(index) = path.find("://")
        && index > 0
    {
        let scheme = &path[..index];
        if scheme.chars().all(char::is_alphabetic) {
            bail!(
                "state path {path:?} looks like a URI ({scheme}://); pass a filesystem path instead"
            );
        }
    }

    if path.starts_with("file:") {
        bail!("state path {path:?} uses file: URI syntax; pass a plain filesystem path");
    }

    if path.contains('?') {
        bail!("state path {path:?} contains '?'; remove query parameters and use a plain file path");
    }

    Ok(())
}

fn validate_schema(conn: &Connection) -> Result<()> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info('settings')")
        .context("inspect settings table")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .context("list settings columns")?
        .collect::<rusqlite::Result<BTreeSet<String>>>()
        .context("read settings columns")?;

    let missing: Vec<&str> = SETTINGS_COLUMNS
        .iter()
        .copied()
        .filter(|column| !columns.contains(*column))
        .collect();
    if !missing.is_empty() {
        bail!(
            "table `settings` is missing required columns: {}; delete the state file to recreate it",
            missing.join(", ")
        );
    }
    Ok(())
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        ",
    )
    .context("configure sqlite pragmas")
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("format current timestamp")
}
