// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_ENV: &str = "SKLAD_LOG";

/// A non-empty `SKLAD_LOG` wins over the configured level.
pub fn filter_directive(level: &str, env: Option<String>) -> String {
    env.filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| level.to_owned())
}

pub fn validate_directive(directive: &str) -> Result<()> {
    EnvFilter::try_new(directive)
        .map(|_| ())
        .with_context(|| format!("invalid log filter {directive:?}; use a level such as info or debug"))
}

/// Routes tracing output to `file`. The terminal belongs to the UI, so nothing
/// is written to stdout or stderr.
pub fn init(level: &str, file: &Path) -> Result<()> {
    let directive = filter_directive(level, std::env::var(LOG_ENV).ok());
    let filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("parse log filter {directive:?} -- check [log].level or {LOG_ENV}"))?;

    if let Some(parent) = file.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    let sink = OpenOptions::new()
        .create(true)
        .append(true)
        .open(file)
        .with_context(|| format!("open log file {}", file.display()))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(Mutex::new(sink)),
        )
        .try_init()
        .context("install tracing subscriber")?;

    tracing::debug!(directive = %directive, file = %file.display(), "logging initialized");
    Ok(())
}
