// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use thiserror::Error;

/// Failure of one HTTP exchange with the inventory API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// No response arrived: refused connection, DNS failure, timeout.
    #[error("cannot reach the inventory API: {message}")]
    Network { message: String },
    /// The server answered with a non-2xx status.
    #[error("{}", server_message(.status, .message))]
    Server {
        status: u16,
        message: Option<String>,
    },
    /// The response body did not match the expected shape.
    #[error("unexpected response from the inventory API: {message}")]
    Decode { message: String },
}

fn server_message(status: &u16, message: &Option<String>) -> String {
    match message {
        Some(message) => format!("server error ({status}): {message}"),
        None => format!("server returned {status}"),
    }
}

impl RequestError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } => Some(*status),
            Self::Network { .. } | Self::Decode { .. } => None,
        }
    }

    /// Short text for the status line: the server's own words when it sent any.
    pub fn user_message(&self) -> String {
        match self {
            Self::Server {
                message: Some(message),
                ..
            } => message.clone(),
            Self::Server {
                status,
                message: None,
            } => format!("request failed ({status})"),
            Self::Network { .. } => "inventory API unreachable".to_owned(),
            Self::Decode { .. } => "inventory API sent an unexpected response".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error(transparent)]
    Request(#[from] RequestError),
    /// A note header was created but one of its lines failed.
    #[error(
        "note #{header_id} saved with {lines_created} line(s) before a line failed: {source}{}",
        compensation_suffix(.compensated)
    )]
    OrphanedHeader {
        header_id: i64,
        lines_created: usize,
        source: RequestError,
        compensated: bool,
    },
}

fn compensation_suffix(compensated: &bool) -> &'static str {
    if *compensated { " (header deleted)" } else { "" }
}

impl MutationError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Request(err) => err.user_message(),
            Self::OrphanedHeader {
                header_id,
                lines_created,
                source,
                compensated: true,
            } => format!(
                "line {} failed ({}); note #{header_id} was removed",
                lines_created + 1,
                source.user_message()
            ),
            Self::OrphanedHeader {
                header_id,
                lines_created,
                source,
                compensated: false,
            } => format!(
                "note #{header_id} saved without all lines: line {} failed ({})",
                lines_created + 1,
                source.user_message()
            ),
        }
    }
}
