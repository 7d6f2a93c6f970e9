//! Refresh cycle error types

use std::io;
use thiserror::Error;

/// Response field being decoded when a read fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    MetadataLength,
    Metadata,
    ImageLength,
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Field::MetadataLength => "metadata length",
            Field::Metadata => "metadata",
            Field::ImageLength => "image length",
        };
        f.write_str(name)
    }
}

/// Errors that can abort a single refresh cycle
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to send image request: {0}")]
    Write(#[source] io::Error),

    #[error("Failed to read {field}: {source}")]
    Read {
        field: Field,
        #[source]
        source: io::Error,
    },

    #[error("Server sent negative {field}: {value}")]
    NegativeLength { field: Field, value: i32 },

    #[error("Metadata is not valid UTF-8: {0}")]
    MetadataEncoding(#[from] std::string::FromUtf8Error),

    #[error("Metadata is not valid JSON: {0}")]
    MetadataJson(#[from] serde_json::Error),

    #[error("Metadata is not a JSON object")]
    MetadataNotObject,

    #[error("Receive handler failed: {0:#}")]
    Handler(eyre::Report),

    #[error("Refresh cycle panicked: {0}")]
    Panicked(String),
}

impl RefreshError {
    /// Check if the server was never reached
    pub fn is_connect(&self) -> bool {
        matches!(self, RefreshError::Connect { .. })
    }

    /// Check if the server sent something that violates the wire format
    pub fn is_protocol(&self) -> bool {
        match self {
            RefreshError::Read { .. }
            | RefreshError::NegativeLength { .. }
            | RefreshError::MetadataEncoding(_)
            | RefreshError::MetadataJson(_)
            | RefreshError::MetadataNotObject => true,
            RefreshError::Connect { .. }
            | RefreshError::Write(_)
            | RefreshError::Handler(_)
            | RefreshError::Panicked(_) => false,
        }
    }
}
