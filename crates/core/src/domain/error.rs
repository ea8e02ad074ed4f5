// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid recording phase transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Recording {recording} belongs to channel {owner}, not {requested}")]
    ChannelMismatch {
        recording: String,
        owner: String,
        requested: String,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
