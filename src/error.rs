//! Error taxonomy shared by every component.
//!
//! One variant per error kind the node surfaces over HTTP; `kind()` returns the
//! stable string surfaced to HTTP clients and `status()` maps it to the
//! 4xx/5xx split the API layer uses.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("duplicate transaction: {0}")]
    DuplicateTransaction(String),

    #[error("invalid block: {0}")]
    InvalidBlock(String),

    #[error("chain invalid: {0}")]
    ChainInvalid(String),

    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("sync skipped: {0}")]
    SyncSkipped(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("unsupported request: {0}")]
    Unsupported(String),
}

impl NodeError {
    /// Stable `error` kind string, used verbatim in JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            NodeError::InvalidAddress(_) => "InvalidAddress",
            NodeError::InvalidTransaction(_) => "InvalidTransaction",
            NodeError::InsufficientBalance(_) => "InsufficientBalance",
            NodeError::DuplicateTransaction(_) => "DuplicateTransaction",
            NodeError::InvalidBlock(_) => "InvalidBlock",
            NodeError::ChainInvalid(_) => "ChainInvalid",
            NodeError::PeerUnreachable(_) => "PeerUnreachable",
            NodeError::SyncSkipped(_) => "SyncSkipped",
            NodeError::StoreUnavailable(_) => "StoreUnavailable",
            NodeError::Unsupported(_) => "Unsupported",
        }
    }

    /// HTTP status per the propagation policy: client-shaped errors are
    /// 4xx, everything that reflects an internal/operational condition is
    /// 5xx. `SyncSkipped` is not a failure and callers should not usually
    /// route it through this mapping, but a conservative 409 is returned
    /// if they do.
    pub fn status(&self) -> StatusCode {
        match self {
            NodeError::InvalidAddress(_)
            | NodeError::InvalidTransaction(_)
            | NodeError::InsufficientBalance(_)
            | NodeError::DuplicateTransaction(_)
            | NodeError::Unsupported(_) => StatusCode::BAD_REQUEST,
            NodeError::InvalidBlock(_) | NodeError::ChainInvalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            NodeError::SyncSkipped(_) => StatusCode::CONFLICT,
            NodeError::PeerUnreachable(_) | NodeError::StoreUnavailable(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
