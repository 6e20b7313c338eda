//! Unified error types for the scheduler service.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Why a bid was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BidRejection {
    #[error("auction is not live")]
    AuctionNotLive,

    #[error("no round is accepting bids")]
    NoActiveRound,

    #[error("round {round} is not accepting bids right now")]
    OutsideRoundWindow { round: u32 },

    #[error("player is not a participant of this auction")]
    NotParticipant,

    #[error("player was eliminated in round {round}")]
    Eliminated { round: u32 },

    #[error("player already bid in round {round}")]
    AlreadyBid { round: u32 },

    #[error("bid must be between {min} and {max}")]
    AmountOutOfRange { min: i64, max: i64 },
}

#[derive(Error, Debug)]
pub enum AuctionError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("bid rejected: {0}")]
    BidRejected(#[from] BidRejection),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("prize claim rejected: {0}")]
    ClaimRejected(String),

    #[error("concurrent update conflict: {0}")]
    Conflict(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("payment signature mismatch")]
    SignatureMismatch,

    #[error("payment gateway error: {0}")]
    Payment(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, AuctionError>;

impl AuctionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuctionError::Validation(_)
            | AuctionError::BidRejected(_)
            | AuctionError::ClaimRejected(_)
            | AuctionError::SignatureMismatch => StatusCode::BAD_REQUEST,
            AuctionError::NotFound(_) => StatusCode::NOT_FOUND,
            AuctionError::InvalidState(_) | AuctionError::Conflict(_) => StatusCode::CONFLICT,
            AuctionError::Unauthorized => StatusCode::UNAUTHORIZED,
            AuctionError::Payment(_) | AuctionError::Http(_) => StatusCode::BAD_GATEWAY,
            AuctionError::Config(_)
            | AuctionError::Database(_)
            | AuctionError::Json(_)
            | AuctionError::Io(_)
            | AuctionError::Corrupt(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for AuctionError {
    fn from(rejection: JsonRejection) -> Self {
        AuctionError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AuctionError {
    fn from(rejection: PathRejection) -> Self {
        AuctionError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AuctionError {
    fn from(rejection: QueryRejection) -> Self {
        AuctionError::Validation(rejection.body_text())
    }
}

impl IntoResponse for AuctionError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        // Internal details stay in the logs.
        let message = match &self {
            AuctionError::Database(_) | AuctionError::Io(_) | AuctionError::Corrupt(_) => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = json!({
            "success": false,
            "message": message,
            "data": null,
        });
        (status, Json(body)).into_response()
    }
}
