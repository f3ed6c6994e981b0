use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use courier_store::StoreError;

/// Errors surfaced to clients, either as an HTTP status (connection
/// handshake) or as a `message:error` event with a stable code over the
/// socket.
///
/// Authorization failures and not-found are terminal and never retried;
/// store failures during fan-out are safe to retry because release gating
/// and idempotent pending records make retries non-duplicating.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Chat not found")]
    ChatNotFound,

    #[error("Message not found")]
    MessageNotFound,

    #[error("User not found")]
    UserNotFound,

    #[error("You are not a participant of this chat")]
    NotParticipant,

    #[error("Only admins can perform this action")]
    NotAdmin,

    #[error("Cannot remove the only admin")]
    OnlyAdmin,

    #[error("You have blocked this user. Unblock to send messages.")]
    BlockedByYou,

    #[error("You cannot send messages to this user.")]
    BlockedByPeer,

    #[error("Account disabled")]
    AccountDisabled,

    #[error("User is offline")]
    UserOffline,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ServerError>;

impl ServerError {
    /// Stable machine-readable code carried in `message:error` payloads so
    /// clients can distinguish "blocked" from "not a participant" from
    /// "server error" without parsing prose.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::ChatNotFound
            | ServerError::MessageNotFound
            | ServerError::UserNotFound => "not_found",
            ServerError::Store(StoreError::NotFound) => "not_found",
            ServerError::NotParticipant => "not_participant",
            ServerError::NotAdmin => "not_admin",
            ServerError::OnlyAdmin => "only_admin",
            ServerError::BlockedByYou | ServerError::BlockedByPeer => "blocked",
            ServerError::AccountDisabled => "account_disabled",
            ServerError::UserOffline => "user_offline",
            ServerError::BadRequest(_) => "bad_request",
            ServerError::Store(_) => "server_error",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::ChatNotFound
            | ServerError::MessageNotFound
            | ServerError::UserNotFound
            | ServerError::Store(StoreError::NotFound) => StatusCode::NOT_FOUND,
            ServerError::NotParticipant
            | ServerError::NotAdmin
            | ServerError::OnlyAdmin
            | ServerError::BlockedByYou
            | ServerError::BlockedByPeer
            | ServerError::AccountDisabled => StatusCode::FORBIDDEN,
            ServerError::UserOffline => StatusCode::CONFLICT,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match &self {
            // Hide internals from clients.
            ServerError::Store(StoreError::NotFound) => "Record not found".to_string(),
            ServerError::Store(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "code": self.code(),
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_distinguish_failure_classes() {
        assert_eq!(ServerError::BlockedByYou.code(), "blocked");
        assert_eq!(ServerError::BlockedByPeer.code(), "blocked");
        assert_eq!(ServerError::NotParticipant.code(), "not_participant");
        assert_eq!(ServerError::ChatNotFound.code(), "not_found");
        assert_eq!(
            ServerError::Store(StoreError::Migration("x".into())).code(),
            "server_error"
        );
    }
}
