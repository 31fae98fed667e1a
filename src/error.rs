/*!
Everything that can go wrong while fielding a request, and how each
failure is reported back to the client.
*/
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::store::DataAccessError;

#[derive(Error, Debug)]
pub enum PortalError {
    #[error("Invalid username")]
    InvalidUsername,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("{0}")]
    MalformedRequest(String),

    #[error("Unknown role: {0:?}")]
    UnknownRole(String),

    #[error("{0}")]
    DataAccess(#[from] DataAccessError),
}

impl PortalError {
    pub fn status(&self) -> StatusCode {
        match self {
            PortalError::InvalidUsername
            | PortalError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            PortalError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            PortalError::UnknownRole(_)
            | PortalError::DataAccess(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PortalError {
    fn into_response(self) -> Response {
        let status = self.status();

        // The login page reads `message`; everything else reads `error`.
        let body = match &self {
            PortalError::InvalidUsername
            | PortalError::MalformedRequest(_) => json!({
                "success": false,
                "message": self.to_string(),
            }),
            _ => json!({
                "success": false,
                "error": self.to_string(),
            }),
        };

        if status.is_server_error() {
            log::error!("Responding {}: {}", &status, &self);
        }

        (status, Json(body)).into_response()
    }
}
