use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

use branchchat_core::TreeError;

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

#[derive(Serialize)]
struct JsonError {
    error: String,
    kind: &'static str,
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Tree(error) => error.kind(),
            ApiError::BadRequest(_) => "bad_request",
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Tree(error) => match error {
                TreeError::ConversationNotFound(_) | TreeError::NodeNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                TreeError::Conflict(_) => StatusCode::CONFLICT,
                TreeError::OutOfRange { .. }
                | TreeError::WrongRole { .. }
                | TreeError::InvalidPath(_) => StatusCode::BAD_REQUEST,
                TreeError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
                TreeError::InvariantViolation(_) | TreeError::Storage(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(JsonError {
            error: self.to_string(),
            kind: self.kind(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchchat_core::{Role, UpstreamError};

    #[test]
    fn tree_errors_map_to_status_codes() {
        let cases = [
            (TreeError::ConversationNotFound("c".into()), 404),
            (TreeError::NodeNotFound("n".into()), 404),
            (TreeError::Conflict("c".into()), 409),
            (TreeError::OutOfRange { index: 3, count: 2 }, 400),
            (
                TreeError::WrongRole {
                    node_id: "n".into(),
                    expected: Role::User,
                },
                400,
            ),
            (TreeError::InvalidPath("x".into()), 400),
            (TreeError::UpstreamFailure(UpstreamError::Cancelled), 502),
            (TreeError::InvariantViolation("x".into()), 500),
            (TreeError::Storage("disk".into()), 500),
        ];

        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status_code().as_u16(), status);
        }
    }

    #[test]
    fn bad_request_has_its_own_kind() {
        let error = ApiError::BadRequest("empty message".into());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(error.kind(), "bad_request");
    }
}
