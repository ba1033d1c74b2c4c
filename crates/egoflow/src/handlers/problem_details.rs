//! RFC 9457 problem responses.

use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub problem_type: &'static str,
    pub title: &'static str,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl IntoResponse for ProblemDetails {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            [(header::CONTENT_TYPE, "application/problem+json")],
            Json(self),
        )
            .into_response()
    }
}

fn problem(status: StatusCode, title: &'static str, detail: Option<String>) -> ProblemDetails {
    ProblemDetails {
        problem_type: "about:blank",
        title,
        status: status.as_u16(),
        detail,
    }
}

pub fn unauthorized(detail: impl Into<String>) -> ProblemDetails {
    problem(StatusCode::UNAUTHORIZED, "Unauthorized", Some(detail.into()))
}
