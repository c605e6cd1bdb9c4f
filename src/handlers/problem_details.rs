//! RFC 7807 problem responses.
//!
//! Every error body has the shape
//! `{"type": "about:blank", "title": ..., "status": ..., "detail": ...}`
//! and is served as `application/problem+json`.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ProblemBody {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: String,
    status: u16,
    detail: String,
}

fn problem(status: StatusCode, detail: impl Into<String>) -> Response {
    let body = ProblemBody {
        problem_type: "about:blank",
        title: status
            .canonical_reason()
            .unwrap_or("Unknown Error")
            .to_string(),
        status: status.as_u16(),
        detail: detail.into(),
    };

    // Serialization of a flat struct with string fields cannot fail.
    let json = serde_json::to_string(&body).unwrap_or_default();

    (
        status,
        [(header::CONTENT_TYPE, "application/problem+json")],
        json,
    )
        .into_response()
}

pub fn not_found(detail: impl Into<String>) -> Response {
    problem(StatusCode::NOT_FOUND, detail)
}

pub fn conflict(detail: impl Into<String>) -> Response {
    problem(StatusCode::CONFLICT, detail)
}

pub fn internal_error(detail: impl Into<String>) -> Response {
    problem(StatusCode::INTERNAL_SERVER_ERROR, detail)
}
