pub mod health;
pub mod notes;
pub mod wallet;

use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use ethnotes_types::{ApiResponse, ErrorView};
use serde::Serialize;

use crate::error::{NotesError, NotesResult};

pub fn status_for(err: &NotesError) -> StatusCode {
    match err {
        NotesError::OperationInProgress(_) => StatusCode::CONFLICT,
        NotesError::NoteNotFound(_) | NotesError::UnknownQuote(_) => StatusCode::NOT_FOUND,
        NotesError::FeeFetchFailed { .. } | NotesError::TransactionFailed { .. } => StatusCode::BAD_GATEWAY,
        NotesError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        NotesError::Local(_) => StatusCode::BAD_REQUEST,
        NotesError::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
        e if e.is_connectivity() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(err: &NotesError) -> HttpResponse {
    log::debug!("[API] {} -> {}", err.kind(), err);
    HttpResponse::build(status_for(err)).json(ApiResponse::<()>::err(err.to_view()))
}

pub fn bad_request(message: impl Into<String>) -> HttpResponse {
    HttpResponse::BadRequest().json(ApiResponse::<()>::err(ErrorView {
        kind: "bad_request".to_string(),
        message: message.into(),
        required_network: None,
    }))
}

pub fn respond<T: Serialize>(result: NotesResult<T>) -> HttpResponse {
    match result {
        Ok(data) => HttpResponse::Ok().json(ApiResponse::ok(data)),
        Err(e) => error_response(&e),
    }
}
