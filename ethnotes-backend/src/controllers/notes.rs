//! Notes REST API.
//!
//! Mutating endpoints return a fee quote; the presentation layer confirms or
//! cancels it through `/api/quotes/{ticket}`. Delete is fee-exempt and runs
//! straight through to settlement.

use actix_web::{web, HttpResponse, Responder};
use ethnotes_types::{CreateNoteRequest, LocalErrorRequest, SaveEditRequest, SaveNoteRequest};

use super::{bad_request, respond};
use crate::contract::NoteId;
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/notes")
            .route("", web::post().to(create_note))
            .route("/load", web::post().to(load_notes))
            .route("/{id}", web::put().to(save_edit))
            .route("/{id}", web::delete().to(delete_note))
            .route("/{id}/content", web::put().to(save_note))
            .route("/{id}/edit", web::post().to(start_edit)),
    );
    cfg.service(
        web::scope("/api/quotes")
            .route("/{ticket}/confirm", web::post().to(confirm_quote))
            .route("/{ticket}/cancel", web::post().to(cancel_quote)),
    );
    cfg.service(
        web::scope("/api/errors")
            .route("/clear", web::post().to(clear_error))
            .route("/local", web::post().to(set_local_error)),
    );
}

fn parse_id(raw: &str) -> Result<NoteId, HttpResponse> {
    raw.parse::<NoteId>().map_err(bad_request)
}

async fn load_notes(state: web::Data<AppState>) -> impl Responder {
    let result = state.coordinator.load_notes().await;
    respond(result.map(|_| state.coordinator.snapshot()))
}

async fn create_note(state: web::Data<AppState>, body: web::Json<CreateNoteRequest>) -> impl Responder {
    let title = body.into_inner().title;
    if title.trim().is_empty() {
        return bad_request("Title is required");
    }
    respond(state.coordinator.quote_create(title).await)
}

async fn save_note(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<SaveNoteRequest>,
) -> HttpResponse {
    let id = match parse_id(&path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(state.coordinator.quote_save(id, body.into_inner().content).await)
}

async fn start_edit(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let id = match parse_id(&path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(state.coordinator.quote_start_edit(id).await)
}

async fn save_edit(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<SaveEditRequest>,
) -> HttpResponse {
    let id = match parse_id(&path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let SaveEditRequest { title, content } = body.into_inner();
    respond(state.coordinator.quote_save_edit(id, title, content).await)
}

async fn delete_note(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let id = match parse_id(&path) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    respond(state.coordinator.delete(id).await)
}

async fn confirm_quote(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    respond(state.coordinator.confirm(&path).await)
}

async fn cancel_quote(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let result = state.coordinator.cancel(&path);
    respond(result.map(|_| state.coordinator.snapshot()))
}

async fn clear_error(state: web::Data<AppState>) -> impl Responder {
    state.coordinator.clear_error();
    HttpResponse::Ok().json(ethnotes_types::ApiResponse::ok(state.coordinator.snapshot()))
}

async fn set_local_error(
    state: web::Data<AppState>,
    body: Option<web::Json<LocalErrorRequest>>,
) -> impl Responder {
    let message = body
        .and_then(|b| b.into_inner().message)
        .filter(|m| !m.trim().is_empty());
    state.coordinator.set_local_error(message);
    HttpResponse::Ok().json(ethnotes_types::ApiResponse::ok(state.coordinator.snapshot()))
}
