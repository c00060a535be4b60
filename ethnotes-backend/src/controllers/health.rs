use actix_web::{web, HttpResponse, Responder};
use ethnotes_types::{ApiResponse, HealthStatus};

use crate::AppState;

/// Version from Cargo.toml, available at compile time
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn config_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/health").route(web::get().to(health_check)));
    cfg.service(web::resource("/api/state").route(web::get().to(get_state)));
}

async fn health_check(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(ApiResponse::ok(HealthStatus {
        status: "ok".to_string(),
        version: VERSION.to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        wallets: state
            .coordinator
            .available_wallets()
            .iter()
            .map(|kind| kind.to_string())
            .collect(),
    }))
}

/// Everything the presentation layer renders
async fn get_state(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(ApiResponse::ok(state.coordinator.snapshot()))
}
