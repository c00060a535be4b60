//! Wallet session endpoints: connect, disconnect, network switching, and the
//! account hooks of the local key-backed wallet.

use actix_web::{web, HttpResponse, Responder};
use ethnotes_types::{ApiResponse, ConnectRequest, SwitchNetworkRequest};
use std::str::FromStr;

use super::{bad_request, error_response, respond};
use crate::error::NotesError;
use crate::wallet::{LocalWalletProvider, WalletKind};
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/wallet")
            .route("/connect", web::post().to(connect))
            .route("/disconnect", web::post().to(disconnect))
            .route("/switch-network", web::post().to(switch_network))
            .route("/local/rotate", web::post().to(rotate_local_account))
            .route("/local/revoke", web::post().to(revoke_local_wallet)),
    );
}

async fn connect(state: web::Data<AppState>, body: web::Json<ConnectRequest>) -> impl Responder {
    let kind = match WalletKind::from_str(body.wallet.trim()) {
        Ok(kind) => kind,
        Err(_) => return bad_request(format!("Unknown wallet '{}'", body.wallet)),
    };
    log::info!("[API] Connect requested via {}", kind.label());
    let result = state.coordinator.connect(kind).await;
    respond(result.map(|_| state.coordinator.snapshot()))
}

async fn disconnect(state: web::Data<AppState>) -> impl Responder {
    let result = state.coordinator.disconnect().await;
    respond(result.map(|_| state.coordinator.snapshot()))
}

async fn switch_network(
    state: web::Data<AppState>,
    body: Option<web::Json<SwitchNetworkRequest>>,
) -> HttpResponse {
    let chain_id = body.and_then(|b| b.into_inner().chain_id);
    let result = match chain_id {
        Some(chain_id) => state.coordinator.switch_network(chain_id).await,
        None => state.coordinator.switch_to_required_network().await,
    };
    respond(result.map(|_| state.coordinator.snapshot()))
}

fn local_wallet(state: &AppState) -> Result<&LocalWalletProvider, HttpResponse> {
    state.local_wallet.as_deref().ok_or_else(|| {
        error_response(&NotesError::ProviderUnavailable(WalletKind::Local.label().to_string()))
    })
}

/// Move the local wallet to its next key; the session follows via account-changed.
async fn rotate_local_account(state: web::Data<AppState>) -> HttpResponse {
    let wallet = match local_wallet(&state) {
        Ok(wallet) => wallet,
        Err(resp) => return resp,
    };
    match wallet.rotate_account() {
        Some(address) => HttpResponse::Ok().json(ApiResponse::ok(format!("{:?}", address))),
        None => error_response(&NotesError::NotConnected),
    }
}

/// Withdraw the local wallet's authorization; the session ends via account-changed.
async fn revoke_local_wallet(state: web::Data<AppState>) -> HttpResponse {
    let wallet = match local_wallet(&state) {
        Ok(wallet) => wallet,
        Err(resp) => return resp,
    };
    wallet.revoke();
    HttpResponse::Ok().json(ApiResponse::ok(()))
}
