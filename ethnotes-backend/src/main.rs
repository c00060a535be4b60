use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::sync::Arc;

use ethnotes_backend::config::Config;
use ethnotes_backend::controllers;
use ethnotes_backend::coordinator::NotesCoordinator;
use ethnotes_backend::detector::RpcCodeProbe;
use ethnotes_backend::networks::Catalog;
use ethnotes_backend::wallet::{LocalWalletProvider, WalletRegistry};
use ethnotes_backend::AppState;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    let port = config.port;
    log::info!("Starting ethnotes backend: {:?}", config);

    let catalog = Catalog::with_rpc_overrides(&config.rpc_overrides);

    // Without a key no wallet provider is registered; connect reports ProviderUnavailable
    let mut registry = WalletRegistry::new();
    let local_wallet = match config.wallet_private_key.as_deref() {
        Some(keys) => match LocalWalletProvider::from_private_key(keys, &catalog, config.wallet_chain_id) {
            Ok(provider) => {
                log::info!(
                    "[WALLET] Local wallet {:?} on {}",
                    provider.current_account(),
                    provider.active_network().name
                );
                let provider = Arc::new(provider);
                registry.register(provider.clone());
                Some(provider)
            }
            Err(e) => {
                log::error!("[WALLET] Local wallet disabled: {}", e);
                None
            }
        },
        None => {
            log::warn!("No wallet configured - set NOTES_WALLET_PRIVATE_KEY to enable the local wallet");
            None
        }
    };

    let coordinator = NotesCoordinator::with_catalog(config, catalog, registry, Arc::new(RpcCodeProbe));
    coordinator.initialize().await;

    let started_at = std::time::Instant::now();
    log::info!("Server starting on port {}", port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(AppState {
                coordinator: Arc::clone(&coordinator),
                local_wallet: local_wallet.clone(),
                started_at,
            }))
            .wrap(Logger::default())
            .wrap(cors)
            .configure(controllers::health::config_routes)
            .configure(controllers::wallet::config)
            .configure(controllers::notes::config)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
