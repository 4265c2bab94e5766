use std::sync::Arc;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{http::header, web, App, HttpServer};
use backend::config::ModelConfig;
use backend::identifier::{IdentifierFactory, IdentifierProvider};
use backend::{configure_routes, AppConfig, AppState};

#[cfg(feature = "torch")]
fn identifier_factory(model: ModelConfig) -> IdentifierFactory {
    use backend::identifier::torch::TorchIdentifier;
    use backend::identifier::{Identifier, IdentifierInitError};

    Box::new(move || -> Result<Arc<dyn Identifier>, IdentifierInitError> {
        let identifier: Arc<dyn Identifier> = Arc::new(TorchIdentifier::load(&model)?);
        Ok(identifier)
    })
}

#[cfg(not(feature = "torch"))]
fn identifier_factory(model: ModelConfig) -> IdentifierFactory {
    use backend::identifier::{Identifier, IdentifierInitError};

    Box::new(move || -> Result<Arc<dyn Identifier>, IdentifierInitError> {
        Err(IdentifierInitError::Unavailable(format!(
            "built without the torch feature, cannot load {}",
            model.model_path.display()
        )))
    })
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    let config = AppConfig::load().map_err(|e| {
        log::error!("Failed to load configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;
    let bind_address = config.bind_address();

    let provider = Arc::new(IdentifierProvider::new(identifier_factory(
        config.model.clone(),
    )));
    // Startup load is best effort; requests retry it.
    if let Err(e) = provider.get() {
        log::warn!("Identifier not loaded at startup: {}", e);
    }

    let state = web::Data::new(AppState::new(config, provider));

    log::info!("Starting server on {}", bind_address);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
                    .allowed_headers(vec![
                        header::AUTHORIZATION,
                        header::ACCEPT,
                        header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .configure(|cfg| configure_routes(cfg, state.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}
