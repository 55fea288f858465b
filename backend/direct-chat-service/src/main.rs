use actix_web::{web, App, HttpServer};
use direct_chat_service::{
    config::{self, StoreBackend},
    db, error, logging, metrics, routes,
    services::SystemClock,
    state::AppState,
    store::{MemoryStore, PgStore, Stores},
};
use std::sync::Arc;

#[actix_web::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let stores = match cfg.store_backend {
        StoreBackend::Postgres => {
            let url = cfg.database_url.as_deref().ok_or_else(|| {
                error::AppError::Config("DATABASE_URL missing".to_string())
            })?;
            let db = db::init_pool(url)
                .await
                .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;
            Stores::shared(Arc::new(PgStore::new(db)))
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store, state is lost on restart");
            Stores::shared(Arc::new(MemoryStore::new()))
        }
    };

    let state = AppState::new(cfg.clone(), stores, Arc::new(SystemClock));

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(
        %bind_addr,
        store_backend = ?cfg.store_backend,
        policy = ?cfg.policy,
        "starting direct-chat-service"
    );

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .service(routes::wsroute::ws_handler)
            .service(routes::messages::get_history)
            .service(routes::conversations::list_conversations)
            .service(routes::conversations::get_presence)
            .route("/metrics", web::get().to(metrics::metrics_handler))
            .route("/health", web::get().to(|| async { "OK" }))
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind REST: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("REST server: {e}")))
}
