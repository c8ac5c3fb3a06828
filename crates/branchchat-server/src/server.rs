use std::io;
use std::path::PathBuf;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};

use crate::handlers;
use crate::state::{AppState, ProviderKind};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub provider: ProviderKind,
    pub llm_base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: String,
    pub data_dir: Option<PathBuf>,
    pub max_tokens: u32,
}

pub fn app_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(handlers::health::handler))
            .route("/chat", web::post().to(handlers::chat::handler))
            .route(
                "/conversations",
                web::get().to(handlers::conversations::list),
            )
            .route(
                "/conversations/{conversation_id}",
                web::get().to(handlers::conversations::get),
            )
            .route(
                "/conversations/{conversation_id}",
                web::delete().to(handlers::conversations::delete),
            )
            .route(
                "/conversations/{conversation_id}/messages",
                web::get().to(handlers::conversations::list_messages),
            )
            .route(
                "/conversations/{conversation_id}/messages",
                web::post().to(handlers::conversations::append_message),
            )
            .route(
                "/conversations/{conversation_id}/active-path",
                web::put().to(handlers::conversations::set_active_path),
            )
            .route(
                "/conversations/{conversation_id}/edit",
                web::post().to(handlers::edit::handler),
            )
            .route(
                "/conversations/{conversation_id}/reroll",
                web::post().to(handlers::reroll::handler),
            )
            .route(
                "/conversations/{conversation_id}/branches",
                web::get().to(handlers::branches::list),
            )
            .route(
                "/conversations/{conversation_id}/branches/select",
                web::post().to(handlers::branches::select),
            )
            .route(
                "/conversations/{conversation_id}/branches/cycle",
                web::post().to(handlers::branches::cycle),
            )
            .route(
                "/conversations/{conversation_id}/stop",
                web::post().to(handlers::stop::handler),
            ),
    );
}

pub async fn run_server(config: ServerConfig) -> io::Result<()> {
    log::info!(
        "Initializing server with provider: {:?}, base URL: {}",
        config.provider,
        config.llm_base_url.as_deref().unwrap_or("(provider default)")
    );
    let state = web::Data::new(AppState::new_with_config(&config).await?);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Cors::permissive())
            .configure(app_config)
    })
    .bind(format!("0.0.0.0:{}", config.port))?
    .run()
    .await
}
