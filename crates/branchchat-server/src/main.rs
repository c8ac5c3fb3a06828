use clap::Parser;
use std::io;
use std::path::PathBuf;

use branchchat_server::logging::init_logging;
use branchchat_server::{run_server, ProviderKind, ServerConfig};

#[derive(Parser, Debug, Clone)]
#[command(name = "branchchat-server")]
#[command(about = "Branching chat conversation server")]
#[command(version)]
struct Cli {
    /// Enable debug mode
    #[arg(long, env = "DEBUG", default_value = "false")]
    debug: bool,

    /// Server port
    #[arg(long, env = "PORT", default_value = "8081")]
    port: u16,

    /// LLM provider (openai or anthropic)
    #[arg(long, env = "LLM_PROVIDER", value_enum, default_value = "anthropic")]
    provider: ProviderKind,

    /// LLM API base URL (provider default when omitted)
    #[arg(long, env = "LLM_BASE_URL")]
    llm_base_url: Option<String>,

    /// LLM model name
    #[arg(long, env = "LLM_MODEL")]
    model: Option<String>,

    /// LLM API key
    #[arg(long, env = "LLM_API_KEY", default_value = "")]
    api_key: String,

    /// Directory for stored conversations (defaults to ~/.branchchat)
    #[arg(long, env = "BRANCHCHAT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Output token cap per reply
    #[arg(long, env = "LLM_MAX_TOKENS", default_value = "4096")]
    max_tokens: u32,

    /// Log level (overrides debug flag)
    #[arg(long, env = "RUST_LOG")]
    log_level: Option<String>,
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    let cli = Cli::parse();

    match &cli.log_level {
        Some(level) => env_logger::Builder::new().parse_filters(level).init(),
        None => init_logging(cli.debug),
    }

    log::info!("Starting branchchat server on port {}", cli.port);
    log::info!("LLM Configuration:");
    log::info!("  Provider: {:?}", cli.provider);
    log::info!(
        "  Base URL: {}",
        cli.llm_base_url.as_deref().unwrap_or("(provider default)")
    );
    log::info!("  Model: {}", cli.model.as_deref().unwrap_or("(provider default)"));

    if cli.api_key.is_empty() {
        log::warn!("No LLM API key configured; generation requests will fail upstream");
    }

    run_server(ServerConfig {
        port: cli.port,
        provider: cli.provider,
        llm_base_url: cli.llm_base_url,
        model: cli.model,
        api_key: cli.api_key,
        data_dir: cli.data_dir,
        max_tokens: cli.max_tokens,
    })
    .await
}
