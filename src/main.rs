//! Eva Bot - Entry Point
//!
//! Modes:
//! - Default / --polling: long polling
//! - --webhook / -w: teloxide webhook listener

use eva_bot::{health, telegram, telegram::RunMode, Config, Gateway, Services};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let webhook_mode = args.iter().any(|a| a == "--webhook" || a == "-w");
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");

    if help_mode {
        println!("Eva Bot v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: eva-bot [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --polling, -p      Receive updates with long polling (default)");
        println!("  --webhook, -w      Receive updates through a webhook");
        println!("  --help, -h         Show this help");
        println!();
        println!("Environment variables:");
        println!("  TELEGRAM_BOT_TOKEN        Telegram bot token (required)");
        println!("  TELEGRAM_WEBHOOK_URL      Public https URL for webhook mode");
        println!("  TELEGRAM_WEBHOOK_SECRET   Webhook secret token");
        println!("  OPENAI_API_KEY            Hosted fallback model key");
        println!("  VLLM_BASE_URL             Local model server (default: http://localhost:8002/v1)");
        println!("  LORA_SERVER_URL           LoRA adapter server (default: http://vllm:8000)");
        println!("  REDIS_URL                 Redis (default: redis://localhost:6379)");
        println!("  CHROMA_HOST / CHROMA_PORT Vector store (default: localhost:8001)");
        println!("  OLLAMA_URL                Embedding server (default: http://localhost:11434)");
        println!("  HEALTH_PORT               Health server port (default: 8080)");
        println!("  LOG_FORMAT                'json' for JSON logs");
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn,h2=warn,teloxide=warn"));
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(true)
            .init();
    }

    info!("Eva Bot v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    config.validate()?;
    info!("Config: {}", serde_json::to_string(&config.summary())?);

    let health_port = config.health_port;
    let services = Services::initialize(config).await?;
    let gateway = Arc::new(Gateway::new(services));

    let health_gateway = gateway.clone();
    tokio::spawn(async move {
        if let Err(e) = health::serve(health_gateway, health_port).await {
            error!("Health server stopped: {:#}", e);
        }
    });

    let mode = if webhook_mode { RunMode::Webhook } else { RunMode::Polling };
    telegram::run(gateway, mode).await
}
