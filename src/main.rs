use anyhow::{Context, Result};
use citerepo::completion::ChatCompletionsClient;
use citerepo::config::{ConfigManager, API_KEY_ENV, DATA_DIR_ENV};
use citerepo::pdf_parser::PdfTextExtractor;
use citerepo::{http_server, AppState};
use std::path::PathBuf;
use std::sync::Arc;

fn data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME").context("HOME is not set and no data directory was given")?;
    Ok(PathBuf::from(home).join(".citerepo"))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let data_dir = data_dir()?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data dir {:?}", data_dir))?;

    let db_path = data_dir.join("citerepo.db");
    log::info!("Settings database: {:?}", db_path);

    let config_manager = ConfigManager::new(db_path).context("Failed to open settings database")?;
    let config = config_manager.load().context("Failed to load settings")?;

    let api_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty());
    if api_key.is_none() {
        log::warn!("{} is not set; completion requests will be sent without credentials", API_KEY_ENV);
    }

    let completion = ChatCompletionsClient::new(&config, api_key).context("Failed to build completion client")?;
    let extractor = PdfTextExtractor::new(config.max_extract_pages);
    let state = AppState::new(config, Arc::new(completion), Arc::new(extractor));

    log::info!("CiteRepo initialized successfully");
    http_server::start_server(state).await
}
