use anyhow::Result;
use dramacast::core::config::Config;
use dramacast::core::io::{NativeStorage, Storage};
use dramacast::services::generation::HttpGenerationClient;
use dramacast::services::pipeline::ProductionPipeline;
use dramacast::services::roster::VoiceRoster;
use std::path::Path;
use std::sync::Arc;

const ROSTER_FILE: &str = "voices.json";

async fn load_roster(config: &Config, storage: &dyn Storage) -> Result<VoiceRoster> {
    let path = Path::new(&config.input_folder)
        .join(ROSTER_FILE)
        .to_string_lossy()
        .to_string();

    if storage.exists(&path).await? {
        let bytes = storage.read(&path).await?;
        let mut roster = VoiceRoster::from_json(&bytes)?;
        if roster.default_voice_id.is_empty() {
            roster.default_voice_id = config.generation.default_voice_id.clone();
        }
        return Ok(roster);
    }

    Ok(VoiceRoster::new(
        vec![],
        vec![],
        config.generation.default_voice_id.clone(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with valid generation settings.");
            return Err(e);
        }
    };

    config.ensure_directories()?;

    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let roster = load_roster(&config, storage.as_ref()).await?;
    let client = Arc::new(HttpGenerationClient::new(&config.generation.base_url)?);

    let pipeline = ProductionPipeline::new(config, client, roster, storage).await?;
    pipeline.run().await?;

    Ok(())
}
