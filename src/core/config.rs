use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_input")]
    pub input_folder: String,

    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_build")]
    pub build_folder: String,

    /// Skip the interactive confirmation between pipeline phases.
    #[serde(default)]
    pub unattended: bool,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub mixing: MixingConfig,

    #[serde(default)]
    pub draft: DraftConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Voice used for speakers with no character assignment.
    #[serde(default = "default_voice_id")]
    pub default_voice_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MixingConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DraftConfig {
    #[serde(default = "default_draft_max_bytes")]
    pub max_bytes: usize,

    #[serde(default = "default_autosave_seconds")]
    pub autosave_seconds: u64,
}

fn default_input() -> String {
    "input".to_string()
}
fn default_output() -> String {
    "output".to_string()
}
fn default_build() -> String {
    "build".to_string()
}
fn default_base_url() -> String {
    "http://127.0.0.1:8787".to_string()
}
fn default_voice_id() -> String {
    "narrator_default".to_string()
}
fn default_sample_rate() -> u32 {
    44100
}
fn default_draft_max_bytes() -> usize {
    4 * 1024 * 1024
}
fn default_autosave_seconds() -> u64 {
    20
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            default_voice_id: default_voice_id(),
        }
    }
}

impl Default for MixingConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
        }
    }
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_draft_max_bytes(),
            autosave_seconds: default_autosave_seconds(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_folder: default_input(),
            output_folder: default_output(),
            build_folder: default_build(),
            unattended: false,
            generation: GenerationConfig::default(),
            mixing: MixingConfig::default(),
            draft: DraftConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Path::new("config.yml");
        if !path.exists() {
            anyhow::bail!("config.yml not found. Please create one.");
        }

        let content = fs::read_to_string(path).context("Failed to read config.yml")?;
        let config: Config =
            serde_yaml_ng::from_str(&content).context("Failed to parse config.yml")?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write("config.yml", content).context("Failed to write config.yml")?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.input_folder)?;
        fs::create_dir_all(&self.output_folder)?;
        fs::create_dir_all(&self.build_folder)?;
        Ok(())
    }
}
