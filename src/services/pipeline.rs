use crate::core::config::Config;
use crate::core::io::Storage;
use crate::core::state::{
    Character, PhaseStatus, ProductionStore, ProjectSpec, ProjectState, Section, SessionState,
};
use crate::services::draft::{DraftAutosaver, DraftSnapshot, DraftStore, DEFAULT_DRAFT_KEY};
use crate::services::generation::GenerationClient;
use crate::services::media::{MediaPlan, MediaProducer, MediaSelection};
use crate::services::mixing::{AudioMixConfig, AudioMixer};
use crate::services::roster::VoiceRoster;
use crate::services::synthesis::VoiceSynthesizer;
use anyhow::{Context, Result};
use base64::Engine;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const SCRIPT_FILE: &str = "script.json";

/// Project script as authored by the editing UI and dropped into the input
/// folder.
#[derive(serde::Deserialize, Clone, Debug)]
pub struct ScriptFile {
    pub spec: ProjectSpec,
    pub sections: Vec<Section>,
    #[serde(default)]
    pub characters: Vec<Character>,
}

/// Derives the media work list from the script: one BGM bed for the whole
/// piece, one SFX per timeline sound hint, one cover image.
pub fn build_media_plan(spec: &ProjectSpec, sections: &[Section]) -> MediaPlan {
    use crate::core::state::MediaAssetKind;

    let bgm_prompt = if spec.synopsis.trim().is_empty() {
        format!("Background music for \"{}\"", spec.title)
    } else {
        spec.synopsis.clone()
    };

    let mut sfx = Vec::new();
    for section in sections {
        for item in &section.timeline {
            if let Some(hint) = &item.sound_music {
                if !hint.trim().is_empty() {
                    sfx.push(MediaSelection::Generate {
                        kind: MediaAssetKind::Sfx,
                        prompt: hint.clone(),
                    });
                }
            }
        }
    }

    MediaPlan {
        bgm: Some(MediaSelection::Generate {
            kind: MediaAssetKind::Bgm,
            prompt: bgm_prompt,
        }),
        sfx,
        cover: Some(MediaSelection::Generate {
            kind: MediaAssetKind::Cover,
            prompt: format!("Cover art for \"{}\"", spec.title),
        }),
    }
}

pub struct ProductionPipeline {
    config: Config,
    store: Arc<ProductionStore>,
    synthesizer: VoiceSynthesizer,
    media: MediaProducer,
    mixer: AudioMixer,
    drafts: Arc<DraftStore>,
    autosaver: Arc<DraftAutosaver>,
    storage: Arc<dyn Storage>,
}

impl ProductionPipeline {
    /// Builds the pipeline, resuming from a saved draft when one exists and
    /// otherwise loading the script file from the input folder.
    pub async fn new(
        config: Config,
        client: Arc<dyn GenerationClient>,
        roster: VoiceRoster,
        storage: Arc<dyn Storage>,
    ) -> Result<Self> {
        let draft_key = Path::new(&config.build_folder)
            .join(DEFAULT_DRAFT_KEY)
            .to_string_lossy()
            .to_string();
        let drafts = Arc::new(DraftStore::new(
            Arc::clone(&storage),
            draft_key,
            config.draft.max_bytes,
        ));

        let state = match drafts.load().await? {
            Some(snapshot) => {
                println!(
                    "Resuming draft \"{}\" saved at {}",
                    snapshot.project.spec.title, snapshot.saved_at
                );
                snapshot.restore()
            }
            None => {
                let script = Self::load_script(&config, storage.as_ref()).await?;
                SessionState {
                    project: ProjectState {
                        spec: script.spec,
                        script_sections: script.sections,
                        characters: script.characters,
                        ..Default::default()
                    },
                    local: Default::default(),
                }
            }
        };

        let store = Arc::new(ProductionStore::new(state));
        let autosaver = Arc::new(DraftAutosaver::new(Arc::clone(&drafts), Arc::clone(&store)));
        let synthesizer = VoiceSynthesizer::new(Arc::clone(&client), roster, Arc::clone(&store));
        let media = MediaProducer::new(Arc::clone(&client), Arc::clone(&store));
        let mixer = AudioMixer::new(Arc::clone(&store), config.mixing.sample_rate);

        Ok(Self {
            config,
            store,
            synthesizer,
            media,
            mixer,
            drafts,
            autosaver,
            storage,
        })
    }

    async fn load_script(config: &Config, storage: &dyn Storage) -> Result<ScriptFile> {
        let path = Path::new(&config.input_folder)
            .join(SCRIPT_FILE)
            .to_string_lossy()
            .to_string();
        let bytes = storage
            .read(&path)
            .await
            .with_context(|| format!("Failed to read script file {}", path))?;
        serde_json::from_slice(&bytes).context("Failed to parse script file")
    }

    pub fn store(&self) -> Arc<ProductionStore> {
        Arc::clone(&self.store)
    }

    fn confirm_continue(&self, prompt: &str) -> bool {
        if self.config.unattended {
            return true;
        }
        match inquire::Confirm::new(prompt).with_default(true).prompt() {
            Ok(answer) => answer,
            Err(_) => {
                println!("Error reading input, stopping.");
                false
            }
        }
    }

    pub async fn run(&self) -> Result<()> {
        let autosave_handle = self
            .autosaver
            .spawn(Duration::from_secs(self.config.draft.autosave_seconds));

        let result = self.run_phases().await;

        autosave_handle.abort();
        result
    }

    async fn run_phases(&self) -> Result<()> {
        let snapshot = self.store.snapshot();
        let sections = snapshot.project.script_sections.clone();
        let spec = snapshot.project.spec.clone();

        // 1. Voice synthesis
        println!("Synthesizing voices ({} sections)...", sections.len());

        let pb = ProgressBar::new(100);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        let watch_store = Arc::clone(&self.store);
        let watch_pb = pb.clone();
        let watcher = tokio::spawn(async move {
            loop {
                let phase = watch_store.snapshot().project.production.voice_generation;
                watch_pb.set_position(phase.progress as u64);
                if let Some(id) = &phase.current_section_id {
                    watch_pb.set_message(id.clone());
                }
                if phase.progress >= 100
                    && matches!(phase.status, PhaseStatus::Completed | PhaseStatus::Error)
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(150)).await;
            }
        });

        self.synthesizer
            .perform_voice_generation(&sections, None)
            .await?;
        let _ = watcher.await;
        pb.finish_with_message("voice synthesis done");

        let voice_phase = self.store.snapshot().project.production.voice_generation;
        if let Some(detail) = &voice_phase.detail {
            println!("{}", detail);
        }
        self.save_draft().await;

        if voice_phase.status == PhaseStatus::Error {
            println!("Voice generation failed; fix the script or service and rerun to retry.");
            return Ok(());
        }
        if !self.confirm_continue("Continue to media production?") {
            return Ok(());
        }

        // 2. Media production
        println!("Producing supplementary media...");
        let plan = build_media_plan(&spec, &sections);
        self.media.perform_media_production(&plan).await?;
        self.save_draft().await;

        if !self.confirm_continue("Continue to mixing?") {
            return Ok(());
        }

        // 3. Mixing
        println!("Mixing final track...");
        let mix_config = AudioMixConfig::preset_for(spec.content_type);
        self.mixer.perform_mixing(&mix_config).await?;

        let mixing = self.store.snapshot().project.production.mixing_editing;
        match mixing.output {
            Some(output) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(&output.audio_data)
                    .context("Mixed output is not valid base64")?;
                let filename = format!("{}.wav", sanitize_filename(&spec.title));
                let path = Path::new(&self.config.output_folder)
                    .join(filename)
                    .to_string_lossy()
                    .to_string();
                self.storage.write(&path, &bytes).await?;
                println!(
                    "Mix complete: {} ({} ms)",
                    path, output.duration_ms
                );

                // The finished run consumes the draft slot.
                self.drafts.clear().await?;
            }
            None => {
                let message = mixing
                    .error
                    .unwrap_or_else(|| "Mixing produced no output".to_string());
                println!("Mixing finished without output: {}", message);
                self.save_draft().await;
            }
        }

        Ok(())
    }

    async fn save_draft(&self) {
        match self.autosaver.save_now().await {
            Ok(true) => info!("Draft saved"),
            Ok(false) => info!("Draft save skipped, another write in flight"),
            Err(e) => warn!("Draft save failed: {}", e),
        }
    }

    /// Saves one snapshot immediately, outside the autosave cadence.
    pub async fn snapshot_draft(&self) -> Result<()> {
        self.drafts
            .save(&DraftSnapshot::capture(&self.store.snapshot()))
            .await
    }
}

fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "mixdown".to_string()
    } else {
        cleaned
    }
}
