use crate::core::error::PipelineError;
use crate::core::io::Storage;
use crate::core::state::{LocalUiState, ProductionStore, ProjectState, SessionState};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const DEFAULT_DRAFT_KEY: &str = "draft.json";

/// One resumable snapshot of the in-flight session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DraftSnapshot {
    pub step: u8,
    pub project: ProjectState,
    pub local: LocalUiState,
    pub saved_at: DateTime<Utc>,
}

impl DraftSnapshot {
    /// Captures the session. Raw uploads are stripped unconditionally; a
    /// restored session always re-prompts for attachments.
    pub fn capture(state: &SessionState) -> Self {
        let mut project = state.project.clone();
        project.uploaded_files.clear();
        Self {
            step: state.local.step,
            project,
            local: state.local.clone(),
            saved_at: Utc::now(),
        }
    }

    pub fn restore(&self) -> SessionState {
        SessionState {
            project: self.project.clone(),
            local: self.local.clone(),
        }
    }
}

/// Lossy second pass for snapshots over the size budget: segment base64
/// payloads go (URLs survive for re-fetch), media payloads go, and the mixed
/// output goes entirely. It can be rebuilt by re-running the mixing phase.
pub fn strip_heavy_payloads(snapshot: &mut DraftSnapshot) {
    let production = &mut snapshot.project.production;

    for status in production.voice_generation.section_status.values_mut() {
        for segment in &mut status.audio_segments {
            segment.audio_data = None;
        }
    }

    if let Some(bgm) = &mut production.media_production.bgm_audio {
        bgm.audio_data = None;
    }
    for sfx in &mut production.media_production.sfx_audios {
        sfx.audio_data = None;
    }
    if let Some(cover) = &mut production.media_production.cover_image {
        cover.audio_data = None;
    }

    production.mixing_editing.output = None;
}

/// Single-slot draft store over [`Storage`], bounded by `max_bytes`.
pub struct DraftStore {
    storage: Arc<dyn Storage>,
    key: String,
    max_bytes: usize,
}

impl DraftStore {
    pub fn new(storage: Arc<dyn Storage>, key: impl Into<String>, max_bytes: usize) -> Self {
        Self {
            storage,
            key: key.into(),
            max_bytes,
        }
    }

    /// Persists the snapshot. Oversize snapshots are never rejected: the
    /// lossy pass runs and the slimmed snapshot is written instead.
    pub async fn save(&self, snapshot: &DraftSnapshot) -> Result<()> {
        let serialized = serde_json::to_vec(snapshot)?;

        let serialized = if serialized.len() > self.max_bytes {
            warn!(
                "{}; stripping heavy payloads",
                PipelineError::SerializationOverflow {
                    size: serialized.len()
                }
            );
            let mut slim = snapshot.clone();
            strip_heavy_payloads(&mut slim);
            serde_json::to_vec(&slim)?
        } else {
            serialized
        };

        self.storage.write(&self.key, &serialized).await
    }

    pub async fn load(&self) -> Result<Option<DraftSnapshot>> {
        if !self.storage.exists(&self.key).await? {
            return Ok(None);
        }
        let bytes = self.storage.read(&self.key).await?;
        let snapshot = serde_json::from_slice(&bytes).context("Failed to parse saved draft")?;
        Ok(Some(snapshot))
    }

    pub async fn clear(&self) -> Result<()> {
        self.storage.delete(&self.key).await
    }
}

/// Periodic snapshot writer with a single in-flight write. Ticks that land
/// while a write is still running are skipped, not queued.
pub struct DraftAutosaver {
    drafts: Arc<DraftStore>,
    state: Arc<ProductionStore>,
    write_guard: Mutex<()>,
}

impl DraftAutosaver {
    pub fn new(drafts: Arc<DraftStore>, state: Arc<ProductionStore>) -> Self {
        Self {
            drafts,
            state,
            write_guard: Mutex::new(()),
        }
    }

    /// Captures and writes one snapshot. Returns false when another write
    /// already holds the guard.
    pub async fn save_now(&self) -> Result<bool> {
        let _guard = match self.write_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => return Ok(false),
        };
        let snapshot = DraftSnapshot::capture(&self.state.snapshot());
        self.drafts.save(&snapshot).await?;
        Ok(true)
    }

    pub fn spawn(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let autosaver = Arc::clone(self);
        tokio::spawn(async move {
            // First tick after one full period, not at spawn time.
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if let Err(e) = autosaver.save_now().await {
                    warn!("Autosave failed: {}", e);
                }
            }
        })
    }
}
