use crate::core::error::PipelineError;
use crate::core::state::{
    PhaseStatus, ProductionEvent, ProductionStore, Section, SectionVoiceStatus, VoiceAudioSegment,
    VoiceGenerationPhase,
};
use crate::services::generation::{
    BatchSpeechRequest, GenerationClient, SpeechSegmentRequest, SynthesisEvent,
};
use crate::services::roster::{ResolvedVoice, VoiceRoster};
use anyhow::{anyhow, Result};
use log::{info, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

// --- Per-section exclusive guard ---

/// Claim set serializing generation work per section. A full-section batch
/// and a single-line regeneration must never target the same section
/// concurrently; the loser fails fast instead of queueing on a stale
/// snapshot.
#[derive(Clone, Default)]
pub struct SectionLocks {
    active: Arc<Mutex<HashSet<String>>>,
}

impl SectionLocks {
    pub fn claim(&self, section_id: &str) -> Result<SectionClaim, PipelineError> {
        let mut active = self.active.lock().unwrap();
        if !active.insert(section_id.to_string()) {
            return Err(PipelineError::SectionBusy(section_id.to_string()));
        }
        Ok(SectionClaim {
            section_id: section_id.to_string(),
            active: Arc::clone(&self.active),
        })
    }
}

pub struct SectionClaim {
    section_id: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl Drop for SectionClaim {
    fn drop(&mut self) {
        self.active.lock().unwrap().remove(&self.section_id);
    }
}

// --- Timeline flattening ---

#[derive(Clone, Debug, PartialEq)]
pub struct FlatLine {
    /// Position in the full flattened timeline, counting blank lines, so
    /// indices stay stable across edits.
    pub line_index: usize,
    pub speaker: String,
    pub text: String,
    pub pause_after_ms: Option<u64>,
}

pub fn flatten_section(section: &Section) -> Vec<FlatLine> {
    let mut flat = Vec::new();
    let mut index = 0usize;
    for item in &section.timeline {
        for line in &item.lines {
            flat.push(FlatLine {
                line_index: index,
                speaker: line.speaker.clone(),
                text: line.text.clone(),
                pause_after_ms: line.pause_after_ms,
            });
            index += 1;
        }
    }
    flat
}

// --- Orchestrator ---

pub struct VoiceSynthesizer {
    client: Arc<dyn GenerationClient>,
    roster: VoiceRoster,
    store: Arc<ProductionStore>,
    locks: SectionLocks,
}

impl VoiceSynthesizer {
    pub fn new(
        client: Arc<dyn GenerationClient>,
        roster: VoiceRoster,
        store: Arc<ProductionStore>,
    ) -> Self {
        Self {
            client,
            roster,
            store,
            locks: SectionLocks::default(),
        }
    }

    pub fn resolve_voice(&self, speaker: &str) -> ResolvedVoice {
        let characters = self.store.snapshot().project.characters;
        self.roster.resolve(&characters, speaker)
    }

    fn speech_request(&self, line_text: &str, speaker: &str) -> (SpeechSegmentRequest, String) {
        let resolved = self.resolve_voice(speaker);
        let voice_id = resolved.voice_id().to_string();
        let request = match resolved {
            ResolvedVoice::System { voice_id } => SpeechSegmentRequest {
                text: line_text.to_string(),
                speaker: Some(speaker.to_string()),
                voice_name: Some(voice_id),
                ref_audio_data_url: None,
            },
            ResolvedVoice::Custom {
                ref_audio_data_url, ..
            } => SpeechSegmentRequest {
                text: line_text.to_string(),
                speaker: Some(speaker.to_string()),
                voice_name: None,
                ref_audio_data_url: Some(ref_audio_data_url),
            },
        };
        (request, voice_id)
    }

    fn set_section_status(&self, section_id: &str, status: SectionVoiceStatus) {
        self.store.apply(ProductionEvent::SectionStatusReplaced {
            section_id: section_id.to_string(),
            status,
        });
    }

    fn replace_voice_phase<F: FnOnce(&mut VoiceGenerationPhase)>(&self, update: F) {
        let mut phase = self.store.snapshot().project.production.voice_generation;
        update(&mut phase);
        self.store.apply(ProductionEvent::VoicePhaseReplaced(phase));
    }

    /// Synthesizes one section as a single batched request.
    ///
    /// Zero successful segments fail the section with the first remote error
    /// message; one or more successes complete it, and any partial failures
    /// are only logged. One bad line never stalls the workflow.
    pub async fn generate_voice_for_section(&self, section: &Section) -> Result<()> {
        let _claim = self.locks.claim(&section.id)?;
        self.generate_section_locked(section).await
    }

    async fn generate_section_locked(&self, section: &Section) -> Result<()> {
        self.set_section_status(
            &section.id,
            SectionVoiceStatus {
                status: PhaseStatus::Processing,
                progress: 0,
                audio_segments: Vec::new(),
                error: None,
            },
        );

        let flat = flatten_section(section);
        let spoken: Vec<FlatLine> = flat
            .into_iter()
            .filter(|line| !line.text.trim().is_empty())
            .collect();

        if spoken.is_empty() {
            self.set_section_status(
                &section.id,
                SectionVoiceStatus {
                    status: PhaseStatus::Completed,
                    progress: 100,
                    audio_segments: Vec::new(),
                    error: None,
                },
            );
            return Ok(());
        }

        let mut voice_ids = Vec::with_capacity(spoken.len());
        let mut segments = Vec::with_capacity(spoken.len());
        for line in &spoken {
            let (request, voice_id) = self.speech_request(&line.text, &line.speaker);
            segments.push(request);
            voice_ids.push(voice_id);
        }
        let request = BatchSpeechRequest { segments };

        // Drain streaming progress into the section status while the batch
        // runs; the channel closes when the call returns.
        let (tx, mut rx) = mpsc::channel::<SynthesisEvent>(32);
        let progress_store = Arc::clone(&self.store);
        let progress_section = section.id.clone();
        let drain = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let SynthesisEvent::Progress { completed, total } = event {
                    let progress = if total == 0 {
                        0
                    } else {
                        (completed * 100 / total) as u8
                    };
                    progress_store.apply(ProductionEvent::SectionStatusReplaced {
                        section_id: progress_section.clone(),
                        status: SectionVoiceStatus {
                            status: PhaseStatus::Processing,
                            progress,
                            audio_segments: Vec::new(),
                            error: None,
                        },
                    });
                }
            }
        });

        let response = self.client.synthesize_batch_streaming(&request, tx).await;
        let _ = drain.await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                let message = e.to_string();
                self.set_section_status(
                    &section.id,
                    SectionVoiceStatus {
                        status: PhaseStatus::Error,
                        progress: 0,
                        audio_segments: Vec::new(),
                        error: Some(message.clone()),
                    },
                );
                return Err(e);
            }
        };

        if response.segments.is_empty() {
            let message = response
                .errors
                .first()
                .map(|e| e.error.clone())
                .unwrap_or_else(|| "No audio was generated".to_string());
            self.set_section_status(
                &section.id,
                SectionVoiceStatus {
                    status: PhaseStatus::Error,
                    progress: 0,
                    audio_segments: Vec::new(),
                    error: Some(message.clone()),
                },
            );
            return Err(PipelineError::TotalBatchFailure(message).into());
        }

        if !response.errors.is_empty() {
            // Deliberately not surfaced: the section completes on any success.
            warn!(
                "Section {}: {}",
                section.id,
                PipelineError::PartialBatchFailure {
                    requested: response.total_requested,
                    failed: response.errors.len(),
                }
            );
        }

        let mut audio_segments = Vec::with_capacity(response.segments.len());
        for result in &response.segments {
            let line = match spoken.get(result.index) {
                Some(line) => line,
                None => {
                    warn!(
                        "Section {}: dropping segment with out-of-range index {}",
                        section.id, result.index
                    );
                    continue;
                }
            };
            audio_segments.push(VoiceAudioSegment {
                line_index: line.line_index,
                speaker: line.speaker.clone(),
                text: line.text.clone(),
                audio_data: result.audio_data.clone(),
                audio_url: result.audio_url.clone(),
                mime_type: result.mime_type.clone(),
                pause_after_ms: line.pause_after_ms,
                voice_id: voice_ids[result.index].clone(),
            });
        }

        self.set_section_status(
            &section.id,
            SectionVoiceStatus {
                status: PhaseStatus::Completed,
                progress: 100,
                audio_segments,
                error: None,
            },
        );
        Ok(())
    }

    /// Runs voice generation across sections in source order. With a subset
    /// filter, skipped sections still advance overall progress but are not
    /// touched.
    pub async fn perform_voice_generation(
        &self,
        sections: &[Section],
        only_section_ids: Option<&[String]>,
    ) -> Result<()> {
        let total = sections.len();
        let targeted: usize = sections
            .iter()
            .filter(|s| is_targeted(s, only_section_ids))
            .count();

        self.replace_voice_phase(|phase| {
            phase.status = PhaseStatus::Processing;
            phase.progress = 0;
            phase.detail = None;
            phase.current_section_id = None;
        });

        let mut failed_sections = 0usize;

        for (i, section) in sections.iter().enumerate() {
            if is_targeted(section, only_section_ids) {
                self.replace_voice_phase(|phase| {
                    phase.current_section_id = Some(section.id.clone());
                });
                info!("Generating voice for section {} ({})", section.id, section.name);

                if let Err(e) = self.generate_voice_for_section(section).await {
                    warn!("Section {} failed: {}", section.id, e);
                    failed_sections += 1;
                }
            }

            let progress = if total == 0 {
                100
            } else {
                ((i + 1) * 100 / total) as u8
            };
            self.replace_voice_phase(|phase| {
                phase.progress = progress;
                phase.current_section_id = None;
            });
        }

        self.replace_voice_phase(|phase| {
            phase.progress = 100;
            phase.current_section_id = None;
            if targeted > 0 && failed_sections == targeted {
                phase.status = PhaseStatus::Error;
                phase.detail = Some(format!(
                    "Voice generation failed for all {} sections",
                    targeted
                ));
            } else if failed_sections > 0 {
                phase.status = PhaseStatus::Completed;
                phase.detail = Some(format!(
                    "{} of {} sections failed and can be retried",
                    failed_sections, targeted
                ));
            } else {
                phase.status = PhaseStatus::Completed;
                phase.detail = None;
            }
        });

        Ok(())
    }

    /// Regenerates a single line and replaces its segment in place: array
    /// length unchanged, other indices untouched, listened marker cleared.
    pub async fn regenerate_voice_for_line(
        &self,
        section: &Section,
        audio_index: usize,
    ) -> Result<()> {
        let _claim = self.locks.claim(&section.id)?;

        let snapshot = self.store.snapshot();
        let status = snapshot
            .project
            .production
            .voice_generation
            .section_status
            .get(&section.id)
            .ok_or_else(|| anyhow!("Section \"{}\" has no generated audio", section.id))?;
        let existing = status
            .audio_segments
            .get(audio_index)
            .ok_or_else(|| anyhow!("No audio segment at index {}", audio_index))?
            .clone();

        let (request, voice_id) = self.speech_request(&existing.text, &existing.speaker);
        let response = self
            .client
            .synthesize_batch(&BatchSpeechRequest {
                segments: vec![request],
            })
            .await?;

        let result = match response.segments.first() {
            Some(result) => result.clone(),
            None => {
                let message = response
                    .errors
                    .first()
                    .map(|e| e.error.clone())
                    .unwrap_or_else(|| "No audio was generated".to_string());
                return Err(PipelineError::TotalBatchFailure(message).into());
            }
        };

        self.store.apply(ProductionEvent::SegmentReplaced {
            section_id: section.id.clone(),
            audio_index,
            segment: VoiceAudioSegment {
                line_index: existing.line_index,
                speaker: existing.speaker,
                text: existing.text,
                audio_data: result.audio_data,
                audio_url: result.audio_url,
                mime_type: result.mime_type,
                pause_after_ms: existing.pause_after_ms,
                voice_id,
            },
        });
        Ok(())
    }
}

fn is_targeted(section: &Section, only_section_ids: Option<&[String]>) -> bool {
    only_section_ids.map_or(true, |ids| ids.iter().any(|id| id == &section.id))
}
