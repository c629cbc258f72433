use crate::core::error::PipelineError;
use crate::core::state::{
    ContentType, MediaAsset, MixedAudioOutput, MixingEditingPhase, PhaseStatus, ProductionEvent,
    ProductionStore, VoiceAudioSegment,
};
use crate::utils::audio::{
    apply_fade_in, apply_fade_out, decode_wav, encode_wav, mix_into, ms_to_samples,
    normalize_peak, resample_linear, samples_to_ms, soft_knee_compress,
};
use anyhow::Result;
use base64::Engine;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const NORMALIZE_CEILING: f32 = 0.98;
const COMPRESS_THRESHOLD_DB: f32 = -18.0;
const COMPRESS_RATIO: f32 = 2.0;
const COMPRESS_KNEE_DB: f32 = 6.0;
const MIX_MIME_TYPE: &str = "audio/wav";

// --- Configuration ---

/// Timing/volume parameters governing one mixing run. Immutable once a run
/// starts; callers pick a preset by content type and may tweak from there.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AudioMixConfig {
    pub silence_start_ms: u64,
    pub silence_end_ms: u64,
    pub same_speaker_gap_ms: u64,
    pub different_speaker_gap_ms: u64,
    pub section_gap_ms: u64,
    pub voice_volume: f32,
    pub bgm_volume: f32,
    pub sfx_volume: f32,
    pub bgm_fade_in_ms: u64,
    pub bgm_fade_out_ms: u64,
    pub normalize_audio: bool,
    pub compress_audio: bool,
}

impl AudioMixConfig {
    pub fn preset_for(content_type: ContentType) -> Self {
        match content_type {
            ContentType::Audiobook => Self {
                silence_start_ms: 500,
                silence_end_ms: 1000,
                same_speaker_gap_ms: 300,
                different_speaker_gap_ms: 800,
                section_gap_ms: 1500,
                voice_volume: 1.0,
                bgm_volume: 0.25,
                sfx_volume: 0.5,
                bgm_fade_in_ms: 2000,
                bgm_fade_out_ms: 2500,
                normalize_audio: true,
                compress_audio: false,
            },
            ContentType::Podcast => Self {
                silence_start_ms: 300,
                silence_end_ms: 600,
                same_speaker_gap_ms: 200,
                different_speaker_gap_ms: 500,
                section_gap_ms: 1000,
                voice_volume: 1.0,
                bgm_volume: 0.2,
                sfx_volume: 0.4,
                bgm_fade_in_ms: 1500,
                bgm_fade_out_ms: 2000,
                normalize_audio: true,
                compress_audio: true,
            },
            ContentType::Drama => Self {
                silence_start_ms: 800,
                silence_end_ms: 1500,
                same_speaker_gap_ms: 400,
                different_speaker_gap_ms: 900,
                section_gap_ms: 2000,
                voice_volume: 1.0,
                bgm_volume: 0.35,
                sfx_volume: 0.6,
                bgm_fade_in_ms: 2500,
                bgm_fade_out_ms: 3000,
                normalize_audio: true,
                compress_audio: true,
            },
        }
    }
}

impl Default for AudioMixConfig {
    fn default() -> Self {
        Self::preset_for(ContentType::Audiobook)
    }
}

// --- Engine input ---

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VoiceTrack {
    /// Mono samples already at the engine sample rate.
    pub samples: Vec<f32>,
    pub speaker: String,
    /// First spoken line of a section.
    pub section_start: bool,
    pub pause_after_ms: Option<u64>,
    pub volume: Option<f32>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BgmTrack {
    pub samples: Vec<f32>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SfxTrack {
    pub samples: Vec<f32>,
    /// Best-effort cue; clips without one are spread evenly.
    pub cue_ms: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MixOutcome {
    pub samples: Vec<f32>,
    pub duration_ms: u64,
}

// --- Deterministic assembly ---

fn gap_before(previous: &VoiceTrack, current: &VoiceTrack, config: &AudioMixConfig) -> u64 {
    if let Some(pause) = previous.pause_after_ms {
        return pause;
    }
    if current.section_start {
        config.section_gap_ms
    } else if current.speaker == previous.speaker {
        config.same_speaker_gap_ms
    } else {
        config.different_speaker_gap_ms
    }
}

/// Assembles the final track. Same inputs always produce the same buffer:
/// silence, gap-separated voice clips, a faded BGM bed, overlaid SFX, then
/// optional normalization and compression.
pub fn mix_tracks(
    voice_tracks: &[VoiceTrack],
    bgm: Option<&BgmTrack>,
    sfx: &[SfxTrack],
    config: &AudioMixConfig,
    sample_rate: u32,
) -> Result<MixOutcome, PipelineError> {
    if voice_tracks.is_empty() {
        return Err(PipelineError::NoInputData);
    }

    let mut timeline: Vec<f32> = Vec::new();
    timeline.resize(ms_to_samples(config.silence_start_ms, sample_rate), 0.0);

    for (i, track) in voice_tracks.iter().enumerate() {
        if i > 0 {
            let gap_ms = gap_before(&voice_tracks[i - 1], track, config);
            let gap_samples = ms_to_samples(gap_ms, sample_rate);
            timeline.resize(timeline.len() + gap_samples, 0.0);
        }

        let gain = config.voice_volume * track.volume.unwrap_or(1.0);
        timeline.extend(track.samples.iter().map(|s| s * gain));
    }

    timeline.resize(timeline.len() + ms_to_samples(config.silence_end_ms, sample_rate), 0.0);

    if let Some(bgm) = bgm {
        if !bgm.samples.is_empty() {
            // Loop or trim the bed to the full timeline, fade, then sum under.
            let mut bed = Vec::with_capacity(timeline.len());
            while bed.len() < timeline.len() {
                let remaining = timeline.len() - bed.len();
                let take = remaining.min(bgm.samples.len());
                bed.extend_from_slice(&bgm.samples[..take]);
            }
            apply_fade_in(&mut bed, ms_to_samples(config.bgm_fade_in_ms, sample_rate));
            apply_fade_out(&mut bed, ms_to_samples(config.bgm_fade_out_ms, sample_rate));
            mix_into(&mut timeline, &bed, 0, config.bgm_volume);
        }
    }

    let placeable = sfx.iter().filter(|clip| !clip.samples.is_empty()).count();
    let mut spread_slot = 0usize;
    for clip in sfx {
        if clip.samples.is_empty() {
            continue;
        }
        let offset = match clip.cue_ms {
            Some(cue) => ms_to_samples(cue, sample_rate),
            None => {
                spread_slot += 1;
                timeline.len() * spread_slot / (placeable + 1)
            }
        };
        mix_into(&mut timeline, &clip.samples, offset, config.sfx_volume);
    }

    if config.normalize_audio {
        normalize_peak(&mut timeline, NORMALIZE_CEILING);
    }
    if config.compress_audio {
        soft_knee_compress(
            &mut timeline,
            COMPRESS_THRESHOLD_DB,
            COMPRESS_RATIO,
            COMPRESS_KNEE_DB,
        );
    }

    let duration_ms = samples_to_ms(timeline.len(), sample_rate);
    Ok(MixOutcome {
        samples: timeline,
        duration_ms,
    })
}

// --- Phase runner ---

pub struct AudioMixer {
    store: Arc<ProductionStore>,
    sample_rate: u32,
}

impl AudioMixer {
    pub fn new(store: Arc<ProductionStore>, sample_rate: u32) -> Self {
        Self { store, sample_rate }
    }

    fn decode_asset_samples(&self, asset: &MediaAsset) -> Option<Vec<f32>> {
        decode_payload(asset.audio_data.as_deref(), self.sample_rate)
    }

    fn decode_segment_samples(&self, segment: &VoiceAudioSegment) -> Option<Vec<f32>> {
        decode_payload(segment.audio_data.as_deref(), self.sample_rate)
    }

    /// Runs the mixing phase over everything the earlier phases produced.
    ///
    /// Mixing with no usable voice audio soft-completes: the phase reaches
    /// `completed` with a populated error so the user can retry mixing without
    /// resetting the upstream phases.
    pub async fn perform_mixing(&self, config: &AudioMixConfig) -> Result<()> {
        self.store
            .apply(ProductionEvent::MixingPhaseReplaced(MixingEditingPhase {
                status: PhaseStatus::Processing,
                progress: 0,
                output: None,
                error: None,
            }));

        let snapshot = self.store.snapshot();

        let mut voice_tracks = Vec::new();
        for section in &snapshot.project.script_sections {
            let status = match snapshot
                .project
                .production
                .voice_generation
                .section_status
                .get(&section.id)
            {
                Some(status) => status,
                None => continue,
            };

            // Regeneration can leave the array out of order; the line index
            // is authoritative for playback order.
            let mut segments = status.audio_segments.clone();
            segments.sort_by_key(|s| s.line_index);

            let mut first_in_section = true;
            for segment in &segments {
                let samples = match self.decode_segment_samples(segment) {
                    Some(samples) => samples,
                    None => {
                        warn!(
                            "Skipping undecodable segment {} in section {}",
                            segment.line_index, section.id
                        );
                        continue;
                    }
                };
                voice_tracks.push(VoiceTrack {
                    samples,
                    speaker: segment.speaker.clone(),
                    section_start: first_in_section,
                    pause_after_ms: segment.pause_after_ms,
                    volume: None,
                });
                first_in_section = false;
            }
        }

        let bgm = snapshot
            .project
            .production
            .media_production
            .bgm_audio
            .as_ref()
            .and_then(|asset| self.decode_asset_samples(asset))
            .map(|samples| BgmTrack { samples });

        let sfx: Vec<SfxTrack> = snapshot
            .project
            .production
            .media_production
            .sfx_audios
            .iter()
            .filter_map(|asset| self.decode_asset_samples(asset))
            .map(|samples| SfxTrack {
                samples,
                cue_ms: None,
            })
            .collect();

        let config = config.clone();
        let sample_rate = self.sample_rate;
        let outcome = tokio::task::spawn_blocking(move || {
            mix_tracks(&voice_tracks, bgm.as_ref(), &sfx, &config, sample_rate)
        })
        .await?;

        match outcome {
            Ok(outcome) => {
                info!("Mixed {} ms of audio", outcome.duration_ms);
                let wav = encode_wav(&outcome.samples, self.sample_rate);
                let audio_data = base64::engine::general_purpose::STANDARD.encode(wav);
                self.store
                    .apply(ProductionEvent::MixingPhaseReplaced(MixingEditingPhase {
                        status: PhaseStatus::Completed,
                        progress: 100,
                        output: Some(MixedAudioOutput {
                            audio_data,
                            mime_type: MIX_MIME_TYPE.to_string(),
                            duration_ms: outcome.duration_ms,
                        }),
                        error: None,
                    }));
            }
            Err(e) => {
                warn!("Mixing produced no output: {}", e);
                self.store
                    .apply(ProductionEvent::MixingPhaseReplaced(MixingEditingPhase {
                        status: PhaseStatus::Completed,
                        progress: 100,
                        output: None,
                        error: Some(e.to_string()),
                    }));
            }
        }
        Ok(())
    }
}

fn decode_payload(audio_data: Option<&str>, target_rate: u32) -> Option<Vec<f32>> {
    let raw = audio_data?;
    // Accept both bare base64 and data-URL payloads.
    let encoded = raw.rsplit("base64,").next().unwrap_or(raw);
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let clip = decode_wav(&bytes).ok()?;
    Some(resample_linear(&clip.samples, clip.sample_rate, target_rate))
}
