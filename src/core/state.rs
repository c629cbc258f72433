use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

// --- Script model ---

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Section {
    pub id: String,
    pub name: String,
    pub timeline: Vec<TimelineItem>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TimelineItem {
    pub id: String,
    pub lines: Vec<ScriptLine>,
    /// Free-form sound/music hint attached by the script editor.
    #[serde(default)]
    pub sound_music: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ScriptLine {
    pub speaker: String,
    pub text: String,
    #[serde(default)]
    pub pause_after_ms: Option<u64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Character {
    pub name: String,
    #[serde(default)]
    pub assigned_voice_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

// --- Production state ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    #[default]
    Idle,
    Processing,
    Completed,
    Error,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct VoiceAudioSegment {
    /// Position of the source line in the flattened section timeline,
    /// counting blank lines. Stays correct across single-line regeneration
    /// even when the array order no longer matches.
    pub line_index: usize,
    pub speaker: String,
    pub text: String,
    #[serde(default)]
    pub audio_data: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    pub mime_type: String,
    #[serde(default)]
    pub pause_after_ms: Option<u64>,
    /// Voice the segment was actually synthesized with. Reassigning a
    /// character's voice does not touch existing segments; this field lets a
    /// UI tell stale audio apart.
    pub voice_id: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SectionVoiceStatus {
    pub status: PhaseStatus,
    pub progress: u8,
    pub audio_segments: Vec<VoiceAudioSegment>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct VoiceGenerationPhase {
    pub status: PhaseStatus,
    pub progress: u8,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub current_section_id: Option<String>,
    #[serde(default)]
    pub section_status: HashMap<String, SectionVoiceStatus>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaAssetKind {
    #[default]
    Bgm,
    Sfx,
    Cover,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct MediaAsset {
    pub kind: MediaAssetKind,
    #[serde(default)]
    pub audio_data: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub mime_type: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct MediaProductionPhase {
    pub status: PhaseStatus,
    pub progress: u8,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub bgm_audio: Option<MediaAsset>,
    #[serde(default)]
    pub sfx_audios: Vec<MediaAsset>,
    #[serde(default)]
    pub cover_image: Option<MediaAsset>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct MixedAudioOutput {
    pub audio_data: String,
    pub mime_type: String,
    pub duration_ms: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct MixingEditingPhase {
    pub status: PhaseStatus,
    pub progress: u8,
    /// Created only by a successful mix and replaced wholesale on retry.
    #[serde(default)]
    pub output: Option<MixedAudioOutput>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ProductionState {
    pub voice_generation: VoiceGenerationPhase,
    pub media_production: MediaProductionPhase,
    pub mixing_editing: MixingEditingPhase,
}

// --- Project & session ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Audiobook,
    Podcast,
    Drama,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ProjectSpec {
    pub title: String,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub synopsis: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UploadedFile {
    pub name: String,
    pub content: Vec<u8>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ProjectState {
    pub spec: ProjectSpec,
    pub script_sections: Vec<Section>,
    pub characters: Vec<Character>,
    pub production: ProductionState,
    /// Raw uploads never survive a snapshot; restored sessions re-prompt.
    #[serde(skip)]
    pub uploaded_files: Vec<UploadedFile>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct LocalUiState {
    pub step: u8,
    #[serde(default)]
    pub selected_section_id: Option<String>,
    /// Segments the reviewer has already played, keyed by
    /// `listened_key(section_id, audio_index)`.
    #[serde(default)]
    pub listened: HashSet<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SessionState {
    pub project: ProjectState,
    pub local: LocalUiState,
}

pub fn listened_key(section_id: &str, audio_index: usize) -> String {
    format!("{}:{}", section_id, audio_index)
}

// --- Events ---

/// Every mutation of session state, as one tagged union. Phase variants carry
/// the complete replacement value; nothing is merged field-by-field.
#[derive(Clone, Debug, PartialEq)]
pub enum ProductionEvent {
    VoicePhaseReplaced(VoiceGenerationPhase),
    SectionStatusReplaced {
        section_id: String,
        status: SectionVoiceStatus,
    },
    SectionVoiceCleared {
        section_id: String,
    },
    /// In-place replacement of one audio segment. Array length and all other
    /// indices are untouched; the listened marker for the slot is dropped.
    SegmentReplaced {
        section_id: String,
        audio_index: usize,
        segment: VoiceAudioSegment,
    },
    MediaPhaseReplaced(MediaProductionPhase),
    BgmAttached(MediaAsset),
    SfxAttached(MediaAsset),
    CoverAttached(MediaAsset),
    MixingPhaseReplaced(MixingEditingPhase),
    SectionsReplaced(Vec<Section>),
    CharactersReplaced(Vec<Character>),
    StepChanged(u8),
    SegmentListened {
        section_id: String,
        audio_index: usize,
    },
}

// --- Reducer ---

/// The single place session state changes. Pure: same state + same event
/// always yields the same result.
pub fn reduce(mut state: SessionState, event: ProductionEvent) -> SessionState {
    match event {
        ProductionEvent::VoicePhaseReplaced(phase) => {
            state.project.production.voice_generation = phase;
        }
        ProductionEvent::SectionStatusReplaced { section_id, status } => {
            state
                .project
                .production
                .voice_generation
                .section_status
                .insert(section_id, status);
        }
        ProductionEvent::SectionVoiceCleared { section_id } => {
            state
                .project
                .production
                .voice_generation
                .section_status
                .insert(section_id.clone(), SectionVoiceStatus::default());
            let prefix = format!("{}:", section_id);
            state.local.listened.retain(|k| !k.starts_with(&prefix));
        }
        ProductionEvent::SegmentReplaced {
            section_id,
            audio_index,
            segment,
        } => {
            if let Some(status) = state
                .project
                .production
                .voice_generation
                .section_status
                .get_mut(&section_id)
            {
                if let Some(slot) = status.audio_segments.get_mut(audio_index) {
                    *slot = segment;
                    state.local.listened.remove(&listened_key(&section_id, audio_index));
                }
            }
        }
        ProductionEvent::MediaPhaseReplaced(phase) => {
            state.project.production.media_production = phase;
        }
        ProductionEvent::BgmAttached(asset) => {
            state.project.production.media_production.bgm_audio = Some(asset);
        }
        ProductionEvent::SfxAttached(asset) => {
            state.project.production.media_production.sfx_audios.push(asset);
        }
        ProductionEvent::CoverAttached(asset) => {
            state.project.production.media_production.cover_image = Some(asset);
        }
        ProductionEvent::MixingPhaseReplaced(phase) => {
            state.project.production.mixing_editing = phase;
        }
        ProductionEvent::SectionsReplaced(sections) => {
            state.project.script_sections = sections;
        }
        ProductionEvent::CharactersReplaced(characters) => {
            state.project.characters = characters;
        }
        ProductionEvent::StepChanged(step) => {
            state.local.step = step;
        }
        ProductionEvent::SegmentListened {
            section_id,
            audio_index,
        } => {
            state.local.listened.insert(listened_key(&section_id, audio_index));
        }
    }
    state
}

// --- Store ---

/// Shared handle over session state. Orchestrators read a snapshot, decide,
/// and apply events; the reducer is the only writer.
pub struct ProductionStore {
    state: Mutex<SessionState>,
}

impl ProductionStore {
    pub fn new(state: SessionState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn apply(&self, event: ProductionEvent) {
        let mut guard = self.state.lock().unwrap();
        let current = std::mem::take(&mut *guard);
        *guard = reduce(current, event);
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.lock().unwrap().clone()
    }
}

impl Default for ProductionStore {
    fn default() -> Self {
        Self::new(SessionState::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(line_index: usize, text: &str) -> VoiceAudioSegment {
        VoiceAudioSegment {
            line_index,
            speaker: "Narrator".to_string(),
            text: text.to_string(),
            audio_data: Some("QUJD".to_string()),
            audio_url: None,
            mime_type: "audio/wav".to_string(),
            pause_after_ms: None,
            voice_id: "voice_a".to_string(),
        }
    }

    fn state_with_section(section_id: &str, segments: Vec<VoiceAudioSegment>) -> SessionState {
        let mut state = SessionState::default();
        state.project.production.voice_generation.section_status.insert(
            section_id.to_string(),
            SectionVoiceStatus {
                status: PhaseStatus::Completed,
                progress: 100,
                audio_segments: segments,
                error: None,
            },
        );
        state
    }

    #[test]
    fn clear_section_resets_to_idle_empty() {
        let state = state_with_section("s1", vec![segment(0, "a"), segment(1, "b")]);
        let state = reduce(
            state,
            ProductionEvent::SectionVoiceCleared {
                section_id: "s1".to_string(),
            },
        );

        let status = &state.project.production.voice_generation.section_status["s1"];
        assert_eq!(status.status, PhaseStatus::Idle);
        assert_eq!(status.progress, 0);
        assert!(status.audio_segments.is_empty());
        assert!(status.error.is_none());
    }

    #[test]
    fn clear_section_drops_listened_markers_for_that_section_only() {
        let mut state = state_with_section("s1", vec![segment(0, "a")]);
        state.local.listened.insert(listened_key("s1", 0));
        state.local.listened.insert(listened_key("s2", 0));

        let state = reduce(
            state,
            ProductionEvent::SectionVoiceCleared {
                section_id: "s1".to_string(),
            },
        );
        assert!(!state.local.listened.contains(&listened_key("s1", 0)));
        assert!(state.local.listened.contains(&listened_key("s2", 0)));
    }

    #[test]
    fn segment_replacement_preserves_length_and_other_slots() {
        let state = state_with_section("s1", vec![segment(0, "a"), segment(1, "b"), segment(2, "c")]);
        let replacement = VoiceAudioSegment {
            voice_id: "voice_b".to_string(),
            ..segment(1, "b-regenerated")
        };
        let state = reduce(
            state,
            ProductionEvent::SegmentReplaced {
                section_id: "s1".to_string(),
                audio_index: 1,
                segment: replacement.clone(),
            },
        );

        let status = &state.project.production.voice_generation.section_status["s1"];
        assert_eq!(status.audio_segments.len(), 3);
        assert_eq!(status.audio_segments[0], segment(0, "a"));
        assert_eq!(status.audio_segments[1], replacement);
        assert_eq!(status.audio_segments[2], segment(2, "c"));
    }

    #[test]
    fn segment_replacement_clears_listened_marker() {
        let mut state = state_with_section("s1", vec![segment(0, "a")]);
        state.local.listened.insert(listened_key("s1", 0));

        let state = reduce(
            state,
            ProductionEvent::SegmentReplaced {
                section_id: "s1".to_string(),
                audio_index: 0,
                segment: segment(0, "a2"),
            },
        );
        assert!(state.local.listened.is_empty());
    }

    #[test]
    fn segment_replacement_out_of_bounds_is_a_no_op() {
        let state = state_with_section("s1", vec![segment(0, "a")]);
        let before = state.clone();
        let state = reduce(
            state,
            ProductionEvent::SegmentReplaced {
                section_id: "s1".to_string(),
                audio_index: 5,
                segment: segment(5, "x"),
            },
        );
        assert_eq!(state, before);
    }

    #[test]
    fn phase_replacement_is_total() {
        let mut state = SessionState::default();
        state.project.production.mixing_editing = MixingEditingPhase {
            status: PhaseStatus::Completed,
            progress: 100,
            output: Some(MixedAudioOutput {
                audio_data: "old".to_string(),
                mime_type: "audio/wav".to_string(),
                duration_ms: 1000,
            }),
            error: None,
        };

        // A retry that fails replaces the whole phase; the old output must not
        // linger behind the new error.
        let state = reduce(
            state,
            ProductionEvent::MixingPhaseReplaced(MixingEditingPhase {
                status: PhaseStatus::Completed,
                progress: 100,
                output: None,
                error: Some("No voice audio available to mix".to_string()),
            }),
        );
        let phase = &state.project.production.mixing_editing;
        assert!(phase.output.is_none());
        assert!(phase.error.is_some());
    }

    #[test]
    fn uploaded_files_never_serialize() {
        let mut state = SessionState::default();
        state.project.uploaded_files.push(UploadedFile {
            name: "draft.txt".to_string(),
            content: vec![1, 2, 3],
        });

        let json = serde_json::to_string(&state).unwrap();
        let restored: SessionState = serde_json::from_str(&json).unwrap();
        assert!(restored.project.uploaded_files.is_empty());
    }

    #[test]
    fn store_applies_through_reducer() {
        let store = ProductionStore::default();
        store.apply(ProductionEvent::StepChanged(3));
        store.apply(ProductionEvent::SegmentListened {
            section_id: "s1".to_string(),
            audio_index: 2,
        });

        let snapshot = store.snapshot();
        assert_eq!(snapshot.local.step, 3);
        assert!(snapshot.local.listened.contains(&listened_key("s1", 2)));
    }
}
