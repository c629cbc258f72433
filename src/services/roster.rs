use crate::core::state::Character;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// --- External roster shapes ---

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SystemVoice {
    pub id: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CustomVoice {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub ref_audio_data_url: Option<String>,
}

/// Voice roster supplied by the host application. The pipeline only reads it.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct VoiceRoster {
    #[serde(default)]
    pub system_voices: Vec<SystemVoice>,
    #[serde(default)]
    pub custom_voices: Vec<CustomVoice>,
    #[serde(default)]
    pub default_voice_id: String,
}

/// Outcome of speaker resolution, ready to be copied into a speech request.
#[derive(Clone, Debug, PartialEq)]
pub enum ResolvedVoice {
    System { voice_id: String },
    Custom {
        voice_id: String,
        ref_audio_data_url: String,
    },
}

impl ResolvedVoice {
    pub fn voice_id(&self) -> &str {
        match self {
            ResolvedVoice::System { voice_id } => voice_id,
            ResolvedVoice::Custom { voice_id, .. } => voice_id,
        }
    }
}

impl VoiceRoster {
    pub fn new(
        system_voices: Vec<SystemVoice>,
        custom_voices: Vec<CustomVoice>,
        default_voice_id: String,
    ) -> Self {
        Self {
            system_voices,
            custom_voices,
            default_voice_id,
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("Failed to parse voice roster")
    }

    /// Maps a speaker name to a voice: character assignment first, then the
    /// roster. A custom voice with reference audio resolves to its clone URL;
    /// anything else (system voices included) resolves to a plain identifier.
    /// Speakers with no assignment fall back to the default voice.
    pub fn resolve(&self, characters: &[Character], speaker: &str) -> ResolvedVoice {
        let assigned = characters
            .iter()
            .find(|c| c.name == speaker)
            .and_then(|c| c.assigned_voice_id.clone());

        let voice_id = match assigned {
            Some(id) => id,
            None => {
                return ResolvedVoice::System {
                    voice_id: self.default_voice_id.clone(),
                }
            }
        };

        if let Some(custom) = self.custom_voices.iter().find(|v| v.id == voice_id) {
            if let Some(url) = &custom.ref_audio_data_url {
                return ResolvedVoice::Custom {
                    voice_id,
                    ref_audio_data_url: url.clone(),
                };
            }
        }

        // Unknown ids pass through unchanged; the generation service owns the
        // authoritative system-voice list.
        ResolvedVoice::System { voice_id }
    }
}
