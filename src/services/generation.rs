use crate::core::error::PipelineError;
use crate::core::state::{MediaAsset, MediaAssetKind};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use url::Url;

// --- Wire types ---

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechSegmentRequest {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    /// System voice identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_name: Option<String>,
    /// Reference audio for cloned/custom voices.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_audio_data_url: Option<String>,
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct BatchSpeechRequest {
    pub segments: Vec<SpeechSegmentRequest>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct SpeechResponse {
    #[serde(default)]
    pub audio_data: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    pub mime_type: String,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatchSegmentResult {
    /// Index of the originating request segment, not the response position.
    pub index: usize,
    #[serde(default)]
    pub audio_data: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
    pub mime_type: String,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct BatchSegmentError {
    pub index: usize,
    pub error: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct BatchSpeechResponse {
    #[serde(default)]
    pub segments: Vec<BatchSegmentResult>,
    #[serde(default)]
    pub errors: Vec<BatchSegmentError>,
    pub total_requested: usize,
    pub total_generated: usize,
}

/// Progress events emitted by the streaming batch endpoint.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum SynthesisEvent {
    Start {
        total: usize,
    },
    Progress {
        completed: usize,
        total: usize,
    },
    Segment {
        index: usize,
        #[serde(default)]
        audio_data: Option<String>,
        #[serde(default)]
        audio_url: Option<String>,
        mime_type: String,
    },
    Error {
        index: usize,
        error: String,
    },
    Done {
        total_generated: usize,
    },
}

#[derive(Debug, Serialize, Clone)]
struct MediaRequest<'a> {
    prompt: &'a str,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
struct MediaResponse {
    #[serde(default)]
    audio_data: Option<String>,
    #[serde(default)]
    url: Option<String>,
    mime_type: String,
}

// --- Client trait ---

#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn synthesize(&self, request: &SpeechSegmentRequest) -> Result<SpeechResponse>;

    async fn synthesize_batch(&self, request: &BatchSpeechRequest) -> Result<BatchSpeechResponse>;

    /// Streaming batch synthesis. The default degrades to one batch call
    /// bracketed by start/done so non-streaming backends stay usable.
    async fn synthesize_batch_streaming(
        &self,
        request: &BatchSpeechRequest,
        events: mpsc::Sender<SynthesisEvent>,
    ) -> Result<BatchSpeechResponse> {
        let total = request.segments.len();
        let _ = events.send(SynthesisEvent::Start { total }).await;

        let response = self.synthesize_batch(request).await?;
        for segment in &response.segments {
            let _ = events
                .send(SynthesisEvent::Segment {
                    index: segment.index,
                    audio_data: segment.audio_data.clone(),
                    audio_url: segment.audio_url.clone(),
                    mime_type: segment.mime_type.clone(),
                })
                .await;
        }
        for error in &response.errors {
            let _ = events
                .send(SynthesisEvent::Error {
                    index: error.index,
                    error: error.error.clone(),
                })
                .await;
        }
        let _ = events
            .send(SynthesisEvent::Done {
                total_generated: response.total_generated,
            })
            .await;

        Ok(response)
    }

    async fn generate_music(&self, prompt: &str) -> Result<MediaAsset>;
    async fn generate_sound_effect(&self, prompt: &str) -> Result<MediaAsset>;
    async fn generate_cover_image(&self, prompt: &str) -> Result<MediaAsset>;
}

// --- HTTP implementation ---

pub struct HttpGenerationClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpGenerationClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut normalized = base_url.to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let base_url = Url::parse(&normalized)
            .with_context(|| format!("Invalid generation service URL: {}", base_url))?;

        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    async fn post_json<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let url = self.endpoint(path)?;
        let response = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| PipelineError::NetworkFailure(e.to_string()))?
            .error_for_status()
            .map_err(|e| PipelineError::NetworkFailure(e.to_string()))?;

        let parsed = response
            .json::<R>()
            .await
            .map_err(|e| PipelineError::NetworkFailure(e.to_string()))?;
        debug!("POST {} ok", url);
        Ok(parsed)
    }

    async fn generate_media(&self, path: &str, kind: MediaAssetKind, prompt: &str) -> Result<MediaAsset> {
        let response: MediaResponse = self.post_json(path, &MediaRequest { prompt }).await?;
        Ok(MediaAsset {
            kind,
            audio_data: response.audio_data,
            url: response.url,
            mime_type: response.mime_type,
            description: prompt.to_string(),
        })
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn synthesize(&self, request: &SpeechSegmentRequest) -> Result<SpeechResponse> {
        self.post_json("api/speech", request).await
    }

    async fn synthesize_batch(&self, request: &BatchSpeechRequest) -> Result<BatchSpeechResponse> {
        self.post_json("api/speech/batch", request).await
    }

    /// Real streaming over a line-delimited JSON event body.
    async fn synthesize_batch_streaming(
        &self,
        request: &BatchSpeechRequest,
        events: mpsc::Sender<SynthesisEvent>,
    ) -> Result<BatchSpeechResponse> {
        let url = self.endpoint("api/speech/stream")?;
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| PipelineError::NetworkFailure(e.to_string()))?
            .error_for_status()
            .map_err(|e| PipelineError::NetworkFailure(e.to_string()))?;

        let mut segments = Vec::new();
        let mut errors = Vec::new();
        let mut total_generated = None;

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| PipelineError::NetworkFailure(e.to_string()))?;
            buffer.extend_from_slice(&chunk);

            while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let event: SynthesisEvent = match serde_json::from_str(line) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("Skipping malformed stream event: {} ({})", line, e);
                        continue;
                    }
                };

                match &event {
                    SynthesisEvent::Segment {
                        index,
                        audio_data,
                        audio_url,
                        mime_type,
                    } => segments.push(BatchSegmentResult {
                        index: *index,
                        audio_data: audio_data.clone(),
                        audio_url: audio_url.clone(),
                        mime_type: mime_type.clone(),
                    }),
                    SynthesisEvent::Error { index, error } => errors.push(BatchSegmentError {
                        index: *index,
                        error: error.clone(),
                    }),
                    SynthesisEvent::Done {
                        total_generated: done_total,
                    } => total_generated = Some(*done_total),
                    _ => {}
                }

                let _ = events.send(event).await;
            }
        }

        Ok(BatchSpeechResponse {
            total_requested: request.segments.len(),
            total_generated: total_generated.unwrap_or(segments.len()),
            segments,
            errors,
        })
    }

    async fn generate_music(&self, prompt: &str) -> Result<MediaAsset> {
        self.generate_media("api/media/music", MediaAssetKind::Bgm, prompt).await
    }

    async fn generate_sound_effect(&self, prompt: &str) -> Result<MediaAsset> {
        self.generate_media("api/media/sfx", MediaAssetKind::Sfx, prompt).await
    }

    async fn generate_cover_image(&self, prompt: &str) -> Result<MediaAsset> {
        self.generate_media("api/media/cover", MediaAssetKind::Cover, prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticBatchClient {
        response: BatchSpeechResponse,
    }

    #[async_trait]
    impl GenerationClient for StaticBatchClient {
        async fn synthesize(&self, _request: &SpeechSegmentRequest) -> Result<SpeechResponse> {
            unimplemented!("not used")
        }

        async fn synthesize_batch(
            &self,
            _request: &BatchSpeechRequest,
        ) -> Result<BatchSpeechResponse> {
            Ok(BatchSpeechResponse {
                segments: self.response.segments.clone(),
                errors: self.response.errors.clone(),
                total_requested: self.response.total_requested,
                total_generated: self.response.total_generated,
            })
        }

        async fn generate_music(&self, _prompt: &str) -> Result<MediaAsset> {
            unimplemented!("not used")
        }
        async fn generate_sound_effect(&self, _prompt: &str) -> Result<MediaAsset> {
            unimplemented!("not used")
        }
        async fn generate_cover_image(&self, _prompt: &str) -> Result<MediaAsset> {
            unimplemented!("not used")
        }
    }

    #[tokio::test]
    async fn default_streaming_brackets_batch_with_start_and_done() {
        let client = StaticBatchClient {
            response: BatchSpeechResponse {
                segments: vec![BatchSegmentResult {
                    index: 0,
                    audio_data: Some("QUJD".to_string()),
                    audio_url: None,
                    mime_type: "audio/wav".to_string(),
                }],
                errors: vec![BatchSegmentError {
                    index: 1,
                    error: "voice unavailable".to_string(),
                }],
                total_requested: 2,
                total_generated: 1,
            },
        };

        let request = BatchSpeechRequest {
            segments: vec![
                SpeechSegmentRequest {
                    text: "a".to_string(),
                    ..Default::default()
                },
                SpeechSegmentRequest {
                    text: "b".to_string(),
                    ..Default::default()
                },
            ],
        };

        let (tx, mut rx) = mpsc::channel(16);
        client.synthesize_batch_streaming(&request, tx).await.unwrap();

        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            received.push(event);
        }

        assert!(matches!(received.first(), Some(SynthesisEvent::Start { total: 2 })));
        assert!(matches!(received.last(), Some(SynthesisEvent::Done { total_generated: 1 })));
        assert!(received
            .iter()
            .any(|e| matches!(e, SynthesisEvent::Segment { index: 0, .. })));
        assert!(received
            .iter()
            .any(|e| matches!(e, SynthesisEvent::Error { index: 1, .. })));
    }

    #[test]
    fn stream_events_parse_from_tagged_json() {
        let event: SynthesisEvent =
            serde_json::from_str(r#"{"type":"segment","index":3,"audioData":"QQ==","mimeType":"audio/wav"}"#)
                .unwrap();
        assert!(matches!(event, SynthesisEvent::Segment { index: 3, .. }));

        let event: SynthesisEvent =
            serde_json::from_str(r#"{"type":"done","totalGenerated":7}"#).unwrap();
        assert!(matches!(event, SynthesisEvent::Done { total_generated: 7 }));
    }

    #[test]
    fn batch_request_serializes_camel_case() {
        let request = BatchSpeechRequest {
            segments: vec![SpeechSegmentRequest {
                text: "hello".to_string(),
                speaker: Some("Ann".to_string()),
                voice_name: None,
                ref_audio_data_url: Some("data:audio/wav;base64,QQ==".to_string()),
            }],
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("refAudioDataUrl"));
        assert!(!json.contains("voiceName"), "unset options are omitted");
    }
}
