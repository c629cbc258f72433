use crate::core::error::PipelineError;
use crate::core::state::{
    MediaAsset, MediaAssetKind, MediaProductionPhase, PhaseStatus, ProductionEvent, ProductionStore,
};
use crate::services::generation::GenerationClient;
use anyhow::Result;
use log::{info, warn};
use std::sync::Arc;

/// One supplementary-media choice: an already-resolved library/preset asset,
/// or a prompt that needs a generation call.
#[derive(Clone, Debug, PartialEq)]
pub enum MediaSelection {
    Preset(MediaAsset),
    Generate { kind: MediaAssetKind, prompt: String },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MediaPlan {
    pub bgm: Option<MediaSelection>,
    pub sfx: Vec<MediaSelection>,
    pub cover: Option<MediaSelection>,
}

pub struct MediaProducer {
    client: Arc<dyn GenerationClient>,
    store: Arc<ProductionStore>,
}

impl MediaProducer {
    pub fn new(client: Arc<dyn GenerationClient>, store: Arc<ProductionStore>) -> Self {
        Self { client, store }
    }

    fn replace_media_phase<F: FnOnce(&mut MediaProductionPhase)>(&self, update: F) {
        let mut phase = self.store.snapshot().project.production.media_production;
        update(&mut phase);
        self.store.apply(ProductionEvent::MediaPhaseReplaced(phase));
    }

    fn attach(&self, kind: MediaAssetKind, asset: MediaAsset) {
        let event = match kind {
            MediaAssetKind::Bgm => ProductionEvent::BgmAttached(asset),
            MediaAssetKind::Sfx => ProductionEvent::SfxAttached(asset),
            MediaAssetKind::Cover => ProductionEvent::CoverAttached(asset),
        };
        self.store.apply(event);
    }

    /// Produces supplementary media. Preset selections attach immediately
    /// without a remote call; everything else becomes a generation task. Tasks
    /// run one at a time so remote load stays bounded and progress stays
    /// monotonic, and no single failure stops the run: the phase completes
    /// even when every task failed.
    pub async fn perform_media_production(&self, plan: &MediaPlan) -> Result<()> {
        self.replace_media_phase(|phase| {
            phase.status = PhaseStatus::Processing;
            phase.progress = 0;
            phase.detail = None;
        });

        let mut tasks: Vec<(MediaAssetKind, String)> = Vec::new();

        if let Some(selection) = &plan.bgm {
            match selection {
                MediaSelection::Preset(asset) => self.attach(MediaAssetKind::Bgm, asset.clone()),
                MediaSelection::Generate { prompt, .. } => {
                    tasks.push((MediaAssetKind::Bgm, prompt.clone()))
                }
            }
        }
        for selection in &plan.sfx {
            match selection {
                MediaSelection::Preset(asset) => self.attach(MediaAssetKind::Sfx, asset.clone()),
                MediaSelection::Generate { prompt, .. } => {
                    tasks.push((MediaAssetKind::Sfx, prompt.clone()))
                }
            }
        }
        if let Some(selection) = &plan.cover {
            match selection {
                MediaSelection::Preset(asset) => self.attach(MediaAssetKind::Cover, asset.clone()),
                MediaSelection::Generate { prompt, .. } => {
                    tasks.push((MediaAssetKind::Cover, prompt.clone()))
                }
            }
        }

        let total = tasks.len();
        for (i, (kind, prompt)) in tasks.iter().enumerate() {
            info!("Media task {}/{}: {:?}", i + 1, total, kind);

            let result = match kind {
                MediaAssetKind::Bgm => self.client.generate_music(prompt).await,
                MediaAssetKind::Sfx => self.client.generate_sound_effect(prompt).await,
                MediaAssetKind::Cover => self.client.generate_cover_image(prompt).await,
            };

            match result {
                Ok(asset) => self.attach(*kind, asset),
                // Best-effort by design: log and move on to the next task.
                Err(e) => warn!("{}", PipelineError::TaskFailure(e.to_string())),
            }

            let progress = ((i + 1) * 100 / total) as u8;
            self.replace_media_phase(|phase| {
                phase.progress = progress;
            });
        }

        self.replace_media_phase(|phase| {
            phase.status = PhaseStatus::Completed;
            phase.progress = 100;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::SessionState;
    use crate::services::generation::{
        BatchSpeechRequest, BatchSpeechResponse, SpeechResponse, SpeechSegmentRequest,
    };
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct MockMediaClient {
        fail_kinds: Vec<MediaAssetKind>,
        calls: Mutex<Vec<MediaAssetKind>>,
    }

    impl MockMediaClient {
        fn new(fail_kinds: Vec<MediaAssetKind>) -> Self {
            Self {
                fail_kinds,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn respond(&self, kind: MediaAssetKind, prompt: &str) -> Result<MediaAsset> {
            self.calls.lock().unwrap().push(kind);
            if self.fail_kinds.contains(&kind) {
                return Err(anyhow!("mock generation outage"));
            }
            Ok(MediaAsset {
                kind,
                audio_data: Some("QUJD".to_string()),
                url: None,
                mime_type: "audio/wav".to_string(),
                description: prompt.to_string(),
            })
        }
    }

    #[async_trait]
    impl GenerationClient for MockMediaClient {
        async fn synthesize(&self, _request: &SpeechSegmentRequest) -> Result<SpeechResponse> {
            unimplemented!("not used")
        }
        async fn synthesize_batch(
            &self,
            _request: &BatchSpeechRequest,
        ) -> Result<BatchSpeechResponse> {
            unimplemented!("not used")
        }
        async fn generate_music(&self, prompt: &str) -> Result<MediaAsset> {
            self.respond(MediaAssetKind::Bgm, prompt)
        }
        async fn generate_sound_effect(&self, prompt: &str) -> Result<MediaAsset> {
            self.respond(MediaAssetKind::Sfx, prompt)
        }
        async fn generate_cover_image(&self, prompt: &str) -> Result<MediaAsset> {
            self.respond(MediaAssetKind::Cover, prompt)
        }
    }

    fn producer(fail_kinds: Vec<MediaAssetKind>) -> (MediaProducer, Arc<ProductionStore>, Arc<MockMediaClient>) {
        let store = Arc::new(ProductionStore::new(SessionState::default()));
        let client = Arc::new(MockMediaClient::new(fail_kinds));
        let producer = MediaProducer::new(Arc::clone(&client) as Arc<dyn GenerationClient>, Arc::clone(&store));
        (producer, store, client)
    }

    fn preset(kind: MediaAssetKind) -> MediaSelection {
        MediaSelection::Preset(MediaAsset {
            kind,
            audio_data: None,
            url: Some("https://cdn.example/preset.wav".to_string()),
            mime_type: "audio/wav".to_string(),
            description: "library pick".to_string(),
        })
    }

    #[tokio::test]
    async fn presets_attach_without_remote_calls() {
        let (producer, store, client) = producer(vec![]);
        let plan = MediaPlan {
            bgm: Some(preset(MediaAssetKind::Bgm)),
            sfx: vec![preset(MediaAssetKind::Sfx)],
            cover: None,
        };

        producer.perform_media_production(&plan).await.unwrap();

        assert!(client.calls.lock().unwrap().is_empty());
        let phase = store.snapshot().project.production.media_production;
        assert_eq!(phase.status, PhaseStatus::Completed);
        assert_eq!(phase.progress, 100);
        assert!(phase.bgm_audio.is_some());
        assert_eq!(phase.sfx_audios.len(), 1);
    }

    #[tokio::test]
    async fn tasks_run_sequentially_in_plan_order() {
        let (producer, _store, client) = producer(vec![]);
        let plan = MediaPlan {
            bgm: Some(MediaSelection::Generate {
                kind: MediaAssetKind::Bgm,
                prompt: "calm piano".to_string(),
            }),
            sfx: vec![
                MediaSelection::Generate {
                    kind: MediaAssetKind::Sfx,
                    prompt: "door creak".to_string(),
                },
                MediaSelection::Generate {
                    kind: MediaAssetKind::Sfx,
                    prompt: "rain".to_string(),
                },
            ],
            cover: Some(MediaSelection::Generate {
                kind: MediaAssetKind::Cover,
                prompt: "night scene".to_string(),
            }),
        };

        producer.perform_media_production(&plan).await.unwrap();

        let calls = client.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                MediaAssetKind::Bgm,
                MediaAssetKind::Sfx,
                MediaAssetKind::Sfx,
                MediaAssetKind::Cover,
            ]
        );
    }

    #[tokio::test]
    async fn single_failure_does_not_stop_later_tasks() {
        let (producer, store, client) = producer(vec![MediaAssetKind::Bgm]);
        let plan = MediaPlan {
            bgm: Some(MediaSelection::Generate {
                kind: MediaAssetKind::Bgm,
                prompt: "calm piano".to_string(),
            }),
            sfx: vec![MediaSelection::Generate {
                kind: MediaAssetKind::Sfx,
                prompt: "rain".to_string(),
            }],
            cover: None,
        };

        producer.perform_media_production(&plan).await.unwrap();

        assert_eq!(client.calls.lock().unwrap().len(), 2);
        let phase = store.snapshot().project.production.media_production;
        assert_eq!(phase.status, PhaseStatus::Completed);
        assert!(phase.bgm_audio.is_none());
        assert_eq!(phase.sfx_audios.len(), 1);
    }

    #[tokio::test]
    async fn phase_completes_even_when_every_task_fails() {
        let (producer, store, _client) = producer(vec![
            MediaAssetKind::Bgm,
            MediaAssetKind::Sfx,
            MediaAssetKind::Cover,
        ]);
        let plan = MediaPlan {
            bgm: Some(MediaSelection::Generate {
                kind: MediaAssetKind::Bgm,
                prompt: "a".to_string(),
            }),
            sfx: vec![MediaSelection::Generate {
                kind: MediaAssetKind::Sfx,
                prompt: "b".to_string(),
            }],
            cover: Some(MediaSelection::Generate {
                kind: MediaAssetKind::Cover,
                prompt: "c".to_string(),
            }),
        };

        producer.perform_media_production(&plan).await.unwrap();

        let phase = store.snapshot().project.production.media_production;
        assert_eq!(phase.status, PhaseStatus::Completed);
        assert_eq!(phase.progress, 100);
        assert!(phase.detail.is_none(), "task failures stay silent at phase level");
        assert!(phase.bgm_audio.is_none());
        assert!(phase.sfx_audios.is_empty());
        assert!(phase.cover_image.is_none());
    }

    #[tokio::test]
    async fn empty_plan_completes_immediately() {
        let (producer, store, _client) = producer(vec![]);
        producer
            .perform_media_production(&MediaPlan::default())
            .await
            .unwrap();

        let phase = store.snapshot().project.production.media_production;
        assert_eq!(phase.status, PhaseStatus::Completed);
        assert_eq!(phase.progress, 100);
    }
}
