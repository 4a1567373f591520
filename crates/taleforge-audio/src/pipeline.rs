//! Turns parsed segments into audio `ServerMessage`s, respecting the
//! current audio mode, and an ordered-concurrent pipeline that runs
//! generation for every segment in parallel while delivering results in the
//! order the text produced them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use taleforge_campaign::VoiceRegistry;
use taleforge_core::config::{AMBIENT_DURATION_SECS, SFX_DURATION_SECS};
use taleforge_markers::{Segment, SegmentKind};
use taleforge_protocol::{AudioMode, ServerMessage};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::cache::ArtifactCache;
use crate::generators::{SoundGenerator, TtsGenerator};

fn mode_allows(mode: AudioMode, kind: SegmentKind) -> bool {
    match mode {
        AudioMode::Full => matches!(
            kind,
            SegmentKind::Narrate | SegmentKind::Npc | SegmentKind::Ambient | SegmentKind::Sfx
        ),
        AudioMode::Dialogue => {
            matches!(kind, SegmentKind::Npc | SegmentKind::Ambient | SegmentKind::Sfx)
        }
        AudioMode::Ambient => matches!(kind, SegmentKind::Ambient | SegmentKind::Sfx),
        AudioMode::Off => false,
    }
}

/// Resolves a segment into zero or one audio message, checking cache first.
pub struct SegmentProcessor {
    voices: VoiceRegistry,
    tts: Arc<dyn TtsGenerator>,
    sound: Arc<dyn SoundGenerator>,
    cache: Arc<ArtifactCache>,
    mode: RwLock<AudioMode>,
}

impl SegmentProcessor {
    pub fn new(
        voices: VoiceRegistry,
        tts: Arc<dyn TtsGenerator>,
        sound: Arc<dyn SoundGenerator>,
        cache: Arc<ArtifactCache>,
        mode: AudioMode,
    ) -> Self {
        Self {
            voices,
            tts,
            sound,
            cache,
            mode: RwLock::new(mode),
        }
    }

    pub fn set_mode(&self, mode: AudioMode) {
        *self.mode.write().unwrap() = mode;
    }

    pub fn mode(&self) -> AudioMode {
        *self.mode.read().unwrap()
    }

    pub async fn process_segment(&self, segment: &Segment) -> Vec<ServerMessage> {
        if !mode_allows(self.mode(), segment.kind) {
            return Vec::new();
        }

        match segment.kind {
            SegmentKind::Narrate => self.speak("narrator", &segment.content).await,
            SegmentKind::Npc => self.speak(&segment.meta, &segment.content).await,
            SegmentKind::Ambient => self.generate_sound("ambient", &segment.meta, AMBIENT_DURATION_SECS).await,
            SegmentKind::Sfx => self.generate_sound("sfx", &segment.meta, SFX_DURATION_SECS).await,
            SegmentKind::Roll => Vec::new(),
        }
    }

    async fn speak(&self, speaker: &str, text: &str) -> Vec<ServerMessage> {
        let Some(voice_id) = self.voices.get_voice_id(speaker) else {
            warn!(speaker, "no voice registered, skipping narration audio");
            return Vec::new();
        };
        let settings = if speaker == "narrator" {
            self.voices.narrator.as_ref().and_then(|e| e.settings)
        } else {
            self.voices.npcs.get(speaker).and_then(|e| e.settings)
        };

        match self.tts.generate(text, voice_id, settings).await {
            Ok(Some(bytes)) => {
                let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
                vec![ServerMessage::voice_audio(speaker, data)]
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, speaker, "TTS generation failed");
                Vec::new()
            }
        }
    }

    async fn generate_sound(&self, prefix: &str, description: &str, duration_secs: f32) -> Vec<ServerMessage> {
        if let Some(bytes) = self.cache.get(prefix, description).await {
            let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
            return vec![self.wrap_sound(prefix, data)];
        }

        match self.sound.generate(description, duration_secs).await {
            Ok(Some(bytes)) => {
                if let Err(e) = self.cache.put(prefix, description, &bytes).await {
                    warn!(error = %e, prefix, "failed to cache generated audio");
                }
                let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
                vec![self.wrap_sound(prefix, data)]
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, prefix, description, "sound generation failed");
                Vec::new()
            }
        }
    }

    fn wrap_sound(&self, prefix: &str, data: String) -> ServerMessage {
        if prefix == "ambient" {
            ServerMessage::ambient_audio(data)
        } else {
            ServerMessage::sfx_audio(data)
        }
    }
}

use base64::Engine as _;

enum QueueItem {
    Task(JoinHandle<Vec<ServerMessage>>),
    Flush(oneshot::Sender<()>),
}

/// Spawns generation for every ready segment immediately, then delivers the
/// resulting messages through `output_tx` in strict enqueue order — a
/// single FIFO drain worker awaits each task regardless of how long its
/// generation actually takes.
pub struct OrderedPipeline {
    parser: crate::parser::StreamingParser,
    processor: Arc<SegmentProcessor>,
    queue_tx: mpsc::UnboundedSender<QueueItem>,
    drain_handle: JoinHandle<()>,
    cancelled: Arc<AtomicBool>,
    sent_messages: Arc<Mutex<Vec<ServerMessage>>>,
    abort_handles: std::sync::Mutex<Vec<tokio::task::AbortHandle>>,
}

impl OrderedPipeline {
    pub fn new(processor: Arc<SegmentProcessor>, output_tx: mpsc::Sender<ServerMessage>) -> Self {
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<QueueItem>();
        let cancelled = Arc::new(AtomicBool::new(false));
        let sent_messages: Arc<Mutex<Vec<ServerMessage>>> = Arc::new(Mutex::new(Vec::new()));

        let drain_cancelled = cancelled.clone();
        let drain_sent = sent_messages.clone();
        let drain_handle = tokio::spawn(async move {
            while let Some(item) = queue_rx.recv().await {
                match item {
                    QueueItem::Task(handle) => match handle.await {
                        Ok(messages) => {
                            for msg in messages {
                                if drain_cancelled.load(Ordering::SeqCst) {
                                    break;
                                }
                                drain_sent.lock().await.push(msg.clone());
                                if output_tx.send(msg).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            if !e.is_cancelled() {
                                warn!(error = %e, "audio generation task panicked");
                            }
                        }
                    },
                    QueueItem::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        Self {
            parser: crate::parser::StreamingParser::new(),
            processor,
            queue_tx,
            drain_handle,
            cancelled,
            sent_messages,
            abort_handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Feed a raw text delta. Non-blocking — spawns generation tasks for any
    /// segments the parser completes, without waiting on them. Segments the
    /// current audio mode suppresses are dropped here, before they ever get a
    /// task or a FIFO slot.
    pub fn feed(&mut self, raw_delta: &str) {
        for segment in self.parser.feed(raw_delta) {
            self.spawn_segment(segment);
        }
    }

    fn spawn_segment(&self, segment: Segment) {
        if !mode_allows(self.processor.mode(), segment.kind) {
            return;
        }
        let processor = self.processor.clone();
        let handle = tokio::spawn(async move { processor.process_segment(&segment).await });
        self.abort_handles.lock().unwrap().push(handle.abort_handle());
        let _ = self.queue_tx.send(QueueItem::Task(handle));
    }

    /// Flush remaining buffered text and wait for every queued task up to
    /// this point to be drained and delivered.
    pub async fn flush(&mut self) {
        for segment in self.parser.flush() {
            self.spawn_segment(segment);
        }
        let (tx, rx) = oneshot::channel();
        let _ = self.queue_tx.send(QueueItem::Flush(tx));
        let _ = rx.await;
    }

    /// Stop delivering messages immediately. Tasks already drained stay
    /// delivered; every outstanding generator task is aborted rather than
    /// left to run to completion against a channel nobody reads anymore.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        for handle in self.abort_handles.lock().unwrap().iter() {
            handle.abort();
        }
        self.drain_handle.abort();
    }

    pub async fn sent_messages(&self) -> Vec<ServerMessage> {
        self.sent_messages.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::AudioError;
    use async_trait::async_trait;
    use taleforge_campaign::{VoiceEntry, VoiceSettings};
    use tokio::time::{sleep, Duration};

    struct SlowTts {
        delay_ms: u64,
    }

    #[async_trait]
    impl TtsGenerator for SlowTts {
        async fn generate(
            &self,
            text: &str,
            _voice_id: &str,
            _settings: Option<VoiceSettings>,
        ) -> Result<Option<Vec<u8>>, AudioError> {
            sleep(Duration::from_millis(self.delay_ms)).await;
            Ok(Some(text.as_bytes().to_vec()))
        }
    }

    struct NoopSound;

    #[async_trait]
    impl SoundGenerator for NoopSound {
        async fn generate(&self, _description: &str, _duration: f32) -> Result<Option<Vec<u8>>, AudioError> {
            Ok(Some(b"sound".to_vec()))
        }
    }

    fn registry_with_narrator() -> VoiceRegistry {
        let mut registry = VoiceRegistry::default();
        registry.narrator = Some(VoiceEntry {
            voice_id: "narrator-voice".to_string(),
            settings: None,
        });
        registry
    }

    #[tokio::test]
    async fn delivers_in_enqueue_order_despite_variable_latency() {
        let tmp = std::env::temp_dir().join("taleforge-pipeline-order-test");
        let processor = Arc::new(SegmentProcessor::new(
            registry_with_narrator(),
            Arc::new(SlowTts { delay_ms: 5 }),
            Arc::new(NoopSound),
            Arc::new(ArtifactCache::new(&tmp)),
            AudioMode::Full,
        ));

        let (out_tx, mut out_rx) = mpsc::channel(16);
        let mut pipeline = OrderedPipeline::new(processor, out_tx);

        pipeline.feed("First sentence. Second sentence. Third sentence. ");
        pipeline.flush().await;
        drop(pipeline);

        let mut order = Vec::new();
        while let Some(ServerMessage::Audio { speaker: Some(speaker), .. }) = out_rx.recv().await {
            order.push(speaker);
        }
        assert_eq!(order.len(), 3);
        tokio::fs::remove_dir_all(&tmp).await.ok();
    }

    #[tokio::test]
    async fn off_mode_produces_no_audio() {
        let tmp = std::env::temp_dir().join("taleforge-pipeline-off-test");
        let processor = Arc::new(SegmentProcessor::new(
            registry_with_narrator(),
            Arc::new(SlowTts { delay_ms: 0 }),
            Arc::new(NoopSound),
            Arc::new(ArtifactCache::new(&tmp)),
            AudioMode::Off,
        ));

        let (out_tx, mut out_rx) = mpsc::channel(16);
        let mut pipeline = OrderedPipeline::new(processor, out_tx);
        pipeline.feed("Some narration here. ");
        pipeline.flush().await;
        drop(pipeline);

        assert!(out_rx.recv().await.is_none());
        tokio::fs::remove_dir_all(&tmp).await.ok();
    }

    #[tokio::test]
    async fn off_mode_segments_never_reach_the_queue() {
        let tmp = std::env::temp_dir().join("taleforge-pipeline-off-queue-test");
        let processor = Arc::new(SegmentProcessor::new(
            registry_with_narrator(),
            Arc::new(SlowTts { delay_ms: 0 }),
            Arc::new(NoopSound),
            Arc::new(ArtifactCache::new(&tmp)),
            AudioMode::Off,
        ));

        let (out_tx, out_rx) = mpsc::channel(16);
        let mut pipeline = OrderedPipeline::new(processor, out_tx);
        pipeline.feed("Some narration here. ");

        assert!(pipeline.abort_handles.lock().unwrap().is_empty());
        drop(out_rx);
        pipeline.flush().await;
        tokio::fs::remove_dir_all(&tmp).await.ok();
    }

    #[tokio::test]
    async fn cancel_aborts_in_flight_generation() {
        let tmp = std::env::temp_dir().join("taleforge-pipeline-cancel-test");
        let processor = Arc::new(SegmentProcessor::new(
            registry_with_narrator(),
            Arc::new(SlowTts { delay_ms: 200 }),
            Arc::new(NoopSound),
            Arc::new(ArtifactCache::new(&tmp)),
            AudioMode::Full,
        ));

        let (out_tx, mut out_rx) = mpsc::channel(16);
        let mut pipeline = OrderedPipeline::new(processor, out_tx);
        pipeline.feed("First sentence. ");
        pipeline.cancel();

        // Give the aborted drain worker and generation task a moment to
        // actually unwind and drop their sender before asserting on it.
        sleep(Duration::from_millis(50)).await;
        assert!(out_rx.recv().await.is_none());
        tokio::fs::remove_dir_all(&tmp).await.ok();
    }
}
