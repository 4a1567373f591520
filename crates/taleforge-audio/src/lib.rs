pub mod cache;
pub mod generators;
pub mod parser;
pub mod pipeline;

pub use cache::ArtifactCache;
pub use generators::{AudioError, ElevenLabsSoundEffects, ElevenLabsTts, SoundGenerator, TtsGenerator};
pub use parser::StreamingParser;
pub use pipeline::{OrderedPipeline, SegmentProcessor};
