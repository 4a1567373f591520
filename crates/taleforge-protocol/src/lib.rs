pub mod dice;
pub mod frames;

pub use dice::{RollKind, RollOutcome};
pub use frames::{AudioChannel, AudioMode, ClientMessage, ServerMessage};
