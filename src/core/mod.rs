pub mod audio;
pub mod conversation;
pub mod events;
pub mod peer;
pub mod realtime;
pub mod transcript;

// Re-export commonly used types for convenience
pub use audio::{AudioChunk, SegmentationWarning, Segmenter, SegmenterConfig};

pub use conversation::{
    AudioSink, ConversationConfig, ConversationDeps, ConversationHandle, EndReason, LoopOutcome,
    LoopState, TranscriptLine,
};

pub use events::{Event, EventCategory, EventManager, EventPayload};

pub use peer::{IceCandidate, Peer, PeerConfig, PeerManager};

pub use realtime::{
    ProviderConnector, RealtimeConfig, RealtimeError, RealtimeProvider, RealtimeResult,
    SessionConnector, SpeechSession, get_supported_realtime_providers,
};

pub use transcript::{SharedTranscriptAccumulator, TranscriptAccumulator};
