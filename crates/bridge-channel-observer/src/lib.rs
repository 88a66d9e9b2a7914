pub mod error;
pub mod intervention;
pub mod mention_tracker;
pub mod pipeline;
pub mod store;
pub mod types;

pub use error::{ChannelObserverError, Result};
pub use mention_tracker::MentionTracker;
pub use pipeline::{ChannelPipeline, ChannelPipelineConfig, ChannelTransport, DigestEngine, DigestCompressor, Judge, InterveneResponder};
pub use store::ChannelStore;
