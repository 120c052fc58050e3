//! Streaming text classification.

pub mod tags;
pub mod transform;

pub use tags::{Segment, TagDetector, TagKind, TagMatch, Vocabulary, DEFAULT_TAG_BUFFER_CAP};
pub use transform::TagSplitter;
