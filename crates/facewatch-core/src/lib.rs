//! facewatch-core: face identification against an enrolled encoding store.
//!
//! Holds the encoding store, the majority-vote matcher, the unknown-face
//! alert gate, and the SCRFD + ArcFace embedding provider (ONNX Runtime).

pub mod alert;
pub mod alignment;
pub mod detector;
pub mod matcher;
pub mod provider;
pub mod recognizer;
pub mod store;
pub mod types;

pub use alert::AlertGate;
pub use detector::DetectorModel;
pub use matcher::{CosineComparator, FaceComparator, MajorityVoteMatcher, Matcher};
pub use provider::{EmbeddingProvider, OnnxProvider, ProviderError};
pub use store::{EncodingStore, Encodings, StoreError};
pub use types::{BoundingBox, Decision, Embedding, FaceDecision, FaceDetection};
