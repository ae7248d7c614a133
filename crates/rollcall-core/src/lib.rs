//! rollcall-core — Face-recognition attendance core.
//!
//! Matches a live face embedding against a refreshable cache of enrolled
//! embeddings (cosine distance, linear scan) and records one attendance
//! event per student per reference-timezone day.

pub mod attendance;
pub mod cache;
pub mod matcher;
pub mod store;
pub mod types;

pub use attendance::{AttendanceDecider, Decision};
pub use cache::{CacheSnapshot, EmbeddingCache};
pub use matcher::{CosineMatcher, MatchError, MatchOutcome, Matcher, MatcherConfig};
pub use store::{EmbedError, EmbeddingProvider, RecordStore, StoreError};
pub use types::{AttendanceRecord, AttendanceStatus, Embedding, EnrolledEmbedding};
