//! Data models for platter-resolver

pub mod catalog;
pub mod matching;
pub mod progress;
pub mod resolution;

pub use catalog::{Album, Track};
pub use matching::{MatchMethod, MatchStatus, ScoreBreakdown, StoredCandidate, VideoInfo, VideoMatch};
pub use progress::{Checkpoint, JobKind, ProgressCounters, ResolverProgress, WorkerStatus};
pub use resolution::{NewSourceResult, Resolution, ResolutionStatus, ReviewAction, SourceResult};
