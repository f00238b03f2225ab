//! Resolution and matching services

pub mod bulk_worker;
pub mod consensus;
pub mod jobs;
pub mod match_pipeline;
pub mod matcher;
pub mod state_manager;

pub use bulk_worker::{BulkWorker, DurationProcessor, MatchProcessor, TrackOutcome, TrackProcessor, WorkerConfig};
pub use consensus::{ConsensusConfig, ConsensusResolver};
pub use jobs::BulkJobs;
pub use match_pipeline::{MatchPipeline, PlaylistMatchSummary, VideoCandidateSource, VideoMetadataFetcher};
pub use matcher::{Matcher, MatcherConfig};
pub use state_manager::StateManager;
