mod assignment;
mod candidate;
mod cleaner;
mod cli;
mod error;
mod flow;
mod geometry;
mod instance;
mod similarity;
mod tracker;

pub use assignment::{CostMatrix, MatchingKind, greedy_matching, hungarian_matching};
pub use candidate::{CandidateMaker, FlowCandidateMaker, MatchedFrame, SimpleCandidateMaker};
pub use cleaner::TrackCleaner;
pub use cli::TrackerArgs;
pub use error::TrackerError;
pub use flow::{FlowResult, LucasKanadeFlow, OpticalFlowBackend};
pub use geometry::{BBox, bounding_box, centroid, n_visible_points};
pub use instance::{Candidate, FrameId, Instance, ShiftedInstance, Track, TrackArena, TrackId};
pub use similarity::{SimilarityKind, centroid_distance, instance_iou, instance_similarity};
pub use tracker::{Tracker, TrackerConfig};
