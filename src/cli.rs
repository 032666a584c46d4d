//! Command-line surface: one flag per tracker option, each defaulted.
//! Unknown enum values fail construction with a descriptive error rather
//! than panicking.

use clap::Parser;

use crate::assignment::MatchingKind;
use crate::candidate::{CandidateMaker, FlowCandidateMaker, SimpleCandidateMaker};
use crate::cleaner::TrackCleaner;
use crate::error::TrackerError;
use crate::similarity::SimilarityKind;
use crate::tracker::{Tracker, TrackerConfig};

#[derive(Parser, Debug, Clone)]
#[command(about = "Multi-object pose tracker", rename_all = "snake_case")]
pub struct TrackerArgs {
    /// Candidate maker: simple, flow, or None for a pass-through tracker.
    #[arg(long, default_value = "None")]
    pub tracker: String,

    /// Pairwise similarity function: instance, centroid, or iou.
    #[arg(long, default_value = "instance")]
    pub similarity: String,

    /// Bipartite assignment solver: hungarian or greedy.
    #[arg(long = "match", default_value = "greedy")]
    pub matching: String,

    #[arg(long, default_value_t = 5)]
    pub track_window: usize,

    #[arg(long, default_value_t = 0)]
    pub min_new_track_points: usize,

    #[arg(long, default_value_t = 0)]
    pub min_match_points: usize,

    #[arg(long, default_value_t = 1.0)]
    pub img_scale: f64,

    #[arg(long, default_value_t = 21)]
    pub of_window_size: u32,

    #[arg(long, default_value_t = 3)]
    pub of_max_levels: u32,

    /// If non-zero, clean tracking results assuming this many instances per frame.
    #[arg(long, default_value_t = 0)]
    pub clean_instance_count: usize,
}

impl TrackerArgs {
    /// Builds a [`Tracker`] from these flags, or `None` if `--tracker
    /// None` was given (a pass-through, untracked configuration).
    pub fn build(&self) -> Result<Option<Tracker>, TrackerError> {
        if self.tracker.eq_ignore_ascii_case("none") {
            return Ok(None);
        }

        let similarity = SimilarityKind::parse(&self.similarity).ok_or_else(|| {
            TrackerError::ConfigurationError {
                policy: "similarity",
                value: self.similarity.clone(),
            }
        })?;
        let matching = MatchingKind::parse(&self.matching).ok_or_else(|| {
            TrackerError::ConfigurationError {
                policy: "match",
                value: self.matching.clone(),
            }
        })?;

        let candidate_maker: Box<dyn CandidateMaker + Send + Sync> = match self.tracker.as_str() {
            "simple" => Box::new(SimpleCandidateMaker {
                min_points: self.min_match_points,
            }),
            "flow" => Box::new(FlowCandidateMaker::new(
                self.min_match_points,
                self.img_scale,
                self.of_window_size,
                self.of_max_levels,
            )),
            other => {
                return Err(TrackerError::ConfigurationError {
                    policy: "tracker",
                    value: other.to_string(),
                });
            }
        };

        let config = TrackerConfig {
            track_window: self.track_window,
            similarity,
            matching,
            min_new_track_points: self.min_new_track_points,
        };

        let mut tracker = Tracker::new(config, candidate_maker)?;
        if self.clean_instance_count > 0 {
            tracker = tracker.with_cleaner(TrackCleaner {
                instance_count: self.clean_instance_count,
            });
        }
        Ok(Some(tracker))
    }
}
