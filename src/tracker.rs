//! Tracker core: per-frame orchestration.

use std::collections::{HashMap, HashSet, VecDeque};

use image::DynamicImage;
use itertools::Itertools;
use tracing::debug;

use crate::assignment::{CostMatrix, MatchingKind};
use crate::candidate::{CandidateMaker, MatchedFrame, last_pushed_t};
use crate::cleaner::TrackCleaner;
use crate::error::TrackerError;
use crate::instance::{Candidate, Instance, TrackArena, TrackId};
use crate::similarity::{SimilarityCache, SimilarityKind};

/// Tunables recognized by the tracker.
#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    pub track_window: usize,
    pub similarity: SimilarityKind,
    pub matching: MatchingKind,
    pub min_new_track_points: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            track_window: 5,
            similarity: SimilarityKind::Instance,
            matching: MatchingKind::Greedy,
            min_new_track_points: 0,
        }
    }
}

pub struct Tracker {
    config: TrackerConfig,
    candidate_maker: Box<dyn CandidateMaker + Send + Sync>,
    window: VecDeque<MatchedFrame>,
    tracks: TrackArena,
    cleaner: Option<TrackCleaner>,
}

impl Tracker {
    pub fn new(
        config: TrackerConfig,
        candidate_maker: Box<dyn CandidateMaker + Send + Sync>,
    ) -> Result<Self, TrackerError> {
        if config.track_window == 0 {
            return Err(TrackerError::ZeroWindow);
        }
        Ok(Self {
            config,
            candidate_maker,
            window: VecDeque::new(),
            tracks: TrackArena::new(),
            cleaner: None,
        })
    }

    pub fn with_cleaner(mut self, cleaner: TrackCleaner) -> Self {
        self.cleaner = Some(cleaner);
        self
    }

    pub fn tracks(&self) -> &TrackArena {
        &self.tracks
    }

    pub fn uses_image(&self) -> bool {
        self.candidate_maker.uses_image()
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Performs a single step of tracking.
    pub fn track(
        &mut self,
        untracked: Vec<Instance>,
        image: Option<DynamicImage>,
        t: Option<i64>,
    ) -> Result<Vec<Instance>, TrackerError> {
        let last_pushed = last_pushed_t(&self.window);
        let t = match t {
            Some(t) => {
                if let Some(last) = last_pushed
                    && t <= last
                {
                    return Err(TrackerError::OutOfOrderFrame {
                        last_pushed: last,
                        got: t,
                    });
                }
                t
            }
            None => last_pushed.map(|last| last + 1).unwrap_or(0),
        };

        let gray_image = if self.candidate_maker.uses_image() {
            image.map(|img| img.to_luma8())
        } else {
            None
        };

        if !untracked.is_empty() && self.candidate_maker.uses_image() && gray_image.is_none() {
            return Err(TrackerError::ShapeMismatch {
                detail: "candidate maker requires an image but none was given".into(),
            });
        }

        let mut tracked_instances = Vec::with_capacity(untracked.len());
        let mut assigned = HashSet::new();

        if !untracked.is_empty() {
            let candidates =
                self.candidate_maker
                    .get_candidates(&self.window, t, gray_image.as_ref());

            if !candidates.is_empty() {
                let by_track: HashMap<TrackId, Vec<_>> =
                    candidates.iter().into_group_map_by(|c| c.track());
                let mut candidate_tracks: Vec<TrackId> = by_track.keys().copied().collect();
                // `HashMap` iteration order is randomized per instance, but the
                // greedy solver's tie-break is defined over row-major order of
                // the cost matrix, so the column order must be deterministic.
                candidate_tracks.sort_unstable();

                let mut cache = SimilarityCache::new();
                let mut similarity = vec![vec![0.0_f64; candidate_tracks.len()]; untracked.len()];
                for (i, query) in untracked.iter().enumerate() {
                    for (j, track_id) in candidate_tracks.iter().enumerate() {
                        let group = &by_track[track_id];
                        similarity[i][j] = group
                            .iter()
                            .map(|reference| {
                                self.config.similarity.compute(
                                    Candidate::Instance(query),
                                    reference.as_candidate(),
                                    &mut cache,
                                )
                            })
                            .fold(f64::NEG_INFINITY, f64::max);
                    }
                }

                let cost = CostMatrix::from_fn(untracked.len(), candidate_tracks.len(), |i, j| {
                    let s = similarity[i][j];
                    if s.is_nan() { f64::INFINITY } else { -s }
                });

                let matches = self.config.matching.solve(&cost);
                for (i, j) in matches {
                    let track = candidate_tracks[j];
                    let score = similarity[i][j];
                    tracked_instances.push(untracked[i].assigned_to(track, Some(score)));
                    assigned.insert(i);
                }
            }
        }

        let matched_count = tracked_instances.len();
        let mut spawned_count = 0;
        for (i, inst) in untracked.into_iter().enumerate() {
            if assigned.contains(&i) {
                continue;
            }
            if inst.n_visible_points() < self.config.min_new_track_points {
                continue;
            }
            let track = self.tracks.spawn(t);
            tracked_instances.push(inst.assigned_to(track, None));
            spawned_count += 1;
        }

        debug!(
            t,
            matched = matched_count,
            spawned = spawned_count,
            "tracked frame"
        );

        let result = tracked_instances.clone();
        self.window.push_back(MatchedFrame {
            t,
            instances: tracked_instances,
            image: gray_image,
        });
        if self.window.len() > self.config.track_window {
            self.window.pop_front();
        }

        Ok(result)
    }

    /// Runs the cleaner over `frames` after all steps have completed.
    /// A no-op if no cleaner was configured.
    pub fn final_pass(&self, frames: &mut [MatchedFrame]) {
        if let Some(cleaner) = &self.cleaner {
            cleaner.run(frames);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::SimpleCandidateMaker;
    use crate::instance::FrameId;
    use approx::assert_relative_eq;

    fn make_tracker(min_new_track_points: usize) -> Tracker {
        let config = TrackerConfig {
            min_new_track_points,
            ..TrackerConfig::default()
        };
        Tracker::new(config, Box::new(SimpleCandidateMaker { min_points: 0 })).unwrap()
    }

    fn inst(points: Vec<[f64; 2]>, t: i64) -> Instance {
        Instance::new(FrameId(t), points, None)
    }

    #[test]
    fn s1_spawn_then_match() {
        let mut tracker = make_tracker(0);

        let frame0 = vec![inst(
            vec![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [3.0, 3.0], [4.0, 4.0]],
            0,
        )];
        let out0 = tracker.track(frame0, None, Some(0)).unwrap();
        assert_eq!(out0.len(), 1);
        let track0 = out0[0].track.unwrap();
        assert_eq!(tracker.tracks().get(track0).name, "track_0");

        let frame1 = vec![inst(
            vec![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [3.0, 3.0], [4.0, 4.0]],
            1,
        )];
        let out1 = tracker.track(frame1, None, Some(1)).unwrap();
        assert_eq!(out1.len(), 1);
        assert_eq!(out1[0].track, Some(track0));
        assert_relative_eq!(out1[0].tracking_score.unwrap(), 1.0);
    }

    #[test]
    fn s6_below_spawn_threshold_is_dropped() {
        let mut tracker = make_tracker(3);
        let frame0 = vec![inst(vec![[0.0, 0.0], [f64::NAN, f64::NAN]], 0)];
        let out0 = tracker.track(frame0, None, Some(0)).unwrap();
        assert!(out0.is_empty());
    }

    #[test]
    fn every_emitted_instance_has_a_track() {
        let mut tracker = make_tracker(0);
        let frame0 = vec![inst(vec![[0.0, 0.0]], 0), inst(vec![[5.0, 5.0]], 0)];
        let out0 = tracker.track(frame0, None, Some(0)).unwrap();
        assert!(out0.iter().all(|i| i.track.is_some()));
    }

    #[test]
    fn no_two_emitted_instances_in_one_frame_share_a_track() {
        let mut tracker = make_tracker(0);
        let frame0 = vec![inst(vec![[0.0, 0.0]], 0), inst(vec![[5.0, 5.0]], 0)];
        let out0 = tracker.track(frame0, None, Some(0)).unwrap();
        let track_near_origin = out0.iter().find(|i| i.points[0][0] < 1.0).unwrap().track;
        let track_near_five = out0.iter().find(|i| i.points[0][0] > 1.0).unwrap().track;

        let frame1 = vec![inst(vec![[0.1, 0.1]], 1), inst(vec![[5.1, 5.1]], 1)];
        let out1 = tracker.track(frame1, None, Some(1)).unwrap();
        assert_ne!(out1[0].track, out1[1].track);
        // Each instance should match its nearest predecessor's track,
        // regardless of which order the solver emitted the pair in.
        let got_origin = out1.iter().find(|i| i.points[0][0] < 1.0).unwrap().track;
        let got_five = out1.iter().find(|i| i.points[0][0] > 1.0).unwrap().track;
        assert_eq!(got_origin, track_near_origin);
        assert_eq!(got_five, track_near_five);
    }

    #[test]
    fn window_capacity_is_bounded() {
        let mut tracker = make_tracker(0);
        for t in 0..10 {
            tracker
                .track(vec![inst(vec![[t as f64, 0.0]], t)], None, Some(t))
                .unwrap();
        }
        assert!(tracker.window_len() <= 5);
    }

    #[test]
    fn out_of_order_frame_index_is_a_configuration_error() {
        let mut tracker = make_tracker(0);
        tracker
            .track(vec![inst(vec![[0.0, 0.0]], 0)], None, Some(5))
            .unwrap();
        let err = tracker
            .track(vec![inst(vec![[0.0, 0.0]], 2)], None, Some(2))
            .unwrap_err();
        assert!(matches!(err, TrackerError::OutOfOrderFrame { .. }));
    }

    #[test]
    fn flow_tracker_without_an_image_is_a_shape_mismatch() {
        use crate::candidate::FlowCandidateMaker;
        let config = TrackerConfig::default();
        let mut tracker =
            Tracker::new(config, Box::new(FlowCandidateMaker::new(0, 1.0, 15, 2))).unwrap();
        let err = tracker
            .track(vec![inst(vec![[0.0, 0.0]], 0)], None, Some(0))
            .unwrap_err();
        assert!(matches!(err, TrackerError::ShapeMismatch { .. }));
    }

    #[test]
    fn empty_frame_is_a_no_op_that_still_advances_the_window() {
        let mut tracker = make_tracker(0);
        let out = tracker.track(Vec::new(), None, Some(0)).unwrap();
        assert!(out.is_empty());
        assert_eq!(tracker.window_len(), 1);
    }
}
