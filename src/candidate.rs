//! Candidate makers and the sliding window of matched frames.

use std::collections::{HashMap, VecDeque};

use image::{GrayImage, imageops::FilterType};
use tracing::trace;

use crate::flow::{LucasKanadeFlow, OpticalFlowBackend};
use crate::instance::{Candidate, Instance, ShiftedInstance, TrackId};

/// One entry in the sliding window: the instances tracked for frame `t`,
/// plus the frame's image when the active candidate maker needs it.
/// Dropped once it ages out of the window so memory stays bounded by
/// `track_window`, not by how many frames have been processed.
pub struct MatchedFrame {
    pub t: i64,
    pub instances: Vec<Instance>,
    pub image: Option<GrayImage>,
}

/// Either a past tracked instance (replayed as-is) or a flow-shifted copy.
/// Kept as an owned pool entry rather than a borrow into the window so the
/// flow maker can hand back freshly computed `ShiftedInstance`s alongside
/// plain clones from the window with a single, uniform type.
pub enum PooledCandidate {
    Instance(Instance),
    Shifted(ShiftedInstance),
}

impl PooledCandidate {
    pub fn track(&self) -> TrackId {
        match self {
            PooledCandidate::Instance(i) => i.track.expect("window instances are always tracked"),
            PooledCandidate::Shifted(s) => s.track,
        }
    }

    pub fn as_candidate(&self) -> Candidate<'_> {
        match self {
            PooledCandidate::Instance(i) => Candidate::Instance(i),
            PooledCandidate::Shifted(s) => Candidate::Shifted(s),
        }
    }
}

/// A candidate-generation policy.
pub trait CandidateMaker {
    /// Whether [`get_candidates`](Self::get_candidates) needs `image`.
    fn uses_image(&self) -> bool;

    fn get_candidates(
        &mut self,
        window: &VecDeque<MatchedFrame>,
        t: i64,
        image: Option<&GrayImage>,
    ) -> Vec<PooledCandidate>;
}

/// Replays every past tracked instance meeting `min_points` as a
/// candidate, once per frame it appeared in.
pub struct SimpleCandidateMaker {
    pub min_points: usize,
}

impl CandidateMaker for SimpleCandidateMaker {
    fn uses_image(&self) -> bool {
        false
    }

    fn get_candidates(
        &mut self,
        window: &VecDeque<MatchedFrame>,
        _t: i64,
        _image: Option<&GrayImage>,
    ) -> Vec<PooledCandidate> {
        window
            .iter()
            .flat_map(|frame| frame.instances.iter())
            .filter(|inst| inst.n_visible_points() >= self.min_points)
            .map(|inst| PooledCandidate::Instance(inst.clone()))
            .collect()
    }
}

/// Warps every past frame's instances into the current frame via
/// pyramidal Lucas-Kanade optical flow.
pub struct FlowCandidateMaker {
    pub min_points: usize,
    pub img_scale: f64,
    pub of_window_size: u32,
    pub of_max_levels: u32,
    pub save_shifted_instances: bool,
    /// Keyed by `(source_frame_t, target_frame_t)`, retained only when
    /// `save_shifted_instances` is set.
    pub shifted_instances: HashMap<(i64, i64), Vec<ShiftedInstance>>,
    backend: Box<dyn OpticalFlowBackend + Send + Sync>,
}

impl FlowCandidateMaker {
    pub fn new(min_points: usize, img_scale: f64, of_window_size: u32, of_max_levels: u32) -> Self {
        Self {
            min_points,
            img_scale,
            of_window_size,
            of_max_levels,
            save_shifted_instances: false,
            shifted_instances: HashMap::new(),
            backend: Box::new(LucasKanadeFlow),
        }
    }

    fn scaled_image(&self, img: &GrayImage) -> GrayImage {
        if (self.img_scale - 1.0).abs() < f64::EPSILON {
            return img.clone();
        }
        let (w, h) = img.dimensions();
        let new_w = ((w as f64) * self.img_scale).round().max(1.0) as u32;
        let new_h = ((h as f64) * self.img_scale).round().max(1.0) as u32;
        image::imageops::resize(img, new_w, new_h, FilterType::Triangle)
    }

    fn flow_shift_instances(
        &self,
        ref_instances: &[Instance],
        ref_img: &GrayImage,
        new_img: &GrayImage,
    ) -> Vec<ShiftedInstance> {
        let ref_img_scaled = self.scaled_image(ref_img);
        let new_img_scaled = self.scaled_image(new_img);

        let scale = self.img_scale;
        let ref_points: Vec<[f64; 2]> = ref_instances
            .iter()
            .flat_map(|inst| {
                inst.points
                    .iter()
                    .map(move |p| [p[0] * scale, p[1] * scale])
            })
            .collect();

        let flowed = self.backend.lk_flow(
            &ref_img_scaled,
            &new_img_scaled,
            &ref_points,
            self.of_window_size,
            self.of_max_levels,
        );

        let mut shifted = Vec::new();
        let mut offset = 0;
        for ref_instance in ref_instances {
            let n = ref_instance.points.len();
            let results = &flowed[offset..offset + n];
            offset += n;

            let found_count = results.iter().filter(|r| r.found).count();
            if found_count <= self.min_points {
                continue;
            }

            let mut points = Vec::with_capacity(n);
            let mut error_sum = 0.0;
            for r in results {
                if r.found {
                    points.push([r.point[0] / scale, r.point[1] / scale]);
                    error_sum += r.error;
                } else {
                    points.push([f64::NAN, f64::NAN]);
                }
            }

            shifted.push(ShiftedInstance {
                points,
                track: ref_instance
                    .track
                    .expect("window instances are always tracked"),
                frame: ref_instance.frame,
                shift_score: -(error_sum / found_count as f64),
            });
        }

        shifted
    }
}

impl CandidateMaker for FlowCandidateMaker {
    fn uses_image(&self) -> bool {
        true
    }

    fn get_candidates(
        &mut self,
        window: &VecDeque<MatchedFrame>,
        t: i64,
        image: Option<&GrayImage>,
    ) -> Vec<PooledCandidate> {
        let Some(new_img) = image else {
            return Vec::new();
        };

        let mut candidates = Vec::new();
        for frame in window.iter() {
            if frame.instances.is_empty() {
                continue;
            }
            let Some(ref_img) = &frame.image else {
                continue;
            };

            let shifted = self.flow_shift_instances(&frame.instances, ref_img, new_img);
            trace!(
                src_t = frame.t,
                dst_t = t,
                n = shifted.len(),
                "flow shifted candidates"
            );

            if self.save_shifted_instances {
                self.shifted_instances.insert((frame.t, t), shifted.clone());
            }
            candidates.extend(shifted.into_iter().map(PooledCandidate::Shifted));
        }
        candidates
    }
}

/// The `t` of the most recently pushed window entry, if any: the window's
/// invariant is that frame indices strictly increase, so this is what the
/// tracker checks a new `t` against before accepting it.
pub fn last_pushed_t(window: &VecDeque<MatchedFrame>) -> Option<i64> {
    window.back().map(|f| f.t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{FrameId, TrackArena};

    fn window_with_one_instance(
        points: Vec<[f64; 2]>,
        track: TrackId,
        t: i64,
    ) -> VecDeque<MatchedFrame> {
        let inst = Instance {
            points,
            track: Some(track),
            tracking_score: None,
            score: None,
            frame: FrameId(t),
        };
        let mut window = VecDeque::new();
        window.push_back(MatchedFrame {
            t,
            instances: vec![inst],
            image: None,
        });
        window
    }

    #[test]
    fn simple_candidate_maker_filters_by_min_points() {
        let mut arena = TrackArena::new();
        let track = arena.spawn(0);
        let window = window_with_one_instance(vec![[0.0, 0.0], [f64::NAN, f64::NAN]], track, 0);

        let mut maker = SimpleCandidateMaker { min_points: 2 };
        assert!(maker.get_candidates(&window, 1, None).is_empty());

        let mut maker = SimpleCandidateMaker { min_points: 1 };
        assert_eq!(maker.get_candidates(&window, 1, None).len(), 1);
    }

    #[test]
    fn flow_maker_skips_frames_without_an_image() {
        let mut arena = TrackArena::new();
        let track = arena.spawn(0);
        let window = window_with_one_instance(vec![[1.0, 1.0]], track, 0);

        let mut maker = FlowCandidateMaker::new(0, 1.0, 15, 2);
        let img = GrayImage::new(10, 10);
        assert!(maker.get_candidates(&window, 1, Some(&img)).is_empty());
    }

    /// Reports `found: false` for the first `fail_count` points handed to
    /// it and `found: true` for the rest, so a test can pin exactly which
    /// reference instance's flow drops out without real LK numerics.
    struct StubFlow {
        fail_count: usize,
    }

    impl crate::flow::OpticalFlowBackend for StubFlow {
        fn lk_flow(
            &self,
            _prev: &GrayImage,
            _next: &GrayImage,
            points: &[[f64; 2]],
            _window_size: u32,
            _max_levels: u32,
        ) -> Vec<crate::flow::FlowResult> {
            points
                .iter()
                .enumerate()
                .map(|(i, &point)| crate::flow::FlowResult {
                    point,
                    found: i >= self.fail_count,
                    error: 0.0,
                })
                .collect()
        }
    }

    #[test]
    fn flow_dropout_only_affects_the_instance_it_happened_to() {
        let mut arena = TrackArena::new();
        let failing_track = arena.spawn(0);
        let surviving_track = arena.spawn(0);

        let failing = Instance {
            points: vec![[0.0, 0.0], [1.0, 1.0]],
            track: Some(failing_track),
            tracking_score: None,
            score: None,
            frame: FrameId(0),
        };
        let surviving = Instance {
            points: vec![[5.0, 5.0], [6.0, 6.0]],
            track: Some(surviving_track),
            tracking_score: None,
            score: None,
            frame: FrameId(0),
        };
        let img = GrayImage::new(10, 10);
        let mut window = VecDeque::new();
        window.push_back(MatchedFrame {
            t: 0,
            instances: vec![failing, surviving],
            image: Some(img.clone()),
        });

        let mut maker = FlowCandidateMaker {
            min_points: 0,
            img_scale: 1.0,
            of_window_size: 15,
            of_max_levels: 2,
            save_shifted_instances: false,
            shifted_instances: HashMap::new(),
            backend: Box::new(StubFlow { fail_count: 2 }),
        };

        let candidates = maker.get_candidates(&window, 1, Some(&img));
        assert_eq!(candidates.len(), 1);
        match &candidates[0] {
            PooledCandidate::Shifted(s) => assert_eq!(s.track, surviving_track),
            PooledCandidate::Instance(_) => panic!("expected a shifted candidate"),
        }
    }
}
