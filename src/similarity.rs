//! Pairwise similarity functions between instances.
//!
//! Higher is always more similar; the tracker negates to get a cost.
//! `centroid_distance` and `instance_iou` memoize centroid/bbox per
//! instance identity for the duration of one tracker step — see
//! [`SimilarityCache`]. Memoization is a performance property only; it
//! must never change the result.

use std::collections::HashMap;

use crate::geometry::BBox;
use crate::instance::Candidate;

/// Per-step cache of derived geometry, keyed by instance address.
///
/// Scoped to a single `track()` call: allocate on entry, drop on exit.
/// Never make this a process-wide or `Default`-constructed global — a
/// shared cache would silently leak matches across unrelated tracker
/// instances and frames.
#[derive(Default)]
pub struct SimilarityCache {
    centroids: HashMap<usize, [f64; 2]>,
    bboxes: HashMap<usize, BBox>,
}

fn candidate_key(candidate: &Candidate) -> usize {
    match candidate {
        Candidate::Instance(i) => *i as *const _ as usize,
        Candidate::Shifted(s) => *s as *const _ as usize,
    }
}

impl SimilarityCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn centroid(&mut self, candidate: &Candidate) -> [f64; 2] {
        let key = candidate_key(candidate);
        *self
            .centroids
            .entry(key)
            .or_insert_with(|| match candidate {
                Candidate::Instance(i) => i.centroid(),
                Candidate::Shifted(s) => s.centroid(),
            })
    }

    fn bounding_box(&mut self, candidate: &Candidate) -> BBox {
        let key = candidate_key(candidate);
        *self.bboxes.entry(key).or_insert_with(|| match candidate {
            Candidate::Instance(i) => i.bounding_box(),
            Candidate::Shifted(s) => s.bounding_box(),
        })
    }
}

/// `Σ exp(-d_j)` over joints visible in `reference`, normalized by the
/// count of visible reference joints. Asymmetric: `query` and `reference`
/// are not interchangeable. The tracker always calls this with the
/// untracked instance as `query`; see `DESIGN.md` for why that ordering
/// is preserved rather than symmetrized.
pub fn instance_similarity(query: Candidate, reference: Candidate) -> f64 {
    let q = query.points();
    let r = reference.points();
    let n_joints = r.len().min(q.len());

    let mut ref_visible = 0usize;
    let mut sum = 0.0_f64;
    for j in 0..n_joints {
        let rp = r[j];
        if rp[0].is_finite() && rp[1].is_finite() {
            ref_visible += 1;
        }
        let qp = q[j];
        let dist = (qp[0] - rp[0]).powi(2) + (qp[1] - rp[1]).powi(2);
        if dist.is_finite() {
            sum += (-dist).exp();
        }
    }

    sum / ref_visible as f64
}

/// Negative Euclidean distance between centroids.
pub fn centroid_distance(
    query: Candidate,
    reference: Candidate,
    cache: &mut SimilarityCache,
) -> f64 {
    let a = cache.centroid(&query);
    let b = cache.centroid(&reference);
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    -(dx * dx + dy * dy).sqrt()
}

/// IoU of the instances' bounding boxes.
pub fn instance_iou(query: Candidate, reference: Candidate, cache: &mut SimilarityCache) -> f64 {
    let a = cache.bounding_box(&query);
    let b = cache.bounding_box(&reference);
    a.iou(&b)
}

/// Closed set of similarity policies, dispatched once at construction and
/// monomorphized rather than boxed as a trait object (per the design
/// notes: avoid dynamic dispatch on this axis inside the hot loop).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityKind {
    Instance,
    Centroid,
    Iou,
}

impl SimilarityKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "instance" => Some(Self::Instance),
            "centroid" => Some(Self::Centroid),
            "iou" => Some(Self::Iou),
            _ => None,
        }
    }

    pub fn compute(
        &self,
        query: Candidate,
        reference: Candidate,
        cache: &mut SimilarityCache,
    ) -> f64 {
        match self {
            SimilarityKind::Instance => instance_similarity(query, reference),
            SimilarityKind::Centroid => centroid_distance(query, reference, cache),
            SimilarityKind::Iou => instance_iou(query, reference, cache),
        }
    }
}
