//! Data model: instances, shifted (candidate-only) instances and tracks.

use crate::geometry::{self, BBox};

/// Opaque back-reference to the frame an instance belongs to.
///
/// Treated as an opaque key by the tracker; callers decide what it means
/// (a container frame index, a dataset row id, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub i64);

/// Handle into a [`TrackArena`]. Equality is by identity: two `TrackId`s
/// are equal only if they name the same spawned track, never by name or
/// spawn time. The arena is append-only, so a `TrackId` is valid for the
/// lifetime of the tracker that minted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub(crate) usize);

/// A persistent track identity.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub spawned_on: i64,
    pub name: String,
}

/// Append-only log of tracks spawned by a tracker. Mirrors `spawned_tracks`
/// in the data model (invariant 4: append-only, identity immutable once
/// created).
#[derive(Debug, Default)]
pub struct TrackArena {
    tracks: Vec<Track>,
}

impl TrackArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, spawned_on: i64) -> TrackId {
        let id = TrackId(self.tracks.len());
        let name = format!("track_{}", id.0);
        self.tracks.push(Track {
            id,
            spawned_on,
            name,
        });
        id
    }

    pub fn get(&self, id: TrackId) -> &Track {
        &self.tracks[id.0]
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }
}

/// A detected pose, tracked or untracked.
///
/// `track` and `tracking_score` are `None` on caller-supplied (untracked)
/// instances and populated by [`crate::tracker::Tracker::track`].
#[derive(Debug, Clone)]
pub struct Instance {
    pub points: Vec<[f64; 2]>,
    pub track: Option<TrackId>,
    pub tracking_score: Option<f64>,
    pub score: Option<f64>,
    pub frame: FrameId,
}

impl Instance {
    pub fn new(frame: FrameId, points: Vec<[f64; 2]>, score: Option<f64>) -> Self {
        Self {
            points,
            track: None,
            tracking_score: None,
            score,
            frame,
        }
    }

    pub fn n_visible_points(&self) -> usize {
        geometry::n_visible_points(&self.points)
    }

    pub fn centroid(&self) -> [f64; 2] {
        geometry::centroid(&self.points)
    }

    pub fn bounding_box(&self) -> BBox {
        geometry::bounding_box(&self.points)
    }

    /// Returns a copy assigned to `track`, mirroring `attr.evolve` in the
    /// original: everything but `track`/`tracking_score` is carried over
    /// unchanged, including `frame`.
    pub fn assigned_to(&self, track: TrackId, tracking_score: Option<f64>) -> Instance {
        Instance {
            track: Some(track),
            tracking_score,
            ..self.clone()
        }
    }
}

/// A candidate-only instance produced by optical-flow propagation.
#[derive(Debug, Clone)]
pub struct ShiftedInstance {
    pub points: Vec<[f64; 2]>,
    pub track: TrackId,
    pub frame: FrameId,
    pub shift_score: f64,
}

impl ShiftedInstance {
    pub fn n_visible_points(&self) -> usize {
        geometry::n_visible_points(&self.points)
    }

    pub fn centroid(&self) -> [f64; 2] {
        geometry::centroid(&self.points)
    }

    pub fn bounding_box(&self) -> BBox {
        geometry::bounding_box(&self.points)
    }
}

/// Uniform view over an [`Instance`] or a [`ShiftedInstance`] for the
/// similarity/candidate-grouping code, which treats the two
/// interchangeably (the original's `InstanceType` duck-typed union).
#[derive(Debug, Clone, Copy)]
pub enum Candidate<'a> {
    Instance(&'a Instance),
    Shifted(&'a ShiftedInstance),
}

impl<'a> Candidate<'a> {
    pub fn points(&self) -> &'a [[f64; 2]] {
        match self {
            Candidate::Instance(i) => &i.points,
            Candidate::Shifted(s) => &s.points,
        }
    }

    pub fn track(&self) -> TrackId {
        match self {
            Candidate::Instance(i) => i.track.expect("candidates are always tracked instances"),
            Candidate::Shifted(s) => s.track,
        }
    }
}

impl<'a> From<&'a Instance> for Candidate<'a> {
    fn from(i: &'a Instance) -> Self {
        Candidate::Instance(i)
    }
}

impl<'a> From<&'a ShiftedInstance> for Candidate<'a> {
    fn from(s: &'a ShiftedInstance) -> Self {
        Candidate::Shifted(s)
    }
}
