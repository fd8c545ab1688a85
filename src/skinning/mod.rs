use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::skeleton::TreeSkeleton;

pub mod builders;
mod walker;

pub use walker::build_skins;

/// Priority of a forced cross-section required by topology (child
/// attachments, girth-continuity points).
pub const PRIORITY_STRUCTURAL: u8 = 2;
/// Priority of a break point; wins over structural positions nearby.
pub const PRIORITY_BREAK: u8 = 3;
/// Default merge range for relevant positions, in skin-position units.
pub const RELEVANT_RANGE: f32 = 0.05;
/// Floor for the UV length denominator of near-zero-length skins.
pub const MIN_SKIN_LENGTH: f32 = 0.1;
/// Cap rings keep their neighbour's girth scaled down by this factor.
pub const CAP_GIRTH_FACTOR: f32 = 1e-3;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentType {
    BeginCap,
    Begin,
    Middle,
    End,
    EndCap,
}

impl SegmentType {
    pub fn is_cap(self) -> bool {
        matches!(self, SegmentType::BeginCap | SegmentType::EndCap)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuilderKind {
    Default,
    Trunk,
    Shape,
    Welding,
}

/// One cross-section descriptor along a skin. Stored field-per-array on the
/// skin; this struct is the value view used when appending or gathering.
#[derive(Copy, Clone, Debug)]
pub struct Segment {
    pub branch: usize,
    pub structure: usize,
    pub center: Vec3,
    pub direction: Vec3,
    pub normal: Vec3,
    pub girth: f32,
    pub side_count: u32,
    pub position_on_branch: f32,
    pub position_on_skin: f32,
    pub segment_type: SegmentType,
    pub builder_kind: BuilderKind,
}

/// Sub-range of a skin handled by one builder.
#[derive(Copy, Clone, Debug)]
pub struct BuilderRange {
    pub from: f32,
    pub to: f32,
    pub kind: BuilderKind,
    pub shape_id: Option<u32>,
}

/// Maps a skin-position range back to the owning branch.
#[derive(Copy, Clone, Debug)]
pub struct BranchRange {
    pub from: f32,
    pub to: f32,
    pub branch: usize,
}

#[derive(Copy, Clone, Debug)]
pub struct RelevantPosition {
    pub position: f32,
    pub priority: u8,
}

/// One vertex of a cross-section ring at unit girth: its offset in the ring
/// plane and its radial parameter in [0,1].
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct ShapeVertex {
    pub offset: Vec2,
    pub radial: f32,
}

/// An ordered, growable sequence of cross-sections spanning one chain of
/// branches linked by follow-ups. Segment fields live in parallel arrays so
/// the triangulation job can consume them without chasing pointers.
pub struct BranchSkin {
    pub id: usize,
    /// Sum of the member branches' lengths; fixed once the chain is known.
    pub length: f32,
    pub girth_min: f32,
    pub girth_max: f32,

    pub branch_ids: Vec<usize>,
    pub structure_ids: Vec<usize>,
    pub centers: Vec<Vec3>,
    pub directions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub girths: Vec<f32>,
    pub side_counts: Vec<u32>,
    pub positions_on_branch: Vec<f32>,
    pub positions_on_skin: Vec<f32>,
    pub segment_types: Vec<SegmentType>,
    pub builder_kinds: Vec<BuilderKind>,
    /// Custom ring per segment; empty unless a Shape builder produced it.
    pub shape_rings: Vec<Vec<ShapeVertex>>,

    pub builder_ranges: Vec<BuilderRange>,
    pub branch_ranges: Vec<BranchRange>,
    pub relevant_positions: Vec<RelevantPosition>,
}

impl BranchSkin {
    pub fn new(id: usize, length: f32) -> Self {
        Self {
            id,
            length,
            girth_min: 0.,
            girth_max: 0.,
            branch_ids: Vec::new(),
            structure_ids: Vec::new(),
            centers: Vec::new(),
            directions: Vec::new(),
            normals: Vec::new(),
            girths: Vec::new(),
            side_counts: Vec::new(),
            positions_on_branch: Vec::new(),
            positions_on_skin: Vec::new(),
            segment_types: Vec::new(),
            builder_kinds: Vec::new(),
            shape_rings: Vec::new(),
            builder_ranges: vec![BuilderRange {
                from: 0.,
                to: 1.,
                kind: BuilderKind::Default,
                shape_id: None,
            }],
            branch_ranges: Vec::new(),
            relevant_positions: Vec::new(),
        }
    }

    pub fn segment_count(&self) -> usize {
        self.centers.len()
    }

    /// Denominator for V coordinates; floored so zero-length chains stay
    /// finite.
    pub fn uv_length(&self) -> f32 {
        self.length.max(MIN_SKIN_LENGTH)
    }

    pub fn push_segment(&mut self, segment: Segment, shape_ring: Vec<ShapeVertex>) {
        debug_assert!(
            self.positions_on_skin
                .last()
                .map_or(true, |&last| segment.position_on_skin >= last),
            "segments must be appended in increasing skin position"
        );
        self.branch_ids.push(segment.branch);
        self.structure_ids.push(segment.structure);
        self.centers.push(segment.center);
        self.directions.push(segment.direction);
        self.normals.push(segment.normal);
        self.girths.push(segment.girth);
        self.side_counts.push(segment.side_count);
        self.positions_on_branch.push(segment.position_on_branch);
        self.positions_on_skin.push(segment.position_on_skin);
        self.segment_types.push(segment.segment_type);
        self.builder_kinds.push(segment.builder_kind);
        self.shape_rings.push(shape_ring);
    }

    pub fn segment(&self, i: usize) -> Segment {
        Segment {
            branch: self.branch_ids[i],
            structure: self.structure_ids[i],
            center: self.centers[i],
            direction: self.directions[i],
            normal: self.normals[i],
            girth: self.girths[i],
            side_count: self.side_counts[i],
            position_on_branch: self.positions_on_branch[i],
            position_on_skin: self.positions_on_skin[i],
            segment_type: self.segment_types[i],
            builder_kind: self.builder_kinds[i],
        }
    }

    pub fn add_branch_range(&mut self, from: f32, to: f32, branch: usize) {
        self.branch_ranges.push(BranchRange { from, to, branch });
    }

    /// Carve `[from, to]` out for `kind`, splitting whatever ranges covered
    /// it. The range list stays sorted, non-overlapping and covering [0,1].
    pub fn insert_builder_range(&mut self, from: f32, to: f32, kind: BuilderKind, shape_id: Option<u32>) {
        let from = from.clamp(0., 1.);
        let to = to.clamp(0., 1.);
        if to <= from {
            return;
        }
        let mut ranges = Vec::with_capacity(self.builder_ranges.len() + 2);
        for range in &self.builder_ranges {
            if range.to <= from || range.from >= to {
                ranges.push(*range);
                continue;
            }
            if range.from < from {
                ranges.push(BuilderRange { to: from, ..*range });
            }
            if range.to > to {
                ranges.push(BuilderRange { from: to, ..*range });
            }
        }
        ranges.push(BuilderRange {
            from,
            to,
            kind,
            shape_id,
        });
        ranges.sort_by(|a, b| a.from.partial_cmp(&b.from).unwrap());
        self.builder_ranges = ranges;
    }

    /// Find the builder owning `position`. A position sitting exactly on a
    /// range boundary belongs to the earlier range when `inclusive_upper` is
    /// set and to the later one otherwise; the walker flips the flag on each
    /// branch's closing sample so boundaries are not double-counted.
    /// Returns the builder kind, its shape id and the range-local position.
    pub fn resolve_builder(&self, position: f32, inclusive_upper: bool) -> (BuilderKind, Option<u32>, f32) {
        for range in &self.builder_ranges {
            let hit = if inclusive_upper {
                position > range.from && position <= range.to
            } else {
                position >= range.from && position < range.to
            };
            if hit {
                return (range.kind, range.shape_id, range_local(range, position));
            }
        }
        // fell off an end of [0,1]
        let range = if position <= 0. {
            self.builder_ranges.first()
        } else {
            self.builder_ranges.last()
        }
        .expect("builder ranges always cover [0,1]");
        (range.kind, range.shape_id, range_local(range, position))
    }

    pub fn branch_range_at(&self, position: f32) -> Option<&BranchRange> {
        self.branch_ranges
            .iter()
            .find(|r| position >= r.from && position <= r.to)
    }

    /// Request an extra cross-section at `position`. Positions are kept in
    /// (0,1) exclusive; a new position closer than `range/2` to an existing
    /// one merges with it: equal priority averages, higher priority replaces,
    /// lower priority is dropped.
    pub fn add_relevant_position(&mut self, position: f32, range: f32, priority: u8) {
        if position <= 0. || position >= 1. {
            return;
        }
        let half = 0.5 * range;
        for existing in self.relevant_positions.iter_mut() {
            if (existing.position - position).abs() < half {
                if priority > existing.priority {
                    existing.position = position;
                    existing.priority = priority;
                } else if priority == existing.priority {
                    existing.position = 0.5 * (existing.position + position);
                }
                return;
            }
        }
        self.relevant_positions.push(RelevantPosition {
            position,
            priority,
        });
    }

    /// Relevant positions strictly inside `(from, to)`, in skin units.
    pub fn relevant_positions_in(&self, from: f32, to: f32) -> Vec<f32> {
        let mut positions: Vec<f32> = self
            .relevant_positions
            .iter()
            .map(|r| r.position)
            .filter(|&p| p > from && p < to)
            .collect();
        positions.sort_by(|a, b| a.partial_cmp(b).unwrap());
        positions
    }
}

fn range_local(range: &BuilderRange, position: f32) -> f32 {
    ((position - range.from) / (range.to - range.from).max(1e-6)).clamp(0., 1.)
}

/// The walker's output: all skins of one build plus the skeleton they were
/// cut from. Immutable once built, which is what lets the triangulation pass
/// run lock-free.
pub struct SkinSet {
    pub skins: Vec<BranchSkin>,
    pub skeleton: TreeSkeleton,
}
