use std::collections::HashMap;
use std::f32::consts::TAU;

use glam::{Affine3A, Quat, Vec2, Vec4};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::MeshConfig;
use crate::meshing::{MeshData, Vertex};
use crate::utils::{lerp, ring_basis};

use super::{BranchSkin, BuilderKind, SegmentType, ShapeVertex};

/// Regular polygon ring at unit girth, one vertex per side. The seam
/// duplicate is added by the consumer, not here.
pub fn regular_ring(side_count: u32) -> Vec<ShapeVertex> {
    let n = side_count.max(3);
    (0..n)
        .map(|i| {
            let radial = i as f32 / n as f32;
            let angle = TAU * radial;
            ShapeVertex {
                offset: Vec2::new(angle.cos(), angle.sin()),
                radial,
            }
        })
        .collect()
}

/// Side count for the regular builders: thinner cross-sections get fewer
/// polygon sides, interpolated over the skin's girth range.
fn polygon_sides(config: &MeshConfig, girth_min: f32, girth_max: f32, girth: f32) -> u32 {
    let (min_sides, max_sides) = config.polygon_sides();
    let span = girth_max - girth_min;
    if span <= 1e-6 {
        return max_sides;
    }
    let t = ((girth - girth_min) / span).clamp(0., 1.);
    lerp(min_sides as f32, max_sides as f32, t).round() as u32
}

/// Plain tapered tube: regular polygons all the way.
#[derive(Copy, Clone, Debug, Default)]
pub struct DefaultBuilder;

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrunkParams {
    /// Relative amplitude of the root bumps.
    pub strength: f32,
    /// Number of bump lobes around the trunk.
    pub lobes: u32,
    /// Distance from the base over which the bumps fade out.
    pub flare_span: f32,
    pub seed: u64,
}

impl Default for TrunkParams {
    fn default() -> Self {
        Self {
            strength: 0.25,
            lobes: 5,
            flare_span: 1.5,
            seed: 0,
        }
    }
}

/// Trunk builder: perturbs the regular polygon's radius per vertex to fake
/// root flare near the base. The phase is drawn once per build so repeated
/// builds stay identical.
#[derive(Copy, Clone, Debug)]
pub struct TrunkBuilder {
    pub params: TrunkParams,
    phase: f32,
}

impl TrunkBuilder {
    pub fn new(params: TrunkParams) -> Self {
        let mut rng = StdRng::seed_from_u64(params.seed);
        Self {
            params,
            phase: rng.gen_range(0f32..TAU),
        }
    }

    fn bumped_ring(&self, side_count: u32, dist_from_base: f32) -> Vec<ShapeVertex> {
        let fade = (1. - dist_from_base / self.params.flare_span.max(1e-3)).clamp(0., 1.);
        regular_ring(side_count)
            .into_iter()
            .map(|v| {
                let angle = TAU * v.radial;
                let factor = 1.
                    + self.params.strength
                        * fade
                        * (self.params.lobes as f32 * angle + self.phase).sin();
                ShapeVertex {
                    offset: v.offset * factor,
                    radial: v.radial,
                }
            })
            .collect()
    }
}

/// Pre-authored cross-section profile: ring offsets at unit girth plus their
/// radial parameters, already ordered by radial.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShapeProfile {
    pub vertices: Vec<ShapeVertex>,
}

impl ShapeProfile {
    pub fn new(vertices: Vec<ShapeVertex>) -> Self {
        assert!(vertices.len() >= 3, "a shape profile needs at least 3 vertices");
        Self { vertices }
    }

    /// Star profile with `points` tips, alternating unit and `inner` radius.
    pub fn star(points: u32, inner: f32) -> Self {
        let n = 2 * points.max(2);
        let vertices = (0..n)
            .map(|i| {
                let radial = i as f32 / n as f32;
                let angle = TAU * radial;
                let radius = if i % 2 == 0 { 1. } else { inner };
                ShapeVertex {
                    offset: Vec2::new(angle.cos(), angle.sin()) * radius,
                    radial,
                }
            })
            .collect();
        Self::new(vertices)
    }

    pub fn side_count(&self) -> u32 {
        self.vertices.len() as u32
    }
}

/// Assigns a registered profile to a skin-position range on every chain
/// anchored at the given hierarchy level.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct ShapeAssignment {
    pub level: usize,
    pub from: f32,
    pub to: f32,
    pub shape_id: u32,
}

/// Serves registered custom profiles instead of the regular polygon formula.
#[derive(Clone, Debug, Default)]
pub struct ShapeBuilder {
    shapes: HashMap<u32, ShapeProfile>,
    pub assignments: Vec<ShapeAssignment>,
}

impl ShapeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: u32, profile: ShapeProfile) {
        self.shapes.insert(id, profile);
    }

    pub fn assign(&mut self, assignment: ShapeAssignment) {
        self.assignments.push(assignment);
    }

    pub fn profile(&self, id: Option<u32>) -> Option<&ShapeProfile> {
        self.shapes.get(&id?)
    }
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WeldingParams {
    /// Length of the weld zone from the chain base, in world units.
    pub distance: f32,
    /// Deepest hierarchy level that still gets welded to its parent.
    pub max_level: usize,
    /// Girth multiplier at the very base of the weld zone.
    pub spread: f32,
}

impl Default for WeldingParams {
    fn default() -> Self {
        Self {
            distance: 1.,
            max_level: 1,
            spread: 1.6,
        }
    }
}

/// Widens cross-sections near a branch's base so it merges into the parent
/// surface, and emits an extra collar mesh per welded skin.
#[derive(Copy, Clone, Debug)]
pub struct WeldingBuilder {
    pub params: WeldingParams,
}

impl WeldingBuilder {
    pub fn new(params: WeldingParams) -> Self {
        Self { params }
    }

    /// Collar skirt for a welded skin, built around the base ring in
    /// attachment-local space (+Z along the base direction). Returned with
    /// the local-to-object transform the assembler applies.
    pub fn collar_mesh(&self, skin: &BranchSkin, config: &MeshConfig) -> Option<(MeshData, Affine3A)> {
        if !skin
            .builder_ranges
            .iter()
            .any(|r| r.kind == BuilderKind::Welding)
        {
            return None;
        }
        let base = skin
            .segment_types
            .iter()
            .position(|&t| t == SegmentType::Begin)?;
        let segment = skin.segment(base);
        let sides = segment.side_count.max(3) as usize;
        let scale = config.scale();
        let r_top = segment.girth * scale;
        if r_top <= 1e-6 {
            return None;
        }
        let r_bottom = segment.girth * self.params.spread.max(1.) * scale;
        let drop = 0.5 * segment.girth * scale;

        let mut mesh = MeshData::new();
        for (radius, z, v) in [(r_bottom, -drop, 0.), (r_top, 0., drop / skin.uv_length())] {
            for k in 0..=sides {
                let radial = k as f32 / sides as f32;
                let angle = TAU * radial;
                let planar = Vec2::new(angle.cos(), angle.sin());
                let normal = (planar * drop).extend(r_bottom - r_top).normalize();
                mesh.push_vertex(Vertex {
                    position: (planar * radius).extend(z),
                    normal,
                    tangent: Vec4::new(-angle.sin(), angle.cos(), 0., -1.),
                    uv0: Vec2::new(radial, v),
                    uv2: (planar * radius).extend(z).extend(0.),
                    uv3: Vec4::new(segment.girth, radial, 0., segment.position_on_skin),
                    uv5: Vec4::new(
                        segment.branch as f32,
                        skin.id as f32,
                        segment.structure as f32,
                        sides as f32,
                    ),
                    uv6: (segment.center * scale).extend(0.),
                    uv7: segment.direction.extend(0.),
                    uv8: segment.normal.extend(0.),
                });
            }
        }
        let upper = (sides + 1) as u32;
        for j in 0..sides as u32 {
            mesh.push_triangle(j, upper + j, upper + j + 1);
            mesh.push_triangle(j, upper + j + 1, j + 1);
        }

        let rotation = Quat::from_mat3(&ring_basis(segment.direction, segment.normal));
        let transform = Affine3A::from_rotation_translation(rotation, segment.center * scale);
        Some((mesh, transform))
    }
}

/// The closed set of cross-section strategies. Extensibility goes through
/// shape ids on the Shape variant rather than new variants.
#[derive(Clone, Debug)]
pub enum RingBuilder {
    Default(DefaultBuilder),
    Trunk(TrunkBuilder),
    Shape(ShapeBuilder),
    Welding(WeldingBuilder),
}

impl RingBuilder {
    pub fn kind(&self) -> BuilderKind {
        match self {
            RingBuilder::Default(_) => BuilderKind::Default,
            RingBuilder::Trunk(_) => BuilderKind::Trunk,
            RingBuilder::Shape(_) => BuilderKind::Shape,
            RingBuilder::Welding(_) => BuilderKind::Welding,
        }
    }

    /// Polygon sides for a cross-section of the given girth.
    pub fn side_count(
        &self,
        config: &MeshConfig,
        girth_min: f32,
        girth_max: f32,
        girth: f32,
        shape_id: Option<u32>,
    ) -> u32 {
        match self {
            RingBuilder::Shape(builder) => builder
                .profile(shape_id)
                .map(|p| p.side_count())
                .unwrap_or_else(|| polygon_sides(config, girth_min, girth_max, girth)),
            _ => polygon_sides(config, girth_min, girth_max, girth),
        }
    }

    /// Girth multiplier at a range-local position; only welding widens.
    pub fn girth_scale(&self, range_local: f32) -> f32 {
        match self {
            RingBuilder::Welding(builder) => {
                lerp(builder.params.spread.max(1.), 1., range_local.clamp(0., 1.))
            }
            _ => 1.,
        }
    }

    /// Ring vertices at unit girth for a segment `dist_from_base` world
    /// units along its skin.
    pub fn ring_vertices(
        &self,
        side_count: u32,
        dist_from_base: f32,
        shape_id: Option<u32>,
    ) -> Vec<ShapeVertex> {
        match self {
            RingBuilder::Trunk(builder) => builder.bumped_ring(side_count, dist_from_base),
            RingBuilder::Shape(builder) => builder
                .profile(shape_id)
                .map(|p| p.vertices.clone())
                .unwrap_or_else(|| regular_ring(side_count)),
            _ => regular_ring(side_count),
        }
    }
}

/// Explicit per-build registry of builders; always holds a Default entry and
/// answers unknown kinds with it.
#[derive(Clone, Debug)]
pub struct BuilderRegistry {
    builders: Vec<RingBuilder>,
}

impl Default for BuilderRegistry {
    fn default() -> Self {
        Self {
            builders: vec![RingBuilder::Default(DefaultBuilder)],
        }
    }
}

impl BuilderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the builder for its kind.
    pub fn register(&mut self, builder: RingBuilder) {
        let kind = builder.kind();
        if let Some(slot) = self.builders.iter_mut().find(|b| b.kind() == kind) {
            *slot = builder;
        } else {
            self.builders.push(builder);
        }
    }

    pub fn contains(&self, kind: BuilderKind) -> bool {
        self.builders.iter().any(|b| b.kind() == kind)
    }

    pub fn get(&self, kind: BuilderKind) -> &RingBuilder {
        self.builders
            .iter()
            .find(|b| b.kind() == kind)
            .unwrap_or(&self.builders[0])
    }

    pub fn welding(&self) -> Option<&WeldingBuilder> {
        match self.get(BuilderKind::Welding) {
            RingBuilder::Welding(builder) => Some(builder),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::skinning::Segment;
    use glam::Vec3;

    fn config(min: u32, max: u32) -> MeshConfig {
        MeshConfig {
            min_polygon_sides: min,
            max_polygon_sides: max,
            ..Default::default()
        }
    }

    #[test]
    fn side_count_follows_girth() {
        let builder = RingBuilder::Default(DefaultBuilder);
        let config = config(4, 8);
        assert_eq!(builder.side_count(&config, 0., 1., 0., None), 4);
        assert_eq!(builder.side_count(&config, 0., 1., 1., None), 8);
        assert_eq!(builder.side_count(&config, 0., 1., 0.5, None), 6);
        // flat girth range falls back to the max resolution
        assert_eq!(builder.side_count(&config, 0.5, 0.5, 0.5, None), 8);
    }

    #[test]
    fn trunk_bumps_fade_out() {
        let builder = TrunkBuilder::new(TrunkParams::default());
        for v in builder.bumped_ring(8, 0.) {
            let r = v.offset.length();
            assert!(r >= 1. - builder.params.strength - 1e-5);
            assert!(r <= 1. + builder.params.strength + 1e-5);
        }
        for v in builder.bumped_ring(8, builder.params.flare_span) {
            assert!((v.offset.length() - 1.).abs() < 1e-5);
        }
    }

    #[test]
    fn shape_profile_drives_side_count() {
        let mut shapes = ShapeBuilder::new();
        shapes.register(7, ShapeProfile::star(4, 0.5));
        let builder = RingBuilder::Shape(shapes);
        let config = config(4, 8);
        assert_eq!(builder.side_count(&config, 0., 1., 0.5, Some(7)), 8);
        // unknown ids fall back to the regular formula
        assert_eq!(builder.side_count(&config, 0., 1., 0., Some(99)), 4);
        let ring = builder.ring_vertices(8, 0., Some(7));
        assert_eq!(ring.len(), 8);
        assert!((ring[1].offset.length() - 0.5).abs() < 1e-5);
    }

    #[test]
    fn welding_widens_the_base() {
        let builder = RingBuilder::Welding(WeldingBuilder::new(WeldingParams::default()));
        assert!((builder.girth_scale(0.) - 1.6).abs() < 1e-6);
        assert!((builder.girth_scale(1.) - 1.).abs() < 1e-6);
    }

    #[test]
    fn registry_falls_back_to_default() {
        let registry = BuilderRegistry::new();
        assert_eq!(registry.get(BuilderKind::Trunk).kind(), BuilderKind::Default);
        assert!(registry.welding().is_none());
    }

    #[test]
    fn collar_matches_base_ring() {
        let mut skin = BranchSkin::new(0, 4.);
        skin.insert_builder_range(0., 0.25, BuilderKind::Welding, None);
        skin.push_segment(
            Segment {
                branch: 0,
                structure: 0,
                center: Vec3::new(0., 0., 1.),
                direction: Vec3::Z,
                normal: Vec3::Y,
                girth: 0.5,
                side_count: 6,
                position_on_branch: 0.,
                position_on_skin: 0.,
                segment_type: SegmentType::Begin,
                builder_kind: BuilderKind::Welding,
            },
            Vec::new(),
        );
        let welding = WeldingBuilder::new(WeldingParams::default());
        let (mesh, transform) = welding.collar_mesh(&skin, &MeshConfig::default()).unwrap();
        assert_eq!(mesh.vertex_count(), 14);
        assert_eq!(mesh.triangle_count(), 12);
        let moved = transform.transform_point3(Vec3::ZERO);
        assert!((moved - Vec3::new(0., 0., 1.)).length() < 1e-5);
    }
}
