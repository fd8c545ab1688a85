//! Turns a hierarchical tree skeleton into a single watertight triangle
//! mesh: cross-sections are accumulated along branch chains, stitched into
//! triangles (including between rings of different resolutions), and written
//! into pre-sized buffers by one parallel task per chain.
//!
//! The skeleton comes from a growth generator elsewhere; materials, UV
//! atlasing and LOD are downstream concerns that consume the buffers this
//! crate emits.

pub mod config;
pub mod error;
pub mod meshing;
pub mod skeleton;
pub mod skinning;
mod utils;

pub use config::MeshConfig;
pub use error::{MeshError, Result};
pub use meshing::{assemble, triangulate, MeshData, Vertex};
pub use skeleton::{BranchCurve, BranchShape, CurveSample, TreeSkeleton};
pub use skinning::builders::{
    BuilderRegistry, DefaultBuilder, RingBuilder, ShapeAssignment, ShapeBuilder, ShapeProfile,
    TrunkBuilder, TrunkParams, WeldingBuilder, WeldingParams,
};
pub use skinning::{BranchSkin, BuilderKind, Segment, SegmentType, SkinSet};

/// One stage of the meshing pipeline. Each phase consumes the previous one,
/// reads its config and a per-build context, and may fail (only the
/// triangulation stage actually can, on index overflow).
pub trait MeshPhase: Sized {
    type Previous;
    type Config;
    type Context;
    fn generate_from(
        prev: Self::Previous,
        config: &Self::Config,
        context: &mut Self::Context,
    ) -> Result<Self>;
}

pub trait Generate {
    fn generate<Next>(self, config: &Next::Config, context: &mut Next::Context) -> Result<Next>
    where
        Next: MeshPhase<Previous = Self>;
}

impl<T> Generate for T {
    fn generate<Next>(self, config: &Next::Config, context: &mut Next::Context) -> Result<Next>
    where
        Next: MeshPhase<Previous = T>,
    {
        Next::generate_from(self, config, context)
    }
}

impl MeshPhase for SkinSet {
    type Previous = TreeSkeleton;
    type Config = MeshConfig;
    type Context = BuilderRegistry;

    fn generate_from(
        skeleton: TreeSkeleton,
        config: &MeshConfig,
        registry: &mut BuilderRegistry,
    ) -> Result<Self> {
        let skins = skinning::build_skins(&skeleton, config, registry);
        Ok(SkinSet { skins, skeleton })
    }
}

impl MeshPhase for MeshData {
    type Previous = SkinSet;
    type Config = MeshConfig;
    type Context = BuilderRegistry;

    fn generate_from(
        set: SkinSet,
        config: &MeshConfig,
        registry: &mut BuilderRegistry,
    ) -> Result<Self> {
        let main = meshing::triangulate(&set, config, registry)?;
        let aux = match registry.welding() {
            Some(welding) => set
                .skins
                .iter()
                .filter_map(|skin| welding.collar_mesh(skin, config))
                .collect(),
            None => Vec::new(),
        };
        Ok(meshing::assemble(main, aux))
    }
}

/// Build the final mesh for a skeleton in one call.
pub fn build_mesh(
    skeleton: TreeSkeleton,
    config: &MeshConfig,
    registry: &mut BuilderRegistry,
) -> Result<MeshData> {
    let set: SkinSet = skeleton.generate(config, registry)?;
    let mesh: MeshData = set.generate(config, registry)?;
    log::info!(
        "built mesh: {} vertices, {} triangles",
        mesh.vertex_count(),
        mesh.triangle_count()
    );
    Ok(mesh)
}
