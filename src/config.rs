use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Hard ceiling on polygon resolution, whatever the config asks for.
pub const MAX_POLYGON_SIDES: u32 = 32;

/// Engine-level meshing options.
///
/// Out-of-range values are not rejected: they are clamped where they are
/// consumed, so a bad config still produces a valid mesh.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub min_polygon_sides: u32,
    pub max_polygon_sides: u32,
    pub global_scale: f32,
    pub use_hard_normals: bool,
    pub use_mesh_cap_at_base: bool,
    /// Max tangent deviation (degrees) between consecutive curve samples.
    pub branch_angle_tolerance: f32,
    /// Hierarchy depth up to which parent/child girth blending applies.
    pub average_normals_level_limit: usize,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            min_polygon_sides: 5,
            max_polygon_sides: 12,
            global_scale: 1.,
            use_hard_normals: false,
            use_mesh_cap_at_base: true,
            branch_angle_tolerance: 12.,
            average_normals_level_limit: 2,
        }
    }
}

impl MeshConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Clamped `(min, max)` polygon side counts.
    pub fn polygon_sides(&self) -> (u32, u32) {
        let min = self.min_polygon_sides.clamp(3, MAX_POLYGON_SIDES);
        let max = self.max_polygon_sides.clamp(min, MAX_POLYGON_SIDES);
        (min, max)
    }

    pub fn scale(&self) -> f32 {
        self.global_scale.max(1e-4)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn clamps_polygon_sides() {
        let config = MeshConfig {
            min_polygon_sides: 1,
            max_polygon_sides: 1000,
            ..Default::default()
        };
        assert_eq!(config.polygon_sides(), (3, MAX_POLYGON_SIDES));

        let inverted = MeshConfig {
            min_polygon_sides: 10,
            max_polygon_sides: 4,
            ..Default::default()
        };
        assert_eq!(inverted.polygon_sides(), (10, 10));
    }

    #[test]
    fn loads_partial_toml() {
        let config = MeshConfig::from_toml_str(
            "min_polygon_sides = 6\nmax_polygon_sides = 6\nglobal_scale = 2.0\n",
        )
        .unwrap();
        assert_eq!(config.polygon_sides(), (6, 6));
        assert_eq!(config.scale(), 2.);
        assert!(config.use_mesh_cap_at_base);
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(MeshConfig::from_toml_str("min_polygon_sides = \"six\"").is_err());
    }
}
