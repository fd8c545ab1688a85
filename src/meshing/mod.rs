use glam::{Affine3A, Vec2, Vec3, Vec4};

mod triangulate;

pub use triangulate::triangulate;

/// One output vertex with every channel the engine emits. UV channels beyond
/// the mapping pair carry per-vertex metadata for downstream consumers:
/// `uv2` raw object-space position, `uv3` (girth, radial, position on
/// branch, position on skin), `uv5` (branch id, skin id, structure id, side
/// count), `uv6` ring center, `uv7` segment direction, `uv8` segment
/// reference normal.
#[derive(Copy, Clone, Debug, Default)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub tangent: Vec4,
    pub uv0: Vec2,
    pub uv2: Vec4,
    pub uv3: Vec4,
    pub uv5: Vec4,
    pub uv6: Vec4,
    pub uv7: Vec4,
    pub uv8: Vec4,
}

/// Plain vertex/index buffers, one array per channel.
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub tangents: Vec<Vec4>,
    pub uv0: Vec<Vec2>,
    pub uv2: Vec<Vec4>,
    pub uv3: Vec<Vec4>,
    pub uv5: Vec<Vec4>,
    pub uv6: Vec<Vec4>,
    pub uv7: Vec<Vec4>,
    pub uv8: Vec<Vec4>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-sized buffers, all channels zeroed. The triangulation job writes
    /// every slot exactly once.
    pub fn zeroed(vertices: usize, triangles: usize) -> Self {
        Self {
            positions: vec![Vec3::ZERO; vertices],
            normals: vec![Vec3::ZERO; vertices],
            tangents: vec![Vec4::ZERO; vertices],
            uv0: vec![Vec2::ZERO; vertices],
            uv2: vec![Vec4::ZERO; vertices],
            uv3: vec![Vec4::ZERO; vertices],
            uv5: vec![Vec4::ZERO; vertices],
            uv6: vec![Vec4::ZERO; vertices],
            uv7: vec![Vec4::ZERO; vertices],
            uv8: vec![Vec4::ZERO; vertices],
            indices: vec![0; triangles * 3],
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn push_vertex(&mut self, v: Vertex) -> u32 {
        let index = self.positions.len() as u32;
        self.positions.push(v.position);
        self.normals.push(v.normal);
        self.tangents.push(v.tangent);
        self.uv0.push(v.uv0);
        self.uv2.push(v.uv2);
        self.uv3.push(v.uv3);
        self.uv5.push(v.uv5);
        self.uv6.push(v.uv6);
        self.uv7.push(v.uv7);
        self.uv8.push(v.uv8);
        index
    }

    pub fn push_triangle(&mut self, a: u32, b: u32, c: u32) {
        self.indices.extend([a, b, c]);
    }

    /// Append `other`, offsetting its indices and mapping its positions,
    /// normals and tangents through `transform`. UV channels are carried
    /// verbatim.
    pub fn append_transformed(&mut self, other: &MeshData, transform: Affine3A) {
        let offset = self.positions.len() as u32;
        self.positions
            .extend(other.positions.iter().map(|&p| transform.transform_point3(p)));
        self.normals.extend(
            other
                .normals
                .iter()
                .map(|&n| transform.transform_vector3(n).normalize_or_zero()),
        );
        self.tangents.extend(other.tangents.iter().map(|&t| {
            let mapped = transform.transform_vector3(t.truncate()).normalize_or_zero();
            mapped.extend(t.w)
        }));
        self.uv0.extend(&other.uv0);
        self.uv2.extend(&other.uv2);
        self.uv3.extend(&other.uv3);
        self.uv5.extend(&other.uv5);
        self.uv6.extend(&other.uv6);
        self.uv7.extend(&other.uv7);
        self.uv8.extend(&other.uv8);
        self.indices
            .extend(other.indices.iter().map(|&i| i + offset));
    }

    /// Area-weighted normal recomputation, for consumers that deform the
    /// vertex buffer after assembly.
    pub fn recompute_smooth_normals(&mut self) {
        let mut accumulated = vec![Vec3::ZERO; self.positions.len()];
        for triangle in self.indices.chunks_exact(3) {
            let (ia, ib, ic) = (
                triangle[0] as usize,
                triangle[1] as usize,
                triangle[2] as usize,
            );
            let face = (self.positions[ib] - self.positions[ia])
                .cross(self.positions[ic] - self.positions[ia]);
            accumulated[ia] += face;
            accumulated[ib] += face;
            accumulated[ic] += face;
        }
        for (normal, acc) in self.normals.iter_mut().zip(accumulated) {
            if let Some(n) = acc.try_normalize() {
                *normal = n;
            }
        }
    }
}

/// Concatenate the parallel job's slab with the post-processed sub-meshes of
/// non-default builders. Each auxiliary mesh carries its local-to-object
/// transform; seams between chains are intentional, so no vertices are
/// merged.
pub fn assemble(main: MeshData, aux: Vec<(MeshData, Affine3A)>) -> MeshData {
    let mut mesh = main;
    for (part, transform) in &aux {
        mesh.append_transformed(part, *transform);
    }
    mesh
}

#[cfg(test)]
mod test {
    use super::*;

    fn quad() -> MeshData {
        let mut mesh = MeshData::new();
        for position in [Vec3::ZERO, Vec3::X, Vec3::new(1., 1., 0.), Vec3::Y] {
            mesh.push_vertex(Vertex {
                position,
                normal: Vec3::Z,
                tangent: Vec4::new(1., 0., 0., -1.),
                ..Default::default()
            });
        }
        mesh.push_triangle(0, 1, 2);
        mesh.push_triangle(0, 2, 3);
        mesh
    }

    #[test]
    fn append_offsets_indices() {
        let mut mesh = quad();
        let other = quad();
        mesh.append_transformed(&other, Affine3A::from_translation(Vec3::new(0., 0., 5.)));
        assert_eq!(mesh.vertex_count(), 8);
        assert_eq!(mesh.triangle_count(), 4);
        assert_eq!(&mesh.indices[6..], &[4, 5, 6, 4, 6, 7]);
        assert!((mesh.positions[4].z - 5.).abs() < 1e-6);
        // translation leaves normals alone
        assert!((mesh.normals[4] - Vec3::Z).length() < 1e-6);
    }

    #[test]
    fn assemble_rotates_normals() {
        let transform = Affine3A::from_rotation_x(std::f32::consts::FRAC_PI_2);
        let mesh = assemble(quad(), vec![(quad(), transform)]);
        assert_eq!(mesh.vertex_count(), 8);
        assert!((mesh.normals[4] - Vec3::new(0., -1., 0.)).length() < 1e-5);
    }

    #[test]
    fn smooth_normals_point_out_of_the_plane() {
        let mut mesh = quad();
        mesh.normals.iter_mut().for_each(|n| *n = Vec3::ZERO);
        mesh.recompute_smooth_normals();
        for normal in &mesh.normals {
            assert!((*normal - Vec3::Z).length() < 1e-5);
        }
    }
}
