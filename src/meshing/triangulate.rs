use glam::{Vec2, Vec3, Vec4};
use log::{debug, info};
use rayon::prelude::*;

use crate::config::MeshConfig;
use crate::error::{MeshError, Result};
use crate::skinning::builders::BuilderRegistry;
use crate::skinning::{BranchSkin, SegmentType, SkinSet};
use crate::utils::ring_basis;

use super::{MeshData, Vertex};

/// Output region of one skin inside the shared slab.
struct SkinJob {
    vertex_offset: usize,
    vertices: usize,
    triangles: usize,
}

/// Soft-normal rings share a seam vertex so the mapping U can wrap.
fn ring_vertex_count(side_count: u32) -> usize {
    side_count.max(3) as usize + 1
}

/// Triangles between two consecutive rings: a quad per side when the counts
/// match, one triangle per consumed vertex in the sweep otherwise.
fn pair_triangles(a: u32, b: u32) -> usize {
    let (a, b) = (a.max(3), b.max(3));
    if a == b {
        2 * a as usize
    } else {
        (a + b) as usize
    }
}

fn count_skin(skin: &BranchSkin, config: &MeshConfig) -> (usize, usize) {
    let n = skin.segment_count();
    if n < 2 {
        return (0, 0);
    }
    let triangles: usize = (1..n)
        .map(|i| pair_triangles(skin.side_counts[i - 1], skin.side_counts[i]))
        .sum();
    let vertices = if config.use_hard_normals {
        // every face gets dedicated vertices for flat shading
        3 * triangles
    } else {
        (0..n).map(|i| ring_vertex_count(skin.side_counts[i])).sum()
    };
    (vertices, triangles)
}

fn ensure_indexable(vertices: usize) -> Result<()> {
    if vertices > u32::MAX as usize {
        return Err(MeshError::IndexOverflow { vertices });
    }
    Ok(())
}

/// Expand every skin into vertex rings and stitch them into triangles,
/// writing into one pre-sized slab. Counting and offsets happen up front;
/// the per-skin fill then runs as a parallel fan-out where each task owns a
/// disjoint slice of the output.
pub fn triangulate(set: &SkinSet, config: &MeshConfig, registry: &BuilderRegistry) -> Result<MeshData> {
    let mut jobs = Vec::with_capacity(set.skins.len());
    let (mut vertex_total, mut triangle_total) = (0usize, 0usize);
    for skin in &set.skins {
        let (vertices, triangles) = count_skin(skin, config);
        debug!(
            "skin {}: {} segments -> {} vertices, {} triangles",
            skin.id,
            skin.segment_count(),
            vertices,
            triangles
        );
        jobs.push(SkinJob {
            vertex_offset: vertex_total,
            vertices,
            triangles,
        });
        vertex_total += vertices;
        triangle_total += triangles;
    }
    ensure_indexable(vertex_total)?;

    let mut mesh = MeshData::zeroed(vertex_total, triangle_total);
    let slabs = split_slabs(&mut mesh, &jobs);
    set.skins
        .par_iter()
        .zip(slabs)
        .for_each(|(skin, mut slab)| fill_skin(skin, config, registry, &mut slab));

    info!(
        "triangulated {} skins into {} vertices, {} triangles",
        set.skins.len(),
        vertex_total,
        triangle_total
    );
    Ok(mesh)
}

struct SkinSlab<'a> {
    vertex_offset: usize,
    positions: &'a mut [Vec3],
    normals: &'a mut [Vec3],
    tangents: &'a mut [Vec4],
    uv0: &'a mut [Vec2],
    uv2: &'a mut [Vec4],
    uv3: &'a mut [Vec4],
    uv5: &'a mut [Vec4],
    uv6: &'a mut [Vec4],
    uv7: &'a mut [Vec4],
    uv8: &'a mut [Vec4],
    indices: &'a mut [u32],
}

/// Cut the slab into per-skin regions at the prefix-sum offsets. Each region
/// is handed to exactly one task, which is all the synchronization the
/// parallel phase needs.
fn split_slabs<'a>(mesh: &'a mut MeshData, jobs: &[SkinJob]) -> Vec<SkinSlab<'a>> {
    let mut positions = mesh.positions.as_mut_slice();
    let mut normals = mesh.normals.as_mut_slice();
    let mut tangents = mesh.tangents.as_mut_slice();
    let mut uv0 = mesh.uv0.as_mut_slice();
    let mut uv2 = mesh.uv2.as_mut_slice();
    let mut uv3 = mesh.uv3.as_mut_slice();
    let mut uv5 = mesh.uv5.as_mut_slice();
    let mut uv6 = mesh.uv6.as_mut_slice();
    let mut uv7 = mesh.uv7.as_mut_slice();
    let mut uv8 = mesh.uv8.as_mut_slice();
    let mut indices = mesh.indices.as_mut_slice();

    macro_rules! take {
        ($slice:ident, $len:expr) => {{
            let (head, rest) = std::mem::take(&mut $slice).split_at_mut($len);
            $slice = rest;
            head
        }};
    }

    let mut slabs = Vec::with_capacity(jobs.len());
    for job in jobs {
        slabs.push(SkinSlab {
            vertex_offset: job.vertex_offset,
            positions: take!(positions, job.vertices),
            normals: take!(normals, job.vertices),
            tangents: take!(tangents, job.vertices),
            uv0: take!(uv0, job.vertices),
            uv2: take!(uv2, job.vertices),
            uv3: take!(uv3, job.vertices),
            uv5: take!(uv5, job.vertices),
            uv6: take!(uv6, job.vertices),
            uv7: take!(uv7, job.vertices),
            uv8: take!(uv8, job.vertices),
            indices: take!(indices, job.triangles * 3),
        });
    }
    slabs
}

fn write_vertex(slab: &mut SkinSlab, i: usize, v: Vertex) {
    slab.positions[i] = v.position;
    slab.normals[i] = v.normal;
    slab.tangents[i] = v.tangent;
    slab.uv0[i] = v.uv0;
    slab.uv2[i] = v.uv2;
    slab.uv3[i] = v.uv3;
    slab.uv5[i] = v.uv5;
    slab.uv6[i] = v.uv6;
    slab.uv7[i] = v.uv7;
    slab.uv8[i] = v.uv8;
}

/// Instantiate the ring of segment `i` into `out`, seam vertex included.
fn emit_ring(
    skin: &BranchSkin,
    i: usize,
    scale: f32,
    registry: &BuilderRegistry,
    out: &mut Vec<Vertex>,
) {
    let segment = skin.segment(i);
    let sides = segment.side_count.max(3) as usize;
    let ring = if skin.shape_rings[i].is_empty() {
        registry.get(segment.builder_kind).ring_vertices(
            segment.side_count,
            segment.position_on_skin * skin.length,
            None,
        )
    } else {
        skin.shape_rings[i].clone()
    };
    debug_assert_eq!(ring.len(), sides);

    let basis = ring_basis(segment.direction, segment.normal);
    let center_scaled = segment.center * scale;
    let v_coord = segment.position_on_skin * skin.length / skin.uv_length();

    for k in 0..=sides {
        let sv = ring[k % sides];
        let radial = if k == sides { 1. } else { sv.radial };
        let offset_local = basis * (sv.offset * segment.girth).extend(0.);
        let position = center_scaled + offset_local * scale;
        let radial_dir = offset_local.try_normalize().unwrap_or(basis.x_axis);
        let normal = match segment.segment_type {
            SegmentType::BeginCap => -segment.direction,
            SegmentType::EndCap => segment.direction,
            _ => radial_dir,
        };
        let tangent = segment
            .direction
            .cross(radial_dir)
            .try_normalize()
            .unwrap_or(basis.y_axis);
        out.push(Vertex {
            position,
            normal,
            tangent: tangent.extend(-1.),
            uv0: Vec2::new(radial, v_coord),
            uv2: (segment.center + offset_local).extend(0.),
            uv3: Vec4::new(
                segment.girth,
                radial,
                segment.position_on_branch,
                segment.position_on_skin,
            ),
            uv5: Vec4::new(
                segment.branch as f32,
                skin.id as f32,
                segment.structure as f32,
                sides as f32,
            ),
            uv6: center_scaled.extend(0.),
            uv7: segment.direction.extend(0.),
            uv8: segment.normal.extend(0.),
        });
    }
}

/// Stitch two consecutive rings. Matching side counts take the quad path;
/// otherwise both radial parameter sets are swept simultaneously: the ring
/// with fewer sides advances when the next vertex of the denser ring has
/// passed the midpoint of its current span, which consumes every vertex of
/// both rings in exactly `lower + upper` triangles. An exhausted ring forces
/// the other one to advance, so the loop always terminates after
/// `lower + upper` steps.
fn stitch_rings(
    lower_start: u32,
    lower_sides: u32,
    upper_start: u32,
    upper_sides: u32,
    out: &mut Vec<[u32; 3]>,
) {
    let ln = lower_sides.max(3);
    let un = upper_sides.max(3);
    let lower = |j: u32| lower_start + j;
    let upper = |j: u32| upper_start + j;

    if ln == un {
        for j in 0..ln {
            out.push([lower(j), upper(j), upper(j + 1)]);
            out.push([lower(j), upper(j + 1), lower(j + 1)]);
        }
        return;
    }

    let fewer_is_lower = ln < un;
    let (mut li, mut ui) = (0u32, 0u32);
    while li < ln || ui < un {
        let (ai, an, bi, bn) = if fewer_is_lower {
            (li, ln, ui, un)
        } else {
            (ui, un, li, ln)
        };
        let advance_denser = if ai >= an {
            true
        } else if bi >= bn {
            false
        } else {
            let mid = (ai as f32 + 0.5) / an as f32;
            ((bi + 1) as f32 / bn as f32) < mid
        };
        let advance_upper = if fewer_is_lower {
            advance_denser
        } else {
            !advance_denser
        };
        if advance_upper {
            out.push([lower(li), upper(ui), upper(ui + 1)]);
            ui += 1;
        } else {
            out.push([lower(li), upper(ui), lower(li + 1)]);
            li += 1;
        }
    }
}

fn fill_skin(skin: &BranchSkin, config: &MeshConfig, registry: &BuilderRegistry, slab: &mut SkinSlab) {
    let n = skin.segment_count();
    if n < 2 {
        return;
    }
    let scale = config.scale();

    let mut ring_starts = Vec::with_capacity(n);
    let mut vertices = Vec::with_capacity(
        (0..n).map(|i| ring_vertex_count(skin.side_counts[i])).sum(),
    );
    for i in 0..n {
        ring_starts.push(vertices.len() as u32);
        emit_ring(skin, i, scale, registry, &mut vertices);
    }

    let mut triangles = Vec::with_capacity(slab.indices.len() / 3);
    for i in 1..n {
        stitch_rings(
            ring_starts[i - 1],
            skin.side_counts[i - 1],
            ring_starts[i],
            skin.side_counts[i],
            &mut triangles,
        );
    }
    debug_assert_eq!(triangles.len() * 3, slab.indices.len());

    if config.use_hard_normals {
        // duplicate every triangle's vertices so adjacent faces keep
        // distinct flat normals
        for (t, triangle) in triangles.iter().enumerate() {
            let corners = triangle.map(|i| vertices[i as usize]);
            let face = (corners[1].position - corners[0].position)
                .cross(corners[2].position - corners[0].position)
                .try_normalize()
                .unwrap_or(corners[0].normal);
            for (k, mut corner) in corners.into_iter().enumerate() {
                corner.normal = face;
                write_vertex(slab, 3 * t + k, corner);
                slab.indices[3 * t + k] = (slab.vertex_offset + 3 * t + k) as u32;
            }
        }
    } else {
        for (i, vertex) in vertices.iter().enumerate() {
            write_vertex(slab, i, *vertex);
        }
        for (t, triangle) in triangles.iter().enumerate() {
            for k in 0..3 {
                slab.indices[3 * t + k] = slab.vertex_offset as u32 + triangle[k];
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::skeleton::TreeSkeleton;
    use crate::skinning::{BuilderKind, Segment};
    use glam::Vec3;

    fn tube_skin(segments: usize, sides: u32) -> BranchSkin {
        let mut skin = BranchSkin::new(0, segments.max(2) as f32 - 1.);
        for i in 0..segments {
            let t = i as f32 / (segments - 1).max(1) as f32;
            skin.push_segment(
                Segment {
                    branch: 0,
                    structure: 0,
                    center: Vec3::new(0., 0., i as f32),
                    direction: Vec3::Z,
                    normal: Vec3::Y,
                    girth: 1.,
                    side_count: sides,
                    position_on_branch: t,
                    position_on_skin: t,
                    segment_type: SegmentType::Middle,
                    builder_kind: BuilderKind::Default,
                },
                Vec::new(),
            );
        }
        skin
    }

    fn skin_set(skins: Vec<BranchSkin>) -> SkinSet {
        SkinSet {
            skins,
            skeleton: TreeSkeleton::new(),
        }
    }

    #[test]
    fn sweep_emits_one_triangle_per_vertex() {
        let mut triangles = Vec::new();
        stitch_rings(0, 4, 5, 7, &mut triangles);
        assert_eq!(triangles.len(), 11);
        for triangle in &triangles {
            for &i in triangle {
                assert!(i <= 5 + 7, "index {i} out of range");
            }
        }
        // every vertex of both rings is consumed
        for j in 0..4 {
            assert!(triangles.iter().any(|t| t.contains(&j)));
        }
        for j in 5..12 {
            assert!(triangles.iter().any(|t| t.contains(&j)));
        }
    }

    #[test]
    fn equal_rings_take_the_quad_path() {
        let mut triangles = Vec::new();
        stitch_rings(0, 3, 4, 3, &mut triangles);
        assert_eq!(triangles.len(), 6);
    }

    #[test]
    fn watertight_triangle_count() {
        let skin = tube_skin(5, 6);
        let set = skin_set(vec![skin]);
        let mesh = triangulate(&set, &MeshConfig::default(), &BuilderRegistry::new()).unwrap();
        // 2 * sides * (segments - 1)
        assert_eq!(mesh.triangle_count(), 2 * 6 * 4);
        assert_eq!(mesh.vertex_count(), 5 * 7);
        for &i in &mesh.indices {
            assert!((i as usize) < mesh.vertex_count());
        }
    }

    #[test]
    fn mixed_side_counts_are_fully_stitched() {
        let mut skin = tube_skin(2, 4);
        // re-tag the top ring with a denser polygon
        skin.side_counts[1] = 7;
        let set = skin_set(vec![skin]);
        let mesh = triangulate(&set, &MeshConfig::default(), &BuilderRegistry::new()).unwrap();
        assert_eq!(mesh.triangle_count(), 11);
        assert_eq!(mesh.vertex_count(), 5 + 8);
    }

    #[test]
    fn hard_normals_explode_vertices() {
        let set = skin_set(vec![tube_skin(3, 6)]);
        let config = MeshConfig {
            use_hard_normals: true,
            ..Default::default()
        };
        let mesh = triangulate(&set, &config, &BuilderRegistry::new()).unwrap();
        assert_eq!(mesh.triangle_count(), 2 * 6 * 2);
        assert_eq!(mesh.vertex_count(), 3 * mesh.triangle_count());
        // flat shading: all three corners of a face share its normal
        for triangle in mesh.indices.chunks_exact(3) {
            let n0 = mesh.normals[triangle[0] as usize];
            for &i in &triangle[1..] {
                assert!((mesh.normals[i as usize] - n0).length() < 1e-6);
            }
        }
    }

    #[test]
    fn single_segment_skin_is_empty_not_an_error() {
        let set = skin_set(vec![tube_skin(1, 6)]);
        let mesh = triangulate(&set, &MeshConfig::default(), &BuilderRegistry::new()).unwrap();
        assert_eq!(mesh.vertex_count(), 0);
        assert_eq!(mesh.triangle_count(), 0);
    }

    #[test]
    fn skins_write_disjoint_regions() {
        let set = skin_set(vec![tube_skin(3, 6), tube_skin(4, 5)]);
        let mesh = triangulate(&set, &MeshConfig::default(), &BuilderRegistry::new()).unwrap();
        let first_vertices = 3 * 7;
        assert_eq!(mesh.vertex_count(), first_vertices + 4 * 6);
        // the second skin's triangles only reference its own region
        let first_triangles = 2 * 6 * 2;
        for &i in &mesh.indices[first_triangles * 3..] {
            assert!(i as usize >= first_vertices);
        }
    }

    #[test]
    fn global_scale_doubles_positions() {
        let set = skin_set(vec![tube_skin(3, 6)]);
        let base = triangulate(&set, &MeshConfig::default(), &BuilderRegistry::new()).unwrap();
        let doubled = triangulate(
            &set,
            &MeshConfig {
                global_scale: 2.,
                ..Default::default()
            },
            &BuilderRegistry::new(),
        )
        .unwrap();
        for (a, b) in base.positions.iter().zip(&doubled.positions) {
            assert!((*a * 2. - *b).length() < 1e-5);
        }
    }

    #[test]
    fn builds_are_deterministic() {
        let set = skin_set(vec![tube_skin(4, 6), tube_skin(3, 5)]);
        let a = triangulate(&set, &MeshConfig::default(), &BuilderRegistry::new()).unwrap();
        let b = triangulate(&set, &MeshConfig::default(), &BuilderRegistry::new()).unwrap();
        assert_eq!(a.positions, b.positions);
        assert_eq!(a.normals, b.normals);
        assert_eq!(a.indices, b.indices);
    }

    #[test]
    fn overflow_is_caught_before_allocation() {
        assert!(ensure_indexable(u32::MAX as usize).is_ok());
        assert!(matches!(
            ensure_indexable(u32::MAX as usize + 1),
            Err(MeshError::IndexOverflow { .. })
        ));
    }
}
