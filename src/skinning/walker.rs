use log::debug;

use crate::config::MeshConfig;
use crate::skeleton::TreeSkeleton;

use super::builders::{BuilderRegistry, RingBuilder};
use super::{
    BranchSkin, BuilderKind, Segment, SegmentType, CAP_GIRTH_FACTOR, PRIORITY_BREAK,
    PRIORITY_STRUCTURAL, RELEVANT_RANGE,
};

/// Sample parameters closer than this are considered the same cross-section.
const SAMPLE_EPSILON: f32 = 1e-4;

/// Cut the skeleton into skins: one per maximal follow-up chain, visited
/// depth-first from the roots. Single-threaded on purpose; the output set is
/// immutable afterwards.
pub fn build_skins(
    skeleton: &TreeSkeleton,
    config: &MeshConfig,
    registry: &BuilderRegistry,
) -> Vec<BranchSkin> {
    let mut skins = Vec::new();
    for root in skeleton.roots() {
        walk_chain(skeleton, config, registry, root, &mut skins);
    }
    skins
}

fn collect_chain(skeleton: &TreeSkeleton, anchor: usize) -> Vec<usize> {
    let mut chain = vec![anchor];
    let mut current = anchor;
    while let Some(next) = skeleton.follow_up(current) {
        chain.push(next);
        current = next;
    }
    chain
}

fn insert_param(params: &mut Vec<f32>, t: f32) {
    if params.iter().any(|&p| (p - t).abs() < SAMPLE_EPSILON) {
        return;
    }
    let i = params.iter().position(|&p| p > t).unwrap_or(params.len());
    params.insert(i, t);
}

fn walk_chain(
    skeleton: &TreeSkeleton,
    config: &MeshConfig,
    registry: &BuilderRegistry,
    anchor: usize,
    skins: &mut Vec<BranchSkin>,
) {
    let chain = collect_chain(skeleton, anchor);
    let lengths: Vec<f32> = chain.iter().map(|&b| skeleton.length(b)).collect();
    let total: f32 = lengths.iter().sum();
    let denom = total.max(1e-6);

    let mut skin = BranchSkin::new(skins.len(), total);

    let mut girth_min = f32::INFINITY;
    let mut girth_max = f32::NEG_INFINITY;
    for &branch in &chain {
        for girth in [skeleton.girth_at(branch, 0.), skeleton.girth_at(branch, 1.)] {
            girth_min = girth_min.min(girth);
            girth_max = girth_max.max(girth);
        }
    }
    skin.girth_min = girth_min.max(0.);
    skin.girth_max = girth_max.max(0.);

    let mut acc = 0.;
    for (i, &branch) in chain.iter().enumerate() {
        skin.add_branch_range(acc / denom, (acc + lengths[i]) / denom, branch);
        acc += lengths[i];
    }
    if let Some(last) = skin.branch_ranges.last_mut() {
        last.to = 1.;
    }

    // builder zones, innermost last so it wins the base of the chain
    if let RingBuilder::Trunk(trunk) = registry.get(BuilderKind::Trunk) {
        if skeleton.parent(anchor).is_none() && total > 0. {
            let to = trunk.params.flare_span.min(0.95 * total) / total;
            skin.insert_builder_range(0., to, BuilderKind::Trunk, None);
        }
    }
    if let RingBuilder::Shape(shape) = registry.get(BuilderKind::Shape) {
        for assignment in &shape.assignments {
            if skeleton.depth(anchor) == assignment.level {
                skin.insert_builder_range(
                    assignment.from,
                    assignment.to,
                    BuilderKind::Shape,
                    Some(assignment.shape_id),
                );
            }
        }
    }
    // weld the chain base onto the parent surface, within the level limit
    if let Some(welding) = registry.welding() {
        if skeleton.parent(anchor).is_some()
            && skeleton.depth(anchor) <= welding.params.max_level
            && total > 0.
        {
            let to = welding.params.distance.min(0.95 * total) / total;
            skin.insert_builder_range(0., to, BuilderKind::Welding, None);
        }
    }

    // builder transitions get their own cross-sections
    let boundaries: Vec<f32> = skin
        .builder_ranges
        .iter()
        .map(|r| r.to)
        .filter(|&t| t < 1.)
        .collect();
    for boundary in boundaries {
        skin.add_relevant_position(boundary, RELEVANT_RANGE, PRIORITY_STRUCTURAL);
    }

    // forced cross-sections: child attachments, breaks, girth continuity
    let mut acc = 0.;
    for (i, &branch) in chain.iter().enumerate() {
        for &child in skeleton.children(branch) {
            let position = (acc + skeleton.position_on_parent(child) * lengths[i]) / denom;
            skin.add_relevant_position(position, RELEVANT_RANGE, PRIORITY_STRUCTURAL);
        }
        if let Some(t) = skeleton.break_position(branch) {
            let position = (acc + t * lengths[i]) / denom;
            skin.add_relevant_position(position, RELEVANT_RANGE, PRIORITY_BREAK);
        }
        acc += lengths[i];
    }
    if let Some(parent) = skeleton.parent(anchor) {
        if skeleton.depth(anchor) <= config.average_normals_level_limit {
            let parent_girth = skeleton.girth_at(parent, skeleton.position_on_parent(anchor));
            skin.add_relevant_position(parent_girth / denom, RELEVANT_RANGE, PRIORITY_STRUCTURAL);
        }
    }

    let mut acc = 0.;
    for (i, &branch) in chain.iter().enumerate() {
        let from = acc / denom;
        let to = ((acc + lengths[i]) / denom).min(1.);
        let mut params = skeleton.branch_shapes[branch]
            .curve
            .sample_params(config.branch_angle_tolerance);
        for position in skin.relevant_positions_in(from, to) {
            let local = (position - from) * denom / lengths[i].max(1e-6);
            insert_param(&mut params, local.clamp(0., 1.));
        }

        let first_in_chain = i == 0;
        let last_in_chain = i == chain.len() - 1;
        for (j, &t) in params.iter().enumerate() {
            if !first_in_chain && j == 0 {
                // ring shared with the previous chain member's end
                continue;
            }
            let position_on_skin = ((acc + t * lengths[i]) / denom).clamp(0., 1.);
            let closing = j == params.len() - 1;
            let (kind, shape_id, range_local) = skin.resolve_builder(position_on_skin, closing);
            let builder = registry.get(kind);

            let sample = skeleton.sample_at(branch, t);
            let girth = skeleton.girth_at(branch, t).max(0.) * builder.girth_scale(range_local);
            let side_count =
                builder.side_count(config, skin.girth_min, skin.girth_max, girth, shape_id);
            let segment_type = if first_in_chain && j == 0 {
                SegmentType::Begin
            } else if last_in_chain && closing {
                SegmentType::End
            } else {
                SegmentType::Middle
            };
            let shape_ring = if kind == BuilderKind::Shape {
                builder.ring_vertices(side_count, position_on_skin * skin.length, shape_id)
            } else {
                Vec::new()
            };

            let segment = Segment {
                branch,
                structure: skeleton.structure_id(branch),
                center: sample.point,
                direction: sample.tangent,
                normal: sample.normal,
                girth,
                side_count,
                position_on_branch: t,
                position_on_skin,
                segment_type,
                builder_kind: kind,
            };
            if segment_type == SegmentType::Begin && config.use_mesh_cap_at_base {
                skin.push_segment(
                    Segment {
                        girth: girth * CAP_GIRTH_FACTOR,
                        segment_type: SegmentType::BeginCap,
                        ..segment
                    },
                    Vec::new(),
                );
            }
            skin.push_segment(segment, shape_ring);
            if segment_type == SegmentType::End {
                skin.push_segment(
                    Segment {
                        girth: girth * CAP_GIRTH_FACTOR,
                        segment_type: SegmentType::EndCap,
                        ..segment
                    },
                    Vec::new(),
                );
            }
        }
        acc += lengths[i];
    }

    debug!(
        "skin {}: {} branches, {} segments, length {:.3}",
        skin.id,
        chain.len(),
        skin.segment_count(),
        skin.length
    );
    skins.push(skin);

    for &branch in &chain {
        for &child in skeleton.children(branch) {
            walk_chain(skeleton, config, registry, child, skins);
        }
    }
}
