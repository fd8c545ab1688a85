use glam::Vec3;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

mod curve;
pub use curve::{BranchCurve, CurveSample};

/// Topology of one branch inside the skeleton.
///
/// `follow_up` continues the branch into the next one without forking; a
/// follow-up is not listed in `children` and keeps its parent's depth.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BranchInfo {
    pub structure_id: usize,
    pub parent: Option<usize>,
    pub follow_up: Option<usize>,
    pub children: SmallVec<[usize; 4]>,
    /// Attachment point on the parent, in the parent's [0,1] range.
    pub position_on_parent: f32,
    pub break_position: Option<f32>,
    pub depth: usize,
}

/// Geometry of one branch: its curve, girth profile and ring roll reference.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BranchShape {
    pub curve: BranchCurve,
    pub girth_base: f32,
    pub girth_tip: f32,
    pub base_normal: Vec3,
    pub length: f32,
}

impl BranchShape {
    pub fn new(curve: BranchCurve, girth_base: f32, girth_tip: f32) -> Self {
        let length = curve.length();
        Self {
            curve,
            girth_base,
            girth_tip,
            base_normal: Vec3::Y,
            length,
        }
    }
}

/// The external branch hierarchy this engine meshes. Built once by a growth
/// generator, then read-only for the whole build.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TreeSkeleton {
    pub branch_info: Vec<BranchInfo>,
    pub branch_shapes: Vec<BranchShape>,
}

impl TreeSkeleton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn branch_count(&self) -> usize {
        self.branch_info.len()
    }

    pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        self.branch_info
            .iter()
            .enumerate()
            .filter(|(_, info)| info.parent.is_none())
            .map(|(i, _)| i)
    }

    pub fn add_root(&mut self, shape: BranchShape) -> usize {
        let id = self.branch_info.len();
        self.branch_info.push(BranchInfo {
            structure_id: id,
            parent: None,
            follow_up: None,
            children: SmallVec::new(),
            position_on_parent: 0.,
            break_position: None,
            depth: 0,
        });
        self.branch_shapes.push(shape);
        id
    }

    /// Attach a side branch at `position_on_parent` of `parent`.
    pub fn add_child(&mut self, parent: usize, position_on_parent: f32, shape: BranchShape) -> usize {
        let id = self.branch_info.len();
        let info = &self.branch_info[parent];
        let (structure_id, depth) = (info.structure_id, info.depth + 1);
        self.branch_info.push(BranchInfo {
            structure_id,
            parent: Some(parent),
            follow_up: None,
            children: SmallVec::new(),
            position_on_parent: position_on_parent.clamp(0., 1.),
            break_position: None,
            depth,
        });
        self.branch_info[parent].children.push(id);
        self.branch_shapes.push(shape);
        id
    }

    /// Continue `parent` into a new branch without forking.
    pub fn add_follow_up(&mut self, parent: usize, shape: BranchShape) -> usize {
        assert!(
            self.branch_info[parent].follow_up.is_none(),
            "branch {parent} already has a follow-up"
        );
        let id = self.branch_info.len();
        let info = &self.branch_info[parent];
        let (structure_id, depth) = (info.structure_id, info.depth);
        self.branch_info.push(BranchInfo {
            structure_id,
            parent: Some(parent),
            follow_up: None,
            children: SmallVec::new(),
            position_on_parent: 1.,
            break_position: None,
            depth,
        });
        self.branch_info[parent].follow_up = Some(id);
        self.branch_shapes.push(shape);
        id
    }

    pub fn parent(&self, branch: usize) -> Option<usize> {
        self.branch_info[branch].parent
    }

    pub fn follow_up(&self, branch: usize) -> Option<usize> {
        self.branch_info[branch].follow_up
    }

    pub fn children(&self, branch: usize) -> &[usize] {
        &self.branch_info[branch].children
    }

    pub fn depth(&self, branch: usize) -> usize {
        self.branch_info[branch].depth
    }

    pub fn structure_id(&self, branch: usize) -> usize {
        self.branch_info[branch].structure_id
    }

    pub fn position_on_parent(&self, branch: usize) -> f32 {
        self.branch_info[branch].position_on_parent
    }

    pub fn break_position(&self, branch: usize) -> Option<f32> {
        self.branch_info[branch].break_position
    }

    pub fn length(&self, branch: usize) -> f32 {
        self.branch_shapes[branch].length
    }

    pub fn girth_at(&self, branch: usize, t: f32) -> f32 {
        let shape = &self.branch_shapes[branch];
        crate::utils::lerp(shape.girth_base, shape.girth_tip, t.clamp(0., 1.))
    }

    pub fn sample_at(&self, branch: usize, t: f32) -> CurveSample {
        let shape = &self.branch_shapes[branch];
        shape.curve.sample_at(t.clamp(0., 1.), shape.base_normal)
    }

    /// World-space point where `branch` attaches to its parent.
    pub fn attachment_point(&self, branch: usize) -> Option<Vec3> {
        let parent = self.parent(branch)?;
        Some(self.sample_at(parent, self.position_on_parent(branch)).point)
    }

    /// Small hand-built skeleton used by tests and docs: a two-branch trunk
    /// chain with a bent side branch and a twig on the follow-up.
    pub fn demo() -> Self {
        let mut skeleton = Self::new();
        let trunk = skeleton.add_root(BranchShape::new(
            BranchCurve::new(vec![
                Vec3::ZERO,
                Vec3::new(0.2, 0., 2.),
                Vec3::new(0., 0.3, 4.),
            ]),
            1.,
            0.7,
        ));
        let crown = skeleton.add_follow_up(
            trunk,
            BranchShape::new(
                BranchCurve::new(vec![
                    Vec3::new(0., 0.3, 4.),
                    Vec3::new(-0.3, 0.2, 6.),
                    Vec3::new(0., 0., 8.),
                ]),
                0.7,
                0.15,
            ),
        );
        skeleton.add_child(
            trunk,
            0.6,
            BranchShape::new(
                BranchCurve::new(vec![
                    Vec3::new(0.1, 0., 2.4),
                    Vec3::new(1.5, 0.2, 3.2),
                    Vec3::new(2.8, 0.1, 4.4),
                ]),
                0.4,
                0.08,
            ),
        );
        skeleton.add_child(
            crown,
            0.5,
            BranchShape::new(
                BranchCurve::line(Vec3::new(-0.2, 0.25, 6.), Vec3::new(-1.6, 1., 7.2)),
                0.2,
                0.05,
            ),
        );
        skeleton
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn follow_up_keeps_depth() {
        let skeleton = TreeSkeleton::demo();
        assert_eq!(skeleton.depth(0), 0);
        assert_eq!(skeleton.depth(1), 0);
        assert_eq!(skeleton.follow_up(0), Some(1));
        assert_eq!(skeleton.depth(2), 1);
        assert!(!skeleton.children(0).contains(&1));
        assert!(skeleton.children(0).contains(&2));
    }

    #[test]
    fn one_root_in_demo() {
        let skeleton = TreeSkeleton::demo();
        assert_eq!(skeleton.roots().collect::<Vec<_>>(), vec![0]);
        assert_eq!(skeleton.branch_count(), 4);
    }

    #[test]
    fn girth_interpolates() {
        let skeleton = TreeSkeleton::demo();
        assert!((skeleton.girth_at(0, 0.) - 1.).abs() < 1e-6);
        assert!((skeleton.girth_at(0, 1.) - 0.7).abs() < 1e-6);
        assert!((skeleton.girth_at(0, 0.5) - 0.85).abs() < 1e-6);
    }
}
