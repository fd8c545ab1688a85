use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Point on a branch curve with its local frame.
#[derive(Copy, Clone, Debug)]
pub struct CurveSample {
    pub point: Vec3,
    pub tangent: Vec3,
    /// Reference up for ring roll, perpendicular to `tangent`.
    pub normal: Vec3,
}

/// Centripetal Catmull-Rom through a branch's control points, extended past
/// both endpoints by mirroring so the first and last points are interpolated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BranchCurve {
    points: Vec<Vec3>,
}

/// Spans narrower than this are never subdivided further.
const MIN_SAMPLE_SPAN: f32 = 1. / 64.;

impl BranchCurve {
    pub fn new(points: Vec<Vec3>) -> Self {
        assert!(points.len() >= 2, "a branch curve needs at least 2 points");
        Self { points }
    }

    pub fn line(from: Vec3, to: Vec3) -> Self {
        Self::new(vec![from, to])
    }

    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    pub fn point_at(&self, t: f32) -> Vec3 {
        let n = self.points.len();

        // edge case, we might get an index error
        let (i0, r) = if t >= 1. {
            (n - 2, 1.)
        } else {
            let step = f32::floor((n - 1) as f32 * t.max(0.));
            (step as usize, t.max(0.) * (n - 1) as f32 - step)
        };

        let segment = [
            if i0 == 0 {
                2. * self.points[0] - self.points[1]
            } else {
                self.points[i0 - 1]
            },
            self.points[i0],
            self.points[i0 + 1],
            if i0 == n - 2 {
                2. * self.points[n - 1] - self.points[n - 2]
            } else {
                self.points[i0 + 2]
            },
        ];

        let mut knots = [0.; 4];
        for i in 1..4 {
            knots[i] = knots[i - 1] + (segment[i] - segment[i - 1]).length().sqrt();
        }
        let u = knots[1] + (knots[2] - knots[1]) * r;

        let ratio = |i: usize, j: usize| {
            let span = knots[j] - knots[i];
            if span.abs() < 1e-12 {
                0.
            } else {
                (u - knots[i]) / span
            }
        };

        let mut first = [Vec3::ZERO; 3];
        for i in 0..3 {
            first[i] = segment[i].lerp(segment[i + 1], ratio(i, i + 1));
        }
        let b1 = first[0].lerp(first[1], ratio(0, 2));
        let b2 = first[1].lerp(first[2], ratio(1, 3));
        b1.lerp(b2, ratio(1, 2))
    }

    pub fn tangent_at(&self, t: f32) -> Vec3 {
        let h = 1. / 128.;
        let t0 = (t - h).max(0.);
        let t1 = (t + h).min(1.);
        let chord = self.point_at(t1) - self.point_at(t0);
        chord.try_normalize().unwrap_or_else(|| {
            let n = self.points.len();
            (self.points[n - 1] - self.points[0])
                .try_normalize()
                .unwrap_or(Vec3::Z)
        })
    }

    /// Frame at `t`, with `base_up` projected perpendicular to the tangent.
    pub fn sample_at(&self, t: f32, base_up: Vec3) -> CurveSample {
        let point = self.point_at(t);
        let tangent = self.tangent_at(t);
        let normal = (base_up - base_up.dot(tangent) * tangent)
            .try_normalize()
            .unwrap_or_else(|| tangent.any_orthonormal_vector());
        CurveSample {
            point,
            tangent,
            normal,
        }
    }

    /// Polyline length, sampled densely enough for meshing purposes.
    pub fn length(&self) -> f32 {
        let steps = 8 * (self.points.len() - 1);
        let mut total = 0.;
        let mut previous = self.point_at(0.);
        for i in 1..=steps {
            let p = self.point_at(i as f32 / steps as f32);
            total += (p - previous).length();
            previous = p;
        }
        total
    }

    /// Minimal ordered parameter set covering the curve so that the tangent
    /// never turns more than `tolerance_deg` between consecutive samples.
    /// Always contains 0 and 1.
    pub fn sample_params(&self, tolerance_deg: f32) -> Vec<f32> {
        let tolerance = tolerance_deg.to_radians().max(1e-3);
        let mut params = vec![0.];
        self.subdivide(0., 1., tolerance, &mut params);
        params.push(1.);
        params
    }

    fn subdivide(&self, t0: f32, t1: f32, tolerance: f32, acc: &mut Vec<f32>) {
        if t1 - t0 <= MIN_SAMPLE_SPAN {
            return;
        }
        let mid = 0.5 * (t0 + t1);
        let a = self.tangent_at(t0);
        let m = self.tangent_at(mid);
        let b = self.tangent_at(t1);
        if a.angle_between(m) <= tolerance && m.angle_between(b) <= tolerance {
            return;
        }
        self.subdivide(t0, mid, tolerance, acc);
        acc.push(mid);
        self.subdivide(mid, t1, tolerance, acc);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn interpolates_endpoints() {
        let curve = BranchCurve::new(vec![
            Vec3::ZERO,
            Vec3::new(1., 0., 2.),
            Vec3::new(0., 1., 4.),
        ]);
        assert!((curve.point_at(0.) - Vec3::ZERO).length() < 1e-4);
        assert!((curve.point_at(1.) - Vec3::new(0., 1., 4.)).length() < 1e-4);
    }

    #[test]
    fn straight_line_needs_two_samples() {
        let curve = BranchCurve::line(Vec3::ZERO, Vec3::new(0., 0., 10.));
        assert_eq!(curve.sample_params(10.), vec![0., 1.]);
        assert!((curve.length() - 10.).abs() < 1e-3);
    }

    #[test]
    fn bent_curve_gets_subdivided() {
        let curve = BranchCurve::new(vec![
            Vec3::ZERO,
            Vec3::new(0., 0., 2.),
            Vec3::new(2., 0., 4.),
            Vec3::new(4., 0., 4.),
        ]);
        let params = curve.sample_params(10.);
        assert!(params.len() > 2, "expected interior samples, got {params:?}");
        for pair in params.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn frame_normal_is_perpendicular() {
        let curve = BranchCurve::new(vec![Vec3::ZERO, Vec3::new(1., 0., 3.)]);
        let sample = curve.sample_at(0.5, Vec3::Y);
        assert!(sample.tangent.dot(sample.normal).abs() < 1e-4);
        assert!((sample.normal.length() - 1.).abs() < 1e-4);
    }
}
