use glam::{Mat3, Vec3};

pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Orthonormal basis for a cross-section ring: `x`/`y` span the plane
/// perpendicular to `direction`, `z` is `direction` itself. `up` picks the
/// roll of the ring; it only needs to be roughly non-parallel to `direction`.
pub fn ring_basis(direction: Vec3, up: Vec3) -> Mat3 {
    let forward = direction.try_normalize().unwrap_or(Vec3::Z);
    let right = up
        .cross(forward)
        .try_normalize()
        .unwrap_or_else(|| forward.any_orthonormal_vector());
    let side = forward.cross(right);
    Mat3::from_cols(right, side, forward)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ring_basis_is_orthonormal() {
        let basis = ring_basis(Vec3::new(0.3, 0.4, 0.9).normalize(), Vec3::Y);
        assert!(basis.x_axis.dot(basis.y_axis).abs() < 1e-5);
        assert!(basis.x_axis.dot(basis.z_axis).abs() < 1e-5);
        assert!((basis.x_axis.length() - 1.).abs() < 1e-5);
        assert!((basis.y_axis.length() - 1.).abs() < 1e-5);
    }

    #[test]
    fn ring_basis_survives_parallel_up() {
        let basis = ring_basis(Vec3::Z, Vec3::Z);
        assert!(basis.x_axis.dot(Vec3::Z).abs() < 1e-5);
        assert!((basis.x_axis.length() - 1.).abs() < 1e-5);
    }
}
