use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Culling uniforms - frustum planes + counts
/// Note: Must match the cull shader's CullUniforms struct layout exactly
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CullUniforms {
    /// 6 frustum planes (each is vec4: xyz=normal, w=distance)
    pub frustum_planes: [[f32; 4]; 6],
    /// Instances in the group; threads past this exit early
    pub instance_count: u32,
    pub model_count: u32,
    pub _padding: [u32; 2],
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Frustum {
    pub planes: [Vec4; 6],
}

impl Frustum {
    pub fn from_view_projection(view_proj: &Mat4) -> Self {
        Frustum {
            planes: extract_frustum_planes(view_proj),
        }
    }

    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(center) + plane.w >= -radius)
    }

    pub fn uniforms(&self, instance_count: u32, model_count: u32) -> CullUniforms {
        CullUniforms {
            frustum_planes: self.planes.map(|p| p.to_array()),
            instance_count,
            model_count,
            _padding: [0; 2],
        }
    }
}

pub fn extract_frustum_planes(view_proj: &Mat4) -> [Vec4; 6] {
    let (r0, r1, r2, r3) = (
        view_proj.row(0),
        view_proj.row(1),
        view_proj.row(2),
        view_proj.row(3),
    );
    let mut planes = [
        // Left
        r3 + r0,
        // Right
        r3 - r0,
        // Bottom
        r3 + r1,
        // Top
        r3 - r1,
        // Near (WGPU depth is [0, 1])
        r2,
        // Far
        r3 - r2,
    ];

    // Normalize planes so that distances are in world units
    for plane in &mut planes {
        let length = plane.truncate().length();
        *plane /= length;
    }

    planes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Frustum {
        let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 100.0);
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        Frustum::from_view_projection(&(proj * view))
    }

    #[test]
    fn test_sphere_visibility() {
        let frustum = camera();
        assert!(frustum.intersects_sphere(Vec3::new(0.0, 0.0, -10.0), 1.0));
        // Behind the camera
        assert!(!frustum.intersects_sphere(Vec3::new(0.0, 0.0, 10.0), 1.0));
        // Past the far plane
        assert!(!frustum.intersects_sphere(Vec3::new(0.0, 0.0, -200.0), 1.0));
        // Outside the side plane, but its radius reaches in
        assert!(!frustum.intersects_sphere(Vec3::new(30.0, 0.0, -10.0), 1.0));
        assert!(frustum.intersects_sphere(Vec3::new(12.0, 0.0, -10.0), 3.0));
    }

    #[test]
    fn test_planes_are_normalized() {
        for plane in camera().planes {
            assert!((plane.truncate().length() - 1.0).abs() < 1e-5);
        }
    }
}
