use glam::Mat4;

/// ray gen shader 读取的 push constants
///
/// 与 shader 中的结构体布局一致，4 个列主序矩阵
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RtPushConstants {
    pub view: Mat4,
    pub projection: Mat4,
    pub inv_view: Mat4,
    pub inv_projection: Mat4,
}

/// 保存 view 与 projection 矩阵，设置时同时缓存逆矩阵
pub struct RtCamera {
    push_constants: RtPushConstants,
}

impl RtCamera {
    pub const FOV_Y_DEGREES: f32 = 70.0;
    pub const Z_NEAR: f32 = 0.1;
    pub const Z_FAR: f32 = 10000.0;

    /// view 为单位矩阵，projection 为默认的 reverse-Z 透视投影
    pub fn new(framebuffer_extent: [u32; 2]) -> Self {
        let mut camera = Self {
            push_constants: RtPushConstants {
                view: Mat4::IDENTITY,
                projection: Mat4::IDENTITY,
                inv_view: Mat4::IDENTITY,
                inv_projection: Mat4::IDENTITY,
            },
        };
        camera.set_projection_matrix(Self::default_projection(framebuffer_extent));
        camera
    }

    /// reverse-Z：near 平面映射到深度 1，far 平面映射到深度 0
    pub fn default_projection(framebuffer_extent: [u32; 2]) -> Mat4 {
        let [width, height] = framebuffer_extent;
        let aspect = if height == 0 { 1.0 } else { width as f32 / height as f32 };
        // 交换 near 与 far 即可得到 reverse-Z
        Mat4::perspective_rh(Self::FOV_Y_DEGREES.to_radians(), aspect, Self::Z_FAR, Self::Z_NEAR)
    }

    pub fn set_view_matrix(&mut self, view: Mat4) {
        self.push_constants.view = view;
        self.push_constants.inv_view = view.inverse();
    }

    pub fn set_projection_matrix(&mut self, projection: Mat4) {
        self.push_constants.projection = projection;
        self.push_constants.inv_projection = projection.inverse();
    }

    #[inline]
    pub fn push_constants(&self) -> &RtPushConstants {
        &self.push_constants
    }
}

#[cfg(test)]
mod tests {
    use glam::{Vec3, Vec4};

    use super::*;

    fn depth_at(projection: Mat4, z: f32) -> f32 {
        let clip = projection * Vec4::new(0.0, 0.0, z, 1.0);
        clip.z / clip.w
    }

    #[test]
    fn test_push_constants_layout() {
        assert_eq!(size_of::<RtPushConstants>(), 256);
        let camera = RtCamera::new([1280, 720]);
        assert_eq!(bytemuck::bytes_of(camera.push_constants()).len(), 256);
    }

    #[test]
    fn test_default_projection_is_reverse_z() {
        let projection = RtCamera::default_projection([1280, 720]);
        assert!((depth_at(projection, -RtCamera::Z_NEAR) - 1.0).abs() < 1e-4);
        assert!(depth_at(projection, -RtCamera::Z_FAR).abs() < 1e-4);
    }

    #[test]
    fn test_zero_height_does_not_produce_nan() {
        let projection = RtCamera::default_projection([800, 0]);
        assert!(projection.is_finite());
    }

    #[test]
    fn test_setters_cache_inverse() {
        let mut camera = RtCamera::new([16, 9]);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, Vec3::Y);
        camera.set_view_matrix(view);

        let pc = camera.push_constants();
        assert_eq!(pc.view, view);
        assert!((pc.view * pc.inv_view).abs_diff_eq(Mat4::IDENTITY, 1e-5));
        assert!((pc.projection * pc.inv_projection).abs_diff_eq(Mat4::IDENTITY, 1e-4));
    }

    #[test]
    fn test_initial_view_is_identity() {
        let camera = RtCamera::new([16, 9]);
        assert_eq!(camera.push_constants().view, Mat4::IDENTITY);
        assert_eq!(camera.push_constants().inv_view, Mat4::IDENTITY);
    }
}
