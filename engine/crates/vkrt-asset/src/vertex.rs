/// 网格顶点
///
/// uv 被拆开放在 position 与 normal 的第 4 个分量中，整体 64 字节，和 shader 中的布局一致。
/// BLAS 构建时只读取前 12 个字节的 position
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: glam::Vec3,
    pub uv_x: f32,
    pub normal: glam::Vec3,
    pub uv_y: f32,
    pub color: glam::Vec4,
    pub tangent: glam::Vec4,
}

impl Vertex {
    /// 只有 position 和 color 的顶点，其余字段使用默认值
    pub fn new(position: glam::Vec3, color: glam::Vec4) -> Self {
        Self {
            position,
            normal: glam::Vec3::Z,
            color,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(size_of::<Vertex>(), 64);
        assert_eq!(std::mem::offset_of!(Vertex, position), 0);
        assert_eq!(std::mem::offset_of!(Vertex, uv_x), 12);
        assert_eq!(std::mem::offset_of!(Vertex, normal), 16);
        assert_eq!(std::mem::offset_of!(Vertex, uv_y), 28);
        assert_eq!(std::mem::offset_of!(Vertex, color), 32);
        assert_eq!(std::mem::offset_of!(Vertex, tangent), 48);
    }

    #[test]
    fn test_bytes() {
        let vertex = Vertex::new(glam::vec3(1.0, 2.0, 3.0), glam::Vec4::ONE);
        let bytes = bytemuck::bytes_of(&vertex);
        assert_eq!(bytes.len(), 64);
        assert_eq!(&bytes[0..4], &1.0f32.to_ne_bytes());
    }
}
