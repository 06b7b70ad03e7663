use crate::{
    handle::{MaterialHandle, MeshHandle, TextureHandle},
    vertex::Vertex,
};

/// 一个模型由一个 mesh 以及若干材质组成
#[derive(Clone, Debug)]
pub struct ModelAsset {
    pub mesh: MeshHandle,
    pub materials: Vec<MaterialHandle>,
}

/// 网格的 CPU 端数据，加载时上传到 GPU 并构建 BLAS
#[derive(Clone, Debug)]
pub struct MeshAsset {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

/// 材质只引用纹理，本身没有 GPU 资源
#[derive(Clone, Debug)]
pub struct MaterialAsset {
    pub color_factors: glam::Vec4,
    pub metal_rough_factors: glam::Vec4,

    pub base_color: Option<TextureHandle>,
    pub metal_rough: Option<TextureHandle>,
    pub normal: Option<TextureHandle>,
}

impl MaterialAsset {
    pub fn textures(&self) -> impl Iterator<Item = TextureHandle> + '_ {
        [self.base_color, self.metal_rough, self.normal].into_iter().flatten()
    }
}

/// RGBA8 像素，加载时上传为带 mipmap 的采样纹理
#[derive(Clone, Debug)]
pub struct TextureAsset {
    pub pixels: Vec<u8>,
    pub extent: [u32; 3],
}

impl TextureAsset {
    pub const BYTES_PER_TEXEL: usize = 4;

    /// 像素数量和 extent 是否匹配
    pub fn is_valid(&self) -> bool {
        let [w, h, d] = self.extent;
        if w == 0 || h == 0 || d == 0 {
            return false;
        }
        (w as usize)
            .checked_mul(h as usize)
            .and_then(|n| n.checked_mul(d as usize))
            .and_then(|n| n.checked_mul(Self::BYTES_PER_TEXEL))
            == Some(self.pixels.len())
    }

    /// 单一颜色的 1x1 纹理
    pub fn solid(rgba: [u8; 4]) -> Self {
        Self {
            pixels: rgba.to_vec(),
            extent: [1, 1, 1],
        }
    }

    /// 由两种颜色交替组成的棋盘格
    pub fn checkerboard(size: u32, a: [u8; 4], b: [u8; 4]) -> Self {
        let pixels = (0..size)
            .flat_map(|y| (0..size).map(move |x| if (x % 2) ^ (y % 2) == 1 { a } else { b }))
            .flatten()
            .collect();
        Self {
            pixels,
            extent: [size, size, 1],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkerboard() {
        const MAGENTA: [u8; 4] = [255, 0, 255, 255];
        const BLACK: [u8; 4] = [0, 0, 0, 255];
        let tex = TextureAsset::checkerboard(16, MAGENTA, BLACK);
        assert!(tex.is_valid());
        assert_eq!(tex.pixels.len(), 16 * 16 * 4);
        assert_eq!(&tex.pixels[0..4], &BLACK);
        assert_eq!(&tex.pixels[4..8], &MAGENTA);
        // 第二行从 magenta 开始
        assert_eq!(&tex.pixels[16 * 4..16 * 4 + 4], &MAGENTA);
    }

    #[test]
    fn test_invalid_texture() {
        let tex = TextureAsset {
            pixels: vec![0; 3],
            extent: [1, 1, 1],
        };
        assert!(!tex.is_valid());
        assert!(TextureAsset::solid([1, 2, 3, 4]).is_valid());
    }

    #[test]
    fn test_huge_extent_is_invalid() {
        let tex = TextureAsset {
            pixels: vec![],
            extent: [100_000, 100_000, 1],
        };
        assert!(!tex.is_valid());

        let tex = TextureAsset {
            pixels: vec![0; 4],
            extent: [u32::MAX, u32::MAX, u32::MAX],
        };
        assert!(!tex.is_valid());
    }
}
