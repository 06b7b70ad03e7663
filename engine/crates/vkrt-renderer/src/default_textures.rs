use ash::vk;
use vkrt_asset::asset::TextureAsset;
use vkrt_gfx::resources::image::GfxImage;

use crate::deletion_queue::{DeferredResource, DeletionQueue, Readiness};

/// 材质缺少纹理时使用的默认纹理
pub struct DefaultTextures {
    pub white: GfxImage,
    pub black: GfxImage,
    pub grey: GfxImage,
    /// 品红与黑色交替的棋盘格，用于标记加载失败的纹理
    pub error: GfxImage,
}

impl DefaultTextures {
    pub const WHITE: [u8; 4] = [255, 255, 255, 255];
    pub const BLACK: [u8; 4] = [0, 0, 0, 255];
    pub const GREY: [u8; 4] = [168, 168, 168, 255];
    pub const MAGENTA: [u8; 4] = [255, 0, 255, 255];
    pub const ERROR_SIZE: u32 = 16;

    /// 需要创建的全部纹理，顺序与字段一致
    pub fn assets() -> [(&'static str, TextureAsset); 4] {
        [
            ("white", TextureAsset::solid(Self::WHITE)),
            ("black", TextureAsset::solid(Self::BLACK)),
            ("grey", TextureAsset::solid(Self::GREY)),
            ("error-checkerboard", TextureAsset::checkerboard(Self::ERROR_SIZE, Self::MAGENTA, Self::BLACK)),
        ]
    }

    pub fn new() -> anyhow::Result<Self> {
        let _span = tracy_client::span!("DefaultTextures::new");

        let mut images = Vec::with_capacity(4);
        for (name, asset) in Self::assets() {
            match Self::upload(name, &asset) {
                Ok(image) => images.push(image),
                Err(e) => {
                    images.into_iter().for_each(GfxImage::destroy);
                    return Err(e);
                }
            }
        }

        let [white, black, grey, error]: [GfxImage; 4] = images.try_into().map_err(|rest: Vec<GfxImage>| {
            let count = rest.len();
            rest.into_iter().for_each(GfxImage::destroy);
            anyhow::anyhow!("expected 4 default textures, got {count}")
        })?;
        Ok(Self {
            white,
            black,
            grey,
            error,
        })
    }

    fn upload(name: &str, asset: &TextureAsset) -> anyhow::Result<GfxImage> {
        let [width, height, depth] = asset.extent;
        GfxImage::upload(
            &asset.pixels,
            vk::Extent3D { width, height, depth },
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED,
            false,
            &format!("default-{name}"),
        )
    }

    /// 交给延迟销毁队列，与其他资源走同一条路径
    pub fn retire(self, deletion_queue: &mut DeletionQueue<DeferredResource>) {
        for image in [self.white, self.black, self.grey, self.error] {
            deletion_queue.push(DeferredResource::Image(image), Readiness::Immediate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_assets_are_valid() {
        let assets = DefaultTextures::assets();
        assert!(assets.iter().all(|(_, asset)| asset.is_valid()));
        assert_eq!(assets[0].1.pixels, DefaultTextures::WHITE);
        assert_eq!(assets[3].1.extent, [16, 16, 1]);
    }

    #[test]
    fn test_error_texture_alternates() {
        let (_, error) = &DefaultTextures::assets()[3];
        let texel = |x: usize, y: usize| {
            let offset = (y * DefaultTextures::ERROR_SIZE as usize + x) * TextureAsset::BYTES_PER_TEXEL;
            &error.pixels[offset..offset + 4]
        };
        assert_ne!(texel(0, 0), texel(1, 0));
        assert_eq!(texel(0, 0), texel(1, 1));
    }
}
