use std::fmt;

use crate::{
    kinds::{ResourceId, ResourceKind, SoftwareContext},
    AssetKey, AssetType, Error, Result,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextureParams {
    pub mipmaps: bool,
    pub anisotropic_filtering: bool,
}

/// Image decoded to 8 bit RGBA.
#[derive(Clone, PartialEq, Eq)]
pub struct TextureAsset {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl TextureAsset {
    pub fn from_rgba8(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        if pixels.len() != width as usize * height as usize * 4 {
            return Err(Error::Decode(format!(
                "expected {} bytes for a {width}x{height} texture but got {}",
                width as usize * height as usize * 4,
                pixels.len()
            )));
        }
        Ok(Self { width, height, pixels })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    fn byte_size(&self, params: &TextureParams) -> usize {
        // A full mip chain needs a third of the base level on top.
        match params.mipmaps {
            true => self.pixels.len() + self.pixels.len() / 3,
            false => self.pixels.len(),
        }
    }
}

impl fmt::Debug for TextureAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureAsset")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl AssetType for TextureAsset {
    type Context = SoftwareContext;
    type Params = TextureParams;
    type Resource = ResourceId;

    const TYPE_TAG: &'static str = "texture";

    fn decode(bytes: &[u8], _params: &Self::Params) -> Result<Self> {
        let image = image::load_from_memory(bytes).map_err(|err| Error::Decode(err.to_string()))?;
        let image = image.to_rgba8();
        let (width, height) = image.dimensions();
        Self::from_rgba8(width, height, image.into_raw())
    }

    fn commit(&self, params: &Self::Params, context: &mut Self::Context) -> Result<Self::Resource> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::Decode("textures must not be empty".to_owned()));
        }
        Ok(context.allocate(ResourceKind::Texture, self.byte_size(params)))
    }

    fn fallback_key() -> AssetKey {
        AssetKey::new("textures/default.png")
    }

    fn hardcoded_fallback() -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: vec![255, 255, 255, 255],
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Cursor, sync::Arc};

    use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
    use keystone_test::{
        setup_logger,
        spectral::{assert_that, prelude::*},
        wait_until,
    };

    use super::*;
    use crate::{AssetCache, ErrorKind, MemoryStorage, RecordingReporter};

    fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba(color));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn decodes_png() {
        let texture = TextureAsset::decode(&png(2, 3, [10, 20, 30, 255]), &TextureParams::default()).unwrap();
        assert_that!(texture.width()).is_equal_to(2);
        assert_that!(texture.height()).is_equal_to(3);
        assert_that!(texture.pixels().len()).is_equal_to(24);
        assert_that!(texture.pixels()[..4].to_vec()).is_equal_to(vec![10, 20, 30, 255]);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let result = TextureAsset::decode(b"not an image", &TextureParams::default());
        assert_that!(matches!(result, Err(Error::Decode(_)))).is_true();
    }

    #[test]
    fn rejects_mismatching_pixel_count() {
        assert_that!(TextureAsset::from_rgba8(2, 2, vec![0; 4])).is_err();
    }

    #[test]
    fn mipmaps_need_more_memory() {
        let mut context = SoftwareContext::new();
        let texture = TextureAsset::from_rgba8(2, 2, vec![0; 16]).unwrap();
        let plain = texture.commit(&TextureParams::default(), &mut context).unwrap();
        let params = TextureParams {
            mipmaps: true,
            ..Default::default()
        };
        let mipmapped = texture.commit(&params, &mut context).unwrap();
        assert_that!(context.get(plain).unwrap().byte_size).is_equal_to(16);
        assert_that!(context.get(mipmapped).unwrap().byte_size).is_equal_to(21);
    }

    #[test]
    fn missing_texture_is_a_white_pixel() {
        setup_logger();
        let reporter = Arc::new(RecordingReporter::new());
        let storage = MemoryStorage::new().with("tex/stone.png", png(4, 4, [128, 128, 128, 255]));
        let cache = AssetCache::<SoftwareContext>::builder()
            .with_storage(storage)
            .with_error_reporter(reporter.clone())
            .build()
            .unwrap();
        let mut context = SoftwareContext::new();

        let brick = cache.request::<TextureAsset>("tex/brick", TextureParams::default());
        let stone = cache.request::<TextureAsset>("tex/stone.png", TextureParams::default());
        assert_that!(wait_until(std::time::Duration::from_secs(5), || {
            cache.tick(&mut context);
            cache.ready_to_use()
        }))
        .is_true();

        assert_that!(brick.is_substituted()).is_true();
        assert_that!(brick.payload().unwrap().pixels().to_vec()).is_equal_to(vec![255, 255, 255, 255]);
        assert_that!(stone.is_substituted()).is_false();
        assert_that!(stone.payload().unwrap().width()).is_equal_to(4);
        let reports = reporter.reports_for(brick.key());
        assert_that!(reports).has_length(1);
        assert_that!(reports[0].kind).is_equal_to(ErrorKind::NotFound);
        // The brick shares the resource of the fallback, the stone got its own.
        assert_that!(context.len()).is_equal_to(2);
    }
}
