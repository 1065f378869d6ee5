use crate::{common::*, error::DataError};
use image::{imageops::FilterType, io::Reader as ImageReader};

/// The maximum supported output edge in pixels.
const MAX_IMAGE_SIZE: usize = 1 << 14;

/// The image loader initializer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageLoaderInit {
    /// The output image edge in pixels.
    pub image_size: usize,
    /// The expected number of color channels.
    pub image_channels: usize,
}

impl Default for ImageLoaderInit {
    fn default() -> Self {
        Self {
            image_size: 512,
            image_channels: 3,
        }
    }
}

impl ImageLoaderInit {
    pub fn build(self) -> Result<ImageLoader> {
        let Self {
            image_size,
            image_channels,
        } = self;

        if image_size == 0 || image_size > MAX_IMAGE_SIZE {
            return Err(DataError::Resize { size: image_size }.into());
        }
        ensure!(
            image_channels == 3,
            "image_channels other than 3 is not supported"
        );

        Ok(ImageLoader {
            image_size,
            image_channels,
        })
    }
}

/// Loads one image file into a normalized CHW array.
#[derive(Debug, Clone)]
pub struct ImageLoader {
    image_size: usize,
    image_channels: usize,
}

impl ImageLoader {
    /// Load, decode, resize and normalize one image.
    ///
    /// The output has shape `[channels, image_size, image_size]` with
    /// values in `[0, 1]`. Malformed or missing files fail with
    /// [`DataError::Decode`] carrying the offending path.
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<Array3<f32>> {
        let path = path.as_ref().to_owned();
        let image_size = self.image_size;

        let array =
            tokio::task::spawn_blocking(move || load_blocking(&path, image_size)).await??;
        debug_assert_eq!(
            array.dim(),
            (self.image_channels, image_size, image_size)
        );

        Ok(array)
    }
}

fn load_blocking(path: &Path, image_size: usize) -> Result<Array3<f32>> {
    let decode_err = |message: String| DataError::Decode {
        path: path.to_owned(),
        message,
    };

    let image = ImageReader::open(path)
        .map_err(|err| decode_err(err.to_string()))?
        .with_guessed_format()
        .map_err(|err| decode_err(err.to_string()))?
        .decode()
        .map_err(|err| decode_err(err.to_string()))?;

    // deterministic bilinear resize
    let image = image
        .resize_exact(image_size as u32, image_size as u32, FilterType::Triangle)
        .to_rgb8();

    // normalize to [0, 1] and convert HWC to CHW
    let samples: Vec<f32> = image
        .into_raw()
        .into_iter()
        .map(|value| value as f32 / 255.0)
        .collect();
    let array = Array3::from_shape_vec((image_size, image_size, 3), samples)?
        .permuted_axes([2, 0, 1]);

    Ok(array.as_standard_layout().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::fs;

    fn fixture_image(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("liver-dl-loader-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}.png", name));
        let image = RgbImage::from_fn(20, 30, |x, y| Rgb([x as u8 * 8, y as u8 * 4, 128]));
        image.save(&path).unwrap();
        path
    }

    #[tokio::test]
    async fn load_produces_normalized_chw_array() {
        let path = fixture_image("normalized");
        let loader = ImageLoaderInit {
            image_size: 16,
            image_channels: 3,
        }
        .build()
        .unwrap();

        let array = loader.load(&path).await.unwrap();

        assert_eq!(array.dim(), (3, 16, 16));
        assert!(array.iter().all(|&value| (0.0..=1.0).contains(&value)));
        // the blue channel is constant in the source image
        let blue = array.index_axis(Axis(0), 2);
        assert!(blue
            .iter()
            .all(|&value| (value - 128.0 / 255.0).abs() < 1e-3));
    }

    #[tokio::test]
    async fn resize_is_deterministic() {
        let path = fixture_image("deterministic");
        let loader = ImageLoaderInit {
            image_size: 16,
            image_channels: 3,
        }
        .build()
        .unwrap();

        let first = loader.load(&path).await.unwrap();
        let second = loader.load(&path).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn missing_file_is_a_decode_error() {
        let loader = ImageLoaderInit::default().build().unwrap();
        let err = loader.load("no/such/file.png").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::Decode { .. })
        ));
    }

    #[test]
    fn zero_image_size_is_rejected() {
        let err = ImageLoaderInit {
            image_size: 0,
            image_channels: 3,
        }
        .build()
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::Resize { size: 0 })
        ));
    }
}
