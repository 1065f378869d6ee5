use crate::{common::*, config::CutoutFill};

/// The augmentation operator initializer.
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentorInit {
    /// The probability to flip each image horizontally.
    pub horizontal_flip_prob: R64,
    /// The rotation bound in turns, e.g. 0.2 rotates within ±0.2 × 2π.
    pub rotation_factor: R64,
    /// The occluded patch height as a fraction of image height.
    pub cutout_height_factor: R64,
    /// The occluded patch width as a fraction of image width.
    pub cutout_width_factor: R64,
    pub cutout_fill: CutoutFill,
}

impl Default for AugmentorInit {
    fn default() -> Self {
        Self {
            horizontal_flip_prob: r64(0.5),
            rotation_factor: r64(0.2),
            cutout_height_factor: r64(0.2),
            cutout_width_factor: r64(0.2),
            cutout_fill: CutoutFill::Constant { value: 0.0 },
        }
    }
}

impl AugmentorInit {
    pub fn build(self) -> Result<Augmentor> {
        let Self {
            horizontal_flip_prob,
            rotation_factor,
            cutout_height_factor,
            cutout_width_factor,
            cutout_fill,
        } = self;

        ensure!(
            (0.0..=1.0).contains(&horizontal_flip_prob.raw()),
            "horizontal_flip_prob must be within [0, 1]"
        );
        ensure!(
            rotation_factor >= 0.0,
            "rotation_factor must be non-negative"
        );
        ensure!(
            (0.0..=1.0).contains(&cutout_height_factor.raw()),
            "cutout_height_factor must be within [0, 1]"
        );
        ensure!(
            (0.0..=1.0).contains(&cutout_width_factor.raw()),
            "cutout_width_factor must be within [0, 1]"
        );

        Ok(Augmentor {
            horizontal_flip_prob: horizontal_flip_prob.raw(),
            rotation_radians: rotation_factor.raw() * std::f64::consts::TAU,
            cutout_height_factor: cutout_height_factor.raw(),
            cutout_width_factor: cutout_width_factor.raw(),
            cutout_fill,
        })
    }
}

/// Applies horizontal flip, rotation and cutout, in that order.
///
/// All randomness comes from the caller-provided generator; the operator
/// itself is stateless and safe to share across pipeline constructions.
#[derive(Debug, Clone)]
pub struct Augmentor {
    horizontal_flip_prob: f64,
    rotation_radians: f64,
    cutout_height_factor: f64,
    cutout_width_factor: f64,
    cutout_fill: CutoutFill,
}

impl Augmentor {
    /// Augment every image of an NCHW batch independently, in place.
    pub fn forward_batch(&self, batch: &mut Array4<f32>, rng: &mut impl Rng) {
        batch.outer_iter_mut().for_each(|mut image| {
            self.forward(&mut image, rng);
        });
    }

    /// Augment one CHW image in place.
    pub fn forward(&self, image: &mut ArrayViewMut3<f32>, rng: &mut impl Rng) {
        if self.horizontal_flip_prob > 0.0 && rng.gen_bool(self.horizontal_flip_prob) {
            hflip(image);
        }

        if self.rotation_radians > 0.0 {
            let angle = rng.gen_range(-self.rotation_radians..self.rotation_radians);
            let rotated = rotate(&image.view(), angle);
            image.assign(&rotated);
        }

        self.cutout(image, rng);
    }

    fn cutout(&self, image: &mut ArrayViewMut3<f32>, rng: &mut impl Rng) {
        let (_channels, height, width) = image.dim();
        let cut_h = (height as f64 * self.cutout_height_factor).round() as usize;
        let cut_w = (width as f64 * self.cutout_width_factor).round() as usize;
        if cut_h == 0 || cut_w == 0 {
            return;
        }

        // random patch center, clipped at the borders
        let center_y = rng.gen_range(0..height);
        let center_x = rng.gen_range(0..width);
        let top = center_y.saturating_sub(cut_h / 2);
        let bottom = (top + cut_h).min(height);
        let left = center_x.saturating_sub(cut_w / 2);
        let right = (left + cut_w).min(width);

        let mut region = image.slice_mut(s![.., top..bottom, left..right]);
        match self.cutout_fill {
            CutoutFill::Constant { value } => region.fill(value),
            CutoutFill::Noise => {
                region.iter_mut().for_each(|value| *value = rng.gen_range(0.0..1.0));
            }
        }
    }
}

/// Flip a CHW image along its horizontal axis in place.
pub fn hflip(image: &mut ArrayViewMut3<f32>) {
    let (channels, height, width) = image.dim();
    for channel in 0..channels {
        for row in 0..height {
            for col in 0..width / 2 {
                image.swap([channel, row, col], [channel, row, width - 1 - col]);
            }
        }
    }
}

/// Rotate a CHW image about its center with bilinear sampling.
///
/// Pixels sampled outside the source stay zero.
pub fn rotate(image: &ArrayView3<f32>, angle: f64) -> Array3<f32> {
    let (channels, height, width) = image.dim();
    let mut output = Array3::zeros((channels, height, width));
    let (sin, cos) = angle.sin_cos();
    let center_y = (height as f64 - 1.0) / 2.0;
    let center_x = (width as f64 - 1.0) / 2.0;

    for row in 0..height {
        for col in 0..width {
            // inverse mapping into the source image
            let dy = row as f64 - center_y;
            let dx = col as f64 - center_x;
            let src_y = center_y + dy * cos - dx * sin;
            let src_x = center_x + dy * sin + dx * cos;

            if src_y < 0.0
                || src_x < 0.0
                || src_y > (height - 1) as f64
                || src_x > (width - 1) as f64
            {
                continue;
            }

            let y0 = src_y.floor() as usize;
            let x0 = src_x.floor() as usize;
            let y1 = (y0 + 1).min(height - 1);
            let x1 = (x0 + 1).min(width - 1);
            let wy = src_y - y0 as f64;
            let wx = src_x - x0 as f64;

            for channel in 0..channels {
                let v00 = image[[channel, y0, x0]] as f64;
                let v01 = image[[channel, y0, x1]] as f64;
                let v10 = image[[channel, y1, x0]] as f64;
                let v11 = image[[channel, y1, x1]] as f64;
                let value = v00 * (1.0 - wy) * (1.0 - wx)
                    + v01 * (1.0 - wy) * wx
                    + v10 * wy * (1.0 - wx)
                    + v11 * wy * wx;
                output[[channel, row, col]] = value as f32;
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn gradient_image(height: usize, width: usize) -> Array3<f32> {
        Array3::from_shape_fn((3, height, width), |(channel, row, col)| {
            (channel * 100 + row * 10 + col) as f32 / 1000.0
        })
    }

    #[test]
    fn hflip_is_an_involution() {
        let original = gradient_image(6, 9);
        let mut flipped = original.clone();
        hflip(&mut flipped.view_mut());
        assert_ne!(flipped, original);

        hflip(&mut flipped.view_mut());
        assert_eq!(flipped, original);
    }

    #[test]
    fn zero_rotation_is_identity() {
        let original = gradient_image(7, 7);
        let rotated = rotate(&original.view(), 0.0);
        assert_eq!(rotated, original);
    }

    #[test]
    fn half_turn_flips_both_axes() {
        let original = gradient_image(5, 5);
        let rotated = rotate(&original.view(), std::f64::consts::PI);

        for channel in 0..3 {
            for row in 0..5 {
                for col in 0..5 {
                    assert_abs_diff_eq!(
                        rotated[[channel, row, col]],
                        original[[channel, 4 - row, 4 - col]],
                        epsilon = 1e-5
                    );
                }
            }
        }
    }

    #[test]
    fn cutout_masks_a_bounded_region() {
        let augmentor = AugmentorInit {
            horizontal_flip_prob: r64(0.0),
            rotation_factor: r64(0.0),
            cutout_height_factor: r64(0.5),
            cutout_width_factor: r64(0.5),
            cutout_fill: CutoutFill::Constant { value: 0.0 },
        }
        .build()
        .unwrap();

        let mut image = Array3::from_elem((3, 16, 16), 1.0f32);
        let mut rng = StdRng::seed_from_u64(0);
        augmentor.forward(&mut image.view_mut(), &mut rng);

        let zeros = image.iter().filter(|&&value| value == 0.0).count();
        assert!(zeros > 0);
        // at most an 8x8 patch per channel
        assert!(zeros <= 3 * 8 * 8);
        assert!(image.iter().all(|&value| value == 0.0 || value == 1.0));
    }

    #[test]
    fn flip_prob_one_reverses_columns() {
        let augmentor = AugmentorInit {
            horizontal_flip_prob: r64(1.0),
            rotation_factor: r64(0.0),
            cutout_height_factor: r64(0.0),
            cutout_width_factor: r64(0.0),
            cutout_fill: CutoutFill::Constant { value: 0.0 },
        }
        .build()
        .unwrap();

        let original = gradient_image(4, 6);
        let mut image = original.clone();
        let mut rng = StdRng::seed_from_u64(0);
        augmentor.forward(&mut image.view_mut(), &mut rng);

        for channel in 0..3 {
            for row in 0..4 {
                for col in 0..6 {
                    assert_eq!(
                        image[[channel, row, col]],
                        original[[channel, row, 5 - col]]
                    );
                }
            }
        }
    }
}
