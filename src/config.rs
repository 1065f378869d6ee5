//! Data pipeline configuration format.

use crate::common::*;

/// The top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub dataset: DatasetConfig,
    pub split: SplitConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let text = std::fs::read_to_string(path)?;
        let config = json5::from_str(&text)?;
        Ok(config)
    }
}

/// Dataset options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// The CSV label table, one row per sample.
    pub label_file: PathBuf,
    /// The directory image paths are resolved against.
    pub image_dir: PathBuf,
    /// The CSV column holding the relative image path.
    #[serde(default = "default_path_column")]
    pub path_column: String,
    /// The ordered list of target label columns.
    pub target_columns: Vec<String>,
}

/// Train/validation split options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    /// The fraction of each stratum sent to validation.
    #[serde(default = "default_val_fraction")]
    pub val_fraction: R64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            val_fraction: default_val_fraction(),
            seed: default_seed(),
        }
    }
}

/// Streaming pipeline options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// The output image edge in pixels.
    #[serde(default = "default_image_size")]
    pub image_size: NonZeroUsize,
    /// The batch size.
    #[serde(default = "default_batch_size")]
    pub batch_size: NonZeroUsize,
    /// The shuffle buffer holds batch_size times this many records.
    #[serde(default = "default_shuffle_multiplier")]
    pub shuffle_buffer_multiplier: NonZeroUsize,
    /// The number of prepared batches kept ahead of the consumer.
    #[serde(default = "default_prefetch_depth")]
    pub prefetch_depth: NonZeroUsize,
    /// The maximum number of waiting records per preprocessing stage.
    #[serde(default)]
    pub worker_buf_size: Option<usize>,
    /// The policy for the final short batch of an epoch.
    #[serde(default)]
    pub partial_batch: PartialBatchPolicy,
    /// The epoch aborts once this fraction of records fails to decode.
    #[serde(default = "default_max_decode_failure_rate")]
    pub max_decode_failure_rate: R64,
    #[serde(default)]
    pub augment: AugmentConfig,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            image_size: default_image_size(),
            batch_size: default_batch_size(),
            shuffle_buffer_multiplier: default_shuffle_multiplier(),
            prefetch_depth: default_prefetch_depth(),
            worker_buf_size: None,
            partial_batch: PartialBatchPolicy::default(),
            max_decode_failure_rate: default_max_decode_failure_rate(),
            augment: AugmentConfig::default(),
            seed: default_seed(),
        }
    }
}

/// The policy for a final batch shorter than the batch size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartialBatchPolicy {
    /// Emit the short batch.
    Keep,
    /// Discard the short batch.
    Drop,
}

impl Default for PartialBatchPolicy {
    fn default() -> Self {
        Self::Keep
    }
}

/// Augmentation options, applied in training mode only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AugmentConfig {
    /// The probability to flip each image horizontally.
    pub horizontal_flip_prob: R64,
    /// The rotation bound in turns of a full circle.
    pub rotation_factor: R64,
    /// The occluded patch height as a fraction of image height.
    pub cutout_height_factor: R64,
    /// The occluded patch width as a fraction of image width.
    pub cutout_width_factor: R64,
    #[serde(default)]
    pub cutout_fill: CutoutFill,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            horizontal_flip_prob: r64(0.5),
            rotation_factor: r64(0.2),
            cutout_height_factor: r64(0.2),
            cutout_width_factor: r64(0.2),
            cutout_fill: CutoutFill::default(),
        }
    }
}

/// The fill for occluded cutout patches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CutoutFill {
    /// Fill with one constant intensity.
    Constant { value: f32 },
    /// Fill with uniform noise in [0, 1].
    Noise,
}

impl Default for CutoutFill {
    fn default() -> Self {
        Self::Constant { value: 0.0 }
    }
}

fn default_path_column() -> String {
    "image_path".into()
}

fn default_val_fraction() -> R64 {
    r64(0.2)
}

fn default_image_size() -> NonZeroUsize {
    NonZeroUsize::new(512).unwrap()
}

fn default_batch_size() -> NonZeroUsize {
    NonZeroUsize::new(16).unwrap()
}

fn default_shuffle_multiplier() -> NonZeroUsize {
    NonZeroUsize::new(10).unwrap()
}

fn default_prefetch_depth() -> NonZeroUsize {
    NonZeroUsize::new(1).unwrap()
}

fn default_max_decode_failure_rate() -> R64 {
    r64(0.05)
}

fn default_seed() -> u64 {
    42
}
