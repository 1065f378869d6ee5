use crate::common::*;

/// The record with image path and label vector, but without image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub path: PathBuf,
    /// One entry per target category, non-negative.
    pub label: Vec<f32>,
}

impl FileRecord {
    /// The indices of active label indicators.
    pub fn active_labels(&self) -> Vec<usize> {
        self.label
            .iter()
            .enumerate()
            .filter_map(|(index, &value)| (value > 0.0).then(|| index))
            .collect()
    }
}
