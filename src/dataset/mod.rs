//! Dataset records and tabular loading.

mod csv;
mod record;

pub use self::csv::*;
pub use record::*;

use crate::common::*;

/// The generic dataset trait.
pub trait GenericDataset
where
    Self: Debug + Sync + Send,
{
    /// The number of color channels of the dataset.
    fn input_channels(&self) -> usize;

    /// The ordered list of target category names.
    fn classes(&self) -> &IndexSet<String>;
}

/// The dataset with a list of labeled image paths.
pub trait FileDataset
where
    Self: GenericDataset,
{
    /// Get the list of records in the dataset.
    fn records(&self) -> &[Arc<FileRecord>];
}
