use super::*;
use crate::{common::*, error::DataError};

/// The CSV-backed classification dataset.
///
/// One row per sample: a relative image path column plus one column per
/// target category. Duplicated rows are dropped.
#[derive(Debug, Clone)]
pub struct CsvDataset {
    pub classes: IndexSet<String>,
    pub records: Vec<Arc<FileRecord>>,
    pub input_channels: usize,
}

impl GenericDataset for CsvDataset {
    fn input_channels(&self) -> usize {
        self.input_channels
    }

    fn classes(&self) -> &IndexSet<String> {
        &self.classes
    }
}

impl FileDataset for CsvDataset {
    fn records(&self) -> &[Arc<FileRecord>] {
        &self.records
    }
}

impl CsvDataset {
    pub async fn load(
        label_file: impl AsRef<Path>,
        image_dir: impl AsRef<Path>,
        path_column: &str,
        target_columns: &[String],
    ) -> Result<Self> {
        let classes: IndexSet<String> = target_columns.iter().cloned().collect();
        ensure!(
            classes.len() == target_columns.len(),
            "duplicated target columns found"
        );
        ensure!(!classes.is_empty(), "no target columns given");

        let records = {
            let label_file = label_file.as_ref().to_owned();
            let image_dir = image_dir.as_ref().to_owned();
            let path_column = path_column.to_owned();
            let classes = classes.clone();

            tokio::task::spawn_blocking(move || {
                load_csv_records(&label_file, &image_dir, &path_column, &classes)
            })
            .await??
        };

        Ok(Self {
            classes,
            records,
            input_channels: 3,
        })
    }
}

fn load_csv_records(
    label_file: &Path,
    image_dir: &Path,
    path_column: &str,
    classes: &IndexSet<String>,
) -> Result<Vec<Arc<FileRecord>>> {
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(label_file)
        .with_context(|| format!("failed to open label file '{}'", label_file.display()))?;

    let headers = reader.headers()?.clone();
    let path_index = headers
        .iter()
        .position(|name| name == path_column)
        .ok_or_else(|| {
            format_err!(
                "column '{}' not found in '{}'",
                path_column,
                label_file.display()
            )
        })?;
    let label_indexes: Vec<usize> = classes
        .iter()
        .map(|class| {
            headers.iter().position(|name| name == class).ok_or_else(|| {
                format_err!(
                    "label column '{}' not found in '{}'",
                    class,
                    label_file.display()
                )
            })
        })
        .try_collect()?;

    let mut seen = HashSet::new();
    let mut records = vec![];

    for row in reader.records() {
        let row = row?;
        let path = image_dir.join(&row[path_index]);
        let label: Vec<f32> = label_indexes
            .iter()
            .map(|&index| -> Result<_> {
                let value: f32 = row[index].parse().with_context(|| {
                    format!(
                        "invalid label value '{}' in '{}'",
                        &row[index],
                        label_file.display()
                    )
                })?;
                ensure!(
                    value >= 0.0,
                    "negative label value {} in '{}'",
                    value,
                    label_file.display()
                );
                Ok(value)
            })
            .try_collect()?;

        // drop duplicated rows
        let key = (
            path.clone(),
            label.iter().map(|value| value.to_bits()).collect_vec(),
        );
        if !seen.insert(key) {
            continue;
        }

        ensure!(
            path.is_file(),
            "the image file '{}' does not exist",
            path.display()
        );
        records.push(Arc::new(FileRecord { path, label }));
    }

    if records.is_empty() {
        return Err(DataError::EmptyDataset.into());
    }

    Ok(records)
}
