//! Streaming batch pipeline for training and validation.

mod prefetch;
mod shuffle;

pub use prefetch::*;
pub use shuffle::*;

use crate::{
    common::*,
    config::{PartialBatchPolicy, PipelineConfig},
    dataset::FileRecord,
    error::DataError,
    processor::{Augmentor, AugmentorInit, ImageLoader, ImageLoaderInit},
};

/// The batch consumed by the training loop.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingBatch {
    /// Images in `[batch, channel, height, width]` layout, values in [0, 1].
    pub images: Array4<f32>,
    /// Labels in `[batch, category]` layout.
    pub labels: Array2<f32>,
    /// Source paths, parallel to the batch dimension.
    pub paths: Vec<PathBuf>,
}

impl TrainingBatch {
    pub fn batch_size(&self) -> usize {
        self.images.shape()[0]
    }
}

/// The pipeline mode. Augmentation runs in training mode only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// Asynchronous batch pipeline over labeled image files.
///
/// Each [`stream`](DataPipeline::stream) call produces one epoch that
/// visits every record exactly once, modulo decode skips and the
/// partial-batch policy. The pipeline's random source advances across
/// epochs and is never reset.
#[derive(Debug)]
pub struct DataPipeline {
    records: Arc<Vec<Arc<FileRecord>>>,
    config: PipelineConfig,
    loader: Arc<ImageLoader>,
    augmentor: Arc<Augmentor>,
    rng: Arc<Mutex<StdRng>>,
}

impl DataPipeline {
    /// Build a pipeline over parallel path and label lists.
    pub fn new(
        paths: Vec<PathBuf>,
        labels: Vec<Vec<f32>>,
        config: PipelineConfig,
    ) -> Result<Self> {
        if paths.len() != labels.len() {
            return Err(DataError::InvalidInput {
                message: format!(
                    "expect {} label vectors, but get {}",
                    paths.len(),
                    labels.len()
                ),
            }
            .into());
        }

        let records: Vec<_> = izip!(paths, labels)
            .map(|(path, label)| Arc::new(FileRecord { path, label }))
            .collect();
        Self::from_records(records, config)
    }

    /// Build a pipeline over prepared records.
    pub fn from_records(records: Vec<Arc<FileRecord>>, config: PipelineConfig) -> Result<Self> {
        let first = records.first().ok_or(DataError::EmptyDataset)?;

        {
            let num_classes = first.label.len();

            for record in &records {
                if record.label.len() != num_classes {
                    return Err(DataError::InvalidInput {
                        message: format!(
                            "label length {} of '{}' does not match the expected {}",
                            record.label.len(),
                            record.path.display(),
                            num_classes
                        ),
                    }
                    .into());
                }
                if record.label.iter().any(|&value| value < 0.0) {
                    return Err(DataError::InvalidInput {
                        message: format!(
                            "negative label entry found in '{}'",
                            record.path.display()
                        ),
                    }
                    .into());
                }
            }
        }

        let rate = config.max_decode_failure_rate.raw();
        ensure!(
            (0.0..=1.0).contains(&rate),
            "max_decode_failure_rate must be within [0, 1]"
        );

        let loader = ImageLoaderInit {
            image_size: config.image_size.get(),
            image_channels: 3,
        }
        .build()?;

        let augmentor = AugmentorInit {
            horizontal_flip_prob: config.augment.horizontal_flip_prob,
            rotation_factor: config.augment.rotation_factor,
            cutout_height_factor: config.augment.cutout_height_factor,
            cutout_width_factor: config.augment.cutout_width_factor,
            cutout_fill: config.augment.cutout_fill,
        }
        .build()?;

        let rng = StdRng::seed_from_u64(config.seed);

        Ok(Self {
            records: Arc::new(records),
            config,
            loader: Arc::new(loader),
            augmentor: Arc::new(augmentor),
            rng: Arc::new(Mutex::new(rng)),
        })
    }

    pub fn num_records(&self) -> usize {
        self.records.len()
    }

    /// The number of batches one epoch emits, assuming no decode skips.
    pub fn num_batches(&self) -> usize {
        let num_records = self.records.len();
        let batch_size = self.config.batch_size.get();
        match self.config.partial_batch {
            PartialBatchPolicy::Keep => (num_records + batch_size - 1) / batch_size,
            PartialBatchPolicy::Drop => num_records / batch_size,
        }
    }

    /// Build the batch stream for one epoch.
    pub fn stream(&self, mode: Mode) -> Result<BoxStream<'static, Result<TrainingBatch>>> {
        let PipelineConfig {
            batch_size,
            shuffle_buffer_multiplier,
            prefetch_depth,
            worker_buf_size,
            partial_batch,
            max_decode_failure_rate,
            ..
        } = self.config.clone();
        let batch_size = batch_size.get();
        let num_records = self.records.len();
        // the constructor guarantees a non-empty record set
        let num_classes = self.records[0].label.len();

        // parallel stage config, worker count defaults to available parallelism
        let par_config: par_stream::ParParams = {
            let buf_size: par_stream::BufSize = worker_buf_size
                .map(|buf_size| Some(buf_size).into())
                .unwrap_or(2.0.into());

            Some(par_stream::ParParamsConfig::Manual {
                num_workers: par_stream::NumWorkers::Default,
                buf_size,
            })
            .into()
        };

        // the random source advances monotonically across epochs
        let epoch_seed = self.rng.lock().unwrap().gen::<u64>();

        let tally = Arc::new(FailureTally::new(
            num_records,
            max_decode_failure_rate.raw(),
        ));

        // records in arrival order
        let records: Vec<_> = self.records.as_ref().clone();
        let stream = stream::iter(records.into_iter().enumerate());

        // load, decode, resize and normalize on the worker pool
        let stream = {
            let loader = self.loader.clone();
            let tally = tally.clone();

            stream
                .map(Fallible::Ok)
                .try_par_then_unordered(par_config.clone(), move |(index, record)| {
                    let loader = loader.clone();
                    let tally = tally.clone();

                    async move {
                        match loader.load(&record.path).await {
                            Ok(image) => Fallible::Ok((index, Some((record, image)))),
                            Err(err)
                                if matches!(
                                    err.downcast_ref::<DataError>(),
                                    Some(DataError::Decode { .. })
                                ) =>
                            {
                                warn!(
                                    "skipping record '{}': {:#}",
                                    record.path.display(),
                                    err
                                );
                                tally.add_failure()?;
                                Ok((index, None))
                            }
                            Err(err) => Err(err),
                        }
                    }
                })
        };

        // restore submission order, then drop skipped records
        let stream = stream
            .try_reorder_enumerated()
            .try_filter_map(|loaded| async move { Ok(loaded) });

        // windowed shuffle
        let stream = try_shuffle(
            stream,
            batch_size * shuffle_buffer_multiplier.get(),
            StdRng::seed_from_u64(epoch_seed),
        );

        // group into batches
        let stream = stream
            .chunks(batch_size)
            .enumerate()
            .map(|(index, results)| -> Fallible<_> {
                let chunk: Vec<_> = results.into_iter().try_collect()?;
                Ok((index, chunk))
            });

        // assemble and augment on the worker pool
        let stream = {
            let augmentor = (mode == Mode::Train).then(|| self.augmentor.clone());

            stream.try_par_map_unordered(par_config, move |(index, chunk)| {
                let augmentor = augmentor.clone();

                move || {
                    let mut batch = concat_batch(&chunk, num_classes)?;
                    if let Some(augmentor) = &augmentor {
                        let mut rng =
                            StdRng::seed_from_u64(epoch_seed.wrapping_add(index as u64 + 1));
                        augmentor.forward_batch(&mut batch.images, &mut rng);
                    }
                    Fallible::Ok((index, batch))
                }
            })
        };

        // restore the shuffle-determined batch order
        let stream = stream.try_reorder_enumerated();

        // partial batch policy
        let stream = stream.try_filter_map(move |batch: TrainingBatch| async move {
            let keep =
                batch.batch_size() == batch_size || partial_batch == PartialBatchPolicy::Keep;
            Ok(keep.then(|| batch))
        });

        // report skipped records once the epoch ends
        let stream = {
            let mut reported = false;
            let report = stream::poll_fn(move |_| {
                if !reported {
                    reported = true;
                    tally.report();
                }
                std::task::Poll::Ready(Option::<Fallible<TrainingBatch>>::None)
            });
            stream.chain(report)
        };

        // overlap preparation of the next batch with consumption
        let stream = prefetched(stream.boxed(), prefetch_depth.get());

        Ok(stream)
    }
}

fn concat_batch(
    chunk: &[(Arc<FileRecord>, Array3<f32>)],
    num_classes: usize,
) -> Result<TrainingBatch> {
    let views: Vec<_> = chunk.iter().map(|(_, image)| image.view()).collect();
    let images = ndarray::stack(Axis(0), &views)?;

    let labels = Array2::from_shape_vec(
        (chunk.len(), num_classes),
        chunk
            .iter()
            .flat_map(|(record, _)| record.label.iter().copied())
            .collect(),
    )?;

    let paths = chunk.iter().map(|(record, _)| record.path.clone()).collect();

    Ok(TrainingBatch {
        images,
        labels,
        paths,
    })
}

/// Counts per-record decode failures within one epoch.
#[derive(Debug)]
struct FailureTally {
    failed: AtomicUsize,
    num_records: usize,
    max_failures: usize,
}

impl FailureTally {
    fn new(num_records: usize, max_rate: f64) -> Self {
        Self {
            failed: AtomicUsize::new(0),
            num_records,
            max_failures: (num_records as f64 * max_rate).floor() as usize,
        }
    }

    fn add_failure(&self) -> Result<()> {
        let failed = self.failed.fetch_add(1, atomic::Ordering::SeqCst) + 1;
        ensure!(
            failed <= self.max_failures,
            "{} of {} records failed to decode, exceeding the limit of {}",
            failed,
            self.num_records,
            self.max_failures
        );
        Ok(())
    }

    fn report(&self) {
        let failed = self.failed.load(atomic::Ordering::SeqCst);
        if failed > 0 {
            info!(
                "epoch finished with {} of {} records skipped",
                failed, self.num_records
            );
        }
    }
}
