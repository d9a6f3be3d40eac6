use std::path::Path;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info};
use rayon::prelude::*;

use crate::dataset::DatasetId;
use crate::error::FilterEffError;
use crate::pipeline::{process_dataset, DatasetOutcome};
use crate::runner::JobRunner;

/// Runs every dataset on a dedicated pool of `workers` threads and hands each
/// outcome to `on_outcome` on the calling thread, in completion order.
///
/// Workers only run the unit of work and send its outcome; everything
/// `on_outcome` does (store updates, flushes) happens on the caller, which
/// stays the single writer.
pub fn dispatch<F>(
    datasets: &[DatasetId],
    workers: usize,
    runner: &dyn JobRunner,
    config_script: &Path,
    mut on_outcome: F,
) -> Result<(), FilterEffError>
where
    F: FnMut(DatasetOutcome),
{
    let workers = workers.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("filter-eff-worker-{}", i))
        .build()?;

    let channel_capacity = (workers * 2).max(16);
    let (outcome_sender, outcome_receiver): (Sender<DatasetOutcome>, Receiver<DatasetOutcome>) =
        bounded(channel_capacity);
    info!(
        "Dispatching {} datasets to {} workers (channel capacity {})",
        datasets.len(),
        workers,
        channel_capacity
    );

    thread::scope(|scope| {
        scope.spawn(move || {
            pool.install(|| {
                datasets
                    .par_iter()
                    .with_max_len(1)
                    .for_each_with(outcome_sender, |sender, dataset| {
                        debug!("Worker picked up {}", dataset);
                        let outcome = process_dataset(dataset, runner, config_script);
                        if let Err(e) = sender.send(outcome) {
                            error!("Failed to send outcome for {}: {}", dataset, e);
                        }
                    });
            });
        });

        // Ends once every worker-side sender clone has been dropped.
        for outcome in outcome_receiver {
            on_outcome(outcome);
        }
    });

    Ok(())
}
