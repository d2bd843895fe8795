use crate::models::dataset::Dataset;

/// Find the next record that still needs a label.
///
/// Scans `[from, len)` then wraps to `[0, from)`, so a session started
/// mid-file still reaches every unlabeled row before reporting completion.
/// Returns `None` when every record is labeled (or the dataset is empty).
pub fn next_unlabeled(dataset: &Dataset, from: usize) -> Option<usize> {
    let len = dataset.len();
    let from = from.min(len);

    (from..len)
        .chain(0..from)
        .find(|&i| dataset.records()[i].label.is_none())
}
