use std::num::NonZeroUsize;
use std::ops::Range;

/// A contiguous, half-open range of rows processed by one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub index: usize,
    pub range: Range<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Split `[0, total_rows)` into consecutive batches of `batch_size` rows.
/// Only the last batch may be shorter. No rows means no batches.
pub fn partition(
    total_rows: usize,
    batch_size: NonZeroUsize,
) -> impl ExactSizeIterator<Item = Batch> {
    let size = batch_size.get();
    let count = total_rows.div_ceil(size);

    (0..count).map(move |index| {
        let start = index * size;
        Batch {
            index,
            range: start..std::cmp::min(start + size, total_rows),
        }
    })
}
