//! Batch partitioning: fixed-size, order-preserving groups over a borrowed slice.

use crate::error::ApiError;
use crate::types::{Batch, InputItem};

pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Split `items` into contiguous batches of at most `batch_size` items.
///
/// The last batch may be shorter; zero items yield zero batches. A batch size
/// of 0 is rejected before anything is split.
pub fn partition(items: &[InputItem], batch_size: usize) -> Result<Vec<Batch<'_>>, ApiError> {
    if batch_size == 0 {
        return Err(ApiError::ConfigError(
            "Batch size must be at least 1".to_string(),
        ));
    }
    Ok(items
        .chunks(batch_size)
        .enumerate()
        .map(|(index, items)| Batch { index, items })
        .collect())
}
