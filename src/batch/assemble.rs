//! Result assembly: batch-indexed slots flattened into one ordered sequence.

use crate::error::ApiError;
use std::sync::OnceLock;

/// Per-call results table. Each batch owns exactly one slot.
///
/// Slots are write-once cells, so a recorded result can stay borrowed (by a
/// pending observer) while later batches fill their own slots.
#[derive(Debug)]
pub struct ResultSlots<T> {
    slots: Vec<OnceLock<Vec<T>>>,
}

impl<T> ResultSlots<T> {
    pub fn new(batch_count: usize) -> Self {
        Self {
            slots: (0..batch_count).map(|_| OnceLock::new()).collect(),
        }
    }

    /// Record the result of `batch_index`. A slot can only be filled once.
    pub fn fill(&self, batch_index: usize, result: Vec<T>) -> Result<&[T], ApiError> {
        let slot = self.slots.get(batch_index).ok_or_else(|| {
            ApiError::ConfigError(format!("No result slot for batch {}", batch_index))
        })?;
        slot.set(result).map_err(|_| {
            ApiError::ConfigError(format!(
                "Result slot for batch {} already filled",
                batch_index
            ))
        })?;
        Ok(slot.get().map_or(&[][..], Vec::as_slice))
    }

    pub fn filled(&self) -> usize {
        self.slots.iter().filter(|slot| slot.get().is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Concatenate slots in ascending batch index. Empty slots contribute nothing.
    pub fn flatten(self) -> Vec<T> {
        self.slots
            .into_iter()
            .filter_map(OnceLock::into_inner)
            .flatten()
            .collect()
    }
}
