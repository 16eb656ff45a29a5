//! Batch sizing for the dev agent's parse/index flow (spec §4.5): default
//! 100, clamped to a tiny 3-5 range under `cfg(debug_assertions)` so local
//! development sees incremental progress instead of one giant batch.

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const MIN_BATCH_SIZE: usize = 10;

/// Clamps a configured batch size to the debug-mode range when running a
/// debug build, otherwise returns it as-is (minimum 1).
pub fn effective_batch_size(configured: usize) -> usize {
    if cfg!(debug_assertions) {
        configured.clamp(3, 5)
    } else {
        configured.max(1)
    }
}

/// Splits `items` into batches of `batch_size`, proportionally shrinking
/// `batch_size` when `resources:adjusted` lowers the agent's effective
/// concurrency, never going below [`MIN_BATCH_SIZE`] (spec §4.5).
pub fn batches<T: Clone>(items: &[T], batch_size: usize) -> Vec<Vec<T>> {
    items.chunks(batch_size.max(1)).map(|c| c.to_vec()).collect()
}

/// Scales `default_batch_size` down by the same ratio the agent's
/// concurrency was reduced, clamped to `[MIN_BATCH_SIZE, default]`.
pub fn adjusted_batch_size(default_batch_size: usize, default_concurrency: usize, effective_concurrency: usize) -> usize {
    if default_concurrency == 0 {
        return default_batch_size.max(MIN_BATCH_SIZE);
    }
    let ratio = effective_concurrency as f64 / default_concurrency as f64;
    let scaled = (default_batch_size as f64 * ratio).round() as usize;
    scaled.clamp(MIN_BATCH_SIZE, default_batch_size.max(MIN_BATCH_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_split_evenly_with_remainder() {
        let items: Vec<u32> = (0..25).collect();
        let chunks = batches(&items, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].len(), 5);
    }

    #[test]
    fn adjusted_batch_size_never_drops_below_minimum() {
        let size = adjusted_batch_size(100, 10, 1);
        assert_eq!(size, MIN_BATCH_SIZE);
    }

    #[test]
    fn adjusted_batch_size_scales_proportionally() {
        let size = adjusted_batch_size(100, 10, 5);
        assert_eq!(size, 50);
    }
}
