use crate::models::patch::{PatchOperation, Savings};
use crate::models::task::Task;

/// Compare the serialized size of the full snapshot to its patch list
///
/// A lower-bound proxy for the bandwidth saved by sending patches. Empty
/// input yields zero savings; a patch list larger than the snapshot is
/// reported as 0% saved.
pub fn estimate_savings(current: &[Task], patches: &[PatchOperation]) -> Savings {
    let full_size = serialized_len(current);
    let patch_size = serialized_len(patches);

    if full_size == 0 {
        return Savings {
            full_size,
            patch_size,
            saved_percent: 0.0,
        };
    }

    let saved = full_size.saturating_sub(patch_size) as f64;
    let saved_percent = (saved / full_size as f64 * 10_000.0).round() / 100.0;

    Savings {
        full_size,
        patch_size,
        saved_percent,
    }
}

/// JSON byte length, 0 for an empty collection
fn serialized_len<T: serde::Serialize>(items: &[T]) -> usize {
    if items.is_empty() {
        return 0;
    }
    serde_json::to_vec(items).map(|v| v.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::differ::patch::diff;
    use crate::models::task::TaskStatus;

    fn tasks(n: usize) -> Vec<Task> {
        (0..n)
            .map(|i| {
                Task::new(format!("hash{}", i), format!("Linux ISO {}", i), TaskStatus::Seeding)
                    .with_progress(100.0)
            })
            .collect()
    }

    #[test]
    fn test_empty_inputs() {
        let savings = estimate_savings(&[], &[]);
        assert_eq!(savings, Savings::default());
        assert_eq!(savings.saved_percent, 0.0);
    }

    #[test]
    fn test_no_patches_saves_everything() {
        let current = tasks(3);
        let savings = estimate_savings(&current, &[]);
        assert!(savings.full_size > 0);
        assert_eq!(savings.patch_size, 0);
        assert_eq!(savings.saved_percent, 100.0);
    }

    #[test]
    fn test_small_patch_large_snapshot() {
        let previous = tasks(50);
        let mut current = previous.clone();
        current[7].upload_speed = 1_024;

        let result = diff(&previous, &current, 0);
        let savings = estimate_savings(&current, &result.patches);

        assert!(savings.patch_size > 0);
        assert!(savings.patch_size < savings.full_size);
        assert!(savings.saved_percent > 90.0 && savings.saved_percent < 100.0);
    }

    #[test]
    fn test_patches_larger_than_snapshot_saturate() {
        let previous = Vec::new();
        let current = tasks(1);
        let result = diff(&previous, &current, 0);

        let savings = estimate_savings(&current, &result.patches);
        assert!(savings.patch_size > savings.full_size);
        assert_eq!(savings.saved_percent, 0.0);
    }
}
