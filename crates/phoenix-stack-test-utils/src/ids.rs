//! Test run identifiers

use chrono::Utc;

/// Generate a unique stack name for a test.
///
/// Format: `test-{timestamp_ms}-{counter}`, so tests that start in the same
/// millisecond still get distinct names.
///
/// # Example
///
/// ```
/// use phoenix_stack_test_utils::ids::test_stack_name;
///
/// let name = test_stack_name();
/// assert!(name.starts_with("test-"));
/// ```
pub fn test_stack_name() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let ts = Utc::now().timestamp_millis();
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("test-{ts}-{counter}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique() {
        let a = test_stack_name();
        let b = test_stack_name();
        assert_ne!(a, b);
    }
}
