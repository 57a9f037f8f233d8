//! Runtime invariant checks with contract-test support
//!
//! The synchronization primitives assert their invariants with
//! [`assert_invariant!`]. Debug builds record every invariant message that
//! was checked, so a test can drive an operation and then prove the
//! invariants it depends on were actually exercised.
//!
//! The log is process-wide rather than thread-local: most invariants here
//! are checked on the acquisition thread, not on the test thread.
//!
//! ```rust,ignore
//! use crabstream::invariant_ppt::contract_test;
//!
//! #[test]
//! fn contract_broadcast() {
//!     let channel = FrameBroadcastChannel::new();
//!     channel.publish(Bytes::from_static(b"a"));
//!     contract_test("broadcast", &["Publish sequence never wraps"]);
//! }
//! ```

use std::collections::HashSet;
use std::sync::Mutex;

lazy_static::lazy_static! {
    static ref INVARIANT_LOG: Mutex<HashSet<&'static str>> = Mutex::new(HashSet::new());
}

/// Assert an invariant and record it for contract testing.
///
/// # Panics
/// Panics if the condition is false.
#[macro_export]
macro_rules! assert_invariant {
    ($condition:expr, $message:expr) => {
        $crate::invariant_ppt::__assert_invariant_impl($condition, $message, None)
    };
    ($condition:expr, $message:expr, $context:expr) => {
        $crate::invariant_ppt::__assert_invariant_impl($condition, $message, Some($context))
    };
}

#[doc(hidden)]
pub fn __assert_invariant_impl(condition: bool, message: &'static str, context: Option<&str>) {
    #[cfg(debug_assertions)]
    crate::sync::lock(&INVARIANT_LOG).insert(message);

    if !condition {
        let ctx = context.unwrap_or("unknown");
        panic!("INVARIANT VIOLATION [{}]: {}", ctx, message);
    }
}

/// Check that specific invariants were verified at least once.
///
/// # Panics
/// Panics listing every required invariant that was never checked.
pub fn contract_test(test_name: &str, required_invariants: &[&str]) {
    let log = crate::sync::lock(&INVARIANT_LOG);

    let missing: Vec<&str> = required_invariants
        .iter()
        .copied()
        .filter(|invariant| !log.contains(invariant))
        .collect();

    if !missing.is_empty() {
        panic!(
            "CONTRACT FAILURE [{}]: The following invariants were not checked:\n  - {}",
            test_name,
            missing.join("\n  - ")
        );
    }
}

/// Whether an invariant message has been recorded (debug builds only).
pub fn was_checked(message: &str) -> bool {
    crate::sync::lock(&INVARIANT_LOG).contains(message)
}
