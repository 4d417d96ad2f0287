// tests/gate/main.rs

mod block_expiry_tests;
mod gate_tests;
mod admin_tests;

// Re-export common test utilities
pub use fixtures::test_clock::TestClock;
pub use helpers::assertions::*;
