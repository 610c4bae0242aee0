// Error codes shared by every engine
pub mod errors;

// State paths and runtime invocation settings
pub mod config;

// Atomic JSON persistence used by both stores
pub mod persistence;

// Testable UTC clock
pub mod clock;

// Active/archived directory lookup for logical workspaces
pub mod workspace_paths;

// Runtime client port, mapping store, open/reconcile/switch engines
pub mod cmux;

// Session capture, restore and storage
pub mod sessions;

// Scripted fakes (only compiled for tests or with the test-support feature)
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use errors::{CmuxError, CmuxResult, ErrorCode};
