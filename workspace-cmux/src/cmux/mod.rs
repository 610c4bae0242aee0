//! cmux runtime integration: mapping, open, reconcile, switch

pub mod cli_client;
pub mod client;
pub mod mapping;
pub mod open;
pub mod reconcile;
pub mod shell;
pub mod switch;

// Re-export key types
pub use cli_client::CmuxCli;
pub use client::{CancelToken, ClientFactory, RuntimeClient};
pub use mapping::{JsonMappingStore, MappingFile, MappingStore, RuntimeEntry};
pub use open::{OpenCoordinator, OpenOptions, OpenReport, OpenTarget};
pub use reconcile::ReconciliationEngine;
pub use switch::{Selector, SwitchRequest, SwitchService};
