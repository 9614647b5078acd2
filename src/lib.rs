//! Bitcoin Observer Library
//!
//! This crate provides components for scanning Bitcoin blocks and the
//! mempool through a node's REST interface, filtering transactions with
//! composable criteria, and collecting matches in block order.

pub mod collector;
pub mod criteria;
pub mod extract;
pub mod filter;
pub mod rest;
pub mod scanner;
pub mod settings;
pub mod transaction;

// Re-export commonly used types
pub use collector::{ScanResult, SortKey, Target};
pub use criteria::Criterion;
pub use extract::Value;
pub use filter::{Filter, FilterSet};
pub use rest::{ChainClient, RestClient, RestConfig};
pub use scanner::{CancelFlag, ScanRequest, Scanner};
pub use settings::Settings;
pub use transaction::Transaction;
