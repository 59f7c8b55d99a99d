//! Run Dune queries about Sudoswap pools and derive profit/loss metrics from
//! the returned rows.

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod query;
pub mod types;
