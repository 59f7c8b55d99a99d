pub mod cancel;
pub mod client;
#[cfg(test)]
pub mod mock;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use client::QueryClient;
