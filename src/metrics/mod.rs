pub mod deriver;
pub mod earnings;
pub mod report;

pub use deriver::{derive, derive_at};
pub use earnings::fee_series;
pub use report::derive_report;
