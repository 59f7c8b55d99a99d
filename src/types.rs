use std::collections::BTreeMap;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};

// ---------------------------------------------------------------------------
// Query submission
// ---------------------------------------------------------------------------

/// A saved Dune query and the parameter values to run it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    query_id: u64,
    parameters: BTreeMap<String, String>,
}

impl QuerySpec {
    pub fn new(query_id: u64) -> Self {
        Self {
            query_id,
            parameters: BTreeMap::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn query_id(&self) -> u64 {
        self.query_id
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }
}

/// Execution ID handed out by the execute endpoint. Consumed by
/// `QueryClient::fetch_results`, so a handle is never reused after its rows
/// have been read.
#[derive(Debug, PartialEq, Eq)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(execution_id: impl Into<String>) -> Self {
        Self(execution_id.into())
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Execution status
// ---------------------------------------------------------------------------

pub mod states {
    pub const PENDING: &str = "QUERY_STATE_PENDING";
    pub const EXECUTING: &str = "QUERY_STATE_EXECUTING";
    pub const COMPLETED: &str = "QUERY_STATE_COMPLETED";
    pub const FAILED: &str = "QUERY_STATE_FAILED";
    pub const CANCELLED: &str = "QUERY_STATE_CANCELLED";
    pub const EXPIRED: &str = "QUERY_STATE_EXPIRED";
    pub const COMPLETED_PARTIAL: &str = "QUERY_STATE_COMPLETED_PARTIAL";

    /// States after which the execution will never reach COMPLETED.
    pub const TERMINAL_FAILURES: &[&str] = &[FAILED, CANCELLED, EXPIRED, COMPLETED_PARTIAL];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Still queued or executing. Also used for any state string we do not
    /// recognize.
    Pending { state: String },
    /// The API answered 429. `retry_after` comes from the Retry-After header.
    Throttled { retry_after: Option<Duration> },
    Completed,
    Failed { state: String },
}

impl JobStatus {
    pub fn from_state(state: &str) -> Self {
        let state = state.trim();
        if state == states::COMPLETED {
            JobStatus::Completed
        } else if states::TERMINAL_FAILURES.contains(&state) {
            JobStatus::Failed {
                state: state.to_string(),
            }
        } else {
            JobStatus::Pending {
                state: state.to_string(),
            }
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending { state } if state.is_empty() => write!(f, "pending"),
            JobStatus::Pending { state } => write!(f, "pending ({state})"),
            JobStatus::Throttled { .. } => write!(f, "throttled"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed { state } => write!(f, "failed ({state})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Result rows
// ---------------------------------------------------------------------------

/// One row of a query result: column name to JSON scalar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultRow(pub serde_json::Map<String, Value>);

impl ResultRow {
    /// Column value, with JSON null treated as absent.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column).filter(|v| !v.is_null())
    }

    /// Numeric column. Absent, null and blank values are `None`; numbers
    /// encoded as strings are accepted. NaN and infinities are malformed.
    pub fn number(&self, column: &str) -> Result<Option<f64>> {
        let Some(raw) = self.get(column) else {
            return Ok(None);
        };
        let parsed = match raw {
            Value::String(s) if s.trim().is_empty() => return Ok(None),
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        match parsed {
            Some(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(AppError::MalformedRow(format!(
                "column {column} is not a finite number: {raw}"
            ))),
        }
    }

    pub fn number_or_zero(&self, column: &str) -> Result<f64> {
        Ok(self.number(column)?.unwrap_or(0.0))
    }

    /// Categorical column as text. Absent values are empty.
    pub fn text(&self, column: &str) -> String {
        match self.get(column) {
            None => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pool metrics
// ---------------------------------------------------------------------------

/// Which formula set to use for inventory valuation. All variants share one
/// formula and differ only in how manual deposits/withdrawals are attributed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolVariant {
    /// Withdrawals count toward current value, deposits toward the held
    /// baseline.
    #[default]
    Asymmetric,
    /// Full manual change added to the held baseline, nothing added back to
    /// current value.
    Legacy,
    /// Manual changes ignored on both sides.
    Nominal,
}

impl std::str::FromStr for PoolVariant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "asymmetric" => Ok(PoolVariant::Asymmetric),
            "legacy" => Ok(PoolVariant::Legacy),
            "nominal" => Ok(PoolVariant::Nominal),
            other => Err(format!("unknown metrics variant: {other}")),
        }
    }
}

impl std::fmt::Display for PoolVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PoolVariant::Asymmetric => "asymmetric",
            PoolVariant::Legacy => "legacy",
            PoolVariant::Nominal => "nominal",
        };
        write!(f, "{s}")
    }
}

/// A pool row plus every field derived from it. ETH-denominated values are
/// in ETH, NFT counts are plain counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolRecord {
    pub pool_address: String,
    pub nft_contract: String,
    pub name: String,
    pub pool_type: String,
    pub bonding_curve: String,
    /// Two-sided pool. Profit/loss and impermanent loss only mean something
    /// for these; buy-only and sell-only pools are left out of those totals.
    pub trade_pool: bool,

    pub eth_balance: f64,
    pub nft_balance: f64,
    pub spot_price: f64,
    pub delta: f64,
    pub fees_earned_eth: f64,
    pub eth_volume: f64,
    pub usd_volume: f64,
    pub nfts_traded: f64,

    pub initial_eth: f64,
    pub initial_nfts: f64,
    pub initial_spot_price: f64,
    pub trading_change_eth: f64,
    pub trading_change_nfts: f64,

    pub manual_change_eth: f64,
    pub manual_change_nfts: f64,
    pub positive_change_eth: f64,
    pub positive_change_nfts: f64,
    pub negative_change_eth: f64,
    pub negative_change_nfts: f64,

    pub current_inventory_value: f64,
    pub inventory_value_if_held: f64,
    pub real_profit_loss: f64,
    pub impermanent_loss: f64,
    /// Value gained purely through trading, at the current spot price.
    pub nominal_profit: f64,

    pub created_on: Option<NaiveDate>,
    /// Seconds between midnight of `created_on` and the derivation time.
    pub age_secs: Option<i64>,
    pub variant: PoolVariant,
}


/// One day of LP fee earnings for a pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeeEarning {
    pub day: NaiveDate,
    pub fees_eth: f64,
}

/// A row that could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowWarning {
    /// Position of the row in the server response.
    pub index: usize,
    pub pool_address: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolTotals {
    pub pool_count: usize,
    pub fees_earned_eth: f64,
    pub eth_volume: f64,
    /// Pools counted in the two profit figures below.
    pub trade_pool_count: usize,
    pub real_profit_loss: f64,
    pub impermanent_loss: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolReport {
    pub variant: PoolVariant,
    pub pools: Vec<PoolRecord>,
    pub warnings: Vec<RowWarning>,
    pub totals: PoolTotals,
    /// Set when the query returned no rows at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}
