use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::error::{AppError, Result};
use crate::types::{PoolRecord, PoolVariant, ResultRow};

/// Column names produced by the pool queries.
pub mod columns {
    pub const POOL_ADDRESS: &str = "pool_address";
    pub const NFT_CONTRACT: &str = "nft_contract_address";
    pub const NAME: &str = "name";
    pub const POOL_TYPE: &str = "pool_type";
    pub const BONDING_CURVE: &str = "bonding_curve";
    pub const FEES_EARNED_ETH: &str = "pool_fee_volume_eth";
    pub const ETH_BALANCE: &str = "eth_balance";
    pub const NFT_BALANCE: &str = "nft_balance";
    pub const ETH_VOLUME: &str = "eth_volume";
    pub const USD_VOLUME: &str = "usd_volume";
    pub const NFTS_TRADED: &str = "nfts_traded";
    pub const SPOT_PRICE: &str = "spot_price";
    pub const DELTA: &str = "delta";
    pub const INITIAL_ETH: &str = "initial_eth_balance";
    pub const INITIAL_NFTS: &str = "initial_nft_balance";
    pub const INITIAL_SPOT_PRICE: &str = "initial_spot_price";
    pub const CREATION_TIME: &str = "creation_block_time";
    pub const TRADING_CHANGE_ETH: &str = "eth_change_trading";
    pub const TRADING_CHANGE_NFTS: &str = "nft_change_trading";

    // pool earnings query
    pub const DAY: &str = "day";
    pub const DAILY_FEES: &str = "daily_fees";
}

/// `pool_type` of a pool that both buys and sells.
pub const TRADE_POOL_TYPE: &str = "trade";

/// Balance change not explained by trading (owner deposits and withdrawals),
/// split into its deposit and withdrawal parts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManualChange {
    pub net: f64,
    /// `max(net, 0)`
    pub positive: f64,
    /// `min(net, 0)`
    pub negative: f64,
}

impl ManualChange {
    pub fn new(balance: f64, initial: f64, trading_change: f64) -> Self {
        let net = balance - initial - trading_change;
        Self {
            net,
            positive: if net > 0.0 { net } else { 0.0 },
            negative: if net < 0.0 { net } else { 0.0 },
        }
    }
}

/// Which part of a manual change is folded into one side of the valuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualAdjustment {
    Ignore,
    Withdrawals,
    Deposits,
    Net,
}

impl ManualAdjustment {
    fn amount(self, change: &ManualChange) -> f64 {
        match self {
            ManualAdjustment::Ignore => 0.0,
            ManualAdjustment::Withdrawals => change.negative,
            ManualAdjustment::Deposits => change.positive,
            ManualAdjustment::Net => change.net,
        }
    }
}

/// `(current value adjustment, held value adjustment)` for each variant.
///
/// current = (eth - adj(eth)) + (nfts - adj(nfts)) * spot
/// held    = (initial_eth + adj(eth)) + (initial_nfts + adj(nfts)) * spot
pub fn adjustments(variant: PoolVariant) -> (ManualAdjustment, ManualAdjustment) {
    match variant {
        // withdrawn assets still count as ours, deposits are not performance
        PoolVariant::Asymmetric => (ManualAdjustment::Withdrawals, ManualAdjustment::Deposits),
        PoolVariant::Legacy => (ManualAdjustment::Ignore, ManualAdjustment::Net),
        PoolVariant::Nominal => (ManualAdjustment::Ignore, ManualAdjustment::Ignore),
    }
}

/// Derive a pool record, measuring age against the current time.
pub fn derive(row: &ResultRow, variant: PoolVariant) -> Result<PoolRecord> {
    derive_at(row, variant, Utc::now())
}

/// Derive a pool record with age measured against `now`. Pure: the same
/// inputs always give the same record.
pub fn derive_at(row: &ResultRow, variant: PoolVariant, now: DateTime<Utc>) -> Result<PoolRecord> {
    let pool_address = row.text(columns::POOL_ADDRESS);

    let spot_price = row.number(columns::SPOT_PRICE)?.ok_or_else(|| {
        AppError::MalformedRow(format!("pool {pool_address:?} has no spot_price"))
    })?;

    let eth_balance = row.number_or_zero(columns::ETH_BALANCE)?;
    let nft_balance = row.number_or_zero(columns::NFT_BALANCE)?;
    let initial_eth = row.number_or_zero(columns::INITIAL_ETH)?;
    let initial_nfts = row.number_or_zero(columns::INITIAL_NFTS)?;
    let trading_change_eth = row.number_or_zero(columns::TRADING_CHANGE_ETH)?;
    let trading_change_nfts = row.number_or_zero(columns::TRADING_CHANGE_NFTS)?;
    let fees_earned_eth = row.number_or_zero(columns::FEES_EARNED_ETH)?;

    let eth_change = ManualChange::new(eth_balance, initial_eth, trading_change_eth);
    let nft_change = ManualChange::new(nft_balance, initial_nfts, trading_change_nfts);

    let (current_adj, held_adj) = adjustments(variant);
    let current_inventory_value = (eth_balance - current_adj.amount(&eth_change))
        + (nft_balance - current_adj.amount(&nft_change)) * spot_price;
    let inventory_value_if_held = (initial_eth + held_adj.amount(&eth_change))
        + (initial_nfts + held_adj.amount(&nft_change)) * spot_price;

    let real_profit_loss = current_inventory_value - inventory_value_if_held;
    let impermanent_loss = real_profit_loss - fees_earned_eth;
    let nominal_profit = trading_change_eth + trading_change_nfts * spot_price;

    let created_on = date_part(&row.text(columns::CREATION_TIME));
    let age_secs = created_on.and_then(|d| age_secs(d, now));

    let pool_type = row.text(columns::POOL_TYPE);

    Ok(PoolRecord {
        pool_address,
        nft_contract: row.text(columns::NFT_CONTRACT),
        name: row.text(columns::NAME),
        trade_pool: pool_type.eq_ignore_ascii_case(TRADE_POOL_TYPE),
        pool_type,
        bonding_curve: row.text(columns::BONDING_CURVE),
        eth_balance,
        nft_balance,
        spot_price,
        delta: row.number_or_zero(columns::DELTA)?,
        fees_earned_eth,
        eth_volume: row.number_or_zero(columns::ETH_VOLUME)?,
        usd_volume: row.number_or_zero(columns::USD_VOLUME)?,
        nfts_traded: row.number_or_zero(columns::NFTS_TRADED)?,
        initial_eth,
        initial_nfts,
        initial_spot_price: row.number_or_zero(columns::INITIAL_SPOT_PRICE)?,
        trading_change_eth,
        trading_change_nfts,
        manual_change_eth: eth_change.net,
        manual_change_nfts: nft_change.net,
        positive_change_eth: eth_change.positive,
        positive_change_nfts: nft_change.positive,
        negative_change_eth: eth_change.negative,
        negative_change_nfts: nft_change.negative,
        current_inventory_value,
        inventory_value_if_held,
        real_profit_loss,
        impermanent_loss,
        nominal_profit,
        created_on,
        age_secs,
        variant,
    })
}

/// Date portion of a timestamp such as `2022-09-01 18:30:00.000 UTC`.
/// Time of day is dropped.
pub fn date_part(timestamp: &str) -> Option<NaiveDate> {
    let date = timestamp.trim().get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

fn age_secs(created_on: NaiveDate, now: DateTime<Utc>) -> Option<i64> {
    let midnight = Utc.from_utc_datetime(&created_on.and_hms_opt(0, 0, 0)?);
    Some((now - midnight).num_seconds())
}
