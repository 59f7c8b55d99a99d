use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::metrics::deriver::{columns, derive_at};
use crate::types::{PoolRecord, PoolReport, PoolTotals, PoolVariant, ResultRow, RowWarning};

pub const EMPTY_RESULT_NOTICE: &str =
    "No pools found for this address. Check that it created or trades Sudoswap pools.";

/// Derive every row of a pool query. Malformed rows are left out of `pools`
/// and `totals` and reported in `warnings`; they never fail the batch.
pub fn derive_report(rows: &[ResultRow], variant: PoolVariant, now: DateTime<Utc>) -> PoolReport {
    let mut pools = Vec::with_capacity(rows.len());
    let mut warnings = Vec::new();

    for (index, row) in rows.iter().enumerate() {
        match derive_at(row, variant, now) {
            Ok(record) => pools.push(record),
            Err(e) => {
                let pool_address = row.text(columns::POOL_ADDRESS);
                warn!(index, pool_address = %pool_address, "Skipping pool row: {e}");
                warnings.push(RowWarning {
                    index,
                    pool_address,
                    reason: e.to_string(),
                });
            }
        }
    }

    let totals = totals(&pools);
    debug!(
        variant = %variant,
        pools = totals.pool_count,
        skipped = warnings.len(),
        "Derived pool report"
    );

    PoolReport {
        variant,
        pools,
        warnings,
        totals,
        notice: rows.is_empty().then(|| EMPTY_RESULT_NOTICE.to_string()),
    }
}

/// Sums over all pools, except profit/loss and impermanent loss which only
/// cover trade pools.
pub fn totals(pools: &[PoolRecord]) -> PoolTotals {
    pools.iter().fold(
        PoolTotals {
            pool_count: pools.len(),
            ..PoolTotals::default()
        },
        |mut acc, p| {
            acc.fees_earned_eth += p.fees_earned_eth;
            acc.eth_volume += p.eth_volume;
            if p.trade_pool {
                acc.trade_pool_count += 1;
                acc.real_profit_loss += p.real_profit_loss;
                acc.impermanent_loss += p.impermanent_loss;
            }
            acc
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::{json, Value};

    fn row(v: Value) -> ResultRow {
        match v {
            Value::Object(map) => ResultRow(map),
            _ => panic!("row fixture must be an object"),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn malformed_rows_are_skipped_with_warning() {
        let rows = vec![
            row(json!({
                "pool_address": "0xa", "pool_type": "trade", "spot_price": 1,
                "eth_balance": 2, "initial_eth_balance": 1,
                "pool_fee_volume_eth": 0.25, "eth_volume": 4
            })),
            row(json!({ "pool_address": "0xb", "eth_balance": 9 })),
            row(json!({
                "pool_address": "0xc", "pool_type": "trade", "spot_price": 2,
                "pool_fee_volume_eth": 0.5, "eth_volume": 6
            })),
        ];

        let report = derive_report(&rows, PoolVariant::Asymmetric, now());

        assert_eq!(report.pools.len(), 2);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].index, 1);
        assert_eq!(report.warnings[0].pool_address, "0xb");
        assert!(report.notice.is_none());

        assert_eq!(report.totals.pool_count, 2);
        assert_eq!(report.totals.trade_pool_count, 2);
        assert_eq!(report.totals.fees_earned_eth, 0.75);
        assert_eq!(report.totals.eth_volume, 10.0);
        // 0xa: 1 ETH deposited, so no P/L; 0xc: empty pool, no P/L
        assert_eq!(report.totals.real_profit_loss, 0.0);
        assert_eq!(report.totals.impermanent_loss, -0.75);
    }

    #[test]
    fn one_sided_pools_stay_out_of_profit_totals() {
        let rows = vec![
            // 2 ETH earned by trading, 0.5 of it fees
            row(json!({
                "pool_address": "0xtrade", "pool_type": "trade", "spot_price": 1,
                "eth_balance": 3, "initial_eth_balance": 1, "eth_change_trading": 2,
                "pool_fee_volume_eth": 0.5, "eth_volume": 8
            })),
            // sell-only pool, NFTs gone for 4 ETH
            row(json!({
                "pool_address": "0xtoken", "pool_type": "token", "spot_price": 2,
                "eth_balance": 4, "initial_nft_balance": 2, "nft_change_trading": -2,
                "eth_change_trading": 4, "pool_fee_volume_eth": 0.25, "eth_volume": 4
            })),
        ];

        let report = derive_report(&rows, PoolVariant::Asymmetric, now());

        assert!(report.pools[0].trade_pool);
        assert!(!report.pools[1].trade_pool);
        assert_eq!(report.totals.pool_count, 2);
        assert_eq!(report.totals.trade_pool_count, 1);
        assert_eq!(report.totals.fees_earned_eth, 0.75);
        assert_eq!(report.totals.eth_volume, 12.0);
        assert_eq!(report.totals.real_profit_loss, 2.0);
        assert_eq!(report.totals.impermanent_loss, 1.5);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["pools"][1]["trade_pool"], false);
        assert_eq!(json["totals"]["trade_pool_count"], 1);
    }

    #[test]
    fn empty_result_sets_notice() {
        let report = derive_report(&[], PoolVariant::Legacy, now());
        assert!(report.pools.is_empty());
        assert!(report.warnings.is_empty());
        assert_eq!(report.totals, PoolTotals::default());
        assert_eq!(report.notice.as_deref(), Some(EMPTY_RESULT_NOTICE));
        assert_eq!(report.variant, PoolVariant::Legacy);
    }

    #[test]
    fn all_rows_malformed_is_not_an_empty_result() {
        let rows = vec![row(json!({ "pool_address": "0xb" }))];
        let report = derive_report(&rows, PoolVariant::Asymmetric, now());
        assert!(report.pools.is_empty());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.notice.is_none());
    }
}
