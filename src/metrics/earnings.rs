use tracing::warn;

use crate::metrics::deriver::{columns, date_part};
use crate::types::{FeeEarning, ResultRow, RowWarning};

/// Turn the daily fee rows of `pool_address` into a chart series, keeping
/// server order. Rows without a readable day are skipped.
pub fn fee_series(pool_address: &str, rows: &[ResultRow]) -> (Vec<FeeEarning>, Vec<RowWarning>) {
    let mut series = Vec::with_capacity(rows.len());
    let mut warnings = Vec::new();

    for (index, row) in rows.iter().enumerate() {
        let raw_day = row.text(columns::DAY);
        let parsed = date_part(&raw_day)
            .ok_or_else(|| format!("unreadable day {raw_day:?}"))
            .and_then(|day| {
                row.number_or_zero(columns::DAILY_FEES)
                    .map(|fees_eth| FeeEarning { day, fees_eth })
                    .map_err(|e| e.to_string())
            });

        match parsed {
            Ok(point) => series.push(point),
            Err(reason) => {
                warn!(index, pool_address, "Skipping fee row: {reason}");
                warnings.push(RowWarning {
                    index,
                    pool_address: pool_address.to_string(),
                    reason,
                });
            }
        }
    }

    (series, warnings)
}
