//! Entry sizing against buying power, equity share and the absolute cap.

use crate::config::Settings;
use crate::error::{EngineError, EngineResult};
use crate::exchange::AccountSnapshot;
use crate::market::instrument::Instrument;
use crate::utils::decimal::truncate_dp;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct EntrySize {
    pub notional: Decimal,
    pub qty: Decimal,
}

/// Size an entry at `price`.
///
/// Notional is the smallest of buying power, `max_pos_pct_equity`% of equity
/// and the absolute cap. Quantity is truncated to the class precision, and to
/// whole shares for non-fractionable equities.
pub fn size_entry(
    settings: &Settings,
    account: &AccountSnapshot,
    instrument: &Instrument,
    price: Decimal,
    fractionable: bool,
) -> EngineResult<EntrySize> {
    let buying_power = account.buying_power;
    if buying_power <= Decimal::ZERO || price <= Decimal::ZERO {
        return Err(EngineError::InsufficientFunds {
            symbol: instrument.symbol.clone(),
            buying_power,
        });
    }

    let equity_share = account.equity * settings.max_pos_pct_equity / dec!(100);
    let notional = buying_power.min(equity_share).min(settings.abs_max_notional_usd);

    let mut qty = truncate_dp(notional / price, instrument.class.qty_decimals());
    if !instrument.is_crypto() && !fractionable {
        qty = qty.floor();
    }
    let sized = qty * price;

    debug!(
        symbol = %instrument.symbol,
        %buying_power,
        %equity_share,
        %notional,
        %qty,
        "Sized entry"
    );

    if qty <= Decimal::ZERO || sized < settings.min_order_notional_usd {
        if buying_power <= equity_share.min(settings.abs_max_notional_usd) {
            return Err(EngineError::InsufficientFunds {
                symbol: instrument.symbol.clone(),
                buying_power,
            });
        }
        return Err(EngineError::BelowMinimumNotional {
            symbol: instrument.symbol.clone(),
            notional: sized,
            minimum: settings.min_order_notional_usd,
        });
    }

    Ok(EntrySize { notional: sized, qty })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn account(equity: Decimal, buying_power: Decimal) -> AccountSnapshot {
        AccountSnapshot {
            equity,
            buying_power,
            daily_change_pct: None,
            pattern_day_trader: false,
            daytrade_count: 0,
            as_of: Utc::now(),
        }
    }

    #[test]
    fn test_smallest_limit_wins() {
        let settings = Settings {
            max_pos_pct_equity: dec!(10),
            abs_max_notional_usd: dec!(500),
            ..Settings::default()
        };
        // 10% of 3000 = 300 < cap 500 < bp 10000
        let size = size_entry(&settings, &account(dec!(3000), dec!(10000)), &Instrument::crypto("BTCUSD"), dec!(60000), true)
            .unwrap();
        assert_eq!(size.qty, dec!(0.005));
        assert_eq!(size.notional, dec!(300));
    }

    #[test]
    fn test_crypto_qty_truncates_to_six_decimals() {
        let settings = Settings {
            max_pos_pct_equity: dec!(100),
            abs_max_notional_usd: dec!(100),
            ..Settings::default()
        };
        let size = size_entry(&settings, &account(dec!(10000), dec!(10000)), &Instrument::crypto("ETHUSD"), dec!(3000), true)
            .unwrap();
        assert_eq!(size.qty, dec!(0.033333));
    }

    #[test]
    fn test_whole_shares_for_non_fractionable() {
        let settings = Settings {
            max_pos_pct_equity: dec!(100),
            abs_max_notional_usd: dec!(100),
            ..Settings::default()
        };
        let size = size_entry(&settings, &account(dec!(10000), dec!(10000)), &Instrument::equity("F"), dec!(12), false)
            .unwrap();
        assert_eq!(size.qty, dec!(8));
        assert_eq!(size.notional, dec!(96));
    }

    #[test]
    fn test_below_minimum_notional() {
        let settings = Settings {
            max_pos_pct_equity: dec!(0.1),
            min_order_notional_usd: dec!(5),
            ..Settings::default()
        };
        let err = size_entry(&settings, &account(dec!(1000), dec!(1000)), &Instrument::crypto("BTCUSD"), dec!(60000), true)
            .unwrap_err();
        assert!(matches!(err, EngineError::BelowMinimumNotional { .. }));
    }

    #[test]
    fn test_buying_power_binding_is_insufficient_funds() {
        let settings = Settings::default();
        let err = size_entry(&settings, &account(dec!(10000), dec!(2)), &Instrument::crypto("BTCUSD"), dec!(60000), true)
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));

        let broke = size_entry(&settings, &account(dec!(10000), dec!(0)), &Instrument::equity("AAPL"), dec!(200), true)
            .unwrap_err();
        assert_eq!(broke.kind(), "insufficient_funds");
    }
}
