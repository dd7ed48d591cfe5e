//! Fee schedules and fee-aware exit pricing.
//!
//! Every exit decision in the engine prices fees through this module.

use crate::config::Settings;
use crate::market::instrument::{AssetClass, Instrument};
use crate::utils::decimal::{ceil_to_tick, from_basis_points};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Extra slippage allowance by risk level 0..=4, in bps.
pub const SLIP_BUFFER_BPS: [Decimal; 5] = [dec!(2), dec!(4), dec!(6), dec!(8), dec!(10)];

/// Tolerance for tick rounding when comparing against the fee floor.
const FLOOR_EPSILON: Decimal = dec!(0.000001);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeSchedule {
    pub class: AssetClass,
    /// Proportional fee on the buy leg
    pub buy_bps: Decimal,
    /// Proportional fee on the sell leg
    pub sell_bps: Decimal,
    /// Per-share fee on the sell leg (FINRA TAF)
    pub per_share_fee: Decimal,
    /// Cap on the per-share fee per trade
    pub fee_cap: Decimal,
    pub commission_usd: Decimal,
    pub tick: Decimal,
}

impl FeeSchedule {
    pub fn for_class(class: AssetClass) -> Self {
        match class {
            // Maker entry, taker exit.
            AssetClass::Crypto => Self {
                class,
                buy_bps: dec!(15),
                sell_bps: dec!(25),
                per_share_fee: Decimal::ZERO,
                fee_cap: Decimal::ZERO,
                commission_usd: Decimal::ZERO,
                tick: dec!(0.00001),
            },
            // SEC fee on sales plus capped TAF.
            AssetClass::Equity => Self {
                class,
                buy_bps: Decimal::ZERO,
                sell_bps: dec!(0.35),
                per_share_fee: dec!(0.000145),
                fee_cap: dec!(7.27),
                commission_usd: Decimal::ZERO,
                tick: dec!(0.01),
            },
        }
    }

    pub fn for_instrument(instrument: &Instrument) -> Self {
        Self::for_class(instrument.class)
    }

    /// Minimum round-trip edge in bps before profit is even considered.
    pub fn exit_floor_bps(&self) -> Decimal {
        match self.class {
            AssetClass::Equity => dec!(1.0),
            AssetClass::Crypto => self.buy_bps + self.sell_bps,
        }
    }

    /// Fixed (non-proportional) fees charged on a sale of `qty`.
    pub fn fixed_sell_fee(&self, qty: Decimal) -> Decimal {
        (self.per_share_fee * qty).min(self.fee_cap) + self.commission_usd
    }

    pub fn buy_fee(&self, price: Decimal, qty: Decimal) -> Decimal {
        price * qty * from_basis_points(self.buy_bps)
    }

    pub fn sell_fee(&self, price: Decimal, qty: Decimal) -> Decimal {
        price * qty * from_basis_points(self.sell_bps) + self.fixed_sell_fee(qty)
    }
}

/// Minimum acceptable profit, from settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfitFloor {
    pub min_usd: Decimal,
    pub min_bps: Decimal,
    pub usd_base: Decimal,
    /// Percent of notional
    pub pct: Decimal,
}

impl From<&Settings> for ProfitFloor {
    fn from(s: &Settings) -> Self {
        Self {
            min_usd: s.net_min_profit_usd,
            min_bps: s.net_min_profit_bps,
            usd_base: s.net_min_profit_usd_base,
            pct: s.net_min_profit_pct,
        }
    }
}

impl ProfitFloor {
    /// Required net profit in USD for the whole position.
    fn required_usd(&self, entry: Decimal, qty: Decimal) -> Decimal {
        self.min_usd
            .max(self.usd_base)
            .max(self.pct / dec!(100) * entry * qty)
    }
}

fn effective_qty(qty: Decimal) -> Decimal {
    if qty > Decimal::ZERO {
        qty
    } else {
        Decimal::ONE
    }
}

/// Lowest sale price that still nets the profit floor after both legs' fees,
/// rounded up to the instrument tick.
pub fn min_exit_price(entry: Decimal, qty: Decimal, fees: &FeeSchedule, floor: &ProfitFloor) -> Decimal {
    let qty = effective_qty(qty);
    let buy_fee_per_share = entry * from_basis_points(fees.buy_bps);
    let fixed_sell_per_share = fees.fixed_sell_fee(qty) / qty;

    let absolute_per_share = floor.min_usd.max(floor.usd_base) / qty;
    let pct_per_share = floor.pct / dec!(100) * entry;
    let bps_per_share = from_basis_points(floor.min_bps) * entry;
    let min_profit_per_share = absolute_per_share.max(pct_per_share).max(bps_per_share);

    let keep_fraction = Decimal::ONE - from_basis_points(fees.sell_bps);
    let raw = (entry + buy_fee_per_share + fixed_sell_per_share + min_profit_per_share) / keep_fraction;
    ceil_to_tick(raw, fees.tick)
}

/// Gross P&L minus fees on both legs.
pub fn projected_net_pnl(entry: Decimal, qty: Decimal, exit: Decimal, fees: &FeeSchedule) -> Decimal {
    (exit - entry) * qty - fees.buy_fee(entry, qty) - fees.sell_fee(exit, qty)
}

/// True iff selling at `sell_price` nets the USD floor and clears the fee floor.
pub fn meets_min_profit(
    entry: Decimal,
    qty: Decimal,
    sell_price: Decimal,
    fees: &FeeSchedule,
    floor: &ProfitFloor,
) -> bool {
    let net = projected_net_pnl(entry, qty, sell_price, fees);
    let fee_floor = min_exit_price(entry, qty, fees, floor);
    net >= floor.required_usd(entry, qty)
        && sell_price >= fee_floor * (Decimal::ONE - FLOOR_EPSILON)
}

/// True iff `price` clears the fee floor (within rounding tolerance).
pub fn clears_fee_floor(price: Decimal, fee_floor: Decimal) -> bool {
    price >= fee_floor * (Decimal::ONE - FLOOR_EPSILON)
}

/// Required take-profit distance in bps for a new entry.
pub fn required_profit_bps(
    fees: &FeeSchedule,
    risk_level: u8,
    slippage_ewma_bps: Option<Decimal>,
    min_profit_bps: Decimal,
) -> Decimal {
    let exit_floor = fees.exit_floor_bps();
    let buffer = SLIP_BUFFER_BPS[usize::from(risk_level.min(4))];
    let adaptive = slippage_ewma_bps.unwrap_or_default().max(Decimal::ZERO);

    exit_floor
        .max(exit_floor + dec!(0.5) + buffer)
        .max(exit_floor + dec!(0.5) + adaptive)
        .max(min_profit_bps)
}
