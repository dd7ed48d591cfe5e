//! Operator-tunable engine settings.
//!
//! Every numeric field has a documented range. Values outside the range are
//! clamped whenever settings are loaded or replaced, never rejected.

use crate::utils::decimal::clamp;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Which check gates a taker exit on touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExitGuard {
    /// Bid must clear the fee floor.
    #[default]
    Fee,
    /// Projected net P&L must clear the configured minimum profit.
    Min,
}

/// Named bundles of settings, from most to least conservative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Preset {
    Safer,
    Neutral,
    Faster,
    Aggro,
    Max,
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "safer" => Ok(Preset::Safer),
            "neutral" => Ok(Preset::Neutral),
            "faster" => Ok(Preset::Faster),
            "aggro" => Ok(Preset::Aggro),
            "max" => Ok(Preset::Max),
            other => Err(format!("unknown preset '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    // Entry
    /// Slippage buffer bucket. Range 0..=4.
    #[serde(default = "default_risk_level")]
    pub risk_level: u8,
    /// Max quoted spread in bps. Range 3..=200.
    #[serde(default = "default_spread_max_bps")]
    pub spread_max_bps: Decimal,
    /// Reject entries failing the momentum rule.
    #[serde(default = "default_true")]
    pub enforce_momentum: bool,

    // Sizing
    /// Max position size as % of equity. Range 0.1..=100.
    #[serde(default = "default_max_pos_pct_equity")]
    pub max_pos_pct_equity: Decimal,
    /// Hard cap on notional per entry in USD. Range 1..=1,000,000.
    #[serde(default = "default_abs_max_notional_usd")]
    pub abs_max_notional_usd: Decimal,
    /// Venue minimum order notional in USD. Range 1..=1000.
    #[serde(default = "default_min_order_notional_usd")]
    pub min_order_notional_usd: Decimal,

    // Cadence
    /// Delay between scan ticks. Range 250..=60,000 ms.
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    /// Symbols per class per scan page. Range 1..=500.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Delay between risk maintenance ticks. Range 1000..=60,000 ms.
    #[serde(default = "default_maintenance_interval_ms")]
    pub maintenance_interval_ms: u64,

    // Execution
    /// Maker camping window. Range 1..=300 s.
    #[serde(default = "default_maker_camp_secs")]
    pub maker_camp_secs: u64,
    /// Fall back to a market buy when camping times out.
    #[serde(default = "default_true")]
    pub enable_taker_flip: bool,

    // Take profit
    /// Flip to a market sell when the bid touches the take-profit.
    #[serde(default = "default_true")]
    pub taker_exit_on_touch: bool,
    /// Consecutive touch ticks before flipping. Range 1..=20.
    #[serde(default = "default_touch_ticks_required")]
    pub touch_ticks_required: u32,
    /// Touch age that forces a flip. Range 2..=30 s.
    #[serde(default = "default_touch_flip_timeout_secs")]
    pub touch_flip_timeout_secs: u64,
    #[serde(default)]
    pub taker_exit_guard: ExitGuard,
    /// Minimum seconds between take-profit re-posts. Range 1..=600.
    #[serde(default = "default_tp_replace_interval_secs")]
    pub tp_replace_interval_secs: u64,
    /// Price drift (%) that forces a take-profit re-post. Range 0.01..=5.
    #[serde(default = "default_tp_replace_drift_pct")]
    pub tp_replace_drift_pct: Decimal,

    // Profit floor
    /// Absolute minimum net profit per trade in USD. Range 0..=100.
    #[serde(default = "default_net_min_profit_usd")]
    pub net_min_profit_usd: Decimal,
    /// Minimum net profit in bps of entry. Range 0..=500.
    #[serde(default = "default_net_min_profit_bps")]
    pub net_min_profit_bps: Decimal,
    /// Additional USD floor per trade. Range 0..=100.
    #[serde(default)]
    pub net_min_profit_usd_base: Decimal,
    /// Minimum net profit as % of notional. Range 0..=10.
    #[serde(default = "default_net_min_profit_pct")]
    pub net_min_profit_pct: Decimal,

    // Stops
    #[serde(default = "default_true")]
    pub enable_stops: bool,
    /// Soft stop distance. Range 1..=2000 bps.
    #[serde(default = "default_stop_loss_bps")]
    pub stop_loss_bps: Decimal,
    /// Hard stop distance. Range 0.1..=50 %.
    #[serde(default = "default_hard_stop_loss_pct")]
    pub hard_stop_loss_pct: Decimal,
    #[serde(default = "default_true")]
    pub enable_trailing: bool,
    /// Gain that arms the trailing stop. Range 1..=2000 bps.
    #[serde(default = "default_trail_start_bps")]
    pub trail_start_bps: Decimal,
    /// Trailing distance below peak. Range 1..=2000 bps.
    #[serde(default = "default_trailing_stop_bps")]
    pub trailing_stop_bps: Decimal,
    /// Max hold before a time exit. Range 1..=1440 min.
    #[serde(default = "default_max_hold_min")]
    pub max_hold_min: u64,
    /// Worst net P&L accepted on a time exit (negative). Range -1000..=0 USD.
    #[serde(default = "default_max_time_loss_usd")]
    pub max_time_loss_usd: Decimal,

    // Portfolio
    /// Base concurrency cap before spread adjustment. Range 1..=50.
    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: usize,
    #[serde(default = "default_true")]
    pub halt_on_daily_loss: bool,
    /// Range 0.1..=100 %.
    #[serde(default = "default_daily_max_loss_pct")]
    pub daily_max_loss_pct: Decimal,
    #[serde(default)]
    pub halt_on_daily_profit: bool,
    /// Range 0.1..=1000 %.
    #[serde(default = "default_daily_profit_target_pct")]
    pub daily_profit_target_pct: Decimal,
    #[serde(default = "default_true")]
    pub avoid_pdt: bool,
    /// Range 0..=1,000,000 USD.
    #[serde(default = "default_pdt_equity_threshold_usd")]
    pub pdt_equity_threshold_usd: Decimal,
    /// Day trades at which entries stop. Range 0..=10.
    #[serde(default = "default_pdt_max_day_trades")]
    pub pdt_max_day_trades: u32,
    /// Range 1..=240 min.
    #[serde(default = "default_dust_sweep_minutes")]
    pub dust_sweep_minutes: u64,
    /// Positions below this market value are dust. Range 0..=100 USD.
    #[serde(default = "default_dust_max_usd")]
    pub dust_max_usd: Decimal,

    // Live data policy
    /// Never act on a missing or stale quote.
    #[serde(default = "default_true")]
    pub live_require_quote: bool,
    /// Range 1000..=600,000 ms.
    #[serde(default = "default_live_fresh_ms_crypto")]
    pub live_fresh_ms_crypto: i64,
    /// Range 1000..=600,000 ms.
    #[serde(default = "default_live_fresh_ms_stock")]
    pub live_fresh_ms_stock: i64,
}

fn default_true() -> bool {
    true
}
fn default_risk_level() -> u8 {
    1
}
fn default_spread_max_bps() -> Decimal {
    dec!(100)
}
fn default_max_pos_pct_equity() -> Decimal {
    dec!(2)
}
fn default_abs_max_notional_usd() -> Decimal {
    dec!(100)
}
fn default_min_order_notional_usd() -> Decimal {
    dec!(5)
}
fn default_scan_interval_ms() -> u64 {
    1500
}
fn default_page_size() -> usize {
    50
}
fn default_maintenance_interval_ms() -> u64 {
    5000
}
fn default_maker_camp_secs() -> u64 {
    20
}
fn default_touch_ticks_required() -> u32 {
    1
}
fn default_touch_flip_timeout_secs() -> u64 {
    8
}
fn default_tp_replace_interval_secs() -> u64 {
    10
}
fn default_tp_replace_drift_pct() -> Decimal {
    dec!(0.1)
}
fn default_net_min_profit_usd() -> Decimal {
    dec!(0.01)
}
fn default_net_min_profit_bps() -> Decimal {
    dec!(5)
}
fn default_net_min_profit_pct() -> Decimal {
    dec!(0.05)
}
fn default_stop_loss_bps() -> Decimal {
    dec!(25)
}
fn default_hard_stop_loss_pct() -> Decimal {
    dec!(1.0)
}
fn default_trail_start_bps() -> Decimal {
    dec!(15)
}
fn default_trailing_stop_bps() -> Decimal {
    dec!(7)
}
fn default_max_hold_min() -> u64 {
    30
}
fn default_max_time_loss_usd() -> Decimal {
    dec!(-5)
}
fn default_max_concurrent_positions() -> usize {
    4
}
fn default_daily_max_loss_pct() -> Decimal {
    dec!(5)
}
fn default_daily_profit_target_pct() -> Decimal {
    dec!(8)
}
fn default_pdt_equity_threshold_usd() -> Decimal {
    dec!(25000)
}
fn default_pdt_max_day_trades() -> u32 {
    3
}
fn default_dust_sweep_minutes() -> u64 {
    12
}
fn default_dust_max_usd() -> Decimal {
    dec!(0.75)
}
fn default_live_fresh_ms_crypto() -> i64 {
    60_000
}
fn default_live_fresh_ms_stock() -> i64 {
    15_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            risk_level: default_risk_level(),
            spread_max_bps: default_spread_max_bps(),
            enforce_momentum: true,
            max_pos_pct_equity: default_max_pos_pct_equity(),
            abs_max_notional_usd: default_abs_max_notional_usd(),
            min_order_notional_usd: default_min_order_notional_usd(),
            scan_interval_ms: default_scan_interval_ms(),
            page_size: default_page_size(),
            maintenance_interval_ms: default_maintenance_interval_ms(),
            maker_camp_secs: default_maker_camp_secs(),
            enable_taker_flip: true,
            taker_exit_on_touch: true,
            touch_ticks_required: default_touch_ticks_required(),
            touch_flip_timeout_secs: default_touch_flip_timeout_secs(),
            taker_exit_guard: ExitGuard::Fee,
            tp_replace_interval_secs: default_tp_replace_interval_secs(),
            tp_replace_drift_pct: default_tp_replace_drift_pct(),
            net_min_profit_usd: default_net_min_profit_usd(),
            net_min_profit_bps: default_net_min_profit_bps(),
            net_min_profit_usd_base: Decimal::ZERO,
            net_min_profit_pct: default_net_min_profit_pct(),
            enable_stops: true,
            stop_loss_bps: default_stop_loss_bps(),
            hard_stop_loss_pct: default_hard_stop_loss_pct(),
            enable_trailing: true,
            trail_start_bps: default_trail_start_bps(),
            trailing_stop_bps: default_trailing_stop_bps(),
            max_hold_min: default_max_hold_min(),
            max_time_loss_usd: default_max_time_loss_usd(),
            max_concurrent_positions: default_max_concurrent_positions(),
            halt_on_daily_loss: true,
            daily_max_loss_pct: default_daily_max_loss_pct(),
            halt_on_daily_profit: false,
            daily_profit_target_pct: default_daily_profit_target_pct(),
            avoid_pdt: true,
            pdt_equity_threshold_usd: default_pdt_equity_threshold_usd(),
            pdt_max_day_trades: default_pdt_max_day_trades(),
            dust_sweep_minutes: default_dust_sweep_minutes(),
            dust_max_usd: default_dust_max_usd(),
            live_require_quote: true,
            live_fresh_ms_crypto: default_live_fresh_ms_crypto(),
            live_fresh_ms_stock: default_live_fresh_ms_stock(),
        }
    }
}

impl Settings {
    /// Copy with every numeric field forced into its documented range.
    pub fn clamped(mut self) -> Self {
        self.risk_level = self.risk_level.min(4);
        self.spread_max_bps = clamp(self.spread_max_bps, dec!(3), dec!(200));
        self.max_pos_pct_equity = clamp(self.max_pos_pct_equity, dec!(0.1), dec!(100));
        self.abs_max_notional_usd = clamp(self.abs_max_notional_usd, dec!(1), dec!(1000000));
        self.min_order_notional_usd = clamp(self.min_order_notional_usd, dec!(1), dec!(1000));
        self.scan_interval_ms = self.scan_interval_ms.clamp(250, 60_000);
        self.page_size = self.page_size.clamp(1, 500);
        self.maintenance_interval_ms = self.maintenance_interval_ms.clamp(1000, 60_000);
        self.maker_camp_secs = self.maker_camp_secs.clamp(1, 300);
        self.touch_ticks_required = self.touch_ticks_required.clamp(1, 20);
        self.touch_flip_timeout_secs = self.touch_flip_timeout_secs.clamp(2, 30);
        self.tp_replace_interval_secs = self.tp_replace_interval_secs.clamp(1, 600);
        self.tp_replace_drift_pct = clamp(self.tp_replace_drift_pct, dec!(0.01), dec!(5));
        self.net_min_profit_usd = clamp(self.net_min_profit_usd, Decimal::ZERO, dec!(100));
        self.net_min_profit_bps = clamp(self.net_min_profit_bps, Decimal::ZERO, dec!(500));
        self.net_min_profit_usd_base =
            clamp(self.net_min_profit_usd_base, Decimal::ZERO, dec!(100));
        self.net_min_profit_pct = clamp(self.net_min_profit_pct, Decimal::ZERO, dec!(10));
        self.stop_loss_bps = clamp(self.stop_loss_bps, dec!(1), dec!(2000));
        self.hard_stop_loss_pct = clamp(self.hard_stop_loss_pct, dec!(0.1), dec!(50));
        self.trail_start_bps = clamp(self.trail_start_bps, dec!(1), dec!(2000));
        self.trailing_stop_bps = clamp(self.trailing_stop_bps, dec!(1), dec!(2000));
        self.max_hold_min = self.max_hold_min.clamp(1, 1440);
        self.max_time_loss_usd = clamp(self.max_time_loss_usd, dec!(-1000), Decimal::ZERO);
        self.max_concurrent_positions = self.max_concurrent_positions.clamp(1, 50);
        self.daily_max_loss_pct = clamp(self.daily_max_loss_pct, dec!(0.1), dec!(100));
        self.daily_profit_target_pct = clamp(self.daily_profit_target_pct, dec!(0.1), dec!(1000));
        self.pdt_equity_threshold_usd =
            clamp(self.pdt_equity_threshold_usd, Decimal::ZERO, dec!(1000000));
        self.pdt_max_day_trades = self.pdt_max_day_trades.min(10);
        self.dust_sweep_minutes = self.dust_sweep_minutes.clamp(1, 240);
        self.dust_max_usd = clamp(self.dust_max_usd, Decimal::ZERO, dec!(100));
        self.live_fresh_ms_crypto = self.live_fresh_ms_crypto.clamp(1000, 600_000);
        self.live_fresh_ms_stock = self.live_fresh_ms_stock.clamp(1000, 600_000);
        self
    }

    /// Apply a named preset over these settings, then clamp.
    pub fn with_preset(mut self, preset: Preset) -> Self {
        // (risk, spread, pos%, notional, camp, guard, touch timeout, fresh ms,
        //  momentum, stop bps, hard %, trail start, trail bps, max pos, halt, loss %)
        let p = match preset {
            Preset::Safer => (3, dec!(50), dec!(10), dec!(100), 30, ExitGuard::Min, 10, 10_000, true, dec!(30), dec!(1.0), dec!(20), dec!(10), 6, true, dec!(3)),
            Preset::Neutral => (2, dec!(70), dec!(15), dec!(150), 25, ExitGuard::Fee, 9, 15_000, true, dec!(25), dec!(1.0), dec!(15), dec!(8), 8, true, dec!(4)),
            Preset::Faster => (1, dec!(100), dec!(20), dec!(200), 20, ExitGuard::Fee, 8, 15_000, true, dec!(25), dec!(1.0), dec!(15), dec!(7), 8, true, dec!(5)),
            Preset::Aggro => (0, dec!(120), dec!(25), dec!(300), 15, ExitGuard::Fee, 7, 15_000, false, dec!(25), dec!(1.5), dec!(12), dec!(6), 10, true, dec!(6)),
            Preset::Max => (0, dec!(150), dec!(30), dec!(500), 10, ExitGuard::Fee, 6, 15_000, false, dec!(20), dec!(2.0), dec!(10), dec!(5), 12, false, dec!(8)),
        };

        self.risk_level = p.0;
        self.spread_max_bps = p.1;
        self.max_pos_pct_equity = p.2;
        self.abs_max_notional_usd = p.3;
        self.maker_camp_secs = p.4;
        self.enable_taker_flip = true;
        self.taker_exit_on_touch = true;
        self.taker_exit_guard = p.5;
        self.touch_flip_timeout_secs = p.6;
        self.live_require_quote = true;
        self.live_fresh_ms_crypto = p.7;
        self.live_fresh_ms_stock = p.7;
        self.enforce_momentum = p.8;
        self.enable_stops = true;
        self.stop_loss_bps = p.9;
        self.hard_stop_loss_pct = p.10;
        self.enable_trailing = true;
        self.trail_start_bps = p.11;
        self.trailing_stop_bps = p.12;
        self.max_concurrent_positions = p.13;
        self.halt_on_daily_loss = p.14;
        self.daily_max_loss_pct = p.15;
        self.clamped()
    }
}

/// Shared read/replace handle. The only write path, and it always clamps.
#[derive(Clone, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<Settings>>,
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings.clamped())),
        }
    }

    pub async fn snapshot(&self) -> Settings {
        self.inner.read().await.clone()
    }

    /// Replace the record, returning the clamped value actually stored.
    pub async fn replace(&self, settings: Settings) -> Settings {
        let clamped = settings.clamped();
        *self.inner.write().await = clamped.clone();
        clamped
    }
}
