//! Instrument identity and the tradable universe.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stablecoin pairs never worth trading against USD.
pub const STABLECOINS: &[&str] = &["USDTUSD", "USDCUSD"];

/// Symbols excluded regardless of signal.
pub const BLACKLIST: &[&str] = &["SHIBUSD"];

/// Fallback crypto universe when the asset listing is unavailable.
pub const CORE_CRYPTOS: &[&str] = &[
    "BTCUSD", "ETHUSD", "SOLUSD", "AVAXUSD", "LINKUSD", "DOGEUSD", "LTCUSD", "BCHUSD", "UNIUSD",
    "AAVEUSD", "DOTUSD", "XRPUSD", "XTZUSD", "SUSHIUSD", "YFIUSD", "BATUSD", "CRVUSD", "GRTUSD",
    "MKRUSD", "PEPEUSD", "TRUMPUSD",
];

/// Static equity universe: liquid large caps plus crypto-adjacent names.
pub const EQUITY_UNIVERSE: &[&str] = &[
    "AAPL", "MSFT", "NVDA", "AMZN", "GOOGL", "GOOG", "META", "TSLA", "AVGO", "BRK.B", "JPM", "LLY",
    "V", "UNH", "XOM", "MA", "JNJ", "PG", "HD", "COST", "ABBV", "MRK", "CVX", "PEP", "KO", "ADBE",
    "WMT", "CRM", "BAC", "NFLX", "TMO", "AMD", "ORCL", "ACN", "LIN", "MCD", "CSCO", "ABT", "DHR",
    "INTC", "TXN", "QCOM", "WFC", "DIS", "VZ", "PM", "NEE", "IBM", "CAT", "AMGN", "INTU", "UNP",
    "LOW", "SPGI", "GS", "HON", "RTX", "BA", "SBUX", "PLD", "MS", "BLK", "GE", "AMAT", "ISRG",
    "MDT", "DE", "ELV", "BKNG", "ADP", "LMT", "SYK", "GILD", "CVS", "TJX", "MMC", "C", "MDLZ",
    "ADI", "CB", "SCHW", "REGN", "T", "MO", "PGR", "ZTS", "SO", "DUK", "BSX", "CI", "EOG", "LRCX",
    "MU", "PANW", "SNPS", "CDNS", "UBER", "ABNB", "SHOP", "PYPL", "SPY", "QQQ", "IWM", "DIA",
    "COIN", "MSTR", "MARA", "RIOT", "CLSK", "HUT", "BITF", "CIFR", "WULF", "IREN", "BTBT", "HOOD",
    "SQ", "GLXY", "BITO", "IBIT", "FBTC", "ARKB", "GBTC", "ETHE",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Equity,
    Crypto,
}

impl AssetClass {
    /// Decimals allowed in order quantities.
    pub fn qty_decimals(self) -> u32 {
        match self {
            AssetClass::Equity => 4,
            AssetClass::Crypto => 6,
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetClass::Equity => write!(f, "equity"),
            AssetClass::Crypto => write!(f, "crypto"),
        }
    }
}

/// A tradable symbol. Canonical form has no slash (`BTCUSD`, `AAPL`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub class: AssetClass,
}

impl Instrument {
    /// Build from a canonical or venue-format symbol. Crypto pairs are
    /// recognized by a slash or a `USD` suffix on an otherwise alphabetic
    /// ticker longer than three letters.
    pub fn parse(raw: &str) -> Self {
        let upper = raw.trim().to_ascii_uppercase();
        if upper.contains('/') {
            return Self {
                symbol: upper.replace('/', ""),
                class: AssetClass::Crypto,
            };
        }
        let class = if upper.len() > 3
            && upper.ends_with("USD")
            && upper.chars().all(|c| c.is_ascii_alphabetic())
        {
            AssetClass::Crypto
        } else {
            AssetClass::Equity
        };
        Self {
            symbol: upper,
            class,
        }
    }

    pub fn crypto(symbol: &str) -> Self {
        Self {
            symbol: symbol.replace('/', "").to_ascii_uppercase(),
            class: AssetClass::Crypto,
        }
    }

    pub fn equity(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_ascii_uppercase(),
            class: AssetClass::Equity,
        }
    }

    pub fn is_crypto(&self) -> bool {
        self.class == AssetClass::Crypto
    }

    /// Symbol as the venue expects it (`BTC/USD` for crypto).
    pub fn venue_symbol(&self) -> String {
        match self.class {
            AssetClass::Crypto => to_venue_symbol(&self.symbol),
            AssetClass::Equity => self.symbol.clone(),
        }
    }

    pub fn is_stablecoin(&self) -> bool {
        STABLECOINS.contains(&self.symbol.as_str())
    }

    pub fn is_blacklisted(&self) -> bool {
        BLACKLIST.contains(&self.symbol.as_str())
    }

    /// Never entered, whatever the signal says.
    pub fn is_excluded(&self) -> bool {
        self.is_stablecoin() || self.is_blacklisted()
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol)
    }
}

/// `BTCUSD` -> `BTC/USD`. Already-slashed symbols pass through.
pub fn to_venue_symbol(symbol: &str) -> String {
    if symbol.contains('/') {
        return symbol.to_string();
    }
    match symbol.strip_suffix("USD") {
        Some(base) if !base.is_empty() => format!("{base}/USD"),
        _ => symbol.to_string(),
    }
}

/// `BTC/USD` -> `BTCUSD`.
pub fn to_canonical_symbol(symbol: &str) -> String {
    symbol.replace('/', "")
}

/// The instruments the scheduler pages through.
#[derive(Debug, Clone, Default)]
pub struct Universe {
    pub equities: Vec<Instrument>,
    pub crypto: Vec<Instrument>,
}

impl Universe {
    /// Static equities plus the given crypto symbols, minus exclusions.
    pub fn from_crypto_symbols<I, S>(crypto: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = std::collections::HashSet::new();
        let crypto = crypto
            .into_iter()
            .map(|s| Instrument::crypto(s.as_ref()))
            .filter(|i| !i.is_excluded())
            .filter(|i| seen.insert(i.symbol.clone()))
            .collect();

        Self {
            equities: EQUITY_UNIVERSE.iter().map(|s| Instrument::equity(s)).collect(),
            crypto,
        }
    }

    /// Universe built only from compiled-in lists.
    pub fn fallback() -> Self {
        Self::from_crypto_symbols(CORE_CRYPTOS.iter().copied())
    }

    pub fn len(&self) -> usize {
        self.equities.len() + self.crypto.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
