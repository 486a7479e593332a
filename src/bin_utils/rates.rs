use rustc_hash::FxHashMap;

use crate::account_id::CurrencyId;

/// Exchange rates between currency pairs, kept mutually consistent: storing
/// `(a, b) -> r` also stores `(b, a) -> 1/r`.
///
/// Rates only validate synthetic transfer amounts; no money moves through
/// this table.
#[derive(Debug, Default)]
pub struct CurrencyRateBook {
    rates: FxHashMap<u32, f64>,
}

#[inline]
fn pair_key(from: CurrencyId, to: CurrencyId) -> u32 {
    ((from as u32) << 16) | to as u32
}

impl CurrencyRateBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_rate(&mut self, from: CurrencyId, to: CurrencyId, rate: f64) {
        self.rates.insert(pair_key(from, to), rate);
        self.rates.insert(pair_key(to, from), 1.0 / rate);
    }

    /// Multiplier converting an amount in `from` into `to`. Same-currency
    /// lookups are always 1.
    pub fn get_rate(&self, from: CurrencyId, to: CurrencyId) -> Option<f64> {
        if from == to {
            return Some(1.0);
        }
        self.rates.get(&pair_key(from, to)).copied()
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub fn for_each_rate(&self, mut f: impl FnMut(CurrencyId, CurrencyId, f64)) {
        for (key, rate) in &self.rates {
            f((key >> 16) as CurrencyId, *key as CurrencyId, *rate);
        }
    }
}

/// Per-currency fee bounds plus the single global fee-rate scalar shared
/// across all currencies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeConfig {
    pub min_fee: i64,
    pub max_fee: i64,
}

#[derive(Debug)]
pub struct FeeSchedule {
    fee_rate: f64,
    limits: FxHashMap<CurrencyId, FeeConfig>,
}

impl FeeSchedule {
    /// Fee bounds scale inversely with the currency's unit value, so the
    /// bounds cover a comparable value range in every currency.
    pub fn from_currency_rates(fee_rate: f64, currencies: &[(CurrencyId, f64)]) -> Self {
        let limits = currencies
            .iter()
            .map(|&(currency, rate)| {
                (
                    currency,
                    FeeConfig {
                        min_fee: 1 + (100.0 / rate) as i64,
                        max_fee: 10 + (1000.0 / rate) as i64,
                    },
                )
            })
            .collect();
        Self { fee_rate, limits }
    }

    pub fn fee_rate(&self) -> f64 {
        self.fee_rate
    }

    pub fn limits(&self, currency: CurrencyId) -> Option<FeeConfig> {
        self.limits.get(&currency).copied()
    }

    /// Proportional fee on `gross`, clamped into the currency's bounds.
    pub fn fee_for(&self, currency: CurrencyId, gross: i64) -> i64 {
        let raw = (gross as f64 * self.fee_rate) as i64;
        match self.limits(currency) {
            Some(FeeConfig { min_fee, max_fee }) => raw.clamp(min_fee, max_fee),
            None => raw,
        }
    }
}
