use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};

use crate::account_id::{self, AccountId, CurrencyId};
use crate::command::{TransferOrder, TransferType};

use super::rates::{CurrencyRateBook, FeeSchedule};

/// Currency ids with a log-uniform unit value each, so cross rates span
/// several orders of magnitude like real currency pairs do.
pub fn generate_currencies(count: usize, rng: &mut StdRng) -> Vec<(CurrencyId, f64)> {
    (1..=count)
        .map(|id| {
            let exponent = rng.gen_range(-2.0..2.0);
            (id as CurrencyId, 10f64.powf(exponent))
        })
        .collect()
}

/// Full cross-rate matrix derived from per-currency unit values:
/// `rate(a, b) = value(a) / value(b)`.
pub fn build_rate_book(currencies: &[(CurrencyId, f64)]) -> CurrencyRateBook {
    let mut book = CurrencyRateBook::new();
    for (i, &(from, value_from)) in currencies.iter().enumerate() {
        for &(to, value_to) in &currencies[i + 1..] {
            book.update_rate(from, to, value_from / value_to);
        }
    }
    book
}

/// Identifiers for `count` accounts spread over sequential clients, each
/// client holding a handful of accounts in random currencies.
pub fn generate_accounts(
    count: usize,
    currencies: &[(CurrencyId, f64)],
    max_per_client: usize,
    rng: &mut StdRng,
) -> Result<Vec<AccountId>> {
    let mut accounts = Vec::with_capacity(count);
    let mut client_id: u64 = 0;
    while accounts.len() < count {
        client_id += 1;
        let per_client = rng.gen_range(1..=max_per_client).min(count - accounts.len());
        for account_num in 0..per_client {
            let (currency, _) = currencies[rng.gen_range(0..currencies.len())];
            accounts.push(account_id::encode(client_id, currency, account_num as u16)?);
        }
    }
    Ok(accounts)
}

pub fn generate_secrets(accounts: &[AccountId], rng: &mut StdRng) -> FxHashMap<AccountId, u64> {
    accounts.iter().map(|&account| (account, rng.next_u64())).collect()
}

/// Integrity signature over the order fields, keyed by the source account's
/// secret. Verification belongs to the pipeline's authorization layer.
pub fn sign_transfer(
    source: AccountId,
    destination: AccountId,
    amount: i64,
    currency: CurrencyId,
    transfer_type: TransferType,
    secret: u64,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(source.to_le_bytes());
    hasher.update(destination.to_le_bytes());
    hasher.update(amount.to_le_bytes());
    hasher.update(currency.to_le_bytes());
    hasher.update([match transfer_type {
        TransferType::SourceExact => 0u8,
        TransferType::DestinationExact => 1u8,
    }]);
    hasher.update(secret.to_le_bytes());
    hasher.finalize().into()
}

/// One seeded batch of transfer orders between distinct random accounts.
///
/// The order currency follows the account-population distribution, and the
/// minimum amount covers the destination fee after conversion, so a
/// generated order is never rejected for being smaller than its own fee.
///
/// # Panics
///
/// If fewer than two accounts are provided.
pub fn generate_transfers(
    count: usize,
    accounts: &[AccountId],
    rate_book: &CurrencyRateBook,
    fees: &FeeSchedule,
    secrets: &FxHashMap<AccountId, u64>,
    seed: u64,
) -> Vec<TransferOrder> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut orders = Vec::with_capacity(count);

    for _ in 0..count {
        let idx_from = rng.gen_range(0..accounts.len());
        let idx_to_raw = rng.gen_range(0..accounts.len() - 1);
        let idx_to = if idx_to_raw < idx_from { idx_to_raw } else { idx_to_raw + 1 };

        let source = accounts[idx_from];
        let destination = accounts[idx_to];
        let dst_currency = account_id::currency_of(destination);

        // pick the order currency with the same distribution as accounts
        let currency = account_id::currency_of(accounts[rng.gen_range(0..accounts.len())]);

        let transfer_type = if rng.gen_bool(0.5) {
            TransferType::DestinationExact
        } else {
            TransferType::SourceExact
        };

        let x_rate = rate_book.get_rate(dst_currency, currency).unwrap_or(1.0);
        let min_amount = match transfer_type {
            TransferType::DestinationExact => x_rate as i64,
            // the fee comes off the destination side, so the order must
            // carry enough through the ORD->DST conversion to cover it
            TransferType::SourceExact => {
                let max_fee = fees.limits(dst_currency).map(|f| f.max_fee).unwrap_or(10);
                (max_fee as f64 * x_rate) as i64
            }
        };
        let amount = min_amount + rng.gen_range(1..=100_000);

        let secret = secrets.get(&source).copied().unwrap_or(0);
        let signature = sign_transfer(source, destination, amount, currency, transfer_type, secret);

        orders.push(TransferOrder {
            source,
            destination,
            amount,
            currency,
            transfer_type,
            signature,
        });
    }

    orders
}

/// The two ledger leg amounts a transfer order resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLegs {
    pub amount_src: i64,
    pub amount_dst: i64,
}

/// Converts `amount` between currencies. Rounding rule for the whole driver:
/// truncation toward zero after the `f64` multiplication.
pub fn convert_amount(
    amount: i64,
    from: CurrencyId,
    to: CurrencyId,
    rates: &CurrencyRateBook,
) -> Option<i64> {
    let rate = rates.get_rate(from, to)?;
    Some((amount as f64 * rate) as i64)
}

/// Resolves an order into its source and destination leg amounts, applying
/// the destination-side fee. `None` when a rate is missing or either leg
/// rounds down to nothing.
pub fn convert_order(
    order: &TransferOrder,
    rates: &CurrencyRateBook,
    fees: &FeeSchedule,
) -> Option<TransferLegs> {
    let src_currency = account_id::currency_of(order.source);
    let dst_currency = account_id::currency_of(order.destination);

    let legs = match order.transfer_type {
        TransferType::SourceExact => {
            let amount_src = convert_amount(order.amount, order.currency, src_currency, rates)?;
            let dst_gross = convert_amount(amount_src, src_currency, dst_currency, rates)?;
            let amount_dst = dst_gross - fees.fee_for(dst_currency, dst_gross);
            TransferLegs { amount_src, amount_dst }
        }
        TransferType::DestinationExact => {
            let amount_dst = convert_amount(order.amount, order.currency, dst_currency, rates)?;
            let dst_gross = amount_dst + fees.fee_for(dst_currency, amount_dst);
            let amount_src = convert_amount(dst_gross, dst_currency, src_currency, rates)?;
            TransferLegs { amount_src, amount_dst }
        }
    };

    (legs.amount_src > 0 && legs.amount_dst > 0).then_some(legs)
}

/// Funding each source account needs to carry every generated debit,
/// assuming nothing is received back.
pub fn required_funding<'a>(
    resolved: impl Iterator<Item = &'a (TransferOrder, TransferLegs)>,
) -> FxHashMap<AccountId, i64> {
    let mut funding = FxHashMap::default();
    for (order, legs) in resolved {
        *funding.entry(order.source).or_insert(0) += legs.amount_src;
    }
    funding
}
