use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::debug;

use crate::account_id::AccountId;

/// Recoverable business rejection. The ledger state is fully rolled back to
/// its pre-call value before any of these is returned.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The result of an atomic debit crossed into the non-negative range:
    /// either the account does not exist or its funds are insufficient. The
    /// two cases are indistinguishable from the encoded value by design.
    #[error("insufficient funds or unknown account")]
    InsufficientFundsOrUnknownAccount,
    #[error("unknown account")]
    UnknownAccount,
    #[error("unknown destination account")]
    UnknownDestinationAccount,
}

/// Broken pre- or post-condition: arithmetic wrapped past the valid encoded
/// range, or a prior bug already corrupted the entry. Must halt the
/// processing unit that observes it, never be reported as a business result.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unsafe {op}: account={account} amount={amount} encoded={encoded}")]
pub struct InvariantViolation {
    pub op: &'static str,
    pub account: AccountId,
    pub amount: i64,
    pub encoded: i64,
}

/// Per-account balances and open-time secrets.
///
/// A balance is stored encoded as `-1 - balance`, so that the map's natural
/// missing value `0` doubles as "account not opened" and every
/// existence/sufficiency question is answerable from the sign of a single
/// add-to-value result:
///
/// * raw `0` — no entry,
/// * raw `-1` — open account, zero balance,
/// * raw `< -1` — positive balance,
/// * raw `>= 0` on an existing account — overflow or corruption.
///
/// Single-writer: the surrounding pipeline serializes access, `&mut self`
/// enforces the discipline at compile time. Amounts are expected to be
/// pre-validated against [`crate::command::MAX_AMOUNT`]; within that bound a
/// single add can never wrap.
#[derive(Debug, Default)]
pub struct AccountsLedger {
    balances: FxHashMap<AccountId, i64>,
    secrets: FxHashMap<AccountId, u64>,
}

impl AccountsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// The one underlying primitive: add a signed delta to the stored value,
    /// treating an absent key as 0, and return the result.
    #[inline]
    fn add_to_value(&mut self, account: AccountId, delta: i64) -> i64 {
        let slot = self.balances.entry(account).or_insert(0);
        *slot = slot.wrapping_add(delta);
        *slot
    }

    /// Opens `account` with a zero balance and records its secret,
    /// overwriting any prior entry. Callers must not reuse identifiers that
    /// are still open.
    pub fn open_account(&mut self, account: AccountId, secret: u64) {
        self.balances.insert(account, -1);
        self.secrets.insert(account, secret);
    }

    /// Credits `amount` (> 0) to `account`. Returns the new balance.
    ///
    /// A credit alone can only produce an invalid encoded value through
    /// arithmetic overflow, so that case is fatal rather than a rejection.
    pub fn deposit(
        &mut self,
        account: AccountId,
        amount: i64,
    ) -> Result<Result<i64, Rejection>, InvariantViolation> {
        let encoded = self.add_to_value(account, amount.wrapping_neg());

        if encoded >= 0 {
            return Err(InvariantViolation {
                op: "deposit",
                account,
                amount,
                encoded,
            });
        }

        // previous value was the missing sentinel: the account did not exist
        if encoded == -amount {
            debug!(account, amount, "deposit rejected: unknown account");
            self.balances.remove(&account);
            return Ok(Err(Rejection::UnknownAccount));
        }

        Ok(Ok(-1 - encoded))
    }

    /// Debits `amount` (> 0) from `account`. Returns the new balance.
    ///
    /// A result that crossed into the non-negative range means the account
    /// was missing or underfunded; the debit is reverted and the caller gets
    /// a rejection. No fatal path exists: adding a bounded positive amount
    /// to a valid encoded value cannot wrap.
    pub fn withdrawal(&mut self, account: AccountId, amount: i64) -> Result<i64, Rejection> {
        let encoded = self.add_to_value(account, amount);

        // must stay negative (-1 = zero balance)
        if encoded >= 0 {
            debug!(account, amount, encoded, "withdrawal rejected");
            self.add_to_value(account, amount.wrapping_neg());
            return Err(Rejection::InsufficientFundsOrUnknownAccount);
        }

        Ok(-1 - encoded)
    }

    /// Administrative adjustment, deposit-shaped delta, either sign.
    ///
    /// No unknown-account branch: callers are trusted to invoke this only on
    /// accounts known to exist and within overflow-safe ranges, and the
    /// post-condition is asserted fatally instead.
    pub fn balance_correction(
        &mut self,
        account: AccountId,
        amount: i64,
    ) -> Result<i64, InvariantViolation> {
        let encoded = self.add_to_value(account, amount.wrapping_neg());

        if encoded >= 0 {
            return Err(InvariantViolation {
                op: "balance_correction",
                account,
                amount,
                encoded,
            });
        }

        Ok(-1 - encoded)
    }

    /// Debits `amount_src` from `src` and credits `amount_dst` to `dst`,
    /// where the two amounts may differ by an exchange rate applied
    /// upstream. Returns both new balances.
    ///
    /// Under no recoverable path is money debited without being credited or
    /// vice versa: an NSF source aborts before touching `dst`, and a
    /// missing destination rolls both legs back exactly. The only exception
    /// is the fatal destination-overflow path, where the source debit has
    /// already committed and no safe automatic remedy exists at this layer.
    pub fn transfer_locally(
        &mut self,
        src: AccountId,
        dst: AccountId,
        amount_src: i64,
        amount_dst: i64,
    ) -> Result<Result<(i64, i64), Rejection>, InvariantViolation> {
        let encoded_src = self.add_to_value(src, amount_src);

        if encoded_src >= 0 {
            debug!(
                account = src,
                amount = amount_src,
                encoded = encoded_src,
                "transfer debit rejected"
            );
            self.add_to_value(src, amount_src.wrapping_neg());
            return Ok(Err(Rejection::InsufficientFundsOrUnknownAccount));
        }

        let encoded_dst = self.add_to_value(dst, amount_dst.wrapping_neg());

        if encoded_dst >= 0 {
            return Err(InvariantViolation {
                op: "transfer_locally",
                account: dst,
                amount: amount_dst,
                encoded: encoded_dst,
            });
        }

        if encoded_dst == -amount_dst {
            debug!(account = dst, "transfer credit rejected: unknown destination");
            self.balances.remove(&dst);
            self.add_to_value(src, amount_src.wrapping_neg());
            return Ok(Err(Rejection::UnknownDestinationAccount));
        }

        Ok(Ok((-1 - encoded_src, -1 - encoded_dst)))
    }

    /// Equal-currency convenience transfer composing [`Self::withdrawal`]
    /// and [`Self::deposit`] with no rollback handling beyond what each
    /// primitive already provides: a deposit leg that fails on an unknown
    /// destination leaves the source debited.
    #[deprecated(note = "use transfer_locally, which rolls back both legs")]
    pub fn transfer(
        &mut self,
        from: AccountId,
        to: AccountId,
        amount: i64,
    ) -> Result<Result<(i64, i64), Rejection>, InvariantViolation> {
        let new_from = match self.withdrawal(from, amount) {
            Ok(balance) => balance,
            Err(rejection) => return Ok(Err(rejection)),
        };
        match self.deposit(to, amount)? {
            Ok(new_to) => Ok(Ok((new_from, new_to))),
            Err(rejection) => Ok(Err(rejection)),
        }
    }

    /// Decoded balance, or [`Rejection::UnknownAccount`] if no entry exists.
    pub fn get_balance(&self, account: AccountId) -> Result<i64, Rejection> {
        match self.balances.get(&account) {
            None | Some(0) => Err(Rejection::UnknownAccount),
            Some(encoded) => Ok(-1 - encoded),
        }
    }

    /// Secret recorded at open time. 0 is assumed to never be handed to a
    /// client as a valid secret.
    pub fn get_secret(&self, account: AccountId) -> Option<u64> {
        self.secrets.get(&account).copied()
    }

    pub fn account_exists(&self, account: AccountId) -> bool {
        self.balances.get(&account).is_some_and(|e| *e != 0)
    }

    pub fn account_has_zero_balance(&self, account: AccountId) -> bool {
        self.balances.get(&account) == Some(&-1)
    }

    /// Deletes the ledger entry. Does not validate zero balance; callers
    /// that must disallow closing a funded account check
    /// [`Self::account_has_zero_balance`] first. The secret entry is removed
    /// separately via [`Self::remove_secret`].
    pub fn close_account(&mut self, account: AccountId) {
        self.balances.remove(&account);
    }

    pub fn remove_secret(&mut self, account: AccountId) {
        self.secrets.remove(&account);
    }

    /// Number of ledger entries, phantom zero entries included.
    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: AccountId = 0x100;
    const B: AccountId = 0x200;

    fn funded(account: AccountId, balance: i64) -> AccountsLedger {
        let mut ledger = AccountsLedger::new();
        ledger.open_account(account, 0xdead_beef);
        if balance > 0 {
            ledger.balance_correction(account, balance).unwrap();
        }
        ledger
    }

    #[test]
    fn open_deposit_withdraw_scenario() {
        let mut ledger = AccountsLedger::new();
        ledger.open_account(A, 7);
        assert!(ledger.account_has_zero_balance(A));
        assert_eq!(ledger.get_secret(A), Some(7));

        assert_eq!(ledger.deposit(A, 100).unwrap().unwrap(), 100);
        assert_eq!(ledger.get_balance(A).unwrap(), 100);

        assert_eq!(
            ledger.withdrawal(A, 150),
            Err(Rejection::InsufficientFundsOrUnknownAccount)
        );
        assert_eq!(ledger.get_balance(A).unwrap(), 100);

        assert_eq!(ledger.withdrawal(A, 100).unwrap(), 0);
        assert!(ledger.account_has_zero_balance(A));
    }

    #[test]
    fn deposit_to_unopened_account_leaves_no_entry() {
        let mut ledger = AccountsLedger::new();
        assert_eq!(
            ledger.deposit(A, 50).unwrap(),
            Err(Rejection::UnknownAccount)
        );
        assert!(!ledger.account_exists(A));
        assert_eq!(ledger.get_balance(A), Err(Rejection::UnknownAccount));
    }

    #[test]
    fn withdrawal_from_unopened_account_is_rejected() {
        let mut ledger = AccountsLedger::new();
        assert_eq!(
            ledger.withdrawal(A, 50),
            Err(Rejection::InsufficientFundsOrUnknownAccount)
        );
        assert!(!ledger.account_exists(A));
    }

    #[test]
    fn transfer_conserves_money() {
        let mut ledger = funded(A, 1_000);
        ledger.open_account(B, 8);

        let (new_a, new_b) = ledger.transfer_locally(A, B, 300, 300).unwrap().unwrap();
        assert_eq!(new_a, 700);
        assert_eq!(new_b, 300);
        assert_eq!(
            ledger.get_balance(A).unwrap() + ledger.get_balance(B).unwrap(),
            1_000
        );
    }

    #[test]
    fn transfer_to_unknown_destination_restores_source() {
        let mut ledger = funded(A, 1_000);

        let result = ledger.transfer_locally(A, B, 300, 280).unwrap();
        assert_eq!(result, Err(Rejection::UnknownDestinationAccount));
        assert_eq!(ledger.get_balance(A).unwrap(), 1_000);
        assert!(!ledger.account_exists(B));
    }

    #[test]
    fn transfer_nsf_leaves_destination_untouched() {
        let mut ledger = funded(A, 100);
        ledger.open_account(B, 8);

        let result = ledger.transfer_locally(A, B, 300, 300).unwrap();
        assert_eq!(result, Err(Rejection::InsufficientFundsOrUnknownAccount));
        assert_eq!(ledger.get_balance(A).unwrap(), 100);
        assert!(ledger.account_has_zero_balance(B));
    }

    #[test]
    fn cross_currency_amounts_apply_independently() {
        let mut ledger = funded(A, 1_000);
        ledger.open_account(B, 8);

        ledger.transfer_locally(A, B, 500, 125).unwrap().unwrap();
        assert_eq!(ledger.get_balance(A).unwrap(), 500);
        assert_eq!(ledger.get_balance(B).unwrap(), 125);
    }

    #[test]
    fn negative_correction_on_missing_account_is_fatal() {
        let mut ledger = AccountsLedger::new();
        let violation = ledger.balance_correction(A, -5).unwrap_err();
        assert_eq!(violation.op, "balance_correction");
        assert_eq!(violation.encoded, 5);
    }

    #[test]
    fn deposit_overflow_is_fatal() {
        // encoded value close to i64::MIN so one more credit wraps
        let mut ledger = AccountsLedger::new();
        ledger.open_account(A, 7);
        ledger.balance_correction(A, i64::MAX - 1).unwrap();
        let violation = ledger.deposit(A, i64::MAX / 2).unwrap_err();
        assert_eq!(violation.op, "deposit");
        assert!(violation.encoded >= 0);
    }

    #[test]
    #[allow(deprecated)]
    fn deprecated_transfer_happy_path() {
        let mut ledger = funded(A, 400);
        ledger.open_account(B, 8);
        let (new_a, new_b) = ledger.transfer(A, B, 150).unwrap().unwrap();
        assert_eq!((new_a, new_b), (250, 150));
    }

    #[test]
    fn close_account_removes_entry() {
        let mut ledger = funded(A, 0);
        assert!(ledger.account_exists(A));
        ledger.close_account(A);
        ledger.remove_secret(A);
        assert!(!ledger.account_exists(A));
        assert_eq!(ledger.get_secret(A), None);
    }
}
