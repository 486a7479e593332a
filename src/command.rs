use thiserror::Error;

use crate::account_id::{AccountId, CurrencyId};
use crate::ledger::Rejection;

/// Hard bound on any single operation amount and on any legitimate balance.
///
/// Within this bound one atomic add on an encoded balance can never wrap an
/// `i64`, so the ledger's `>= 0` overflow branch is reachable only through
/// corruption or an unvalidated caller. Enforced at the submission boundary,
/// not in the hot ledger operations.
pub const MAX_AMOUNT: i64 = i64::MAX / 4;

/// Which side of a transfer the order amount denominates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    /// Amount is what leaves the source account.
    SourceExact,
    /// Amount is what the destination must receive.
    DestinationExact,
}

/// A synthetic transfer request as issued by a driver: the amount is in the
/// order currency, conversion into the two ledger legs happens upstream of
/// the ledger. The signature is an integrity artifact for the (external)
/// authorization layer, keyed by the source account's secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOrder {
    pub source: AccountId,
    pub destination: AccountId,
    pub amount: i64,
    pub currency: CurrencyId,
    pub transfer_type: TransferType,
    pub signature: [u8; 32],
}

/// Inbound command kinds consumed by the ledger layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    OpenAccount {
        account: AccountId,
        secret: u64,
    },
    Deposit {
        account: AccountId,
        amount: i64,
    },
    Withdrawal {
        account: AccountId,
        amount: i64,
    },
    BalanceCorrection {
        account: AccountId,
        amount: i64,
    },
    TransferLocally {
        src: AccountId,
        dst: AccountId,
        amount_src: i64,
        amount_dst: i64,
    },
    /// Equal-currency convenience transfer. Deprecated at the ledger level;
    /// kept on the wire for old drivers.
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: i64,
    },
    CloseAccount {
        account: AccountId,
    },
    GetBalance {
        account: AccountId,
    },
    AccountExists {
        account: AccountId,
    },
    GetSecret {
        account: AccountId,
    },
    /// Barrier checkpoint carrying an opaque instruction code interpreted by
    /// the response handler, never by the ledger.
    Control {
        instruction: u64,
    },
}

/// A command plus the caller-assigned metadata the pipeline echoes back in
/// its result.
///
/// `timestamp` is a fixed-point value in 1/1024-nanosecond units for
/// business commands (relative to the current reference epoch); control
/// commands carry the absolute clock nanos their instruction needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEnvelope {
    pub timestamp: i64,
    pub correlation_id: i64,
    pub command: Command,
}

/// Outcome delivered per command. Recoverable codes only: a fatal invariant
/// violation halts the processing unit instead of producing a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    InsufficientFunds,
    UnknownAccount,
    UnknownDestinationAccount,
}

impl ResultCode {
    pub fn is_ok(self) -> bool {
        self == ResultCode::Ok
    }
}

impl From<Rejection> for ResultCode {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::InsufficientFundsOrUnknownAccount => ResultCode::InsufficientFunds,
            Rejection::UnknownAccount => ResultCode::UnknownAccount,
            Rejection::UnknownDestinationAccount => ResultCode::UnknownDestinationAccount,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("amount {0} outside (0, {MAX_AMOUNT}]")]
    AmountOutOfRange(i64),
    #[error("correction amount {0} outside [-{MAX_AMOUNT}, {MAX_AMOUNT}]")]
    CorrectionOutOfRange(i64),
}

/// Validates a deposit/withdrawal/transfer amount before any ledger
/// mutation is attempted.
pub fn validate_amount(amount: i64) -> Result<(), CommandError> {
    if amount <= 0 || amount > MAX_AMOUNT {
        return Err(CommandError::AmountOutOfRange(amount));
    }
    Ok(())
}

/// Corrections may carry either sign.
pub fn validate_correction(amount: i64) -> Result<(), CommandError> {
    if amount < -MAX_AMOUNT || amount > MAX_AMOUNT {
        return Err(CommandError::CorrectionOutOfRange(amount));
    }
    Ok(())
}
