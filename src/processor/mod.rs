use thiserror::Error;

use crate::account_id::AccountId;
use crate::command::{
    Command, CommandEnvelope, CommandError, ResultCode, validate_amount, validate_correction,
};

pub mod single_writer;

/// Consumes pipeline results. Delivery order equals application order, which
/// equals submission order; a single consumer sees every result exactly
/// once.
pub trait ResponseHandler {
    /// One result per command, echoing the caller-assigned timestamp and
    /// correlation id. Control-command results are routed here too; the
    /// handler tells them apart through `request`.
    fn command_result(
        &mut self,
        timestamp: i64,
        correlation_id: i64,
        result_code: ResultCode,
        request: &CommandEnvelope,
    );

    /// Secondary event channel: committed balance changes for
    /// auditing/streaming, independent of the command-result channel.
    fn balance_update_event(&mut self, account: AccountId, diff: i64, new_balance: i64) {
        let _ = (account, diff, new_balance);
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] CommandError),
    #[error("pipeline disconnected")]
    Disconnected,
}

/// What travels over the worker queue: commands to apply, or the
/// termination sentinel. FIFO delivery means the sentinel drains everything
/// submitted before shutdown.
#[derive(Debug)]
pub(crate) enum PipelineMessage {
    Apply(CommandEnvelope),
    Terminate,
}

/// Cloneable submission handle. Validates arguments before enqueueing, so an
/// invalid command never reaches the ledger; submission order on one handle
/// is the pipeline's application order.
#[derive(Debug, Clone)]
pub struct PaymentsApi {
    tx: crossbeam_channel::Sender<PipelineMessage>,
}

impl PaymentsApi {
    pub(crate) fn new(tx: crossbeam_channel::Sender<PipelineMessage>) -> Self {
        Self { tx }
    }

    pub(crate) fn terminate(&self) -> Result<(), SubmitError> {
        self.tx
            .send(PipelineMessage::Terminate)
            .map_err(|_| SubmitError::Disconnected)
    }

    pub fn open_account(
        &self,
        timestamp: i64,
        correlation_id: i64,
        account: AccountId,
        secret: u64,
    ) -> Result<(), SubmitError> {
        self.submit(timestamp, correlation_id, Command::OpenAccount { account, secret })
    }

    pub fn deposit(
        &self,
        timestamp: i64,
        correlation_id: i64,
        account: AccountId,
        amount: i64,
    ) -> Result<(), SubmitError> {
        validate_amount(amount)?;
        self.submit(timestamp, correlation_id, Command::Deposit { account, amount })
    }

    pub fn withdrawal(
        &self,
        timestamp: i64,
        correlation_id: i64,
        account: AccountId,
        amount: i64,
    ) -> Result<(), SubmitError> {
        validate_amount(amount)?;
        self.submit(timestamp, correlation_id, Command::Withdrawal { account, amount })
    }

    pub fn balance_correction(
        &self,
        timestamp: i64,
        correlation_id: i64,
        account: AccountId,
        amount: i64,
    ) -> Result<(), SubmitError> {
        validate_correction(amount)?;
        self.submit(
            timestamp,
            correlation_id,
            Command::BalanceCorrection { account, amount },
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn transfer_locally(
        &self,
        timestamp: i64,
        correlation_id: i64,
        src: AccountId,
        dst: AccountId,
        amount_src: i64,
        amount_dst: i64,
    ) -> Result<(), SubmitError> {
        validate_amount(amount_src)?;
        validate_amount(amount_dst)?;
        self.submit(
            timestamp,
            correlation_id,
            Command::TransferLocally {
                src,
                dst,
                amount_src,
                amount_dst,
            },
        )
    }

    #[deprecated(note = "use transfer_locally")]
    pub fn transfer(
        &self,
        timestamp: i64,
        correlation_id: i64,
        from: AccountId,
        to: AccountId,
        amount: i64,
    ) -> Result<(), SubmitError> {
        validate_amount(amount)?;
        self.submit(timestamp, correlation_id, Command::Transfer { from, to, amount })
    }

    pub fn close_account(
        &self,
        timestamp: i64,
        correlation_id: i64,
        account: AccountId,
    ) -> Result<(), SubmitError> {
        self.submit(timestamp, correlation_id, Command::CloseAccount { account })
    }

    pub fn get_balance(
        &self,
        timestamp: i64,
        correlation_id: i64,
        account: AccountId,
    ) -> Result<(), SubmitError> {
        self.submit(timestamp, correlation_id, Command::GetBalance { account })
    }

    pub fn account_exists(
        &self,
        timestamp: i64,
        correlation_id: i64,
        account: AccountId,
    ) -> Result<(), SubmitError> {
        self.submit(timestamp, correlation_id, Command::AccountExists { account })
    }

    pub fn get_secret(
        &self,
        timestamp: i64,
        correlation_id: i64,
        account: AccountId,
    ) -> Result<(), SubmitError> {
        self.submit(timestamp, correlation_id, Command::GetSecret { account })
    }

    /// Checkpoint submission; normally called through
    /// [`crate::barrier::CheckpointBarrier::checkpoint`].
    pub fn control(
        &self,
        timestamp: i64,
        correlation_id: i64,
        instruction: u64,
    ) -> Result<(), SubmitError> {
        self.submit(timestamp, correlation_id, Command::Control { instruction })
    }

    fn submit(
        &self,
        timestamp: i64,
        correlation_id: i64,
        command: Command,
    ) -> Result<(), SubmitError> {
        self.tx
            .send(PipelineMessage::Apply(CommandEnvelope {
                timestamp,
                correlation_id,
                command,
            }))
            .map_err(|_| SubmitError::Disconnected)
    }
}
