use std::thread::{self, JoinHandle};

use crossbeam_channel::bounded;
use tracing::{debug, error, info};

use crate::command::{Command, CommandEnvelope, ResultCode};
use crate::ledger::{AccountsLedger, InvariantViolation};

use super::{PaymentsApi, PipelineMessage, ResponseHandler};

/// Submission queue depth. A full queue blocks the submitter, which is the
/// backpressure the paced driver expects.
const QUEUE_CAPACITY: usize = 64 * 1024;

/// In-process stand-in for the external dispatch engine: one worker thread
/// owns the [`AccountsLedger`] and applies commands strictly in submission
/// order, delivering each result to the handler before touching the next
/// command. That gives the barrier its ordering contract for free.
///
/// A fatal [`InvariantViolation`] halts the worker; subsequent submissions
/// fail with `Disconnected` rather than being silently dropped.
#[derive(Debug)]
pub struct SingleWriterPipeline {
    api: PaymentsApi,
    worker: JoinHandle<AccountsLedger>,
}

impl SingleWriterPipeline {
    pub fn start<H>(ledger: AccountsLedger, handler: H) -> std::io::Result<Self>
    where
        H: ResponseHandler + Send + 'static,
    {
        let (tx, rx) = bounded::<PipelineMessage>(QUEUE_CAPACITY);
        let worker = thread::Builder::new()
            .name("ledger-worker".into())
            .spawn(move || worker_loop(ledger, rx, handler))?;
        Ok(Self {
            api: PaymentsApi::new(tx),
            worker,
        })
    }

    pub fn api(&self) -> PaymentsApi {
        self.api.clone()
    }

    /// Stops the worker after everything already submitted has been applied
    /// and hands the ledger back for inspection.
    pub fn shutdown(self) -> thread::Result<AccountsLedger> {
        // the worker may already be gone if it halted on a violation
        let _ = self.api.terminate();
        self.worker.join()
    }
}

fn worker_loop<H>(
    mut ledger: AccountsLedger,
    rx: crossbeam_channel::Receiver<PipelineMessage>,
    mut handler: H,
) -> AccountsLedger
where
    H: ResponseHandler,
{
    let mut applied: u64 = 0;
    for message in rx.iter() {
        let envelope = match message {
            PipelineMessage::Apply(envelope) => envelope,
            PipelineMessage::Terminate => break,
        };
        match apply(&mut ledger, &mut handler, &envelope) {
            Ok(code) => {
                handler.command_result(envelope.timestamp, envelope.correlation_id, code, &envelope);
                applied += 1;
            }
            Err(violation) => {
                // not a business error: the ledger may already be corrupt,
                // so stop applying commands entirely
                error!(%violation, correlation_id = envelope.correlation_id, "halting ledger worker");
                break;
            }
        }
    }
    debug!(applied, "ledger worker exiting");
    ledger
}

/// Applies one command. Balance-update events for committed mutations are
/// emitted here; the command result is delivered by the caller afterwards.
#[allow(deprecated)]
fn apply<H>(
    ledger: &mut AccountsLedger,
    handler: &mut H,
    envelope: &CommandEnvelope,
) -> Result<ResultCode, InvariantViolation>
where
    H: ResponseHandler,
{
    let code = match envelope.command {
        Command::OpenAccount { account, secret } => {
            ledger.open_account(account, secret);
            ResultCode::Ok
        }
        Command::Deposit { account, amount } => match ledger.deposit(account, amount)? {
            Ok(new_balance) => {
                handler.balance_update_event(account, amount, new_balance);
                ResultCode::Ok
            }
            Err(rejection) => rejection.into(),
        },
        Command::Withdrawal { account, amount } => match ledger.withdrawal(account, amount) {
            Ok(new_balance) => {
                handler.balance_update_event(account, -amount, new_balance);
                ResultCode::Ok
            }
            Err(rejection) => rejection.into(),
        },
        Command::BalanceCorrection { account, amount } => {
            let new_balance = ledger.balance_correction(account, amount)?;
            handler.balance_update_event(account, amount, new_balance);
            ResultCode::Ok
        }
        Command::TransferLocally {
            src,
            dst,
            amount_src,
            amount_dst,
        } => match ledger.transfer_locally(src, dst, amount_src, amount_dst)? {
            Ok((new_src, new_dst)) => {
                handler.balance_update_event(src, -amount_src, new_src);
                handler.balance_update_event(dst, amount_dst, new_dst);
                ResultCode::Ok
            }
            Err(rejection) => rejection.into(),
        },
        Command::Transfer { from, to, amount } => match ledger.transfer(from, to, amount)? {
            Ok((new_from, new_to)) => {
                handler.balance_update_event(from, -amount, new_from);
                handler.balance_update_event(to, amount, new_to);
                ResultCode::Ok
            }
            Err(rejection) => rejection.into(),
        },
        Command::CloseAccount { account } => {
            ledger.close_account(account);
            ledger.remove_secret(account);
            ResultCode::Ok
        }
        Command::GetBalance { account } => match ledger.get_balance(account) {
            Ok(_) => ResultCode::Ok,
            Err(rejection) => rejection.into(),
        },
        Command::AccountExists { account } => {
            if ledger.account_exists(account) {
                ResultCode::Ok
            } else {
                ResultCode::UnknownAccount
            }
        }
        Command::GetSecret { account } => {
            if ledger.get_secret(account).is_some() {
                ResultCode::Ok
            } else {
                ResultCode::UnknownAccount
            }
        }
        // interpreted by the response handler, a no-op for the ledger
        Command::Control { .. } => ResultCode::Ok,
    };
    Ok(code)
}

/// Convenience for tests and small tools: a pipeline over a fresh ledger.
pub fn start_empty<H>(handler: H) -> std::io::Result<SingleWriterPipeline>
where
    H: ResponseHandler + Send + 'static,
{
    let pipeline = SingleWriterPipeline::start(AccountsLedger::new(), handler)?;
    info!("single-writer pipeline started");
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::MAX_AMOUNT;
    use crate::processor::SubmitError;

    type Results = Vec<(i64, ResultCode)>;
    type Events = Vec<(u64, i64, i64)>;

    /// Captures results and balance events in delivery order, snapshotting
    /// both into the done channel on every control result.
    #[derive(Default)]
    struct Recorder {
        results: Results,
        events: Events,
        done: Option<crossbeam_channel::Sender<(Results, Events)>>,
    }

    impl ResponseHandler for Recorder {
        fn command_result(
            &mut self,
            _timestamp: i64,
            correlation_id: i64,
            result_code: ResultCode,
            request: &CommandEnvelope,
        ) {
            self.results.push((correlation_id, result_code));
            if matches!(request.command, Command::Control { .. }) {
                if let Some(done) = &self.done {
                    let _ = done.send((self.results.clone(), self.events.clone()));
                }
            }
        }

        fn balance_update_event(&mut self, account: u64, diff: i64, new_balance: i64) {
            self.events.push((account, diff, new_balance));
        }
    }

    #[test]
    fn applies_commands_in_submission_order() {
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let recorder = Recorder {
            done: Some(done_tx),
            ..Recorder::default()
        };
        let pipeline = start_empty(recorder).unwrap();
        let api = pipeline.api();

        api.open_account(0, 1, 0x10, 99).unwrap();
        api.deposit(0, 2, 0x10, 500).unwrap();
        api.withdrawal(0, 3, 0x10, 200).unwrap();
        api.withdrawal(0, 4, 0x10, 400).unwrap();
        api.control(0, 1, 0).unwrap();

        let (results, _events) = done_rx.recv().unwrap();
        assert_eq!(
            results,
            vec![
                (1, ResultCode::Ok),
                (2, ResultCode::Ok),
                (3, ResultCode::Ok),
                (4, ResultCode::InsufficientFunds),
                (1, ResultCode::Ok),
            ]
        );

        let ledger = pipeline.shutdown().unwrap();
        assert_eq!(ledger.get_balance(0x10).unwrap(), 300);
    }

    #[test]
    fn emits_balance_update_events_for_committed_mutations() {
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let recorder = Recorder {
            done: Some(done_tx),
            ..Recorder::default()
        };
        let pipeline = start_empty(recorder).unwrap();
        let api = pipeline.api();

        api.open_account(0, 1, 0xA, 1).unwrap();
        api.open_account(0, 2, 0xB, 2).unwrap();
        api.deposit(0, 3, 0xA, 100).unwrap();
        api.transfer_locally(0, 4, 0xA, 0xB, 40, 40).unwrap();
        // rejected: no event expected
        api.withdrawal(0, 5, 0xA, 10_000).unwrap();
        api.control(0, 1, 0).unwrap();

        let (_results, events) = done_rx.recv().unwrap();
        assert_eq!(
            events,
            vec![(0xA, 100, 100), (0xA, -40, 60), (0xB, 40, 40)]
        );

        let ledger = pipeline.shutdown().unwrap();
        assert_eq!(ledger.get_balance(0xA).unwrap(), 60);
        assert_eq!(ledger.get_balance(0xB).unwrap(), 40);
    }

    #[test]
    fn invalid_amount_is_rejected_before_submission() {
        let pipeline = start_empty(Recorder::default()).unwrap();
        let api = pipeline.api();
        assert!(matches!(
            api.deposit(0, 1, 0x10, 0),
            Err(SubmitError::Invalid(_))
        ));
        assert!(matches!(
            api.deposit(0, 1, 0x10, MAX_AMOUNT + 1),
            Err(SubmitError::Invalid(_))
        ));
        pipeline.shutdown().unwrap();
    }

    #[test]
    fn invariant_violation_halts_the_worker() {
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let recorder = Recorder {
            done: Some(done_tx),
            ..Recorder::default()
        };
        let pipeline = start_empty(recorder).unwrap();
        let api = pipeline.api();

        // negative correction on a missing account breaks the post-condition
        api.balance_correction(0, 1, 0x99, -5).unwrap();

        // FIFO means the correction halts the worker before this control
        // command could ever be applied, so its result never arrives
        let _ = api.control(0, 1, 0);
        assert!(
            done_rx
                .recv_timeout(std::time::Duration::from_millis(500))
                .is_err()
        );
        pipeline.shutdown().unwrap();
    }
}
