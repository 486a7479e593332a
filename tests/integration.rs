use std::time::Duration;

use brisk_ledger::barrier::{BarrierGate, CheckpointBarrier, NO_INSTRUCTION};
use brisk_ledger::bin_utils::{LoadTest, LoadTestConfig};
use brisk_ledger::command::{Command, CommandEnvelope, ResultCode};
use brisk_ledger::ledger::AccountsLedger;
use brisk_ledger::processor::ResponseHandler;
use brisk_ledger::processor::single_writer::SingleWriterPipeline;

const TIMEOUT: Option<u64> = Some(5_000);

/// Forwards every result out of the worker thread and releases the barrier
/// on control results, optionally corrupting the released correlation id to
/// simulate a pipeline that broke its ordering contract.
struct ForwardingHandler {
    gate: BarrierGate,
    results: crossbeam_channel::Sender<(i64, ResultCode, bool)>,
    corrupt_control_ids: bool,
}

impl ResponseHandler for ForwardingHandler {
    fn command_result(
        &mut self,
        _timestamp: i64,
        correlation_id: i64,
        result_code: ResultCode,
        request: &CommandEnvelope,
    ) {
        let is_control = matches!(request.command, Command::Control { .. });
        let _ = self.results.send((correlation_id, result_code, is_control));
        if is_control {
            let released = if self.corrupt_control_ids {
                correlation_id - 1
            } else {
                correlation_id
            };
            self.gate.release(released);
        }
    }
}

fn start(
    corrupt_control_ids: bool,
) -> (
    SingleWriterPipeline,
    CheckpointBarrier,
    crossbeam_channel::Receiver<(i64, ResultCode, bool)>,
) {
    let (barrier, gate) =
        CheckpointBarrier::with_timeout(Some(Duration::from_millis(TIMEOUT.unwrap())));
    let (results_tx, results_rx) = crossbeam_channel::unbounded();
    let handler = ForwardingHandler {
        gate,
        results: results_tx,
        corrupt_control_ids,
    };
    let pipeline = SingleWriterPipeline::start(AccountsLedger::new(), handler).unwrap();
    (pipeline, barrier, results_rx)
}

#[test]
fn deposit_withdraw_scenario_end_to_end() {
    let (pipeline, mut barrier, results) = start(false);
    let api = pipeline.api();
    let account = 0x1234_5670;

    api.open_account(0, 1, account, 777).unwrap();
    api.deposit(0, 2, account, 100).unwrap();
    api.withdrawal(0, 3, account, 150).unwrap();
    api.withdrawal(0, 4, account, 100).unwrap();
    barrier.checkpoint(&api, 0, NO_INSTRUCTION).unwrap();

    let codes: Vec<(i64, ResultCode)> = results
        .try_iter()
        .filter(|(_, _, is_control)| !is_control)
        .map(|(id, code, _)| (id, code))
        .collect();
    assert_eq!(
        codes,
        vec![
            (1, ResultCode::Ok),
            (2, ResultCode::Ok),
            (3, ResultCode::InsufficientFunds),
            (4, ResultCode::Ok),
        ]
    );

    let ledger = pipeline.shutdown().unwrap();
    assert!(ledger.account_has_zero_balance(account));
    assert_eq!(ledger.get_secret(account), Some(777));
}

#[test]
fn control_result_arrives_after_all_prior_business_results() {
    let (pipeline, mut barrier, results) = start(false);
    let api = pipeline.api();

    api.open_account(0, 5, 0xA0, 1).unwrap();
    barrier.checkpoint(&api, 0, NO_INSTRUCTION).unwrap();

    // by the time the checkpoint returns, both results must have been
    // delivered, business first
    let order: Vec<(i64, bool)> = results
        .try_iter()
        .map(|(id, _, is_control)| (id, is_control))
        .collect();
    assert_eq!(order, vec![(5, false), (1, true)]);

    pipeline.shutdown().unwrap();
}

#[test]
fn simulated_reordering_is_detected_as_correlation_mismatch() {
    let (pipeline, mut barrier, _results) = start(true);
    let api = pipeline.api();

    let err = barrier.checkpoint(&api, 0, NO_INSTRUCTION).unwrap_err();
    assert_eq!(
        err,
        brisk_ledger::barrier::BarrierError::CorrelationMismatch {
            expected: 1,
            received: 0,
        }
    );

    pipeline.shutdown().unwrap();
}

#[test]
fn failed_transfer_rolls_back_the_source() {
    let (pipeline, mut barrier, results) = start(false);
    let api = pipeline.api();
    let src = 0xAA0;
    let unknown_dst = 0xBB0;

    api.open_account(0, 1, src, 9).unwrap();
    api.deposit(0, 2, src, 1_000).unwrap();
    api.transfer_locally(0, 3, src, unknown_dst, 400, 380).unwrap();
    barrier.checkpoint(&api, 0, NO_INSTRUCTION).unwrap();

    let transfer_code = results
        .try_iter()
        .find(|(id, _, _)| *id == 3)
        .map(|(_, code, _)| code);
    assert_eq!(transfer_code, Some(ResultCode::UnknownDestinationAccount));

    let ledger = pipeline.shutdown().unwrap();
    assert_eq!(ledger.get_balance(src).unwrap(), 1_000);
    assert!(!ledger.account_exists(unknown_dst));
}

#[test]
fn close_account_removes_entry_and_secret() {
    let (pipeline, mut barrier, _results) = start(false);
    let api = pipeline.api();
    let account = 0xC10;

    api.open_account(0, 1, account, 5).unwrap();
    api.close_account(0, 2, account).unwrap();
    barrier.checkpoint(&api, 0, NO_INSTRUCTION).unwrap();

    let ledger = pipeline.shutdown().unwrap();
    assert!(!ledger.account_exists(account));
    assert_eq!(ledger.get_secret(account), None);
}

#[test]
fn queries_answer_with_result_codes_only() {
    let (pipeline, mut barrier, results) = start(false);
    let api = pipeline.api();
    let account = 0xD40;

    api.open_account(0, 1, account, 11).unwrap();
    api.get_balance(0, 2, account).unwrap();
    api.account_exists(0, 3, account).unwrap();
    api.get_secret(0, 4, account).unwrap();
    api.get_balance(0, 5, 0xEEE).unwrap();
    api.account_exists(0, 6, 0xEEE).unwrap();
    barrier.checkpoint(&api, 0, NO_INSTRUCTION).unwrap();

    let codes: Vec<(i64, ResultCode)> = results
        .try_iter()
        .filter(|(_, _, is_control)| !is_control)
        .map(|(id, code, _)| (id, code))
        .collect();
    assert_eq!(
        codes,
        vec![
            (1, ResultCode::Ok),
            (2, ResultCode::Ok),
            (3, ResultCode::Ok),
            (4, ResultCode::Ok),
            (5, ResultCode::UnknownAccount),
            (6, ResultCode::UnknownAccount),
        ]
    );

    pipeline.shutdown().unwrap();
}

#[test]
#[allow(deprecated)]
fn deprecated_transfer_still_works_on_the_wire() {
    let (pipeline, mut barrier, _results) = start(false);
    let api = pipeline.api();

    api.open_account(0, 1, 0xF1, 1).unwrap();
    api.open_account(0, 2, 0xF2, 2).unwrap();
    api.deposit(0, 3, 0xF1, 500).unwrap();
    api.transfer(0, 4, 0xF1, 0xF2, 200).unwrap();
    barrier.checkpoint(&api, 0, NO_INSTRUCTION).unwrap();

    let ledger = pipeline.shutdown().unwrap();
    assert_eq!(ledger.get_balance(0xF1).unwrap(), 300);
    assert_eq!(ledger.get_balance(0xF2).unwrap(), 200);
}

#[test]
fn load_test_smoke_run() {
    let config = LoadTestConfig {
        seed: 3,
        currencies: 4,
        accounts: 50,
        transfers_per_batch: 200,
        batches: 2,
        start_tps: 50_000,
        end_tps: 50_000,
        step_tps: 100_000,
        fee_rate: 0.00375,
        max_accounts_per_client: 10,
        checkpoint_timeout_ms: TIMEOUT,
    };
    LoadTest::new(config).run().unwrap();
}
