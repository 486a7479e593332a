//! This module could be a separate crate on its own, to bootstrap the load
//! generator within a binary, but for simplicity purposes it lives here and
//! doubles as the integration-test entry point.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, ensure};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::barrier::{BarrierGate, CheckpointBarrier, ControlInstruction, NO_INSTRUCTION};
use crate::command::{Command, CommandEnvelope, MAX_AMOUNT, ResultCode, TransferOrder};
use crate::ledger::AccountsLedger;
use crate::processor::single_writer::SingleWriterPipeline;
use crate::processor::ResponseHandler;
use crate::sampler::{Clock, LatencySampler};

pub mod orders;
pub mod rates;

use orders::TransferLegs;
use rates::FeeSchedule;

/// Knobs of one load-test run. All fields have defaults, so a TOML file only
/// needs to override what it cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadTestConfig {
    pub seed: u64,
    pub currencies: usize,
    pub accounts: usize,
    pub transfers_per_batch: usize,
    /// Pre-generated order batches, reused round-robin across rate steps.
    pub batches: usize,
    pub start_tps: u64,
    pub end_tps: u64,
    pub step_tps: u64,
    pub fee_rate: f64,
    pub max_accounts_per_client: usize,
    /// `None` reproduces the reference driver: wait on a checkpoint forever.
    pub checkpoint_timeout_ms: Option<u64>,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            currencies: 30,
            accounts: 100_000,
            transfers_per_batch: 100_000,
            batches: 10,
            start_tps: 500_000,
            end_tps: 2_000_000,
            step_tps: 100_000,
            fee_rate: 0.00375,
            max_accounts_per_client: 40,
            checkpoint_timeout_ms: None,
        }
    }
}

/// Routes control results into the barrier/sampler and times everything
/// else. Runs on the pipeline worker thread.
struct LoadResponseHandler {
    sampler: LatencySampler,
    gate: BarrierGate,
}

impl ResponseHandler for LoadResponseHandler {
    fn command_result(
        &mut self,
        timestamp: i64,
        correlation_id: i64,
        _result_code: ResultCode,
        request: &CommandEnvelope,
    ) {
        if let Command::Control { instruction } = request.command {
            if let Some(instruction) = ControlInstruction::from_code(instruction) {
                self.sampler.on_instruction(instruction, timestamp as u64);
            }
            self.gate.release(correlation_id);
        } else {
            self.sampler.record_response(timestamp);
        }
    }
}

/// Drives a [`SingleWriterPipeline`] through the full benchmark sequence:
/// open and fund accounts, then submit paced transfer batches bracketed by
/// reference-time / end-of-batch / dump-stats checkpoints.
pub struct LoadTest {
    config: LoadTestConfig,
}

impl LoadTest {
    pub fn new(config: LoadTestConfig) -> Self {
        Self { config }
    }

    pub fn run(&self) -> Result<()> {
        let cfg = &self.config;
        ensure!(cfg.accounts >= 2, "need at least two accounts to transfer");
        ensure!(cfg.batches > 0, "need at least one order batch");
        ensure!(cfg.currencies > 0, "need at least one currency");

        let mut rng = StdRng::seed_from_u64(cfg.seed);

        let currencies = orders::generate_currencies(cfg.currencies, &mut rng);
        let rate_book = orders::build_rate_book(&currencies);
        let fees = FeeSchedule::from_currency_rates(cfg.fee_rate, &currencies);
        info!(currencies = currencies.len(), rates = rate_book.len(), "rate table ready");

        let accounts =
            orders::generate_accounts(cfg.accounts, &currencies, cfg.max_accounts_per_client, &mut rng)?;
        let secrets = orders::generate_secrets(&accounts, &mut rng);
        info!(accounts = accounts.len(), "generated accounts and secrets");

        info!(
            batches = cfg.batches,
            per_batch = cfg.transfers_per_batch,
            "generating transfer orders"
        );
        let mut batches: Vec<Vec<(TransferOrder, TransferLegs)>> = Vec::with_capacity(cfg.batches);
        for batch_idx in 0..cfg.batches {
            let batch_seed = cfg
                .seed
                .wrapping_add((batch_idx as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15));
            let generated = orders::generate_transfers(
                cfg.transfers_per_batch,
                &accounts,
                &rate_book,
                &fees,
                &secrets,
                batch_seed,
            );
            let total = generated.len();
            let resolved: Vec<(TransferOrder, TransferLegs)> = generated
                .into_iter()
                .filter_map(|order| {
                    orders::convert_order(&order, &rate_book, &fees).map(|legs| (order, legs))
                })
                .collect();
            if resolved.len() < total {
                warn!(
                    batch = batch_idx,
                    dropped = total - resolved.len(),
                    "dropped unconvertible orders"
                );
            }
            batches.push(resolved);
        }

        let funding = orders::required_funding(batches.iter().flatten());

        let clock = Clock::new();
        let (mut barrier, gate) =
            CheckpointBarrier::with_timeout(cfg.checkpoint_timeout_ms.map(Duration::from_millis));
        let handler = LoadResponseHandler {
            sampler: LatencySampler::new(clock),
            gate,
        };
        let pipeline = SingleWriterPipeline::start(AccountsLedger::new(), handler)?;
        let api = pipeline.api();

        let mut correlation_id: i64 = 0;

        info!(count = accounts.len(), "opening and funding accounts");
        let open_start_ns = clock.now_ns();
        for &account in &accounts {
            correlation_id += 1;
            api.open_account(clock.now_ps(), correlation_id, account, secrets[&account])?;
            if let Some(&amount) = funding.get(&account) {
                let amount = amount.min(MAX_AMOUNT);
                if amount > 0 {
                    correlation_id += 1;
                    api.balance_correction(clock.now_ps(), correlation_id, account, amount)?;
                }
            }
        }
        barrier.checkpoint(&api, clock.now_ns() as i64, NO_INSTRUCTION)?;
        info!(
            elapsed_ms = (clock.now_ns() - open_start_ns) / 1_000_000,
            "accounts ready, starting benchmark"
        );

        let step_tps = cfg.step_tps.max(1);
        let mut batch_idx = 0usize;
        let mut tps = cfg.start_tps.max(1);
        while tps <= cfg.end_tps {
            // jitter the target so rate steps do not align with anything
            let target_tps = (tps as i64 + rng.gen_range(-500..=500)).max(1) as u64;
            let batch = &batches[batch_idx % batches.len()];
            let picos_per_cmd = (1024u64 * 1_000_000_000 / target_tps) as i64;

            let batch_start_ns = clock.now_ns();
            barrier.checkpoint(
                &api,
                batch_start_ns as i64,
                ControlInstruction::SetReferenceTime.code(),
            )?;

            let mut planned_ps: i64 = 10_000_000;
            let mut last_known_ps: i64 = 0;
            let mut clock_reads: u64 = 0;
            for (order, legs) in batch {
                planned_ps += picos_per_cmd;

                // spin until it is time to send the next command
                while planned_ps > last_known_ps {
                    last_known_ps = ((clock.now_ns() - batch_start_ns) << 10) as i64;
                    clock_reads += 1;
                    if planned_ps > last_known_ps {
                        std::hint::spin_loop();
                    }
                }

                correlation_id += 1;
                api.transfer_locally(
                    planned_ps,
                    correlation_id,
                    order.source,
                    order.destination,
                    legs.amount_src,
                    legs.amount_dst,
                )?;
            }

            barrier.checkpoint(
                &api,
                batch_start_ns as i64,
                ControlInstruction::EndBatch.code(),
            )?;

            let elapsed_us = (clock.now_ns() - batch_start_ns) as f64 / 1_000.0;
            let achieved = batch.len() as f64 / elapsed_us;
            let target = target_tps as f64 / 1e6;
            info!(
                batch = batch_idx,
                target_mts = %format_args!("{target:.3}"),
                achieved_mts = %format_args!("{achieved:.3}"),
                ratio = %format_args!("{:.0}%", achieved / target * 100.0),
                clock_reads,
                "batch complete"
            );

            barrier.checkpoint(
                &api,
                batch_start_ns as i64,
                ControlInstruction::DumpStats.code(),
            )?;

            batch_idx += 1;
            tps += step_tps;
        }

        let ledger = pipeline
            .shutdown()
            .map_err(|_| anyhow!("ledger worker panicked"))?;
        info!(entries = ledger.len(), "load test finished");
        Ok(())
    }
}

/// Loads a config from a TOML file, or the defaults when no path is given.
pub fn load_config(path: Option<&str>) -> Result<LoadTestConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to open `{path}`"))?;
            toml::from_str(&raw).with_context(|| format!("Failed to parse `{path}`"))
        }
        None => Ok(LoadTestConfig::default()),
    }
}
