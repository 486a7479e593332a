/// Packing of (client, currency, sub-account) triples into 64-bit
/// account identifiers, plus the corruption-detecting check digit.
pub mod account_id;

/// Encoded balance ledger: per-account balances and secrets, mutated
/// through single atomic-add operations with rollback on rejection.
pub mod ledger;

/// Command envelopes, result codes and transfer order types exchanged
/// between a driver and the [`processor`].
pub mod command;

/// Checkpoint protocol: a control command whose completion implies
/// completion of every command submitted before it.
pub mod barrier;

/// Interval latency recording, gated by barrier-delivered instructions.
pub mod sampler;

/// Processor interface plus the single-writer in-process pipeline.
///
/// NOTE: Technically this interface is not necessary, but it is the
/// integration point to replace the in-process pipeline with a real
/// dispatch engine.
pub mod processor;

/// Ideally, this module should exist in its own crate, as a way to
/// bootstrap the load generator. However, I want to use it for
/// integration tests so I put it here.
pub mod bin_utils;
