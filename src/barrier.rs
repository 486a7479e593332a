use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use thiserror::Error;

use crate::processor::{PaymentsApi, SubmitError};

/// Control command with no instruction attached: the checkpoint only flushes
/// the pipeline.
pub const NO_INSTRUCTION: u64 = 0;

/// Reserved instruction codes interpreted by the response handler, not the
/// ledger. The raw values are arbitrary 64-bit constants chosen so they can
/// never collide with legitimate business data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlInstruction {
    /// Clear and restart the latency sampler's reference epoch.
    SetReferenceTime,
    /// Clear the epoch so trailing results are not mis-timed.
    EndBatch,
    /// Report the current interval histogram out of band.
    DumpStats,
}

impl ControlInstruction {
    pub const SET_REFERENCE_TIME_CODE: u64 = 0x70c6_58f1_a93d_2b4f;
    pub const END_BATCH_CODE: u64 = 0x6532_c8ae_17f4_9d72;
    pub const DUMP_STATS_CODE: u64 = 0x0ee6_a9b2_5c81_d348;

    pub fn code(self) -> u64 {
        match self {
            ControlInstruction::SetReferenceTime => Self::SET_REFERENCE_TIME_CODE,
            ControlInstruction::EndBatch => Self::END_BATCH_CODE,
            ControlInstruction::DumpStats => Self::DUMP_STATS_CODE,
        }
    }

    /// Decodes a reserved code; any other value is an opaque flush.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            Self::SET_REFERENCE_TIME_CODE => Some(ControlInstruction::SetReferenceTime),
            Self::END_BATCH_CODE => Some(ControlInstruction::EndBatch),
            Self::DUMP_STATS_CODE => Some(ControlInstruction::DumpStats),
            _ => None,
        }
    }
}

/// Fatal checkpoint failures. The pipeline's ordering contract is a
/// precondition for every other guarantee, so none of these is retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BarrierError {
    #[error("control correlation mismatch: expected {expected}, received {received}")]
    CorrelationMismatch { expected: i64, received: i64 },
    #[error("checkpoint wait timed out after {0:?}")]
    Timeout(Duration),
    #[error("pipeline disconnected before acknowledging the checkpoint")]
    PipelineDisconnected,
}

/// Driver half of the checkpoint protocol.
///
/// Owns the strictly increasing control correlation counter (separate from
/// business correlation ids) and the receiving side of a single-slot
/// rendezvous. At most one checkpoint may be outstanding; submitting a
/// second control command before the first is acknowledged is a caller
/// error, which `&mut self` rules out within one driver.
#[derive(Debug)]
pub struct CheckpointBarrier {
    counter: i64,
    rendezvous: Receiver<i64>,
    timeout: Option<Duration>,
}

/// Handler half: releases the waiting driver by pushing the observed
/// control correlation id into the rendezvous.
#[derive(Debug, Clone)]
pub struct BarrierGate {
    slot: Sender<i64>,
}

impl BarrierGate {
    pub fn release(&self, correlation_id: i64) {
        // a dropped driver just means nobody is waiting anymore
        let _ = self.slot.send(correlation_id);
    }
}

impl CheckpointBarrier {
    /// Unbounded wait, the reference driver behavior.
    pub fn new() -> (Self, BarrierGate) {
        Self::with_timeout(None)
    }

    pub fn with_timeout(timeout: Option<Duration>) -> (Self, BarrierGate) {
        let (slot, rendezvous) = bounded(1);
        (
            Self {
                counter: 0,
                rendezvous,
                timeout,
            },
            BarrierGate { slot },
        )
    }

    /// Submits a control command and blocks until its result is observed.
    ///
    /// On return, every command submitted before the checkpoint has been
    /// fully applied and its result delivered: the pipeline preserves
    /// submission order end to end, so the control result arriving implies
    /// all earlier results arrived. A released correlation id other than the
    /// expected one means the pipeline broke that contract.
    pub fn checkpoint(
        &mut self,
        api: &PaymentsApi,
        timestamp_ns: i64,
        instruction: u64,
    ) -> Result<(), BarrierError> {
        self.counter += 1;
        api.control(timestamp_ns, self.counter, instruction)
            .map_err(|err| match err {
                SubmitError::Disconnected => BarrierError::PipelineDisconnected,
                // control commands carry no amount, nothing else can fail
                SubmitError::Invalid(_) => BarrierError::PipelineDisconnected,
            })?;

        let received = match self.timeout {
            None => self
                .rendezvous
                .recv()
                .map_err(|_| BarrierError::PipelineDisconnected)?,
            Some(timeout) => {
                self.rendezvous
                    .recv_timeout(timeout)
                    .map_err(|err| match err {
                        RecvTimeoutError::Timeout => BarrierError::Timeout(timeout),
                        RecvTimeoutError::Disconnected => BarrierError::PipelineDisconnected,
                    })?
            }
        };

        if received != self.counter {
            return Err(BarrierError::CorrelationMismatch {
                expected: self.counter,
                received,
            });
        }
        Ok(())
    }
}
