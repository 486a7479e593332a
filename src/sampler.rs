use std::fmt;
use std::time::Instant;

use tracing::info;

use crate::barrier::ControlInstruction;

/// Monotonic timebase shared by the driver and the response handler.
///
/// All timestamps in the system are expressed against one `Clock` origin:
/// absolute nanoseconds for control commands, 1/1024-nanosecond fixed-point
/// offsets (approximately picoseconds) for business submissions.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    #[inline]
    pub fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    /// Current time in 1/1024-ns fixed point.
    #[inline]
    pub fn now_ps(&self) -> i64 {
        (self.now_ns() as i64) << 10
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

const BUCKETS: usize = 64;

/// Single-writer interval recorder: power-of-two latency buckets that are
/// drained and reset in one step to produce a percentile report without
/// stopping ongoing recording.
#[derive(Debug)]
pub struct LatencyHistogram {
    counts: [u64; BUCKETS],
    total: u64,
    max_ns: u64,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            counts: [0; BUCKETS],
            total: 0,
            max_ns: 0,
        }
    }

    #[inline]
    pub fn record(&mut self, latency_ns: u64) {
        let bucket = if latency_ns == 0 {
            0
        } else {
            (64 - latency_ns.leading_zeros() as usize).min(BUCKETS - 1)
        };
        self.counts[bucket] += 1;
        self.total += 1;
        self.max_ns = self.max_ns.max(latency_ns);
    }

    pub fn reset(&mut self) {
        self.counts = [0; BUCKETS];
        self.total = 0;
        self.max_ns = 0;
    }

    /// Takes the current interval's counts, leaving the histogram empty for
    /// the next interval.
    pub fn interval_report(&mut self) -> LatencyReport {
        let report = LatencyReport::from_buckets(&self.counts, self.total, self.max_ns);
        self.reset();
        report
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

const REPORT_PERCENTILES: [f64; 4] = [50.0, 90.0, 99.0, 99.9];

/// Percentile snapshot of one interval. Percentile values are bucket upper
/// bounds, so they overestimate by less than 2x; the worst observed value is
/// exact.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyReport {
    pub count: u64,
    pub max_ns: u64,
    pub percentiles: Vec<(f64, u64)>,
}

impl LatencyReport {
    fn from_buckets(counts: &[u64; BUCKETS], total: u64, max_ns: u64) -> Self {
        let mut percentiles = Vec::with_capacity(REPORT_PERCENTILES.len());
        for pct in REPORT_PERCENTILES {
            let rank = ((pct / 100.0) * total as f64).ceil() as u64;
            let mut seen = 0;
            let mut value = 0;
            for (bucket, count) in counts.iter().enumerate() {
                seen += count;
                if seen >= rank.max(1) {
                    value = bucket_upper_bound(bucket).min(max_ns);
                    break;
                }
            }
            percentiles.push((pct, value));
        }
        Self {
            count: total,
            max_ns,
            percentiles,
        }
    }
}

#[inline]
fn bucket_upper_bound(bucket: usize) -> u64 {
    if bucket == 0 {
        0
    } else {
        (1u64 << bucket) - 1
    }
}

fn format_ns(ns: u64) -> String {
    if ns < 1_000 {
        format!("{ns}ns")
    } else if ns < 1_000_000 {
        format!("{:.1}µs", ns as f64 / 1_000.0)
    } else if ns < 1_000_000_000 {
        format!("{:.1}ms", ns as f64 / 1_000_000.0)
    } else {
        format!("{:.2}s", ns as f64 / 1_000_000_000.0)
    }
}

impl fmt::Display for LatencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count == 0 {
            return write!(f, "no samples");
        }
        for (pct, value) in &self.percentiles {
            write!(f, "{pct}%={} ", format_ns(*value))?;
        }
        write!(f, "worst={} n={}", format_ns(self.max_ns), self.count)
    }
}

/// Consumes response timestamps gated by barrier-delivered instructions.
///
/// While a reference epoch is set, each non-control response records
/// `now - epoch - submitted_offset` into the interval histogram. The epoch
/// is established by a reset-reference-time checkpoint and cleared by an
/// end-of-batch one, so trailing asynchronous results are never mis-timed
/// against a stale reference.
#[derive(Debug)]
pub struct LatencySampler {
    clock: Clock,
    reference_ns: Option<u64>,
    histogram: LatencyHistogram,
}

impl LatencySampler {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            reference_ns: None,
            histogram: LatencyHistogram::new(),
        }
    }

    /// Handles a barrier instruction. `timestamp_ns` is the control
    /// command's echoed timestamp, used as the new reference epoch.
    pub fn on_instruction(&mut self, instruction: ControlInstruction, timestamp_ns: u64) {
        match instruction {
            ControlInstruction::SetReferenceTime => {
                self.histogram.reset();
                self.reference_ns = Some(timestamp_ns);
            }
            ControlInstruction::EndBatch => {
                self.reference_ns = None;
            }
            ControlInstruction::DumpStats => {
                let report = self.histogram.interval_report();
                info!(%report, "interval latency");
            }
        }
    }

    /// Records one business response, `timestamp_ps` being the echoed
    /// submission offset in 1/1024-ns units. No-op when no epoch is set.
    #[inline]
    pub fn record_response(&mut self, timestamp_ps: i64) {
        if let Some(reference_ns) = self.reference_ns {
            let latency_ns = self
                .clock
                .now_ns()
                .saturating_sub(reference_ns)
                .saturating_sub((timestamp_ps >> 10) as u64);
            self.histogram.record(latency_ns);
        }
    }

    pub fn interval_report(&mut self) -> LatencyReport {
        self.histogram.interval_report()
    }

    pub fn sample_count(&self) -> u64 {
        self.histogram.total()
    }
}
