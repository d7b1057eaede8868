//! Recovering a fixed-length secret through a timing side channel.
//!
//! Unlike the boolean-oracle attacks, the candidates for the current
//! unknown byte are independent of one another, so they are probed
//! concurrently: a bounded worker pool issues one timed round-trip per
//! candidate value and a single collector ranks the results. The slowest
//! candidates are re-sampled a few times before a byte is committed, and a
//! committed byte whose round-trips were not strictly slower than the
//! previous position's is treated as a wrong turn and revisited.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::errors::*;

/// One timed probe of a candidate value for the secret.
///
/// Implementations must be safe to call from several worker threads at
/// once; this is a requirement on the caller, nothing the attack can check.
pub trait TimingOracle: Sync {
    /// Submit `candidate` and return how long the round-trip took, plus
    /// whether the oracle accepted the candidate as the true value.
    fn measure(&self, candidate: &[u8]) -> Result<(Duration, bool)>;
}

impl<F> TimingOracle for F
where
    F: Fn(&[u8]) -> Result<(Duration, bool)> + Sync,
{
    fn measure(&self, candidate: &[u8]) -> Result<(Duration, bool)> {
        self(candidate)
    }
}

/// Cooperative cancellation for a running recovery: an explicit signal, a
/// deadline, or both. Checked between oracle queries; a query already in
/// flight is not interrupted.
pub struct CancelToken {
    flag: AtomicBool,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken {
            flag: AtomicBool::new(false),
            deadline: None,
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        CancelToken {
            flag: AtomicBool::new(false),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.deadline.map_or(false, |d| Instant::now() >= d)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TimingAttack {
    /// Maximum number of concurrently outstanding oracle queries.
    pub workers: usize,
    /// How many of the slowest candidates are re-sampled before committing.
    pub top_candidates: usize,
    /// Total sampling rounds per byte position, the first of which probes
    /// all 256 values.
    pub samples: usize,
}

impl Default for TimingAttack {
    fn default() -> Self {
        TimingAttack {
            workers: 8,
            top_candidates: 8,
            samples: 3,
        }
    }
}

impl TimingAttack {
    /// Recover a secret of `target_len` bytes. Returns early as soon as the
    /// oracle accepts a probed candidate; cancellation surfaces whatever
    /// has been recovered so far alongside [`AttackError::Cancelled`].
    pub fn recover<O>(
        &self,
        oracle: &O,
        target_len: usize,
        cancel: &CancelToken,
    ) -> ::std::result::Result<Vec<u8>, RecoveryError>
    where
        O: TimingOracle,
    {
        assert!(self.workers >= 1, "workers must be at least 1");
        assert!(
            self.top_candidates >= 1 && self.top_candidates <= 256,
            "top_candidates must be in 1..=256"
        );
        assert!(self.samples >= 1, "samples must be at least 1");

        let mut target = vec![0u8; target_len];
        match self.run(oracle, cancel, &mut target) {
            Ok(true) => Ok(target),
            Ok(false) => Err(RecoveryError {
                error: AttackError::ByteRecoveryFailed {
                    position: target_len.saturating_sub(1),
                }
                .into(),
                recovered: target,
            }),
            Err(error) => Err(RecoveryError {
                recovered: target,
                error,
            }),
        }
    }

    // Ok(true) once the oracle accepts a candidate, Ok(false) if the sweep
    // walks off the end without a confirmation.
    fn run<O>(&self, oracle: &O, cancel: &CancelToken, target: &mut Vec<u8>) -> Result<bool>
    where
        O: TimingOracle,
    {
        if target.is_empty() {
            return Ok(true);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| format_err!("failed to build worker pool: {}", e))?;

        let mut averages = vec![Duration::default(); target.len()];
        let mut position = 0;
        while position < target.len() {
            let mut timings = ByteTimings::new();
            let mut values: Vec<u8> = (0..=255).collect();

            for round in 0..self.samples {
                if round > 0 {
                    values = timings.slowest(self.top_candidates);
                }
                if cancel.cancelled() {
                    return Err(AttackError::Cancelled.into());
                }

                let results: Vec<Result<(u8, Duration, bool)>> = pool.install(|| {
                    values
                        .par_iter()
                        .map(|&value| {
                            if cancel.cancelled() {
                                return Err(AttackError::Cancelled.into());
                            }
                            let mut candidate = target.clone();
                            candidate[position] = value;
                            let (duration, accepted) = oracle
                                .measure(&candidate)
                                .map_err(oracle_query_failed)?;
                            Ok((value, duration, accepted))
                        })
                        .collect()
                });

                for result in results {
                    let (value, duration, accepted) = result?;
                    if accepted {
                        target[position] = value;
                        return Ok(true);
                    }
                    timings.add(value, duration);
                }
            }

            target[position] = timings.slowest_value();

            // A byte that did not take strictly longer to probe than its
            // predecessor points at a wrong predecessor: backtrack.
            averages[position] = timings.average();
            if position > 0 && averages[position] <= averages[position - 1] {
                position -= 1;
            } else {
                position += 1;
            }
        }

        Ok(false)
    }
}

/// Request durations per candidate byte value, each row kept sorted so the
/// median is a lookup.
struct ByteTimings {
    rows: Vec<Vec<Duration>>,
}

impl ByteTimings {
    fn new() -> Self {
        ByteTimings {
            rows: vec![Vec::new(); 256],
        }
    }

    fn add(&mut self, value: u8, duration: Duration) {
        let row = &mut self.rows[value as usize];
        let at = row
            .iter()
            .position(|&d| d > duration)
            .unwrap_or_else(|| row.len());
        row.insert(at, duration);
    }

    fn median(&self, value: u8) -> Duration {
        let row = &self.rows[value as usize];
        row.get(row.len() / 2).copied().unwrap_or_default()
    }

    /// The `n` byte values with the longest median duration, slowest first.
    fn slowest(&self, n: usize) -> Vec<u8> {
        let mut values: Vec<u8> = (0..=255).collect();
        values.sort_by(|&a, &b| self.median(b).cmp(&self.median(a)));
        values.truncate(n);
        values
    }

    fn slowest_value(&self) -> u8 {
        self.slowest(1)[0]
    }

    fn average(&self) -> Duration {
        let mut sum = Duration::default();
        let mut count = 0u32;
        for row in &self.rows {
            for &d in row {
                sum += d;
                count += 1;
            }
        }
        if count == 0 {
            return Duration::default();
        }
        sum / count
    }
}

#[test]
fn recovers_a_secret_from_a_short_circuiting_comparison() {
    // A simulated remote check that compares byte by byte and bails on the
    // first mismatch; timings are synthetic and deterministic.
    let secret: &[u8] = &[0xde, 0xad, 0xbe, 0xef, 0x42, 0x77];
    let oracle = move |candidate: &[u8]| -> Result<(Duration, bool)> {
        let matching = candidate
            .iter()
            .zip(secret.iter())
            .take_while(|(a, b)| a == b)
            .count();
        let duration = Duration::from_micros(50 + 100 * matching as u64);
        Ok((duration, candidate == secret))
    };

    let attack = TimingAttack {
        workers: 4,
        top_candidates: 3,
        samples: 3,
    };
    let recovered = attack
        .recover(&oracle, secret.len(), &CancelToken::new())
        .unwrap();
    assert_eq!(secret, &recovered[..]);
}

#[test]
fn cancellation_surfaces_partial_progress() {
    let oracle = |_: &[u8]| -> Result<(Duration, bool)> {
        Ok((Duration::from_micros(10), false))
    };

    let cancel = CancelToken::new();
    cancel.cancel();
    let failure = TimingAttack::default()
        .recover(&oracle, 4, &cancel)
        .unwrap_err();
    assert_eq!(Some(&AttackError::Cancelled), failure.attack_error());
    assert_eq!(4, failure.recovered.len());
}

#[test]
fn a_passed_deadline_cancels() {
    let oracle = |_: &[u8]| -> Result<(Duration, bool)> {
        Ok((Duration::from_micros(10), false))
    };

    let cancel = CancelToken::with_deadline(Instant::now());
    let failure = TimingAttack::default()
        .recover(&oracle, 4, &cancel)
        .unwrap_err();
    assert_eq!(Some(&AttackError::Cancelled), failure.attack_error());
}

#[test]
fn an_unconfirmable_secret_is_an_error() {
    // The timing signal leads somewhere, but the oracle never accepts any
    // candidate: the attack must not fabricate a confirmed result.
    let reference: &[u8] = &[1, 2];
    let oracle = move |candidate: &[u8]| -> Result<(Duration, bool)> {
        let matching = candidate
            .iter()
            .zip(reference.iter())
            .take_while(|(a, b)| a == b)
            .count();
        Ok((Duration::from_micros(50 + 100 * matching as u64), false))
    };

    let attack = TimingAttack {
        workers: 2,
        top_candidates: 2,
        samples: 1,
    };
    let failure = attack.recover(&oracle, 2, &CancelToken::new()).unwrap_err();
    match failure.attack_error() {
        Some(&AttackError::ByteRecoveryFailed { .. }) => {}
        other => panic!("expected ByteRecoveryFailed, got {:?}", other),
    }
    assert_eq!(reference, &failure.recovered[..]);
}
