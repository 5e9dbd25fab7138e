//! Property checks for the arithmetic exports.
//!
//! For every pair `(a, b)` a conforming module satisfies:
//!
//! - **reference**: `add(a, b) == a.wrapping_add(b)` and
//!   `multiply(a, b) == a.wrapping_mul(b)`
//! - **commutative**: `op(a, b) == op(b, a)`
//! - **identity**: `add(a, 0) == a` and `multiply(a, 1) == a`
//!
//! Inputs come from three sources, in order: the worked [`EXAMPLES`], every
//! pair of [`CORNER_VALUES`], and a [`SeedStream`] of pseudo-random pairs.

use std::fmt;

use crate::backend::{ArithBackend, ArithOp};
use crate::error::Result;

/// Violations kept in a [`CheckReport`]; further ones are only counted.
pub const MAX_REPORTED_VIOLATIONS: usize = 32;

/// `(op, a, b, expected)`
pub const EXAMPLES: [(ArithOp, i32, i32, i32); 4] = [
    (ArithOp::Add, 2, 3, 5),
    (ArithOp::Multiply, 4, 5, 20),
    (ArithOp::Add, -1, 1, 0),
    (ArithOp::Multiply, 0, 100, 0),
];

pub const CORNER_VALUES: [i32; 10] = [
    i32::MIN,
    i32::MIN + 1,
    -2,
    -1,
    0,
    1,
    2,
    0x10000,
    i32::MAX - 1,
    i32::MAX,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    Example,
    Reference,
    Commutative,
    Identity,
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Property::Example => "example",
            Property::Reference => "reference",
            Property::Commutative => "commutative",
            Property::Identity => "identity",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub property: Property,
    pub op: ArithOp,
    pub a: i32,
    pub b: i32,
    pub expected: i32,
    pub observed: i32,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}({}, {}) = {}, expected {}",
            self.property, self.op, self.a, self.b, self.observed, self.expected
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub pairs_checked: u64,
    pub calls: u64,
    pub violation_count: u64,
    pub violations: Vec<Violation>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.violation_count == 0
    }

    pub fn record(&mut self, violation: Violation) {
        tracing::warn!(%violation, "property violated");
        self.violation_count += 1;
        if self.violations.len() < MAX_REPORTED_VIOLATIONS {
            self.violations.push(violation);
        }
    }

    pub fn merge(&mut self, other: CheckReport) {
        self.pairs_checked += other.pairs_checked;
        self.calls += other.calls;
        self.violation_count += other.violation_count;
        let room = MAX_REPORTED_VIOLATIONS.saturating_sub(self.violations.len());
        self.violations
            .extend(other.violations.into_iter().take(room));
    }

    fn compare(
        &mut self,
        property: Property,
        op: ArithOp,
        a: i32,
        b: i32,
        expected: i32,
        observed: i32,
    ) {
        if expected != observed {
            self.record(Violation {
                property,
                op,
                a,
                b,
                expected,
                observed,
            });
        }
    }
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e3779b97f4a7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

/// Deterministic stream of `(i32, i32)` pairs. The same seed always yields
/// the same pairs, so a failing run can be replayed.
#[derive(Debug, Clone)]
pub struct SeedStream {
    state: u64,
}

impl SeedStream {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Independent stream for one of several workers sharing a base seed.
    pub fn for_worker(seed: u64, worker_id: usize) -> Self {
        Self::new(splitmix64(seed ^ (worker_id as u64).rotate_left(32)))
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e3779b97f4a7c15);
        splitmix64(self.state)
    }

    pub fn next_pair(&mut self) -> (i32, i32) {
        let x = self.next_u64();
        ((x >> 32) as u32 as i32, x as u32 as i32)
    }
}

impl Iterator for SeedStream {
    type Item = (i32, i32);

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_pair())
    }
}

pub fn check_examples(backend: &mut dyn ArithBackend, report: &mut CheckReport) -> Result<()> {
    for (op, a, b, expected) in EXAMPLES {
        let observed = backend.call(op, a, b)?;
        report.calls += 1;
        report.compare(Property::Example, op, a, b, expected, observed);
    }
    Ok(())
}

/// Runs the reference, commutative and identity checks for one pair.
pub fn check_pair(
    backend: &mut dyn ArithBackend,
    a: i32,
    b: i32,
    report: &mut CheckReport,
) -> Result<()> {
    for op in ArithOp::ALL {
        let ab = backend.call(op, a, b)?;
        let ba = backend.call(op, b, a)?;
        report.compare(Property::Reference, op, a, b, op.reference(a, b), ab);
        report.compare(Property::Commutative, op, b, a, ab, ba);

        let unit = backend.call(op, a, op.identity())?;
        report.compare(Property::Identity, op, a, op.identity(), a, unit);
        report.calls += 3;
    }
    report.pairs_checked += 1;
    Ok(())
}

/// Examples plus every ordered pair of [`CORNER_VALUES`].
pub fn check_fixed_inputs(backend: &mut dyn ArithBackend, report: &mut CheckReport) -> Result<()> {
    check_examples(backend, report)?;
    for a in CORNER_VALUES {
        for b in CORNER_VALUES {
            check_pair(backend, a, b, report)?;
        }
    }
    tracing::debug!(
        backend = backend.name(),
        pairs = report.pairs_checked,
        "fixed inputs checked"
    );
    Ok(())
}

/// Fixed inputs followed by `samples` pairs drawn from `SeedStream::new(seed)`.
pub fn run_checks(
    backend: &mut dyn ArithBackend,
    seed: u64,
    samples: u64,
) -> Result<CheckReport> {
    let mut report = CheckReport::default();
    check_fixed_inputs(backend, &mut report)?;

    for (a, b) in SeedStream::new(seed).take(samples as usize) {
        check_pair(backend, a, b, &mut report)?;
    }

    tracing::info!(
        backend = backend.name(),
        pairs = report.pairs_checked,
        calls = report.calls,
        violations = report.violation_count,
        "property checks finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NativeBackend;
    use crate::error::HostError;

    /// Wraps the native backend and corrupts one operation.
    struct Faulty<F: Fn(ArithOp, i32, i32) -> Option<i32>> {
        fault: F,
    }

    impl<F: Fn(ArithOp, i32, i32) -> Option<i32>> ArithBackend for Faulty<F> {
        fn name(&self) -> &'static str {
            "faulty"
        }

        fn call(&mut self, op: ArithOp, a: i32, b: i32) -> Result<i32> {
            Ok((self.fault)(op, a, b).unwrap_or_else(|| op.reference(a, b)))
        }
    }

    #[test]
    fn test_native_backend_is_clean() {
        let report = run_checks(&mut NativeBackend, 42, 1_000).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.pairs_checked, 100 + 1_000);
        assert_eq!(report.calls, 4 + 6 * 1_100);
    }

    #[test]
    fn test_detects_non_commutative_add() {
        let mut backend = Faulty {
            fault: |op: ArithOp, a: i32, b: i32| (op == ArithOp::Add).then(|| a.wrapping_sub(b)),
        };
        let report = run_checks(&mut backend, 1, 0).unwrap();
        assert!(!report.is_clean());
        assert!(report
            .violations
            .iter()
            .any(|v| v.property == Property::Commutative && v.op == ArithOp::Add));
        // a - 0 == a, so identity still holds
        assert!(report
            .violations
            .iter()
            .all(|v| v.property != Property::Identity));
    }

    #[test]
    fn test_detects_broken_identity() {
        let mut backend = Faulty {
            fault: |op: ArithOp, a: i32, b: i32| {
                (op == ArithOp::Multiply).then(|| a.wrapping_add(b))
            },
        };
        let mut report = CheckReport::default();
        check_pair(&mut backend, 7, 1, &mut report).unwrap();
        let identity = report
            .violations
            .iter()
            .find(|v| v.property == Property::Identity)
            .unwrap();
        assert_eq!(identity.to_string(), "identity: multiply(7, 1) = 8, expected 7");
    }

    #[test]
    fn test_examples_report_expected_values() {
        let mut backend = Faulty {
            fault: |op: ArithOp, a: i32, b: i32| (op == ArithOp::Multiply && a == 4 && b == 5).then_some(21),
        };
        let mut report = CheckReport::default();
        check_examples(&mut backend, &mut report).unwrap();
        assert_eq!(report.violation_count, 1);
        assert_eq!(
            report.violations[0],
            Violation {
                property: Property::Example,
                op: ArithOp::Multiply,
                a: 4,
                b: 5,
                expected: 20,
                observed: 21,
            }
        );
    }

    #[test]
    fn test_violation_list_is_capped() {
        let mut backend = Faulty {
            fault: |_: ArithOp, _: i32, _: i32| Some(12345),
        };
        let report = run_checks(&mut backend, 9, 200).unwrap();
        assert_eq!(report.violations.len(), MAX_REPORTED_VIOLATIONS);
        assert!(report.violation_count > MAX_REPORTED_VIOLATIONS as u64);
    }

    #[test]
    fn test_merge_keeps_cap() {
        let mut left = CheckReport::default();
        let mut right = CheckReport::default();
        for i in 0..MAX_REPORTED_VIOLATIONS as i32 {
            let v = Violation {
                property: Property::Reference,
                op: ArithOp::Add,
                a: i,
                b: 0,
                expected: i,
                observed: i + 1,
            };
            left.record(v.clone());
            right.record(v);
        }
        right.pairs_checked = 3;
        left.merge(right);
        assert_eq!(left.violation_count, 2 * MAX_REPORTED_VIOLATIONS as u64);
        assert_eq!(left.violations.len(), MAX_REPORTED_VIOLATIONS);
        assert_eq!(left.pairs_checked, 3);
    }

    #[test]
    fn test_seed_stream_is_deterministic() {
        let first: Vec<_> = SeedStream::new(5).take(8).collect();
        let second: Vec<_> = SeedStream::new(5).take(8).collect();
        assert_eq!(first, second);

        let w0: Vec<_> = SeedStream::for_worker(5, 0).take(8).collect();
        let w1: Vec<_> = SeedStream::for_worker(5, 1).take(8).collect();
        assert_ne!(w0, w1);
    }

    #[test]
    fn test_backend_errors_propagate() {
        struct Trapping;
        impl ArithBackend for Trapping {
            fn name(&self) -> &'static str {
                "trapping"
            }
            fn call(&mut self, op: ArithOp, _: i32, _: i32) -> Result<i32> {
                Err(HostError::Trap {
                    export: op.export_name(),
                    message: "unreachable".to_string(),
                })
            }
        }
        let err = run_checks(&mut Trapping, 0, 10).unwrap_err();
        assert!(matches!(err, HostError::Trap { export: "add", .. }));
    }
}
