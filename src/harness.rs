//! Comparison orchestrator
//!
//! Drives one case through the precision check, the resource check, staging
//! and both timers, and classifies the result. Skips and regressions are
//! ordinary outcomes so a batch keeps running; only setup and execution
//! failures are fatal, and even those only end the case that raised them.

use std::time::Duration;

use num_complex::{Complex32, Complex64};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::case::{SyrkCase, Timing};
use crate::config::HarnessConfig;
use crate::device::DeviceBackend;
use crate::element::{Element, Variant};
use crate::error::{HarnessError, Result};
use crate::problem::ProblemDescriptor;
use crate::reference::{Baseline, HostSyrk};
use crate::resources::{self, MemoryLimits, ResourceVerdict};

/// Timings and throughput of a case that ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseReport {
    /// Numeric variant
    pub variant: Variant,
    /// Order of C
    pub n: usize,
    /// Reduction dimension
    pub k: usize,
    /// Operation-cost factor of the variant
    pub op_factor: u64,
    /// `N * N * K`
    pub problem_size: u64,
    /// Best device time
    pub device_time: Duration,
    /// Best reference result
    pub reference: Timing,
}

impl CaseReport {
    fn gflops(&self, time: Duration) -> f64 {
        let ns = time.as_nanos();
        if ns == 0 {
            return 0.0;
        }
        // flop per ns is GFLOP/s
        (self.op_factor as f64 * self.problem_size as f64) / ns as f64
    }

    /// Device throughput in GFLOP/s
    #[must_use]
    pub fn device_gflops(&self) -> f64 {
        self.gflops(self.device_time)
    }

    /// Reference throughput in GFLOP/s, if the reference ran
    #[must_use]
    pub fn reference_gflops(&self) -> Option<f64> {
        self.reference.elapsed().map(|t| self.gflops(t))
    }

    /// Device time divided by reference time, if the reference ran
    #[must_use]
    pub fn slowdown(&self) -> Option<f64> {
        self.reference
            .elapsed()
            .filter(|t| !t.is_zero())
            .map(|t| self.device_time.as_secs_f64() / t.as_secs_f64())
    }
}

/// Result of one case
#[derive(Debug)]
pub enum Outcome {
    /// Device time is not above the reference (or there is no reference)
    RanFasterOrEqual(CaseReport),
    /// Device time is above the reference
    RanSlower(CaseReport),
    /// The pre-flight check found the device too small
    SkippedInsufficientResources {
        /// Bytes the sizing formula asks for
        required: u64,
        /// Per-matrix ceiling of the device
        ceiling: u64,
    },
    /// The variant needs fp64 and the device has none
    SkippedUnsupportedPrecision,
    /// Setup or execution failed
    Fatal(HarnessError),
}

/// Severity of an outcome, for aggregation over a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// Ran and was not slower
    Ok,
    /// Did not run, not an error
    Skipped,
    /// Ran and was slower; non-fatal
    Regression,
    /// Setup or execution failed
    Fatal,
}

impl Outcome {
    /// Severity of this outcome
    #[must_use]
    pub fn verdict(&self) -> Verdict {
        match self {
            Self::RanFasterOrEqual(_) => Verdict::Ok,
            Self::RanSlower(_) => Verdict::Regression,
            Self::SkippedInsufficientResources { .. } | Self::SkippedUnsupportedPrecision => {
                Verdict::Skipped
            },
            Self::Fatal(_) => Verdict::Fatal,
        }
    }

    /// Report of a case that ran
    #[must_use]
    pub fn report(&self) -> Option<&CaseReport> {
        match self {
            Self::RanFasterOrEqual(r) | Self::RanSlower(r) => Some(r),
            _ => None,
        }
    }
}

/// One entry of a batch summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    /// The case
    pub problem: ProblemDescriptor,
    /// Severity
    pub verdict: Verdict,
    /// Timings, for cases that ran
    pub report: Option<CaseReport>,
    /// Skip reason or error message
    pub message: Option<String>,
}

impl CaseRecord {
    fn new(problem: ProblemDescriptor, outcome: &Outcome) -> Self {
        let message = match outcome {
            Outcome::SkippedInsufficientResources { required, ceiling } => Some(format!(
                "insufficient resources: {} bytes required, ceiling {}",
                required, ceiling
            )),
            Outcome::SkippedUnsupportedPrecision => {
                Some("device lacks native double precision".to_string())
            },
            Outcome::Fatal(err) => Some(err.to_string()),
            Outcome::RanFasterOrEqual(_) | Outcome::RanSlower(_) => None,
        };
        Self {
            problem,
            verdict: outcome.verdict(),
            report: outcome.report().cloned(),
            message,
        }
    }
}

/// Aggregated results of a batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Every case in execution order
    pub records: Vec<CaseRecord>,
}

impl BatchSummary {
    /// Number of cases with the given verdict
    #[must_use]
    pub fn count(&self, verdict: Verdict) -> usize {
        self.records.iter().filter(|r| r.verdict == verdict).count()
    }

    /// Whether any case failed fatally
    #[must_use]
    pub fn has_fatal(&self) -> bool {
        self.count(Verdict::Fatal) > 0
    }

    /// Cases where the device was slower
    pub fn regressions(&self) -> impl Iterator<Item = &CaseRecord> {
        self.records
            .iter()
            .filter(|r| r.verdict == Verdict::Regression)
    }

    /// Serialize to pretty JSON
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::JsonError` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Runs cases against one device and an optional baseline
#[derive(Debug)]
pub struct Harness<'d, D: DeviceBackend, B: Baseline = HostSyrk> {
    device: &'d D,
    baseline: Option<&'d B>,
    config: HarnessConfig,
}

impl<'d, D: DeviceBackend, B: Baseline> Harness<'d, D, B> {
    /// Create a harness
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::InvalidConfiguration` if `config` is invalid.
    pub fn new(device: &'d D, baseline: Option<&'d B>, config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            device,
            baseline,
            config,
        })
    }

    /// Run one case, dispatching on its variant
    pub fn run(&self, problem: &ProblemDescriptor) -> Outcome {
        match problem.variant {
            Variant::Real32 => self.run_typed::<f32>(problem),
            Variant::Real64 => self.run_typed::<f64>(problem),
            Variant::Complex32 => self.run_typed::<Complex32>(problem),
            Variant::Complex64 => self.run_typed::<Complex64>(problem),
        }
    }

    fn run_typed<T: Element>(&self, problem: &ProblemDescriptor) -> Outcome {
        if let Err(err) = problem.validate() {
            error!(case = %problem, %err, "invalid case");
            return Outcome::Fatal(err);
        }
        if problem.variant != T::VARIANT {
            let err = HarnessError::InvalidProblem {
                reason: format!("descriptor is {} but {} was requested", problem.variant, T::VARIANT),
            };
            error!(case = %problem, %err, "invalid case");
            return Outcome::Fatal(err);
        }

        if T::REQUIRES_DOUBLE && !self.device.supports_double_precision() {
            warn!(
                case = %problem,
                "target device does not support native double precision; test skipped"
            );
            return Outcome::SkippedUnsupportedPrecision;
        }

        let limits = MemoryLimits::query(self.device, self.config.device_index);
        if let ResourceVerdict::Skip { required, ceiling } = resources::check(limits, problem) {
            warn!(case = %problem, required, ceiling, "resource check: skip due to insufficient resources");
            return Outcome::SkippedInsufficientResources { required, ceiling };
        }

        match self.measure::<T>(problem) {
            Ok(report) => self.classify(problem, report),
            Err(err) => {
                error!(case = %problem, %err, "fatal error: cannot allocate resources or perform a device request");
                Outcome::Fatal(err)
            },
        }
    }

    /// Run cases in order; failures do not stop the batch
    pub fn run_batch(&self, problems: &[ProblemDescriptor]) -> BatchSummary {
        let records = problems
            .iter()
            .map(|problem| {
                let outcome = self.run(problem);
                CaseRecord::new(problem.clone(), &outcome)
            })
            .collect();
        BatchSummary { records }
    }

    fn measure<T: Element>(&self, problem: &ProblemDescriptor) -> Result<CaseReport> {
        let mut case = SyrkCase::<T, D>::new(self.device, problem.clone())?;
        case.prepare(self.config.seed)?;

        let mut reference: Option<Timing> = None;
        let mut device_time: Option<Duration> = None;
        for _ in 0..self.config.repetitions {
            let r = case.time_reference(self.baseline, self.config.allow_row_major)?;
            let d = case.time_device()?;
            reference = Some(reference.map_or(r, |best| best.best(r)));
            device_time = Some(device_time.map_or(d, |best| best.min(d)));
        }

        let (Some(reference), Some(device_time)) = (reference, device_time) else {
            return Err(HarnessError::InvalidConfiguration(
                "repetitions must be at least 1".to_string(),
            ));
        };

        Ok(CaseReport {
            variant: T::VARIANT,
            n: problem.n,
            k: problem.k,
            op_factor: T::OP_FACTOR,
            problem_size: problem.problem_size(),
            device_time,
            reference,
        })
    }

    fn classify(&self, problem: &ProblemDescriptor, report: CaseReport) -> Outcome {
        match report.reference {
            Timing::Elapsed(reference) if report.device_time > reference => {
                warn!(
                    case = %problem,
                    device_us = report.device_time.as_micros() as u64,
                    reference_us = reference.as_micros() as u64,
                    slowdown = report.slowdown().unwrap_or(f64::INFINITY),
                    "device version is slower in this case"
                );
                Outcome::RanSlower(report)
            },
            _ => {
                info!(
                    case = %problem,
                    device_us = report.device_time.as_micros() as u64,
                    device_gflops = report.device_gflops(),
                    reference = ?report.reference,
                    "case passed"
                );
                Outcome::RanFasterOrEqual(report)
            },
        }
    }
}
