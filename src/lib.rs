//! # syrk-perf
//!
//! Performance comparison harness for the symmetric rank-k update (SYRK)
//! `C := alpha * op(A) * op(A)^T + beta * C` on an accelerator against a host
//! reference implementation.
//!
//! For each case the harness:
//!
//! 1. skips double-precision variants on devices without native fp64,
//! 2. skips cases the device memory cannot hold (pre-flight check),
//! 3. stages identical random input for both paths, honoring offsets and
//!    leading dimensions,
//! 4. times the reference and the device kernel from the same starting state,
//! 5. reports whether the device was not slower.
//!
//! ## Example
//!
//! ```rust
//! use syrk_perf::device::sim::{SimConfig, SimDevice};
//! use syrk_perf::{Harness, HarnessConfig, HostSyrk, ProblemDescriptor, Variant, Verdict};
//!
//! let device = SimDevice::new(SimConfig::default());
//! let baseline = HostSyrk;
//! let harness = Harness::new(&device, Some(&baseline), HarnessConfig::default()).unwrap();
//!
//! let outcome = harness.run(&ProblemDescriptor::new(Variant::Real32, 64, 32));
//! assert_ne!(outcome.verdict(), Verdict::Fatal);
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)] // u64 -> f64 for throughput figures
#![allow(clippy::cast_possible_truncation)] // u128 -> u64 for microsecond logs
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::float_cmp)]
#![allow(clippy::many_single_char_names)] // BLAS argument names

/// Per-case staging and the reference/device timers
pub mod case;
pub mod config;
/// Device context abstraction and the simulated accelerator
pub mod device;
pub mod element;
pub mod error;
/// Comparison orchestrator, outcomes and batch summaries
pub mod harness;
pub mod problem;
/// Host reference SYRK
///
/// Built in behind the default `etalon` feature.
pub mod reference;
pub mod resources;

// Re-exports for convenience
pub use case::{SyrkCase, Timing};
pub use config::{CaseFile, HarnessConfig};
pub use device::DeviceBackend;
pub use element::{Element, Multiplier, Variant};
pub use error::{DeviceStatus, HarnessError, Result};
pub use harness::{BatchSummary, CaseReport, Harness, Outcome, Verdict};
pub use problem::{Order, ProblemDescriptor, Transpose, Uplo};
pub use reference::{Baseline, HostSyrk};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
