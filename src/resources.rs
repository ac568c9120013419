//! Pre-flight resource check
//!
//! Decides from the device's memory limits whether a case may run at all.
//! The check is the authoritative gate: once it says RUN, an allocation
//! failure is a fatal setup error, not a skip.

use serde::{Deserialize, Serialize};

use crate::device::DeviceBackend;
use crate::problem::ProblemDescriptor;

/// Buffers that must coexist for one case: A, C and the backup of C
pub const RESIDENT_MATRICES: u64 = 3;

/// Memory limits reported by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryLimits {
    /// Available global memory in bytes
    pub global_mem: u64,
    /// Largest single allocation in bytes
    pub max_alloc: u64,
}

impl MemoryLimits {
    /// Query the limits of `device_index` from a backend
    pub fn query<B: DeviceBackend>(backend: &B, device_index: usize) -> Self {
        Self {
            global_mem: backend.available_global_memory(device_index),
            max_alloc: backend.max_alloc_size(),
        }
    }

    /// Largest size any one matrix may have
    #[must_use]
    pub fn matrix_ceiling(&self) -> u64 {
        (self.global_mem / RESIDENT_MATRICES).min(self.max_alloc)
    }
}

/// Verdict of the resource check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceVerdict {
    /// The case fits
    Run,
    /// The case would not fit; do not allocate
    Skip {
        /// Bytes the sizing formula asks for
        required: u64,
        /// Per-matrix ceiling
        ceiling: u64,
    },
}

impl ResourceVerdict {
    /// Whether the case may run
    #[must_use]
    pub fn is_run(&self) -> bool {
        matches!(self, Self::Run)
    }
}

/// Bytes the check charges for a case: `N * K * element_size`
///
/// Saturates instead of overflowing so absurd sizes always skip.
///
/// Only the N×K input is counted. C is N×N and exists twice, so for N much
/// larger than K this under-estimates the real footprint; the formula is kept
/// as is for comparability with existing result sets.
#[must_use]
pub fn required_bytes(problem: &ProblemDescriptor) -> u64 {
    (problem.n as u64)
        .saturating_mul(problem.k as u64)
        .saturating_mul(problem.variant.element_size() as u64)
}

/// Decide whether `problem` fits under `limits`
#[must_use]
pub fn check(limits: MemoryLimits, problem: &ProblemDescriptor) -> ResourceVerdict {
    let required = required_bytes(problem);
    let ceiling = limits.matrix_ceiling();
    if required < ceiling {
        ResourceVerdict::Run
    } else {
        ResourceVerdict::Skip { required, ceiling }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Variant;

    const GIB: u64 = 1 << 30;

    #[test]
    fn test_ceiling_is_min_of_third_and_alloc() {
        let limits = MemoryLimits {
            global_mem: 3 * GIB,
            max_alloc: GIB / 2,
        };
        assert_eq!(limits.matrix_ceiling(), GIB / 2);

        let limits = MemoryLimits {
            global_mem: 3 * GIB,
            max_alloc: 4 * GIB,
        };
        assert_eq!(limits.matrix_ceiling(), GIB);
    }

    #[test]
    fn test_small_case_runs() {
        let limits = MemoryLimits {
            global_mem: GIB,
            max_alloc: GIB / 4,
        };
        let p = ProblemDescriptor::new(Variant::Real32, 512, 512);
        assert!(check(limits, &p).is_run());
    }

    #[test]
    fn test_large_double_case_skips() {
        // 8192 * 8192 * 8 = 512 MiB, one third of 1 GiB is ~341 MiB
        let limits = MemoryLimits {
            global_mem: GIB,
            max_alloc: GIB,
        };
        let p = ProblemDescriptor::new(Variant::Real64, 8192, 8192);
        assert_eq!(
            check(limits, &p),
            ResourceVerdict::Skip {
                required: 512 * 1024 * 1024,
                ceiling: GIB / 3,
            }
        );
    }

    #[test]
    fn test_exact_fit_skips() {
        let p = ProblemDescriptor::new(Variant::Real32, 16, 16);
        let limits = MemoryLimits {
            global_mem: 3 * 1024,
            max_alloc: 1024,
        };
        assert_eq!(required_bytes(&p), 1024);
        assert!(!check(limits, &p).is_run());
    }

    #[test]
    fn test_required_bytes_saturates() {
        let p = ProblemDescriptor::new(Variant::Complex64, usize::MAX, usize::MAX);
        assert_eq!(required_bytes(&p), u64::MAX);
    }
}
