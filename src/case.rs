//! One SYRK test case: data staging and the two timers
//!
//! A case owns three host arrays (A, C and an untouched backup of C) and the
//! two device mirrors. Both timers start from the backup, so the reference and
//! device runs, and any repetition of either, see identical input.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::device::{Access, DeviceBackend, SyrkCall};
use crate::element::{Element, Multiplier};
use crate::error::{DeviceStatus, DeviceStep, HarnessError, Result};
use crate::problem::{index, Order, ProblemDescriptor};
use crate::reference::Baseline;

/// Result of a reference run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timing {
    /// The reference ran and took this long
    Elapsed(Duration),
    /// The reference cannot run this case in the current configuration
    NotApplicable,
    /// No reference is linked; any device time is acceptable
    Unbounded,
}

impl Timing {
    /// Measured duration, if the reference ran
    #[must_use]
    pub fn elapsed(self) -> Option<Duration> {
        match self {
            Self::Elapsed(d) => Some(d),
            Self::NotApplicable | Self::Unbounded => None,
        }
    }

    /// Keep the faster of two measurements; sentinels win over durations
    #[must_use]
    pub fn best(self, other: Self) -> Self {
        match (self, other) {
            (Self::Elapsed(a), Self::Elapsed(b)) => Self::Elapsed(a.min(b)),
            (Self::Elapsed(_), sentinel) | (sentinel, _) => sentinel,
        }
    }
}

/// Host and device state of one SYRK case
pub struct SyrkCase<'d, T: Element, D: DeviceBackend> {
    device: &'d D,
    problem: ProblemDescriptor,
    alpha: T,
    beta: T,
    a: Vec<T>,
    c: Vec<T>,
    c_backup: Vec<T>,
    a_dev: Option<D::Buffer>,
    c_dev: Option<D::Buffer>,
}

impl<'d, T: Element, D: DeviceBackend> SyrkCase<'d, T, D> {
    /// Allocate host buffers for `problem`
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::InvalidProblem` if the descriptor is invalid or
    /// its variant does not match `T`, and `HarnessError::Setup` without
    /// touching host memory if either device buffer would exceed the
    /// device's allocation limit.
    pub fn new(device: &'d D, problem: ProblemDescriptor) -> Result<Self> {
        problem.validate()?;
        if problem.variant != T::VARIANT {
            return Err(HarnessError::InvalidProblem {
                reason: format!(
                    "descriptor is {} but the case was instantiated for {}",
                    problem.variant,
                    T::VARIANT
                ),
            });
        }
        let max_alloc = device.max_alloc_size();
        for (buffer, bytes) in [("A", problem.a_buffer_bytes()), ("C", problem.c_buffer_bytes())] {
            let bytes = bytes.unwrap_or(usize::MAX);
            if bytes as u64 > max_alloc {
                return Err(setup_failure(buffer, bytes, DeviceStatus::INVALID_BUFFER_SIZE));
            }
        }
        let a_len = problem.a_len();
        let c_len = problem.c_len();
        Ok(Self {
            device,
            alpha: T::one(),
            beta: T::one(),
            a: vec![T::zero(); a_len],
            c: vec![T::zero(); c_len],
            c_backup: vec![T::zero(); c_len],
            a_dev: None,
            c_dev: None,
            problem,
        })
    }

    /// Fill A and C with random values and upload both to the device
    ///
    /// Only the logical region of each matrix is randomized; leading-dimension
    /// padding stays zero.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Setup` if the device rejects a buffer.
    pub fn prepare(&mut self, seed: u64) -> Result<()> {
        let mut rng = StdRng::seed_from_u64(seed);
        let p = &self.problem;

        self.alpha = stage_scalar(T::HONORS_SCALARS, self.device.use_alpha(), p.alpha, &mut rng);
        self.beta = stage_scalar(T::HONORS_SCALARS, self.device.use_beta(), p.beta, &mut rng);

        let (rows, cols) = p.a_shape();
        fill_random(&mut self.a, p.order, p.lda, rows, cols, &mut rng);
        fill_random(&mut self.c, p.order, p.ldc, p.n, p.n, &mut rng);
        self.c_backup.copy_from_slice(&self.c);

        let size = std::mem::size_of::<T>();
        let a_dev = self
            .device
            .create_buffer(bytemuck::cast_slice(&self.a), p.off_a * size, Access::ReadOnly)
            .map_err(|status| {
                setup_failure("A", p.a_buffer_bytes().unwrap_or(usize::MAX), status)
            })?;
        self.a_dev = Some(a_dev);

        let c_dev = self
            .device
            .create_buffer(
                bytemuck::cast_slice(&self.c_backup),
                p.off_c * size,
                Access::ReadWrite,
            )
            .map_err(|status| {
                setup_failure("C", p.c_buffer_bytes().unwrap_or(usize::MAX), status)
            })?;
        self.c_dev = Some(c_dev);

        debug!(case = %self.problem, "case prepared");
        Ok(())
    }

    /// Time the reference implementation
    ///
    /// C is restored from the backup first. Device state is not touched.
    ///
    /// # Errors
    ///
    /// Returns the baseline's error if it rejects the call.
    pub fn time_reference<B: Baseline>(
        &mut self,
        baseline: Option<&B>,
        allow_row_major: bool,
    ) -> Result<Timing> {
        if self.problem.order == Order::RowMajor && !allow_row_major {
            warn!(case = %self.problem, "row major order is not allowed for the reference run");
            return Ok(Timing::NotApplicable);
        }

        self.c.copy_from_slice(&self.c_backup);

        let Some(baseline) = baseline else {
            return Ok(Timing::Unbounded);
        };

        let shape = self.problem.shape();
        let start = Instant::now();
        baseline.syrk(&shape, self.alpha, &self.a, self.beta, &mut self.c)?;
        let elapsed = start.elapsed();
        debug!(baseline = baseline.name(), ?elapsed, "reference run");
        Ok(Timing::Elapsed(elapsed))
    }

    /// Time the device kernel
    ///
    /// The backup of C is uploaded and the upload awaited before the kernel
    /// is enqueued, so transfer time is never counted. The clock runs from
    /// just after the flush until the kernel's completion event.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::Device` naming the first failing step.
    pub fn time_device(&mut self) -> Result<Duration> {
        let device = self.device;
        let queue = device.command_queues().first().ok_or(HarnessError::NoQueue)?;
        let queues = std::slice::from_ref(queue);
        let (Some(a_dev), Some(c_dev)) = (self.a_dev.as_ref(), self.c_dev.as_ref()) else {
            return Err(HarnessError::NotPrepared("device buffers are missing"));
        };
        let size = std::mem::size_of::<T>();

        let upload = device
            .enqueue_write(
                queue,
                c_dev,
                self.problem.off_c * size,
                bytemuck::cast_slice(&self.c_backup),
            )
            .map_err(|status| device_failure(DeviceStep::WriteBuffer, status))?;
        device
            .wait_for_events(std::slice::from_ref(&upload))
            .map_err(|status| device_failure(DeviceStep::WaitUpload, status))?;

        let call = SyrkCall {
            shape: self.problem.shape(),
            alpha: self.alpha,
            a: a_dev,
            off_a: self.problem.off_a,
            beta: self.beta,
            c: c_dev,
            off_c: self.problem.off_c,
        };
        let done = device
            .enqueue_syrk(&call, queues, &[])
            .map_err(|status| device_failure(DeviceStep::Enqueue, status))?;
        device
            .flush(queues)
            .map_err(|status| device_failure(DeviceStep::Flush, status))?;

        let start = Instant::now();
        device
            .wait_for_finish(queues, &done)
            .map_err(|status| device_failure(DeviceStep::Finish, status))?;
        Ok(start.elapsed())
    }

    /// Staged multipliers `(alpha, beta)`
    #[must_use]
    pub fn scalars(&self) -> (T, T) {
        (self.alpha, self.beta)
    }

    /// Host copy of A
    #[must_use]
    pub fn a(&self) -> &[T] {
        &self.a
    }

    /// Working host copy of C, as left by the last reference run
    #[must_use]
    pub fn c(&self) -> &[T] {
        &self.c
    }

    /// Untouched backup of C
    #[must_use]
    pub fn c_backup(&self) -> &[T] {
        &self.c_backup
    }

    /// Device mirror of A, once prepared
    #[must_use]
    pub fn device_a(&self) -> Option<&D::Buffer> {
        self.a_dev.as_ref()
    }

    /// Device mirror of C, once prepared
    #[must_use]
    pub fn device_c(&self) -> Option<&D::Buffer> {
        self.c_dev.as_ref()
    }
}

/// Multiplier handed to both kernels
///
/// `honors` is the element kind's `HONORS_SCALARS`; `active` is the device's
/// view of the same multiplier.
fn stage_scalar<T: Element>(honors: bool, active: bool, given: Multiplier, rng: &mut StdRng) -> T {
    if !honors {
        return T::one();
    }
    if active {
        return T::from_multiplier(given);
    }
    let value = T::random(rng);
    if value.is_zero() {
        T::one()
    } else {
        value
    }
}

fn fill_random<T: Element>(
    data: &mut [T],
    order: Order,
    ld: usize,
    rows: usize,
    cols: usize,
    rng: &mut StdRng,
) {
    for col in 0..cols {
        for row in 0..rows {
            data[index(order, ld, row, col)] = T::random(rng);
        }
    }
}

fn setup_failure(buffer: &'static str, bytes: usize, status: DeviceStatus) -> HarnessError {
    error!(buffer, bytes, %status, "device buffer creation failed after the resource check passed");
    HarnessError::Setup {
        buffer,
        bytes,
        status,
    }
}

fn device_failure(step: DeviceStep, status: DeviceStatus) -> HarnessError {
    error!(%step, %status, "device call failed");
    HarnessError::Device { step, status }
}
