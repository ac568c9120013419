//! Reference ("etalon") SYRK on the host
//!
//! The baseline the device path is timed against. [`HostSyrk`] is the built-in
//! implementation; any other library can be plugged in through [`Baseline`].

use rayon::prelude::*;

use crate::element::Element;
use crate::error::{HarnessError, Result};
use crate::problem::{index, SyrkShape, Uplo};

/// A host-side SYRK implementation the device is compared against
pub trait Baseline {
    /// Name used in logs and reports
    fn name(&self) -> &str;

    /// Compute `C := alpha * op(A) * op(A)^T + beta * C` on the `shape.uplo` triangle
    ///
    /// # Errors
    ///
    /// Returns an error if `a` or `c` is too short for `shape`.
    fn syrk<T: Element>(
        &self,
        shape: &SyrkShape,
        alpha: T,
        a: &[T],
        beta: T,
        c: &mut [T],
    ) -> Result<()>;
}

/// Built-in host SYRK, parallel over rows of C
#[derive(Debug, Clone, Copy, Default)]
pub struct HostSyrk;

impl HostSyrk {
    /// The baseline linked into this build, if any
    ///
    /// `None` when the crate is built without the `etalon` feature; every
    /// device time is then accepted as there is nothing to compare against.
    #[must_use]
    pub fn linked() -> Option<Self> {
        if cfg!(feature = "etalon") {
            Some(Self)
        } else {
            None
        }
    }
}

impl Baseline for HostSyrk {
    fn name(&self) -> &str {
        "host"
    }

    fn syrk<T: Element>(
        &self,
        shape: &SyrkShape,
        alpha: T,
        a: &[T],
        beta: T,
        c: &mut [T],
    ) -> Result<()> {
        check_extents(shape, a.len(), c.len())?;
        syrk(shape, alpha, a, beta, c);
        Ok(())
    }
}

/// Verify that buffers of `a_len` and `c_len` elements cover `shape`
///
/// # Errors
///
/// Returns `HarnessError::InvalidProblem` naming the short buffer.
pub fn check_extents(shape: &SyrkShape, a_len: usize, c_len: usize) -> Result<()> {
    if a_len < shape.a_extent() {
        return Err(HarnessError::InvalidProblem {
            reason: format!("A holds {} elements, needs {}", a_len, shape.a_extent()),
        });
    }
    if c_len < shape.c_extent() {
        return Err(HarnessError::InvalidProblem {
            reason: format!("C holds {} elements, needs {}", c_len, shape.c_extent()),
        });
    }
    Ok(())
}

/// Unchecked SYRK kernel shared by [`HostSyrk`] and the simulated device
///
/// Elements outside the `shape.uplo` triangle and the leading-dimension
/// padding are left untouched.
///
/// # Panics
///
/// Panics if `a` or `c` is shorter than `shape` requires.
pub fn syrk<T: Element>(shape: &SyrkShape, alpha: T, a: &[T], beta: T, c: &mut [T]) {
    let (n, k) = (shape.n, shape.k);

    // op(A) gathered densely, one row of length K per row of C
    let op_a: Vec<T> = (0..n * k)
        .map(|idx| a[shape.op_a_index(idx / k, idx % k)])
        .collect();

    let rows: Vec<Vec<T>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let ai = &op_a[i * k..(i + 1) * k];
            triangle_cols(shape.uplo, n, i)
                .map(|j| {
                    let aj = &op_a[j * k..(j + 1) * k];
                    ai.iter()
                        .zip(aj)
                        .fold(T::zero(), |acc, (&x, &y)| acc + x * y)
                })
                .collect()
        })
        .collect();

    for (i, row) in rows.into_iter().enumerate() {
        for (j, acc) in triangle_cols(shape.uplo, n, i).zip(row) {
            let idx = index(shape.order, shape.ldc, i, j);
            c[idx] = alpha * acc + beta * c[idx];
        }
    }
}

fn triangle_cols(uplo: Uplo, n: usize, row: usize) -> std::ops::Range<usize> {
    match uplo {
        Uplo::Upper => row..n,
        Uplo::Lower => 0..row + 1,
    }
}
