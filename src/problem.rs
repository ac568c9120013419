//! SYRK problem descriptor
//!
//! One immutable value per test case: dimensions, storage layout, offsets and
//! multipliers. The descriptor knows how large the host arrays must be and
//! validates the leading dimensions against the layout.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::element::{Multiplier, Variant};
use crate::error::{HarnessError, Result};

/// Matrix storage order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Order {
    /// Consecutive elements of a row are adjacent
    RowMajor,
    /// Consecutive elements of a column are adjacent
    ColumnMajor,
}

/// Triangle of C that the update touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Uplo {
    /// Upper triangle including the diagonal
    Upper,
    /// Lower triangle including the diagonal
    Lower,
}

/// Whether A enters the update as stored or transposed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transpose {
    /// `C := alpha * A * A^T + beta * C`, A is N×K
    NoTrans,
    /// `C := alpha * A^T * A + beta * C`, A is K×N
    Trans,
}

/// Position of element (row, col) in a matrix stored with leading dimension `ld`
#[inline]
#[must_use]
pub fn index(order: Order, ld: usize, row: usize, col: usize) -> usize {
    match order {
        Order::ColumnMajor => col * ld + row,
        Order::RowMajor => row * ld + col,
    }
}

/// Minimum leading dimension for a `rows × cols` matrix
#[must_use]
pub fn min_ld(order: Order, rows: usize, cols: usize) -> usize {
    match order {
        Order::ColumnMajor => rows.max(1),
        Order::RowMajor => cols.max(1),
    }
}

/// Number of elements a `rows × cols` matrix occupies with leading dimension `ld`
///
/// `None` if the count does not fit in `usize`.
#[must_use]
pub fn checked_storage_len(order: Order, ld: usize, rows: usize, cols: usize) -> Option<usize> {
    match order {
        Order::ColumnMajor => ld.checked_mul(cols),
        Order::RowMajor => ld.checked_mul(rows),
    }
}

/// Saturating form of [`checked_storage_len`]
#[must_use]
pub fn storage_len(order: Order, ld: usize, rows: usize, cols: usize) -> usize {
    checked_storage_len(order, ld, rows, cols).unwrap_or(usize::MAX)
}

/// Bytes of a device buffer holding `len` elements after `offset` elements
///
/// `None` if the size overflows or exceeds what a single allocation can
/// address.
#[must_use]
pub fn buffer_bytes(offset: usize, len: usize, element_size: usize) -> Option<usize> {
    offset
        .checked_add(len)?
        .checked_mul(element_size)
        .filter(|&bytes| isize::try_from(bytes).is_ok())
}

/// Geometry of a SYRK call, shared by the device and host kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyrkShape {
    /// Storage order
    pub order: Order,
    /// Updated triangle
    pub uplo: Uplo,
    /// Transpose flag for A
    pub trans: Transpose,
    /// Order of C
    pub n: usize,
    /// Reduction dimension
    pub k: usize,
    /// Leading dimension of A
    pub lda: usize,
    /// Leading dimension of C
    pub ldc: usize,
}

impl SyrkShape {
    /// Position of `op(A)[i][l]` in the stored A
    #[inline]
    #[must_use]
    pub fn op_a_index(&self, i: usize, l: usize) -> usize {
        match self.trans {
            Transpose::NoTrans => index(self.order, self.lda, i, l),
            Transpose::Trans => index(self.order, self.lda, l, i),
        }
    }

    /// Elements of A the kernel may touch, counted from the offset
    #[must_use]
    pub fn a_extent(&self) -> usize {
        let (rows, cols) = match self.trans {
            Transpose::NoTrans => (self.n, self.k),
            Transpose::Trans => (self.k, self.n),
        };
        storage_len(self.order, self.lda, rows, cols)
    }

    /// Elements of C the kernel may touch, counted from the offset
    #[must_use]
    pub fn c_extent(&self) -> usize {
        storage_len(self.order, self.ldc, self.n, self.n)
    }
}

/// Description of one SYRK test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemDescriptor {
    /// Numeric variant
    pub variant: Variant,
    /// Storage order of A and C
    pub order: Order,
    /// Updated triangle of C
    pub uplo: Uplo,
    /// Transpose flag for A
    pub trans: Transpose,
    /// Order of C
    pub n: usize,
    /// Reduction dimension
    pub k: usize,
    /// Leading dimension of A
    pub lda: usize,
    /// Leading dimension of C
    pub ldc: usize,
    /// Offset of A in the device buffer, in elements
    #[serde(default)]
    pub off_a: usize,
    /// Offset of C in the device buffer, in elements
    #[serde(default)]
    pub off_c: usize,
    /// Multiplier of the rank-k product
    pub alpha: Multiplier,
    /// Multiplier of the existing C
    pub beta: Multiplier,
}

impl ProblemDescriptor {
    /// Column-major, upper, non-transposed case with tight leading dimensions
    #[must_use]
    pub fn new(variant: Variant, n: usize, k: usize) -> Self {
        Self {
            variant,
            order: Order::ColumnMajor,
            uplo: Uplo::Upper,
            trans: Transpose::NoTrans,
            n,
            k,
            lda: min_ld(Order::ColumnMajor, n, k),
            ldc: n.max(1),
            off_a: 0,
            off_c: 0,
            alpha: Multiplier::real(1.0),
            beta: Multiplier::real(1.0),
        }
    }

    /// Set the storage order, re-deriving tight leading dimensions
    #[must_use]
    pub fn with_order(mut self, order: Order) -> Self {
        self.order = order;
        self.fit_leading_dims();
        self
    }

    /// Set the triangle
    #[must_use]
    pub fn with_uplo(mut self, uplo: Uplo) -> Self {
        self.uplo = uplo;
        self
    }

    /// Set the transpose flag, re-deriving tight leading dimensions
    #[must_use]
    pub fn with_trans(mut self, trans: Transpose) -> Self {
        self.trans = trans;
        self.fit_leading_dims();
        self
    }

    /// Set explicit leading dimensions
    #[must_use]
    pub fn with_leading_dims(mut self, lda: usize, ldc: usize) -> Self {
        self.lda = lda;
        self.ldc = ldc;
        self
    }

    /// Set element offsets into the device buffers
    #[must_use]
    pub fn with_offsets(mut self, off_a: usize, off_c: usize) -> Self {
        self.off_a = off_a;
        self.off_c = off_c;
        self
    }

    /// Set the multipliers
    #[must_use]
    pub fn with_scalars(mut self, alpha: impl Into<Multiplier>, beta: impl Into<Multiplier>) -> Self {
        self.alpha = alpha.into();
        self.beta = beta.into();
        self
    }

    fn fit_leading_dims(&mut self) {
        let (rows, cols) = self.a_shape();
        self.lda = min_ld(self.order, rows, cols);
        self.ldc = min_ld(self.order, self.n, self.n);
    }

    /// Kernel geometry of this case
    #[must_use]
    pub fn shape(&self) -> SyrkShape {
        SyrkShape {
            order: self.order,
            uplo: self.uplo,
            trans: self.trans,
            n: self.n,
            k: self.k,
            lda: self.lda,
            ldc: self.ldc,
        }
    }

    /// Logical shape of A as stored, `(rows, cols)`
    #[must_use]
    pub fn a_shape(&self) -> (usize, usize) {
        match self.trans {
            Transpose::NoTrans => (self.n, self.k),
            Transpose::Trans => (self.k, self.n),
        }
    }

    fn checked_a_len(&self) -> Option<usize> {
        let (rows, cols) = self.a_shape();
        checked_storage_len(self.order, self.lda, rows, cols)
    }

    fn checked_c_len(&self) -> Option<usize> {
        checked_storage_len(self.order, self.ldc, self.n, self.n)
    }

    /// Element count of the host copy of A
    ///
    /// Saturates for descriptors that fail [`validate`](Self::validate).
    #[must_use]
    pub fn a_len(&self) -> usize {
        self.checked_a_len().unwrap_or(usize::MAX)
    }

    /// Element count of the host copy of C
    ///
    /// Saturates for descriptors that fail [`validate`](Self::validate).
    #[must_use]
    pub fn c_len(&self) -> usize {
        self.checked_c_len().unwrap_or(usize::MAX)
    }

    /// Bytes of the device buffer for A, offset included
    #[must_use]
    pub fn a_buffer_bytes(&self) -> Option<usize> {
        buffer_bytes(self.off_a, self.checked_a_len()?, self.variant.element_size())
    }

    /// Bytes of the device buffer for C, offset included
    #[must_use]
    pub fn c_buffer_bytes(&self) -> Option<usize> {
        buffer_bytes(self.off_c, self.checked_c_len()?, self.variant.element_size())
    }

    /// `N * N * K`, the operation count before the cost factor
    #[must_use]
    pub fn problem_size(&self) -> u64 {
        (self.n as u64)
            .saturating_mul(self.n as u64)
            .saturating_mul(self.k as u64)
    }

    /// Check dimensions and leading dimensions
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::InvalidProblem` when N or K is zero, a leading
    /// dimension is smaller than the layout requires, or a buffer size with
    /// its offset overflows.
    pub fn validate(&self) -> Result<()> {
        if self.n == 0 || self.k == 0 {
            return Err(HarnessError::InvalidProblem {
                reason: format!("N and K must be positive, got N={} K={}", self.n, self.k),
            });
        }
        let (rows, cols) = self.a_shape();
        let need_a = min_ld(self.order, rows, cols);
        if self.lda < need_a {
            return Err(HarnessError::InvalidProblem {
                reason: format!("lda {} is below the minimum {}", self.lda, need_a),
            });
        }
        if self.ldc < self.n {
            return Err(HarnessError::InvalidProblem {
                reason: format!("ldc {} is below the minimum {}", self.ldc, self.n),
            });
        }
        if self.a_buffer_bytes().is_none() {
            return Err(HarnessError::InvalidProblem {
                reason: format!(
                    "A with lda={} and offA={} does not fit in addressable memory",
                    self.lda, self.off_a
                ),
            });
        }
        if self.c_buffer_bytes().is_none() {
            return Err(HarnessError::InvalidProblem {
                reason: format!(
                    "C with ldc={} and offC={} does not fit in addressable memory",
                    self.ldc, self.off_c
                ),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ProblemDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:?} {:?} {:?} N={} K={} lda={} ldc={} offA={} offC={}",
            self.variant,
            self.order,
            self.uplo,
            self.trans,
            self.n,
            self.k,
            self.lda,
            self.ldc,
            self.off_a,
            self.off_c
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_tight_column_major() {
        let p = ProblemDescriptor::new(Variant::Real32, 8, 3);
        assert_eq!(p.lda, 8);
        assert_eq!(p.ldc, 8);
        assert_eq!(p.a_len(), 24);
        assert_eq!(p.c_len(), 64);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_trans_row_major_geometry() {
        let p = ProblemDescriptor::new(Variant::Real64, 6, 4)
            .with_order(Order::RowMajor)
            .with_trans(Transpose::Trans);
        // A is K×N = 4×6, row-major needs lda >= 6
        assert_eq!(p.a_shape(), (4, 6));
        assert_eq!(p.lda, 6);
        assert_eq!(p.a_len(), 24);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_padded_leading_dims_grow_storage() {
        let p = ProblemDescriptor::new(Variant::Complex32, 4, 2).with_leading_dims(10, 7);
        assert_eq!(p.a_len(), 20);
        assert_eq!(p.c_len(), 28);
    }

    #[test]
    fn test_validate_rejects_zero_and_short_ld() {
        assert!(ProblemDescriptor::new(Variant::Real32, 0, 4).validate().is_err());
        assert!(ProblemDescriptor::new(Variant::Real32, 4, 0).validate().is_err());
        let short_a = ProblemDescriptor::new(Variant::Real32, 4, 4).with_leading_dims(3, 4);
        assert!(matches!(
            short_a.validate(),
            Err(HarnessError::InvalidProblem { .. })
        ));
        let short_c = ProblemDescriptor::new(Variant::Real32, 4, 4).with_leading_dims(4, 3);
        assert!(short_c.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_overflowing_leading_dim() {
        let p = ProblemDescriptor::new(Variant::Real32, 2, 2)
            .with_leading_dims(usize::MAX / 2 + 1, 2);
        assert!(matches!(
            p.validate(),
            Err(HarnessError::InvalidProblem { .. })
        ));
        assert_eq!(p.a_len(), usize::MAX);
        assert!(p.a_buffer_bytes().is_none());
    }

    #[test]
    fn test_validate_rejects_overflowing_offset() {
        let p = ProblemDescriptor::new(Variant::Real64, 2, 2).with_offsets(usize::MAX / 4, 0);
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("offA"));

        let c = ProblemDescriptor::new(Variant::Complex64, 2, 2).with_offsets(0, usize::MAX - 1);
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_buffer_bytes_include_offset() {
        let p = ProblemDescriptor::new(Variant::Complex32, 4, 3).with_offsets(2, 5);
        assert_eq!(p.a_buffer_bytes(), Some((2 + 12) * 8));
        assert_eq!(p.c_buffer_bytes(), Some((5 + 16) * 8));
        assert_eq!(buffer_bytes(usize::MAX, 1, 1), None);
    }

    #[test]
    fn test_problem_size_saturates() {
        let p = ProblemDescriptor::new(Variant::Real32, usize::MAX, usize::MAX);
        assert_eq!(p.problem_size(), u64::MAX);
    }

    #[test]
    fn test_index_by_order() {
        assert_eq!(index(Order::ColumnMajor, 5, 2, 3), 17);
        assert_eq!(index(Order::RowMajor, 5, 2, 3), 13);
    }

    #[test]
    fn test_shape_extents_match_host_lengths() {
        let p = ProblemDescriptor::new(Variant::Real32, 5, 3)
            .with_trans(Transpose::Trans)
            .with_leading_dims(4, 9);
        let shape = p.shape();
        assert_eq!(shape.a_extent(), p.a_len());
        assert_eq!(shape.c_extent(), p.c_len());
        // op(A)[i][l] = A[l][i] for the transposed case
        assert_eq!(shape.op_a_index(2, 1), index(Order::ColumnMajor, 4, 1, 2));
    }

    #[test]
    fn test_problem_size_is_nnk() {
        let p = ProblemDescriptor::new(Variant::Real32, 512, 256);
        assert_eq!(p.problem_size(), 512 * 512 * 256);
    }

    #[test]
    fn test_descriptor_json_roundtrip_defaults_offsets() {
        let json = r#"{
            "variant": "complex64", "order": "row_major", "uplo": "lower",
            "trans": "trans", "n": 16, "k": 8, "lda": 16, "ldc": 16,
            "alpha": {"re": 1.0, "im": 0.5}, "beta": {"re": 0.0}
        }"#;
        let p: ProblemDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(p.off_a, 0);
        assert_eq!(p.beta.im, 0.0);
        assert_eq!(p.uplo, Uplo::Lower);
        assert!(p.validate().is_ok());
    }
}
