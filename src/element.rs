//! Numeric element kinds
//!
//! The harness runs the same protocol over a closed set of four element
//! types. Each kind carries its variant tag, operation-cost factor and
//! precision requirement as associated constants, so the per-kind choices are
//! made when the generic case is instantiated rather than by branching at run
//! time.

use std::fmt;

use bytemuck::Pod;
use num_complex::{Complex32, Complex64};
use num_traits::Num;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Numeric variant of a SYRK case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    /// Real single precision (SSYRK)
    Real32,
    /// Real double precision (DSYRK)
    Real64,
    /// Complex single precision (CSYRK)
    Complex32,
    /// Complex double precision (ZSYRK)
    Complex64,
}

impl Variant {
    /// All variants in BLAS prefix order (s, d, c, z)
    pub const ALL: [Variant; 4] = [
        Variant::Real32,
        Variant::Real64,
        Variant::Complex32,
        Variant::Complex64,
    ];

    /// Size of one element in bytes
    #[must_use]
    pub fn element_size(self) -> usize {
        match self {
            Self::Real32 => 4,
            Self::Real64 | Self::Complex32 => 8,
            Self::Complex64 => 16,
        }
    }

    /// Real multiply/add operations per element-pair operation
    ///
    /// A complex multiply-accumulate costs four real multiplications.
    #[must_use]
    pub fn op_factor(self) -> u64 {
        match self {
            Self::Real32 | Self::Real64 => 1,
            Self::Complex32 | Self::Complex64 => 4,
        }
    }

    /// Whether the device must support native fp64
    #[must_use]
    pub fn requires_double(self) -> bool {
        matches!(self, Self::Real64 | Self::Complex64)
    }

    /// BLAS routine name
    #[must_use]
    pub fn routine(self) -> &'static str {
        match self {
            Self::Real32 => "ssyrk",
            Self::Real64 => "dsyrk",
            Self::Complex32 => "csyrk",
            Self::Complex64 => "zsyrk",
        }
    }

    /// Parse a variant from its name or BLAS routine name
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "real32" | "f32" | "s" | "ssyrk" => Some(Self::Real32),
            "real64" | "f64" | "d" | "dsyrk" => Some(Self::Real64),
            "complex32" | "c32" | "c" | "csyrk" => Some(Self::Complex32),
            "complex64" | "c64" | "z" | "zsyrk" => Some(Self::Complex64),
            _ => None,
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.routine())
    }
}

/// Scalar multiplier as given in a problem descriptor
///
/// The imaginary part is ignored by real variants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Multiplier {
    /// Real part
    pub re: f64,
    /// Imaginary part
    #[serde(default)]
    pub im: f64,
}

impl Multiplier {
    /// Create a multiplier
    #[must_use]
    pub const fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    /// Real multiplier with zero imaginary part
    #[must_use]
    pub const fn real(re: f64) -> Self {
        Self { re, im: 0.0 }
    }
}

impl From<f64> for Multiplier {
    fn from(re: f64) -> Self {
        Self::real(re)
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
    impl Sealed for super::Complex32 {}
    impl Sealed for super::Complex64 {}
}

/// Element type of a SYRK case
///
/// Implemented for `f32`, `f64`, `Complex32` and `Complex64` only.
pub trait Element: Num + Pod + Send + Sync + fmt::Debug + sealed::Sealed + 'static {
    /// Runtime tag of this kind
    const VARIANT: Variant;
    /// Operation-cost factor used for throughput figures
    const OP_FACTOR: u64;
    /// Whether this kind needs native fp64 on the device
    const REQUIRES_DOUBLE: bool;
    /// Whether the SYRK kernel for this kind consumes alpha and beta
    ///
    /// Kinds that do not are run with identity multipliers.
    const HONORS_SCALARS: bool = true;

    /// Convert a descriptor multiplier to this element type
    fn from_multiplier(m: Multiplier) -> Self;

    /// Uniform random element with every component in `[-1, 1)`
    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self;
}

impl Element for f32 {
    const VARIANT: Variant = Variant::Real32;
    const OP_FACTOR: u64 = 1;
    const REQUIRES_DOUBLE: bool = false;

    fn from_multiplier(m: Multiplier) -> Self {
        m.re as f32
    }

    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        rng.gen_range(-1.0..1.0)
    }
}

impl Element for f64 {
    const VARIANT: Variant = Variant::Real64;
    const OP_FACTOR: u64 = 1;
    const REQUIRES_DOUBLE: bool = true;

    fn from_multiplier(m: Multiplier) -> Self {
        m.re
    }

    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        rng.gen_range(-1.0..1.0)
    }
}

impl Element for Complex32 {
    const VARIANT: Variant = Variant::Complex32;
    const OP_FACTOR: u64 = 4;
    const REQUIRES_DOUBLE: bool = false;

    fn from_multiplier(m: Multiplier) -> Self {
        Complex32::new(m.re as f32, m.im as f32)
    }

    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Complex32::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0))
    }
}

impl Element for Complex64 {
    const VARIANT: Variant = Variant::Complex64;
    const OP_FACTOR: u64 = 4;
    const REQUIRES_DOUBLE: bool = true;

    fn from_multiplier(m: Multiplier) -> Self {
        Complex64::new(m.re, m.im)
    }

    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Complex64::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0))
    }
}
