//! Concrete operation signatures
//!
//! Each submodule defines one operation's problem and buffer types and its
//! [`crate::instance::Operation`] impl. Kernel instances for these
//! signatures live with their backend (see [`crate::host`] for the CPU
//! reference set).

pub mod batchnorm;
pub mod gemm;

pub use batchnorm::{BatchNormFwd, BatchNormFwdBuffers, BatchNormFwdProblem};
pub use gemm::{Gemm, GemmBuffers, GemmProblem};
