//! GEMM operation signature
//!
//! Row-major `C[M,N] = A[M,K] @ B[K,N]`, optionally split across the
//! reduction dimension into `k_batch` partial products.

use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::instance::{Element, Operation, OperationSignature};
use crate::memory::DeviceBuffer;

/// Shapes and strides of one GEMM invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GemmProblem {
    /// Rows of A and C
    pub m: u32,
    /// Columns of B and C
    pub n: u32,
    /// Columns of A, rows of B
    pub k: u32,
    /// Leading stride of A (row-major: elements per row)
    pub stride_a: u32,
    /// Leading stride of B
    pub stride_b: u32,
    /// Leading stride of C
    pub stride_c: u32,
    /// Number of reduction-dimension splits (1 = no split)
    pub k_batch: u32,
}

impl GemmProblem {
    /// Packed row-major problem with no reduction split
    #[must_use]
    pub fn new(m: u32, n: u32, k: u32) -> Self {
        Self {
            m,
            n,
            k,
            stride_a: k,
            stride_b: n,
            stride_c: n,
            k_batch: 1,
        }
    }

    /// Override the leading strides
    #[must_use]
    pub fn with_strides(mut self, stride_a: u32, stride_b: u32, stride_c: u32) -> Self {
        self.stride_a = stride_a;
        self.stride_b = stride_b;
        self.stride_c = stride_c;
        self
    }

    /// Split the reduction dimension into `k_batch` partial products
    #[must_use]
    pub fn with_k_batch(mut self, k_batch: u32) -> Self {
        self.k_batch = k_batch;
        self
    }

    /// Whether the strides are the packed row-major defaults
    #[must_use]
    pub fn is_packed(&self) -> bool {
        self.stride_a == self.k && self.stride_b == self.n && self.stride_c == self.n
    }
}

/// Device buffers of one GEMM invocation
#[derive(Debug)]
pub struct GemmBuffers {
    /// Left operand, `m` x `k`
    pub a: DeviceBuffer,
    /// Right operand, `k` x `n`
    pub b: DeviceBuffer,
    /// Output, `m` x `n`
    pub c: DeviceBuffer,
}

/// GEMM operation signature for element type `E`
pub struct Gemm<E: Element>(PhantomData<E>);

impl<E: Element> Operation for Gemm<E> {
    type Problem = GemmProblem;
    type Buffers = GemmBuffers;

    fn signature() -> OperationSignature {
        OperationSignature {
            kind: "gemm".to_string(),
            element: E::DATA_TYPE,
            rank: 2,
            num_reduce_dims: 1,
        }
    }

    fn bytes_moved(problem: &GemmProblem) -> u64 {
        let element = E::DATA_TYPE.size_of() as u64;
        let m = u64::from(problem.m);
        let n = u64::from(problem.n);
        let k = u64::from(problem.k);
        element * (m * k + k * n + m * n)
    }
}
