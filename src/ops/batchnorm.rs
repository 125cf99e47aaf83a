//! Batch normalization (forward) operation signature
//!
//! Rank-4 input normalized over three reduction dimensions, leaving one
//! channel dimension of scale/bias/statistics. The saved mean and inverse
//! variance are written out alongside the normalized result, and running
//! statistics are blended with `average_factor`.

use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::instance::{Element, Operation, OperationSignature};
use crate::memory::DeviceBuffer;

/// Tensor rank of the batchnorm signature
pub const RANK: usize = 4;
/// Number of dimensions reduced over
pub const NUM_REDUCE_DIMS: usize = 3;

/// Shapes, strides and scalar parameters of one batchnorm invocation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BatchNormFwdProblem {
    /// Input/output tensor lengths
    pub lengths: [u32; RANK],
    /// Input/output tensor strides
    pub strides: [u32; RANK],
    /// Dimensions reduced over; the remaining one is the channel dim
    pub reduce_dims: [usize; NUM_REDUCE_DIMS],
    /// Variance stabilizer
    pub epsilon: f64,
    /// Blend factor for the running mean/variance update
    pub average_factor: f64,
}

impl BatchNormFwdProblem {
    /// Packed problem reducing over the leading three dimensions
    #[must_use]
    pub fn new(lengths: [u32; RANK]) -> Self {
        let mut strides = [1u32; RANK];
        for dim in (0..RANK - 1).rev() {
            strides[dim] = strides[dim + 1] * lengths[dim + 1];
        }
        Self {
            lengths,
            strides,
            reduce_dims: [0, 1, 2],
            epsilon: f64::from(f32::EPSILON),
            average_factor: 0.1,
        }
    }

    /// Total number of input elements
    #[must_use]
    pub fn element_count(&self) -> u64 {
        self.lengths.iter().map(|&l| u64::from(l)).product()
    }

    /// Length of the non-reduced (channel) dimension
    #[must_use]
    pub fn channel_count(&self) -> u32 {
        let channel_dim = (0..RANK)
            .find(|dim| !self.reduce_dims.contains(dim))
            .unwrap_or(RANK - 1);
        self.lengths[channel_dim]
    }

    /// Number of elements reduced into each channel statistic
    #[must_use]
    pub fn reduce_count(&self) -> u64 {
        let channels = u64::from(self.channel_count()).max(1);
        self.element_count() / channels
    }
}

/// Device buffers of one batchnorm invocation
#[derive(Debug)]
pub struct BatchNormFwdBuffers {
    /// Input tensor
    pub x: DeviceBuffer,
    /// Normalized output tensor
    pub y: DeviceBuffer,
    /// Per-channel scale
    pub scale: DeviceBuffer,
    /// Per-channel bias
    pub bias: DeviceBuffer,
    /// Per-channel running mean, updated in place
    pub mean: DeviceBuffer,
    /// Per-channel running inverse variance, updated in place
    pub inv_variance: DeviceBuffer,
}

/// Batchnorm forward operation signature for element type `E`
pub struct BatchNormFwd<E: Element>(PhantomData<E>);

impl<E: Element> Operation for BatchNormFwd<E> {
    type Problem = BatchNormFwdProblem;
    type Buffers = BatchNormFwdBuffers;

    fn signature() -> OperationSignature {
        OperationSignature {
            kind: "batchnorm_fwd".to_string(),
            element: E::DATA_TYPE,
            rank: RANK as u32,
            num_reduce_dims: NUM_REDUCE_DIMS as u32,
        }
    }

    fn bytes_moved(problem: &BatchNormFwdProblem) -> u64 {
        let element = E::DATA_TYPE.size_of() as u64;
        // channel-wise params and statistics are kept in single precision
        let accum = std::mem::size_of::<f32>() as u64;
        let xy = problem.element_count();
        let channels = u64::from(problem.channel_count());
        xy * 2 * element + channels * 4 * accum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::DataType;

    #[test]
    fn test_packed_strides() {
        let p = BatchNormFwdProblem::new([16, 8, 128, 256]);
        assert_eq!(p.strides, [8 * 128 * 256, 128 * 256, 256, 1]);
    }

    #[test]
    fn test_channel_and_reduce_counts() {
        let p = BatchNormFwdProblem::new([16, 8, 128, 256]);
        assert_eq!(p.channel_count(), 256);
        assert_eq!(p.reduce_count(), 16 * 8 * 128);
        assert_eq!(p.element_count(), 16 * 8 * 128 * 256);
    }

    #[test]
    fn test_signature() {
        let sig = BatchNormFwd::<half::bf16>::signature();
        assert_eq!(sig.kind, "batchnorm_fwd");
        assert_eq!(sig.element, DataType::BF16);
        assert_eq!(sig.rank, 4);
        assert_eq!(sig.num_reduce_dims, 3);
    }

    #[test]
    fn test_bytes_moved() {
        let p = BatchNormFwdProblem::new([2, 2, 2, 4]);
        // f32: 32 elements * 2 directions * 4 bytes + 4 channels * 4 params * 4 bytes
        assert_eq!(BatchNormFwd::<f32>::bytes_moved(&p), 32 * 2 * 4 + 4 * 4 * 4);
    }
}
