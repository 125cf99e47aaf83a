//! CPU reference batchnorm-forward instances
//!
//! Two interchangeable implementations of [`BatchNormFwd`]: a two-pass
//! mean/variance kernel and a single-pass Welford kernel. Both write the
//! normalized output and blend the running statistics buffers with the
//! problem's `average_factor`.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{ElegirError, Result};
use crate::host::HostChunk;
use crate::instance::{ArgumentHandle, Element, InstanceId, KernelInstance, StreamConfig};
use crate::ops::batchnorm::{BatchNormFwd, BatchNormFwdBuffers, BatchNormFwdProblem, RANK};
use crate::registry::StaticRegistry;

/// Bound argument shared by the host batchnorm instances
struct BoundBatchNorm {
    problem: BatchNormFwdProblem,
    x: Option<HostChunk>,
    y: Option<HostChunk>,
    scale: Option<HostChunk>,
    bias: Option<HostChunk>,
    mean: Option<HostChunk>,
    inv_variance: Option<HostChunk>,
}

impl BoundBatchNorm {
    fn bind(problem: &BatchNormFwdProblem, buffers: &BatchNormFwdBuffers) -> Self {
        Self {
            problem: *problem,
            x: buffers.x.downcast_ref::<HostChunk>().cloned(),
            y: buffers.y.downcast_ref::<HostChunk>().cloned(),
            scale: buffers.scale.downcast_ref::<HostChunk>().cloned(),
            bias: buffers.bias.downcast_ref::<HostChunk>().cloned(),
            mean: buffers.mean.downcast_ref::<HostChunk>().cloned(),
            inv_variance: buffers.inv_variance.downcast_ref::<HostChunk>().cloned(),
        }
    }

    fn host_backed(&self) -> bool {
        let p = &self.problem;
        let xy_words = p.element_count() as usize;
        let channel_words = p.channel_count() as usize;
        let fits = |chunk: &Option<HostChunk>, words: usize| {
            chunk.as_ref().is_some_and(|c| c.len_words() >= words)
        };
        fits(&self.x, xy_words)
            && fits(&self.y, xy_words)
            && fits(&self.scale, channel_words)
            && fits(&self.bias, channel_words)
            && fits(&self.mean, channel_words)
            && fits(&self.inv_variance, channel_words)
    }

    /// Channel-last layout reducing over the leading dims, packed strides
    fn supported_layout(&self) -> bool {
        let p = &self.problem;
        let mut packed = [1u32; RANK];
        for dim in (0..RANK - 1).rev() {
            packed[dim] = packed[dim + 1] * p.lengths[dim + 1];
        }
        p.reduce_dims == [0, 1, 2] && p.strides == packed
    }
}

fn elapsed_ms(start: Instant, stream: &StreamConfig) -> f32 {
    if stream.time_kernel {
        start.elapsed().as_secs_f32() * 1.0e3
    } else {
        0.0
    }
}

fn foreign_argument(id: &InstanceId) -> ElegirError {
    ElegirError::Launch {
        id: id.clone(),
        reason: "argument was bound by a different instance family".to_string(),
    }
}

/// Normalize and write outputs given per-channel statistics
#[allow(clippy::too_many_arguments)]
fn finalize<E: Element>(
    arg: &BoundBatchNorm,
    x: &[f32],
    y: &mut [f32],
    scale: &[f32],
    bias: &[f32],
    running_mean: &mut [f32],
    running_inv_var: &mut [f32],
    mean: &[f64],
    variance: &[f64],
) {
    let p = &arg.problem;
    let channels = p.channel_count() as usize;
    let elements = p.element_count() as usize;

    for (c, (&m, &v)) in mean.iter().zip(variance).enumerate() {
        let inv_var = 1.0 / (v + p.epsilon).sqrt();
        // running statistics blend toward the batch statistics
        let af = p.average_factor;
        running_mean[c] = ((1.0 - af) * f64::from(running_mean[c]) + af * m) as f32;
        running_inv_var[c] = ((1.0 - af) * f64::from(running_inv_var[c]) + af * inv_var) as f32;
    }

    for offset in 0..elements {
        let c = offset % channels;
        let inv_var = 1.0 / (variance[c] + p.epsilon).sqrt();
        let normalized = (f64::from(x[offset]) - mean[c]) * inv_var;
        let out = f64::from(scale[c]) * normalized + f64::from(bias[c]);
        y[offset] = E::from_f32(out as f32).to_f32();
    }
}

/// Two-pass batchnorm: mean, then variance, then normalize
pub struct NaiveBatchNormFwd<E: Element>(PhantomData<E>);

impl<E: Element> NaiveBatchNormFwd<E> {
    /// Create the two-pass instance
    #[must_use]
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<E: Element> Default for NaiveBatchNormFwd<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Element> KernelInstance<BatchNormFwd<E>> for NaiveBatchNormFwd<E> {
    fn bind_argument(
        &self,
        problem: &BatchNormFwdProblem,
        buffers: &BatchNormFwdBuffers,
    ) -> ArgumentHandle {
        ArgumentHandle::new(BoundBatchNorm::bind(problem, buffers))
    }

    fn is_supported(&self, argument: &ArgumentHandle) -> bool {
        argument
            .downcast_ref::<BoundBatchNorm>()
            .is_some_and(|arg| arg.host_backed() && arg.supported_layout())
    }

    fn run(&self, argument: &ArgumentHandle, stream: &StreamConfig) -> Result<f32> {
        let arg = argument
            .downcast_ref::<BoundBatchNorm>()
            .ok_or_else(|| foreign_argument(&self.instance_id()))?;
        let (Some(x), Some(y), Some(scale), Some(bias), Some(mean_buf), Some(inv_var_buf)) = (
            &arg.x,
            &arg.y,
            &arg.scale,
            &arg.bias,
            &arg.mean,
            &arg.inv_variance,
        ) else {
            return Err(foreign_argument(&self.instance_id()));
        };
        let p = &arg.problem;
        let channels = p.channel_count() as usize;
        let elements = p.element_count() as usize;
        let reduce = p.reduce_count() as f64;

        let start = Instant::now();
        let x = x.lock();
        let mut y = y.lock();
        let scale = scale.lock();
        let bias = bias.lock();
        let mut mean_buf = mean_buf.lock();
        let mut inv_var_buf = inv_var_buf.lock();

        let mut mean = vec![0.0f64; channels];
        for offset in 0..elements {
            mean[offset % channels] += f64::from(x[offset]);
        }
        for m in &mut mean {
            *m /= reduce;
        }

        let mut variance = vec![0.0f64; channels];
        for offset in 0..elements {
            let c = offset % channels;
            let d = f64::from(x[offset]) - mean[c];
            variance[c] += d * d;
        }
        for v in &mut variance {
            *v /= reduce;
        }

        finalize::<E>(
            arg,
            &x,
            &mut y,
            &scale,
            &bias,
            &mut mean_buf,
            &mut inv_var_buf,
            &mean,
            &variance,
        );
        Ok(elapsed_ms(start, stream))
    }

    fn instance_id(&self) -> InstanceId {
        InstanceId::new(format!("naive_batchnorm_fwd_{}", E::DATA_TYPE))
    }
}

/// Single-pass batchnorm using Welford's online moments
pub struct WelfordBatchNormFwd<E: Element>(PhantomData<E>);

impl<E: Element> WelfordBatchNormFwd<E> {
    /// Create the single-pass instance
    #[must_use]
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<E: Element> Default for WelfordBatchNormFwd<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Element> KernelInstance<BatchNormFwd<E>> for WelfordBatchNormFwd<E> {
    fn bind_argument(
        &self,
        problem: &BatchNormFwdProblem,
        buffers: &BatchNormFwdBuffers,
    ) -> ArgumentHandle {
        ArgumentHandle::new(BoundBatchNorm::bind(problem, buffers))
    }

    fn is_supported(&self, argument: &ArgumentHandle) -> bool {
        argument
            .downcast_ref::<BoundBatchNorm>()
            .is_some_and(|arg| arg.host_backed() && arg.supported_layout())
    }

    fn run(&self, argument: &ArgumentHandle, stream: &StreamConfig) -> Result<f32> {
        let arg = argument
            .downcast_ref::<BoundBatchNorm>()
            .ok_or_else(|| foreign_argument(&self.instance_id()))?;
        let (Some(x), Some(y), Some(scale), Some(bias), Some(mean_buf), Some(inv_var_buf)) = (
            &arg.x,
            &arg.y,
            &arg.scale,
            &arg.bias,
            &arg.mean,
            &arg.inv_variance,
        ) else {
            return Err(foreign_argument(&self.instance_id()));
        };
        let p = &arg.problem;
        let channels = p.channel_count() as usize;
        let elements = p.element_count() as usize;

        let start = Instant::now();
        let x = x.lock();
        let mut y = y.lock();
        let scale = scale.lock();
        let bias = bias.lock();
        let mut mean_buf = mean_buf.lock();
        let mut inv_var_buf = inv_var_buf.lock();

        let mut count = vec![0.0f64; channels];
        let mut mean = vec![0.0f64; channels];
        let mut m2 = vec![0.0f64; channels];
        for offset in 0..elements {
            let c = offset % channels;
            let v = f64::from(x[offset]);
            count[c] += 1.0;
            let delta = v - mean[c];
            mean[c] += delta / count[c];
            m2[c] += delta * (v - mean[c]);
        }
        let variance: Vec<f64> = m2
            .iter()
            .zip(&count)
            .map(|(&m2, &n)| if n > 0.0 { m2 / n } else { 0.0 })
            .collect();

        finalize::<E>(
            arg,
            &x,
            &mut y,
            &scale,
            &bias,
            &mut mean_buf,
            &mut inv_var_buf,
            &mean,
            &variance,
        );
        Ok(elapsed_ms(start, stream))
    }

    fn instance_id(&self) -> InstanceId {
        InstanceId::new(format!("welford_batchnorm_fwd_{}", E::DATA_TYPE))
    }
}

/// The CPU reference instance list for [`BatchNormFwd<E>`]
#[must_use]
pub fn batchnorm_instances<E: Element>() -> StaticRegistry<BatchNormFwd<E>> {
    let mut registry = StaticRegistry::new();
    registry.push(Arc::new(NaiveBatchNormFwd::<E>::new()));
    registry.push(Arc::new(WelfordBatchNormFwd::<E>::new()));
    registry
}
