use crate::backend::ComputeBackend;
use crate::buffer::DeviceBuffer;
use crate::codec;
use crate::error::Result;

/// Pure-Rust compute backend operating on host-visible buffers.
///
/// Implements the matmul surface with straightforward loops optimized for
/// correctness rather than peak performance. Intended as a reference
/// implementation and fallback.
#[derive(Debug, Clone, Default)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }

    fn matmul_slice(a: &[f32], b: &[f32], c: &mut [f32], m: usize, k: usize, n: usize) {
        for i in 0..m {
            for j in 0..n {
                let mut sum = 0.0f32;
                for p in 0..k {
                    sum += a[i * k + p] * b[p * n + j];
                }
                c[i * n + j] = sum;
            }
        }
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn matmul(
        &self,
        a: &dyn DeviceBuffer,
        b: &dyn DeviceBuffer,
        c: &dyn DeviceBuffer,
        m: usize,
        k: usize,
        n: usize,
    ) -> Result<()> {
        self.matmul_batched(a, b, c, 1, m, k, n)
    }

    fn matmul_batched(
        &self,
        a: &dyn DeviceBuffer,
        b: &dyn DeviceBuffer,
        c: &dyn DeviceBuffer,
        batch: usize,
        m: usize,
        k: usize,
        n: usize,
    ) -> Result<()> {
        let av = codec::le_bytes_to_f32s(&a.read_n(0, batch * m * k * 4)?);
        let bv = codec::le_bytes_to_f32s(&b.read_n(0, batch * k * n * 4)?);
        let mut cv = vec![0.0f32; batch * m * n];
        for bi in 0..batch {
            CpuBackend::matmul_slice(
                &av[bi * m * k..(bi + 1) * m * k],
                &bv[bi * k * n..(bi + 1) * k * n],
                &mut cv[bi * m * n..(bi + 1) * m * n],
                m,
                k,
                n,
            );
        }
        c.write(&codec::f32s_to_le_bytes(&cv))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferAllocator, HostAllocator};

    fn buffer_from(vals: &[f32]) -> std::sync::Arc<dyn DeviceBuffer> {
        let buf = HostAllocator::new().allocate(vals.len() * 4).unwrap();
        buf.write(&codec::f32s_to_le_bytes(vals)).unwrap();
        buf
    }

    #[test]
    fn test_matmul_identity() {
        let backend = CpuBackend::new();
        let a = buffer_from(&[1.0, 0.0, 0.0, 1.0]);
        let b = buffer_from(&[1.0, 2.0, 3.0, 4.0]);
        let c = HostAllocator::new().allocate(16).unwrap();
        backend
            .matmul(a.as_ref(), b.as_ref(), c.as_ref(), 2, 2, 2)
            .unwrap();
        assert_eq!(
            codec::le_bytes_to_f32s(&c.read_n(0, 16).unwrap()),
            vec![1.0, 2.0, 3.0, 4.0]
        );
    }

    #[test]
    fn test_matmul_basic() {
        let backend = CpuBackend::new();
        let a = buffer_from(&[1.0, 2.0, 3.0, 4.0]);
        let b = buffer_from(&[5.0, 6.0, 7.0, 8.0]);
        let c = HostAllocator::new().allocate(16).unwrap();
        backend
            .matmul(a.as_ref(), b.as_ref(), c.as_ref(), 2, 2, 2)
            .unwrap();
        assert_eq!(
            codec::le_bytes_to_f32s(&c.read_n(0, 16).unwrap()),
            vec![19.0, 22.0, 43.0, 50.0]
        );
    }

    #[test]
    fn test_matmul_rectangular() {
        let backend = CpuBackend::new();
        // [1, 3] @ [3, 1] = [1*4 + 2*5 + 3*6] = [32]
        let a = buffer_from(&[1.0, 2.0, 3.0]);
        let b = buffer_from(&[4.0, 5.0, 6.0]);
        let c = HostAllocator::new().allocate(4).unwrap();
        backend
            .matmul(a.as_ref(), b.as_ref(), c.as_ref(), 1, 3, 1)
            .unwrap();
        assert_eq!(codec::le_bytes_to_f32s(&c.read_n(0, 4).unwrap()), vec![32.0]);
    }

    #[test]
    fn test_matmul_batched_is_per_batch() {
        let backend = CpuBackend::new();
        let a = buffer_from(&[1.0, 2.0, 3.0, 4.0]); // 2 batches of [1, 2]
        let b = buffer_from(&[5.0, 6.0, 7.0, 8.0]); // 2 batches of [2, 1]
        let c = HostAllocator::new().allocate(8).unwrap();
        backend
            .matmul_batched(a.as_ref(), b.as_ref(), c.as_ref(), 2, 1, 2, 1)
            .unwrap();
        assert_eq!(
            codec::le_bytes_to_f32s(&c.read_n(0, 8).unwrap()),
            vec![17.0, 53.0]
        );
    }

    #[test]
    fn test_matmul_short_buffer_propagates_error() {
        let backend = CpuBackend::new();
        let a = buffer_from(&[1.0, 2.0]);
        let b = buffer_from(&[3.0, 4.0]);
        let c = HostAllocator::new().allocate(4).unwrap();
        // Claims 2x2 operands but the buffers hold only 2 elements each.
        assert!(backend
            .matmul(a.as_ref(), b.as_ref(), c.as_ref(), 2, 2, 2)
            .is_err());
    }
}
