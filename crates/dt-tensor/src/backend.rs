use std::fmt::Debug;

use crate::buffer::DeviceBuffer;
use crate::error::Result;

/// Matrix-multiply surface exposed to accelerator backends.
///
/// Backends receive raw buffer handles plus row/column counts; the tensor
/// core does not participate in kernel selection, compilation, or dispatch
/// beyond this boundary. All operands are contiguous row-major f32.
pub trait ComputeBackend: Debug + Send + Sync {
    /// Returns the name of this backend (e.g., "cpu", "metal").
    fn name(&self) -> &str;

    /// C = A @ B.
    ///
    /// - `a`: buffer holding `[m, k]` row-major f32
    /// - `b`: buffer holding `[k, n]` row-major f32
    /// - `c`: destination buffer for `[m, n]` row-major f32
    fn matmul(
        &self,
        a: &dyn DeviceBuffer,
        b: &dyn DeviceBuffer,
        c: &dyn DeviceBuffer,
        m: usize,
        k: usize,
        n: usize,
    ) -> Result<()>;

    /// Batched product over `batch` independent `[m, k] @ [k, n]` pairs
    /// laid out consecutively in each buffer.
    #[allow(clippy::too_many_arguments)]
    fn matmul_batched(
        &self,
        a: &dyn DeviceBuffer,
        b: &dyn DeviceBuffer,
        c: &dyn DeviceBuffer,
        batch: usize,
        m: usize,
        k: usize,
        n: usize,
    ) -> Result<()>;
}
