use crate::backend::ComputeBackend;
use crate::buffer::{BufferAllocator, DeviceBuffer};
use crate::codec;
use crate::dtype::DType;
use crate::error::{Result, TensorError};
use crate::shape::Shape;
use rand::Rng;
use std::fmt;
use std::sync::Arc;

/// A device-resident multi-dimensional array: a typed, strided view over an
/// opaque byte buffer.
///
/// A tensor created by allocation owns its buffer exclusively. Views
/// derived through `reshape`, `view`, `select`, or `row` share the buffer
/// and never own it; the buffer is released exactly once, when the owning
/// tensor is closed or dropped. Reads through a view whose owner has been
/// closed fail with `BufferReleased`.
#[derive(Debug)]
pub struct Tensor {
    dtype: DType,
    shape: Shape,
    strides: Vec<usize>,
    offset: usize,
    buf: Arc<dyn DeviceBuffer>,
    owns: bool,
}

impl Tensor {
    /// Allocates a contiguous tensor of the given dtype and shape.
    ///
    /// The returned tensor owns its buffer, sits at offset zero, and
    /// carries default row-major strides.
    pub fn new(alloc: &dyn BufferAllocator, dtype: DType, shape: &[usize]) -> Result<Tensor> {
        let shape = Shape::from_slice(shape);
        if !shape.is_valid() {
            return Err(TensorError::InvalidShape(shape.dims().to_vec()));
        }
        let nbytes = dtype.bytes_for(shape.numel());
        let buf = alloc.allocate(nbytes)?;
        let strides = shape.strides_bytes(dtype);
        Ok(Tensor {
            dtype,
            shape,
            strides,
            offset: 0,
            buf,
            owns: true,
        })
    }

    /// Allocates a tensor and fills float dtypes with values drawn
    /// independently and uniformly from `[-b, b]`, where `b = 1/sqrt(fan_in)`
    /// and `fan_in` is the last dimension: the Kaiming-uniform bound used
    /// for linear-layer weights.
    ///
    /// Half-width values are generated in full precision and passed through
    /// the codec before being written. Integer dtypes are allocated with
    /// unspecified contents.
    pub fn random<R: Rng + ?Sized>(
        alloc: &dyn BufferAllocator,
        rng: &mut R,
        dtype: DType,
        shape: &[usize],
    ) -> Result<Tensor> {
        let t = Tensor::new(alloc, dtype, shape)?;
        match dtype {
            DType::F32 | DType::F16 | DType::BF16 => {
                let fan_in = t.shape.dim(t.shape.ndim() - 1);
                let bound = 1.0 / (fan_in as f32).sqrt();
                let mut values = vec![0.0f32; t.shape.numel()];
                for v in values.iter_mut() {
                    *v = rng.gen_range(-bound..=bound);
                }
                t.upload_f32(&values)?;
            }
            DType::I8 | DType::I4 => {}
        }
        Ok(t)
    }

    /// Encodes and uploads host f32 data into a freshly allocated tensor.
    ///
    /// `F32` writes raw little-endian bytes; `F16`/`BF16` encode through
    /// the codec. Integer dtypes are not supported on this path.
    pub fn from_f32(
        alloc: &dyn BufferAllocator,
        dtype: DType,
        values: &[f32],
        shape: &[usize],
    ) -> Result<Tensor> {
        let t = Tensor::new(alloc, dtype, shape)?;
        if t.shape.numel() != values.len() {
            return Err(TensorError::ShapeMismatch {
                expected: t.shape.numel(),
                got: values.len(),
            });
        }
        t.upload_f32(values)?;
        Ok(t)
    }

    /// Uploads pre-encoded half-precision host data, preserving bit
    /// patterns exactly.
    pub fn from_f16(
        alloc: &dyn BufferAllocator,
        values: &[half::f16],
        shape: &[usize],
    ) -> Result<Tensor> {
        let bits: Vec<u16> = values.iter().map(|v| v.to_bits()).collect();
        Tensor::from_u16_bits(alloc, DType::F16, &bits, shape)
    }

    /// Uploads pre-encoded bfloat16 host data, preserving bit patterns
    /// exactly.
    pub fn from_bf16(
        alloc: &dyn BufferAllocator,
        values: &[half::bf16],
        shape: &[usize],
    ) -> Result<Tensor> {
        let bits: Vec<u16> = values.iter().map(|v| v.to_bits()).collect();
        Tensor::from_u16_bits(alloc, DType::BF16, &bits, shape)
    }

    fn from_u16_bits(
        alloc: &dyn BufferAllocator,
        dtype: DType,
        bits: &[u16],
        shape: &[usize],
    ) -> Result<Tensor> {
        let t = Tensor::new(alloc, dtype, shape)?;
        if t.shape.numel() != bits.len() {
            return Err(TensorError::ShapeMismatch {
                expected: t.shape.numel(),
                got: bits.len(),
            });
        }
        t.buf.write(&codec::u16s_to_le_bytes(bits))?;
        Ok(t)
    }

    fn upload_f32(&self, values: &[f32]) -> Result<()> {
        match self.dtype {
            DType::F32 => self.buf.write(&codec::f32s_to_le_bytes(values)),
            DType::F16 => self
                .buf
                .write(&codec::u16s_to_le_bytes(&codec::pack_f16(values))),
            DType::BF16 => self
                .buf
                .write(&codec::u16s_to_le_bytes(&codec::pack_bf16(values))),
            dtype => Err(TensorError::UnsupportedDType {
                op: "from_f32",
                dtype,
            }),
        }
    }

    /// Returns the tensor's data type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Returns a reference to the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Byte strides, one per dimension.
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Byte offset of this view into the buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// Bytes occupied by this view's elements (not the buffer size).
    pub fn byte_size(&self) -> usize {
        self.dtype.bytes_for(self.numel())
    }

    /// The underlying buffer handle, for handing to a compute backend.
    pub fn buffer(&self) -> &Arc<dyn DeviceBuffer> {
        &self.buf
    }

    /// True if this tensor owns its buffer (was created by allocation).
    pub fn owns_buffer(&self) -> bool {
        self.owns
    }

    /// True when strides are the row-major defaults for this dtype and
    /// shape and the byte offset is zero.
    pub fn is_contiguous(&self) -> bool {
        self.shape
            .is_contiguous(self.dtype, &self.strides, self.offset)
    }

    /// Returns a borrowing view with the same elements and a new shape.
    ///
    /// Requires a contiguous source and an element-count-preserving new
    /// shape; the view carries default strides for the new shape.
    pub fn reshape(&self, new_shape: &[usize]) -> Result<Tensor> {
        let new_shape = Shape::from_slice(new_shape);
        if !new_shape.is_valid() {
            return Err(TensorError::InvalidShape(new_shape.dims().to_vec()));
        }
        if new_shape.numel() != self.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: self.numel(),
                got: new_shape.numel(),
            });
        }
        if !self.is_contiguous() {
            return Err(TensorError::NonContiguous { op: "reshape" });
        }
        let strides = new_shape.strides_bytes(self.dtype);
        Ok(Tensor {
            dtype: self.dtype,
            shape: new_shape,
            strides,
            offset: self.offset,
            buf: Arc::clone(&self.buf),
            owns: false,
        })
    }

    /// Returns a borrowing view with an explicit byte offset, shape, and
    /// byte strides.
    ///
    /// The bounds check accumulates `(extent - 1) * stride` over every
    /// dimension, then adds the offset and one element's size; the result
    /// must fit in the buffer. Strides are unsigned, so reversed-axis views
    /// cannot be expressed and the check is exact.
    pub fn view(&self, offset_bytes: usize, shape: &[usize], strides: &[usize]) -> Result<Tensor> {
        let shape = Shape::from_slice(shape);
        if !shape.is_valid() {
            return Err(TensorError::InvalidShape(shape.dims().to_vec()));
        }
        if shape.ndim() != strides.len() {
            return Err(TensorError::RankMismatch {
                expected: shape.ndim(),
                got: strides.len(),
            });
        }
        let mut max_off = offset_bytes;
        for (d, &extent) in shape.dims().iter().enumerate() {
            max_off += (extent - 1) * strides[d];
        }
        max_off += self.dtype.size_in_bytes();
        if max_off > self.buf.size() {
            return Err(TensorError::ViewOutOfBounds {
                required: max_off,
                capacity: self.buf.size(),
            });
        }
        Ok(Tensor {
            dtype: self.dtype,
            shape,
            strides: strides.to_vec(),
            offset: offset_bytes,
            buf: Arc::clone(&self.buf),
            owns: false,
        })
    }

    /// Removes dimension `dim` by fixing it at `index`, returning a view of
    /// rank one less.
    pub fn select(&self, dim: usize, index: usize) -> Result<Tensor> {
        if dim >= self.shape.ndim() {
            return Err(TensorError::DimOutOfRange {
                dim,
                ndim: self.shape.ndim(),
            });
        }
        if index >= self.shape.dim(dim) {
            return Err(TensorError::IndexOutOfBounds {
                index,
                dim,
                extent: self.shape.dim(dim),
            });
        }
        let offset = self.offset + index * self.strides[dim];
        let mut shape = self.shape.dims().to_vec();
        shape.remove(dim);
        let mut strides = self.strides.clone();
        strides.remove(dim);
        self.view(offset, &shape, &strides)
    }

    /// The row view `select(0, i)`, the canonical way to pull one row of a
    /// `[rows, cols]` matrix, e.g. an embedding lookup.
    pub fn row(&self, i: usize) -> Result<Tensor> {
        self.select(0, i)
    }

    /// Decodes the element at the given multi-dimensional index as f32.
    ///
    /// Integer values are converted to f32. `I4` supports contiguous
    /// tensors only: nibble addressing is undefined for arbitrary strides.
    pub fn at(&self, idxs: &[usize]) -> Result<f32> {
        if idxs.len() != self.shape.ndim() {
            return Err(TensorError::RankMismatch {
                expected: self.shape.ndim(),
                got: idxs.len(),
            });
        }
        for (d, &i) in idxs.iter().enumerate() {
            if i >= self.shape.dim(d) {
                return Err(TensorError::IndexOutOfBounds {
                    index: i,
                    dim: d,
                    extent: self.shape.dim(d),
                });
            }
        }
        match self.dtype {
            DType::I4 => {
                if !self.is_contiguous() {
                    return Err(TensorError::NonContiguous {
                        op: "int4 element access",
                    });
                }
                let flat = self.flat_index(idxs);
                let bs = self.buf.read_n(self.offset + flat / 2, 1)?;
                Ok(codec::unpack_int4_nibble(bs[0], flat) as f32)
            }
            _ => self.read_scalar(self.byte_offset_for(idxs)),
        }
    }

    /// Bulk-decodes this view's packed element range into `dst`.
    ///
    /// `dst.len()` must equal `numel()`. `F32` is a raw copy; `F16`/`BF16`
    /// decode through the codec. Integer dtypes are read per element via
    /// [`Tensor::at`] instead.
    pub fn download_f32(&self, dst: &mut [f32]) -> Result<()> {
        if dst.len() != self.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: self.numel(),
                got: dst.len(),
            });
        }
        match self.dtype {
            DType::F32 => {
                let bytes = self.buf.read_n(self.offset, dst.len() * 4)?;
                dst.copy_from_slice(&codec::le_bytes_to_f32s(&bytes));
                Ok(())
            }
            DType::F16 => {
                let bytes = self.buf.read_n(self.offset, dst.len() * 2)?;
                dst.copy_from_slice(&codec::unpack_f16(&codec::le_bytes_to_u16s(&bytes)));
                Ok(())
            }
            DType::BF16 => {
                let bytes = self.buf.read_n(self.offset, dst.len() * 2)?;
                dst.copy_from_slice(&codec::unpack_bf16(&codec::le_bytes_to_u16s(&bytes)));
                Ok(())
            }
            dtype => Err(TensorError::UnsupportedDType {
                op: "download_f32",
                dtype,
            }),
        }
    }

    /// 2-D matrix product dispatched to `backend`, with the result
    /// allocated through `alloc`.
    ///
    /// `self` is `[m, k]`, `other` is `[k, n]`, the result is `[m, n]`.
    /// Both operands must be contiguous f32 matrices.
    pub fn matmul(
        &self,
        other: &Tensor,
        backend: &dyn ComputeBackend,
        alloc: &dyn BufferAllocator,
    ) -> Result<Tensor> {
        self.check_matmul_operand(other, 2)?;
        let (m, k) = (self.shape.dim(0), self.shape.dim(1));
        let (k2, n) = (other.shape.dim(0), other.shape.dim(1));
        if k != k2 {
            return Err(TensorError::MatmulMismatch { m, k, k2, n });
        }
        let out = Tensor::new(alloc, DType::F32, &[m, n])?;
        backend.matmul(self.buf.as_ref(), other.buf.as_ref(), out.buf.as_ref(), m, k, n)?;
        Ok(out)
    }

    /// Batched matrix product over matching leading batch dimensions:
    /// `[b, m, k] @ [b, k, n] -> [b, m, n]`.
    pub fn matmul_batched(
        &self,
        other: &Tensor,
        backend: &dyn ComputeBackend,
        alloc: &dyn BufferAllocator,
    ) -> Result<Tensor> {
        self.check_matmul_operand(other, 3)?;
        let (b, m, k) = (self.shape.dim(0), self.shape.dim(1), self.shape.dim(2));
        let (b2, k2, n) = (other.shape.dim(0), other.shape.dim(1), other.shape.dim(2));
        if b != b2 {
            return Err(TensorError::ShapeMismatch {
                expected: b,
                got: b2,
            });
        }
        if k != k2 {
            return Err(TensorError::MatmulMismatch { m, k, k2, n });
        }
        let out = Tensor::new(alloc, DType::F32, &[b, m, n])?;
        backend.matmul_batched(
            self.buf.as_ref(),
            other.buf.as_ref(),
            out.buf.as_ref(),
            b,
            m,
            k,
            n,
        )?;
        Ok(out)
    }

    fn check_matmul_operand(&self, other: &Tensor, ndim: usize) -> Result<()> {
        if self.dtype != DType::F32 {
            return Err(TensorError::UnsupportedDType {
                op: "matmul",
                dtype: self.dtype,
            });
        }
        if other.dtype != DType::F32 {
            return Err(TensorError::UnsupportedDType {
                op: "matmul",
                dtype: other.dtype,
            });
        }
        if self.shape.ndim() != ndim || other.shape.ndim() != ndim {
            return Err(TensorError::RankMismatch {
                expected: ndim,
                got: if self.shape.ndim() != ndim {
                    self.shape.ndim()
                } else {
                    other.shape.ndim()
                },
            });
        }
        if !self.is_contiguous() || !other.is_contiguous() {
            return Err(TensorError::NonContiguous { op: "matmul" });
        }
        Ok(())
    }

    /// Releases the underlying buffer if this tensor owns it.
    ///
    /// Idempotent; closing a borrowing view is a no-op. Reads through any
    /// surviving view fail with `BufferReleased` afterwards.
    pub fn close(&mut self) {
        if self.owns {
            self.buf.release();
            self.owns = false;
        }
    }

    fn read_scalar(&self, off: usize) -> Result<f32> {
        match self.dtype {
            DType::F32 => {
                let bs = self.buf.read_n(off, 4)?;
                Ok(f32::from_le_bytes([bs[0], bs[1], bs[2], bs[3]]))
            }
            DType::F16 => {
                let bs = self.buf.read_n(off, 2)?;
                Ok(codec::f16_bits_to_f32(u16::from_le_bytes([bs[0], bs[1]])))
            }
            DType::BF16 => {
                let bs = self.buf.read_n(off, 2)?;
                Ok(codec::bf16_bits_to_f32(u16::from_le_bytes([bs[0], bs[1]])))
            }
            DType::I8 => {
                let bs = self.buf.read_n(off, 1)?;
                Ok(bs[0] as i8 as f32)
            }
            DType::I4 => Err(TensorError::NonContiguous {
                op: "int4 scalar read",
            }),
        }
    }

    fn byte_offset_for(&self, idxs: &[usize]) -> usize {
        let mut off = self.offset;
        for (d, &i) in idxs.iter().enumerate() {
            off += i * self.strides[d];
        }
        off
    }

    /// Row-major linear element index for pre-validated indices.
    fn flat_index(&self, idxs: &[usize]) -> usize {
        let mut li = 0;
        for (d, &i) in idxs.iter().enumerate() {
            li = li * self.shape.dim(d) + i;
        }
        li
    }

    /// Buffer byte offset for a flat element index, respecting strides.
    fn byte_offset_for_flat(&self, i: usize) -> usize {
        let mut idx = vec![0usize; self.shape.ndim()];
        let mut rem = i;
        for d in (0..self.shape.ndim()).rev() {
            let extent = self.shape.dim(d);
            idx[d] = rem % extent;
            rem /= extent;
        }
        self.byte_offset_for(&idx)
    }
}

impl Drop for Tensor {
    fn drop(&mut self) {
        if self.owns {
            self.buf.release();
        }
    }
}

impl fmt::Display for Tensor {
    /// Diagnostic rendering: layout metadata followed by every decoded
    /// element. Never panics; a failed backend read renders an inline
    /// `<read error>` marker, and a non-contiguous int4 view renders an
    /// explicit unsupported marker.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor({}, shape={}, strides={:?}, offset={}, contiguous={}, numel={}, bytes={}, values=[",
            self.dtype,
            self.shape,
            self.strides,
            self.offset,
            self.is_contiguous(),
            self.numel(),
            self.byte_size(),
        )?;
        match self.dtype {
            DType::I4 => {
                if !self.is_contiguous() {
                    write!(f, "<int4 non-contiguous view unsupported>")?;
                } else {
                    match self.buf.read_n(self.offset, self.byte_size()) {
                        Ok(bytes) => {
                            for i in 0..self.numel() {
                                if i > 0 {
                                    write!(f, ",")?;
                                }
                                write!(f, "{}", codec::unpack_int4_nibble(bytes[i / 2], i))?;
                            }
                        }
                        Err(_) => write!(f, "<read error>")?,
                    }
                }
            }
            _ => {
                for i in 0..self.numel() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    match self.read_scalar(self.byte_offset_for_flat(i)) {
                        Ok(v) => write!(f, "{}", v)?,
                        Err(_) => {
                            write!(f, "<read error>")?;
                            break;
                        }
                    }
                }
            }
        }
        write!(f, "])")
    }
}
