use crate::dtype::DType;
use crate::error::VergeError;
use crate::quant::QuantParam;
use crate::shape::Shape;
use crate::Result;

/// Memory layout tag. Kernels that care about spatial layout (convolution,
/// resize) expect NHWC; the tag travels with the tensor so mismatches can be
/// rejected at `init` rather than silently computed wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Nhwc,
    Nchw,
}

/// Tensor category: constants (weights, biases) survive the whole subgraph
/// lifetime and are never freed by the executor; variables (activations,
/// intermediates) are reclaimed once their reference count drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Const,
    Var,
}

/// Backing storage, kept 8-byte aligned so typed views over the raw bytes
/// are always valid.
#[derive(Debug, Clone)]
struct Storage {
    words: Vec<u64>,
    nbytes: usize,
}

impl Storage {
    fn zeroed(nbytes: usize) -> Self {
        Self {
            words: vec![0u64; nbytes.div_ceil(8)],
            nbytes,
        }
    }

    fn as_ptr(&self) -> *const u8 {
        self.words.as_ptr() as *const u8
    }

    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.words.as_mut_ptr() as *mut u8
    }
}

/// An n-dimensional typed buffer — the unit of data flow between kernels.
///
/// Storage is lazily materialized: a tensor created during subgraph
/// construction carries only shape/dtype metadata until `malloc_data` (called
/// from a kernel's `pre_process`) allocates its buffer. The reference count
/// is owned by the graph executor; kernels never touch it.
#[derive(Debug, Clone)]
pub struct Tensor {
    shape: Shape,
    dtype: DType,
    format: Format,
    category: Category,
    quant: Vec<QuantParam>,
    ref_count: usize,
    data: Option<Storage>,
}

impl Tensor {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create an unmaterialized tensor (metadata only).
    pub fn new(dtype: DType, shape: &[usize], format: Format, category: Category) -> Self {
        Self {
            shape: Shape::new(shape),
            dtype,
            format,
            category,
            quant: Vec::new(),
            ref_count: 0,
            data: None,
        }
    }

    /// Create a materialized f32 variable tensor from data.
    pub fn from_f32(data: &[f32], shape: &[usize]) -> Self {
        let mut t = Self::new(DType::F32, shape, Format::Nhwc, Category::Var);
        assert_eq!(t.element_num(), data.len(), "shape/data length mismatch");
        t.fill_bytes(data.as_ptr() as *const u8, data.len() * 4);
        t
    }

    /// Create a materialized i8 variable tensor from data.
    pub fn from_i8(data: &[i8], shape: &[usize]) -> Self {
        let mut t = Self::new(DType::I8, shape, Format::Nhwc, Category::Var);
        assert_eq!(t.element_num(), data.len(), "shape/data length mismatch");
        t.fill_bytes(data.as_ptr() as *const u8, data.len());
        t
    }

    /// Create a materialized i32 variable tensor from data.
    pub fn from_i32(data: &[i32], shape: &[usize]) -> Self {
        let mut t = Self::new(DType::I32, shape, Format::Nhwc, Category::Var);
        assert_eq!(t.element_num(), data.len(), "shape/data length mismatch");
        t.fill_bytes(data.as_ptr() as *const u8, data.len() * 4);
        t
    }

    /// Mark this tensor as a constant (weight/bias).
    pub fn into_const(mut self) -> Self {
        self.category = Category::Const;
        self
    }

    fn fill_bytes(&mut self, src: *const u8, nbytes: usize) {
        let mut storage = Storage::zeroed(nbytes);
        // Storage is freshly allocated and at least nbytes long.
        unsafe { std::ptr::copy_nonoverlapping(src, storage.as_mut_ptr(), nbytes) };
        self.data = Some(storage);
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Replace the shape. Triggers no reallocation by itself; the next
    /// `malloc_data` sizes storage to the new shape.
    pub fn set_shape(&mut self, dims: &[usize]) {
        self.shape = Shape::new(dims);
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn set_format(&mut self, format: Format) {
        self.format = format;
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// Total number of elements implied by the shape.
    pub fn element_num(&self) -> usize {
        self.shape.numel()
    }

    /// Size of the (materialized or future) buffer in bytes.
    pub fn size_bytes(&self) -> usize {
        self.dtype.storage_bytes(self.element_num())
    }

    // =========================================================================
    // Quantization parameters
    // =========================================================================

    /// Set per-tensor (one entry) or per-channel (one entry per channel)
    /// quantization parameters. Every scale must be positive.
    pub fn set_quant_params(&mut self, params: Vec<QuantParam>) -> Result<()> {
        for p in &params {
            if p.scale <= 0.0 || !p.scale.is_finite() {
                return Err(VergeError::contract(format!(
                    "quantization scale must be positive and finite, got {}",
                    p.scale
                )));
            }
        }
        self.quant = params;
        Ok(())
    }

    pub fn quant_params(&self) -> &[QuantParam] {
        &self.quant
    }

    /// First (per-tensor) quantization parameter set, or a contract error if
    /// the tensor carries none.
    pub fn first_quant(&self) -> Result<QuantParam> {
        self.quant
            .first()
            .copied()
            .ok_or_else(|| VergeError::contract("tensor has no quantization parameters"))
    }

    // =========================================================================
    // Reference counting (executor-owned)
    // =========================================================================

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    pub fn set_ref_count(&mut self, count: usize) {
        self.ref_count = count;
    }

    /// Decrement the reference count, saturating at zero. Returns the new
    /// count.
    pub fn dec_ref_count(&mut self) -> usize {
        self.ref_count = self.ref_count.saturating_sub(1);
        self.ref_count
    }

    // =========================================================================
    // Storage
    // =========================================================================

    /// Whether backing storage has been materialized.
    pub fn is_materialized(&self) -> bool {
        self.data.is_some()
    }

    /// Materialize (or re-size) backing storage for the current shape.
    /// Existing storage of the right size is kept untouched.
    pub fn malloc_data(&mut self) -> Result<()> {
        let nbytes = self.size_bytes();
        match &self.data {
            Some(s) if s.nbytes == nbytes => Ok(()),
            _ => {
                self.data = Some(Storage::zeroed(nbytes));
                Ok(())
            }
        }
    }

    /// Release backing storage. Metadata is preserved.
    pub fn free_data(&mut self) {
        self.data = None;
    }

    fn storage(&self, op: &str) -> Result<&Storage> {
        self.data
            .as_ref()
            .ok_or_else(|| VergeError::contract(format!("{op}: tensor data is not materialized")))
    }

    fn storage_mut(&mut self, op: &str) -> Result<&mut Storage> {
        self.data
            .as_mut()
            .ok_or_else(|| VergeError::contract(format!("{op}: tensor data is not materialized")))
    }

    fn check_dtype(&self, want: DType, op: &str) -> Result<()> {
        if self.dtype != want {
            return Err(VergeError::UnsupportedDType {
                dtype: self.dtype,
                op: op.into(),
            });
        }
        Ok(())
    }

    /// Borrow the buffer as f32 elements.
    pub fn as_f32(&self) -> Result<&[f32]> {
        self.check_dtype(DType::F32, "as_f32")?;
        let n = self.element_num();
        let s = self.storage("as_f32")?;
        // Storage is 8-byte aligned and sized to the element count.
        Ok(unsafe { std::slice::from_raw_parts(s.as_ptr() as *const f32, n) })
    }

    /// Borrow the buffer as mutable f32 elements.
    pub fn as_f32_mut(&mut self) -> Result<&mut [f32]> {
        self.check_dtype(DType::F32, "as_f32_mut")?;
        let n = self.element_num();
        let s = self.storage_mut("as_f32_mut")?;
        Ok(unsafe { std::slice::from_raw_parts_mut(s.as_mut_ptr() as *mut f32, n) })
    }

    /// Borrow the buffer as i8 elements.
    pub fn as_i8(&self) -> Result<&[i8]> {
        self.check_dtype(DType::I8, "as_i8")?;
        let n = self.element_num();
        let s = self.storage("as_i8")?;
        Ok(unsafe { std::slice::from_raw_parts(s.as_ptr() as *const i8, n) })
    }

    /// Borrow the buffer as mutable i8 elements.
    pub fn as_i8_mut(&mut self) -> Result<&mut [i8]> {
        self.check_dtype(DType::I8, "as_i8_mut")?;
        let n = self.element_num();
        let s = self.storage_mut("as_i8_mut")?;
        Ok(unsafe { std::slice::from_raw_parts_mut(s.as_mut_ptr() as *mut i8, n) })
    }

    /// Borrow the buffer as i32 elements.
    pub fn as_i32(&self) -> Result<&[i32]> {
        self.check_dtype(DType::I32, "as_i32")?;
        let n = self.element_num();
        let s = self.storage("as_i32")?;
        Ok(unsafe { std::slice::from_raw_parts(s.as_ptr() as *const i32, n) })
    }

    /// Borrow the buffer as mutable i32 elements.
    pub fn as_i32_mut(&mut self) -> Result<&mut [i32]> {
        self.check_dtype(DType::I32, "as_i32_mut")?;
        let n = self.element_num();
        let s = self.storage_mut("as_i32_mut")?;
        Ok(unsafe { std::slice::from_raw_parts_mut(s.as_mut_ptr() as *mut i32, n) })
    }
}
