use crate::address;

/// A typed, shaped buffer mapped to a DRAM address range.
///
/// Produced by exactly one operation, or by model initialization for graph
/// inputs and weights.
#[derive(Debug, Clone)]
pub struct Tensor {
    pub id: u32,
    pub name: String,
    pub dims: Vec<u64>,
    /// Bytes per element.
    pub precision: u64,
    /// Operation that produces this tensor (the root pseudo-operation for
    /// inputs and weights). `None` for placeholders whose producer was
    /// skipped during ingestion.
    pub producer: Option<u32>,
    produced: bool,
    /// Base of the DRAM range; assigned by the model's bump allocator.
    pub base_addr: address,
}

impl Tensor {
    #[must_use]
    pub fn new(id: u32, name: impl Into<String>, dims: Vec<u64>, precision: u64, producer: Option<u32>) -> Self {
        Self {
            id,
            name: name.into(),
            dims,
            precision,
            producer,
            produced: false,
            base_addr: 0,
        }
    }

    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.dims.iter().product::<u64>() * u64::from(!self.dims.is_empty())
    }

    /// Size of the DRAM range, rounded up to `align` bytes.
    #[must_use]
    pub fn size_bytes(&self, align: u64) -> u64 {
        let raw = self.num_elements() * self.precision;
        raw.div_ceil(align) * align
    }

    #[must_use]
    pub fn produced(&self) -> bool {
        self.produced
    }

    pub fn set_produced(&mut self) {
        self.produced = true;
    }
}
