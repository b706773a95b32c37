use crate::config::SimulationConfig;
use crate::tensor::Tensor;
use crate::tile::{Span, Status, Tile};
use std::collections::HashMap;

/// Operator kinds the operation factory materializes.
///
/// Anything else in the node stream is skipped with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Conv,
    Gemm,
    MatMul,
    Attention,
    SkipLayerNormalization,
    LayerNormalization,
    Gelu,
    Add,
}

impl OpKind {
    #[must_use]
    pub fn from_op_type(op_type: &str) -> Option<Self> {
        match op_type {
            "Conv" => Some(Self::Conv),
            "Gemm" => Some(Self::Gemm),
            "MatMul" => Some(Self::MatMul),
            "Attention" => Some(Self::Attention),
            "SkipLayerNormalization" => Some(Self::SkipLayerNormalization),
            "LayerNormalization" => Some(Self::LayerNormalization),
            "Gelu" => Some(Self::Gelu),
            "Add" => Some(Self::Add),
            _ => None,
        }
    }

    /// Operators with a reduction dimension split into accumulation tiles.
    #[must_use]
    pub fn has_reduction(&self) -> bool {
        matches!(self, Self::Conv | Self::Gemm | Self::MatMul | Self::Attention)
    }
}

/// A node of the model DAG.
///
/// Parents and children are referenced by id; the id -> operation map is
/// owned by the model.
#[derive(Debug, Clone)]
pub struct Operation {
    pub id: u32,
    pub name: String,
    pub kind: OpKind,
    pub parents: Vec<u32>,
    pub children: Vec<u32>,
    /// Input tensor ids.
    pub inputs: Vec<u32>,
    /// Output tensor ids.
    pub outputs: Vec<u32>,
    tiles: Vec<Tile>,
    /// Tiles dispatched but not yet retired, plus tiles not yet dispatched.
    pub outstanding_tiles: usize,
    finished: bool,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}({}, id={})", self.kind, self.name, self.id)
    }
}

impl Operation {
    #[must_use]
    pub fn new(id: u32, name: impl Into<String>, kind: OpKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            parents: Vec::new(),
            children: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            tiles: Vec::new(),
            outstanding_tiles: 0,
            finished: false,
        }
    }

    #[must_use]
    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn set_finish(&mut self) {
        self.finished = true;
    }

    #[must_use]
    pub fn num_tiles(&self) -> usize {
        self.tiles.len()
    }

    /// Hand the tile list to the scheduler; tiles keep their insertion order.
    pub fn take_tiles(&mut self) -> Vec<Tile> {
        std::mem::take(&mut self.tiles)
    }

    /// Split the operation's work into dispatchable tiles.
    ///
    /// The spatial extent of the output is covered by `array_rows x
    /// array_cols` tiles; operators with a reduction dimension additionally
    /// split it into `array_rows`-deep chunks, all but the last of which
    /// accumulate into the core-local partial sum.
    pub fn initialize_tiles(
        &mut self,
        model_id: u32,
        config: &SimulationConfig,
        tensors: &HashMap<u32, Tensor>,
    ) {
        let atomic = config.dram_atomic_bytes;
        let array_elems = config.array_rows * config.array_cols;

        let out = self.outputs.first().and_then(|id| tensors.get(id));
        let out_bytes = out.map_or(0, |t| t.size_bytes(atomic));
        let out_base = out.map_or(0, |t| t.base_addr);
        let out_elems = out.map_or(0, Tensor::num_elements);
        let spatial = out_elems.div_ceil(array_elems).max(1);

        let k_len = if self.kind.has_reduction() {
            self.inputs
                .first()
                .and_then(|id| tensors.get(id))
                .and_then(|t| t.dims.last().copied())
                .unwrap_or(0)
        } else {
            0
        };
        let k_splits = k_len.div_ceil(config.array_rows).max(1);
        let compute_cycles = config.array_rows + config.array_cols + k_len.min(config.array_rows);

        let num_tiles = spatial * k_splits;
        let store_chunk = chunk_size(out_bytes, spatial, atomic);

        let mut seq = 0;
        for s in 0..spatial {
            for kk in 0..k_splits {
                let accum = kk + 1 < k_splits;
                let mut loads = Vec::new();
                for input_id in &self.inputs {
                    let Some(input) = tensors.get(input_id) else {
                        continue;
                    };
                    let bytes = input.size_bytes(atomic);
                    let chunk = chunk_size(bytes, num_tiles, atomic);
                    if let Some(span) = slice(input.base_addr, bytes, u64::from(seq) * chunk, chunk)
                    {
                        loads.push(span);
                    }
                }
                let stores = if accum {
                    Vec::new()
                } else {
                    slice(out_base, out_bytes, s * store_chunk, store_chunk)
                        .into_iter()
                        .collect()
                };
                self.tiles.push(Tile {
                    model_id,
                    layer_id: self.id,
                    seq,
                    status: Status::Initialized,
                    accum,
                    loads,
                    stores,
                    compute_cycles,
                });
                seq += 1;
            }
        }
        self.outstanding_tiles = self.tiles.len();
    }
}

fn chunk_size(total_bytes: u64, parts: u64, align: u64) -> u64 {
    total_bytes.div_ceil(parts).div_ceil(align) * align
}

/// Clamp `[offset, offset + bytes)` to the tensor's range; `None` when the
/// slice falls entirely past the end.
fn slice(base: crate::address, total: u64, offset: u64, bytes: u64) -> Option<Span> {
    if offset >= total || bytes == 0 {
        return None;
    }
    Some(Span {
        addr: base + offset,
        bytes: bytes.min(total - offset),
    })
}

#[cfg(test)]
mod tests {
    use super::{OpKind, Operation};
    use crate::config::SimulationConfig;
    use crate::tensor::Tensor;
    use std::collections::HashMap;

    fn tensors(entries: Vec<Tensor>) -> HashMap<u32, Tensor> {
        entries.into_iter().map(|t| (t.id, t)).collect()
    }

    #[test]
    fn unsupported_op_is_not_materialized() {
        assert_eq!(OpKind::from_op_type("Resize"), None);
        assert_eq!(OpKind::from_op_type("Gemm"), Some(OpKind::Gemm));
    }

    #[test]
    fn reduction_split_marks_accumulation_tiles() {
        let config = SimulationConfig {
            array_rows: 4,
            array_cols: 4,
            ..SimulationConfig::default()
        };
        let mut input = Tensor::new(0, "a", vec![4, 8], 1, None);
        input.base_addr = 0;
        let mut out = Tensor::new(1, "b", vec![4, 4], 1, None);
        out.base_addr = 4096;

        let mut op = Operation::new(10, "gemm", OpKind::Gemm);
        op.inputs = vec![0];
        op.outputs = vec![1];
        op.initialize_tiles(0, &config, &tensors(vec![input, out]));

        // one spatial tile (16 output elements), k=8 split into 2 chunks
        assert_eq!(op.num_tiles(), 2);
        let tiles = op.take_tiles();
        assert!(tiles[0].accum);
        assert!(!tiles[1].accum);
        assert!(tiles[0].stores.is_empty());
        assert!(!tiles[1].stores.is_empty());
    }

    #[test]
    fn elementwise_op_has_single_fresh_tile() {
        let config = SimulationConfig {
            array_rows: 8,
            array_cols: 8,
            ..SimulationConfig::default()
        };
        let mut input = Tensor::new(0, "a", vec![8, 8], 1, None);
        input.base_addr = 0;
        let mut out = Tensor::new(1, "b", vec![8, 8], 1, None);
        out.base_addr = 4096;

        let mut op = Operation::new(11, "gelu", OpKind::Gelu);
        op.inputs = vec![0];
        op.outputs = vec![1];
        op.initialize_tiles(0, &config, &tensors(vec![input, out]));

        assert_eq!(op.num_tiles(), 1);
        let tiles = op.take_tiles();
        assert!(!tiles[0].accum);
        assert_eq!(tiles[0].compute_cycles, 16);
    }
}
