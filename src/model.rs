use crate::config::{SimulationConfig, WorkloadConfig};
use crate::graph::{Dim, GraphFile};
use crate::operation::{OpKind, Operation};
use crate::tensor::Tensor;
use crate::{address, generate_id};
use std::collections::HashMap;

/// A DAG of operations plus everything needed to run it: tensors, arrival
/// time, partition id and dynamic-axis bindings.
#[derive(Debug)]
pub struct Model {
    pub id: u32,
    pub name: String,
    /// Arrival time in picoseconds; immutable once registered.
    pub request_time_ps: u64,
    pub partition_id: u32,
    /// Pseudo-operation producing graph inputs and weights.
    root_node_id: u32,
    graph: GraphFile,
    dynamic_dims: HashMap<String, u64>,
    /// Cap on attention blocks; negative means unlimited.
    nr_atten: i64,

    pub tensors: HashMap<u32, Tensor>,
    tensor_names: HashMap<String, u32>,
    pub operations: HashMap<u32, Operation>,
    /// Node-stream order; used for deterministic iteration.
    op_order: Vec<u32>,
    executable: Vec<u32>,

    /// Bump allocator for this model's tensor address ranges. Sequential
    /// atoms interleave across DRAM channels, so a simple bump is enough
    /// to spread traffic.
    next_alloc: address,

    started: bool,
    pub start_time_ps: u64,
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Model({}, id={})", self.name, self.id)
    }
}

impl Model {
    #[must_use]
    pub fn new(graph: GraphFile, workload: &WorkloadConfig) -> Self {
        let name = if graph.name.is_empty() {
            workload.path.display().to_string()
        } else {
            graph.name.clone()
        };
        Self {
            id: generate_id(),
            name,
            // request time is given in microseconds
            request_time_ps: (workload.request_time * 1e6) as u64,
            partition_id: workload.partition_id,
            root_node_id: generate_id(),
            graph,
            dynamic_dims: workload.dynamic_dims.clone(),
            nr_atten: workload.nr_atten,
            tensors: HashMap::new(),
            tensor_names: HashMap::new(),
            operations: HashMap::new(),
            op_order: Vec::new(),
            executable: Vec::new(),
            next_alloc: 0,
            started: false,
            start_time_ps: 0,
        }
    }

    /// Build the DAG: resolve input shapes, materialize weights, run the
    /// operation factory over the node stream and generate tiles.
    pub fn initialize(&mut self, config: &SimulationConfig) {
        self.initialize_inputs(config);

        for init in self.graph.initializers.clone() {
            let mut tensor = Tensor::new(
                generate_id(),
                init.name,
                init.dims,
                config.precision,
                Some(self.root_node_id),
            );
            tensor.set_produced();
            self.add_tensor(tensor);
        }

        let mut nr_skip: i64 = 0;
        for node in self.graph.nodes.clone() {
            let Some(op_id) = self.create_operation(&node, config) else {
                continue;
            };
            if node.op_type == "SkipLayerNormalization" && self.nr_atten >= 0 {
                nr_skip += 1;
                if nr_skip >= self.nr_atten * 2 {
                    // cap the graph to nr_atten attention blocks
                    self.operations.get_mut(&op_id).unwrap().outputs.clear();
                    break;
                }
            }
        }

        self.wire_edges();

        // assign DRAM ranges before tile generation, in creation order
        let align = config.dram_atomic_bytes;
        let mut tensor_ids: Vec<u32> = self.tensors.keys().copied().collect();
        tensor_ids.sort_unstable();
        for id in tensor_ids {
            let tensor = self.tensors.get_mut(&id).unwrap();
            tensor.base_addr = self.next_alloc;
            self.next_alloc += tensor.size_bytes(align).max(align);
        }

        let model_id = self.id;
        let tensors = &self.tensors;
        for id in &self.op_order {
            let op = self.operations.get_mut(id).unwrap();
            op.initialize_tiles(model_id, config, tensors);
        }

        for id in self.op_order.clone() {
            if self.op_executable(id) {
                log::debug!("runnable op, {}", self.operations[&id]);
                self.executable.push(id);
            }
        }
    }

    fn initialize_inputs(&mut self, config: &SimulationConfig) {
        let inputs = self.graph.inputs.clone();
        let num_inputs = inputs.len();
        for info in inputs {
            let mut dims = Vec::with_capacity(info.dims.len());
            let mut missing = None;
            for dim in &info.dims {
                match dim {
                    Dim::Value(v) => dims.push(*v),
                    Dim::Param(name) => match self.dynamic_dims.get(name) {
                        Some(v) => dims.push(*v),
                        None => {
                            missing = Some(name.clone());
                            break;
                        }
                    },
                }
            }
            if let Some(param) = missing {
                log::warn!(
                    "input {}: no binding for dynamic axis {:?}, skipping",
                    info.name,
                    param
                );
                continue;
            }

            // NCHW to NHWC convert
            if num_inputs == 1 && dims.len() == 4 && dims[2] == dims[3] {
                let channel = dims.remove(1);
                dims.push(channel);
            }

            let mut tensor = Tensor::new(
                generate_id(),
                info.name.clone(),
                dims,
                config.precision,
                Some(self.root_node_id),
            );
            tensor.set_produced();
            self.add_tensor(tensor);
        }
    }

    /// The operation factory: returns the created operation's id, or `None`
    /// when the node is skipped.
    fn create_operation(&mut self, node: &crate::graph::Node, config: &SimulationConfig) -> Option<u32> {
        let Some(kind) = OpKind::from_op_type(&node.op_type) else {
            log::warn!("unsupported op {} ({}), skipping", node.op_type, node.name);
            return None;
        };
        let id = generate_id();
        let mut op = Operation::new(id, node.name.clone(), kind);
        for input in &node.inputs {
            let tensor_id = match self.tensor_names.get(input) {
                Some(tensor_id) => *tensor_id,
                None => {
                    // producer missing (skipped op or absent initializer):
                    // the placeholder is never produced and this operation
                    // never becomes executable
                    let placeholder =
                        Tensor::new(generate_id(), input.clone(), Vec::new(), config.precision, None);
                    let tensor_id = placeholder.id;
                    self.add_tensor(placeholder);
                    tensor_id
                }
            };
            op.inputs.push(tensor_id);
        }
        for output in &node.outputs {
            let tensor = Tensor::new(
                generate_id(),
                output.clone(),
                self.infer_output_dims(&op),
                config.precision,
                Some(id),
            );
            op.outputs.push(tensor.id);
            self.add_tensor(tensor);
        }
        self.op_order.push(id);
        self.operations.insert(id, op);
        Some(id)
    }

    /// Output shape: the first input's shape (no numeric inference is
    /// performed, only traffic volume matters).
    fn infer_output_dims(&self, op: &Operation) -> Vec<u64> {
        op.inputs
            .first()
            .and_then(|id| self.tensors.get(id))
            .map(|t| t.dims.clone())
            .unwrap_or_default()
    }

    fn add_tensor(&mut self, tensor: Tensor) {
        self.tensor_names.insert(tensor.name.clone(), tensor.id);
        self.tensors.insert(tensor.id, tensor);
    }

    fn wire_edges(&mut self) {
        let mut edges: Vec<(u32, u32)> = Vec::new();
        for (id, op) in &self.operations {
            for tensor_id in &op.inputs {
                if let Some(producer) = self.tensors[tensor_id].producer {
                    if producer != self.root_node_id && producer != *id {
                        edges.push((producer, *id));
                    }
                }
            }
        }
        for (parent, child) in edges {
            if !self.operations.contains_key(&parent) {
                continue;
            }
            let child_op = self.operations.get_mut(&child).unwrap();
            if !child_op.parents.contains(&parent) {
                child_op.parents.push(parent);
            }
            let parent_op = self.operations.get_mut(&parent).unwrap();
            if !parent_op.children.contains(&child) {
                parent_op.children.push(child);
            }
        }
    }

    /// An operation is executable iff all parents finished and all inputs
    /// are produced.
    #[must_use]
    pub fn op_executable(&self, id: u32) -> bool {
        let op = &self.operations[&id];
        op.parents.iter().all(|p| self.operations[p].finished())
            && op.inputs.iter().all(|t| self.tensors[t].produced())
    }

    /// Mark an operation finished and promote newly-executable children.
    pub fn set_layer_finish(&mut self, id: u32) {
        let outputs;
        let children;
        {
            let op = self.operations.get_mut(&id).unwrap();
            op.set_finish();
            outputs = op.outputs.clone();
            children = op.children.clone();
        }
        for tensor_id in outputs {
            self.tensors.get_mut(&tensor_id).unwrap().set_produced();
        }
        for child in children {
            if self.op_executable(child) && !self.executable.contains(&child) {
                self.executable.push(child);
            }
        }
    }

    pub fn pop_executable(&mut self) -> Option<u32> {
        if self.executable.is_empty() {
            None
        } else {
            Some(self.executable.remove(0))
        }
    }

    #[must_use]
    pub fn executable_len(&self) -> usize {
        self.executable.len()
    }

    #[must_use]
    pub fn check_finish(&self) -> bool {
        self.operations.values().all(Operation::finished)
    }

    pub fn update_start_time(&mut self, start_time_ps: u64) {
        if !self.started {
            self.start_time_ps = start_time_ps;
            self.started = true;
        }
    }
}
