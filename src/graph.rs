//! On-disk schema of a model graph.
//!
//! The graph arrives as the JSON export of an ONNX model: graph inputs with
//! numeric or symbolic dimensions, initializers (weights), and the node
//! list in topological order.

use color_eyre::eyre::{self, WrapErr};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// A tensor dimension: either a concrete value or a dynamic-axis parameter
/// (e.g. `"batch"`) substituted from the workload configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dim {
    Value(u64),
    Param(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueInfo {
    pub name: String,
    pub dims: Vec<Dim>,
}

/// A weight tensor; its data lives in DRAM from model initialization on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Initializer {
    pub name: String,
    pub dims: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub name: String,
    pub op_type: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    #[serde(default)]
    pub attributes: HashMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphFile {
    #[serde(default)]
    pub name: String,
    pub inputs: Vec<ValueInfo>,
    #[serde(default)]
    pub initializers: Vec<Initializer>,
    pub nodes: Vec<Node>,
}

impl GraphFile {
    pub fn from_path(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let reader = std::fs::File::open(path)
            .wrap_err_with(|| format!("model graph at {} does not exist", path.display()))?;
        let graph = serde_json::from_reader(std::io::BufReader::new(reader))
            .wrap_err_with(|| format!("malformed model graph {}", path.display()))?;
        Ok(graph)
    }
}
