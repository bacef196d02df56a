//! Workflow graph data model.
//!
//! A workflow graph is a mapping from node id to a node record
//! `{"class_type": <operation>, "inputs": {<name>: <literal | [node-id, slot]>}}`.
//! Edges are the two-element `[node-id, slot]` arrays; they must resolve
//! to a node present in the same graph. Cycles are not checked client-side
//! (the server rejects them).

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Node identifier within one graph.
pub type NodeId = String;

/// A directed node graph in the remote server's submission format.
///
/// Thin newtype over the JSON object so graphs round-trip byte-for-byte
/// through serde while still offering typed edit helpers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowGraph(pub Map<String, Value>);

/// A dangling edge found by [`WorkflowGraph::validate_references`].
#[derive(Debug, Clone, PartialEq)]
pub struct DanglingEdge {
    /// Node holding the reference.
    pub from: NodeId,
    /// Input name carrying the reference.
    pub input: String,
    /// The referenced node id that does not exist.
    pub to: NodeId,
}

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node record built from an operation kind and its inputs.
    pub fn add_node(&mut self, id: impl Into<NodeId>, class_type: &str, inputs: Value) {
        self.0.insert(
            id.into(),
            json!({
                "class_type": class_type,
                "inputs": inputs,
            }),
        );
    }

    /// Remove a node record. Returns `true` when the node existed.
    pub fn remove_node(&mut self, id: &str) -> bool {
        self.0.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Read one input field of a node.
    pub fn input(&self, id: &str, field: &str) -> Option<&Value> {
        self.0.get(id)?.get("inputs")?.get(field)
    }

    /// Write one input field of a node.
    ///
    /// Returns `false` when the node is missing; the caller decides
    /// whether that is fatal (the patcher downgrades it to a warning,
    /// see [`crate::patch`]).
    pub fn set_input(&mut self, id: &str, field: &str, value: Value) -> bool {
        match self
            .0
            .get_mut(id)
            .and_then(|node| node.get_mut("inputs"))
            .and_then(Value::as_object_mut)
        {
            Some(inputs) => {
                inputs.insert(field.to_string(), value);
                true
            }
            None => false,
        }
    }

    /// Check the no-dangling-edge invariant: every `[node-id, slot]`
    /// reference must name a node present in this graph.
    pub fn validate_references(&self) -> Result<(), Vec<DanglingEdge>> {
        let mut dangling = Vec::new();

        for (id, node) in &self.0 {
            let Some(inputs) = node.get("inputs").and_then(Value::as_object) else {
                continue;
            };
            for (input, value) in inputs {
                if let Some(target) = edge_target(value) {
                    if !self.0.contains_key(target) {
                        dangling.push(DanglingEdge {
                            from: id.clone(),
                            input: input.clone(),
                            to: target.to_string(),
                        });
                    }
                }
            }
        }

        if dangling.is_empty() {
            Ok(())
        } else {
            Err(dangling)
        }
    }
}

/// Return the referenced node id when `value` is an edge reference
/// (`["node-id", slot]`), `None` for literals.
fn edge_target(value: &Value) -> Option<&str> {
    let arr = value.as_array()?;
    if arr.len() != 2 {
        return None;
    }
    let target = arr[0].as_str()?;
    arr[1].as_u64()?;
    Some(target)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn two_node_graph() -> WorkflowGraph {
        let mut graph = WorkflowGraph::new();
        graph.add_node("1", "EmptyLatentImage", json!({"width": 512, "height": 512}));
        graph.add_node("2", "VAEDecode", json!({"samples": ["1", 0]}));
        graph
    }

    #[test]
    fn valid_graph_passes_reference_check() {
        assert!(two_node_graph().validate_references().is_ok());
    }

    #[test]
    fn dangling_reference_is_reported() {
        let mut graph = two_node_graph();
        graph.remove_node("1");
        let dangling = graph.validate_references().unwrap_err();
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].from, "2");
        assert_eq!(dangling[0].input, "samples");
        assert_eq!(dangling[0].to, "1");
    }

    #[test]
    fn two_element_string_arrays_without_slot_are_literals() {
        // ["a", "b"] is not an edge: the second element must be a slot index.
        let mut graph = WorkflowGraph::new();
        graph.add_node("1", "Custom", json!({"pair": ["x", "y"]}));
        assert!(graph.validate_references().is_ok());
    }

    #[test]
    fn set_input_on_missing_node_returns_false() {
        let mut graph = two_node_graph();
        assert!(!graph.set_input("99", "width", json!(1024)));
        assert!(graph.set_input("1", "width", json!(1024)));
        assert_eq!(graph.input("1", "width"), Some(&json!(1024)));
    }

    #[test]
    fn graph_serializes_transparently() {
        let graph = two_node_graph();
        let value = serde_json::to_value(&graph).unwrap();
        assert!(value.get("1").is_some());
        assert_eq!(value["2"]["class_type"], "VAEDecode");

        let back: WorkflowGraph = serde_json::from_value(value).unwrap();
        assert_eq!(back, graph);
    }
}
