//! Step dependency graph.
//!
//! Nodes are added in declaration order, so a node index is also the step's
//! position in the definition. Ties in the execution order are broken by that
//! index, which makes the order deterministic for a given definition.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use super::types::Step;

pub struct DependencyGraph {
  graph: DiGraph<usize, ()>,
}

impl DependencyGraph {
  /// Build the graph with an edge from each dependency to its dependent.
  ///
  /// Dependencies naming unknown steps are ignored here; the definition
  /// parser rejects them.
  pub fn from_steps(steps: &[Step]) -> Self {
    let mut graph = DiGraph::new();
    let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();

    for (index, step) in steps.iter().enumerate() {
      nodes.insert(step.id.as_str(), graph.add_node(index));
    }

    for step in steps {
      let dependent = nodes[step.id.as_str()];
      for dep in step.dependencies() {
        if let Some(&dependency) = nodes.get(dep) {
          graph.add_edge(dependency, dependent, ());
        }
      }
    }

    Self { graph }
  }

  /// Execution order as step indices.
  ///
  /// Returns the index of a step on a cycle if the graph is not acyclic.
  pub fn order(&self) -> Result<Vec<usize>, usize> {
    toposort(&self.graph, None).map_err(|cycle| self.graph[cycle.node_id()])?;

    // Kahn's algorithm, always releasing the earliest declared ready step
    let mut in_degree: Vec<usize> = self
      .graph
      .node_indices()
      .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
      .collect();

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
      .iter()
      .enumerate()
      .filter(|(_, degree)| **degree == 0)
      .map(|(index, _)| Reverse(index))
      .collect();

    let mut order = Vec::with_capacity(in_degree.len());
    while let Some(Reverse(index)) = ready.pop() {
      order.push(self.graph[NodeIndex::new(index)]);
      for next in self.graph.neighbors_directed(NodeIndex::new(index), Direction::Outgoing) {
        let degree = &mut in_degree[next.index()];
        *degree -= 1;
        if *degree == 0 {
          ready.push(Reverse(next.index()));
        }
      }
    }

    Ok(order)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn step(id: &str, depends: &[&str]) -> Step {
    let (kind, name) = id.split_once('.').unwrap();
    Step {
      id: id.to_string(),
      kind: kind.to_string(),
      name: name.to_string(),
      config: json!({}),
      depends: depends.iter().map(|d| d.to_string()).collect(),
      implicit: Vec::new(),
    }
  }

  #[test]
  fn independent_steps_keep_declaration_order() {
    let steps = vec![step("contract.C", &[]), step("contract.A", &[]), step("contract.B", &[])];
    assert_eq!(DependencyGraph::from_steps(&steps).order().unwrap(), vec![0, 1, 2]);
  }

  #[test]
  fn dependency_moves_ahead() {
    let steps = vec![
      step("invoke.x", &["contract.A"]),
      step("contract.B", &[]),
      step("contract.A", &[]),
    ];
    assert_eq!(DependencyGraph::from_steps(&steps).order().unwrap(), vec![1, 2, 0]);
  }

  #[test]
  fn diamond() {
    let steps = vec![
      step("contract.A", &[]),
      step("contract.B", &["contract.A"]),
      step("contract.C", &["contract.A"]),
      step("invoke.D", &["contract.C", "contract.B"]),
    ];
    assert_eq!(DependencyGraph::from_steps(&steps).order().unwrap(), vec![0, 1, 2, 3]);
  }

  #[test]
  fn cycle_reports_a_member() {
    let steps = vec![
      step("contract.Free", &[]),
      step("contract.A", &["contract.B"]),
      step("contract.B", &["contract.A"]),
    ];
    let member = DependencyGraph::from_steps(&steps).order().unwrap_err();
    assert!(member == 1 || member == 2);
  }
}
