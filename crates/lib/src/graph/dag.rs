//! Build DAG for unit dependency management.
//!
//! Nodes are build units, edges run from a dependency to its dependent. The
//! DAG provides topological ordering, parallel execution waves and
//! dependency queries for the scheduler.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use super::GraphError;
use super::unit::{BuildUnit, UnitId};
use crate::variant::BuildVariant;

/// A DAG of build units.
#[derive(Debug, Clone)]
pub struct BuildDag {
  graph: DiGraph<UnitId, ()>,
  nodes: HashMap<UnitId, NodeIndex>,
  /// Units in insertion order. Node indices follow the same order.
  units: Vec<BuildUnit>,
}

impl BuildDag {
  /// Build a DAG from units and `(dependency, dependent)` edges.
  ///
  /// # Errors
  ///
  /// Returns `Cycle` listing every cycle found, or `DuplicateUnit` when two
  /// units share an id.
  pub fn new(units: Vec<BuildUnit>, edges: &[(UnitId, UnitId)]) -> Result<Self, GraphError> {
    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();

    for unit in &units {
      let idx = graph.add_node(unit.id.clone());
      if nodes.insert(unit.id.clone(), idx).is_some() {
        return Err(GraphError::DuplicateUnit(unit.id.clone()));
      }
    }

    for (dep, dependent) in edges {
      if let (Some(&from), Some(&to)) = (nodes.get(dep), nodes.get(dependent))
        && !graph.contains_edge(from, to)
      {
        graph.add_edge(from, to, ());
      }
    }

    let dag = Self { graph, nodes, units };
    dag.verify_acyclic()?;
    Ok(dag)
  }

  fn verify_acyclic(&self) -> Result<(), GraphError> {
    let mut cycles: Vec<String> = tarjan_scc(&self.graph)
      .into_iter()
      .filter(|scc| scc.len() > 1 || self.graph.contains_edge(scc[0], scc[0]))
      .map(|scc| self.describe_cycle(&scc))
      .collect();
    if cycles.is_empty() {
      return Ok(());
    }
    cycles.sort();
    Err(GraphError::Cycle { cycles })
  }

  /// Render one strongly connected component as `a -> b -> a`.
  fn describe_cycle(&self, scc: &[NodeIndex]) -> String {
    let members: HashSet<NodeIndex> = scc.iter().copied().collect();
    let Some(&start) = scc.iter().min() else {
      return String::new();
    };

    // Shortest path from start back to itself, staying inside the component.
    let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut queue = VecDeque::from([start]);
    let mut closing = None;
    while let Some(node) = queue.pop_front() {
      for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
        if next == start {
          closing = Some(node);
          break;
        }
        if members.contains(&next) && !parent.contains_key(&next) {
          parent.insert(next, node);
          queue.push_back(next);
        }
      }
      if closing.is_some() {
        break;
      }
    }

    let mut path = vec![start];
    let mut cursor = closing.unwrap_or(start);
    while cursor != start {
      path.push(cursor);
      cursor = parent.get(&cursor).copied().unwrap_or(start);
    }
    path[1..].reverse();
    path.push(start);
    path.iter().map(|idx| self.graph[*idx].0.as_str()).collect::<Vec<_>>().join(" -> ")
  }

  /// Units in an order where dependencies come before dependents.
  pub fn topological_units(&self) -> Result<Vec<&BuildUnit>, GraphError> {
    let sorted = toposort(&self.graph, None).map_err(|cycle| GraphError::Cycle {
      cycles: vec![self.graph[cycle.node_id()].to_string()],
    })?;
    Ok(sorted.into_iter().map(|idx| &self.units[idx.index()]).collect())
  }

  /// Units organized into parallel execution waves.
  ///
  /// Each wave contains units whose dependencies are all in earlier waves.
  /// Within a wave, units keep insertion order: variant order, then recipe
  /// load order.
  pub fn unit_waves(&self) -> Result<Vec<Vec<UnitId>>, GraphError> {
    // Kahn's algorithm, one level at a time
    let mut in_degree: HashMap<NodeIndex, usize> = self
      .graph
      .node_indices()
      .map(|idx| (idx, self.graph.neighbors_directed(idx, Direction::Incoming).count()))
      .collect();
    let mut remaining: Vec<NodeIndex> = self.graph.node_indices().collect();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
      let (ready, rest): (Vec<NodeIndex>, Vec<NodeIndex>) = remaining.into_iter().partition(|idx| in_degree[idx] == 0);
      if ready.is_empty() {
        return Err(GraphError::Cycle {
          cycles: rest.iter().map(|idx| self.graph[*idx].to_string()).collect(),
        });
      }
      for &idx in &ready {
        for neighbor in self.graph.neighbors_directed(idx, Direction::Outgoing) {
          if let Some(deg) = in_degree.get_mut(&neighbor) {
            *deg = deg.saturating_sub(1);
          }
        }
      }
      waves.push(ready.into_iter().map(|idx| self.graph[idx].clone()).collect());
      remaining = rest;
    }

    Ok(waves)
  }

  /// Direct dependencies of a unit.
  pub fn dependencies(&self, id: &UnitId) -> Vec<&UnitId> {
    self.neighbors(id, Direction::Incoming)
  }

  /// Direct dependents of a unit.
  pub fn dependents(&self, id: &UnitId) -> Vec<&UnitId> {
    self.neighbors(id, Direction::Outgoing)
  }

  fn neighbors(&self, id: &UnitId, direction: Direction) -> Vec<&UnitId> {
    let Some(&idx) = self.nodes.get(id) else {
      return Vec::new();
    };
    let mut out: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
    out.sort();
    out.into_iter().map(|n| &self.graph[n]).collect()
  }

  pub fn unit(&self, id: &UnitId) -> Option<&BuildUnit> {
    self.nodes.get(id).map(|idx| &self.units[idx.index()])
  }

  pub fn units(&self) -> &[BuildUnit] {
    &self.units
  }

  pub fn unit_count(&self) -> usize {
    self.units.len()
  }

  /// Variants that have at least one unit, in first-seen order.
  pub fn variants(&self) -> Vec<&BuildVariant> {
    let mut out: Vec<&BuildVariant> = Vec::new();
    for unit in &self.units {
      if !out.contains(&&unit.variant) {
        out.push(&unit.variant);
      }
    }
    out
  }

  /// A copy restricted to `roots` and everything they transitively depend on.
  pub fn restricted_to(&self, roots: &[UnitId]) -> Self {
    let mut keep: HashSet<NodeIndex> = HashSet::new();
    let mut stack: Vec<NodeIndex> = roots.iter().filter_map(|id| self.nodes.get(id).copied()).collect();
    while let Some(idx) = stack.pop() {
      if keep.insert(idx) {
        stack.extend(self.graph.neighbors_directed(idx, Direction::Incoming));
      }
    }

    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();
    let mut units = Vec::new();
    for idx in self.graph.node_indices().filter(|idx| keep.contains(idx)) {
      let unit = self.units[idx.index()].clone();
      nodes.insert(unit.id.clone(), graph.add_node(unit.id.clone()));
      units.push(unit);
    }
    for edge in self.graph.raw_edges() {
      let (from, to) = (&self.graph[edge.source()], &self.graph[edge.target()]);
      if let (Some(&a), Some(&b)) = (nodes.get(from), nodes.get(to)) {
        graph.add_edge(a, b, ());
      }
    }
    Self { graph, nodes, units }
  }
}
