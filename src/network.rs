/*
  Copyright© 2023 Raúl Wolters(1)

  This file is part of rustronomy-graphcut.

  rustronomy is free software: you can redistribute it and/or modify it under
  the terms of the European Union Public License version 1.2 or later, as
  published by the European Commission.

  rustronomy is distributed in the hope that it will be useful, but WITHOUT ANY
  WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
  A PARTICULAR PURPOSE. See the European Union Public License for more details.

  You should have received a copy of the EUPL in an/all official language(s) of
  the European Union along with rustronomy.  If not, see
  <https://ec.europa.eu/info/european-union-public-licence_en/>.

  (1) Resident of the Kingdom of the Netherlands; agreement between licensor and
  licensee subject to Dutch law as per article 15 of the EUPL.
*/

//! Dense, array-backed storage of a flow network.
//!
//! Nodes and edges are plain integer indices into parallel arrays. Edges are
//! always allocated in pairs: an edge and its *sister*, which points in the
//! opposite direction. The `parent` field of a node doubles as a tagged union:
//! it either holds an edge index or one of the sentinels [`NONE`], [`TERMINAL`]
//! and [`ORPHAN`].

/// Sentinel for "no node", "no edge" and "node is free".
pub const NONE: usize = usize::MAX;
/// Sentinel parent of a tree root attached directly to its terminal.
pub const TERMINAL: usize = usize::MAX - 1;
/// Sentinel parent of a node that lost its tree during augmentation.
pub const ORPHAN: usize = usize::MAX - 2;

#[derive(Debug, Clone)]
/// Flow network sized for a fixed number of nodes and undirected edges.
///
/// Node fields are indexed by node id (`0..num_nodes`), edge fields by edge id
/// (`0..2*num_edges`). The network never grows after construction. Indexing
/// outside of these bounds panics.
pub struct FlowNetwork {
  num_nodes: usize,
  num_edges: usize,

  //Node arrays
  first_outgoing: Vec<usize>,
  parent: Vec<usize>,
  next_node: Vec<usize>,
  timestamp: Vec<usize>,
  distance: Vec<usize>,
  in_sink: Vec<bool>,
  marked: Vec<bool>,
  in_changed_list: Vec<bool>,
  residual_node_capacity: Vec<f32>,

  //Edge arrays
  head: Vec<usize>,
  next_edge: Vec<usize>,
  sister: Vec<usize>,
  residual_edge_capacity: Vec<f32>,
}

impl FlowNetwork {
  /// Allocates a network with `num_nodes` nodes and room for `num_edges`
  /// undirected edges (an edge and its sister count as one).
  pub fn new(num_nodes: usize, num_edges: usize) -> Self {
    let edge_slots = 2 * num_edges;
    FlowNetwork {
      num_nodes,
      num_edges,
      first_outgoing: vec![NONE; num_nodes],
      parent: vec![NONE; num_nodes],
      next_node: vec![NONE; num_nodes],
      timestamp: vec![0; num_nodes],
      distance: vec![0; num_nodes],
      in_sink: vec![false; num_nodes],
      marked: vec![false; num_nodes],
      in_changed_list: vec![false; num_nodes],
      residual_node_capacity: vec![0.0; num_nodes],
      head: vec![NONE; edge_slots],
      next_edge: vec![NONE; edge_slots],
      sister: vec![NONE; edge_slots],
      residual_edge_capacity: vec![0.0; edge_slots],
    }
  }

  /// Number of nodes in the network.
  pub fn num_nodes(&self) -> usize {
    self.num_nodes
  }

  /// Number of undirected edges the network was sized for.
  pub fn num_edges(&self) -> usize {
    self.num_edges
  }

  /// Iterates over the outgoing edges of `node`, newest first.
  pub fn outgoing(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
    let first = self.first_outgoing[node];
    std::iter::successors(if first == NONE { None } else { Some(first) }, move |&edge| {
      let next = self.next_edge[edge];
      if next == NONE {
        None
      } else {
        Some(next)
      }
    })
  }

  ////////////////////////////////////////////////////////////////////////////
  //                               NODE FIELDS                              //
  ////////////////////////////////////////////////////////////////////////////

  #[inline(always)]
  pub fn first_outgoing(&self, node: usize) -> usize {
    self.first_outgoing[node]
  }

  #[inline(always)]
  pub(crate) fn set_first_outgoing(&mut self, node: usize, edge: usize) {
    self.first_outgoing[node] = edge;
  }

  /// Edge towards the parent of `node`, or one of the sentinels.
  #[inline(always)]
  pub fn parent(&self, node: usize) -> usize {
    self.parent[node]
  }

  #[inline(always)]
  pub(crate) fn set_parent(&mut self, node: usize, edge: usize) {
    self.parent[node] = edge;
  }

  /// Next node in the active queue. A node pointing to itself is the tail of
  /// its queue, `NONE` means the node is not queued.
  #[inline(always)]
  pub fn next_node(&self, node: usize) -> usize {
    self.next_node[node]
  }

  #[inline(always)]
  pub(crate) fn set_next_node(&mut self, node: usize, next: usize) {
    self.next_node[node] = next;
  }

  #[inline(always)]
  pub fn timestamp(&self, node: usize) -> usize {
    self.timestamp[node]
  }

  #[inline(always)]
  pub(crate) fn set_timestamp(&mut self, node: usize, timestamp: usize) {
    self.timestamp[node] = timestamp;
  }

  #[inline(always)]
  pub fn distance(&self, node: usize) -> usize {
    self.distance[node]
  }

  #[inline(always)]
  pub(crate) fn set_distance(&mut self, node: usize, distance: usize) {
    self.distance[node] = distance;
  }

  /// Whether `node` belongs to the sink tree. Only meaningful while the node
  /// has a parent.
  #[inline(always)]
  pub fn is_in_sink(&self, node: usize) -> bool {
    self.in_sink[node]
  }

  #[inline(always)]
  pub(crate) fn set_in_sink(&mut self, node: usize, in_sink: bool) {
    self.in_sink[node] = in_sink;
  }

  #[inline(always)]
  pub fn is_marked(&self, node: usize) -> bool {
    self.marked[node]
  }

  #[inline(always)]
  pub(crate) fn set_marked(&mut self, node: usize, marked: bool) {
    self.marked[node] = marked;
  }

  #[inline(always)]
  pub fn is_in_changed_list(&self, node: usize) -> bool {
    self.in_changed_list[node]
  }

  #[inline(always)]
  pub(crate) fn set_in_changed_list(&mut self, node: usize, changed: bool) {
    self.in_changed_list[node] = changed;
  }

  /// Signed terminal capacity of `node`: positive values are residual capacity
  /// from the source, negative values residual capacity towards the sink.
  #[inline(always)]
  pub fn residual_node_capacity(&self, node: usize) -> f32 {
    self.residual_node_capacity[node]
  }

  #[inline(always)]
  pub(crate) fn set_residual_node_capacity(&mut self, node: usize, capacity: f32) {
    self.residual_node_capacity[node] = capacity;
  }

  ////////////////////////////////////////////////////////////////////////////
  //                               EDGE FIELDS                              //
  ////////////////////////////////////////////////////////////////////////////

  #[inline(always)]
  pub fn head(&self, edge: usize) -> usize {
    self.head[edge]
  }

  #[inline(always)]
  pub(crate) fn set_head(&mut self, edge: usize, node: usize) {
    self.head[edge] = node;
  }

  #[inline(always)]
  pub fn next_edge(&self, edge: usize) -> usize {
    self.next_edge[edge]
  }

  #[inline(always)]
  pub(crate) fn set_next_edge(&mut self, edge: usize, next: usize) {
    self.next_edge[edge] = next;
  }

  #[inline(always)]
  pub fn sister(&self, edge: usize) -> usize {
    self.sister[edge]
  }

  #[inline(always)]
  pub(crate) fn set_sister(&mut self, edge: usize, sister: usize) {
    self.sister[edge] = sister;
  }

  #[inline(always)]
  pub fn residual_edge_capacity(&self, edge: usize) -> f32 {
    self.residual_edge_capacity[edge]
  }

  #[inline(always)]
  pub(crate) fn set_residual_edge_capacity(&mut self, edge: usize, capacity: f32) {
    self.residual_edge_capacity[edge] = capacity;
  }
}
