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

//! Incremental max-flow/min-cut solver (Boykov & Kolmogorov, 2004[^1]).
//!
//! The solver grows two search trees, one rooted at the source and one rooted
//! at the sink. Whenever the trees touch, the path connecting them is augmented
//! and the nodes that lost their connection to a terminal (*orphans*) are
//! either re-attached to their tree or freed. The trees survive between calls
//! to [`GraphCut::compute_maximum_flow`], which makes re-solving after a local
//! change in terminal weights cheap.
//!
//! [^1]: Y. Boykov and V. Kolmogorov. **An Experimental Comparison of
//! Min-Cut/Max-Flow Algorithms for Energy Minimization in Vision.** *IEEE
//! Transactions on Pattern Analysis and Machine Intelligence*, September 2004.

use std::collections::VecDeque;

use crate::network::{FlowNetwork, NONE, ORPHAN, TERMINAL};

//Distance of a node whose origin could not be traced back to a terminal
const INFINITE_DISTANCE: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// The two segments, represented by the two terminal nodes of the graph.
pub enum Terminal {
  /// a.k.a. the source
  Foreground,
  /// a.k.a. the sink
  Background,
}

#[derive(Debug, Clone)]
/// Max-flow solver operating on a [`FlowNetwork`] it owns.
///
/// Typical use: create a solver for `N` nodes and `E` undirected edges, set the
/// terminal weights of every node and the weights of every edge, then call
/// `compute_maximum_flow` and read the labels with `terminal`.
/// ```
/// use rustronomy_graphcut::prelude::*;
///
/// let mut cut = GraphCut::new(2, 1);
/// cut.set_terminal_weights(0, 10.0, 0.0);
/// cut.set_terminal_weights(1, 0.0, 10.0);
/// cut.set_edge_weight(0, 1, 5.0);
/// assert_eq!(cut.compute_maximum_flow(false, None), 5.0);
/// assert_eq!(cut.terminal(0), Terminal::Foreground);
/// assert_eq!(cut.terminal(1), Terminal::Background);
/// ```
pub struct GraphCut {
  network: FlowNetwork,

  //Counter for the allocation of edge pairs
  edge_num: usize,

  //Flow pushed so far, including the pre-saturated terminal capacities
  total_flow: f32,

  //Number of completed max-flow computations
  maxflow_iteration: usize,

  //Two intrusive queues of active nodes. Nodes are chained through their
  //`next_node` field, the last node of a queue points to itself.
  active_queue_first: [usize; 2],
  active_queue_last: [usize; 2],

  orphans: VecDeque<usize>,

  //Nodes whose `in_changed_list` flag is set
  changed: Vec<usize>,

  //Counter for iterations of the main loop
  time: usize,

  #[cfg(feature = "debug")]
  stats: crate::performance_monitoring::SolverStats,
}

impl GraphCut {
  /// Allocates a solver for `num_nodes` nodes and at most `num_edges`
  /// undirected edges (a directed edge and its counterpart count as one).
  pub fn new(num_nodes: usize, num_edges: usize) -> Self {
    GraphCut {
      network: FlowNetwork::new(num_nodes, num_edges),
      edge_num: 0,
      total_flow: 0.0,
      maxflow_iteration: 0,
      active_queue_first: [NONE; 2],
      active_queue_last: [NONE; 2],
      orphans: VecDeque::new(),
      changed: Vec::new(),
      time: 0,
      #[cfg(feature = "debug")]
      stats: Default::default(),
    }
  }

  /// Number of nodes in the graph.
  pub fn num_nodes(&self) -> usize {
    self.network.num_nodes()
  }

  /// Number of undirected edges the graph was sized for.
  pub fn num_edges(&self) -> usize {
    self.network.num_edges()
  }

  /// Read-only view of the underlying flow network.
  pub fn network(&self) -> &FlowNetwork {
    &self.network
  }

  /// Flow value after the most recent computation (or the pre-saturated
  /// terminal flow if no computation has been run yet).
  pub fn total_flow(&self) -> f32 {
    self.total_flow
  }

  /// Adds `source` to the affinity of `node` for the foreground (source) and
  /// `sink` to its affinity for the background (sink). Repeated calls for the
  /// same node accumulate.
  pub fn set_terminal_weights(&mut self, node: usize, mut source: f32, mut sink: f32) {
    let delta = self.network.residual_node_capacity(node);
    if delta > 0.0 {
      source += delta;
    } else {
      sink -= delta;
    }

    //Capacity present on both terminal links can never contribute to a cut
    //decision, so it counts as flow right away
    self.total_flow += if source < sink { source } else { sink };
    self.network.set_residual_node_capacity(node, source - sink);
  }

  /// Sets the weight of an undirected edge between `node1` and `node2`.
  ///
  /// # Panics
  /// Panics if more edges are added than were declared at construction.
  pub fn set_edge_weight(&mut self, node1: usize, node2: usize, weight: f32) {
    self.set_edge_weights(node1, node2, weight, weight)
  }

  /// Sets the weights of a pair of directed edges between `node1` and `node2`.
  ///
  /// # Panics
  /// Panics if more edges are added than were declared at construction, or if
  /// either node does not exist.
  pub fn set_edge_weights(&mut self, node1: usize, node2: usize, weight1to2: f32, weight2to1: f32) {
    assert!(
      self.edge_num / 2 < self.network.num_edges(),
      "cannot add more than the {} edges declared at construction",
      self.network.num_edges()
    );

    let edge = self.edge_num;
    let reverse_edge = self.edge_num + 1;
    self.edge_num += 2;

    let net = &mut self.network;
    net.set_sister(edge, reverse_edge);
    net.set_sister(reverse_edge, edge);

    //Prepend to the adjacency lists of both nodes
    let first1 = net.first_outgoing(node1);
    net.set_next_edge(edge, first1);
    net.set_first_outgoing(node1, edge);
    let first2 = net.first_outgoing(node2);
    net.set_next_edge(reverse_edge, first2);
    net.set_first_outgoing(node2, reverse_edge);

    net.set_head(edge, node2);
    net.set_head(reverse_edge, node1);

    net.set_residual_edge_capacity(edge, weight1to2);
    net.set_residual_edge_capacity(reverse_edge, weight2to1);
  }

  /// Computes the maximum flow (equivalently: the minimum cut) and returns the
  /// total flow.
  ///
  /// If `reuse_trees` is set, the search trees of the previous call are reused
  /// and only the nodes passed to [`GraphCut::mark_node`] since then are
  /// re-examined. On the first call this flag is ignored.
  ///
  /// If `changed_nodes` is given, it is cleared and filled (in ascending order)
  /// with every node that may have changed its segment during this call.
  pub fn compute_maximum_flow(
    &mut self,
    reuse_trees: bool,
    changed_nodes: Option<&mut Vec<usize>>,
  ) -> f32 {
    #[cfg(feature = "debug")]
    {
      self.stats = Default::default();
    }

    if reuse_trees && self.maxflow_iteration > 0 {
      self.reuse_trees_init();
    } else {
      self.init();
    }

    let mut current_node = NONE;

    loop {
      let mut active_node = current_node;

      if active_node != NONE {
        //Remove active flag
        self.network.set_next_node(active_node, NONE);
        if self.network.parent(active_node) == NONE {
          active_node = NONE;
        }
      }
      if active_node == NONE {
        active_node = self.next_active_node();
        if active_node == NONE {
          //No active nodes left
          break;
        }
      }

      let path_edge = self.grow(active_node);
      self.time += 1;

      if path_edge != NONE {
        //Keep the node active, it may still have neighbours to grow into
        self.network.set_next_node(active_node, active_node);
        current_node = active_node;

        self.augment(path_edge);
        self.adopt_orphans();
      } else {
        current_node = NONE;
      }
    }

    self.maxflow_iteration += 1;

    if let Some(nodes) = changed_nodes {
      nodes.clear();
      nodes.extend_from_slice(&self.changed);
      nodes.sort_unstable();
    }

    #[cfg(feature = "debug")]
    println!(
      "max-flow #{} finished with flow {}: {}",
      self.maxflow_iteration, self.total_flow, self.stats
    );

    self.total_flow
  }

  /// Returns the segment `node` belongs to. Nodes that are connected to
  /// neither terminal are assigned to the background.
  pub fn terminal(&self, node: usize) -> Terminal {
    if self.network.parent(node) != NONE && !self.network.is_in_sink(node) {
      Terminal::Foreground
    } else {
      Terminal::Background
    }
  }

  /// Marks `node` as changed since the previous computation.
  ///
  /// Call this for every node whose terminal weights changed before calling
  /// `compute_maximum_flow(true, ..)`.
  pub fn mark_node(&mut self, node: usize) {
    self.set_node_active(node);
    self.network.set_marked(node, true);
  }

  ////////////////////////////////////////////////////////////////////////////
  //                             QUEUE HANDLING                             //
  ////////////////////////////////////////////////////////////////////////////

  //Appends a node to the second active queue, unless it is queued already
  fn set_node_active(&mut self, node: usize) {
    if self.network.next_node(node) != NONE {
      return;
    }
    if self.active_queue_last[1] != NONE {
      self.network.set_next_node(self.active_queue_last[1], node);
    } else {
      self.active_queue_first[1] = node;
    }
    self.active_queue_last[1] = node;
    self.network.set_next_node(node, node);
  }

  //Pops active nodes until one is found that still belongs to a tree. The
  //first queue is drained before the second queue takes its place.
  fn next_active_node(&mut self) -> usize {
    loop {
      let mut node = self.active_queue_first[0];

      if node == NONE {
        node = self.active_queue_first[1];
        self.active_queue_first = [node, NONE];
        self.active_queue_last = [self.active_queue_last[1], NONE];
        if node == NONE {
          return NONE;
        }
      }

      let next = self.network.next_node(node);
      if next == node {
        //Last node of the queue
        self.active_queue_first[0] = NONE;
        self.active_queue_last[0] = NONE;
      } else {
        self.active_queue_first[0] = next;
      }
      self.network.set_next_node(node, NONE);

      if self.network.parent(node) != NONE {
        return node;
      }
    }
  }

  fn add_orphan_at_front(&mut self, node: usize) {
    self.network.set_parent(node, ORPHAN);
    self.orphans.push_front(node);
  }

  fn add_orphan_at_back(&mut self, node: usize) {
    self.network.set_parent(node, ORPHAN);
    self.orphans.push_back(node);
  }

  fn add_to_changed_list(&mut self, node: usize) {
    if !self.network.is_in_changed_list(node) {
      self.network.set_in_changed_list(node, true);
      self.changed.push(node);
    }
  }

  fn clear_changed_list(&mut self) {
    for node in std::mem::take(&mut self.changed) {
      self.network.set_in_changed_list(node, false);
    }
  }

  ////////////////////////////////////////////////////////////////////////////
  //                             INITIALISATION                             //
  ////////////////////////////////////////////////////////////////////////////

  //Builds both trees from scratch: every node with terminal capacity becomes a
  //root of the matching tree, all other nodes start out free.
  fn init(&mut self) {
    self.active_queue_first = [NONE; 2];
    self.active_queue_last = [NONE; 2];
    self.orphans.clear();
    self.changed.clear();
    self.time = 0;

    for node in 0..self.network.num_nodes() {
      self.network.set_next_node(node, NONE);
      self.network.set_marked(node, false);
      self.network.set_in_changed_list(node, false);
      self.network.set_timestamp(node, self.time);

      let capacity = self.network.residual_node_capacity(node);
      if capacity != 0.0 {
        self.network.set_in_sink(node, capacity < 0.0);
        self.network.set_parent(node, TERMINAL);
        self.set_node_active(node);
        self.network.set_distance(node, 1);
      } else {
        self.network.set_parent(node, NONE);
      }
    }
  }

  //Repairs the trees of the previous computation around the marked nodes
  fn reuse_trees_init(&mut self) {
    let mut queue_start = self.active_queue_first[1];

    self.active_queue_first = [NONE; 2];
    self.active_queue_last = [NONE; 2];
    self.orphans.clear();
    self.clear_changed_list();
    self.time += 1;

    while queue_start != NONE {
      let node = queue_start;
      queue_start = self.network.next_node(node);
      if queue_start == node {
        queue_start = NONE;
      }

      self.network.set_next_node(node, NONE);
      self.network.set_marked(node, false);
      self.set_node_active(node);
      self.add_to_changed_list(node);

      let capacity = self.network.residual_node_capacity(node);
      if capacity == 0.0 {
        if self.network.parent(node) != NONE {
          self.add_orphan_at_back(node);
        }
        continue;
      }

      let in_sink = capacity < 0.0;
      if self.network.parent(node) == NONE || self.network.is_in_sink(node) != in_sink {
        //The node switches trees (or joins one): children attached through it
        //become orphans, neighbours in the opposite tree may reach it now
        self.network.set_in_sink(node, in_sink);

        let mut edge = self.network.first_outgoing(node);
        while edge != NONE {
          let neighbour = self.network.head(edge);
          let sister = self.network.sister(edge);

          if !self.network.is_marked(neighbour) {
            if self.network.parent(neighbour) == sister {
              self.add_orphan_at_back(neighbour);
            }
            let crossing = if in_sink {
              self.network.residual_edge_capacity(sister)
            } else {
              self.network.residual_edge_capacity(edge)
            };
            if self.network.parent(neighbour) != NONE
              && self.network.is_in_sink(neighbour) != in_sink
              && crossing > 0.0
            {
              self.set_node_active(neighbour);
            }
          }
          edge = self.network.next_edge(edge);
        }
      }

      self.network.set_parent(node, TERMINAL);
      self.network.set_timestamp(node, self.time);
      self.network.set_distance(node, 1);
    }

    self.adopt_orphans();
  }

  ////////////////////////////////////////////////////////////////////////////
  //                        GROWTH, AUGMENTATION, ADOPTION                  //
  ////////////////////////////////////////////////////////////////////////////

  //Scans the neighbours of `active_node`, attaching free nodes to its tree.
  //Returns the source-to-sink edge connecting both trees, or NONE.
  fn grow(&mut self, active_node: usize) -> usize {
    let in_sink = self.network.is_in_sink(active_node);
    let active_timestamp = self.network.timestamp(active_node);
    let active_distance = self.network.distance(active_node);

    let mut edge = self.network.first_outgoing(active_node);
    while edge != NONE {
      let sister = self.network.sister(edge);

      //The sink tree grows against the direction of flow
      let capacity = if in_sink {
        self.network.residual_edge_capacity(sister)
      } else {
        self.network.residual_edge_capacity(edge)
      };

      if capacity != 0.0 {
        let head = self.network.head(edge);

        if self.network.parent(head) == NONE {
          //Free node found, add it to our tree
          self.network.set_in_sink(head, in_sink);
          self.network.set_parent(head, sister);
          self.network.set_timestamp(head, active_timestamp);
          self.network.set_distance(head, active_distance + 1);
          self.set_node_active(head);
          self.add_to_changed_list(head);
        } else if self.network.is_in_sink(head) != in_sink {
          //Node belongs to the other tree: path found
          return if in_sink { sister } else { edge };
        } else if self.network.timestamp(head) <= active_timestamp
          && self.network.distance(head) > active_distance
        {
          //Node belongs to our tree, shorten its distance to the terminal
          self.network.set_parent(head, sister);
          self.network.set_timestamp(head, active_timestamp);
          self.network.set_distance(head, active_distance + 1);
        }
      }

      edge = self.network.next_edge(edge);
    }

    NONE
  }

  //Pushes the bottleneck capacity along the path through `middle`, which runs
  //from a source tree node to a sink tree node
  fn augment(&mut self, middle: usize) {
    let middle_sister = self.network.sister(middle);

    //(1a) bottleneck in the source tree
    let mut bottleneck = self.network.residual_edge_capacity(middle);
    let mut node = self.network.head(middle_sister);
    loop {
      let edge = self.network.parent(node);
      if edge == TERMINAL {
        break;
      }
      debug_assert!(edge != NONE && edge != ORPHAN, "source path broken at node {node}");
      bottleneck = bottleneck.min(self.network.residual_edge_capacity(self.network.sister(edge)));
      node = self.network.head(edge);
    }
    bottleneck = bottleneck.min(self.network.residual_node_capacity(node));

    //(1b) bottleneck in the sink tree
    node = self.network.head(middle);
    loop {
      let edge = self.network.parent(node);
      if edge == TERMINAL {
        break;
      }
      debug_assert!(edge != NONE && edge != ORPHAN, "sink path broken at node {node}");
      bottleneck = bottleneck.min(self.network.residual_edge_capacity(edge));
      node = self.network.head(edge);
    }
    bottleneck = bottleneck.min(-self.network.residual_node_capacity(node));

    debug_assert!(bottleneck > 0.0, "augmenting path without capacity ({bottleneck})");

    //(2a) augment the source tree
    self.add_edge_flow(middle, bottleneck);
    node = self.network.head(middle_sister);
    loop {
      let edge = self.network.parent(node);
      if edge == TERMINAL {
        break;
      }
      let sister = self.network.sister(edge);
      self.add_edge_flow(sister, bottleneck);
      if self.network.residual_edge_capacity(sister) == 0.0 {
        self.add_orphan_at_front(node);
      }
      node = self.network.head(edge);
    }
    let capacity = self.network.residual_node_capacity(node) - bottleneck;
    self.network.set_residual_node_capacity(node, capacity);
    if capacity == 0.0 {
      self.add_orphan_at_front(node);
    }

    //(2b) augment the sink tree
    node = self.network.head(middle);
    loop {
      let edge = self.network.parent(node);
      if edge == TERMINAL {
        break;
      }
      self.add_edge_flow(edge, bottleneck);
      if self.network.residual_edge_capacity(edge) == 0.0 {
        self.add_orphan_at_front(node);
      }
      node = self.network.head(edge);
    }
    let capacity = self.network.residual_node_capacity(node) + bottleneck;
    self.network.set_residual_node_capacity(node, capacity);
    if capacity == 0.0 {
      self.add_orphan_at_front(node);
    }

    self.total_flow += bottleneck;

    #[cfg(feature = "debug")]
    {
      self.stats.augmentations += 1;
    }
  }

  //Sends `flow` along `edge`, crediting its sister with the same amount
  #[inline(always)]
  fn add_edge_flow(&mut self, edge: usize, flow: f32) {
    let sister = self.network.sister(edge);
    let capacity = self.network.residual_edge_capacity(edge);
    let reverse = self.network.residual_edge_capacity(sister);
    self.network.set_residual_edge_capacity(edge, capacity - flow);
    self.network.set_residual_edge_capacity(sister, reverse + flow);
  }

  fn adopt_orphans(&mut self) {
    while let Some(orphan) = self.orphans.pop_front() {
      self.process_orphan(orphan);
    }
  }

  //Looks for a new parent of `orphan` in its own tree. If there is none, the
  //orphan is freed and its children become orphans in turn.
  fn process_orphan(&mut self, orphan: usize) {
    let in_sink = self.network.is_in_sink(orphan);
    let mut best_edge = NONE;
    let mut min_distance = INFINITE_DISTANCE;

    #[cfg(feature = "debug")]
    {
      self.stats.adoptions += 1;
    }

    let mut orphan_edge = self.network.first_outgoing(orphan);
    while orphan_edge != NONE {
      if self.capacity_towards(orphan_edge, in_sink) != 0.0 {
        let candidate = self.network.head(orphan_edge);
        if self.network.is_in_sink(candidate) == in_sink
          && self.network.parent(candidate) != NONE
        {
          let mut distance = self.origin_distance(candidate);
          if distance < INFINITE_DISTANCE {
            if distance < min_distance {
              best_edge = orphan_edge;
              min_distance = distance;
            }
            //Stamp the path so later checks can stop early
            let mut node = candidate;
            while self.network.timestamp(node) != self.time {
              self.network.set_timestamp(node, self.time);
              self.network.set_distance(node, distance);
              distance -= 1;
              node = self.network.head(self.network.parent(node));
            }
          }
        }
      }
      orphan_edge = self.network.next_edge(orphan_edge);
    }

    self.network.set_parent(orphan, best_edge);
    if best_edge != NONE {
      self.network.set_timestamp(orphan, self.time);
      self.network.set_distance(orphan, min_distance + 1);
      return;
    }

    //No parent found: the orphan becomes free
    self.add_to_changed_list(orphan);

    let mut orphan_edge = self.network.first_outgoing(orphan);
    while orphan_edge != NONE {
      let node = self.network.head(orphan_edge);
      let parent_edge = self.network.parent(node);

      if self.network.is_in_sink(node) == in_sink && parent_edge != NONE {
        if self.capacity_towards(orphan_edge, in_sink) != 0.0 {
          self.set_node_active(node);
        }
        if parent_edge != TERMINAL
          && parent_edge != ORPHAN
          && self.network.head(parent_edge) == orphan
        {
          self.add_orphan_at_back(node);
        }
      }
      orphan_edge = self.network.next_edge(orphan_edge);
    }
  }

  //Residual capacity with which the neighbour behind `edge` can feed the
  //node `edge` leaves from, seen from the tree given by `in_sink`
  #[inline(always)]
  fn capacity_towards(&self, edge: usize, in_sink: bool) -> f32 {
    if in_sink {
      self.network.residual_edge_capacity(edge)
    } else {
      self.network.residual_edge_capacity(self.network.sister(edge))
    }
  }

  //Number of tree edges between `node` and its terminal, or INFINITE_DISTANCE
  //if the path runs into an orphan. Refreshes the stamp of the tree root.
  fn origin_distance(&mut self, mut node: usize) -> usize {
    let mut distance = 0;
    loop {
      if self.network.timestamp(node) == self.time {
        return distance + self.network.distance(node);
      }
      let parent_edge = self.network.parent(node);
      distance += 1;
      if parent_edge == TERMINAL {
        self.network.set_timestamp(node, self.time);
        self.network.set_distance(node, 1);
        return distance;
      }
      if parent_edge == ORPHAN {
        return INFINITE_DISTANCE;
      }
      node = self.network.head(parent_edge);
    }
  }
}
