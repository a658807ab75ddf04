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

//! Foreground/background segmentation of n-dimensional images.
//!
//! Each pixel becomes a node of the graph. Its terminal weights follow from the
//! normalised pixel intensity (the *data term*), and neighbouring pixels are
//! connected by edges whose weight penalises giving them different labels (the
//! *smoothness term*). The minimum cut of this graph is the segmentation with
//! the lowest energy. Dark pixels are labelled foreground (`FOREGROUND_VALUE`)
//! and bright pixels background.

use ndarray as nd;
use ndarray::Dimension;
use num_traits::{Num, ToPrimitive};
use rayon::prelude::*;

use crate::solver::{GraphCut, Terminal};

//Label values of the output mask
pub const FOREGROUND_VALUE: u8 = u8::MAX;
pub const BACKGROUND_VALUE: u8 = u8::MIN;

//Intensity probabilities are kept this far away from 0 and 1, so that the data
//term stays finite
const PROBABILITY_EPSILON: f32 = 1e-6;

//Default segmentation parameters
const DATA_WEIGHT_INIT: f32 = 0.5;
const POTTS_WEIGHT_INIT: f32 = 5.0;
const EDGE_WEIGHT_INIT: f32 = 50.0;
const EDGE_VARIANCE_INIT: f32 = 50.0;
const MAX_VALUE_INIT: f32 = 256.0;

////////////////////////////////////////////////////////////////////////////////
//                              HELPER FUNCTIONS                              //
////////////////////////////////////////////////////////////////////////////////

#[inline]
fn linear_index(pos: &[usize], shape: &[usize]) -> usize {
  //Row-major (C) order, last axis fastest
  pos.iter().zip(shape).fold(0, |acc, (&p, &n)| acc * n + p)
}

/// Half of the neighbourhood `{-1,0,1}^ndim`: all offsets whose first non-zero
/// component is negative. `straight` keeps only offsets along a single axis.
fn neighbour_offsets(ndim: usize, straight: bool) -> Vec<Vec<isize>> {
  let mut offsets = Vec::new();
  let mut offset = vec![-1isize; ndim];
  loop {
    let lexicographically_negative = offset.iter().find(|&&o| o != 0).map_or(false, |&o| o < 0);
    let axes = offset.iter().filter(|&&o| o != 0).count();
    if lexicographically_negative && (!straight || axes == 1) {
      offsets.push(offset.clone());
    }

    //Odometer step, last axis fastest
    let mut axis = ndim;
    loop {
      if axis == 0 {
        return offsets;
      }
      axis -= 1;
      offset[axis] += 1;
      if offset[axis] < 2 {
        break;
      }
      offset[axis] = -1;
    }
  }
}

fn count_edges(shape: &[usize], offsets: &[Vec<isize>]) -> usize {
  offsets
    .iter()
    .map(|offset| {
      shape
        .iter()
        .zip(offset)
        .map(|(&n, &o)| n.saturating_sub(o.unsigned_abs()))
        .product::<usize>()
    })
    .sum()
}

#[inline]
fn offset_length(offset: &[isize]) -> f32 {
  (offset.iter().map(|&o| (o * o) as f32).sum::<f32>()).sqrt()
}

#[inline]
fn to_f32<T: ToPrimitive>(value: &T) -> Result<f32, String> {
  value.to_f32().ok_or_else(|| "pixel value cannot be represented as f32".to_string())
}

//Costs of explaining a pixel with normalised intensity `probability` as
//(bright, dark). The bright cost goes on the source link, so it is paid by
//background pixels.
#[inline]
fn data_costs(probability: f32, prior: f32) -> (f32, f32) {
  let bright = -probability.ln() - prior.ln();
  let dark = -(1.0 - probability).ln() - (1.0 - prior).ln();
  (bright, dark)
}

////////////////////////////////////////////////////////////////////////////////
//                               CONFIGURATION                                //
////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Which neighbouring pixels are connected by an edge.
pub enum Connectivity {
  /// Only pixels that differ along a single axis (4-connected in 2D).
  Straight,
  /// All pixels within a distance of one step along every axis (8-connected
  /// in 2D).
  #[default]
  Full,
}

#[derive(Debug, Clone)]
/// Builder for configuring a graph cut segmentation.
///
/// Use `new()` to start from the default parameters, adjust them with the
/// setters and call `build()` to obtain a `GraphCutSegmenter`. The parameters
/// are only validated in `build()`.
pub struct SegmentationBuilder {
  data_weight: f32,
  potts_weight: f32,
  edge_weight: f32,
  edge_variance: f32,
  connectivity: Connectivity,
  max_value: f32,
}

impl Default for SegmentationBuilder {
  fn default() -> Self {
    SegmentationBuilder {
      data_weight: DATA_WEIGHT_INIT,
      potts_weight: POTTS_WEIGHT_INIT,
      edge_weight: EDGE_WEIGHT_INIT,
      edge_variance: EDGE_VARIANCE_INIT,
      connectivity: Connectivity::Full,
      max_value: MAX_VALUE_INIT,
    }
  }
}

impl SegmentationBuilder {
  /// creates a new `SegmentationBuilder` with the default parameters
  pub fn new() -> Self {
    Self::default()
  }

  /// Set the prior probability of a pixel being bright. Bright pixels are
  /// labelled background, so higher values shrink the foreground. Must lie
  /// strictly between 0 and 1.
  pub fn set_data_weight(mut self, data_weight: f32) -> Self {
    self.data_weight = data_weight;
    self
  }

  /// Set the constant penalty for neighbouring pixels with different labels.
  pub fn set_potts_weight(mut self, potts_weight: f32) -> Self {
    self.potts_weight = potts_weight;
    self
  }

  /// Set the weight of the edge image term. Has no effect if no edge image is
  /// passed to the segmentation.
  pub fn set_edge_weight(mut self, edge_weight: f32) -> Self {
    self.edge_weight = edge_weight;
    self
  }

  /// Set the variance of the Gaussian applied to edge image differences.
  pub fn set_edge_variance(mut self, edge_variance: f32) -> Self {
    self.edge_variance = edge_variance;
    self
  }

  /// Set which neighbouring pixels are connected (default: `Full`).
  pub fn set_connectivity(mut self, connectivity: Connectivity) -> Self {
    self.connectivity = connectivity;
    self
  }

  /// Set the value that pixel intensities are normalised by (256 for 8-bit
  /// images, 65536 for 16-bit images, etc.)
  pub fn set_max_value(mut self, max_value: f32) -> Self {
    self.max_value = max_value;
    self
  }

  /// Build a `GraphCutSegmenter` from the current builder configuration. This
  /// function returns an `Err` if any of the parameters is out of range.
  pub fn build(self) -> Result<GraphCutSegmenter, String> {
    if !(self.data_weight > 0.0 && self.data_weight < 1.0) {
      Err(format!("Data weight was set at {}, but it has to lie in (0, 1).", self.data_weight))?
    }
    if !(self.potts_weight >= 0.0) {
      Err(format!("Potts weight was set at {}, but it may not be negative.", self.potts_weight))?
    }
    if !(self.edge_weight >= 0.0) {
      Err(format!("Edge weight was set at {}, but it may not be negative.", self.edge_weight))?
    }
    if !(self.edge_variance > 0.0) {
      Err(format!("Edge variance was set at {}, but it has to be positive.", self.edge_variance))?
    }
    if !(self.max_value > 0.0) {
      Err(format!("Max value was set at {}, but it has to be positive.", self.max_value))?
    }

    Ok(GraphCutSegmenter {
      data_weight: self.data_weight,
      potts_weight: self.potts_weight,
      edge_weight: self.edge_weight,
      edge_variance: self.edge_variance,
      connectivity: self.connectivity,
      max_value: self.max_value,
    })
  }
}

////////////////////////////////////////////////////////////////////////////////
//                                SEGMENTATION                                //
////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone)]
/// Result of a segmentation: a mask with `FOREGROUND_VALUE` for foreground
/// pixels and `BACKGROUND_VALUE` for background pixels, and the value of the
/// maximum flow (the energy of the segmentation).
pub struct Segmentation<D: nd::Dimension> {
  /// Label image with the shape of the segmented image
  pub mask: nd::Array<u8, D>,
  /// Value of the maximum flow through the graph
  pub max_flow: f32,
}

#[derive(Debug, Clone)]
/// Configured graph cut segmentation. Create one with `SegmentationBuilder`.
///
/// The segmenter holds no state between calls and can be shared between
/// threads.
pub struct GraphCutSegmenter {
  data_weight: f32,
  potts_weight: f32,
  edge_weight: f32,
  edge_variance: f32,
  connectivity: Connectivity,
  max_value: f32,
}

//How an edge image is addressed
#[derive(Clone, Copy, PartialEq)]
enum EdgeImageKind {
  //Same shape as the image, weights from differences of neighbouring values
  Implicit,
  //Shape 2n-1 along every axis, one value between every pair of neighbours
  Explicit,
}

fn edge_image_kind(image_shape: &[usize], edge_shape: &[usize]) -> Result<EdgeImageKind, String> {
  if edge_shape == image_shape {
    Ok(EdgeImageKind::Implicit)
  } else if edge_shape.len() == image_shape.len()
    && edge_shape.iter().zip(image_shape).all(|(&e, &n)| n > 0 && e == 2 * n - 1)
  {
    Ok(EdgeImageKind::Explicit)
  } else {
    Err(format!(
      "Edge image of shape {edge_shape:?} matches neither the image shape {image_shape:?} nor its explicit edge shape."
    ))
  }
}

impl GraphCutSegmenter {
  /// Data weight (intensity prior) this segmenter was built with.
  pub fn data_weight(&self) -> f32 {
    self.data_weight
  }

  /// Segments `image` into foreground and background. If an `edges` image is
  /// given, edge weights are lowered where the edge image varies strongly.
  pub fn segment<T, E, D>(
    &self,
    image: nd::ArrayView<T, D>,
    edges: Option<nd::ArrayView<E, D>>,
  ) -> Result<Segmentation<D>, String>
  where
    T: Num + Copy + ToPrimitive + Sync,
    E: Num + Copy + ToPrimitive,
    D: nd::Dimension,
  {
    let session = self.session(image, edges)?;
    Ok(Segmentation { mask: session.mask(), max_flow: session.max_flow() })
  }

  /// Segments every sub-array of `image` along `axis` independently. The
  /// slices are processed in parallel, each with its own solver. Returns the
  /// stacked mask and the maximum flow of every slice.
  pub fn segment_slices<T, E, D>(
    &self,
    image: nd::ArrayView<T, D>,
    edges: Option<nd::ArrayView<E, D>>,
    axis: nd::Axis,
  ) -> Result<(nd::Array<u8, D>, Vec<f32>), String>
  where
    T: Num + Copy + ToPrimitive + Sync,
    E: Num + Copy + ToPrimitive + Sync,
    D: nd::Dimension + nd::RemoveAxis,
  {
    if axis.index() >= image.ndim() {
      Err(format!("Axis {} is out of range for an image with {} axes.", axis.index(), image.ndim()))?
    }
    let num_slices = image.len_of(axis);

    //Explicit edge images hold one slice between every pair of image slices
    let edge_stride = match edges {
      Some(ref edges) => match edge_image_kind(image.shape(), edges.shape())? {
        EdgeImageKind::Implicit => 1,
        EdgeImageKind::Explicit => 2,
      },
      None => 1,
    };

    #[cfg(feature = "progress")]
    let bar = crate::set_up_bar(num_slices as u64, "slice");

    let results: Vec<Segmentation<D::Smaller>> = (0..num_slices)
      .into_par_iter()
      .map(|idx| {
        let slice = image.index_axis(axis, idx);
        let edge_slice = edges.as_ref().map(|edges| edges.index_axis(axis, edge_stride * idx));
        let result = self.segment(slice, edge_slice);
        #[cfg(feature = "progress")]
        bar.inc(1);
        result
      })
      .collect::<Result<_, String>>()?;

    #[cfg(feature = "progress")]
    bar.finish();

    let mut mask = nd::Array::<u8, D>::from_elem(image.raw_dim(), BACKGROUND_VALUE);
    let mut flows = Vec::with_capacity(num_slices);
    for (idx, segmentation) in results.into_iter().enumerate() {
      mask.index_axis_mut(axis, idx).assign(&segmentation.mask);
      flows.push(segmentation.max_flow);
    }
    Ok((mask, flows))
  }

  /// Segments `image` for a range of data weights, from `start` up to and
  /// including `end` in increments of `step`. The graph is built once and
  /// re-solved incrementally for every following data weight.
  pub fn segment_data_weights<T, E, D>(
    &self,
    image: nd::ArrayView<T, D>,
    edges: Option<nd::ArrayView<E, D>>,
    start: f32,
    end: f32,
    step: f32,
  ) -> Result<Vec<Segmentation<D>>, String>
  where
    T: Num + Copy + ToPrimitive + Sync,
    E: Num + Copy + ToPrimitive,
    D: nd::Dimension,
  {
    if !(step > 0.0) {
      Err(format!("Data weight step was set at {step}, but it has to be positive."))?
    }
    if !(start <= end) {
      Err(format!("Data weight range {start}..={end} is empty."))?
    }

    //Tolerate rounding in (end - start) / step
    let num_steps = ((end - start) / step + 1e-4).floor() as usize + 1;

    #[cfg(feature = "progress")]
    let bar = crate::set_up_bar(num_steps as u64, "data weight");

    let mut session = self.session(image, edges)?;
    let mut results = Vec::with_capacity(num_steps);
    for idx in 0..num_steps {
      session.set_data_weight(start + idx as f32 * step)?;
      results.push(Segmentation { mask: session.mask(), max_flow: session.max_flow() });
      #[cfg(feature = "progress")]
      bar.inc(1);
    }

    #[cfg(feature = "progress")]
    bar.finish();

    Ok(results)
  }

  /// Builds the graph for `image`, computes its minimum cut and keeps the
  /// solver around, so that the data weight can be changed afterwards without
  /// starting over.
  pub fn session<T, E, D>(
    &self,
    image: nd::ArrayView<T, D>,
    edges: Option<nd::ArrayView<E, D>>,
  ) -> Result<SegmentationSession<D>, String>
  where
    T: Num + Copy + ToPrimitive + Sync,
    E: Num + Copy + ToPrimitive,
    D: nd::Dimension,
  {
    #[cfg(feature = "debug")]
    let mut perf = crate::performance_monitoring::PerfReport::default();
    #[cfg(feature = "debug")]
    let total_start = std::time::Instant::now();

    let shape = image.shape().to_vec();
    let edge_kind = match edges {
      Some(ref edges) => Some(edge_image_kind(&shape, edges.shape())?),
      None => None,
    };

    //(1) count the edges of the neighbourhood graph
    let offsets = neighbour_offsets(shape.len(), self.connectivity == Connectivity::Straight);
    let num_nodes = image.len();
    let num_edges = count_edges(&shape, &offsets);

    #[cfg(feature = "debug")]
    println!("creating graph structure of {num_nodes} nodes and {num_edges} edges");
    #[cfg(feature = "debug")]
    let start = std::time::Instant::now();

    let mut cut = GraphCut::new(num_nodes, num_edges);

    #[cfg(feature = "debug")]
    {
      perf.construction_ms = start.elapsed().as_millis() as usize;
    }

    /*(2) set terminal weights
      The normalised intensity of a pixel is its probability of being bright.
      Computing the probabilities is embarrassingly parallel;
      feeding them to the solver is not.
    */
    #[cfg(feature = "debug")]
    let start = std::time::Instant::now();

    let max_value = self.max_value;
    let probabilities: Vec<f32> = image
      .as_standard_layout()
      .as_slice()
      .ok_or("standard layout array is not contiguous. This is a library bug.")?
      .par_iter()
      .map(|value| -> Result<f32, String> {
        let probability = to_f32(value)? / max_value;
        Ok(probability.clamp(PROBABILITY_EPSILON, 1.0 - PROBABILITY_EPSILON))
      })
      .collect::<Result<_, String>>()?;

    for (node, &probability) in probabilities.iter().enumerate() {
      let (bright, dark) = data_costs(probability, self.data_weight);
      cut.set_terminal_weights(node, bright, dark);
    }

    #[cfg(feature = "debug")]
    {
      perf.terminal_weights_ms = start.elapsed().as_millis() as usize;
    }

    //(3) set edge weights
    #[cfg(feature = "debug")]
    let start = std::time::Instant::now();

    let two_variance = 2.0 * self.edge_variance;
    let lengths: Vec<f32> = offsets.iter().map(|offset| offset_length(offset)).collect();
    let edges = edges.map(|edges| edges.into_dyn());
    let mut neighbour = vec![0usize; shape.len()];
    let mut edge_pos = vec![0usize; shape.len()];

    for pos in nd::indices(shape.as_slice()) {
      let pos = pos.slice();
      let node = linear_index(pos, &shape);

      'neighbours: for (offset, &length) in offsets.iter().zip(&lengths) {
        for d in 0..shape.len() {
          let shifted = pos[d] as isize + offset[d];
          if shifted < 0 || shifted >= shape[d] as isize {
            continue 'neighbours;
          }
          neighbour[d] = shifted as usize;
          edge_pos[d] = (2 * pos[d] as isize + offset[d]) as usize;
        }

        let mut weight = self.potts_weight;
        if let (Some(edges), Some(kind)) = (edges.as_ref(), edge_kind) {
          let difference = match kind {
            EdgeImageKind::Implicit => {
              to_f32(&edges[nd::IxDyn(pos)])? - to_f32(&edges[nd::IxDyn(&neighbour)])?
            }
            EdgeImageKind::Explicit => to_f32(&edges[nd::IxDyn(&edge_pos)])?,
          };
          weight += self.edge_weight * (-(difference * difference) / two_variance).exp() / length;
        }

        cut.set_edge_weight(node, linear_index(&neighbour, &shape), weight);
      }
    }

    #[cfg(feature = "debug")]
    {
      perf.edge_weights_ms = start.elapsed().as_millis() as usize;
    }

    //(4) calculate max flow
    #[cfg(feature = "debug")]
    let start = std::time::Instant::now();

    let max_flow = cut.compute_maximum_flow(false, None);

    #[cfg(feature = "debug")]
    {
      perf.max_flow_ms = start.elapsed().as_millis() as usize;
      perf.total_ms = total_start.elapsed().as_millis() as usize;
      println!("{perf}");
    }

    Ok(SegmentationSession {
      cut,
      shape: image.raw_dim(),
      probabilities,
      data_weight: self.data_weight,
      max_flow,
    })
  }
}

////////////////////////////////////////////////////////////////////////////////
//                           INCREMENTAL SEGMENTATION                         //
////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone)]
/// A segmentation that keeps its solver alive.
///
/// Changing the data weight of a session only changes terminal weights, so the
/// search trees of the previous computation are reused instead of solving the
/// whole graph again.
pub struct SegmentationSession<D: nd::Dimension> {
  cut: GraphCut,
  shape: D,
  probabilities: Vec<f32>,
  data_weight: f32,
  max_flow: f32,
}

impl<D: nd::Dimension> SegmentationSession<D> {
  /// Maximum flow of the most recent computation.
  pub fn max_flow(&self) -> f32 {
    self.max_flow
  }

  /// Data weight used by the most recent computation.
  pub fn data_weight(&self) -> f32 {
    self.data_weight
  }

  /// Segment of the pixel at `pos`.
  ///
  /// # Panics
  /// Panics if `pos` lies outside of the image.
  pub fn terminal(&self, pos: &[usize]) -> Terminal {
    let shape = self.shape.slice();
    assert!(
      pos.len() == shape.len() && pos.iter().zip(shape).all(|(&p, &n)| p < n),
      "position {pos:?} lies outside of an image of shape {shape:?}"
    );
    self.cut.terminal(linear_index(pos, shape))
  }

  /// The current segmentation as a mask.
  pub fn mask(&self) -> nd::Array<u8, D> {
    let labels = (0..self.cut.num_nodes())
      .map(|node| match self.cut.terminal(node) {
        Terminal::Foreground => FOREGROUND_VALUE,
        Terminal::Background => BACKGROUND_VALUE,
      })
      .collect::<Vec<u8>>();
    nd::Array::from_shape_vec(self.shape.clone(), labels)
      .expect("mask length equals the number of pixels. This is a library bug.")
  }

  /// Changes the data weight and recomputes the segmentation, reusing
  /// the search trees of the previous computation. Returns the (linear,
  /// row-major) indices of all pixels that may have changed their label.
  pub fn set_data_weight(&mut self, data_weight: f32) -> Result<Vec<usize>, String> {
    if !(data_weight > 0.0 && data_weight < 1.0) {
      Err(format!("Data weight was set at {data_weight}, but it has to lie in (0, 1)."))?
    }

    for (node, &probability) in self.probabilities.iter().enumerate() {
      let (old_bright, old_dark) = data_costs(probability, self.data_weight);
      let (bright, dark) = data_costs(probability, data_weight);
      self.cut.set_terminal_weights(node, bright - old_bright, dark - old_dark);
      self.cut.mark_node(node);
    }
    self.data_weight = data_weight;

    let mut changed = Vec::new();
    self.max_flow = self.cut.compute_maximum_flow(true, Some(&mut changed));
    Ok(changed)
  }
}
