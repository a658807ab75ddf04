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

#![doc(
  html_logo_url = "https://raw.githubusercontent.com/smups/rustronomy/main/logos/Rustronomy_ferris.png?raw=true"
)]
//! Rustronomy-graphcut is a pure-rust implementation of the Boykov-Kolmogorov
//! max-flow/min-cut algorithm (see Boykov & Kolmogorov, 2004[^1]) and of a
//! graph cut image segmentation built on top of it.
//!
//! # Features
//! The crate is split into two layers:
//! 1. The `GraphCut` solver, which computes the maximum flow through a graph
//! with two terminal nodes (the *source* or foreground and the *sink* or
//! background). Its search trees are kept between computations, so that the
//! graph can be re-solved quickly after a local change.
//! 2. The `GraphCutSegmenter`, which turns an n-dimensional image into such a
//! graph and returns a foreground/background mask. Dark pixels make up the
//! foreground, bright pixels the background.
//!
//! Additional functionality can be accessed via cargo feature gates. A list of
//! all additional features [can be found below](#cargo-feature-gates).
//!
//! # Quickstart
//! To use the latest release of Rustronomy-graphcut in a cargo project, add
//! the rustronomy-graphcut crate as a dependency to your `Cargo.toml` file:
//! ```toml
//! [dependencies]
//! rustronomy-graphcut = "0.1.0"
//! ```
//!
//! ## Short example: solving a tiny graph
//! Nodes and edges are dense integer indices. The number of nodes and edges has
//! to be known when the solver is created.
//! ```rust
//! use rustronomy_graphcut::prelude::*;
//!
//! //Three nodes in a row, the first attached to the source, the last to the sink
//! let mut cut = GraphCut::new(3, 2);
//! cut.set_terminal_weights(0, 10.0, 0.0);
//! cut.set_terminal_weights(2, 0.0, 10.0);
//! cut.set_edge_weight(0, 1, 2.0);
//! cut.set_edge_weight(1, 2, 2.0);
//!
//! assert_eq!(cut.compute_maximum_flow(false, None), 2.0);
//! assert_eq!(cut.terminal(0), Terminal::Foreground);
//! assert_eq!(cut.terminal(2), Terminal::Background);
//! ```
//!
//! ## Short example: segmenting an image
//! `rustronomy-graphcut` uses the "builder pattern" to configure a segmentation.
//! Create a `SegmentationBuilder`, set the desired parameters and call `build()`
//! to obtain a (`Sync`&`Send`) segmenter.
//! ```rust
//! use rustronomy_graphcut::prelude::*;
//!
//! //A bright square on a dark background
//! let mut img = nd::Array2::<u8>::from_elem((32, 32), 20);
//! img.slice_mut(nd::s![8..24, 8..24]).fill(230);
//!
//! let segmenter = SegmentationBuilder::new().set_potts_weight(0.5).build().unwrap();
//! let result = segmenter.segment::<u8, u8, _>(img.view(), None).unwrap();
//! //Dark pixels are labelled foreground, bright pixels background
//! assert_eq!(result.mask[(0, 0)], FOREGROUND_VALUE);
//! assert_eq!(result.mask[(16, 16)], BACKGROUND_VALUE);
//! ```
//! [^1]: Y. Boykov and V. Kolmogorov. **An Experimental Comparison of Min-Cut/Max-Flow Algorithms for Energy Minimization in Vision.** *IEEE Transactions on Pattern Analysis and Machine Intelligence*, September 2004.
//!
//! # Cargo feature gates
//! *By default, all features behind cargo feature gates are **disabled***
//! - `jemalloc`: this feature enables the [jemalloc allocator](https://jemalloc.net).
//! Large images produce graphs with many millions of edges, which benefit from
//! jemalloc's allocation strategy. To compile `rustronomy-graphcut` with the
//! `jemalloc` feature, jemalloc must be installed on the host system.
//! - `progress`: this feature enables a progress bar for segmenting image
//! stacks slice by slice. Enabling this feature adds the `indicatif` crate as a
//! dependency, which should not considerably slow down compile times.
//! - `debug`: this feature enables debug and performance monitoring output. This
//! can negatively impact performance. Enabling this feature does not add additional
//! dependencies.

//Set Jemalloc as the global allocator for this crate
#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

pub mod network;
pub mod segmentation;
pub mod solver;

pub use network::FlowNetwork;
pub use segmentation::{
  Connectivity, GraphCutSegmenter, Segmentation, SegmentationBuilder, SegmentationSession,
  BACKGROUND_VALUE, FOREGROUND_VALUE,
};
pub use solver::{GraphCut, Terminal};

//Utility prelude for batch import
pub mod prelude {
  pub use crate::{
    Connectivity, GraphCut, GraphCutSegmenter, SegmentationBuilder, Terminal, BACKGROUND_VALUE,
    FOREGROUND_VALUE,
  };
  pub use ndarray as nd;
}

////////////////////////////////////////////////////////////////////////////////
//                              HELPER FUNCTIONS                              //
////////////////////////////////////////////////////////////////////////////////

#[cfg(feature = "progress")]
fn set_up_bar(len: u64, unit: &str) -> indicatif::ProgressBar {
  let template = format!("{{spinner}}[{{elapsed}}/{{duration}}] {unit} {{pos}}/{{len}}{{bar:60}}");
  let style = indicatif::ProgressStyle::with_template(&template);
  let bar = indicatif::ProgressBar::new(len);
  bar.set_style(style.unwrap());
  return bar;
}

////////////////////////////////////////////////////////////////////////////////
//                             OPTIONAL MODULES                               //
////////////////////////////////////////////////////////////////////////////////
#[cfg(feature = "debug")]
mod performance_monitoring {

  #[derive(Clone, Debug, Default)]
  pub struct PerfReport {
    pub construction_ms: usize,
    pub terminal_weights_ms: usize,
    pub edge_weights_ms: usize,
    pub max_flow_ms: usize,
    pub total_ms: usize,
  }

  impl PerfReport {
    pub fn setup_total(&self) -> usize {
      self.construction_ms + self.terminal_weights_ms + self.edge_weights_ms
    }
  }

  impl std::fmt::Display for PerfReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      writeln!(f, ">---------[Performance Summary]---------")?;
      writeln!(f, ">  Graph construction: {}ms", self.construction_ms)?;
      writeln!(f, ">  Terminal weights: {}ms", self.terminal_weights_ms)?;
      writeln!(f, ">  Edge weights: {}ms", self.edge_weights_ms)?;
      writeln!(f, ">  Max flow: {}ms", self.max_flow_ms)?;
      writeln!(f, ">--------------------------------+ total")?;
      writeln!(
        f,
        ">  {}ms with {}ms overhead (Δt)",
        self.total_ms,
        self.total_ms as i64 - self.setup_total() as i64 - self.max_flow_ms as i64
      )
    }
  }

  #[derive(Clone, Debug, Default)]
  pub struct SolverStats {
    pub augmentations: usize,
    pub adoptions: usize,
  }

  impl std::fmt::Display for SolverStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      write!(f, "{} augmentations, {} orphans processed", self.augmentations, self.adoptions)
    }
  }
}
