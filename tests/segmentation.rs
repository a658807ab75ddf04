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

use ndarray_rand::{rand_distr::Uniform, RandomExt};
use rand::{rngs::StdRng, SeedableRng};
use rustronomy_graphcut::prelude::*;

const DARK: u8 = 20;
const BRIGHT: u8 = 230;

//32x32 image with a bright 16x16 square in the middle
fn square() -> nd::Array2<u8> {
  let mut img = nd::Array2::<u8>::from_elem((32, 32), DARK);
  img.slice_mut(nd::s![8..24, 8..24]).fill(BRIGHT);
  img
}

fn in_square(i: usize, j: usize) -> bool {
  (8..24).contains(&i) && (8..24).contains(&j)
}

//Dark surroundings are foreground, the bright square is background
fn expected_square_mask() -> nd::Array2<u8> {
  nd::Array2::from_shape_fn((32, 32), |(i, j)| {
    if in_square(i, j) {
      BACKGROUND_VALUE
    } else {
      FOREGROUND_VALUE
    }
  })
}

//Explicit edge image for `square()`: large values between pixels on opposite
//sides of the square boundary, zero everywhere else
fn square_explicit_edges() -> nd::Array2<u8> {
  nd::Array2::from_shape_fn((63, 63), |(ei, ej)| {
    let (lo_i, hi_i) = (ei / 2, (ei + 1) / 2);
    let (lo_j, hi_j) = (ej / 2, (ej + 1) / 2);
    let corners =
      [in_square(lo_i, lo_j), in_square(lo_i, hi_j), in_square(hi_i, lo_j), in_square(hi_i, hi_j)];
    if corners.iter().all(|&c| c == corners[0]) {
      0
    } else {
      255
    }
  })
}

fn assert_close(a: f32, b: f32) {
  let tolerance = 1e-4 * a.abs().max(b.abs()).max(1.0);
  assert!((a - b).abs() <= tolerance, "{a} and {b} differ by more than {tolerance}");
}

////////////////////////////////////////////////////////////////////////////////
//                               CONFIGURATION                                //
////////////////////////////////////////////////////////////////////////////////

#[test]
fn default_builder_is_valid() {
  let segmenter = SegmentationBuilder::default().build().unwrap();
  assert_eq!(segmenter.data_weight(), 0.5);
}

#[test]
fn invalid_parameters_are_rejected() {
  for data_weight in [0.0, 1.0, -0.5, 1.5, f32::NAN] {
    assert!(SegmentationBuilder::new().set_data_weight(data_weight).build().is_err());
  }
  assert!(SegmentationBuilder::new().set_potts_weight(-1.0).build().is_err());
  assert!(SegmentationBuilder::new().set_edge_weight(-1.0).build().is_err());
  assert!(SegmentationBuilder::new().set_edge_variance(0.0).build().is_err());
  assert!(SegmentationBuilder::new().set_max_value(0.0).build().is_err());

  //Zero is fine for the weights
  assert!(SegmentationBuilder::new().set_potts_weight(0.0).set_edge_weight(0.0).build().is_ok());
}

////////////////////////////////////////////////////////////////////////////////
//                                SEGMENTATION                                //
////////////////////////////////////////////////////////////////////////////////

#[test]
fn dark_image_is_foreground() {
  let img = nd::Array2::<u8>::from_elem((4, 4), 10);
  let segmenter = SegmentationBuilder::new().build().unwrap();
  let result = segmenter.segment::<u8, u8, _>(img.view(), None).unwrap();
  assert_eq!(result.mask[(0, 0)], FOREGROUND_VALUE);
  assert!(result.mask.iter().all(|&v| v == FOREGROUND_VALUE));
}

#[test]
fn data_weight_shrinks_foreground() {
  //Intensity 128 is exactly halfway, so the data weight decides
  let img = nd::Array2::<u8>::from_elem((8, 8), 128);

  let low = SegmentationBuilder::new().set_data_weight(0.3).build().unwrap();
  let mask = low.segment::<u8, u8, _>(img.view(), None).unwrap().mask;
  assert!(mask.iter().all(|&v| v == FOREGROUND_VALUE));

  let high = SegmentationBuilder::new().set_data_weight(0.7).build().unwrap();
  let mask = high.segment::<u8, u8, _>(img.view(), None).unwrap().mask;
  assert!(mask.iter().all(|&v| v == BACKGROUND_VALUE));
}

#[test]
fn bright_square_is_background() {
  let segmenter = SegmentationBuilder::new().set_potts_weight(0.5).build().unwrap();
  let result = segmenter.segment::<u8, u8, _>(square().view(), None).unwrap();
  assert_eq!(result.mask, expected_square_mask());
  assert!(result.max_flow > 0.0);
}

#[test]
fn bright_cube_is_background() {
  let mut img = nd::Array3::<u8>::from_elem((16, 16, 16), DARK);
  img.slice_mut(nd::s![4..12, 4..12, 4..12]).fill(BRIGHT);

  let segmenter = SegmentationBuilder::new().set_potts_weight(0.1).build().unwrap();
  let result = segmenter.segment::<u8, u8, _>(img.view(), None).unwrap();

  let expected = img.mapv(|v| if v == BRIGHT { BACKGROUND_VALUE } else { FOREGROUND_VALUE });
  assert_eq!(result.mask, expected);
}

#[test]
fn other_pixel_types() {
  let segmenter = SegmentationBuilder::new().set_potts_weight(0.5);

  //16 bit
  let img = square().mapv(|v| v as u16 * 256);
  let result = segmenter
    .clone()
    .set_max_value(65536.0)
    .build()
    .unwrap()
    .segment::<u16, u8, _>(img.view(), None)
    .unwrap();
  assert_eq!(result.mask, expected_square_mask());

  //Floating point, normalised to one
  let img = square().mapv(|v| v as f32 / 256.0);
  let result = segmenter
    .set_max_value(1.0)
    .build()
    .unwrap()
    .segment::<f32, u8, _>(img.view(), None)
    .unwrap();
  assert_eq!(result.mask, expected_square_mask());
}

#[test]
fn smoothness_removes_speckle() {
  let mut img = nd::Array2::<u8>::from_elem((16, 16), DARK);
  img[(8, 8)] = BRIGHT;

  let keep = SegmentationBuilder::new().set_potts_weight(0.0).build().unwrap();
  let mask = keep.segment::<u8, u8, _>(img.view(), None).unwrap().mask;
  assert_eq!(mask[(8, 8)], BACKGROUND_VALUE);

  //Eight edges of weight 5 cost more than the pixel gains
  let smooth = SegmentationBuilder::new().build().unwrap();
  let mask = smooth.segment::<u8, u8, _>(img.view(), None).unwrap().mask;
  assert!(mask.iter().all(|&v| v == FOREGROUND_VALUE));
}

#[test]
fn connectivity_decides_diagonal_line() {
  //A diagonal line is only held together by diagonal edges
  let mut img = nd::Array2::<u8>::from_elem((32, 32), DARK);
  for i in 4..28 {
    img[(i, i)] = BRIGHT;
  }

  //Straight: four cut edges per line pixel, cheaper than the data gain
  let straight = SegmentationBuilder::new()
    .set_potts_weight(0.45)
    .set_connectivity(Connectivity::Straight)
    .build()
    .unwrap();
  let mask = straight.segment::<u8, u8, _>(img.view(), None).unwrap().mask;
  assert!((4..28).all(|i| mask[(i, i)] == BACKGROUND_VALUE));

  //Full: six cut edges per line pixel, more expensive than the data gain
  let full = SegmentationBuilder::new()
    .set_potts_weight(0.45)
    .set_connectivity(Connectivity::Full)
    .build()
    .unwrap();
  let mask = full.segment::<u8, u8, _>(img.view(), None).unwrap().mask;
  assert!(mask.iter().all(|&v| v == FOREGROUND_VALUE));
}

#[test]
fn implicit_edge_image_follows_boundaries() {
  let img = square();

  //Without an edge image, strong smoothing wipes out the square
  let smooth = SegmentationBuilder::new().set_potts_weight(50.0).build().unwrap();
  let mask = smooth.segment::<u8, u8, _>(img.view(), None).unwrap().mask;
  assert!(mask.iter().all(|&v| v == FOREGROUND_VALUE));

  //With the image as its own edge image, smoothing stops at the boundary
  let edges = SegmentationBuilder::new().set_potts_weight(0.0).set_edge_weight(50.0).build().unwrap();
  let result = edges.segment(img.view(), Some(img.view())).unwrap();
  assert_eq!(result.mask, expected_square_mask());
}

#[test]
fn explicit_edge_image_follows_boundaries() {
  let img = square();
  let edge_img = square_explicit_edges();

  let segmenter =
    SegmentationBuilder::new().set_potts_weight(0.0).set_edge_weight(50.0).build().unwrap();
  let result = segmenter.segment(img.view(), Some(edge_img.view())).unwrap();
  assert_eq!(result.mask, expected_square_mask());
}

#[test]
fn mismatched_edge_image_is_rejected() {
  let img = square();
  let edge_img = nd::Array2::<u8>::zeros((10, 10));
  let segmenter = SegmentationBuilder::new().build().unwrap();
  assert!(segmenter.segment(img.view(), Some(edge_img.view())).is_err());
  assert!(segmenter.session(img.view(), Some(edge_img.view())).is_err());
}

#[test]
fn random_image() {
  let mut rng = StdRng::seed_from_u64(0xbeef);
  let img = nd::Array2::<u8>::random_using((64, 64), Uniform::new(0, 255), &mut rng);

  for connectivity in [Connectivity::Straight, Connectivity::Full] {
    let segmenter = SegmentationBuilder::new().set_connectivity(connectivity).build().unwrap();
    let result = segmenter.segment::<u8, u8, _>(img.view(), None).unwrap();
    assert!(result.max_flow.is_finite() && result.max_flow >= 0.0);
    assert!(result.mask.iter().all(|&v| v == FOREGROUND_VALUE || v == BACKGROUND_VALUE));
    assert_eq!(result.mask.dim(), img.dim());
  }
}

////////////////////////////////////////////////////////////////////////////////
//                                   SLICES                                   //
////////////////////////////////////////////////////////////////////////////////

#[test]
fn slices_are_segmented_independently() {
  let mut stack = nd::Array3::<u8>::from_elem((4, 32, 32), DARK);
  stack.index_axis_mut(nd::Axis(0), 0).assign(&square());
  stack.index_axis_mut(nd::Axis(0), 2).assign(&square());

  let segmenter = SegmentationBuilder::new().set_potts_weight(0.5).build().unwrap();
  let (mask, flows) =
    segmenter.segment_slices::<u8, u8, _>(stack.view(), None, nd::Axis(0)).unwrap();

  assert_eq!(mask.dim(), stack.dim());
  assert_eq!(flows.len(), 4);
  for (idx, slice) in stack.axis_iter(nd::Axis(0)).enumerate() {
    let single = segmenter.segment::<u8, u8, _>(slice, None).unwrap();
    assert_eq!(mask.index_axis(nd::Axis(0), idx), single.mask);
    assert_eq!(flows[idx], single.max_flow);
  }
  assert_eq!(mask.index_axis(nd::Axis(0), 0), expected_square_mask());
  assert!(mask.index_axis(nd::Axis(0), 1).iter().all(|&v| v == FOREGROUND_VALUE));
}

#[test]
fn slices_with_explicit_edges() {
  let mut stack = nd::Array3::<u8>::from_elem((3, 32, 32), DARK);
  for mut slice in stack.axis_iter_mut(nd::Axis(0)) {
    slice.assign(&square());
  }
  //Explicit edge stacks hold a slice between every pair of image slices
  let edge_slice = square_explicit_edges();
  let mut edge_stack = nd::Array3::<u8>::zeros((5, 63, 63));
  for mut slice in edge_stack.axis_iter_mut(nd::Axis(0)) {
    slice.assign(&edge_slice);
  }

  let segmenter =
    SegmentationBuilder::new().set_potts_weight(0.0).set_edge_weight(50.0).build().unwrap();
  let (mask, _) =
    segmenter.segment_slices(stack.view(), Some(edge_stack.view()), nd::Axis(0)).unwrap();
  for slice in mask.axis_iter(nd::Axis(0)) {
    assert_eq!(slice, expected_square_mask());
  }
}

#[test]
fn slice_axis_out_of_range() {
  let stack = nd::Array3::<u8>::from_elem((2, 8, 8), DARK);
  let segmenter = SegmentationBuilder::new().build().unwrap();
  assert!(segmenter.segment_slices::<u8, u8, _>(stack.view(), None, nd::Axis(3)).is_err());
}

////////////////////////////////////////////////////////////////////////////////
//                                  SESSIONS                                  //
////////////////////////////////////////////////////////////////////////////////

#[test]
fn session_matches_segment() {
  let img = square();
  let segmenter = SegmentationBuilder::new().set_potts_weight(0.5).build().unwrap();
  let session = segmenter.session::<u8, u8, _>(img.view(), None).unwrap();
  let result = segmenter.segment::<u8, u8, _>(img.view(), None).unwrap();

  assert_eq!(session.max_flow(), result.max_flow);
  assert_eq!(session.mask(), result.mask);
  assert_eq!(session.data_weight(), 0.5);
  assert_eq!(session.terminal(&[16, 16]), Terminal::Background);
  assert_eq!(session.terminal(&[0, 31]), Terminal::Foreground);
}

#[test]
fn changing_data_weight_matches_fresh_segmentation() {
  let img = square();
  let builder = SegmentationBuilder::new().set_potts_weight(0.5);
  let mut session = builder.clone().build().unwrap().session::<u8, u8, _>(img.view(), None).unwrap();

  for data_weight in [0.3, 0.7, 0.05, 0.5] {
    session.set_data_weight(data_weight).unwrap();
    let fresh = builder
      .clone()
      .set_data_weight(data_weight)
      .build()
      .unwrap()
      .segment::<u8, u8, _>(img.view(), None)
      .unwrap();

    assert_eq!(session.data_weight(), data_weight);
    assert_close(session.max_flow(), fresh.max_flow);
    assert_eq!(session.mask(), fresh.mask);
  }
}

#[test]
fn low_data_weight_fills_foreground() {
  let img = square();
  let segmenter = SegmentationBuilder::new().set_potts_weight(0.5).build().unwrap();
  let mut session = segmenter.session::<u8, u8, _>(img.view(), None).unwrap();

  //The prior now outweighs the brightness of the square
  let changed = session.set_data_weight(0.05).unwrap();
  assert!(session.mask().iter().all(|&v| v == FOREGROUND_VALUE));
  assert!(changed.windows(2).all(|pair| pair[0] < pair[1]));
  for i in 8..24 {
    for j in 8..24 {
      assert!(changed.binary_search(&(i * 32 + j)).is_ok());
    }
  }
}

#[test]
fn invalid_session_data_weight() {
  let img = square();
  let segmenter = SegmentationBuilder::new().build().unwrap();
  let mut session = segmenter.session::<u8, u8, _>(img.view(), None).unwrap();
  assert!(session.set_data_weight(1.5).is_err());
  assert!(session.set_data_weight(0.0).is_err());
  assert_eq!(session.data_weight(), 0.5);
}

#[test]
#[should_panic]
fn session_position_out_of_bounds() {
  let img = square();
  let segmenter = SegmentationBuilder::new().build().unwrap();
  let session = segmenter.session::<u8, u8, _>(img.view(), None).unwrap();
  session.terminal(&[32, 0]);
}

////////////////////////////////////////////////////////////////////////////////
//                            DATA WEIGHT SEQUENCES                           //
////////////////////////////////////////////////////////////////////////////////

#[test]
fn data_weight_sequence_matches_fresh_segmentations() {
  let img = square();
  let builder = SegmentationBuilder::new().set_potts_weight(0.5);
  let sequence = builder
    .clone()
    .build()
    .unwrap()
    .segment_data_weights::<u8, u8, _>(img.view(), None, 0.3, 0.7, 0.1)
    .unwrap();

  //The end of the range is included
  assert_eq!(sequence.len(), 5);
  for (idx, result) in sequence.iter().enumerate() {
    let fresh = builder
      .clone()
      .set_data_weight(0.3 + idx as f32 * 0.1)
      .build()
      .unwrap()
      .segment::<u8, u8, _>(img.view(), None)
      .unwrap();
    assert_close(result.max_flow, fresh.max_flow);
    assert_eq!(result.mask, fresh.mask);
  }
}

#[test]
fn single_step_data_weight_sequence() {
  let img = square();
  let segmenter = SegmentationBuilder::new().set_potts_weight(0.5).build().unwrap();
  let sequence = segmenter.segment_data_weights::<u8, u8, _>(img.view(), None, 0.4, 0.4, 0.1).unwrap();
  assert_eq!(sequence.len(), 1);
  assert_eq!(sequence[0].mask, expected_square_mask());
}

#[test]
fn invalid_data_weight_sequences() {
  let img = square();
  let segmenter = SegmentationBuilder::new().build().unwrap();
  assert!(segmenter.segment_data_weights::<u8, u8, _>(img.view(), None, 0.3, 0.7, 0.0).is_err());
  assert!(segmenter.segment_data_weights::<u8, u8, _>(img.view(), None, 0.7, 0.3, 0.1).is_err());
  //Data weights outside of (0, 1)
  assert!(segmenter.segment_data_weights::<u8, u8, _>(img.view(), None, 0.5, 1.2, 0.5).is_err());
}
