// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end tests: resolve, allocate, stickify and read back.

use nnpa_stickify::{
    BufferManager, ConcatInfo, ConcatUsage, ElementType, Layout, LayoutResolver, PhysicalTensor,
    PreTransformedDescriptor, PrevLayer, RnnType, StatusCode, StickGeometry, Stickifier,
    StickifyError, TensorState, TransformedDescriptor,
};
use proptest::prelude::*;
use rstest::rstest;

fn resolve(layout: Layout, ty: ElementType, shape: &[usize]) -> TransformedDescriptor {
    let pre = PreTransformedDescriptor::new(layout, ty, shape).unwrap();
    LayoutResolver::default().resolve(&pre).unwrap()
}

fn resolve_gates(info: ConcatInfo, ty: ElementType, shape: &[usize]) -> TransformedDescriptor {
    let layout = info.usage().source_layout();
    let pre = PreTransformedDescriptor::new(layout, ty, shape).unwrap();
    LayoutResolver::default()
        .resolve_concatenated(&pre, info)
        .unwrap()
}

/// Non-zero 16-bit values, distinct per element within a gate.
fn pattern(count: usize, seed: usize) -> Vec<u16> {
    (0..count)
        .map(|i| ((i + seed * 7919) % 65535) as u16 + 1)
        .collect()
}

fn non_zero_words(tensor: &PhysicalTensor) -> usize {
    let words: &[u16] = bytemuck::cast_slice(tensor.as_bytes().unwrap());
    words.iter().filter(|&&w| w != 0).count()
}

/// Stickify one pattern per source, read them back and check nothing leaked
/// into padding or overlapped another source.
fn round_trip(desc: &TransformedDescriptor, stickifier: Stickifier) -> PhysicalTensor {
    let count = desc.source().num_elements().unwrap();
    let sources: Vec<Vec<u16>> = (0..desc.arity()).map(|g| pattern(count, g)).collect();
    let refs: Vec<&[u16]> = sources.iter().map(|s| s.as_slice()).collect();

    let mut tensor = BufferManager::default().allocate(desc).unwrap();
    stickifier.stickify_typed(&mut tensor, &refs).unwrap();
    assert_eq!(tensor.state(), TensorState::Stickified);
    assert_eq!(non_zero_words(&tensor), count * desc.arity());

    let mut outputs: Vec<Vec<u16>> = vec![vec![0; count]; desc.arity()];
    let mut views: Vec<&mut [u16]> = outputs.iter_mut().map(|o| o.as_mut_slice()).collect();
    stickifier.unstickify_typed(&tensor, &mut views).unwrap();
    assert_eq!(outputs, sources);
    tensor
}

#[test]
fn test_plain_2d_scenario() {
    // 64-byte granule, FP32: rows of 5 elements pad to 16
    let geometry = StickGeometry::builder()
        .stick_bytes(64)
        .sticks_per_page(1)
        .build()
        .unwrap();
    let resolver = LayoutResolver::new(geometry).unwrap();
    let desc = resolver.resolve_tags("2D", "FP32", &[3, 5]).unwrap();
    assert_eq!(desc.size_bytes(), 3 * 64);

    let mut tensor = BufferManager::default().allocate(&desc).unwrap();
    let data: Vec<f32> = (1..=15).map(|v| v as f32).collect();
    Stickifier::default()
        .stickify_typed(&mut tensor, &[&data[..]])
        .unwrap();

    let physical: &[f32] = bytemuck::cast_slice(tensor.as_bytes().unwrap());
    assert_eq!(physical.len(), 48);
    for row in 0..3 {
        let stick = &physical[row * 16..(row + 1) * 16];
        assert_eq!(&stick[..5], &data[row * 5..row * 5 + 5]);
        assert!(stick[5..].iter().all(|&v| v == 0.0));
    }
}

#[rstest]
#[case(Layout::D1, &[100])]
#[case(Layout::D2, &[3, 130])]
#[case(Layout::D2s, &[4, 65])]
#[case(Layout::D3, &[2, 33, 64])]
#[case(Layout::D3s, &[3, 5, 70])]
#[case(Layout::D4, &[2, 3, 4, 5])]
#[case(Layout::Nhwc, &[2, 3, 40, 70])]
#[case(Layout::Nchw, &[2, 70, 3, 5])]
#[case(Layout::D4s, &[3, 1, 4, 10])]
#[case(Layout::D4s, &[3, 2, 4, 10])]
#[case(Layout::Hwck, &[2, 3, 40, 70])]
fn test_round_trip(#[case] layout: Layout, #[case] shape: &[usize]) {
    let desc = resolve(layout, ElementType::Fp16, shape);
    round_trip(&desc, Stickifier::sequential());
}

#[test]
fn test_nchw_transposes_channels_onto_sticks() {
    // [n, c, h, w] = [1, 3, 1, 2]: each (h, w) position holds one stick of 3 channels
    let desc = resolve(Layout::Nchw, ElementType::Fp16, &[1, 3, 1, 2]);
    assert_eq!(desc.dims(), [1, 1, 2, 3]);
    let data: [u16; 6] = [1, 2, 3, 4, 5, 6];
    let mut tensor = BufferManager::default().allocate(&desc).unwrap();
    Stickifier::default()
        .stickify_typed(&mut tensor, &[&data[..]])
        .unwrap();

    let words: &[u16] = bytemuck::cast_slice(tensor.as_bytes().unwrap());
    assert_eq!(&words[..3], &[1, 3, 5]);
    assert_eq!(&words[64..67], &[2, 4, 6]);
}

#[test]
fn test_bidirectional_output_places_directions_side_by_side() {
    // [t, dirs, b, h] = [1, 2, 1, 3]
    let desc = resolve(Layout::D4s, ElementType::Fp16, &[1, 2, 1, 3]);
    assert_eq!(desc.dims(), [1, 1, 1, 128]);
    let data: [u16; 6] = [1, 2, 3, 4, 5, 6];
    let mut tensor = BufferManager::default().allocate(&desc).unwrap();
    Stickifier::default()
        .stickify_typed(&mut tensor, &[&data[..]])
        .unwrap();

    let words: &[u16] = bytemuck::cast_slice(tensor.as_bytes().unwrap());
    assert_eq!(&words[..3], &[1, 2, 3]);
    // the backward direction starts on the next stick group, one page further
    assert_eq!(&words[2048..2051], &[4, 5, 6]);
}

#[rstest]
#[case(RnnType::Lstm, ConcatUsage::Biases, PrevLayer::None, &[2, 30])]
#[case(RnnType::Lstm, ConcatUsage::HiddenWeights, PrevLayer::Uni, &[1, 20, 30])]
#[case(RnnType::Gru, ConcatUsage::HiddenBiases, PrevLayer::Uni, &[2, 70])]
#[case(RnnType::Gru, ConcatUsage::Weights, PrevLayer::Uni, &[2, 9, 10])]
#[case(RnnType::Lstm, ConcatUsage::Weights, PrevLayer::Bidir, &[2, 6, 10])]
#[case(RnnType::Gru, ConcatUsage::Weights, PrevLayer::Bidir, &[1, 140, 5])]
fn test_concatenated_round_trip(
    #[case] rnn: RnnType,
    #[case] usage: ConcatUsage,
    #[case] prev: PrevLayer,
    #[case] shape: &[usize],
) {
    let desc = resolve_gates(ConcatInfo::new(rnn, usage, prev), ElementType::Fp16, shape);
    assert_eq!(desc.arity(), rnn.gate_count());
    round_trip(&desc, Stickifier::sequential());
}

#[test]
fn test_gate_segments_follow_declared_order() {
    let info = ConcatInfo::new(RnnType::Lstm, ConcatUsage::Biases, PrevLayer::None);
    let desc = resolve_gates(info, ElementType::Fp16, &[1, 10]);
    let gates: Vec<Vec<u16>> = (1..=4).map(|g| vec![g as u16; 10]).collect();
    let refs: Vec<&[u16]> = gates.iter().map(|g| g.as_slice()).collect();

    let mut tensor = BufferManager::default().allocate(&desc).unwrap();
    Stickifier::default().stickify_typed(&mut tensor, &refs).unwrap();

    let bytes = tensor.as_bytes().unwrap();
    let segments = desc.concat_segments().unwrap();
    assert_eq!(segments.len(), 4);
    for (i, segment) in segments.iter().enumerate() {
        assert_eq!(segment.gate, RnnType::Lstm.gates()[i]);
        assert_eq!(segment.byte_offset % desc.geometry().stick_bytes, 0);
        let words: &[u16] =
            bytemuck::cast_slice(&bytes[segment.byte_offset..segment.byte_offset + 128]);
        assert_eq!(&words[..10], &gates[i][..]);
        assert!(words[10..].iter().all(|&w| w == 0));
        if let Some(next) = segments.get(i + 1) {
            assert!(next.byte_offset >= segment.byte_offset + 128);
        }
    }
}

#[test]
fn test_arity_mismatch_leaves_buffer_untouched() {
    let plain = resolve(Layout::D2, ElementType::Fp16, &[2, 3]);
    let gates = resolve_gates(
        ConcatInfo::new(RnnType::Gru, ConcatUsage::Biases, PrevLayer::None),
        ElementType::Fp16,
        &[1, 3],
    );
    let data = [7u16; 6];
    let gate = [7u16; 3];

    for (desc, sources) in [
        (&plain, vec![&data[..], &data[..]]),
        (&gates, vec![&gate[..], &gate[..]]),
        (&gates, vec![&gate[..]; 4]),
    ] {
        let mut tensor = BufferManager::default().allocate(desc).unwrap();
        let err = Stickifier::default()
            .stickify_typed(&mut tensor, &sources)
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::InvalidBuffer);
        assert_eq!(tensor.state(), TensorState::Allocated);
        assert_eq!(non_zero_words(&tensor), 0);
    }
}

#[test]
fn test_double_release_is_invalid_state() {
    let manager = BufferManager::default();
    let mut tensor = manager
        .allocate(&resolve(Layout::D2, ElementType::Fp32, &[3, 5]))
        .unwrap();
    assert_eq!(StatusCode::of(&manager.release(&mut tensor)), StatusCode::Ok);
    assert_eq!(
        StatusCode::of(&manager.release(&mut tensor)),
        StatusCode::InvalidState
    );

    let data = [0f32; 15];
    let err = Stickifier::default()
        .stickify_typed(&mut tensor, &[&data[..]])
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::InvalidState);
}

#[test]
fn test_unknown_layout_rejected_before_allocation() {
    let resolved = LayoutResolver::default().resolve_tags("unknown-99", "FP32", &[3, 5]);
    assert_eq!(StatusCode::of(&resolved), StatusCode::InvalidLayout);

    let err = PreTransformedDescriptor::from_tags("2D", "FP64", &[3, 5]).unwrap_err();
    assert!(matches!(err, StickifyError::InvalidType(_)));
}

#[rstest]
#[case(resolve(Layout::Nhwc, ElementType::Fp16, &[4, 3, 40, 100]))]
#[case(resolve(Layout::Nchw, ElementType::Fp16, &[3, 70, 2, 5]))]
#[case(resolve(Layout::D4s, ElementType::Fp16, &[5, 2, 3, 10]))]
#[case(resolve_gates(
    ConcatInfo::new(RnnType::Lstm, ConcatUsage::Biases, PrevLayer::None),
    ElementType::Fp16,
    &[3, 30],
))]
#[case(resolve_gates(
    ConcatInfo::new(RnnType::Gru, ConcatUsage::Weights, PrevLayer::Bidir),
    ElementType::Fp16,
    &[2, 8, 20],
))]
fn test_parallel_matches_sequential(#[case] desc: TransformedDescriptor) {
    assert!(desc.dims()[0] > 1);
    let parallel = round_trip(&desc, Stickifier::new(true, 0));
    let sequential = round_trip(&desc, Stickifier::sequential());
    assert_eq!(parallel.as_bytes().unwrap(), sequential.as_bytes().unwrap());
}

fn logical_shapes() -> impl Strategy<Value = (Layout, Vec<usize>)> {
    prop_oneof![
        prop::collection::vec(1usize..140, 1).prop_map(|s| (Layout::D1, s)),
        prop::collection::vec(1usize..70, 2).prop_map(|s| (Layout::D2, s)),
        prop::collection::vec(1usize..70, 2).prop_map(|s| (Layout::D2s, s)),
        prop::collection::vec(1usize..20, 3).prop_map(|s| (Layout::D3, s)),
        prop::collection::vec(1usize..20, 3).prop_map(|s| (Layout::D3s, s)),
        prop::collection::vec(1usize..10, 4).prop_map(|s| (Layout::Nhwc, s)),
        prop::collection::vec(1usize..10, 4).prop_map(|s| (Layout::Nchw, s)),
        prop::collection::vec(1usize..10, 4).prop_map(|s| (Layout::Hwck, s)),
        (1usize..4, 1usize..=2, 1usize..5, 1usize..80)
            .prop_map(|(t, d, b, h)| (Layout::D4s, vec![t, d, b, h])),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_round_trip_keeps_padding_zero(
        (layout, shape) in logical_shapes(),
        parallel in any::<bool>(),
    ) {
        let desc = resolve(layout, ElementType::Fp16, &shape);
        round_trip(&desc, Stickifier::new(parallel, 0));
    }
}
