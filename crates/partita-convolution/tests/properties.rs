//! Property-based tests for partitioned convolution.
//!
//! For random impulse lengths, partition sizes and host block patterns the
//! engine must match direct convolution, stay finite, and fall silent after
//! its pipeline is cleaned.

use partita_convolution::{
    ConvolutionEngine, EngineOptions, FftImplementation, UniformConvolver, convolve_direct,
    partition_layout,
};
use proptest::prelude::*;

fn fft_strategy() -> impl Strategy<Value = FftImplementation> {
    prop_oneof![
        Just(FftImplementation::Portable),
        Just(FftImplementation::RealValued),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// The partition layout tiles the impulse without gaps or overlap.
    #[test]
    fn layout_tiles_impulse(
        head_exp in 4u32..9,
        extra_exp in 0u32..5,
        len in 0usize..40000,
    ) {
        let head = 1usize << head_exp;
        let tail = head << extra_exp;
        let layout = partition_layout(head, tail, len);
        let mut end = layout.head.end();
        for stage in &layout.tail {
            prop_assert_eq!(stage.offset, end);
            prop_assert!(stage.block_size <= tail);
            end = stage.end();
        }
        prop_assert_eq!(layout.total_length(), len);
    }

    /// Partitioned output equals direct convolution for any block pattern.
    #[test]
    fn engine_matches_direct(
        impulse in prop::collection::vec(-1.0f32..=1.0, 1..1500),
        input in prop::collection::vec(-1.0f32..=1.0, 1..2000),
        head_exp in 3u32..7,
        extra_exp in 0u32..4,
        chunk in 1usize..200,
        fft in fft_strategy(),
    ) {
        let head = 1usize << head_exp;
        let mut engine = ConvolutionEngine::new(EngineOptions { fft, ..EngineOptions::default() });
        engine.init(head, head << extra_exp, &impulse);

        let mut out = vec![0.0; input.len()];
        for (i, o) in input.chunks(chunk).zip(out.chunks_mut(chunk)) {
            engine.process(i, o);
        }

        let expected = convolve_direct(&input, &impulse);
        let tolerance = 1e-4 * (impulse.len() as f32).sqrt().max(1.0) * 4.0;
        for (n, (a, b)) in expected.iter().zip(&out).enumerate() {
            prop_assert!((a - b).abs() < tolerance, "sample {}: {} vs {}", n, a, b);
        }
    }

    /// The uniform convolver accepts any chunking and stays finite.
    #[test]
    fn uniform_output_is_finite(
        impulse in prop::collection::vec(-1.0f32..=1.0, 1..600),
        input in prop::collection::vec(-1.0f32..=1.0, 1..1200),
        block_exp in 2u32..8,
        chunk in 1usize..300,
    ) {
        let mut conv = UniformConvolver::new(FftImplementation::BestAvailable);
        conv.init(1 << block_exp, &impulse);
        let mut out = vec![0.0; input.len()];
        for (i, o) in input.chunks(chunk).zip(out.chunks_mut(chunk)) {
            conv.process(i, o);
        }
        prop_assert!(out.iter().all(|s| s.is_finite()));
    }

    /// No energy survives a pipeline clean.
    #[test]
    fn clean_pipeline_is_silent(
        impulse in prop::collection::vec(-1.0f32..=1.0, 1..3000),
        warmup in prop::collection::vec(-1.0f32..=1.0, 64..1024),
    ) {
        let mut engine = ConvolutionEngine::new(EngineOptions::default());
        engine.init(32, 256, &impulse);
        let mut out = vec![0.0; 32];
        for block in warmup.chunks(32) {
            engine.process(block, &mut out[..block.len()]);
        }
        engine.clean_pipeline();
        for _ in 0..(impulse.len() / 32 + 8) {
            engine.process(&[0.0; 32], &mut out);
            prop_assert!(out.iter().all(|s| s.abs() < 1e-6));
        }
    }
}
