//! Property-based tests for partita-core primitives.
//!
//! Smoother convergence, sanitiser output, predelay integrity and resampler
//! bounds under randomized input.

use proptest::prelude::*;
use partita_core::{
    GainSmoother, LagrangeResampler, OnePole, Predelay, ProcessData, SmoothedParam, SmoothingMode,
    is_finite_buffer, sanitize_buffer,
};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// Any mix of finite and non-finite samples is left fully finite.
    #[test]
    fn sanitized_buffers_are_finite(
        values in prop::collection::vec(
            prop_oneof![
                -1.0e6f32..1.0e6f32,
                Just(f32::NAN),
                Just(f32::INFINITY),
                Just(f32::NEG_INFINITY),
                Just(1.0e-30f32),
            ],
            0..256,
        )
    ) {
        let mut buffer = values.clone();
        let expected = values.iter().filter(|v| !v.is_finite()).count();
        let replaced = sanitize_buffer(&mut buffer);
        prop_assert_eq!(replaced, expected);
        prop_assert!(is_finite_buffer(&buffer));
    }

    /// An exponential smoother lands within 1% of its target after ten time
    /// constants, whatever the start and end values.
    #[test]
    fn smoothed_param_converges(
        start in -10.0f32..10.0f32,
        target in -10.0f32..10.0f32,
        time_ms in 1.0f32..50.0f32,
    ) {
        let sr = 48000.0;
        let mut param = SmoothedParam::with_config(start, sr, time_ms);
        param.set_target(target);
        let samples = (time_ms / 1000.0 * sr * 10.0) as usize;
        for _ in 0..samples {
            param.advance();
        }
        let tolerance = (target - start).abs() * 0.01 + 1e-4;
        prop_assert!((param.get() - target).abs() <= tolerance,
            "start={} target={} got={}", start, target, param.get());
    }

    /// A fast gain smoother never overshoots between its start and target.
    #[test]
    fn gain_smoother_stays_between_endpoints(
        start in 0.0f32..2.0f32,
        target in 0.0f32..2.0f32,
    ) {
        let mut smoother = GainSmoother::new(SmoothingMode::Fast, start);
        smoother.set_gain(target);
        let mut block = [1.0f32; 512];
        smoother.process_block(&mut ProcessData::mono(&mut block));
        let lo = start.min(target) - 1e-5;
        let hi = start.max(target) + 1e-5;
        for &g in &block {
            prop_assert!(g >= lo && g <= hi, "gain {} escaped [{}, {}]", g, lo, hi);
        }
    }

    /// The predelay reproduces its input exactly, shifted by the delay.
    #[test]
    fn predelay_shifts_exactly(
        delay_ms in 0.0f32..20.0f32,
        input in prop::collection::vec(-1.0f32..1.0f32, 64..256),
    ) {
        let sr = 1000.0;
        let mut delay = Predelay::new();
        delay.prepare(sr, 20.0);
        delay.set_delay_ms(delay_ms);
        let d = delay.delay_samples();

        let mut block = input.clone();
        delay.process_block(&mut block);
        for (i, &y) in block.iter().enumerate() {
            let expected = if i >= d { input[i - d] } else { 0.0 };
            let expected = if expected.abs() < 1e-20 { 0.0 } else { expected };
            prop_assert_eq!(y, expected);
        }
    }

    /// Resampling a bounded signal with the cubic kernel stays bounded by
    /// the kernel's worst-case overshoot.
    #[test]
    fn resampler_output_is_bounded(
        speed in 0.25f64..4.0f64,
        input in prop::collection::vec(-1.0f32..1.0f32, 16..256),
    ) {
        let mut resampler = LagrangeResampler::new(speed);
        let mut out = vec![0.0f32; 300];
        resampler.render(&input, &mut out);
        for &y in &out {
            prop_assert!(y.is_finite());
            prop_assert!(y.abs() <= 1.5, "overshoot {}", y);
        }
    }

    /// Sweeping a one-pole anywhere in the audio band stays stable.
    #[test]
    fn one_pole_sweep_is_stable(
        freqs in prop::collection::vec(20.0f32..20000.0f32, 1..16),
        input in prop::array::uniform32(-1.0f32..=1.0f32),
    ) {
        let mut lp = OnePole::new(44100.0, 20000.0);
        for f in freqs {
            lp.set_frequency(f);
            for &x in &input {
                let y = lp.process(x);
                prop_assert!(y.is_finite() && y.abs() <= 1.0 + 1e-5);
            }
        }
    }
}
