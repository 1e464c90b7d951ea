use approx::assert_abs_diff_eq;
use rustfmvoice::synth::algorithm::{Algorithm, AlgorithmSlot, FmRouter, Role};
use rustfmvoice::synth::operator::{Operator, OperatorId};
use rustfmvoice::synth::waveform::Waveform;
use rustfmvoice::synth::wavetable::Wavetable;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const SAMPLE_RATE: f64 = 44100.0;

fn operators(note: u8) -> [Operator; 4] {
    let table = Arc::new(Wavetable::from_waveform(Waveform::Sine, 2048).unwrap());
    OperatorId::ALL.map(|id| {
        let mut op = Operator::new(id, Arc::clone(&table), SAMPLE_RATE);
        op.set_note(note).unwrap();
        op
    })
}

fn router(index: u8) -> FmRouter {
    FmRouter::new(AlgorithmSlot::new(Algorithm::new(index).unwrap()))
}

#[test]
fn every_topology_is_in_evaluation_order() {
    for algorithm in Algorithm::all() {
        let topology = algorithm.topology();
        assert_eq!(topology.nodes.len(), 4, "{}", algorithm);

        let mut seen = Vec::new();
        for (i, node) in topology.nodes.iter().enumerate() {
            assert!(!seen.contains(&node.op), "{} repeats {}", algorithm, node.op);
            seen.push(node.op);
            for &input in node.fm.iter().chain(node.sum) {
                assert!(input < i, "{}: node {} reads later node {}", algorithm, i, input);
            }
        }
        assert!(!topology.carriers.is_empty());
        assert!(topology.carriers.iter().all(|&c| c < topology.nodes.len()));
    }
}

#[test]
fn every_algorithm_has_a_carrier_and_d_always_sounds() {
    for algorithm in Algorithm::all() {
        assert_eq!(algorithm.role(OperatorId::D), Role::Carrier, "{}", algorithm);
    }
}

#[test]
fn inactive_operators_give_exact_silence() {
    for algorithm in Algorithm::all() {
        let mut ops = operators(69);
        ops.iter_mut().for_each(|op| op.set_active(false));
        let mut router = router(algorithm.index());
        for _ in 0..256 {
            assert_eq!(router.tick(&mut ops, &[]), 0.0, "{}", algorithm);
        }
    }
}

#[test]
fn silenced_modulators_leave_a_pure_carrier() {
    let mut ops = operators(69);
    for id in [OperatorId::A, OperatorId::B, OperatorId::C] {
        ops[id.index()].set_active(false);
    }
    let mut reference = operators(69);
    let mut router = router(0);
    for _ in 0..1000 {
        let expected = reference[OperatorId::D.index()].tick(&[]);
        assert_eq!(router.tick(&mut ops, &[]), expected);
    }
}

#[test]
fn active_modulator_changes_the_carrier() {
    let mut modulated = operators(69);
    let mut plain = operators(69);
    for id in [OperatorId::A, OperatorId::B, OperatorId::C] {
        plain[id.index()].set_active(false);
    }
    let mut a = router(0);
    let mut b = router(0);
    let differs = (0..1000).any(|_| {
        let x = a.tick(&mut modulated, &[]);
        let y = b.tick(&mut plain, &[]);
        (x - y).abs() > 1e-6
    });
    assert!(differs);
}

#[test]
fn additive_algorithm_sums_every_operator() {
    let mut ops = operators(60);
    let mut reference = operators(60);
    let mut router = router(11);
    for _ in 0..500 {
        let single = reference[0].tick(&[]);
        assert_abs_diff_eq!(router.tick(&mut ops, &[]), 4.0 * single, epsilon = 1e-12);
    }
}

#[test]
fn inactive_node_keeps_its_pass_through_inputs() {
    let mut ops = operators(60);
    ops[OperatorId::B.index()].set_active(false);
    let mut reference = operators(60);
    let mut router = router(11);
    for _ in 0..500 {
        let single = reference[0].tick(&[]);
        assert_abs_diff_eq!(router.tick(&mut ops, &[]), 3.0 * single, epsilon = 1e-12);
    }
}

#[test]
fn switching_algorithms_while_ticking_never_breaks_a_tick() {
    let slot = AlgorithmSlot::default();
    let mut router = FmRouter::new(slot.clone());
    let mut ops = operators(57);
    let done = Arc::new(AtomicBool::new(false));

    let publisher = {
        let slot = slot.clone();
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            let mut index = 0u8;
            while !done.load(Ordering::Relaxed) {
                index = (index + 1) % Algorithm::COUNT;
                slot.publish(index).unwrap();
                assert!(slot.publish(Algorithm::COUNT + index).is_err());
            }
        })
    };

    for _ in 0..50_000 {
        let sample = router.tick(&mut ops, &[]);
        assert!(sample.is_finite());
        // at most four carriers at full level
        assert!(sample.abs() <= 4.0 + 1e-9);
        assert!(router.algorithm().index() < Algorithm::COUNT);
    }
    done.store(true, Ordering::Relaxed);
    publisher.join().unwrap();
}
