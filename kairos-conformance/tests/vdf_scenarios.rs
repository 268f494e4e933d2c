//! End-to-end VDF scenarios over the public session and proof surfaces.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use num_bigint::BigInt;
use num_traits::Zero;

use kairos_core::{VdfConfig, VdfError};
use kairos_vdf::checkpoint;
use kairos_vdf::wesolowski;
use kairos_vdf::{Discriminant, QuadraticForm, SessionState, VdfSession};

/// The challenge bytes `1, 2, …, 32`.
fn counting_challenge() -> [u8; 32] {
    let mut ch = [0u8; 32];
    for (i, byte) in ch.iter_mut().enumerate() {
        *byte = (i + 1) as u8;
    }
    ch
}

fn config(segment: u64) -> VdfConfig {
    VdfConfig {
        segment_size: segment,
        ..VdfConfig::default()
    }
}

/// A deterministic non-principal element of the group, for runs where the
/// squaring chain should actually move.
fn nontrivial_form(disc: &Discriminant) -> QuadraticForm {
    let d = disc.value();
    for a in 2i64..200 {
        let four_a = BigInt::from(4 * a);
        for b in 0..(2 * a) {
            let b = BigInt::from(b);
            let num = &b * &b - d;
            if (&num % &four_a).is_zero() {
                let f = QuadraticForm::new(BigInt::from(a), b, &num / &four_a).reduce();
                if !f.is_principal() {
                    return f;
                }
            }
        }
    }
    unreachable!("no non-principal element below scan bound")
}

fn square_n(disc: &Discriminant, x: &QuadraticForm, n: u64) -> QuadraticForm {
    let bound = disc.reduction_bound();
    let mut cur = x.reduce();
    for _ in 0..n {
        cur = cur.nudupl(disc, &bound).unwrap();
    }
    cur
}

// Scenario: generator identity on D = −7.
#[test]
fn generator_identity() {
    let disc = Discriminant::from_value(BigInt::from(-7)).unwrap();
    let g = QuadraticForm::generator(&disc);
    assert_eq!(
        g,
        QuadraticForm::new(BigInt::from(1), BigInt::from(1), BigInt::from(2))
    );
    assert!(g.is_reduced());

    // zero squarings leave it unchanged
    assert_eq!(square_n(&disc, &g, 0), g);

    // the trivial proof with T = 0 verifies
    let proof = wesolowski::prove(&disc, &g, &g, 0, 0).unwrap();
    assert!(wesolowski::verify(&disc, &g, &g, 0, 0, &proof));
}

// Scenario: small VDF over the counting challenge at 512 bits, T = 100.
#[test]
fn small_vdf_completes_and_proves() {
    let challenge = counting_challenge();
    let t = 100u64;

    let mut session = VdfSession::new(config(0)).unwrap();
    session.start(&challenge, None, t, 512).unwrap();
    session.wait(0).unwrap();
    assert_eq!(session.status().state, SessionState::Completed);

    let disc = session.discriminant().unwrap();
    let y = session.result_form().unwrap();
    // invariant: every reachable form keeps the session discriminant
    assert_eq!(y.discriminant(), *disc.value());

    let x = session.initial_form().unwrap();
    let proof = session.generate_proof(0).unwrap();
    assert!(wesolowski::verify(&disc, &x, &y, t, 0, &proof));
    assert!(wesolowski::verify_with_challenge(
        &challenge, 512, &y, t, 0, &proof
    ));

    // identical inputs give the identical final form
    let mut second = VdfSession::new(config(0)).unwrap();
    second.start(&challenge, None, t, 512).unwrap();
    second.wait(0).unwrap();
    assert_eq!(second.result_form().unwrap(), y);
}

// Scenario: cancellation of a long run.
#[test]
fn cancellation_stops_without_completion() {
    let challenge = counting_challenge();
    let disc = Discriminant::from_challenge(&challenge, 512).unwrap();
    let x = nontrivial_form(&disc);

    let completed_fired = Arc::new(AtomicBool::new(false));
    let cancelled_fired = Arc::new(AtomicBool::new(false));

    let mut session = VdfSession::new(config(0)).unwrap();
    let completed = Arc::clone(&completed_fired);
    let cancelled = Arc::clone(&cancelled_fired);
    session.set_callbacks(
        None,
        Some(Box::new(move |ok, _| {
            if ok {
                completed.store(true, Ordering::SeqCst);
            } else {
                cancelled.store(true, Ordering::SeqCst);
            }
        })),
        1_000,
    );

    session
        .start(&challenge, Some(x), 1_000_000, 512)
        .unwrap();
    std::thread::sleep(Duration::from_millis(200));
    session.stop().unwrap();

    let status = session.status();
    assert_eq!(status.state, SessionState::Stopped);
    assert!(status.iteration < 1_000_000);
    assert!(!completed_fired.load(Ordering::SeqCst));
    assert!(cancelled_fired.load(Ordering::SeqCst));
}

// Scenario: checkpoint cadence at T = 10 000 with 2 000-iteration segments.
#[test]
fn checkpoint_cadence_and_segment_proofs() {
    let challenge = counting_challenge();
    let disc = Discriminant::from_challenge(&challenge, 128).unwrap();
    let x = nontrivial_form(&disc);
    let t = 10_000u64;

    let mut session = VdfSession::new(config(2_000)).unwrap();
    session.start(&challenge, Some(x.clone()), t, 128).unwrap();
    session.wait(0).unwrap();
    assert!(session.is_complete());

    assert_eq!(session.checkpoint_count(), 6);
    let cps = session.checkpoints_between(0, t, 16);
    let iters: Vec<u64> = cps.iter().map(|c| c.iteration).collect();
    assert_eq!(iters, vec![0, 2_000, 4_000, 6_000, 8_000, 10_000]);

    // every checkpoint form is the true power of the start form
    let bound = disc.reduction_bound();
    let mut expected = x.reduce();
    let mut prev_iter = 0u64;
    for cp in &cps {
        for _ in prev_iter..cp.iteration {
            expected = expected.nudupl(&disc, &bound).unwrap();
        }
        prev_iter = cp.iteration;
        assert_eq!(cp.form, expected, "checkpoint {}", cp.iteration);
    }

    // the segment proofs chain the whole span
    for window in cps.windows(2) {
        let (prev, cur) = (&window[0], &window[1]);
        let record = cur.proof.as_ref().expect("segment proof");
        assert!(checkpoint::verify_segment(
            &disc,
            &prev.form,
            &cur.form,
            cur.iteration - prev.iteration,
            0,
            record
        ));
    }
    assert_eq!(cps.last().unwrap().form, session.result_form().unwrap());
}

// Scenario: tampered proofs are rejected.
#[test]
fn tampered_proof_rejected() {
    let challenge = counting_challenge();
    let disc = Discriminant::from_challenge(&challenge, 128).unwrap();
    let x = nontrivial_form(&disc);
    let t = 50u64;
    let y = square_n(&disc, &x, t);
    let proof = wesolowski::prove(&disc, &x, &y, t, 0).unwrap();
    assert!(wesolowski::verify(&disc, &x, &y, t, 0, &proof));

    // flip a bit of the serialised π (past header and ℓ)
    let pi_offset = 11 + proof[10] as usize + 4;
    let mut tampered = proof.clone();
    tampered[pi_offset] ^= 0x01;
    assert!(!wesolowski::verify(&disc, &x, &y, t, 0, &tampered));

    // flip T in the header
    let mut tampered = proof.clone();
    tampered[9] ^= 0x01;
    assert!(!wesolowski::verify(&disc, &x, &y, t, 0, &tampered));

    // flip a byte of ℓ
    let mut tampered = proof.clone();
    tampered[12] ^= 0x80;
    assert!(!wesolowski::verify(&disc, &x, &y, t, 0, &tampered));

    // a different y
    let other_y = square_n(&disc, &x, t + 1);
    assert!(!wesolowski::verify(&disc, &x, &other_y, t, 0, &proof));
}

// Boundary: T = 1 is a single squaring.
#[test]
fn single_iteration_session() {
    let challenge = counting_challenge();
    let disc = Discriminant::from_challenge(&challenge, 128).unwrap();
    let x = nontrivial_form(&disc);

    let mut session = VdfSession::new(config(0)).unwrap();
    session.start(&challenge, Some(x.clone()), 1, 128).unwrap();
    session.wait(0).unwrap();

    assert_eq!(session.result_form().unwrap(), square_n(&disc, &x, 1));
    let proof = session.generate_proof(0).unwrap();
    assert!(wesolowski::verify(
        &disc,
        &x,
        &session.result_form().unwrap(),
        1,
        0,
        &proof
    ));
}

// The slow path must carry a run on its own when the fast path never
// engages, and the observable counter accounts for every iteration.
#[test]
fn forced_slow_path_run() {
    let challenge = counting_challenge();
    let disc = Discriminant::from_challenge(&challenge, 128).unwrap();
    let x = nontrivial_form(&disc);
    let t = 70u64;

    let reference = square_n(&disc, &x, t);

    let cfg = VdfConfig {
        gcd_iteration_cap: 0,
        segment_size: 0,
        ..VdfConfig::default()
    };
    let mut session = VdfSession::new(cfg).unwrap();
    session.start(&challenge, Some(x), t, 128).unwrap();
    session.wait(0).unwrap();

    assert_eq!(session.result_form().unwrap(), reference);
    assert_eq!(session.slow_count(), t);
}

// Progress callbacks respect segment boundaries; completion fires last.
#[test]
fn callback_ordering_across_checkpoints() {
    let challenge = counting_challenge();
    let progress_count = Arc::new(AtomicUsize::new(0));
    let completion_count = Arc::new(AtomicUsize::new(0));

    let mut session = VdfSession::new(config(25)).unwrap();
    let p = Arc::clone(&progress_count);
    let c = Arc::clone(&completion_count);
    session.set_callbacks(
        Some(Box::new(move |_, _| {
            p.fetch_add(1, Ordering::SeqCst);
        })),
        Some(Box::new(move |ok, iterations| {
            assert!(ok);
            assert_eq!(iterations, 100);
            c.fetch_add(1, Ordering::SeqCst);
        })),
        10_000,
    );
    session.start(&challenge, None, 100, 128).unwrap();
    session.wait(0).unwrap();

    assert_eq!(progress_count.load(Ordering::SeqCst), 4);
    assert_eq!(completion_count.load(Ordering::SeqCst), 1);
}

// Tick certificates fold the checkpoint cadence into the hash-chained
// ledger, one certificate per segment.
#[test]
fn tick_ledger_follows_checkpoints() {
    use kairos_vdf::tick::TickLedger;

    let challenge = counting_challenge();
    let disc = Discriminant::from_challenge(&challenge, 128).unwrap();
    let x = nontrivial_form(&disc);
    let segment = 50u64;
    let t = 200u64;

    let mut session = VdfSession::new(config(segment)).unwrap();
    session.start(&challenge, Some(x), t, 128).unwrap();
    session.wait(0).unwrap();

    let mut ledger = TickLedger::new(segment).unwrap();
    ledger.submit(b"first tick payload".to_vec());
    for cp in session.checkpoints_between(1, t, 16) {
        ledger
            .observe(cp.iteration, &cp.form, cp.proof.as_deref())
            .unwrap();
    }

    assert_eq!(ledger.certificates().len(), 4);
    let cert = ledger.certificate(0).unwrap();
    assert_eq!(cert.end_iteration, segment);
    assert_ne!(cert.data_merkle_root, [0u8; 32]);
    assert!(cert.proof.is_some());
    // later ticks carried no data
    assert_eq!(ledger.certificate(1).unwrap().data_merkle_root, [0u8; 32]);
    // certificates pin the session's own forms
    assert_eq!(
        ledger.certificate(3).unwrap().form,
        session.result_form().unwrap()
    );
}

// Errors keep their stable numbering across the public surface.
#[test]
fn error_codes_surface() {
    let mut session = VdfSession::new(config(0)).unwrap();
    let err = session.start(&counting_challenge(), None, 0, 128).unwrap_err();
    assert_eq!(err.code(), -2);
    assert_eq!(VdfError::AlreadyRunning.code(), -11);
    assert_eq!(VdfError::InvalidDiscriminant.code(), -6);
}
