#![no_main]
use kairos_vdf::wesolowski::{parse_proof, verify};
use kairos_vdf::{Discriminant, QuadraticForm};
use libfuzzer_sys::fuzz_target;
use num_bigint::BigInt;

fuzz_target!(|data: &[u8]| {
    // structural parsing must never panic
    let _ = parse_proof(data);

    // nor may full verification, whatever the bytes claim
    let disc = Discriminant::from_value(BigInt::from(-23)).unwrap();
    let g = QuadraticForm::generator(&disc);
    let _ = verify(&disc, &g, &g, 8, 0, data);
});
