#![no_main]
use kairos_vdf::checkpoint::{parse_segment_record, verify_segment};
use kairos_vdf::{Discriminant, QuadraticForm};
use libfuzzer_sys::fuzz_target;
use num_bigint::BigInt;

fuzz_target!(|data: &[u8]| {
    let _ = parse_segment_record(data);

    let disc = Discriminant::from_value(BigInt::from(-23)).unwrap();
    let g = QuadraticForm::generator(&disc);
    let _ = verify_segment(&disc, &g, &g, 16, 0, data);
});
