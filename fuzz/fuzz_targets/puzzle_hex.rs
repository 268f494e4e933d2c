#![no_main]
use kairos_timelock::RswPuzzle;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: (&str, &str, &str, u16)| {
    let (n, a, c, t) = input;
    // parsing arbitrary strings must never panic; packing a parsed puzzle
    // may reject but not crash
    if let Ok(puzzle) = RswPuzzle::parse(n, a, c, u32::from(t) % 64) {
        let _ = puzzle.pack();
    }
});
