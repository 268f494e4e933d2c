#![forbid(unsafe_code)]

//! Conformance suite for the Kairos compute core. All content lives in
//! `tests/`.
