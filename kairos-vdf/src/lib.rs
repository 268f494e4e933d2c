#![forbid(unsafe_code)]

//! Class-group VDF engine.
//!
//! The time source of a Kairos node: repeated squaring of binary quadratic
//! forms over a negative prime discriminant, with Wesolowski proofs and a
//! streaming checkpoint trail. A [`session::VdfSession`] drives the squaring
//! loop on a background worker; [`wesolowski`] proves and verifies the
//! result; [`tick`] folds checkpoints into the node's tick certificates.

pub mod arith;
pub mod checkpoint;
pub mod discriminant;
pub mod form;
pub mod session;
pub mod squarer;
pub mod tick;
pub mod wesolowski;

pub use checkpoint::Checkpoint;
pub use discriminant::Discriminant;
pub use form::QuadraticForm;
pub use session::{SessionState, SessionStatus, VdfSession};
