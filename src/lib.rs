//! Two-party secure sum over Yao garbled circuits.
//!
//! The garbler garbles a boolean adder, the evaluator obtains the labels of
//! its own input bits by oblivious transfer and evaluates the circuit. Only
//! the sum of both parties' sets is revealed.

pub mod channel;
pub mod checker;
pub mod circuit;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod garble;
pub mod input;
pub mod key;
pub mod ot;
pub mod protocol;

pub use checker::{check, Verdict};
pub use circuit::{Circuit, CircuitCollection, CircuitDescription, CircuitSelector, Gate, GateKind};
pub use config::Config;
pub use error::Error;
pub use garble::{garble, GarbledCircuit, Garbling, OutputMapping, WireLabel};
pub use key::Key;
pub use protocol::{run_evaluator, run_garbler, Outcome, PartyInput, Phase, Role};
