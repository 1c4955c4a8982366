use crate::circuit::GateKind;

/// Top-level error for a protocol run.
///
/// Every variant is fatal: the orchestrator moves to
/// [`Phase::Aborted`](crate::protocol::Phase::Aborted) and never reveals a
/// partial result.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    CircuitFormat(#[from] CircuitFormatError),
    #[error(transparent)]
    Communication(#[from] CommunicationError),
    #[error(transparent)]
    Decryption(#[from] DecryptionFailure),
    #[error(transparent)]
    Ot(#[from] OtError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Crypto(#[from] AeadError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised while loading a circuit description.
#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub enum CircuitFormatError {
    #[error("invalid circuit document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to read circuit file: {0}")]
    Io(#[from] std::io::Error),
    #[error("wire {wire} is not declared (circuit has {wires} wires)")]
    UndeclaredWire { wire: u32, wires: u32 },
    #[error("gate {gate} of type {kind:?} expects {expected} inputs, got {actual}")]
    ArityMismatch {
        gate: u32,
        kind: GateKind,
        expected: usize,
        actual: usize,
    },
    #[error("gate id {0} is declared more than once")]
    DuplicateGate(u32),
    #[error("wire {0} has more than one driver")]
    MultipleDrivers(u32),
    #[error("wire {0} is read but never driven")]
    UndrivenWire(u32),
    #[error("wire {0} appears in more than one input group")]
    OverlappingInputs(u32),
    #[error("circuit contains a cycle through gate {0}")]
    Cycle(u32),
    #[error("circuit declares {wires} wires but only {used} are inputs or gate outputs")]
    TooManyWires { wires: u32, used: usize },
    #[error("no circuit {selector} in collection {collection:?}")]
    UnknownCircuit { selector: String, collection: String },
    #[error("adder width must be between 1 and 63 bits, got {0}")]
    InvalidWidth(usize),
}

/// Errors on the message channel between the two parties.
#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub enum CommunicationError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("channel closed by peer")]
    Closed,
    #[error("timed out waiting for peer after {0:?}")]
    Timeout(std::time::Duration),
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("failed to encode message: {0}")]
    Encode(#[from] bincode::Error),
    #[error("unexpected message: expected {expected}, got {actual}")]
    Unexpected {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("peer aborted: {0}")]
    PeerAborted(String),
}

/// Failure to make progress through the garbled circuit.
///
/// Signals desynchronization, corruption or tampering. Never retried.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum DecryptionFailure {
    #[error("no garbled row of gate {gate} decrypts under the held labels")]
    Row { gate: u32 },
    #[error("garbled row of gate {gate} has an invalid plaintext")]
    MalformedRow { gate: u32 },
    #[error("no garbled table for gate {gate}")]
    MissingTable { gate: u32 },
    #[error("garbled table for gate {gate} has no gate in the circuit")]
    ExtraTable { gate: u32 },
    #[error("no label held for wire {wire}")]
    MissingWire { wire: u32 },
    #[error("label supplied for wire {wire}, which is not an input wire")]
    UnexpectedInput { wire: u32 },
    #[error("output key of wire {wire} matches neither entry of the output mapping")]
    UnknownOutputKey { wire: u32 },
    #[error("output mapping covers wire {actual}, expected wire {expected}")]
    OutputMismatch { expected: u32, actual: u32 },
}

/// Errors of the 1-out-of-2 oblivious transfer.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum OtError {
    #[error("count mismatch: expected {expected} transfers, got {actual}")]
    CountMismatch { expected: usize, actual: usize },
    #[error("transfer for wire {actual} received while wire {expected} was pending")]
    WireMismatch { expected: u32, actual: u32 },
    #[error("peer sent an invalid group element")]
    InvalidPoint,
    #[error("consistency check failed for wire {0}")]
    ConsistencyCheck(u32),
    #[error("transferred message for wire {0} is malformed")]
    InvalidMessage(u32),
    #[error(transparent)]
    Crypto(#[from] AeadError),
}

/// Errors in a party's private input.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum InputError {
    #[error("sum of the set does not fit in {bits} bits")]
    Overflow { bits: usize },
    #[error("expected {expected} input bits, got {actual}")]
    BitCount { expected: usize, actual: usize },
}

/// Authenticated encryption failed.
#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq, Eq)]
#[error("authenticated encryption failed")]
pub struct AeadError;

/// Errors loading the run configuration.
#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),
}
