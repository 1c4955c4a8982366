//! The two-party protocol: both roles driven through a fixed message
//! sequence over a [`Channel`].
//!
//! ```text
//! garbler                               evaluator
//!   ── HELLO ──────────────────────────────▶
//!   ◀────────────────────────────── HELLO ──
//!   ── GARBLED_TABLES ─────────────────────▶
//!   ── GARBLER_INPUT_KEYS ─────────────────▶
//!   ── OT_OFFER ───────────────────────────▶   ┐
//!   ◀───────────────────────── OT_REQUEST ──   │ once per evaluator
//!   ── OT_RESPONSE ────────────────────────▶   ┘ input wire
//!   ── OUTPUT_MAP ─────────────────────────▶
//!   ◀───────────────────────────── RESULT ──
//! ```
//!
//! Either party may send `ABORT` in place of its next message. Once a party
//! has aborted it never sends `RESULT`.

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

use crate::channel::{expect_msg, Channel, Hello, Message};
use crate::checker::{self, Verdict};
use crate::circuit::Circuit;
use crate::config::Config;
use crate::error::{CommunicationError, Error, OtError};
use crate::evaluate::evaluate;
use crate::garble::{garble, WireLabel};
use crate::input;
use crate::ot::{ReceiverSession, SenderSession};

pub const PROTOCOL_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Garbler,
    Evaluator,
}

impl Role {
    pub fn peer(self) -> Role {
        match self {
            Role::Garbler => Role::Evaluator,
            Role::Evaluator => Role::Garbler,
        }
    }
}

/// Protocol phases, in the order they are entered.
///
/// A role skips the phases it has no part in: only the garbler builds and
/// only the evaluator evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Init,
    Build,
    Transfer,
    Evaluate,
    Reveal,
    Check,
    Done,
    Aborted,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Aborted)
    }
}

/// A party's private input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartyInput {
    pub set: Vec<u64>,
    /// The peer's declared set. When present the revealed sum is checked.
    pub peer_set: Option<Vec<u64>>,
}

impl PartyInput {
    pub fn new(set: Vec<u64>) -> Self {
        PartyInput {
            set,
            peer_set: None,
        }
    }

    pub fn with_peer_set(mut self, peer_set: Vec<u64>) -> Self {
        self.peer_set = Some(peer_set);
        self
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub role: Role,
    /// The revealed sum of both sets.
    pub sum: u64,
    /// Output bits, little-endian.
    pub bits: Vec<bool>,
    /// `None` unless the peer's set was supplied.
    pub verdict: Option<Verdict>,
    pub phase: Phase,
}

#[derive(Debug)]
struct StateMachine {
    role: Role,
    phase: Phase,
}

impl StateMachine {
    fn new(role: Role) -> Self {
        StateMachine {
            role,
            phase: Phase::Init,
        }
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(
            next > self.phase && !self.phase.is_terminal(),
            "illegal transition {:?} -> {:?}",
            self.phase,
            next
        );
        info!(role = ?self.role, from = ?self.phase, to = ?next, "phase transition");
        self.phase = next;
    }

    fn abort(&mut self, err: impl Into<Error>) -> Error {
        let err = err.into();
        warn!(role = ?self.role, phase = ?self.phase, %err, "aborting");
        self.phase = Phase::Aborted;
        err
    }

    /// Runs the CHECK phase if the peer's set is known.
    fn check(&mut self, input: &PartyInput, sum: u64) -> Option<Verdict> {
        let peer_set = input.peer_set.as_deref()?;
        self.advance(Phase::Check);

        let (garbler_set, evaluator_set) = match self.role {
            Role::Garbler => (input.set.as_slice(), peer_set),
            Role::Evaluator => (peer_set, input.set.as_slice()),
        };
        let verdict = checker::check(garbler_set, evaluator_set, sum);
        match verdict {
            Verdict::Match => info!(sum, "revealed sum matches the declared sets"),
            Verdict::Mismatch => warn!(
                sum,
                expected = %checker::expected_sum(garbler_set, evaluator_set),
                "revealed sum does not match the declared sets"
            ),
        }
        Some(verdict)
    }

    fn finish(&mut self, bits: Vec<bool>, sum: u64, verdict: Option<Verdict>) -> Outcome {
        self.advance(Phase::Done);
        Outcome {
            role: self.role,
            sum,
            bits,
            verdict,
            phase: self.phase,
        }
    }
}

/// Runs the garbler's side of the protocol over `stream`.
///
/// Input errors are reported before anything is written to the stream.
#[instrument(skip_all, fields(role = "garbler", circuit = circuit.name()))]
pub async fn run_garbler<R, S>(
    config: &Config,
    circuit: &Circuit,
    input: &PartyInput,
    rng: &mut R,
    stream: S,
) -> Result<Outcome, Error>
where
    R: RngCore + CryptoRng,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut state = StateMachine::new(Role::Garbler);
    let bits = input::encode_set(&input.set, circuit.garbler_inputs().len())
        .map_err(|err| state.abort(err))?;

    let mut channel = Channel::new(stream, config);
    let result = garbler_session(
        &mut state,
        &mut channel,
        circuit,
        input,
        &bits,
        config.print_tables,
        rng,
    )
    .await;
    conclude(&mut state, &mut channel, result).await
}

/// Runs the evaluator's side of the protocol over `stream`.
///
/// Input errors are reported before anything is written to the stream.
#[instrument(skip_all, fields(role = "evaluator", circuit = circuit.name()))]
pub async fn run_evaluator<R, S>(
    config: &Config,
    circuit: &Circuit,
    input: &PartyInput,
    rng: &mut R,
    stream: S,
) -> Result<Outcome, Error>
where
    R: RngCore + CryptoRng,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut state = StateMachine::new(Role::Evaluator);
    let bits = input::encode_set(&input.set, circuit.evaluator_inputs().len())
        .map_err(|err| state.abort(err))?;

    let mut channel = Channel::new(stream, config);
    let result = evaluator_session(&mut state, &mut channel, circuit, input, &bits, rng).await;
    conclude(&mut state, &mut channel, result).await
}

async fn garbler_session<R, S>(
    state: &mut StateMachine,
    channel: &mut Channel<S>,
    circuit: &Circuit,
    input: &PartyInput,
    bits: &[bool],
    print_tables: bool,
    rng: &mut R,
) -> Result<Outcome, Error>
where
    R: RngCore + CryptoRng,
    S: AsyncRead + AsyncWrite + Unpin,
{
    handshake(channel, Role::Garbler, circuit).await?;

    state.advance(Phase::Build);
    let garbling = garble(circuit, rng)?;
    if print_tables {
        info!("garbled tables:\n{}", garbling.circuit);
    }

    state.advance(Phase::Transfer);
    channel
        .send(&Message::GarbledTables(garbling.circuit.clone()))
        .await?;
    channel
        .send(&Message::GarblerInputKeys(garbling.garbler_labels(bits)))
        .await?;

    for (wire, keys) in &garbling.evaluator_inputs {
        let secrets = [false, true].map(|bit| Zeroizing::new(keys.label(bit).to_bytes().to_vec()));
        let (session, offer) = SenderSession::new(*wire, secrets, rng);
        channel.send(&Message::OtOffer(offer)).await?;

        let request = expect_msg!(channel, Message::OtRequest, "OT_REQUEST")?;
        let response = session.respond(&request)?;
        channel.send(&Message::OtResponse(response)).await?;
    }
    debug!(
        transfers = garbling.evaluator_inputs.len(),
        "completed oblivious transfers"
    );

    channel
        .send(&Message::OutputMap(garbling.output_mapping.clone()))
        .await?;
    drop(garbling);

    state.advance(Phase::Reveal);
    let output = expect_msg!(channel, Message::Result, "RESULT")?;
    if output.len() != circuit.outputs().len() {
        return Err(CommunicationError::Malformed(format!(
            "result has {} bits, circuit has {} outputs",
            output.len(),
            circuit.outputs().len()
        ))
        .into());
    }
    let sum = input::decode(&output)?;
    info!(sum, "revealed sum");

    let verdict = state.check(input, sum);
    Ok(state.finish(output, sum, verdict))
}

async fn evaluator_session<R, S>(
    state: &mut StateMachine,
    channel: &mut Channel<S>,
    circuit: &Circuit,
    input: &PartyInput,
    bits: &[bool],
    rng: &mut R,
) -> Result<Outcome, Error>
where
    R: RngCore + CryptoRng,
    S: AsyncRead + AsyncWrite + Unpin,
{
    handshake(channel, Role::Evaluator, circuit).await?;

    state.advance(Phase::Transfer);
    let tables = expect_msg!(channel, Message::GarbledTables, "GARBLED_TABLES")?;
    let mut held = expect_msg!(channel, Message::GarblerInputKeys, "GARBLER_INPUT_KEYS")?;

    let wires = circuit.evaluator_inputs();
    for (count, (&wire, &bit)) in wires.iter().zip(bits).enumerate() {
        let offer = match channel.recv().await? {
            Message::OtOffer(offer) => offer,
            Message::OutputMap(_) => {
                return Err(OtError::CountMismatch {
                    expected: wires.len(),
                    actual: count,
                }
                .into())
            }
            other => {
                return Err(CommunicationError::Unexpected {
                    expected: "OT_OFFER",
                    actual: other.kind(),
                }
                .into())
            }
        };
        if offer.wire != wire {
            return Err(OtError::WireMismatch {
                expected: wire,
                actual: offer.wire,
            }
            .into());
        }

        let (session, request) = ReceiverSession::new(bit, &offer, rng)?;
        channel.send(&Message::OtRequest(request)).await?;

        let response = expect_msg!(channel, Message::OtResponse, "OT_RESPONSE")?;
        let message = session.finish(&response)?;
        let label = WireLabel::from_bytes(&message).ok_or(OtError::InvalidMessage(wire))?;
        held.push((wire, label));
    }
    debug!(transfers = wires.len(), "completed oblivious transfers");

    let mapping = match channel.recv().await? {
        Message::OutputMap(mapping) => mapping,
        Message::OtOffer(_) => {
            return Err(OtError::CountMismatch {
                expected: wires.len(),
                actual: wires.len() + 1,
            }
            .into())
        }
        other => {
            return Err(CommunicationError::Unexpected {
                expected: "OUTPUT_MAP",
                actual: other.kind(),
            }
            .into())
        }
    };

    state.advance(Phase::Evaluate);
    let output = evaluate(circuit, &tables, held, &mapping)?;
    let sum = input::decode(&output)?;

    state.advance(Phase::Reveal);
    channel.send(&Message::Result(output.clone())).await?;
    info!(sum, "revealed sum");

    let verdict = state.check(input, sum);
    Ok(state.finish(output, sum, verdict))
}

/// Exchanges `HELLO` and checks that the peer runs the complementary role
/// of the same protocol version on the same circuit.
async fn handshake<S>(
    channel: &mut Channel<S>,
    role: Role,
    circuit: &Circuit,
) -> Result<(), CommunicationError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let digest = circuit.digest();
    channel
        .send(&Message::Hello(Hello {
            role,
            version: PROTOCOL_VERSION,
            circuit_digest: digest,
        }))
        .await?;

    let hello = expect_msg!(channel, Message::Hello, "HELLO")?;
    if hello.version != PROTOCOL_VERSION {
        return Err(CommunicationError::Handshake(format!(
            "peer speaks protocol version {}, expected {}",
            hello.version, PROTOCOL_VERSION
        )));
    }
    if hello.role != role.peer() {
        return Err(CommunicationError::Handshake(format!(
            "peer also runs as {:?}",
            hello.role
        )));
    }
    if hello.circuit_digest != digest {
        return Err(CommunicationError::Handshake(format!(
            "circuit digest mismatch: local {}, peer {}",
            hex::encode(digest),
            hex::encode(hello.circuit_digest)
        )));
    }

    debug!(digest = %hex::encode(digest), "handshake complete");
    Ok(())
}

/// Closes the channel. On failure, moves to `Aborted` and tells the peer
/// why unless the peer is already gone.
async fn conclude<S>(
    state: &mut StateMachine,
    channel: &mut Channel<S>,
    result: Result<Outcome, Error>,
) -> Result<Outcome, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let result = match result {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            let err = state.abort(err);
            let peer_gone = matches!(
                err,
                Error::Communication(
                    CommunicationError::Closed | CommunicationError::PeerAborted(_)
                )
            );
            if !peer_gone {
                if let Err(send_err) = channel.send(&Message::Abort(err.to_string())).await {
                    debug!(%send_err, "failed to notify peer of abort");
                }
            }
            Err(err)
        }
    };

    if let Err(err) = channel.close().await {
        debug!(%err, "failed to close channel");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_peer() {
        assert_eq!(Role::Garbler.peer(), Role::Evaluator);
        assert_eq!(Role::Evaluator.peer(), Role::Garbler);
    }

    #[test]
    fn test_phases_are_ordered() {
        assert!(Phase::Init < Phase::Build);
        assert!(Phase::Transfer < Phase::Evaluate);
        assert!(Phase::Reveal < Phase::Check);
        assert!(Phase::Done.is_terminal());
        assert!(Phase::Aborted.is_terminal());
        assert!(!Phase::Check.is_terminal());
    }

    #[test]
    fn test_garbler_skips_evaluate() {
        let mut state = StateMachine::new(Role::Garbler);
        state.advance(Phase::Build);
        state.advance(Phase::Transfer);
        state.advance(Phase::Reveal);
        state.advance(Phase::Done);
        assert_eq!(state.phase, Phase::Done);
    }

    #[test]
    #[should_panic(expected = "illegal transition")]
    #[cfg(debug_assertions)]
    fn test_backward_transition_panics() {
        let mut state = StateMachine::new(Role::Evaluator);
        state.advance(Phase::Evaluate);
        state.advance(Phase::Transfer);
    }

    #[test]
    fn test_check_requires_peer_set() {
        let mut state = StateMachine::new(Role::Evaluator);
        state.advance(Phase::Reveal);
        assert_eq!(state.check(&PartyInput::new(vec![20]), 30), None);
        assert_eq!(state.phase, Phase::Reveal);

        let input = PartyInput::new(vec![20]).with_peer_set(vec![10]);
        assert_eq!(state.check(&input, 30), Some(Verdict::Match));
        assert_eq!(state.phase, Phase::Check);
    }

    #[test]
    fn test_abort_is_terminal() {
        let mut state = StateMachine::new(Role::Garbler);
        state.advance(Phase::Transfer);
        let err = state.abort(CommunicationError::Closed);

        assert!(matches!(
            err,
            Error::Communication(CommunicationError::Closed)
        ));
        assert_eq!(state.phase, Phase::Aborted);
    }
}
