//! Garbled circuit construction.
//!
//! Every wire gets two random keys and a random permutation bit `p`. The
//! evaluator only ever holds one [`WireLabel`] per wire: a key together with
//! the public label `p ^ bit`. Table rows are placed at the index formed by
//! the input labels, so evaluation is a single lookup and decryption.

use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::{debug, trace};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::circuit::{Circuit, GateInputs, GateKind};
use crate::error::AeadError;
use crate::key::{Ciphertext, Key, KEY_SIZE};

/// Plaintext length of a garbled row: output key and label byte.
pub const LABEL_SIZE: usize = KEY_SIZE + 1;

/// The value of a wire as seen by the evaluator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct WireLabel {
    pub key: Key,
    /// Point-and-permute label, `p ^ bit`.
    pub label: bool,
}

impl WireLabel {
    pub fn to_bytes(&self) -> [u8; LABEL_SIZE] {
        let mut bytes = [0u8; LABEL_SIZE];
        bytes[..KEY_SIZE].copy_from_slice(self.key.as_bytes());
        bytes[KEY_SIZE] = self.label as u8;
        bytes
    }

    /// Parses a label, rejecting anything but an exact key and a 0/1 byte.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != LABEL_SIZE {
            return None;
        }
        let label = match bytes[KEY_SIZE] {
            0 => false,
            1 => true,
            _ => return None,
        };
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&bytes[..KEY_SIZE]);
        Some(WireLabel {
            key: Key(key),
            label,
        })
    }
}

/// Both keys of a wire and its permutation bit. Only the garbler holds these.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct WireKeys {
    zero: Key,
    one: Key,
    pbit: bool,
}

impl WireKeys {
    /// Draws `k0 != k1` and an independent permutation bit.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let zero = Key::random(rng);
        let mut one = Key::random(rng);
        while one == zero {
            one = Key::random(rng);
        }
        WireKeys {
            zero,
            one,
            pbit: rng.gen(),
        }
    }

    pub fn key(&self, bit: bool) -> &Key {
        if bit {
            &self.one
        } else {
            &self.zero
        }
    }

    pub fn pbit(&self) -> bool {
        self.pbit
    }

    /// The label the evaluator holds when the wire carries `bit`.
    pub fn label(&self, bit: bool) -> WireLabel {
        WireLabel {
            key: self.key(bit).clone(),
            label: self.pbit ^ bit,
        }
    }
}

/// Rows of a garbled gate, indexed by the concatenated input labels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GarbledTable {
    Unary([Ciphertext; 2]),
    Binary([Ciphertext; 4]),
}

impl GarbledTable {
    pub fn row(&self, index: usize) -> Option<&Ciphertext> {
        match self {
            GarbledTable::Unary(rows) => rows.get(index),
            GarbledTable::Binary(rows) => rows.get(index),
        }
    }

    pub fn rows(&self) -> &[Ciphertext] {
        match self {
            GarbledTable::Unary(rows) => rows,
            GarbledTable::Binary(rows) => rows,
        }
    }

    pub fn rows_mut(&mut self) -> &mut [Ciphertext] {
        match self {
            GarbledTable::Unary(rows) => rows,
            GarbledTable::Binary(rows) => rows,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GarbledGate {
    pub gate: u32,
    pub table: GarbledTable,
}

/// Garbled tables in the circuit's topological order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GarbledCircuit {
    pub gates: Vec<GarbledGate>,
}

/// One line per row, `gate <id> row <index>: <hex>`.
impl fmt::Display for GarbledCircuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for gate in &self.gates {
            for (index, row) in gate.table.rows().iter().enumerate() {
                writeln!(f, "gate {} row {}: {}", gate.gate, index, hex::encode(&row.0))?;
            }
        }
        Ok(())
    }
}

/// One output wire of the decoding table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEntry {
    pub wire: u32,
    /// Digests of `k0` and `k1`, in that order.
    pub digests: [[u8; 32]; 2],
}

/// Maps the keys of each output wire to their plaintext bit.
///
/// Carries digests rather than the keys themselves, so an output wire that
/// also feeds other gates is not opened by publishing the mapping.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMapping {
    pub entries: Vec<OutputEntry>,
}

impl OutputMapping {
    pub fn output_digest(wire: u32, key: &Key) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"yao-sum/output");
        hasher.update(wire.to_be_bytes());
        hasher.update(key.as_bytes());
        hasher.finalize().into()
    }

    /// Decodes one output label, `None` if it matches neither key.
    pub fn decode_wire(entry: &OutputEntry, label: &WireLabel) -> Option<bool> {
        let digest = Self::output_digest(entry.wire, &label.key);
        if digest == entry.digests[0] {
            Some(false)
        } else if digest == entry.digests[1] {
            Some(true)
        } else {
            None
        }
    }
}

/// Everything the garbler produces for one run.
///
/// Input keys are erased when this is dropped.
pub struct Garbling {
    pub circuit: GarbledCircuit,
    /// Keys of the garbler's input wires, in declared order.
    pub garbler_inputs: Vec<(u32, WireKeys)>,
    /// Keys of the evaluator's input wires, in declared order.
    pub evaluator_inputs: Vec<(u32, WireKeys)>,
    pub output_mapping: OutputMapping,
}

impl Garbling {
    /// Labels for the garbler's own input bits.
    pub fn garbler_labels(&self, bits: &[bool]) -> Vec<(u32, WireLabel)> {
        self.garbler_inputs
            .iter()
            .zip(bits)
            .map(|((wire, keys), &bit)| (*wire, keys.label(bit)))
            .collect()
    }
}

/// Key under which the row for one input combination is encrypted.
pub(crate) fn row_key(gate: u32, index: usize, inputs: &[&Key]) -> Key {
    let gate = gate.to_be_bytes();
    let index = [index as u8];
    let mut parts: Vec<&[u8]> = vec![
        b"yao-sum/row".as_slice(),
        gate.as_slice(),
        index.as_slice(),
    ];
    parts.extend(inputs.iter().map(|key| key.as_bytes().as_slice()));
    Key::derive(&parts)
}

/// Garbles `circuit` with fresh randomness from `rng`.
pub fn garble<R: RngCore + CryptoRng>(
    circuit: &Circuit,
    rng: &mut R,
) -> Result<Garbling, AeadError> {
    let wires: Vec<WireKeys> = (0..circuit.wire_count())
        .map(|_| WireKeys::random(rng))
        .collect();

    let mut gates = Vec::with_capacity(circuit.gates().len());
    for gate in circuit.gates() {
        let out = &wires[gate.output() as usize];
        let table = match gate.inputs() {
            GateInputs::Unary(a) => GarbledTable::Unary(garble_rows::<1, 2>(
                gate.id(),
                gate.kind(),
                [&wires[a as usize]],
                out,
            )?),
            GateInputs::Binary(a, b) => GarbledTable::Binary(garble_rows::<2, 4>(
                gate.id(),
                gate.kind(),
                [&wires[a as usize], &wires[b as usize]],
                out,
            )?),
        };
        trace!(gate = gate.id(), kind = ?gate.kind(), "garbled gate");
        gates.push(GarbledGate {
            gate: gate.id(),
            table,
        });
    }

    let output_mapping = OutputMapping {
        entries: circuit
            .outputs()
            .iter()
            .map(|&wire| {
                let keys = &wires[wire as usize];
                OutputEntry {
                    wire,
                    digests: [
                        OutputMapping::output_digest(wire, keys.key(false)),
                        OutputMapping::output_digest(wire, keys.key(true)),
                    ],
                }
            })
            .collect(),
    };

    let select = |ids: &[u32]| -> Vec<(u32, WireKeys)> {
        ids.iter()
            .map(|&wire| (wire, wires[wire as usize].clone()))
            .collect()
    };
    let garbler_inputs = select(circuit.garbler_inputs());
    let evaluator_inputs = select(circuit.evaluator_inputs());

    debug!(
        circuit = circuit.name(),
        gates = gates.len(),
        wires = wires.len(),
        "garbled circuit"
    );

    Ok(Garbling {
        circuit: GarbledCircuit { gates },
        garbler_inputs,
        evaluator_inputs,
        output_mapping,
    })
}

/// Encrypts the output label of every input combination and places it at
/// the row selected by the input labels.
fn garble_rows<const ARITY: usize, const ROWS: usize>(
    gate: u32,
    kind: GateKind,
    inputs: [&WireKeys; ARITY],
    out: &WireKeys,
) -> Result<[Ciphertext; ROWS], AeadError> {
    let mut rows: [Ciphertext; ROWS] = std::array::from_fn(|_| Ciphertext::default());

    for combination in 0..ROWS {
        // First input is the most significant bit.
        let bits: [bool; ARITY] =
            std::array::from_fn(|i| (combination >> (ARITY - 1 - i)) & 1 == 1);
        let result = kind.eval(bits[0], bits.get(1).copied().unwrap_or(false));

        let index = inputs
            .iter()
            .zip(bits)
            .fold(0usize, |acc, (keys, bit)| (acc << 1) | (keys.pbit() ^ bit) as usize);
        let keys: [&Key; ARITY] = std::array::from_fn(|i| inputs[i].key(bits[i]));

        let plaintext = zeroize::Zeroizing::new(out.label(result).to_bytes());
        rows[index] = row_key(gate, index, &keys).encrypt(plaintext.as_slice())?;
    }

    Ok(rows)
}
