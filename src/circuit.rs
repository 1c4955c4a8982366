use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::{CircuitFormatError, InputError};

/// Boolean gate types.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum GateKind {
    And,
    Or,
    Xor,
    Not,
}

impl GateKind {
    /// Number of input wires.
    pub fn arity(self) -> usize {
        match self {
            GateKind::Not => 1,
            GateKind::And | GateKind::Or | GateKind::Xor => 2,
        }
    }

    /// Truth table. `b` is ignored for NOT.
    pub fn eval(self, a: bool, b: bool) -> bool {
        match self {
            GateKind::And => a & b,
            GateKind::Or => a | b,
            GateKind::Xor => a ^ b,
            GateKind::Not => !a,
        }
    }

    fn tag(self) -> u8 {
        match self {
            GateKind::And => 0,
            GateKind::Or => 1,
            GateKind::Xor => 2,
            GateKind::Not => 3,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct GateDescription {
    pub id: u32,
    #[serde(rename = "type")]
    pub kind: GateKind,
    #[serde(rename = "in")]
    pub inputs: Vec<u32>,
    pub out: u32,
}

/// A circuit as written in a JSON description file.
///
/// `id`, `alice` and `bob` are accepted for `name`, `garbler` and
/// `evaluator`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CircuitDescription {
    #[serde(alias = "id")]
    pub name: String,
    pub wires: u32,
    #[serde(default, alias = "alice")]
    pub garbler: Vec<u32>,
    #[serde(default, alias = "bob")]
    pub evaluator: Vec<u32>,
    pub out: Vec<u32>,
    pub gates: Vec<GateDescription>,
}

/// Several circuits sharing one file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CircuitCollection {
    pub name: String,
    pub circuits: Vec<CircuitDescription>,
}

impl CircuitCollection {
    /// Parses a collection. A single circuit document is read as a
    /// collection of one.
    pub fn from_json(json: &str) -> Result<Self, CircuitFormatError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if value.get("circuits").is_some() {
            return Ok(serde_json::from_value(value)?);
        }

        let description: CircuitDescription = serde_json::from_value(value)?;
        Ok(CircuitCollection {
            name: description.name.clone(),
            circuits: vec![description],
        })
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, CircuitFormatError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Loads the selected circuit, or the first one if `selector` is `None`.
    pub fn select(self, selector: Option<&CircuitSelector>) -> Result<Circuit, CircuitFormatError> {
        let CircuitCollection { name, circuits } = self;
        let found = match selector {
            None => circuits.into_iter().next(),
            Some(CircuitSelector::Index(index)) => circuits.into_iter().nth(*index),
            Some(CircuitSelector::Name(wanted)) => {
                circuits.into_iter().find(|circuit| &circuit.name == wanted)
            }
        };

        match found {
            Some(description) => Circuit::load(description),
            None => Err(CircuitFormatError::UnknownCircuit {
                selector: selector.map(ToString::to_string).unwrap_or_else(|| "0".to_string()),
                collection: name,
            }),
        }
    }

    /// Loads every circuit of the collection.
    pub fn load_all(self) -> Result<Vec<Circuit>, CircuitFormatError> {
        self.circuits.into_iter().map(Circuit::load).collect()
    }
}

/// Picks a circuit out of a collection by position or by name.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum CircuitSelector {
    Index(usize),
    Name(String),
}

impl FromStr for CircuitSelector {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse() {
            Ok(index) => CircuitSelector::Index(index),
            Err(_) => CircuitSelector::Name(s.to_string()),
        })
    }
}

impl fmt::Display for CircuitSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitSelector::Index(index) => write!(f, "{index}"),
            CircuitSelector::Name(name) => write!(f, "{name:?}"),
        }
    }
}

/// Input wires of a validated gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateInputs {
    Unary(u32),
    Binary(u32, u32),
}

impl GateInputs {
    pub fn wires(&self) -> Vec<u32> {
        match *self {
            GateInputs::Unary(a) => vec![a],
            GateInputs::Binary(a, b) => vec![a, b],
        }
    }
}

/// A gate whose arity and wire references have been checked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Gate {
    id: u32,
    kind: GateKind,
    inputs: GateInputs,
    output: u32,
}

impl Gate {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> GateKind {
        self.kind
    }

    pub fn inputs(&self) -> GateInputs {
        self.inputs
    }

    pub fn output(&self) -> u32 {
        self.output
    }
}

/// A validated, acyclic boolean circuit.
///
/// Gates are stored in topological order. Read-only after load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Circuit {
    name: String,
    wire_count: u32,
    gates: Vec<Gate>,
    garbler_inputs: Vec<u32>,
    evaluator_inputs: Vec<u32>,
    outputs: Vec<u32>,
}

impl Circuit {
    /// Validates a description and orders its gates topologically.
    pub fn load(description: CircuitDescription) -> Result<Self, CircuitFormatError> {
        let CircuitDescription {
            name,
            wires,
            garbler,
            evaluator,
            out,
            gates,
        } = description;

        let declared = |wire: u32| {
            if wire < wires {
                Ok(wire)
            } else {
                Err(CircuitFormatError::UndeclaredWire { wire, wires })
            }
        };

        // Party inputs are driven from outside the circuit.
        let mut driven: HashSet<u32> = HashSet::new();
        for &wire in garbler.iter().chain(evaluator.iter()) {
            declared(wire)?;
            if !driven.insert(wire) {
                return Err(CircuitFormatError::OverlappingInputs(wire));
            }
        }
        for &wire in &out {
            declared(wire)?;
        }

        let mut ids = HashSet::new();
        let mut checked = Vec::with_capacity(gates.len());
        let mut driver: HashMap<u32, usize> = HashMap::new();
        for (index, gate) in gates.into_iter().enumerate() {
            if !ids.insert(gate.id) {
                return Err(CircuitFormatError::DuplicateGate(gate.id));
            }

            let inputs = match (gate.kind.arity(), gate.inputs.as_slice()) {
                (1, &[a]) => GateInputs::Unary(declared(a)?),
                (2, &[a, b]) => GateInputs::Binary(declared(a)?, declared(b)?),
                (expected, actual) => {
                    return Err(CircuitFormatError::ArityMismatch {
                        gate: gate.id,
                        kind: gate.kind,
                        expected,
                        actual: actual.len(),
                    })
                }
            };

            let output = declared(gate.out)?;
            if !driven.insert(output) {
                return Err(CircuitFormatError::MultipleDrivers(output));
            }
            driver.insert(output, index);

            checked.push(Gate {
                id: gate.id,
                kind: gate.kind,
                inputs,
                output,
            });
        }

        for gate in &checked {
            for wire in gate.inputs.wires() {
                if !driven.contains(&wire) {
                    return Err(CircuitFormatError::UndrivenWire(wire));
                }
            }
        }
        for &wire in &out {
            if !driven.contains(&wire) {
                return Err(CircuitFormatError::UndrivenWire(wire));
            }
        }

        let gates = topological_order(checked, &driver)?;

        // Every usable wire is an input or a gate output.
        let used = garbler.len() + evaluator.len() + gates.len();
        if wires as usize > used {
            return Err(CircuitFormatError::TooManyWires { wires, used });
        }

        Ok(Circuit {
            name,
            wire_count: wires,
            gates,
            garbler_inputs: garbler,
            evaluator_inputs: evaluator,
            outputs: out,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, CircuitFormatError> {
        let description: CircuitDescription = serde_json::from_str(json)?;
        Self::load(description)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, CircuitFormatError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Builds a `width`-bit ripple-carry adder.
    ///
    /// Garbler bits are wires `0..width`, evaluator bits `width..2*width`, both
    /// little-endian. Outputs are the `width` sum bits followed by the carry.
    pub fn adder(width: usize) -> Result<Self, CircuitFormatError> {
        if !(1..=63).contains(&width) {
            return Err(CircuitFormatError::InvalidWidth(width));
        }
        let w = width as u32;

        let mut next_wire = 2 * w;
        let mut gates = Vec::new();
        let mut gate = |kind: GateKind, inputs: Vec<u32>| {
            let id = gates.len() as u32;
            let out = next_wire;
            next_wire += 1;
            gates.push(GateDescription {
                id,
                kind,
                inputs,
                out,
            });
            out
        };

        let mut sums = Vec::with_capacity(width + 1);
        sums.push(gate(GateKind::Xor, vec![0, w]));
        let mut carry = gate(GateKind::And, vec![0, w]);
        for i in 1..w {
            let (a, b) = (i, w + i);
            let half = gate(GateKind::Xor, vec![a, b]);
            sums.push(gate(GateKind::Xor, vec![half, carry]));
            let generate = gate(GateKind::And, vec![a, b]);
            let propagate = gate(GateKind::And, vec![half, carry]);
            carry = gate(GateKind::Or, vec![generate, propagate]);
        }
        sums.push(carry);

        Self::load(CircuitDescription {
            name: format!("adder{width}"),
            wires: next_wire,
            garbler: (0..w).collect(),
            evaluator: (w..2 * w).collect(),
            out: sums,
            gates,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wire_count(&self) -> u32 {
        self.wire_count
    }

    pub fn gates(&self) -> &[Gate] {
        &self.gates
    }

    pub fn garbler_inputs(&self) -> &[u32] {
        &self.garbler_inputs
    }

    pub fn evaluator_inputs(&self) -> &[u32] {
        &self.evaluator_inputs
    }

    pub fn outputs(&self) -> &[u32] {
        &self.outputs
    }

    /// Converts back to the document form, gates in topological order.
    pub fn description(&self) -> CircuitDescription {
        CircuitDescription {
            name: self.name.clone(),
            wires: self.wire_count,
            garbler: self.garbler_inputs.clone(),
            evaluator: self.evaluator_inputs.clone(),
            out: self.outputs.clone(),
            gates: self
                .gates
                .iter()
                .map(|gate| GateDescription {
                    id: gate.id,
                    kind: gate.kind,
                    inputs: gate.inputs.wires(),
                    out: gate.output,
                })
                .collect(),
        }
    }

    /// SHA-256 over the circuit's structure. Both parties compare digests
    /// before any key material is exchanged.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.wire_count.to_be_bytes());
        for group in [&self.garbler_inputs, &self.evaluator_inputs, &self.outputs] {
            hasher.update((group.len() as u64).to_be_bytes());
            for wire in group {
                hasher.update(wire.to_be_bytes());
            }
        }
        hasher.update((self.gates.len() as u64).to_be_bytes());
        for gate in &self.gates {
            hasher.update(gate.id.to_be_bytes());
            hasher.update([gate.kind.tag()]);
            for wire in gate.inputs.wires() {
                hasher.update(wire.to_be_bytes());
            }
            hasher.update(gate.output.to_be_bytes());
        }
        hasher.finalize().into()
    }

    /// Evaluates the circuit in the clear.
    pub fn evaluate_plain(
        &self,
        garbler_bits: &[bool],
        evaluator_bits: &[bool],
    ) -> Result<Vec<bool>, InputError> {
        for (wires, bits) in [
            (&self.garbler_inputs, garbler_bits),
            (&self.evaluator_inputs, evaluator_bits),
        ] {
            if wires.len() != bits.len() {
                return Err(InputError::BitCount {
                    expected: wires.len(),
                    actual: bits.len(),
                });
            }
        }

        let mut values = vec![false; self.wire_count as usize];
        for (&wire, &bit) in self
            .garbler_inputs
            .iter()
            .zip(garbler_bits)
            .chain(self.evaluator_inputs.iter().zip(evaluator_bits))
        {
            values[wire as usize] = bit;
        }

        for gate in &self.gates {
            let result = match gate.inputs {
                GateInputs::Unary(a) => gate.kind.eval(values[a as usize], false),
                GateInputs::Binary(a, b) => gate.kind.eval(values[a as usize], values[b as usize]),
            };
            values[gate.output as usize] = result;
        }

        Ok(self.outputs.iter().map(|&w| values[w as usize]).collect())
    }
}

/// Kahn's algorithm over gate dependencies, stable with respect to the
/// declared order.
fn topological_order(
    gates: Vec<Gate>,
    driver: &HashMap<u32, usize>,
) -> Result<Vec<Gate>, CircuitFormatError> {
    let mut pending = vec![0usize; gates.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); gates.len()];
    for (index, gate) in gates.iter().enumerate() {
        for wire in gate.inputs.wires() {
            if let Some(&source) = driver.get(&wire) {
                pending[index] += 1;
                dependents[source].push(index);
            }
        }
    }

    let mut ready: VecDeque<usize> = (0..gates.len()).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(gates.len());
    while let Some(index) = ready.pop_front() {
        order.push(index);
        for &next in &dependents[index] {
            pending[next] -= 1;
            if pending[next] == 0 {
                ready.push_back(next);
            }
        }
    }

    if order.len() != gates.len() {
        let stuck = (0..gates.len())
            .find(|&i| pending[i] > 0)
            .map(|i| gates[i].id)
            .unwrap_or_default();
        return Err(CircuitFormatError::Cycle(stuck));
    }

    let mut slots: Vec<Option<Gate>> = gates.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|index| slots[index].take())
        .collect())
}
