use tracing::{debug, trace};

use crate::circuit::{Circuit, GateInputs};
use crate::error::DecryptionFailure;
use crate::garble::{row_key, GarbledCircuit, OutputMapping, WireLabel};
use crate::key::Key;

/// Walks the garbled circuit in topological order.
///
/// `held` contains one label per input wire: the garbler's labels received
/// directly and the evaluator's labels obtained by oblivious transfer.
/// Returns the labels of the output wires in declared order.
pub fn evaluate_labels(
    circuit: &Circuit,
    garbled: &GarbledCircuit,
    held: Vec<(u32, WireLabel)>,
) -> Result<Vec<(u32, WireLabel)>, DecryptionFailure> {
    let mut values: Vec<Option<WireLabel>> = vec![None; circuit.wire_count() as usize];
    for (wire, label) in held {
        let is_input = circuit.garbler_inputs().contains(&wire)
            || circuit.evaluator_inputs().contains(&wire);
        if !is_input {
            return Err(DecryptionFailure::UnexpectedInput { wire });
        }
        values[wire as usize] = Some(label);
    }

    let mut tables = garbled.gates.iter();
    for gate in circuit.gates() {
        let table = match tables.next() {
            Some(garbled) if garbled.gate == gate.id() => &garbled.table,
            _ => return Err(DecryptionFailure::MissingTable { gate: gate.id() }),
        };

        let held_label = |wire: u32| {
            values[wire as usize]
                .as_ref()
                .ok_or(DecryptionFailure::MissingWire { wire })
        };
        let inputs: Vec<&WireLabel> = match gate.inputs() {
            GateInputs::Unary(a) => vec![held_label(a)?],
            GateInputs::Binary(a, b) => vec![held_label(a)?, held_label(b)?],
        };

        let index = inputs
            .iter()
            .fold(0usize, |acc, input| (acc << 1) | input.label as usize);
        let keys: Vec<&Key> = inputs.iter().map(|input| &input.key).collect();

        let row = table
            .row(index)
            .ok_or(DecryptionFailure::Row { gate: gate.id() })?;
        let plaintext = zeroize::Zeroizing::new(
            row_key(gate.id(), index, &keys)
                .decrypt(row)
                .map_err(|_| DecryptionFailure::Row { gate: gate.id() })?,
        );
        let output = WireLabel::from_bytes(&plaintext)
            .ok_or(DecryptionFailure::MalformedRow { gate: gate.id() })?;

        trace!(gate = gate.id(), row = index, "evaluated gate");
        values[gate.output() as usize] = Some(output);
    }

    if let Some(extra) = tables.next() {
        return Err(DecryptionFailure::ExtraTable { gate: extra.gate });
    }

    circuit
        .outputs()
        .iter()
        .map(|&wire| {
            values[wire as usize]
                .clone()
                .map(|label| (wire, label))
                .ok_or(DecryptionFailure::MissingWire { wire })
        })
        .collect()
}

/// Decodes output labels against the published mapping.
pub fn decode_outputs(
    mapping: &OutputMapping,
    outputs: &[(u32, WireLabel)],
) -> Result<Vec<bool>, DecryptionFailure> {
    if mapping.entries.len() != outputs.len() {
        let wire = outputs
            .get(mapping.entries.len())
            .map(|(wire, _)| *wire)
            .or_else(|| mapping.entries.get(outputs.len()).map(|e| e.wire))
            .unwrap_or_default();
        return Err(DecryptionFailure::MissingWire { wire });
    }

    mapping
        .entries
        .iter()
        .zip(outputs)
        .map(|(entry, (wire, label))| {
            if entry.wire != *wire {
                return Err(DecryptionFailure::OutputMismatch {
                    expected: *wire,
                    actual: entry.wire,
                });
            }
            OutputMapping::decode_wire(entry, label)
                .ok_or(DecryptionFailure::UnknownOutputKey { wire: *wire })
        })
        .collect()
}

/// Evaluates the garbled circuit and decodes its output bits.
pub fn evaluate(
    circuit: &Circuit,
    garbled: &GarbledCircuit,
    held: Vec<(u32, WireLabel)>,
    mapping: &OutputMapping,
) -> Result<Vec<bool>, DecryptionFailure> {
    let outputs = evaluate_labels(circuit, garbled, held)?;
    let bits = decode_outputs(mapping, &outputs)?;
    debug!(outputs = bits.len(), "evaluated garbled circuit");
    Ok(bits)
}
