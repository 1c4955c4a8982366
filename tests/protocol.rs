use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::path::Path;
use tokio::io::{AsyncReadExt, DuplexStream};
use yao_sum::channel::{Channel, Hello, Message};
use yao_sum::error::{
    CircuitFormatError, CommunicationError, DecryptionFailure, Error, InputError, OtError,
};
use yao_sum::ot::SenderSession;
use yao_sum::protocol::PROTOCOL_VERSION;
use yao_sum::{
    check, garble, run_evaluator, run_garbler, Circuit, Config, GarbledCircuit, Garbling, Outcome,
    PartyInput, Phase, Role, Verdict,
};
use zeroize::Zeroizing;

type RunResult = (Result<Outcome, Error>, Result<Outcome, Error>);

/// Runs both roles against each other over an in-memory stream.
async fn run_pair(
    circuit: &Circuit,
    garbler: &PartyInput,
    evaluator: &PartyInput,
    seed: u64,
) -> RunResult {
    let config = Config::default();
    let (a, b) = tokio::io::duplex(1 << 16);
    let mut garbler_rng = ChaCha20Rng::seed_from_u64(seed);
    let mut evaluator_rng = ChaCha20Rng::seed_from_u64(seed + 1);

    tokio::join!(
        run_garbler(&config, circuit, garbler, &mut garbler_rng, a),
        run_evaluator(&config, circuit, evaluator, &mut evaluator_rng, b),
    )
}

/// Forwards messages between the parties, rewriting those sent by the
/// garbler with `tamper`. Returns every message the garbler sent.
async fn proxy(
    garbler_side: DuplexStream,
    evaluator_side: DuplexStream,
    tamper: fn(Message) -> Message,
) -> Vec<Message> {
    let config = Config::default();
    let mut garbler = Channel::new(garbler_side, &config);
    let mut evaluator = Channel::new(evaluator_side, &config);
    let mut seen = Vec::new();

    loop {
        tokio::select! {
            received = garbler.recv() => {
                let message = match received {
                    Ok(message) => message,
                    Err(CommunicationError::PeerAborted(reason)) => Message::Abort(reason),
                    Err(_) => break,
                };
                seen.push(message.clone());
                if evaluator.send(&tamper(message)).await.is_err() {
                    break;
                }
            }
            received = evaluator.recv() => {
                let message = match received {
                    Ok(message) => message,
                    Err(CommunicationError::PeerAborted(reason)) => Message::Abort(reason),
                    Err(_) => break,
                };
                if garbler.send(&message).await.is_err() {
                    break;
                }
            }
        }
    }
    seen
}

async fn run_through_proxy(
    circuit: &Circuit,
    garbler: &PartyInput,
    evaluator: &PartyInput,
    seed: u64,
    tamper: fn(Message) -> Message,
) -> (Result<Outcome, Error>, Result<Outcome, Error>, Vec<Message>) {
    let config = Config::default();
    let (garbler_stream, garbler_side) = tokio::io::duplex(1 << 16);
    let (evaluator_stream, evaluator_side) = tokio::io::duplex(1 << 16);
    let mut garbler_rng = ChaCha20Rng::seed_from_u64(seed);
    let mut evaluator_rng = ChaCha20Rng::seed_from_u64(seed + 1);

    tokio::join!(
        run_garbler(&config, circuit, garbler, &mut garbler_rng, garbler_stream),
        run_evaluator(&config, circuit, evaluator, &mut evaluator_rng, evaluator_stream),
        proxy(garbler_side, evaluator_side, tamper),
    )
}

fn garbled_tables(messages: &[Message]) -> Option<&GarbledCircuit> {
    messages.iter().find_map(|message| match message {
        Message::GarbledTables(tables) => Some(tables),
        _ => None,
    })
}

#[tokio::test]
async fn test_sum_with_fresh_randomness() {
    let circuit = Circuit::adder(8).unwrap();
    let alice = PartyInput::new(vec![1, 2, 3]);
    let bob = PartyInput::new(vec![4, 5]);

    let (g1, e1, first) = run_through_proxy(&circuit, &alice, &bob, 1, |m| m).await;
    let (g2, e2, second) = run_through_proxy(&circuit, &alice, &bob, 2, |m| m).await;

    for outcome in [g1.unwrap(), e1.unwrap(), g2.unwrap(), e2.unwrap()] {
        assert_eq!(outcome.sum, 15);
        assert_eq!(outcome.verdict, None);
        assert_eq!(outcome.phase, Phase::Done);
    }
    assert_ne!(garbled_tables(&first), garbled_tables(&second));
}

#[tokio::test]
async fn test_checker_verdicts() {
    let circuit = Circuit::adder(8).unwrap();
    let alice = PartyInput::new(vec![10]).with_peer_set(vec![20]);
    let bob = PartyInput::new(vec![20]).with_peer_set(vec![10]);

    let (garbler, evaluator) = run_pair(&circuit, &alice, &bob, 3).await;
    let garbler = garbler.unwrap();
    let evaluator = evaluator.unwrap();

    assert_eq!(garbler.role, Role::Garbler);
    assert_eq!(evaluator.role, Role::Evaluator);
    assert_eq!(garbler.sum, 30);
    assert_eq!(garbler.bits, evaluator.bits);
    assert_eq!(garbler.verdict, Some(Verdict::Match));
    assert_eq!(evaluator.verdict, Some(Verdict::Match));

    assert_eq!(check(&[10], &[20], 31), Verdict::Mismatch);
}

#[tokio::test]
async fn test_false_peer_set_is_a_mismatch() {
    let circuit = Circuit::adder(8).unwrap();
    let alice = PartyInput::new(vec![10]).with_peer_set(vec![21]);
    let bob = PartyInput::new(vec![20]);

    let (garbler, evaluator) = run_pair(&circuit, &alice, &bob, 4).await;
    assert_eq!(garbler.unwrap().verdict, Some(Verdict::Mismatch));
    assert_eq!(evaluator.unwrap().verdict, None);
}

#[tokio::test]
async fn test_corrupted_tables_abort_without_result() {
    let circuit = Circuit::adder(8).unwrap();
    let alice = PartyInput::new(vec![1, 2, 3]);
    let bob = PartyInput::new(vec![4, 5]);

    let (garbler, evaluator, seen) = run_through_proxy(&circuit, &alice, &bob, 5, |message| {
        match message {
            Message::GarbledTables(mut tables) => {
                for gate in &mut tables.gates {
                    for row in gate.table.rows_mut() {
                        if let Some(byte) = row.0.first_mut() {
                            *byte ^= 0x01;
                        }
                    }
                }
                Message::GarbledTables(tables)
            }
            other => other,
        }
    })
    .await;

    assert!(matches!(
        evaluator,
        Err(Error::Decryption(DecryptionFailure::Row { .. }))
    ));
    assert!(matches!(
        garbler,
        Err(Error::Communication(CommunicationError::PeerAborted(_)))
    ));
    assert!(seen.iter().all(|m| !matches!(m, Message::Result(_))));
}

#[tokio::test]
async fn test_undeclared_wire_fails_at_load() {
    let json = r#"{
        "name": "broken",
        "wires": 3,
        "garbler": [0],
        "evaluator": [1],
        "out": [2],
        "gates": [{ "id": 0, "type": "AND", "in": [0, 7], "out": 2 }]
    }"#;

    assert!(matches!(
        Circuit::from_json(json),
        Err(CircuitFormatError::UndeclaredWire { wire: 7, wires: 3 })
    ));
}

#[tokio::test]
async fn test_overflowing_set_sends_nothing() {
    let circuit = Circuit::adder(8).unwrap();
    let (a, mut b) = tokio::io::duplex(1 << 10);
    let mut rng = ChaCha20Rng::seed_from_u64(6);

    let result = run_garbler(
        &Config::default(),
        &circuit,
        &PartyInput::new(vec![200, 100]),
        &mut rng,
        a,
    )
    .await;
    assert!(matches!(
        result,
        Err(Error::Input(InputError::Overflow { bits: 8 }))
    ));

    let mut written = Vec::new();
    b.read_to_end(&mut written).await.unwrap();
    assert!(written.is_empty());
}

#[tokio::test]
async fn test_circuit_mismatch_fails_handshake() {
    let config = Config::default();
    let (a, b) = tokio::io::duplex(1 << 16);
    let mut rng = ChaCha20Rng::seed_from_u64(7);
    let mut peer_rng = ChaCha20Rng::seed_from_u64(8);

    let garbler_circuit = Circuit::adder(8).unwrap();
    let garbler_input = PartyInput::new(vec![1]);
    let evaluator_circuit = Circuit::adder(4).unwrap();
    let evaluator_input = PartyInput::new(vec![1]);
    let (garbler, evaluator) = tokio::join!(
        run_garbler(&config, &garbler_circuit, &garbler_input, &mut rng, a),
        run_evaluator(&config, &evaluator_circuit, &evaluator_input, &mut peer_rng, b),
    );

    assert!(matches!(
        garbler,
        Err(Error::Communication(CommunicationError::Handshake(_)))
    ));
    assert!(matches!(
        evaluator,
        Err(Error::Communication(CommunicationError::Handshake(_)))
    ));
}

#[tokio::test]
async fn test_peer_closes_before_hello() {
    let (a, b) = tokio::io::duplex(1 << 10);
    drop(a);
    let mut rng = ChaCha20Rng::seed_from_u64(9);

    let result = run_evaluator(
        &Config::default(),
        &Circuit::adder(8).unwrap(),
        &PartyInput::new(vec![4, 5]),
        &mut rng,
        b,
    )
    .await;
    assert!(matches!(
        result,
        Err(Error::Communication(CommunicationError::Closed))
    ));
}

#[tokio::test]
async fn test_unexpected_message_is_answered_with_abort() {
    let circuit = Circuit::adder(8).unwrap();
    let config = Config::default();
    let (a, b) = tokio::io::duplex(1 << 16);
    let mut rng = ChaCha20Rng::seed_from_u64(10);

    // A garbler that skips straight to the result.
    let fake_garbler = async {
        let mut channel = Channel::new(a, &config);
        channel
            .send(&Message::Hello(Hello {
                role: Role::Garbler,
                version: PROTOCOL_VERSION,
                circuit_digest: circuit.digest(),
            }))
            .await
            .unwrap();
        channel.recv().await.unwrap();
        channel.send(&Message::Result(vec![true])).await.unwrap();
        channel.recv().await
    };

    let evaluator_input = PartyInput::new(vec![4]);
    let (fake, evaluator) = tokio::join!(
        fake_garbler,
        run_evaluator(&config, &circuit, &evaluator_input, &mut rng, b),
    );

    assert!(matches!(
        evaluator,
        Err(Error::Communication(CommunicationError::Unexpected {
            expected: "GARBLED_TABLES",
            actual: "RESULT"
        }))
    ));
    assert!(matches!(fake, Err(CommunicationError::PeerAborted(_))));
}

#[tokio::test]
async fn test_configured_circuit_file() {
    let config = Config {
        circuit: Some(Path::new(env!("CARGO_MANIFEST_DIR")).join("circuits/sum.json")),
        ..Config::default()
    };
    let circuit = config.load_circuit().unwrap();
    let alice = PartyInput::new(vec![200, 55]);
    let bob = PartyInput::new(vec![255]).with_peer_set(vec![200, 55]);

    let (garbler, evaluator) = run_pair(&circuit, &alice, &bob, 11).await;
    assert_eq!(garbler.unwrap().sum, 510);
    let evaluator = evaluator.unwrap();
    assert_eq!(evaluator.sum, 510);
    assert_eq!(evaluator.verdict, Some(Verdict::Match));
}

/// Plays the garbler up to the first transfer: handshake, tables and the
/// garbler's input labels for an all-zero input.
async fn start_garbler(
    channel: &mut Channel<DuplexStream>,
    circuit: &Circuit,
    rng: &mut ChaCha20Rng,
) -> Garbling {
    channel
        .send(&Message::Hello(Hello {
            role: Role::Garbler,
            version: PROTOCOL_VERSION,
            circuit_digest: circuit.digest(),
        }))
        .await
        .unwrap();
    channel.recv().await.unwrap();

    let garbling = garble(circuit, rng).unwrap();
    let bits = vec![false; circuit.garbler_inputs().len()];
    channel
        .send(&Message::GarbledTables(garbling.circuit.clone()))
        .await
        .unwrap();
    channel
        .send(&Message::GarblerInputKeys(garbling.garbler_labels(&bits)))
        .await
        .unwrap();
    garbling
}

/// Completes one transfer of `secrets` as the sender.
async fn send_transfer(
    channel: &mut Channel<DuplexStream>,
    wire: u32,
    secrets: [Zeroizing<Vec<u8>>; 2],
    rng: &mut ChaCha20Rng,
) {
    let (session, offer) = SenderSession::new(wire, secrets, rng);
    channel.send(&Message::OtOffer(offer)).await.unwrap();
    let request = match channel.recv().await.unwrap() {
        Message::OtRequest(request) => request,
        other => panic!("unexpected {}", other.kind()),
    };
    let response = session.respond(&request).unwrap();
    channel.send(&Message::OtResponse(response)).await.unwrap();
}

#[tokio::test]
async fn test_output_map_before_transfers() {
    let circuit = Circuit::adder(4).unwrap();
    let config = Config::default();
    let (a, b) = tokio::io::duplex(1 << 16);
    let mut rng = ChaCha20Rng::seed_from_u64(12);
    let mut garbler_rng = ChaCha20Rng::seed_from_u64(13);

    let fake_garbler = async {
        let mut channel = Channel::new(a, &config);
        let garbling = start_garbler(&mut channel, &circuit, &mut garbler_rng).await;
        channel
            .send(&Message::OutputMap(garbling.output_mapping.clone()))
            .await
            .unwrap();
        channel.recv().await
    };

    let evaluator_input = PartyInput::new(vec![3]);
    let (fake, evaluator) = tokio::join!(
        fake_garbler,
        run_evaluator(&config, &circuit, &evaluator_input, &mut rng, b),
    );

    assert!(matches!(
        evaluator,
        Err(Error::Ot(OtError::CountMismatch {
            expected: 4,
            actual: 0
        }))
    ));
    assert!(matches!(fake, Err(CommunicationError::PeerAborted(_))));
}

#[tokio::test]
async fn test_extra_transfer_offer() {
    let circuit = Circuit::adder(4).unwrap();
    let config = Config::default();
    let (a, b) = tokio::io::duplex(1 << 16);
    let mut rng = ChaCha20Rng::seed_from_u64(14);
    let mut garbler_rng = ChaCha20Rng::seed_from_u64(15);

    let fake_garbler = async {
        let mut channel = Channel::new(a, &config);
        let garbling = start_garbler(&mut channel, &circuit, &mut garbler_rng).await;
        for (wire, keys) in &garbling.evaluator_inputs {
            let secrets =
                [false, true].map(|bit| Zeroizing::new(keys.label(bit).to_bytes().to_vec()));
            send_transfer(&mut channel, *wire, secrets, &mut garbler_rng).await;
        }

        let (_, offer) = SenderSession::new(
            circuit.evaluator_inputs()[0],
            [Zeroizing::new(vec![0; 17]), Zeroizing::new(vec![1; 17])],
            &mut garbler_rng,
        );
        channel.send(&Message::OtOffer(offer)).await.unwrap();
        channel.recv().await
    };

    let evaluator_input = PartyInput::new(vec![3]);
    let (fake, evaluator) = tokio::join!(
        fake_garbler,
        run_evaluator(&config, &circuit, &evaluator_input, &mut rng, b),
    );

    assert!(matches!(
        evaluator,
        Err(Error::Ot(OtError::CountMismatch {
            expected: 4,
            actual: 5
        }))
    ));
    assert!(matches!(fake, Err(CommunicationError::PeerAborted(_))));
}

#[tokio::test]
async fn test_transferred_message_that_is_not_a_label() {
    let circuit = Circuit::adder(4).unwrap();
    let config = Config::default();
    let (a, b) = tokio::io::duplex(1 << 16);
    let mut rng = ChaCha20Rng::seed_from_u64(16);
    let mut garbler_rng = ChaCha20Rng::seed_from_u64(17);
    let first_wire = circuit.evaluator_inputs()[0];

    let fake_garbler = async {
        let mut channel = Channel::new(a, &config);
        let _garbling = start_garbler(&mut channel, &circuit, &mut garbler_rng).await;
        // A bare key without its label byte.
        let secrets = [Zeroizing::new(vec![0; 16]), Zeroizing::new(vec![1; 16])];
        send_transfer(&mut channel, first_wire, secrets, &mut garbler_rng).await;
        channel.recv().await
    };

    let evaluator_input = PartyInput::new(vec![3]);
    let (fake, evaluator) = tokio::join!(
        fake_garbler,
        run_evaluator(&config, &circuit, &evaluator_input, &mut rng, b),
    );

    assert!(matches!(
        evaluator,
        Err(Error::Ot(OtError::InvalidMessage(wire))) if wire == first_wire
    ));
    assert!(matches!(fake, Err(CommunicationError::PeerAborted(_))));
}

#[tokio::test]
async fn test_garbler_printing_tables() {
    let circuit = Circuit::adder(4).unwrap();
    let config = Config {
        print_tables: true,
        ..Config::default()
    };
    let (a, b) = tokio::io::duplex(1 << 16);
    let mut garbler_rng = ChaCha20Rng::seed_from_u64(18);
    let mut evaluator_rng = ChaCha20Rng::seed_from_u64(19);

    let garbler_input = PartyInput::new(vec![7]);
    let evaluator_config = Config::default();
    let evaluator_input = PartyInput::new(vec![9]);
    let (garbler, evaluator) = tokio::join!(
        run_garbler(&config, &circuit, &garbler_input, &mut garbler_rng, a),
        run_evaluator(
            &evaluator_config,
            &circuit,
            &evaluator_input,
            &mut evaluator_rng,
            b
        ),
    );
    assert_eq!(garbler.unwrap().sum, 16);
    assert_eq!(evaluator.unwrap().sum, 16);
}
