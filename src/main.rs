use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use yao_sum::{
    check, input, run_evaluator, run_garbler, Circuit, CircuitSelector, Config, Outcome,
    PartyInput, Verdict,
};

/// Secure two-party sum over Yao garbled circuits
#[derive(Parser, Debug)]
#[command(name = "yao-sum")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Garble the circuit and serve one evaluator
    Garbler(GarblerCommand),
    /// Connect to a garbler and evaluate the circuit
    Evaluator(EvaluatorCommand),
    /// Recompute the plaintext sum and compare it with a revealed output
    Check(CheckCommand),
}

#[derive(Args, Debug)]
struct GarblerCommand {
    /// Address to listen on
    #[arg(long, value_name = "ADDR")]
    listen: String,

    /// Log the garbled tables before sending them
    #[arg(long = "print-tables")]
    print_tables: bool,

    #[command(flatten)]
    party: PartyArgs,
}

#[derive(Args, Debug)]
struct EvaluatorCommand {
    /// Address of the garbler
    #[arg(long, value_name = "ADDR")]
    connect: String,

    #[command(flatten)]
    party: PartyArgs,
}

#[derive(Args, Debug)]
struct PartyArgs {
    /// This party's private set, comma separated
    #[arg(long, value_delimiter = ',', value_name = "VALUES")]
    set: Vec<u64>,

    /// The peer's declared set; enables checking the revealed sum
    #[arg(long = "peer-set", value_delimiter = ',', value_name = "VALUES")]
    peer_set: Option<Vec<u64>>,

    /// JSON config file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Circuit description to use instead of the built-in adder
    #[arg(long, value_name = "FILE")]
    circuit: Option<PathBuf>,

    /// Circuit to use from a collection file, by index or name
    #[arg(long, value_name = "INDEX|NAME")]
    select: Option<CircuitSelector>,

    /// Bit width of the built-in adder
    #[arg(long, value_name = "BITS")]
    width: Option<usize>,

    /// Seconds to wait for each message from the peer
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,
}

#[derive(Args, Debug)]
struct CheckCommand {
    #[arg(long = "garbler-set", value_delimiter = ',', value_name = "VALUES")]
    garbler_set: Vec<u64>,

    #[arg(long = "evaluator-set", value_delimiter = ',', value_name = "VALUES")]
    evaluator_set: Vec<u64>,

    /// The revealed sum
    #[arg(long, value_name = "N")]
    output: u64,
}

impl PartyArgs {
    fn config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_json_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => Config::default(),
        };
        if let Some(circuit) = &self.circuit {
            config.circuit = Some(circuit.clone());
        }
        if let Some(select) = &self.select {
            config.select = Some(select.clone());
        }
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(timeout) = self.timeout {
            config.io_timeout_secs = timeout;
        }
        Ok(config)
    }

    fn input(&self) -> PartyInput {
        PartyInput {
            set: self.set.clone(),
            peer_set: self.peer_set.clone(),
        }
    }
}

/// Loads everything a party needs before touching the network.
fn prepare(party: &PartyArgs, input_wires: fn(&Circuit) -> &[u32]) -> Result<(Config, Circuit)> {
    let config = party.config()?;
    let circuit = config.load_circuit().context("failed to load circuit")?;
    input::set_sum(&party.set, input_wires(&circuit).len()).context("invalid input set")?;
    info!(
        circuit = circuit.name(),
        gates = circuit.gates().len(),
        "loaded circuit"
    );
    Ok((config, circuit))
}

fn report(outcome: &Outcome) -> ExitCode {
    println!("sum = {}", outcome.sum);
    match outcome.verdict {
        Some(verdict) => {
            println!("verdict = {:?}", verdict);
            exit_code(verdict)
        }
        None => ExitCode::SUCCESS,
    }
}

fn exit_code(verdict: Verdict) -> ExitCode {
    match verdict {
        Verdict::Match => ExitCode::SUCCESS,
        Verdict::Mismatch => ExitCode::from(1),
    }
}

async fn run(command: Command) -> Result<ExitCode> {
    match command {
        Command::Garbler(cmd) => {
            let (mut config, circuit) = prepare(&cmd.party, Circuit::garbler_inputs)?;
            config.print_tables |= cmd.print_tables;

            let listener = TcpListener::bind(&cmd.listen)
                .await
                .with_context(|| format!("failed to listen on {}", cmd.listen))?;
            info!(addr = %listener.local_addr()?, "waiting for evaluator");
            let (stream, peer) = listener
                .accept()
                .await
                .context("failed to accept evaluator")?;
            stream.set_nodelay(true)?;
            info!(%peer, "evaluator connected");

            let mut rng = ChaCha20Rng::from_entropy();
            let outcome = run_garbler(&config, &circuit, &cmd.party.input(), &mut rng, stream)
                .await
                .context("garbler aborted")?;
            Ok(report(&outcome))
        }
        Command::Evaluator(cmd) => {
            let (config, circuit) = prepare(&cmd.party, Circuit::evaluator_inputs)?;

            let stream = TcpStream::connect(&cmd.connect)
                .await
                .with_context(|| format!("failed to connect to {}", cmd.connect))?;
            stream.set_nodelay(true)?;
            info!(peer = %cmd.connect, "connected to garbler");

            let mut rng = ChaCha20Rng::from_entropy();
            let outcome = run_evaluator(&config, &circuit, &cmd.party.input(), &mut rng, stream)
                .await
                .context("evaluator aborted")?;
            Ok(report(&outcome))
        }
        Command::Check(cmd) => {
            let verdict = check(&cmd.garbler_set, &cmd.evaluator_set, cmd.output);
            println!("verdict = {:?}", verdict);
            Ok(exit_code(verdict))
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::from(2)
        }
    }
}
