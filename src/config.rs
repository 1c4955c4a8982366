use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::circuit::{Circuit, CircuitCollection, CircuitSelector};
use crate::error::{CircuitFormatError, ConfigError};

/// Settings shared by both roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bit width of the built-in adder.
    pub width: usize,
    /// Upper bound on every wait for the peer.
    pub io_timeout_secs: u64,
    /// Largest accepted frame in bytes.
    pub max_frame_len: usize,
    /// Circuit description to use instead of the built-in adder.
    pub circuit: Option<PathBuf>,
    /// Circuit to pick when the file holds a collection.
    pub select: Option<CircuitSelector>,
    /// Log every garbled row before sending the tables.
    pub print_tables: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            width: 8,
            io_timeout_secs: 30,
            max_frame_len: 16 * 1024 * 1024,
            circuit: None,
            select: None,
            print_tables: false,
        }
    }
}

impl Config {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    /// Loads the configured circuit, or builds the adder.
    pub fn load_circuit(&self) -> Result<Circuit, CircuitFormatError> {
        match &self.circuit {
            Some(path) => CircuitCollection::from_json_file(path)?.select(self.select.as_ref()),
            None => Circuit::adder(self.width),
        }
    }
}
