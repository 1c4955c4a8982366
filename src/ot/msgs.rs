//! Messages exchanged in one oblivious transfer session.

use serde::{Deserialize, Serialize};

use crate::key::Ciphertext;

/// Sender's ephemeral public key `A = a·G`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtOffer {
    pub wire: u32,
    pub public_key: [u8; 32],
}

/// Receiver's blinded choice `B = b·G` or `B = A + b·G`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtRequest {
    pub wire: u32,
    pub blinded_choice: [u8; 32],
}

/// Both messages, each encrypted under the pad for its index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtResponse {
    pub wire: u32,
    pub ciphertexts: [Ciphertext; 2],
}
