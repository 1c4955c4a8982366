use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_TABLE,
    ristretto::RistrettoPoint,
    scalar::Scalar,
    traits::Identity,
};
use rand::{CryptoRng, RngCore};
use tracing::trace;
use zeroize::Zeroizing;

use crate::error::OtError;
use crate::key::Key;
use crate::ot::msgs::{OtOffer, OtRequest, OtResponse};
use crate::ot::{decompress, shared_pad};

/// The receiver's side of a single transfer.
pub struct ReceiverSession {
    wire: u32,
    choice: bool,
    /// Pad for the chosen message, `H(A^b)`.
    pad: Key,
}

opaque_debug::implement!(ReceiverSession);

impl ReceiverSession {
    /// Blinds `choice` against the sender's offer.
    pub fn new<R: RngCore + CryptoRng>(
        choice: bool,
        offer: &OtOffer,
        rng: &mut R,
    ) -> Result<(Self, OtRequest), OtError> {
        let public_key = decompress(&offer.public_key)?;
        let private_key = Zeroizing::new(Scalar::random(rng));

        // if choice = 0: B = b·G
        // if choice = 1: B = A + b·G
        // The identity is added for choice 0 so both branches do the same work.
        let base = if choice {
            public_key
        } else {
            RistrettoPoint::identity()
        };
        let blinded = base + &*private_key * RISTRETTO_BASEPOINT_TABLE;
        let pad = shared_pad(offer.wire, &public_key, &private_key, &public_key);

        Ok((
            ReceiverSession {
                wire: offer.wire,
                choice,
                pad,
            },
            OtRequest {
                wire: offer.wire,
                blinded_choice: blinded.compress().to_bytes(),
            },
        ))
    }

    /// Opens the chosen message. The AEAD tag is the consistency check: a
    /// response that does not match the committed choice fails to decrypt.
    pub fn finish(self, response: &OtResponse) -> Result<Zeroizing<Vec<u8>>, OtError> {
        if response.wire != self.wire {
            return Err(OtError::WireMismatch {
                expected: self.wire,
                actual: response.wire,
            });
        }

        let ciphertext = &response.ciphertexts[self.choice as usize];
        let message = self
            .pad
            .decrypt(ciphertext)
            .map_err(|_| OtError::ConsistencyCheck(self.wire))?;
        trace!(wire = self.wire, "received transfer");

        Ok(Zeroizing::new(message))
    }
}
