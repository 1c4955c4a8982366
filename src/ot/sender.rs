use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_TABLE, ristretto::RistrettoPoint, scalar::Scalar,
};
use rand::{CryptoRng, RngCore};
use tracing::trace;
use zeroize::Zeroizing;

use crate::error::OtError;
use crate::ot::msgs::{OtOffer, OtRequest, OtResponse};
use crate::ot::{decompress, shared_pad};

/// The sender's side of a single transfer.
pub struct SenderSession {
    wire: u32,
    secrets: [Zeroizing<Vec<u8>>; 2],
    /// `a`, fresh for this session.
    private_key: Zeroizing<Scalar>,
    /// `A = a·G`
    public_key: RistrettoPoint,
}

opaque_debug::implement!(SenderSession);

impl SenderSession {
    /// Draws an ephemeral key pair and returns the offer for the receiver.
    pub fn new<R: RngCore + CryptoRng>(
        wire: u32,
        secrets: [Zeroizing<Vec<u8>>; 2],
        rng: &mut R,
    ) -> (Self, OtOffer) {
        let private_key = Zeroizing::new(Scalar::random(rng));
        let public_key = &*private_key * RISTRETTO_BASEPOINT_TABLE;

        let offer = OtOffer {
            wire,
            public_key: public_key.compress().to_bytes(),
        };
        (
            SenderSession {
                wire,
                secrets,
                private_key,
                public_key,
            },
            offer,
        )
    }

    /// Encrypts both messages. Consumes the session, erasing its key.
    pub fn respond(self, request: &OtRequest) -> Result<OtResponse, OtError> {
        if request.wire != self.wire {
            return Err(OtError::WireMismatch {
                expected: self.wire,
                actual: request.wire,
            });
        }
        let blinded = decompress(&request.blinded_choice)?;

        let a = &*self.private_key;
        // B^a, and (B/A)^a
        let pads = [
            shared_pad(self.wire, &self.public_key, a, &blinded),
            shared_pad(self.wire, &self.public_key, a, &(blinded - self.public_key)),
        ];

        let ciphertexts = [
            pads[0].encrypt(&self.secrets[0])?,
            pads[1].encrypt(&self.secrets[1])?,
        ];
        trace!(wire = self.wire, "sent transfer response");

        Ok(OtResponse {
            wire: self.wire,
            ciphertexts,
        })
    }
}
