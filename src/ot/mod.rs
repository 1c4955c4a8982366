//! 1-out-of-2 oblivious transfer after Chou and Orlandi,
//! ["The Simplest Protocol for Oblivious Transfer"](https://eprint.iacr.org/2015/267.pdf).
//!
//! One session moves one message pair. The sender draws a fresh key pair for
//! every session and both sides erase their scalars when the session object
//! is consumed or dropped.
//!
//! ```text
//! sender                      receiver
//!   ── OtOffer   { A } ──────────▶
//!   ◀─────────── OtRequest { B } ──
//!   ── OtResponse { e0, e1 } ─────▶
//! ```

pub mod msgs;
mod receiver;
mod sender;

pub use receiver::ReceiverSession;
pub use sender::SenderSession;

use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::error::OtError;
use crate::key::{Key, KEY_SIZE};

/// Hashes a shared point to a symmetric pad, bound to the session's wire and
/// the sender's public key.
pub(crate) fn hash_point(wire: u32, public_key: &RistrettoPoint, point: &RistrettoPoint) -> Key {
    let mut h = blake3::Hasher::new();
    h.update(b"yao-sum/ot");
    h.update(&wire.to_be_bytes());
    h.update(public_key.compress().as_bytes());
    h.update(point.compress().as_bytes());
    let digest = h.finalize();

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&digest.as_bytes()[..KEY_SIZE]);
    Key(key)
}

/// Pad for the Diffie-Hellman point `private_key·point`. The point is
/// erased once hashed.
pub(crate) fn shared_pad(
    wire: u32,
    public_key: &RistrettoPoint,
    private_key: &Scalar,
    point: &RistrettoPoint,
) -> Key {
    let shared = Zeroizing::new(private_key * point);
    hash_point(wire, public_key, &shared)
}

pub(crate) fn decompress(bytes: &[u8; 32]) -> Result<RistrettoPoint, OtError> {
    CompressedRistretto(*bytes)
        .decompress()
        .ok_or(OtError::InvalidPoint)
}

/// Runs one complete session in process: the receiver learns `secrets[choice]`.
pub fn transfer<R: RngCore + CryptoRng>(
    secrets: [Zeroizing<Vec<u8>>; 2],
    choice: bool,
    rng: &mut R,
) -> Result<Zeroizing<Vec<u8>>, OtError> {
    let (sender, offer) = SenderSession::new(0, secrets, rng);
    let (receiver, request) = ReceiverSession::new(choice, &offer, rng)?;
    let response = sender.respond(&request)?;
    receiver.finish(&response)
}
