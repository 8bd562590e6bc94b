// Copyright 2024 - See NOTICE file for copyright holders.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//	http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Ethereum-style voucher hashing and signer recovery.
//!
//! A voucher binds an amount to one channel instance:
//!
//! ```text
//! channel_digest = keccak256(channel_identity[20] || be32(amount))
//! signing_digest = keccak256("\x19Ethereum Signed Message:\n32" || channel_digest)
//! ```
//!
//! The signing digest is what parties sign with their secp256k1 keys. Off-chain
//! tooling that implements `personal_sign` produces compatible signatures.

use crate::sol::encode_voucher;
use crate::Error;
use alloy_primitives::keccak256;
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

pub const SIGNED_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

/// Offset added to the recovery parity to form `v`.
pub const RECOVERY_ID_OFFSET: u8 = 27;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EthHash(pub [u8; 32]);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct EthAddress(pub [u8; 20]);

impl From<&VerifyingKey> for EthAddress {
    fn from(key: &VerifyingKey) -> Self {
        // The uncompressed SEC1 encoding is 0x04 || x || y. Only x || y is
        // hashed for the address.
        let point = key.to_encoded_point(false);
        let hash = keccak256(&point.as_bytes()[1..]);

        let mut addr = EthAddress([0; 20]);
        addr.0.copy_from_slice(&hash.0[32 - 20..]);
        addr
    }
}

/// Computes the raw voucher digest for `amount` on the channel identified by `channel`.
pub fn channel_digest(channel: &EthAddress, amount: u128) -> EthHash {
    EthHash(keccak256(encode_voucher(channel, amount)).0)
}

/// Wraps a digest in the Ethereum signed-message envelope.
pub fn signing_digest(digest: &EthHash) -> EthHash {
    // Packed encoding => We can't use the serializer
    let mut msg = [0u8; SIGNED_MESSAGE_PREFIX.len() + 32];
    msg[..SIGNED_MESSAGE_PREFIX.len()].copy_from_slice(SIGNED_MESSAGE_PREFIX);
    msg[SIGNED_MESSAGE_PREFIX.len()..].copy_from_slice(&digest.0);
    EthHash(keccak256(msg).0)
}

/// The digest a party signs to authorize `amount` as the final balance.
pub fn voucher_signing_digest(channel: &EthAddress, amount: u128) -> EthHash {
    signing_digest(&channel_digest(channel, amount))
}

/// Recovers the address that produced the signature `(v, r, s)` over `digest`.
///
/// `v` must be 27 or 28. Like `ecrecover`, signatures with a high `s` value
/// are accepted; they are folded onto their low-s twin, which recovers the
/// same key. Any malformed component or failed recovery yields
/// [`Error::InvalidSignature`].
pub fn recover_signer(
    digest: &EthHash,
    v: u8,
    r: &[u8; 32],
    s: &[u8; 32],
) -> Result<EthAddress, Error> {
    let y_odd = match v.checked_sub(RECOVERY_ID_OFFSET) {
        Some(0) => false,
        Some(1) => true,
        _ => return Err(Error::InvalidSignature),
    };

    let mut sig_bytes = [0u8; 64];
    sig_bytes[..32].copy_from_slice(r);
    sig_bytes[32..].copy_from_slice(s);
    // Rejects r or s that are zero or not below the curve order.
    let signature = Signature::from_slice(&sig_bytes).map_err(|_| Error::InvalidSignature)?;

    let (signature, y_odd) = match signature.normalize_s() {
        Some(low_s) => (low_s, !y_odd),
        None => (signature, y_odd),
    };

    let key = VerifyingKey::recover_from_prehash(
        &digest.0,
        &signature,
        RecoveryId::new(y_odd, false),
    )
    .map_err(|_| Error::InvalidSignature)?;

    Ok(EthAddress::from(&key))
}

#[cfg(any(test, feature = "testutils"))]
pub mod testutils {
    use super::*;
    use k256::ecdsa::SigningKey;
    use rand::thread_rng;

    /// A voucher signature split into the components `close_channel` takes.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct EthSignature {
        pub v: u8,
        pub r: [u8; 32],
        pub s: [u8; 32],
    }

    pub struct EthSigner {
        skey: SigningKey,
        addr: EthAddress,
    }

    impl EthSigner {
        pub fn random() -> Self {
            Self::init_from_key(SigningKey::random(&mut thread_rng()))
        }

        pub fn init_from_key(skey: SigningKey) -> Self {
            let addr = EthAddress::from(skey.verifying_key());
            Self { skey, addr }
        }

        pub fn address(&self) -> EthAddress {
            self.addr
        }

        // sign_prehash signs an already enveloped digest.
        pub fn sign_prehash(&self, hash: &EthHash) -> EthSignature {
            // k256 always emits low-s signatures and adjusts the recovery id.
            let (sig, rec_id) = self.skey.sign_prehash_recoverable(&hash.0).unwrap();
            let bytes = sig.to_bytes();

            let mut r = [0u8; 32];
            let mut s = [0u8; 32];
            r.copy_from_slice(&bytes[..32]);
            s.copy_from_slice(&bytes[32..]);
            EthSignature {
                v: rec_id.to_byte() + RECOVERY_ID_OFFSET,
                r,
                s,
            }
        }

        pub fn sign_voucher(&self, channel: &EthAddress, amount: u128) -> EthSignature {
            self.sign_prehash(&voucher_signing_digest(channel, amount))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutils::EthSigner;
    use super::*;
    use alloy_primitives::U256;
    use k256::ecdsa::SigningKey;
    use sha3::{Digest, Keccak256};

    const CURVE_ORDER: &str = "fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141";

    fn key_from_scalar(scalar: u8) -> SigningKey {
        let mut bytes = [0u8; 32];
        bytes[31] = scalar;
        SigningKey::from_slice(&bytes).unwrap()
    }

    fn eth_address(hex_addr: &str) -> EthAddress {
        let mut addr = EthAddress::default();
        addr.0.copy_from_slice(&hex::decode(hex_addr).unwrap());
        addr
    }

    #[test]
    fn address_from_known_keys() {
        let one = EthSigner::init_from_key(key_from_scalar(1));
        let two = EthSigner::init_from_key(key_from_scalar(2));
        assert_eq!(one.address(), eth_address("7e5f4552091a69125d5dfcb7b8c2659029395bdf"));
        assert_eq!(two.address(), eth_address("2b5ad5c4795c026514f8317c7a215e218dccd6cf"));
    }

    #[test]
    fn channel_digest_matches_keccak_of_packed_bytes() {
        let channel = EthAddress([0x42; 20]);
        let amount = 4_321_000u128;

        let mut hasher = Keccak256::new();
        hasher.update(channel.0);
        hasher.update([0u8; 16]);
        hasher.update(amount.to_be_bytes());
        let expected: [u8; 32] = hasher.finalize().into();

        assert_eq!(channel_digest(&channel, amount).0, expected);
    }

    #[test]
    fn signing_digest_uses_message_envelope() {
        let digest = channel_digest(&EthAddress([7; 20]), 21);

        let mut hasher = Keccak256::new();
        hasher.update(b"\x19Ethereum Signed Message:\n32");
        hasher.update(digest.0);
        let expected: [u8; 32] = hasher.finalize().into();

        assert_eq!(signing_digest(&digest).0, expected);
        assert_eq!(SIGNED_MESSAGE_PREFIX.len(), 28);
    }

    #[test]
    fn digests_are_deterministic() {
        let channel = EthAddress([0x11; 20]);
        for amount in [0u128, 1, 999, 10_000_000, u128::MAX] {
            assert_eq!(channel_digest(&channel, amount), channel_digest(&channel, amount));
            assert_eq!(
                voucher_signing_digest(&channel, amount),
                voucher_signing_digest(&channel, amount)
            );
        }
    }

    #[test]
    fn digest_sensitive_to_amount_and_channel() {
        let channel = EthAddress([0x11; 20]);
        let mut other = channel;
        other.0[19] ^= 1;

        let base = channel_digest(&channel, 100);
        assert_ne!(base, channel_digest(&channel, 101));
        assert_ne!(base, channel_digest(&other, 100));
        assert_ne!(signing_digest(&base), base);
    }

    #[test]
    fn recover_signed_voucher() {
        let signer = EthSigner::random();
        let channel = EthAddress([0x5a; 20]);
        for amount in [0u128, 21, 4_321_000, u64::MAX as u128] {
            let sig = signer.sign_voucher(&channel, amount);
            let digest = voucher_signing_digest(&channel, amount);
            assert!(sig.v == 27 || sig.v == 28);
            assert_eq!(recover_signer(&digest, sig.v, &sig.r, &sig.s), Ok(signer.address()));
        }
    }

    #[test]
    fn recover_against_other_digest_yields_other_address() {
        let signer = EthSigner::random();
        let channel = EthAddress([0x5a; 20]);
        let mut other_channel = channel;
        other_channel.0[0] = 0;
        let sig = signer.sign_voucher(&channel, 500);

        let wrong_amount = voucher_signing_digest(&channel, 501);
        let wrong_channel = voucher_signing_digest(&other_channel, 500);
        for digest in [wrong_amount, wrong_channel] {
            // Recovery may succeed on an unrelated key or fail outright.
            assert_ne!(recover_signer(&digest, sig.v, &sig.r, &sig.s), Ok(signer.address()));
        }
    }

    #[test]
    fn different_signers_recover_differently() {
        let alice = EthSigner::random();
        let bob = EthSigner::random();
        let channel = EthAddress([3; 20]);
        let digest = voucher_signing_digest(&channel, 77);

        let sig_a = alice.sign_voucher(&channel, 77);
        let sig_b = bob.sign_voucher(&channel, 77);
        assert_ne!(sig_a, sig_b);
        assert_eq!(recover_signer(&digest, sig_a.v, &sig_a.r, &sig_a.s), Ok(alice.address()));
        assert_eq!(recover_signer(&digest, sig_b.v, &sig_b.r, &sig_b.s), Ok(bob.address()));
    }

    #[test]
    fn invalid_recovery_id_rejected() {
        let signer = EthSigner::random();
        let channel = EthAddress([1; 20]);
        let digest = voucher_signing_digest(&channel, 5);
        let sig = signer.sign_voucher(&channel, 5);

        for v in [0u8, 1, 26, 29, 255] {
            assert_eq!(
                recover_signer(&digest, v, &sig.r, &sig.s),
                Err(Error::InvalidSignature)
            );
        }
    }

    #[test]
    fn out_of_range_scalars_rejected() {
        let signer = EthSigner::random();
        let channel = EthAddress([1; 20]);
        let digest = voucher_signing_digest(&channel, 5);
        let sig = signer.sign_voucher(&channel, 5);

        let mut order = [0u8; 32];
        order.copy_from_slice(&hex::decode(CURVE_ORDER).unwrap());

        assert_eq!(recover_signer(&digest, sig.v, &[0; 32], &sig.s), Err(Error::InvalidSignature));
        assert_eq!(recover_signer(&digest, sig.v, &sig.r, &[0; 32]), Err(Error::InvalidSignature));
        assert_eq!(recover_signer(&digest, sig.v, &order, &sig.s), Err(Error::InvalidSignature));
        assert_eq!(recover_signer(&digest, sig.v, &sig.r, &order), Err(Error::InvalidSignature));
        assert_eq!(
            recover_signer(&digest, sig.v, &[0xff; 32], &sig.s),
            Err(Error::InvalidSignature)
        );
    }

    #[test]
    fn high_s_signature_recovers_same_signer() {
        let signer = EthSigner::random();
        let channel = EthAddress([9; 20]);
        let digest = voucher_signing_digest(&channel, 1_000);
        let sig = signer.sign_voucher(&channel, 1_000);

        let order = U256::from_be_slice(&hex::decode(CURVE_ORDER).unwrap());
        let high_s: [u8; 32] = (order - U256::from_be_bytes(sig.s)).to_be_bytes();
        let flipped_v = if sig.v == 27 { 28 } else { 27 };

        assert_eq!(
            recover_signer(&digest, flipped_v, &sig.r, &high_s),
            Ok(signer.address())
        );
    }
}
