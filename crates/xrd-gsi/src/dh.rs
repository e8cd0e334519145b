//! Diffie-Hellman session for the GSI authentication flow.
//!
//! Both sides use a fixed 512-bit safe prime and generator 2; the peer must
//! echo exactly these parameters back or the agreement is refused. After the
//! agreement is finalized the leading bytes of the shared secret key a
//! symmetric cipher that decrypts client material.

use num_bigint::{BigUint, RandBigInt};
use num_traits::One;
use rand::{CryptoRng, RngCore};

use crate::cipher;
use crate::error::{GsiError, Result};
use crate::pem;

/// The 512-bit prime of the fixed DH group, lowercase hex, big-endian.
/// Generated with OpenSSL and shared verbatim by every conforming peer.
pub const DH_PRIME_HEX: &str = concat!(
    "a8379d6fffe863a0b1470c26dd1a450be2039af083b1ba5bfa1d2f5b2a890802",
    "d8c4d4668d148d35bb24b1af1ad375c7c03b61aa853f5669aef267da20875d93",
);

/// Group generator.
pub const DH_GENERATOR: u32 = 2;

const DH_HEADER: &str = "-----BEGIN DH PARAMETERS-----";
const DH_FOOTER: &str = "-----END DH PARAMETERS-----";
const PUBKEY_HEADER: &str = "---BPUB---";
const PUBKEY_FOOTER: &str = "---EPUB---";

/// Key agreement phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgreementState {
    /// Local keypair generated, peer material not yet ingested.
    Initialized,
    /// Shared secret derived; decryption is permitted.
    Finalized,
}

/// One Diffie-Hellman key exchange session.
///
/// The randomness source is injected so that the primitive is not tied to
/// process-global state.
pub struct DhSession {
    p: BigUint,
    g: BigUint,
    private: BigUint,
    public: BigUint,
    shared: Option<Vec<u8>>,
    state: AgreementState,
}

impl DhSession {
    /// Generate a local keypair over the fixed group.
    pub fn new<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self> {
        let (p, g) = group()?;
        // private exponent in [1, p-2]
        let upper = &p - BigUint::one();
        let private = rng.gen_biguint_range(&BigUint::one(), &upper);
        let public = g.modpow(&private, &p);
        Ok(Self {
            p,
            g,
            private,
            public,
            shared: None,
            state: AgreementState::Initialized,
        })
    }

    pub fn state(&self) -> AgreementState {
        self.state
    }

    /// The local public material in the exchange format:
    ///
    /// ```text
    /// -----BEGIN DH PARAMETERS-----
    /// <base64 DER(SEQUENCE{p, g, bitlen(p)})>
    /// -----END DH PARAMETERS-----
    /// ---BPUB---<hex Y>---EPUB---
    /// ```
    pub fn encoded_material(&self) -> String {
        let der = pem::dh_params_to_der(&self.p, &self.g, self.p.bits());
        let params = pem::to_pem(&der, DH_HEADER, DH_FOOTER);
        format!(
            "{}\n{}{}{}",
            params,
            PUBKEY_HEADER,
            self.public.to_str_radix(16),
            PUBKEY_FOOTER
        )
    }

    /// Ingest the peer's material and derive the shared secret.
    pub fn finalize(&mut self, message: &str) -> Result<()> {
        let index = message
            .find(PUBKEY_HEADER)
            .ok_or_else(|| GsiError::Malformed("missing public key section".into()))?;
        let (param_section, pub_section) = message.split_at(index);

        let der = pem::from_pem(param_section, DH_HEADER, DH_FOOTER)?;
        let (peer_p, peer_g, _private_len) = pem::dh_params_from_der(&der)?;
        if peer_p != self.p || peer_g != self.g {
            return Err(GsiError::ParamMismatch);
        }

        let cleaned: String = pub_section.chars().filter(|&c| c != '\n').collect();
        let after_header = cleaned
            .strip_prefix(PUBKEY_HEADER)
            .ok_or_else(|| GsiError::Malformed("missing public key sentinel".into()))?;
        let hex = match after_header.find(PUBKEY_FOOTER) {
            // anything after the end sentinel is tolerated and ignored
            Some(end) => &after_header[..end],
            None => {
                return Err(GsiError::Malformed("missing public key end sentinel".into()));
            }
        };

        let peer_public = BigUint::parse_bytes(hex.as_bytes(), 16)
            .ok_or_else(|| GsiError::Malformed("public value is not hexadecimal".into()))?;

        // valid public values lie strictly between 1 and p-1
        let upper = &self.p - BigUint::one();
        if peer_public <= BigUint::one() || peer_public >= upper {
            return Err(GsiError::KeyRejected(
                "public value outside the group".into(),
            ));
        }

        let secret = peer_public.modpow(&self.private, &self.p);
        self.shared = Some(left_pad(&secret.to_bytes_be(), self.secret_len()));
        self.state = AgreementState::Finalized;
        Ok(())
    }

    /// The agreed secret, big-endian, always `ceil(bits(p) / 8)` bytes.
    pub fn shared_secret(&self) -> Result<Vec<u8>> {
        self.shared.clone().ok_or(GsiError::NotFinalized)
    }

    /// Decrypt `ciphertext` with a key taken from the first `block_size`
    /// bytes of the shared secret and an all-zero IV.
    pub fn decrypt(
        &self,
        cipher_spec: &str,
        key_spec: &str,
        block_size: usize,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>> {
        let secret = self.shared_secret()?;
        if block_size == 0 || block_size > secret.len() {
            return Err(GsiError::BadBlockSize(format!(
                "block size {block_size} exceeds secret length {}",
                secret.len()
            )));
        }
        let key = &secret[..block_size];
        let iv = vec![0u8; block_size];
        cipher::decrypt(cipher_spec, key_spec, key, &iv, ciphertext)
    }

    fn secret_len(&self) -> usize {
        ((self.p.bits() + 7) / 8) as usize
    }
}

fn group() -> Result<(BigUint, BigUint)> {
    let p = BigUint::parse_bytes(DH_PRIME_HEX.as_bytes(), 16)
        .ok_or_else(|| GsiError::CryptoInit("prime constant is not hexadecimal".into()))?;
    let g = BigUint::from(DH_GENERATOR);
    if !p.bit(0) || g >= p {
        return Err(GsiError::CryptoInit("degenerate DH group".into()));
    }
    Ok((p, g))
}

fn left_pad(bytes: &[u8], len: usize) -> Vec<u8> {
    if bytes.len() >= len {
        return bytes.to_vec();
    }
    let mut out = vec![0u8; len - bytes.len()];
    out.extend_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn material_shape() {
        let session = DhSession::new(&mut OsRng).unwrap();
        let material = session.encoded_material();
        assert!(material.starts_with(DH_HEADER));
        let tail = &material[material.find(PUBKEY_HEADER).unwrap()..];
        assert!(tail.ends_with(PUBKEY_FOOTER));
        let hex = &tail[PUBKEY_HEADER.len()..tail.len() - PUBKEY_FOOTER.len()];
        assert!(!hex.is_empty());
        assert!(hex.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(hex, hex.to_ascii_lowercase());
    }

    #[test]
    fn secret_is_full_width() {
        let mut a = DhSession::new(&mut OsRng).unwrap();
        let b = DhSession::new(&mut OsRng).unwrap();
        a.finalize(&b.encoded_material()).unwrap();
        assert_eq!(a.shared_secret().unwrap().len(), 64);
    }

    #[test]
    fn state_transitions() {
        let mut a = DhSession::new(&mut OsRng).unwrap();
        assert_eq!(a.state(), AgreementState::Initialized);
        assert!(matches!(a.shared_secret(), Err(GsiError::NotFinalized)));

        let b = DhSession::new(&mut OsRng).unwrap();
        a.finalize(&b.encoded_material()).unwrap();
        assert_eq!(a.state(), AgreementState::Finalized);
    }

    #[test]
    fn left_pad_widths() {
        assert_eq!(left_pad(&[1, 2], 4), vec![0, 0, 1, 2]);
        assert_eq!(left_pad(&[1, 2, 3, 4], 4), vec![1, 2, 3, 4]);
    }
}
