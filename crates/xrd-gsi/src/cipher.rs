//! Symmetric cipher dispatch for session-key material.
//!
//! Cipher selection follows the JCA-style transformation strings that GSI
//! peers exchange, e.g. `Blowfish/CBC/PKCS5Padding`. Only the combinations a
//! GSI peer actually negotiates are supported; anything else is
//! [`GsiError::AlgorithmUnsupported`].

use blowfish::Blowfish;
use cbc::cipher::block_padding::{NoPadding, Pkcs7};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::error::{GsiError, Result};

/// Blowfish operates on 8-byte blocks.
pub const BLOWFISH_BLOCK_SIZE: usize = 8;

type BlowfishCbcDec = cbc::Decryptor<Blowfish>;
type BlowfishCbcEnc = cbc::Encryptor<Blowfish>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Padding {
    None,
    Pkcs5,
}

/// A parsed `algorithm/mode/padding` transformation.
#[derive(Debug, Clone, Copy)]
struct Transformation {
    padding: Padding,
}

fn parse_spec(cipher_spec: &str, key_spec: &str) -> Result<Transformation> {
    let mut parts = cipher_spec.split('/');
    let algorithm = parts.next().unwrap_or_default();
    let mode = parts.next().unwrap_or_default();
    let padding = parts.next().unwrap_or_default();
    if parts.next().is_some() {
        return Err(GsiError::AlgorithmUnsupported(cipher_spec.to_string()));
    }

    if !algorithm.eq_ignore_ascii_case("blowfish") || !key_spec.eq_ignore_ascii_case("blowfish") {
        return Err(GsiError::AlgorithmUnsupported(format!(
            "{cipher_spec} with key spec {key_spec}"
        )));
    }
    if !mode.eq_ignore_ascii_case("cbc") {
        return Err(GsiError::AlgorithmUnsupported(cipher_spec.to_string()));
    }
    let padding = if padding.eq_ignore_ascii_case("nopadding") {
        Padding::None
    } else if padding.eq_ignore_ascii_case("pkcs5padding") {
        Padding::Pkcs5
    } else {
        return Err(GsiError::AlgorithmUnsupported(cipher_spec.to_string()));
    };

    Ok(Transformation { padding })
}

/// Decrypt `data` under the named transformation.
pub fn decrypt(
    cipher_spec: &str,
    key_spec: &str,
    key: &[u8],
    iv: &[u8],
    data: &[u8],
) -> Result<Vec<u8>> {
    let spec = parse_spec(cipher_spec, key_spec)?;
    if data.len() % BLOWFISH_BLOCK_SIZE != 0 {
        return Err(GsiError::BadBlockSize(format!(
            "ciphertext length {} is not a multiple of {}",
            data.len(),
            BLOWFISH_BLOCK_SIZE
        )));
    }
    let cipher = BlowfishCbcDec::new_from_slices(key, iv)
        .map_err(|e| GsiError::BadBlockSize(e.to_string()))?;
    match spec.padding {
        Padding::None => cipher
            .decrypt_padded_vec_mut::<NoPadding>(data)
            .map_err(|_| GsiError::BadPadding),
        Padding::Pkcs5 => cipher
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(|_| GsiError::BadPadding),
    }
}

/// Encrypt `data` under the named transformation. The server side only
/// decrypts client material; encryption exists for the peer role and tests.
pub fn encrypt(
    cipher_spec: &str,
    key_spec: &str,
    key: &[u8],
    iv: &[u8],
    data: &[u8],
) -> Result<Vec<u8>> {
    let spec = parse_spec(cipher_spec, key_spec)?;
    if spec.padding == Padding::None && data.len() % BLOWFISH_BLOCK_SIZE != 0 {
        return Err(GsiError::BadBlockSize(format!(
            "plaintext length {} is not a multiple of {}",
            data.len(),
            BLOWFISH_BLOCK_SIZE
        )));
    }
    let cipher = BlowfishCbcEnc::new_from_slices(key, iv)
        .map_err(|e| GsiError::BadBlockSize(e.to_string()))?;
    let out = match spec.padding {
        Padding::None => cipher.encrypt_padded_vec_mut::<NoPadding>(data),
        Padding::Pkcs5 => cipher.encrypt_padded_vec_mut::<Pkcs7>(data),
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
    const IV: &[u8] = &[0u8; 8];

    #[test]
    fn round_trip_no_padding() {
        let plain = b"xroot-ok";
        let cipher_text = encrypt("Blowfish/CBC/NoPadding", "Blowfish", KEY, IV, plain).unwrap();
        assert_eq!(cipher_text.len(), 8);
        assert_ne!(&cipher_text[..], plain);
        let decrypted =
            decrypt("Blowfish/CBC/NoPadding", "Blowfish", KEY, IV, &cipher_text).unwrap();
        assert_eq!(decrypted, plain);
    }

    #[test]
    fn round_trip_pkcs5() {
        let plain = b"short";
        let cipher_text =
            encrypt("Blowfish/CBC/PKCS5Padding", "Blowfish", KEY, IV, plain).unwrap();
        assert_eq!(cipher_text.len() % BLOWFISH_BLOCK_SIZE, 0);
        let decrypted =
            decrypt("Blowfish/CBC/PKCS5Padding", "Blowfish", KEY, IV, &cipher_text).unwrap();
        assert_eq!(decrypted, plain);
    }

    #[test]
    fn unaligned_ciphertext_rejected() {
        let err = decrypt("Blowfish/CBC/NoPadding", "Blowfish", KEY, IV, &[0u8; 7]).unwrap_err();
        assert!(matches!(err, GsiError::BadBlockSize(_)));
    }

    #[test]
    fn corrupt_padding_rejected() {
        let mut cipher_text =
            encrypt("Blowfish/CBC/PKCS5Padding", "Blowfish", KEY, IV, b"payload").unwrap();
        let last = cipher_text.len() - 1;
        cipher_text[last] ^= 0xFF;
        let err =
            decrypt("Blowfish/CBC/PKCS5Padding", "Blowfish", KEY, IV, &cipher_text).unwrap_err();
        assert!(matches!(err, GsiError::BadPadding));
    }

    #[test]
    fn unknown_algorithms_rejected() {
        for (cipher_spec, key_spec) in [
            ("AES/CBC/NoPadding", "AES"),
            ("Blowfish/ECB/NoPadding", "Blowfish"),
            ("Blowfish/CBC/ISO10126Padding", "Blowfish"),
            ("Blowfish/CBC/NoPadding", "AES"),
            ("Blowfish/CBC/NoPadding/Extra", "Blowfish"),
        ] {
            let err = decrypt(cipher_spec, key_spec, KEY, IV, &[0u8; 8]).unwrap_err();
            assert!(
                matches!(err, GsiError::AlgorithmUnsupported(_)),
                "{cipher_spec}/{key_spec} should be unsupported"
            );
        }
    }
}
