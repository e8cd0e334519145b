//! PEM armor and the minimal DER subset used for DH parameter exchange.
//!
//! DH parameters travel as `SEQUENCE { INTEGER p, INTEGER g, INTEGER
//! privateValueLength }`, base64-armored between `-----BEGIN DH
//! PARAMETERS-----` / `-----END DH PARAMETERS-----` lines.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use num_bigint::BigUint;

use crate::error::{GsiError, Result};

/// Base64 line width inside PEM armor.
const PEM_LINE_WIDTH: usize = 64;

const TAG_INTEGER: u8 = 0x02;
const TAG_SEQUENCE: u8 = 0x30;

/// Armor `data` between `header` and `footer` lines, base64 wrapped at 64
/// columns. No trailing newline.
pub fn to_pem(data: &[u8], header: &str, footer: &str) -> String {
    let encoded = BASE64.encode(data);
    let mut out = String::with_capacity(header.len() + footer.len() + encoded.len() + 16);
    out.push_str(header);
    for chunk in encoded.as_bytes().chunks(PEM_LINE_WIDTH) {
        out.push('\n');
        // base64 output is ASCII
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
    }
    out.push('\n');
    out.push_str(footer);
    out
}

/// Extract and decode the base64 payload between `header` and `footer`,
/// ignoring any whitespace inside the armor.
pub fn from_pem(text: &str, header: &str, footer: &str) -> Result<Vec<u8>> {
    let start = text
        .find(header)
        .ok_or_else(|| GsiError::Malformed(format!("missing {header}")))?
        + header.len();
    let end = text[start..]
        .find(footer)
        .map(|i| start + i)
        .ok_or_else(|| GsiError::Malformed(format!("missing {footer}")))?;

    let payload: String = text[start..end]
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    BASE64
        .decode(payload.as_bytes())
        .map_err(|e| GsiError::Malformed(format!("invalid base64 in PEM body: {e}")))
}

/// DER-encode DH parameters. `private_value_length` is the bit length of the
/// prime by convention.
pub fn dh_params_to_der(p: &BigUint, g: &BigUint, private_value_length: u64) -> Vec<u8> {
    let mut content = Vec::new();
    put_integer(&mut content, &p.to_bytes_be());
    put_integer(&mut content, &g.to_bytes_be());
    put_integer(&mut content, &private_value_length.to_be_bytes());

    let mut out = Vec::with_capacity(content.len() + 4);
    out.push(TAG_SEQUENCE);
    put_length(&mut out, content.len());
    out.extend_from_slice(&content);
    out
}

/// Decode DER DH parameters back into `(p, g, private_value_length)`.
pub fn dh_params_from_der(der: &[u8]) -> Result<(BigUint, BigUint, u64)> {
    let mut cursor = der;
    let mut content = take_value(&mut cursor, TAG_SEQUENCE)?;

    let p = BigUint::from_bytes_be(take_value(&mut content, TAG_INTEGER)?);
    let g = BigUint::from_bytes_be(take_value(&mut content, TAG_INTEGER)?);
    let l = BigUint::from_bytes_be(take_value(&mut content, TAG_INTEGER)?);
    if !content.is_empty() {
        return Err(GsiError::Malformed(
            "trailing bytes inside DH parameter sequence".into(),
        ));
    }

    let private_value_length = u64::try_from(&l)
        .map_err(|_| GsiError::Malformed("private value length out of range".into()))?;
    Ok((p, g, private_value_length))
}

/// Append a DER INTEGER holding an unsigned big-endian value.
fn put_integer(out: &mut Vec<u8>, magnitude: &[u8]) {
    // strip redundant leading zeros, keep at least one byte
    let mut bytes = magnitude;
    while bytes.len() > 1 && bytes[0] == 0 {
        bytes = &bytes[1..];
    }
    // a set high bit would read as negative; re-pad with one zero byte
    let pad = bytes[0] & 0x80 != 0;

    out.push(TAG_INTEGER);
    put_length(out, bytes.len() + usize::from(pad));
    if pad {
        out.push(0);
    }
    out.extend_from_slice(bytes);
}

fn put_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
}

/// Consume one `tag`-typed TLV from `cursor` and return its value bytes.
fn take_value<'a>(cursor: &mut &'a [u8], tag: u8) -> Result<&'a [u8]> {
    if cursor.is_empty() {
        return Err(GsiError::Malformed("truncated DER element".into()));
    }
    if cursor[0] != tag {
        return Err(GsiError::Malformed(format!(
            "unexpected DER tag {:#04x}, wanted {:#04x}",
            cursor[0], tag
        )));
    }
    let mut rest = &cursor[1..];
    let len = take_length(&mut rest)?;
    if rest.len() < len {
        return Err(GsiError::Malformed("truncated DER value".into()));
    }
    let (value, tail) = rest.split_at(len);
    *cursor = tail;
    Ok(value)
}

fn take_length(cursor: &mut &[u8]) -> Result<usize> {
    let (&first, rest) = cursor
        .split_first()
        .ok_or_else(|| GsiError::Malformed("truncated DER length".into()))?;
    if first < 0x80 {
        *cursor = rest;
        return Ok(first as usize);
    }
    let count = (first & 0x7f) as usize;
    if count == 0 || count > std::mem::size_of::<usize>() || rest.len() < count {
        return Err(GsiError::Malformed("invalid DER length".into()));
    }
    let mut len = 0usize;
    for &b in &rest[..count] {
        len = (len << 8) | b as usize;
    }
    *cursor = &rest[count..];
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "-----BEGIN DH PARAMETERS-----";
    const FOOTER: &str = "-----END DH PARAMETERS-----";

    #[test]
    fn pem_round_trip() {
        for data in [
            &b""[..],
            &b"x"[..],
            &[0u8, 1, 2, 253, 254, 255][..],
            &[0xAB; 200][..],
        ] {
            let pem = to_pem(data, HEADER, FOOTER);
            assert!(pem.starts_with(HEADER));
            assert!(pem.ends_with(FOOTER));
            let decoded = from_pem(&pem, HEADER, FOOTER).unwrap();
            assert_eq!(decoded, data);
        }
    }

    #[test]
    fn pem_lines_are_wrapped() {
        let pem = to_pem(&[0x55; 100], HEADER, FOOTER);
        for line in pem.lines() {
            assert!(line.len() <= PEM_LINE_WIDTH);
        }
    }

    #[test]
    fn pem_missing_footer() {
        let pem = to_pem(b"abc", HEADER, FOOTER);
        let truncated = &pem[..pem.len() - FOOTER.len()];
        assert!(matches!(
            from_pem(truncated, HEADER, FOOTER),
            Err(GsiError::Malformed(_))
        ));
    }

    #[test]
    fn pem_tolerates_surrounding_noise() {
        let pem = format!("prefix junk\n{}\ntrailing", to_pem(b"payload", HEADER, FOOTER));
        assert_eq!(from_pem(&pem, HEADER, FOOTER).unwrap(), b"payload");
    }

    #[test]
    fn der_round_trip() {
        let p = BigUint::parse_bytes(crate::dh::DH_PRIME_HEX.as_bytes(), 16).unwrap();
        let g = BigUint::from(2u32);
        let der = dh_params_to_der(&p, &g, 512);
        let (p2, g2, l) = dh_params_from_der(&der).unwrap();
        assert_eq!(p2, p);
        assert_eq!(g2, g);
        assert_eq!(l, 512);
    }

    #[test]
    fn der_integer_high_bit_is_padded() {
        // 512-bit prime starts with 0xa8, so the INTEGER needs a leading zero
        let p = BigUint::parse_bytes(crate::dh::DH_PRIME_HEX.as_bytes(), 16).unwrap();
        let der = dh_params_to_der(&p, &BigUint::from(2u32), 512);
        // SEQUENCE tag, long-form length, INTEGER tag, length 0x41, 0x00 pad
        assert_eq!(der[0], TAG_SEQUENCE);
        let int_off = if der[1] & 0x80 != 0 {
            2 + (der[1] & 0x7f) as usize
        } else {
            2
        };
        assert_eq!(der[int_off], TAG_INTEGER);
        assert_eq!(der[int_off + 1], 0x41);
        assert_eq!(der[int_off + 2], 0x00);
        assert_eq!(der[int_off + 3], 0xa8);
    }

    #[test]
    fn der_rejects_wrong_tag() {
        let mut der = dh_params_to_der(&BigUint::from(7u32), &BigUint::from(2u32), 3);
        der[0] = 0x31;
        assert!(matches!(
            dh_params_from_der(&der),
            Err(GsiError::Malformed(_))
        ));
    }

    #[test]
    fn der_rejects_truncation() {
        let der = dh_params_to_der(&BigUint::from(7u32), &BigUint::from(2u32), 3);
        assert!(matches!(
            dh_params_from_der(&der[..der.len() - 1]),
            Err(GsiError::Malformed(_))
        ));
    }
}
