//! Minimal ASN.1 DER reader for ECDSA signatures.
//!
//! Authenticators return their signature as
//! `SEQUENCE { INTEGER r, INTEGER s }`.  Only that exact shape is accepted:
//! anything else (other tags, indefinite lengths, extra elements, trailing
//! bytes after the sequence) is rejected as malformed.

use crate::error::{Error, Result};

const TAG_SEQUENCE: u8 = 0x30;
const TAG_INTEGER: u8 = 0x02;

/// The two integers of an ECDSA signature, as the big-endian bytes found in
/// the DER encoding (including any sign padding the encoder added).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdsaSignature {
    pub r: Vec<u8>,
    pub s: Vec<u8>,
}

/// Parse a DER `SEQUENCE { INTEGER r, INTEGER s }`.
pub fn parse_ecdsa_signature(der: &[u8]) -> Result<EcdsaSignature> {
    let mut reader = DerReader::new(der);

    reader.expect_tag(TAG_SEQUENCE)?;
    let seq_len = reader.read_length()?;
    let seq_end = reader
        .pos
        .checked_add(seq_len)
        .filter(|end| *end <= der.len())
        .ok_or_else(|| malformed("sequence length exceeds input"))?;

    let r = reader.read_integer()?;
    let s = reader.read_integer()?;

    if reader.pos != seq_end {
        return Err(malformed("unexpected data inside signature sequence"));
    }
    if seq_end != der.len() {
        return Err(malformed("trailing bytes after signature sequence"));
    }

    Ok(EcdsaSignature {
        r: r.to_vec(),
        s: s.to_vec(),
    })
}

fn malformed(msg: &str) -> Error {
    Error::MalformedSignature(format!("DER: {msg}"))
}

struct DerReader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> DerReader<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn read_byte(&mut self) -> Result<u8> {
        let byte = *self
            .input
            .get(self.pos)
            .ok_or_else(|| malformed("unexpected end of input"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.input.len())
            .ok_or_else(|| malformed("unexpected end of input"))?;
        let bytes = &self.input[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn expect_tag(&mut self, tag: u8) -> Result<()> {
        let found = self.read_byte()?;
        if found != tag {
            return Err(malformed(&format!(
                "expected tag 0x{tag:02x}, found 0x{found:02x}"
            )));
        }
        Ok(())
    }

    /// Short form (< 0x80) or long form with 1-4 length octets.
    fn read_length(&mut self) -> Result<usize> {
        let first = self.read_byte()?;
        if first < 0x80 {
            return Ok(usize::from(first));
        }

        let octets = usize::from(first & 0x7f);
        if octets == 0 {
            return Err(malformed("indefinite length not allowed"));
        }
        if octets > 4 {
            return Err(malformed("length field too large"));
        }

        let mut len: usize = 0;
        for byte in self.read_bytes(octets)? {
            len = (len << 8) | usize::from(*byte);
        }
        Ok(len)
    }

    fn read_integer(&mut self) -> Result<&'a [u8]> {
        self.expect_tag(TAG_INTEGER)?;
        let len = self.read_length()?;
        if len == 0 {
            return Err(malformed("empty INTEGER"));
        }
        self.read_bytes(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn der_integer(value: &[u8]) -> Vec<u8> {
        let mut out = vec![TAG_INTEGER, value.len() as u8];
        out.extend_from_slice(value);
        out
    }

    fn der_sequence(r: &[u8], s: &[u8]) -> Vec<u8> {
        let mut body = der_integer(r);
        body.extend(der_integer(s));
        let mut out = vec![TAG_SEQUENCE, body.len() as u8];
        out.extend(body);
        out
    }

    #[test]
    fn parses_short_form_signature() {
        let der = der_sequence(&[0x01, 0x02], &[0x00, 0x80]);
        let sig = parse_ecdsa_signature(&der).unwrap();
        assert_eq!(sig.r, vec![0x01, 0x02]);
        assert_eq!(sig.s, vec![0x00, 0x80]);
    }

    #[test]
    fn parses_long_form_length() {
        let r = [0x11u8; 33];
        let s = [0x22u8; 33];
        let mut body = der_integer(&r);
        body.extend(der_integer(&s));
        // 70 bytes of body, written as 0x81 0x46.
        let mut der = vec![TAG_SEQUENCE, 0x81, body.len() as u8];
        der.extend(body);

        let sig = parse_ecdsa_signature(&der).unwrap();
        assert_eq!(sig.r, r.to_vec());
        assert_eq!(sig.s, s.to_vec());
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut der = der_sequence(&[0x01], &[0x02]);
        der.push(0x00);
        let err = parse_ecdsa_signature(&der).unwrap_err();
        assert!(matches!(err, Error::MalformedSignature(_)));
    }

    #[test]
    fn rejects_extra_element_inside_sequence() {
        let mut body = der_integer(&[0x01]);
        body.extend(der_integer(&[0x02]));
        body.extend(der_integer(&[0x03]));
        let mut der = vec![TAG_SEQUENCE, body.len() as u8];
        der.extend(body);
        assert!(parse_ecdsa_signature(&der).is_err());
    }

    #[test]
    fn rejects_wrong_outer_tag() {
        let mut der = der_sequence(&[0x01], &[0x02]);
        der[0] = 0x31;
        assert!(parse_ecdsa_signature(&der).is_err());
    }

    #[test]
    fn rejects_truncated_input() {
        let der = der_sequence(&[0x01, 0x02, 0x03], &[0x04]);
        assert!(parse_ecdsa_signature(&der[..der.len() - 1]).is_err());
        assert!(parse_ecdsa_signature(&[]).is_err());
        assert!(parse_ecdsa_signature(&[TAG_SEQUENCE]).is_err());
    }

    #[test]
    fn rejects_indefinite_and_oversized_lengths() {
        assert!(parse_ecdsa_signature(&[TAG_SEQUENCE, 0x80, 0x00, 0x00]).is_err());
        assert!(
            parse_ecdsa_signature(&[TAG_SEQUENCE, 0x85, 0, 0, 0, 0, 6, 2, 1, 1, 2, 1, 1]).is_err()
        );
    }

    #[test]
    fn rejects_empty_integer() {
        let der = [TAG_SEQUENCE, 0x05, TAG_INTEGER, 0x00, TAG_INTEGER, 0x01, 0x01];
        assert!(parse_ecdsa_signature(&der).is_err());
    }
}
