//! NBNS's nibble-encoded name codec (§4.1).
//!
//! A NetBIOS name is exactly 32 octets of nibble-encoded data on the wire.
//! Encoded as a DNS-format name (as it appears in an NBNS question/answer),
//! that payload is wrapped in a length octet (`0x20`) and a root terminator,
//! for 34 octets total — this is what [`encode`]/[`decode`] operate on.

use crate::config::nbns::NAME_LEN;
use crate::error::{Error, Result};

/// Length of the nibble-encoded payload alone (label length octet).
const LABEL_LEN: u8 = 32;
/// Total wire length: label-length octet + 32 nibble bytes + root terminator.
pub const WIRE_LEN: usize = 34;

/// Encodes `name` (1..=15 ASCII characters) as a 34-octet NBNS name,
/// uppercased and space-padded to 15 characters, with the workstation
/// suffix byte (`0x00`). `dest = None` only validates and returns the
/// length that would be written.
pub fn encode(name: &str, dest: Option<&mut [u8]>) -> Result<usize> {
	if name.is_empty() || name.len() > NAME_LEN || !name.is_ascii() {
		return Err(Error::InvalidName);
	}

	if let Some(buf) = dest {
		if buf.len() < WIRE_LEN {
			return Err(Error::MessageTooLong);
		}

		let mut padded = [b' '; 16];
		for (slot, c) in padded.iter_mut().zip(name.bytes()) {
			*slot = c.to_ascii_uppercase();
		}
		padded[15] = 0x00;

		buf[0] = LABEL_LEN;
		for (i, byte) in padded.iter().enumerate() {
			buf[1 + i * 2] = (byte >> 4) + b'A';
			buf[1 + i * 2 + 1] = (byte & 0xF) + b'A';
		}
		buf[33] = 0;
	}

	Ok(WIRE_LEN)
}

/// Decodes a 34-octet NBNS name back to its ASCII string, trimming the
/// space padding and ignoring the suffix byte.
pub fn decode(buf: &[u8]) -> Result<String> {
	if buf.len() < WIRE_LEN {
		return Err(Error::TruncatedMessage);
	}

	if buf[0] != LABEL_LEN || buf[33] != 0 {
		return Err(Error::InvalidLabel);
	}

	let mut padded = [0u8; 16];
	for i in 0..16 {
		let hi = buf[1 + i * 2].wrapping_sub(b'A');
		let lo = buf[1 + i * 2 + 1].wrapping_sub(b'A');

		if hi > 0xF || lo > 0xF {
			return Err(Error::InvalidLabel);
		}

		padded[i] = (hi << 4) | lo;
	}

	let trimmed = padded[..15].iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
	core::str::from_utf8(&padded[..trimmed]).map(str::to_owned).map_err(|_| Error::InvalidLabel)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn encode_decode_identity() {
		for name in ["PRINTER", "A", "FIFTEENCHARSNAM"] {
			let len = encode(name, None).unwrap();
			assert_eq!(len, WIRE_LEN);

			let mut buf = vec![0u8; len];
			encode(name, Some(&mut buf)).unwrap();

			assert_eq!(decode(&buf).unwrap(), name);
		}
	}

	#[test]
	fn encode_output_is_always_34_octets() {
		assert_eq!(encode("X", None).unwrap(), 34);
		assert_eq!(encode("FIFTEENCHARSNAM", None).unwrap(), 34);
	}

	#[test]
	fn rejects_too_long_name() {
		assert_eq!(encode("SIXTEENCHARNAME!", None), Err(Error::InvalidName));
	}

	#[test]
	fn rejects_malformed_wire_name() {
		let mut buf = vec![0u8; WIRE_LEN];
		encode("PRINTER", Some(&mut buf)).unwrap();
		buf[0] = 31;
		assert_eq!(decode(&buf), Err(Error::InvalidLabel));
	}
}
