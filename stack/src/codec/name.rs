//! DNS name encoding, pointer-compressed decoding, and case-insensitive
//! comparison (§4.1).

use core::cmp::Ordering;

use crate::config::{DNS_MAX_LABEL_LEN, DNS_MAX_NAME_LEN, MAX_NAME_POINTER_DEPTH};
use crate::error::{Error, Result};

/// Encodes a single dotted name (e.g. `"example.test"`).
///
/// Passing `dest = None` computes the length that would have been written
/// without touching any buffer — the two-pass variant used to pre-size
/// message buffers before encoding into them.
pub fn encode(name: &str, dest: Option<&mut [u8]>) -> Result<usize> {
	encode_parts(&[name], dest)
}

/// Encodes an mDNS/DNS-SD three-part name (`instance`, `service`, `domain`).
///
/// Each non-empty part contributes its own labels; no terminator is
/// emitted between parts, only after the last one. A leading `.` on the
/// final (domain) part is ignored, so `(instance, "_http._tcp", ".local")`
/// and `(instance, "_http._tcp", "local")` encode identically.
pub fn encode_parts(parts: &[&str], mut dest: Option<&mut [u8]>) -> Result<usize> {
	let mut pos = 0usize;
	let last = parts.len().saturating_sub(1);

	for (i, part) in parts.iter().enumerate() {
		let part = if i == last { part.trim_start_matches('.') } else { *part };

		if part.is_empty() {
			continue;
		}

		for label in part.split('.') {
			let bytes = label.as_bytes();

			if bytes.is_empty() || bytes.len() > DNS_MAX_LABEL_LEN {
				return Err(Error::InvalidName);
			}

			if let Some(buf) = dest.as_deref_mut() {
				let end = pos.checked_add(1 + bytes.len()).ok_or(Error::MessageTooLong)?;
				let slot = buf.get_mut(pos..end).ok_or(Error::MessageTooLong)?;
				slot[0] = bytes.len() as u8;
				slot[1..].copy_from_slice(bytes);
			}

			pos += 1 + bytes.len();
		}
	}

	if let Some(buf) = dest.as_deref_mut() {
		*buf.get_mut(pos).ok_or(Error::MessageTooLong)? = 0;
	}
	pos += 1;

	if pos > DNS_MAX_NAME_LEN {
		return Err(Error::InvalidName);
	}

	Ok(pos)
}

/// Decodes a name starting at `offset` within `msg`, following pointer
/// compression. Returns the decoded dotted name and the offset just past
/// the name *as it appears at the call site* (i.e. past the terminating
/// zero octet, or past the two-byte pointer that redirected away).
pub fn decode(msg: &[u8], mut offset: usize) -> Result<(String, usize)> {
	let mut labels: Vec<&str> = Vec::new();
	let mut total_len = 0usize;
	let mut jumps = 0u32;
	let mut caller_end: Option<usize> = None;

	loop {
		let len = *msg.get(offset).ok_or(Error::TruncatedMessage)?;

		if len & 0xC0 == 0xC0 {
			let lo = *msg.get(offset + 1).ok_or(Error::TruncatedMessage)?;
			let ptr = (((len & 0x3F) as usize) << 8) | lo as usize;

			if caller_end.is_none() {
				caller_end = Some(offset + 2);
			}

			jumps += 1;
			if jumps > MAX_NAME_POINTER_DEPTH {
				return Err(Error::PointerLoop);
			}

			if ptr >= msg.len() {
				return Err(Error::TruncatedMessage);
			}

			offset = ptr;
			continue;
		}

		if len & 0xC0 != 0 {
			return Err(Error::InvalidLabel);
		}

		if len == 0 {
			if caller_end.is_none() {
				caller_end = Some(offset + 1);
			}
			break;
		}

		let len = len as usize;
		if len > DNS_MAX_LABEL_LEN {
			return Err(Error::InvalidLabel);
		}

		let start = offset + 1;
		let bytes = msg.get(start..start + len).ok_or(Error::TruncatedMessage)?;
		let label = core::str::from_utf8(bytes).map_err(|_| Error::InvalidLabel)?;

		labels.push(label);
		total_len += len + 1;
		if total_len > DNS_MAX_NAME_LEN {
			return Err(Error::InvalidName);
		}

		offset = start + len;
	}

	Ok((labels.join("."), caller_end.unwrap()))
}

fn ci_eq(a: &str, b: &str) -> bool {
	a.eq_ignore_ascii_case(b)
}

fn ci_cmp(a: &str, b: &str) -> Ordering {
	let mut ac = a.chars().flat_map(char::to_lowercase);
	let mut bc = b.chars().flat_map(char::to_lowercase);

	loop {
		return match (ac.next(), bc.next()) {
			(None, None) => Ordering::Equal,
			(None, Some(_)) => Ordering::Less,
			(Some(_), None) => Ordering::Greater,
			(Some(x), Some(y)) if x == y => continue,
			(Some(x), Some(y)) => x.cmp(&y),
		};
	}
}

/// Compares an encoded name against an in-memory string, case-insensitively.
pub fn compare_str(msg: &[u8], offset: usize, name: &str) -> Result<Ordering> {
	let (decoded, _) = decode(msg, offset)?;
	Ok(ci_cmp(&decoded, name))
}

/// Returns whether the encoded name at `offset` equals `name`, case-insensitively.
pub fn eq_str(msg: &[u8], offset: usize, name: &str) -> Result<bool> {
	let (decoded, _) = decode(msg, offset)?;
	Ok(ci_eq(&decoded, name))
}

/// Compares two encoded names that may live in different messages.
pub fn compare(msg_a: &[u8], offset_a: usize, msg_b: &[u8], offset_b: usize) -> Result<Ordering> {
	let (a, _) = decode(msg_a, offset_a)?;
	let (b, _) = decode(msg_b, offset_b)?;
	Ok(ci_cmp(&a, &b))
}
