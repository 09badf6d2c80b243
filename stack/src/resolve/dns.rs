//! DNS client: query construction and response parsing (§4.4 "DNS").

use std::net::{IpAddr, SocketAddr};

use log::debug;

use crate::cache::{Cache, CacheKey, Entry, Protocol, QueryType, State, Timestamp};
use crate::codec::rr::{self, class, rtype, Flags, Header, Rdata};
use crate::config;
use crate::error::{Error, Result};
use crate::transport::{Ancillary, IfaceId, Transport};

fn qtype(ty: QueryType) -> u16 {
	match ty {
		QueryType::Ipv4 => rtype::A,
		QueryType::Ipv6 => rtype::AAAA,
		QueryType::Any => rtype::ANY,
	}
}

/// Builds and sends a standard query, per §4.4 "Per-protocol query
/// construction": `id=entry.id, opcode=QUERY, rd=1`, one question, to
/// `dnsServerList[dns_server_num]`.
pub fn send_query<T: Transport>(transport: &mut T, entry: &Entry) -> Result<()> {
	let want_v4 = entry.key.ty != QueryType::Ipv6;
	let servers = transport.dns_servers(entry.key.iface, want_v4);
	let dst_addr = *servers.get(entry.dns_server_num as usize).ok_or(Error::NoDnsServer)?;

	let header = Header {
		id: entry.txid,
		flags: Flags { qr: false, opcode: rr::opcode::QUERY, rd: true, ..Default::default() },
		qdcount: 1,
		ancount: 0,
		nscount: 0,
		arcount: 0,
	};

	let question_len = rr::encode_question(&entry.key.name, qtype(entry.key.ty), class::IN, false, None)?;
	let total = Header::LEN + question_len;

	let (mut buf, offset) = transport.alloc_udp_buffer(total);
	if buf.len() < offset + total {
		return Err(Error::MessageTooLong);
	}

	header.encode(&mut buf[offset..offset + Header::LEN])?;
	rr::encode_question(&entry.key.name, qtype(entry.key.ty), class::IN, false, Some(&mut buf[offset + Header::LEN..offset + total]))?;

	transport.send_udp(entry.key.iface, entry.local_port, SocketAddr::new(dst_addr, config::dns::PORT), &buf, offset, Ancillary::default())
}

/// Parses an inbound DNS response. Malformed packets and responses with no
/// matching in-flight entry are silently dropped (§7) — this never returns
/// an error to the caller, it only logs.
pub fn on_response(cache: &mut Cache, iface: IfaceId, _src: SocketAddr, buf: &[u8], now: Timestamp) {
	if let Err(err) = try_on_response(cache, iface, buf, now) {
		debug!("dropping malformed DNS response: {err}");
	}
}

fn try_on_response(cache: &mut Cache, iface: IfaceId, buf: &[u8], now: Timestamp) -> Result<()> {
	let header = Header::decode(buf)?;

	if !super::passes_common_filter_except_rcode(header.flags) {
		return Ok(());
	}

	let (question, mut offset) = rr::decode_question(buf, Header::LEN)?;

	let ty = match question.ty {
		rtype::A => QueryType::Ipv4,
		rtype::AAAA => QueryType::Ipv6,
		_ => return Ok(()),
	};

	let key = CacheKey { iface, name: question.name, ty, protocol: Protocol::Dns };

	let in_flight = cache.lookup(&key).is_some_and(|e| e.txid == header.id && e.state == State::InProgress);
	if !in_flight {
		return Ok(());
	}

	// An explicit error rcode deletes the entry immediately (§4.4 "Failure semantics").
	if header.flags.rcode != 0 {
		cache.remove(&key);
		return Ok(());
	}

	let mut answer = None;

	for _ in 0..header.ancount {
		let (_, after_name) = crate::codec::name::decode(buf, offset)?;
		let rr_header = rr::RrHeader::decode(buf, after_name)?;
		let rdata_start = after_name + rr::RrHeader::LEN;
		offset = rdata_start + rr_header.rdlength as usize;

		if rr_header.class != class::IN || rr_header.ty != question.ty {
			continue;
		}

		match rr::decode_rdata(buf, rr_header.ty, rdata_start, rr_header.rdlength as usize)? {
			Rdata::A(addr) => {
				answer = Some((IpAddr::V4(addr), rr_header.ttl));
				break;
			}
			Rdata::Aaaa(addr) => {
				answer = Some((IpAddr::V6(addr), rr_header.ttl));
				break;
			}
			_ => {}
		}
	}

	if let (Some((addr, ttl)), Some(entry)) = (answer, cache.lookup_mut(&key)) {
		super::apply_answer(entry, addr, ttl, now);
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::mock::MockTransport;

	fn entry(name: &str, txid: u16, iface: IfaceId) -> Entry {
		Entry {
			key: CacheKey { iface, name: name.to_owned(), ty: QueryType::Ipv4, protocol: Protocol::Dns },
			state: State::InProgress,
			dns_server_num: 0,
			local_port: 54321,
			txid,
			addr: None,
			timestamp: 0,
			timeout: config::dns::INIT_TIMEOUT,
			max_timeout: config::dns::MAX_TIMEOUT,
			retransmit_count: config::dns::MAX_RETRIES - 1,
		}
	}

	#[test]
	fn sends_to_configured_server_on_port_53() {
		let mut transport = MockTransport::new();
		transport.dns_servers_v4.insert(0, vec!["8.8.8.8".parse().unwrap()]);

		let entry = entry("example.test", 0xabcd, 0);
		send_query(&mut transport, &entry).unwrap();

		let sent = transport.drain_sent();
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].dst, SocketAddr::new("8.8.8.8".parse().unwrap(), 53));
		assert_eq!(sent[0].src_port, 54321);
	}

	#[test]
	fn no_server_configured_fails_fast() {
		let transport_err = MockTransport::new();
		let mut transport = transport_err;
		let entry = entry("example.test", 1, 0);
		assert_eq!(send_query(&mut transport, &entry), Err(Error::NoDnsServer));
	}

	#[test]
	fn matching_answer_resolves_entry() {
		let mut cache = Cache::new();
		let key_entry = entry("example.test", 0xabcd, 0);
		cache.insert(key_entry.clone());

		let mut buf = vec![0u8; config::DNS_MESSAGE_MAX_SIZE];
		let header = Header {
			id: 0xabcd,
			flags: Flags { qr: true, opcode: rr::opcode::QUERY, ..Default::default() },
			qdcount: 1,
			ancount: 1,
			nscount: 0,
			arcount: 0,
		};
		header.encode(&mut buf[..Header::LEN]).unwrap();

		let q_len = rr::encode_question("example.test", rtype::A, class::IN, false, Some(&mut buf[Header::LEN..])).unwrap();
		let mut offset = Header::LEN + q_len;

		let name_len = crate::codec::name::encode("example.test", Some(&mut buf[offset..])).unwrap();
		offset += name_len;

		let rr_header = rr::RrHeader { ty: rtype::A, class: class::IN, cache_flush: false, ttl: 60, rdlength: 4 };
		rr_header.encode(&mut buf[offset..offset + rr::RrHeader::LEN]).unwrap();
		offset += rr::RrHeader::LEN;

		buf[offset..offset + 4].copy_from_slice(&[192, 0, 2, 1]);
		offset += 4;
		buf.truncate(offset);

		on_response(&mut cache, 0, "203.0.113.1:53".parse().unwrap(), &buf, 1_000);

		let resolved = cache.lookup(&key_entry.key).unwrap();
		assert_eq!(resolved.state, State::Resolved);
		assert_eq!(resolved.addr, Some("192.0.2.1".parse().unwrap()));
		assert_eq!(resolved.timeout, std::time::Duration::from_secs(60));
	}

	#[test]
	fn error_rcode_deletes_entry() {
		let mut cache = Cache::new();
		let key_entry = entry("example.test", 7, 0);
		cache.insert(key_entry.clone());

		let mut buf = vec![0u8; Header::LEN + 32];
		let header = Header {
			id: 7,
			flags: Flags { qr: true, opcode: rr::opcode::QUERY, rcode: 3, ..Default::default() },
			qdcount: 1,
			ancount: 0,
			nscount: 0,
			arcount: 0,
		};
		header.encode(&mut buf[..Header::LEN]).unwrap();
		let q_len = rr::encode_question("example.test", rtype::A, class::IN, false, Some(&mut buf[Header::LEN..])).unwrap();
		buf.truncate(Header::LEN + q_len);

		on_response(&mut cache, 0, "203.0.113.1:53".parse().unwrap(), &buf, 1_000);

		assert!(cache.lookup(&key_entry.key).is_none());
	}
}
