//! LLMNR resolver client (§4.4 "LLMNR", RFC 4795).

use std::net::{IpAddr, SocketAddr};

use log::debug;

use crate::cache::{Cache, CacheKey, Entry, Protocol, QueryType, State, Timestamp};
use crate::codec::rr::{self, class, rtype, Flags, Header, Rdata};
use crate::config;
use crate::error::Result;
use crate::transport::{Ancillary, IfaceId, Transport};

fn qtype(ty: QueryType) -> u16 {
	match ty {
		QueryType::Ipv4 => rtype::A,
		QueryType::Ipv6 => rtype::AAAA,
		QueryType::Any => rtype::ANY,
	}
}

fn group_addr(ty: QueryType) -> IpAddr {
	if ty == QueryType::Ipv6 {
		IpAddr::V6(config::llmnr::GROUP_V6)
	} else {
		IpAddr::V4(config::llmnr::GROUP_V4)
	}
}

pub fn send_query<T: Transport>(transport: &mut T, entry: &Entry) -> Result<()> {
	let header = Header { id: entry.txid, flags: Flags { qr: false, opcode: rr::opcode::QUERY, ..Default::default() }, qdcount: 1, ancount: 0, nscount: 0, arcount: 0 };

	let question_len = rr::encode_question(&entry.key.name, qtype(entry.key.ty), class::IN, false, None)?;
	let total = Header::LEN + question_len;

	let (mut buf, offset) = transport.alloc_udp_buffer(total);
	header.encode(&mut buf[offset..offset + Header::LEN])?;
	rr::encode_question(&entry.key.name, qtype(entry.key.ty), class::IN, false, Some(&mut buf[offset + Header::LEN..offset + total]))?;

	let dst = SocketAddr::new(group_addr(entry.key.ty), config::llmnr::PORT);
	transport.send_udp(entry.key.iface, config::llmnr::PORT, dst, &buf, offset, Ancillary::default())
}

/// Per §9 open question 1: this crate rejects LLMNR responses whose opcode
/// is non-zero (the RFC 4795 §2.1-conservative reading), rather than
/// accepting any opcode as `original_source/lib/CycloneTCP/llmnr/llmnr_client.c`
/// does — [`super::passes_common_filter`] already enforces `opcode == QUERY`.
pub fn on_response(cache: &mut Cache, iface: IfaceId, buf: &[u8], now: Timestamp) {
	if let Err(err) = try_on_response(cache, iface, buf, now) {
		debug!("dropping malformed LLMNR response: {err}");
	}
}

fn try_on_response(cache: &mut Cache, iface: IfaceId, buf: &[u8], now: Timestamp) -> Result<()> {
	let header = Header::decode(buf)?;

	if !super::passes_common_filter(header.flags) {
		return Ok(());
	}

	let (question, mut offset) = rr::decode_question(buf, Header::LEN)?;

	let ty = match question.ty {
		rtype::A => QueryType::Ipv4,
		rtype::AAAA => QueryType::Ipv6,
		_ => return Ok(()),
	};

	let key = CacheKey { iface, name: question.name, ty, protocol: Protocol::Llmnr };

	let in_flight = cache.lookup(&key).is_some_and(|e| e.txid == header.id && e.state == State::InProgress);
	if !in_flight {
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

	fn entry(name: &str, txid: u16) -> Entry {
		Entry {
			key: CacheKey { iface: 0, name: name.to_owned(), ty: QueryType::Ipv4, protocol: Protocol::Llmnr },
			state: State::InProgress,
			dns_server_num: 0,
			local_port: 0,
			txid,
			addr: None,
			timestamp: 0,
			timeout: config::llmnr::INIT_TIMEOUT,
			max_timeout: config::llmnr::MAX_TIMEOUT,
			retransmit_count: config::llmnr::MAX_RETRIES - 1,
		}
	}

	#[test]
	fn sends_to_multicast_group() {
		let mut transport = MockTransport::new();
		send_query(&mut transport, &entry("workstation", 42)).unwrap();

		let sent = transport.drain_sent();
		assert_eq!(sent[0].dst, "224.0.0.252:5355".parse().unwrap());
	}

	#[test]
	fn non_query_opcode_is_rejected() {
		let mut cache = Cache::new();
		cache.insert(entry("workstation", 42));

		let mut buf = vec![0u8; 64];
		let header = Header { id: 42, flags: Flags { qr: true, opcode: 1, ..Default::default() }, qdcount: 1, ancount: 0, nscount: 0, arcount: 0 };
		header.encode(&mut buf[..Header::LEN]).unwrap();
		let q_len = rr::encode_question("workstation", rtype::A, class::IN, false, Some(&mut buf[Header::LEN..])).unwrap();
		buf.truncate(Header::LEN + q_len);

		on_response(&mut cache, 0, &buf, 10);

		let key = CacheKey { iface: 0, name: "workstation".into(), ty: QueryType::Ipv4, protocol: Protocol::Llmnr };
		assert_eq!(cache.lookup(&key).unwrap().state, State::InProgress);
	}
}
