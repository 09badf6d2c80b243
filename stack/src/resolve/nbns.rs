//! NBNS ("NetBIOS Name Service") client: query construction and response
//! parsing (§4.4 "NBNS"). Names are nibble-encoded per [`crate::codec::nbns`]
//! rather than the dotted-label scheme the other three protocols share.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use log::debug;

use crate::cache::{Cache, CacheKey, Entry, Protocol, QueryType, State, Timestamp};
use crate::codec::nbns as name_codec;
use crate::codec::rr::{self, class, rtype, Flags, Header};
use crate::config;
use crate::error::{Error, Result};
use crate::transport::{Ancillary, IfaceId, Transport};

/// Builds and sends a name query: `id=entry.id`, the NBNS broadcast flag
/// set, `QTYPE=NB, QCLASS=IN`, to the interface's IPv4 directed broadcast
/// address on port 137 (§4.4 "Per-protocol query construction").
pub fn send_query<T: Transport>(transport: &mut T, entry: &Entry) -> Result<()> {
	let broadcast = transport.broadcast_addr(entry.key.iface).ok_or(Error::InvalidAddress)?;

	let header = Header { id: entry.txid, flags: Flags { qr: false, opcode: rr::opcode::QUERY, b: true, ..Default::default() }, qdcount: 1, ancount: 0, nscount: 0, arcount: 0 };

	let name_len = name_codec::encode(&entry.key.name, None)?;
	let total = Header::LEN + name_len + 4;

	let (mut buf, offset) = transport.alloc_udp_buffer(total);
	if buf.len() < offset + total {
		return Err(Error::MessageTooLong);
	}

	header.encode(&mut buf[offset..offset + Header::LEN])?;
	let name_start = offset + Header::LEN;
	name_codec::encode(&entry.key.name, Some(&mut buf[name_start..name_start + name_len]))?;

	let tail = name_start + name_len;
	buf[tail..tail + 2].copy_from_slice(&rtype::NB.to_be_bytes());
	buf[tail + 2..tail + 4].copy_from_slice(&class::IN.to_be_bytes());

	transport.send_udp(entry.key.iface, config::nbns::PORT, SocketAddr::new(IpAddr::V4(broadcast), config::nbns::PORT), &buf, offset, Ancillary::default())
}

/// Parses an inbound NBNS name-query response. Per the source's convention
/// these responses omit the question section and carry the queried name as
/// the owner name of the single NB answer record.
pub fn on_response(cache: &mut Cache, iface: IfaceId, buf: &[u8], now: Timestamp) {
	if let Err(err) = try_on_response(cache, iface, buf, now) {
		debug!("dropping malformed NBNS response: {err}");
	}
}

fn try_on_response(cache: &mut Cache, iface: IfaceId, buf: &[u8], now: Timestamp) -> Result<()> {
	let header = Header::decode(buf)?;

	if !super::passes_common_filter(header.flags) {
		return Ok(());
	}

	let mut offset = Header::LEN;

	for _ in 0..header.qdcount {
		offset += name_codec::WIRE_LEN + 4;
	}

	for _ in 0..header.ancount {
		let name_slice = buf.get(offset..offset + name_codec::WIRE_LEN).ok_or(Error::TruncatedMessage)?;
		let name = name_codec::decode(name_slice)?;
		offset += name_codec::WIRE_LEN;

		let rr_header = rr::RrHeader::decode(buf, offset)?;
		let rdata_start = offset + rr::RrHeader::LEN;
		offset = rdata_start + rr_header.rdlength as usize;

		if rr_header.ty != rtype::NB || rr_header.class != class::IN || rr_header.rdlength < 6 {
			continue;
		}

		let key = CacheKey { iface, name, ty: QueryType::Ipv4, protocol: Protocol::Nbns };

		let in_flight = cache.lookup(&key).is_some_and(|e| e.txid == header.id && e.state == State::InProgress);
		if !in_flight {
			continue;
		}

		let rdata = buf.get(rdata_start..rdata_start + 6).ok_or(Error::TruncatedMessage)?;
		let addr = IpAddr::V4(Ipv4Addr::new(rdata[2], rdata[3], rdata[4], rdata[5]));

		if let Some(entry) = cache.lookup_mut(&key) {
			super::apply_answer(entry, addr, rr_header.ttl, now);
		}
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::mock::MockTransport;

	fn entry(name: &str, txid: u16) -> Entry {
		Entry {
			key: CacheKey { iface: 0, name: name.to_owned(), ty: QueryType::Ipv4, protocol: Protocol::Nbns },
			state: State::InProgress,
			dns_server_num: 0,
			local_port: 0,
			txid,
			addr: None,
			timestamp: 0,
			timeout: config::nbns::INIT_TIMEOUT,
			max_timeout: config::nbns::MAX_TIMEOUT,
			retransmit_count: config::nbns::MAX_RETRIES - 1,
		}
	}

	#[test]
	fn sends_to_directed_broadcast_on_port_137() {
		let mut transport = MockTransport::new();
		transport.broadcast.insert(0, "192.0.2.255".parse().unwrap());

		send_query(&mut transport, &entry("PRINTER", 99)).unwrap();

		let sent = transport.drain_sent();
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].dst, "192.0.2.255:137".parse().unwrap());
		assert_eq!(sent[0].src_port, 137);
	}

	#[test]
	fn no_broadcast_address_fails_fast() {
		let mut transport = MockTransport::new();
		assert_eq!(send_query(&mut transport, &entry("PRINTER", 1)), Err(Error::InvalidAddress));
	}

	#[test]
	fn matching_answer_resolves_entry() {
		let mut cache = Cache::new();
		cache.insert(entry("PRINTER", 0xbeef));

		let mut buf = vec![0u8; config::DNS_MESSAGE_MAX_SIZE];
		let header = Header { id: 0xbeef, flags: Flags { qr: true, ..Default::default() }, qdcount: 0, ancount: 1, nscount: 0, arcount: 0 };
		header.encode(&mut buf[..Header::LEN]).unwrap();

		let mut offset = Header::LEN;
		name_codec::encode("PRINTER", Some(&mut buf[offset..offset + name_codec::WIRE_LEN])).unwrap();
		offset += name_codec::WIRE_LEN;

		let rr_header = rr::RrHeader { ty: rtype::NB, class: class::IN, cache_flush: false, ttl: 0, rdlength: 6 };
		rr_header.encode(&mut buf[offset..offset + rr::RrHeader::LEN]).unwrap();
		offset += rr::RrHeader::LEN;

		buf[offset] = 0;
		buf[offset + 1] = 0;
		buf[offset + 2..offset + 6].copy_from_slice(&[192, 0, 2, 42]);
		offset += 6;
		buf.truncate(offset);

		on_response(&mut cache, 0, &buf, 10);

		let key = CacheKey { iface: 0, name: "PRINTER".into(), ty: QueryType::Ipv4, protocol: Protocol::Nbns };
		let resolved = cache.lookup(&key).unwrap();
		assert_eq!(resolved.addr, Some("192.0.2.42".parse().unwrap()));
		assert_eq!(resolved.state, State::Resolved);
	}
}
