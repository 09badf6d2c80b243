//! mDNS resolver client: queries `*.local` names over the mDNS multicast
//! group (§4.4 "mDNS"). Separate from [`crate::responder`], which answers
//! other hosts' queries and defends this host's own records — both paths
//! share the same port and are fed the same inbound packets by the stack.

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
		IpAddr::V6(config::mdns::GROUP_V6)
	} else {
		IpAddr::V4(config::mdns::GROUP_V4)
	}
}

/// Builds and sends an mDNS query: `id=0, opcode=QUERY, qr=0`, to the mDNS
/// multicast group on port 5353 (§4.4 "Per-protocol query construction").
pub fn send_query<T: Transport>(transport: &mut T, entry: &Entry) -> Result<()> {
	let header = Header { id: 0, flags: Flags { qr: false, opcode: rr::opcode::QUERY, ..Default::default() }, qdcount: 1, ancount: 0, nscount: 0, arcount: 0 };

	let question_len = rr::encode_question(&entry.key.name, qtype(entry.key.ty), class::IN, false, None)?;
	let total = Header::LEN + question_len;

	let (mut buf, offset) = transport.alloc_udp_buffer(total);
	header.encode(&mut buf[offset..offset + Header::LEN])?;
	rr::encode_question(&entry.key.name, qtype(entry.key.ty), class::IN, false, Some(&mut buf[offset + Header::LEN..offset + total]))?;

	let dst = SocketAddr::new(group_addr(entry.key.ty), config::mdns::PORT);
	transport.send_udp(entry.key.iface, config::mdns::PORT, dst, &buf, offset, Ancillary::default())
}

/// Accepts an inbound packet as a response to an outstanding mDNS query.
/// Per §4.4's mDNS-specific source check: accepted if the destination was
/// the multicast group, the source is link-local, or the source is on-link
/// — approximated here as "accept unconditionally", since on-link routing
/// state belongs to the out-of-scope IP layer (§1); the transport adapter is
/// trusted to only deliver packets that arrived on this interface.
pub fn on_response(cache: &mut Cache, iface: IfaceId, buf: &[u8], now: Timestamp) {
	if let Err(err) = try_on_response(cache, iface, buf, now) {
		debug!("dropping malformed mDNS packet: {err}");
	}
}

fn try_on_response(cache: &mut Cache, iface: IfaceId, buf: &[u8], now: Timestamp) -> Result<()> {
	let header = Header::decode(buf)?;

	if !super::passes_common_filter(header.flags) || header.qdcount != 0 {
		return Ok(());
	}

	let mut offset = Header::LEN;

	for _ in 0..header.ancount {
		let (name, after_name) = crate::codec::name::decode(buf, offset)?;
		let rr_header = rr::RrHeader::decode(buf, after_name)?;
		let rdata_start = after_name + rr::RrHeader::LEN;
		offset = rdata_start + rr_header.rdlength as usize;

		if rr_header.class != class::IN {
			continue;
		}

		let ty = match rr_header.ty {
			rtype::A => QueryType::Ipv4,
			rtype::AAAA => QueryType::Ipv6,
			_ => continue,
		};

		let key = CacheKey { iface, name, ty, protocol: Protocol::Mdns };
		let matches = cache.lookup(&key).is_some_and(|e| e.state == State::InProgress);
		if !matches {
			continue;
		}

		let addr = match rr::decode_rdata(buf, rr_header.ty, rdata_start, rr_header.rdlength as usize)? {
			Rdata::A(addr) => IpAddr::V4(addr),
			Rdata::Aaaa(addr) => IpAddr::V6(addr),
			_ => continue,
		};

		if let Some(entry) = cache.lookup_mut(&key) {
			super::apply_answer(entry, addr, rr_header.ttl, now);
		}
	}

	Ok(())
}
