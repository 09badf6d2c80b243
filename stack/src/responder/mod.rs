//! The mDNS probe/announce/defend state machine (§4.5), one [`Responder`]
//! per interface. Separate from [`crate::resolve::mdns`], which issues
//! queries on this host's behalf rather than defending its own records.

pub mod dnssd;

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use log::{debug, warn};

use crate::cache::Timestamp;
use crate::codec::name;
use crate::codec::rr::{self, class, rtype, Flags, Header, RrHeader};
use crate::config;
use crate::error::{Error, Result};
use crate::prng::Prng;
use crate::transport::{Ancillary, IfaceId, Transport};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsmState {
	Init,
	Waiting,
	Probing,
	Announcing,
	Idle,
}

struct Pending {
	types: Vec<u16>,
	deadline: Timestamp,
}

/// One interface's mDNS responder context (§3 "mDNS responder context").
pub struct Responder {
	iface: IfaceId,
	hostname: String,
	state: FsmState,
	next_transition: Timestamp,
	waiting_since: Timestamp,
	retransmit_count: u32,
	conflict: bool,
	tie_break_lost: bool,
	ipv4: Option<Ipv4Addr>,
	ipv6: Option<Ipv6Addr>,
	pending: Option<Pending>,
}

impl Responder {
	pub fn new(iface: IfaceId, hostname: impl Into<String>) -> Self {
		Self {
			iface,
			hostname: hostname.into(),
			state: FsmState::Init,
			next_transition: 0,
			waiting_since: 0,
			retransmit_count: 0,
			conflict: false,
			tie_break_lost: false,
			ipv4: None,
			ipv6: None,
			pending: None,
		}
	}

	pub fn fqdn(&self) -> String {
		format!("{}.local", self.hostname)
	}

	pub fn hostname(&self) -> &str {
		&self.hostname
	}

	pub fn state(&self) -> FsmState {
		self.state
	}

	/// INIT -> WAITING (§4.5's transition table): joins both mDNS groups and
	/// starts the WAITING clock.
	pub fn on_link_up<T: Transport>(&mut self, transport: &mut T, now: Timestamp) -> Result<()> {
		transport.join_multicast(self.iface, IpAddr::V4(config::mdns::GROUP_V4))?;
		transport.join_multicast(self.iface, IpAddr::V6(config::mdns::GROUP_V6))?;
		self.state = FsmState::Waiting;
		self.waiting_since = now;
		self.next_transition = now;
		Ok(())
	}

	/// Any state -> INIT on a link-change event.
	pub fn on_link_down(&mut self) {
		self.state = FsmState::Init;
		self.pending = None;
	}

	pub fn set_ipv4(&mut self, addr: Option<Ipv4Addr>) {
		self.ipv4 = addr;
	}

	pub fn set_ipv6(&mut self, addr: Option<Ipv6Addr>) {
		self.ipv6 = addr;
	}

	fn address_records(&self) -> Vec<(u16, Vec<u8>)> {
		let mut records = Vec::new();
		if let Some(addr) = self.ipv4 {
			records.push((rtype::A, addr.octets().to_vec()));
		}
		if let Some(addr) = self.ipv6 {
			records.push((rtype::AAAA, addr.octets().to_vec()));
		}
		records
	}

	fn multicast_targets(&self) -> Vec<IpAddr> {
		let mut targets = Vec::new();
		if self.ipv4.is_some() {
			targets.push(IpAddr::V4(config::mdns::GROUP_V4));
		}
		if self.ipv6.is_some() {
			targets.push(IpAddr::V6(config::mdns::GROUP_V6));
		}
		targets
	}

	fn begin_probing(&mut self, prng: &mut Prng, now: Timestamp) {
		self.state = FsmState::Probing;
		self.retransmit_count = 0;
		self.conflict = false;
		self.tie_break_lost = false;
		self.pending = None;

		let min = config::mdns::RAND_DELAY_MIN.as_millis() as u32;
		let max = config::mdns::RAND_DELAY_MAX.as_millis() as u32;
		let delay = prng.rand_range(min, max) as Timestamp;
		self.next_transition = now + delay;
	}

	fn begin_announcing(&mut self, now: Timestamp) {
		self.state = FsmState::Announcing;
		self.retransmit_count = 0;
		self.next_transition = now;
	}

	/// Drives §4.5's transition table and timing. Must be called on every
	/// stack tick regardless of `next_transition`, since a pending
	/// aggregated response may come due between FSM transitions.
	pub fn tick<T: Transport>(&mut self, transport: &mut T, prng: &mut Prng, now: Timestamp) {
		self.flush_pending(transport, now);

		if now < self.next_transition {
			return;
		}

		match self.state {
			FsmState::Init => {}

			FsmState::Waiting => {
				let both_ready = self.ipv4.is_some() && self.ipv6.is_some();
				let waited_enough = now.saturating_sub(self.waiting_since) >= config::mdns::MAX_WAITING_DELAY.as_millis() as Timestamp;

				if (self.ipv4.is_some() || self.ipv6.is_some()) && (both_ready || waited_enough) {
					self.begin_probing(prng, now);
				}
			}

			FsmState::Probing => {
				if self.conflict {
					self.conflict = false;

					match rename_on_conflict(&self.hostname) {
						Ok(renamed) => self.hostname = renamed,
						Err(_) => warn!("cannot rename {} further, retrying probe under the same name", self.hostname),
					}

					self.begin_probing(prng, now);
					return;
				}

				if self.tie_break_lost {
					self.tie_break_lost = false;
					return;
				}

				if self.retransmit_count >= config::mdns::PROBE_NUM {
					self.begin_announcing(now);
					return;
				}

				if self.send_probe(transport).is_err() {
					warn!("failed to send mDNS probe for {}", self.hostname);
				}

				self.retransmit_count += 1;
				self.next_transition = now + config::mdns::PROBE_DELAY.as_millis() as Timestamp;
			}

			FsmState::Announcing => {
				if self.conflict {
					self.conflict = false;
					self.begin_probing(prng, now);
					return;
				}

				if self.retransmit_count >= config::mdns::ANNOUNCE_NUM {
					self.state = FsmState::Idle;
					return;
				}

				if self.send_announcement(transport, config::mdns::UNIQUE_RECORD_TTL).is_err() {
					warn!("failed to send mDNS announcement for {}", self.hostname);
				}

				let interval = config::mdns::ANNOUNCE_DELAY.as_millis() as Timestamp * (1u64 << self.retransmit_count);
				self.retransmit_count += 1;
				self.next_transition = now + interval;
			}

			FsmState::Idle => {
				if self.conflict {
					self.conflict = false;
					self.begin_probing(prng, now);
				}
			}
		}
	}

	/// Sends the withdrawal announcement (TTL=0) for graceful shutdown.
	pub fn goodbye<T: Transport>(&mut self, transport: &mut T) -> Result<()> {
		self.send_announcement(transport, 0)
	}

	fn schedule(&mut self, types: Vec<u16>, deadline: Timestamp) {
		match &mut self.pending {
			Some(pending) => {
				for ty in types {
					if !pending.types.contains(&ty) {
						pending.types.push(ty);
					}
				}
				pending.deadline = pending.deadline.min(deadline);
			}
			None => self.pending = Some(Pending { types, deadline }),
		}
	}

	fn flush_pending<T: Transport>(&mut self, transport: &mut T, now: Timestamp) {
		let due = matches!(&self.pending, Some(p) if now >= p.deadline);
		if !due {
			return;
		}

		let types = self.pending.take().unwrap().types;
		let dest = SocketAddr::new(IpAddr::V4(config::mdns::GROUP_V4), config::mdns::PORT);

		if self.send_answer(transport, dest, &types, true, config::mdns::UNIQUE_RECORD_TTL).is_err() {
			warn!("failed to flush pending mDNS answer for {}", self.hostname);
		}
	}

	/// Conflict detection (§4.5): any unsolicited answer naming our FQDN
	/// with a type we claim but different rdata sets the conflict flag.
	pub fn on_response(&mut self, buf: &[u8], now: Timestamp) {
		if let Err(err) = self.try_on_response(buf, now) {
			debug!("dropping malformed mDNS response: {err}");
		}
	}

	fn try_on_response(&mut self, buf: &[u8], _now: Timestamp) -> Result<()> {
		let header = Header::decode(buf)?;
		if !header.flags.qr {
			return Ok(());
		}

		let mut offset = Header::LEN;
		for _ in 0..header.qdcount {
			let (_, next) = rr::decode_question(buf, offset)?;
			offset = next;
		}

		let fqdn = self.fqdn();

		for _ in 0..header.ancount {
			let (rr_name, after_name) = name::decode(buf, offset)?;
			let rr_header = RrHeader::decode(buf, after_name)?;
			let rdata_start = after_name + RrHeader::LEN;
			offset = rdata_start + rr_header.rdlength as usize;

			if !rr_name.eq_ignore_ascii_case(&fqdn) || rr_header.class != class::IN {
				continue;
			}

			let rdata = buf.get(rdata_start..offset).ok_or(Error::TruncatedMessage)?;

			for (ty, ours) in self.address_records() {
				if ty == rr_header.ty && ours != rdata {
					self.conflict = true;
				}
			}
		}

		Ok(())
	}

	/// Handles an inbound query: answers it (subject to known-answer
	/// suppression and aggregation), or — if we are PROBING and the query
	/// carries tentative records of its own in the Authority Section —
	/// performs the probe tie-break instead.
	pub fn on_query<T: Transport>(&mut self, transport: &mut T, prng: &mut Prng, src: SocketAddr, buf: &[u8], now: Timestamp) {
		if let Err(err) = self.try_on_query(transport, prng, src, buf, now) {
			debug!("dropping malformed mDNS query: {err}");
		}
	}

	fn try_on_query<T: Transport>(&mut self, transport: &mut T, prng: &mut Prng, src: SocketAddr, buf: &[u8], now: Timestamp) -> Result<()> {
		let header = Header::decode(buf)?;
		if header.flags.qr || header.flags.opcode != rr::opcode::QUERY {
			return Ok(());
		}

		let fqdn = self.fqdn();
		let mut offset = Header::LEN;
		let mut wants: Vec<u16> = Vec::new();

		for _ in 0..header.qdcount {
			let (question, next) = rr::decode_question(buf, offset)?;
			offset = next;

			if !question.name.eq_ignore_ascii_case(&fqdn) {
				continue;
			}

			match question.ty {
				rtype::A if self.ipv4.is_some() => wants.push(rtype::A),
				rtype::AAAA if self.ipv6.is_some() => wants.push(rtype::AAAA),
				rtype::ANY => {
					if self.ipv4.is_some() {
						wants.push(rtype::A);
					}
					if self.ipv6.is_some() {
						wants.push(rtype::AAAA);
					}
				}
				_ => {}
			}
		}

		for _ in 0..header.nscount {
			let (rr_name, after_name) = name::decode(buf, offset)?;
			let rr_header = RrHeader::decode(buf, after_name)?;
			let rdata_start = after_name + RrHeader::LEN;
			offset = rdata_start + rr_header.rdlength as usize;

			if self.state == FsmState::Probing && rr_name.eq_ignore_ascii_case(&fqdn) {
				let rdata = buf.get(rdata_start..offset).ok_or(Error::TruncatedMessage)?;
				self.handle_tie_break(&rr_header, rdata, now);
			}
		}

		if wants.is_empty() || self.state == FsmState::Probing {
			return Ok(());
		}

		for _ in 0..header.ancount {
			let (rr_name, after_name) = name::decode(buf, offset)?;
			let rr_header = RrHeader::decode(buf, after_name)?;
			offset = after_name + RrHeader::LEN + rr_header.rdlength as usize;

			if rr_name.eq_ignore_ascii_case(&fqdn) && u64::from(rr_header.ttl) * 2 >= u64::from(config::mdns::UNIQUE_RECORD_TTL) {
				wants.retain(|&ty| ty != rr_header.ty);
			}
		}

		if wants.is_empty() {
			return Ok(());
		}

		if src.port() != config::mdns::PORT {
			// Legacy unicast querier (§4.5): answer immediately, TTL
			// clamped, cache-flush cleared, unicast to the exact source.
			return self.send_answer(transport, src, &wants, false, config::mdns::LEGACY_UNICAST_RR_TTL);
		}

		if header.flags.tc {
			let min = config::mdns::KNOWN_ANSWER_DELAY_MIN.as_millis() as u32;
			let max = config::mdns::KNOWN_ANSWER_DELAY_MAX.as_millis() as u32;
			let delay = prng.rand_range(min, max) as Timestamp;
			self.schedule(wants, now + delay);
			Ok(())
		} else {
			let dest = SocketAddr::new(IpAddr::V4(config::mdns::GROUP_V4), config::mdns::PORT);
			self.send_answer(transport, dest, &wants, true, config::mdns::UNIQUE_RECORD_TTL)
		}
	}

	fn handle_tie_break(&mut self, their_header: &RrHeader, their_rdata: &[u8], now: Timestamp) {
		for (ty, our_rdata) in self.address_records() {
			if ty != their_header.ty {
				continue;
			}

			let ours = (class::IN, ty, our_rdata.as_slice());
			let theirs = (their_header.class, their_header.ty, their_rdata);

			if ours < theirs {
				self.tie_break_lost = true;
				self.next_transition = now + config::mdns::PROBE_DEFER.as_millis() as Timestamp;
			}
		}
	}

	fn send_probe<T: Transport>(&self, transport: &mut T) -> Result<()> {
		let fqdn = self.fqdn();
		let records = self.address_records();

		let header = Header { id: 0, flags: Flags { qr: false, opcode: rr::opcode::QUERY, ..Default::default() }, qdcount: 1, ancount: 0, nscount: records.len() as u16, arcount: 0 };

		let q_len = rr::encode_question(&fqdn, rtype::ANY, class::IN, true, None)?;
		let mut total = Header::LEN + q_len;
		for (_, rdata) in &records {
			total += name::encode(&fqdn, None)? + RrHeader::LEN + rdata.len();
		}

		let (mut buf, offset) = transport.alloc_udp_buffer(total);
		header.encode(&mut buf[offset..offset + Header::LEN])?;
		let mut pos = offset + Header::LEN;
		pos += rr::encode_question(&fqdn, rtype::ANY, class::IN, true, Some(&mut buf[pos..offset + total]))?;

		for (ty, rdata) in &records {
			pos += name::encode(&fqdn, Some(&mut buf[pos..]))?;
			let rr_header = RrHeader { ty: *ty, class: class::IN, cache_flush: false, ttl: config::mdns::UNIQUE_RECORD_TTL, rdlength: rdata.len() as u16 };
			rr_header.encode(&mut buf[pos..pos + RrHeader::LEN])?;
			pos += RrHeader::LEN;
			buf[pos..pos + rdata.len()].copy_from_slice(rdata);
			pos += rdata.len();
		}

		for dest_ip in self.multicast_targets() {
			transport.send_udp(self.iface, config::mdns::PORT, SocketAddr::new(dest_ip, config::mdns::PORT), &buf, offset, Ancillary { ttl: Some(config::mdns::DEFAULT_IP_TTL), dont_route: true, dscp: None })?;
		}

		Ok(())
	}

	fn send_announcement<T: Transport>(&self, transport: &mut T, ttl: u32) -> Result<()> {
		let fqdn = self.fqdn();
		let mut records: Vec<(String, u16, Vec<u8>)> = Vec::new();

		if let Some(addr) = self.ipv4 {
			records.push((fqdn.clone(), rtype::A, addr.octets().to_vec()));
			records.push((reverse_name_v4(addr), rtype::PTR, encode_name_bytes(&fqdn)?));
		}

		if let Some(addr) = self.ipv6 {
			records.push((fqdn.clone(), rtype::AAAA, addr.octets().to_vec()));
			records.push((reverse_name_v6(addr), rtype::PTR, encode_name_bytes(&fqdn)?));
		}

		let header = Header { id: 0, flags: Flags { qr: true, aa: true, opcode: rr::opcode::QUERY, ..Default::default() }, qdcount: 0, ancount: records.len() as u16, nscount: 0, arcount: 0 };

		let mut total = Header::LEN;
		for (owner, _, rdata) in &records {
			total += name::encode(owner, None)? + RrHeader::LEN + rdata.len();
		}

		let (mut buf, offset) = transport.alloc_udp_buffer(total);
		header.encode(&mut buf[offset..offset + Header::LEN])?;
		let mut pos = offset + Header::LEN;

		for (owner, ty, rdata) in &records {
			pos += name::encode(owner, Some(&mut buf[pos..]))?;
			let rr_header = RrHeader { ty: *ty, class: class::IN, cache_flush: true, ttl, rdlength: rdata.len() as u16 };
			rr_header.encode(&mut buf[pos..pos + RrHeader::LEN])?;
			pos += RrHeader::LEN;
			buf[pos..pos + rdata.len()].copy_from_slice(rdata);
			pos += rdata.len();
		}

		for dest_ip in self.multicast_targets() {
			transport.send_udp(self.iface, config::mdns::PORT, SocketAddr::new(dest_ip, config::mdns::PORT), &buf, offset, Ancillary { ttl: Some(config::mdns::DEFAULT_IP_TTL), dont_route: true, dscp: None })?;
		}

		Ok(())
	}

	/// Answers a query directly: the records requested, plus the
	/// complementary address type and an NSEC synthesizing what else exists
	/// on this name (§4.5 "Additional records").
	fn send_answer<T: Transport>(&self, transport: &mut T, dest: SocketAddr, types: &[u16], cache_flush: bool, ttl: u32) -> Result<()> {
		let fqdn = self.fqdn();

		let records: Vec<(u16, Vec<u8>)> = types
			.iter()
			.filter_map(|&ty| match ty {
				rtype::A => self.ipv4.map(|a| (rtype::A, a.octets().to_vec())),
				rtype::AAAA => self.ipv6.map(|a| (rtype::AAAA, a.octets().to_vec())),
				_ => None,
			})
			.collect();

		if records.is_empty() {
			return Ok(());
		}

		let answered: Vec<u16> = records.iter().map(|(ty, _)| *ty).collect();
		let all_present: Vec<u16> = self.address_records().iter().map(|(ty, _)| *ty).collect();

		let additional: Vec<(u16, Vec<u8>)> = self
			.address_records()
			.into_iter()
			.filter(|(ty, _)| !answered.contains(ty))
			.collect();

		// Fewer than both {A, AAAA} exist on this host at all: say so, so a
		// querier asking ANY doesn't keep retrying for the missing family.
		let nsec_rdata = if all_present.len() < 2 { Some(build_nsec_rdata(&fqdn, &all_present)?) } else { None };

		let arcount = additional.len() as u16 + nsec_rdata.is_some() as u16;

		let header = Header { id: 0, flags: Flags { qr: true, aa: true, opcode: rr::opcode::QUERY, ..Default::default() }, qdcount: 0, ancount: records.len() as u16, nscount: 0, arcount };

		let mut total = Header::LEN;
		for (_, rdata) in records.iter().chain(additional.iter()) {
			total += name::encode(&fqdn, None)? + RrHeader::LEN + rdata.len();
		}
		if let Some(rdata) = &nsec_rdata {
			total += name::encode(&fqdn, None)? + RrHeader::LEN + rdata.len();
		}

		let (mut buf, offset) = transport.alloc_udp_buffer(total);
		header.encode(&mut buf[offset..offset + Header::LEN])?;
		let mut pos = offset + Header::LEN;

		for (ty, rdata) in &records {
			pos += name::encode(&fqdn, Some(&mut buf[pos..]))?;
			let rr_header = RrHeader { ty: *ty, class: class::IN, cache_flush, ttl, rdlength: rdata.len() as u16 };
			rr_header.encode(&mut buf[pos..pos + RrHeader::LEN])?;
			pos += RrHeader::LEN;
			buf[pos..pos + rdata.len()].copy_from_slice(rdata);
			pos += rdata.len();
		}

		for (ty, rdata) in &additional {
			pos += name::encode(&fqdn, Some(&mut buf[pos..]))?;
			let rr_header = RrHeader { ty: *ty, class: class::IN, cache_flush, ttl, rdlength: rdata.len() as u16 };
			rr_header.encode(&mut buf[pos..pos + RrHeader::LEN])?;
			pos += RrHeader::LEN;
			buf[pos..pos + rdata.len()].copy_from_slice(rdata);
			pos += rdata.len();
		}

		if let Some(rdata) = &nsec_rdata {
			pos += name::encode(&fqdn, Some(&mut buf[pos..]))?;
			let rr_header = RrHeader { ty: rtype::NSEC, class: class::IN, cache_flush, ttl, rdlength: rdata.len() as u16 };
			rr_header.encode(&mut buf[pos..pos + RrHeader::LEN])?;
			pos += RrHeader::LEN;
			buf[pos..pos + rdata.len()].copy_from_slice(rdata);
			pos += rdata.len();
		}

		let _ = pos;

		transport.send_udp(self.iface, config::mdns::PORT, dest, &buf, offset, Ancillary { ttl: Some(config::mdns::DEFAULT_IP_TTL), dont_route: true, dscp: None })
	}
}

/// §9 open question 2: rejects (falls back to appending "-2") rather than
/// truncating when incrementing a numeric suffix would overflow the
/// hostname length bound.
pub fn rename_on_conflict(name: &str) -> Result<String> {
	let digit_start = name.rfind(|c: char| !c.is_ascii_digit()).map_or(0, |i| i + 1);
	let (prefix, digits) = name.split_at(digit_start);

	let renamed = if digits.is_empty() {
		format!("{name}2")
	} else {
		let width = digits.len();
		let value: u64 = digits.parse().map_err(|_| Error::InvalidParameter)?;
		let incremented = value.checked_add(1).ok_or(Error::InvalidParameter)?;
		let grown = format!("{incremented:0width$}", width = width);

		if grown.len() > width {
			format!("{name}-2")
		} else {
			format!("{prefix}{grown}")
		}
	};

	if renamed.len() > config::mdns::RESPONDER_MAX_HOSTNAME_LEN {
		return Err(Error::InvalidParameter);
	}

	Ok(renamed)
}

fn reverse_name_v4(addr: Ipv4Addr) -> String {
	let o = addr.octets();
	format!("{}.{}.{}.{}.in-addr.arpa", o[3], o[2], o[1], o[0])
}

fn reverse_name_v6(addr: Ipv6Addr) -> String {
	let mut out = String::new();
	for byte in addr.octets().iter().rev() {
		out.push_str(&format!("{:x}.{:x}.", byte & 0xF, byte >> 4));
	}
	out.push_str("ip6.arpa");
	out
}

fn encode_name_bytes(name_str: &str) -> Result<Vec<u8>> {
	let len = name::encode(name_str, None)?;
	let mut buf = vec![0u8; len];
	name::encode(name_str, Some(&mut buf))?;
	Ok(buf)
}

/// Builds NSEC rdata (RFC 4034 §4.1) advertising which of {A, AAAA, SRV,
/// TXT} exist on `name_str`, so queriers learn that absent types truly do
/// not exist rather than the host simply not answering yet (§4.5
/// "Additional records").
fn build_nsec_rdata(name_str: &str, present: &[u16]) -> Result<Vec<u8>> {
	let mut rdata = encode_name_bytes(name_str)?;
	rdata.extend(encode_nsec_windows(present));
	Ok(rdata)
}

fn encode_nsec_windows(types: &[u16]) -> Vec<u8> {
	let mut windows: BTreeMap<u8, [u8; 32]> = BTreeMap::new();

	for &ty in types {
		let window = (ty / 256) as u8;
		let bit = (ty % 256) as usize;
		let bitmap = windows.entry(window).or_insert([0u8; 32]);
		bitmap[bit / 8] |= 0x80 >> (bit % 8);
	}

	let mut out = Vec::new();
	for (window, bitmap) in windows {
		let len = bitmap.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
		if len == 0 {
			continue;
		}
		out.push(window);
		out.push(len as u8);
		out.extend_from_slice(&bitmap[..len]);
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::mock::MockTransport;

	fn linked_up(hostname: &str) -> (Responder, MockTransport, Prng) {
		let mut responder = Responder::new(0, hostname);
		let mut transport = MockTransport::new();
		let mut prng = Prng::default();
		prng.init_rand(1, [2; 8]);

		responder.on_link_up(&mut transport, 0).unwrap();
		responder.set_ipv4(Some("192.0.2.10".parse().unwrap()));
		responder.set_ipv6(Some("fe80::1".parse().unwrap()));
		transport.drain_sent();

		(responder, transport, prng)
	}

	#[test]
	fn probes_three_times_then_announces_twice() {
		let (mut responder, mut transport, mut prng) = linked_up("dev");

		// WAITING -> PROBING (random delay), then PROBE_NUM probes 250ms apart.
		let mut now: Timestamp = 0;
		for _ in 0..20 {
			responder.tick(&mut transport, &mut prng, now);
			now += 50;
			if responder.state() == FsmState::Probing {
				break;
			}
		}
		assert_eq!(responder.state(), FsmState::Probing);

		let mut probes = 0;
		for _ in 0..20 {
			responder.tick(&mut transport, &mut prng, now);
			now += config::mdns::PROBE_DELAY.as_millis() as Timestamp;
			if !transport.sent.is_empty() {
				probes += transport.drain_sent().len();
			}
			if responder.state() == FsmState::Announcing {
				break;
			}
		}

		assert_eq!(probes, (config::mdns::PROBE_NUM as usize) * 2); // one per address family
		assert_eq!(responder.state(), FsmState::Announcing);

		let mut announcements = 0;
		for _ in 0..10 {
			responder.tick(&mut transport, &mut prng, now);
			now += config::mdns::ANNOUNCE_DELAY.as_millis() as Timestamp * 4;
			announcements += transport.drain_sent().len();
			if responder.state() == FsmState::Idle {
				break;
			}
		}

		assert_eq!(responder.state(), FsmState::Idle);
		assert_eq!(announcements, (config::mdns::ANNOUNCE_NUM as usize) * 2);
	}

	#[test]
	fn conflict_during_probe_renames_and_restarts() {
		let (mut responder, mut transport, mut prng) = linked_up("dev");

		let mut now: Timestamp = 0;
		for _ in 0..10 {
			responder.tick(&mut transport, &mut prng, now);
			now += 50;
			if responder.state() == FsmState::Probing {
				break;
			}
		}
		transport.drain_sent();

		let mut buf = vec![0u8; 128];
		let header = Header { id: 0, flags: Flags { qr: true, ..Default::default() }, qdcount: 0, ancount: 1, nscount: 0, arcount: 0 };
		header.encode(&mut buf[..Header::LEN]).unwrap();
		let mut pos = Header::LEN;
		pos += name::encode("dev.local", Some(&mut buf[pos..])).unwrap();
		let rr_header = RrHeader { ty: rtype::A, class: class::IN, cache_flush: true, ttl: 120, rdlength: 4 };
		rr_header.encode(&mut buf[pos..pos + RrHeader::LEN]).unwrap();
		pos += RrHeader::LEN;
		buf[pos..pos + 4].copy_from_slice(&[192, 0, 2, 99]);
		pos += 4;
		buf.truncate(pos);

		responder.on_response(&buf, now);
		responder.tick(&mut transport, &mut prng, now);

		assert_eq!(responder.hostname(), "dev2");
		assert_eq!(responder.state(), FsmState::Probing);
	}

	#[test]
	fn legacy_unicast_query_gets_immediate_unclamped_response() {
		let (mut responder, mut transport, mut prng) = linked_up("dev");
		responder.tick(&mut transport, &mut prng, 0);
		transport.drain_sent();

		// Force straight to IDLE so queries are answered.
		while responder.state() != FsmState::Idle {
			responder.tick(&mut transport, &mut prng, 1_000_000);
		}
		transport.drain_sent();

		let mut buf = vec![0u8; 64];
		let header = Header { id: 0, flags: Flags::default(), qdcount: 1, ancount: 0, nscount: 0, arcount: 0 };
		header.encode(&mut buf[..Header::LEN]).unwrap();
		let q_len = rr::encode_question("dev.local", rtype::A, class::IN, false, Some(&mut buf[Header::LEN..])).unwrap();
		buf.truncate(Header::LEN + q_len);

		let src: SocketAddr = "203.0.113.5:54321".parse().unwrap();
		responder.on_query(&mut transport, &mut prng, src, &buf, 1_000_000);

		let sent = transport.drain_sent();
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].dst, src);

		let rr_header = RrHeader::decode(&sent[0].buf, Header::LEN + name::encode("dev.local", None).unwrap()).unwrap();
		assert_eq!(rr_header.ttl, config::mdns::LEGACY_UNICAST_RR_TTL);
		assert!(!rr_header.cache_flush);
	}

	#[test]
	fn rename_increments_zero_padded_suffix() {
		assert_eq!(rename_on_conflict("dev").unwrap(), "dev2");
		assert_eq!(rename_on_conflict("dev2").unwrap(), "dev3");
		assert_eq!(rename_on_conflict("dev09").unwrap(), "dev10");
	}

	#[test]
	fn rename_falls_back_to_dash_two_rather_than_truncate_on_overflow() {
		assert_eq!(rename_on_conflict("dev9").unwrap(), "dev9-2");
	}
}
