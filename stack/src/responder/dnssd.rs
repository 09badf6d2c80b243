//! DNS-SD (RFC 6763) service registration and the meta-query responder
//! (spec "DNS-SD"): a bounded table of `(instance, service, port, priority,
//! weight, txt)` tuples, each defended the way [`super::Responder`] defends
//! the host's own A/AAAA records, plus the `_services._dns-sd._udp.local`
//! enumeration PTR.

use std::net::{IpAddr, SocketAddr};

use log::{debug, warn};

use crate::cache::Timestamp;
use crate::codec::name;
use crate::codec::rr::{self, class, rtype, Flags, Header, RrHeader};
use crate::config;
use crate::error::{Error, Result};
use crate::prng::Prng;
use crate::transport::{Ancillary, IfaceId, Transport};

use super::FsmState;

const META_QUERY_NAME: &str = "_services._dns-sd._udp.local";

/// One registered service instance (spec "DNS-SD context").
#[derive(Clone, Debug)]
pub struct Service {
	pub instance: String,
	pub service_type: String,
	pub port: u16,
	pub priority: u16,
	pub weight: u16,
	pub txt: Vec<u8>,
	state: FsmState,
	retransmit_count: u32,
	next_transition: Timestamp,
	conflict: bool,
}

impl Service {
	fn fqdn(&self) -> String {
		format!("{}.{}.local", self.instance, self.service_type)
	}

	fn ptr_name(&self) -> String {
		format!("{}.local", self.service_type)
	}
}

/// The DNS-SD context (spec "DNS-SD context"): one per interface, alongside
/// that interface's [`super::Responder`].
pub struct Context {
	iface: IfaceId,
	hostname_fqdn: String,
	services: collections::sparse::slab::Slab<Service, { config::mdns::DNSSD_MAX_SERVICES }>,
}

impl Context {
	pub fn new(iface: IfaceId, hostname_fqdn: impl Into<String>) -> Self {
		Self { iface, hostname_fqdn: hostname_fqdn.into(), services: collections::sparse::slab::Slab::new() }
	}

	/// Registers a service, triggering a fresh probe of
	/// `instance._service._tcp.local` (spec "DNS-SD").
	pub fn register(&mut self, instance: &str, service_type: &str, port: u16, priority: u16, weight: u16, txt: Vec<u8>, prng: &mut Prng, now: Timestamp) -> Result<usize> {
		if txt.len() > config::mdns::DNSSD_MAX_TXT_LEN {
			return Err(Error::InvalidParameter);
		}

		let min = config::mdns::RAND_DELAY_MIN.as_millis() as u32;
		let max = config::mdns::RAND_DELAY_MAX.as_millis() as u32;
		let delay = prng.rand_range(min, max) as Timestamp;

		let service = Service {
			instance: instance.to_owned(),
			service_type: service_type.to_owned(),
			port,
			priority,
			weight,
			txt,
			state: FsmState::Probing,
			retransmit_count: 0,
			next_transition: now + delay,
			conflict: false,
		};

		self.services.insert(service).ok_or(Error::OutOfResources)
	}

	/// Sends a goodbye for the service and removes it from the table.
	pub fn unregister<T: Transport>(&mut self, transport: &mut T, idx: usize) -> Result<()> {
		if let Some(service) = self.services.get(idx) {
			self.send_records(transport, service, 0)?;
		}
		self.services.remove(idx);
		Ok(())
	}

	/// Drives every registered service's own probe/announce FSM, sharing
	/// [`super::Responder`]'s timing constants.
	pub fn tick<T: Transport>(&mut self, transport: &mut T, prng: &mut Prng, now: Timestamp) {
		let hostname_fqdn = self.hostname_fqdn.clone();
		let iface = self.iface;

		self.services.for_each_mut(|_, service| {
			if now < service.next_transition {
				return;
			}

			match service.state {
				FsmState::Probing => {
					if service.conflict {
						service.conflict = false;
						service.instance = match super::rename_on_conflict(&service.instance) {
							Ok(renamed) => renamed,
							Err(_) => {
								warn!("cannot rename service instance {} further", service.instance);
								service.instance.clone()
							}
						};
						service.retransmit_count = 0;
						let min = config::mdns::RAND_DELAY_MIN.as_millis() as u32;
						let max = config::mdns::RAND_DELAY_MAX.as_millis() as u32;
						service.next_transition = now + prng.rand_range(min, max) as Timestamp;
						return;
					}

					if service.retransmit_count >= config::mdns::PROBE_NUM {
						service.state = FsmState::Announcing;
						service.retransmit_count = 0;
						service.next_transition = now;
						return;
					}

					if send_probe(transport, iface, &service.fqdn()).is_err() {
						warn!("failed to send DNS-SD probe for {}", service.fqdn());
					}

					service.retransmit_count += 1;
					service.next_transition = now + config::mdns::PROBE_DELAY.as_millis() as Timestamp;
				}

				FsmState::Announcing => {
					if service.retransmit_count >= config::mdns::ANNOUNCE_NUM {
						service.state = FsmState::Idle;
						return;
					}

					if send_service_records(transport, iface, &hostname_fqdn, service, config::mdns::UNIQUE_RECORD_TTL).is_err() {
						warn!("failed to announce DNS-SD service {}", service.fqdn());
					}

					let interval = config::mdns::ANNOUNCE_DELAY.as_millis() as Timestamp * (1u64 << service.retransmit_count);
					service.retransmit_count += 1;
					service.next_transition = now + interval;
				}

				FsmState::Idle | FsmState::Init | FsmState::Waiting => {}
			}
		});
	}

	fn send_records<T: Transport>(&self, transport: &mut T, service: &Service, ttl: u32) -> Result<()> {
		send_service_records(transport, self.iface, &self.hostname_fqdn, service, ttl)
	}

	/// Answers `_services._dns-sd._udp.local PTR` with one PTR per
	/// distinct registered service type (spec "DNS-SD").
	pub fn on_query<T: Transport>(&mut self, transport: &mut T, src: SocketAddr, buf: &[u8], now: Timestamp) {
		if let Err(err) = self.try_on_query(transport, src, buf, now) {
			debug!("dropping malformed DNS-SD query: {err}");
		}
	}

	fn try_on_query<T: Transport>(&mut self, transport: &mut T, src: SocketAddr, buf: &[u8], _now: Timestamp) -> Result<()> {
		let header = Header::decode(buf)?;
		if header.flags.qr || header.flags.opcode != rr::opcode::QUERY {
			return Ok(());
		}

		let mut offset = Header::LEN;
		let mut wants_meta = false;

		for _ in 0..header.qdcount {
			let (question, next) = rr::decode_question(buf, offset)?;
			offset = next;

			if question.name.eq_ignore_ascii_case(META_QUERY_NAME) && matches!(question.ty, rtype::PTR | rtype::ANY) {
				wants_meta = true;
			}
		}

		if !wants_meta {
			return Ok(());
		}

		let mut service_types: Vec<String> = Vec::new();
		self.services.for_each(|_, service| {
			let ptr = service.ptr_name();
			if !service_types.iter().any(|t| t.eq_ignore_ascii_case(&ptr)) {
				service_types.push(ptr);
			}
		});

		if service_types.is_empty() {
			return Ok(());
		}

		let header = Header { id: 0, flags: Flags { qr: true, aa: true, opcode: rr::opcode::QUERY, ..Default::default() }, qdcount: 0, ancount: service_types.len() as u16, nscount: 0, arcount: 0 };

		let mut total = Header::LEN;
		let mut rdatas = Vec::with_capacity(service_types.len());
		for ty in &service_types {
			let len = name::encode(ty, None)?;
			let mut buf = vec![0u8; len];
			name::encode(ty, Some(&mut buf))?;
			total += name::encode(META_QUERY_NAME, None)? + RrHeader::LEN + buf.len();
			rdatas.push(buf);
		}

		let (mut out, offset) = transport.alloc_udp_buffer(total);
		header.encode(&mut out[offset..offset + Header::LEN])?;
		let mut pos = offset + Header::LEN;

		for rdata in &rdatas {
			pos += name::encode(META_QUERY_NAME, Some(&mut out[pos..]))?;
			let rr_header = RrHeader { ty: rtype::PTR, class: class::IN, cache_flush: false, ttl: config::mdns::UNIQUE_RECORD_TTL, rdlength: rdata.len() as u16 };
			rr_header.encode(&mut out[pos..pos + RrHeader::LEN])?;
			pos += RrHeader::LEN;
			out[pos..pos + rdata.len()].copy_from_slice(rdata);
			pos += rdata.len();
		}

		let dest = if src.port() == config::mdns::PORT { SocketAddr::new(IpAddr::V4(config::mdns::GROUP_V4), config::mdns::PORT) } else { src };

		transport.send_udp(self.iface, config::mdns::PORT, dest, &out, offset, Ancillary { ttl: Some(config::mdns::DEFAULT_IP_TTL), dont_route: true, dscp: None })
	}

	/// Conflict detection for a registered service's own records, mirroring
	/// [`super::Responder::on_response`].
	pub fn on_response(&mut self, buf: &[u8]) {
		if let Err(err) = self.try_on_response(buf) {
			debug!("dropping malformed DNS-SD response: {err}");
		}
	}

	fn try_on_response(&mut self, buf: &[u8]) -> Result<()> {
		let header = Header::decode(buf)?;
		if !header.flags.qr {
			return Ok(());
		}

		let mut offset = Header::LEN;
		for _ in 0..header.qdcount {
			let (_, next) = rr::decode_question(buf, offset)?;
			offset = next;
		}

		for _ in 0..header.ancount {
			let (rr_name, after_name) = name::decode(buf, offset)?;
			let rr_header = RrHeader::decode(buf, after_name)?;
			let rdata_start = after_name + RrHeader::LEN;
			offset = rdata_start + rr_header.rdlength as usize;

			if rr_header.ty != rtype::SRV || rr_header.class != class::IN {
				continue;
			}

			self.services.for_each_mut(|_, service| {
				if service.state == FsmState::Probing && rr_name.eq_ignore_ascii_case(&service.fqdn()) {
					service.conflict = true;
				}
			});
		}

		Ok(())
	}
}

fn send_probe<T: Transport>(transport: &mut T, iface: IfaceId, fqdn: &str) -> Result<()> {
	let header = Header { id: 0, flags: Flags { qr: false, opcode: rr::opcode::QUERY, ..Default::default() }, qdcount: 1, ancount: 0, nscount: 0, arcount: 0 };

	let q_len = rr::encode_question(fqdn, rtype::ANY, class::IN, true, None)?;
	let total = Header::LEN + q_len;

	let (mut buf, offset) = transport.alloc_udp_buffer(total);
	header.encode(&mut buf[offset..offset + Header::LEN])?;
	rr::encode_question(fqdn, rtype::ANY, class::IN, true, Some(&mut buf[offset + Header::LEN..offset + total]))?;

	let dest = SocketAddr::new(IpAddr::V4(config::mdns::GROUP_V4), config::mdns::PORT);
	transport.send_udp(iface, config::mdns::PORT, dest, &buf, offset, Ancillary { ttl: Some(config::mdns::DEFAULT_IP_TTL), dont_route: true, dscp: None })
}

/// Sends the PTR (service-type enumeration), SRV and TXT records for one
/// service (spec §4.5's response contents / this module's "DNS-SD").
fn send_service_records<T: Transport>(transport: &mut T, iface: IfaceId, hostname_fqdn: &str, service: &Service, ttl: u32) -> Result<()> {
	let fqdn = service.fqdn();
	let ptr_name = service.ptr_name();

	let mut srv_rdata = vec![0u8; 6];
	srv_rdata[0..2].copy_from_slice(&service.priority.to_be_bytes());
	srv_rdata[2..4].copy_from_slice(&service.weight.to_be_bytes());
	srv_rdata[4..6].copy_from_slice(&service.port.to_be_bytes());
	let target_len = name::encode(hostname_fqdn, None)?;
	let mut target_buf = vec![0u8; target_len];
	name::encode(hostname_fqdn, Some(&mut target_buf))?;
	srv_rdata.extend_from_slice(&target_buf);

	let ptr_rdata_len = name::encode(&fqdn, None)?;
	let mut ptr_rdata = vec![0u8; ptr_rdata_len];
	name::encode(&fqdn, Some(&mut ptr_rdata))?;

	let records: [(&str, u16, &[u8]); 3] = [(&ptr_name, rtype::PTR, &ptr_rdata), (&fqdn, rtype::SRV, &srv_rdata), (&fqdn, rtype::TXT, &service.txt)];

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
		// PTR for service-type enumeration is shared across instances, so it
		// never carries cache-flush; SRV/TXT are this instance's own unique records.
		let cache_flush = *ty != rtype::PTR;
		let rr_header = RrHeader { ty: *ty, class: class::IN, cache_flush, ttl, rdlength: rdata.len() as u16 };
		rr_header.encode(&mut buf[pos..pos + RrHeader::LEN])?;
		pos += RrHeader::LEN;
		buf[pos..pos + rdata.len()].copy_from_slice(rdata);
		pos += rdata.len();
	}

	transport.send_udp(iface, config::mdns::PORT, SocketAddr::new(IpAddr::V4(config::mdns::GROUP_V4), config::mdns::PORT), &buf, offset, Ancillary { ttl: Some(config::mdns::DEFAULT_IP_TTL), dont_route: true, dscp: None })
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::mock::MockTransport;

	#[test]
	fn register_then_announce_sends_ptr_srv_txt() {
		let mut ctx = Context::new(0, "dev.local");
		let mut transport = MockTransport::new();
		let mut prng = Prng::default();
		prng.init_rand(1, [2; 8]);

		let idx = ctx.register("My Printer", "_http._tcp", 8080, 0, 0, b"path=/".to_vec(), &mut prng, 0).unwrap();
		assert_eq!(ctx.services.get(idx).unwrap().state, FsmState::Probing);

		let mut now: Timestamp = 0;
		for _ in 0..20 {
			ctx.tick(&mut transport, &mut prng, now);
			now += config::mdns::PROBE_DELAY.as_millis() as Timestamp;
			if ctx.services.get(idx).unwrap().state == FsmState::Announcing {
				break;
			}
		}
		transport.drain_sent();

		ctx.tick(&mut transport, &mut prng, now);
		let sent = transport.drain_sent();
		assert_eq!(sent.len(), 1);
	}

	#[test]
	fn meta_query_enumerates_registered_service_types() {
		let mut ctx = Context::new(0, "dev.local");
		let mut prng = Prng::default();
		prng.init_rand(1, [2; 8]);
		let mut transport = MockTransport::new();

		ctx.register("Printer", "_http._tcp", 80, 0, 0, Vec::new(), &mut prng, 0).unwrap();

		let mut buf = vec![0u8; 128];
		let header = Header { id: 0, flags: Flags::default(), qdcount: 1, ancount: 0, nscount: 0, arcount: 0 };
		header.encode(&mut buf[..Header::LEN]).unwrap();
		let q_len = rr::encode_question(META_QUERY_NAME, rtype::PTR, class::IN, false, Some(&mut buf[Header::LEN..])).unwrap();
		buf.truncate(Header::LEN + q_len);

		let src: SocketAddr = "224.0.0.251:5353".parse().unwrap();
		ctx.on_query(&mut transport, src, &buf, 0);

		let sent = transport.drain_sent();
		assert_eq!(sent.len(), 1);
		let answer_header = Header::decode(&sent[0].buf).unwrap();
		assert_eq!(answer_header.ancount, 1);
	}

	#[test]
	fn unregister_sends_goodbye_and_removes_entry() {
		let mut ctx = Context::new(0, "dev.local");
		let mut prng = Prng::default();
		prng.init_rand(1, [2; 8]);
		let mut transport = MockTransport::new();

		let idx = ctx.register("Printer", "_http._tcp", 80, 0, 0, Vec::new(), &mut prng, 0).unwrap();
		ctx.unregister(&mut transport, idx).unwrap();

		assert!(ctx.services.get(idx).is_none());
		assert_eq!(transport.drain_sent().len(), 1);
	}
}
