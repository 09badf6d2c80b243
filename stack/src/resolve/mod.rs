//! Unified resolver orchestration (§4.4): protocol selection, cache lookup/
//! creation, and the retransmission sweep shared by all four protocols. Each
//! protocol's query construction and response parsing lives in its own
//! submodule; this module only implements the parts of §4.4 that don't vary
//! by protocol.

pub mod dns;
pub mod llmnr;
pub mod mdns;
pub mod nbns;

use std::net::IpAddr;
use std::str::FromStr;

use log::{debug, warn};

use crate::cache::{self, Cache, CacheKey, Entry, Protocol, QueryType, State, Timestamp};
use crate::error::{Error, Result};
use crate::prng::Prng;
use crate::transport::{IfaceId, RxCallback, Transport};

/// An explicit protocol override for [`resolve`] (§4.4 step 2, "if the
/// caller passed an explicit protocol flag, use it").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolHint {
	Dns,
	Mdns,
	Llmnr,
	Nbns,
}

impl From<ProtocolHint> for Protocol {
	fn from(hint: ProtocolHint) -> Self {
		match hint {
			ProtocolHint::Dns => Protocol::Dns,
			ProtocolHint::Mdns => Protocol::Mdns,
			ProtocolHint::Llmnr => Protocol::Llmnr,
			ProtocolHint::Nbns => Protocol::Nbns,
		}
	}
}

/// The outcome of a non-blocking `resolve()` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
	Resolved(IpAddr),
	InProgress,
}

/// Implements §4.4 step 2: protocol selection from the name shape, absent
/// an explicit hint.
pub fn choose_protocol(name: &str, type_hint: QueryType, hint: Option<ProtocolHint>) -> Protocol {
	if let Some(hint) = hint {
		return hint.into();
	}

	if name.len() >= 6 && name[name.len() - 6..].eq_ignore_ascii_case(".local") {
		return Protocol::Mdns;
	}

	if !name.contains('.') && name.len() <= 15 && type_hint == QueryType::Ipv4 {
		return Protocol::Nbns;
	}

	if !name.contains('.') {
		return Protocol::Llmnr;
	}

	Protocol::Dns
}

/// Implements §4.4 steps 1–4. On a cache miss, allocates a fresh entry,
/// dispatches the protocol's query, and returns `InProgress`; callers under
/// an RTOS poll this until it stops returning `InProgress`.
pub fn resolve<T: Transport>(
	transport: &mut T,
	cache: &mut Cache,
	prng: &mut Prng,
	iface: IfaceId,
	name: &str,
	type_hint: QueryType,
	hint: Option<ProtocolHint>,
	now: Timestamp,
	make_dns_callback: impl FnOnce(u16) -> RxCallback,
) -> Result<Resolution> {
	// Step 1: textual IP literals resolve immediately without touching the cache.
	if let Ok(addr) = IpAddr::from_str(name) {
		return Ok(Resolution::Resolved(addr));
	}

	let protocol = choose_protocol(name, type_hint, hint);
	let key = CacheKey { iface, name: name.to_owned(), ty: type_hint, protocol };

	match cache.lookup(&key).map(|e| (e.state, e.addr)) {
		Some((State::Resolved | State::Permanent, Some(addr))) => return Ok(Resolution::Resolved(addr)),
		Some((State::InProgress, _)) => return Ok(Resolution::InProgress),
		_ => {}
	}

	create_and_send(transport, cache, prng, key, now, make_dns_callback)?;
	Ok(Resolution::InProgress)
}

fn create_and_send<T: Transport>(
	transport: &mut T,
	cache: &mut Cache,
	prng: &mut Prng,
	key: CacheKey,
	now: Timestamp,
	make_dns_callback: impl FnOnce(u16) -> RxCallback,
) -> Result<()> {
	let protocol = key.protocol;

	let local_port = if protocol == Protocol::Dns {
		prng.rand_range(*crate::config::EPHEMERAL_PORT_RANGE.start() as u32, *crate::config::EPHEMERAL_PORT_RANGE.end() as u32) as u16
	} else {
		0
	};

	let (max_retries, init_timeout, max_timeout) = match protocol {
		Protocol::Dns | Protocol::Any => (crate::config::dns::MAX_RETRIES, crate::config::dns::INIT_TIMEOUT, crate::config::dns::MAX_TIMEOUT),
		Protocol::Mdns => (crate::config::mdns::MAX_RETRIES, crate::config::mdns::INIT_TIMEOUT, crate::config::mdns::MAX_TIMEOUT),
		Protocol::Nbns => (crate::config::nbns::MAX_RETRIES, crate::config::nbns::INIT_TIMEOUT, crate::config::nbns::MAX_TIMEOUT),
		Protocol::Llmnr => (crate::config::llmnr::MAX_RETRIES, crate::config::llmnr::INIT_TIMEOUT, crate::config::llmnr::MAX_TIMEOUT),
	};

	let entry = Entry {
		key: key.clone(),
		state: State::InProgress,
		dns_server_num: 0,
		local_port,
		txid: prng.rand_range(0, u16::MAX as u32) as u16,
		addr: None,
		timestamp: now,
		timeout: init_timeout,
		max_timeout,
		retransmit_count: max_retries - 1,
	};

	if protocol == Protocol::Dns {
		transport.attach_rx_callback(key.iface, local_port, make_dns_callback(local_port))?;
	}

	cache.insert(entry.clone());

	if let Err(err) = send_query(transport, &entry) {
		if protocol == Protocol::Dns {
			transport.detach_rx_callback(key.iface, local_port);
		}
		cache.remove(&key);
		return Err(err);
	}

	Ok(())
}

fn send_query<T: Transport>(transport: &mut T, entry: &Entry) -> Result<()> {
	match entry.key.protocol {
		Protocol::Dns | Protocol::Any => dns::send_query(transport, entry),
		Protocol::Mdns => mdns::send_query(transport, entry),
		Protocol::Llmnr => llmnr::send_query(transport, entry),
		Protocol::Nbns => nbns::send_query(transport, entry),
	}
}

fn retransmit<T: Transport>(transport: &mut T, entry: &Entry) -> Result<()> {
	send_query(transport, entry)
}

/// Drives §4.4's "Retransmission" and "Failure semantics" sections: walks
/// every IN_PROGRESS/RESOLVED entry and retransmits, expires, or falls back
/// to the next DNS server as its deadline requires.
pub fn tick<T: Transport>(transport: &mut T, cache: &mut Cache, prng: &mut Prng, now: Timestamp) {
	let mut to_delete: Vec<CacheKey> = Vec::new();
	let mut retries: Vec<(Entry, bool)> = Vec::new();

	for entry in cache.iter_mut() {
		let due = entry.timestamp.saturating_add(entry.timeout.as_millis() as Timestamp) <= now;
		if !due {
			continue;
		}

		match entry.state {
			State::Resolved => {
				to_delete.push(entry.key.clone());
			}
			State::InProgress => {
				if entry.retransmit_count > 0 {
					entry.retransmit_count -= 1;
					entry.timestamp = now;
					entry.timeout = (entry.timeout * 2).min(entry.max_timeout);
					retries.push((entry.clone(), false));
				} else if entry.key.protocol == Protocol::Dns {
					entry.dns_server_num += 1;
					retries.push((entry.clone(), true));
				} else {
					to_delete.push(entry.key.clone());
				}
			}
			State::None | State::Permanent => {}
		}
	}

	for (mut entry, is_dns_fallback) in retries {
		if is_dns_fallback {
			let servers = transport.dns_servers(entry.key.iface, entry.key.ty != QueryType::Ipv6);
			if (entry.dns_server_num as usize) >= servers.len() {
				to_delete.push(entry.key.clone());
				continue;
			}

			entry.retransmit_count = crate::config::dns::MAX_RETRIES - 1;
			entry.timeout = crate::config::dns::INIT_TIMEOUT;
			entry.timestamp = now;
			entry.txid = prng.rand_range(0, u16::MAX as u32) as u16;
		}

		if retransmit(transport, &entry).is_err() {
			warn!("retransmit failed for {}, dropping entry", entry.key.name);
			to_delete.push(entry.key.clone());
			continue;
		}

		cache.insert(entry);
	}

	for key in to_delete {
		if let Some(entry) = cache.remove(&key) {
			if entry.key.protocol == Protocol::Dns {
				transport.detach_rx_callback(entry.key.iface, entry.local_port);
			}
			debug!("expired cache entry for {}", entry.key.name);
		}
	}
}

/// Shared inbound-response filter: QR must be set, opcode must be QUERY,
/// rcode must be NO_ERROR (§4.4 "Common filter"). DNS uses
/// [`passes_common_filter_except_rcode`] instead, since it inspects rcode
/// itself to decide whether to delete the entry.
pub(crate) fn passes_common_filter(flags: crate::codec::rr::Flags) -> bool {
	passes_common_filter_except_rcode(flags) && flags.rcode == 0
}

pub(crate) fn passes_common_filter_except_rcode(flags: crate::codec::rr::Flags) -> bool {
	flags.qr && flags.opcode == crate::codec::rr::opcode::QUERY
}

/// Applies a successful answer to `entry`: copies in the resolved address,
/// clamps the TTL-derived timeout, and transitions to RESOLVED (§4.4
/// "Inbound response handling").
pub(crate) fn apply_answer(entry: &mut Entry, addr: IpAddr, ttl_secs: u32, now: Timestamp) {
	entry.addr = Some(addr);
	entry.timestamp = now;
	entry.timeout = cache::resolved_timeout(entry.key.protocol, ttl_secs);
	entry.state = State::Resolved;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ip_literal_resolves_without_cache_entry() {
		let mut cache = Cache::new();
		let mut prng = Prng::default();
		let mut transport = crate::transport::mock::MockTransport::new();

		let result = resolve(&mut transport, &mut cache, &mut prng, 0, "192.0.2.1", QueryType::Ipv4, None, 0, |_| Box::new(|_, _, _| {})).unwrap();
		assert_eq!(result, Resolution::Resolved("192.0.2.1".parse().unwrap()));
		assert_eq!(cache.iter().count(), 0);
	}

	#[test]
	fn local_name_selects_mdns() {
		assert_eq!(choose_protocol("dev.local", QueryType::Ipv4, None), Protocol::Mdns);
		assert_eq!(choose_protocol("DEV.LOCAL", QueryType::Ipv4, None), Protocol::Mdns);
	}

	#[test]
	fn short_bare_name_selects_nbns_for_ipv4() {
		assert_eq!(choose_protocol("PRINTER", QueryType::Ipv4, None), Protocol::Nbns);
		assert_eq!(choose_protocol("PRINTER", QueryType::Ipv6, None), Protocol::Llmnr);
	}

	#[test]
	fn dotted_name_selects_dns() {
		assert_eq!(choose_protocol("example.test", QueryType::Ipv4, None), Protocol::Dns);
	}

	#[test]
	fn explicit_hint_overrides_shape() {
		assert_eq!(choose_protocol("example.test", QueryType::Ipv4, Some(ProtocolHint::Mdns)), Protocol::Mdns);
	}
}
