//! The unified resolver cache (§3) — one table of in-flight and resolved
//! entries shared by all four name-resolution protocols.
//!
//! Backed by [`collections::map::Map`], the teacher's bounded open-addressed
//! table, keyed by the `(iface, name, type, protocol)` tuple so invariant 2
//! ("at most one entry per key") holds structurally: every insert goes
//! through [`Map::find_entry`], which returns the existing slot rather than
//! creating a duplicate.

use core::time::Duration;
use std::net::IpAddr;

use collections::map::{self, Key, Map};

use crate::config::{self, DNS_CACHE_SIZE};
use crate::transport::IfaceId;

/// A monotonic millisecond timestamp, as returned by the embedder's `now()`.
pub type Timestamp = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueryType {
	Ipv4,
	Ipv6,
	Any,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
	Dns,
	Mdns,
	Nbns,
	Llmnr,
	Any,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
	None,
	InProgress,
	Resolved,
	Permanent,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
	pub iface: IfaceId,
	pub name: String,
	pub ty: QueryType,
	pub protocol: Protocol,
}

/// The central record of §3, owned exclusively by [`Cache`].
#[derive(Clone, Debug)]
pub struct Entry {
	pub key: CacheKey,
	pub state: State,
	/// Index into the interface's configured DNS server list (DNS only).
	pub dns_server_num: u32,
	/// Ephemeral local port; 0 for mDNS/NBNS/LLMNR, which use well-known ports.
	pub local_port: u16,
	pub txid: u16,
	/// Valid only when `state` is `Resolved` or `Permanent`.
	pub addr: Option<IpAddr>,
	pub timestamp: Timestamp,
	pub timeout: Duration,
	pub max_timeout: Duration,
	/// Queries remaining before falling back (DNS: to the next server) or
	/// failing outright.
	pub retransmit_count: u32,
}

impl Key for Entry {
	type Type = CacheKey;

	fn key(&self) -> &CacheKey {
		&self.key
	}
}

/// Returns the timeout a freshly RESOLVED entry should carry: the record's
/// TTL, clamped above by the protocol's `MAX_LIFETIME` and, for DNS only,
/// below by `MIN_LIFETIME` (§4.4, invariant 4).
pub fn resolved_timeout(protocol: Protocol, ttl_secs: u32) -> Duration {
	let ttl = Duration::from_secs(ttl_secs as u64);

	let max = match protocol {
		Protocol::Dns | Protocol::Any => config::dns::MAX_LIFETIME,
		Protocol::Mdns => config::mdns::MAX_LIFETIME,
		Protocol::Nbns => config::nbns::MAX_LIFETIME,
		Protocol::Llmnr => config::llmnr::MAX_LIFETIME,
	};

	let timeout = ttl.min(max);
	if protocol == Protocol::Dns {
		timeout.max(config::dns::MIN_LIFETIME)
	} else {
		timeout
	}
}

/// The unified cache table (§3). Fixed capacity [`DNS_CACHE_SIZE`]; on
/// overflow the entry with the oldest `timestamp` is evicted.
#[derive(Default)]
pub struct Cache {
	map: Map<Entry, DNS_CACHE_SIZE>,
}

impl Cache {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn lookup(&self, key: &CacheKey) -> Option<&Entry> {
		self.map.find(key)
	}

	pub fn lookup_mut(&mut self, key: &CacheKey) -> Option<&mut Entry> {
		self.map.find_entry(key).filled().map(|f| f.into_ref())
	}

	/// Inserts `entry`, overwriting any existing entry for the same key. If
	/// the table is full and `entry.key` is genuinely new, the entry with
	/// the oldest `timestamp` is evicted first (§3).
	pub fn insert(&mut self, entry: Entry) {
		if self.map.find(&entry.key).is_none() && self.map.len() >= DNS_CACHE_SIZE {
			self.evict_oldest();
		}

		match self.map.find_entry(&entry.key) {
			map::Entry::Filled(mut filled) => *filled = entry,
			map::Entry::Empty(empty) => {
				empty.insert(entry);
			}
		}
	}

	pub fn remove(&mut self, key: &CacheKey) -> Option<Entry> {
		self.map.remove(key)
	}

	pub fn iter(&self) -> impl Iterator<Item = &Entry> {
		self.map.iter()
	}

	pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entry> {
		self.map.iter_mut()
	}

	fn evict_oldest(&mut self) {
		let oldest = self.map.iter().min_by_key(|e| e.timestamp).map(|e| e.key.clone());

		if let Some(key) = oldest {
			self.map.remove(&key);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn key(name: &str) -> CacheKey {
		CacheKey { iface: 0, name: name.to_owned(), ty: QueryType::Ipv4, protocol: Protocol::Dns }
	}

	fn entry(name: &str, timestamp: Timestamp) -> Entry {
		Entry {
			key: key(name),
			state: State::InProgress,
			dns_server_num: 0,
			local_port: 0,
			txid: 0,
			addr: None,
			timestamp,
			timeout: config::dns::INIT_TIMEOUT,
			max_timeout: config::dns::MAX_TIMEOUT,
			retransmit_count: config::dns::MAX_RETRIES - 1,
		}
	}

	#[test]
	fn at_most_one_entry_per_key() {
		let mut cache = Cache::new();
		cache.insert(entry("example.test", 1));
		cache.insert(entry("example.test", 2));

		let found = cache.lookup(&key("example.test")).unwrap();
		assert_eq!(found.timestamp, 2);
		assert_eq!(cache.iter().count(), 1);
	}

	#[test]
	fn full_table_evicts_oldest_timestamp() {
		let mut cache = Cache::new();
		for i in 0..DNS_CACHE_SIZE {
			cache.insert(entry(&format!("host{i}.test"), i as Timestamp));
		}

		assert!(cache.lookup(&key("host0.test")).is_some());

		cache.insert(entry("newcomer.test", DNS_CACHE_SIZE as Timestamp));

		assert!(cache.lookup(&key("host0.test")).is_none());
		assert!(cache.lookup(&key("newcomer.test")).is_some());
		assert_eq!(cache.iter().count(), DNS_CACHE_SIZE);
	}

	#[test]
	fn dns_timeout_is_clamped_both_ends() {
		assert_eq!(resolved_timeout(Protocol::Dns, 0), config::dns::MIN_LIFETIME);
		assert_eq!(resolved_timeout(Protocol::Dns, u32::MAX), config::dns::MAX_LIFETIME);
		assert_eq!(resolved_timeout(Protocol::Dns, 60), Duration::from_secs(60));
	}

	#[test]
	fn mdns_timeout_has_no_lower_clamp() {
		assert_eq!(resolved_timeout(Protocol::Mdns, 0), Duration::from_secs(0));
	}
}
