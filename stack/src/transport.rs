//! Transport adapter (§4.2) — the narrow, external-collaborator boundary
//! this crate uses to allocate/send UDP datagrams, attach per-port receive
//! callbacks, and query interface-level facts (EUI-64, broadcast address,
//! configured DNS servers) that belong to the out-of-scope Ethernet/IPv4/
//! IPv6/ARP layers named in §1.
//!
//! Production code plugs in a real implementation atop OS sockets (the
//! shape mirrors `net::udp::Socket`/`net::udp::Interface`, generalized
//! beyond a single owning `Interface`); tests use [`mock::MockTransport`].

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use collections::bytes::Slice;

use crate::error::{Error, Result};

/// An opaque handle identifying one configured network interface.
pub type IfaceId = u32;

/// Per-datagram send options (§4.2): a TTL override, the "do-not-route"
/// flag, and a differentiated-services code point.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ancillary {
	pub ttl: Option<u8>,
	pub dont_route: bool,
	pub dscp: Option<u8>,
}

/// A registered per-port receive callback. Invoked with the interface the
/// datagram arrived on, its source address, and its payload.
pub type RxCallback = Box<dyn FnMut(IfaceId, SocketAddr, Slice)>;

/// The narrow interface every protocol client/responder in this crate is
/// written against; see module docs.
pub trait Transport {
	/// Allocates a buffer suitable for a UDP payload up to `max_len` bytes,
	/// along with the offset callers should start writing their payload at
	/// (non-zero when the adapter reserves room for lower-layer headers).
	fn alloc_udp_buffer(&self, max_len: usize) -> (Vec<u8>, usize);

	fn send_udp(&mut self, iface: IfaceId, src_port: u16, dst: SocketAddr, buf: &[u8], offset: usize, anc: Ancillary) -> Result;

	fn attach_rx_callback(&mut self, iface: IfaceId, port: u16, cb: RxCallback) -> Result;

	fn detach_rx_callback(&mut self, iface: IfaceId, port: u16);

	fn join_multicast(&mut self, iface: IfaceId, group: IpAddr) -> Result;

	/// The IPv4 directed broadcast address for this interface, if any.
	fn broadcast_addr(&self, iface: IfaceId) -> Option<Ipv4Addr>;

	/// The interface's EUI-64, used to seed the PRNG (§4.3).
	fn eui64(&self, iface: IfaceId) -> [u8; 8];

	/// The configured DNS server list for this interface, filtered by
	/// address family (`want_v4`).
	fn dns_servers(&self, iface: IfaceId, want_v4: bool) -> Vec<IpAddr>;
}

pub mod mock {
	use std::collections::HashMap;

	use super::*;

	/// An in-memory [`Transport`] used by tests: "sending" a datagram just
	/// records it, and test code drives inbound traffic by calling
	/// [`MockTransport::inject`] directly against registered callbacks —
	/// there is no real socket or scheduler involved.
	#[derive(Default)]
	pub struct MockTransport {
		pub sent: Vec<Sent>,
		callbacks: HashMap<(IfaceId, u16), RxCallback>,
		pub joined_groups: Vec<(IfaceId, IpAddr)>,
		pub broadcast: HashMap<IfaceId, Ipv4Addr>,
		pub eui64s: HashMap<IfaceId, [u8; 8]>,
		pub dns_servers_v4: HashMap<IfaceId, Vec<IpAddr>>,
		pub dns_servers_v6: HashMap<IfaceId, Vec<IpAddr>>,
	}

	#[derive(Clone, Debug)]
	pub struct Sent {
		pub iface: IfaceId,
		pub src_port: u16,
		pub dst: SocketAddr,
		pub buf: Vec<u8>,
		pub anc: Ancillary,
	}

	impl MockTransport {
		pub fn new() -> Self {
			Self::default()
		}

		/// Delivers `payload` as if it arrived on `iface` from `src`,
		/// addressed to `dst_port`, invoking that port's registered callback
		/// if one exists.
		pub fn inject(&mut self, iface: IfaceId, src: SocketAddr, dst_port: u16, payload: &[u8]) {
			if let Some(cb) = self.callbacks.get_mut(&(iface, dst_port)) {
				let mut slice = Slice::new(payload.len());
				slice.copy_from_slice(payload);
				cb(iface, src, slice);
			}
		}

		/// Returns and clears the log of sent datagrams.
		pub fn drain_sent(&mut self) -> Vec<Sent> {
			core::mem::take(&mut self.sent)
		}
	}

	impl Transport for MockTransport {
		fn alloc_udp_buffer(&self, max_len: usize) -> (Vec<u8>, usize) {
			(vec![0u8; max_len], 0)
		}

		fn send_udp(&mut self, iface: IfaceId, src_port: u16, dst: SocketAddr, buf: &[u8], offset: usize, anc: Ancillary) -> Result {
			self.sent.push(Sent { iface, src_port, dst, buf: buf[offset..].to_vec(), anc });
			Ok(())
		}

		fn attach_rx_callback(&mut self, iface: IfaceId, port: u16, cb: RxCallback) -> Result {
			if self.callbacks.contains_key(&(iface, port)) {
				return Err(Error::InvalidParameter);
			}
			self.callbacks.insert((iface, port), cb);
			Ok(())
		}

		fn detach_rx_callback(&mut self, iface: IfaceId, port: u16) {
			self.callbacks.remove(&(iface, port));
		}

		fn join_multicast(&mut self, iface: IfaceId, group: IpAddr) -> Result {
			self.joined_groups.push((iface, group));
			Ok(())
		}

		fn broadcast_addr(&self, iface: IfaceId) -> Option<Ipv4Addr> {
			self.broadcast.get(&iface).copied()
		}

		fn eui64(&self, iface: IfaceId) -> [u8; 8] {
			self.eui64s.get(&iface).copied().unwrap_or([0; 8])
		}

		fn dns_servers(&self, iface: IfaceId, want_v4: bool) -> Vec<IpAddr> {
			let map = if want_v4 { &self.dns_servers_v4 } else { &self.dns_servers_v6 };
			map.get(&iface).cloned().unwrap_or_default()
		}
	}
}
