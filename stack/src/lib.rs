//! The top-level stack actor (§5): owns every shared resource §3 names
//! under the exclusivity an `Actor<Stack<T>>` gets from `stakker`'s
//! single-threaded executor — the "stack-wide mutex" the specification
//! describes, realized the same way `net::Interface` was itself one
//! owning actor wrapping `udp`/`tcp`/`ip`.

use std::collections::HashMap;
use std::net::SocketAddr;

use collections::bytes::Slice;
use log::debug;
use stakker::{fwd_to, Ret, CX};

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod link;
pub mod prng;
pub mod resolve;
pub mod responder;
pub mod tick;
pub mod transport;

use cache::{Cache, QueryType, Timestamp};
use error::Result;
use link::LinkState;
use prng::Prng;
use resolve::{ProtocolHint, Resolution};
use transport::{IfaceId, Transport};

/// Per-interface state (§3's "mDNS responder context" / "DNS-SD context").
struct Iface {
	responder: responder::Responder,
	dnssd: responder::dnssd::Context,
}

/// The single owning stack value (§3, §5), generic over whatever
/// [`Transport`] the embedding application plugs in.
pub struct Stack<T: Transport> {
	transport: T,
	cache: Cache,
	prng: Prng,
	timers: tick::Table,
	links: link::Table,
	ifaces: HashMap<IfaceId, Iface>,
	/// This stack's own notion of "now", advanced only by [`Self::tick`].
	/// Rx-driven handlers (query/response processing) timestamp against
	/// whatever this held last, rather than sampling a wall clock directly —
	/// consistent with the rest of this crate treating `Timestamp` as a
	/// tick-granularity monotonic counter.
	clock: Timestamp,
}

impl<T: Transport + 'static> Stack<T> {
	/// Builds the stack and arms the first periodic tick (§4.6).
	pub fn init(cx: CX![], transport: T, now: Timestamp) -> Option<Self> {
		let actor = cx.access_actor().clone();
		cx.after(config::NET_TICK_INTERVAL, move |s| actor.apply(s, move |this, cx| this.tick(cx)));

		Some(Self { transport, cache: Cache::new(), prng: Prng::new(), timers: tick::Table::new(), links: link::Table::new(), ifaces: HashMap::new(), clock: now })
	}

	/// Adds an interface: seeds the PRNG from its EUI-64 the first time this
	/// is called, creates its mDNS responder and DNS-SD context, and attaches
	/// the well-known-port receive callbacks every interface needs (§4.2).
	pub fn add_interface(&mut self, cx: CX![], iface: IfaceId, hostname: impl Into<String>) -> Result<()> {
		let eui64 = self.transport.eui64(iface);

		if self.ifaces.is_empty() {
			let mut seed_bytes = [0u8; 16];
			seed_bytes[..8].copy_from_slice(&eui64);
			self.prng.init_rand(u128::from_be_bytes(seed_bytes), eui64);
		}

		let hostname = hostname.into();
		let mut iface_responder = responder::Responder::new(iface, hostname.clone());
		iface_responder.on_link_up(&mut self.transport, self.clock)?;

		let dnssd = responder::dnssd::Context::new(iface, iface_responder.fqdn());
		self.ifaces.insert(iface, Iface { responder: iface_responder, dnssd });

		let actor = cx.access_actor().clone();
		let mdns_fwd = fwd_to!([actor], on_mdns_rx(iface) as (SocketAddr, Slice));
		self.transport.attach_rx_callback(iface, config::mdns::PORT, Box::new(move |_, src, buf| mdns_fwd.fwd((src, buf))))?;

		let actor = cx.access_actor().clone();
		let llmnr_fwd = fwd_to!([actor], on_llmnr_rx(iface) as (Slice));
		self.transport.attach_rx_callback(iface, config::llmnr::PORT, Box::new(move |_, _src, buf| llmnr_fwd.fwd(buf)))?;

		let actor = cx.access_actor().clone();
		let nbns_fwd = fwd_to!([actor], on_nbns_rx(iface) as (Slice));
		self.transport.attach_rx_callback(iface, config::nbns::PORT, Box::new(move |_, _src, buf| nbns_fwd.fwd(buf)))?;

		Ok(())
	}

	/// Non-blocking resolution entry point (§4.4). Callers under an RTOS
	/// poll until the returned state stops being `InProgress`; `ret` also
	/// receives the outcome once, for cooperative callers that prefer a
	/// one-shot callback over polling.
	pub fn resolve(&mut self, cx: CX![], iface: IfaceId, name: String, type_hint: QueryType, hint: Option<ProtocolHint>, ret: Ret<Result<Resolution>>) {
		let actor = cx.access_actor().clone();
		let now = self.clock;

		let result = resolve::resolve(&mut self.transport, &mut self.cache, &mut self.prng, iface, &name, type_hint, hint, now, move |_local_port| {
			let fwd = fwd_to!([actor], on_dns_rx() as (IfaceId, SocketAddr, Slice));
			Box::new(move |iface, src, buf| fwd.fwd((iface, src, buf)))
		});

		ret.ret(result);
	}

	/// Registers a DNS-SD service on `iface`, triggering a probe (spec
	/// "DNS-SD").
	pub fn register_service(&mut self, _cx: CX![], iface: IfaceId, instance: String, service_type: String, port: u16, priority: u16, weight: u16, txt: Vec<u8>) -> Result<usize> {
		let now = self.clock;
		let iface_state = self.ifaces.get_mut(&iface).ok_or(error::Error::InvalidParameter)?;
		iface_state.dnssd.register(&instance, &service_type, port, priority, weight, txt, &mut self.prng, now)
	}

	pub fn unregister_service(&mut self, _cx: CX![], iface: IfaceId, handle: usize) -> Result<()> {
		let iface_state = self.ifaces.get_mut(&iface).ok_or(error::Error::InvalidParameter)?;
		iface_state.dnssd.unregister(&mut self.transport, handle)
	}

	/// Registers a periodic user timer callback (§3 "timer callback table").
	pub fn register_timer(&mut self, _cx: CX![], iface: Option<IfaceId>, period_ms: Timestamp, callback: tick::TimerCallback) -> Result<usize> {
		self.timers.register(iface, period_ms, callback)
	}

	pub fn unregister_timer(&mut self, _cx: CX![], handle: usize) {
		self.timers.unregister(handle)
	}

	/// Registers a link-change callback (§3 "link-change callback table").
	pub fn register_link_callback(&mut self, _cx: CX![], iface: Option<IfaceId>, callback: link::LinkCallback) -> Result<usize> {
		self.links.register(iface, callback)
	}

	pub fn unregister_link_callback(&mut self, _cx: CX![], handle: usize) {
		self.links.unregister(handle)
	}

	/// Propagates a link-state transition to the affected interface's
	/// responder/DNS-SD FSM, then notifies registered link-change callbacks
	/// with the stack-wide mutex released (§5's one documented exception),
	/// the way `net::dns::Resolver::init` hops out of the current borrow via
	/// `cx.defer` before re-entering through the actor.
	pub fn on_link_change(&mut self, cx: CX![], iface: IfaceId, up: bool) {
		if let Some(state) = self.ifaces.get_mut(&iface) {
			if up {
				let _ = state.responder.on_link_up(&mut self.transport, self.clock);
			} else {
				state.responder.on_link_down();
			}
		}

		let state = if up { LinkState::Up } else { LinkState::Down };
		let actor = cx.access_actor().clone();
		cx.defer(move |s| actor.apply(s, move |this, cx| this.dispatch_link_change(cx, iface, state)));
	}

	fn dispatch_link_change(&mut self, _cx: CX![], iface: IfaceId, state: LinkState) {
		self.links.notify(iface, state);
	}

	fn on_dns_rx(&mut self, _cx: CX![], iface: IfaceId, src: SocketAddr, buf: Slice) {
		let now = self.clock;
		resolve::dns::on_response(&mut self.cache, iface, src, &buf, now);
	}

	fn on_llmnr_rx(&mut self, _cx: CX![], iface: IfaceId, buf: Slice) {
		let now = self.clock;
		resolve::llmnr::on_response(&mut self.cache, iface, &buf, now);
	}

	fn on_nbns_rx(&mut self, _cx: CX![], iface: IfaceId, buf: Slice) {
		let now = self.clock;
		resolve::nbns::on_response(&mut self.cache, iface, &buf, now);
	}

	/// Every inbound mDNS packet flows through here regardless of whether it
	/// turns out to be a response to our own outstanding query, an
	/// unsolicited conflicting record, or a query for our own records —
	/// both this host's resolver and its responder see the same packets
	/// (module docs on [`resolve::mdns`]).
	fn on_mdns_rx(&mut self, cx: CX![], iface: IfaceId, src: SocketAddr, buf: Slice) {
		let header = match codec::rr::Header::decode(&buf) {
			Ok(h) => h,
			Err(err) => {
				debug!("dropping malformed mDNS packet: {err}");
				return;
			}
		};

		let now = self.clock;

		if header.flags.qr {
			resolve::mdns::on_response(&mut self.cache, iface, &buf, now);

			if let Some(state) = self.ifaces.get_mut(&iface) {
				state.responder.on_response(&buf, now);
				state.dnssd.on_response(&buf);
			}
		} else if let Some(state) = self.ifaces.get_mut(&iface) {
			state.responder.on_query(&mut self.transport, &mut self.prng, src, &buf, now);
			state.dnssd.on_query(&mut self.transport, src, &buf, now);
		}

		let _ = cx;
	}

	/// One tick-loop wakeup (§4.6): advances the logical clock, drives the
	/// resolver cache's retransmission sweep and the user timer table, ticks
	/// every interface's responder/DNS-SD FSM, and re-arms itself.
	fn tick(&mut self, cx: CX![]) {
		self.clock += config::NET_TICK_INTERVAL.as_millis() as Timestamp;
		let now = self.clock;

		tick::tick(&mut self.transport, &mut self.cache, &mut self.prng, &mut self.timers, now, config::NET_TICK_INTERVAL.as_millis() as Timestamp);

		for state in self.ifaces.values_mut() {
			state.responder.tick(&mut self.transport, &mut self.prng, now);
			state.dnssd.tick(&mut self.transport, &mut self.prng, now);
		}

		let actor = cx.access_actor().clone();
		cx.after(config::NET_TICK_INTERVAL, move |s| actor.apply(s, move |this, cx| this.tick(cx)));
	}
}
