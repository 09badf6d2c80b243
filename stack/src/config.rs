//! Compile-time configuration knobs.
//!
//! Every bound named in the specification lives here as a `pub const`,
//! grouped by the protocol (or table) it governs. Nothing here is meant to
//! be tuned at runtime; a deployment that needs different bounds forks these
//! constants, the way `wireguard::tunnel::timers` declares its own.

use core::net::{Ipv4Addr, Ipv6Addr};
use core::time::Duration;

/// Size of the unified resolver cache table (§3: "Cache entry").
pub const DNS_CACHE_SIZE: usize = 64;
/// Maximum length of a dotted name, including the root terminator.
pub const DNS_MAX_NAME_LEN: usize = 255;
/// Maximum length of a single DNS label (a segment between dots).
pub const DNS_MAX_LABEL_LEN: usize = 63;
/// Maximum size of an outgoing/incoming unicast DNS/LLMNR/NBNS message.
pub const DNS_MESSAGE_MAX_SIZE: usize = 512;
/// Maximum size of an outgoing/incoming mDNS message.
pub const MDNS_MESSAGE_MAX_SIZE: usize = 1024;
/// Bound on pointer-compression recursion depth during name decode.
pub const MAX_NAME_POINTER_DEPTH: u32 = 4;

/// Ephemeral source port range used for DNS queries (and cache entries of
/// other protocols, which reuse their well-known port instead).
pub const EPHEMERAL_PORT_RANGE: core::ops::RangeInclusive<u16> = 49152..=65535;

pub mod dns {
	use super::Duration;

	pub const PORT: u16 = 53;
	pub const MAX_RETRIES: u32 = 3;
	pub const INIT_TIMEOUT: Duration = Duration::from_secs(1);
	pub const MAX_TIMEOUT: Duration = Duration::from_secs(4);
	pub const MIN_LIFETIME: Duration = Duration::from_secs(1);
	pub const MAX_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);
	/// Polling backoff used by blocking callers of `resolve()` under an RTOS.
	pub const INIT_POLLING_INTERVAL: Duration = Duration::from_millis(10);
	pub const MAX_POLLING_INTERVAL: Duration = Duration::from_millis(500);
}

pub mod mdns {
	use super::{Duration, Ipv4Addr, Ipv6Addr};

	pub const PORT: u16 = 5353;
	/// The mDNS IPv4 multicast group (§6).
	pub const GROUP_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
	/// The mDNS IPv6 multicast group (§6).
	pub const GROUP_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);
	pub const MAX_RETRIES: u32 = 3;
	pub const INIT_TIMEOUT: Duration = Duration::from_secs(1);
	pub const MAX_TIMEOUT: Duration = Duration::from_secs(4);
	pub const MAX_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

	pub const PROBE_NUM: u32 = 3;
	pub const PROBE_DELAY: Duration = Duration::from_millis(250);
	/// Delay applied when a probe's tie-break is lost before retrying.
	pub const PROBE_DEFER: Duration = Duration::from_secs(1);
	pub const ANNOUNCE_NUM: u32 = 2;
	pub const ANNOUNCE_DELAY: Duration = Duration::from_secs(1);

	pub const RAND_DELAY_MIN: Duration = Duration::from_millis(0);
	pub const RAND_DELAY_MAX: Duration = Duration::from_millis(250);
	/// Bound on how long WAITING may last before probing begins anyway.
	pub const MAX_WAITING_DELAY: Duration = Duration::from_secs(5);

	pub const LEGACY_UNICAST_RR_TTL: u32 = 10;
	pub const DEFAULT_IP_TTL: u8 = 255;
	/// TTL carried by this host's own unique A/AAAA/PTR records.
	pub const UNIQUE_RECORD_TTL: u32 = 120;

	/// Aggregation delay for queries with the "more known answers follow" bit.
	pub const KNOWN_ANSWER_DELAY_MIN: Duration = Duration::from_millis(400);
	pub const KNOWN_ANSWER_DELAY_MAX: Duration = Duration::from_millis(500);
	/// Aggregation delay for queries answered by a shared record set.
	pub const SHARED_DELAY_MIN: Duration = Duration::from_millis(20);
	pub const SHARED_DELAY_MAX: Duration = Duration::from_millis(120);

	pub const RESPONDER_MAX_HOSTNAME_LEN: usize = 63;

	pub const DNSSD_MAX_SERVICES: usize = 16;
	pub const DNSSD_MAX_TXT_LEN: usize = 255;
}

pub mod llmnr {
	use super::{Duration, Ipv4Addr, Ipv6Addr};

	pub const PORT: u16 = 5355;
	/// The LLMNR IPv4 multicast group (§6).
	pub const GROUP_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 252);
	/// The LLMNR IPv6 multicast group (§6).
	pub const GROUP_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 1, 3);
	pub const MAX_RETRIES: u32 = 2;
	pub const INIT_TIMEOUT: Duration = Duration::from_millis(1000);
	pub const MAX_TIMEOUT: Duration = Duration::from_millis(1000);
	pub const MAX_LIFETIME: Duration = Duration::from_secs(5 * 60);
}

pub mod nbns {
	use super::Duration;

	pub const PORT: u16 = 137;
	pub const MAX_RETRIES: u32 = 3;
	pub const INIT_TIMEOUT: Duration = Duration::from_millis(250);
	pub const MAX_TIMEOUT: Duration = Duration::from_millis(1000);
	pub const MAX_LIFETIME: Duration = Duration::from_secs(5 * 60);
	/// Maximum length of the name itself, before space-padding (§4.1: "1..15
	/// characters"). Distinct from the padded buffer, which is `NAME_LEN + 1`
	/// octets (15 characters padded with spaces, plus the suffix byte).
	pub const NAME_LEN: usize = 15;
	pub const ENCODED_LEN: usize = 32;
}

pub mod tables {
	pub const MAX_LINK_CHANGE_CALLBACKS: usize = 8;
	pub const MAX_TIMER_CALLBACKS: usize = 16;
	/// Event budget drained per tick-loop wakeup before the deadline is
	/// re-checked, bounding retransmission starvation under heavy inbound
	/// load (§9, open question 3).
	pub const MAX_EVENTS_PER_WAKEUP: usize = 32;
}

/// The fixed interval, in milliseconds, the periodic tick advances by.
pub const NET_TICK_INTERVAL: Duration = Duration::from_millis(100);
