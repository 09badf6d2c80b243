//! End-to-end mDNS/DNS-SD responder scenarios: probing through to steady
//! announcements, a defended-and-lost conflict mid-probe, and a legacy
//! unicast querier's immediate response.

use std::net::SocketAddr;

use stack::cache::Timestamp;
use stack::codec::name;
use stack::codec::rr::{self, class, rtype, Flags, Header, RrHeader};
use stack::config;
use stack::prng::Prng;
use stack::responder::dnssd;
use stack::responder::{FsmState, Responder};
use stack::transport::mock::MockTransport;

fn linked_up(hostname: &str) -> (Responder, MockTransport, Prng) {
	let mut responder = Responder::new(0, hostname);
	let mut transport = MockTransport::new();
	let mut prng = Prng::default();
	prng.init_rand(42, [7; 8]);

	responder.on_link_up(&mut transport, 0).unwrap();
	responder.set_ipv4(Some("192.0.2.10".parse().unwrap()));
	transport.drain_sent();

	(responder, transport, prng)
}

fn drive_to_probing(responder: &mut Responder, transport: &mut MockTransport, prng: &mut Prng) -> Timestamp {
	let mut now: Timestamp = 0;
	for _ in 0..20 {
		responder.tick(transport, prng, now);
		now += 50;
		if responder.state() == FsmState::Probing {
			break;
		}
	}
	assert_eq!(responder.state(), FsmState::Probing);
	now
}

/// Scenario 3: after joining the link, a responder probes three times
/// (250ms apart) then announces twice on a doubling schedule before going
/// idle.
#[test]
fn probes_three_times_then_announces_twice_before_idle() {
	let (mut responder, mut transport, mut prng) = linked_up("dev-host");
	let mut now = drive_to_probing(&mut responder, &mut transport, &mut prng);

	let mut probes = 0;
	for _ in 0..10 {
		responder.tick(&mut transport, &mut prng, now);
		now += config::mdns::PROBE_DELAY.as_millis() as Timestamp;
		probes += transport.drain_sent().len();
		if responder.state() == FsmState::Announcing {
			break;
		}
	}
	assert_eq!(probes, config::mdns::PROBE_NUM as usize);
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
	// Each announcement carries the A record plus its reverse PTR, one send
	// per multicast target (v4 only here).
	assert_eq!(announcements, config::mdns::ANNOUNCE_NUM as usize);
}

/// Scenario 4: an unsolicited answer claiming our address with different
/// rdata mid-probe is treated as a conflict — the hostname is renamed and
/// probing restarts under the new name.
#[test]
fn conflicting_answer_during_probe_renames_and_restarts() {
	let (mut responder, mut transport, mut prng) = linked_up("dev-host");
	let now = drive_to_probing(&mut responder, &mut transport, &mut prng);
	transport.drain_sent();

	let mut buf = vec![0u8; 128];
	let header = Header { id: 0, flags: Flags { qr: true, ..Default::default() }, qdcount: 0, ancount: 1, nscount: 0, arcount: 0 };
	header.encode(&mut buf[..Header::LEN]).unwrap();

	let mut pos = Header::LEN;
	pos += name::encode("dev-host.local", Some(&mut buf[pos..])).unwrap();

	let rr_header = RrHeader { ty: rtype::A, class: class::IN, cache_flush: true, ttl: 120, rdlength: 4 };
	rr_header.encode(&mut buf[pos..pos + RrHeader::LEN]).unwrap();
	pos += RrHeader::LEN;
	buf[pos..pos + 4].copy_from_slice(&[192, 0, 2, 250]);
	pos += 4;
	buf.truncate(pos);

	responder.on_response(&buf, now);
	responder.tick(&mut transport, &mut prng, now);

	assert_eq!(responder.hostname(), "dev-host2");
	assert_eq!(responder.state(), FsmState::Probing);
}

/// Scenario 5: a query arriving from a non-5353 source port (a legacy
/// unicast resolver) gets an immediate unicast answer with the cache-flush
/// bit cleared and TTL clamped to the legacy value, bypassing aggregation.
#[test]
fn legacy_unicast_querier_gets_immediate_clamped_response() {
	let (mut responder, mut transport, mut prng) = linked_up("dev-host");

	// Drive the FSM all the way to IDLE so queries get answered.
	let mut now: Timestamp = 0;
	while responder.state() != FsmState::Idle {
		responder.tick(&mut transport, &mut prng, now);
		now += 2_000_000;
	}
	transport.drain_sent();

	let mut buf = vec![0u8; 64];
	let header = Header { id: 0, flags: Flags::default(), qdcount: 1, ancount: 0, nscount: 0, arcount: 0 };
	header.encode(&mut buf[..Header::LEN]).unwrap();
	let q_len = rr::encode_question("dev-host.local", rtype::A, class::IN, false, Some(&mut buf[Header::LEN..])).unwrap();
	buf.truncate(Header::LEN + q_len);

	let src: SocketAddr = "198.51.100.20:61234".parse().unwrap();
	responder.on_query(&mut transport, &mut prng, src, &buf, now);

	let sent = transport.drain_sent();
	assert_eq!(sent.len(), 1);
	assert_eq!(sent[0].dst, src, "legacy unicast queriers get a direct unicast reply, not a multicast one");

	let rr_offset = Header::LEN + name::encode("dev-host.local", None).unwrap();
	let rr_header = RrHeader::decode(&sent[0].buf, rr_offset).unwrap();
	assert_eq!(rr_header.ttl, config::mdns::LEGACY_UNICAST_RR_TTL);
	assert!(!rr_header.cache_flush);
}

/// A DNS-SD service registered on an idle responder probes three times then
/// announces twice, mirroring the host-record FSM it shares timing with.
#[test]
fn dnssd_service_probes_then_announces() {
	let mut ctx = dnssd::Context::new(0, "dev-host.local");
	let mut transport = MockTransport::new();
	let mut prng = Prng::default();
	prng.init_rand(7, [3; 8]);

	ctx.register("office-printer", "_ipp._tcp", 631, 0, 0, b"txtvers=1".to_vec(), &mut prng, 0).unwrap();

	let mut now: Timestamp = 0;
	let mut probes = 0;
	for _ in 0..10 {
		ctx.tick(&mut transport, &mut prng, now);
		now += config::mdns::PROBE_DELAY.as_millis() as Timestamp;
		probes += transport.drain_sent().len();
	}
	assert!(probes >= config::mdns::PROBE_NUM as usize);

	let mut announcements = 0;
	for _ in 0..10 {
		ctx.tick(&mut transport, &mut prng, now);
		now += config::mdns::ANNOUNCE_DELAY.as_millis() as Timestamp * 4;
		announcements += transport.drain_sent().len();
	}
	assert!(announcements >= config::mdns::ANNOUNCE_NUM as usize);
}
