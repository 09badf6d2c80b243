//! The closed error set callers of this crate can observe (§7).
//!
//! Codec-level failures (`InvalidMessage`, `TruncatedMessage`, `InvalidLabel`,
//! `PointerLoop`) are produced internally by [`crate::codec`] but MUST NOT be
//! surfaced to a remote peer: a responder that fails to parse an inbound
//! mDNS/LLMNR/NBNS packet drops it and logs at `debug!`, it never replies
//! with an error. They remain part of this enum because callers of the
//! codec directly (tests, other modules) do observe them.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
	#[error("invalid parameter")]
	InvalidParameter,
	#[error("out of memory")]
	OutOfMemory,
	#[error("out of resources")]
	OutOfResources,
	#[error("no DNS server configured")]
	NoDnsServer,
	#[error("invalid address")]
	InvalidAddress,
	#[error("malformed DNS message")]
	InvalidMessage,
	#[error("message truncated")]
	TruncatedMessage,
	#[error("label longer than 63 octets")]
	InvalidLabel,
	#[error("name is not well-formed")]
	InvalidName,
	#[error("pointer compression recursion exceeded its bound")]
	PointerLoop,
	#[error("message too long to encode")]
	MessageTooLong,
	#[error("unexpected response")]
	UnexpectedResponse,
	#[error("operation timed out")]
	Timeout,
	#[error("operation would block")]
	WouldBlock,
	#[error("resolution in progress")]
	InProgress,
	#[error("operation invalid in current state")]
	WrongState,
	#[error("operation failed")]
	Failure,
}

pub type Result<T = (), E = Error> = core::result::Result<T, E>;
