//! The periodic tick scheduler and the process-wide timer-callback table
//! (§4.6, §3 "timer callback table").
//!
//! `Table` is the user-facing timer table ("register a callback that fires
//! every N milliseconds"); [`tick`] is the per-wakeup entry point that
//! drives it alongside the resolver cache's own retransmission sweep. The
//! responder/DNS-SD FSMs are ticked separately by `Stack`, since `Table`
//! has no visibility into per-interface state.

use collections::sparse::slab::Slab;

use crate::cache::{Cache, Timestamp};
use crate::config;
use crate::error::{Error, Result};
use crate::prng::Prng;
use crate::transport::{IfaceId, Transport};

pub type TimerCallback = Box<dyn FnMut(IfaceId)>;

struct Row {
	iface: Option<IfaceId>,
	callback: TimerCallback,
	period: Timestamp,
	remaining: Timestamp,
}

/// The bounded timer-callback table (§3): each row is either empty or holds
/// `{interface filter, callback, reload period, remaining}`.
#[derive(Default)]
pub struct Table {
	slab: Slab<Row, { config::tables::MAX_TIMER_CALLBACKS }>,
}

impl Table {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a periodic callback, firing every `period` milliseconds
	/// (first fire after one full period, not immediately). `iface` scopes
	/// it to one interface for the caller's own bookkeeping; this table
	/// does not interpret it further.
	pub fn register(&mut self, iface: Option<IfaceId>, period: Timestamp, callback: TimerCallback) -> Result<usize> {
		if period == 0 {
			return Err(Error::InvalidParameter);
		}

		self.slab.insert(Row { iface, callback, period, remaining: period }).ok_or(Error::OutOfResources)
	}

	pub fn unregister(&mut self, handle: usize) {
		self.slab.remove(handle);
	}

	/// Advances every row by `elapsed` milliseconds; rows whose remaining
	/// time reaches zero fire and reload from `period`.
	pub fn advance(&mut self, elapsed: Timestamp) {
		self.slab.for_each_mut(|_, row| {
			row.remaining = row.remaining.saturating_sub(elapsed);

			if row.remaining == 0 {
				(row.callback)(row.iface.unwrap_or(0));
				row.remaining = row.period;
			}
		});
	}
}

/// One tick-loop wakeup (§4.6): drives the resolver cache's retransmission
/// sweep and the user timer table. Responder/DNS-SD FSM ticks are driven
/// separately by the caller, one call per interface.
pub fn tick<T: Transport>(transport: &mut T, cache: &mut Cache, prng: &mut Prng, timers: &mut Table, now: Timestamp, elapsed: Timestamp) {
	crate::resolve::tick(transport, cache, prng, now);
	timers.advance(elapsed);
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::cell::RefCell;
	use std::rc::Rc;

	#[test]
	fn fires_once_per_period_and_reloads() {
		let mut table = Table::new();
		let fired = Rc::new(RefCell::new(0u32));
		let counter = fired.clone();

		table.register(None, 100, Box::new(move |_| *counter.borrow_mut() += 1)).unwrap();

		table.advance(40);
		assert_eq!(*fired.borrow(), 0);

		table.advance(60);
		assert_eq!(*fired.borrow(), 1);

		table.advance(100);
		assert_eq!(*fired.borrow(), 2);
	}

	#[test]
	fn unregister_stops_future_fires() {
		let mut table = Table::new();
		let fired = Rc::new(RefCell::new(0u32));
		let counter = fired.clone();

		let handle = table.register(None, 50, Box::new(move |_| *counter.borrow_mut() += 1)).unwrap();
		table.unregister(handle);
		table.advance(100);

		assert_eq!(*fired.borrow(), 0);
	}

	#[test]
	fn zero_period_is_rejected() {
		let mut table = Table::new();
		assert_eq!(table.register(None, 0, Box::new(|_| {})), Err(Error::InvalidParameter));
	}

	#[test]
	fn full_table_rejects_registration() {
		let mut table = Table::new();
		for _ in 0..config::tables::MAX_TIMER_CALLBACKS {
			table.register(None, 1000, Box::new(|_| {})).unwrap();
		}
		assert_eq!(table.register(None, 1000, Box::new(|_| {})), Err(Error::OutOfResources));
	}
}
