//! The process-wide link-change callback table (§3 "link-change callback
//! table", §4's component H) and its dispatcher.
//!
//! Per §5, a link-change notification is the one place this crate invokes a
//! user callback with the stack-wide mutex released — the actor layer
//! (`lib.rs`) realizes that by driving [`Table::notify`]'s callbacks through
//! `cx.defer(...)` rather than calling them inline from inside an `Actor<Stack>`
//! method. This module only holds the table; it has no opinion on how its
//! caller schedules the release.

use collections::sparse::slab::Slab;

use crate::config;
use crate::error::{Error, Result};
use crate::transport::IfaceId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
	Up,
	Down,
}

pub type LinkCallback = Box<dyn FnMut(IfaceId, LinkState)>;

struct Row {
	/// `None` means "all interfaces".
	iface: Option<IfaceId>,
	callback: LinkCallback,
}

/// The bounded link-change callback table (§3).
#[derive(Default)]
pub struct Table {
	slab: Slab<Row, { config::tables::MAX_LINK_CHANGE_CALLBACKS }>,
}

impl Table {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, iface: Option<IfaceId>, callback: LinkCallback) -> Result<usize> {
		self.slab.insert(Row { iface, callback }).ok_or(Error::OutOfResources)
	}

	pub fn unregister(&mut self, handle: usize) {
		self.slab.remove(handle);
	}

	/// Invokes every callback whose interface filter matches `iface`
	/// (§4's "propagate link up/down to ... registered callbacks").
	pub fn notify(&mut self, iface: IfaceId, state: LinkState) {
		self.slab.for_each_mut(|_, row| {
			if row.iface.map_or(true, |f| f == iface) {
				(row.callback)(iface, state);
			}
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::cell::RefCell;
	use std::rc::Rc;

	#[test]
	fn unfiltered_callback_sees_every_interface() {
		let mut table = Table::new();
		let seen = Rc::new(RefCell::new(Vec::new()));
		let log = seen.clone();

		table.register(None, Box::new(move |iface, state| log.borrow_mut().push((iface, state)))).unwrap();

		table.notify(0, LinkState::Up);
		table.notify(1, LinkState::Down);

		assert_eq!(*seen.borrow(), vec![(0, LinkState::Up), (1, LinkState::Down)]);
	}

	#[test]
	fn filtered_callback_ignores_other_interfaces() {
		let mut table = Table::new();
		let seen = Rc::new(RefCell::new(Vec::new()));
		let log = seen.clone();

		table.register(Some(1), Box::new(move |iface, state| log.borrow_mut().push((iface, state)))).unwrap();

		table.notify(0, LinkState::Up);
		table.notify(1, LinkState::Down);

		assert_eq!(*seen.borrow(), vec![(1, LinkState::Down)]);
	}

	#[test]
	fn unregister_stops_notifications() {
		let mut table = Table::new();
		let seen = Rc::new(RefCell::new(0u32));
		let log = seen.clone();

		let handle = table.register(None, Box::new(move |_, _| *log.borrow_mut() += 1)).unwrap();
		table.unregister(handle);
		table.notify(0, LinkState::Up);

		assert_eq!(*seen.borrow(), 0);
	}
}
