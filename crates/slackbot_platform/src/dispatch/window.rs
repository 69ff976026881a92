#![forbid(unsafe_code)]

use std::collections::VecDeque;

use slackbot_domain::EventId;

/// Number of recent event ids remembered for dedup.
pub const PROCESSED_WINDOW_CAPACITY: usize = 5;

/// Insertion-ordered recency set of processed event ids; front is the most recent.
///
/// Re-seeing an id does not refresh it: duplicates are rejected before `record` is called.
#[derive(Debug, Clone)]
pub struct ProcessedWindow {
	ids: VecDeque<EventId>,
	capacity: usize,
}

impl Default for ProcessedWindow {
	fn default() -> Self {
		Self::new()
	}
}

impl ProcessedWindow {
	pub fn new() -> Self {
		Self::with_capacity(PROCESSED_WINDOW_CAPACITY)
	}

	pub fn with_capacity(capacity: usize) -> Self {
		let capacity = capacity.max(1);
		Self {
			ids: VecDeque::with_capacity(capacity + 1),
			capacity,
		}
	}

	pub fn contains(&self, id: &EventId) -> bool {
		self.ids.contains(id)
	}

	/// Push `id` to the front, evicting the oldest entry when over capacity.
	pub fn record(&mut self, id: EventId) -> Option<EventId> {
		self.ids.push_front(id);
		if self.ids.len() > self.capacity {
			self.ids.pop_back()
		} else {
			None
		}
	}

	pub fn len(&self) -> usize {
		self.ids.len()
	}

	pub fn is_empty(&self) -> bool {
		self.ids.is_empty()
	}

	/// Ids from most to least recent.
	pub fn iter(&self) -> impl Iterator<Item = &EventId> {
		self.ids.iter()
	}
}
