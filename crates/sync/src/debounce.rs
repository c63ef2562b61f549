//! Single-slot trailing debounce timer.
//!
//! Each binding owns one [`DebounceSlot`]. Arming it aborts whatever timer
//! was armed before, so a binding never has two timers at once. Every armed
//! timer carries a sequence number; when the timer task wakes it must win
//! [`DebounceSlot::claim`] with its own number before firing. That closes the
//! window where a timer has already woken but has not yet observed its abort.

use tokio::task::JoinHandle;

#[derive(Debug)]
struct ArmedTimer {
	seq: u64,
	handle: JoinHandle<()>,
}

#[derive(Debug, Default)]
pub(crate) struct DebounceSlot {
	armed: Option<ArmedTimer>,
	next_seq: u64,
}

impl DebounceSlot {
	/// Reserves the sequence number for the next timer.
	pub fn next_seq(&mut self) -> u64 {
		self.next_seq = self.next_seq.wrapping_add(1);
		self.next_seq
	}

	/// Installs a timer, aborting the previous one. Returns true if a timer
	/// was replaced.
	pub fn arm(&mut self, seq: u64, handle: JoinHandle<()>) -> bool {
		let replaced = self.clear();
		self.armed = Some(ArmedTimer { seq, handle });
		replaced
	}

	/// Takes the slot for the timer numbered `seq`. Returns false when that
	/// timer was cleared or replaced in the meantime.
	pub fn claim(&mut self, seq: u64) -> bool {
		if self.armed.as_ref().is_some_and(|t| t.seq == seq) {
			// The claiming task is the one running; dropping its handle detaches it.
			self.armed = None;
			true
		} else {
			false
		}
	}

	/// Aborts the armed timer. Returns true if one was armed.
	pub fn clear(&mut self) -> bool {
		match self.armed.take() {
			Some(timer) => {
				timer.handle.abort();
				true
			}
			None => false,
		}
	}

	pub fn is_armed(&self) -> bool {
		self.armed.is_some()
	}
}
