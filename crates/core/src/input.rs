//! Keyboard input arbitration.
//!
//! While a KVM session holds the keyboard, the relay transport captures every
//! key event. Local controls (display picker, hotkey menu, text fields) still
//! need typing, so the session installs its own capture listeners ahead of the
//! transport's and stops propagation when focus sits on such a control.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPhase {
	KeyDown,
	KeyUp,
	KeyPress,
}

impl KeyPhase {
	pub const ALL: [KeyPhase; 3] = [KeyPhase::KeyDown, KeyPhase::KeyUp, KeyPhase::KeyPress];
}

/// One node of the focused element's ancestry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
	pub tag: String,
	pub classes: Vec<String>,
	pub content_editable: bool,
}

impl Element {
	pub fn new(tag: impl Into<String>) -> Self {
		Self {
			tag: tag.into(),
			..Self::default()
		}
	}

	pub fn with_class(mut self, class: impl Into<String>) -> Self {
		self.classes.push(class.into());
		self
	}

	pub fn editable(mut self) -> Self {
		self.content_editable = true;
		self
	}

	fn is_tag(&self, tag: &str) -> bool {
		self.tag.eq_ignore_ascii_case(tag)
	}

	fn has_class(&self, class: &str) -> bool {
		self.classes.iter().any(|c| c == class)
	}
}

/// Focused element plus its ancestors, nearest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FocusedElement {
	pub element: Element,
	pub ancestors: Vec<Element>,
}

impl FocusedElement {
	pub fn new(element: Element) -> Self {
		Self {
			element,
			ancestors: Vec::new(),
		}
	}

	pub fn within(mut self, ancestor: Element) -> Self {
		self.ancestors.push(ancestor);
		self
	}

	/// `true` when keystrokes belong to a local control rather than the remote screen.
	pub fn is_local_control(&self) -> bool {
		let el = &self.element;
		if el.is_tag("input") || el.is_tag("textarea") || el.is_tag("select") || el.content_editable {
			return true;
		}
		std::iter::once(el)
			.chain(self.ancestors.iter())
			.any(|node| node.is_tag("mat-select") || node.is_tag("mat-form-field") || node.has_class("mat-select-panel"))
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
	pub phase: KeyPhase,
	pub key: String,
	pub focus: Option<FocusedElement>,
}

impl KeyEvent {
	pub fn new(phase: KeyPhase, key: impl Into<String>) -> Self {
		Self {
			phase,
			key: key.into(),
			focus: None,
		}
	}

	pub fn focused_on(mut self, focus: FocusedElement) -> Self {
		self.focus = Some(focus);
		self
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
	Continue,
	/// Stop immediately; later listeners, including same-priority ones, do not run.
	Stop,
}

pub type Listener = Arc<dyn Fn(&KeyEvent) -> Propagation + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Capture ordering; lower runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CapturePriority(pub u8);

impl CapturePriority {
	pub const ARBITRATION: CapturePriority = CapturePriority(0);
	pub const TRANSPORT: CapturePriority = CapturePriority(10);
}

/// Shared registry of capture-phase key listeners.
pub trait KeyEventHub: Send + Sync {
	fn add_listener(&self, phase: KeyPhase, priority: CapturePriority, listener: Listener) -> ListenerId;

	/// Returns `false` if `id` was not registered.
	fn remove_listener(&self, id: ListenerId) -> bool;
}

struct Registration {
	id: ListenerId,
	phase: KeyPhase,
	priority: CapturePriority,
	listener: Listener,
}

/// In-process [`KeyEventHub`] that also dispatches events.
#[derive(Default)]
pub struct CaptureHub {
	next_id: AtomicU64,
	registrations: Mutex<Vec<Registration>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
	pub delivered: usize,
	pub stopped: bool,
}

impl CaptureHub {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn listener_count(&self) -> usize {
		self.registrations.lock().len()
	}

	/// Runs listeners for `event.phase` by priority, then registration order.
	pub fn dispatch(&self, event: &KeyEvent) -> Dispatch {
		let listeners: Vec<Listener> = {
			let registrations = self.registrations.lock();
			let mut matching: Vec<&Registration> = registrations.iter().filter(|r| r.phase == event.phase).collect();
			matching.sort_by_key(|r| (r.priority, r.id));
			matching.into_iter().map(|r| Arc::clone(&r.listener)).collect()
		};

		let mut delivered = 0;
		for listener in listeners {
			delivered += 1;
			if listener(event) == Propagation::Stop {
				return Dispatch { delivered, stopped: true };
			}
		}
		Dispatch { delivered, stopped: false }
	}
}

impl KeyEventHub for CaptureHub {
	fn add_listener(&self, phase: KeyPhase, priority: CapturePriority, listener: Listener) -> ListenerId {
		let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
		self.registrations.lock().push(Registration {
			id,
			phase,
			priority,
			listener,
		});
		id
	}

	fn remove_listener(&self, id: ListenerId) -> bool {
		let mut registrations = self.registrations.lock();
		let before = registrations.len();
		registrations.retain(|r| r.id != id);
		registrations.len() != before
	}
}

/// Capture listeners owned by one session.
///
/// Removes exactly the listeners it installed, on [`detach`](Self::detach) or on drop.
pub struct InputArbitration {
	hub: Arc<dyn KeyEventHub>,
	installed: Vec<ListenerId>,
}

impl InputArbitration {
	/// Installs keydown/keyup/keypress listeners that stop propagation while
	/// `capturing` is set and focus is on a local control.
	pub fn attach(hub: Arc<dyn KeyEventHub>, capturing: Arc<AtomicBool>) -> Self {
		let listener: Listener = Arc::new(move |event: &KeyEvent| {
			let local = event.focus.as_ref().is_some_and(FocusedElement::is_local_control);
			if capturing.load(Ordering::Acquire) && local {
				Propagation::Stop
			} else {
				Propagation::Continue
			}
		});
		let installed = KeyPhase::ALL
			.iter()
			.map(|phase| hub.add_listener(*phase, CapturePriority::ARBITRATION, Arc::clone(&listener)))
			.collect();
		Self { hub, installed }
	}

	pub fn is_attached(&self) -> bool {
		!self.installed.is_empty()
	}

	pub fn detach(&mut self) {
		for id in self.installed.drain(..) {
			self.hub.remove_listener(id);
		}
	}
}

impl Drop for InputArbitration {
	fn drop(&mut self) {
		self.detach();
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicUsize;

	use super::*;

	fn transport_listener(hub: &CaptureHub, seen: &Arc<AtomicUsize>) {
		for phase in KeyPhase::ALL {
			let seen = Arc::clone(seen);
			hub.add_listener(
				phase,
				CapturePriority::TRANSPORT,
				Arc::new(move |_: &KeyEvent| {
					seen.fetch_add(1, Ordering::SeqCst);
					Propagation::Continue
				}),
			);
		}
	}

	#[test]
	fn content_editable_focus_is_kept_from_transport() {
		let hub = Arc::new(CaptureHub::new());
		let seen = Arc::new(AtomicUsize::new(0));
		transport_listener(&hub, &seen);
		let capturing = Arc::new(AtomicBool::new(true));
		let _arbitration = InputArbitration::attach(hub.clone(), capturing);

		let focus = FocusedElement::new(Element::new("div").editable());
		let dispatch = hub.dispatch(&KeyEvent::new(KeyPhase::KeyDown, "a").focused_on(focus));

		assert!(dispatch.stopped);
		assert_eq!(seen.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn remote_screen_focus_reaches_transport() {
		let hub = Arc::new(CaptureHub::new());
		let seen = Arc::new(AtomicUsize::new(0));
		transport_listener(&hub, &seen);
		let _arbitration = InputArbitration::attach(hub.clone(), Arc::new(AtomicBool::new(true)));

		let focus = FocusedElement::new(Element::new("canvas"));
		hub.dispatch(&KeyEvent::new(KeyPhase::KeyUp, "a").focused_on(focus));
		hub.dispatch(&KeyEvent::new(KeyPhase::KeyPress, "a"));
		assert_eq!(seen.load(Ordering::SeqCst), 2);
	}

	#[test]
	fn local_controls_pass_through_when_not_capturing() {
		let hub = Arc::new(CaptureHub::new());
		let seen = Arc::new(AtomicUsize::new(0));
		transport_listener(&hub, &seen);
		let _arbitration = InputArbitration::attach(hub.clone(), Arc::new(AtomicBool::new(false)));

		let focus = FocusedElement::new(Element::new("input"));
		assert!(!hub.dispatch(&KeyEvent::new(KeyPhase::KeyDown, "a").focused_on(focus)).stopped);
		assert_eq!(seen.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn nested_form_field_counts_as_local() {
		let option = FocusedElement::new(Element::new("mat-option")).within(Element::new("div").with_class("mat-select-panel"));
		assert!(option.is_local_control());
		let span = FocusedElement::new(Element::new("span")).within(Element::new("MAT-FORM-FIELD"));
		assert!(span.is_local_control());
		assert!(!FocusedElement::new(Element::new("button")).is_local_control());
	}

	#[test]
	fn detach_removes_only_own_listeners() {
		let hub = Arc::new(CaptureHub::new());
		let seen = Arc::new(AtomicUsize::new(0));
		transport_listener(&hub, &seen);

		for _ in 0..5 {
			let mut arbitration = InputArbitration::attach(hub.clone(), Arc::new(AtomicBool::new(true)));
			assert_eq!(hub.listener_count(), 6);
			arbitration.detach();
			arbitration.detach();
		}
		{
			let _dropped = InputArbitration::attach(hub.clone(), Arc::new(AtomicBool::new(true)));
		}
		assert_eq!(hub.listener_count(), 3);
	}
}
