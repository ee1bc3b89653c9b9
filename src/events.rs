//! Session lifecycle events surfaced to the UI collaborator.

// crates.io
use tokio::sync::broadcast;
// self
use crate::{_prelude::*, auth::UserProfile};

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EndReason {
	/// The user logged out in this context.
	Logout,
	/// A refresh failed terminally, or a restored session's profile could not be loaded.
	RefreshFailed,
	/// Another context logged out.
	RemoteLogout,
}
impl EndReason {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			EndReason::Logout => "logout",
			EndReason::RefreshFailed => "refresh_failed",
			EndReason::RemoteLogout => "remote_logout",
		}
	}
}
impl Display for EndReason {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Lifecycle notifications; `Ended` is the "redirect to an unauthenticated entry point" cue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
	/// A session became active (login, restore, or adoption from another context).
	Started {
		/// Profile of the signed-in user, when it could be loaded.
		user: Option<UserProfile>,
	},
	/// The access token was replaced by a successful refresh.
	Refreshed,
	/// The session was torn down.
	Ended {
		/// Teardown cause.
		reason: EndReason,
	},
}

/// Fan-out channel for [`SessionEvent`]s. Emitting without subscribers is a no-op.
#[derive(Clone, Debug)]
pub struct SessionEvents(broadcast::Sender<SessionEvent>);
impl SessionEvents {
	const DEFAULT_CAPACITY: usize = 32;

	/// Creates a channel buffering up to `capacity` events per subscriber.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity.max(1));

		Self(sender)
	}

	/// Subscribes to events emitted after this call.
	pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
		self.0.subscribe()
	}

	/// Emits an event to all current subscribers.
	pub fn emit(&self, event: SessionEvent) {
		let _ = self.0.send(event);
	}
}
impl Default for SessionEvents {
	fn default() -> Self {
		Self::new(Self::DEFAULT_CAPACITY)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn emit_without_subscribers_is_silent() {
		SessionEvents::default().emit(SessionEvent::Refreshed);
	}

	#[test]
	fn subscribers_receive_events_in_order() {
		let events = SessionEvents::default();
		let mut rx = events.subscribe();

		events.emit(SessionEvent::Refreshed);
		events.emit(SessionEvent::Ended { reason: EndReason::Logout });

		assert_eq!(rx.try_recv().ok(), Some(SessionEvent::Refreshed));
		assert_eq!(rx.try_recv().ok(), Some(SessionEvent::Ended { reason: EndReason::Logout }));
	}
}
