//! Notifications flowing from the protocol engine and the tape back to the
//! recorder.

use std::sync::mpsc::Sender;

/// Event sent over the deck's notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeckEvent {
    /// The hardware acknowledged a play (`true`) or stop (`false`) request.
    PlayStateChanged(bool),
    /// The tape cursor moved.
    PositionChanged { position: usize, length: usize },
}

/// Sending half handed to event producers.
pub type EventSender = Sender<DeckEvent>;
