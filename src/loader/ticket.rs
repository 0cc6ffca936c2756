use std::fmt;

use crate::error::DecodeError;
use crate::models::{MediaEntry, MediaKey};

/// Identity of one load request. Never reused within a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TicketId(pub(crate) u64);

impl TicketId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketState {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl TicketState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Snapshot of a ticket as handed back by `LoadScheduler::submit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub id: TicketId,
    pub key: MediaKey,
    pub generation: u64,
    pub state: TicketState,
}

/// Result of one ticket, sent from a worker to the session.
#[derive(Debug, Clone)]
pub struct Completion {
    pub ticket: TicketId,
    pub key: MediaKey,
    pub generation: u64,
    pub outcome: Result<MediaEntry, DecodeError>,
}

impl Completion {
    /// Terminal state the ticket reached.
    pub fn state(&self) -> TicketState {
        match self.outcome {
            Ok(_) => TicketState::Completed,
            Err(_) => TicketState::Failed,
        }
    }
}
