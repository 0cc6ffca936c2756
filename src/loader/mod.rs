//! Background loading for the media viewer.
//!
//! - `LoadScheduler` - bounded decode worker pool with per-key dedup
//! - `LoadTicket` / `TicketId` - one cancellable load request
//! - `Completion` - a ticket's result on its way back to the session

pub mod scheduler;
pub mod ticket;

pub use scheduler::LoadScheduler;
pub use ticket::{Completion, LoadTicket, TicketId, TicketState};
