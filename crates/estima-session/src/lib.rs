//! Session coordination: presence, the per-session voting state machine and
//! the registry that owns every live session.

pub mod policy;
pub mod presence;
pub mod registry;
pub mod session;

pub use policy::SessionPolicy;
pub use presence::{Participant, PresenceTracker};
pub use registry::SessionRegistry;
pub use session::{
    DisconnectOutcome, JoinOutcome, LeaveOutcome, Reveal, RoundState, Session, StaleSweep, VoteOutcome,
};
