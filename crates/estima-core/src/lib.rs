pub mod aggregate;
pub mod deck;
pub mod errors;
pub mod ids;
pub mod notifications;
pub mod validation;

pub use aggregate::{aggregate, AggregateResult, DEFAULT_CONSENSUS_THRESHOLD};
pub use deck::{CardValue, DeckKind};
pub use errors::SessionError;
pub use ids::{ParticipantId, SessionId};
