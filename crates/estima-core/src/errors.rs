/// Every way an inbound event can be refused.
///
/// All variants are recoverable at the event boundary: the originating
/// connection gets a single `error` notification and session state is left
/// untouched.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("authenticity token rejected")]
    AuthenticityRejected,

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("participant not in session: {0}")]
    ParticipantNotInSession(String),

    #[error("invalid vote: {0}")]
    InvalidVote(String),

    #[error("voting is closed for this round")]
    VotingClosed,

    #[error("unknown deck: {0}")]
    UnknownDeck(String),

    #[error("spectators cannot vote")]
    NotAPlayer,

    #[error("payload too large: {size} > {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("invalid file type: {0}")]
    InvalidFileType(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error")]
    Internal,
}

impl SessionError {
    /// Stable wire code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthenticityRejected => "AUTHENTICITY_REJECTED",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::ParticipantNotInSession(_) => "PARTICIPANT_NOT_IN_SESSION",
            Self::InvalidVote(_) => "INVALID_VOTE",
            Self::VotingClosed => "VOTING_CLOSED",
            Self::UnknownDeck(_) => "UNKNOWN_DECK",
            Self::NotAPlayer => "NOT_A_PLAYER",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Self::InvalidFileType(_) => "INVALID_FILE_TYPE",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }
}
