//! Input validation for inbound event fields.

use rand::RngCore;

use crate::errors::SessionError;
use crate::ids::SessionId;

/// Minimum length of a connection authenticity token, in hex characters.
pub const MIN_TOKEN_LENGTH: usize = 32;

pub const MAX_SESSION_ID_LENGTH: usize = 50;
pub const MAX_DISPLAY_NAME_LENGTH: usize = 50;
pub const MAX_AVATAR_REF_LENGTH: usize = 256;

/// Prefix every stored avatar reference starts with.
pub const AVATAR_PREFIX: &str = "/uploads/";

/// Emoji reactions a participant may send.
pub const ALLOWED_EMOJIS: &[&str] = &["👍", "👎", "🎉", "😂", "🤔", "😮", "❤️", "🔥", "☕", "🚀"];

/// Mini-games a participant may start.
pub const ALLOWED_MINI_GAMES: &[&str] = &["snake", "tic-tac-toe", "reaction"];

/// Issue a fresh per-connection authenticity token (32 lowercase hex chars).
pub fn issue_token() -> String {
    let mut bytes = [0u8; MIN_TOKEN_LENGTH / 2];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn is_well_formed_token(token: &str) -> bool {
    token.len() >= MIN_TOKEN_LENGTH && token.chars().all(|c| c.is_ascii_hexdigit())
}

/// Check a presented token against the one issued to the connection.
pub fn verify_token(presented: Option<&str>, issued: &str) -> Result<(), SessionError> {
    match presented {
        Some(token) if is_well_formed_token(token) && token == issued => Ok(()),
        _ => Err(SessionError::AuthenticityRejected),
    }
}

pub fn parse_session_id(raw: &str) -> Result<SessionId, SessionError> {
    if raw.is_empty() || raw.len() > MAX_SESSION_ID_LENGTH {
        return Err(SessionError::invalid_request(format!(
            "session id must be 1-{MAX_SESSION_ID_LENGTH} characters"
        )));
    }
    if !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(SessionError::invalid_request("session id must be alphanumeric"));
    }
    Ok(SessionId::from_raw(raw))
}

/// Trim and check a display name.
pub fn validate_display_name(name: &str) -> Result<String, SessionError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SessionError::invalid_request("display name must not be blank"));
    }
    if trimmed.chars().count() > MAX_DISPLAY_NAME_LENGTH {
        return Err(SessionError::invalid_request(format!(
            "display name exceeds {MAX_DISPLAY_NAME_LENGTH} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Avatar references must point inside the upload area.
pub fn validate_avatar_ref(path: &str) -> Result<(), SessionError> {
    let ok = path.len() <= MAX_AVATAR_REF_LENGTH
        && path.starts_with(AVATAR_PREFIX)
        && !path.contains("..")
        && !path.contains('~');
    if ok {
        Ok(())
    } else {
        Err(SessionError::invalid_request(format!("invalid avatar reference: {path}")))
    }
}

pub fn validate_emoji(emoji: &str) -> Result<(), SessionError> {
    if ALLOWED_EMOJIS.contains(&emoji) {
        Ok(())
    } else {
        Err(SessionError::invalid_request("emoji not allowed"))
    }
}

pub fn validate_mini_game(game_type: &str) -> Result<(), SessionError> {
    if ALLOWED_MINI_GAMES.contains(&game_type) {
        Ok(())
    } else {
        Err(SessionError::invalid_request(format!("unknown mini-game: {game_type}")))
    }
}
