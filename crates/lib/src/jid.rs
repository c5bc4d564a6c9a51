//! WhatsApp identity (JID) helpers.
//!
//! A JID is `user@server`: individual chats live on `s.whatsapp.net`, groups on `g.us`.

/// Server suffix for group conversations.
pub const GROUP_SUFFIX: &str = "@g.us";

/// Server suffix for individual users.
pub const USER_SUFFIX: &str = "@s.whatsapp.net";

/// True when the origin identity is a group conversation.
pub fn is_group(jid: &str) -> bool {
    jid.ends_with(GROUP_SUFFIX)
}

/// The user part of a JID (everything before `@`). Returns the input when there is no `@`.
pub fn user_part(jid: &str) -> &str {
    jid.split('@').next().unwrap_or(jid)
}

/// Full user JID for a bare phone number.
pub fn user_jid(number: &str) -> String {
    format!("{}{}", number, USER_SUFFIX)
}

/// Strip everything but ASCII digits (e.g. "+254 7xx-xxx" -> "2547xxxxx").
pub fn sanitize_number(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}
