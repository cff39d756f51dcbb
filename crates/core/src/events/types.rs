//! Event types
//!
//! Each event owns its mutable payload for the duration of dispatch; the
//! shim that raised it reads the (possibly rewritten) payload back
//! afterwards and acts on it.

use shale_sdk::types::ServerPlayer;

/// Well-known event names
pub mod names {
    pub const PLAYER_KICK: &str = "player_kick";
    pub const PLAYER_CHAT: &str = "player_chat";
    pub const PLAYER_LOGIN: &str = "player_login";
    pub const SERVER_ANNOUNCEMENT: &str = "server_announcement";
}

/// Payload of an intercepted host operation
///
/// Player pointers are borrowed from the host for the duration of the
/// originating call; listeners must not retain them past dispatch.
pub enum EventPayload {
    PlayerKick {
        player: *mut ServerPlayer,
        /// Reason shown to the kicked client; listeners may rewrite it
        reason: String,
    },
    PlayerChat {
        player: *mut ServerPlayer,
        /// Chat text; listeners may rewrite it before it is broadcast
        message: String,
    },
    PlayerLogin {
        player: *mut ServerPlayer,
        /// Set by a listener to refuse the login with this message
        kick_message: Option<String>,
    },
    ServerAnnouncement {
        message: String,
    },
}

/// A cancellable, mutable event raised by a shim
pub struct InterceptEvent {
    name: &'static str,
    cancelled: bool,
    payload: EventPayload,
}

impl InterceptEvent {
    pub fn player_kick(player: *mut ServerPlayer, reason: String) -> Self {
        Self {
            name: names::PLAYER_KICK,
            cancelled: false,
            payload: EventPayload::PlayerKick { player, reason },
        }
    }

    pub fn player_chat(player: *mut ServerPlayer, message: String) -> Self {
        Self {
            name: names::PLAYER_CHAT,
            cancelled: false,
            payload: EventPayload::PlayerChat { player, message },
        }
    }

    pub fn player_login(player: *mut ServerPlayer) -> Self {
        Self {
            name: names::PLAYER_LOGIN,
            cancelled: false,
            payload: EventPayload::PlayerLogin {
                player,
                kick_message: None,
            },
        }
    }

    pub fn server_announcement(message: String) -> Self {
        Self {
            name: names::SERVER_ANNOUNCEMENT,
            cancelled: false,
            payload: EventPayload::ServerAnnouncement { message },
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Suppress the host behavior this event was raised for
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn set_cancelled(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut EventPayload {
        &mut self.payload
    }

    pub fn into_payload(self) -> EventPayload {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag() {
        let mut event = InterceptEvent::player_kick(std::ptr::null_mut(), "bye".into());
        assert_eq!(event.name(), names::PLAYER_KICK);
        assert!(!event.is_cancelled());

        event.cancel();
        assert!(event.is_cancelled());

        event.set_cancelled(false);
        assert!(!event.is_cancelled());
    }

    #[test]
    fn test_payload_rewrite() {
        let mut event = InterceptEvent::player_chat(std::ptr::null_mut(), "hello".into());

        if let EventPayload::PlayerChat { message, .. } = event.payload_mut() {
            *message = "rewritten".to_string();
        }

        match event.into_payload() {
            EventPayload::PlayerChat { message, .. } => assert_eq!(message, "rewritten"),
            _ => panic!("payload variant changed"),
        }
    }

    #[test]
    fn test_login_starts_without_kick_message() {
        let event = InterceptEvent::player_login(std::ptr::null_mut());
        match event.payload() {
            EventPayload::PlayerLogin { kick_message, .. } => assert!(kick_message.is_none()),
            _ => panic!("wrong payload variant"),
        }
    }
}
