//! Opaque host object type definitions
//!
//! These are opaque types representing objects inside the dedicated server.
//! We never know their internal structure at compile time - field access
//! goes through the layout registry's per-build offset tables.

/// Opaque type for the host's server-side network handler
///
/// Owns client connections; the receiver of the disconnect, chat and
/// player-creation entry points we intercept.
#[repr(C)]
pub struct ServerNetworkHandler {
    _opaque: [u8; 0],
}

/// Opaque type for a connected server-side player
#[repr(C)]
pub struct ServerPlayer {
    _opaque: [u8; 0],
}

/// Opaque type for a client network identity (transport address + client GUID)
#[repr(C)]
pub struct NetworkIdentifier {
    _opaque: [u8; 0],
}

/// Opaque type for the primary connection request a client sends on join
#[repr(C)]
pub struct ConnectionRequest {
    _opaque: [u8; 0],
}

/// Opaque type for a sub-client (split-screen) connection request
#[repr(C)]
pub struct SubClientConnectionRequest {
    _opaque: [u8; 0],
}

/// Opaque type for an in-flight chat message record
///
/// Carries the sender and the message text; the message field is writable
/// through the layout registry before the host broadcasts it.
#[repr(C)]
pub struct ChatRecord {
    _opaque: [u8; 0],
}

/// Opaque type for the host's world/level object
#[repr(C)]
pub struct Level {
    _opaque: [u8; 0],
}

/// Sub-client slot on one connection (0 = primary, 1-3 = split-screen)
pub type SubClientId = u8;

/// Host disconnect reason code, passed through untouched
pub type DisconnectReason = i32;
