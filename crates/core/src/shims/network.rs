//! Network handler shims
//!
//! Intercepts the host's player-facing network operations: kicks, chat
//! broadcast, login and the server announcement refresh. Each shim raises
//! an event on the bridge; listeners may rewrite the payload or cancel
//! the host call outright.
//!
//! Login bridging is shared between the create and load paths, so both
//! raise the same event and refuse a login the same way.

use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use shale_sdk::cxx::{StdString, StdStringBuf};
use shale_sdk::types::{
    ChatRecord, ConnectionRequest, DisconnectReason, NetworkIdentifier, ServerNetworkHandler,
    ServerPlayer, SubClientConnectionRequest, SubClientId,
};

use crate::events::{EventBridge, EventPayload, InterceptEvent};
use crate::hooks::HookManager;
use crate::layout::{LayoutError, LayoutRegistry};
use crate::shim::{dispatch, ShimContext, ShimDecision, SERVER_THREAD};
use crate::view::{HostField, HostObjectView};

/// Stable per-session id the host assigns each player
static PLAYER_RUNTIME_ID: HostField<u64> = HostField::new("ServerPlayer", "runtime_id");

use super::ShimError;

/// Number of hookable network shims
pub const SHIM_COUNT: usize = 5;

// Logical target names, as they appear in the layout table.
const DISCONNECT_CLIENT: &str = "ServerNetworkHandler::disconnectClient";
const DISPLAY_GAME_MESSAGE: &str = "ServerNetworkHandler::_displayGameMessage";
const CREATE_NEW_PLAYER: &str = "ServerNetworkHandler::_createNewPlayer";
const TRY_LOAD_PLAYER: &str = "ServerNetworkHandler::tryLoadPlayer";
const UPDATE_ANNOUNCEMENT: &str = "ServerNetworkHandler::updateServerAnnouncement";

// Resolved but never hooked; called outbound.
const GET_SERVER_PLAYER: &str = "ServerNetworkHandler::_getServerPlayer";
const PLAYER_DISCONNECT: &str = "ServerPlayer::disconnect";

pub type DisconnectClientFn = unsafe extern "C" fn(
    *mut ServerNetworkHandler,
    *const NetworkIdentifier,
    SubClientId,
    DisconnectReason,
    *const StdString,
    bool,
);
pub type DisplayGameMessageFn =
    unsafe extern "C" fn(*mut ServerNetworkHandler, *const ServerPlayer, *mut ChatRecord);
pub type CreateNewPlayerFn = unsafe extern "C" fn(
    *mut ServerNetworkHandler,
    *const NetworkIdentifier,
    *const ConnectionRequest,
    SubClientId,
) -> *mut ServerPlayer;
pub type TryLoadPlayerFn = unsafe extern "C" fn(
    *mut ServerNetworkHandler,
    *mut ServerPlayer,
    *const SubClientConnectionRequest,
) -> bool;
pub type UpdateAnnouncementFn = unsafe extern "C" fn(*mut ServerNetworkHandler, *const StdString);
pub type GetServerPlayerFn = unsafe extern "C" fn(
    *mut ServerNetworkHandler,
    *const NetworkIdentifier,
    SubClientId,
) -> *mut ServerPlayer;
pub type PlayerDisconnectFn = unsafe extern "C" fn(*mut ServerPlayer, *const StdString);

// Original-implementation pointers, stored at install time.
static ORIGINAL_DISCONNECT: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());
static ORIGINAL_DISPLAY_MESSAGE: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());
static ORIGINAL_CREATE_PLAYER: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());
static ORIGINAL_TRY_LOAD: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());
static ORIGINAL_ANNOUNCEMENT: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());

// Outbound host entry points, resolved but not hooked.
static LOOKUP_PLAYER: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());
static KICK_PLAYER: AtomicPtr<c_void> = AtomicPtr::new(ptr::null_mut());

/// What the bridge decided about a rewritable host call
#[derive(Debug, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// A listener cancelled; the host call is suppressed
    Cancelled,
    /// No listener changed anything; forward untouched
    Unchanged,
    /// Forward with this rewritten text
    Rewritten(String),
}

/// Raise a kick event; returns what to do with the disconnect
pub fn bridge_player_kick(
    bridge: &EventBridge,
    player: *mut ServerPlayer,
    reason: &str,
) -> BridgeOutcome {
    let mut event = InterceptEvent::player_kick(player, reason.to_string());
    bridge.dispatch(&mut event);

    if event.is_cancelled() {
        return BridgeOutcome::Cancelled;
    }
    match event.into_payload() {
        EventPayload::PlayerKick { reason: new, .. } if new != reason => {
            BridgeOutcome::Rewritten(new)
        }
        _ => BridgeOutcome::Unchanged,
    }
}

/// Raise a chat event; returns what to do with the broadcast
pub fn bridge_player_chat(
    bridge: &EventBridge,
    player: *mut ServerPlayer,
    message: &str,
) -> BridgeOutcome {
    let mut event = InterceptEvent::player_chat(player, message.to_string());
    bridge.dispatch(&mut event);

    if event.is_cancelled() {
        return BridgeOutcome::Cancelled;
    }
    match event.into_payload() {
        EventPayload::PlayerChat { message: new, .. } if new != message => {
            BridgeOutcome::Rewritten(new)
        }
        _ => BridgeOutcome::Unchanged,
    }
}

/// Raise a login event for a newly created or loaded player
///
/// Returns `Some(kick_message)` when a listener refused the login. Both
/// login paths call this, so the refusal semantics cannot drift apart.
pub fn bridge_player_login(bridge: &EventBridge, player: *mut ServerPlayer) -> Option<String> {
    let mut event = InterceptEvent::player_login(player);
    bridge.dispatch(&mut event);

    let refused = event.is_cancelled();
    match event.into_payload() {
        EventPayload::PlayerLogin { kick_message, .. } if refused => {
            Some(kick_message.unwrap_or_else(|| "Disconnected from server".to_string()))
        }
        _ => None,
    }
}

/// Raise an announcement event; returns what to do with the refresh
pub fn bridge_server_announcement(bridge: &EventBridge, message: &str) -> BridgeOutcome {
    let mut event = InterceptEvent::server_announcement(message.to_string());
    bridge.dispatch(&mut event);

    if event.is_cancelled() {
        return BridgeOutcome::Cancelled;
    }
    match event.into_payload() {
        EventPayload::ServerAnnouncement { message: new } if new != message => {
            BridgeOutcome::Rewritten(new)
        }
        _ => BridgeOutcome::Unchanged,
    }
}

/// Temporarily replace a host `std::string` slot, restoring it on drop
///
/// The replacement's backing buffer must outlive the patch; callers keep
/// the owning `StdStringBuf` alive across the original call.
struct ScopedFieldPatch {
    slot: *mut StdString,
    saved: StdString,
}

impl ScopedFieldPatch {
    /// # Safety
    /// `slot` must point at a live host `std::string` that nothing else
    /// mutates while the patch is held.
    unsafe fn apply(slot: *mut StdString, replacement: *const StdString) -> Self {
        let saved = ptr::read(slot);
        ptr::write(slot, ptr::read(replacement));
        Self { slot, saved }
    }
}

impl Drop for ScopedFieldPatch {
    fn drop(&mut self) {
        unsafe { ptr::write(self.slot, ptr::read(&self.saved)) };
    }
}

unsafe fn lookup_player(
    handler: *mut ServerNetworkHandler,
    net_id: *const NetworkIdentifier,
    sub_id: SubClientId,
) -> *mut ServerPlayer {
    let ptr = LOOKUP_PLAYER.load(Ordering::Acquire);
    if ptr.is_null() {
        return std::ptr::null_mut();
    }
    let f: GetServerPlayerFn = std::mem::transmute(ptr);
    f(handler, net_id, sub_id)
}

/// Display name of a player, or a placeholder when it cannot be read
unsafe fn player_name(registry: &LayoutRegistry, player: *const ServerPlayer) -> String {
    if let Some(view) = HostObjectView::new(player as *const u8 as *mut u8) {
        if let Ok(name) = view.read_std_string(registry, "ServerPlayer", "name") {
            return name;
        }
    }
    "<unknown>".to_string()
}

/// Disconnect a player whose login a listener refused
unsafe fn refuse_login(player: *mut ServerPlayer, message: &str) {
    if let Some(registry) = crate::layout::global_registry() {
        if let Ok(id) = PLAYER_RUNTIME_ID.read(registry, player as *const u8) {
            tracing::info!("Refusing login for player {:#x}: {}", id, message);
        }
    }

    let ptr = KICK_PLAYER.load(Ordering::Acquire);
    if ptr.is_null() {
        tracing::warn!("Login refused but '{}' is unresolved, player stays", PLAYER_DISCONNECT);
        return;
    }
    let f: PlayerDisconnectFn = std::mem::transmute(ptr);
    let buf = StdStringBuf::new(message);
    f(player, buf.as_raw());
}

unsafe extern "C" fn shim_disconnect_client(
    handler: *mut ServerNetworkHandler,
    net_id: *const NetworkIdentifier,
    sub_id: SubClientId,
    reason: DisconnectReason,
    message: *const StdString,
    skip_message: bool,
) {
    let raw = ORIGINAL_DISCONNECT.load(Ordering::Acquire);
    if raw.is_null() {
        return;
    }
    let original: DisconnectClientFn = std::mem::transmute(raw);

    let ctx = ShimContext {
        name: DISCONNECT_CLIENT,
        reentrant: false,
        server_thread_only: true,
    };
    dispatch(
        &ctx,
        &SERVER_THREAD,
        || unsafe { original(handler, net_id, sub_id, reason, message, skip_message) },
        || {
            let text = if message.is_null() {
                String::new()
            } else {
                unsafe { (*message).to_string_lossy() }
            };
            let player = unsafe { lookup_player(handler, net_id, sub_id) };

            match bridge_player_kick(crate::events::bridge(), player, &text) {
                BridgeOutcome::Cancelled => ShimDecision::Replace(()),
                BridgeOutcome::Unchanged => ShimDecision::Forward,
                BridgeOutcome::Rewritten(new) => ShimDecision::Invoke(Box::new(move || {
                    // The buffer must outlive the host call.
                    let buf = StdStringBuf::new(&new);
                    unsafe { original(handler, net_id, sub_id, reason, buf.as_raw(), skip_message) };
                })),
            }
        },
        |_| {},
    );
}

unsafe extern "C" fn shim_display_game_message(
    handler: *mut ServerNetworkHandler,
    player: *const ServerPlayer,
    chat: *mut ChatRecord,
) {
    let raw = ORIGINAL_DISPLAY_MESSAGE.load(Ordering::Acquire);
    if raw.is_null() {
        return;
    }
    let original: DisplayGameMessageFn = std::mem::transmute(raw);

    let ctx = ShimContext {
        name: DISPLAY_GAME_MESSAGE,
        reentrant: false,
        server_thread_only: true,
    };
    dispatch(
        &ctx,
        &SERVER_THREAD,
        || unsafe { original(handler, player, chat) },
        || {
            let Some(registry) = crate::layout::global_registry() else {
                return ShimDecision::Forward;
            };
            let offset = match registry.field_offset("ChatRecord", "message") {
                Ok(offset) => offset,
                Err(LayoutError::RegistryClosed) => return ShimDecision::Forward,
                Err(e) => {
                    tracing::warn!("Chat record layout unavailable: {}", e);
                    return ShimDecision::Forward;
                }
            };
            let Some(view) = (unsafe { HostObjectView::new(chat as *mut u8) }) else {
                return ShimDecision::Forward;
            };
            let text = match unsafe { view.read_std_string(registry, "ChatRecord", "message") } {
                Ok(text) => text,
                Err(_) => return ShimDecision::Forward,
            };
            let sender = unsafe { player_name(registry, player) };
            let slot = unsafe { view.as_ptr().offset(offset as isize) } as *mut StdString;

            // The chat line is logged as it actually goes out, after
            // listeners had their say.
            match bridge_player_chat(crate::events::bridge(), player as *mut ServerPlayer, &text) {
                BridgeOutcome::Cancelled => {
                    tracing::debug!("Chat from {} suppressed", sender);
                    ShimDecision::Replace(())
                }
                BridgeOutcome::Unchanged => {
                    tracing::info!("<{}> {}", sender, text);
                    ShimDecision::Forward
                }
                BridgeOutcome::Rewritten(new) => {
                    tracing::info!("<{}> {}", sender, new);
                    ShimDecision::Invoke(Box::new(move || unsafe {
                        let buf = StdStringBuf::new(&new);
                        let _patch = ScopedFieldPatch::apply(slot, buf.as_raw());
                        original(handler, player, chat);
                    }))
                }
            }
        },
        |_| {},
    );
}

unsafe extern "C" fn shim_create_new_player(
    handler: *mut ServerNetworkHandler,
    net_id: *const NetworkIdentifier,
    request: *const ConnectionRequest,
    sub_id: SubClientId,
) -> *mut ServerPlayer {
    let raw = ORIGINAL_CREATE_PLAYER.load(Ordering::Acquire);
    if raw.is_null() {
        return std::ptr::null_mut();
    }
    let original: CreateNewPlayerFn = std::mem::transmute(raw);

    let ctx = ShimContext {
        name: CREATE_NEW_PLAYER,
        reentrant: false,
        server_thread_only: true,
    };
    dispatch(
        &ctx,
        &SERVER_THREAD,
        || unsafe { original(handler, net_id, request, sub_id) },
        || ShimDecision::Forward,
        |player| {
            // The player exists only after the original ran, so login
            // bridging happens on the way out.
            if player.is_null() {
                return;
            }
            if let Some(message) = bridge_player_login(crate::events::bridge(), *player) {
                unsafe { refuse_login(*player, &message) };
            }
        },
    )
}

unsafe extern "C" fn shim_try_load_player(
    handler: *mut ServerNetworkHandler,
    player: *mut ServerPlayer,
    request: *const SubClientConnectionRequest,
) -> bool {
    let raw = ORIGINAL_TRY_LOAD.load(Ordering::Acquire);
    if raw.is_null() {
        return false;
    }
    let original: TryLoadPlayerFn = std::mem::transmute(raw);

    let ctx = ShimContext {
        name: TRY_LOAD_PLAYER,
        reentrant: false,
        server_thread_only: true,
    };
    dispatch(
        &ctx,
        &SERVER_THREAD,
        || unsafe { original(handler, player, request) },
        || ShimDecision::Forward,
        |_loaded| {
            if player.is_null() {
                return;
            }
            if let Some(message) = bridge_player_login(crate::events::bridge(), player) {
                unsafe { refuse_login(player, &message) };
            }
        },
    )
}

unsafe extern "C" fn shim_update_announcement(
    handler: *mut ServerNetworkHandler,
    message: *const StdString,
) {
    let raw = ORIGINAL_ANNOUNCEMENT.load(Ordering::Acquire);
    if raw.is_null() {
        return;
    }
    let original: UpdateAnnouncementFn = std::mem::transmute(raw);

    let ctx = ShimContext {
        name: UPDATE_ANNOUNCEMENT,
        reentrant: false,
        server_thread_only: true,
    };
    dispatch(
        &ctx,
        &SERVER_THREAD,
        || unsafe { original(handler, message) },
        || {
            let text = if message.is_null() {
                String::new()
            } else {
                unsafe { (*message).to_string_lossy() }
            };
            match bridge_server_announcement(crate::events::bridge(), &text) {
                BridgeOutcome::Cancelled => ShimDecision::Replace(()),
                BridgeOutcome::Unchanged => ShimDecision::Forward,
                BridgeOutcome::Rewritten(new) => ShimDecision::Invoke(Box::new(move || unsafe {
                    let buf = StdStringBuf::new(&new);
                    original(handler, buf.as_raw());
                })),
            }
        },
        |_| {},
    );
}

/// Install every network shim whose target the registry resolved
///
/// Targets missing from the registry (optional, unresolved) are skipped.
/// A hook that fails to install rolls back everything installed so far;
/// the host is never left half-shimmed.
pub fn install_all(registry: &LayoutRegistry, manager: &HookManager) -> Result<usize, ShimError> {
    let specs: [(&str, *const (), &AtomicPtr<c_void>); 5] = [
        (
            DISCONNECT_CLIENT,
            shim_disconnect_client as *const (),
            &ORIGINAL_DISCONNECT,
        ),
        (
            DISPLAY_GAME_MESSAGE,
            shim_display_game_message as *const (),
            &ORIGINAL_DISPLAY_MESSAGE,
        ),
        (
            CREATE_NEW_PLAYER,
            shim_create_new_player as *const (),
            &ORIGINAL_CREATE_PLAYER,
        ),
        (TRY_LOAD_PLAYER, shim_try_load_player as *const (), &ORIGINAL_TRY_LOAD),
        (
            UPDATE_ANNOUNCEMENT,
            shim_update_announcement as *const (),
            &ORIGINAL_ANNOUNCEMENT,
        ),
    ];

    let mut installed = 0usize;
    for (name, shim, slot) in specs {
        let target = match registry.resolve(name) {
            Ok(target) => target,
            Err(LayoutError::NotFound(_)) => {
                tracing::warn!("Target '{}' not resolved, shim skipped", name);
                continue;
            }
            Err(e) => {
                uninstall_all(manager);
                return Err(e.into());
            }
        };

        // The original pointer lands in the shim's slot before the entry
        // is patched; a call redirected mid-install already finds it.
        let publish = |original: *const ()| {
            slot.store(original as *mut c_void, Ordering::Release);
        };
        match unsafe { manager.install(target, shim, publish) } {
            Ok(_) => installed += 1,
            Err(e) => {
                tracing::error!("Installing '{}' failed: {}", name, e);
                uninstall_all(manager);
                return Err(e.into());
            }
        }
    }

    // Outbound entry points; resolved only, never hooked.
    match registry.resolve(GET_SERVER_PLAYER) {
        Ok(t) => LOOKUP_PLAYER.store(t.address() as *mut c_void, Ordering::Release),
        Err(_) => tracing::warn!("'{}' unresolved, kick events carry no player", GET_SERVER_PLAYER),
    }
    match registry.resolve(PLAYER_DISCONNECT) {
        Ok(t) => KICK_PLAYER.store(t.address() as *mut c_void, Ordering::Release),
        Err(_) => tracing::warn!("'{}' unresolved, refused logins cannot be kicked", PLAYER_DISCONNECT),
    }

    tracing::info!("{} network shims installed", installed);
    Ok(installed)
}

/// Remove every installed shim and forget the original pointers
pub fn uninstall_all(manager: &HookManager) {
    manager.uninstall_all();

    for slot in [
        &ORIGINAL_DISCONNECT,
        &ORIGINAL_DISPLAY_MESSAGE,
        &ORIGINAL_CREATE_PLAYER,
        &ORIGINAL_TRY_LOAD,
        &ORIGINAL_ANNOUNCEMENT,
        &LOOKUP_PLAYER,
        &KICK_PLAYER,
    ] {
        slot.store(ptr::null_mut(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::names;

    #[test]
    fn test_kick_reason_rewrite() {
        let bridge = EventBridge::new();
        bridge.register(names::PLAYER_KICK, |event| {
            if let EventPayload::PlayerKick { reason, .. } = event.payload_mut() {
                if reason == "bye" {
                    *reason = "banned".to_string();
                }
            }
        });

        assert_eq!(
            bridge_player_kick(&bridge, ptr::null_mut(), "bye"),
            BridgeOutcome::Rewritten("banned".to_string())
        );
        assert_eq!(
            bridge_player_kick(&bridge, ptr::null_mut(), "timeout"),
            BridgeOutcome::Unchanged
        );
    }

    #[test]
    fn test_cancelled_kick_suppresses_call() {
        let bridge = EventBridge::new();
        bridge.register(names::PLAYER_KICK, |event| event.cancel());

        assert_eq!(
            bridge_player_kick(&bridge, ptr::null_mut(), "bye"),
            BridgeOutcome::Cancelled
        );
    }

    #[test]
    fn test_chat_rewrite_yields_final_text() {
        let bridge = EventBridge::new();
        bridge.register(names::PLAYER_CHAT, |event| {
            if let EventPayload::PlayerChat { message, .. } = event.payload_mut() {
                *message = message.replace("darn", "****");
            }
        });

        // The outcome carries the text that actually goes out; that is
        // also what the shim logs.
        assert_eq!(
            bridge_player_chat(&bridge, ptr::null_mut(), "darn lag"),
            BridgeOutcome::Rewritten("**** lag".to_string())
        );
        assert_eq!(
            bridge_player_chat(&bridge, ptr::null_mut(), "hello"),
            BridgeOutcome::Unchanged
        );
    }

    #[test]
    fn test_chat_passes_through_without_listeners() {
        let bridge = EventBridge::new();
        assert_eq!(
            bridge_player_chat(&bridge, ptr::null_mut(), "hello"),
            BridgeOutcome::Unchanged
        );
    }

    #[test]
    fn test_login_refusal_carries_message() {
        let bridge = EventBridge::new();
        bridge.register(names::PLAYER_LOGIN, |event| {
            if let EventPayload::PlayerLogin { kick_message, .. } = event.payload_mut() {
                *kick_message = Some("Not on the allowlist".to_string());
            }
            event.cancel();
        });

        assert_eq!(
            bridge_player_login(&bridge, ptr::null_mut()),
            Some("Not on the allowlist".to_string())
        );
    }

    #[test]
    fn test_login_refusal_without_message_gets_default() {
        let bridge = EventBridge::new();
        bridge.register(names::PLAYER_LOGIN, |event| event.cancel());

        assert_eq!(
            bridge_player_login(&bridge, ptr::null_mut()),
            Some("Disconnected from server".to_string())
        );
    }

    #[test]
    fn test_login_allowed_by_default() {
        let bridge = EventBridge::new();
        assert_eq!(bridge_player_login(&bridge, ptr::null_mut()), None);

        // A kick message alone does not refuse; only cancelling does.
        bridge.register(names::PLAYER_LOGIN, |event| {
            if let EventPayload::PlayerLogin { kick_message, .. } = event.payload_mut() {
                *kick_message = Some("unused".to_string());
            }
        });
        assert_eq!(bridge_player_login(&bridge, ptr::null_mut()), None);
    }

    #[test]
    fn test_announcement_rewrite() {
        let bridge = EventBridge::new();
        bridge.register(names::SERVER_ANNOUNCEMENT, |event| {
            if let EventPayload::ServerAnnouncement { message } = event.payload_mut() {
                *message = format!("{message}!");
            }
        });

        assert_eq!(
            bridge_server_announcement(&bridge, "Welcome"),
            BridgeOutcome::Rewritten("Welcome!".to_string())
        );
    }

    #[test]
    fn test_scoped_field_patch_restores() {
        let original = StdStringBuf::new("original text");
        let replacement = StdStringBuf::new("patched text");

        let mut slot = unsafe { ptr::read(original.as_raw()) };
        let slot_ptr = &mut slot as *mut StdString;

        unsafe {
            let patch = ScopedFieldPatch::apply(slot_ptr, replacement.as_raw());
            assert_eq!((*slot_ptr).to_string_lossy(), "patched text");
            drop(patch);
            assert_eq!((*slot_ptr).to_string_lossy(), "original text");
        }
    }
}
