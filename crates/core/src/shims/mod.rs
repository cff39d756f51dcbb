//! Concrete host shims
//!
//! The actual intercepted entry points, wired together from the layout
//! registry (addresses), the hook manager (redirects), the dispatcher
//! (guard and containment) and the event bridge (injected logic).

mod network;

pub use network::{
    bridge_player_chat, bridge_player_kick, bridge_player_login, bridge_server_announcement,
    install_all, uninstall_all, BridgeOutcome, SHIM_COUNT,
};

use crate::hooks::HookError;
use crate::layout::LayoutError;

#[derive(Debug, thiserror::Error)]
pub enum ShimError {
    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Hook(#[from] HookError),
}
