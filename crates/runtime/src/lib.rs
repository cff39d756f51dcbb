//! shale runtime - injectable interception layer
//!
//! Built as a cdylib and loaded into the host server process by an
//! injector, which then calls [`exports::shale_attach`] with the host
//! build string. Attach resolves the build's layout table, installs the
//! network shims and designates the calling thread as the server thread;
//! detach restores every patched entry point.

pub mod attach;
pub mod exports;

pub use attach::{attach, detach, AttachError};
