//! Attach and detach orchestration
//!
//! Attach runs on the thread the injector calls in on, which must be the
//! host's server thread: designation, layout resolution and hook
//! installation all happen here, in order, and any failure unwinds the
//! steps already taken so the host keeps running unmodified.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::EnvFilter;

use shale_core::config::RuntimeConfig;
use shale_core::hooks::hooks;
use shale_core::layout::{global_registry, init_global_registry, LayoutRegistry, LayoutTable};
use shale_core::shim::SERVER_THREAD;
use shale_core::shims;
use shale_host::{find_host_module, init_host, try_host, HostGlobals};

#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    #[error("Already attached")]
    AlreadyAttached,

    #[error("Not attached")]
    NotAttached,

    #[error(transparent)]
    Host(#[from] shale_host::HostError),

    #[error(transparent)]
    Layout(#[from] shale_core::layout::LayoutError),

    #[error(transparent)]
    Shim(#[from] shale_core::shims::ShimError),

    #[error("Only {installed} of {expected} shims installed (strict mode)")]
    Incomplete { installed: usize, expected: usize },
}

static ATTACHED: AtomicBool = AtomicBool::new(false);

fn init_logging(config: &RuntimeConfig) {
    let filter = EnvFilter::try_from_env("SHALE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    // A second attach attempt in the same process finds the subscriber
    // already set; that is fine.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Attach to the host process
///
/// Must be called from the host's server thread; that thread becomes the
/// designated thread every shim and outbound call is checked against.
pub fn attach(build: &str) -> Result<(), AttachError> {
    if ATTACHED.swap(true, Ordering::AcqRel) {
        return Err(AttachError::AlreadyAttached);
    }
    if let Err(e) = attach_inner(build) {
        ATTACHED.store(false, Ordering::Release);
        return Err(e);
    }
    Ok(())
}

fn attach_inner(build: &str) -> Result<(), AttachError> {
    let config = RuntimeConfig::load_default();
    init_logging(&config);

    tracing::info!("Attaching to host build {}", build);

    let module = find_host_module()?;
    tracing::info!(
        "Host image at {:#x} ({} segments)",
        module.base,
        module.segments.len()
    );

    let table = LayoutTable::load_from_file(config.layout_file(build))?;
    let registry = unsafe { LayoutRegistry::resolve_table(table, &module, build)? };

    init_host(HostGlobals::new(module, build.to_string()))?;
    init_global_registry(registry)?;
    let registry = global_registry().ok_or(AttachError::NotAttached)?;

    // Everything after this point runs with the server thread pinned.
    SERVER_THREAD.designate();

    let installed = match shims::install_all(registry, hooks()) {
        Ok(installed) => installed,
        Err(e) => {
            registry.close();
            return Err(e.into());
        }
    };

    if config.strict_install && installed < shims::SHIM_COUNT {
        shims::uninstall_all(hooks());
        registry.close();
        return Err(AttachError::Incomplete {
            installed,
            expected: shims::SHIM_COUNT,
        });
    }

    tracing::info!("Attached: {} shims active", installed);
    Ok(())
}

/// Detach from the host process
///
/// Restores every patched entry point and closes the registry. The host
/// continues as if never shimmed; attach state itself is not reusable
/// within the same process.
pub fn detach() -> Result<(), AttachError> {
    if !ATTACHED.load(Ordering::Acquire) {
        return Err(AttachError::NotAttached);
    }

    shims::uninstall_all(hooks());
    if let Some(registry) = global_registry() {
        registry.close();
    }

    match try_host() {
        Some(host) => tracing::info!("Detached from build {}, entry points restored", host.build),
        None => tracing::info!("Detached, entry points restored"),
    }
    Ok(())
}
