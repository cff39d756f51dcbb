//! Inline detour engine
//!
//! Patches a host entry point with a rel32 jump to our shim and preserves
//! the displaced prologue, relocated, in a nearby executable block so the
//! original stays callable:
//!
//! ```text
//! entry:      jmp rel32 -> relay          (displaced prologue saved)
//! relay:      jmp [rip] -> shim           (absolute, shim may be anywhere)
//! trampoline: <relocated prologue>
//!             jmp rel32 -> entry+n        (resumes the original body)
//! ```
//!
//! The patch is activated by writing the jump opcode byte last, after the
//! rest of the redirect is fully built, so a concurrent caller observes
//! either the fully-original or the fully-redirected path.

use iced_x86::{
    BlockEncoder, BlockEncoderOptions, Code, Decoder, DecoderOptions, FlowControl, Instruction,
    InstructionBlock,
};

use super::trampoline::alloc_executable;

/// Size of a rel32 jump
const JMP_REL32_LEN: usize = 5;

/// Size of an absolute `jmp [rip+0]` relay (6 byte opcode + 8 byte address)
const JMP_ABS_LEN: usize = 14;

/// Executable block reserved per hook
const BLOCK_SIZE: usize = 128;

/// How many prologue bytes we feed the decoder
const PROLOGUE_WINDOW: usize = 32;

/// Error type for hook operations
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Failed to install hook: {0}")]
    InstallFailed(String),

    #[error("Hook already installed: {0}")]
    AlreadyInstalled(String),

    #[error("Hook not installed")]
    NotInstalled,

    #[error("Memory protection failed: {0}")]
    MemoryProtection(String),

    #[error("Failed to decode prologue: {0}")]
    Decode(String),

    #[error("Failed to allocate executable memory near {0:x}")]
    OutOfMemory(usize),

    #[error("Invalid address: {0:x}")]
    InvalidAddress(usize),
}

/// An installed entry point patch
///
/// Holds everything needed to call the original and to restore the entry
/// byte-for-byte. Only constructed by [`Staged::activate`]; by the time a
/// `Patch` exists, the redirect is fully active.
pub(crate) struct Patch {
    target: usize,
    /// Prologue bytes displaced by the jump, exactly as they were
    original_prologue: Vec<u8>,
    /// Entry of the relocated prologue; calling this runs the original
    trampoline: usize,
}

impl Patch {
    pub(crate) fn target(&self) -> usize {
        self.target
    }

    pub(crate) fn trampoline(&self) -> *const () {
        self.trampoline as *const ()
    }
}

/// Overwrite bytes at an address that may be mapped read-only
unsafe fn patch_bytes(addr: usize, bytes: &[u8]) -> Result<(), HookError> {
    let ptr = addr as *mut u8;
    let old = region::query(ptr)
        .map_err(|e| HookError::MemoryProtection(e.to_string()))?
        .protection();

    region::protect(ptr, bytes.len(), region::Protection::READ_WRITE_EXECUTE)
        .map_err(|e| HookError::MemoryProtection(e.to_string()))?;

    // Tail first; the branch opcode byte is written last so the redirect
    // flips on in a single byte store.
    if bytes.len() > 1 {
        std::ptr::copy_nonoverlapping(bytes[1..].as_ptr(), ptr.add(1), bytes.len() - 1);
    }
    std::ptr::write_volatile(ptr, bytes[0]);

    let _ = region::protect(ptr, bytes.len(), old);
    Ok(())
}

/// Decode the prologue until at least `JMP_REL32_LEN` bytes are covered
unsafe fn decode_prologue(target: usize) -> Result<(Vec<Instruction>, usize), HookError> {
    // Clamp the decode window to the target's mapping so a function that
    // ends near the last mapped page never reads past it.
    let mapping = region::query(target as *const u8)
        .map_err(|e| HookError::MemoryProtection(e.to_string()))?;
    let mapping_end = mapping.as_ptr::<u8>() as usize + mapping.len();
    let window = PROLOGUE_WINDOW.min(mapping_end - target);
    if window < JMP_REL32_LEN {
        return Err(HookError::Decode(format!(
            "only {window} mapped bytes at {target:#x}"
        )));
    }

    let code = std::slice::from_raw_parts(target as *const u8, window);
    let mut decoder = Decoder::with_ip(64, code, target as u64, DecoderOptions::NONE);

    let mut displaced = Vec::new();
    let mut len = 0usize;

    while len < JMP_REL32_LEN {
        let instr = decoder.decode();
        if instr.code() == Code::INVALID {
            return Err(HookError::Decode(format!(
                "undecodable instruction at {:#x}",
                target + len
            )));
        }
        if instr.flow_control() == FlowControl::Return && len + instr.len() < JMP_REL32_LEN {
            return Err(HookError::Decode(format!(
                "function at {target:#x} too short to patch"
            )));
        }
        len += instr.len();
        displaced.push(instr);
    }

    Ok((displaced, len))
}

/// A fully-built redirect whose entry patch has not been written yet
///
/// Prepared by [`prepare`]. The trampoline and relay exist and the
/// trampoline is already callable, so the caller can stash the original
/// pointer wherever the shim reads it from before [`Staged::activate`]
/// makes the shim reachable. A dropped `Staged` leaks its block but
/// leaves the target untouched.
pub(crate) struct Staged {
    target: usize,
    original_prologue: Vec<u8>,
    trampoline: usize,
    entry_patch: Vec<u8>,
}

impl Staged {
    /// Entry of the relocated prologue; calling this runs the original
    pub(crate) fn trampoline(&self) -> *const () {
        self.trampoline as *const ()
    }

    /// Write the entry patch, making the redirect live
    ///
    /// # Safety
    /// The target prepared into this value must still be mapped and hold
    /// its original prologue.
    pub(crate) unsafe fn activate(self) -> Result<Patch, HookError> {
        patch_bytes(self.target, &self.entry_patch)?;
        tracing::debug!(
            "Patched entry {:#x}, trampoline {:#x} ({} bytes displaced)",
            self.target,
            self.trampoline,
            self.original_prologue.len()
        );
        Ok(Patch {
            target: self.target,
            original_prologue: self.original_prologue,
            trampoline: self.trampoline,
        })
    }
}

/// Build an inline detour at `target`, redirecting to `shim`
///
/// Everything except the entry patch is written; activation is a separate
/// step so the original pointer can be published to the shim first.
///
/// # Safety
/// `target` must be the entry of a function mapped in this process, and
/// `shim` must be an ABI-compatible replacement for it.
pub(crate) unsafe fn prepare(target: usize, shim: usize) -> Result<Staged, HookError> {
    if target == 0 || shim == 0 {
        return Err(HookError::InvalidAddress(target));
    }

    let (displaced, displaced_len) = decode_prologue(target)?;
    let original_prologue =
        std::slice::from_raw_parts(target as *const u8, displaced_len).to_vec();

    let block = alloc_executable(target as *const u8, BLOCK_SIZE)
        .ok_or(HookError::OutOfMemory(target))?;
    let block_addr = block.as_ptr() as usize;

    // Relocate the displaced prologue to the block, followed by a jump
    // back into the original body.
    let mut relocated = displaced;
    let resume = Instruction::with_branch(Code::Jmp_rel32_64, (target + displaced_len) as u64)
        .map_err(|e| HookError::InstallFailed(e.to_string()))?;
    relocated.push(resume);

    let encoded = BlockEncoder::encode(
        64,
        InstructionBlock::new(&relocated, block_addr as u64),
        BlockEncoderOptions::NONE,
    )
    .map_err(|e| HookError::InstallFailed(e.to_string()))?;
    let trampoline_code = encoded.code_buffer;

    // Relay sits after the trampoline, 8-byte aligned for the address slot.
    let relay_offset = (trampoline_code.len() + 7) & !7;
    if relay_offset + JMP_ABS_LEN > BLOCK_SIZE {
        return Err(HookError::InstallFailed(format!(
            "relocated prologue too large ({} bytes)",
            trampoline_code.len()
        )));
    }
    let relay_addr = block_addr + relay_offset;

    // Write the trampoline and relay; the block page is ours and writable.
    std::ptr::copy_nonoverlapping(
        trampoline_code.as_ptr(),
        block_addr as *mut u8,
        trampoline_code.len(),
    );
    let relay = relay_addr as *mut u8;
    relay.copy_from_nonoverlapping([0xFF, 0x25, 0, 0, 0, 0].as_ptr(), 6);
    (relay.add(6) as *mut u64).write_unaligned(shim as u64);

    // Entry patch: jmp rel32 to the relay, NOP fill over the remainder of
    // the displaced prologue.
    let rel = (relay_addr as i64) - (target as i64 + JMP_REL32_LEN as i64);
    let rel = i32::try_from(rel).map_err(|_| {
        HookError::InstallFailed(format!("relay at {relay_addr:#x} out of rel32 range"))
    })?;

    let mut patch = Vec::with_capacity(displaced_len);
    patch.push(0xE9);
    patch.extend_from_slice(&rel.to_le_bytes());
    patch.resize(displaced_len, 0x90);

    tracing::debug!(
        "Staged redirect for {:#x} -> relay {:#x} -> shim {:#x}, trampoline {:#x}",
        target,
        relay_addr,
        shim,
        block_addr
    );

    Ok(Staged {
        target,
        original_prologue,
        trampoline: block_addr,
        entry_patch: patch,
    })
}

/// Restore the entry point to its pre-install bytes
///
/// # Safety
/// The patch's target must still be mapped.
pub(crate) unsafe fn uninstall(patch: &Patch) -> Result<(), HookError> {
    patch_bytes(patch.target, &patch.original_prologue)?;
    tracing::debug!(
        "Restored {} original bytes at {:#x}",
        patch.original_prologue.len(),
        patch.target
    );
    Ok(())
}

#[cfg(all(test, unix, target_arch = "x86_64"))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type StubFn = unsafe extern "C" fn() -> i32;

    /// Build `mov eax, imm32; ret` in an executable block and return it as
    /// a callable function.
    fn make_stub(value: i32) -> (StubFn, usize) {
        let block = alloc_executable(make_stub as *const u8, 16).unwrap();
        let addr = block.as_ptr() as usize;
        let mut code = vec![0xB8u8];
        code.extend_from_slice(&value.to_le_bytes());
        code.push(0xC3);
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), block.as_ptr(), code.len());
            (std::mem::transmute::<usize, StubFn>(addr), addr)
        }
    }

    static STUB_ORIGINAL: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn add_one_shim() -> i32 {
        let original: StubFn = std::mem::transmute(STUB_ORIGINAL.load(Ordering::Acquire));
        original() + 1
    }

    #[test]
    fn test_prepare_activate_uninstall_round_trip() {
        let (stub, addr) = make_stub(42);
        unsafe {
            assert_eq!(stub(), 42);

            let before: Vec<u8> =
                std::slice::from_raw_parts(addr as *const u8, 6).to_vec();

            let staged = prepare(addr, add_one_shim as usize).unwrap();

            // Preparing builds everything except the entry patch: the
            // target still runs its original code, while the trampoline
            // is already callable.
            assert_eq!(stub(), 42);
            STUB_ORIGINAL.store(staged.trampoline() as usize, Ordering::Release);

            let patch = staged.activate().unwrap();

            // Redirected: shim runs, original still reachable through the
            // trampoline, exactly one dispatch per call.
            assert_eq!(stub(), 43);
            assert_eq!(stub(), 43);

            // Trampoline alone behaves like the unhooked original.
            let original: StubFn = std::mem::transmute(patch.trampoline());
            assert_eq!(original(), 42);

            uninstall(&patch).unwrap();
            assert_eq!(stub(), 42);

            let after: Vec<u8> = std::slice::from_raw_parts(addr as *const u8, 6).to_vec();
            assert_eq!(before, after, "uninstall must restore bytes exactly");
        }
    }

    #[test]
    fn test_prepare_rejects_null() {
        unsafe {
            assert!(matches!(
                prepare(0, add_one_shim as usize),
                Err(HookError::InvalidAddress(_))
            ));
        }
    }

    #[test]
    fn test_decode_window_clamped_to_mapping() {
        use std::num::NonZeroUsize;

        use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};

        let page = region::page::size();

        unsafe {
            // Two pages, then free the upper one so the first page ends at
            // an unmapped boundary.
            let mapping = mmap_anonymous(
                None,
                NonZeroUsize::new(page * 2).unwrap(),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE | ProtFlags::PROT_EXEC,
                MapFlags::MAP_PRIVATE,
            )
            .unwrap();
            let base = mapping.as_ptr() as usize;
            munmap(
                std::ptr::NonNull::new((base + page) as *mut _).unwrap(),
                page,
            )
            .unwrap();

            // mov eax, 7; ret right up against the mapping end decodes
            // without touching the unmapped page.
            let stub = base + page - 6;
            let code = [0xB8u8, 0x07, 0, 0, 0, 0xC3];
            std::ptr::copy_nonoverlapping(code.as_ptr(), stub as *mut u8, code.len());
            let (_, len) = decode_prologue(stub).unwrap();
            assert_eq!(len, 5);

            // Too few mapped bytes left to fit the entry jump.
            let tail = base + page - 3;
            assert!(matches!(decode_prologue(tail), Err(HookError::Decode(_))));

            munmap(std::ptr::NonNull::new(base as *mut _).unwrap(), page).unwrap();
        }
    }
}
