//! Host module image discovery
//!
//! The dedicated server is the main executable of the process we are
//! injected into. We enumerate its loaded segments once at attach so the
//! layout registry can scan code bytes without ever touching an unmapped
//! hole between segments.

use std::path::PathBuf;

use crate::error::HostError;

/// One loaded segment of the host image
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    /// Absolute start address in this process
    pub start: usize,
    /// Length in bytes
    pub len: usize,
    /// Whether the segment is mapped executable
    pub executable: bool,
}

impl Segment {
    pub fn end(&self) -> usize {
        self.start + self.len
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end()
    }
}

/// The host server image as mapped into this process
#[derive(Debug, Clone)]
pub struct HostModule {
    /// Load base (relocation offset for RVA-style layout entries)
    pub base: usize,
    /// Path of the image on disk, when the loader reports one
    pub path: Option<PathBuf>,
    /// Loaded segments, ascending by start address
    pub segments: Vec<Segment>,
}

impl HostModule {
    /// Total span from the first to the last segment
    pub fn span(&self) -> usize {
        match (self.segments.first(), self.segments.last()) {
            (Some(first), Some(last)) => last.end() - first.start,
            _ => 0,
        }
    }

    /// Translate a table-relative offset to an absolute address
    pub fn rva(&self, offset: u64) -> usize {
        self.base.wrapping_add(offset as usize)
    }

    /// Executable segments only (signature scan domain)
    pub fn code_segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(|s| s.executable)
    }

    /// Whether an address falls inside any loaded segment
    pub fn contains(&self, addr: usize) -> bool {
        self.segments.iter().any(|s| s.contains(addr))
    }
}

/// Locate the main executable image of the current process
#[cfg(unix)]
pub fn find_host_module() -> Result<HostModule, HostError> {
    use std::ffi::{c_int, c_void, CStr};

    struct State {
        module: Option<HostModule>,
    }

    unsafe extern "C" fn callback(
        info: *mut libc::dl_phdr_info,
        _size: libc::size_t,
        data: *mut c_void,
    ) -> c_int {
        let info = &*info;
        let state = &mut *(data as *mut State);

        // The first entry reported is the main executable; its name is
        // usually the empty string.
        if state.module.is_some() {
            return 0;
        }

        let path = if info.dlpi_name.is_null() {
            None
        } else {
            let name = CStr::from_ptr(info.dlpi_name);
            if name.to_bytes().is_empty() {
                None
            } else {
                Some(PathBuf::from(name.to_string_lossy().into_owned()))
            }
        };

        let mut segments = Vec::new();
        let headers = std::slice::from_raw_parts(info.dlpi_phdr, info.dlpi_phnum as usize);
        for phdr in headers {
            if phdr.p_type != libc::PT_LOAD {
                continue;
            }
            segments.push(Segment {
                start: (info.dlpi_addr as usize).wrapping_add(phdr.p_vaddr as usize),
                len: phdr.p_memsz as usize,
                executable: phdr.p_flags & libc::PF_X != 0,
            });
        }
        segments.sort_by_key(|s| s.start);

        state.module = Some(HostModule {
            base: info.dlpi_addr as usize,
            path,
            segments,
        });

        // Non-zero stops iteration.
        1
    }

    let mut state = State { module: None };
    unsafe {
        libc::dl_iterate_phdr(Some(callback), &mut state as *mut State as *mut c_void);
    }

    let module = state
        .module
        .ok_or_else(|| HostError::ModuleNotFound("main executable".into()))?;

    if module.segments.is_empty() {
        return Err(HostError::ModuleNotFound(
            "main executable has no loadable segments".into(),
        ));
    }

    tracing::info!(
        "Host image at {:#x}, {} segments, span {:#x}",
        module.base,
        module.segments.len(),
        module.span()
    );

    Ok(module)
}

#[cfg(not(unix))]
pub fn find_host_module() -> Result<HostModule, HostError> {
    Err(HostError::Unsupported("host discovery requires unix"))
}
