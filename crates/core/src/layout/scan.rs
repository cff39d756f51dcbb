//! Byte signature parsing and scanning
//!
//! Signatures are hex byte patterns with `?`/`??` wildcards, scanned over
//! the host image's executable segments only.

use shale_host::{HostModule, Segment};

use super::registry::LayoutError;

/// Parse a signature pattern string into bytes
///
/// Supports:
/// - Hex bytes: "55 48 89 E5"
/// - Wildcards: "55 ? 89 E5" or "55 ?? 89 E5"
pub fn parse_signature(pattern: &str) -> Result<Vec<Option<u8>>, LayoutError> {
    let mut result = Vec::new();

    for part in pattern.split_whitespace() {
        if part == "?" || part == "??" {
            result.push(None); // Wildcard
        } else {
            let byte = u8::from_str_radix(part, 16)
                .map_err(|_| LayoutError::InvalidSignature(format!("invalid hex byte: {part}")))?;
            result.push(Some(byte));
        }
    }

    if result.is_empty() {
        return Err(LayoutError::InvalidSignature(
            "empty signature pattern".to_string(),
        ));
    }

    Ok(result)
}

/// Scan one mapped segment for a pattern
///
/// # Safety
/// The segment must describe mapped, readable memory.
pub unsafe fn scan_segment(segment: &Segment, pattern: &[Option<u8>]) -> Option<usize> {
    if pattern.is_empty() || segment.len < pattern.len() {
        return None;
    }

    let start = segment.start as *const u8;
    let end = segment.len - pattern.len();

    'outer: for offset in 0..=end {
        for (i, expected) in pattern.iter().enumerate() {
            if let Some(byte) = expected {
                if *start.add(offset + i) != *byte {
                    continue 'outer;
                }
            }
        }
        return Some(segment.start + offset);
    }

    None
}

/// Find a unique signature match across the host image's code segments
///
/// # Safety
/// The module's segments must describe memory mapped in this process.
pub(super) unsafe fn find_in_module(
    name: &str,
    module: &HostModule,
    pattern_str: &str,
) -> Result<usize, LayoutError> {
    let pattern = parse_signature(pattern_str)?;

    for segment in module.code_segments() {
        if let Some(addr) = scan_segment(segment, &pattern) {
            return Ok(addr);
        }
    }

    Err(LayoutError::ScanFailed(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment_over(data: &[u8]) -> Segment {
        Segment {
            start: data.as_ptr() as usize,
            len: data.len(),
            executable: true,
        }
    }

    #[test]
    fn test_parse_signature() {
        let pattern = parse_signature("55 48 89 E5").unwrap();
        assert_eq!(
            pattern,
            vec![Some(0x55), Some(0x48), Some(0x89), Some(0xE5)]
        );

        let pattern = parse_signature("55 ? 89 ??").unwrap();
        assert_eq!(pattern, vec![Some(0x55), None, Some(0x89), None]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_signature("").is_err());
        assert!(parse_signature("ZZ 12").is_err());
    }

    #[test]
    fn test_scan_segment() {
        let data = [0x00, 0x55, 0x48, 0x89, 0xE5, 0x00];
        let pattern = vec![Some(0x55), Some(0x48), Some(0x89), Some(0xE5)];

        unsafe {
            let result = scan_segment(&segment_over(&data), &pattern);
            assert_eq!(result, Some(data.as_ptr() as usize + 1));
        }
    }

    #[test]
    fn test_scan_with_wildcard() {
        let data = [0x00, 0x55, 0xFF, 0x89, 0xE5, 0x00];
        let pattern = vec![Some(0x55), None, Some(0x89), Some(0xE5)];

        unsafe {
            let result = scan_segment(&segment_over(&data), &pattern);
            assert_eq!(result, Some(data.as_ptr() as usize + 1));
        }
    }

    #[test]
    fn test_scan_no_match() {
        let data = [0x01, 0x02, 0x03];
        let pattern = vec![Some(0xAA)];

        unsafe {
            assert_eq!(scan_segment(&segment_over(&data), &pattern), None);
        }
    }
}
