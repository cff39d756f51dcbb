//! Typed views over host objects
//!
//! The host's object layouts are opaque; the layout table supplies field
//! offsets per build, and these views turn a raw host pointer plus a
//! (class, field) name into a typed read or write. Offsets resolve once
//! per field and are cached for the process lifetime.

use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::OnceLock;

use shale_sdk::cxx::StdString;

use crate::layout::{LayoutError, LayoutRegistry};

/// One named field of a host class, with a cached resolved offset
pub struct HostField<T> {
    class: &'static str,
    field: &'static str,
    offset: OnceLock<i32>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Copy> HostField<T> {
    pub const fn new(class: &'static str, field: &'static str) -> Self {
        Self {
            class,
            field,
            offset: OnceLock::new(),
            _marker: PhantomData,
        }
    }

    /// Offset of this field within its class, resolved and cached
    pub fn offset(&self, registry: &LayoutRegistry) -> Result<i32, LayoutError> {
        if let Some(offset) = self.offset.get() {
            return Ok(*offset);
        }
        let offset = registry.field_offset(self.class, self.field)?;
        // A concurrent resolver got the same answer; either store is fine.
        let _ = self.offset.set(offset);
        Ok(offset)
    }

    /// # Safety
    /// `base` must point at a live instance of this field's class, laid
    /// out as the registry's build describes.
    pub unsafe fn ptr(
        &self,
        registry: &LayoutRegistry,
        base: *mut u8,
    ) -> Result<*mut T, LayoutError> {
        let offset = self.offset(registry)?;
        Ok(base.offset(offset as isize) as *mut T)
    }

    /// # Safety
    /// Same contract as [`HostField::ptr`]; the field must hold a valid `T`.
    pub unsafe fn read(&self, registry: &LayoutRegistry, base: *const u8) -> Result<T, LayoutError> {
        let ptr = self.ptr(registry, base as *mut u8)?;
        Ok(ptr.read_unaligned())
    }

    /// # Safety
    /// Same contract as [`HostField::ptr`].
    pub unsafe fn write(
        &self,
        registry: &LayoutRegistry,
        base: *mut u8,
        value: T,
    ) -> Result<(), LayoutError> {
        let ptr = self.ptr(registry, base)?;
        ptr.write_unaligned(value);
        Ok(())
    }
}

/// A borrowed, non-null view over one host object
#[derive(Clone, Copy)]
pub struct HostObjectView {
    base: NonNull<u8>,
}

impl HostObjectView {
    /// # Safety
    /// `ptr`, if non-null, must point at a live host object.
    pub unsafe fn new(ptr: *mut u8) -> Option<Self> {
        NonNull::new(ptr).map(|base| Self { base })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// # Safety
    /// The named field must exist on this object's class at the offset the
    /// registry reports, and must hold a valid `T`.
    pub unsafe fn read<T: Copy>(
        &self,
        registry: &LayoutRegistry,
        class: &str,
        field: &str,
    ) -> Result<T, LayoutError> {
        let offset = registry.field_offset(class, field)?;
        Ok((self.base.as_ptr().offset(offset as isize) as *const T).read_unaligned())
    }

    /// # Safety
    /// Same contract as [`HostObjectView::read`].
    pub unsafe fn write<T: Copy>(
        &self,
        registry: &LayoutRegistry,
        class: &str,
        field: &str,
        value: T,
    ) -> Result<(), LayoutError> {
        let offset = registry.field_offset(class, field)?;
        (self.base.as_ptr().offset(offset as isize) as *mut T).write_unaligned(value);
        Ok(())
    }

    /// Copy out a host `std::string` field as UTF-8 (lossy)
    ///
    /// # Safety
    /// The named field must be a live host `std::string`.
    pub unsafe fn read_std_string(
        &self,
        registry: &LayoutRegistry,
        class: &str,
        field: &str,
    ) -> Result<String, LayoutError> {
        let offset = registry.field_offset(class, field)?;
        let s = &*(self.base.as_ptr().offset(offset as isize) as *const StdString);
        Ok(s.to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::FieldTable;
    use shale_sdk::cxx::StdStringBuf;
    use std::collections::HashMap;

    #[repr(C)]
    struct FakePlayer {
        pad: [u8; 8],
        health: i32,
        score: u64,
    }

    fn registry() -> LayoutRegistry {
        let mut fields: HashMap<String, FieldTable> = HashMap::new();
        fields.insert(
            "Player".into(),
            HashMap::from([("health".into(), 8), ("score".into(), 12)]),
        );
        LayoutRegistry::from_parts("b".into(), Vec::new(), fields)
    }

    #[test]
    fn test_field_read_write() {
        let registry = registry();
        let mut player = FakePlayer {
            pad: [0; 8],
            health: 20,
            score: 0,
        };
        let base = &mut player as *mut FakePlayer as *mut u8;

        static HEALTH: HostField<i32> = HostField::new("Player", "health");

        unsafe {
            assert_eq!(HEALTH.read(&registry, base).unwrap(), 20);
            HEALTH.write(&registry, base, 5).unwrap();
        }
        assert_eq!(player.health, 5);
    }

    #[test]
    fn test_missing_field_errors() {
        let registry = registry();
        let field: HostField<i32> = HostField::new("Player", "mana");
        let mut buf = 0u64;

        let err = unsafe { field.read(&registry, &mut buf as *mut u64 as *const u8) };
        assert!(matches!(err, Err(LayoutError::FieldNotFound { .. })));
    }

    #[test]
    fn test_view_reads_unaligned() {
        let registry = registry();
        let mut player = FakePlayer {
            pad: [0; 8],
            health: 1,
            score: 0xABCD,
        };

        // "score" sits at offset 12, which is 4-unaligned for a u64.
        let view =
            unsafe { HostObjectView::new(&mut player as *mut FakePlayer as *mut u8) }.unwrap();
        let raw = unsafe {
            (view.as_ptr().offset(12) as *mut u64).write_unaligned(0xFEED);
            view.read::<u64>(&registry, "Player", "score").unwrap()
        };
        assert_eq!(raw, 0xFEED);
    }

    #[test]
    fn test_read_std_string_field() {
        let mut fields: HashMap<String, FieldTable> = HashMap::new();
        fields.insert("Record".into(), HashMap::from([("text".into(), 8)]));
        let registry = LayoutRegistry::from_parts("b".into(), Vec::new(), fields);

        let text = StdStringBuf::new("hello host");

        #[repr(C)]
        struct Record {
            pad: u64,
            text: StdString,
        }
        let record = Record {
            pad: 0,
            text: unsafe { std::ptr::read(text.as_raw()) },
        };

        let view = unsafe {
            HostObjectView::new(&record as *const Record as *mut u8)
        }
        .unwrap();
        let s = unsafe { view.read_std_string(&registry, "Record", "text") }.unwrap();
        assert_eq!(s, "hello host");
    }

    #[test]
    fn test_null_view_is_rejected() {
        assert!(unsafe { HostObjectView::new(std::ptr::null_mut()) }.is_none());
    }
}
