//! Support items used by the declaration macros. Not part of the public
//! contract.

use std::sync::atomic::{fence, AtomicUsize, Ordering};

pub use std::mem::offset_of;

/// Compile-time byte offset from an embedded interface slot back to its
/// containing object. Zero for stub boxes, negated field offsets for
/// `com_class!` objects.
pub trait FixedOffset {
    fn offset() -> isize;
}

#[derive(Debug)]
pub struct ZeroOffset;

impl FixedOffset for ZeroOffset {
    fn offset() -> isize {
        0
    }
}

/// Recovers the containing object from an interface slot pointer handed to
/// a call-table thunk.
///
/// # Safety
///
/// `this` must point at an interface slot embedded in a live `C` at the
/// offset described by `S`.
pub unsafe fn resolve_class<S: FixedOffset, I, C>(this: *mut I) -> *const C {
    (this as *mut u8).offset(S::offset()) as *const C
}

/// Moves a freshly built object to the heap, handing ownership to its
/// reference count.
pub fn allocate_class<C>(instance: C) -> *mut C {
    Box::into_raw(Box::new(instance))
}

/// One retain unit. Relaxed is enough: acquiring a new unit requires already
/// holding one.
pub fn retain_count(count: &AtomicUsize) -> u32 {
    let prev = count.fetch_add(1, Ordering::Relaxed);
    if prev == usize::MAX {
        panic!("reference count overflow");
    }
    (prev + 1) as u32
}

/// Gives back one retain unit, destroying `object` when the last unit is
/// returned. An unbalanced release is a protocol violation: fatal in debug
/// builds, ignored defensively in release builds.
///
/// # Safety
///
/// `object` must have been produced by [`allocate_class`] and `count` must
/// be its embedded reference count.
pub unsafe fn release_count<C>(count: &AtomicUsize, object: *const C) -> u32 {
    let prev = count.fetch_sub(1, Ordering::Release);
    if prev == 0 {
        if cfg!(debug_assertions) {
            panic!("release without a matching retain");
        }
        tracing::warn!("reference count underflow ignored");
        count.store(0, Ordering::Relaxed);
        return 0;
    }
    if prev == 1 {
        fence(Ordering::Acquire);
        drop(Box::from_raw(object as *mut C));
        return 0;
    }
    (prev - 1) as u32
}
