//! Caller-owned frame buffer lease
//!
//! A submitted frame stays in memory owned by the caller; the transport
//! only borrows it. The lease pairs the borrowed region with a release
//! callback and guarantees the callback fires exactly once, after the
//! transport has read the last byte, on every path including rejection.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use std::ffi::c_void;

/// Release notification invoked with the caller's context exactly once
pub type ReleaseCallback = extern "C" fn(*mut c_void);

/// Owned handle over a caller-supplied frame buffer
///
/// Dropping the lease fires the release callback. The handle is the only
/// holder of the callback, so a second invocation is unreachable; the
/// internal flag is a debug-build tripwire for that invariant.
pub struct FrameLease {
    data: *const u8,
    len: usize,
    context: *mut c_void,
    release_callback: ReleaseCallback,
    released: bool,
}

impl FrameLease {
    /// Wrap a caller-owned buffer in a lease
    ///
    /// # Safety
    ///
    /// `data` must stay valid for reads of `len` bytes, and must not be
    /// mutated or freed, until `release_callback` is invoked with
    /// `context`. A null `data` is tolerated only together with
    /// `len == 0` (the lease then carries an empty payload and still
    /// fires its release).
    pub unsafe fn new(
        data: *const u8,
        len: usize,
        context: *mut c_void,
        release_callback: ReleaseCallback,
    ) -> Self {
        FrameLease {
            data,
            len,
            context,
            release_callback,
            released: false,
        }
    }

    /// View of the leased bytes
    ///
    /// The slice is rebuilt on every call rather than stored, so the lease
    /// itself holds no reference into the caller's memory between uses.
    pub fn payload(&self) -> &[u8] {
        if self.data.is_null() || self.len == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.data, self.len) }
    }

    /// Length of the leased region in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the lease carries no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fire the release notification and consume the lease
    ///
    /// Equivalent to dropping the lease; exists so call sites can mark
    /// the hand-back point explicitly.
    pub fn release(self) {
        drop(self);
    }

    fn fire(&mut self) {
        debug_assert!(!self.released, "frame lease released twice");
        if !self.released {
            self.released = true;
            (self.release_callback)(self.context);
        }
    }
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        self.fire();
    }
}

// The caller guarantees the region outlives the lease and the transport
// never mutates it, so moving the lease to the session task is sound.
unsafe impl Send for FrameLease {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    extern "C" fn count_release(context: *mut c_void) {
        let counter = unsafe { &*(context as *const AtomicUsize) };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_release_fires_once_on_drop() {
        let counter = AtomicUsize::new(0);
        let buffer = vec![1u8, 2, 3, 4];

        let lease = unsafe {
            FrameLease::new(
                buffer.as_ptr(),
                buffer.len(),
                &counter as *const AtomicUsize as *mut c_void,
                count_release,
            )
        };

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        drop(lease);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_explicit_release_fires_once() {
        let counter = AtomicUsize::new(0);
        let buffer = vec![0u8; 16];

        let lease = unsafe {
            FrameLease::new(
                buffer.as_ptr(),
                buffer.len(),
                &counter as *const AtomicUsize as *mut c_void,
                count_release,
            )
        };

        lease.release();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_payload_matches_buffer() {
        let counter = AtomicUsize::new(0);
        let buffer: Vec<u8> = (0..100).collect();

        let lease = unsafe {
            FrameLease::new(
                buffer.as_ptr(),
                buffer.len(),
                &counter as *const AtomicUsize as *mut c_void,
                count_release,
            )
        };

        assert_eq!(lease.payload(), buffer.as_slice());
        assert_eq!(lease.len(), 100);
        assert!(!lease.is_empty());
    }

    #[test]
    fn test_null_empty_lease_still_releases() {
        let counter = AtomicUsize::new(0);

        let lease = unsafe {
            FrameLease::new(
                std::ptr::null(),
                0,
                &counter as *const AtomicUsize as *mut c_void,
                count_release,
            )
        };

        assert!(lease.is_empty());
        assert_eq!(lease.payload(), &[] as &[u8]);
        drop(lease);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
