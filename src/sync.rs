//! Extension trait to ignore mutex poisoning.
//!
//! The guarded values here (the undo slot, the shared text) stay consistent even
//! if a holder panicked, so a poisoned lock is simply recovered.

use std::sync::{Mutex, MutexGuard};

pub trait IgnorePoison<T> {
    fn lock_ignore_poison(&self) -> MutexGuard<'_, T>;
}

impl<T> IgnorePoison<T> for Mutex<T> {
    fn lock_ignore_poison(&self) -> MutexGuard<'_, T> {
        self.lock().unwrap_or_else(|e| e.into_inner())
    }
}
