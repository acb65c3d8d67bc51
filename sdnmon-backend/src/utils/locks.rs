//! Lock helpers for shared telemetry state.
//!
//! All engine state is best-effort telemetry, so a panic in one handler while
//! holding a lock must not take every later reader down with it. These
//! helpers recover the guard from a poisoned lock instead of panicking.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_poisoned_lock_is_recovered() {
        let lock = Arc::new(RwLock::new(1));
        let poisoner = lock.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.write().unwrap();
            panic!("poison the lock");
        })
        .join();
        assert!(lock.is_poisoned());

        *write(&lock) += 1;
        assert_eq!(*read(&lock), 2);
    }
}
