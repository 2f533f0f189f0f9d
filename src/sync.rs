//! A module which decides which synchronization primitives to use throughout the rest of the crate
//! depending on features and configuration options

cfg_if::cfg_if! {
    if #[cfg(loom)] {
        pub(crate) use loom::sync::atomic::{AtomicBool, Ordering};
        pub(crate) use loom::sync::{Arc, Mutex, MutexGuard};
    } else if #[cfg(feature = "shuttle")] {
        pub(crate) use shuttle::sync::atomic::{AtomicBool, Ordering};
        pub(crate) use shuttle::sync::{Arc, Mutex, MutexGuard};
    } else {
        pub(crate) use std::sync::atomic::{AtomicBool, Ordering};
        pub(crate) use std::sync::{Arc, Mutex, MutexGuard};
    }
}
