//! A directory-based cache-coherence protocol for a single shared line.
//!
//! A fixed set of clients share one logical cache line, coordinated by a single home directory.
//! At most one client ever holds an Exclusive copy, and then every other client is Invalid. Any
//! number of clients may hold Shared copies at once, but only while no Exclusive copy is
//! outstanding.
//!
//! Clients and the directory talk through capacity-1 [Mailbox]es: a request mailbox and an ack
//! mailbox from each client to the directory, and a grant/invalidate mailbox back. The protocol
//! is a set of ten atomic operations, each accepted only when its precondition holds:
//!
//! - clients: [Protocol::request_shared], [Protocol::request_exclusive],
//!   [Protocol::apply_invalidate], [Protocol::apply_grant_shared],
//!   [Protocol::apply_grant_exclusive]
//! - directory: [Protocol::pick_new_request], [Protocol::send_invalidate],
//!   [Protocol::receive_invalidate_ack], [Protocol::grant_shared], [Protocol::grant_exclusive]
//!
//! [Protocol] is the `no_std` state machine. With the `std` feature, [ProtocolEngine] shares it
//! between threads behind one lock, and client handles reserve client ids for individual threads.
#![cfg_attr(not(feature = "std"), no_std)]

pub mod err;
pub mod invariant;

mod client;
mod directory;
mod mailbox;
mod protocol;
mod types;

#[cfg(feature = "std")]
mod engine;
#[cfg(feature = "std")]
mod sync;

pub use client::ClientAgent;
pub use directory::HomeDirectory;
pub use mailbox::Mailbox;
pub use protocol::{Operation, Protocol};
pub use types::{
    AckMessage, CacheLineState, ClientId, DirectoryPhase, GrantOrInvalidate, RequestMessage,
};

#[cfg(feature = "std")]
pub use engine::{
    ArcClientHandle, ArcClientHandleError, NoClientIdAvailableError, ProtocolEngine,
    RefClientHandle, RefClientHandleError,
};
