use core::fmt::{Debug, Formatter};
use std::sync::PoisonError;

use displaydoc::Display;
use tracing::instrument;

use crate::err::Error;
use crate::invariant::{check_invariants, InvariantViolation};
use crate::protocol::{Operation, Protocol};
use crate::sync::{Arc, AtomicBool, Mutex, MutexGuard, Ordering};
use crate::types::{
    convert_client_id_to_client_index, convert_client_index_to_client_id, CacheLineState, ClientId,
    ClientIndex,
};

/// A [Protocol] shared between threads.
///
/// One coarse lock guards all client and directory state for the duration of each operation, so
/// every precondition check and its effect happen as one indivisible step with respect to every
/// other operation. Operations never block on the protocol itself: an operation whose
/// precondition does not hold is rejected and may be retried later.
pub struct ProtocolEngine<const NUM_CLIENTS: usize> {
    protocol: Mutex<Protocol<NUM_CLIENTS>>,

    /// Indicates whether a particular [ClientId] is currently reserved by a client handle.
    client_slots: [AtomicBool; NUM_CLIENTS],
}

impl<const NUM_CLIENTS: usize> Default for ProtocolEngine<NUM_CLIENTS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const NUM_CLIENTS: usize> Debug for ProtocolEngine<NUM_CLIENTS> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("protocol", &*self.lock())
            .finish()
    }
}

impl<const NUM_CLIENTS: usize> ProtocolEngine<NUM_CLIENTS> {
    pub fn new() -> Self {
        Self::from_protocol(Protocol::new())
    }

    /// Share an existing protocol state, for example one restored from a snapshot.
    pub fn from_protocol(protocol: Protocol<NUM_CLIENTS>) -> Self {
        Self {
            protocol: Mutex::new(protocol),
            client_slots: core::array::from_fn(|_| AtomicBool::new(false)),
        }
    }

    /// No operation panics part way through its effect, so a poisoned lock still guards a
    /// consistent state.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Protocol<NUM_CLIENTS>> {
        self.protocol.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[instrument(skip(self))]
    pub fn request_shared(&self, client_id: ClientId) -> Result<(), Error> {
        self.lock().request_shared(client_id)
    }

    #[instrument(skip(self))]
    pub fn request_exclusive(&self, client_id: ClientId) -> Result<(), Error> {
        self.lock().request_exclusive(client_id)
    }

    #[instrument(skip(self))]
    pub fn apply_invalidate(&self, client_id: ClientId) -> Result<(), Error> {
        self.lock().apply_invalidate(client_id)
    }

    #[instrument(skip(self))]
    pub fn apply_grant_shared(&self, client_id: ClientId) -> Result<(), Error> {
        self.lock().apply_grant_shared(client_id)
    }

    #[instrument(skip(self))]
    pub fn apply_grant_exclusive(&self, client_id: ClientId) -> Result<(), Error> {
        self.lock().apply_grant_exclusive(client_id)
    }

    #[instrument(skip(self))]
    pub fn pick_new_request(&self, client_id: ClientId) -> Result<(), Error> {
        self.lock().pick_new_request(client_id)
    }

    /// Adopt the oldest waiting request. Returns the id of the adopted requester.
    #[instrument(skip(self))]
    pub fn pick_next_request(&self) -> Result<ClientId, Error> {
        self.lock().pick_next_request()
    }

    #[instrument(skip(self))]
    pub fn send_invalidate(&self, client_id: ClientId) -> Result<(), Error> {
        self.lock().send_invalidate(client_id)
    }

    #[instrument(skip(self))]
    pub fn receive_invalidate_ack(&self, client_id: ClientId) -> Result<(), Error> {
        self.lock().receive_invalidate_ack(client_id)
    }

    #[instrument(skip(self))]
    pub fn grant_shared(&self) -> Result<ClientId, Error> {
        self.lock().grant_shared()
    }

    #[instrument(skip(self))]
    pub fn grant_exclusive(&self) -> Result<ClientId, Error> {
        self.lock().grant_exclusive()
    }

    #[instrument(skip(self))]
    pub fn apply(&self, operation: Operation) -> Result<(), Error> {
        self.lock().apply(operation)
    }

    pub fn step_home(&self) -> Option<Operation> {
        self.lock().step_home()
    }

    pub fn step_client(&self, client_id: ClientId) -> Option<Operation> {
        self.lock().step_client(client_id)
    }

    /// Service every outstanding request while holding the lock throughout.
    #[instrument(skip(self))]
    pub fn run_to_quiescence(&self) -> usize {
        self.lock().run_to_quiescence()
    }

    pub fn cache_state(&self, client_id: ClientId) -> Option<CacheLineState> {
        self.lock().cache_state(client_id)
    }

    /// A consistent copy of the whole state, taken between two operations.
    pub fn snapshot(&self) -> Protocol<NUM_CLIENTS> {
        self.lock().clone()
    }

    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        check_invariants(&*self.lock())
    }
}

/// All client slots for this [ProtocolEngine] are already reserved.
#[derive(Debug, Display)]
pub struct NoClientIdAvailableError;

impl std::error::Error for NoClientIdAvailableError {}

fn find_next_available_client_index<const NUM_CLIENTS: usize>(
    engine: &ProtocolEngine<NUM_CLIENTS>,
) -> Result<ClientIndex, NoClientIdAvailableError> {
    for i in 0..NUM_CLIENTS {
        let cas_result: Result<bool, bool> = engine.client_slots[i].compare_exchange(
            false,
            true,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        if cas_result.is_ok() {
            return Ok(i);
        }
    }
    Err(NoClientIdAvailableError)
}

fn release_client_id<const NUM_CLIENTS: usize>(
    engine: &ProtocolEngine<NUM_CLIENTS>,
    client_id: ClientId,
) {
    let client_index: ClientIndex = convert_client_id_to_client_index(client_id);
    engine.client_slots[client_index].store(false, Ordering::Release);
}

#[derive(Debug, Display)]
pub enum ArcClientHandleError {
    /** Could not construct [ArcClientHandle] because all client slots for the provided
       [ProtocolEngine] are already reserved.
    */
    NoClientIdAvailable(NoClientIdAvailableError),
}

impl From<NoClientIdAvailableError> for ArcClientHandleError {
    fn from(error: NoClientIdAvailableError) -> Self {
        Self::NoClientIdAvailable(error)
    }
}

/// A client's view of a shared [ProtocolEngine], owning one reserved [ClientId] until dropped.
pub struct ArcClientHandle<const NUM_CLIENTS: usize> {
    shared_engine: Arc<ProtocolEngine<NUM_CLIENTS>>,
    client_id: ClientId,
}

impl<const NUM_CLIENTS: usize> ArcClientHandle<NUM_CLIENTS> {
    pub fn construct(
        engine: Arc<ProtocolEngine<NUM_CLIENTS>>,
    ) -> Result<Self, ArcClientHandleError> {
        let engine_ref: &ProtocolEngine<NUM_CLIENTS> = engine.as_ref();

        let client_index: ClientIndex = find_next_available_client_index(engine_ref)?;
        Ok(Self {
            shared_engine: engine,
            client_id: convert_client_index_to_client_id(client_index),
        })
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn cache_state(&self) -> CacheLineState {
        let client_index: ClientIndex = convert_client_id_to_client_index(self.client_id);
        self.shared_engine.lock().clients()[client_index].cache_state()
    }

    #[instrument(skip(self), fields(client_id = self.client_id))]
    pub fn request_shared(&mut self) -> Result<(), Error> {
        self.shared_engine.lock().request_shared(self.client_id)
    }

    #[instrument(skip(self), fields(client_id = self.client_id))]
    pub fn request_exclusive(&mut self) -> Result<(), Error> {
        self.shared_engine.lock().request_exclusive(self.client_id)
    }

    pub fn apply_invalidate(&mut self) -> Result<(), Error> {
        self.shared_engine.lock().apply_invalidate(self.client_id)
    }

    pub fn apply_grant_shared(&mut self) -> Result<(), Error> {
        self.shared_engine.lock().apply_grant_shared(self.client_id)
    }

    pub fn apply_grant_exclusive(&mut self) -> Result<(), Error> {
        self.shared_engine.lock().apply_grant_exclusive(self.client_id)
    }

    /// React to whatever the directory posted to this client, if anything.
    pub fn step(&mut self) -> Option<Operation> {
        self.shared_engine.lock().step_client(self.client_id)
    }
}

impl<const NUM_CLIENTS: usize> Debug for ArcClientHandle<NUM_CLIENTS> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ArcClientHandle")
            .field("client_id", &self.client_id)
            .finish()
    }
}

impl<const NUM_CLIENTS: usize> Drop for ArcClientHandle<NUM_CLIENTS> {
    fn drop(&mut self) {
        release_client_id(self.shared_engine.as_ref(), self.client_id);
    }
}

#[derive(Debug, Display)]
pub enum RefClientHandleError {
    /** Could not construct [RefClientHandle] because all client slots for the provided
       [ProtocolEngine] are already reserved.
    */
    NoClientIdAvailable(NoClientIdAvailableError),
}

impl From<NoClientIdAvailableError> for RefClientHandleError {
    fn from(error: NoClientIdAvailableError) -> Self {
        Self::NoClientIdAvailable(error)
    }
}

/// Like [ArcClientHandle], but borrowing the engine, for use with scoped threads.
pub struct RefClientHandle<'a, const NUM_CLIENTS: usize> {
    shared_engine: &'a ProtocolEngine<NUM_CLIENTS>,
    client_id: ClientId,
}

impl<'a, const NUM_CLIENTS: usize> RefClientHandle<'a, NUM_CLIENTS> {
    pub fn construct(
        shared_engine: &'a ProtocolEngine<NUM_CLIENTS>,
    ) -> Result<Self, RefClientHandleError> {
        let client_index: ClientIndex = find_next_available_client_index(shared_engine)?;
        Ok(Self {
            shared_engine,
            client_id: convert_client_index_to_client_id(client_index),
        })
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn cache_state(&self) -> CacheLineState {
        let client_index: ClientIndex = convert_client_id_to_client_index(self.client_id);
        self.shared_engine.lock().clients()[client_index].cache_state()
    }

    #[instrument(skip(self), fields(client_id = self.client_id))]
    pub fn request_shared(&mut self) -> Result<(), Error> {
        self.shared_engine.lock().request_shared(self.client_id)
    }

    #[instrument(skip(self), fields(client_id = self.client_id))]
    pub fn request_exclusive(&mut self) -> Result<(), Error> {
        self.shared_engine.lock().request_exclusive(self.client_id)
    }

    pub fn apply_invalidate(&mut self) -> Result<(), Error> {
        self.shared_engine.lock().apply_invalidate(self.client_id)
    }

    pub fn apply_grant_shared(&mut self) -> Result<(), Error> {
        self.shared_engine.lock().apply_grant_shared(self.client_id)
    }

    pub fn apply_grant_exclusive(&mut self) -> Result<(), Error> {
        self.shared_engine.lock().apply_grant_exclusive(self.client_id)
    }

    pub fn step(&mut self) -> Option<Operation> {
        self.shared_engine.lock().step_client(self.client_id)
    }
}

impl<'a, const NUM_CLIENTS: usize> Debug for RefClientHandle<'a, NUM_CLIENTS> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RefClientHandle")
            .field("client_id", &self.client_id)
            .finish()
    }
}

impl<'a, const NUM_CLIENTS: usize> Drop for RefClientHandle<'a, NUM_CLIENTS> {
    fn drop(&mut self) {
        release_client_id(self.shared_engine, self.client_id);
    }
}
