use core::fmt::{Display, Formatter};

use crate::client::ClientAgent;
use crate::directory::HomeDirectory;
use crate::err::{Error, PreconditionViolation};
use crate::types::{
    convert_client_id_to_client_index, convert_client_index_to_client_id, CacheLineState, ClientId,
    ClientIndex, DirectoryPhase, GrantOrInvalidate,
};
use tracing::trace;

/// One of the ten atomic transitions of the protocol.
///
/// Client-side operations and directory operations aimed at one client carry that client's id.
/// The two grants always target the directory's current requester.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Operation {
    RequestShared(ClientId),
    RequestExclusive(ClientId),
    ApplyInvalidate(ClientId),
    ApplyGrantShared(ClientId),
    ApplyGrantExclusive(ClientId),
    PickNewRequest(ClientId),
    SendInvalidate(ClientId),
    ReceiveInvalidateAck(ClientId),
    GrantShared,
    GrantExclusive,
}

impl Operation {
    /// Every operation instance for a system of `num_clients` clients.
    pub fn all(num_clients: usize) -> impl Iterator<Item = Operation> {
        (1..=num_clients)
            .flat_map(|client_id| {
                [
                    Operation::RequestShared(client_id),
                    Operation::RequestExclusive(client_id),
                    Operation::ApplyInvalidate(client_id),
                    Operation::ApplyGrantShared(client_id),
                    Operation::ApplyGrantExclusive(client_id),
                    Operation::PickNewRequest(client_id),
                    Operation::SendInvalidate(client_id),
                    Operation::ReceiveInvalidateAck(client_id),
                ]
            })
            .chain([Operation::GrantShared, Operation::GrantExclusive])
    }

    /// The client this operation names explicitly, if any.
    pub fn client_id(&self) -> Option<ClientId> {
        match *self {
            Operation::RequestShared(client_id)
            | Operation::RequestExclusive(client_id)
            | Operation::ApplyInvalidate(client_id)
            | Operation::ApplyGrantShared(client_id)
            | Operation::ApplyGrantExclusive(client_id)
            | Operation::PickNewRequest(client_id)
            | Operation::SendInvalidate(client_id)
            | Operation::ReceiveInvalidateAck(client_id) => Some(client_id),
            Operation::GrantShared | Operation::GrantExclusive => None,
        }
    }

    /// Whether the home directory, rather than a client, performs this operation.
    pub fn is_directory_operation(&self) -> bool {
        matches!(
            self,
            Operation::PickNewRequest(_)
                | Operation::SendInvalidate(_)
                | Operation::ReceiveInvalidateAck(_)
                | Operation::GrantShared
                | Operation::GrantExclusive
        )
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The complete state of one coherence domain: `NUM_CLIENTS` client agents sharing a single
/// line through one home directory.
///
/// Every operation checks its precondition and either applies its whole effect or returns a
/// [PreconditionViolation] without touching any state. Operations take `&mut self`, so they are
/// trivially indivisible; [crate::ProtocolEngine] provides the same surface behind a lock for
/// sharing between threads.
///
/// `Protocol` is a plain value, so cloning it takes a snapshot.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Protocol<const NUM_CLIENTS: usize> {
    clients: [ClientAgent; NUM_CLIENTS],
    directory: HomeDirectory<NUM_CLIENTS>,
}

impl<const NUM_CLIENTS: usize> Default for Protocol<NUM_CLIENTS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const NUM_CLIENTS: usize> Protocol<NUM_CLIENTS> {
    /// All clients Invalid, all mailboxes empty, and the directory idle with no sharers.
    pub fn new() -> Self {
        Self {
            clients: core::array::from_fn(|client_index| {
                ClientAgent::new(convert_client_index_to_client_id(client_index))
            }),
            directory: HomeDirectory::new(),
        }
    }

    fn client_index(client_id: ClientId) -> Result<ClientIndex, Error> {
        if client_id == 0 || client_id > NUM_CLIENTS {
            return Err(PreconditionViolation::UnknownClient {
                client_id,
                num_clients: NUM_CLIENTS,
            }
            .into());
        }
        Ok(convert_client_id_to_client_index(client_id))
    }

    pub fn clients(&self) -> &[ClientAgent; NUM_CLIENTS] {
        &self.clients
    }

    pub fn client(&self, client_id: ClientId) -> Option<&ClientAgent> {
        client_id
            .checked_sub(1)
            .and_then(|client_index| self.clients.get(client_index))
    }

    pub fn cache_state(&self, client_id: ClientId) -> Option<CacheLineState> {
        self.client(client_id).map(ClientAgent::cache_state)
    }

    pub fn directory(&self) -> &HomeDirectory<NUM_CLIENTS> {
        &self.directory
    }

    pub fn phase(&self) -> DirectoryPhase {
        self.directory.phase(&self.clients)
    }

    /// Whether nothing is in flight: the directory is idle and every mailbox is empty.
    pub fn is_quiescent(&self) -> bool {
        self.directory.is_idle()
            && self.clients.iter().all(|client| {
                client.request_mailbox().is_empty()
                    && client.grant_mailbox().is_empty()
                    && client.ack_mailbox().is_empty()
            })
    }

    pub fn request_shared(&mut self, client_id: ClientId) -> Result<(), Error> {
        let client_index = Self::client_index(client_id)?;
        self.clients[client_index].request_shared()?;
        self.directory.note_arrival(client_index);
        Ok(())
    }

    pub fn request_exclusive(&mut self, client_id: ClientId) -> Result<(), Error> {
        let client_index = Self::client_index(client_id)?;
        self.clients[client_index].request_exclusive()?;
        self.directory.note_arrival(client_index);
        Ok(())
    }

    pub fn apply_invalidate(&mut self, client_id: ClientId) -> Result<(), Error> {
        let client_index = Self::client_index(client_id)?;
        Ok(self.clients[client_index].apply_invalidate()?)
    }

    pub fn apply_grant_shared(&mut self, client_id: ClientId) -> Result<(), Error> {
        let client_index = Self::client_index(client_id)?;
        Ok(self.clients[client_index].apply_grant_shared()?)
    }

    pub fn apply_grant_exclusive(&mut self, client_id: ClientId) -> Result<(), Error> {
        let client_index = Self::client_index(client_id)?;
        Ok(self.clients[client_index].apply_grant_exclusive()?)
    }

    /// Adopt the request of `client_id`, whatever its position in the arrival queue.
    pub fn pick_new_request(&mut self, client_id: ClientId) -> Result<(), Error> {
        let client_index = Self::client_index(client_id)?;
        self.directory.pick_new_request(&mut self.clients, client_index)?;
        Ok(())
    }

    /// Adopt the oldest waiting request. Returns the id of the adopted requester.
    pub fn pick_next_request(&mut self) -> Result<ClientId, Error> {
        self.directory.ensure_idle()?;
        let client_index = self
            .directory
            .next_waiting()
            .ok_or(PreconditionViolation::NoRequestWaiting)?;
        self.directory.pick_new_request(&mut self.clients, client_index)?;
        Ok(convert_client_index_to_client_id(client_index))
    }

    pub fn send_invalidate(&mut self, client_id: ClientId) -> Result<(), Error> {
        let client_index = Self::client_index(client_id)?;
        Ok(self.directory.send_invalidate(&mut self.clients, client_index)?)
    }

    pub fn receive_invalidate_ack(&mut self, client_id: ClientId) -> Result<(), Error> {
        let client_index = Self::client_index(client_id)?;
        Ok(self.directory.receive_invalidate_ack(&mut self.clients, client_index)?)
    }

    /// Grant shared access to the current requester. Returns the requester's id.
    pub fn grant_shared(&mut self) -> Result<ClientId, Error> {
        Ok(self.directory.grant_shared(&mut self.clients)?)
    }

    /// Grant exclusive access to the current requester. Returns the requester's id.
    pub fn grant_exclusive(&mut self) -> Result<ClientId, Error> {
        Ok(self.directory.grant_exclusive(&mut self.clients)?)
    }

    /// Perform `operation`, or reject it without side effects.
    pub fn apply(&mut self, operation: Operation) -> Result<(), Error> {
        let result = match operation {
            Operation::RequestShared(client_id) => self.request_shared(client_id),
            Operation::RequestExclusive(client_id) => self.request_exclusive(client_id),
            Operation::ApplyInvalidate(client_id) => self.apply_invalidate(client_id),
            Operation::ApplyGrantShared(client_id) => self.apply_grant_shared(client_id),
            Operation::ApplyGrantExclusive(client_id) => self.apply_grant_exclusive(client_id),
            Operation::PickNewRequest(client_id) => self.pick_new_request(client_id),
            Operation::SendInvalidate(client_id) => self.send_invalidate(client_id),
            Operation::ReceiveInvalidateAck(client_id) => self.receive_invalidate_ack(client_id),
            Operation::GrantShared => self.grant_shared().map(|_| ()),
            Operation::GrantExclusive => self.grant_exclusive().map(|_| ()),
        };
        if let Err(error) = &result {
            trace!(%operation, %error, "rejected operation");
        }
        result
    }

    /// Whether `operation` would currently be accepted.
    pub fn enabled(&self, operation: Operation) -> bool {
        self.clone().apply(operation).is_ok()
    }

    /// Fire the first enabled directory operation, preferring to drain acks and invalidations
    /// before granting, and granting before adopting the next waiting request.
    pub fn step_home(&mut self) -> Option<Operation> {
        for client_id in 1..=NUM_CLIENTS {
            let operation = Operation::ReceiveInvalidateAck(client_id);
            if self.apply(operation).is_ok() {
                return Some(operation);
            }
        }
        for client_id in 1..=NUM_CLIENTS {
            let operation = Operation::SendInvalidate(client_id);
            if self.apply(operation).is_ok() {
                return Some(operation);
            }
        }
        for operation in [Operation::GrantShared, Operation::GrantExclusive] {
            if self.apply(operation).is_ok() {
                return Some(operation);
            }
        }
        self.pick_next_request().ok().map(Operation::PickNewRequest)
    }

    /// Fire whichever client-side reaction to the grant/invalidate mailbox is enabled.
    pub fn step_client(&mut self, client_id: ClientId) -> Option<Operation> {
        let message = self.client(client_id)?.grant_mailbox().peek()?;
        let operation = match message {
            GrantOrInvalidate::Invalidate => Operation::ApplyInvalidate(client_id),
            GrantOrInvalidate::GrantShared => Operation::ApplyGrantShared(client_id),
            GrantOrInvalidate::GrantExclusive => Operation::ApplyGrantExclusive(client_id),
        };
        self.apply(operation).ok().map(|_| operation)
    }

    /// Service every outstanding request until nothing but new client requests could fire.
    ///
    /// Returns the number of operations performed.
    pub fn run_to_quiescence(&mut self) -> usize {
        let mut num_operations: usize = 0;
        loop {
            let mut progressed = false;
            if self.step_home().is_some() {
                num_operations += 1;
                progressed = true;
            }
            for client_id in 1..=NUM_CLIENTS {
                if self.step_client(client_id).is_some() {
                    num_operations += 1;
                    progressed = true;
                }
            }
            if !progressed {
                return num_operations;
            }
        }
    }
}

#[cfg(test)]
#[cfg(feature = "std")]
mod tests {
    use crate::err::{Error, PreconditionViolation};
    use crate::invariant::check_invariants;
    use crate::protocol::{Operation, Protocol};
    use crate::types::{CacheLineState, DirectoryPhase, GrantOrInvalidate};
    use std::collections::{HashSet, VecDeque};
    use test_log::test;
    use tracing::debug;

    #[test]
    fn test_operation_enumeration_covers_every_transition() {
        let operations: Vec<Operation> = Operation::all(3).collect();
        assert_eq!(operations.len(), 3 * 8 + 2);
        assert!(operations.contains(&Operation::SendInvalidate(3)));
        assert!(operations.contains(&Operation::GrantExclusive));
        assert_eq!(
            operations.iter().filter(|op| op.is_directory_operation()).count(),
            3 * 3 + 2
        );
        assert_eq!(Operation::GrantShared.client_id(), None);
        assert_eq!(Operation::ApplyInvalidate(2).client_id(), Some(2));
    }

    #[test]
    fn test_unknown_clients_are_rejected() {
        let mut protocol: Protocol<2> = Protocol::new();
        for client_id in [0, 3] {
            assert_eq!(
                protocol.request_shared(client_id),
                Err(Error::PreconditionViolation(PreconditionViolation::UnknownClient {
                    client_id,
                    num_clients: 2,
                }))
            );
        }
        assert_eq!(protocol, Protocol::new());
        assert_eq!(protocol.step_client(7), None);
    }

    #[test]
    fn test_pick_next_request_follows_arrival_order() {
        let mut protocol: Protocol<3> = Protocol::new();
        protocol.request_shared(3).unwrap();
        protocol.request_exclusive(1).unwrap();
        protocol.request_shared(2).unwrap();
        assert_eq!(
            protocol.directory().waiting_requests().collect::<Vec<_>>(),
            vec![3, 1, 2]
        );

        assert_eq!(protocol.pick_next_request(), Ok(3));
        assert_eq!(protocol.grant_shared(), Ok(3));
        assert_eq!(protocol.pick_next_request(), Ok(1));
        assert_eq!(protocol.directory().waiting_requests().collect::<Vec<_>>(), vec![2]);

        assert!(matches!(
            protocol.pick_next_request(),
            Err(Error::PreconditionViolation(PreconditionViolation::DirectoryBusy { .. }))
        ));
    }

    #[test]
    fn test_pick_next_request_without_waiting_requests() {
        let mut protocol: Protocol<2> = Protocol::new();
        assert_eq!(
            protocol.pick_next_request(),
            Err(Error::PreconditionViolation(PreconditionViolation::NoRequestWaiting))
        );
    }

    #[test]
    fn test_explicit_pick_bypasses_arrival_order() {
        let mut protocol: Protocol<3> = Protocol::new();
        protocol.request_shared(1).unwrap();
        protocol.request_shared(2).unwrap();
        protocol.pick_new_request(2).unwrap();
        assert_eq!(protocol.directory().current_requester(), Some(2));
        assert_eq!(protocol.directory().waiting_requests().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_enabled_does_not_mutate() {
        let mut protocol: Protocol<2> = Protocol::new();
        protocol.request_exclusive(1).unwrap();
        let before = protocol.clone();
        assert!(protocol.enabled(Operation::PickNewRequest(1)));
        assert!(!protocol.enabled(Operation::GrantExclusive));
        assert_eq!(protocol, before);
    }

    #[test]
    fn test_run_to_quiescence_services_every_request() {
        let mut protocol: Protocol<3> = Protocol::new();
        protocol.request_shared(1).unwrap();
        protocol.request_shared(2).unwrap();
        protocol.request_exclusive(3).unwrap();

        let num_operations = protocol.run_to_quiescence();
        debug!("quiesced after {num_operations} operations: {protocol:?}");
        assert!(protocol.is_quiescent());
        assert_eq!(protocol.cache_state(1), Some(CacheLineState::Invalid));
        assert_eq!(protocol.cache_state(2), Some(CacheLineState::Invalid));
        assert_eq!(protocol.cache_state(3), Some(CacheLineState::Exclusive));
        assert_eq!(protocol.directory().last_exclusive_owner(), Some(3));
        assert_eq!(protocol.phase(), DirectoryPhase::Idle);
        assert!(check_invariants(&protocol).is_ok());
    }

    #[test]
    fn test_step_client_reacts_to_mailbox_content() {
        let mut protocol: Protocol<2> = Protocol::new();
        assert_eq!(protocol.step_client(1), None);

        protocol.request_shared(1).unwrap();
        assert_eq!(protocol.step_home(), Some(Operation::PickNewRequest(1)));
        assert_eq!(protocol.phase(), DirectoryPhase::Granting);
        assert_eq!(protocol.step_home(), Some(Operation::GrantShared));
        assert!(protocol
            .client(1)
            .unwrap()
            .grant_mailbox()
            .holds(GrantOrInvalidate::GrantShared));
        assert_eq!(protocol.step_client(1), Some(Operation::ApplyGrantShared(1)));
        assert_eq!(protocol.cache_state(1), Some(CacheLineState::Shared));
        assert_eq!(protocol.step_home(), None);
    }

    /// Breadth-first search over every state reachable from the initial state, applying every
    /// operation to every state.
    fn explore_reachable_states<const NUM_CLIENTS: usize>(check_draining: bool) -> usize {
        let initial: Protocol<NUM_CLIENTS> = Protocol::new();
        let operations: Vec<Operation> = Operation::all(NUM_CLIENTS).collect();

        let mut visited: HashSet<Protocol<NUM_CLIENTS>> = HashSet::new();
        let mut frontier: VecDeque<Protocol<NUM_CLIENTS>> = VecDeque::new();
        visited.insert(initial.clone());
        frontier.push_back(initial);

        while let Some(state) = frontier.pop_front() {
            if let Err(violation) = check_invariants(&state) {
                panic!("invariant violated: {violation} in {state:?}");
            }

            if check_draining {
                // from every reachable state, the directory can finish all outstanding work
                let mut drained = state.clone();
                drained.run_to_quiescence();
                assert!(drained.is_quiescent(), "stuck in {drained:?}");
                assert!(check_invariants(&drained).is_ok());
            }

            for operation in operations.iter().copied() {
                let mut next = state.clone();
                match next.apply(operation) {
                    Ok(()) => {
                        if visited.insert(next.clone()) {
                            frontier.push_back(next);
                        }
                    }
                    Err(_) => assert_eq!(next, state, "{operation} was rejected but mutated state"),
                }
            }
        }
        visited.len()
    }

    #[test]
    fn test_every_reachable_state_with_two_clients_is_safe() {
        let num_states = explore_reachable_states::<2>(true);
        debug!("explored {num_states} states");
        assert!(num_states > 1);
    }

    #[test]
    fn test_every_reachable_state_with_three_clients_is_safe() {
        let num_states = explore_reachable_states::<3>(false);
        debug!("explored {num_states} states");
        assert!(num_states > 1);
    }
}
