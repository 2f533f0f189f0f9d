use crate::client::ClientAgent;
use crate::err::PreconditionViolation;
use crate::types::{
    convert_client_index_to_client_id, ClientId, ClientIndex, DirectoryPhase, GrantOrInvalidate,
    RequestMessage,
};
use tracing::{debug, trace};

/// The request the directory adopted and is currently servicing.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
struct CurrentRequest {
    command: RequestMessage,
    requester: ClientIndex,
}

/// The home node: the single serialization point for every request against the cache line.
///
/// The directory services one request at a time. While it does, it drains the invalidation
/// worklist it snapshotted from the sharer set when the request was adopted, collects the
/// acknowledgements, and finally posts the grant.
///
/// Requests are adopted in arrival order when [crate::Protocol::pick_next_request] is used. The
/// arrival queue never holds more than `NUM_CLIENTS` entries because every client has at most one
/// outstanding request.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct HomeDirectory<const NUM_CLIENTS: usize> {
    /// The request being serviced. The directory is idle iff this is `None`.
    current: Option<CurrentRequest>,

    /// Clients currently holding, or about to hold, a copy of the line.
    sharer_of: [bool; NUM_CLIENTS],

    /// Clients which must still be sent an invalidation before the current request can be
    /// granted. Copied from `sharer_of` when a request is adopted.
    pending_invalidate: [bool; NUM_CLIENTS],

    /// Whether an exclusive copy is outstanding.
    exclusive_granted: bool,

    /// The client most recently granted exclusive access. Only read by invariant checks.
    last_exclusive_owner: Option<ClientIndex>,

    /// Clients with a posted request, oldest first. Only the first `num_waiting` entries are
    /// meaningful.
    waiting: [ClientIndex; NUM_CLIENTS],
    num_waiting: usize,
}

impl<const NUM_CLIENTS: usize> HomeDirectory<NUM_CLIENTS> {
    pub(crate) fn new() -> Self {
        Self {
            current: None,
            sharer_of: [false; NUM_CLIENTS],
            pending_invalidate: [false; NUM_CLIENTS],
            exclusive_granted: false,
            last_exclusive_owner: None,
            waiting: [0; NUM_CLIENTS],
            num_waiting: 0,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    pub fn current_command(&self) -> Option<RequestMessage> {
        self.current.map(|current| current.command)
    }

    /// The client whose request is being serviced, if any.
    pub fn current_requester(&self) -> Option<ClientId> {
        self.current.map(|current| convert_client_index_to_client_id(current.requester))
    }

    pub fn exclusive_granted(&self) -> bool {
        self.exclusive_granted
    }

    pub fn last_exclusive_owner(&self) -> Option<ClientId> {
        self.last_exclusive_owner.map(convert_client_index_to_client_id)
    }

    /// Whether `client_id` is recorded as holding a copy. Unknown ids are never sharers.
    pub fn is_sharer(&self, client_id: ClientId) -> bool {
        client_id
            .checked_sub(1)
            .and_then(|client_index| self.sharer_of.get(client_index))
            .copied()
            .unwrap_or(false)
    }

    pub fn is_pending_invalidate(&self, client_id: ClientId) -> bool {
        client_id
            .checked_sub(1)
            .and_then(|client_index| self.pending_invalidate.get(client_index))
            .copied()
            .unwrap_or(false)
    }

    pub(crate) fn is_sharer_at(&self, client_index: ClientIndex) -> bool {
        self.sharer_of[client_index]
    }

    pub(crate) fn is_pending_invalidate_at(&self, client_index: ClientIndex) -> bool {
        self.pending_invalidate[client_index]
    }

    /// The ids of all clients recorded as sharers, in id order.
    pub fn sharers(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.sharer_of
            .iter()
            .enumerate()
            .filter(|(_, is_sharer)| **is_sharer)
            .map(|(client_index, _)| convert_client_index_to_client_id(client_index))
    }

    /// The ids of clients with a request waiting to be adopted, oldest first.
    pub fn waiting_requests(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.waiting[..self.num_waiting]
            .iter()
            .map(|client_index| convert_client_index_to_client_id(*client_index))
    }

    /// Derive where the directory is in servicing the current request.
    pub(crate) fn phase(&self, clients: &[ClientAgent; NUM_CLIENTS]) -> DirectoryPhase {
        match self.current {
            None => DirectoryPhase::Idle,
            Some(current) => {
                let requester_mailbox_is_empty =
                    clients[current.requester].grant_mailbox().is_empty();
                let can_grant = match current.command {
                    RequestMessage::ReqShared => !self.exclusive_granted,
                    RequestMessage::ReqExclusive => {
                        !self.sharer_of.iter().any(|is_sharer| *is_sharer)
                    }
                };
                if can_grant && requester_mailbox_is_empty {
                    DirectoryPhase::Granting
                } else {
                    DirectoryPhase::Selecting
                }
            }
        }
    }

    /// Record that the client at `client_index` just posted a request.
    pub(crate) fn note_arrival(&mut self, client_index: ClientIndex) {
        if self.waiting[..self.num_waiting].contains(&client_index) {
            return;
        }
        self.waiting[self.num_waiting] = client_index;
        self.num_waiting += 1;
    }

    /// The oldest client with a posted request, if any.
    pub(crate) fn next_waiting(&self) -> Option<ClientIndex> {
        self.waiting[..self.num_waiting].first().copied()
    }

    fn remove_waiting(&mut self, client_index: ClientIndex) {
        let position = self.waiting[..self.num_waiting]
            .iter()
            .position(|waiting_index| *waiting_index == client_index);
        if let Some(position) = position {
            self.waiting.copy_within(position + 1..self.num_waiting, position);
            self.num_waiting -= 1;
        }
    }

    pub(crate) fn ensure_idle(&self) -> Result<(), PreconditionViolation> {
        match self.current {
            None => Ok(()),
            Some(current) => Err(PreconditionViolation::DirectoryBusy {
                current_command: current.command,
                current_requester: convert_client_index_to_client_id(current.requester),
            }),
        }
    }

    fn ensure_servicing(
        &self,
        expected: RequestMessage,
    ) -> Result<CurrentRequest, PreconditionViolation> {
        match self.current {
            Some(current) if current.command == expected => Ok(current),
            actual => Err(PreconditionViolation::WrongCommand {
                expected,
                actual: actual.map(|current| current.command),
            }),
        }
    }

    /// Adopt the request posted by the client at `client_index` and snapshot the sharer set as
    /// the invalidation worklist for it.
    pub(crate) fn pick_new_request(
        &mut self,
        clients: &mut [ClientAgent; NUM_CLIENTS],
        client_index: ClientIndex,
    ) -> Result<RequestMessage, PreconditionViolation> {
        self.ensure_idle()?;
        let command = clients[client_index].take_request()?;

        self.current = Some(CurrentRequest {
            command,
            requester: client_index,
        });
        // an explicit copy: later changes to sharer_of must not leak into the worklist
        self.pending_invalidate = self.sharer_of;
        self.remove_waiting(client_index);

        debug!(
            client_id = convert_client_index_to_client_id(client_index),
            %command,
            "adopted request"
        );
        Ok(command)
    }

    /// Post an invalidation to a client on the worklist.
    ///
    /// Invalidation is only needed for exclusive requests, or for shared requests while an
    /// exclusive copy is outstanding, since there is no path to downgrade an exclusive copy.
    pub(crate) fn send_invalidate(
        &mut self,
        clients: &mut [ClientAgent; NUM_CLIENTS],
        client_index: ClientIndex,
    ) -> Result<(), PreconditionViolation> {
        let client_id = convert_client_index_to_client_id(client_index);
        let current = self.current.ok_or(PreconditionViolation::DirectoryIdle)?;
        if current.command == RequestMessage::ReqShared && !self.exclusive_granted {
            return Err(PreconditionViolation::InvalidationNotRequired(current.command));
        }
        if !self.pending_invalidate[client_index] {
            return Err(PreconditionViolation::NotPendingInvalidate(client_id));
        }

        clients[client_index].deliver(GrantOrInvalidate::Invalidate)?;
        self.pending_invalidate[client_index] = false;

        trace!(client_id, "sent invalidate");
        Ok(())
    }

    /// Consume an invalidation ack. The client no longer holds a copy, and any exclusive copy
    /// is gone with it.
    pub(crate) fn receive_invalidate_ack(
        &mut self,
        clients: &mut [ClientAgent; NUM_CLIENTS],
        client_index: ClientIndex,
    ) -> Result<(), PreconditionViolation> {
        if self.current.is_none() {
            return Err(PreconditionViolation::DirectoryIdle);
        }
        clients[client_index].take_ack()?;
        self.sharer_of[client_index] = false;
        self.exclusive_granted = false;

        trace!(
            client_id = convert_client_index_to_client_id(client_index),
            "received invalidate ack"
        );
        Ok(())
    }

    pub(crate) fn grant_shared(
        &mut self,
        clients: &mut [ClientAgent; NUM_CLIENTS],
    ) -> Result<ClientId, PreconditionViolation> {
        let current = self.ensure_servicing(RequestMessage::ReqShared)?;
        if self.exclusive_granted {
            return Err(PreconditionViolation::ExclusiveOutstanding);
        }

        clients[current.requester].deliver(GrantOrInvalidate::GrantShared)?;
        self.sharer_of[current.requester] = true;
        self.current = None;

        let client_id = convert_client_index_to_client_id(current.requester);
        debug!(client_id, "granted shared access");
        Ok(client_id)
    }

    /// Grant exclusive access once every sharer has acknowledged its invalidation.
    pub(crate) fn grant_exclusive(
        &mut self,
        clients: &mut [ClientAgent; NUM_CLIENTS],
    ) -> Result<ClientId, PreconditionViolation> {
        let current = self.ensure_servicing(RequestMessage::ReqExclusive)?;
        if let Some(sharer_index) = self.sharer_of.iter().position(|is_sharer| *is_sharer) {
            return Err(PreconditionViolation::SharerRemains(
                convert_client_index_to_client_id(sharer_index),
            ));
        }

        clients[current.requester].deliver(GrantOrInvalidate::GrantExclusive)?;
        self.sharer_of[current.requester] = true;
        self.current = None;
        self.exclusive_granted = true;
        self.last_exclusive_owner = Some(current.requester);

        let client_id = convert_client_index_to_client_id(current.requester);
        debug!(client_id, "granted exclusive access");
        Ok(client_id)
    }
}
