//! Safety invariants of the protocol, checked over a whole [Protocol] snapshot.
//!
//! Every state reachable through accepted operations satisfies all of them. They are not
//! consulted by the protocol logic itself.

use crate::protocol::Protocol;
use crate::types::{
    convert_client_index_to_client_id, AckMessage, CacheLineState, ClientId, GrantOrInvalidate,
    RequestMessage,
};
use displaydoc::Display;

/// A violated safety invariant.
#[derive(Debug, Display, Clone, Copy, Eq, PartialEq)]
pub enum InvariantViolation {
    /** Client {exclusive_client} holds an Exclusive copy while client {other_client}
        holds {other_state}.
    */
    MutualExclusion {
        exclusive_client: ClientId,
        other_client: ClientId,
        other_state: CacheLineState,
    },

    /** Client {0} holds or is being granted a Shared copy without being a sharer under a
        directory with no exclusive copy outstanding.
    */
    UnauthorizedShared(ClientId),

    /** Client {0} holds or is being granted an Exclusive copy without being the recorded
        exclusive owner.
    */
    UnauthorizedExclusive(ClientId),

    /// Client {0} is a sharer while another client is the exclusive owner.
    SharerBesideExclusiveOwner(ClientId),

    /// Client {0} has an Invalidate outstanding that the directory state does not account for.
    UnexpectedInvalidate(ClientId),

    /// Client {0} has an InvalidateAck outstanding that the directory state does not account for.
    UnexpectedAck(ClientId),

    /// Client {0} is pending invalidation without being a sharer.
    PendingInvalidateWithoutSharer(ClientId),

    /// The arrival queue disagrees with the request mailbox of client {0}.
    ArrivalQueueMismatch(ClientId),
}

#[cfg(feature = "std")]
impl std::error::Error for InvariantViolation {}

/// Check every invariant, returning the first one found violated.
pub fn check_invariants<const NUM_CLIENTS: usize>(
    protocol: &Protocol<NUM_CLIENTS>,
) -> Result<(), InvariantViolation> {
    check_mutual_exclusion(protocol)?;
    for client_index in 0..NUM_CLIENTS {
        check_client(protocol, client_index)?;
    }
    Ok(())
}

fn check_mutual_exclusion<const NUM_CLIENTS: usize>(
    protocol: &Protocol<NUM_CLIENTS>,
) -> Result<(), InvariantViolation> {
    let clients = protocol.clients();
    let exclusive_client = match clients
        .iter()
        .find(|client| client.cache_state() == CacheLineState::Exclusive)
    {
        Some(client) => client,
        None => return Ok(()),
    };
    let other = clients.iter().find(|client| {
        client.client_id() != exclusive_client.client_id()
            && client.cache_state() != CacheLineState::Invalid
    });
    match other {
        Some(other) => Err(InvariantViolation::MutualExclusion {
            exclusive_client: exclusive_client.client_id(),
            other_client: other.client_id(),
            other_state: other.cache_state(),
        }),
        None => Ok(()),
    }
}

fn check_client<const NUM_CLIENTS: usize>(
    protocol: &Protocol<NUM_CLIENTS>,
    client_index: usize,
) -> Result<(), InvariantViolation> {
    let directory = protocol.directory();
    let client = &protocol.clients()[client_index];
    let client_id = convert_client_index_to_client_id(client_index);

    let is_sharer = directory.is_sharer_at(client_index);
    let is_pending = directory.is_pending_invalidate_at(client_index);
    let exclusive_granted = directory.exclusive_granted();
    let is_last_exclusive_owner = directory.last_exclusive_owner() == Some(client_id);

    let grant = client.grant_mailbox().peek();
    let cache = client.cache_state();

    if (cache == CacheLineState::Shared || grant == Some(GrantOrInvalidate::GrantShared))
        && !(is_sharer && !exclusive_granted)
    {
        return Err(InvariantViolation::UnauthorizedShared(client_id));
    }

    if (cache == CacheLineState::Exclusive || grant == Some(GrantOrInvalidate::GrantExclusive))
        && !(is_sharer && exclusive_granted && is_last_exclusive_owner)
    {
        return Err(InvariantViolation::UnauthorizedExclusive(client_id));
    }

    if exclusive_granted && is_sharer && !is_last_exclusive_owner {
        return Err(InvariantViolation::SharerBesideExclusiveOwner(client_id));
    }

    // invalidations are only in flight while the current command needs them
    let invalidation_in_progress = match directory.current_command() {
        Some(RequestMessage::ReqExclusive) => true,
        Some(RequestMessage::ReqShared) => exclusive_granted,
        None => false,
    };

    if grant == Some(GrantOrInvalidate::Invalidate)
        && !(invalidation_in_progress && is_sharer && !is_pending)
    {
        return Err(InvariantViolation::UnexpectedInvalidate(client_id));
    }

    if client.ack_mailbox().holds(AckMessage::InvalidateAck)
        && !(cache == CacheLineState::Invalid
            && invalidation_in_progress
            && is_sharer
            && !is_pending
            && grant.is_none())
    {
        return Err(InvariantViolation::UnexpectedAck(client_id));
    }

    if is_pending && !is_sharer {
        return Err(InvariantViolation::PendingInvalidateWithoutSharer(client_id));
    }

    let is_waiting = directory.waiting_requests().any(|waiting| waiting == client_id);
    if is_waiting == client.request_mailbox().is_empty() {
        return Err(InvariantViolation::ArrivalQueueMismatch(client_id));
    }

    Ok(())
}
