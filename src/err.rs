use crate::types::{CacheLineState, ClientId, GrantOrInvalidate, RequestMessage};
use displaydoc::Display;

/// Any error which can be returned by a protocol operation.
///
/// Rejected operations never mutate state. Callers should treat a rejection as "not applicable
/// right now" and may retry later, once another operation has changed the state.
#[derive(Debug, Display, Clone, Copy, Eq, PartialEq)]
pub enum Error {
    /// The precondition of the operation does not currently hold: {0}
    PreconditionViolation(PreconditionViolation),
}

impl From<PreconditionViolation> for Error {
    fn from(precondition_violation: PreconditionViolation) -> Self {
        Error::PreconditionViolation(precondition_violation)
    }
}

/// The specific precondition which failed.
#[derive(Debug, Display, Clone, Copy, Eq, PartialEq)]
pub enum PreconditionViolation {
    /// Client {client_id} does not exist: valid ids are 1 through {num_clients}.
    UnknownClient {
        client_id: ClientId,
        num_clients: usize,
    },

    /// Client {client_id} must hold an Invalid copy to request shared access, but holds {actual}.
    CacheNotInvalid {
        client_id: ClientId,
        actual: CacheLineState,
    },

    /// Client {0} already holds an Exclusive copy and cannot request exclusive access again.
    CacheAlreadyExclusive(ClientId),

    /// The request mailbox of client {0} already holds {1}.
    RequestMailboxOccupied(ClientId, RequestMessage),

    /// The request mailbox of client {0} is empty.
    RequestMailboxEmpty(ClientId),

    /// The grant/invalidate mailbox of client {0} already holds {1}.
    GrantMailboxOccupied(ClientId, GrantOrInvalidate),

    /** Client {client_id} expected {expected} in its grant/invalidate mailbox, but the mailbox
        held {actual:?}.
    */
    UnexpectedGrantMailboxContent {
        client_id: ClientId,
        expected: GrantOrInvalidate,
        actual: Option<GrantOrInvalidate>,
    },

    /// The ack mailbox of client {0} still holds an unconsumed InvalidateAck.
    AckMailboxOccupied(ClientId),

    /// The ack mailbox of client {0} holds no InvalidateAck.
    AckMailboxEmpty(ClientId),

    /// The directory is busy servicing {current_command} for client {current_requester}.
    DirectoryBusy {
        current_command: RequestMessage,
        current_requester: ClientId,
    },

    /// The directory is idle and is not servicing any request.
    DirectoryIdle,

    /// No client has a request waiting to be adopted.
    NoRequestWaiting,

    /// The directory is servicing {actual:?}, but the operation requires {expected}.
    WrongCommand {
        expected: RequestMessage,
        actual: Option<RequestMessage>,
    },

    /// Client {0} is not marked as pending invalidation.
    NotPendingInvalidate(ClientId),

    /// No invalidation is needed while servicing {0} with no exclusive copy outstanding.
    InvalidationNotRequired(RequestMessage),

    /// An exclusive copy is still outstanding.
    ExclusiveOutstanding,

    /// Client {0} is still recorded as a sharer.
    SharerRemains(ClientId),
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(feature = "std")]
impl std::error::Error for PreconditionViolation {}
