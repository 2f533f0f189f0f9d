use crate::err::PreconditionViolation;
use crate::mailbox::{Mailbox, MailboxMismatch, MailboxOccupied};
use crate::types::{AckMessage, CacheLineState, ClientId, GrantOrInvalidate, RequestMessage};
use tracing::debug;

/// The state owned by one client: its copy of the cache line plus its ends of the three
/// mailboxes connecting it to the home directory.
///
/// The request and ack mailboxes are written here and consumed by the directory. The
/// grant/invalidate mailbox is written by the directory and consumed here.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct ClientAgent {
    client_id: ClientId,
    cache: CacheLineState,
    request: Mailbox<RequestMessage>,
    grant: Mailbox<GrantOrInvalidate>,
    ack: Mailbox<AckMessage>,
}

impl ClientAgent {
    pub(crate) fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            cache: CacheLineState::Invalid,
            request: Mailbox::new(),
            grant: Mailbox::new(),
            ack: Mailbox::new(),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn cache_state(&self) -> CacheLineState {
        self.cache
    }

    pub fn request_mailbox(&self) -> &Mailbox<RequestMessage> {
        &self.request
    }

    pub fn grant_mailbox(&self) -> &Mailbox<GrantOrInvalidate> {
        &self.grant
    }

    pub fn ack_mailbox(&self) -> &Mailbox<AckMessage> {
        &self.ack
    }

    /// Ask the directory for a read-only copy. Only a client without a usable copy may ask.
    pub(crate) fn request_shared(&mut self) -> Result<(), PreconditionViolation> {
        if self.cache != CacheLineState::Invalid {
            return Err(PreconditionViolation::CacheNotInvalid {
                client_id: self.client_id,
                actual: self.cache,
            });
        }
        self.post_request(RequestMessage::ReqShared)
    }

    /// Ask the directory for the only writable copy, either from scratch or as an upgrade from a
    /// shared copy.
    pub(crate) fn request_exclusive(&mut self) -> Result<(), PreconditionViolation> {
        if self.cache == CacheLineState::Exclusive {
            return Err(PreconditionViolation::CacheAlreadyExclusive(self.client_id));
        }
        self.post_request(RequestMessage::ReqExclusive)
    }

    fn post_request(&mut self, request: RequestMessage) -> Result<(), PreconditionViolation> {
        let client_id = self.client_id;
        self.request.post(request).map_err(|MailboxOccupied(current)| {
            PreconditionViolation::RequestMailboxOccupied(client_id, current)
        })
    }

    /// Discard the local copy and acknowledge the invalidation.
    ///
    /// This fires even when the copy is already Invalid: the ack tells the directory that no
    /// copy remains, which it needs whatever the local state was.
    pub(crate) fn apply_invalidate(&mut self) -> Result<(), PreconditionViolation> {
        self.expect_grant_mailbox(GrantOrInvalidate::Invalidate)?;
        if !self.ack.is_empty() {
            return Err(PreconditionViolation::AckMailboxOccupied(self.client_id));
        }

        self.consume_grant_mailbox(GrantOrInvalidate::Invalidate)?;
        self.cache = CacheLineState::Invalid;
        self.ack
            .post(AckMessage::InvalidateAck)
            .map_err(|_| PreconditionViolation::AckMailboxOccupied(self.client_id))?;
        debug!(client_id = self.client_id, "invalidated local copy");
        Ok(())
    }

    pub(crate) fn apply_grant_shared(&mut self) -> Result<(), PreconditionViolation> {
        self.consume_grant_mailbox(GrantOrInvalidate::GrantShared)?;
        self.cache = CacheLineState::Shared;
        Ok(())
    }

    pub(crate) fn apply_grant_exclusive(&mut self) -> Result<(), PreconditionViolation> {
        self.consume_grant_mailbox(GrantOrInvalidate::GrantExclusive)?;
        self.cache = CacheLineState::Exclusive;
        Ok(())
    }

    fn expect_grant_mailbox(
        &self,
        expected: GrantOrInvalidate,
    ) -> Result<(), PreconditionViolation> {
        if self.grant.holds(expected) {
            return Ok(());
        }
        Err(PreconditionViolation::UnexpectedGrantMailboxContent {
            client_id: self.client_id,
            expected,
            actual: self.grant.peek(),
        })
    }

    fn consume_grant_mailbox(
        &mut self,
        expected: GrantOrInvalidate,
    ) -> Result<(), PreconditionViolation> {
        let client_id = self.client_id;
        self.grant
            .take_if(expected)
            .map(|_| ())
            .map_err(|MailboxMismatch { expected, actual }| {
                PreconditionViolation::UnexpectedGrantMailboxContent {
                    client_id,
                    expected,
                    actual,
                }
            })
    }

    /// Consume the outstanding request on behalf of the directory.
    pub(crate) fn take_request(&mut self) -> Result<RequestMessage, PreconditionViolation> {
        let request = self
            .request
            .peek()
            .ok_or(PreconditionViolation::RequestMailboxEmpty(self.client_id))?;
        self.request
            .take_if(request)
            .map_err(|_| PreconditionViolation::RequestMailboxEmpty(self.client_id))
    }

    /// Post a grant or an invalidation on behalf of the directory.
    pub(crate) fn deliver(
        &mut self,
        message: GrantOrInvalidate,
    ) -> Result<(), PreconditionViolation> {
        let client_id = self.client_id;
        self.grant.post(message).map_err(|MailboxOccupied(current)| {
            PreconditionViolation::GrantMailboxOccupied(client_id, current)
        })
    }

    /// Consume the outstanding invalidation ack on behalf of the directory.
    pub(crate) fn take_ack(&mut self) -> Result<(), PreconditionViolation> {
        self.ack
            .take_if(AckMessage::InvalidateAck)
            .map(|_| ())
            .map_err(|_| PreconditionViolation::AckMailboxEmpty(self.client_id))
    }
}
