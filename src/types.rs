use core::fmt::{Display, Formatter};

/// An identifier for a client node which shares the cache line with the others.
///
/// ClientIds are assigned incrementally starting from 1, up to and including the number of
/// clients the [crate::Protocol] was built for.
pub type ClientId = usize;

/// The zero-based position of a client within per-client arrays.
pub(crate) type ClientIndex = usize;

pub(crate) fn convert_client_id_to_client_index(client_id: ClientId) -> ClientIndex {
    client_id - 1
}

pub(crate) fn convert_client_index_to_client_id(client_index: ClientIndex) -> ClientId {
    client_index + 1
}

/// The state of a client's copy of the cache line.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash)]
pub enum CacheLineState {
    /// The client holds no usable copy.
    #[default]
    Invalid,
    /// The client holds a read-only copy which other clients may hold at the same time.
    Shared,
    /// The client holds the only copy and may write to it.
    Exclusive,
}

/// A request a client posts to the home directory. An empty request mailbox stands for "none".
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum RequestMessage {
    ReqShared,
    ReqExclusive,
}

/// A message the home directory posts to a client.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum GrantOrInvalidate {
    /// The client must discard its copy and acknowledge.
    Invalidate,
    GrantShared,
    GrantExclusive,
}

/// A message a client posts back to the home directory after discarding its copy.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum AckMessage {
    InvalidateAck,
}

/// Where the home directory is in servicing a request.
///
/// `Idle` can transition to `Selecting`.
/// `Selecting` stays put through any number of invalidation rounds, then moves to `Granting`.
/// `Granting` moves back to `Idle` once the grant is posted.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum DirectoryPhase {
    /// No request is being serviced.
    Idle,
    /// A request was adopted and conflicting copies are still being invalidated.
    Selecting,
    /// Nothing stands between the current request and its grant.
    Granting,
}

impl Display for CacheLineState {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Display for RequestMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Display for GrantOrInvalidate {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Display for AckMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Display for DirectoryPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}
