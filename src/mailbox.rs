//! Single-slot, one-directional message cells between a client and the home directory.

/// A capacity-1 mailbox. It is either empty or holds exactly one tagged value.
///
/// Writers must find the mailbox empty; readers clear it with compare-and-clear semantics, so a
/// sender is held back until the receiver has consumed the previous message.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Mailbox<T> {
    slot: Option<T>,
}

/// A write found the mailbox already holding a message.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct MailboxOccupied<T>(pub(crate) T);

/// A compare-and-clear found something other than the expected message.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct MailboxMismatch<T> {
    pub(crate) expected: T,
    pub(crate) actual: Option<T>,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self { slot: None }
    }
}

impl<T: Copy + Eq> Mailbox<T> {
    pub const fn new() -> Self {
        Self { slot: None }
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }

    /// The message currently held, if any, without consuming it.
    pub fn peek(&self) -> Option<T> {
        self.slot
    }

    pub fn holds(&self, value: T) -> bool {
        self.slot == Some(value)
    }

    /// Write `value` into the empty mailbox.
    pub(crate) fn post(&mut self, value: T) -> Result<(), MailboxOccupied<T>> {
        match self.slot {
            Some(current) => Err(MailboxOccupied(current)),
            None => {
                self.slot = Some(value);
                Ok(())
            }
        }
    }

    /// Clear the mailbox, but only if it currently holds `expected`.
    pub(crate) fn take_if(&mut self, expected: T) -> Result<T, MailboxMismatch<T>> {
        match self.slot {
            Some(current) if current == expected => {
                self.slot = None;
                Ok(current)
            }
            actual => Err(MailboxMismatch { expected, actual }),
        }
    }
}
