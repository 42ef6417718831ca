//! Id generation
//!
//! Define ids and request ids each come from their own generator instance,
//! owned by the component that hands them out. Tests inject deterministic
//! sequences through the same trait.

/// Source of monotonically increasing ids
pub trait IdGenerator: Send {
    /// Next id, or `None` once the id space is used up
    ///
    /// Never returns an id it has returned before.
    fn next_id(&mut self) -> Option<u32>;
}

/// Counter starting at a fixed value
///
/// Zero is never issued. The counter does not wrap: after `u32::MAX` it is
/// exhausted and yields `None` from then on.
#[derive(Debug, Clone)]
pub struct SequentialIds {
    next: Option<u32>,
}

impl SequentialIds {
    /// Counter starting at 1
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u32) -> Self {
        Self {
            next: Some(first.max(1)),
        }
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&mut self) -> Option<u32> {
        let id = self.next?;
        self.next = id.checked_add(1);
        Some(id)
    }
}

impl<F> IdGenerator for F
where
    F: FnMut() -> Option<u32> + Send,
{
    fn next_id(&mut self) -> Option<u32> {
        self()
    }
}
