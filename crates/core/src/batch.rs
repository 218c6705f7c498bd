use crate::types::IdentityId;

/// An ordered, size-bounded slice of identities polled with one source call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Zero-based position of this batch within its cycle.
    pub index: usize,
    /// Identities in input order.
    pub identities: Vec<IdentityId>,
}

impl Batch {
    #[must_use]
    pub fn new(index: usize, identities: Vec<IdentityId>) -> Self {
        Self { index, identities }
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}
