//! [`TempEntry`] implementations for the core record types.

use crate::TempEntry;
use cling_core::entry::RevisionEntry;
use cling_core::marshal::{MarshalError, MarshalReader, MarshalWriter};

impl TempEntry for RevisionEntry {
    fn compare(a: &Self, b: &Self) -> std::cmp::Ordering {
        RevisionEntry::compare(a, b)
    }

    fn marshalled_size(&self) -> usize {
        RevisionEntry::marshalled_size(self)
    }

    fn marshal(&self, w: &mut MarshalWriter) {
        RevisionEntry::marshal(self, w);
    }

    fn unmarshal(r: &mut MarshalReader<'_>) -> Result<Self, MarshalError> {
        RevisionEntry::unmarshal(r)
    }
}
