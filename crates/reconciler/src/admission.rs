//! Admission hooks consulted before author writes reach the record store.

use converge_core::Result;
use tracing::trace;

use crate::record::Record;

/// Validates author writes to declared records.
pub trait Admission<R: Record>: Send + Sync {
    /// # Errors
    ///
    /// Returns the rejection reason.
    fn validate_create(&self, record: &R) -> Result<()>;

    /// # Errors
    ///
    /// Returns the rejection reason.
    fn validate_update(&self, old: &R, new: &R) -> Result<()>;

    /// # Errors
    ///
    /// Returns the rejection reason.
    fn validate_delete(&self, record: &R) -> Result<()>;
}

/// Accepts every write.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl<R: Record> Admission<R> for PassThrough {
    fn validate_create(&self, record: &R) -> Result<()> {
        trace!(kind = R::KIND, key = %record.metadata().key(), "Admitting create");
        Ok(())
    }

    fn validate_update(&self, _old: &R, new: &R) -> Result<()> {
        trace!(kind = R::KIND, key = %new.metadata().key(), "Admitting update");
        Ok(())
    }

    fn validate_delete(&self, record: &R) -> Result<()> {
        trace!(kind = R::KIND, key = %record.metadata().key(), "Admitting delete");
        Ok(())
    }
}
