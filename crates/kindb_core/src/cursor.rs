//! Record cursors.

use crate::error::CoreResult;
use crate::handle::Handle;
use crate::kv::KvCursor;
use crate::model::Record;
use crate::schema::decode_handle_key;
use crate::types::ObjectClass;

/// Single-pass scan over the committed records of one class, in handle
/// order.
///
/// Each item is decoded on its own, so a corrupt payload surfaces as one
/// `Err` item and the scan can continue past it. While the cursor is open,
/// committing changes to its class fails with
/// [`crate::CoreError::CursorConflict`].
#[derive(Debug)]
pub struct RecordCursor<'db> {
    class: ObjectClass,
    inner: KvCursor<'db>,
}

impl<'db> RecordCursor<'db> {
    pub(crate) fn new(class: ObjectClass, inner: KvCursor<'db>) -> Self {
        Self { class, inner }
    }

    /// The class being scanned.
    #[must_use]
    pub fn class(&self) -> ObjectClass {
        self.class
    }

    /// Rewinds and returns the first record.
    pub fn first(&mut self) -> Option<CoreResult<(Handle, Record)>> {
        let entry = self.inner.first()?;
        Some(self.decode(entry))
    }

    /// Releases the cursor. Dropping it has the same effect.
    pub fn close(self) {
        self.inner.close();
    }

    fn decode(&self, (key, payload): (Vec<u8>, Vec<u8>)) -> CoreResult<(Handle, Record)> {
        let handle = decode_handle_key(&key)?;
        let record = Record::decode(self.class, &payload)?;
        Ok((handle, record))
    }
}

impl Iterator for RecordCursor<'_> {
    type Item = CoreResult<(Handle, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.inner.next()?;
        Some(self.decode(entry))
    }
}
