//! Document store capability used by [`Connection`](crate::connection::Connection).

use async_trait::async_trait;

use crate::error::StoreError;

/// Async persistence for documents keyed by id.
///
/// Failures are returned as [`StoreError`] and surface unchanged to the
/// caller of the connection; nothing in this crate retries.
#[async_trait]
pub trait DocStore {
    /// Document snapshot type.
    type Doc: Send + Sync;

    /// Load `doc_id`, or `None` when the store has never seen it.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the backend cannot be read.
    async fn get_doc(&self, doc_id: &str) -> Result<Option<Self::Doc>, StoreError>;

    /// Persist `doc` under `doc_id` and return the persisted snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the write fails.
    async fn set_doc(&self, doc_id: &str, doc: Self::Doc) -> Result<Self::Doc, StoreError>;
}

#[async_trait]
impl<S: DocStore + Sync + ?Sized> DocStore for &S {
    type Doc = S::Doc;

    async fn get_doc(&self, doc_id: &str) -> Result<Option<Self::Doc>, StoreError> {
        (**self).get_doc(doc_id).await
    }

    async fn set_doc(&self, doc_id: &str, doc: Self::Doc) -> Result<Self::Doc, StoreError> {
        (**self).set_doc(doc_id, doc).await
    }
}
