//! Remote accessor trait: one backend round trip per call.

use std::sync::Arc;

use async_trait::async_trait;
use coachdesk_core::{
    DeskResult, EntityKey, FieldError, FieldErrorCode, SearchPage, SearchQuery, Session,
};

use crate::entity::StoreEntity;

/// The search request type of an entity family.
pub type EntityQuery<E> =
    SearchQuery<<E as StoreEntity>::Filters, <E as StoreEntity>::SortField>;

/// Typed access to the hosted backend for one entity family.
///
/// Implementations validate payloads and identifiers before issuing a call,
/// issue exactly one round trip per invocation and never retry. Every
/// failure comes back as a `DeskError`; credentials are read from the
/// session passed to each call.
#[async_trait]
pub trait RemoteAccessor<E: StoreEntity>: Send + Sync + 'static {
    async fn fetch_by_id(&self, session: &Session, id: &E::Id) -> DeskResult<E>;

    async fn search(&self, session: &Session, query: &EntityQuery<E>)
        -> DeskResult<SearchPage<E>>;

    async fn create(&self, session: &Session, draft: &E::Draft) -> DeskResult<E>;

    /// Apply a patch, returning the full record as stored by the backend.
    async fn update(&self, session: &Session, id: &E::Id, patch: &E::Patch) -> DeskResult<E>;

    async fn delete(&self, session: &Session, id: &E::Id) -> DeskResult<()>;
}

#[async_trait]
impl<E, A> RemoteAccessor<E> for Arc<A>
where
    E: StoreEntity,
    A: RemoteAccessor<E> + ?Sized,
{
    async fn fetch_by_id(&self, session: &Session, id: &E::Id) -> DeskResult<E> {
        (**self).fetch_by_id(session, id).await
    }

    async fn search(
        &self,
        session: &Session,
        query: &EntityQuery<E>,
    ) -> DeskResult<SearchPage<E>> {
        (**self).search(session, query).await
    }

    async fn create(&self, session: &Session, draft: &E::Draft) -> DeskResult<E> {
        (**self).create(session, draft).await
    }

    async fn update(&self, session: &Session, id: &E::Id, patch: &E::Patch) -> DeskResult<E> {
        (**self).update(session, id, patch).await
    }

    async fn delete(&self, session: &Session, id: &E::Id) -> DeskResult<()> {
        (**self).delete(session, id).await
    }
}

/// Reject empty identifiers before any call is issued.
pub fn require_id<K: EntityKey>(id: &K) -> DeskResult<()> {
    if id.is_blank() {
        return Err(FieldError::new("id", FieldErrorCode::Required, "is required").into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use coachdesk_core::CenterId;

    #[test]
    fn test_require_id() {
        assert!(require_id(&CenterId::from("center-1")).is_ok());
        let err = require_id(&CenterId::from(" ")).unwrap_err();
        assert_eq!(err.field_errors()[0].field, "id");
    }
}
