//! In-process backend.
//!
//! A complete stand-in for the hosted backend: it validates payloads, checks
//! ownership, computes server-side fields, filters, sorts and paginates. It
//! also counts calls per operation, can fail the next call of an operation,
//! delay calls and hold every call behind a gate, which is how the store's
//! concurrency guarantees are exercised.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use coachdesk_core::entities::DEFAULT_COUNTRY;
use coachdesk_core::{
    Address, CenterStatus, CoachingBranch, CoachingCenter, Comment, DeskError, DeskResult,
    EntityKey, SearchPage, Session, Timestamp, UserId, Validate,
};
use tokio::sync::watch;
use tracing::debug;

use crate::accessor::{require_id, EntityQuery, RemoteAccessor};
use crate::entity::StoreEntity;

/// Backend-side behaviour of an entity family.
pub trait ServerRecord: StoreEntity {
    /// Whether anonymous sessions may read this family.
    const PUBLIC_READ: bool;

    /// Build the stored record for a validated draft.
    fn from_draft(id: Self::Id, draft: &Self::Draft, owner: &UserId, now: Timestamp) -> Self;

    /// The user allowed to change this record, if ownership applies.
    fn owner(&self) -> Option<&UserId>;

    /// Stamp a server-side modification.
    fn touch(&mut self, now: Timestamp);
}

impl ServerRecord for CoachingCenter {
    const PUBLIC_READ: bool = true;

    fn from_draft(id: Self::Id, draft: &Self::Draft, owner: &UserId, now: Timestamp) -> Self {
        Self {
            id,
            owner_id: owner.clone(),
            name: draft.name.trim().to_string(),
            description: draft.description.clone(),
            category: draft.category,
            subjects: draft.subjects.clone(),
            established_year: draft.established_year,
            contact_email: draft.contact_email.clone(),
            contact_phone: draft.contact_phone.clone(),
            website_url: draft.website_url.clone(),
            logo_url: draft.logo_url.clone(),
            status: CenterStatus::default(),
            is_verified: false,
            rating_average: 0.0,
            review_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn owner(&self) -> Option<&UserId> {
        Some(&self.owner_id)
    }

    fn touch(&mut self, now: Timestamp) {
        self.updated_at = now;
    }
}

impl ServerRecord for CoachingBranch {
    const PUBLIC_READ: bool = true;

    fn from_draft(id: Self::Id, draft: &Self::Draft, _owner: &UserId, now: Timestamp) -> Self {
        Self {
            id,
            center_id: draft.center_id.clone(),
            name: draft.name.trim().to_string(),
            address_id: draft.address_id.clone(),
            contact_phone: draft.contact_phone.clone(),
            contact_email: draft.contact_email.clone(),
            is_main_branch: draft.is_main_branch,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn owner(&self) -> Option<&UserId> {
        None
    }

    fn touch(&mut self, now: Timestamp) {
        self.updated_at = now;
    }
}

impl ServerRecord for Address {
    const PUBLIC_READ: bool = false;

    fn from_draft(id: Self::Id, draft: &Self::Draft, owner: &UserId, now: Timestamp) -> Self {
        // Branch addresses belong to the branch, not to the user filing them.
        let user_id = match draft.branch_id {
            Some(_) => None,
            None => Some(owner.clone()),
        };
        Self {
            id,
            user_id,
            branch_id: draft.branch_id.clone(),
            address_type: draft.address_type,
            label: draft.label.clone(),
            address_line_1: draft.address_line_1.clone(),
            address_line_2: draft.address_line_2.clone(),
            city: draft.city.clone(),
            district: draft.district.trim().to_string(),
            state: draft.state.trim().to_string(),
            country: draft
                .country
                .clone()
                .unwrap_or_else(|| DEFAULT_COUNTRY.to_string()),
            pin_code: draft.pin_code.trim().to_string(),
            latitude: draft.latitude,
            longitude: draft.longitude,
            is_primary: draft.is_primary,
            created_at: now,
            updated_at: now,
        }
    }

    fn owner(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    fn touch(&mut self, now: Timestamp) {
        self.updated_at = now;
    }
}

impl ServerRecord for Comment {
    const PUBLIC_READ: bool = true;

    fn from_draft(id: Self::Id, draft: &Self::Draft, owner: &UserId, now: Timestamp) -> Self {
        Self {
            id,
            post_id: draft.post_id.clone(),
            author_id: owner.clone(),
            parent_id: draft.parent_id.clone(),
            content: draft.content.trim().to_string(),
            like_count: 0,
            is_edited: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn owner(&self) -> Option<&UserId> {
        Some(&self.author_id)
    }

    fn touch(&mut self, now: Timestamp) {
        self.updated_at = now;
    }
}

/// Backend operations, used to address counters and injected behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Fetch,
    Search,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Default)]
struct CallCounts {
    fetch: AtomicUsize,
    search: AtomicUsize,
    create: AtomicUsize,
    update: AtomicUsize,
    delete: AtomicUsize,
}

impl CallCounts {
    fn counter(&self, op: Operation) -> &AtomicUsize {
        match op {
            Operation::Fetch => &self.fetch,
            Operation::Search => &self.search,
            Operation::Create => &self.create,
            Operation::Update => &self.update,
            Operation::Delete => &self.delete,
        }
    }
}

/// In-memory backend for one entity family.
pub struct InMemoryBackend<E: ServerRecord> {
    records: RwLock<HashMap<E::Id, E>>,
    calls: CallCounts,
    failures: Mutex<HashMap<Operation, VecDeque<DeskError>>>,
    delays: Mutex<HashMap<Operation, VecDeque<Duration>>>,
    gate: watch::Sender<bool>,
}

impl<E: ServerRecord> Default for InMemoryBackend<E> {
    fn default() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            records: RwLock::new(HashMap::new()),
            calls: CallCounts::default(),
            failures: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            gate,
        }
    }
}

impl<E: ServerRecord> InMemoryBackend<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend pre-populated with records.
    pub fn with_records(records: impl IntoIterator<Item = E>) -> Self {
        let backend = Self::new();
        backend.seed(records);
        backend
    }

    /// Insert or replace records without counting a call.
    pub fn seed(&self, records: impl IntoIterator<Item = E>) {
        let mut map = self.records.write().unwrap_or_else(|e| e.into_inner());
        for record in records {
            map.insert(record.id().clone(), record);
        }
    }

    /// Current stored copy of a record.
    pub fn record(&self, id: &E::Id) -> Option<E> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of calls issued for an operation.
    pub fn calls(&self, op: Operation) -> usize {
        self.calls.counter(op).load(Ordering::SeqCst)
    }

    /// Make the next call of `op` fail with `error`.
    pub fn fail_next(&self, op: Operation, error: DeskError) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Delay the next call of `op` before it is answered.
    pub fn delay_next(&self, op: Operation, delay: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(op)
            .or_default()
            .push_back(delay);
    }

    /// Hold every call until `open_gate` is called. Calls are counted on entry.
    pub fn close_gate(&self) {
        self.gate.send_replace(false);
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    /// Count the call, then wait for the gate and any injected delay.
    async fn enter(&self, op: Operation) -> DeskResult<()> {
        self.calls.counter(op).fetch_add(1, Ordering::SeqCst);
        debug!(entity = %E::ENTITY_TYPE, ?op, "backend call");

        let mut gate = self.gate.subscribe();
        // The sender lives as long as self, so the wait cannot fail.
        let _ = gate.wait_for(|open| *open).await;

        let delay = self
            .delays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&op)
            .and_then(|q| q.pop_front());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = self
            .failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(&op)
            .and_then(|q| q.pop_front());
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn visible_to(record: &E, session: &Session) -> bool {
        if E::PUBLIC_READ {
            return true;
        }
        match record.owner() {
            Some(owner) => session.can_act_for(owner),
            None => session.is_authenticated(),
        }
    }

    fn require_session(session: &Session) -> DeskResult<UserId> {
        session.user_id().cloned().ok_or(DeskError::NotAuthenticated)
    }

    fn check_owner(record: &E, session: &Session, action: &str) -> DeskResult<()> {
        match record.owner() {
            Some(owner) if !session.can_act_for(owner) => {
                Err(DeskError::permission_denied(E::ENTITY_TYPE, action))
            }
            _ => Ok(()),
        }
    }

    /// Apply sibling rules after `saved` was written.
    fn reconcile(map: &mut HashMap<E::Id, E>, saved: &E, now: Timestamp) {
        for record in map.values_mut() {
            if let Some(mut adjusted) = E::reconcile_sibling(saved, record) {
                adjusted.touch(now);
                *record = adjusted;
            }
        }
    }
}

#[async_trait]
impl<E: ServerRecord> RemoteAccessor<E> for InMemoryBackend<E> {
    async fn fetch_by_id(&self, session: &Session, id: &E::Id) -> DeskResult<E> {
        require_id(id)?;
        self.enter(Operation::Fetch).await?;
        if !E::PUBLIC_READ && !session.is_authenticated() {
            return Err(DeskError::NotAuthenticated);
        }
        let map = self.records.read().unwrap_or_else(|e| e.into_inner());
        map.get(id)
            .filter(|record| Self::visible_to(record, session))
            .cloned()
            .ok_or_else(|| DeskError::not_found(E::ENTITY_TYPE, id))
    }

    async fn search(
        &self,
        session: &Session,
        query: &EntityQuery<E>,
    ) -> DeskResult<SearchPage<E>> {
        query.validate(u32::MAX)?;
        self.enter(Operation::Search).await?;
        if !E::PUBLIC_READ && !session.is_authenticated() {
            return Err(DeskError::NotAuthenticated);
        }

        let mut matched: Vec<E> = {
            let map = self.records.read().unwrap_or_else(|e| e.into_inner());
            map.values()
                .filter(|r| Self::visible_to(r, session) && r.matches(&query.filters))
                .cloned()
                .collect()
        };
        let sort = query.sort;
        matched.sort_by(|a, b| {
            sort.direction
                .apply(a.compare(b, sort.field, &query.filters))
                .then_with(|| a.id().cmp(b.id()))
        });

        let total_count = matched.len() as u64;
        let items = matched
            .into_iter()
            .skip(query.offset())
            .take(query.per_page as usize)
            .collect();
        Ok(SearchPage::new(items, total_count))
    }

    async fn create(&self, session: &Session, draft: &E::Draft) -> DeskResult<E> {
        draft.validate()?;
        self.enter(Operation::Create).await?;
        let owner = Self::require_session(session)?;

        let now = Utc::now();
        let record = E::from_draft(E::Id::mint(), draft, &owner, now);
        let mut map = self.records.write().unwrap_or_else(|e| e.into_inner());
        Self::reconcile(&mut map, &record, now);
        map.insert(record.id().clone(), record.clone());
        Ok(record)
    }

    async fn update(&self, session: &Session, id: &E::Id, patch: &E::Patch) -> DeskResult<E> {
        require_id(id)?;
        patch.validate()?;
        self.enter(Operation::Update).await?;
        Self::require_session(session)?;

        let now = Utc::now();
        let mut map = self.records.write().unwrap_or_else(|e| e.into_inner());
        let mut record = map
            .get(id)
            .filter(|r| Self::visible_to(r, session))
            .cloned()
            .ok_or_else(|| DeskError::not_found(E::ENTITY_TYPE, id))?;
        Self::check_owner(&record, session, "update")?;

        record.apply_patch(patch);
        record.touch(now);
        Self::reconcile(&mut map, &record, now);
        map.insert(id.clone(), record.clone());
        Ok(record)
    }

    async fn delete(&self, session: &Session, id: &E::Id) -> DeskResult<()> {
        require_id(id)?;
        self.enter(Operation::Delete).await?;
        Self::require_session(session)?;

        let mut map = self.records.write().unwrap_or_else(|e| e.into_inner());
        let record = map
            .get(id)
            .filter(|r| Self::visible_to(r, session))
            .ok_or_else(|| DeskError::not_found(E::ENTITY_TYPE, id))?;
        Self::check_owner(record, session, "delete")?;
        map.remove(id);
        Ok(())
    }
}
