//! Remote accessor for the hosted REST backend.
//!
//! Tables are served under `{base_url}/rest/v1/{table}` with PostgREST
//! conventions: filters are `column=op.value` query parameters, pages are
//! requested with a `Range` header and the total count comes back in
//! `Content-Range`. Orderings the backend cannot compute (distance from a
//! point) and the `near` filter are applied after the rows arrive.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use coachdesk_core::{
    Address, AddressFilters, BackendConfig, BranchFilters, CenterFilters, CoachingBranch,
    CoachingCenter, Comment, CommentFilters, DeskError, DeskResult, EntityKey, EntityType,
    FieldError, FieldErrorCode, SearchPage, Session, SortField, Validate,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::accessor::{require_id, EntityQuery, RemoteAccessor};
use crate::entity::StoreEntity;
use crate::service::Accessors;

const PREFER: &str = "prefer";
const RANGE_UNIT: &str = "range-unit";

/// How an entity family is addressed on the REST backend.
pub trait RestResource: StoreEntity {
    /// Query parameters the backend can evaluate for these filters.
    fn filter_params(filters: &Self::Filters) -> Vec<(String, String)>;

    /// True when some filter can only be evaluated after the rows arrive.
    fn filters_locally(_filters: &Self::Filters) -> bool {
        false
    }

    /// JSON body of an insert. Ownership columns come from the session.
    fn insert_body(draft: &Self::Draft, user: &coachdesk_core::UserId) -> DeskResult<Value>;
}

fn eq(column: &str, value: impl std::fmt::Display) -> (String, String) {
    (column.to_string(), format!("eq.{}", value))
}

fn ilike(column: &str, pattern: &str) -> (String, String) {
    (column.to_string(), format!("ilike.{}", pattern.trim()))
}

fn contains(column: &str, needle: &str) -> (String, String) {
    ilike(column, &format!("*{}*", needle.trim()))
}

fn to_body<T: serde::Serialize>(value: &T) -> DeskResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| DeskError::unknown(format!("could not encode request body: {}", e)))
}

fn with_field(mut body: Value, field: &str, value: &impl EntityKey) -> Value {
    if let Value::Object(map) = &mut body {
        map.insert(field.to_string(), Value::String(value.as_str().to_string()));
    }
    body
}

impl RestResource for CoachingCenter {
    fn filter_params(filters: &CenterFilters) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(search) = &filters.search {
            params.push(contains("name", search));
        }
        if let Some(category) = filters.category {
            params.push(eq("category", category));
        }
        if let Some(status) = filters.status {
            params.push(eq("status", status));
        }
        if let Some(owner) = &filters.owner_id {
            params.push(eq("owner_id", owner));
        }
        if let Some(subject) = &filters.subject {
            params.push(("subjects".to_string(), format!("cs.{{\"{}\"}}", subject.trim())));
        }
        if let Some(verified) = filters.is_verified {
            params.push(eq("is_verified", verified));
        }
        if let Some(min) = filters.min_rating {
            params.push(("rating_average".to_string(), format!("gte.{}", min)));
        }
        params
    }

    fn insert_body(draft: &Self::Draft, user: &coachdesk_core::UserId) -> DeskResult<Value> {
        Ok(with_field(to_body(draft)?, "owner_id", user))
    }
}

impl RestResource for CoachingBranch {
    fn filter_params(filters: &BranchFilters) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(center) = &filters.center_id {
            params.push(eq("center_id", center));
        }
        if let Some(search) = &filters.search {
            params.push(contains("name", search));
        }
        if let Some(active) = filters.is_active {
            params.push(eq("is_active", active));
        }
        if let Some(main) = filters.is_main_branch {
            params.push(eq("is_main_branch", main));
        }
        params
    }

    fn insert_body(draft: &Self::Draft, _user: &coachdesk_core::UserId) -> DeskResult<Value> {
        to_body(draft)
    }
}

impl RestResource for Address {
    fn filter_params(filters: &AddressFilters) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(user) = &filters.user_id {
            params.push(eq("user_id", user));
        }
        if let Some(branch) = &filters.branch_id {
            params.push(eq("branch_id", branch));
        }
        if let Some(kind) = filters.address_type {
            params.push(eq("address_type", kind));
        }
        if let Some(state) = &filters.state {
            params.push(ilike("state", state));
        }
        if let Some(district) = &filters.district {
            params.push(ilike("district", district));
        }
        if let Some(pin) = &filters.pin_code {
            params.push(eq("pin_code", pin.trim()));
        }
        if let Some(primary) = filters.is_primary {
            params.push(eq("is_primary", primary));
        }
        if filters.near.is_some() {
            params.push(("latitude".to_string(), "not.is.null".to_string()));
            params.push(("longitude".to_string(), "not.is.null".to_string()));
        }
        params
    }

    fn filters_locally(filters: &AddressFilters) -> bool {
        filters.near.is_some()
    }

    fn insert_body(draft: &Self::Draft, user: &coachdesk_core::UserId) -> DeskResult<Value> {
        let body = to_body(draft)?;
        Ok(match draft.branch_id {
            Some(_) => body,
            None => with_field(body, "user_id", user),
        })
    }
}

impl RestResource for Comment {
    fn filter_params(filters: &CommentFilters) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(post) = &filters.post_id {
            params.push(eq("post_id", post));
        }
        if let Some(author) = &filters.author_id {
            params.push(eq("author_id", author));
        }
        if let Some(parent) = &filters.parent_id {
            params.push(eq("parent_id", parent));
        } else if filters.top_level_only {
            params.push(("parent_id".to_string(), "is.null".to_string()));
        }
        params
    }

    fn insert_body(draft: &Self::Draft, user: &coachdesk_core::UserId) -> DeskResult<Value> {
        Ok(with_field(to_body(draft)?, "author_id", user))
    }
}

// ============================================================================
// CLIENT
// ============================================================================

/// HTTP client and connection settings shared by every table accessor.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    config: Arc<BackendConfig>,
}

impl RestClient {
    /// # Errors
    /// `DeskError::Config` when the configuration is invalid.
    pub fn new(config: BackendConfig) -> DeskResult<Self> {
        config.validate()?;
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| DeskError::backend(format!("could not build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn auth_headers(&self, session: &Session) -> DeskResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("apikey"), header_value(&self.config.api_key)?);
        // Anonymous requests authenticate with the public key itself.
        let bearer = match session.access_token() {
            Some(token) if session.is_authenticated() => token.expose().to_string(),
            _ => self.config.api_key.clone(),
        };
        headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", bearer))?);
        Ok(headers)
    }

    fn table<E: StoreEntity>(&self, session: &Session, method: reqwest::Method) -> DeskResult<RequestBuilder> {
        Ok(self
            .http
            .request(method, self.config.table_url(E::TABLE))
            .headers(self.auth_headers(session)?))
    }

    /// One accessor per entity family, sharing this client.
    pub fn accessors(&self) -> Accessors {
        Accessors {
            centers: Arc::new(RestAccessor::<CoachingCenter>::new(self.clone())),
            branches: Arc::new(RestAccessor::<CoachingBranch>::new(self.clone())),
            addresses: Arc::new(RestAccessor::<Address>::new(self.clone())),
            comments: Arc::new(RestAccessor::<Comment>::new(self.clone())),
        }
    }
}

fn header_value(value: &str) -> DeskResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| {
        DeskError::from(coachdesk_core::ConfigError::InvalidValue {
            field: "api_key".to_string(),
            value: "[REDACTED]".to_string(),
            reason: "not a valid header value".to_string(),
        })
    })
}

/// Accessor for one table.
pub struct RestAccessor<E> {
    client: RestClient,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for RestAccessor<E> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: RestResource> RestAccessor<E> {
    pub fn new(client: RestClient) -> Self {
        Self {
            client,
            _entity: PhantomData,
        }
    }

    async fn send(&self, request: RequestBuilder) -> DeskResult<Response> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let error = map_status(E::ENTITY_TYPE, status, &body);
        warn!(entity = %E::ENTITY_TYPE, status = status.as_u16(), %error, "backend rejected request");
        Err(error)
    }

    async fn rows(&self, response: Response) -> DeskResult<Vec<E>> {
        response
            .json::<Vec<E>>()
            .await
            .map_err(|e| DeskError::backend(format!("malformed {} rows: {}", E::ENTITY_TYPE, e)))
    }

    /// The single row a keyed request returned, or `NotFound`.
    async fn single(&self, response: Response, id: &E::Id) -> DeskResult<E> {
        self.rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DeskError::not_found(E::ENTITY_TYPE, id))
    }

    fn by_id(id: &E::Id) -> [(String, String); 1] {
        [eq("id", id.as_str())]
    }
}

fn transport_error(error: reqwest::Error) -> DeskError {
    if error.is_timeout() {
        DeskError::backend("request timed out")
    } else {
        DeskError::backend(format!("transport failure: {}", error))
    }
}

#[async_trait]
impl<E: RestResource> RemoteAccessor<E> for RestAccessor<E> {
    async fn fetch_by_id(&self, session: &Session, id: &E::Id) -> DeskResult<E> {
        require_id(id)?;
        let request = self
            .client
            .table::<E>(session, reqwest::Method::GET)?
            .query(&Self::by_id(id))
            .query(&[("select", "*")]);
        let response = self.send(request).await?;
        self.single(response, id).await
    }

    async fn search(
        &self,
        session: &Session,
        query: &EntityQuery<E>,
    ) -> DeskResult<SearchPage<E>> {
        query.validate(u32::MAX)?;
        let column = query.sort.field.column();
        let local = column.is_none() || E::filters_locally(&query.filters);

        let mut request = self
            .client
            .table::<E>(session, reqwest::Method::GET)?
            .query(&[("select", "*")])
            .query(&E::filter_params(&query.filters));
        if let Some(column) = column {
            let order = format!("{}.{},id.asc", column, query.sort.direction.as_str());
            request = request.query(&[("order", order)]);
        }
        if !local {
            let first = query.offset();
            let last = first + query.per_page as usize - 1;
            request = request
                .header(RANGE_UNIT, "items")
                .header(reqwest::header::RANGE, format!("{}-{}", first, last))
                .header(PREFER, "count=exact");
        }

        let response = self.send(request).await?;
        let total = response
            .headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range);
        let rows = self.rows(response).await?;

        if local {
            debug!(entity = %E::ENTITY_TYPE, rows = rows.len(), "paginating locally");
            return Ok(paginate_locally(rows, query));
        }
        let total_count = total.unwrap_or(query.offset() as u64 + rows.len() as u64);
        Ok(SearchPage::new(rows, total_count))
    }

    async fn create(&self, session: &Session, draft: &E::Draft) -> DeskResult<E> {
        draft.validate()?;
        let user = session
            .user_id()
            .filter(|_| session.is_authenticated())
            .ok_or(DeskError::NotAuthenticated)?;
        let body = E::insert_body(draft, user)?;
        let request = self
            .client
            .table::<E>(session, reqwest::Method::POST)?
            .header(PREFER, "return=representation")
            .json(&body);
        let response = self.send(request).await?;
        self.rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DeskError::backend(format!("{} insert returned no row", E::ENTITY_TYPE)))
    }

    async fn update(&self, session: &Session, id: &E::Id, patch: &E::Patch) -> DeskResult<E> {
        require_id(id)?;
        patch.validate()?;
        let request = self
            .client
            .table::<E>(session, reqwest::Method::PATCH)?
            .query(&Self::by_id(id))
            .header(PREFER, "return=representation")
            .json(patch);
        let response = self.send(request).await?;
        self.single(response, id).await
    }

    async fn delete(&self, session: &Session, id: &E::Id) -> DeskResult<()> {
        require_id(id)?;
        let request = self
            .client
            .table::<E>(session, reqwest::Method::DELETE)?
            .query(&Self::by_id(id))
            .header(PREFER, "return=representation");
        let response = self.send(request).await?;
        self.single(response, id).await.map(|_| ())
    }
}

/// Filter, sort and cut a page out of rows the backend could not fully
/// process.
pub fn paginate_locally<E: StoreEntity>(rows: Vec<E>, query: &EntityQuery<E>) -> SearchPage<E> {
    let mut matched: Vec<E> = rows
        .into_iter()
        .filter(|row| row.matches(&query.filters))
        .collect();
    let sort = query.sort;
    matched.sort_by(|a, b| {
        sort.direction
            .apply(a.compare(b, sort.field, &query.filters))
            .then_with(|| a.id().cmp(b.id()))
    });
    let total = matched.len() as u64;
    let items = matched
        .into_iter()
        .skip(query.offset())
        .take(query.per_page as usize)
        .collect();
    SearchPage::new(items, total)
}

/// Total row count from a `Content-Range` header such as `0-19/45` or `*/0`.
/// `None` when the total is unknown (`0-19/*`) or the header is malformed.
pub fn parse_content_range(header: &str) -> Option<u64> {
    let (range, total) = header.trim().split_once('/')?;
    if range != "*" {
        let (first, last) = range.split_once('-')?;
        first.parse::<u64>().ok()?;
        last.parse::<u64>().ok()?;
    }
    total.parse().ok()
}

#[derive(Debug, Default, Deserialize)]
struct BackendErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

/// Map a non-success response onto the error taxonomy.
pub fn map_status(entity_type: EntityType, status: StatusCode, body: &str) -> DeskError {
    let parsed: BackendErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .clone()
        .or_else(|| (!body.trim().is_empty()).then(|| body.trim().to_string()))
        .unwrap_or_else(|| status.to_string());
    let code = parsed.code.as_deref().unwrap_or_default();

    match status {
        StatusCode::UNAUTHORIZED => DeskError::NotAuthenticated,
        StatusCode::FORBIDDEN => DeskError::permission_denied(entity_type, "access"),
        StatusCode::NOT_FOUND | StatusCode::NOT_ACCEPTABLE if code != "42501" => {
            DeskError::not_found(entity_type, "requested record")
        }
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY
        | StatusCode::CONFLICT => match code {
            // row-level security refused the write
            "42501" => DeskError::permission_denied(entity_type, "write"),
            // check, not-null and unique violations name the offending column
            "23514" | "23502" | "23505" | "22P02" => {
                let field = parsed
                    .details
                    .as_deref()
                    .and_then(column_from_details)
                    .unwrap_or("record")
                    .to_string();
                let code = if code == "23502" {
                    FieldErrorCode::Required
                } else {
                    FieldErrorCode::InvalidFormat
                };
                FieldError::new(field, code, message).into()
            }
            _ => DeskError::backend(match parsed.hint {
                Some(hint) => format!("{} ({})", message, hint),
                None => message,
            }),
        },
        _ => DeskError::backend(format!("{}: {}", status, message)),
    }
}

/// The column named in a detail such as `Key (name)=(X) already exists.`
fn column_from_details(details: &str) -> Option<&str> {
    let start = details.find('(')? + 1;
    let end = start + details[start..].find(')')?;
    let column = details[start..end].trim();
    (!column.is_empty()).then_some(column)
}

/// Build REST-backed accessors for every entity family.
pub fn rest_accessors(config: BackendConfig) -> DeskResult<Accessors> {
    Ok(RestClient::new(config)?.accessors())
}
