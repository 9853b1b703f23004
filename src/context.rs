//! Typed, immutable request context.
//!
//! One `RequestContext` value flows through a single call. Derivation
//! (`with_*`) produces a child scope that shadows attributes without touching
//! the scope it came from, so arbitrary concurrent readers of the same scope
//! need no synchronization at all. There is no ambient or task-local context;
//! the value rides in request extensions and function arguments.

use std::sync::Arc;

/// Who is acting behind a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// An end user.
    Human,
    /// Another workload calling on its own behalf.
    Service,
    /// Internal automation (schedulers, migrations).
    System,
}

impl ActorType {
    /// Wire form of the actor type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Service => "service",
            Self::System => "system",
        }
    }

    /// Parses a wire form, defaulting to [`ActorType::Human`] for anything
    /// unrecognized or empty.
    pub fn parse_or_default(value: &str) -> Self {
        match value {
            "service" => Self::Service,
            "system" => Self::System,
            _ => Self::Human,
        }
    }
}

/// Which transport admitted the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    /// HTTP listener.
    Http,
    /// RPC listener.
    Rpc,
    /// Message-bus consumer.
    Consumer,
    /// Scheduled job.
    Cron,
}

impl EntryPoint {
    /// Wire form of the entry point.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Rpc => "rpc",
            Self::Consumer => "consumer",
            Self::Cron => "cron",
        }
    }
}

/// Sentinel returned by [`RequestContext::trace_id`] before correlation ran.
pub const UNTRIAGED: &str = "untriaged";

/// Immutable attribute bag for a single request scope.
///
/// Attributes are write-once per scope: every `with_*` call returns a new
/// derived scope and leaves the receiver's siblings untouched. Cloning is
/// cheap; string attributes are shared `Arc<str>`.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    trace_id: Option<Arc<str>>,
    request_id: Option<Arc<str>>,
    principal_id: Option<Arc<str>>,
    session_id: Option<Arc<str>>,
    actor_type: Option<ActorType>,
    org_id: Option<Arc<str>>,
    entry_point: Option<EntryPoint>,
    auth_method: Option<Arc<str>>,
    email: Option<Arc<str>>,
    source_service: Option<Arc<str>>,
    idempotency_key: Option<Arc<str>>,
    retry_attempt: u32,
    roles: Option<Arc<[String]>>,
}

impl RequestContext {
    /// An empty root scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Correlation id for the whole call chain; `"untriaged"` when unset.
    pub fn trace_id(&self) -> &str {
        self.trace_id.as_deref().unwrap_or(UNTRIAGED)
    }

    /// Identifier of this hop; empty when unset.
    pub fn request_id(&self) -> &str {
        self.request_id.as_deref().unwrap_or("")
    }

    /// Authenticated principal; empty when the request is anonymous.
    pub fn principal_id(&self) -> &str {
        self.principal_id.as_deref().unwrap_or("")
    }

    /// Login session identifier; empty when unset.
    pub fn session_id(&self) -> &str {
        self.session_id.as_deref().unwrap_or("")
    }

    /// Actor classification; defaults to [`ActorType::Human`].
    pub fn actor_type(&self) -> ActorType {
        self.actor_type.unwrap_or(ActorType::Human)
    }

    /// Tenant identifier; empty when unset.
    pub fn org_id(&self) -> &str {
        self.org_id.as_deref().unwrap_or("")
    }

    /// The transport that admitted this request, if recorded.
    pub fn entry_point(&self) -> Option<EntryPoint> {
        self.entry_point
    }

    /// How the principal was authenticated; empty when unset.
    pub fn auth_method(&self) -> &str {
        self.auth_method.as_deref().unwrap_or("")
    }

    /// Principal email; empty when unset.
    pub fn email(&self) -> &str {
        self.email.as_deref().unwrap_or("")
    }

    /// The upstream service that originated the call; empty when unset.
    pub fn source_service(&self) -> &str {
        self.source_service.as_deref().unwrap_or("")
    }

    /// Client-supplied idempotency key; empty when unset.
    pub fn idempotency_key(&self) -> &str {
        self.idempotency_key.as_deref().unwrap_or("")
    }

    /// Delivery attempt for bus-driven work; `0` for first delivery.
    pub fn retry_attempt(&self) -> u32 {
        self.retry_attempt
    }

    /// Roles granted to the principal; empty when unset.
    pub fn roles(&self) -> &[String] {
        self.roles.as_deref().unwrap_or(&[])
    }

    /// Derives a scope with the trace id set.
    pub fn with_trace_id(mut self, value: impl Into<Arc<str>>) -> Self {
        self.trace_id = Some(value.into());
        self
    }

    /// Derives a scope with the request id set.
    pub fn with_request_id(mut self, value: impl Into<Arc<str>>) -> Self {
        self.request_id = Some(value.into());
        self
    }

    /// Derives a scope with the principal set.
    pub fn with_principal_id(mut self, value: impl Into<Arc<str>>) -> Self {
        self.principal_id = Some(value.into());
        self
    }

    /// Derives a scope with the session id set.
    pub fn with_session_id(mut self, value: impl Into<Arc<str>>) -> Self {
        self.session_id = Some(value.into());
        self
    }

    /// Derives a scope with the actor type set.
    pub fn with_actor_type(mut self, value: ActorType) -> Self {
        self.actor_type = Some(value);
        self
    }

    /// Derives a scope with the tenant set.
    pub fn with_org_id(mut self, value: impl Into<Arc<str>>) -> Self {
        self.org_id = Some(value.into());
        self
    }

    /// Derives a scope with the entry point set.
    pub fn with_entry_point(mut self, value: EntryPoint) -> Self {
        self.entry_point = Some(value);
        self
    }

    /// Derives a scope with the auth method set.
    pub fn with_auth_method(mut self, value: impl Into<Arc<str>>) -> Self {
        self.auth_method = Some(value.into());
        self
    }

    /// Derives a scope with the principal email set.
    pub fn with_email(mut self, value: impl Into<Arc<str>>) -> Self {
        self.email = Some(value.into());
        self
    }

    /// Derives a scope with the source service set.
    pub fn with_source_service(mut self, value: impl Into<Arc<str>>) -> Self {
        self.source_service = Some(value.into());
        self
    }

    /// Derives a scope with the idempotency key set.
    pub fn with_idempotency_key(mut self, value: impl Into<Arc<str>>) -> Self {
        self.idempotency_key = Some(value.into());
        self
    }

    /// Derives a scope with the delivery attempt set.
    pub fn with_retry_attempt(mut self, value: u32) -> Self {
        self.retry_attempt = value;
        self
    }

    /// Derives a scope with the role set replaced.
    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = Some(roles.into());
        self
    }

    /// Hydrates the full identity in one derivation, the way authentication
    /// strategies do after verification succeeds.
    pub fn with_identity(
        self,
        principal_id: impl Into<Arc<str>>,
        org_id: impl Into<Arc<str>>,
        email: impl Into<Arc<str>>,
        actor_type: ActorType,
        roles: Vec<String>,
    ) -> Self {
        self.with_principal_id(principal_id)
            .with_org_id(org_id)
            .with_email(email)
            .with_actor_type(actor_type)
            .with_roles(roles)
    }
}
