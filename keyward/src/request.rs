use std::{
    collections::BTreeMap,
    ops::{Deref, DerefMut},
    sync::Arc,
};

use aliri::jwt;
use aliri_clock::UnixTime;
use uuid::Uuid;

use crate::{Arguments, Client, TokenType};

/// Form parameters of a request
///
/// A parameter may be supplied more than once; [`Form::get`] returns the
/// first value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Form(BTreeMap<String, Vec<String>>);

impl Form {
    /// An empty form
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The first value of `key`, if any
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    /// Every value of `key`
    pub fn get_all(&self, key: &str) -> impl Iterator<Item = &str> {
        self.0.get(key).into_iter().flatten().map(String::as_str)
    }

    /// Replaces all values of `key` with `value`
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), vec![value.into()]);
    }

    /// Appends a value to `key`
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_default().push(value.into());
    }

    /// Whether the form carries `key`
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// A copy holding only the listed keys
    #[must_use]
    pub fn retain_keys(&self, allowed: &[&str]) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(k, _)| allowed.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Form {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut form = Self::new();
        for (k, v) in iter {
            form.add(k, v);
        }
        form
    }
}

/// Session state carried along with a request
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
    subject: Option<jwt::Subject>,
    expires_at: BTreeMap<TokenType, UnixTime>,
}

impl Session {
    /// An empty session
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The resource owner this session acts on behalf of
    #[must_use]
    pub fn subject(&self) -> Option<&jwt::SubjectRef> {
        self.subject.as_deref()
    }

    /// Sets the subject
    pub fn set_subject(&mut self, subject: jwt::Subject) {
        self.subject = Some(subject);
    }

    /// The absolute expiry of a token type, if set
    #[must_use]
    pub fn expires_at(&self, token_type: TokenType) -> Option<UnixTime> {
        self.expires_at.get(&token_type).copied()
    }

    /// Sets the absolute expiry of a token type
    pub fn set_expires_at(&mut self, token_type: TokenType, at: UnixTime) {
        self.expires_at.insert(token_type, at);
    }
}

/// The parts common to authorize and token requests
#[derive(Clone, Debug)]
pub struct Request {
    id: Uuid,
    requested_at: UnixTime,
    client: Arc<Client>,
    requested_scopes: Arguments,
    granted_scopes: Arguments,
    requested_audience: Arguments,
    granted_audience: Arguments,
    form: Form,
    session: Session,
}

impl Request {
    /// Builds a request from its form parameters
    ///
    /// Requested scopes are read from the space-delimited `scope` parameter,
    /// and requested audiences from every `audience` parameter.
    pub fn new(client: Arc<Client>, form: Form, requested_at: UnixTime) -> Self {
        let requested_scopes = Arguments::from_space_delimited(form.get("scope").unwrap_or(""));
        let requested_audience = form
            .get_all("audience")
            .flat_map(str::split_whitespace)
            .collect();

        Self {
            id: Uuid::new_v4(),
            requested_at,
            client,
            requested_scopes,
            granted_scopes: Arguments::new(),
            requested_audience,
            granted_audience: Arguments::new(),
            form,
            session: Session::new(),
        }
    }

    /// The request identifier, shared by every token issued from one grant
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Replaces the request identifier
    pub fn set_id(&mut self, id: Uuid) {
        self.id = id;
    }

    /// When the request was received
    #[must_use]
    pub fn requested_at(&self) -> UnixTime {
        self.requested_at
    }

    /// The client making the request
    #[must_use]
    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// Scopes requested by the client
    #[must_use]
    pub fn requested_scopes(&self) -> &Arguments {
        &self.requested_scopes
    }

    /// Replaces the requested scopes
    pub fn set_requested_scopes(&mut self, scopes: Arguments) {
        self.requested_scopes = scopes;
    }

    /// Scopes granted so far
    #[must_use]
    pub fn granted_scopes(&self) -> &Arguments {
        &self.granted_scopes
    }

    /// Grants a scope
    pub fn grant_scope(&mut self, scope: impl Into<String>) {
        self.granted_scopes.push(scope);
    }

    /// Audiences requested by the client
    #[must_use]
    pub fn requested_audience(&self) -> &Arguments {
        &self.requested_audience
    }

    /// Replaces the requested audiences
    pub fn set_requested_audience(&mut self, audience: Arguments) {
        self.requested_audience = audience;
    }

    /// Audiences granted so far
    #[must_use]
    pub fn granted_audience(&self) -> &Arguments {
        &self.granted_audience
    }

    /// Grants an audience
    pub fn grant_audience(&mut self, audience: impl Into<String>) {
        self.granted_audience.push(audience);
    }

    /// The form parameters
    #[must_use]
    pub fn form(&self) -> &Form {
        &self.form
    }

    /// The session
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Mutable access to the session
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Replaces the session
    pub fn set_session(&mut self, session: Session) {
        self.session = session;
    }

    /// A copy fit for persisting, holding only the listed form parameters
    #[must_use]
    pub fn sanitize(&self, allowed: &[&str]) -> Self {
        Self {
            form: self.form.retain_keys(allowed),
            ..self.clone()
        }
    }
}

/// A request made to the token endpoint
#[derive(Clone, Debug)]
pub struct AccessRequest {
    request: Request,
    grant_types: Arguments,
}

impl AccessRequest {
    /// Builds a token request, reading grant types from `grant_type`
    pub fn new(client: Arc<Client>, form: Form, requested_at: UnixTime) -> Self {
        let grant_types = Arguments::from_space_delimited(form.get("grant_type").unwrap_or(""));
        Self {
            request: Request::new(client, form, requested_at),
            grant_types,
        }
    }

    /// The grant types presented
    #[must_use]
    pub fn grant_types(&self) -> &Arguments {
        &self.grant_types
    }
}

impl Deref for AccessRequest {
    type Target = Request;

    fn deref(&self) -> &Request {
        &self.request
    }
}

impl DerefMut for AccessRequest {
    fn deref_mut(&mut self) -> &mut Request {
        &mut self.request
    }
}

/// A request made to the authorize endpoint
#[derive(Clone, Debug)]
pub struct AuthorizeRequest {
    request: Request,
    response_types: Arguments,
}

impl AuthorizeRequest {
    /// Builds an authorize request, reading response types from `response_type`
    pub fn new(client: Arc<Client>, form: Form, requested_at: UnixTime) -> Self {
        let response_types =
            Arguments::from_space_delimited(form.get("response_type").unwrap_or(""));
        Self {
            request: Request::new(client, form, requested_at),
            response_types,
        }
    }

    /// The response types requested
    #[must_use]
    pub fn response_types(&self) -> &Arguments {
        &self.response_types
    }

    /// The opaque `state` value to echo back to the client
    #[must_use]
    pub fn state(&self) -> Option<&str> {
        self.form().get("state")
    }

    /// The redirect URI requested by the client
    #[must_use]
    pub fn redirect_uri(&self) -> Option<&str> {
        self.form().get("redirect_uri")
    }
}

impl Deref for AuthorizeRequest {
    type Target = Request;

    fn deref(&self) -> &Request {
        &self.request
    }
}

impl DerefMut for AuthorizeRequest {
    fn deref_mut(&mut self) -> &mut Request {
        &mut self.request
    }
}
