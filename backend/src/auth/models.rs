use actix_web::{FromRequest, HttpMessage, HttpRequest};
use futures::future::{ok, Ready};
use std::collections::HashMap;

/// Static bearer token -> identity map.
#[derive(Debug, Clone, Default)]
pub struct ApiKeyStore {
    keys: HashMap<String, String>,
}

impl ApiKeyStore {
    pub fn new(keys: HashMap<String, String>) -> Self {
        Self { keys }
    }

    pub fn identity_for(&self, token: &str) -> Option<&str> {
        self.keys.get(token).map(String::as_str)
    }
}

/// Identity resolved by the API key middleware, stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity(pub String);

/// Caller identity, or `anonymous` when the API key layer is switched off.
pub struct AuthenticatedUser(pub String);

pub const ANONYMOUS: &str = "anonymous";

impl FromRequest for AuthenticatedUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        match req.extensions().get::<Identity>() {
            Some(identity) => ok(AuthenticatedUser(identity.0.clone())),
            None => ok(AuthenticatedUser(ANONYMOUS.to_string())),
        }
    }
}
