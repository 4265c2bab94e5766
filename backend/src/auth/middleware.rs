use super::models::{ApiKeyStore, Identity};
use crate::error::ApiError;
use actix_web::http::header::Header;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage, ResponseError,
};
use actix_web_httpauth::headers::authorization::{Authorization, Bearer};
use futures::future::{ok, Ready};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Rejects requests whose bearer token is not a configured API key and
/// records the caller's [`Identity`] for the handlers behind it.
#[derive(Clone)]
pub struct ApiKeyMiddleware {
    keys: Arc<ApiKeyStore>,
}

impl ApiKeyMiddleware {
    pub fn new(keys: ApiKeyStore) -> Self {
        Self {
            keys: Arc::new(keys),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ApiKeyMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<actix_web::body::EitherBody<B>>;
    type Error = Error;
    type Transform = ApiKeyMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(ApiKeyMiddlewareService {
            service: Arc::new(service),
            keys: self.keys.clone(),
        })
    }
}

pub struct ApiKeyMiddlewareService<S> {
    service: Arc<S>,
    keys: Arc<ApiKeyStore>,
}

#[derive(Debug)]
enum AuthError {
    MissingToken,
    UnknownToken,
}

impl AuthError {
    fn log_message(&self, path: &str) -> String {
        match self {
            AuthError::MissingToken => format!("No bearer token for path: {}", path),
            AuthError::UnknownToken => format!("Unknown API key presented for path: {}", path),
        }
    }

    fn client_error(&self) -> ApiError {
        match self {
            AuthError::MissingToken => ApiError::Unauthorized("Missing bearer token".to_string()),
            AuthError::UnknownToken => ApiError::Unauthorized("Invalid API key".to_string()),
        }
    }
}

fn identify_request(req: &ServiceRequest, keys: &ApiKeyStore) -> Result<Identity, AuthError> {
    let bearer = Authorization::<Bearer>::parse(req)
        .map_err(|_| AuthError::MissingToken)?
        .into_scheme();
    keys.identity_for(bearer.token())
        .map(|identity| Identity(identity.to_string()))
        .ok_or(AuthError::UnknownToken)
}

impl<S, B> Service<ServiceRequest> for ApiKeyMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<actix_web::body::EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let keys = self.keys.clone();

        Box::pin(async move {
            let path = req.path().to_string();
            match identify_request(&req, &keys) {
                Ok(identity) => {
                    log::debug!("Request to {} authenticated as {}", path, identity.0);
                    req.extensions_mut().insert(identity);
                    let res = service.call(req).await?;
                    Ok(res.map_into_left_body())
                }
                Err(auth_error) => {
                    log::warn!("{}", auth_error.log_message(&path));
                    let (http_req, _payload) = req.into_parts();
                    let response = auth_error
                        .client_error()
                        .error_response()
                        .map_into_right_body();
                    Ok(ServiceResponse::new(http_req, response))
                }
            }
        })
    }
}
