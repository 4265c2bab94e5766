use super::models::Identity;
use crate::cache::{Clock, SystemClock};
use crate::config::RateLimitConfig;
use crate::error::ApiError;
use actix_web::http::Method;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage, ResponseError,
};
use dashmap::DashMap;
use futures::future::{ok, Ready};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Identify,
    Batch,
}

impl RouteClass {
    pub fn of(method: &Method, path: &str) -> Option<Self> {
        if *method != Method::POST {
            return None;
        }
        match path.trim_end_matches('/') {
            "/identify" => Some(RouteClass::Identify),
            "/identify/batch" => Some(RouteClass::Batch),
            _ => None,
        }
    }
}

/// Fixed one-minute windows per caller and route class. Windows that have
/// run out are swept at most once per window length.
pub struct RateLimiter {
    windows: DashMap<(String, RouteClass), (u32, Instant)>,
    identify_limit: u32,
    batch_limit: u32,
    window: Duration,
    last_sweep: Mutex<Instant>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            identify_limit: config.identify_per_minute,
            batch_limit: config.batch_per_minute,
            window: Duration::from_secs(60),
            last_sweep: Mutex::new(clock.now()),
            clock,
        }
    }

    pub fn limit_for(&self, class: RouteClass) -> u32 {
        match class {
            RouteClass::Identify => self.identify_limit,
            RouteClass::Batch => self.batch_limit,
        }
    }

    /// Counts the request and reports whether it fits in the current window.
    pub fn check(&self, caller: &str, class: RouteClass) -> bool {
        let now = self.clock.now();
        let limit = self.limit_for(class);
        self.sweep_expired(now);

        let mut entry = self
            .windows
            .entry((caller.to_string(), class))
            .or_insert((0, now));
        let (count, window_start) = entry.value_mut();

        if now.saturating_duration_since(*window_start) >= self.window {
            *count = 0;
            *window_start = now;
        }
        if *count >= limit {
            return false;
        }
        *count += 1;
        true
    }

    /// Must not run while an entry guard is held.
    fn sweep_expired(&self, now: Instant) {
        {
            let mut last_sweep = self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner);
            if now.saturating_duration_since(*last_sweep) < self.window {
                return;
            }
            *last_sweep = now;
        }

        let before = self.windows.len();
        self.windows
            .retain(|_, (_, start)| now.saturating_duration_since(*start) < self.window);
        let swept = before.saturating_sub(self.windows.len());
        if swept > 0 {
            log::debug!("Dropped {} idle rate limit windows", swept);
        }
    }
}

/// Applies the [`RateLimiter`] to the identify routes. Runs after the API key
/// layer so callers are keyed by identity; otherwise by peer address.
#[derive(Clone)]
pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
}

impl RateLimitMiddleware {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<actix_web::body::EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimitMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(RateLimitMiddlewareService {
            service: Arc::new(service),
            limiter: self.limiter.clone(),
        })
    }
}

pub struct RateLimitMiddlewareService<S> {
    service: Arc<S>,
    limiter: Arc<RateLimiter>,
}

fn caller_key(req: &ServiceRequest) -> String {
    if let Some(identity) = req.extensions().get::<Identity>() {
        return format!("key:{}", identity.0);
    }
    let peer = req
        .connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string();
    format!("addr:{}", peer)
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddlewareService<S>
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
        let limiter = self.limiter.clone();

        Box::pin(async move {
            let Some(class) = RouteClass::of(req.method(), req.path()) else {
                let res = service.call(req).await?;
                return Ok(res.map_into_left_body());
            };

            let caller = caller_key(&req);
            if limiter.check(&caller, class) {
                let res = service.call(req).await?;
                return Ok(res.map_into_left_body());
            }

            log::warn!("Rate limit hit by {} on {:?}", caller, class);
            let limit = limiter.limit_for(class);
            let (http_req, _payload) = req.into_parts();
            let response = ApiError::RateLimited(format!("{} requests per minute", limit))
                .error_response()
                .map_into_right_body();
            Ok(ServiceResponse::new(http_req, response))
        })
    }
}
