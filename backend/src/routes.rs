use actix_multipart::Multipart;
use actix_web::middleware::Condition;
use actix_web::{web, HttpRequest, HttpResponse};
use futures::TryStreamExt;
use serde::Deserialize;
use shared::{CacheClearedResponse, HealthResponse, ServiceInfo, StatsResponse};

use crate::auth::{ApiKeyMiddleware, AuthenticatedUser, RateLimitMiddleware};
use crate::cache::models::round_secs;
use crate::error::ApiError;
use crate::pipeline::UploadedImage;
use crate::state::AppState;

const SINGLE_FIELDS: [&str; 2] = ["file", "image"];
const BATCH_FIELDS: [&str; 2] = ["files", "files[]"];

#[derive(Debug, Deserialize)]
pub struct IdentifyQuery {
    pub topk: Option<usize>,
    pub confidence_threshold: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct BatchQuery {
    pub topk: Option<usize>,
}

/// Registers every endpoint. `/` and `/health` stay outside the gated scope;
/// everything else passes the API key layer first and the rate limiter second.
pub fn configure_routes(cfg: &mut web::ServiceConfig, state: web::Data<AppState>) {
    let auth_enabled = state.config.auth.enabled;
    let rate_limit_enabled = state.config.rate_limit.enabled;
    let api_keys = ApiKeyMiddleware::new(state.api_keys.clone());
    let rate_limiter = RateLimitMiddleware::new(state.rate_limiter.clone());

    cfg.app_data(state)
        .app_data(web::QueryConfig::default().error_handler(|err, _req| {
            ApiError::BadRequest(format!("Invalid query: {}", err)).into()
        }))
        .service(web::resource("/").route(web::get().to(root)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(
            web::scope("")
                .wrap(Condition::new(rate_limit_enabled, rate_limiter))
                .wrap(Condition::new(auth_enabled, api_keys))
                .service(web::resource("/identify").route(web::post().to(identify)))
                .service(web::resource("/identify/batch").route(web::post().to(identify_batch)))
                .service(web::resource("/cache").route(web::delete().to(clear_cache)))
                .service(web::resource("/stats").route(web::get().to(stats)))
                .default_service(web::to(not_found)),
        );
}

async fn root() -> HttpResponse {
    HttpResponse::Ok().json(ServiceInfo {
        message: "Plant identification service".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        health: "/health".to_string(),
    })
}

async fn not_found(req: HttpRequest) -> Result<HttpResponse, ApiError> {
    Err(ApiError::NotFound(format!(
        "No route for {} {}",
        req.method(),
        req.path()
    )))
}

async fn health(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let pipeline = state.pipeline.clone();
    let init = web::block(move || pipeline.identifier().get().map(|_| ())).await?;

    let uptime = round_secs(state.uptime());
    let timestamp = chrono::Utc::now().to_rfc3339();
    let response = match init {
        Ok(()) => HttpResponse::Ok().json(HealthResponse {
            status: "healthy".to_string(),
            message: "Identifier loaded".to_string(),
            timestamp,
            uptime,
            model_loaded: true,
        }),
        Err(e) => HttpResponse::ServiceUnavailable().json(HealthResponse {
            status: "unhealthy".to_string(),
            message: format!("Identifier unavailable: {}", e),
            timestamp,
            uptime,
            model_loaded: false,
        }),
    };
    Ok(response)
}

async fn identify(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    query: web::Query<IdentifyQuery>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let top_k = checked_top_k(query.topk, state.config.identify.default_topk, &state)?;
    let threshold = match query.confidence_threshold {
        Some(t) if !(0.0..=1.0).contains(&t) => {
            return Err(ApiError::BadRequest(
                "confidence_threshold must be between 0 and 1".to_string(),
            ))
        }
        other => other,
    };

    let upload = read_uploads(payload, &SINGLE_FIELDS, 1, state.config.server.max_upload_bytes)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::BadRequest("No file uploaded".to_string()))?;

    log::info!("{} identifying {} (topk={})", user.0, upload.filename, top_k);
    let pipeline = state.pipeline.clone();
    let payload = web::block(move || pipeline.process(&upload, top_k, threshold)).await??;

    Ok(HttpResponse::Ok().json(payload.to_response()))
}

async fn identify_batch(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    query: web::Query<BatchQuery>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let top_k = checked_top_k(query.topk, state.config.batch.topk, &state)?;
    let uploads = read_uploads(
        payload,
        &BATCH_FIELDS,
        state.batch.max_batch_size(),
        state.config.server.max_upload_bytes,
    )
    .await?;
    if uploads.is_empty() {
        return Err(ApiError::BadRequest("No files uploaded".to_string()));
    }

    log::info!("{} submitted a batch of {} files", user.0, uploads.len());
    let batch = state.batch.clone();
    let result = web::block(move || batch.process_batch(&uploads, top_k)).await??;

    Ok(HttpResponse::Ok().json(result.into_response()))
}

async fn clear_cache(state: web::Data<AppState>, user: AuthenticatedUser) -> HttpResponse {
    let removed = state.pipeline.cache().map_or(0, |cache| cache.clear());
    log::info!("Result cache cleared by {} ({} entries)", user.0, removed);
    HttpResponse::Ok().json(CacheClearedResponse {
        message: "Cache cleared".to_string(),
        removed,
    })
}

async fn stats(state: web::Data<AppState>) -> HttpResponse {
    let counters = state.pipeline.stats();
    let cache = state.pipeline.cache();
    HttpResponse::Ok().json(StatsResponse {
        cache_enabled: cache.is_some(),
        cache_size: cache.map_or(0, |c| c.size()),
        cache_hits: counters.cache_hits,
        cache_misses: counters.cache_misses,
        total_requests: counters.total_requests,
        identifier_calls: counters.identifier_calls,
        failed_requests: counters.failed_requests,
        model_loaded: state.pipeline.identifier().is_loaded(),
        uptime: round_secs(state.uptime()),
    })
}

fn checked_top_k(
    requested: Option<usize>,
    default: usize,
    state: &AppState,
) -> Result<usize, ApiError> {
    let max = state.config.identify.max_topk;
    let top_k = requested.unwrap_or(default);
    if top_k == 0 || top_k > max {
        return Err(ApiError::BadRequest(format!(
            "topk must be between 1 and {}",
            max
        )));
    }
    Ok(top_k)
}

/// Collects file parts named in `fields`. Parts without a filename are
/// skipped. Past `keep` files only the filename is recorded so the caller can
/// still report how many were sent.
async fn read_uploads(
    mut payload: Multipart,
    fields: &[&str],
    keep: usize,
    max_bytes: usize,
) -> Result<Vec<UploadedImage>, ApiError> {
    let mut uploads = Vec::new();

    while let Some(mut field) = payload.try_next().await? {
        let (name, filename) = match field.content_disposition() {
            Some(cd) => (
                cd.get_name().map(str::to_string),
                cd.get_filename().map(str::to_string),
            ),
            None => (None, None),
        };
        let wanted = name.as_deref().is_some_and(|n| fields.contains(&n));
        let Some(filename) = filename.filter(|f| wanted && !f.is_empty()) else {
            continue;
        };

        if uploads.len() >= keep {
            uploads.push(UploadedImage::new(filename, Vec::new()));
            continue;
        }

        let mut data = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            if data.len() + chunk.len() > max_bytes {
                log::warn!("Upload {} exceeds {} bytes", filename, max_bytes);
                return Err(ApiError::PayloadTooLarge(max_bytes));
            }
            data.extend_from_slice(&chunk);
        }
        uploads.push(UploadedImage::new(filename, data));
    }

    Ok(uploads)
}
