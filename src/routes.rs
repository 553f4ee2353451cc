use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

use crate::auth::{Accounts, Auth};
use crate::config::AppConfig;
use crate::discovery::{self, LocationQuery, MapMarker, Viewport};
use crate::error::ApiError;
use crate::intake;
use crate::models::*;
use crate::moderation;
use crate::rate_limit::RateLimiterFacade;
use crate::repo::Repo;
use crate::storage::ImageStore;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/health").route(web::get().to(health)))
            .service(web::resource("/towns").route(web::get().to(list_towns)))
            .service(web::resource("/towns/{town_slug}/locations").route(web::get().to(list_town_locations)))
            .service(web::resource("/locations").route(web::get().to(search_locations)))
            .service(web::resource("/locations/{id}/view").route(web::post().to(record_view)))
            .service(web::resource("/map/clusters").route(web::get().to(map_clusters)))
            .service(web::resource("/boards/{town_slug}/{location_slug}").route(web::get().to(get_board)))
            .service(
                web::resource("/boards/{town_slug}/{location_slug}/photo").route(web::post().to(upload_board_photo)),
            )
            .service(web::resource("/photos/{id}/flag").route(web::post().to(flag_photo)))
            .configure(crate::admin::config),
    );
    // outside /api/v1 so <img src="/photos/..."> works
    cfg.route("/photos/{key:.*}", web::get().to(serve_photo));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub image_store: Arc<dyn ImageStore>,
    pub config: Arc<AppConfig>,
    pub accounts: Arc<Accounts>,
    pub rate_limiter: Option<RateLimiterFacade>,
}

impl AppState {
    pub fn new(repo: Arc<dyn Repo>, image_store: Arc<dyn ImageStore>) -> Self {
        Self {
            repo,
            image_store,
            config: Arc::new(AppConfig::default()),
            accounts: Arc::new(Accounts::default()),
            rate_limiter: None,
        }
    }

    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn with_accounts(mut self, accounts: Accounts) -> Self {
        self.accounts = Arc::new(accounts);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiterFacade) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }
}

/// Rate-limit key: the TCP peer, or the forwarded client address when the
/// peer is a configured proxy.
pub(crate) fn client_ip(req: &HttpRequest, config: &AppConfig) -> String {
    match req.peer_addr().map(|a| a.ip()) {
        Some(peer) if config.is_trusted_proxy(peer) => {
            req.connection_info().realip_remote_addr().unwrap_or("unknown").to_string()
        }
        Some(peer) => peer.to_string(),
        None => "unknown".to_string(),
    }
}

fn guard(
    data: &AppState,
    req: &HttpRequest,
    allow: impl Fn(&RateLimiterFacade, &str) -> bool,
    action: &str,
) -> Result<(), ApiError> {
    if let Some(rl) = &data.rate_limiter {
        let ip = client_ip(req, &data.config);
        if !allow(rl, &ip) {
            warn!(%ip, action, "rate limited");
            return Err(ApiError::TooManyRequests);
        }
    }
    Ok(())
}

/// Active locations whose town is active too.
async fn public_locations(repo: &dyn Repo) -> Result<(Vec<Town>, Vec<Location>), ApiError> {
    let towns = repo.list_towns(false).await?;
    let locations = repo
        .list_locations(None, false)
        .await?
        .into_iter()
        .filter(|l| towns.iter().any(|t| t.id == l.town_id))
        .collect();
    Ok((towns, locations))
}

async fn public_board(repo: &dyn Repo, town_slug: &str, location_slug: &str) -> Result<(Town, Location), ApiError> {
    let (town, location) = repo.get_location_by_slugs(town_slug, location_slug).await?;
    if !town.is_active || !location.is_active {
        return Err(ApiError::NotFound);
    }
    Ok((town, location))
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

#[utoipa::path(get, path = "/api/v1/health", responses((status = 200, body = HealthResponse)))]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse { status: "ok".into() })
}

#[utoipa::path(
    get,
    path = "/api/v1/towns",
    responses((status = 200, description = "Active towns", body = [Town]))
)]
pub async fn list_towns(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.repo.list_towns(false).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/towns/{town_slug}/locations",
    params(("town_slug" = String, Path, description = "Town slug")),
    responses(
        (status = 200, description = "Active locations in the town", body = [Location]),
        (status = 404, description = "Town not found")
    )
)]
pub async fn list_town_locations(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let town = data.repo.get_town_by_slug(&path.into_inner()).await?;
    if !town.is_active {
        return Err(ApiError::NotFound);
    }
    Ok(HttpResponse::Ok().json(data.repo.list_locations(Some(town.id), false).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/locations",
    params(LocationQuery),
    responses((status = 200, description = "Matching locations", body = [Location]))
)]
pub async fn search_locations(data: web::Data<AppState>, query: web::Query<LocationQuery>) -> Result<HttpResponse, ApiError> {
    let (towns, locations) = public_locations(data.repo.as_ref()).await?;
    Ok(HttpResponse::Ok().json(discovery::filter_locations(locations, &towns, &query)))
}

#[utoipa::path(
    get,
    path = "/api/v1/map/clusters",
    params(Viewport),
    responses(
        (status = 200, description = "Markers for the viewport", body = [MapMarker]),
        (status = 400, description = "Invalid viewport")
    )
)]
pub async fn map_clusters(data: web::Data<AppState>, query: web::Query<Viewport>) -> Result<HttpResponse, ApiError> {
    let vp = query.into_inner();
    if vp.min_lat > vp.max_lat || vp.zoom > discovery::MAX_ZOOM {
        return Err(ApiError::BadRequest("invalid viewport".into()));
    }
    let (_, locations) = public_locations(data.repo.as_ref()).await?;
    let points = discovery::map_points(&locations);
    Ok(HttpResponse::Ok().json(discovery::cluster(&points, &vp, discovery::DEFAULT_RADIUS_PX)))
}

#[utoipa::path(
    get,
    path = "/api/v1/boards/{town_slug}/{location_slug}",
    params(
        ("town_slug" = String, Path, description = "Town slug"),
        ("location_slug" = String, Path, description = "Location slug")
    ),
    responses(
        (status = 200, description = "Board with its public photo", body = BoardView),
        (status = 404, description = "Board not found")
    )
)]
pub async fn get_board(data: web::Data<AppState>, path: web::Path<(String, String)>) -> Result<HttpResponse, ApiError> {
    let (town_slug, location_slug) = path.into_inner();
    let (town, location) = public_board(data.repo.as_ref(), &town_slug, &location_slug).await?;
    let photo = data.repo.current_photo(location.id).await?;
    let photo_url = photo.as_ref().map(|p| data.config.photo_url(&p.storage_path));
    Ok(HttpResponse::Ok().json(BoardView { town, location, photo, photo_url }))
}

/// Multipart body of a photo upload.
#[derive(ToSchema)]
pub struct PhotoUpload {
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    pub photo: Photo,
    pub photo_url: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/boards/{town_slug}/{location_slug}/photo",
    params(
        ("town_slug" = String, Path, description = "Town slug"),
        ("location_slug" = String, Path, description = "Location slug")
    ),
    request_body(content = PhotoUpload, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Photo is now current", body = UploadResponse),
        (status = 400, description = "Missing or undecodable file"),
        (status = 404, description = "Board not found"),
        (status = 413, description = "File too large"),
        (status = 415, description = "Not an image"),
        (status = 429, description = "Too many uploads")
    )
)]
pub async fn upload_board_photo(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    guard(&data, &req, RateLimiterFacade::allow_upload, "upload")?;
    let (town_slug, location_slug) = path.into_inner();
    let (_, location) = public_board(data.repo.as_ref(), &town_slug, &location_slug).await?;
    let file = intake::read_file_field(payload, data.config.max_upload_bytes).await?;
    let photo = intake::store_board_photo(&data, &location, file).await?;
    let photo_url = data.config.photo_url(&photo.storage_path);
    Ok(HttpResponse::Created().json(UploadResponse { photo, photo_url }))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ViewCount {
    pub location_id: Id,
    pub view_count: i64,
}

#[utoipa::path(
    post,
    path = "/api/v1/locations/{id}/view",
    params(("id" = Id, Path, description = "Location id")),
    responses(
        (status = 200, description = "View recorded", body = ViewCount),
        (status = 404, description = "Location not found"),
        (status = 429, description = "Too many requests")
    )
)]
pub async fn record_view(req: HttpRequest, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    guard(&data, &req, RateLimiterFacade::allow_view, "view")?;
    let id = path.into_inner();
    let location = data.repo.get_location(id).await?;
    let town = data.repo.get_town(location.town_id).await?;
    if !location.is_active || !town.is_active {
        return Err(ApiError::NotFound);
    }
    let view_count = data.repo.increment_view_count(id).await?;
    Ok(HttpResponse::Ok().json(ViewCount { location_id: id, view_count }))
}

#[utoipa::path(
    post,
    path = "/api/v1/photos/{id}/flag",
    params(("id" = Id, Path, description = "Photo id")),
    responses(
        (status = 200, description = "Flag recorded", body = FlagOutcome),
        (status = 404, description = "Photo not found"),
        (status = 429, description = "Too many flags")
    )
)]
pub async fn flag_photo(req: HttpRequest, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    guard(&data, &req, RateLimiterFacade::allow_flag, "flag")?;
    let outcome = moderation::flag_photo(data.repo.as_ref(), path.into_inner(), data.config.auto_flag_threshold).await?;
    Ok(HttpResponse::Ok().json(outcome))
}

/// Whether some row using `key` is on public display under an active
/// location and town.
async fn is_on_public_board(repo: &dyn Repo, key: &str) -> Result<bool, ApiError> {
    for photo in repo.photos_by_storage_path(key).await?.into_iter().filter(Photo::is_public) {
        let location = repo.get_location(photo.location_id).await?;
        if location.is_active && repo.get_town(location.town_id).await?.is_active {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Anonymous callers only get photos currently on a public board; dashboard
/// users can also load history and hidden photos.
pub async fn serve_photo(auth: Option<Auth>, data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let key = path.into_inner();
    let staff = auth.map_or(false, |a| a.can_moderate());
    if !staff && !is_on_public_board(data.repo.as_ref(), &key).await? {
        return Err(ApiError::NotFound);
    }
    let (bytes, mime) = data.image_store.load(&key).await?;
    // moderation can withdraw a photo at any time
    let cache = if staff { "private, no-store" } else { "public, max-age=300" };
    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, mime))
        .insert_header((header::CACHE_CONTROL, cache))
        .body(bytes))
}
