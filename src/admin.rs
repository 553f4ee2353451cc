//! Dashboard endpoints: login, town and location management, photo
//! moderation. Everything here needs a bearer token.
use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::auth::{create_jwt, Auth, Role};
use crate::error::ApiError;
use crate::intake;
use crate::models::*;
use crate::moderation::{self, ReviewOutcome, ReviewRequest};
use crate::qr;
use crate::require_role;
use crate::routes::{AppState, UploadResponse};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/auth/login").route(web::post().to(login)))
        .service(web::resource("/auth/me").route(web::get().to(auth_me)))
        .service(
            web::resource("/admin/towns")
                .route(web::get().to(list_towns))
                .route(web::post().to(create_town)),
        )
        .service(
            web::resource("/admin/towns/{id}")
                .route(web::patch().to(update_town))
                .route(web::delete().to(delete_town)),
        )
        .service(
            web::resource("/admin/locations")
                .route(web::get().to(list_locations))
                .route(web::post().to(create_location)),
        )
        .service(
            web::resource("/admin/locations/{id}")
                .route(web::patch().to(update_location))
                .route(web::delete().to(delete_location)),
        )
        .service(web::resource("/admin/locations/{id}/qr").route(web::get().to(location_qr)))
        .service(web::resource("/admin/locations/{id}/photo").route(web::post().to(upload_location_photo)))
        .service(web::resource("/admin/locations/{id}/photos").route(web::get().to(photo_history)))
        .service(web::resource("/admin/locations/{id}/revert").route(web::post().to(revert_location)))
        .service(web::resource("/admin/photos/{id}/flagged").route(web::post().to(set_photo_flagged)))
        .service(web::resource("/admin/auto-flags").route(web::get().to(list_auto_flags)))
        .service(web::resource("/admin/auto-flags/{id}/review").route(web::post().to(review_auto_flag)));
}

// ---------------------------------------------------------------------------
// auth

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    pub role: Role,
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = LoginResponse),
        (status = 401, description = "Bad credentials")
    )
)]
pub async fn login(data: web::Data<AppState>, payload: web::Json<LoginRequest>) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    let accounts = data.accounts.clone();
    let username = req.username.clone();
    let account = web::block(move || accounts.verify(&req.username, &req.password).cloned())
        .await
        .map_err(|e| {
            error!("password check failed: {e}");
            ApiError::Internal
        })?;
    let Some(account) = account else {
        warn!(%username, "failed dashboard login");
        return Err(ApiError::Unauthorized);
    };
    let token = create_jwt(&account.name, vec![account.role]).map_err(|e| {
        error!("token issue failed: {e}");
        ApiError::Internal
    })?;
    info!(username = %account.name, role = ?account.role, "dashboard login");
    Ok(HttpResponse::Ok().json(LoginResponse { token, role: account.role }))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MeResponse {
    pub subject: String,
    pub roles: Vec<Role>,
    pub is_admin: bool,
    pub can_moderate: bool,
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Current identity", body = MeResponse),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearer" = []))
)]
pub async fn auth_me(auth: Auth) -> HttpResponse {
    HttpResponse::Ok().json(MeResponse {
        subject: auth.0.sub.clone(),
        roles: auth.0.roles.clone(),
        is_admin: auth.is_admin(),
        can_moderate: auth.can_moderate(),
    })
}

// ---------------------------------------------------------------------------
// towns

#[utoipa::path(
    get,
    path = "/api/v1/admin/towns",
    responses((status = 200, description = "All towns, inactive included", body = [Town])),
    security(("bearer" = []))
)]
pub async fn list_towns(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    Ok(HttpResponse::Ok().json(data.repo.list_towns(true).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/towns",
    request_body = NewTown,
    responses(
        (status = 201, description = "Town created", body = Town),
        (status = 400, description = "Invalid payload"),
        (status = 409, description = "Slug taken")
    ),
    security(("bearer" = []))
)]
pub async fn create_town(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewTown>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let new = payload.into_inner();
    new.validate()?;
    let town = data.repo.create_town(new).await?;
    info!(town_id = town.id, slug = %town.slug, "town created");
    Ok(HttpResponse::Created().json(town))
}

#[utoipa::path(
    patch,
    path = "/api/v1/admin/towns/{id}",
    request_body = UpdateTown,
    params(("id" = Id, Path, description = "Town id")),
    responses(
        (status = 200, description = "Town updated", body = Town),
        (status = 404, description = "Town not found"),
        (status = 409, description = "Slug taken")
    ),
    security(("bearer" = []))
)]
pub async fn update_town(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateTown>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let upd = payload.into_inner();
    upd.validate()?;
    Ok(HttpResponse::Ok().json(data.repo.update_town(path.into_inner(), upd).await?))
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/towns/{id}",
    params(("id" = Id, Path, description = "Town id")),
    responses(
        (status = 204, description = "Town deleted"),
        (status = 404, description = "Town not found"),
        (status = 409, description = "Town still has locations")
    ),
    security(("bearer" = []))
)]
pub async fn delete_town(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let id = path.into_inner();
    data.repo.delete_town(id).await?;
    info!(town_id = id, "town deleted");
    Ok(HttpResponse::NoContent().finish())
}

// ---------------------------------------------------------------------------
// locations

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LocationFilter {
    pub town_id: Option<Id>,
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/locations",
    params(LocationFilter),
    responses((status = 200, description = "All locations, inactive included", body = [Location])),
    security(("bearer" = []))
)]
pub async fn list_locations(
    auth: Auth,
    data: web::Data<AppState>,
    query: web::Query<LocationFilter>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    Ok(HttpResponse::Ok().json(data.repo.list_locations(query.town_id, true).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/locations",
    request_body = NewLocation,
    responses(
        (status = 201, description = "Location created", body = Location),
        (status = 400, description = "Invalid payload"),
        (status = 404, description = "Town not found"),
        (status = 409, description = "Slug taken in this town")
    ),
    security(("bearer" = []))
)]
pub async fn create_location(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewLocation>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let new = payload.into_inner();
    new.validate()?;
    let location = data.repo.create_location(new).await?;
    info!(location_id = location.id, town_id = location.town_id, slug = %location.slug, "location created");
    Ok(HttpResponse::Created().json(location))
}

#[utoipa::path(
    patch,
    path = "/api/v1/admin/locations/{id}",
    request_body = UpdateLocation,
    params(("id" = Id, Path, description = "Location id")),
    responses(
        (status = 200, description = "Location updated", body = Location),
        (status = 400, description = "Invalid payload"),
        (status = 404, description = "Location not found"),
        (status = 409, description = "Slug taken in this town")
    ),
    security(("bearer" = []))
)]
pub async fn update_location(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateLocation>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let upd = payload.into_inner();
    upd.validate()?;
    validate_coordinates(&upd)?;
    Ok(HttpResponse::Ok().json(data.repo.update_location(path.into_inner(), upd).await?))
}

fn validate_coordinates(upd: &UpdateLocation) -> Result<(), ApiError> {
    if let Some(Some(lat)) = upd.lat {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(ApiError::BadRequest("lat out of range".into()));
        }
    }
    if let Some(Some(lng)) = upd.lng {
        if !(-180.0..=180.0).contains(&lng) {
            return Err(ApiError::BadRequest("lng out of range".into()));
        }
    }
    Ok(())
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/locations/{id}",
    params(("id" = Id, Path, description = "Location id")),
    responses(
        (status = 204, description = "Location and its photos deleted"),
        (status = 404, description = "Location not found")
    ),
    security(("bearer" = []))
)]
pub async fn delete_location(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let id = path.into_inner();
    let mut keys = data.repo.delete_location(id).await?;
    keys.sort();
    keys.dedup();
    for key in &keys {
        if let Err(e) = data.image_store.delete(key).await {
            warn!(%key, "could not delete stored photo: {e}");
        }
    }
    info!(location_id = id, photos = keys.len(), "location deleted");
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/locations/{id}/qr",
    params(("id" = Id, Path, description = "Location id")),
    responses(
        (status = 200, description = "QR code linking to the capture page", content_type = "image/svg+xml", body = String),
        (status = 404, description = "Location not found")
    ),
    security(("bearer" = []))
)]
pub async fn location_qr(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let location = data.repo.get_location(path.into_inner()).await?;
    let town = data.repo.get_town(location.town_id).await?;
    let url = qr::board_upload_url(&data.config.public_base_url, &town.slug, &location.slug);
    let svg = qr::render_svg(&url).map_err(|e| {
        error!(%url, "qr render failed: {e}");
        ApiError::Internal
    })?;
    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "image/svg+xml"))
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{}-{}.svg\"", town.slug, location.slug),
        ))
        .body(svg))
}

// ---------------------------------------------------------------------------
// photos and moderation

#[utoipa::path(
    post,
    path = "/api/v1/admin/locations/{id}/photo",
    params(("id" = Id, Path, description = "Location id")),
    request_body(content = crate::routes::PhotoUpload, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Photo is now current", body = UploadResponse),
        (status = 404, description = "Location not found"),
        (status = 413, description = "File too large"),
        (status = 415, description = "Not an image")
    ),
    security(("bearer" = []))
)]
pub async fn upload_location_photo(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let location = data.repo.get_location(path.into_inner()).await?;
    let file = intake::read_file_field(payload, data.config.max_upload_bytes).await?;
    let photo = intake::store_board_photo(&data, &location, file).await?;
    let photo_url = data.config.photo_url(&photo.storage_path);
    Ok(HttpResponse::Created().json(UploadResponse { photo, photo_url }))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/locations/{id}/photos",
    params(("id" = Id, Path, description = "Location id")),
    responses(
        (status = 200, description = "Photo history, newest first", body = [Photo]),
        (status = 404, description = "Location not found")
    ),
    security(("bearer" = []))
)]
pub async fn photo_history(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin | Role::Moderator);
    let id = path.into_inner();
    data.repo.get_location(id).await?;
    Ok(HttpResponse::Ok().json(data.repo.photo_history(id).await?))
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RevertRequest {
    /// Newest unflagged earlier photo when omitted.
    pub photo_id: Option<Id>,
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/locations/{id}/revert",
    params(("id" = Id, Path, description = "Location id")),
    request_body = RevertRequest,
    responses(
        (status = 200, description = "Photo now current", body = Photo),
        (status = 400, description = "Chosen photo is flagged"),
        (status = 404, description = "Location or photo not found")
    ),
    security(("bearer" = []))
)]
pub async fn revert_location(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: Option<web::Json<RevertRequest>>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin | Role::Moderator);
    let photo_id = payload.and_then(|p| p.into_inner().photo_id);
    let photo = moderation::revert_location(data.repo.as_ref(), path.into_inner(), photo_id).await?;
    Ok(HttpResponse::Ok().json(photo))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetFlaggedRequest {
    pub flagged: bool,
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/photos/{id}/flagged",
    params(("id" = Id, Path, description = "Photo id")),
    request_body = SetFlaggedRequest,
    responses(
        (status = 200, description = "Photo updated", body = Photo),
        (status = 404, description = "Photo not found")
    ),
    security(("bearer" = []))
)]
pub async fn set_photo_flagged(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<SetFlaggedRequest>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin | Role::Moderator);
    let photo = data.repo.set_photo_flagged(path.into_inner(), payload.flagged).await?;
    info!(photo_id = photo.id, flagged = photo.is_flagged, by = %auth.0.sub, "photo flag set");
    Ok(HttpResponse::Ok().json(photo))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AutoFlagFilter {
    /// pending, approved or reverted
    #[param(value_type = Option<String>)]
    pub status: Option<ReviewStatus>,
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/auto-flags",
    params(AutoFlagFilter),
    responses((status = 200, description = "Review queue, newest first", body = [AutoFlagEvent])),
    security(("bearer" = []))
)]
pub async fn list_auto_flags(
    auth: Auth,
    data: web::Data<AppState>,
    query: web::Query<AutoFlagFilter>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin | Role::Moderator);
    Ok(HttpResponse::Ok().json(data.repo.list_auto_flags(query.status).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/auto-flags/{id}/review",
    params(("id" = Id, Path, description = "Auto-flag event id")),
    request_body = ReviewRequest,
    responses(
        (status = 200, description = "Event resolved", body = ReviewOutcome),
        (status = 404, description = "Event not found"),
        (status = 409, description = "Event already resolved")
    ),
    security(("bearer" = []))
)]
pub async fn review_auto_flag(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<ReviewRequest>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin | Role::Moderator);
    let outcome = moderation::review_auto_flag(data.repo.as_ref(), path.into_inner(), payload.action).await?;
    info!(event_id = outcome.event.id, by = %auth.0.sub, "auto-flag review recorded");
    Ok(HttpResponse::Ok().json(outcome))
}
