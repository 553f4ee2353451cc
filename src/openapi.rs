use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::admin::{LoginRequest, LoginResponse, MeResponse, RevertRequest, SetFlaggedRequest};
use crate::auth::Role;
use crate::discovery::MapMarker;
use crate::models::{
    AutoFlagEvent, BoardView, FlagOutcome, Location, NewLocation, NewTown, Photo, ReviewStatus, Town, UpdateLocation,
    UpdateTown,
};
use crate::moderation::{ReviewAction, ReviewOutcome, ReviewRequest};
use crate::routes::{HealthResponse, PhotoUpload, UploadResponse, ViewCount};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health,
        crate::routes::list_towns,
        crate::routes::list_town_locations,
        crate::routes::search_locations,
        crate::routes::map_clusters,
        crate::routes::get_board,
        crate::routes::upload_board_photo,
        crate::routes::record_view,
        crate::routes::flag_photo,
        crate::admin::login,
        crate::admin::auth_me,
        crate::admin::list_towns,
        crate::admin::create_town,
        crate::admin::update_town,
        crate::admin::delete_town,
        crate::admin::list_locations,
        crate::admin::create_location,
        crate::admin::update_location,
        crate::admin::delete_location,
        crate::admin::location_qr,
        crate::admin::upload_location_photo,
        crate::admin::photo_history,
        crate::admin::revert_location,
        crate::admin::set_photo_flagged,
        crate::admin::list_auto_flags,
        crate::admin::review_auto_flag,
    ),
    components(schemas(
        Town, NewTown, UpdateTown, Location, NewLocation, UpdateLocation, Photo, AutoFlagEvent, ReviewStatus,
        FlagOutcome, BoardView, MapMarker, HealthResponse, PhotoUpload, UploadResponse, ViewCount,
        LoginRequest, LoginResponse, MeResponse, Role, RevertRequest, SetFlaggedRequest,
        ReviewAction, ReviewRequest, ReviewOutcome,
    )),
    modifiers(&BearerAuth)
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).bearer_format("JWT").build()),
        );
    }
}
