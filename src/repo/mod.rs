use async_trait::async_trait;

use crate::models::*;

#[cfg(feature = "inmem-store")]
pub mod inmem;
#[cfg(feature = "postgres-store")]
pub mod pg;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("invalid: {0}")] Invalid(String),
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait TownRepo: Send + Sync {
    async fn list_towns(&self, include_inactive: bool) -> RepoResult<Vec<Town>>;
    async fn get_town(&self, id: Id) -> RepoResult<Town>;
    async fn get_town_by_slug(&self, slug: &str) -> RepoResult<Town>;
    async fn create_town(&self, new: NewTown) -> RepoResult<Town>;
    async fn update_town(&self, id: Id, upd: UpdateTown) -> RepoResult<Town>;
    /// Conflict while any location still belongs to the town.
    async fn delete_town(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait LocationRepo: Send + Sync {
    async fn list_locations(&self, town_id: Option<Id>, include_inactive: bool) -> RepoResult<Vec<Location>>;
    async fn get_location(&self, id: Id) -> RepoResult<Location>;
    async fn get_location_by_slugs(&self, town_slug: &str, location_slug: &str) -> RepoResult<(Town, Location)>;
    async fn create_location(&self, new: NewLocation) -> RepoResult<Location>;
    async fn update_location(&self, id: Id, upd: UpdateLocation) -> RepoResult<Location>;
    /// Removes the location with its photos, flags and review events.
    /// Returns the storage paths of the removed photos.
    async fn delete_location(&self, id: Id) -> RepoResult<Vec<String>>;
    async fn increment_view_count(&self, id: Id) -> RepoResult<i64>;
}

#[async_trait]
pub trait PhotoRepo: Send + Sync {
    /// The publicly shown photo: current and not flagged.
    async fn current_photo(&self, location_id: Id) -> RepoResult<Option<Photo>>;
    /// Newest first.
    async fn photo_history(&self, location_id: Id) -> RepoResult<Vec<Photo>>;
    async fn get_photo(&self, id: Id) -> RepoResult<Photo>;
    /// Every row pointing at a stored object; identical uploads share a key.
    async fn photos_by_storage_path(&self, storage_path: &str) -> RepoResult<Vec<Photo>>;
    /// Supersede the location's current photo and insert the new one as
    /// current, atomically.
    async fn replace_current_photo(&self, location_id: Id, storage_path: &str) -> RepoResult<Photo>;
    /// Make an existing, unflagged photo the current one for its location.
    async fn set_current_photo(&self, photo_id: Id) -> RepoResult<Photo>;
    /// Clearing a flag also resets the photo's flag counter.
    async fn set_photo_flagged(&self, photo_id: Id, flagged: bool) -> RepoResult<Photo>;
}

#[async_trait]
pub trait ModerationRepo: Send + Sync {
    /// Append a flag and bump the counter. Crossing `threshold` on an
    /// unflagged photo hides it and enqueues a pending review event.
    async fn record_flag(&self, photo_id: Id, threshold: i32) -> RepoResult<FlagOutcome>;
    async fn list_auto_flags(&self, status: Option<ReviewStatus>) -> RepoResult<Vec<AutoFlagEvent>>;
    async fn get_auto_flag(&self, id: Id) -> RepoResult<AutoFlagEvent>;
    /// Conflict unless the event is still pending.
    async fn resolve_auto_flag(&self, id: Id, status: ReviewStatus) -> RepoResult<AutoFlagEvent>;
}

pub trait Repo: TownRepo + LocationRepo + PhotoRepo + ModerationRepo {}

impl<T> Repo for T where T: TownRepo + LocationRepo + PhotoRepo + ModerationRepo {}

/// Explicit slug if given, otherwise derived from the display name.
pub(crate) fn resolve_slug(explicit: Option<&str>, name: &str) -> RepoResult<String> {
    let s = slug::slugify(explicit.unwrap_or(name));
    if s.is_empty() {
        return Err(RepoError::Invalid("slug would be empty".into()));
    }
    Ok(s)
}

pub(crate) fn build_town(id: Id, new: NewTown) -> RepoResult<Town> {
    let slug = resolve_slug(new.slug.as_deref(), &new.name)?;
    Ok(Town {
        id,
        name: new.name.trim().to_string(),
        slug,
        is_active: true,
        created_at: chrono::Utc::now(),
    })
}

pub(crate) fn merge_town(current: &Town, upd: UpdateTown) -> RepoResult<Town> {
    let mut t = current.clone();
    if let Some(name) = upd.name { t.name = name.trim().to_string(); }
    if let Some(slug) = upd.slug { t.slug = resolve_slug(Some(&slug), &t.name)?; }
    if let Some(active) = upd.is_active { t.is_active = active; }
    Ok(t)
}

pub(crate) fn build_location(id: Id, new: NewLocation) -> RepoResult<Location> {
    if new.lat.is_some() != new.lng.is_some() {
        return Err(RepoError::Invalid("lat and lng must be set together".into()));
    }
    let slug = resolve_slug(new.slug.as_deref(), &new.name)?;
    let business_category = clean_category(new.business_category);
    let business_tags = normalize_tags(&new.business_tags);
    let profile_completed = Location::profile_is_complete(business_category.as_deref(), &business_tags);
    Ok(Location {
        id,
        town_id: new.town_id,
        name: new.name.trim().to_string(),
        slug,
        address: new.address.trim().to_string(),
        view_count: 0,
        is_active: true,
        business_category,
        business_tags,
        profile_completed,
        lat: new.lat,
        lng: new.lng,
        created_at: chrono::Utc::now(),
    })
}

pub(crate) fn merge_location(current: &Location, upd: UpdateLocation) -> RepoResult<Location> {
    let mut l = current.clone();
    if let Some(town_id) = upd.town_id { l.town_id = town_id; }
    if let Some(name) = upd.name { l.name = name.trim().to_string(); }
    if let Some(slug) = upd.slug { l.slug = resolve_slug(Some(&slug), &l.name)?; }
    if let Some(address) = upd.address { l.address = address.trim().to_string(); }
    if let Some(active) = upd.is_active { l.is_active = active; }
    if let Some(category) = upd.business_category { l.business_category = clean_category(category); }
    if let Some(tags) = upd.business_tags { l.business_tags = normalize_tags(&tags); }
    if let Some(lat) = upd.lat { l.lat = lat; }
    if let Some(lng) = upd.lng { l.lng = lng; }
    if l.lat.is_some() != l.lng.is_some() {
        return Err(RepoError::Invalid("lat and lng must be set together".into()));
    }
    l.profile_completed = Location::profile_is_complete(l.business_category.as_deref(), &l.business_tags);
    Ok(l)
}

fn clean_category(category: Option<String>) -> Option<String> {
    category.map(|c| c.trim().to_lowercase()).filter(|c| !c.is_empty())
}
