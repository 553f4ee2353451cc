use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::*;

#[derive(Default, Serialize, Deserialize)]
struct State {
    towns: HashMap<Id, Town>,
    locations: HashMap<Id, Location>,
    photos: HashMap<Id, Photo>,
    flags: HashMap<Id, Flag>,
    auto_flags: HashMap<Id, AutoFlagEvent>,
    next_id: Id,
}

impl State {
    fn next_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }

    fn slug_taken_in_town(&self, town_id: Id, slug: &str, except: Option<Id>) -> bool {
        self.locations
            .values()
            .any(|l| l.town_id == town_id && l.slug == slug && Some(l.id) != except)
    }

    fn photos_of(&self, location_id: Id) -> Vec<Photo> {
        let mut v: Vec<_> = self.photos.values().filter(|p| p.location_id == location_id).cloned().collect();
        // ids break ties between photos stored within the same clock tick
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        v
    }

    fn unset_current(&mut self, location_id: Id) {
        for p in self.photos.values_mut().filter(|p| p.location_id == location_id) {
            p.is_current = false;
        }
    }
}

/// Repository held entirely in memory, optionally mirrored to a JSON file
/// after every write so a development server survives restarts.
#[derive(Clone, Default)]
pub struct InMemRepo {
    state: Arc<RwLock<State>>,
    snapshot_path: Option<Arc<PathBuf>>,
}

impl InMemRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = Self::load_state_from(&path);
        Self { state: Arc::new(RwLock::new(state)), snapshot_path: Some(Arc::new(path)) }
    }

    fn load_state_from(path: &Path) -> State {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                Ok(s) => {
                    info!("loaded snapshot '{}'", path.display());
                    s
                }
                Err(e) => {
                    warn!("failed to parse snapshot '{}': {e}; starting empty", path.display());
                    State::default()
                }
            },
            Err(e) => {
                info!("no snapshot at '{}' ({e}); starting empty", path.display());
                State::default()
            }
        }
    }

    fn persist(&self) {
        let Some(path) = self.snapshot_path.as_deref() else { return };
        let encoded = match self.state.read() {
            Ok(s) => serde_json::to_vec_pretty(&*s),
            Err(_) => return,
        };
        match encoded {
            Ok(bytes) => {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(path, bytes) {
                    warn!("failed to write snapshot '{}': {e}", path.display());
                }
            }
            Err(e) => warn!("failed to encode snapshot: {e}"),
        }
    }

    fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }

    fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
    }
}

#[async_trait]
impl TownRepo for InMemRepo {
    async fn list_towns(&self, include_inactive: bool) -> RepoResult<Vec<Town>> {
        let s = self.read()?;
        let mut v: Vec<_> = s.towns.values().filter(|t| include_inactive || t.is_active).cloned().collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(v)
    }

    async fn get_town(&self, id: Id) -> RepoResult<Town> {
        self.read()?.towns.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn get_town_by_slug(&self, slug: &str) -> RepoResult<Town> {
        self.read()?.towns.values().find(|t| t.slug == slug).cloned().ok_or(RepoError::NotFound)
    }

    async fn create_town(&self, new: NewTown) -> RepoResult<Town> {
        let mut s = self.write()?;
        let id = s.next_id + 1;
        let town = build_town(id, new)?;
        if s.towns.values().any(|t| t.slug == town.slug) {
            return Err(RepoError::Conflict);
        }
        s.next_id = id;
        s.towns.insert(id, town.clone());
        drop(s);
        self.persist();
        Ok(town)
    }

    async fn update_town(&self, id: Id, upd: UpdateTown) -> RepoResult<Town> {
        let mut s = self.write()?;
        let current = s.towns.get(&id).ok_or(RepoError::NotFound)?;
        let updated = merge_town(current, upd)?;
        if s.towns.values().any(|t| t.slug == updated.slug && t.id != id) {
            return Err(RepoError::Conflict);
        }
        s.towns.insert(id, updated.clone());
        drop(s);
        self.persist();
        Ok(updated)
    }

    async fn delete_town(&self, id: Id) -> RepoResult<()> {
        let mut s = self.write()?;
        if !s.towns.contains_key(&id) {
            return Err(RepoError::NotFound);
        }
        if s.locations.values().any(|l| l.town_id == id) {
            return Err(RepoError::Conflict);
        }
        s.towns.remove(&id);
        drop(s);
        self.persist();
        Ok(())
    }
}

#[async_trait]
impl LocationRepo for InMemRepo {
    async fn list_locations(&self, town_id: Option<Id>, include_inactive: bool) -> RepoResult<Vec<Location>> {
        let s = self.read()?;
        let mut v: Vec<_> = s
            .locations
            .values()
            .filter(|l| town_id.map(|t| l.town_id == t).unwrap_or(true))
            .filter(|l| include_inactive || l.is_active)
            .cloned()
            .collect();
        v.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(v)
    }

    async fn get_location(&self, id: Id) -> RepoResult<Location> {
        self.read()?.locations.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn get_location_by_slugs(&self, town_slug: &str, location_slug: &str) -> RepoResult<(Town, Location)> {
        let s = self.read()?;
        let town = s.towns.values().find(|t| t.slug == town_slug).ok_or(RepoError::NotFound)?;
        let loc = s
            .locations
            .values()
            .find(|l| l.town_id == town.id && l.slug == location_slug)
            .ok_or(RepoError::NotFound)?;
        Ok((town.clone(), loc.clone()))
    }

    async fn create_location(&self, new: NewLocation) -> RepoResult<Location> {
        let mut s = self.write()?;
        if !s.towns.contains_key(&new.town_id) {
            return Err(RepoError::NotFound);
        }
        let id = s.next_id + 1;
        let loc = build_location(id, new)?;
        if s.slug_taken_in_town(loc.town_id, &loc.slug, None) {
            return Err(RepoError::Conflict);
        }
        s.next_id = id;
        s.locations.insert(id, loc.clone());
        drop(s);
        self.persist();
        Ok(loc)
    }

    async fn update_location(&self, id: Id, upd: UpdateLocation) -> RepoResult<Location> {
        let mut s = self.write()?;
        let current = s.locations.get(&id).ok_or(RepoError::NotFound)?;
        let updated = merge_location(current, upd)?;
        if !s.towns.contains_key(&updated.town_id) {
            return Err(RepoError::Invalid(format!("town {} does not exist", updated.town_id)));
        }
        if s.slug_taken_in_town(updated.town_id, &updated.slug, Some(id)) {
            return Err(RepoError::Conflict);
        }
        s.locations.insert(id, updated.clone());
        drop(s);
        self.persist();
        Ok(updated)
    }

    async fn delete_location(&self, id: Id) -> RepoResult<Vec<String>> {
        let mut s = self.write()?;
        if s.locations.remove(&id).is_none() {
            return Err(RepoError::NotFound);
        }
        let photo_ids: Vec<Id> = s.photos.values().filter(|p| p.location_id == id).map(|p| p.id).collect();
        let mut paths = Vec::with_capacity(photo_ids.len());
        for pid in &photo_ids {
            if let Some(p) = s.photos.remove(pid) {
                paths.push(p.storage_path);
            }
        }
        s.flags.retain(|_, f| !photo_ids.contains(&f.photo_id));
        s.auto_flags.retain(|_, e| e.location_id != id);
        drop(s);
        self.persist();
        Ok(paths)
    }

    async fn increment_view_count(&self, id: Id) -> RepoResult<i64> {
        let mut s = self.write()?;
        let loc = s.locations.get_mut(&id).ok_or(RepoError::NotFound)?;
        loc.view_count += 1;
        let count = loc.view_count;
        drop(s);
        self.persist();
        Ok(count)
    }
}

#[async_trait]
impl PhotoRepo for InMemRepo {
    async fn current_photo(&self, location_id: Id) -> RepoResult<Option<Photo>> {
        let s = self.read()?;
        Ok(s.photos.values().find(|p| p.location_id == location_id && p.is_public()).cloned())
    }

    async fn photo_history(&self, location_id: Id) -> RepoResult<Vec<Photo>> {
        let s = self.read()?;
        if !s.locations.contains_key(&location_id) {
            return Err(RepoError::NotFound);
        }
        Ok(s.photos_of(location_id))
    }

    async fn get_photo(&self, id: Id) -> RepoResult<Photo> {
        self.read()?.photos.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn photos_by_storage_path(&self, storage_path: &str) -> RepoResult<Vec<Photo>> {
        let s = self.read()?;
        Ok(s.photos.values().filter(|p| p.storage_path == storage_path).cloned().collect())
    }

    async fn replace_current_photo(&self, location_id: Id, storage_path: &str) -> RepoResult<Photo> {
        // both steps under one write guard
        let mut s = self.write()?;
        if !s.locations.contains_key(&location_id) {
            return Err(RepoError::NotFound);
        }
        s.unset_current(location_id);
        let id = s.next_id();
        let photo = Photo {
            id,
            location_id,
            storage_path: storage_path.to_string(),
            is_current: true,
            is_flagged: false,
            flag_count: 0,
            created_at: Utc::now(),
        };
        s.photos.insert(id, photo.clone());
        drop(s);
        self.persist();
        Ok(photo)
    }

    async fn set_current_photo(&self, photo_id: Id) -> RepoResult<Photo> {
        let mut s = self.write()?;
        let photo = s.photos.get(&photo_id).ok_or(RepoError::NotFound)?;
        if photo.is_flagged {
            return Err(RepoError::Invalid("a flagged photo cannot be made current".into()));
        }
        let location_id = photo.location_id;
        s.unset_current(location_id);
        let photo = s.photos.get_mut(&photo_id).ok_or(RepoError::NotFound)?;
        photo.is_current = true;
        let updated = photo.clone();
        drop(s);
        self.persist();
        Ok(updated)
    }

    async fn set_photo_flagged(&self, photo_id: Id, flagged: bool) -> RepoResult<Photo> {
        let mut s = self.write()?;
        let photo = s.photos.get_mut(&photo_id).ok_or(RepoError::NotFound)?;
        photo.is_flagged = flagged;
        if !flagged {
            photo.flag_count = 0;
        }
        let updated = photo.clone();
        drop(s);
        self.persist();
        Ok(updated)
    }
}

#[async_trait]
impl ModerationRepo for InMemRepo {
    async fn record_flag(&self, photo_id: Id, threshold: i32) -> RepoResult<FlagOutcome> {
        let mut s = self.write()?;
        if !s.photos.contains_key(&photo_id) {
            return Err(RepoError::NotFound);
        }
        let flag_id = s.next_id();
        s.flags.insert(flag_id, Flag { id: flag_id, photo_id, created_at: Utc::now() });

        let photo = s.photos.get_mut(&photo_id).ok_or(RepoError::NotFound)?;
        photo.flag_count += 1;
        let flag_count = photo.flag_count;
        let location_id = photo.location_id;
        let crossed = flag_count >= threshold && !photo.is_flagged;
        if crossed {
            photo.is_flagged = true;
            let event_id = s.next_id();
            s.auto_flags.insert(event_id, AutoFlagEvent {
                id: event_id,
                photo_id,
                location_id,
                flag_count,
                status: ReviewStatus::Pending,
                created_at: Utc::now(),
                resolved_at: None,
            });
        }
        drop(s);
        self.persist();
        Ok(FlagOutcome { photo_id, flag_count, auto_flagged: crossed })
    }

    async fn list_auto_flags(&self, status: Option<ReviewStatus>) -> RepoResult<Vec<AutoFlagEvent>> {
        let s = self.read()?;
        let mut v: Vec<_> = s
            .auto_flags
            .values()
            .filter(|e| status.map(|st| e.status == st).unwrap_or(true))
            .cloned()
            .collect();
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(v)
    }

    async fn get_auto_flag(&self, id: Id) -> RepoResult<AutoFlagEvent> {
        self.read()?.auto_flags.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn resolve_auto_flag(&self, id: Id, status: ReviewStatus) -> RepoResult<AutoFlagEvent> {
        let mut s = self.write()?;
        let event = s.auto_flags.get_mut(&id).ok_or(RepoError::NotFound)?;
        if event.status != ReviewStatus::Pending {
            return Err(RepoError::Conflict);
        }
        event.status = status;
        event.resolved_at = Some(Utc::now());
        let updated = event.clone();
        drop(s);
        self.persist();
        Ok(updated)
    }
}
