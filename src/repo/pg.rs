use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use super::*;

const TOWN_COLS: &str = "id, name, slug, is_active, created_at";
const LOCATION_COLS: &str = "id, town_id, name, slug, address, view_count, is_active, \
     business_category, business_tags, profile_completed, lat, lng, created_at";
const PHOTO_COLS: &str = "id, location_id, storage_path, is_current, is_flagged, flag_count, created_at";
const EVENT_COLS: &str = "id, photo_id, location_id, flag_count, status, created_at, resolved_at";

#[derive(Clone)]
pub struct PgRepo { pool: Pool<Postgres> }

impl PgRepo {
    pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn map_err(e: sqlx::Error) -> RepoError {
    match e {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("23505") => RepoError::Conflict, // unique_violation
            Some("23503") => RepoError::Conflict, // foreign_key_violation
            _ => RepoError::Internal(db.to_string()),
        },
        other => RepoError::Internal(other.to_string()),
    }
}

#[async_trait]
impl TownRepo for PgRepo {
    async fn list_towns(&self, include_inactive: bool) -> RepoResult<Vec<Town>> {
        let sql = format!("SELECT {TOWN_COLS} FROM towns WHERE is_active OR $1 ORDER BY name");
        sqlx::query_as::<_, Town>(&sql)
            .bind(include_inactive)
            .fetch_all(&self.pool).await.map_err(map_err)
    }

    async fn get_town(&self, id: Id) -> RepoResult<Town> {
        let sql = format!("SELECT {TOWN_COLS} FROM towns WHERE id = $1");
        sqlx::query_as::<_, Town>(&sql).bind(id).fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn get_town_by_slug(&self, slug: &str) -> RepoResult<Town> {
        let sql = format!("SELECT {TOWN_COLS} FROM towns WHERE slug = $1");
        sqlx::query_as::<_, Town>(&sql).bind(slug).fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn create_town(&self, new: NewTown) -> RepoResult<Town> {
        let town = build_town(0, new)?;
        let sql = format!("INSERT INTO towns (name, slug, is_active) VALUES ($1, $2, $3) RETURNING {TOWN_COLS}");
        sqlx::query_as::<_, Town>(&sql)
            .bind(&town.name).bind(&town.slug).bind(town.is_active)
            .fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn update_town(&self, id: Id, upd: UpdateTown) -> RepoResult<Town> {
        let current = self.get_town(id).await?;
        let t = merge_town(&current, upd)?;
        let sql = format!("UPDATE towns SET name = $2, slug = $3, is_active = $4 WHERE id = $1 RETURNING {TOWN_COLS}");
        sqlx::query_as::<_, Town>(&sql)
            .bind(id).bind(&t.name).bind(&t.slug).bind(t.is_active)
            .fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn delete_town(&self, id: Id) -> RepoResult<()> {
        let in_use: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM locations WHERE town_id = $1)")
            .bind(id)
            .fetch_one(&self.pool).await.map_err(map_err)?;
        if in_use {
            return Err(RepoError::Conflict);
        }
        let res = sqlx::query("DELETE FROM towns WHERE id = $1")
            .bind(id)
            .execute(&self.pool).await.map_err(map_err)?;
        if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
        Ok(())
    }
}

#[async_trait]
impl LocationRepo for PgRepo {
    async fn list_locations(&self, town_id: Option<Id>, include_inactive: bool) -> RepoResult<Vec<Location>> {
        let sql = format!(
            "SELECT {LOCATION_COLS} FROM locations \
             WHERE ($1::BIGINT IS NULL OR town_id = $1) AND (is_active OR $2) \
             ORDER BY name, id"
        );
        sqlx::query_as::<_, Location>(&sql)
            .bind(town_id).bind(include_inactive)
            .fetch_all(&self.pool).await.map_err(map_err)
    }

    async fn get_location(&self, id: Id) -> RepoResult<Location> {
        let sql = format!("SELECT {LOCATION_COLS} FROM locations WHERE id = $1");
        sqlx::query_as::<_, Location>(&sql).bind(id).fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn get_location_by_slugs(&self, town_slug: &str, location_slug: &str) -> RepoResult<(Town, Location)> {
        let town = self.get_town_by_slug(town_slug).await?;
        let sql = format!("SELECT {LOCATION_COLS} FROM locations WHERE town_id = $1 AND slug = $2");
        let loc = sqlx::query_as::<_, Location>(&sql)
            .bind(town.id).bind(location_slug)
            .fetch_one(&self.pool).await.map_err(map_err)?;
        Ok((town, loc))
    }

    async fn create_location(&self, new: NewLocation) -> RepoResult<Location> {
        self.get_town(new.town_id).await?;
        let l = build_location(0, new)?;
        let sql = format!(
            "INSERT INTO locations (town_id, name, slug, address, business_category, business_tags, \
             profile_completed, lat, lng) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9) RETURNING {LOCATION_COLS}"
        );
        sqlx::query_as::<_, Location>(&sql)
            .bind(l.town_id).bind(&l.name).bind(&l.slug).bind(&l.address)
            .bind(&l.business_category).bind(&l.business_tags).bind(l.profile_completed)
            .bind(l.lat).bind(l.lng)
            .fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn update_location(&self, id: Id, upd: UpdateLocation) -> RepoResult<Location> {
        let current = self.get_location(id).await?;
        let l = merge_location(&current, upd)?;
        if l.town_id != current.town_id {
            self.get_town(l.town_id).await.map_err(|e| match e {
                RepoError::NotFound => RepoError::Invalid(format!("town {} does not exist", l.town_id)),
                other => other,
            })?;
        }
        let sql = format!(
            "UPDATE locations SET town_id = $2, name = $3, slug = $4, address = $5, is_active = $6, \
             business_category = $7, business_tags = $8, profile_completed = $9, lat = $10, lng = $11 \
             WHERE id = $1 RETURNING {LOCATION_COLS}"
        );
        sqlx::query_as::<_, Location>(&sql)
            .bind(id).bind(l.town_id).bind(&l.name).bind(&l.slug).bind(&l.address).bind(l.is_active)
            .bind(&l.business_category).bind(&l.business_tags).bind(l.profile_completed)
            .bind(l.lat).bind(l.lng)
            .fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn delete_location(&self, id: Id) -> RepoResult<Vec<String>> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        let paths: Vec<String> = sqlx::query_scalar("SELECT storage_path FROM photos WHERE location_id = $1")
            .bind(id)
            .fetch_all(&mut *tx).await.map_err(map_err)?;
        // photos, flags and review events cascade
        let res = sqlx::query("DELETE FROM locations WHERE id = $1")
            .bind(id)
            .execute(&mut *tx).await.map_err(map_err)?;
        if res.rows_affected() == 0 { return Err(RepoError::NotFound); }
        tx.commit().await.map_err(map_err)?;
        Ok(paths)
    }

    async fn increment_view_count(&self, id: Id) -> RepoResult<i64> {
        let count: Option<i64> = sqlx::query_scalar("SELECT increment_view_count($1)")
            .bind(id)
            .fetch_one(&self.pool).await.map_err(map_err)?;
        count.ok_or(RepoError::NotFound)
    }
}

#[async_trait]
impl PhotoRepo for PgRepo {
    async fn current_photo(&self, location_id: Id) -> RepoResult<Option<Photo>> {
        let sql = format!(
            "SELECT {PHOTO_COLS} FROM photos WHERE location_id = $1 AND is_current AND NOT is_flagged \
             ORDER BY created_at DESC LIMIT 1"
        );
        sqlx::query_as::<_, Photo>(&sql).bind(location_id).fetch_optional(&self.pool).await.map_err(map_err)
    }

    async fn photo_history(&self, location_id: Id) -> RepoResult<Vec<Photo>> {
        self.get_location(location_id).await?;
        let sql = format!("SELECT {PHOTO_COLS} FROM photos WHERE location_id = $1 ORDER BY created_at DESC, id DESC");
        sqlx::query_as::<_, Photo>(&sql).bind(location_id).fetch_all(&self.pool).await.map_err(map_err)
    }

    async fn get_photo(&self, id: Id) -> RepoResult<Photo> {
        let sql = format!("SELECT {PHOTO_COLS} FROM photos WHERE id = $1");
        sqlx::query_as::<_, Photo>(&sql).bind(id).fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn photos_by_storage_path(&self, storage_path: &str) -> RepoResult<Vec<Photo>> {
        let sql = format!("SELECT {PHOTO_COLS} FROM photos WHERE storage_path = $1");
        sqlx::query_as::<_, Photo>(&sql).bind(storage_path).fetch_all(&self.pool).await.map_err(map_err)
    }

    async fn replace_current_photo(&self, location_id: Id, storage_path: &str) -> RepoResult<Photo> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        // row lock serialises concurrent uploads for the same location
        sqlx::query("SELECT id FROM locations WHERE id = $1 FOR UPDATE")
            .bind(location_id)
            .fetch_one(&mut *tx).await.map_err(map_err)?;
        sqlx::query("UPDATE photos SET is_current = FALSE WHERE location_id = $1 AND is_current")
            .bind(location_id)
            .execute(&mut *tx).await.map_err(map_err)?;
        let sql = format!(
            "INSERT INTO photos (location_id, storage_path, is_current) VALUES ($1, $2, TRUE) RETURNING {PHOTO_COLS}"
        );
        let photo = sqlx::query_as::<_, Photo>(&sql)
            .bind(location_id).bind(storage_path)
            .fetch_one(&mut *tx).await.map_err(map_err)?;
        tx.commit().await.map_err(map_err)?;
        Ok(photo)
    }

    async fn set_current_photo(&self, photo_id: Id) -> RepoResult<Photo> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        let sql = format!("SELECT {PHOTO_COLS} FROM photos WHERE id = $1 FOR UPDATE");
        let photo = sqlx::query_as::<_, Photo>(&sql).bind(photo_id).fetch_one(&mut *tx).await.map_err(map_err)?;
        if photo.is_flagged {
            return Err(RepoError::Invalid("a flagged photo cannot be made current".into()));
        }
        sqlx::query("UPDATE photos SET is_current = FALSE WHERE location_id = $1 AND is_current AND id <> $2")
            .bind(photo.location_id).bind(photo_id)
            .execute(&mut *tx).await.map_err(map_err)?;
        let sql = format!("UPDATE photos SET is_current = TRUE WHERE id = $1 RETURNING {PHOTO_COLS}");
        let updated = sqlx::query_as::<_, Photo>(&sql).bind(photo_id).fetch_one(&mut *tx).await.map_err(map_err)?;
        tx.commit().await.map_err(map_err)?;
        Ok(updated)
    }

    async fn set_photo_flagged(&self, photo_id: Id, flagged: bool) -> RepoResult<Photo> {
        let sql = format!(
            "UPDATE photos SET is_flagged = $2, flag_count = CASE WHEN $2 THEN flag_count ELSE 0 END \
             WHERE id = $1 RETURNING {PHOTO_COLS}"
        );
        sqlx::query_as::<_, Photo>(&sql).bind(photo_id).bind(flagged).fetch_one(&self.pool).await.map_err(map_err)
    }
}

#[async_trait]
impl ModerationRepo for PgRepo {
    async fn record_flag(&self, photo_id: Id, threshold: i32) -> RepoResult<FlagOutcome> {
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        let (location_id, already_flagged): (Id, bool) =
            sqlx::query_as("SELECT location_id, is_flagged FROM photos WHERE id = $1 FOR UPDATE")
                .bind(photo_id)
                .fetch_one(&mut *tx).await.map_err(map_err)?;
        sqlx::query("INSERT INTO flags (photo_id) VALUES ($1)")
            .bind(photo_id)
            .execute(&mut *tx).await.map_err(map_err)?;
        let flag_count: i32 = sqlx::query_scalar("SELECT increment_flag_count($1)")
            .bind(photo_id)
            .fetch_one(&mut *tx).await.map_err(map_err)?;
        let crossed = flag_count >= threshold && !already_flagged;
        if crossed {
            sqlx::query("UPDATE photos SET is_flagged = TRUE WHERE id = $1")
                .bind(photo_id)
                .execute(&mut *tx).await.map_err(map_err)?;
            sqlx::query("INSERT INTO auto_flag_events (photo_id, location_id, flag_count, status) VALUES ($1, $2, $3, 'pending')")
                .bind(photo_id).bind(location_id).bind(flag_count)
                .execute(&mut *tx).await.map_err(map_err)?;
        }
        tx.commit().await.map_err(map_err)?;
        Ok(FlagOutcome { photo_id, flag_count, auto_flagged: crossed })
    }

    async fn list_auto_flags(&self, status: Option<ReviewStatus>) -> RepoResult<Vec<AutoFlagEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLS} FROM auto_flag_events WHERE ($1::TEXT IS NULL OR status = $1) \
             ORDER BY created_at DESC, id DESC"
        );
        sqlx::query_as::<_, AutoFlagEvent>(&sql)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool).await.map_err(map_err)
    }

    async fn get_auto_flag(&self, id: Id) -> RepoResult<AutoFlagEvent> {
        let sql = format!("SELECT {EVENT_COLS} FROM auto_flag_events WHERE id = $1");
        sqlx::query_as::<_, AutoFlagEvent>(&sql).bind(id).fetch_one(&self.pool).await.map_err(map_err)
    }

    async fn resolve_auto_flag(&self, id: Id, status: ReviewStatus) -> RepoResult<AutoFlagEvent> {
        let sql = format!(
            "UPDATE auto_flag_events SET status = $2, resolved_at = now() \
             WHERE id = $1 AND status = 'pending' RETURNING {EVENT_COLS}"
        );
        let updated = sqlx::query_as::<_, AutoFlagEvent>(&sql)
            .bind(id).bind(status.as_str())
            .fetch_optional(&self.pool).await.map_err(map_err)?;
        match updated {
            Some(e) => Ok(e),
            // distinguish "already resolved" from "no such event"
            None => self.get_auto_flag(id).await.and(Err(RepoError::Conflict)),
        }
    }
}
