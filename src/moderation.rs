//! Community flagging and the review queue that follows an auto-flag.
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::models::{AutoFlagEvent, FlagOutcome, Id, Photo, ReviewStatus};
use crate::repo::{Repo, RepoError, RepoResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    /// The photo is acceptable; unhide it and reset its counter.
    Approve,
    /// Keep the photo hidden and fall back to an earlier one.
    Revert,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ReviewRequest {
    pub action: ReviewAction,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReviewOutcome {
    pub event: AutoFlagEvent,
    /// What the public now sees for the location.
    pub current_photo: Option<Photo>,
}

/// Public flag on a photo. Photos of hidden locations or towns are not
/// flaggable.
pub async fn flag_photo(repo: &dyn Repo, photo_id: Id, threshold: i32) -> RepoResult<FlagOutcome> {
    let photo = repo.get_photo(photo_id).await?;
    let location = repo.get_location(photo.location_id).await?;
    let town = repo.get_town(location.town_id).await?;
    if !location.is_active || !town.is_active {
        return Err(RepoError::NotFound);
    }
    let outcome = repo.record_flag(photo_id, threshold).await?;
    if outcome.auto_flagged {
        info!(photo_id, location_id = location.id, flag_count = outcome.flag_count, "photo auto-flagged");
    }
    Ok(outcome)
}

pub async fn review_auto_flag(repo: &dyn Repo, event_id: Id, action: ReviewAction) -> RepoResult<ReviewOutcome> {
    let event = repo.get_auto_flag(event_id).await?;
    if event.status != ReviewStatus::Pending {
        return Err(RepoError::Conflict);
    }

    let status = match action {
        ReviewAction::Approve => {
            repo.set_photo_flagged(event.photo_id, false).await?;
            ReviewStatus::Approved
        }
        ReviewAction::Revert => {
            let photo = repo.set_photo_flagged(event.photo_id, true).await?;
            // a newer upload may already have replaced the flagged photo
            if photo.is_current {
                let history = repo.photo_history(event.location_id).await?;
                let fallback = newest_unflagged_before(history, Some(&photo));
                match fallback {
                    Some(prev) => {
                        repo.set_current_photo(prev.id).await?;
                    }
                    None => info!(location_id = event.location_id, "no earlier photo to fall back to"),
                }
            }
            ReviewStatus::Reverted
        }
    };

    let event = repo.resolve_auto_flag(event_id, status).await?;
    info!(event_id, photo_id = event.photo_id, status = status.as_str(), "auto-flag reviewed");
    let current_photo = repo.current_photo(event.location_id).await?;
    Ok(ReviewOutcome { event, current_photo })
}

/// Manual rollback. With `photo_id` that photo becomes current; otherwise the
/// newest unflagged photo older than the current one.
pub async fn revert_location(repo: &dyn Repo, location_id: Id, photo_id: Option<Id>) -> RepoResult<Photo> {
    repo.get_location(location_id).await?;
    let target = match photo_id {
        Some(id) => {
            let photo = repo.get_photo(id).await?;
            if photo.location_id != location_id {
                return Err(RepoError::NotFound);
            }
            photo
        }
        None => {
            let history = repo.photo_history(location_id).await?;
            let current = history.iter().find(|p| p.is_current).cloned();
            newest_unflagged_before(history, current.as_ref()).ok_or(RepoError::NotFound)?
        }
    };
    let photo = repo.set_current_photo(target.id).await?;
    info!(location_id, photo_id = photo.id, "location reverted");
    Ok(photo)
}

/// Upload order is `(created_at, id)`; ids break ties within one timestamp.
fn newest_unflagged_before(history: Vec<Photo>, before: Option<&Photo>) -> Option<Photo> {
    history
        .into_iter()
        .filter(|p| !p.is_flagged)
        .filter(|p| before.map_or(true, |b| (p.created_at, p.id) < (b.created_at, b.id)))
        .max_by_key(|p| (p.created_at, p.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewLocation, NewTown, UpdateTown};
    use crate::repo::inmem::InMemRepo;
    use crate::repo::{LocationRepo, ModerationRepo, PhotoRepo, TownRepo};

    async fn seeded() -> (InMemRepo, Id) {
        let repo = InMemRepo::new();
        let town = repo.create_town(NewTown { name: "Ashby".into(), slug: None }).await.unwrap();
        let loc = repo
            .create_location(NewLocation {
                town_id: town.id,
                name: "Bean There".into(),
                slug: None,
                address: String::new(),
                business_category: None,
                business_tags: vec![],
                lat: None,
                lng: None,
            })
            .await
            .unwrap();
        (repo, loc.id)
    }

    #[actix_rt::test]
    async fn threshold_hides_photo_and_queues_one_event() {
        let (repo, loc) = seeded().await;
        let photo = repo.replace_current_photo(loc, "locations/1/a.jpg").await.unwrap();

        for expected in 1..=4 {
            let out = flag_photo(&repo, photo.id, 3).await.unwrap();
            assert_eq!(out.flag_count, expected);
            assert_eq!(out.auto_flagged, expected == 3);
        }
        assert!(repo.current_photo(loc).await.unwrap().is_none());
        assert_eq!(repo.list_auto_flags(Some(ReviewStatus::Pending)).await.unwrap().len(), 1);
    }

    #[actix_rt::test]
    async fn revert_review_falls_back_to_previous_photo() {
        let (repo, loc) = seeded().await;
        let first = repo.replace_current_photo(loc, "locations/1/a.jpg").await.unwrap();
        let second = repo.replace_current_photo(loc, "locations/1/b.jpg").await.unwrap();
        for _ in 0..3 {
            flag_photo(&repo, second.id, 3).await.unwrap();
        }
        let event = repo.list_auto_flags(None).await.unwrap().remove(0);

        let out = review_auto_flag(&repo, event.id, ReviewAction::Revert).await.unwrap();
        assert_eq!(out.event.status, ReviewStatus::Reverted);
        assert_eq!(out.current_photo.map(|p| p.id), Some(first.id));
        assert!(repo.get_photo(second.id).await.unwrap().is_flagged);

        let again = review_auto_flag(&repo, event.id, ReviewAction::Approve).await;
        assert!(matches!(again, Err(RepoError::Conflict)));
    }

    #[actix_rt::test]
    async fn approve_review_restores_photo() {
        let (repo, loc) = seeded().await;
        let photo = repo.replace_current_photo(loc, "locations/1/a.jpg").await.unwrap();
        for _ in 0..3 {
            flag_photo(&repo, photo.id, 3).await.unwrap();
        }
        let event = repo.list_auto_flags(None).await.unwrap().remove(0);

        let out = review_auto_flag(&repo, event.id, ReviewAction::Approve).await.unwrap();
        assert_eq!(out.event.status, ReviewStatus::Approved);
        let shown = out.current_photo.unwrap();
        assert_eq!(shown.id, photo.id);
        assert_eq!(shown.flag_count, 0);
    }

    #[actix_rt::test]
    async fn revert_review_never_restores_a_newer_photo() {
        let (repo, loc) = seeded().await;
        let a = repo.replace_current_photo(loc, "locations/1/a.jpg").await.unwrap();
        let b = repo.replace_current_photo(loc, "locations/1/b.jpg").await.unwrap();
        repo.replace_current_photo(loc, "locations/1/c.jpg").await.unwrap();
        // moderator rolls back past c, then b draws flags
        revert_location(&repo, loc, Some(b.id)).await.unwrap();
        for _ in 0..3 {
            flag_photo(&repo, b.id, 3).await.unwrap();
        }
        let event = repo.list_auto_flags(Some(ReviewStatus::Pending)).await.unwrap().remove(0);

        let out = review_auto_flag(&repo, event.id, ReviewAction::Revert).await.unwrap();
        assert_eq!(out.current_photo.map(|p| p.id), Some(a.id));
    }

    #[actix_rt::test]
    async fn revert_review_of_the_oldest_photo_leaves_board_empty() {
        let (repo, loc) = seeded().await;
        let a = repo.replace_current_photo(loc, "locations/1/a.jpg").await.unwrap();
        repo.replace_current_photo(loc, "locations/1/b.jpg").await.unwrap();
        revert_location(&repo, loc, Some(a.id)).await.unwrap();
        for _ in 0..3 {
            flag_photo(&repo, a.id, 3).await.unwrap();
        }
        let event = repo.list_auto_flags(None).await.unwrap().remove(0);

        let out = review_auto_flag(&repo, event.id, ReviewAction::Revert).await.unwrap();
        assert!(out.current_photo.is_none());
    }

    #[actix_rt::test]
    async fn photos_in_hidden_towns_cannot_be_flagged() {
        let (repo, loc) = seeded().await;
        let photo = repo.replace_current_photo(loc, "locations/1/a.jpg").await.unwrap();
        let town_id = repo.get_location(loc).await.unwrap().town_id;
        repo.update_town(town_id, UpdateTown { is_active: Some(false), ..Default::default() }).await.unwrap();

        assert!(matches!(flag_photo(&repo, photo.id, 3).await, Err(RepoError::NotFound)));
        assert_eq!(repo.get_photo(photo.id).await.unwrap().flag_count, 0);
    }

    #[actix_rt::test]
    async fn manual_revert_skips_flagged_photos() {
        let (repo, loc) = seeded().await;
        let a = repo.replace_current_photo(loc, "locations/1/a.jpg").await.unwrap();
        let b = repo.replace_current_photo(loc, "locations/1/b.jpg").await.unwrap();
        repo.replace_current_photo(loc, "locations/1/c.jpg").await.unwrap();
        repo.set_photo_flagged(b.id, true).await.unwrap();

        let now = revert_location(&repo, loc, None).await.unwrap();
        assert_eq!(now.id, a.id);
        assert!(revert_location(&repo, loc, Some(b.id)).await.is_err());
    }
}
