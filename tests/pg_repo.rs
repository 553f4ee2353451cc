#![cfg(feature = "postgres-store")]

// Runs only when DATABASE_URL points at a disposable Postgres database.

use pinboard::models::{NewLocation, NewTown, ReviewStatus};
use pinboard::repo::pg::PgRepo;
use pinboard::repo::{LocationRepo, ModerationRepo, PhotoRepo, RepoError, TownRepo};
use sqlx::postgres::PgPoolOptions;

async fn repo() -> Option<PgRepo> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(u) => u,
        Err(_) => {
            eprintln!("skipping: DATABASE_URL not set");
            return None;
        }
    };
    let pool = PgPoolOptions::new().max_connections(2).connect(&url).await.ok()?;
    let repo = PgRepo::new(pool);
    repo.migrate().await.unwrap();
    Some(repo)
}

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}

#[tokio::test]
#[serial_test::serial]
async fn pg_board_lifecycle() {
    let Some(r) = repo().await else { return };

    let town = r.create_town(NewTown { name: unique("Town"), slug: None }).await.unwrap();
    let loc = r
        .create_location(NewLocation {
            town_id: town.id,
            name: "Bean There".into(),
            slug: None,
            address: "1 Square".into(),
            business_category: Some("Coffee".into()),
            business_tags: vec!["WiFi".into()],
            lat: Some(52.0),
            lng: Some(-1.0),
        })
        .await
        .unwrap();
    assert!(loc.profile_completed);
    assert_eq!(loc.business_tags, vec!["wifi"]);

    let (_, found) = r.get_location_by_slugs(&town.slug, "bean-there").await.unwrap();
    assert_eq!(found.id, loc.id);
    assert_eq!(r.increment_view_count(loc.id).await.unwrap(), 1);

    let first = r.replace_current_photo(loc.id, &format!("locations/{}/a.jpg", loc.id)).await.unwrap();
    let second = r.replace_current_photo(loc.id, &format!("locations/{}/b.jpg", loc.id)).await.unwrap();
    assert!(!r.get_photo(first.id).await.unwrap().is_current);
    assert_eq!(r.current_photo(loc.id).await.unwrap().unwrap().id, second.id);

    for _ in 0..2 {
        assert!(!r.record_flag(second.id, 3).await.unwrap().auto_flagged);
    }
    let out = r.record_flag(second.id, 3).await.unwrap();
    assert!(out.auto_flagged);
    assert_eq!(out.flag_count, 3);
    assert!(r.current_photo(loc.id).await.unwrap().is_none());

    let event = r
        .list_auto_flags(Some(ReviewStatus::Pending))
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.photo_id == second.id)
        .unwrap();
    r.set_current_photo(first.id).await.unwrap();
    r.resolve_auto_flag(event.id, ReviewStatus::Reverted).await.unwrap();
    assert!(matches!(r.resolve_auto_flag(event.id, ReviewStatus::Approved).await, Err(RepoError::Conflict)));
    assert_eq!(r.current_photo(loc.id).await.unwrap().unwrap().id, first.id);

    assert!(matches!(r.delete_town(town.id).await, Err(RepoError::Conflict)));
    let keys = r.delete_location(loc.id).await.unwrap();
    assert_eq!(keys.len(), 2);
    r.delete_town(town.id).await.unwrap();
}
