#![cfg(feature = "inmem-store")]

mod common;

use actix_web::{test, web, App};
use common::*;
use pinboard::config;
use pinboard::models::{NewLocation, UpdateLocation, UpdateTown};
use pinboard::repo::{LocationRepo, PhotoRepo, TownRepo};
use pinboard::storage::ImageStore;
use serde_json::Value;

#[actix_web::test]
async fn health_and_empty_towns() {
    let h = harness();
    let app = test::init_service(App::new().app_data(web::Data::new(h.state.clone())).configure(config)).await;

    let req = test::TestRequest::get().uri("/api/v1/health").to_request();
    let v: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(v["status"], "ok");

    let req = test::TestRequest::get().uri("/api/v1/towns").to_request();
    let v: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(v.as_array().unwrap().len(), 0);
}

#[actix_web::test]
async fn board_without_photo_then_upload_becomes_current() {
    let h = harness();
    let (town, loc) = seed_board(&h.repo, "Ashby", "Bean There").await;
    let app = test::init_service(App::new().app_data(web::Data::new(h.state.clone())).configure(config)).await;

    let board_uri = format!("/api/v1/boards/{}/{}", town.slug, loc.slug);
    let req = test::TestRequest::get().uri(&board_uri).to_request();
    let v: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(v["location"]["name"], "Bean There");
    assert!(v["photo"].is_null());

    let (ct, body) = multipart("file", "board.jpg", "image/jpeg", &jpeg(64, 48));
    let req = test::TestRequest::post()
        .uri(&format!("{board_uri}/photo"))
        .insert_header(("Content-Type", ct))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let first: Value = test::read_body_json(resp).await;
    let key = first["photo"]["storage_path"].as_str().unwrap().to_string();
    assert!(key.starts_with(&format!("locations/{}/", loc.id)));
    assert!(key.ends_with(".jpg"));
    assert_eq!(first["photo_url"], format!("https://boards.test/photos/{key}"));
    assert_eq!(h.store.get(&key).unwrap().1, "image/jpeg");

    // a second, different photo supersedes the first
    let (ct, body) = multipart("file", "board2.png", "image/png", &png(30, 30));
    let req = test::TestRequest::post()
        .uri(&format!("{board_uri}/photo"))
        .insert_header(("Content-Type", ct))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let second: Value = test::read_body_json(resp).await;

    let history = h.repo.photo_history(loc.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history.iter().filter(|p| p.is_current).count(), 1);
    assert_eq!(history[0].id, second["photo"]["id"].as_i64().unwrap());
    assert!(!history[1].is_current);

    let req = test::TestRequest::get().uri(&board_uri).to_request();
    let v: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(v["photo"]["id"], second["photo"]["id"]);

    // superseded photos leave the public URL space
    let req = test::TestRequest::get().uri(&format!("/photos/{key}")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
    let second_key = second["photo"]["storage_path"].as_str().unwrap();
    let req = test::TestRequest::get().uri(&format!("/photos/{second_key}")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
}

#[actix_web::test]
async fn oversized_images_are_bounded_and_served_as_jpeg() {
    let h = harness();
    let (town, loc) = seed_board(&h.repo, "Ashby", "Big Board").await;
    let app = test::init_service(App::new().app_data(web::Data::new(h.state.clone())).configure(config)).await;

    let (ct, body) = multipart("file", "wide.png", "image/png", &png(3000, 750));
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/boards/{}/{}/photo", town.slug, loc.slug))
        .insert_header(("Content-Type", ct))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let v: Value = test::read_body_json(resp).await;
    let key = v["photo"]["storage_path"].as_str().unwrap();

    let req = test::TestRequest::get().uri(&format!("/photos/{key}")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("content-type").unwrap(), "image/jpeg");
    let bytes = test::read_body(resp).await;
    let img = image::load_from_memory(&bytes).unwrap();
    assert_eq!((img.width(), img.height()), (2048, 512));
}

#[actix_web::test]
async fn upload_rejections() {
    let h = harness_with(pinboard::AppConfig { max_upload_bytes: 64 * 1024, ..Default::default() });
    let (town, loc) = seed_board(&h.repo, "Ashby", "Strict").await;
    let app = test::init_service(App::new().app_data(web::Data::new(h.state.clone())).configure(config)).await;
    let uri = format!("/api/v1/boards/{}/{}/photo", town.slug, loc.slug);

    // not an image
    let (ct, body) = multipart("file", "notes.txt", "text/plain", b"just some words");
    let req = test::TestRequest::post().uri(&uri).insert_header(("Content-Type", ct)).set_payload(body).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 415);

    // wrong field name
    let (ct, body) = multipart("picture", "board.jpg", "image/jpeg", &jpeg(8, 8));
    let req = test::TestRequest::post().uri(&uri).insert_header(("Content-Type", ct)).set_payload(body).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    // over the byte limit
    let (ct, body) = multipart("file", "huge.bin", "image/jpeg", &vec![0xFFu8; 70 * 1024]);
    let req = test::TestRequest::post().uri(&uri).insert_header(("Content-Type", ct)).set_payload(body).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 413);

    // unknown board
    let (ct, body) = multipart("file", "board.jpg", "image/jpeg", &jpeg(8, 8));
    let req = test::TestRequest::post()
        .uri("/api/v1/boards/ashby/nowhere/photo")
        .insert_header(("Content-Type", ct))
        .set_payload(body)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    assert!(h.store.keys().is_empty());
}

#[cfg(not(feature = "heic"))]
#[actix_web::test]
async fn heic_needs_the_heic_feature() {
    let h = harness();
    let (town, loc) = seed_board(&h.repo, "Ashby", "Phone Shop").await;
    let app = test::init_service(App::new().app_data(web::Data::new(h.state.clone())).configure(config)).await;

    let mut heic = vec![0x00, 0x00, 0x00, 0x18];
    heic.extend_from_slice(b"ftypheic\0\0\0\0mif1heic");
    let (ct, body) = multipart("file", "IMG_0001.HEIC", "image/heic", &heic);
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/boards/{}/{}/photo", town.slug, loc.slug))
        .insert_header(("Content-Type", ct))
        .set_payload(body)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 415);
}

#[actix_web::test]
async fn inactive_boards_are_hidden() {
    let h = harness();
    let (town, loc) = seed_board(&h.repo, "Ashby", "Closed Cafe").await;
    let (_, open) = seed_board(&h.repo, "Ashby", "Open Cafe").await;
    h.repo
        .update_location(loc.id, UpdateLocation { is_active: Some(false), ..Default::default() })
        .await
        .unwrap();
    let app = test::init_service(App::new().app_data(web::Data::new(h.state.clone())).configure(config)).await;

    let req = test::TestRequest::get().uri(&format!("/api/v1/boards/{}/{}", town.slug, loc.slug)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    let req = test::TestRequest::post().uri(&format!("/api/v1/locations/{}/view", loc.id)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    let req = test::TestRequest::get().uri(&format!("/api/v1/towns/{}/locations", town.slug)).to_request();
    let v: Value = test::call_and_read_body_json(&app, req).await;
    let ids: Vec<i64> = v.as_array().unwrap().iter().map(|l| l["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![open.id]);

    let key = format!("locations/{}/open.jpg", open.id);
    h.store.save(&key, "image/jpeg", &jpeg(8, 8)).await.unwrap();
    let photo = h.repo.replace_current_photo(open.id, &key).await.unwrap();
    let req = test::TestRequest::get().uri(&format!("/photos/{key}")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    // hiding the town hides everything under it
    h.repo.update_town(town.id, UpdateTown { is_active: Some(false), ..Default::default() }).await.unwrap();
    let req = test::TestRequest::get().uri(&format!("/api/v1/boards/{}/{}", town.slug, open.slug)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
    let req = test::TestRequest::get().uri("/api/v1/locations").to_request();
    let v: Value = test::call_and_read_body_json(&app, req).await;
    assert!(v.as_array().unwrap().is_empty());
    let req = test::TestRequest::post().uri(&format!("/api/v1/locations/{}/view", open.id)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
    let req = test::TestRequest::post().uri(&format!("/api/v1/photos/{}/flag", photo.id)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
    assert_eq!(h.repo.get_photo(photo.id).await.unwrap().flag_count, 0);
    let req = test::TestRequest::get().uri(&format!("/photos/{key}")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
async fn views_are_counted() {
    let h = harness();
    let (_, loc) = seed_board(&h.repo, "Ashby", "Counter").await;
    let app = test::init_service(App::new().app_data(web::Data::new(h.state.clone())).configure(config)).await;

    for expected in 1..=3 {
        let req = test::TestRequest::post().uri(&format!("/api/v1/locations/{}/view", loc.id)).to_request();
        let v: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(v["view_count"], expected);
    }
    assert_eq!(h.repo.get_location(loc.id).await.unwrap().view_count, 3);
}

#[actix_web::test]
async fn flagging_to_threshold_hides_the_photo() {
    let h = harness();
    let (town, loc) = seed_board(&h.repo, "Ashby", "Flaggable").await;
    let key = format!("locations/{}/abc.jpg", loc.id);
    h.store.save(&key, "image/jpeg", &jpeg(8, 8)).await.unwrap();
    let photo = h.repo.replace_current_photo(loc.id, &key).await.unwrap();
    let app = test::init_service(App::new().app_data(web::Data::new(h.state.clone())).configure(config)).await;

    let req = test::TestRequest::get().uri(&format!("/photos/{key}")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert!(!resp.headers().get("cache-control").unwrap().to_str().unwrap().contains("immutable"));

    for expected in 1..=2 {
        let req = test::TestRequest::post().uri(&format!("/api/v1/photos/{}/flag", photo.id)).to_request();
        let v: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(v["flag_count"], expected);
        assert_eq!(v["auto_flagged"], false);
    }
    let req = test::TestRequest::post().uri(&format!("/api/v1/photos/{}/flag", photo.id)).to_request();
    let v: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(v["auto_flagged"], true);

    let req = test::TestRequest::get().uri(&format!("/api/v1/boards/{}/{}", town.slug, loc.slug)).to_request();
    let v: Value = test::call_and_read_body_json(&app, req).await;
    assert!(v["photo"].is_null());

    // the stored object goes with it, except for the dashboard
    let req = test::TestRequest::get().uri(&format!("/photos/{key}")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
    let req = test::TestRequest::get()
        .uri(&format!("/photos/{key}"))
        .insert_header(bearer(&moderator_token()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("cache-control").unwrap(), "private, no-store");

    let req = test::TestRequest::post().uri("/api/v1/photos/999999/flag").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
async fn location_search_filters() {
    let h = harness();
    let ashby = h.repo.create_town(pinboard::models::NewTown { name: "Ashby".into(), slug: None }).await.unwrap();
    let brill = h.repo.create_town(pinboard::models::NewTown { name: "Brill".into(), slug: None }).await.unwrap();
    let mk = |town_id, name: &str, category: &str, tags: &[&str], coords: Option<(f64, f64)>| NewLocation {
        town_id,
        name: name.into(),
        slug: None,
        address: "Market Square".into(),
        business_category: Some(category.into()),
        business_tags: tags.iter().map(|t| t.to_string()).collect(),
        lat: coords.map(|c| c.0),
        lng: coords.map(|c| c.1),
    };
    h.repo.create_location(mk(ashby.id, "Bean There", "Coffee", &["WiFi", "vegan"], Some((52.0, -1.0)))).await.unwrap();
    h.repo.create_location(mk(ashby.id, "Book Nook", "Books", &["wifi"], None)).await.unwrap();
    h.repo.create_location(mk(brill.id, "Brill Bakery", "Bakery", &["vegan"], Some((51.8, -1.05)))).await.unwrap();
    let app = test::init_service(App::new().app_data(web::Data::new(h.state.clone())).configure(config)).await;

    let names = |v: Value| -> Vec<String> {
        let mut n: Vec<String> = v.as_array().unwrap().iter().map(|l| l["name"].as_str().unwrap().to_string()).collect();
        n.sort();
        n
    };

    let req = test::TestRequest::get().uri("/api/v1/locations?town=ashby").to_request();
    assert_eq!(names(test::call_and_read_body_json(&app, req).await), vec!["Bean There", "Book Nook"]);

    let req = test::TestRequest::get().uri("/api/v1/locations?tag=wifi,vegan").to_request();
    assert_eq!(names(test::call_and_read_body_json(&app, req).await), vec!["Bean There"]);

    let req = test::TestRequest::get().uri("/api/v1/locations?category=coffee").to_request();
    assert_eq!(names(test::call_and_read_body_json(&app, req).await), vec!["Bean There"]);

    let req = test::TestRequest::get().uri("/api/v1/locations?q=bakery").to_request();
    assert_eq!(names(test::call_and_read_body_json(&app, req).await), vec!["Brill Bakery"]);

    let req = test::TestRequest::get().uri("/api/v1/locations?with_coordinates=true").to_request();
    assert_eq!(names(test::call_and_read_body_json(&app, req).await), vec!["Bean There", "Brill Bakery"]);
}

#[actix_web::test]
async fn map_clusters_group_by_zoom() {
    let h = harness();
    let town = h.repo.create_town(pinboard::models::NewTown { name: "Ashby".into(), slug: None }).await.unwrap();
    for (i, (lat, lng)) in [(52.0, -1.0), (52.0004, -1.0004), (48.85, 2.35)].into_iter().enumerate() {
        h.repo
            .create_location(NewLocation {
                town_id: town.id,
                name: format!("Shop {i}"),
                slug: None,
                address: String::new(),
                business_category: None,
                business_tags: vec![],
                lat: Some(lat),
                lng: Some(lng),
            })
            .await
            .unwrap();
    }
    let app = test::init_service(App::new().app_data(web::Data::new(h.state.clone())).configure(config)).await;

    let req = test::TestRequest::get()
        .uri("/api/v1/map/clusters?min_lat=40&min_lng=-5&max_lat=60&max_lng=5&zoom=4")
        .to_request();
    let v: Value = test::call_and_read_body_json(&app, req).await;
    let markers = v.as_array().unwrap();
    assert_eq!(markers.len(), 2);
    let cluster = markers.iter().find(|m| m["kind"] == "cluster").unwrap();
    assert_eq!(cluster["count"], 2);

    let req = test::TestRequest::get()
        .uri("/api/v1/map/clusters?min_lat=40&min_lng=-5&max_lat=60&max_lng=5&zoom=19")
        .to_request();
    let v: Value = test::call_and_read_body_json(&app, req).await;
    assert!(v.as_array().unwrap().iter().all(|m| m["kind"] == "point"));

    let req = test::TestRequest::get()
        .uri("/api/v1/map/clusters?min_lat=60&min_lng=-5&max_lat=40&max_lng=5&zoom=4")
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}
