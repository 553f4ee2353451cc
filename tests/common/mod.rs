#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use pinboard::auth::{create_jwt, Accounts, Role};
use pinboard::models::{Location, NewLocation, NewTown, Town};
use pinboard::repo::inmem::InMemRepo;
use pinboard::repo::{LocationRepo, TownRepo};
use pinboard::storage::{ImageStore, ImageStoreError};
use pinboard::{AppConfig, AppState};

pub const JWT_SECRET: &str = "test-secret-must-be-32-bytes-long!!";
// pbkdf2_sha256 of "password"
pub const PASSWORD_HASH: &str = "pbkdf2_sha256$1000$pinboardtestsalt$THhmV5P05DX/b+wLqGlk1tTvO5EiXdX3P1w3sNUcG5s=";

// ---------------- In-memory Mock ImageStore (tests only) ----------------
#[derive(Default)]
pub struct MockImageStore {
    inner: Mutex<HashMap<String, (Vec<u8>, String)>>,
}

impl MockImageStore {
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.inner.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn get(&self, key: &str) -> Option<(Vec<u8>, String)> {
        self.inner.lock().unwrap().get(key).cloned()
    }
}

#[async_trait::async_trait]
impl ImageStore for MockImageStore {
    async fn save(&self, key: &str, mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError> {
        let mut map = self.inner.lock().unwrap();
        if map.contains_key(key) {
            return Err(ImageStoreError::Duplicate);
        }
        map.insert(key.to_string(), (bytes.to_vec(), mime.to_string()));
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<(Vec<u8>, String), ImageStoreError> {
        self.inner.lock().unwrap().get(key).cloned().ok_or(ImageStoreError::NotFound)
    }

    async fn delete(&self, key: &str) -> Result<(), ImageStoreError> {
        self.inner.lock().unwrap().remove(key);
        Ok(())
    }
}

pub struct Harness {
    pub state: AppState,
    pub repo: Arc<InMemRepo>,
    pub store: Arc<MockImageStore>,
}

pub fn harness() -> Harness {
    harness_with(AppConfig { public_base_url: "https://boards.test".into(), ..AppConfig::default() })
}

pub fn harness_with(config: AppConfig) -> Harness {
    std::env::set_var("JWT_SECRET", JWT_SECRET);
    let repo = Arc::new(InMemRepo::new());
    let store = Arc::new(MockImageStore::default());
    let accounts = Accounts::parse(&format!("admin:{PASSWORD_HASH}:admin,mod:{PASSWORD_HASH}:moderator"));
    let state = AppState::new(repo.clone(), store.clone()).with_config(config).with_accounts(accounts);
    Harness { state, repo, store }
}

pub fn admin_token() -> String {
    std::env::set_var("JWT_SECRET", JWT_SECRET);
    create_jwt("admin", vec![Role::Admin]).unwrap()
}

pub fn moderator_token() -> String {
    std::env::set_var("JWT_SECRET", JWT_SECRET);
    create_jwt("mod", vec![Role::Moderator]).unwrap()
}

pub fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {token}"))
}

pub async fn seed_board(repo: &InMemRepo, town: &str, name: &str) -> (Town, Location) {
    let town = match repo.get_town_by_slug(&slug::slugify(town)).await {
        Ok(t) => t,
        Err(_) => repo.create_town(NewTown { name: town.into(), slug: None }).await.unwrap(),
    };
    let location = repo
        .create_location(NewLocation {
            town_id: town.id,
            name: name.into(),
            slug: None,
            address: "1 High Street".into(),
            business_category: None,
            business_tags: vec![],
            lat: None,
            lng: None,
        })
        .await
        .unwrap();
    (town, location)
}

/// Solid colour JPEG of the given size.
pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 120, 40]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img).write_to(&mut out, image::ImageOutputFormat::Jpeg(90)).unwrap();
    out.into_inner()
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 200, 90, 255]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img).write_to(&mut out, image::ImageOutputFormat::Png).unwrap();
    out.into_inner()
}

// Helper to build a multipart body with provided bytes and filename
pub fn multipart(field: &str, file_name: &str, content_type: &str, bytes: &[u8]) -> (String, Vec<u8>) {
    let boundary = "pinboard-test-boundary";
    let mut body: Vec<u8> = Vec::new();
    let disp = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: {content_type}\r\n\r\n"
    );
    body.extend_from_slice(disp.as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}
