//! Receiving a board photo: multipart read, transcode, content-addressed
//! save, then promotion to the location's current photo.
use actix_multipart::Multipart;
use actix_web::web;
use futures_util::TryStreamExt as _;
use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::error::ApiError;
use crate::imaging::{self, PipelineSettings, ProcessedImage, Upload};
use crate::models::{Location, Photo};
use crate::routes::AppState;
use crate::storage::{object_key, ImageStoreError};

/// The `file` part of a multipart upload.
#[derive(Debug)]
pub struct ReceivedFile {
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

impl ReceivedFile {
    pub fn as_upload(&self) -> Upload<'_> {
        Upload { bytes: &self.bytes, filename: self.filename.as_deref(), content_type: self.content_type.as_deref() }
    }
}

pub async fn read_file_field(mut payload: Multipart, limit: usize) -> Result<ReceivedFile, ApiError> {
    while let Some(mut field) = payload.try_next().await.map_err(|e| {
        error!("multipart error: {e}");
        ApiError::BadRequest("malformed multipart body".into())
    })? {
        if field.content_disposition().get_name() != Some("file") {
            continue;
        }
        let filename = field.content_disposition().get_filename().map(str::to_string);
        let content_type = field.content_type().map(|m| m.to_string());
        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(|e| {
            error!("stream read error: {e}");
            ApiError::BadRequest("upload interrupted".into())
        })? {
            if bytes.len() + chunk.len() > limit {
                return Err(ApiError::PayloadTooLarge);
            }
            bytes.extend_from_slice(&chunk);
        }
        if bytes.is_empty() {
            return Err(ApiError::BadRequest("empty file".into()));
        }
        return Ok(ReceivedFile { bytes, filename, content_type });
    }
    Err(ApiError::BadRequest("missing multipart field 'file'".into()))
}

/// Transcode on the blocking pool, save under a content hash and make the
/// result the location's current photo.
pub async fn store_board_photo(state: &AppState, location: &Location, file: ReceivedFile) -> Result<Photo, ApiError> {
    let settings = PipelineSettings::from(state.config.as_ref());
    let processed: ProcessedImage = web::block(move || imaging::process(file.as_upload(), settings))
        .await
        .map_err(|e| {
            error!("image worker failed: {e}");
            ApiError::Internal
        })??;

    let hash = hex::encode(Sha256::digest(&processed.bytes));
    let key = object_key(location.id, &hash);
    match state.image_store.save(&key, ProcessedImage::MIME, &processed.bytes).await {
        Ok(()) | Err(ImageStoreError::Duplicate) => {}
        Err(e) => return Err(e.into()),
    }

    let photo = state.repo.replace_current_photo(location.id, &key).await?;
    info!(
        location_id = location.id,
        photo_id = photo.id,
        width = processed.width,
        height = processed.height,
        heic = processed.converted_from_heic,
        "board photo stored"
    );
    Ok(photo)
}
