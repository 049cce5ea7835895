//! Media normalization pipeline: download → archive → transcribe/describe.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use charla_core::message::{MessageKind, NormalizedMessage};
use charla_core::provider::{Transcriber, VisionDescriber};

use crate::blob::BlobStore;
use crate::error::{MediaError, Result};

/// What media normalization produced for one inbound message.
#[derive(Debug, Default, Clone)]
pub struct MediaOutcome {
    /// Where the original bytes were archived, if download succeeded.
    pub archived_url: Option<String>,
    pub transcription: Option<String>,
    pub image_analysis: Option<String>,
}

pub struct MediaPipeline {
    http: reqwest::Client,
    blobs: Arc<dyn BlobStore>,
    transcriber: Option<Arc<dyn Transcriber>>,
    vision: Option<Arc<dyn VisionDescriber>>,
}

impl MediaPipeline {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        transcriber: Option<Arc<dyn Transcriber>>,
        vision: Option<Arc<dyn VisionDescriber>>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            blobs,
            transcriber,
            vision,
        }
    }

    /// Normalize one inbound media message.
    ///
    /// Downloads from `media_url` (with `bearer` auth for provider-hosted
    /// media), archives the bytes under the tenant bucket, then runs
    /// transcription for audio or description for images/video stills.
    ///
    /// Archiving failure is non-fatal (the platform URL remains on the
    /// message); transcription/vision provider errors bubble up so the
    /// debounce pipeline can retry the turn.
    pub async fn process(
        &self,
        bucket: &str,
        bearer: Option<&str>,
        msg: &NormalizedMessage,
    ) -> Result<MediaOutcome> {
        let mut outcome = MediaOutcome::default();
        let Some(media_url) = &msg.media_url else {
            return Ok(outcome);
        };
        if !msg.kind.is_media() {
            return Ok(outcome);
        }

        match self.download(media_url, bearer).await {
            Ok((bytes, content_type)) => {
                let path = archive_path(bucket, msg.kind, &content_type);
                match self.blobs.put(&path, &bytes, &content_type).await {
                    Ok(stored) => {
                        debug!(kind = msg.kind.as_str(), bytes = bytes.len(), %stored, "media archived");
                        outcome.archived_url = Some(stored);
                    }
                    Err(e) => warn!(error = %e, "media archive failed; keeping platform URL"),
                }
            }
            Err(e) => warn!(error = %e, url = %media_url, "media download failed; keeping platform URL"),
        }

        match msg.kind {
            MessageKind::Audio => {
                if let Some(transcriber) = &self.transcriber {
                    let text = transcriber.transcribe(media_url).await?;
                    outcome.transcription = Some(text);
                }
            }
            MessageKind::Image | MessageKind::Video => {
                if let Some(vision) = &self.vision {
                    let text = vision.describe(media_url).await?;
                    outcome.image_analysis = Some(text);
                }
            }
            _ => {}
        }

        Ok(outcome)
    }

    async fn download(&self, url: &str, bearer: Option<&str>) -> Result<(Vec<u8>, String)> {
        let mut req = self.http.get(url);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| MediaError::Download(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(MediaError::Download(format!(
                "HTTP {} from media host",
                resp.status().as_u16()
            )));
        }
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| MediaError::Download(e.to_string()))?;
        Ok((bytes.to_vec(), content_type))
    }
}

/// Bucket-relative archive path: `{bucket}/{yyyy}/{mm}/{kind}-{uuid}.{ext}`.
fn archive_path(bucket: &str, kind: MessageKind, content_type: &str) -> String {
    let now = Utc::now();
    let ext = extension_for(content_type);
    format!(
        "{}/{}/{}-{}.{}",
        bucket,
        now.format("%Y/%m"),
        kind.as_str(),
        Uuid::new_v4(),
        ext
    )
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type.split(';').next().unwrap_or("") {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "audio/ogg" => "ogg",
        "audio/mpeg" => "mp3",
        "audio/mp4" | "audio/aac" => "m4a",
        "video/mp4" => "mp4",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_path_is_bucket_scoped_and_dated() {
        let path = archive_path("acme-media", MessageKind::Audio, "audio/ogg");
        assert!(path.starts_with("acme-media/"));
        assert!(path.contains("/audio-"));
        assert!(path.ends_with(".ogg"));
    }

    #[test]
    fn extension_ignores_charset_suffix() {
        assert_eq!(extension_for("image/jpeg; charset=binary"), "jpg");
        assert_eq!(extension_for("application/x-unknown"), "bin");
    }
}
