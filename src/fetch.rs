use async_trait::async_trait;
use bytes::Bytes;

use crate::error::FetchError;
use crate::media::MediaType;

/// Network-fetch collaborator: retrieves evidence bytes from the backend
/// given an incident id and a path. Any failure is opaque to the cache.
///
/// No timeout or cancellation is imposed at this layer; implementations are
/// expected to bound their own request time.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch_video(&self, incident_id: &str, path: &str) -> Result<Bytes, FetchError>;

    async fn fetch_image(&self, incident_id: &str, path: &str) -> Result<Bytes, FetchError>;

    async fn fetch(
        &self,
        media_type: MediaType,
        incident_id: &str,
        path: &str,
    ) -> Result<Bytes, FetchError> {
        match media_type {
            MediaType::Video => self.fetch_video(incident_id, path).await,
            MediaType::Image => self.fetch_image(incident_id, path).await,
        }
    }
}
