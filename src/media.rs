use std::collections::HashSet;

use serde::Deserialize;

/// The two kinds of binary evidence attached to an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Video,
    Image,
}

impl MediaType {
    /// Name of the on-disk collection holding records of this type.
    pub fn collection(&self) -> &'static str {
        match self {
            MediaType::Video => "videos",
            MediaType::Image => "images",
        }
    }
}

/// Composite identifier of one binary evidence object. Two objects with the
/// same incident id and path but different media types are distinct entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub media_type: MediaType,
    pub incident_id: String,
    pub path: String,
}

impl CacheKey {
    pub fn new(media_type: MediaType, incident_id: &str, path: &str) -> Self {
        Self {
            media_type,
            incident_id: incident_id.to_string(),
            path: path.to_string(),
        }
    }
}

/// Read-only view of an incident's media references, as delivered by the
/// backend: an optional primary video plus the per-event capture paths.
/// Consumed only by preloading.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncidentDescriptor {
    pub primary_video: Option<String>,
    #[serde(default)]
    pub detected_events: Vec<DetectedEvent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetectedEvent {
    pub image_path: Option<String>,
    #[serde(default)]
    pub detected_elements_paths: Vec<String>,
}

impl IncidentDescriptor {
    /// Every image path referenced by the detected-event list: the scene
    /// capture plus the per-detection crops, deduplicated in order.
    pub fn referenced_image_paths(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();
        for event in &self.detected_events {
            for path in event.image_path.iter().chain(&event.detected_elements_paths) {
                if seen.insert(path.clone()) {
                    paths.push(path.clone());
                }
            }
        }
        paths
    }
}
