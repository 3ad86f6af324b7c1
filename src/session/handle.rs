use std::collections::HashSet;

use bytes::Bytes;

/// Opaque, revocable reference to cached bytes, handed to a renderer so it
/// can display the object without copying it. Only the session cache creates
/// and revokes handles; callers may hold and compare them but a revoked
/// handle must not be rendered.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaHandle(u64);

impl MediaHandle {
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// The mechanism backing handles. A host embedding the cache can substitute
/// its own resource table (for example a renderer's object-URL registry).
pub trait HandleRegistry: Send + Sync {
    fn create(&mut self, data: &Bytes) -> MediaHandle;

    fn revoke(&mut self, handle: &MediaHandle);

    fn is_live(&self, handle: &MediaHandle) -> bool;
}

/// Default registry: hands out process-local ids and tracks which are live.
#[derive(Debug, Default)]
pub struct InProcessRegistry {
    next_id: u64,
    live: HashSet<u64>,
}

impl HandleRegistry for InProcessRegistry {
    fn create(&mut self, _data: &Bytes) -> MediaHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.live.insert(id);
        MediaHandle(id)
    }

    fn revoke(&mut self, handle: &MediaHandle) {
        self.live.remove(&handle.0);
    }

    fn is_live(&self, handle: &MediaHandle) -> bool {
        self.live.contains(&handle.0)
    }
}
