use bytes::Bytes;
use std::{collections::HashMap, sync::Mutex};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub content_type: String,
    pub bytes: Bytes,
}

/// Objects keyed by bucket and path. Buckets spring into existence on first upload.
#[derive(Default)]
pub struct ObjectStore {
    objects: Mutex<HashMap<(String, String), StoredObject>>,
}

impl ObjectStore {
    pub fn put(&self, bucket: &str, path: &str, object: StoredObject) -> bool {
        self.lock().insert((bucket.to_string(), path.to_string()), object).is_some()
    }

    pub fn get(&self, bucket: &str, path: &str) -> Option<StoredObject> { self.lock().get(&(bucket.to_string(), path.to_string())).cloned() }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), StoredObject>> { self.objects.lock().unwrap_or_else(|e| e.into_inner()) }
}
