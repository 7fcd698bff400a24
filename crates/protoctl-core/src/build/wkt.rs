//! The well-known types bundled with the compiler.

use crate::storage::{MemBucket, ReadBucket};
use protox::file::{FileResolver, GoogleFileResolver};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Import paths of the bundled well-known types
pub const WKT_NAMES: &[&str] = &[
    "google/protobuf/any.proto",
    "google/protobuf/api.proto",
    "google/protobuf/descriptor.proto",
    "google/protobuf/duration.proto",
    "google/protobuf/empty.proto",
    "google/protobuf/field_mask.proto",
    "google/protobuf/source_context.proto",
    "google/protobuf/struct.proto",
    "google/protobuf/timestamp.proto",
    "google/protobuf/type.proto",
    "google/protobuf/wrappers.proto",
];

static WKT_BUCKET: OnceLock<Arc<MemBucket>> = OnceLock::new();

/// Returns true if `path` is a bundled well-known type
pub fn is_wkt(path: &str) -> bool {
    WKT_NAMES.contains(&path)
}

/// A bucket holding the source of every well-known type
pub fn wkt_bucket() -> Arc<dyn ReadBucket> {
    let bucket = WKT_BUCKET.get_or_init(|| {
        let resolver = GoogleFileResolver::new();
        let files = WKT_NAMES.iter().filter_map(|name| match resolver.open_file(name) {
            Ok(file) => Some((name.to_string(), file.source().unwrap_or_default().to_string())),
            Err(err) => {
                debug!("well-known type {} unavailable: {}", name, err);
                None
            }
        });
        Arc::new(MemBucket::from_files(files))
    });
    Arc::clone(bucket) as Arc<dyn ReadBucket>
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wkt_bucket_has_sources() {
        let bucket = wkt_bucket();
        let paths: Vec<String> = bucket.walk(".").unwrap().into_iter().map(|info| info.path).collect();
        assert_eq!(paths.len(), WKT_NAMES.len());
        let timestamp = bucket.get("google/protobuf/timestamp.proto").unwrap();
        assert!(String::from_utf8_lossy(&timestamp).contains("message Timestamp"));
        assert!(is_wkt("google/protobuf/empty.proto"));
        assert!(!is_wkt("acme/a.proto"));
    }
}
