//! Packaging of collector output into a `.tar.zst` archive.
//!
//! Layout:
//!
//! ```text
//! support-bundle/
//! ├── manifest.json
//! └── <collector>/<filename>
//! ```

use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CollectorFailure;
use crate::registry::SupportItem;

/// Root directory inside the archive.
pub const ROOT: &str = "support-bundle";

const ZSTD_LEVEL: i32 = 3;

/// Describes the archive contents. Written as `support-bundle/manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleManifest {
    pub uid: String,
    pub created_at: DateTime<Utc>,
    pub generator: String,
    pub collectors: Vec<String>,
    pub failures: Vec<CollectorFailure>,
}

/// Build the compressed archive for `items`, keyed by collector uid.
pub fn write_archive(
    manifest: &BundleManifest,
    items: &[(String, SupportItem)],
) -> std::io::Result<Vec<u8>> {
    let encoder = zstd::Encoder::new(Vec::new(), ZSTD_LEVEL)?;
    let mut builder = tar::Builder::new(encoder);
    let mtime = manifest.created_at.timestamp().max(0) as u64;

    let manifest_bytes = serde_json::to_vec_pretty(manifest)?;
    append(&mut builder, &format!("{}/manifest.json", ROOT), &manifest_bytes, mtime)?;

    for (collector, item) in items {
        let path = format!("{}/{}/{}", ROOT, collector, entry_name(collector, &item.filename));
        append(&mut builder, &path, &item.bytes, mtime)?;
    }

    let encoder = builder.into_inner()?;
    encoder.finish()
}

/// Decode an archive into `(path, bytes)` pairs, in archive order.
pub fn read_archive(data: &[u8]) -> std::io::Result<Vec<(String, Vec<u8>)>> {
    let decoder = zstd::Decoder::new(data)?;
    let mut archive = tar::Archive::new(decoder);
    let mut files = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().to_string();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;
        files.push((path, bytes));
    }

    Ok(files)
}

fn append<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    path: &str,
    bytes: &[u8],
    mtime: u64,
) -> std::io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);
    builder.append_data(&mut header, path, bytes)
}

/// Collectors name their own files; keep only the final path component.
fn entry_name(collector: &str, filename: &str) -> String {
    match Path::new(filename).file_name() {
        Some(name) if name != ".." => name.to_string_lossy().to_string(),
        _ => format!("{}.out", collector),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> BundleManifest {
        BundleManifest {
            uid: "uid-1".to_string(),
            created_at: Utc::now(),
            generator: "test".to_string(),
            collectors: vec!["basic".to_string()],
            failures: vec![CollectorFailure {
                collector: "db".to_string(),
                error: "locked".to_string(),
            }],
        }
    }

    #[test]
    fn test_archive_contains_manifest_and_items() {
        let items = vec![(
            "basic".to_string(),
            SupportItem::new("basic.json", b"{\"ok\":true}".to_vec()),
        )];
        let data = write_archive(&manifest(), &items).unwrap();
        let files = read_archive(&data).unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].0, "support-bundle/manifest.json");
        assert_eq!(files[1].0, "support-bundle/basic/basic.json");
        assert_eq!(files[1].1, b"{\"ok\":true}");

        let parsed: BundleManifest = serde_json::from_slice(&files[0].1).unwrap();
        assert_eq!(parsed.uid, "uid-1");
        assert_eq!(parsed.failures.len(), 1);
    }

    #[test]
    fn test_item_paths_cannot_escape_collector_dir() {
        assert_eq!(entry_name("db", "../../etc/passwd"), "passwd");
        assert_eq!(entry_name("db", "nested/dir/db.json"), "db.json");
        assert_eq!(entry_name("db", ""), "db.out");
        assert_eq!(entry_name("db", ".."), "db.out");
    }
}
