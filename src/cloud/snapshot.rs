//! Simulated-account persistence: load, atomic save, open-or-seed.

use super::memory::MemoryCloud;
use crate::core::error::{CastError, Result};
use std::path::Path;

/// Load a persisted account. Returns None if the file doesn't exist.
pub fn load(path: &Path) -> Result<Option<MemoryCloud>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| CastError::Snapshot(format!("cannot read {}: {}", path.display(), e)))?;
    let cloud: MemoryCloud = serde_json::from_str(&content)
        .map_err(|e| CastError::Snapshot(format!("invalid snapshot {}: {}", path.display(), e)))?;
    Ok(Some(cloud))
}

/// Load the account at `path`, or start an empty one hosting `zone`.
pub fn open(path: &Path, zone: &str) -> Result<MemoryCloud> {
    match load(path)? {
        Some(cloud) => {
            log::debug!("Loaded cloud state from {}", path.display());
            Ok(cloud)
        }
        None => {
            log::info!(
                "No cloud state at {}; starting an empty account hosting {}",
                path.display(),
                zone
            );
            Ok(MemoryCloud::default().with_zone(zone))
        }
    }
}

/// Save atomically (write to temp, then rename). Pending instances finish
/// booting first: the next run happens later.
pub fn save(path: &Path, cloud: &mut MemoryCloud) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            CastError::Snapshot(format!("cannot create dir {}: {}", parent.display(), e))
        })?;
    }
    cloud.settle();

    let json = serde_json::to_string_pretty(cloud)
        .map_err(|e| CastError::Snapshot(format!("serialize error: {}", e)))?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &json)
        .map_err(|e| CastError::Snapshot(format!("cannot write {}: {}", tmp_path.display(), e)))?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        CastError::Snapshot(format!(
            "cannot rename {} to {}: {}",
            tmp_path.display(),
            path.display(),
            e
        ))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::ControlPlane;

    #[test]
    fn test_open_missing_seeds_zone() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = open(&dir.path().join("cloud.json"), "example.com").unwrap();
        assert!(cloud.zone_exists("example.com").unwrap());
        assert_eq!(cloud.mutation_count(), 0);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("cloud.json");
        let mut cloud = MemoryCloud::default().with_zone("example.com");
        let vpc = cloud.create_vpc("10.0.0.0/16").unwrap();
        save(&path, &mut cloud).unwrap();

        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded.list_vpcs().unwrap(), vec![vpc]);
        assert_eq!(loaded.list_route_tables(&loaded.list_vpcs().unwrap()[0].id).unwrap().len(), 1);
    }

    #[test]
    fn test_atomic_write_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.json");
        save(&path, &mut MemoryCloud::default()).unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("cloud.json.tmp").exists());
    }

    #[test]
    fn test_load_corrupt_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load(&path).unwrap_err();
        assert!(matches!(err, CastError::Snapshot(_)));
    }

    #[test]
    fn test_ids_continue_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cloud.json");
        let mut cloud = MemoryCloud::default();
        let first = cloud.create_vpc("10.0.0.0/16").unwrap();
        save(&path, &mut cloud).unwrap();
        let mut reloaded = load(&path).unwrap().unwrap();
        let second = reloaded.create_vpc("10.1.0.0/16").unwrap();
        assert_ne!(first.id, second.id);
    }
}
