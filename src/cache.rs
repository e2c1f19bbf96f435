use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("decoding {}", path.display()))
}

/// Writes `value` as JSON, creating parent directories on demand.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let data = serde_json::to_vec(value)?;
    fs::write(path, data).with_context(|| format!("writing {}", path.display()))
}

/// Cached route-result documents for one simulation.
pub fn journeys_path(cache: &Path, sim_id: &str) -> PathBuf {
    cache.join("hiveline-journeys").join(format!("{}.json", sim_id))
}

/// Per-tile modal share artifact for one simulation and sub-type.
pub fn heatmap_path(cache: &Path, sub_type: &str, sim_id: &str) -> PathBuf {
    cache
        .join("modal-heatmaps")
        .join(format!("{}-{}.json", sub_type, sim_id))
}

/// Mode-segmented polyline records for one simulation.
pub fn mode_polylines_path(cache: &Path, sim_id: &str) -> PathBuf {
    cache.join("mode-polylines").join(format!("{}.json", sim_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn json_roundtrip_creates_directories() {
        let dir = std::env::temp_dir().join(format!("hiveline-cache-test-{}", std::process::id()));
        let path = dir.join("nested").join("values.json");

        let mut values: BTreeMap<String, f64> = BTreeMap::new();
        values.insert("car".into(), 0.25);
        values.insert("walk".into(), 0.75);

        write_json(&path, &values).unwrap();
        let read: BTreeMap<String, f64> = read_json(&path).unwrap();
        assert_eq!(read, values);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn cache_paths_follow_layout() {
        let cache = Path::new("/tmp/cache");
        assert_eq!(
            journeys_path(cache, "sim-1"),
            Path::new("/tmp/cache/hiveline-journeys/sim-1.json")
        );
        assert_eq!(
            heatmap_path(cache, "tiles", "sim-1"),
            Path::new("/tmp/cache/modal-heatmaps/tiles-sim-1.json")
        );
        assert_eq!(
            mode_polylines_path(cache, "sim-1"),
            Path::new("/tmp/cache/mode-polylines/sim-1.json")
        );
    }
}
