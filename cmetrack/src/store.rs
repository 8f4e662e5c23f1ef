//! Persistence of per-movie results and feature tables.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::features::TrackFeatures;
use crate::pipeline::MovieResult;

/// Destination of processed results, keyed by movie directory.
pub trait ResultStore: Send + Sync {
    /// Whether a result for the movie in `movie_dir` already exists.
    fn exists(&self, movie_dir: &Path) -> bool;

    /// Persist `result`, replacing any previous one. Returns where it went.
    fn save(&self, movie_dir: &Path, result: &MovieResult) -> Result<PathBuf>;

    /// Persist the per-track feature table of the movie.
    fn save_features(&self, movie_dir: &Path, features: &[TrackFeatures]) -> Result<PathBuf>;
}

/// Writes `<movie dir>/<file name>` as pretty-printed JSON, and the feature
/// table as an array of flat records in `<stem>.features.json`.
///
/// Non-finite floats are written as `null`.
#[derive(Debug, Clone)]
pub struct JsonResultStore {
    file_name: String,
}

impl JsonResultStore {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }

    pub fn path(&self, movie_dir: &Path) -> PathBuf {
        movie_dir.join(&self.file_name)
    }

    pub fn features_path(&self, movie_dir: &Path) -> PathBuf {
        self.path(movie_dir).with_extension("features.json")
    }
}

fn write_json(movie_dir: &Path, path: PathBuf, value: &impl Serialize) -> Result<PathBuf> {
    let json = serde_json::to_string_pretty(value)?;
    let persistence = |source| Error::Persistence {
        path: path.clone(),
        source,
    };
    fs::create_dir_all(movie_dir).map_err(persistence)?;
    fs::write(&path, json).map_err(persistence)?;
    Ok(path)
}

impl ResultStore for JsonResultStore {
    fn exists(&self, movie_dir: &Path) -> bool {
        self.path(movie_dir).is_file()
    }

    fn save(&self, movie_dir: &Path, result: &MovieResult) -> Result<PathBuf> {
        let path = write_json(movie_dir, self.path(movie_dir), result)?;
        debug!(path = %path.display(), tracks = result.tracks.len(), "Results written");
        Ok(path)
    }

    fn save_features(&self, movie_dir: &Path, features: &[TrackFeatures]) -> Result<PathBuf> {
        let path = write_json(movie_dir, self.features_path(movie_dir), &features)?;
        debug!(path = %path.display(), tracks = features.len(), "Feature table written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::features::feature_table;
    use crate::pipeline::ProcessingMetadata;
    use crate::testing::track_from_pattern;

    fn result() -> MovieResult {
        MovieResult {
            tracks: vec![track_from_pattern("xx.xx")],
            metadata: ProcessingMetadata::new("cell1", &Config::default()),
        }
    }

    #[test]
    fn test_save_then_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonResultStore::new("Tracks.json");
        assert!(!store.exists(dir.path()));

        let path = store.save(dir.path(), &result()).unwrap();

        assert_eq!(path, dir.path().join("Tracks.json"));
        assert!(store.exists(dir.path()));
    }

    #[test]
    fn test_written_json_has_tracks_and_nulls_for_nan() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonResultStore::new("Tracks.json");
        let path = store.save(dir.path(), &result()).unwrap();

        let text = fs::read_to_string(path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        let points = &value["tracks"][0]["points"];
        assert_eq!(points.as_array().map(Vec::len), Some(5));
        assert!(points[2]["channels"][0]["amplitude"].is_null());
        assert_eq!(value["metadata"]["movie"], "cell1");
    }

    #[test]
    fn test_feature_table_is_flat_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonResultStore::new("Tracks.json");
        let tracks = result().tracks;

        let path = store.save_features(dir.path(), &feature_table(&tracks)).unwrap();

        assert_eq!(path, dir.path().join("Tracks.features.json"));
        let text = fs::read_to_string(path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        let record = &value[0];
        assert_eq!(record["category"], 1);
        assert_eq!(record["n_gap_columns"], 1);
        assert_eq!(record["max_amplitude"], 100.0);
        assert!(record["decay_r2"].is_null());
        let fields = record.as_object().unwrap();
        assert!(fields.values().all(|v| !v.is_object() && !v.is_array()));
        assert!(!store.exists(dir.path()));
    }

    #[test]
    fn test_missing_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = JsonResultStore::new("Tracks.json");
        store.save(&nested, &result()).unwrap();
        assert!(store.exists(&nested));
    }

    #[test]
    fn test_unwritable_target_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the movie directory should be.
        let blocker = dir.path().join("movie");
        fs::write(&blocker, "").unwrap();

        let err = JsonResultStore::new("Tracks.json")
            .save(&blocker, &result())
            .unwrap_err();
        assert!(matches!(err, Error::Persistence { .. }), "{err}");
    }
}
