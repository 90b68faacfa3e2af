//! JSON persistence of calibrated mapping parameters.

use std::fs::{self, File};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::MappingParams;

/// Write the calibrated parameters to `path`, creating parent directories.
pub fn save_params(path: impl AsRef<Path>, params: &MappingParams) -> Result<()> {
    let path = path.as_ref();
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
    }
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, params)?;
    info!("Saved PTZ mapping to {}", path.display());
    Ok(())
}

/// Load previously saved parameters.
///
/// Returns `Ok(None)` when no file exists yet. Loaded values are clamped to the
/// sane bands so a hand-edited file cannot produce a degenerate mapping.
pub fn load_params(path: impl AsRef<Path>) -> Result<Option<MappingParams>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let params: MappingParams = serde_json::from_reader(file)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    let clamped = params.clamped();
    if clamped != params {
        warn!(
            "Persisted PTZ mapping in {} was outside sane bands and has been clamped",
            path.display()
        );
    }
    Ok(Some(clamped))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_params(dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cams/cam2/mapping.json");
        let params = MappingParams {
            pan_scale: 1.25,
            tilt_scale: 0.9,
            pan_center_x: 0.42,
            tilt_center_y: 0.61,
        };
        save_params(&path, &params).unwrap();
        assert_eq!(load_params(&path).unwrap(), Some(params));
    }

    #[test]
    fn test_out_of_band_file_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.json");
        fs::write(
            &path,
            r#"{"pan_scale": 9.0, "tilt_scale": 0.6, "pan_center_x": 0.5, "tilt_center_y": 0.95}"#,
        )
        .unwrap();
        let loaded = load_params(&path).unwrap().unwrap();
        assert_eq!(loaded.pan_scale, 3.0);
        assert_eq!(loaded.tilt_center_y, 0.9);
    }
}
