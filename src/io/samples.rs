//! CSV export and import of calibration samples for offline fitting.

use std::path::Path;

use anyhow::{Context, Result};
use csv::{ReaderBuilder, WriterBuilder};

use crate::calibration::CalibrationSample;

/// Load samples from a headed CSV (`pan,tilt,zoom,wide_x,wide_y,confidence`).
///
/// Lines starting with `#` are skipped; an empty `zoom` cell means no zoom.
pub fn load_samples_csv<P: AsRef<Path>>(path: P) -> Result<Vec<CalibrationSample>> {
    let path = path.as_ref();
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut samples = Vec::new();
    for (i, rec) in rdr.deserialize().enumerate() {
        let sample: CalibrationSample =
            rec.with_context(|| format!("Bad sample on row {} of {}", i + 1, path.display()))?;
        samples.push(sample);
    }
    Ok(samples)
}

pub fn save_samples_csv<P: AsRef<Path>>(path: P, samples: &[CalibrationSample]) -> Result<()> {
    let path = path.as_ref();
    let mut wtr = WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for sample in samples {
        wtr.serialize(sample)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.csv");
        let samples = vec![
            CalibrationSample::new(-0.5, 0.0, None, 0.21, 0.5, 0.8),
            CalibrationSample::new(0.5, 0.3, Some(0.0), 0.79, 0.32, 0.55),
        ];
        save_samples_csv(&path, &samples).unwrap();
        assert_eq!(load_samples_csv(&path).unwrap(), samples);
    }

    #[test]
    fn test_hand_written_file_with_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.csv");
        fs::write(
            &path,
            "pan,tilt,zoom,wide_x,wide_y,confidence\n\
             # captured at dusk\n\
             0.0, 0.0, , 0.5, 0.5, 0.9\n",
        )
        .unwrap();
        let samples = load_samples_csv(&path).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].zoom, None);
        assert_eq!(samples[0].confidence, 0.9);
    }

    #[test]
    fn test_malformed_row_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.csv");
        fs::write(&path, "pan,tilt,zoom,wide_x,wide_y,confidence\nleft,0,,0.5,0.5,1\n").unwrap();
        assert!(load_samples_csv(&path).is_err());
    }
}
