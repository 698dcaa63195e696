use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::FleetError;

pub trait FileIoWithBackup {
    /// Writes the given content to a file, keeping a `.bak` copy of the
    /// previous contents when the file already exists.
    fn write_with_backup<P: AsRef<Path>>(path: P, content: &str) -> Result<(), std::io::Error> {
        let path = path.as_ref();

        if path.exists() {
            let backup_path = path.with_extension("bak");
            std::fs::copy(path, backup_path)?;
        }

        std::fs::write(path, content)?;

        Ok(())
    }
}

/// Trait for JSON document handling.
pub trait Config: FileIoWithBackup {
    type ConfigType: Serialize + for<'de> Deserialize<'de>;

    fn load_config<P: AsRef<Path>>(path: P) -> Result<Self::ConfigType, FleetError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self::ConfigType = serde_json::from_str(&content)?;
        Ok(config)
    }

    fn save_config<P: AsRef<Path>>(path: P, config: &Self::ConfigType) -> Result<(), FleetError> {
        let content = serde_json::to_string_pretty(config)?;
        Self::write_with_backup(path.as_ref(), &content)?;
        Ok(())
    }

    fn load_config_or_default<P: AsRef<Path>, F: FnOnce() -> Self::ConfigType>(
        path: P,
        default: F,
    ) -> Result<Self::ConfigType, FleetError> {
        match std::fs::metadata(path.as_ref()) {
            Ok(metadata) if metadata.is_file() => Self::load_config(path),
            _ => {
                let config = default();
                Self::save_config(path, &config)?;
                Ok(config)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        answer: u32,
    }

    struct SampleIo;
    impl FileIoWithBackup for SampleIo {}
    impl Config for SampleIo {
        type ConfigType = Sample;
    }

    #[test]
    fn defaults_are_written_on_first_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");

        let loaded = SampleIo::load_config_or_default(&path, || Sample { answer: 42 }).unwrap();
        assert_eq!(loaded, Sample { answer: 42 });
        assert!(path.is_file());

        // second load reads the file instead of the default
        let loaded = SampleIo::load_config_or_default(&path, || Sample { answer: 0 }).unwrap();
        assert_eq!(loaded, Sample { answer: 42 });
    }

    #[test]
    fn rewrite_keeps_a_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");

        SampleIo::save_config(&path, &Sample { answer: 1 }).unwrap();
        SampleIo::save_config(&path, &Sample { answer: 2 }).unwrap();

        let backup = std::fs::read_to_string(path.with_extension("bak")).unwrap();
        let previous: Sample = serde_json::from_str(&backup).unwrap();
        assert_eq!(previous, Sample { answer: 1 });
        assert_eq!(SampleIo::load_config(&path).unwrap(), Sample { answer: 2 });
    }
}
