use std::path::{Path, PathBuf};

use crate::error::FleetError;

/// Line-oriented `key=value` editor for a worker's `server.properties`.
/// Comments and lines without exactly one `=` are dropped on save, matching
/// how the file is regenerated by the server itself.
#[derive(Debug)]
pub struct ServerProperties {
    path: PathBuf,
    entries: Vec<(String, String)>,
}

impl ServerProperties {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self, FleetError> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let entries = content
            .lines()
            .filter(|line| !line.starts_with('#'))
            .filter_map(|line| {
                let mut parts = line.splitn(2, '=');
                match (parts.next(), parts.next()) {
                    (Some(key), Some(value)) => Some((key.to_string(), value.to_string())),
                    _ => None,
                }
            })
            .collect();
        Ok(ServerProperties {
            path: path.as_ref().to_path_buf(),
            entries,
        })
    }

    /// Updates the value for `key`, appending the pair when absent.
    pub fn update(&mut self, key: &str, value: &str) {
        for (k, v) in self.entries.iter_mut() {
            if k == key {
                *v = value.to_string();
                return;
            }
        }
        self.entries.push((key.to_string(), value.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub async fn save(&self) -> Result<(), FleetError> {
        let mut data = String::new();
        for (key, value) in &self.entries {
            data.push_str(key);
            data.push('=');
            data.push_str(value);
            data.push('\n');
        }
        tokio::fs::write(&self.path, data).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn port_rewrite_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.properties");
        tokio::fs::write(
            &path,
            "#Minecraft server properties\n\
             #Sat Mar 02 04:05:06 UTC 2019\n\
             motd=A Minecraft Server\n\
             server-port=25565\n\
             online-mode=true\n",
        )
        .await
        .unwrap();

        let mut props = ServerProperties::load(&path).await.unwrap();
        assert_eq!(props.get("server-port"), Some("25565"));

        props.update("server-port", "25566");
        props.save().await.unwrap();

        let reloaded = ServerProperties::load(&path).await.unwrap();
        assert_eq!(reloaded.get("server-port"), Some("25566"));
        assert_eq!(reloaded.get("motd"), Some("A Minecraft Server"));
        // comments are not preserved
        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!raw.contains('#'));
    }

    #[tokio::test]
    async fn missing_key_is_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.properties");
        tokio::fs::write(&path, "motd=hi\n").await.unwrap();

        let mut props = ServerProperties::load(&path).await.unwrap();
        props.update("server-port", "25570");
        props.save().await.unwrap();

        let reloaded = ServerProperties::load(&path).await.unwrap();
        assert_eq!(reloaded.get("server-port"), Some("25570"));
    }

    #[tokio::test]
    async fn absent_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ServerProperties::load(dir.path().join("nope.properties"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "io-error");
    }
}
