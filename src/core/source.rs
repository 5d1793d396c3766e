use std::fs;
use std::path::Path;

use super::connection::Connection;
use crate::error::SourceError;

/// Supplies one point-in-time snapshot of the socket table per call.
pub trait ConnectionSource: Send + Sync {
    fn fetch(&self) -> Result<Vec<Connection>, SourceError>;
}

/// Fixed connection list, replayed unchanged on every fetch.
#[derive(Debug, Clone, Default)]
pub struct FixtureSource {
    connections: Vec<Connection>,
}

impl FixtureSource {
    pub fn new(connections: Vec<Connection>) -> Self {
        Self { connections }
    }

    pub fn load(path: &Path) -> Result<Self, SourceError> {
        let raw = fs::read_to_string(path).map_err(|source| SourceError::FixtureIo {
            path: path.to_path_buf(),
            source,
        })?;
        let connections =
            serde_json::from_str(&raw).map_err(|source| SourceError::FixtureFormat {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::new(connections))
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }
}

impl ConnectionSource for FixtureSource {
    fn fetch(&self) -> Result<Vec<Connection>, SourceError> {
        Ok(self.connections.clone())
    }
}

/// Writes a snapshot in the format `FixtureSource::load` reads.
pub fn save_fixture(path: &Path, connections: &[Connection]) -> Result<(), SourceError> {
    let json =
        serde_json::to_string_pretty(connections).map_err(|source| SourceError::FixtureFormat {
            path: path.to_path_buf(),
            source,
        })?;
    fs::write(path, json).map_err(|source| SourceError::FixtureIo {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_replays_snapshot() {
        let path = std::env::temp_dir().join(format!("sockscope-fixture-{}.json", std::process::id()));
        let snapshot = vec![Connection {
            pid: 1234,
            process: "nginx".to_string(),
            proto: "tcp".to_string(),
            state: "LISTEN".to_string(),
            laddr: "0.0.0.0".to_string(),
            lport: 80,
            ..Default::default()
        }];
        save_fixture(&path, &snapshot).unwrap();
        let source = FixtureSource::load(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(source.fetch().unwrap(), snapshot);
    }

    #[test]
    fn missing_fixture_reports_path() {
        let err = FixtureSource::load(Path::new("/nonexistent/sockscope.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/sockscope.json"));
    }

    #[test]
    fn garbage_fixture_is_a_format_error() {
        let path = std::env::temp_dir().join(format!("sockscope-garbage-{}.json", std::process::id()));
        fs::write(&path, "{not json").unwrap();
        let err = FixtureSource::load(&path).unwrap_err();
        let _ = fs::remove_file(&path);
        assert!(matches!(err, SourceError::FixtureFormat { .. }));
    }
}
