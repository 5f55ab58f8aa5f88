use anyhow::Context;
use pulsecore::config::IngestConfig;
use std::fs;
use std::path::Path;

/// Reads an [`IngestConfig`] from YAML. Missing sections take their defaults.
pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<IngestConfig> {
    let path_ref = path.as_ref();
    let contents = fs::read_to_string(path_ref)
        .with_context(|| format!("reading ingest config {}", path_ref.display()))?;
    serde_yaml::from_str(&contents)
        .with_context(|| format!("parsing ingest config {}", path_ref.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn load_reads_nested_sections() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"channel:\n  endpoint: http://10.1.1.5:5000\n  reconnect:\n    max_attempts: 3\nstream:\n  connect_timeout_ms: 1500\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let config = load(&path).unwrap();
        assert_eq!(config.channel.endpoint, "http://10.1.1.5:5000");
        assert_eq!(config.channel.reconnect.max_attempts, Some(3));
        assert_eq!(config.channel.reconnect.initial_delay_ms, 1_000);
        assert_eq!(config.stream.connect_timeout_ms, Some(1_500));
        assert!(config.stream_enabled);
    }

    #[test]
    fn bad_yaml_is_reported() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"channel: [not, a, map]\n").unwrap();
        let path = temp.into_temp_path();
        assert!(load(&path).is_err());
    }
}
