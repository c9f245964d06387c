// Loading bath.toml from disk

#[cfg(test)]
mod tests {
    use bath_rs::{ConfigError, load_config};
    use std::io::Write;
    use tempfile::tempdir;

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> String {
        let path = dir.path().join("bath.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_load_full_config() {
        let dir = tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[connection]
port = "/dev/ttyUSB1"
baud = 57600
read_timeout_ms = 2000

[tuning]
heat_capacity = 1.0
mass = 0.5
emissivity = 0.9
area = 0.02
resistance = 12.0
voltage = 24.0
p = 1500.0
i = 2.0
d = 0.0

[control]
cycle_period_secs = 5.0
radiative_compensation = true
target = 55.0
"#,
        );

        let config = load_config(&path).unwrap();
        assert_eq!(config.connection.port, "/dev/ttyUSB1");
        assert_eq!(config.connection.baud, 57600);
        assert_eq!(config.connection.read_timeout_ms, 2000);
        assert_eq!(config.connection.settle_delay_ms, 3000);
        assert_eq!(config.tuning.resistance, 12.0);
        assert_eq!(config.tuning.p, 1500.0);
        assert_eq!(config.control.cycle_period_secs, 5.0);
        assert_eq!(config.control.max_on_time_ms, 10000);
        assert!(config.control.radiative_compensation);
        assert_eq!(config.control.target, Some(55.0));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = load_config(&path.to_string_lossy()).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = write_config(&dir, "[connection\nport = ");
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_incomplete_tuning_section_is_parse_error() {
        let dir = tempdir().unwrap();
        let path = write_config(&dir, "[tuning]\nmass = 0.5\n");
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_non_physical_values_are_rejected() {
        let dir = tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[tuning]
heat_capacity = 1.0
mass = -2.0
emissivity = 0.9
area = 0.02
resistance = 10.0
voltage = 24.0
p = 1.0
i = 0.0
d = 0.0
"#,
        );
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
