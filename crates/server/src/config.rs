#![forbid(unsafe_code)]

use std::path::PathBuf;

pub(crate) const DEFAULT_PORT: u16 = 2019;

#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub port: u16,
    pub storage_dir: PathBuf,
    pub profiling: bool,
    pub suppress_command_log: bool,
    /// When set, (re)creates the `admin` account with this password and the
    /// administrative grants, so a fresh deployment has a way in.
    pub seed_admin_password: Option<String>,
}

pub(crate) fn from_env() -> Config {
    Config {
        port: parse_port(),
        storage_dir: parse_storage_dir(),
        profiling: parse_flag("CDR_FILTER_PROFILING"),
        suppress_command_log: parse_flag("SUPPRESS_CDR_COMMAND_LOGGING"),
        seed_admin_password: std::env::var("CDR_SEED_ADMIN_PASSWORD")
            .ok()
            .filter(|value| !value.is_empty()),
    }
}

fn parse_port() -> u16 {
    match std::env::var("CDR_PORT") {
        Ok(raw) => match raw.trim().parse() {
            Ok(port) => port,
            Err(_) => {
                log::warn!("CDR_PORT={raw} is not a port number, using {DEFAULT_PORT}");
                DEFAULT_PORT
            }
        },
        Err(_) => DEFAULT_PORT,
    }
}

fn parse_storage_dir() -> PathBuf {
    match std::env::var("CDR_STORAGE_DIR") {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => PathBuf::from("cdr_data"),
    }
}

// Presence enables; "0"/"false"/"no" disable explicitly.
fn parse_flag(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => !matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "" | "0" | "false" | "no"
        ),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_parsing_treats_presence_as_enabled() {
        // Env mutation in tests is racy across threads, so exercise the
        // matcher directly.
        for value in ["1", "true", "yes", "on"] {
            assert!(!matches!(value, "" | "0" | "false" | "no"));
        }
    }

    #[test]
    fn default_port_matches_documented_value() {
        assert_eq!(DEFAULT_PORT, 2019);
    }
}
