//! Small shared helpers: ids and well-known paths.

use std::path::PathBuf;

/// Name of the per-user kaiwa directory under the home directory.
const KAIWA_DIR: &str = ".kaiwa";

/// Generate a random identifier with the given prefix, e.g. `msg_3f2a...`.
#[must_use]
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}

/// Generate a unique message identifier.
#[must_use]
pub fn generate_message_id() -> String {
    generate_id("msg")
}

/// The user's home directory, falling back to the current directory.
#[must_use]
pub fn home_dir() -> PathBuf {
    dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// The kaiwa configuration directory (`~/.kaiwa`).
#[must_use]
pub fn config_dir() -> PathBuf {
    home_dir().join(KAIWA_DIR)
}

/// The default configuration file path (`~/.kaiwa/config.json`).
#[must_use]
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_prefix_and_uniqueness() {
        let a = generate_id("sess");
        let b = generate_id("sess");
        assert!(a.starts_with("sess_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_config_path_layout() {
        let path = config_path();
        assert!(path.ends_with(".kaiwa/config.json"));
    }
}
