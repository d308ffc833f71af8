//! Integration tests for configuration loading
//!
//! Tests shim configuration files, including:
//! - Full and minimal files
//! - Save / load round trip through the filesystem
//! - Search order through the environment variable
//! - Invalid configuration handling

use engine::config::{CONFIG_ENV, ParportSettings, ShimConfig};
use protocol::WordSize;
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

const FULL_CONFIG: &str = r#"
[shim]
log_level = "debug"
device_node = "/dev/windrvr6"
backing_node = "/dev/zero"
forward_unsupported = true
word_size = 4

[parport]
path_prefix = "/dev/parport"
force_pc3_ident = true
virtual_port_count = 8

[usb]
enumerate_on_open = false
"#;

#[test]
fn test_load_full_config() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("shim.toml");
    fs::write(&path, FULL_CONFIG).unwrap();

    let config = ShimConfig::load(Some(path)).unwrap();
    assert_eq!(config.shim.log_level, "debug");
    assert_eq!(config.shim.backing_node, PathBuf::from("/dev/zero"));
    assert!(config.shim.forward_unsupported);
    assert_eq!(config.word_size(), WordSize::Four);
    assert!(config.parport.force_pc3_ident);
    assert_eq!(config.parport.virtual_port_count, 8);
    assert!(!config.usb.enumerate_on_open);

    let options = config.session_options();
    assert_eq!(options.word, WordSize::Four);
    assert!(options.force_pc3_ident);
}

#[test]
fn test_load_empty_file_gives_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("shim.toml");
    fs::write(&path, "").unwrap();
    assert_eq!(ShimConfig::load(Some(path)).unwrap(), ShimConfig::default());
}

#[test]
fn test_save_and_reload() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("shim.toml");

    let mut config = ShimConfig::default();
    config.shim.log_level = "trace".to_string();
    config.parport.path_prefix = "/dev/pp".to_string();
    config.shim.word_size = Some(WordSize::Eight);
    config.save(&path).unwrap();

    assert_eq!(ShimConfig::load(Some(path)).unwrap(), config);
}

#[test]
fn test_load_rejects_invalid_values() {
    let dir = tempdir().unwrap();
    let cases = [
        "[shim]\nlog_level = \"loud\"\n",
        "[shim]\ndevice_node = \"relative/node\"\n",
        "[shim]\nbacking_node = \"/dev/windrvr6\"\n",
        "[shim]\nword_size = 16\n",
        "[parport]\npath_prefix = \"\"\n",
        "[parport]\nvirtual_port_count = 65\n",
        "[shim\n",
    ];
    for (i, case) in cases.iter().enumerate() {
        let path = dir.path().join(format!("bad{}.toml", i));
        fs::write(&path, case).unwrap();
        assert!(ShimConfig::load(Some(path)).is_err(), "accepted: {}", case);
    }
}

#[test]
fn test_load_missing_file() {
    let dir = tempdir().unwrap();
    assert!(ShimConfig::load(Some(dir.path().join("absent.toml"))).is_err());
}

#[test]
fn test_port_count_limit() {
    let mut config = ShimConfig::default();
    config.parport.virtual_port_count = ParportSettings::MAX_VIRTUAL_PORTS;
    assert!(config.validate().is_ok());
}

#[test]
fn test_environment_candidate_first() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("env.toml");
    fs::write(&path, "[parport]\nforce_pc3_ident = true\n").unwrap();

    // SAFETY: no other test in this binary reads or writes this variable.
    unsafe { std::env::set_var(CONFIG_ENV, &path) };
    let candidates = ShimConfig::candidates();
    let loaded = ShimConfig::load(None);
    unsafe { std::env::remove_var(CONFIG_ENV) };

    assert_eq!(candidates[0], path);
    assert!(candidates.contains(&ShimConfig::default_path()));
    assert!(loaded.unwrap().parport.force_pc3_ident);
}
