//! The shipped config file parses and agrees with the built-in defaults.

use std::path::Path;

use sofa_mcp::config::{self, Config, Overrides, TransportMode};

#[test]
fn default_config_file_exists() {
    assert!(Path::new("config/default.toml").is_file(), "config/default.toml missing");
}

#[test]
fn default_config_file_loads() {
    let cfg = config::load_from(Path::new("config/default.toml"), &Overrides::default()).unwrap();
    assert_eq!(cfg.transport.mode, TransportMode::Http);
    assert_eq!(cfg.transport.bind, "127.0.0.1:8000");
    assert_eq!(cfg.transport.path, "/mcp");
    assert_eq!(cfg.engine.step_timeout.as_secs(), 300);
    assert!(cfg.registry.plugin_cache.ends_with("plugin_cache.json"));
}

#[test]
fn shipped_file_matches_builtin_defaults() {
    let from_file = config::load_from(Path::new("config/default.toml"), &Overrides::default()).unwrap();
    let builtin = Config::test_default(&from_file.work_dir);

    assert_eq!(from_file.server_name, builtin.server_name);
    assert_eq!(from_file.log_level, builtin.log_level);
    assert_eq!(from_file.registry.auto_import, builtin.registry.auto_import);
    assert_eq!(
        from_file.registry.min_expected_components,
        builtin.registry.min_expected_components
    );
    assert_eq!(from_file.scene.max_load_bytes, builtin.scene.max_load_bytes);
    assert_eq!(from_file.engine.sandbox_timeout, builtin.engine.sandbox_timeout);
}

#[test]
fn env_overrides_win_over_the_file() {
    let overrides = Overrides {
        work_dir: Some("/tmp/sofa-mcp-override".into()),
        log_level: Some("debug".into()),
        python: Some("/usr/bin/python3".into()),
    };
    let cfg = config::load_from(Path::new("config/default.toml"), &overrides).unwrap();
    assert_eq!(cfg.work_dir, Path::new("/tmp/sofa-mcp-override"));
    assert_eq!(cfg.log_level, "debug");
    assert_eq!(cfg.engine.python, Path::new("/usr/bin/python3"));
    assert_eq!(
        cfg.registry.plugin_cache,
        Path::new("/tmp/sofa-mcp-override/plugin_cache.json")
    );
}
