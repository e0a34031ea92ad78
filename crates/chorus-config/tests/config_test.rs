#![allow(clippy::unwrap_used)]
// Loading, env layering and saving of config files.

use std::time::Duration;

use chorus_config::{Config, InstanceProfile, load_config_from, save_config_to};

const SAMPLE: &str = r#"
default_instance = "home"

[defaults]
timeout = 12
user = "me"

[session]
backoff_secs = [1, 3]
unsubscribe_grace_ms = 250

[instances.home]
url = "https://chat.example.com"
name = "Home"

[instances.work]
url = "https://work.example.com"
user = "j.doe"
insecure = true
"#;

#[test]
fn parses_file_and_keeps_instance_order() {
    // Jail serializes env access across tests.
    figment::Jail::expect_with(|_jail| {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let cfg = load_config_from(&path).unwrap();

        assert_eq!(cfg.default_instance.as_deref(), Some("home"));
        let names: Vec<&str> = cfg.instances.keys().map(String::as_str).collect();
        assert_eq!(names, ["home", "work"]);
        assert_eq!(cfg.user_for("work"), Some("j.doe"));
        assert_eq!(cfg.user_for("home"), Some("me"));

        let client = cfg.client_config().unwrap();
        assert_eq!(client.timeout, Duration::from_secs(12));
        assert_eq!(
            client.session.backoff,
            [Duration::from_secs(1), Duration::from_secs(3)]
        );
        assert_eq!(client.session.unsubscribe_grace, Duration::from_millis(250));
        // Unset keys keep their defaults.
        assert_eq!(client.session.token_skew, Duration::from_secs(30));

        let instances = cfg.to_instances().unwrap();
        assert_eq!(instances[0].name, "Home");
        assert_eq!(instances[1].base_url.as_str(), "https://work.example.com/");
        Ok(())
    });
}

#[test]
fn missing_file_yields_defaults() {
    figment::Jail::expect_with(|_jail| {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();

        assert!(cfg.instances.is_empty());
        assert_eq!(cfg.defaults.timeout, 30);
        assert_eq!(cfg.session.backoff_secs, [1, 2, 5, 10, 30]);
        Ok(())
    });
}

#[test]
fn environment_overrides_file() {
    figment::Jail::expect_with(|jail| {
        jail.create_file("config.toml", SAMPLE)?;
        jail.set_env("CHORUS_DEFAULTS__TIMEOUT", "5");
        jail.set_env("CHORUS_DEFAULT_INSTANCE", "work");

        let cfg = load_config_from(std::path::Path::new("config.toml")).unwrap();

        assert_eq!(cfg.defaults.timeout, 5);
        assert_eq!(cfg.default_instance.as_deref(), Some("work"));
        assert_eq!(cfg.resolve_instance(None).unwrap().0, "work");
        Ok(())
    });
}

#[test]
fn malformed_file_is_a_load_error() {
    figment::Jail::expect_with(|_jail| {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[instances.home]\nurl = 42\n").unwrap();

        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("config loading failed"));
        Ok(())
    });
}

#[test]
fn saved_config_loads_back() {
    figment::Jail::expect_with(|_jail| {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        let mut profile = InstanceProfile::new("https://chat.example.com");
        profile.user = Some("me".into());
        cfg.instances.insert("home".into(), profile);
        cfg.default_instance = Some("home".into());
        save_config_to(&cfg, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.default_instance.as_deref(), Some("home"));
        assert_eq!(loaded.instance("home").unwrap().url, "https://chat.example.com");
        assert_eq!(loaded.user_for("home"), Some("me"));
        Ok(())
    });
}
