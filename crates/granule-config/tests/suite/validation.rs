use granule_config::{ConfigError, GranuleConfig, LoggingConfig, MetadataStoreConfig};

fn invalid_field(text: &str) -> &'static str {
    match GranuleConfig::load_from_str(text) {
        Err(ConfigError::Invalid { field, .. }) => field,
        other => panic!("expected a validation error, got {other:?}"),
    }
}

#[test]
fn rejects_empty_prefix() {
    assert_eq!(
        invalid_field("[metadata_store]\nprefix = \"\"\n"),
        "metadata_store.prefix"
    );
}

#[test]
fn rejects_prefix_with_path_separator() {
    assert_eq!(
        invalid_field("[metadata_store]\nprefix = \"a/b\"\n"),
        "metadata_store.prefix"
    );
    assert_eq!(
        invalid_field("[metadata_store]\nprefix = 'a\\b'\n"),
        "metadata_store.prefix"
    );
}

#[test]
fn rejects_purge_fraction_out_of_range() {
    for value in ["0.0", "-0.5", "1.5", "nan"] {
        assert_eq!(
            invalid_field(&format!("[metadata_store]\npurge_fraction = {value}\n")),
            "metadata_store.purge_fraction",
            "{value}"
        );
    }
    assert!(GranuleConfig::load_from_str("[metadata_store]\npurge_fraction = 1.0\n").is_ok());
}

#[test]
fn programmatic_configs_validate_too() {
    let mut config = MetadataStoreConfig::with_path("/tmp/granule");
    assert!(config.validate().is_ok());
    config.purge_fraction = 2.0;
    assert!(config.validate().is_err());
}

#[test]
fn env_filter_accepts_directive_strings() {
    let logging = LoggingConfig {
        level: "granule.mds=debug,info".to_owned(),
        ..LoggingConfig::default()
    };
    let rendered = logging.env_filter().to_string();
    assert!(rendered.contains("granule.mds=debug"), "{rendered}");
}
