use rv_domain::config::{load_config, Config, ProviderKind};

#[test]
fn defaults_without_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(dir.path()).unwrap();
    assert_eq!(config.provider.default, ProviderKind::Bedrock);
    assert_eq!(config.dreaming.historical_lookback, 7);
    assert_eq!(config.dreaming.initial_lookback_days, 7);
    assert!(!config.dreaming.judges_enabled);
    assert!(!config.vector.enabled);
    assert_eq!(config.vector.dimension, 384);
    assert!((config.vector.min_score - 0.5).abs() < 1e-12);
    assert_eq!(config.enabled.connectors, vec!["claude-code".to_string()]);
    assert_eq!(config.api.port, 7777);
}

#[test]
fn partial_yaml_overrides_merge_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("config.yaml"),
        r#"
provider:
  default: anthropic
  anthropic:
    model: claude-opus-4-20250514
dreaming:
  initial_lookback_days: 14
  judges_enabled: true
vector:
  enabled: true
  min_age_days: 3
"#,
    )
    .unwrap();

    let config = load_config(dir.path()).unwrap();
    assert_eq!(config.provider.default, ProviderKind::Anthropic);
    assert_eq!(config.provider.anthropic.model, "claude-opus-4-20250514");
    // Untouched sections keep their defaults.
    assert_eq!(config.provider.bedrock.region, "us-east-1");
    assert_eq!(config.dreaming.initial_lookback_days, 14);
    assert!(config.dreaming.judges_enabled);
    assert!(config.vector.enabled);
    assert_eq!(config.vector.min_age_days, 3);
    assert_eq!(config.vector.dimension, 384);
}

#[test]
fn malformed_yaml_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("config.yaml"), "provider: [unclosed").unwrap();
    assert!(load_config(dir.path()).is_err());
}

#[test]
fn config_serializes_back_to_yaml() {
    let config = Config::default();
    let yaml = serde_yaml::to_string(&config).unwrap();
    let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(parsed.provider.bedrock.model, config.provider.bedrock.model);
}
