//! Unit tests for manifest parsing and validation.

use rstest::{fixture, rstest};
use serde_json::json;
use tempfile::TempDir;

use super::*;

#[fixture]
fn server_manifest() -> Manifest {
    Manifest::new("tax.flat", "Flat tax", "1.2.0").with_server(ServerComponent::new("bin/flat-tax"))
}

#[rstest]
#[case::dotted("tax.avalara", true)]
#[case::dashes("stripe-gateway_v2", true)]
#[case::too_short("ab", false)]
#[case::traversal("../evil", false)]
#[case::leading_dot(".hidden", false)]
#[case::spaces("my plugin", false)]
#[case::slash("a/b/c", false)]
fn validates_plugin_ids(#[case] id: &str, #[case] valid: bool) {
    assert_eq!(is_valid_plugin_id(id), valid, "id {id}");
}

#[test]
fn rejects_overlong_ids() {
    let id = "a".repeat(191);
    assert!(!is_valid_plugin_id(&id));
}

#[rstest]
fn valid_manifest_passes_validation(server_manifest: Manifest) {
    assert!(server_manifest.validate().is_ok());
}

#[rstest]
#[case::bad_version(Manifest::new("tax.flat", "Flat tax", "one"))]
#[case::empty_name(Manifest::new("tax.flat", "  ", "1.0.0"))]
#[case::bad_id(Manifest::new("x", "Flat tax", "1.0.0"))]
#[case::bad_min_host(Manifest::new("tax.flat", "Flat tax", "1.0.0").with_min_host_version("latest"))]
#[case::server_without_executable(
    Manifest::new("tax.flat", "Flat tax", "1.0.0").with_server(ServerComponent::default())
)]
#[case::repeated_setting(Manifest::new("tax.flat", "Flat tax", "1.0.0").with_settings(vec![
    SettingField::new("api_key", SettingKind::Secret),
    SettingField::new("api_key", SettingKind::String),
]))]
fn invalid_manifests_are_rejected(#[case] manifest: Manifest) {
    assert!(matches!(
        manifest.validate(),
        Err(PluginError::Manifest { .. })
    ));
}

#[rstest]
#[case::older_host("2.9.9", false)]
#[case::same_host("3.0.0", true)]
#[case::newer_host("3.4.1", true)]
fn enforces_minimum_host_version(
    server_manifest: Manifest,
    #[case] host: &str,
    #[case] accepted: bool,
) {
    let manifest = server_manifest.with_min_host_version("3.0.0");
    let host = Version::parse(host).expect("host version");

    let result = manifest.check_host_version(&host);

    assert_eq!(result.is_ok(), accepted, "result: {result:?}");
    if !accepted {
        assert!(matches!(
            result,
            Err(PluginError::HostVersionUnsupported { .. })
        ));
    }
}

#[rstest]
fn manifest_without_minimum_accepts_any_host(server_manifest: Manifest) {
    let host = Version::new(0, 0, 1);
    assert!(server_manifest.check_host_version(&host).is_ok());
}

#[test]
fn parses_manifest_json_with_defaults() {
    let manifest: Manifest = serde_json::from_value(json!({
        "id": "gateway.dummy",
        "name": "Dummy gateway",
        "version": "0.3.0",
        "server": { "executable": "bin/dummy" },
        "settings": [
            { "key": "api_key", "type": "secret" },
            { "key": "sandbox", "type": "boolean", "default": true }
        ]
    }))
    .expect("manifest parses");

    assert_eq!(manifest.priority(), 0);
    assert!(manifest.default_active());
    assert!(!manifest.configuration_per_channel());
    assert_eq!(
        manifest.default_configuration(),
        vec![
            ConfigSetting::new("api_key", Value::Null),
            ConfigSetting::new("sandbox", json!(true)),
        ]
    );
    assert_eq!(
        manifest.setting("sandbox").map(SettingField::kind),
        Some(SettingKind::Boolean)
    );
}

#[test]
fn platform_executable_overrides_generic_one() {
    let server = ServerComponent::new("bin/generic")
        .with_platform_executable("linux-x86_64", "bin/linux-amd64");

    assert_eq!(
        server.executable_for("linux-x86_64"),
        Some(Path::new("bin/linux-amd64"))
    );
    assert_eq!(
        server.executable_for("macos-aarch64"),
        Some(Path::new("bin/generic"))
    );
}

#[rstest]
#[case::boolean(SettingKind::Boolean, json!(true), true)]
#[case::boolean_from_string(SettingKind::Boolean, json!("true"), false)]
#[case::secret(SettingKind::Secret, json!("s3cr3t"), true)]
#[case::string_from_number(SettingKind::String, json!(4), false)]
#[case::cleared_string(SettingKind::Multiline, Value::Null, true)]
fn setting_kinds_check_value_shape(
    #[case] kind: SettingKind,
    #[case] value: Value,
    #[case] expected: bool,
) {
    assert_eq!(kind.accepts(&value), expected);
}

#[test]
fn from_path_reads_and_validates() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join(MANIFEST_FILE_NAME);
    fs::write(
        &path,
        r#"{"id":"tax.flat","name":"Flat tax","version":"1.0.0","webapp":{"bundle_path":"webapp/main.js"}}"#,
    )
    .expect("write manifest");

    let manifest = Manifest::from_path(&path).expect("manifest loads");

    assert_eq!(manifest.id(), "tax.flat");
    assert!(manifest.has_webapp());
}

#[test]
fn from_path_reports_parse_errors() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join(MANIFEST_FILE_NAME);
    fs::write(&path, "{ not json").expect("write manifest");

    assert!(matches!(
        Manifest::from_path(&path),
        Err(PluginError::ManifestParse { .. })
    ));
}
