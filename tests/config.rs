use std::{path::Path, time::Duration};

use forwarder_buffers::WhenFull;
use log_forwarder::{
    config::{DeliveryMode, Format, OutputKind, load_from_path, load_from_str},
    router::Router,
    sources::SourceSet,
};
use similar_asserts::assert_eq;
use tempfile::tempdir;

fn example_config() -> &'static Path {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/config/log-forwarder.yaml"))
}

#[test]
fn example_config_is_valid() {
    let config = load_from_path(example_config()).unwrap();

    assert_eq!(config.pipelines.len(), 3);
    assert_eq!(config.collector.drain_timeout, Duration::from_secs(30));

    let splunk = config.output("splunk").unwrap();
    assert!(matches!(splunk.kind, OutputKind::Splunk { .. }));
    assert_eq!(splunk.tuning.delivery_mode, DeliveryMode::AtMostOnce);
    assert_eq!(splunk.tuning.when_full(), WhenFull::DropNewest);

    let es = config.output("default-es").unwrap();
    assert_eq!(es.tuning.max_write_bytes(), 10_000_000);
    assert_eq!(es.tuning.when_full(), WhenFull::Block);

    let router = Router::new(&config).unwrap();
    assert_eq!(
        router.outputs(),
        ["default-es", "loki", "splunk", "remote-syslog"]
    );

    let sources = SourceSet::for_config(&config);
    assert!(sources.containers);
    assert!(sources.journal);
    assert_eq!(sources.audit.len(), 4);
}

#[test]
fn format_follows_the_extension() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("forwarder.json");
    std::fs::write(
        &path,
        r#"{
  "outputs": [{"name": "es", "type": "elasticsearch", "url": "http://es:9200"}],
  "pipelines": [{"name": "all", "inputRefs": ["application"], "outputRefs": ["es"]}]
}"#,
    )
    .unwrap();

    let config = load_from_path(&path).unwrap();
    assert_eq!(config.outputs[0].name, "es");
}

#[test]
fn every_error_is_reported() {
    let errors = load_from_str(
        r#"
outputs:
  - name: es
    type: elasticsearch
    url: ftp://es
pipelines:
  - name: all
    inputRefs: [nothing]
    outputRefs: [missing]
"#,
        Format::Yaml,
    )
    .unwrap_err()
    .errors();

    assert_eq!(errors.len(), 3, "{errors:?}");
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempdir().unwrap();
    let error = load_from_path(&dir.path().join("absent.yaml")).unwrap_err();
    assert_eq!(error.errors().len(), 1);
}
