// Not every test file uses every helper.
#![allow(dead_code)]

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use log_forwarder::config::{ForwarderConfig, Format, load_from_str};
use serde_json::Value;
use wiremock::{Mock, MockServer, Request, ResponseTemplate, matchers::method};

/// Writes container log lines the way the kubelet lays them out and returns the file path.
pub fn write_container_log(
    root: &Path,
    namespace: &str,
    pod: &str,
    container: &str,
    messages: &[&str],
) -> PathBuf {
    let dir = root
        .join(format!("{namespace}_{pod}_{}", pod_uid(pod)))
        .join(container);
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("0.log");
    append_container_log(&path, messages);
    path
}

pub fn append_container_log(path: &Path, messages: &[&str]) {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    for message in messages {
        writeln!(file, "2024-05-01T10:00:00.000000001Z stdout F {message}").unwrap();
    }
    file.sync_all().unwrap();
}

fn pod_uid(pod: &str) -> String {
    format!("{:08x}-0000-4000-8000-000000000000", pod.len())
}

/// A forwarder configuration reading container logs below `logs` and keeping its state in
/// `data_dir`. `rest` holds the inputs, outputs and pipelines.
pub fn config(logs: &Path, data_dir: &Path, rest: &str) -> ForwarderConfig {
    let yaml = format!(
        r#"
dataDir: {data_dir}
collector:
  hostname: node-1
  drainTimeout: 5
  containerLogs:
    include: ["{logs}/*/*/*.log"]
    exclude: []
    globInterval: 1
  journal:
    enabled: false
{rest}
"#,
        data_dir = data_dir.display(),
        logs = logs.display(),
    );
    load_from_str(&yaml, Format::Yaml).unwrap()
}

/// An http output named `name` posting to `server`.
pub fn http_output(name: &str, server: &MockServer) -> String {
    format!(
        r#"
  - name: {name}
    type: http
    url: {uri}/{name}
    tuning:
      minRetryDuration: 1
      maxRetryDuration: 2
"#,
        uri = server.uri()
    )
}

/// Accepts every write.
pub async fn accepting_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

/// The documents posted to `server` under `path`, in arrival order.
pub async fn posted_documents(server: &MockServer, path: &str) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.method.as_str() == "POST" && request.url.path() == path)
        .flat_map(documents)
        .collect()
}

fn documents(request: &Request) -> Vec<Value> {
    request
        .body
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_slice(line).unwrap())
        .collect()
}

pub fn messages(documents: &[Value]) -> Vec<String> {
    documents
        .iter()
        .map(|doc| doc["message"].as_str().unwrap().to_owned())
        .collect()
}

/// Polls until `path` on `server` received `count` documents.
pub async fn wait_for_documents(server: &MockServer, path: &str, count: usize) -> Vec<Value> {
    for _ in 0..200 {
        let docs = posted_documents(server, path).await;
        if docs.len() >= count {
            return docs;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{path} did not receive {count} documents in time");
}

/// Checkpointed position of every file, keyed by path.
pub fn checkpoints(data_dir: &Path) -> Value {
    let bytes = fs::read(data_dir.join("checkpoints.json")).unwrap();
    let state: Value = serde_json::from_slice(&bytes).unwrap();
    state["checkpoints"].clone()
}

/// Checkpointed position of `file`, if the checkpoint file mentions it yet.
pub fn checkpoint_position(data_dir: &Path, file: &Path) -> Option<u64> {
    let bytes = fs::read(data_dir.join("checkpoints.json")).ok()?;
    let state: Value = serde_json::from_slice(&bytes).ok()?;
    state["checkpoints"][file.to_str()?]["position"].as_u64()
}
