mod support;

use std::{fs, sync::Arc, time::Duration};

use log_forwarder::{
    status::{self, ConditionType, STATUS_FILE_NAME, StatusReporter},
    topology::{ReloadOutcome, RunningTopology},
};
use similar_asserts::assert_eq;
use tempfile::tempdir;

use wiremock::{Mock, MockServer, ResponseTemplate, matchers::method};

use crate::support::{
    accepting_server, append_container_log, checkpoint_position, checkpoints, config, http_output,
    messages, posted_documents, wait_for_documents, write_container_log,
};

fn single_output(server: &wiremock::MockServer, name: &str) -> String {
    format!(
        "outputs:{}\npipelines:\n  - name: apps\n    inputRefs: [application]\n    outputRefs: [{name}]\n",
        http_output(name, server)
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delivers_container_logs_and_checkpoints_them() {
    let logs = tempdir().unwrap();
    let data_dir = tempdir().unwrap();
    let server = accepting_server().await;
    let file = write_container_log(logs.path(), "app-one", "web-1", "nginx", &["a", "b", "c"]);

    let config = config(logs.path(), data_dir.path(), &single_output(&server, "sink"));
    let status = Arc::new(StatusReporter::new(data_dir.path()));
    let (topology, _crashed) = RunningTopology::start(config, status).await.unwrap();
    assert_eq!(topology.generation().id, 1);

    let docs = wait_for_documents(&server, "/sink", 3).await;
    topology.stop().await;

    assert_eq!(messages(&docs), vec!["a", "b", "c"]);
    assert_eq!(docs[0]["log_type"], "application");
    assert_eq!(docs[0]["log_source"], "container");
    assert_eq!(docs[0]["hostname"], "node-1");
    assert_eq!(docs[0]["kubernetes"]["namespace_name"], "app-one");
    assert_eq!(docs[0]["kubernetes"]["container_name"], "nginx");

    let len = fs::metadata(&file).unwrap().len();
    let checkpoints = checkpoints(data_dir.path());
    assert_eq!(
        checkpoints[file.to_str().unwrap()]["position"].as_u64(),
        Some(len)
    );

    let document = status::read(&data_dir.path().join(STATUS_FILE_NAME)).unwrap();
    assert_eq!(document.generation, 1);
    assert_eq!(document.outputs["sink"].kind, ConditionType::Ready);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn restart_resumes_after_the_last_delivered_line() {
    let logs = tempdir().unwrap();
    let data_dir = tempdir().unwrap();
    let file = write_container_log(logs.path(), "app-one", "web-1", "nginx", &["first", "second"]);

    let server = accepting_server().await;
    let rest = single_output(&server, "sink");
    let (topology, _crashed) = RunningTopology::start(
        config(logs.path(), data_dir.path(), &rest),
        Arc::new(StatusReporter::new(data_dir.path())),
    )
    .await
    .unwrap();
    wait_for_documents(&server, "/sink", 2).await;
    topology.stop().await;

    append_container_log(&file, &["third"]);

    let server = accepting_server().await;
    let rest = single_output(&server, "sink");
    let (topology, _crashed) = RunningTopology::start(
        config(logs.path(), data_dir.path(), &rest),
        Arc::new(StatusReporter::new(data_dir.path())),
    )
    .await
    .unwrap();
    wait_for_documents(&server, "/sink", 1).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    topology.stop().await;

    let docs = posted_documents(&server, "/sink").await;
    assert_eq!(messages(&docs), vec!["third"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pipelines_route_by_namespace() {
    let logs = tempdir().unwrap();
    let data_dir = tempdir().unwrap();
    let server = accepting_server().await;
    write_container_log(logs.path(), "app-one", "web-1", "nginx", &["one"]);
    write_container_log(logs.path(), "app-two", "api-1", "server", &["two"]);

    let rest = format!(
        r#"
inputs:
  - name: first
    type: application
    application:
      includes:
        - namespace: app-one
  - name: everything-but-first
    type: application
    application:
      excludes:
        - namespace: app-one
outputs:{first}{second}{all}
pipelines:
  - name: first
    inputRefs: [first]
    outputRefs: [first]
  - name: rest
    inputRefs: [everything-but-first]
    outputRefs: [second]
  - name: all
    inputRefs: [application]
    outputRefs: [all]
"#,
        first = http_output("first", &server),
        second = http_output("second", &server),
        all = http_output("all", &server),
    );
    let (topology, _crashed) = RunningTopology::start(
        config(logs.path(), data_dir.path(), &rest),
        Arc::new(StatusReporter::in_memory()),
    )
    .await
    .unwrap();

    let mut all = messages(&wait_for_documents(&server, "/all", 2).await);
    let first = messages(&wait_for_documents(&server, "/first", 1).await);
    let second = messages(&wait_for_documents(&server, "/second", 1).await);
    tokio::time::sleep(Duration::from_millis(500)).await;
    topology.stop().await;

    all.sort();
    assert_eq!(all, vec!["one", "two"]);
    assert_eq!(first, vec!["one"]);
    assert_eq!(second, vec!["two"]);
    assert_eq!(posted_documents(&server, "/first").await.len(), 1);
    assert_eq!(posted_documents(&server, "/second").await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reload_drains_then_swaps_outputs() {
    let logs = tempdir().unwrap();
    let data_dir = tempdir().unwrap();
    let server = accepting_server().await;
    let file = write_container_log(logs.path(), "app-one", "web-1", "nginx", &["before"]);

    let status = Arc::new(StatusReporter::new(data_dir.path()));
    let (mut topology, _crashed) = RunningTopology::start(
        config(logs.path(), data_dir.path(), &single_output(&server, "old")),
        Arc::clone(&status),
    )
    .await
    .unwrap();
    wait_for_documents(&server, "/old", 1).await;

    let outcome = topology
        .reload(config(
            logs.path(),
            data_dir.path(),
            &single_output(&server, "new"),
        ))
        .await;
    assert_eq!(outcome, ReloadOutcome::Reloaded { generation: 2 });
    assert_eq!(topology.generation().id, 2);

    append_container_log(&file, &["after"]);
    let docs = wait_for_documents(&server, "/new", 1).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    topology.stop().await;

    assert_eq!(messages(&docs), vec!["after"]);
    assert_eq!(messages(&posted_documents(&server, "/old").await), vec!["before"]);

    let document = status.snapshot();
    assert_eq!(document.generation, 2);
    assert!(document.outputs.contains_key("new"));
    assert!(!document.outputs.contains_key("old"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_reload_keeps_the_running_generation() {
    let logs = tempdir().unwrap();
    let data_dir = tempdir().unwrap();
    let server = accepting_server().await;
    let file = write_container_log(logs.path(), "app-one", "web-1", "nginx", &["kept"]);

    let status = Arc::new(StatusReporter::new(data_dir.path()));
    let (mut topology, _crashed) = RunningTopology::start(
        config(logs.path(), data_dir.path(), &single_output(&server, "sink")),
        Arc::clone(&status),
    )
    .await
    .unwrap();
    wait_for_documents(&server, "/sink", 1).await;

    let mut broken = config(logs.path(), data_dir.path(), &single_output(&server, "sink"));
    broken.collector.container_logs.include = vec![format!("{}/[*.log", logs.path().display())];
    let ReloadOutcome::Rejected { errors } = topology.reload(broken).await else {
        panic!("reload should have been rejected");
    };
    assert!(!errors.is_empty());
    assert_eq!(topology.generation().id, 1);

    let document = status.snapshot();
    assert_eq!(
        document.config.as_ref().map(|condition| condition.kind),
        Some(ConditionType::Invalid)
    );
    assert_eq!(document.config_errors, errors);

    append_container_log(&file, &["still running"]);
    let docs = wait_for_documents(&server, "/sink", 2).await;
    topology.stop().await;
    assert_eq!(messages(&docs), vec!["kept", "still running"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocked_output_holds_the_checkpoint_until_it_drains() {
    let logs = tempdir().unwrap();
    let data_dir = tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let lines = ["one", "two", "three", "four", "five"];
    let file = write_container_log(logs.path(), "app-one", "web-1", "nginx", &lines);

    let rest = format!(
        r#"
outputs:
  - name: sink
    type: http
    url: {uri}/sink
    tuning:
      minRetryDuration: 1
      maxRetryDuration: 2
      buffer:
        maxEvents: 1
        whenFull: block
pipelines:
  - name: apps
    inputRefs: [application]
    outputRefs: [sink]
"#,
        uri = server.uri()
    );
    let mut config = config(logs.path(), data_dir.path(), &rest);
    config.collector.checkpoint_interval = Duration::from_secs(1);
    let (topology, _crashed) =
        RunningTopology::start(config, Arc::new(StatusReporter::in_memory()))
            .await
            .unwrap();

    tokio::time::sleep(Duration::from_millis(2000)).await;
    let len = fs::metadata(&file).unwrap().len();
    assert!(
        checkpoint_position(data_dir.path(), &file).is_none_or(|position| position < len),
        "checkpoint advanced past records the output has not delivered"
    );
    assert!(server.received_requests().await.unwrap_or_default().len() <= 1);

    let docs = wait_for_documents(&server, "/sink", lines.len()).await;
    assert_eq!(messages(&docs), lines);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(checkpoint_position(data_dir.path(), &file), Some(len));
    topology.stop().await;
}
