use std::process::{Command, Output};

use serde_json::Value;
use wiremock::matchers::{method, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STORAGE_VARS: &[&str] = &[
    "BUCKETVIEW_ENDPOINT",
    "BUCKETVIEW_ACCESS_KEY_ID",
    "BUCKETVIEW_SECRET_ACCESS_KEY",
    "BUCKETVIEW_REGION",
    "BUCKETVIEW_BUCKET",
    "BUCKETVIEW_PATH_STYLE",
    "BUCKETVIEW_PUBLIC_URL_BASE",
    "BUCKETVIEW_CACHE_DIR",
];

const LISTING: &str = "<ListBucketResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
     <Name>b</Name><IsTruncated>false</IsTruncated>\
     <Contents><Key>docs/2024.1.05..12.00.00-report.pdf</Key><Size>3</Size></Contents>\
     <Contents><Key>docs/img/cat.png</Key><Size>3</Size></Contents>\
     </ListBucketResult>";

fn run_cli(args: &[&str], envs: &[(&str, String)]) -> Output {
    let exe = env!("CARGO_BIN_EXE_bucketviewd");
    let workdir = tempfile::tempdir().expect("tempdir");
    let mut command = Command::new(exe);
    command
        .args(args)
        .current_dir(workdir.path())
        .env("BUCKETVIEW_CONFIG", workdir.path().join("settings.json"))
        .env("RUST_LOG", "warn");
    for var in STORAGE_VARS {
        command.env_remove(var);
    }
    command.env("BUCKETVIEW_CACHE_DIR", workdir.path().join("cache"));
    for (key, value) in envs {
        command.env(key, value);
    }
    command.output().expect("bucketviewd should execute")
}

#[test]
fn help_lists_primary_commands() {
    let output = run_cli(&["--help"], &[]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["ls", "tree", "mkdir", "rmdir", "mv", "upload", "watch", "settings"] {
        assert!(stdout.contains(command), "missing {command}");
    }
}

#[test]
fn settings_outputs_redacted_json() {
    let output = run_cli(
        &["settings"],
        &[("BUCKETVIEW_SECRET_ACCESS_KEY", "shh-very-secret".to_string())],
    );
    assert!(output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout).expect("valid json");
    assert_eq!(json["region"], "us-east-1");
    assert_eq!(json["secret_access_key"], "<redacted>");
    assert_eq!(json["configured"], false);
    assert!(!String::from_utf8_lossy(&output.stdout).contains("shh-very-secret"));
}

#[test]
fn ls_without_storage_fails_with_hint() {
    let output = run_cli(&["ls"], &[]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("BUCKETVIEW_ENDPOINT"), "{stderr}");
}

fn storage_env(server: &MockServer) -> Vec<(&'static str, String)> {
    vec![
        ("BUCKETVIEW_ENDPOINT", server.uri()),
        ("BUCKETVIEW_ACCESS_KEY_ID", "AKID".to_string()),
        ("BUCKETVIEW_SECRET_ACCESS_KEY", "secret".to_string()),
        ("BUCKETVIEW_BUCKET", "b".to_string()),
    ]
}

async fn mount_listing(server: &MockServer, expected: u64) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/b/?$"))
        .and(query_param("list-type", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/xml")
                .set_body_string(LISTING),
        )
        .expect(expected)
        .mount(server)
        .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn ls_prints_folders_and_files() {
    let server = MockServer::start().await;
    mount_listing(&server, 1).await;

    let envs = storage_env(&server);
    let output = tokio::task::spawn_blocking(move || run_cli(&["ls", "/docs", "--json"], &envs))
        .await
        .unwrap();

    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let json: Value = serde_json::from_slice(&output.stdout).expect("valid json");
    assert_eq!(json["folder"], "/docs");
    assert_eq!(json["folders"], serde_json::json!(["img"]));
    assert_eq!(json["files"][0]["filename_minus_date"], "report.pdf");
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_folder_route_is_refused() {
    let server = MockServer::start().await;
    mount_listing(&server, 2).await;

    let envs = storage_env(&server);
    let output = tokio::task::spawn_blocking(move || {
        let ls = run_cli(&["ls", "/folder/nope"], &envs);
        let mkdir = run_cli(&["mkdir", "/folder/nope", "x"], &envs);
        (ls, mkdir)
    })
    .await
    .unwrap();

    for output in [output.0, output.1] {
        assert!(!output.status.success());
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("folder not found: /nope"), "{stderr}");
    }
    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|request| request.method.as_str() == "GET"));
}

#[tokio::test(flavor = "multi_thread")]
async fn cached_ls_reuses_previous_listing() {
    let server = MockServer::start().await;
    mount_listing(&server, 1).await;

    let cache_dir = tempfile::tempdir().unwrap();
    let mut envs = storage_env(&server);
    envs.push((
        "BUCKETVIEW_CACHE_DIR",
        cache_dir.path().display().to_string(),
    ));
    let (first, second) = tokio::task::spawn_blocking(move || {
        let first = run_cli(&["ls", "/docs", "--json"], &envs);
        let second = run_cli(&["ls", "/file/docs/img/cat.png", "--json", "--cached"], &envs);
        (first, second)
    })
    .await
    .unwrap();

    assert!(first.status.success(), "{}", String::from_utf8_lossy(&first.stderr));
    assert!(second.status.success(), "{}", String::from_utf8_lossy(&second.stderr));
    let json: Value = serde_json::from_slice(&second.stdout).expect("valid json");
    assert_eq!(json["folder"], "/docs/img");
    assert_eq!(json["selected"]["filename"], "cat.png");
    assert!(cache_dir.path().join("b.json").exists());
}
