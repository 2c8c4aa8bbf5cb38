use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tokio::task::JoinHandle;

struct Guard(JoinHandle<()>);
impl Drop for Guard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn spawn_server(root: &Path, state_dir: &Path, password: Option<&str>) -> (Guard, String) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind 127.0.0.1:0");
    let port = listener.local_addr().unwrap().port();
    let settings = fileport::config::Settings {
        port,
        root_dirs: vec![root.to_path_buf()],
        db_path: state_dir.join("fileport.sqlite3"),
        password: password.map(String::from),
        cors_allow_origins: Vec::new(),
    };
    let handle = tokio::spawn(async move {
        if let Err(e) = fileport::server::run_with_listener(listener, settings).await {
            eprintln!("server task error: {e:?}");
        }
    });
    let base = format!("http://127.0.0.1:{port}");
    wait_until_healthy(&base).await;
    (Guard(handle), base)
}

async fn wait_until_healthy(base: &str) {
    let client = reqwest::Client::new();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(resp) = client.get(format!("{base}/api/health")).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        assert!(std::time::Instant::now() < deadline, "server did not come up");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

fn session_client() -> reqwest::Client {
    reqwest::Client::builder().cookie_store(true).build().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn protected_routes_require_a_session() {
    let root = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let (_g, base) = spawn_server(root.path(), state.path(), Some("s3cret")).await;
    let client = session_client();

    let resp = client.get(format!("{base}/api/list")).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(format!("{base}/api/login"))
        .json(&serde_json::json!({"password": "wrong"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(format!("{base}/api/login"))
        .json(&serde_json::json!({"password": "s3cret"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // the cookie from login authenticates subsequent calls
    let resp = client.get(format!("{base}/api/list")).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client.post(format!("{base}/api/logout")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let resp = client.get(format!("{base}/api/list")).send().await.unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn escaping_paths_are_rejected_uniformly() {
    let root = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let (_g, base) = spawn_server(root.path(), state.path(), None).await;
    let client = session_client();

    for path in ["../../etc", "/etc/passwd", "a/../../../etc"] {
        let resp = client
            .get(format!("{base}/api/list"))
            .query(&[("path", path)])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 403, "path {path:?} should be rejected");
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["code"], "path_not_allowed");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn save_list_move_undo_delete_round_trip() {
    let root = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let (_g, base) = spawn_server(root.path(), state.path(), None).await;
    let client = session_client();

    let resp = client
        .post(format!("{base}/api/save"))
        .json(&serde_json::json!({"path": "notes/todo.txt", "content": "ship it"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(format!("{base}/api/read"))
        .query(&[("path", "notes/todo.txt")])
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["content"], "ship it");

    let resp = client
        .post(format!("{base}/api/mkdir"))
        .json(&serde_json::json!({"path": "archive"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("{base}/api/move"))
        .json(&serde_json::json!({"src": "notes/todo.txt", "dst": "archive"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["skipped"], false);
    let token = body["undo_token"].as_str().unwrap().to_string();
    assert!(root.path().join("archive/todo.txt").is_file());

    let resp = client
        .post(format!("{base}/api/undo"))
        .json(&serde_json::json!({"token": token}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(root.path().join("notes/todo.txt").is_file());

    // token is single-use
    let resp = client
        .post(format!("{base}/api/undo"))
        .json(&serde_json::json!({"token": token}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .post(format!("{base}/api/delete"))
        .json(&serde_json::json!({"path": "notes"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(!root.path().join("notes").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_file_download_sets_disposition_and_streams_bytes() {
    let root = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("report.bin"), vec![42u8; 4096]).unwrap();
    let (_g, base) = spawn_server(root.path(), state.path(), None).await;
    let client = session_client();

    let resp = client
        .get(format!("{base}/api/file"))
        .query(&[("path", "report.bin")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let dispo = resp
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(dispo.starts_with("attachment"));
    assert!(dispo.contains("report.bin"));
    assert_eq!(resp.bytes().await.unwrap().len(), 4096);

    let resp = client
        .get(format!("{base}/api/open"))
        .query(&[("path", "report.bin")])
        .send()
        .await
        .unwrap();
    let dispo = resp
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(dispo.starts_with("inline"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn streamed_zip_decodes_with_folder_prefix() {
    let root = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("docs/sub")).unwrap();
    std::fs::write(root.path().join("docs/a.txt"), b"0123456789").unwrap();
    std::fs::write(root.path().join("docs/sub/b.txt"), b"").unwrap();
    let (_g, base) = spawn_server(root.path(), state.path(), None).await;
    let client = session_client();

    let resp = client
        .get(format!("{base}/api/zip"))
        .query(&[("path", "docs")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("content-type").unwrap(), "application/zip");
    let bytes = resp.bytes().await.unwrap();

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
    assert_eq!(archive.len(), 2);
    let mut content = String::new();
    archive
        .by_name("docs/a.txt")
        .unwrap()
        .read_to_string(&mut content)
        .unwrap();
    assert_eq!(content, "0123456789");
    assert_eq!(archive.by_name("docs/sub/b.txt").unwrap().size(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zip_multiple_roots_each_selection_at_its_basename() {
    let root = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("a.txt"), b"a").unwrap();
    std::fs::create_dir(root.path().join("docs")).unwrap();
    std::fs::write(root.path().join("docs/r.md"), b"r").unwrap();
    let (_g, base) = spawn_server(root.path(), state.path(), None).await;
    let client = session_client();

    let resp = client
        .post(format!("{base}/api/zip/multiple"))
        .json(&serde_json::json!({"paths": ["a.txt", "docs"], "fast": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let bytes = resp.bytes().await.unwrap();
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
    let mut names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["a.txt", "docs/r.md"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn multipart_upload_lands_under_the_destination() {
    let root = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    std::fs::create_dir(root.path().join("inbox")).unwrap();
    let (_g, base) = spawn_server(root.path(), state.path(), None).await;
    let client = session_client();

    let form = reqwest::multipart::Form::new()
        .text("rel_path", "sub/photo.png")
        .part(
            "file",
            reqwest::multipart::Part::bytes(vec![7u8; 128]).file_name("photo.png"),
        );
    let resp = client
        .post(format!("{base}/api/upload"))
        .query(&[("path", "inbox")])
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let uploaded = root.path().join("inbox/sub/photo.png");
    assert_eq!(std::fs::read(uploaded).unwrap().len(), 128);

    // an escaping rel_path is refused
    let form = reqwest::multipart::Form::new()
        .text("rel_path", "../../evil.png")
        .part(
            "file",
            reqwest::multipart::Part::bytes(vec![1u8; 8]).file_name("../../evil.png"),
        );
    let resp = client
        .post(format!("{base}/api/upload"))
        .query(&[("path", "inbox")])
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stat_and_update_meta_round_trip() {
    let root = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("m.txt"), b"meta").unwrap();
    let (_g, base) = spawn_server(root.path(), state.path(), None).await;
    let client = session_client();

    let resp = client
        .post(format!("{base}/api/update_meta"))
        .json(&serde_json::json!({"path": "m.txt", "modified": 1700000000.0, "readonly": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(format!("{base}/api/stat"))
        .query(&[("path", "m.txt")])
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["meta"]["readonly"], true);
    assert_eq!(body["meta"]["modified"].as_f64().unwrap().trunc() as i64, 1_700_000_000);
    assert_eq!(body["meta"]["size"], 4);

    // restore so the tempdir can be cleaned up
    let resp = client
        .post(format!("{base}/api/update_meta"))
        .json(&serde_json::json!({"path": "m.txt", "readonly": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}
