use std::fs;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;

/// Minimal loopback stand-in for both external APIs: the Graph-style
/// source (token + listings) and the workplace-search-style index
/// (bulk_create / bulk_destroy). Requests to the index are recorded so
/// tests can assert on dispatched payloads.
struct StubServer {
    base_url: String,
    destroyed: Arc<Mutex<Vec<String>>>,
    created: Arc<Mutex<Vec<String>>>,
}

fn read_request(stream: &mut TcpStream) -> (String, String) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = stream.read(&mut chunk).expect("read request");
        if n == 0 {
            break buf.len();
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);

    let mut body = buf[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).expect("read body");
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    let request_line = head.lines().next().unwrap_or_default().to_string();
    (request_line, String::from_utf8_lossy(&body).to_string())
}

fn respond(stream: &mut TcpStream, body: &str) {
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes());
}

fn respond_not_found(stream: &mut TcpStream, path: &str) {
    let body = format!("{{\"error\":\"no stub route for {path}\"}}");
    let response = format!(
        "HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes());
}

impl StubServer {
    fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub server");
        let port = listener.local_addr().expect("local addr").port();
        let destroyed = Arc::new(Mutex::new(Vec::new()));
        let created = Arc::new(Mutex::new(Vec::new()));

        let destroyed_log = Arc::clone(&destroyed);
        let created_log = Arc::clone(&created);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else {
                    continue;
                };
                let (request_line, body) = read_request(&mut stream);
                let path = request_line.split_whitespace().nth(1).unwrap_or_default();

                if path.contains("/oauth2/v2.0/token") {
                    respond(
                        &mut stream,
                        "{\"access_token\":\"stub-token\",\"expires_in\":3600}",
                    );
                } else if path.contains("/documents/bulk_destroy") {
                    let ids: Vec<String> = serde_json::from_str(&body).unwrap_or_default();
                    destroyed_log.lock().unwrap().extend(ids.iter().cloned());
                    let results: Vec<String> = ids
                        .iter()
                        .map(|id| format!("{{\"id\":\"{id}\",\"errors\":[]}}"))
                        .collect();
                    respond(
                        &mut stream,
                        &format!("{{\"results\":[{}]}}", results.join(",")),
                    );
                } else if path.contains("/documents/bulk_create") {
                    let docs: Vec<serde_json::Value> = serde_json::from_str(&body).unwrap_or_default();
                    let mut results = Vec::new();
                    for doc in &docs {
                        let id = doc.get("id").and_then(|v| v.as_str()).unwrap_or_default();
                        created_log.lock().unwrap().push(id.to_string());
                        results.push(format!("{{\"id\":\"{id}\",\"errors\":[]}}"));
                    }
                    respond(
                        &mut stream,
                        &format!("{{\"results\":[{}]}}", results.join(",")),
                    );
                } else if path.contains("/filesFolder") {
                    respond(&mut stream, "{}");
                } else if path.contains("/messages") {
                    respond(
                        &mut stream,
                        "{\"value\":[{\"id\":\"m1\",\"subject\":\"standup\",\"body\":{\"content\":\"notes from standup\"},\"webUrl\":\"https://example/m1\"}]}",
                    );
                } else if path.contains("/tabs") {
                    respond(&mut stream, "{\"value\":[]}");
                } else if path.contains("/channels") {
                    respond(
                        &mut stream,
                        "{\"value\":[{\"id\":\"c1\",\"displayName\":\"General\"}]}",
                    );
                } else if path.contains("/v1.0/teams") {
                    respond(
                        &mut stream,
                        "{\"value\":[{\"id\":\"t1\",\"displayName\":\"Team One\"}]}",
                    );
                } else {
                    respond_not_found(&mut stream, path);
                }
            }
        });

        Self {
            base_url: format!("http://127.0.0.1:{port}"),
            destroyed,
            created,
        }
    }
}

fn connector_cmd(home: &Path, server: &StubServer) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("graphsync");
    cmd.env("GRAPHSYNC_HOME", home)
        .env("GRAPHSYNC_CONFIG_PATH", home.join("missing.toml"))
        .env("GRAPHSYNC_SOURCE_BASE_URL", &server.base_url)
        .env("GRAPHSYNC_LOGIN_URL", &server.base_url)
        .env("GRAPHSYNC_TENANT_ID", "stub-tenant")
        .env("GRAPHSYNC_CLIENT_ID", "stub-client")
        .env("GRAPHSYNC_CLIENT_SECRET", "stub-secret")
        .env("GRAPHSYNC_INDEX_BASE_URL", &server.base_url)
        .env("GRAPHSYNC_INDEX_CONTENT_SOURCE_ID", "src1")
        .env("GRAPHSYNC_INDEX_API_KEY", "stub-key")
        .env("GRAPHSYNC_DOMAIN_USER_CHATS", "false")
        .env("GRAPHSYNC_DOMAIN_CALENDAR", "false");
    cmd
}

fn seed_teams_ledger(home: &Path, entries_json: &str) {
    let ledgers = home.join("ledgers");
    fs::create_dir_all(&ledgers).expect("mkdir ledgers");
    fs::write(
        ledgers.join("teams.json"),
        format!("{{\"global_keys\":{entries_json},\"delete_keys\":[]}}\n"),
    )
    .expect("write ledger");
}

#[test]
fn reconcile_retracts_orphans_and_keeps_exempt_entries() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let home = tmp.path().join("graphsync");
    fs::create_dir_all(&home).expect("mkdir home");
    let server = StubServer::start();

    // m_gone vanished at the source; drv1 is an exempt container that the
    // live snapshot also does not contain.
    seed_teams_ledger(
        &home,
        r#"[
            {"id":"t1","type":"team","parent_id":"","super_parent_id":""},
            {"id":"c1","type":"channel","parent_id":"t1","super_parent_id":""},
            {"id":"m1","type":"channel_message","parent_id":"c1","super_parent_id":"t1"},
            {"id":"m_gone","type":"channel_message","parent_id":"c1","super_parent_id":"t1"},
            {"id":"drv1","type":"channel_drive","parent_id":"c1","super_parent_id":"t1"}
        ]"#,
    );

    connector_cmd(&home, &server)
        .arg("reconcile")
        .arg("--domain")
        .arg("teams")
        .assert()
        .success();

    let destroyed = server.destroyed.lock().unwrap().clone();
    assert_eq!(destroyed, vec!["m_gone".to_string()]);

    let raw = fs::read_to_string(home.join("ledgers/teams.json")).expect("read ledger");
    let ledger: serde_json::Value = serde_json::from_str(&raw).expect("parse ledger");
    let global_ids: Vec<&str> = ledger["global_keys"]
        .as_array()
        .expect("global_keys array")
        .iter()
        .map(|e| e["id"].as_str().unwrap())
        .collect();
    assert_eq!(global_ids, vec!["t1", "c1", "m1", "drv1"]);

    // delete_keys holds the pre-reconcile snapshot, m_gone included.
    let snapshot_ids: Vec<&str> = ledger["delete_keys"]
        .as_array()
        .expect("delete_keys array")
        .iter()
        .map(|e| e["id"].as_str().unwrap())
        .collect();
    assert!(snapshot_ids.contains(&"m_gone"));
}

#[test]
fn reconcile_dry_run_reports_without_deleting() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let home = tmp.path().join("graphsync");
    fs::create_dir_all(&home).expect("mkdir home");
    let server = StubServer::start();

    seed_teams_ledger(
        &home,
        r#"[{"id":"m_gone","type":"channel_message","parent_id":"","super_parent_id":""}]"#,
    );

    connector_cmd(&home, &server)
        .arg("reconcile")
        .arg("--domain")
        .arg("teams")
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicates::str::contains("would_delete=m_gone"));

    assert!(server.destroyed.lock().unwrap().is_empty());

    // The ledger file was not rewritten.
    let raw = fs::read_to_string(home.join("ledgers/teams.json")).expect("read ledger");
    assert!(raw.contains("m_gone"));
}

#[test]
fn watch_once_ingests_and_builds_the_ledger() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let home = tmp.path().join("graphsync");
    fs::create_dir_all(&home).expect("mkdir home");
    let server = StubServer::start();

    connector_cmd(&home, &server)
        .arg("watch")
        .arg("--once")
        .assert()
        .success();

    let created = server.created.lock().unwrap().clone();
    assert!(created.contains(&"t1".to_string()));
    assert!(created.contains(&"c1".to_string()));
    assert!(created.contains(&"m1".to_string()));
    assert!(server.destroyed.lock().unwrap().is_empty());

    let raw = fs::read_to_string(home.join("ledgers/teams.json")).expect("read ledger");
    let ledger: serde_json::Value = serde_json::from_str(&raw).expect("parse ledger");
    assert_eq!(ledger["global_keys"].as_array().unwrap().len(), 3);

    let state_file = home.join("state/teams_state.json");
    let state_raw = fs::read_to_string(state_file).expect("read state");
    assert!(state_raw.contains("indexed_hashes"));

    assert!(home.join("logs/audit.log").exists());
}
