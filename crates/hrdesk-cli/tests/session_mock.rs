use std::fs;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::{Value, json};
use tempfile::tempdir;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn write_tokens(home: &Path, access: &str, refresh: &str) {
    fs::write(
        home.join("tokens.json"),
        json!({ "accessToken": access, "refreshToken": refresh }).to_string(),
    )
    .unwrap();
}

fn read_tokens(home: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(home.join("tokens.json")).unwrap()).unwrap()
}

#[tokio::test]
async fn test_login_stores_token_pair() {
    let dir = tempdir().unwrap();
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/Auth/Login"))
        .and(body_json(json!({ "userName": "hr.admin", "password": "s3cret" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jwtToken": "access-from-login",
            "refreshToken": "refresh-from-login"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    cargo_bin_cmd!("hrdesk")
        .env("HRDESK_HOME", dir.path())
        .args(["login", "--user", "hr.admin", "--password", "s3cret"])
        .args(["--base-url", &mock_server.uri()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Logged in as hr.admin"));

    let tokens = read_tokens(dir.path());
    assert_eq!(tokens["accessToken"], "access-from-login");
    assert_eq!(tokens["refreshToken"], "refresh-from-login");
}

#[tokio::test]
async fn test_login_reads_password_from_stdin() {
    let dir = tempdir().unwrap();
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/Auth/Login"))
        .and(body_json(json!({ "userName": "hr.admin", "password": "from-stdin" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jwtToken": "a1",
            "refreshToken": "r1"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    cargo_bin_cmd!("hrdesk")
        .env("HRDESK_HOME", dir.path())
        .env_remove("HRDESK_PASSWORD")
        .args(["login", "-u", "hr.admin"])
        .args(["--base-url", &mock_server.uri()])
        .write_stdin("from-stdin\n")
        .assert()
        .success();

    assert_eq!(read_tokens(dir.path())["accessToken"], "a1");
}

#[tokio::test]
async fn test_rejected_login_leaves_no_tokens() {
    let dir = tempdir().unwrap();
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/Auth/Login"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/Auth/RefreshToken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    cargo_bin_cmd!("hrdesk")
        .env("HRDESK_HOME", dir.path())
        .args(["login", "--user", "hr.admin", "--password", "wrong"])
        .args(["--base-url", &mock_server.uri()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("login failed"));

    assert!(!dir.path().join("tokens.json").exists());
}

#[test]
fn test_logout_clears_tokens() {
    let dir = tempdir().unwrap();
    write_tokens(dir.path(), "a1", "r1");

    cargo_bin_cmd!("hrdesk")
        .env("HRDESK_HOME", dir.path())
        .arg("logout")
        .assert()
        .success()
        .stdout(predicate::str::contains("Logged out."));

    assert!(!dir.path().join("tokens.json").exists());

    cargo_bin_cmd!("hrdesk")
        .env("HRDESK_HOME", dir.path())
        .arg("logout")
        .assert()
        .success()
        .stdout(predicate::str::contains("Not logged in."));
}

#[test]
fn test_status_reports_session() {
    let dir = tempdir().unwrap();

    cargo_bin_cmd!("hrdesk")
        .env("HRDESK_HOME", dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Not logged in."));

    write_tokens(dir.path(), "opaque-token", "r1");

    cargo_bin_cmd!("hrdesk")
        .env("HRDESK_HOME", dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Logged in."));
}

#[tokio::test]
async fn test_request_attaches_stored_token() {
    let dir = tempdir().unwrap();
    write_tokens(dir.path(), "a1", "r1");
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/Employee/Employees"))
        .and(header("authorization", "Bearer a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "name": "Ada" }])))
        .expect(1)
        .mount(&mock_server)
        .await;

    cargo_bin_cmd!("hrdesk")
        .env("HRDESK_HOME", dir.path())
        .args(["request", "get", "Employee/Employees"])
        .args(["--base-url", &mock_server.uri()])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"name\": \"Ada\""));
}

#[tokio::test]
async fn test_request_renews_expired_token_and_persists_pair() {
    let dir = tempdir().unwrap();
    write_tokens(dir.path(), "old-access", "old-refresh");
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/Goal/Goals"))
        .and(header("authorization", "Bearer old-access"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/Auth/RefreshToken"))
        .and(body_json(json!({
            "jwtToken": "old-access",
            "refreshToken": "old-refresh"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "newJwtToken": "new-access",
            "newRefreshToken": "new-refresh"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/Goal/Goals"))
        .and(header("authorization", "Bearer new-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "title": "Ship it" }])))
        .expect(1)
        .mount(&mock_server)
        .await;

    cargo_bin_cmd!("hrdesk")
        .env("HRDESK_HOME", dir.path())
        .args(["request", "GET", "Goal/Goals"])
        .args(["--base-url", &mock_server.uri()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Ship it"));

    let tokens = read_tokens(dir.path());
    assert_eq!(tokens["accessToken"], "new-access");
    assert_eq!(tokens["refreshToken"], "new-refresh");
}

#[tokio::test]
async fn test_request_failed_renewal_logs_out() {
    let dir = tempdir().unwrap();
    write_tokens(dir.path(), "old-access", "revoked");
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/Goal/Goals"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/Auth/RefreshToken"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid refresh token"))
        .expect(1)
        .mount(&mock_server)
        .await;

    cargo_bin_cmd!("hrdesk")
        .env("HRDESK_HOME", dir.path())
        .args(["request", "GET", "Goal/Goals"])
        .args(["--base-url", &mock_server.uri()])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "Session expired. Please log in again (/login).",
        ));

    assert!(!dir.path().join("tokens.json").exists());
}

#[tokio::test]
async fn test_request_passes_through_not_found() {
    let dir = tempdir().unwrap();
    write_tokens(dir.path(), "a1", "r1");
    let mock_server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/Employee/42"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such employee"))
        .expect(1)
        .mount(&mock_server)
        .await;

    cargo_bin_cmd!("hrdesk")
        .env("HRDESK_HOME", dir.path())
        .args(["request", "DELETE", "Employee/42"])
        .args(["--base-url", &mock_server.uri()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("404"));

    assert_eq!(read_tokens(dir.path())["accessToken"], "a1");
}

#[tokio::test]
async fn test_request_sends_body_and_extra_headers() {
    let dir = tempdir().unwrap();
    write_tokens(dir.path(), "a1", "r1");
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/Goal/Goals"))
        .and(header("x-tenant", "acme"))
        .and(body_json(json!({ "title": "Hire" })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    cargo_bin_cmd!("hrdesk")
        .env("HRDESK_HOME", dir.path())
        .args(["request", "POST", "Goal/Goals"])
        .args(["--data", r#"{"title":"Hire"}"#])
        .args(["-H", "X-Tenant: acme"])
        .args(["--base-url", &mock_server.uri()])
        .assert()
        .success()
        .stdout(predicate::str::contains("204"));
}
