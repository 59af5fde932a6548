//! Integration tests for the archiver
//!
//! These tests use wiremock to stand in for the remote API and run whole
//! archive runs against a temporary database.

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thread_archiver::config::{Config, DateBound};
use thread_archiver::crawler::Coordinator;
use thread_archiver::output::TargetOutcome;
use thread_archiver::storage::{ItemKind, RunStatus, SqliteStorage, Storage};
use thread_archiver::TargetKind;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

const NEWEST: i64 = 1_700_000_000;

/// Creates a test configuration pointed at the mock server
fn create_test_config(server: &MockServer, db_path: &Path) -> Config {
    let mut config = Config::default();
    config.api.base_url = server.uri();
    config.api.oauth_base_url = server.uri();
    config.api.token_url = format!("{}/api/v1/access_token", server.uri());
    config.output.database_path = db_path.to_string_lossy().to_string();
    config.scheduler.min_time = 0; // Very short for testing
    config.scheduler.max_retries = 0;
    config
}

fn temp_db() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("archive.db");
    (dir, db_path)
}

/// A post created `index` minutes before `NEWEST`
fn post(index: usize, selftext: &str, author: &str) -> Value {
    json!({
        "kind": "t3",
        "data": {
            "id": format!("p{}", index),
            "name": format!("t3_p{}", index),
            "title": format!("Post number {}", index),
            "selftext": selftext,
            "author": author,
            "created_utc": (NEWEST - index as i64 * 60) as f64,
            "url": format!("https://example.com/{}", index)
        }
    })
}

fn listing(children: Vec<Value>, after: Option<&str>) -> Value {
    json!({
        "kind": "Listing",
        "data": { "after": after, "children": children }
    })
}

fn comment(id: &str, parent: &str, replies: Value) -> Value {
    json!({
        "kind": "t1",
        "data": {
            "id": id,
            "name": format!("t1_{}", id),
            "parent_id": parent,
            "author": "commenter",
            "body": format!("comment {}", id),
            "created_utc": NEWEST as f64,
            "replies": replies
        }
    })
}

async fn mount_community(server: &MockServer, posts: Vec<Value>, after: Option<&str>) {
    Mock::given(method("GET"))
        .and(path("/r/test/new.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(posts, after)))
        .mount(server)
        .await;
}

/// Matches a listing request that carries no `after` cursor
struct FirstPage;

impl Match for FirstPage {
    fn matches(&self, request: &Request) -> bool {
        !request.url.query_pairs().any(|(key, _)| key == "after")
    }
}

/// Mounts one page of `r/test`, served for requests with the given cursor
async fn mount_page(
    server: &MockServer,
    cursor: Option<&str>,
    posts: Vec<Value>,
    next: Option<&str>,
) {
    let mock = Mock::given(method("GET")).and(path("/r/test/new.json"));
    let mock = match cursor {
        Some(cursor) => mock.and(query_param("after", cursor)),
        None => mock.and(FirstPage),
    };
    mock.respond_with(ResponseTemplate::new(200).set_body_json(listing(posts, next)))
        .mount(server)
        .await;
}

/// The `after` cursor of every listing request, in order
async fn listing_cursors(server: &MockServer) -> Vec<Option<String>> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|request| request.url.path() == "/r/test/new.json")
        .map(|request| {
            request
                .url
                .query_pairs()
                .find(|(key, _)| key == "after")
                .map(|(_, value)| value.into_owned())
        })
        .collect()
}

fn account(id: &str, name: &str) -> Value {
    json!({
        "kind": "t2",
        "data": {
            "id": id,
            "name": name,
            "created_utc": (NEWEST - 86_400) as f64,
            "link_karma": 42
        }
    })
}

async fn mount_profile(server: &MockServer, id: &str, name: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/user/{}/about.json", name)))
        .respond_with(ResponseTemplate::new(200).set_body_json(account(id, name)))
        .mount(server)
        .await;
}

fn bound(timestamp: i64) -> DateBound {
    DateBound(Utc.timestamp_opt(timestamp, 0).unwrap())
}

#[tokio::test]
async fn test_limited_listing_then_zero_write_rerun() {
    let server = MockServer::start().await;
    let (_dir, db_path) = temp_db();

    let posts = (0..5).map(|i| post(i, "body", "alice")).collect();
    mount_community(&server, posts, Some("t3_p4")).await;

    let mut config = create_test_config(&server, &db_path);
    config.fetch.limit = Some(5);

    let coordinator = Coordinator::new(config.clone()).await.unwrap();
    let summary = coordinator.run("r/test").await.unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    let report = summary.report_for("r/test").expect("report for r/test");
    assert_eq!(report.outcome, TargetOutcome::FullyDownloaded);
    assert_eq!(report.counts.inserted, 5);
    // The limit is reached on the first page; no second page is requested
    assert_eq!(report.requests, 1);

    let requests = server.received_requests().await.unwrap();
    let first = &requests[0];
    assert!(first
        .url
        .query_pairs()
        .any(|(k, v)| k == "limit" && v == "5"));

    // Continue mode stops at the first item already archived
    config.fetch.continue_mode = true;
    let coordinator = Coordinator::new(config.clone()).await.unwrap();
    let summary = coordinator.run("r/test").await.unwrap();
    assert_eq!(summary.totals().writes(), 0);

    // The target was saved, so previous/r revisits it
    config.fetch.continue_mode = false;
    let coordinator = Coordinator::new(config).await.unwrap();
    let summary = coordinator.run("previous/r").await.unwrap();
    assert_eq!(summary.targets.len(), 1);
    assert_eq!(summary.targets[0].target, "r/test");
    assert_eq!(summary.totals().writes(), 0);
    assert_eq!(summary.totals().skipped, 5);

    let storage = SqliteStorage::new(&db_path).unwrap();
    assert_eq!(storage.count_items_in_scope("r/test").unwrap(), 5);
    let target = storage
        .get_target(&thread_archiver::TargetSpec::new(TargetKind::Community, "test"))
        .unwrap()
        .expect("target saved");
    assert!(target.saved);
    assert!(target.last_fetched.is_some());
}

#[tokio::test]
async fn test_deleted_upstream_keeps_archived_content() {
    let server = MockServer::start().await;
    let (_dir, db_path) = temp_db();

    mount_community(&server, vec![post(1, "original words", "bob")], None).await;
    let config = create_test_config(&server, &db_path);

    let summary = Coordinator::new(config.clone())
        .await
        .unwrap()
        .run("r/test")
        .await
        .unwrap();
    assert_eq!(summary.totals().inserted, 1);

    // The post is now a tombstone upstream
    server.reset().await;
    mount_community(&server, vec![post(1, "[deleted]", "[deleted]")], None).await;

    let summary = Coordinator::new(config.clone())
        .await
        .unwrap()
        .run("r/test")
        .await
        .unwrap();
    assert_eq!(summary.totals().marked_deleted, 1);

    let storage = SqliteStorage::new(&db_path).unwrap();
    let item = storage.get_item("r/test", "t3_p1").unwrap().unwrap();
    assert!(item.deleted_at.is_some());
    assert!(item.payload.contains("original words"));
    assert_eq!(item.author.as_deref(), Some("bob"));
    drop(storage);

    // Already marked: nothing more happens without overwrite-deleted
    let summary = Coordinator::new(config)
        .await
        .unwrap()
        .run("r/test")
        .await
        .unwrap();
    assert_eq!(summary.totals().writes(), 0);
    assert_eq!(summary.totals().skipped, 1);
}

#[tokio::test]
async fn test_failed_comment_expansion_leaves_partial_tree() {
    let server = MockServer::start().await;
    let (_dir, db_path) = temp_db();

    let nested = listing(vec![comment("c2", "t1_c1", json!(""))], None);
    let more = json!({
        "kind": "more",
        "data": { "id": "c3", "parent_id": "t3_abc", "children": ["c3", "c4"], "count": 2 }
    });
    let page = json!([
        listing(
            vec![json!({
                "kind": "t3",
                "data": {
                    "id": "abc",
                    "name": "t3_abc",
                    "title": "A thread",
                    "selftext": "",
                    "author": "op",
                    "created_utc": NEWEST as f64
                }
            })],
            None
        ),
        listing(vec![comment("c1", "t3_abc", nested), more], None)
    ]);

    Mock::given(method("GET"))
        .and(path("/comments/abc.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/morechildren.json"))
        .and(query_param("link_id", "t3_abc"))
        .and(query_param("children", "c3,c4"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = create_test_config(&server, &db_path);
    config.fetch.fetch_comments = true;

    let summary = Coordinator::new(config)
        .await
        .unwrap()
        .run("https://www.reddit.com/r/test/comments/abc/a_thread/")
        .await
        .unwrap();

    let report = summary.report_for("p/abc").expect("report for p/abc");
    assert_eq!(report.outcome, TargetOutcome::PartiallyDownloaded);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.counts.inserted, 3);

    let storage = SqliteStorage::new(&db_path).unwrap();
    let reply = storage.get_item("p/abc", "t1_c2").unwrap().unwrap();
    assert_eq!(reply.kind, ItemKind::Comment);
    assert_eq!(reply.parent_id.as_deref(), Some("t1_c1"));
    assert!(storage.get_item("p/abc", "t1_c3").unwrap().is_none());
}

#[tokio::test]
async fn test_invalid_line_does_not_abort_other_targets() {
    let server = MockServer::start().await;
    let (_dir, db_path) = temp_db();
    mount_community(&server, vec![post(0, "hello", "carol")], None).await;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# targets\nr/test\nnot a target\nr/TEST").unwrap();
    file.flush().unwrap();

    let config = create_test_config(&server, &db_path);
    let coordinator = Coordinator::new(config).await.unwrap();
    let summary = coordinator
        .run(&file.path().to_string_lossy())
        .await
        .unwrap();

    assert_eq!(summary.targets.len(), 2);
    assert_eq!(
        summary.report_for("r/test").map(|r| r.outcome),
        Some(TargetOutcome::FullyDownloaded)
    );
    assert_eq!(
        summary.report_for("not a target").map(|r| r.outcome),
        Some(TargetOutcome::Skipped)
    );
    assert_eq!(summary.count_outcome(TargetOutcome::Skipped), 1);
}

#[tokio::test]
async fn test_authenticated_run_uses_bearer_token() {
    let server = MockServer::start().await;
    let (dir, db_path) = temp_db();

    let credentials = dir.path().join("credentials.toml");
    std::fs::write(
        &credentials,
        "client-id = \"app\"\nclient-secret = \"s3cret\"\nusername = \"archivist\"\npassword = \"hunter2\"\n",
    )
    .unwrap();

    Mock::given(method("POST"))
        .and(path("/api/v1/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok123",
            "token_type": "bearer"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/r/test/new.json"))
        .and(header("authorization", "bearer tok123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing(vec![], None)))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = create_test_config(&server, &db_path);
    config.auth = Some(credentials);

    let summary = Coordinator::new(config)
        .await
        .unwrap()
        .run("r/test")
        .await
        .unwrap();
    assert_eq!(
        summary.report_for("r/test").map(|r| r.outcome),
        Some(TargetOutcome::FullyDownloaded)
    );
}

#[tokio::test]
async fn test_refused_credentials_are_fatal() {
    let server = MockServer::start().await;
    let (dir, db_path) = temp_db();

    let credentials = dir.path().join("credentials.toml");
    std::fs::write(
        &credentials,
        "client-id = \"app\"\nclient-secret = \"wrong\"\nusername = \"archivist\"\npassword = \"nope\"\n",
    )
    .unwrap();

    Mock::given(method("POST"))
        .and(path("/api/v1/access_token"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let mut config = create_test_config(&server, &db_path);
    config.auth = Some(credentials);

    let err = Coordinator::new(config).await.err().expect("login must fail");
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_cancelled_run_is_interrupted() {
    let server = MockServer::start().await;
    let (_dir, db_path) = temp_db();
    mount_community(&server, vec![post(0, "hello", "dave")], None).await;

    let config = create_test_config(&server, &db_path);
    let coordinator = Coordinator::new(config).await.unwrap();
    coordinator.scheduler().cancel();

    let summary = coordinator.run("r/test").await.unwrap();
    assert_eq!(summary.status, RunStatus::Interrupted);
    assert_eq!(summary.targets[0].outcome, TargetOutcome::Skipped);
    assert!(server.received_requests().await.unwrap().is_empty());

    let storage = SqliteStorage::new(&db_path).unwrap();
    let run = storage.get_latest_run().unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Interrupted);
    assert!(run.finished_at.is_some());
}

#[tokio::test]
async fn test_listing_follows_cursor_until_short_page() {
    let server = MockServer::start().await;
    let (_dir, db_path) = temp_db();

    mount_page(
        &server,
        None,
        vec![post(0, "a", "erin"), post(1, "b", "erin")],
        Some("t3_p1"),
    )
    .await;
    mount_page(
        &server,
        Some("t3_p1"),
        vec![post(2, "c", "erin"), post(3, "d", "erin")],
        Some("t3_p3"),
    )
    .await;
    // Fewer items than asked for: the listing is exhausted despite the cursor
    mount_page(&server, Some("t3_p3"), vec![post(4, "e", "erin")], Some("t3_p4")).await;
    mount_page(&server, Some("t3_p4"), vec![post(5, "f", "erin")], None).await;

    let mut config = create_test_config(&server, &db_path);
    config.fetch.page_size = 2;

    let summary = Coordinator::new(config)
        .await
        .unwrap()
        .run("r/test")
        .await
        .unwrap();

    let report = summary.report_for("r/test").expect("report for r/test");
    assert_eq!(report.outcome, TargetOutcome::FullyDownloaded);
    assert_eq!(report.counts.inserted, 5);
    assert_eq!(report.requests, 3);
    assert_eq!(
        listing_cursors(&server).await,
        vec![None, Some("t3_p1".to_string()), Some("t3_p3".to_string())]
    );

    let requests = server.received_requests().await.unwrap();
    assert!(requests[1]
        .url
        .query_pairs()
        .any(|(k, v)| k == "limit" && v == "2"));

    let storage = SqliteStorage::new(&db_path).unwrap();
    assert_eq!(storage.count_items_in_scope("r/test").unwrap(), 5);
    assert!(storage.get_item("r/test", "t3_p5").unwrap().is_none());
}

#[tokio::test]
async fn test_listing_without_cursor_ends_after_full_page() {
    let server = MockServer::start().await;
    let (_dir, db_path) = temp_db();

    mount_page(
        &server,
        None,
        vec![post(0, "a", "finn"), post(1, "b", "finn")],
        None,
    )
    .await;

    let mut config = create_test_config(&server, &db_path);
    config.fetch.page_size = 2;

    let summary = Coordinator::new(config)
        .await
        .unwrap()
        .run("r/test")
        .await
        .unwrap();

    assert_eq!(summary.totals().inserted, 2);
    assert_eq!(summary.targets[0].requests, 1);
    assert_eq!(listing_cursors(&server).await, vec![None]);
}

#[tokio::test]
async fn test_date_bounds_skip_newer_and_stop_at_older() {
    let server = MockServer::start().await;
    let (_dir, db_path) = temp_db();

    // p0 and p1 are newer than the window, p2 and p3 inside it, p4 and p5 older
    mount_page(
        &server,
        None,
        vec![post(0, "a", "gwen"), post(1, "b", "gwen")],
        Some("t3_p1"),
    )
    .await;
    mount_page(
        &server,
        Some("t3_p1"),
        vec![post(2, "c", "gwen"), post(3, "d", "gwen")],
        Some("t3_p3"),
    )
    .await;
    mount_page(
        &server,
        Some("t3_p3"),
        vec![post(4, "e", "gwen"), post(5, "f", "gwen")],
        Some("t3_p5"),
    )
    .await;
    mount_page(&server, Some("t3_p5"), vec![post(6, "g", "gwen")], None).await;

    let mut config = create_test_config(&server, &db_path);
    config.fetch.page_size = 2;
    config.fetch.before = Some(bound(NEWEST - 90));
    config.fetch.after = Some(bound(NEWEST - 200));

    let summary = Coordinator::new(config)
        .await
        .unwrap()
        .run("r/test")
        .await
        .unwrap();

    let report = summary.report_for("r/test").expect("report for r/test");
    assert_eq!(report.counts.inserted, 2);
    // The walk goes past the newer page and stops on the first older item
    assert_eq!(
        listing_cursors(&server).await,
        vec![None, Some("t3_p1".to_string()), Some("t3_p3".to_string())]
    );

    let storage = SqliteStorage::new(&db_path).unwrap();
    assert!(storage.get_item("r/test", "t3_p0").unwrap().is_none());
    assert!(storage.get_item("r/test", "t3_p1").unwrap().is_none());
    assert!(storage.get_item("r/test", "t3_p2").unwrap().is_some());
    assert!(storage.get_item("r/test", "t3_p3").unwrap().is_some());
    assert!(storage.get_item("r/test", "t3_p4").unwrap().is_none());
}

#[tokio::test]
async fn test_author_profiles_archived_under_user_scope() {
    let server = MockServer::start().await;
    let (_dir, db_path) = temp_db();

    mount_community(
        &server,
        vec![
            post(0, "first", "Alice"),
            post(1, "second", "bob"),
            post(2, "third", "[deleted]"),
            post(3, "fourth", "alice"),
        ],
        None,
    )
    .await;
    mount_profile(&server, "a1", "alice").await;
    mount_profile(&server, "b2", "bob").await;

    let mut config = create_test_config(&server, &db_path);
    config.fetch.fetch_post_authors = true;

    let summary = Coordinator::new(config)
        .await
        .unwrap()
        .run("r/test")
        .await
        .unwrap();

    let report = summary.report_for("r/test").expect("report for r/test");
    assert_eq!(report.outcome, TargetOutcome::FullyDownloaded);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    // One listing page plus one profile per distinct author
    assert_eq!(report.requests, 3);

    let requests = server.received_requests().await.unwrap();
    assert!(!requests
        .iter()
        .any(|request| request.url.path().contains("deleted")));

    let storage = SqliteStorage::new(&db_path).unwrap();
    let profile = storage
        .get_item("u/alice", "t2_a1")
        .unwrap()
        .expect("alice archived");
    assert_eq!(profile.kind, ItemKind::Profile);
    assert_eq!(profile.author.as_deref(), Some("alice"));
    assert_eq!(storage.count_items_in_scope("u/bob").unwrap(), 1);

    // Authors are known targets, but previous/u does not revisit them
    let author = storage
        .get_target(&thread_archiver::TargetSpec::new(TargetKind::User, "alice"))
        .unwrap()
        .expect("author target");
    assert!(!author.saved);
    assert!(storage.saved_targets(&[TargetKind::User]).unwrap().is_empty());
}

#[tokio::test]
async fn test_single_author_fetches_no_profiles() {
    let server = MockServer::start().await;
    let (_dir, db_path) = temp_db();

    mount_community(
        &server,
        vec![post(0, "first", "hana"), post(1, "second", "Hana")],
        None,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/user/hana/about.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(account("h1", "hana")))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = create_test_config(&server, &db_path);
    config.fetch.fetch_post_authors = true;

    let summary = Coordinator::new(config)
        .await
        .unwrap()
        .run("r/test")
        .await
        .unwrap();

    assert_eq!(summary.targets[0].requests, 1);
    let storage = SqliteStorage::new(&db_path).unwrap();
    assert_eq!(storage.count_items_in_scope("u/hana").unwrap(), 0);
}

#[tokio::test]
async fn test_disabled_target_saving_records_no_author_targets() {
    let server = MockServer::start().await;
    let (_dir, db_path) = temp_db();

    mount_community(
        &server,
        vec![post(0, "first", "ivan"), post(1, "second", "jade")],
        None,
    )
    .await;
    mount_profile(&server, "i1", "ivan").await;
    mount_profile(&server, "j2", "jade").await;

    let mut config = create_test_config(&server, &db_path);
    config.fetch.fetch_post_authors = true;
    config.fetch.save_target_to_db = false;

    let summary = Coordinator::new(config)
        .await
        .unwrap()
        .run("r/test")
        .await
        .unwrap();
    assert_eq!(summary.targets[0].outcome, TargetOutcome::FullyDownloaded);

    let storage = SqliteStorage::new(&db_path).unwrap();
    // Profiles are still archived; only the target rows are left out
    assert_eq!(storage.count_items_in_scope("u/ivan").unwrap(), 1);
    assert_eq!(storage.count_targets().unwrap(), (0, 0));
}
