use feedline_backend::api::{self, USER_HEADER};
use feedline_backend::bootstrap;
use feedline_backend::config::{FeedlineConfig, FeedlinePaths};
use feedline_backend::context::FeedContext;
use futures_util::StreamExt;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout, Duration};

struct TestNode {
    _dir: TempDir,
    context: FeedContext,
    stop: oneshot::Sender<()>,
    server: tokio::task::JoinHandle<()>,
    base_url: String,
    client: reqwest::Client,
}

impl TestNode {
    async fn start() -> Self {
        let temp = tempdir().expect("tempdir");
        let config = FeedlineConfig::new(
            0,
            FeedlinePaths::from_base_dir(temp.path()).expect("paths"),
        );
        let bootstrap = bootstrap::initialize(&config).await.expect("bootstrap");
        let context = FeedContext::new(bootstrap.database.clone(), &config);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let base_url = format!("http://{}", listener.local_addr().expect("addr"));
        let (stop, stopped) = oneshot::channel::<()>();
        let server_context = context.clone();
        let server = tokio::spawn(async move {
            let _ = api::serve_listener(listener, config, server_context, async {
                let _ = stopped.await;
            })
            .await;
        });

        let node = Self {
            _dir: temp,
            context,
            stop,
            server,
            base_url,
            client: reqwest::Client::new(),
        };
        node.wait_for_health().await;
        node
    }

    async fn wait_for_health(&self) {
        for _ in 0..50 {
            if let Ok(resp) = self.client.get(self.url("/health")).send().await {
                if resp.status().is_success() {
                    return;
                }
            }
            sleep(Duration::from_millis(50)).await;
        }
        panic!("server did not become healthy in time");
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn create_user(&self, username: &str) -> i64 {
        let resp = self
            .client
            .post(self.url("/users"))
            .json(&json!({ "email": format!("{username}@example.com"), "username": username }))
            .send()
            .await
            .expect("create user");
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = resp.json().await.expect("user json");
        body["id"].as_i64().expect("own profile carries id")
    }

    async fn post_as(&self, user: i64, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header(USER_HEADER, user.to_string())
            .json(&body)
            .send()
            .await
            .expect("post request")
    }

    async fn get_as(&self, user: i64, path: &str) -> Value {
        let resp = self
            .client
            .get(self.url(path))
            .header(USER_HEADER, user.to_string())
            .send()
            .await
            .expect("get request");
        assert!(resp.status().is_success(), "GET {path} failed: {}", resp.status());
        resp.json().await.expect("json body")
    }

    async fn shutdown(self) {
        let _ = self.stop.send(());
        let _ = self.server.await;
        self.context.tasks.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn feed_notifications_and_errors_over_http() {
    let node = TestNode::start().await;
    let author = node.create_user("author").await;
    let fan = node.create_user("fan").await;

    let duplicate = node
        .client
        .post(node.url("/users"))
        .json(&json!({ "email": "other@example.com", "username": "author" }))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let follow = node.post_as(fan, "/users/author/follow", json!({})).await;
    assert_eq!(follow.status(), StatusCode::OK);
    let follow: Value = follow.json().await.unwrap();
    assert_eq!(follow["following"], json!(true));
    assert_eq!(follow["followers_count"], json!(1));

    let created = node
        .post_as(author, "/posts", json!({ "content": "hello @fan!" }))
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let created: Value = created.json().await.unwrap();
    let post_id = created["post"]["id"].as_i64().unwrap();
    assert_eq!(created["post"]["mine"], json!(true));

    node.context.tasks.drain().await;

    let feed = node.get_as(fan, "/timeline").await;
    let feed = feed.as_array().unwrap();
    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0]["post"]["id"].as_i64(), Some(post_id));
    assert_eq!(feed[0]["post"]["user"]["username"], json!("author"));

    let comment = node
        .post_as(fan, &format!("/posts/{post_id}/comments"), json!({ "content": "nice" }))
        .await;
    assert_eq!(comment.status(), StatusCode::CREATED);
    node.context.tasks.drain().await;

    let notifications = node.get_as(author, "/notifications").await;
    let kinds: Vec<&str> = notifications
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["type"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["comment", "follow"]);
    let fan_notifications = node.get_as(fan, "/notifications").await;
    assert_eq!(fan_notifications[0]["type"], json!("post_mention"));
    assert_eq!(fan_notifications[0]["actors"][0]["username"], json!("author"));

    let unread = node.get_as(author, "/notifications/unread_count").await;
    assert_eq!(unread["count"], json!(2));
    let marked = node
        .post_as(author, "/notifications/mark_as_read", json!({}))
        .await;
    assert_eq!(marked.status(), StatusCode::NO_CONTENT);
    let unread = node.get_as(author, "/notifications/unread_count").await;
    assert_eq!(unread["count"], json!(0));

    let anonymous = node.client.get(node.url("/timeline")).send().await.unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    let bad_header = node
        .client
        .get(node.url("/timeline"))
        .header(USER_HEADER, "not-a-number")
        .send()
        .await
        .unwrap();
    assert_eq!(bad_header.status(), StatusCode::UNAUTHORIZED);
    let missing = node.client.get(node.url("/posts/9999")).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    let empty = node.post_as(author, "/posts", json!({ "content": "   " })).await;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn live_timeline_streams_new_posts() {
    let node = TestNode::start().await;
    let author = node.create_user("author").await;
    let fan = node.create_user("fan").await;
    node.post_as(fan, "/users/author/follow", json!({})).await;

    let stream = node
        .client
        .get(node.url("/timeline"))
        .header(USER_HEADER, fan.to_string())
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), StatusCode::OK);
    let mut body = stream.bytes_stream();

    for _ in 0..50 {
        if node.context.live.channel_count(fan) == 1 {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(node.context.live.channel_count(fan), 1);

    let created: Value = node
        .post_as(author, "/posts", json!({ "content": "streamed" }))
        .await
        .json()
        .await
        .unwrap();
    let post_id = created["post"]["id"].as_i64().unwrap();

    let mut buffer = String::new();
    let event = timeout(Duration::from_secs(5), async {
        while let Some(chunk) = body.next().await {
            buffer.push_str(&String::from_utf8_lossy(&chunk.unwrap()));
            if let Some(line) = buffer.lines().find(|line| line.starts_with("data:")) {
                return line.trim_start_matches("data:").trim().to_string();
            }
        }
        panic!("stream ended before an event arrived");
    })
    .await
    .expect("live event in time");

    let item: Value = serde_json::from_str(&event).unwrap();
    assert_eq!(item["post"]["id"].as_i64(), Some(post_id));
    assert_eq!(item["post"]["content"], json!("streamed"));

    drop(body);
    node.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_completes_while_a_live_feed_is_open() {
    let node = TestNode::start().await;
    let viewer = node.create_user("viewer").await;

    let stream = node
        .client
        .get(node.url("/timeline"))
        .header(USER_HEADER, viewer.to_string())
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), StatusCode::OK);
    let mut body = stream.bytes_stream();
    for _ in 0..50 {
        if node.context.live.channel_count(viewer) == 1 {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(node.context.live.channel_count(viewer), 1);

    let TestNode {
        _dir,
        context,
        stop,
        server,
        ..
    } = node;
    let _ = stop.send(());
    timeout(Duration::from_secs(5), server)
        .await
        .expect("server stops while a live feed is open")
        .expect("server task");

    assert!(context.live.is_closed());
    assert_eq!(context.live.channel_count(viewer), 0);
    let drained = timeout(Duration::from_secs(5), async {
        while let Some(chunk) = body.next().await {
            if chunk.is_err() {
                break;
            }
        }
    })
    .await;
    assert!(drained.is_ok(), "live stream body did not end after shutdown");
    context.tasks.shutdown().await;
}
