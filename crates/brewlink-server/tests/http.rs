use std::time::Duration;

use brewlink_server::Config;
use libbrewlink::RegisterPolicy;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const RECIPE_JSON: &str = r#"{
    "name": "Pale Ale Kit",
    "steps": [
        {"name": "Preheat", "temp_c": 40.0, "minutes": 5},
        {"name": "Mash", "temp_c": 66.0, "minutes": 60},
        {"name": "Boil", "temp_c": 100.0, "minutes": 60, "drain": true}
    ]
}"#;

struct TestServer {
    base: String,
    client: reqwest::Client,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<anyhow::Result<()>>,
    dir: TempDir,
}

impl TestServer {
    async fn start(configure: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().unwrap();
        let recipes = dir.path().join("recipes");
        std::fs::create_dir_all(&recipes).unwrap();
        std::fs::write(recipes.join("PAK0001.json"), RECIPE_JSON).unwrap();

        let mut config = Config::with_data_dir(dir.path());
        config
            .firmware
            .insert("pico".to_string(), "0.1.34".to_string());
        configure(&mut config);
        Self::start_in(dir, config).await
    }

    async fn start_in(dir: TempDir, config: Config) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (shutdown, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(brewlink_server::run(config, listener, async move {
            let _ = rx.await;
        }));

        let client = reqwest::Client::new();
        for _ in 0..200 {
            if let Ok(resp) = client.get(format!("{base}/ready")).send().await {
                if resp.status().is_success() {
                    return Self {
                        base,
                        client,
                        shutdown,
                        task,
                        dir,
                    };
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server never became ready");
    }

    async fn stop(self) -> TempDir {
        drop(self.client);
        let _ = self.shutdown.send(());
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
        self.dir
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn get_text(&self, path: &str) -> (u16, String) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.text().await.unwrap())
    }

    async fn get_json(&self, path: &str) -> (u16, Value) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn post_json(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

/// Fields of a `#a#b#c#` text reply.
fn fields(body: &str) -> Vec<&str> {
    body.trim_matches('#').split('#').collect()
}

#[tokio::test]
async fn health_and_ready() {
    let server = TestServer::start(|_| {}).await;

    let (status, ready) = server.get_json("/ready").await;
    assert_eq!(status, 200);
    assert_eq!(ready["ready"], true);
    assert_eq!(ready["recovery"]["restored"], 0);

    let (status, health) = server.get_json("/health").await;
    assert_eq!(status, 200);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["live_sessions"], 0);
    assert_eq!(health["devices"], 0);

    server.stop().await;
}

#[tokio::test]
async fn pico_brew_cycle() {
    let server = TestServer::start(|_| {}).await;
    let uid = "3c71bf000001";

    let (status, body) = server
        .get_text(&format!("/API/pico/register?uid={uid}&rfid=PAK0001&fw=0.1.11"))
        .await;
    assert_eq!(status, 200, "{body}");
    let reply = fields(&body);
    assert_eq!(reply[1..], ["0", "pending"]);
    let sid = reply[0].to_string();

    let (_, body) = server
        .get_text(&format!("/API/pico/next_step?uid={uid}&sesId={sid}"))
        .await;
    assert_eq!(body, "#0#Preheat#40.0#5#0#");

    let (_, body) = server
        .get_text(&format!("/API/pico/log?uid={uid}&sesId={sid}&msg=mash%20in"))
        .await;
    assert_eq!(body, "#T#");

    let (status, live) = server
        .get_json(&format!("/api/devices/{uid}/session"))
        .await;
    assert_eq!(status, 200);
    assert_eq!(live["session_id"], sid.as_str());
    assert_eq!(live["state"], "active");
    assert_eq!(live["step_index"], 1);

    let (_, body) = server
        .get_text(&format!("/API/pico/complete?uid={uid}&sesId={sid}&ok=true"))
        .await;
    assert_eq!(body, "#completed#");

    let (_, ids) = server.get_json("/api/archive").await;
    assert_eq!(ids, json!([sid]));
    let (status, archived) = server.get_json(&format!("/api/archive/{sid}")).await;
    assert_eq!(status, 200);
    assert_eq!(archived["state"], "completed");

    let (_, live) = server.get_json("/api/sessions").await;
    assert_eq!(live, json!([]));

    let (status, body) = server
        .get_text(&format!("/API/pico/log?uid={uid}&sesId={sid}&msg=late"))
        .await;
    assert_eq!(status, 422);
    assert_eq!(body, "#E#invalid_state#");

    server.stop().await;
}

#[tokio::test]
async fn zseries_speaks_json() {
    let server = TestServer::start(|_| {}).await;

    let (status, reply) = server
        .post_json(
            "/API/zseries/register",
            json!({"ZSeriesID": 88001, "ProgramID": "PAK0001", "FirmwareVersion": "0.0.119"}),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(reply["State"], "pending");
    assert_eq!(reply["Resumed"], false);
    let sid = reply["SessionID"].as_str().unwrap().to_string();

    let (_, reply) = server
        .post_json(
            "/API/zseries/sensor",
            json!({"ZSeriesID": "88001", "WortTemp": 21.5, "ThermoBlockTemp": 22.0}),
        )
        .await;
    assert_eq!(reply["SessionID"], sid.as_str());
    assert_eq!(reply["Seq"], 0);

    let (status, reply) = server
        .post_json("/API/zseries/next_step", json!({"ZSeriesID": 99}))
        .await;
    assert_eq!(status, 404);
    assert_eq!(reply["Error"]["Code"], "not_found");

    let (status, _) = server.get_text("/API/zseries/register?uid=88001").await;
    assert_eq!(status, 400);

    server.stop().await;
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let server = TestServer::start(|_| {}).await;

    let (status, body) = server.get_json("/API/kettle/register?uid=1").await;
    assert_eq!(status, 400);
    assert_eq!(body["code"], "invalid_request");

    let (status, body) = server.get_text("/API/pico/dance?uid=1").await;
    assert_eq!(status, 400);
    assert_eq!(body, "#E#invalid_request#");

    let (status, body) = server
        .get_text("/API/picoferm/log?uid=pf1&msg=hello")
        .await;
    assert_eq!(status, 400);
    assert_eq!(body, "#E#invalid_request#");

    let (status, body) = server.get_text("/API/pico/register?rfid=PAK0001").await;
    assert_eq!(status, 400);
    assert_eq!(body, "#E#invalid_request#");

    let (status, body) = server.get_text("/API/pico/sensor?uid=1&wort=hot").await;
    assert_eq!(status, 400);
    assert_eq!(body, "#E#invalid_request#");

    let (status, body) = server.get_text("/API/pico/next_step?uid=nobody").await;
    assert_eq!(status, 404);
    assert_eq!(body, "#E#not_found#");

    server.stop().await;
}

#[tokio::test]
async fn firmware_check_leaves_sessions_alone() {
    let server = TestServer::start(|_| {}).await;

    let (_, body) = server
        .get_text("/API/pico/firmware?uid=3c71bf000002&fw=0.1.11")
        .await;
    assert_eq!(body, "#T#");
    let (_, body) = server
        .get_text("/API/pico/firmware?uid=3c71bf000002&fw=0.1.34")
        .await;
    assert_eq!(body, "#F#");

    let (status, _) = server.get_json("/api/devices/3c71bf000002/session").await;
    assert_eq!(status, 404);
    let (_, health) = server.get_json("/health").await;
    assert_eq!(health["devices"], 0);

    server.stop().await;
}

#[tokio::test]
async fn unknown_recipe_is_not_found() {
    let server = TestServer::start(|_| {}).await;

    let (status, _) = server
        .get_text("/API/pico/register?uid=3c71bf000003&rfid=NOPE")
        .await;
    assert_eq!(status, 200);
    let (status, body) = server
        .get_text("/API/pico/next_step?uid=3c71bf000003")
        .await;
    assert_eq!(status, 404);
    assert_eq!(body, "#E#not_found#");

    server.stop().await;
}

#[tokio::test]
async fn reject_policy_returns_conflict() {
    let server = TestServer::start(|c| c.register_policy = RegisterPolicy::Reject).await;
    let path = "/API/zymatic/register?uid=zy-0001&recipe=PAK0001";

    let (status, _) = server.get_text(path).await;
    assert_eq!(status, 200);
    let (status, body) = server.get_text(path).await;
    assert_eq!(status, 409);
    assert_eq!(body, "#E#conflict#");

    server.stop().await;
}

#[tokio::test]
async fn events_stream_redacts_devices() {
    let server = TestServer::start(|_| {}).await;
    let uid = "brewer-sse-0123456789";

    let mut stream = server
        .client
        .get(server.url("/api/events"))
        .send()
        .await
        .unwrap();
    assert_eq!(stream.headers()["content-type"], "text/event-stream");

    server
        .get_text(&format!("/API/pico/register?uid={uid}&rfid=PAK0001"))
        .await;
    server
        .get_text(&format!("/API/pico/complete?uid={uid}&ok=false"))
        .await;

    let mut seen = String::new();
    while !seen.contains("event: archived") {
        let chunk = tokio::time::timeout(Duration::from_secs(5), stream.chunk())
            .await
            .expect("timed out waiting for events")
            .unwrap()
            .expect("event stream ended");
        seen.push_str(&String::from_utf8_lossy(&chunk));
    }

    assert!(seen.contains("event: created"));
    assert!(seen.contains("event: completed"));
    assert!(seen.contains("\"state\":\"errored\""));
    assert!(!seen.contains(uid));

    drop(stream);
    server.stop().await;
}

#[tokio::test]
async fn sessions_survive_restart() {
    let server = TestServer::start(|_| {}).await;
    let uid = "3c71bf000004";

    let (_, body) = server
        .get_text(&format!("/API/pico/register?uid={uid}&rfid=PAK0001"))
        .await;
    let sid = fields(&body)[0].to_string();
    server
        .get_text(&format!("/API/pico/next_step?uid={uid}&sesId={sid}"))
        .await;

    let dir = server.stop().await;
    let config = Config::with_data_dir(dir.path());
    let server = TestServer::start_in(dir, config).await;

    let (_, ready) = server.get_json("/ready").await;
    assert_eq!(ready["recovery"]["restored"], 1);

    let (_, body) = server
        .get_text(&format!("/API/pico/register?uid={uid}&rfid=PAK0001"))
        .await;
    assert_eq!(fields(&body), [sid.as_str(), "1", "active"]);

    let (_, body) = server
        .get_text(&format!("/API/pico/next_step?uid={uid}&sesId={sid}"))
        .await;
    assert_eq!(body, "#1#Mash#66.0#60#0#");

    server.stop().await;
}

#[tokio::test]
async fn non_finite_sensor_values_do_not_poison_the_record() {
    let server = TestServer::start(|_| {}).await;
    let uid = "3c71bf000005";

    let (_, body) = server
        .get_text(&format!("/API/pico/register?uid={uid}&rfid=PAK0001"))
        .await;
    let sid = fields(&body)[0].to_string();

    let (status, body) = server
        .get_text(&format!("/API/pico/sensor?uid={uid}&wort=nan&therm=20"))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body, "#E#invalid_request#");
    let (status, body) = server
        .get_text(&format!("/API/pico/sensor?uid={uid}&wort=20&therm=-inf"))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body, "#E#invalid_request#");

    let dir = server.stop().await;
    let config = Config::with_data_dir(dir.path());
    let server = TestServer::start_in(dir, config).await;

    let (_, ready) = server.get_json("/ready").await;
    assert_eq!(ready["recovery"]["restored"], 1);
    assert_eq!(ready["recovery"]["quarantined"], 0);

    let (status, live) = server
        .get_json(&format!("/api/devices/{uid}/session"))
        .await;
    assert_eq!(status, 200);
    assert_eq!(live["session_id"], sid.as_str());

    server.stop().await;
}
