//! Integration tests for the Truth or Dare backend.

use std::sync::Arc;

use reqwest::Client;
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::config::Config;
use crate::db::{init_database, Repository};
use crate::{create_router, AppState};

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_psk(Some("test-api-key".to_string())).await
    }

    async fn with_psk(psk: Option<String>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");

        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let repo = Arc::new(Repository::new(pool));

        let config = Config {
            api_psk: psk.clone(),
            db_path,
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".to_string(),
            default_page_size: 50,
        };

        let state = AppState {
            repo,
            config: Arc::new(config),
        };

        let app = create_router(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        let mut client_builder = Client::builder();
        if let Some(key) = psk {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert("x-api-key", key.parse().unwrap());
            client_builder = client_builder.default_headers(headers);
        }

        TestFixture {
            client: client_builder.build().unwrap(),
            base_url,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self.client.post(self.url(path)).json(&body).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn put(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self.client.put(self.url(path)).json(&body).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn delete(&self, path: &str) -> (u16, Value) {
        let resp = self.client.delete(self.url(path)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn create_tag(&self, name: &str) -> String {
        let (status, body) = self.post("/api/tags", json!({ "name": name })).await;
        assert_eq!(status, 200, "tag creation failed: {}", body);
        body["data"]["id"].as_str().unwrap().to_string()
    }

    /// Create a game with no game-wide tags and the given players, then start it.
    async fn active_game(&self, players: &[(&str, Vec<String>)]) -> (String, Vec<String>) {
        let (_, game) = self
            .post("/api/games", json!({ "maxSpiceRating": 5, "tags": [] }))
            .await;
        let game_id = game["data"]["id"].as_str().unwrap().to_string();

        let mut player_ids = Vec::new();
        for (name, tags) in players {
            let (status, player) = self
                .post(
                    &format!("/api/games/{}/players", game_id),
                    json!({ "name": name, "tags": tags }),
                )
                .await;
            assert_eq!(status, 200, "player creation failed: {}", player);
            player_ids.push(player["data"]["id"].as_str().unwrap().to_string());
        }

        let (status, started) = self
            .post(&format!("/api/games/{}/start", game_id), json!({}))
            .await;
        assert_eq!(status, 200, "game start failed: {}", started);

        (game_id, player_ids)
    }
}

fn ids(value: &Value) -> Vec<String> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_auth_missing_psk() {
    let fixture = TestFixture::new().await;

    // Plain client without the default API key header
    let resp = Client::new()
        .get(fixture.url("/api/tags"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_auth_invalid_psk() {
    let fixture = TestFixture::new().await;

    let resp = Client::new()
        .get(fixture.url("/api/tags"))
        .header("x-api-key", "wrong-key")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_auth_bearer_token() {
    let fixture = TestFixture::new().await;

    let resp = Client::new()
        .get(fixture.url("/api/tags"))
        .header("authorization", "Bearer test-api-key")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_open_access_without_psk() {
    let fixture = TestFixture::with_psk(None).await;

    let (status, body) = fixture.get("/api/tasks").await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn test_tag_crud() {
    let fixture = TestFixture::new().await;

    // Create tag on behalf of a named user
    let resp = fixture
        .client
        .post(fixture.url("/api/tags"))
        .header("x-actor-id", "host-7")
        .json(&json!({
            "name": "Adults Only",
            "description": "Spicy questions",
            "minSpiceLevel": 4,
            "defaultForGender": "both"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let created: Value = resp.json().await.unwrap();
    let tag_id = created["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(created["data"]["slug"], "adults-only");
    assert_eq!(created["data"]["minSpiceLevel"], 4);
    assert_eq!(created["data"]["defaultForGender"], "both");
    assert_eq!(created["data"]["isDefault"], false);
    assert_eq!(created["data"]["createdBy"], "host-7");

    // Update tag
    let (status, updated) = fixture
        .put(
            &format!("/api/tags/{}", tag_id),
            json!({ "name": "Grown Ups", "expectedVersion": 1 }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(updated["data"]["slug"], "grown-ups");
    assert_eq!(updated["data"]["version"], 2);

    // List and get
    let (status, list) = fixture.get("/api/tags").await;
    assert_eq!(status, 200);
    assert_eq!(ids(&list["data"]), vec![tag_id.clone()]);

    let (status, _) = fixture.get(&format!("/api/tags/{}", tag_id)).await;
    assert_eq!(status, 200);

    // Delete tag
    let (status, _) = fixture.delete(&format!("/api/tags/{}", tag_id)).await;
    assert_eq!(status, 200);

    let (status, body) = fixture.get(&format!("/api/tags/{}", tag_id)).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_validation_errors() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture.post("/api/tags", json!({ "name": "   " })).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = fixture
        .post("/api/tags", json!({ "name": "Hot", "minSpiceLevel": 6 }))
        .await;
    assert_eq!(status, 400);

    let (status, _) = fixture
        .post(
            "/api/tasks",
            json!({ "kind": "dare", "spiceRating": 0, "description": "Dance" }),
        )
        .await;
    assert_eq!(status, 400);

    let (status, body) = fixture
        .post(
            "/api/tasks",
            json!({ "kind": "dare", "spiceRating": 2, "description": "Dance", "tags": ["missing"] }),
        )
        .await;
    assert_eq!(status, 400);
    assert!(body["error"]["message"].as_str().unwrap().contains("missing"));

    let (status, _) = fixture.post("/api/games", json!({ "maxSpiceRating": 9 })).await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_duplicate_tag_slug_conflicts() {
    let fixture = TestFixture::new().await;
    fixture.create_tag("Party").await;

    let (status, body) = fixture.post("/api/tags", json!({ "name": "PARTY" })).await;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_task_crud_and_listing() {
    let fixture = TestFixture::new().await;
    let tag_id = fixture.create_tag("Party").await;

    let (status, truth) = fixture
        .post(
            "/api/tasks",
            json!({
                "kind": "truth",
                "spiceRating": 1,
                "description": "What is your biggest fear?",
                "tags": [tag_id]
            }),
        )
        .await;
    assert_eq!(status, 200);
    let truth_id = truth["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(truth["data"]["tags"], json!([tag_id]));
    assert_eq!(truth["data"]["cantHaveTags"], json!([]));

    let (_, dare) = fixture
        .post(
            "/api/tasks",
            json!({ "kind": "dare", "spiceRating": 2, "description": "Do ten push-ups" }),
        )
        .await;
    let dare_id = dare["data"]["id"].as_str().unwrap().to_string();

    let (_, draft) = fixture
        .post(
            "/api/tasks",
            json!({ "kind": "dare", "spiceRating": 1, "description": "Unfinished", "isDraft": true }),
        )
        .await;
    let draft_id = draft["data"]["id"].as_str().unwrap().to_string();

    let (_, published) = fixture.get("/api/tasks").await;
    assert_eq!(ids(&published["data"]), vec![truth_id.clone(), dare_id.clone()]);

    let (_, with_drafts) = fixture.get("/api/tasks?includeDrafts=true").await;
    assert_eq!(ids(&with_drafts["data"]).len(), 3);

    let (_, dares) = fixture.get("/api/tasks?kind=dare&includeDrafts=true").await;
    assert_eq!(ids(&dares["data"]), vec![dare_id.clone(), draft_id.clone()]);

    let (_, page) = fixture.get("/api/tasks?limit=1&offset=1").await;
    assert_eq!(ids(&page["data"]), vec![dare_id.clone()]);

    // Publish the draft and clear the truth's tags
    let (status, updated) = fixture
        .put(&format!("/api/tasks/{}", draft_id), json!({ "isDraft": false }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(updated["data"]["isDraft"], false);
    assert_eq!(updated["data"]["version"], 2);

    let (_, cleared) = fixture
        .put(&format!("/api/tasks/{}", truth_id), json!({ "tags": [] }))
        .await;
    assert_eq!(cleared["data"]["tags"], json!([]));

    let (status, _) = fixture.delete(&format!("/api/tasks/{}", dare_id)).await;
    assert_eq!(status, 200);
    let (status, _) = fixture.get(&format!("/api/tasks/{}", dare_id)).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_optimistic_concurrency_conflict() {
    let fixture = TestFixture::new().await;
    let tag_id = fixture.create_tag("Concurrency").await;

    let (status, body) = fixture
        .put(
            &format!("/api/tags/{}", tag_id),
            json!({ "name": "Should Fail", "expectedVersion": 999 }),
        )
        .await;

    assert_eq!(status, 409);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "VERSION_MISMATCH");
    assert_eq!(body["error"]["details"]["currentVersion"], 1);
}

#[tokio::test]
async fn test_game_lifecycle() {
    let fixture = TestFixture::new().await;

    let (status, created) = fixture.post("/api/games", json!({ "maxSpiceRating": 3 })).await;
    assert_eq!(status, 200);
    let game_id = created["data"]["id"].as_str().unwrap().to_string();
    let code = created["data"]["code"].as_str().unwrap().to_string();
    assert_eq!(created["data"]["status"], "waiting");
    assert_eq!(code.len(), 6);

    let (status, by_code) = fixture.get(&format!("/api/games/code/{}", code)).await;
    assert_eq!(status, 200);
    assert_eq!(by_code["data"]["id"], game_id.as_str());

    fixture
        .post(&format!("/api/games/{}/players", game_id), json!({ "name": "Alex" }))
        .await;

    // One player is not enough to start
    let (status, body) = fixture
        .post(&format!("/api/games/{}/start", game_id), json!({}))
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], "INVALID_STATE");

    // Finishing a waiting game is not allowed either
    let (status, _) = fixture
        .post(&format!("/api/games/{}/finish", game_id), json!({}))
        .await;
    assert_eq!(status, 409);

    fixture
        .post(
            &format!("/api/games/{}/players", game_id),
            json!({ "name": "Sam", "gender": "female" }),
        )
        .await;

    let (status, started) = fixture
        .post(&format!("/api/games/{}/start", game_id), json!({}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(started["data"]["status"], "active");
    assert_eq!(started["data"]["players"].as_array().unwrap().len(), 2);

    let (status, finished) = fixture
        .post(&format!("/api/games/{}/finish", game_id), json!({}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(finished["data"]["status"], "completed");

    // No way back
    let (status, _) = fixture
        .post(&format!("/api/games/{}/start", game_id), json!({}))
        .await;
    assert_eq!(status, 409);

    let (status, _) = fixture
        .post(&format!("/api/games/{}/players", game_id), json!({ "name": "Late" }))
        .await;
    assert_eq!(status, 409);

    let (status, _) = fixture.delete(&format!("/api/games/{}", game_id)).await;
    assert_eq!(status, 200);
    let (status, _) = fixture.get(&format!("/api/games/{}", game_id)).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_task_draws_require_active_game() {
    let fixture = TestFixture::new().await;

    let (_, game) = fixture.post("/api/games", json!({})).await;
    let game_id = game["data"]["id"].as_str().unwrap();
    let (_, player) = fixture
        .post(&format!("/api/games/{}/players", game_id), json!({ "name": "Alex" }))
        .await;
    let player_id = player["data"]["id"].as_str().unwrap();

    let (status, body) = fixture
        .get(&format!("/api/players/{}/tasks/random", player_id))
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], "INVALID_STATE");
}

#[tokio::test]
async fn test_player_task_listing_applies_tag_rules() {
    let fixture = TestFixture::new().await;
    let adult = fixture.create_tag("Adult").await;
    let party = fixture.create_tag("Party").await;

    let (_, universal) = fixture
        .post(
            "/api/tasks",
            json!({ "kind": "truth", "spiceRating": 1, "description": "Favourite food?" }),
        )
        .await;
    let (_, party_only) = fixture
        .post(
            "/api/tasks",
            json!({ "kind": "dare", "spiceRating": 1, "description": "Start a conga line", "tags": [party] }),
        )
        .await;
    let (_, kids_only) = fixture
        .post(
            "/api/tasks",
            json!({ "kind": "dare", "spiceRating": 1, "description": "Draw a cat", "cantHaveTags": [adult] }),
        )
        .await;
    let universal_id = universal["data"]["id"].as_str().unwrap().to_string();
    let party_id = party_only["data"]["id"].as_str().unwrap().to_string();
    let kids_id = kids_only["data"]["id"].as_str().unwrap().to_string();

    let (_, player_ids) = fixture
        .active_game(&[("Grown", vec![adult.clone()]), ("Kid", vec![])])
        .await;

    let (status, grown) = fixture
        .get(&format!("/api/players/{}/tasks", player_ids[0]))
        .await;
    assert_eq!(status, 200);
    assert_eq!(ids(&grown["data"]), vec![universal_id.clone()]);

    let (_, kid) = fixture
        .get(&format!("/api/players/{}/tasks", player_ids[1]))
        .await;
    assert_eq!(ids(&kid["data"]), vec![universal_id.clone(), kids_id.clone()]);

    let (_, kid_dares) = fixture
        .get(&format!("/api/players/{}/tasks?kind=dare", player_ids[1]))
        .await;
    assert_eq!(ids(&kid_dares["data"]), vec![kids_id.clone()]);

    // Giving the kid the party tag unlocks the party dare
    fixture
        .put(&format!("/api/players/{}", player_ids[1]), json!({ "tags": [party] }))
        .await;
    let (_, kid) = fixture
        .get(&format!("/api/players/{}/tasks", player_ids[1]))
        .await;
    assert_eq!(ids(&kid["data"]), vec![universal_id, party_id, kids_id]);

    let (_, resolved) = fixture
        .get(&format!("/api/players/{}/tags", player_ids[1]))
        .await;
    assert_eq!(resolved["data"], json!([party]));
}

#[tokio::test]
async fn test_complete_task_progression() {
    let fixture = TestFixture::new().await;
    let rookie = fixture.create_tag("Rookie").await;
    let veteran = fixture.create_tag("Veteran").await;

    let (_, task) = fixture
        .post(
            "/api/tasks",
            json!({
                "kind": "dare",
                "spiceRating": 1,
                "description": "Prove yourself",
                "tags": [veteran],
                "tagsToRemove": [rookie],
                "tagsToAdd": [veteran]
            }),
        )
        .await;
    let task_id = task["data"]["id"].as_str().unwrap().to_string();

    let (game_id, player_ids) = fixture
        .active_game(&[("Alex", vec![rookie.clone()]), ("Sam", vec![])])
        .await;
    let alex = &player_ids[0];
    let sam = &player_ids[1];

    // Offered to the rookie through the progression rule, hidden from Sam
    let (status, drawn) = fixture
        .get(&format!("/api/players/{}/tasks/random", alex))
        .await;
    assert_eq!(status, 200);
    assert_eq!(drawn["data"]["id"], task_id.as_str());

    let (status, _) = fixture.get(&format!("/api/players/{}/tasks/random", sam)).await;
    assert_eq!(status, 404);

    let (status, _) = fixture
        .post(
            &format!("/api/players/{}/tasks/{}/complete", sam, task_id),
            json!({}),
        )
        .await;
    assert_eq!(status, 409);

    let resp = fixture
        .client
        .post(fixture.url(&format!("/api/players/{}/tasks/{}/complete", alex, task_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let completed: Value = resp.json().await.unwrap();
    assert_eq!(completed["data"]["removedTags"], json!([rookie]));
    assert_eq!(completed["data"]["addedTags"], json!([veteran]));
    assert_eq!(completed["data"]["player"]["score"], 1);
    assert_eq!(ids(&completed["data"]["player"]["tags"]), vec![veteran.clone()]);

    // Still matches through the veteran tag, but already used
    let (status, _) = fixture
        .get(&format!("/api/players/{}/tasks/random", alex))
        .await;
    assert_eq!(status, 404);

    let (_, availability) = fixture
        .get(&format!("/api/games/{}/availability", game_id))
        .await;
    assert_eq!(availability["data"][0]["playerId"], alex.as_str());
    assert_eq!(availability["data"][0]["dares"], 0);

    let (status, cleared) = fixture
        .delete(&format!("/api/players/{}/used-tasks", alex))
        .await;
    assert_eq!(status, 200);
    assert_eq!(cleared["data"]["cleared"], 1);

    let (status, _) = fixture
        .get(&format!("/api/players/{}/tasks/random", alex))
        .await;
    assert_eq!(status, 200);

    // Completing again removes and adds nothing but still scores
    let (status, again) = fixture
        .post(
            &format!("/api/players/{}/tasks/{}/complete", alex, task_id),
            json!({ "recordUsage": false }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(again["data"]["removedTags"], json!([]));
    assert_eq!(again["data"]["addedTags"], json!([]));
    assert_eq!(again["data"]["player"]["score"], 2);

    let (_, cleared) = fixture
        .delete(&format!("/api/games/{}/used-tasks", game_id))
        .await;
    assert_eq!(cleared["data"]["cleared"], 0);
}

#[tokio::test]
async fn test_complete_task_version_conflict() {
    let fixture = TestFixture::new().await;
    let (_, task) = fixture
        .post(
            "/api/tasks",
            json!({ "kind": "truth", "spiceRating": 1, "description": "Any secrets?" }),
        )
        .await;
    let task_id = task["data"]["id"].as_str().unwrap().to_string();
    let (_, player_ids) = fixture
        .active_game(&[("Alex", vec![]), ("Sam", vec![])])
        .await;

    let (status, body) = fixture
        .post(
            &format!("/api/players/{}/tasks/{}/complete", player_ids[0], task_id),
            json!({ "expectedVersion": 42 }),
        )
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], "VERSION_MISMATCH");

    let (_, player) = fixture.get(&format!("/api/players/{}", player_ids[0])).await;
    assert_eq!(player["data"]["score"], 0);
}

#[tokio::test]
async fn test_not_found_errors() {
    let fixture = TestFixture::new().await;

    for path in [
        "/api/tags/nope",
        "/api/tasks/nope",
        "/api/games/nope",
        "/api/games/code/ZZZZZZ",
        "/api/players/nope",
        "/api/players/nope/tasks",
        "/api/games/nope/availability",
    ] {
        let (status, body) = fixture.get(path).await;
        assert_eq!(status, 404, "expected 404 for {}", path);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    let (status, _) = fixture.delete("/api/players/nope/used-tasks").await;
    assert_eq!(status, 404);
}
