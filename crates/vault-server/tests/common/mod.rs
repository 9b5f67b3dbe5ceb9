#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use vault_crypto::Codec;
use vault_crypto::keys::generate_key;
use vault_db::Database;
use vault_server::config::Config;
use vault_types::UserId;

pub struct TestApp {
    pub router: Router,
    pub db: Arc<Database>,
    /// `user1..=userN`, created up front
    pub users: Vec<UserId>,
    pub config: Config,
}

/// Dev config against a fresh in-memory store with `n` users.
pub fn test_app(n: usize, tweak: impl FnOnce(&mut Config)) -> TestApp {
    let mut config = Config::from_lookup(|_| None).unwrap();
    config.file_dir = std::env::temp_dir().join(format!("vault-test-{}", uuid::Uuid::new_v4()));
    tweak(&mut config);

    let db = Database::open_in_memory(Codec::new(&generate_key())).unwrap();
    let users = (1..=n)
        .map(|i| db.create_user(&format!("user{}", i), &format!("User {}", i)).unwrap().id)
        .collect();
    let db = Arc::new(db);

    let router = vault_server::build_app(vault_server::app_state(Arc::clone(&db), &config));
    TestApp {
        router,
        db,
        users,
        config,
    }
}

impl TestApp {
    pub async fn call(
        &self,
        method: &str,
        uri: &str,
        caller: Option<UserId>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(id) = caller {
            builder = builder.header("x-user-id", id.to_string());
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let (status, bytes) = self.send(builder.body(body).unwrap()).await;
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }
}
