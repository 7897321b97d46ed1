//! Router-level test harness for the Meridian storefront.
//!
//! [`TestApp`] builds the real router over in-memory repositories, in-memory
//! object storage, a scripted payment provider and an in-memory session
//! store, then drives it with `tower::ServiceExt::oneshot`. Each `TestApp`
//! behaves like one browser: the session cookie is carried between requests.
//!
//! ```rust,ignore
//! let app = TestApp::new();
//! let product = app.seed_product("trail-mug", "18.00", 5).await;
//! let res = app.post("/api/cart/items", json!({"productId": product.id})).await;
//! assert_eq!(res.status, StatusCode::CREATED);
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]
#![allow(clippy::missing_panics_doc, clippy::unwrap_used)]

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use rust_decimal::Decimal;
use serde_json::Value;
use tower::ServiceExt;
use tower_sessions::cookie::time::{Duration, OffsetDateTime};
use tower_sessions::session::{Id, Record};
use tower_sessions::{MemoryStore, SessionStore};

use meridian_core::{CurrencyCode, Email, ProviderKind, UserRole};
use meridian_storefront::config::StorefrontConfig;
use meridian_storefront::db::memory::InMemoryDatabase;
use meridian_storefront::db::{ProductRepository, Repositories};
use meridian_storefront::middleware::session::SESSION_COOKIE_NAME;
use meridian_storefront::models::{CurrentUser, Product, ProductInput, Profile, session_keys};
use meridian_storefront::payments::PaymentService;
use meridian_storefront::payments::testing::ScriptedProvider;
use meridian_storefront::services::storage::MemoryObjectStorage;
use meridian_storefront::state::AppState;

/// A response with its body parsed as JSON (`Value::Null` when not JSON).
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

/// One visitor talking to a fully wired storefront.
pub struct TestApp {
    pub db: InMemoryDatabase,
    pub storage: MemoryObjectStorage,
    /// Registered as the default provider under the `square` name.
    pub square: Arc<ScriptedProvider>,
    pub sessions: MemoryStore,
    router: Router,
    cookie: Mutex<Option<String>>,
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

impl TestApp {
    /// A storefront with one scripted Square provider and no rate limiting.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StorefrontConfig::for_tests())
    }

    #[must_use]
    pub fn with_config(config: StorefrontConfig) -> Self {
        let db = InMemoryDatabase::new();
        let storage = MemoryObjectStorage::new();
        let square = Arc::new(ScriptedProvider::new(ProviderKind::Square));

        let mut payments = PaymentService::default();
        payments.register(square.clone());
        payments.set_default(ProviderKind::Square);

        let state = AppState::from_parts(
            config,
            None,
            Repositories::in_memory(&db),
            payments,
            Arc::new(storage.clone()),
        );
        let sessions = MemoryStore::default();
        let router = meridian_storefront::app(state, sessions.clone());

        Self {
            db,
            storage,
            square,
            sessions,
            router,
            cookie: Mutex::new(None),
        }
    }

    /// A second visitor on the same store, with its own cookie jar.
    #[must_use]
    pub fn other_visitor(&self) -> Self {
        Self {
            db: self.db.clone(),
            storage: self.storage.clone(),
            square: self.square.clone(),
            sessions: self.sessions.clone(),
            router: self.router.clone(),
            cookie: Mutex::new(None),
        }
    }

    fn cookie(&self) -> Option<String> {
        self.cookie
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_cookie(&self, value: String) {
        *self.cookie.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    /// Send a request, attaching and then updating the session cookie.
    pub async fn send(&self, mut request: Request<Body>) -> TestResponse {
        if let Some(cookie) = self.cookie() {
            request.headers_mut().insert(
                header::COOKIE,
                format!("{SESSION_COOKIE_NAME}={cookie}").parse().unwrap(),
            );
        }

        let response = self.router.clone().oneshot(request).await.unwrap();

        for value in response.headers().get_all(header::SET_COOKIE) {
            let pair = value.to_str().unwrap().split(';').next().unwrap_or_default();
            if let Some((name, id)) = pair.split_once('=')
                && name == SESSION_COOKIE_NAME
            {
                self.set_cookie(id.to_string());
            }
        }

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        TestResponse {
            status,
            headers,
            body,
        }
    }

    async fn json_request(&self, method: Method, uri: &str, body: Option<Value>) -> TestResponse {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        };
        self.send(request.unwrap()).await
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.json_request(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> TestResponse {
        self.json_request(Method::POST, uri, Some(body)).await
    }

    pub async fn post_empty(&self, uri: &str) -> TestResponse {
        self.json_request(Method::POST, uri, None).await
    }

    pub async fn put(&self, uri: &str, body: Value) -> TestResponse {
        self.json_request(Method::PUT, uri, Some(body)).await
    }

    pub async fn patch(&self, uri: &str, body: Value) -> TestResponse {
        self.json_request(Method::PATCH, uri, Some(body)).await
    }

    pub async fn delete(&self, uri: &str) -> TestResponse {
        self.json_request(Method::DELETE, uri, None).await
    }

    /// POST an `application/x-www-form-urlencoded` body.
    pub async fn post_form(&self, uri: &str, fields: &[(&str, &str)]) -> TestResponse {
        let body = fields
            .iter()
            .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    /// Put `profile` in this visitor's session, as the sign-in flow would.
    ///
    /// Keeps whatever the session already holds (such as a guest cart).
    pub async fn sign_in(&self, profile: &Profile) {
        let user = CurrentUser {
            id: profile.id,
            email: profile.email.clone(),
        };

        let existing = match self.cookie() {
            Some(cookie) => match Id::from_str(&cookie) {
                Ok(id) => self.sessions.load(&id).await.unwrap(),
                Err(_) => None,
            },
            None => None,
        };

        let mut record = existing.unwrap_or_else(|| Record {
            id: Id::default(),
            data: HashMap::new(),
            expiry_date: OffsetDateTime::now_utc() + Duration::days(1),
        });
        record.data.insert(
            session_keys::CURRENT_USER.to_string(),
            serde_json::to_value(&user).unwrap(),
        );

        if self.cookie().is_some() {
            self.sessions.save(&record).await.unwrap();
        } else {
            self.sessions.create(&mut record).await.unwrap();
        }
        self.set_cookie(record.id.to_string());
    }

    /// Create a profile with `role` and sign in as it.
    pub async fn sign_in_as(&self, email: &str, role: UserRole) -> Profile {
        let profile = self.db.insert_profile(Email::parse(email).unwrap(), role);
        self.sign_in(&profile).await;
        profile
    }

    /// Create an active product priced in dollars.
    pub async fn seed_product(&self, slug: &str, price: &str, inventory: i32) -> Product {
        let input = ProductInput {
            name: slug.replace('-', " "),
            slug: slug.to_string(),
            description: None,
            price: Decimal::from_str(price).unwrap(),
            currency: None,
            inventory_quantity: inventory,
            active: true,
        };
        ProductRepository::create(&self.db, &input, CurrencyCode::USD)
            .await
            .unwrap()
    }

    /// Add a product to the cart and walk checkout up to payment.
    ///
    /// Returns the checkout session id.
    pub async fn checkout_to_payment(&self, product: &Product, quantity: i32) -> String {
        let res = self
            .post(
                "/api/cart/items",
                serde_json::json!({"productId": product.id, "quantity": quantity}),
            )
            .await;
        assert_eq!(res.status, StatusCode::CREATED, "{:?}", res.body);

        let res = self.post("/api/checkout", serde_json::json!({})).await;
        assert_eq!(res.status, StatusCode::CREATED, "{:?}", res.body);
        let session_id = res.body["id"].as_str().unwrap().to_string();

        let res = self
            .post(
                &format!("/api/checkout/{session_id}/information"),
                serde_json::json!({
                    "email": "shopper@example.com",
                    "shippingAddress": sample_address(),
                }),
            )
            .await;
        assert_eq!(res.status, StatusCode::OK, "{:?}", res.body);

        let res = self
            .post(
                &format!("/api/checkout/{session_id}/shipping"),
                serde_json::json!({"shippingOptionId": "standard"}),
            )
            .await;
        assert_eq!(res.status, StatusCode::OK, "{:?}", res.body);

        session_id
    }
}

/// A valid US shipping address.
#[must_use]
pub fn sample_address() -> Value {
    serde_json::json!({
        "firstName": "Ada",
        "lastName": "Lovelace",
        "line1": "1 Main St",
        "city": "Springfield",
        "region": "IL",
        "postalCode": "62701",
        "country": "US",
    })
}

/// Minimal form-urlencoding for test fields.
fn encode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            b' ' => "+".to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect()
}
