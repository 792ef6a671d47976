#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use marketplace_checkout::{
    config::GatewayConfig,
    db::run_migrations,
    error::{AppError, AppResult},
    gateway::{CaptureOutcome, GatewayError, Intent, PaymentGateway, Refund},
    middleware::auth::{AuthUser, JwtKeys, Role},
    services::catalog::Catalog,
    state::AppState,
};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use uuid::Uuid;

pub const JWT_SECRET: &str = "integration-test-secret";

/// Catalog backed by an in-memory price table that tests can edit.
#[derive(Default)]
pub struct PriceList {
    prices: Mutex<HashMap<Uuid, i64>>,
}

impl PriceList {
    pub fn set(&self, product_id: Uuid, price: i64) {
        self.prices.lock().unwrap().insert(product_id, price);
    }

    pub fn remove(&self, product_id: Uuid) {
        self.prices.lock().unwrap().remove(&product_id);
    }

    /// Registers a fresh product at `price` and returns its id.
    pub fn product(&self, price: i64) -> Uuid {
        let id = Uuid::new_v4();
        self.set(id, price);
        id
    }
}

#[async_trait]
impl Catalog for PriceList {
    async fn unit_price(&self, product_id: Uuid) -> AppResult<i64> {
        self.prices
            .lock()
            .unwrap()
            .get(&product_id)
            .copied()
            .ok_or(AppError::NotFound)
    }
}

/// Gateway double. Capture answers are consumed from a script; once the
/// script runs dry every capture completes.
#[derive(Default)]
pub struct ScriptedGateway {
    captures: Mutex<VecDeque<Result<CaptureOutcome, GatewayError>>>,
    lookups: Mutex<VecDeque<Result<CaptureOutcome, GatewayError>>>,
    create_failure: Mutex<Option<GatewayError>>,
    void_failure: Mutex<Option<GatewayError>>,
    capture_delay: Mutex<Option<Duration>>,
    pub create_calls: AtomicUsize,
    pub capture_calls: AtomicUsize,
    pub lookup_calls: AtomicUsize,
    pub refund_calls: AtomicUsize,
    pub void_calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn script_captures<I>(&self, answers: I)
    where
        I: IntoIterator<Item = Result<CaptureOutcome, GatewayError>>,
    {
        self.captures.lock().unwrap().extend(answers);
    }

    /// Answers for `capture_status`; completed once the script runs dry.
    pub fn script_lookups<I>(&self, answers: I)
    where
        I: IntoIterator<Item = Result<CaptureOutcome, GatewayError>>,
    {
        self.lookups.lock().unwrap().extend(answers);
    }

    pub fn transient_captures(&self, count: usize) {
        self.script_captures((0..count).map(|n| Err(GatewayError::Transient(format!("503 #{n}")))));
    }

    pub fn fail_create(&self, err: GatewayError) {
        *self.create_failure.lock().unwrap() = Some(err);
    }

    pub fn fail_void(&self, err: GatewayError) {
        *self.void_failure.lock().unwrap() = Some(err);
    }

    pub fn delay_captures(&self, delay: Duration) {
        *self.capture_delay.lock().unwrap() = Some(delay);
    }

    pub fn captures(&self) -> usize {
        self.capture_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_intent(
        &self,
        _amount: i64,
        _currency: &str,
        _idempotency_key: Option<&str>,
    ) -> Result<Intent, GatewayError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = self.create_failure.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(Intent {
            transaction_id: format!("TX-{}-{n}", Uuid::new_v4().simple()),
            status: "CREATED".into(),
            approve_url: Some(format!("https://paypal.test/approve/{n}")),
        })
    }

    async fn capture(&self, transaction_id: &str) -> Result<CaptureOutcome, GatewayError> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.capture_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.captures.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(CaptureOutcome::Completed {
                capture_id: Some(format!("CAP-{transaction_id}")),
            })
        })
    }

    async fn capture_status(
        &self,
        transaction_id: &str,
    ) -> Result<CaptureOutcome, GatewayError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.lookups.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(CaptureOutcome::Completed {
                capture_id: Some(format!("CAP-{transaction_id}")),
            })
        })
    }

    async fn refund(
        &self,
        _capture_id: &str,
        _amount: i64,
        _currency: &str,
    ) -> Result<Refund, GatewayError> {
        let n = self.refund_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Refund {
            refund_id: format!("RF-{n}"),
            status: "COMPLETED".into(),
        })
    }

    async fn void(&self, _transaction_id: &str) -> Result<(), GatewayError> {
        self.void_calls.fetch_add(1, Ordering::SeqCst);
        match self.void_failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub fn fast_gateway_config() -> GatewayConfig {
    GatewayConfig {
        call_timeout: Duration::from_secs(2),
        backoff_step: Duration::from_millis(1),
        ..GatewayConfig::default()
    }
}

pub struct TestApp {
    pub state: AppState,
    pub catalog: Arc<PriceList>,
    pub gateway: Arc<ScriptedGateway>,
    pub db: DatabaseConnection,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(fast_gateway_config()).await
    }

    pub async fn with_config(config: GatewayConfig) -> Self {
        let mut options = ConnectOptions::new("sqlite::memory:");
        options
            .max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);
        let db = Database::connect(options).await.expect("connect sqlite");
        run_migrations(&db).await.expect("create schema");

        let catalog = Arc::new(PriceList::default());
        let gateway = Arc::new(ScriptedGateway::default());
        let state = AppState::new(
            db.clone(),
            JwtKeys::new(JWT_SECRET, 1),
            catalog.clone(),
            gateway.clone(),
            config,
        );

        Self {
            state,
            catalog,
            gateway,
            db,
        }
    }

    pub fn token(&self, user: &AuthUser) -> String {
        self.state
            .jwt
            .issue(user.user_id, user.role)
            .expect("issue token")
    }
}

pub fn actor(role: Role) -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        role,
    }
}
