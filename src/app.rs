use crate::auth::SessionSigner;
use crate::billing::{
    PlanCatalog,
    payment::{PaymentGateway, RazorpayGateway},
};
use crate::classifier::{HttpClassifier, OutcomeClassifier};
use crate::config::Config;
use crate::handler::middleware::request_log::{AccessLog, log_requests};
use crate::provider::{ElevenLabsProvider, VoiceProvider};
use anyhow::Result;
use axum::{Router, middleware};
use sea_orm::DatabaseConnection;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;

pub struct AppStateInner {
    pub config: Arc<Config>,
    pub db: DatabaseConnection,
    pub provider: Arc<dyn VoiceProvider>,
    pub classifier: Option<Arc<dyn OutcomeClassifier>>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub plans: PlanCatalog,
    pub sessions: SessionSigner,
    pub token: CancellationToken,
}

pub type AppState = Arc<AppStateInner>;

#[derive(Default)]
pub struct AppStateBuilder {
    pub config: Option<Config>,
    pub db: Option<DatabaseConnection>,
    pub provider: Option<Arc<dyn VoiceProvider>>,
    pub classifier: Option<Arc<dyn OutcomeClassifier>>,
    pub gateway: Option<Arc<dyn PaymentGateway>>,
    pub token: Option<CancellationToken>,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_database(mut self, db: DatabaseConnection) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn VoiceProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn OutcomeClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub async fn build(self) -> Result<AppState> {
        let config = Arc::new(self.config.unwrap_or_default());
        let db = match self.db {
            Some(db) => db,
            None => crate::models::create_db(&config.database_url).await?,
        };
        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(ElevenLabsProvider::new(&config.provider)));
        let classifier = self.classifier.or_else(|| {
            config.classifier.clone().map(|classifier_config| {
                Arc::new(HttpClassifier::new(classifier_config)) as Arc<dyn OutcomeClassifier>
            })
        });
        let gateway = self
            .gateway
            .unwrap_or_else(|| Arc::new(RazorpayGateway::new(config.payment.clone())));
        let plans = PlanCatalog::from_config(config.plans.as_ref());
        let sessions = SessionSigner::new(&config.session_secret);

        Ok(Arc::new(AppStateInner {
            config,
            db,
            provider,
            classifier,
            gateway,
            plans,
            sessions,
            token: self.token.unwrap_or_default(),
        }))
    }
}

pub fn create_router(state: AppState) -> Router {
    // CORS configuration to allow cross-origin requests
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PATCH,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            axum::http::header::ACCEPT,
            axum::http::header::ORIGIN,
        ]);

    let access_log = Arc::new(AccessLog::new(state.sessions.clone()).skip("/api/health"));
    Router::new()
        .nest("/api", crate::handler::router())
        .with_state(state)
        .layer(middleware::from_fn_with_state(access_log, log_requests))
        .layer(cors)
}

pub async fn run(state: AppState) -> Result<()> {
    let token = state.token.clone();
    let app = create_router(state.clone());
    let addr: SocketAddr = state.config.http_addr.parse()?;
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            return Err(anyhow::anyhow!("Failed to bind to {}: {}", addr, e));
        }
    };
    info!("listening on http://{}", addr);

    let shutdown = token.clone();
    let http_task = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await });

    match http_task.await {
        Ok(_) => info!("Server shut down gracefully"),
        Err(e) => {
            tracing::error!("Server error: {}", e);
            return Err(anyhow::anyhow!("Server error: {}", e));
        }
    }
    token.cancel();
    Ok(())
}
