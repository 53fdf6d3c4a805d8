use axum::middleware::from_fn_with_state;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::{DefaultOnFailure, TraceLayer};
use tracing::Level;

use crate::auth::require_identity;
use crate::clock::{Clock, SystemClock};
use crate::counter_store::{CounterStore, InMemoryCounterStore};
use crate::endpoints::greeting::{greeting_handler, STREAM_FRAME_INTERVAL};
use crate::metrics::GatekeeperMetrics;
use crate::rate_limit::{rate_limit_middleware, FixedWindowRateLimiter, WindowKey};
use crate::visits::VisitCounter;

/// State for the gateway. Every field is shared, so cloning is cheap.
#[derive(Clone)]
pub struct AppStateData {
    pub rate_limiter: Arc<FixedWindowRateLimiter>,
    pub visits: Arc<VisitCounter>,
    pub metrics: Arc<GatekeeperMetrics>,
    pub stream_frame_interval: Duration,
}
pub type AppState = axum::extract::State<AppStateData>;

impl AppStateData {
    /// In-memory counters on the system clock
    pub fn new() -> Self {
        Self::new_with_clock(Arc::new(SystemClock))
    }

    pub fn new_with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::new_with_stores(
            Arc::new(InMemoryCounterStore::new()),
            Arc::new(InMemoryCounterStore::new()),
            clock,
        )
    }

    pub fn new_with_stores(
        window_store: Arc<dyn CounterStore<WindowKey>>,
        visit_store: Arc<dyn CounterStore<String>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rate_limiter: Arc::new(FixedWindowRateLimiter::new(window_store, clock)),
            visits: Arc::new(VisitCounter::new(visit_store)),
            metrics: Arc::new(GatekeeperMetrics::default()),
            stream_frame_interval: STREAM_FRAME_INTERVAL,
        }
    }
}

impl Default for AppStateData {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the gateway router.
///
/// There are no routes: every method and path lands on the greeting handler.
/// Requests pass authentication first, then rate limiting.
pub fn build_router(app_state: AppStateData) -> Router {
    let limiter_state = (
        Arc::clone(&app_state.rate_limiter),
        Arc::clone(&app_state.metrics),
    );
    let auth_state = Arc::clone(&app_state.metrics);

    Router::new()
        .fallback(greeting_handler)
        // Layers run outermost-last, so authentication wraps rate limiting
        .layer(from_fn_with_state(limiter_state, rate_limit_middleware))
        .layer(from_fn_with_state(auth_state, require_identity))
        // Failed requests are already logged by `Error`, so the trace layer stays at DEBUG
        .layer(TraceLayer::new_for_http().on_failure(DefaultOnFailure::new().level(Level::DEBUG)))
        .with_state(app_state)
}
