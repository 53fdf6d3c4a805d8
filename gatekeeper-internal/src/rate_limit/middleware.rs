use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::Identity;
use crate::error::{Error, ErrorDetails};
use crate::metrics::GatekeeperMetrics;
use crate::rate_limit::{Admission, FixedWindowRateLimiter, RateLimitDecision};

/// Rate limiting middleware.
///
/// Must run after [`crate::auth::require_identity`], which supplies the
/// [`Identity`]. On admit the remaining quota is stored as an [`Admission`]
/// extension for the handler and rate limit headers are added to the response.
pub async fn rate_limit_middleware(
    State((limiter, metrics)): State<(Arc<FixedWindowRateLimiter>, Arc<GatekeeperMetrics>)>,
    mut request: Request,
    next: Next,
) -> Result<Response, Error> {
    let identity = request
        .extensions()
        .get::<Identity>()
        .cloned()
        .ok_or_else(|| {
            Error::new(ErrorDetails::InternalError {
                message: "Rate limiting ran before authentication; no identity on request"
                    .to_string(),
            })
        })?;

    match limiter.check(&identity) {
        RateLimitDecision::Allow(headers) => {
            debug!(
                user = %identity,
                remaining = headers.remaining,
                "Rate limit check passed"
            );
            metrics.record_admitted();
            request.extensions_mut().insert(Admission {
                remaining: headers.remaining,
            });

            let mut response = next.run(request).await;
            response.headers_mut().extend(headers.to_header_map());
            Ok(response)
        }
        RateLimitDecision::Deny(headers) => {
            warn!(
                user = %identity,
                retry_after = headers.retry_after,
                "Rate limit exceeded"
            );
            metrics.record_rate_limited();
            Err(Error::new_without_logging(ErrorDetails::RateLimited {
                headers,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::counter_store::InMemoryCounterStore;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Extension, Router};
    use tower::ServiceExt;

    async fn echo_remaining(Extension(admission): Extension<Admission>) -> String {
        admission.remaining.to_string()
    }

    fn router() -> Router {
        let limiter = Arc::new(FixedWindowRateLimiter::new(
            Arc::new(InMemoryCounterStore::new()),
            Arc::new(ManualClock::new(1_700_000_000)),
        ));
        let metrics = Arc::new(GatekeeperMetrics::default());
        Router::new()
            .route("/", get(echo_remaining))
            .layer(axum::middleware::from_fn_with_state(
                (limiter, metrics),
                rate_limit_middleware,
            ))
    }

    #[tokio::test]
    async fn test_missing_identity_is_internal_error() {
        let response = router()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_admission_reaches_handler() {
        let identity = Identity::from_authorization("Bearer USER005").unwrap();
        let router = router();

        for expected in ["3", "2", "1", "0"] {
            let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();
            request.extensions_mut().insert(identity.clone());
            let response = router.clone().oneshot(request).await.unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()["X-RateLimit-Remaining"], expected);
            let body = axum::body::to_bytes(response.into_body(), 64).await.unwrap();
            assert_eq!(&body[..], expected.as_bytes());
        }

        let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();
        request.extensions_mut().insert(identity);
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("Retry-After"));
    }
}
