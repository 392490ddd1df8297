use crate::config::{ExponentialBackoff, RetryConfig, RetryOverride, RetryTrigger};
use crate::error::HttpError;
use crate::response::ResponseBody;
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service, ServiceExt};

/// Hard ceiling for a single backoff delay, whatever the configuration says.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Bytes drained from a retried response so the connection can be reused.
const RETRY_RESPONSE_DRAIN_LIMIT: usize = 64 * 1024;

/// Tower layer that retries transient failures with exponential backoff
///
/// The layer holds the process-wide default policy. A request may carry a
/// [`RetryOverride`] in its extensions; it is merged over the default for
/// that request only.
#[derive(Clone)]
pub struct RetryLayer {
    config: RetryConfig,
}

impl RetryLayer {
    /// Create a new `RetryLayer` with the specified default policy
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService {
            inner,
            config: self.config.clone(),
        }
    }
}

/// Service that implements the retry loop
///
/// - Retryable statuses are retried while attempts remain; once exhausted the
///   last response is returned as `Ok(Response)` and the caller maps it.
/// - Retryable errors (transport, timeout) are retried while attempts remain;
///   once exhausted the last error is returned.
/// - Everything else passes through on the first attempt.
#[derive(Clone)]
pub struct RetryService<S> {
    inner: S,
    config: RetryConfig,
}

impl<S> Service<Request<Full<Bytes>>> for RetryService<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResponseBody>, Error = HttpError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = S::Response;
    type Error = HttpError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        // Swap so we consume the instance that was poll_ready'd,
        // leaving a fresh clone for the next poll_ready cycle.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);

        let config = req
            .extensions()
            .get::<RetryOverride>()
            .map_or_else(|| self.config.clone(), |o| o.apply(&self.config));

        let (parts, body_bytes) = req.into_parts();
        let http_version = parts.version;
        let parts = std::sync::Arc::new(parts);

        Box::pin(async move {
            let method = parts.method.clone();
            let host = parts
                .uri
                .authority()
                .map_or_else(|| "unknown".to_owned(), ToString::to_string);
            let path = parts.uri.path().to_owned();

            let mut last_error = None;
            for attempt in 0..=config.max_retries {
                let mut req = Request::from_parts((*parts).clone(), body_bytes.clone());
                *req.version_mut() = http_version;

                let mut svc = inner.clone();
                svc.ready().await?;

                match svc.call(req).await {
                    Ok(resp) => {
                        let status = resp.status().as_u16();
                        if attempt == config.max_retries
                            || !config.should_retry(RetryTrigger::Status(status))
                        {
                            return Ok(resp);
                        }

                        if let Err(e) = drain_response_body(resp, RETRY_RESPONSE_DRAIN_LIMIT).await
                        {
                            tracing::debug!(
                                error = %e,
                                "Failed to drain response body before retry; connection may not be reused"
                            );
                        }

                        let backoff = calculate_backoff(&config.backoff, attempt);
                        tracing::debug!(
                            retry = attempt + 1,
                            max_retries = config.max_retries,
                            status,
                            method = %method,
                            host = %host,
                            path = %path,
                            backoff_ms = backoff.as_millis(),
                            "Retrying request after status code"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    Err(err) => {
                        if !config.should_retry(get_retry_trigger(&err)) {
                            return Err(err);
                        }
                        if attempt == config.max_retries {
                            last_error = Some(err);
                            break;
                        }

                        let backoff = calculate_backoff(&config.backoff, attempt);
                        tracing::debug!(
                            retry = attempt + 1,
                            max_retries = config.max_retries,
                            error = %err,
                            method = %method,
                            host = %host,
                            path = %path,
                            backoff_ms = backoff.as_millis(),
                            "Retrying request after error"
                        );
                        last_error = Some(err);
                        tokio::time::sleep(backoff).await;
                    }
                }
            }

            Err(last_error.unwrap_or(HttpError::RetriesExhausted {
                attempts: config.max_retries + 1,
            }))
        })
    }
}

/// Drain up to `limit` bytes of a discarded response so HTTP/1.1 can reuse
/// the connection. Larger bodies are abandoned and the connection dropped.
async fn drain_response_body(
    response: Response<ResponseBody>,
    limit: usize,
) -> Result<(), HttpError> {
    let content_length = response
        .headers()
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<usize>().ok());
    if content_length.is_some_and(|len| len > limit) {
        return Ok(());
    }

    let mut body = std::pin::pin!(response.into_body());
    let mut drained = 0usize;
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            drained += chunk.len();
            if drained >= limit {
                break;
            }
        }
    }
    Ok(())
}

/// Extract retry trigger from an error
fn get_retry_trigger(err: &HttpError) -> RetryTrigger {
    match err {
        HttpError::Transport(_) => RetryTrigger::TransportError,
        HttpError::Timeout(_) => RetryTrigger::Timeout,
        _ => RetryTrigger::NonRetryable,
    }
}

/// Delay before retry number `attempt + 1`.
///
/// `min(initial * multiplier^attempt, max)`, plus up to 25% jitter when
/// enabled (still capped at `max`). Non-finite or negative inputs fall back to
/// safe values instead of panicking.
#[must_use]
pub fn calculate_backoff(backoff: &ExponentialBackoff, attempt: usize) -> Duration {
    let max = backoff.max.min(MAX_BACKOFF);

    let multiplier = if backoff.multiplier.is_finite() && backoff.multiplier >= 0.0 {
        backoff.multiplier
    } else {
        1.0
    };
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let secs = backoff.initial.as_secs_f64() * multiplier.powi(exponent);

    let delay = if secs.is_finite() && secs < max.as_secs_f64() {
        Duration::from_secs_f64(secs.max(0.0))
    } else {
        max
    };

    let delay = if backoff.jitter {
        let factor = rand::rng().random_range(0.0..=0.25);
        delay + delay.mul_f64(factor)
    } else {
        delay
    };

    delay.min(max)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::{Method, StatusCode};
    use std::sync::{Arc, Mutex};

    fn make_response_body(data: &[u8]) -> ResponseBody {
        Full::new(Bytes::from(data.to_vec()))
            .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })
            .boxed()
    }

    #[derive(Clone, Copy)]
    enum Outcome {
        Status(StatusCode),
        ConnectionReset,
        MalformedJson,
    }

    struct CallRecord {
        at: tokio::time::Instant,
    }

    /// Plays back `script[i]` on call `i`; the last entry repeats.
    #[derive(Clone)]
    struct ScriptedService {
        script: Arc<Vec<Outcome>>,
        calls: Arc<Mutex<Vec<CallRecord>>>,
    }

    impl ScriptedService {
        fn new(script: Vec<Outcome>) -> Self {
            Self {
                script: Arc::new(script),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl Service<Request<Full<Bytes>>> for ScriptedService {
        type Response = Response<ResponseBody>;
        type Error = HttpError;
        type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _: Request<Full<Bytes>>) -> Self::Future {
            let mut calls = self.calls.lock().unwrap();
            let index = calls.len().min(self.script.len() - 1);
            calls.push(CallRecord {
                at: tokio::time::Instant::now(),
            });
            let outcome = self.script[index];

            Box::pin(async move {
                match outcome {
                    Outcome::Status(status) => Ok(Response::builder()
                        .status(status)
                        .body(make_response_body(b"{}"))
                        .unwrap()),
                    Outcome::ConnectionReset => {
                        Err(HttpError::Transport(Box::new(std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            "connection reset",
                        ))))
                    }
                    Outcome::MalformedJson => Err(HttpError::Json(
                        serde_json::from_str::<serde_json::Value>("invalid").unwrap_err(),
                    )),
                }
            })
        }
    }

    fn fast_config(max_retries: usize) -> RetryConfig {
        RetryConfig {
            max_retries,
            backoff: ExponentialBackoff::fast(),
            ..RetryConfig::default()
        }
    }

    fn request(method: Method) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri("http://example.com/menu")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_successful_request_is_sent_once() {
        let service = ScriptedService::new(vec![Outcome::Status(StatusCode::OK)]);
        let mut retry = RetryLayer::new(fast_config(3)).layer(service.clone());

        let resp = retry.call(request(Method::GET)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(service.call_count(), 1);
    }

    #[tokio::test]
    async fn test_always_failing_transport_makes_n_plus_one_attempts() {
        for max_retries in [0, 1, 3] {
            let service = ScriptedService::new(vec![Outcome::ConnectionReset]);
            let mut retry = RetryLayer::new(fast_config(max_retries)).layer(service.clone());

            let result = retry.call(request(Method::GET)).await;
            assert!(matches!(result, Err(HttpError::Transport(_))));
            assert_eq!(service.call_count(), max_retries + 1);
        }
    }

    #[tokio::test]
    async fn test_transport_error_then_success() {
        let service = ScriptedService::new(vec![
            Outcome::ConnectionReset,
            Outcome::ConnectionReset,
            Outcome::Status(StatusCode::OK),
        ]);
        let mut retry = RetryLayer::new(fast_config(3)).layer(service.clone());

        let resp = retry.call(request(Method::GET)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(service.call_count(), 3);
    }

    #[tokio::test]
    async fn test_retryable_status_is_retried() {
        let service = ScriptedService::new(vec![
            Outcome::Status(StatusCode::SERVICE_UNAVAILABLE),
            Outcome::Status(StatusCode::TOO_MANY_REQUESTS),
            Outcome::Status(StatusCode::OK),
        ]);
        let mut retry = RetryLayer::new(fast_config(3)).layer(service.clone());

        let resp = retry.call(request(Method::GET)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(service.call_count(), 3);
    }

    #[tokio::test]
    async fn test_post_is_retried_on_retryable_status() {
        let service = ScriptedService::new(vec![
            Outcome::Status(StatusCode::BAD_GATEWAY),
            Outcome::Status(StatusCode::CREATED),
        ]);
        let mut retry = RetryLayer::new(fast_config(3)).layer(service.clone());

        let resp = retry.call(request(Method::POST)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(service.call_count(), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_status_passes_through() {
        let service = ScriptedService::new(vec![Outcome::Status(StatusCode::NOT_FOUND)]);
        let mut retry = RetryLayer::new(fast_config(3)).layer(service.clone());

        let resp = retry.call(request(Method::GET)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(service.call_count(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_status_retries_return_last_response() {
        let service =
            ScriptedService::new(vec![Outcome::Status(StatusCode::INTERNAL_SERVER_ERROR)]);
        let mut retry = RetryLayer::new(fast_config(2)).layer(service.clone());

        let resp = retry.call(request(Method::GET)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(service.call_count(), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_retried() {
        let service = ScriptedService::new(vec![Outcome::MalformedJson]);
        let mut retry = RetryLayer::new(fast_config(3)).layer(service.clone());

        let result = retry.call(request(Method::GET)).await;
        assert!(matches!(result, Err(HttpError::Json(_))));
        assert_eq!(service.call_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_errors_not_retried_when_disabled() {
        let service = ScriptedService::new(vec![Outcome::ConnectionReset]);
        let config = RetryConfig {
            retry_transport_errors: false,
            ..fast_config(3)
        };
        let mut retry = RetryLayer::new(config).layer(service.clone());

        let result = retry.call(request(Method::GET)).await;
        assert!(result.is_err());
        assert_eq!(service.call_count(), 1);
    }

    #[tokio::test]
    async fn test_per_request_policy_overrides_layer_default() {
        let service = ScriptedService::new(vec![Outcome::Status(StatusCode::CONFLICT)]);
        let mut retry = RetryLayer::new(fast_config(3)).layer(service.clone());

        let mut req = request(Method::PUT);
        req.extensions_mut()
            .insert(RetryOverride::from(fast_config(1).with_retry_on([409])));

        let resp = retry.call(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(service.call_count(), 2);

        let service = ScriptedService::new(vec![Outcome::Status(StatusCode::SERVICE_UNAVAILABLE)]);
        let mut retry = RetryLayer::new(fast_config(3)).layer(service.clone());
        let mut req = request(Method::POST);
        req.extensions_mut()
            .insert(RetryOverride::default().max_retries(0));

        let resp = retry.call(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(service.call_count(), 1);
    }

    #[tokio::test]
    async fn test_partial_override_keeps_layer_status_set() {
        let service = ScriptedService::new(vec![Outcome::Status(StatusCode::IM_A_TEAPOT)]);
        let config = fast_config(3).with_retry_on([418]);
        let mut retry = RetryLayer::new(config).layer(service.clone());

        let mut req = request(Method::GET);
        req.extensions_mut()
            .insert(RetryOverride::default().max_retries(1));

        let resp = retry.call(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(service.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_double_per_attempt() {
        let service = ScriptedService::new(vec![Outcome::ConnectionReset]);
        let config = RetryConfig {
            max_retries: 3,
            backoff: ExponentialBackoff {
                initial: Duration::from_millis(100),
                max: Duration::from_secs(10),
                multiplier: 2.0,
                jitter: false,
            },
            ..RetryConfig::default()
        };
        let mut retry = RetryLayer::new(config).layer(service.clone());

        let _ = retry.call(request(Method::GET)).await;

        let calls = service.calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        let expected = [100, 200, 400];
        for (i, want) in expected.into_iter().enumerate() {
            let gap = calls[i + 1].at - calls[i].at;
            let want = Duration::from_millis(want);
            assert!(
                gap >= want && gap < want + Duration::from_millis(5),
                "gap before attempt {} was {gap:?}, expected {want:?}",
                i + 1
            );
        }
    }

    #[test]
    fn test_calculate_backoff_no_jitter() {
        let backoff = ExponentialBackoff {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: false,
        };

        assert_eq!(calculate_backoff(&backoff, 0), Duration::from_millis(100));
        assert_eq!(calculate_backoff(&backoff, 1), Duration::from_millis(200));
        assert_eq!(calculate_backoff(&backoff, 2), Duration::from_millis(400));
        assert_eq!(calculate_backoff(&backoff, 10), Duration::from_secs(10));
    }

    #[test]
    fn test_calculate_backoff_with_jitter_stays_within_bounds() {
        let backoff = ExponentialBackoff {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        };

        for _ in 0..100 {
            let delay = calculate_backoff(&backoff, 0);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(125));
        }
        for _ in 0..100 {
            assert!(calculate_backoff(&backoff, 20) <= Duration::from_secs(10));
        }
    }

    #[test]
    fn test_calculate_backoff_sanitizes_multiplier() {
        for multiplier in [f64::NAN, f64::INFINITY, -2.0] {
            let backoff = ExponentialBackoff {
                initial: Duration::from_millis(100),
                max: Duration::from_secs(10),
                multiplier,
                jitter: false,
            };
            assert_eq!(calculate_backoff(&backoff, 0), Duration::from_millis(100));
            assert_eq!(calculate_backoff(&backoff, 3), Duration::from_millis(100));
        }
    }

    #[test]
    fn test_calculate_backoff_with_huge_attempt() {
        let backoff = ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(10));
        assert_eq!(calculate_backoff(&backoff, usize::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_calculate_backoff_respects_hard_ceiling() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(60), Duration::from_secs(86_400));
        assert_eq!(calculate_backoff(&backoff, 10), MAX_BACKOFF);
    }
}
