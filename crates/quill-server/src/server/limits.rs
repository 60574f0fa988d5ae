use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use quill::{CompositeKey, CounterStore, Error, Policy, Usage};

use crate::server::routes::{ApiError, AppState};

/// The three layered request policies.
///
/// Every request counts against `default`; writes also count against
/// `mutating`, and ID issuing against `sensitive`.
#[derive(Debug, Clone)]
pub struct Policies {
    pub default: Policy,
    pub mutating: Policy,
    pub sensitive: Policy,
}

impl Policies {
    /// Policies for a request, narrowest first, so a rejection by a tight
    /// policy does not also spend the broader budgets.
    pub fn for_request(&self, method: &Method, path: &str) -> Vec<Policy> {
        let mut policies = Vec::with_capacity(3);
        if path == "/ids" {
            policies.push(self.sensitive.clone());
        }
        if is_mutating(method) {
            policies.push(self.mutating.clone());
        }
        policies.push(self.default.clone());
        policies
    }
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Client identity for limiting: the peer address, or the first
/// `X-Forwarded-For` hop when `trust_proxy` is set and the header is present.
/// `None` ends up in the shared `"unknown"` bucket.
pub fn client_subject(req: &Request, trust_proxy: bool) -> Option<String> {
    let forwarded = trust_proxy
        .then(|| forwarded_for(req.headers()))
        .flatten();
    forwarded.map(str::to_owned).or_else(|| {
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
    })
}

fn forwarded_for(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
}

/// Applies the layered policies before the handler runs.
///
/// A rejection answers 429 with `Retry-After`. A store failure answers 503,
/// or lets the request through with a warning when fail-open is configured.
pub async fn rate_limit<S>(State(state): State<AppState<S>>, req: Request, next: Next) -> Response
where
    S: CounterStore + 'static,
{
    let subject = client_subject(&req, state.trust_proxy());
    let key = CompositeKey::new(subject.as_deref(), req.uri().path());
    let policies = state.policies().for_request(req.method(), req.uri().path());

    match state.quill().limiter().check_all(&key, &policies).await {
        Ok(usages) => {
            let mut response = next.run(req).await;
            if let Some(tightest) = usages.iter().min_by_key(|u| u.remaining) {
                set_usage_headers(response.headers_mut(), tightest);
            }
            response
        }
        Err(Error::Store(err)) if state.fail_open() => {
            tracing::warn!(%key, error = %err, "counter store failed, letting request through");
            next.run(req).await
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

fn set_usage_headers(headers: &mut HeaderMap, usage: &Usage) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(usage.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(usage.remaining));
}
