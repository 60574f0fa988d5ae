//! Fixed-window rate limiting.
//!
//! A request is identified by a [`CompositeKey`]: who is asking (usually the
//! client IP) and what they are asking for (usually the route path, sometimes
//! narrowed to one record). Each check increments the counter for that key
//! in a [`CounterStore`] and rejects once the count passes the policy's
//! maximum.
//!
//! Windows are fixed, not sliding: a counter resets when its TTL lapses. A
//! burst that straddles a reset can momentarily see up to `2 * max` requests
//! accepted. That is the accepted cost of needing only one atomic
//! increment-with-TTL from the store.

use std::{
    borrow::Cow,
    fmt::{self, Write as _},
    time::Duration,
};

use crate::{
    CounterStore,
    error::{Error, Result},
};

/// Subject used when the caller cannot identify the requester.
pub const UNKNOWN_SUBJECT: &str = "unknown";

/// The `(subject, resource)` pair a counter is kept for.
///
/// The rendered form escapes backslashes, `|`, `:` and `#` inside each
/// part, so two different keys never render to the same store key even when
/// the subject is caller-controlled.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CompositeKey {
    subject: String,
    resource: String,
    scope: Option<String>,
}

impl CompositeKey {
    /// Builds a key; a missing or blank `subject` becomes
    /// [`UNKNOWN_SUBJECT`].
    pub fn new(subject: Option<&str>, resource: impl Into<String>) -> Self {
        let subject = subject
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_SUBJECT);
        Self {
            subject: subject.to_owned(),
            resource: resource.into(),
            scope: None,
        }
    }

    /// Narrows the resource to one record, e.g. a post id, so each record
    /// gets its own counter.
    #[must_use]
    pub fn scoped(mut self, id: impl fmt::Display) -> Self {
        self.scope = Some(id.to_string());
        self
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_escaped(f, &self.subject)?;
        f.write_str("|")?;
        write_escaped(f, &self.resource)?;
        if let Some(scope) = &self.scope {
            f.write_str("#")?;
            write_escaped(f, scope)?;
        }
        Ok(())
    }
}

/// Writes `part` with the key separators backslash-escaped.
fn write_escaped(f: &mut impl fmt::Write, part: &str) -> fmt::Result {
    for c in part.chars() {
        if matches!(c, '\\' | '|' | ':' | '#') {
            f.write_char('\\')?;
        }
        f.write_char(c)?;
    }
    Ok(())
}

/// A named `(window, max)` pair.
///
/// The name namespaces the counter, so layering several policies over the
/// same [`CompositeKey`] never makes them share a count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policy {
    pub name: Cow<'static, str>,
    pub window: Duration,
    pub max: u64,
}

impl Policy {
    pub fn new(name: impl Into<Cow<'static, str>>, window: Duration, max: u64) -> Self {
        Self {
            name: name.into(),
            window,
            max,
        }
    }

    /// `max` requests per `secs` seconds.
    pub fn per_seconds(name: impl Into<Cow<'static, str>>, secs: u64, max: u64) -> Self {
        Self::new(name, Duration::from_secs(secs), max)
    }

    /// Store key for `key` under this policy.
    pub fn key_for(&self, key: &CompositeKey) -> String {
        let mut out = String::with_capacity(self.name.len() + 32);
        let _ = write_escaped(&mut out, &self.name);
        let _ = write!(out, ":{key}");
        out
    }
}

/// Counter state after an accepted request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Usage {
    /// Maximum requests allowed in the window.
    pub limit: u64,
    /// Requests counted so far in the window, this one included.
    pub count: u64,
    /// Requests left before rejection.
    pub remaining: u64,
}

/// Rate limiter over a pluggable [`CounterStore`].
///
/// The limiter holds no state of its own; the store is the synchronization
/// point, so one store can back any number of limiters and policies.
#[derive(Clone, Debug)]
pub struct RateLimiter<S> {
    store: S,
}

impl<S> RateLimiter<S>
where
    S: CounterStore,
{
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Counts one request for `(subject, resource)` and rejects it if the
    /// count now exceeds `max` within `window`.
    ///
    /// The increment is never rolled back: rejected attempts still count, so
    /// hammering a limited key keeps it limited.
    ///
    /// # Errors
    ///
    /// - [`Error::RateLimitExceeded`] once the post-increment count is above
    ///   `max`.
    /// - [`Error::Store`] if the counter store failed. This is never treated
    ///   as "allowed"; the caller decides whether to fail open or closed.
    pub async fn rate_limit(
        &self,
        subject: &str,
        resource: &str,
        window: Duration,
        max: u64,
    ) -> Result<Usage> {
        let key = CompositeKey::new(Some(subject), resource);
        self.hit(&key.to_string(), window, max).await
    }

    /// Applies a single policy to `key`.
    ///
    /// # Errors
    ///
    /// See [`Self::rate_limit`].
    pub async fn check(&self, key: &CompositeKey, policy: &Policy) -> Result<Usage> {
        self.hit(&policy.key_for(key), policy.window, policy.max)
            .await
    }

    /// Applies `policies` in priority order, stopping at the first rejection.
    ///
    /// Policies after a rejecting one are not counted.
    ///
    /// # Errors
    ///
    /// See [`Self::rate_limit`].
    pub async fn check_all(&self, key: &CompositeKey, policies: &[Policy]) -> Result<Vec<Usage>> {
        let mut usages = Vec::with_capacity(policies.len());
        for policy in policies {
            usages.push(self.check(key, policy).await?);
        }
        Ok(usages)
    }

    async fn hit(&self, key: &str, window: Duration, max: u64) -> Result<Usage> {
        let count = self.store.increment(key, window).await?;
        if count > max {
            tracing::debug!(key, count, max, ?window, "rate limit exceeded");
            return Err(Error::RateLimitExceeded {
                limit: max,
                window,
                retry_after: window,
            });
        }
        Ok(Usage {
            limit: max,
            count,
            remaining: max - count,
        })
    }
}
