//! API-key auth, per-client rate limiting, and CORS for HTTP surfaces.

use std::num::NonZeroU32;

use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use hyper::header::HeaderMap;
use hyper::{Method, Response, StatusCode};

use super::{error_response, too_many_requests};
use crate::config::SecurityConfig;

type KeyedLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Request gate applied in front of every routed HTTP handler.
pub struct SecurityLayer {
    config: SecurityConfig,
    limiter: Option<KeyedLimiter>,
    clock: DefaultClock,
}

impl SecurityLayer {
    /// Build the gate from its configuration. `rate_limit_rpm == 0` disables
    /// rate limiting.
    pub fn new(config: SecurityConfig) -> Self {
        let limiter = NonZeroU32::new(config.rate_limit_rpm)
            .map(|rpm| RateLimiter::keyed(Quota::per_minute(rpm)));
        Self {
            config,
            limiter,
            clock: DefaultClock::default(),
        }
    }

    /// Answer a CORS preflight, when CORS is enabled.
    pub fn preflight(&self, method: &Method) -> Option<Response<String>> {
        if !self.config.enable_cors || method != Method::OPTIONS {
            return None;
        }
        let mut response = Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(String::new())
            .unwrap();
        self.apply_cors(&mut response);
        response.headers_mut().insert(
            "Access-Control-Allow-Methods",
            "GET, POST, PUT, DELETE, OPTIONS".parse().unwrap(),
        );
        response.headers_mut().insert(
            "Access-Control-Allow-Headers",
            "Content-Type, Authorization, X-API-Key".parse().unwrap(),
        );
        Some(response)
    }

    /// Check auth and rate limit for one request. `client` identifies the
    /// caller for rate accounting, normally the peer IP.
    pub fn check(&self, headers: &HeaderMap, client: &str) -> Result<(), Response<String>> {
        if let Some(limiter) = &self.limiter {
            if let Err(not_until) = limiter.check_key(&client.to_string()) {
                let wait = not_until.wait_time_from(self.clock.now());
                let mut response = too_many_requests(wait.as_secs().max(1));
                let headers = response.headers_mut();
                headers.insert(
                    "X-RateLimit-Limit",
                    self.config.rate_limit_rpm.to_string().parse().unwrap(),
                );
                headers.insert(
                    "X-RateLimit-Reset",
                    wait.as_secs().max(1).to_string().parse().unwrap(),
                );
                return Err(response);
            }
        }

        if self.config.enable_auth || self.config.require_api_key {
            let expected = match self.config.api_key.as_deref() {
                Some(key) => key,
                // Validation rejects this configuration; refuse rather than
                // fail open if it slips through.
                None => {
                    return Err(error_response(
                        StatusCode::UNAUTHORIZED,
                        "auth_misconfigured",
                        "authentication enabled without a key",
                    ))
                }
            };
            match presented_key(headers) {
                Some(presented) if presented == expected => {}
                Some(_) => {
                    return Err(error_response(
                        StatusCode::FORBIDDEN,
                        "forbidden",
                        "invalid API key",
                    ))
                }
                None => {
                    return Err(error_response(
                        StatusCode::UNAUTHORIZED,
                        "unauthorized",
                        "missing API key",
                    ))
                }
            }
        }

        Ok(())
    }

    /// Attach CORS headers to an outgoing response, when enabled.
    pub fn apply_cors(&self, response: &mut Response<String>) {
        if !self.config.enable_cors {
            return;
        }
        let origin = if self.config.allowed_origins.is_empty() {
            "*".to_string()
        } else {
            self.config.allowed_origins.join(", ")
        };
        if let Ok(value) = origin.parse() {
            response
                .headers_mut()
                .insert("Access-Control-Allow-Origin", value);
        }
    }
}

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get("X-API-Key").and_then(|v| v.to_str().ok()) {
        return Some(key);
    }
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
