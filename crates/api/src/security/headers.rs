//! Security Headers Middleware
//!
//! Hardening headers added to every gateway response.

use axum::{
    body::Body,
    http::{HeaderValue, Request, Response},
    middleware::Next,
};

/// Middleware that adds security headers to all responses
pub async fn security_headers_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("SAMEORIGIN"));
    headers.insert("X-DNS-Prefetch-Control", HeaderValue::from_static("off"));
    headers.insert("X-Download-Options", HeaderValue::from_static("noopen"));
    headers.insert("X-Permitted-Cross-Domain-Policies", HeaderValue::from_static("none"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));

    // Legacy XSS auditors do more harm than good; turn them off
    headers.insert("X-XSS-Protection", HeaderValue::from_static("0"));

    headers.insert(
        "Strict-Transport-Security",
        HeaderValue::from_static("max-age=15552000; includeSubDomains"),
    );

    // JSON only, nothing to render
    headers.insert(
        "Content-Security-Policy",
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'; base-uri 'none'"),
    );

    response
}
