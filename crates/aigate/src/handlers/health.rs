//! Liveness and readiness probes. Both answer plain-text `ok`.

const OK: &str = "ok";

/// GET /livez
pub async fn livez() -> &'static str {
    OK
}

/// GET /readyz
pub async fn readyz() -> &'static str {
    OK
}
