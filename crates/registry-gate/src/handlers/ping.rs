//! Liveness endpoint.

/// Handler for `/_ping`, any method. No authentication.
pub async fn ping() -> &'static str {
    "pong"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ping_returns_pong() {
        assert_eq!(ping().await, "pong");
    }
}
