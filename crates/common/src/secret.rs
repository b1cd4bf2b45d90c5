//! Secret wrappers for credentials the gate holds.
//!
//! Backend robot passwords, the cluster bearer token and the OIDC client
//! secret are kept as [`SecretString`]. Its `Debug` prints `[REDACTED]`, so a
//! config struct can derive or hand-write `Debug` without leaking them, and
//! reading the value takes an explicit `expose_secret()` call.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let password = SecretString::from("hunter2");
//! assert!(!format!("{password:?}").contains("hunter2"));
//! assert_eq!(password.expose_secret(), "hunter2");
//! ```

pub use secrecy::{ExposeSecret, SecretString};

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("hunter2");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("hunter2"));
    }

    #[test]
    fn test_struct_with_secret_is_safe() {
        #[allow(dead_code)]
        #[derive(Debug)]
        struct BackendCredentials {
            username: String,
            password: SecretString,
        }

        let creds = BackendCredentials {
            username: "robot".to_string(),
            password: SecretString::from("super-secret"),
        };

        let debug_str = format!("{creds:?}");

        assert!(debug_str.contains("robot"));
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("super-secret"));
    }

    #[test]
    fn test_deserialize() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct Credentials {
            username: String,
            password: SecretString,
        }

        let json = r#"{"username": "robot", "password": "my-secret-value"}"#;
        let creds: Credentials = serde_json::from_str(json).expect("deserialize");

        // Verify we can access the secret
        assert_eq!(creds.password.expose_secret(), "my-secret-value");

        // Verify debug doesn't expose the value
        let debug = format!("{creds:?}");
        assert!(!debug.contains("my-secret-value"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_display_of_exposed_value_is_explicit() {
        let secret = SecretString::from("cluster-token");
        let header = format!("Bearer {}", secret.expose_secret());
        assert_eq!(header, "Bearer cluster-token");
    }
}
