//! Credential resolution: explicit environment keys, else the provider's ambient chain.

use std::fmt;

pub const ENV_ACCESS_KEY: &str = "AWS_ACCESS_KEY";
pub const ENV_SECRET_KEY: &str = "AWS_SECRET_KEY";

/// Resolved credentials handed to a control-plane backend.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Both keys were present in the process environment.
    Static { access_key: String, secret_key: String },
    /// Defer to the provider's default resolution (profiles, instance role).
    Ambient,
}

impl Credentials {
    /// Read the keys from the process environment.
    pub fn resolve() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve through an arbitrary lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let access = lookup(ENV_ACCESS_KEY).filter(|v| !v.is_empty());
        let secret = lookup(ENV_SECRET_KEY).filter(|v| !v.is_empty());
        match (access, secret) {
            (Some(access_key), Some(secret_key)) => Self::Static {
                access_key,
                secret_key,
            },
            _ => Self::Ambient,
        }
    }

    /// Short label for logs; never includes the secret.
    pub fn source(&self) -> &'static str {
        match self {
            Self::Static { .. } => "environment",
            Self::Ambient => "ambient",
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static { access_key, .. } => f
                .debug_struct("Static")
                .field("access_key", access_key)
                .field("secret_key", &"<redacted>")
                .finish(),
            Self::Ambient => write!(f, "Ambient"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_both_keys_static() {
        let c = Credentials::from_lookup(lookup(&[
            (ENV_ACCESS_KEY, "AKIA1"),
            (ENV_SECRET_KEY, "s3cret"),
        ]));
        assert_eq!(c.source(), "environment");
        assert!(matches!(c, Credentials::Static { ref access_key, .. } if access_key == "AKIA1"));
    }

    #[test]
    fn test_partial_keys_fall_back_to_ambient() {
        let c = Credentials::from_lookup(lookup(&[(ENV_ACCESS_KEY, "AKIA1")]));
        assert_eq!(c, Credentials::Ambient);
        let c = Credentials::from_lookup(lookup(&[
            (ENV_ACCESS_KEY, ""),
            (ENV_SECRET_KEY, "s3cret"),
        ]));
        assert_eq!(c, Credentials::Ambient);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let c = Credentials::Static {
            access_key: "AKIA1".into(),
            secret_key: "s3cret".into(),
        };
        let shown = format!("{:?}", c);
        assert!(shown.contains("AKIA1"));
        assert!(!shown.contains("s3cret"));
    }
}
