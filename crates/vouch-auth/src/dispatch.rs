//! Outbound delivery boundary.

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::Result;

/// A message handed to the delivery transport.
#[derive(Clone)]
pub enum Message {
    /// A sign-in code.
    OneTimeCode {
        /// The plaintext code.
        code: Zeroizing<String>,
        /// Minutes until the code expires.
        expires_in_minutes: i64,
    },
}

impl Message {
    /// Subject line.
    pub fn subject(&self) -> &'static str {
        match self {
            Message::OneTimeCode { .. } => "Your sign-in code",
        }
    }

    /// Plain-text body.
    pub fn body(&self) -> String {
        match self {
            Message::OneTimeCode {
                code,
                expires_in_minutes,
            } => format!(
                "Your sign-in code is {}. It expires in {} minutes.",
                code.as_str(),
                expires_in_minutes
            ),
        }
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::OneTimeCode {
                expires_in_minutes, ..
            } => f
                .debug_struct("OneTimeCode")
                .field("code", &"<redacted>")
                .field("expires_in_minutes", expires_in_minutes)
                .finish(),
        }
    }
}

/// Delivery transport (email, push).
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Deliver `message` to `destination`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Dispatch` when delivery fails. Callers may retry.
    async fn send(&self, destination: &str, message: &Message) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_code() {
        let msg = Message::OneTimeCode {
            code: Zeroizing::new("123456".to_string()),
            expires_in_minutes: 5,
        };
        let debug = format!("{:?}", msg);
        assert!(!debug.contains("123456"));
        assert!(msg.body().contains("123456"));
    }
}
