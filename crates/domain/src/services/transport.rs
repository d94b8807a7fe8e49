//! Outbound email transport abstraction.

use std::collections::HashSet;
use std::sync::Mutex;

use thiserror::Error;

/// Errors a transport may report for a single message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    #[error("Message rejected: {0}")]
    Rejected(String),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Transport not configured")]
    NotConfigured,
}

/// One rendered message for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
}

/// Sends a single email. Timeouts and transport-level retries are the
/// implementation's own business.
#[async_trait::async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<(), TransportError>;
}

/// Mock transport for development and testing.
///
/// Records every successful send and fails for configured addresses.
#[derive(Debug, Default)]
pub struct MockEmailTransport {
    failing: Mutex<HashSet<String>>,
    sent: Mutex<Vec<OutboundEmail>>,
}

impl MockEmailTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport that rejects the given addresses.
    pub fn failing_for<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let transport = Self::default();
        transport.set_failing(addresses);
        transport
    }

    /// Replace the set of rejected addresses.
    pub fn set_failing<I, S>(&self, addresses: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut failing = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        *failing = addresses.into_iter().map(Into::into).collect();
    }

    /// Messages accepted so far.
    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of messages accepted for `address`.
    pub fn sent_to(&self, address: &str) -> usize {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.to == address)
            .count()
    }
}

#[async_trait::async_trait]
impl EmailTransport for MockEmailTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<(), TransportError> {
        let rejected = self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&email.to);
        if rejected {
            return Err(TransportError::Rejected(format!(
                "mock transport rejected {}",
                email.to
            )));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(email.clone());
        Ok(())
    }
}
