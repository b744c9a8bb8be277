//! Alert - Detection Mail Notifications
//!
//! ## Responsibilities
//!
//! - Fire-and-forget email dispatch on new detections
//!
//! Dispatch runs on a spawned task so the HTTP response path never waits on
//! SMTP. Failures are logged and dropped: no retry, no deduplication, no
//! completion signal back to the caller. N invocations send N emails.

use crate::error::{Error, Result};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

/// Notification capability; a counting fake substitutes in tests
pub trait Notifier: Send + Sync {
    /// Dispatch an alert without blocking the caller
    fn notify(&self, recipient: &str, weapon_type: &str);
}

/// SMTP relay settings
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// From address; defaults to the username when unset
    pub from: Option<String>,
}

/// Notifier sending through an SMTP relay (STARTTLS)
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    /// Build the relay transport. Fails on an unparseable host or from
    /// address; no connection is attempted until the first alert.
    pub fn new(settings: SmtpSettings) -> Result<Self> {
        let from_addr = settings.from.as_deref().unwrap_or(&settings.username);
        let from: Mailbox = from_addr
            .parse()
            .map_err(|e| Error::Internal(format!("invalid from address: {}", e)))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|e| Error::Internal(format!("smtp relay setup failed: {}", e)))?
            .port(settings.port)
            .credentials(Credentials::new(settings.username, settings.password))
            .build();

        Ok(Self { transport, from })
    }
}

fn alert_body(weapon_type: &str) -> String {
    format!("ALERT! Weapon detected: {}.", weapon_type)
}

impl Notifier for SmtpNotifier {
    fn notify(&self, recipient: &str, weapon_type: &str) {
        let to: Mailbox = match recipient.parse() {
            Ok(to) => to,
            Err(e) => {
                tracing::warn!(recipient = %recipient, error = %e, "Invalid alert recipient");
                return;
            }
        };

        let message = match Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject("Weapon Detection Alert")
            .body(alert_body(weapon_type))
        {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build alert mail");
                return;
            }
        };

        let transport = self.transport.clone();
        let weapon = weapon_type.to_string();
        let recipient = recipient.to_string();
        tokio::spawn(async move {
            match transport.send(message).await {
                Ok(_) => {
                    tracing::info!(
                        recipient = %recipient,
                        weapon_type = %weapon,
                        "Alert mail sent"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        recipient = %recipient,
                        weapon_type = %weapon,
                        error = %e,
                        "Alert mail failed"
                    );
                }
            }
        });
    }
}

/// Notifier used when SMTP is unconfigured; logs and drops every alert
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, recipient: &str, weapon_type: &str) {
        tracing::debug!(
            recipient = %recipient,
            weapon_type = %weapon_type,
            "Alerting disabled, dropping alert"
        );
    }
}
