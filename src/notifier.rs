//! Notifier (C11)
//!
//! SMTP email notifier implementing `notify`/`notify_error`/`notify_summary`/
//! `notify_hazard`. In simulator mode, every message carries a visible
//! banner so operators cannot mistake a drill for a real incident.

use lettre::message::Message;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{SmtpTransport, Transport};
use tracing::{error, info, warn};

const SIMULATION_BANNER: &str =
    "*** SIMULATION MODE: this run used a simulated scanner; no real scan occurred. ***\n\n";

pub struct Notifier {
    pub recipient_email: Option<String>,
    pub recipient_email_error: Option<String>,
    pub recipient_email_summary: Option<String>,
    pub recipient_email_hazard: Option<String>,
    pub smtp_server: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_use_tls: bool,
    pub using_simulator: bool,
}

impl Notifier {
    pub fn notify(&self, title: &str, body: &str) -> bool {
        self.send(self.recipient_email.as_deref(), title, body)
    }

    pub fn notify_error(&self, title: &str, body: &str, exception: Option<&str>) -> bool {
        let recipient = self.recipient_email_error.as_deref().or(self.recipient_email.as_deref());
        let full_body = match exception {
            Some(e) => format!("{}\n\n{}", body, e),
            None => body.to_string(),
        };
        self.send(recipient, title, &full_body)
    }

    pub fn notify_summary(&self, title: &str, body: &str) -> bool {
        let recipient = self.recipient_email_summary.as_deref().or(self.recipient_email.as_deref());
        self.send(recipient, title, body)
    }

    pub fn notify_hazard(&self, title: &str, body: &str) -> bool {
        let recipient = self.recipient_email_hazard.as_deref().or(self.recipient_email.as_deref());
        self.send(recipient, title, body)
    }

    fn send(&self, recipient: Option<&str>, title: &str, body: &str) -> bool {
        let (recipient, smtp_server) = match (recipient, self.smtp_server.as_deref()) {
            (Some(r), Some(s)) => (r, s),
            _ => {
                warn!("notifier missing recipient or smtp_server, skipping send");
                return false;
            }
        };

        let (final_title, final_body) = if self.using_simulator {
            (format!("[SIMULATION MODE] {}", title), format!("{}{}", SIMULATION_BANNER, body))
        } else {
            (title.to_string(), body.to_string())
        };

        let from = self.smtp_username.clone().unwrap_or_else(|| "shuttle@localhost".to_string());
        let message = match Message::builder()
            .from(from.parse().unwrap_or_else(|_| "shuttle@localhost".parse().unwrap()))
            .to(recipient.parse().unwrap_or_else(|_| "invalid@localhost".parse().unwrap()))
            .subject(final_title)
            .body(final_body)
        {
            Ok(m) => m,
            Err(e) => {
                error!("failed to build notification message: {}", e);
                return false;
            }
        };

        let transport = if self.smtp_use_tls {
            let mut builder = match SmtpTransport::relay(smtp_server) {
                Ok(b) => b.port(self.smtp_port),
                Err(e) => {
                    error!("failed to configure TLS SMTP relay for {}: {}", smtp_server, e);
                    return false;
                }
            };
            if let (Some(user), Some(pass)) = (&self.smtp_username, &self.smtp_password) {
                builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
            }
            builder.build()
        } else {
            let mut builder = SmtpTransport::builder_dangerous(smtp_server).port(self.smtp_port);
            if let (Some(user), Some(pass)) = (&self.smtp_username, &self.smtp_password) {
                builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
            }
            builder.build()
        };

        match transport.send(&message) {
            Ok(_) => {
                info!("notification sent to {}", recipient);
                true
            }
            Err(e) => {
                error!("failed to send notification: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_notifier() -> Notifier {
        Notifier {
            recipient_email: Some("ops@example.com".to_string()),
            recipient_email_error: None,
            recipient_email_summary: None,
            recipient_email_hazard: None,
            smtp_server: None,
            smtp_port: 25,
            smtp_username: None,
            smtp_password: None,
            smtp_use_tls: false,
            using_simulator: false,
        }
    }

    #[test]
    fn test_notify_without_smtp_server_returns_false() {
        let notifier = base_notifier();
        assert!(!notifier.notify("title", "body"));
    }

    #[test]
    fn test_notify_without_recipient_returns_false() {
        let mut notifier = base_notifier();
        notifier.recipient_email = None;
        notifier.smtp_server = Some("localhost".to_string());
        assert!(!notifier.notify("title", "body"));
    }

    #[test]
    fn test_purpose_specific_recipient_falls_back_to_default() {
        let notifier = base_notifier();
        assert_eq!(notifier.recipient_email_summary.as_deref(), None);
        // Falls back to recipient_email inside notify_summary/send — exercised
        // indirectly since send() requires an smtp_server to proceed.
        assert!(!notifier.notify_summary("t", "b"));
    }
}
