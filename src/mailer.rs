#![cfg(feature = "web")]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use rand::Rng;
use serde::Serialize;
use std::sync::Mutex;
use thiserror::Error;

/// Outbound SMTP settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Sender shown on ticket mail, e.g. `Dashboard <support@example.com>`.
    pub from: String,
    /// Inbox that receives tickets.
    pub to: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("could not build message: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("smtp error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// A support request submitted from a tenant dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct SupportTicket {
    pub reference: String,
    pub store_name: String,
    pub subdomain: String,
    /// Email of the signed-in user; replies go here.
    pub reply_to: String,
    pub category: String,
    pub subject: String,
    pub message: String,
    pub submitted_at: DateTime<Utc>,
}

impl SupportTicket {
    pub fn mail_subject(&self) -> String {
        format!(
            "[{}] {} - {} ({})",
            self.reference, self.store_name, self.subject, self.category
        )
    }

    pub fn mail_body(&self) -> String {
        format!(
            "Store: {}\nSubdomain: {}\nFrom: {}\nCategory: {}\nSubmitted: {}\nReference: {}\n\n{}\n",
            self.store_name,
            self.subdomain,
            self.reply_to,
            self.category,
            self.submitted_at.format("%Y-%m-%d %H:%M UTC"),
            self.reference,
            self.message
        )
    }
}

/// Delivers support tickets.
#[async_trait]
pub trait TicketSender: Send + Sync {
    async fn send_ticket(&self, ticket: &SupportTicket) -> Result<(), MailError>;
}

pub struct Mailer {
    smtp: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl Mailer {
    /// Port 465 uses implicit TLS; any other port negotiates STARTTLS.
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let creds = Credentials::new(config.username.clone(), config.password.clone());

        let builder = if config.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        };
        let smtp = builder.credentials(creds).port(config.port).build();

        Ok(Mailer {
            smtp,
            from: config.from.parse()?,
            to: config.to.parse()?,
        })
    }
}

#[async_trait]
impl TicketSender for Mailer {
    async fn send_ticket(&self, ticket: &SupportTicket) -> Result<(), MailError> {
        let email = Message::builder()
            .from(self.from.clone())
            .reply_to(ticket.reply_to.parse()?)
            .to(self.to.clone())
            .subject(ticket.mail_subject())
            .header(ContentType::TEXT_PLAIN)
            .body(ticket.mail_body())?;

        self.smtp.send(email).await?;
        log::info!("Support ticket {} sent for {}", ticket.reference, ticket.subdomain);
        Ok(())
    }
}

/// Keeps tickets in memory instead of sending them.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<SupportTicket>>,
}

impl RecordingSender {
    pub fn sent(&self) -> Vec<SupportTicket> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl TicketSender for RecordingSender {
    async fn send_ticket(&self, ticket: &SupportTicket) -> Result<(), MailError> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ticket.clone());
        Ok(())
    }
}

pub fn generate_ticket_reference() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();

    (0..8)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn references_are_eight_uppercase_alphanumerics() {
        for _ in 0..50 {
            let code = generate_ticket_reference();
            assert_eq!(code.len(), 8);
            assert!(code
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn ticket_mail_carries_context() {
        let ticket = SupportTicket {
            reference: "AB12CD34".into(),
            store_name: "Acme".into(),
            subdomain: "acme".into(),
            reply_to: "owner@acme.com".into(),
            category: "billing".into(),
            subject: "Invoice question".into(),
            message: "Where is my invoice?".into(),
            submitted_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 5, 0).unwrap(),
        };
        assert_eq!(
            ticket.mail_subject(),
            "[AB12CD34] Acme - Invoice question (billing)"
        );
        let body = ticket.mail_body();
        assert!(body.contains("From: owner@acme.com"));
        assert!(body.contains("Submitted: 2026-03-01 08:05 UTC"));
        assert!(body.ends_with("Where is my invoice?\n"));
    }

    #[tokio::test]
    async fn mailer_rejects_bad_sender() {
        let config = SmtpConfig {
            host: "smtp.example.com".into(),
            port: 587,
            username: "u".into(),
            password: "p".into(),
            from: "not an address".into(),
            to: "support@example.com".into(),
        };
        assert!(matches!(Mailer::new(&config), Err(MailError::Address(_))));
    }
}
