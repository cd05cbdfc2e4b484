use anyhow::{bail, Context, Result};
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, Message as Email};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{SmtpTransport, Transport};
use reqwest::Url;
use tracing::info;

use crate::fetch::Announcement;
use crate::settings::EmailSettings;

/// Delivery is blocking; the poll loop calls it off the async workers.
pub trait Notifier: Send + Sync {
    fn notify(&self, announcement: &Announcement) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub body: String,
}

/// Plain-text notice for operators. Relative links are made absolute
/// against the index page so the message stands on its own.
pub fn compose(announcement: &Announcement, base_url: &str) -> Message {
    let link = Url::parse(base_url)
        .and_then(|base| base.join(&announcement.link))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| announcement.link.clone());
    Message {
        subject: format!("Service interruption: {}", announcement.title),
        body: format!(
            "A planned service interruption affects a monitored building.\n\n{}\n{}\n",
            announcement.title, link
        ),
    }
}

/// Writes the composed message to the log instead of delivering it.
pub struct LogNotifier {
    base_url: String,
}

impl LogNotifier {
    pub fn new(base_url: impl Into<String>) -> Self {
        LogNotifier {
            base_url: base_url.into(),
        }
    }
}

impl Notifier for LogNotifier {
    fn notify(&self, announcement: &Announcement) -> Result<()> {
        let msg = compose(announcement, &self.base_url);
        info!(subject = %msg.subject, "[NEW] would notify:\n{}", msg.body);
        Ok(())
    }
}

/// Mails the composed message to every recipient over SMTP with STARTTLS,
/// authenticating as the sender.
pub struct SmtpNotifier {
    base_url: String,
    sender: Mailbox,
    recipients: Vec<Mailbox>,
    transport: SmtpTransport,
}

impl SmtpNotifier {
    pub fn new(email: &EmailSettings, base_url: impl Into<String>) -> Result<Self> {
        let sender: Mailbox = email
            .sender
            .parse()
            .with_context(|| format!("Invalid sender address {:?}", email.sender))?;
        let recipients = email
            .recipients
            .iter()
            .map(|r| {
                r.parse::<Mailbox>()
                    .with_context(|| format!("Invalid recipient address {:?}", r))
            })
            .collect::<Result<Vec<_>>>()?;
        if recipients.is_empty() {
            bail!("email.recipients is empty");
        }

        let transport = SmtpTransport::starttls_relay(&email.smtp_server)
            .with_context(|| format!("Invalid SMTP server {:?}", email.smtp_server))?
            .port(email.smtp_port)
            .credentials(Credentials::new(email.sender.clone(), email.password.clone()))
            .build();

        Ok(SmtpNotifier {
            base_url: base_url.into(),
            sender,
            recipients,
            transport,
        })
    }

    /// Plain-text UTF-8 mail with From, To (all recipients), Subject and
    /// MIME headers.
    fn build(&self, announcement: &Announcement) -> Result<Email> {
        let msg = compose(announcement, &self.base_url);
        let mut builder = Email::builder()
            .from(self.sender.clone())
            .subject(msg.subject)
            .header(ContentType::TEXT_PLAIN);
        for r in &self.recipients {
            builder = builder.to(r.clone());
        }
        builder.body(msg.body).context("Failed to build email")
    }
}

impl Notifier for SmtpNotifier {
    fn notify(&self, announcement: &Announcement) -> Result<()> {
        let email = self.build(announcement)?;
        self.transport
            .send(&email)
            .with_context(|| format!("SMTP delivery for {} failed", announcement.link))?;
        info!(
            recipients = self.recipients.len(),
            "Email sent for {}", announcement.link
        );
        Ok(())
    }
}
