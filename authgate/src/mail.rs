//! Outbound mail: the transport interface, the SMTP implementation, a
//! capture-only implementation for tests, and the message templates.
//!
//! The rendered template is the complete message, its own headers
//! included, so the transport sends it as raw DATA rather than composing
//! headers itself. One dial per message, plaintext SMTP.

use std::{path::Path, sync::Mutex};

use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    address::Envelope, Address, AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};
use serde_json::json;

use crate::config::Config;

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver the fully rendered `body` to `to`.
    async fn send(&self, to: &str, body: &str) -> anyhow::Result<()>;
}

// --- SmtpMailer --- //

pub struct SmtpMailer {
    host: String,
    port: u16,
    sender: Address,
}

impl SmtpMailer {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let (host, port) = match config.smtp_server.rsplit_once(':') {
            Some((host, port)) => (
                host.to_owned(),
                port.parse().context("Bad SMTP_SERVER port")?,
            ),
            None => (config.smtp_server.clone(), 25),
        };
        let sender = config
            .smtp_sender_addr
            .parse()
            .context("Bad SMTP_SENDER_ADDR")?;
        Ok(Self { host, port, sender })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, body: &str) -> anyhow::Result<()> {
        let recipient: Address =
            to.parse().with_context(|| format!("Bad recipient {to:?}"))?;
        let envelope =
            Envelope::new(Some(self.sender.clone()), vec![recipient])
                .context("Could not build envelope")?;

        // No connection pool: dial, send, hang up.
        let transport: AsyncSmtpTransport<Tokio1Executor> =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.host)
                .port(self.port)
                .build();
        transport
            .send_raw(&envelope, body.as_bytes())
            .await
            .context("SMTP delivery failed")?;
        Ok(())
    }
}

// --- MockMailer --- //

#[derive(Clone, Debug)]
pub struct SentMail {
    pub to: String,
    pub body: String,
}

/// Captures outbound mail instead of sending it.
#[derive(Default)]
pub struct MockMailer {
    sent: Mutex<Vec<SentMail>>,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SentMail>> {
        self.sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.lock().clone()
    }

    pub fn last(&self) -> Option<SentMail> {
        self.lock().last().cloned()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, to: &str, body: &str) -> anyhow::Result<()> {
        self.lock().push(SentMail {
            to: to.to_owned(),
            body: body.to_owned(),
        });
        Ok(())
    }
}

// --- MailTemplates --- //

const TPL_SIGNUP: &str = "signup";
const TPL_CHANGE_EMAIL: &str = "changeemail";
const TPL_RESET_PASSWORD: &str = "resetpassword";
const TPL_NEW_PASSWORD: &str = "newpassword";

/// The four message templates, compiled once at startup. An unreadable or
/// malformed template file is fatal.
#[derive(Debug)]
pub struct MailTemplates {
    registry: handlebars::Handlebars<'static>,
    from: String,
}

impl MailTemplates {
    pub fn load(config: &Config) -> anyhow::Result<Self> {
        Self::from_strings(
            &read(&config.template_signup)?,
            &read(&config.template_change_email)?,
            &read(&config.template_reset_password)?,
            &read(&config.template_new_password)?,
            config.smtp_sender_addr.clone(),
        )
    }

    pub fn from_strings(
        signup: &str,
        change_email: &str,
        reset_password: &str,
        new_password: &str,
        from: String,
    ) -> anyhow::Result<Self> {
        let mut registry = handlebars::Handlebars::new();
        for (name, content) in [
            (TPL_SIGNUP, signup),
            (TPL_CHANGE_EMAIL, change_email),
            (TPL_RESET_PASSWORD, reset_password),
            (TPL_NEW_PASSWORD, new_password),
        ] {
            registry
                .register_template_string(name, content)
                .with_context(|| format!("Malformed {name} template"))?;
        }
        Ok(Self { registry, from })
    }

    pub fn render_signup(
        &self,
        to: &str,
        confirm_token: &str,
    ) -> anyhow::Result<String> {
        self.render_confirm(TPL_SIGNUP, to, confirm_token)
    }

    pub fn render_change_email(
        &self,
        to: &str,
        confirm_token: &str,
    ) -> anyhow::Result<String> {
        self.render_confirm(TPL_CHANGE_EMAIL, to, confirm_token)
    }

    pub fn render_reset_password(
        &self,
        to: &str,
        confirm_token: &str,
    ) -> anyhow::Result<String> {
        self.render_confirm(TPL_RESET_PASSWORD, to, confirm_token)
    }

    pub fn render_new_password(
        &self,
        to: &str,
        password: &str,
    ) -> anyhow::Result<String> {
        self.registry
            .render(
                TPL_NEW_PASSWORD,
                &json!({ "from": self.from, "to": to, "password": password }),
            )
            .context("Template rendering failed")
    }

    fn render_confirm(
        &self,
        name: &str,
        to: &str,
        confirm_token: &str,
    ) -> anyhow::Result<String> {
        self.registry
            .render(
                name,
                &json!({
                    "from": self.from,
                    "to": to,
                    "confirmID": confirm_token,
                }),
            )
            .context("Template rendering failed")
    }
}

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Could not read template {path:?}"))
}
