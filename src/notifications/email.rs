//! SMTP delivery of verification and password-reset emails.
//!
//! Uses the SMTP settings from the main config file. When SMTP is not
//! configured, sends are skipped with a warning so local development works
//! without a mail server.

use anyhow::Result;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::EmailConfig;

/// Service for sending account emails
pub struct Mailer {
    config: EmailConfig,
}

impl Mailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Check if email sending is configured and enabled
    pub fn is_enabled(&self) -> bool {
        self.config.is_configured()
    }

    /// Send the email-verification link for a freshly registered account
    pub async fn send_verification_email(
        &self,
        to_email: &str,
        name: &str,
        verify_url: &str,
    ) -> Result<()> {
        if !self.is_enabled() {
            tracing::warn!(
                "Email not configured, skipping verification email to {}",
                to_email
            );
            return Ok(());
        }

        let subject = "Verify your CivicWatch email address";
        let html_body = render_verification_html(name, verify_url);
        let text_body = render_verification_text(name, verify_url);

        self.send_email(to_email, subject, &html_body, &text_body)
            .await
    }

    /// Send the password-reset link
    pub async fn send_password_reset_email(
        &self,
        to_email: &str,
        name: &str,
        reset_url: &str,
    ) -> Result<()> {
        if !self.is_enabled() {
            tracing::warn!(
                "Email not configured, skipping password reset email to {}",
                to_email
            );
            return Ok(());
        }

        let subject = "Reset your CivicWatch password";
        let html_body = render_reset_html(name, reset_url);
        let text_body = render_reset_text(name, reset_url);

        self.send_email(to_email, subject, &html_body, &text_body)
            .await
    }

    /// Send an email with HTML and plain text versions
    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<()> {
        let smtp_host = self
            .config
            .smtp_host
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("SMTP host not configured"))?;
        let from_address = self
            .config
            .from_address
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("From address not configured"))?;

        // Build the from mailbox with name
        let from_mailbox = format!("{} <{}>", self.config.from_name, from_address);
        let from: Mailbox = from_mailbox.parse()?;
        let to: Mailbox = to_email.parse()?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text_body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )?;

        // Build SMTP transport
        let mailer = if self.config.smtp_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
        }
        .port(self.config.smtp_port);

        let mailer = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            mailer.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            mailer
        };

        mailer.build().send(email).await?;

        tracing::info!(
            to = %to_email,
            subject = %subject,
            "Email sent successfully"
        );

        Ok(())
    }
}

/// Shared card layout for both account emails
fn render_html(title: &str, greeting: &str, body: &str, cta: &str, url: &str, note: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif;
            margin: 0;
            padding: 0;
            background-color: #f5f5f5;
            -webkit-font-smoothing: antialiased;
        }}
        .container {{
            max-width: 560px;
            margin: 0 auto;
            padding: 40px 20px;
        }}
        .card {{
            background-color: #ffffff;
            border-radius: 8px;
            box-shadow: 0 2px 8px rgba(0, 0, 0, 0.06);
            overflow: hidden;
        }}
        .header {{
            background: linear-gradient(135deg, #10b981 0%, #059669 100%);
            color: white;
            padding: 32px 24px;
            text-align: center;
        }}
        .header h1 {{
            margin: 0;
            font-size: 24px;
            font-weight: 600;
        }}
        .content {{
            padding: 32px 24px;
        }}
        .content p {{
            margin: 0 0 16px;
            color: #374151;
            line-height: 1.6;
        }}
        .button-container {{
            text-align: center;
            margin: 32px 0;
        }}
        .button {{
            display: inline-block;
            background: linear-gradient(135deg, #10b981 0%, #059669 100%);
            color: white !important;
            text-decoration: none;
            padding: 14px 32px;
            border-radius: 6px;
            font-weight: 500;
            font-size: 16px;
        }}
        .note {{
            color: #6b7280;
            font-size: 13px;
            text-align: center;
            margin-top: 24px;
        }}
        .footer {{
            padding: 24px;
            text-align: center;
            color: #9ca3af;
            font-size: 12px;
            border-top: 1px solid #f3f4f6;
        }}
    </style>
</head>
<body>
    <div class="container">
        <div class="card">
            <div class="header">
                <h1>{title}</h1>
            </div>
            <div class="content">
                <p>{greeting}</p>
                <p>{body}</p>

                <div class="button-container">
                    <a href="{url}" class="button">{cta}</a>
                </div>

                <p class="note">{note}</p>
            </div>
            <div class="footer">
                <p>Sent by CivicWatch - Report civic issues in your neighborhood</p>
            </div>
        </div>
    </div>
</body>
</html>"#,
        title = title,
        greeting = greeting,
        body = body,
        cta = cta,
        url = url,
        note = note,
    )
}

fn render_verification_html(name: &str, verify_url: &str) -> String {
    render_html(
        "Verify Your Email",
        &format!("Hi {},", html_escape(name)),
        "Thanks for signing up for CivicWatch. Click the button below to verify your email address and activate your account.",
        "Verify Email",
        verify_url,
        "This link will expire in 24 hours. If you didn't create a CivicWatch account, you can safely ignore this email.",
    )
}

fn render_verification_text(name: &str, verify_url: &str) -> String {
    format!(
        r#"Verify Your Email

Hi {name},

Thanks for signing up for CivicWatch. To verify your email address and
activate your account, visit:

{verify_url}

This link will expire in 24 hours.

If you didn't create a CivicWatch account, you can safely ignore this email.

---
Sent by CivicWatch - Report civic issues in your neighborhood"#,
        name = name,
        verify_url = verify_url,
    )
}

fn render_reset_html(name: &str, reset_url: &str) -> String {
    render_html(
        "Reset Your Password",
        &format!("Hi {},", html_escape(name)),
        "We received a request to reset the password for your CivicWatch account. Click the button below to choose a new password.",
        "Reset Password",
        reset_url,
        "This link will expire in 30 minutes. If you didn't request a password reset, you can safely ignore this email.",
    )
}

fn render_reset_text(name: &str, reset_url: &str) -> String {
    format!(
        r#"Reset Your Password

Hi {name},

We received a request to reset the password for your CivicWatch account.
To choose a new password, visit:

{reset_url}

This link will expire in 30 minutes.

If you didn't request a password reset, you can safely ignore this email.

---
Sent by CivicWatch - Report civic issues in your neighborhood"#,
        name = name,
        reset_url = reset_url,
    )
}

/// Escape HTML special characters
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
