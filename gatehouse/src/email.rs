//! Email service for account lifecycle notifications.
//!
//! Rendering and transport live in [`EmailService`]. Most flows hand emails to
//! the [`Mailer`] queue, which is drained by a background worker task so a slow
//! or failing SMTP relay never blocks a request. Delivery failures from the
//! queue are logged, not surfaced. Flows where the email *is* the deliverable
//! (resending a verification link) call [`Mailer::send_now`] instead, which
//! awaits the transport and propagates errors.

use lettre::{
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{config::Config, errors::Error};

/// The account lifecycle emails this service can send.
#[derive(Debug, Clone)]
pub enum EmailTemplate {
    /// Sent after a user's email address is verified
    Welcome { name: String },
    /// Sent on registration and on request, carries the verification token
    VerifyEmail { name: String, token: String },
    /// Sent when a password reset is requested, carries the reset token
    ForgotPassword { name: String, token: String },
    /// Confirmation sent after a successful password reset
    PasswordReset { name: String },
}

impl EmailTemplate {
    fn subject(&self) -> &'static str {
        match self {
            EmailTemplate::Welcome { .. } => "Welcome!",
            EmailTemplate::VerifyEmail { .. } => "Verify your email address",
            EmailTemplate::ForgotPassword { .. } => "Password Reset Request",
            EmailTemplate::PasswordReset { .. } => "Your password has been reset",
        }
    }
}

/// An email waiting to be rendered and sent.
#[derive(Debug, Clone)]
pub struct EmailRequest {
    pub to: String,
    pub template: EmailTemplate,
}

pub struct EmailService {
    transport: EmailTransport,
    from_email: String,
    from_name: String,
    dashboard_url: String,
}

enum EmailTransport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

impl EmailService {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let email_config = &config.email;

        let transport = match &email_config.transport {
            crate::config::EmailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
            } => {
                if !use_tls {
                    tracing::warn!("SMTP TLS is disabled - this is not recommended for production");
                }

                let smtp_builder = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                } else {
                    Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host))
                }
                .map_err(|e| Error::Internal {
                    operation: format!("create SMTP transport: {e}"),
                })?
                .port(*port)
                .credentials(Credentials::new(username.clone(), password.clone()));

                EmailTransport::Smtp(smtp_builder.build())
            }
            crate::config::EmailTransportConfig::File { path } => {
                // Use file transport for development/testing
                let emails_dir = Path::new(path);
                if !emails_dir.exists() {
                    std::fs::create_dir_all(emails_dir).map_err(|e| Error::Internal {
                        operation: format!("create emails directory: {e}"),
                    })?;
                }
                EmailTransport::File(AsyncFileTransport::<Tokio1Executor>::new(emails_dir))
            }
        };

        Ok(Self {
            transport,
            from_email: email_config.from_email.clone(),
            from_name: email_config.from_name.clone(),
            dashboard_url: config.dashboard_url.clone(),
        })
    }

    /// Render and send one email.
    pub async fn send(&self, to_email: &str, template: &EmailTemplate) -> Result<(), Error> {
        let body = self.render_body(template);
        self.send_email(to_email, template.subject(), &body).await
    }

    async fn send_email(&self, to_email: &str, subject: &str, body: &str) -> Result<(), Error> {
        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(|e| Error::Internal {
                operation: format!("parse from email: {e}"),
            })?;

        let to = to_email.parse::<Mailbox>().map_err(|e| Error::Internal {
            operation: format!("parse to email: {e}"),
        })?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body.to_string())
            .map_err(|e| Error::Internal {
                operation: format!("build email message: {e}"),
            })?;

        match &self.transport {
            EmailTransport::Smtp(smtp) => {
                smtp.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send SMTP email: {e}"),
                })?;
            }
            EmailTransport::File(file) => {
                file.send(message).await.map_err(|e| Error::Internal {
                    operation: format!("send file email: {e}"),
                })?;
            }
        }

        Ok(())
    }

    fn render_body(&self, template: &EmailTemplate) -> String {
        match template {
            EmailTemplate::Welcome { name } => self.wrap_body(
                "Welcome!",
                &format!("Hello {name},"),
                "Your email address has been verified and your account is ready to use.",
                None,
            ),
            EmailTemplate::VerifyEmail { name, token } => {
                let link = format!("{}/verify-email/{}", self.dashboard_url, token);
                self.wrap_body(
                    "Verify your email address",
                    &format!("Hello {name},"),
                    "Thanks for signing up. Please confirm your email address by clicking the link below. \
                     The link will expire in 24 hours.",
                    Some(&link),
                )
            }
            EmailTemplate::ForgotPassword { name, token } => {
                let link = format!("{}/reset-password/{}", self.dashboard_url, token);
                self.wrap_body(
                    "Password Reset Request",
                    &format!("Hello {name},"),
                    "We received a request to reset your password. If you didn't make this request, you can \
                     safely ignore this email. The link below will expire in 1 hour.",
                    Some(&link),
                )
            }
            EmailTemplate::PasswordReset { name } => self.wrap_body(
                "Your password has been reset",
                &format!("Hello {name},"),
                "Your password was just changed. If this wasn't you, please reset your password immediately \
                 and contact support.",
                None,
            ),
        }
    }

    fn wrap_body(&self, title: &str, greeting: &str, text: &str, link: Option<&str>) -> String {
        let link_block = match link {
            Some(link) => format!(
                r#"<p><a href="{link}">{title}</a></p>
        <p>Or copy and paste this link into your browser:</p>
        <p>{link}</p>"#
            ),
            None => String::new(),
        };

        format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{title}</title>
    <style>
        body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
        .container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
        .footer {{ margin-top: 30px; font-size: 12px; color: #666; }}
    </style>
</head>
<body>
    <div class="container">
        <h2>{title}</h2>

        <p>{greeting}</p>

        <p>{text}</p>

        {link_block}

        <div class="footer">
            <p>This is an automated message, please do not reply to this email.</p>
        </div>
    </div>
</body>
</html>"#
        )
    }
}

/// Clone-able handle for dispatching emails.
///
/// Holds both the queue for fire-and-forget sends and the service itself for
/// flows that must await delivery.
#[derive(Clone)]
pub struct Mailer {
    service: Arc<EmailService>,
    queue: mpsc::UnboundedSender<EmailRequest>,
}

impl Mailer {
    /// Start the delivery worker and return the handle to it.
    ///
    /// The worker drains the queue until the shutdown token fires, then drains
    /// whatever is already queued before exiting.
    pub fn spawn(service: EmailService, shutdown: CancellationToken) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<EmailRequest>();
        let service = Arc::new(service);

        let worker_service = service.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    request = rx.recv() => {
                        match request {
                            Some(request) => deliver(&worker_service, request).await,
                            None => break,
                        }
                    }
                    _ = shutdown.cancelled() => {
                        // Drain anything already queued, then stop
                        while let Ok(request) = rx.try_recv() {
                            deliver(&worker_service, request).await;
                        }
                        break;
                    }
                }
            }
            tracing::debug!("Email worker stopped");
        });

        (Self { service, queue: tx }, handle)
    }

    /// Queue an email for background delivery. Never fails; delivery problems
    /// are reported by the worker via logs only.
    pub fn enqueue(&self, request: EmailRequest) {
        if self.queue.send(request).is_err() {
            tracing::warn!("Email queue is closed, dropping email");
        }
    }

    /// Send an email immediately, propagating delivery failures to the caller.
    pub async fn send_now(&self, request: EmailRequest) -> Result<(), Error> {
        self.service.send(&request.to, &request.template).await
    }
}

async fn deliver(service: &EmailService, request: EmailRequest) {
    if let Err(e) = service.send(&request.to, &request.template).await {
        tracing::error!("Failed to send email to {}: {:#}", request.to, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_config;

    #[tokio::test]
    async fn test_email_service_creation() {
        let config = create_test_config();
        let email_service = EmailService::new(&config);
        assert!(email_service.is_ok());
    }

    #[tokio::test]
    async fn test_verify_email_body() {
        let config = create_test_config();
        let email_service = EmailService::new(&config).unwrap();

        let body = email_service.render_body(&EmailTemplate::VerifyEmail {
            name: "John Doe".to_string(),
            token: "abc123".to_string(),
        });

        assert!(body.contains("Hello John Doe,"));
        assert!(body.contains("/verify-email/abc123"));
        assert!(body.contains("Verify your email address"));
    }

    #[tokio::test]
    async fn test_forgot_password_body() {
        let config = create_test_config();
        let email_service = EmailService::new(&config).unwrap();

        let body = email_service.render_body(&EmailTemplate::ForgotPassword {
            name: "Jane".to_string(),
            token: "tok456".to_string(),
        });

        assert!(body.contains("Hello Jane,"));
        assert!(body.contains("/reset-password/tok456"));
    }

    #[tokio::test]
    async fn test_confirmation_bodies_have_no_links() {
        let config = create_test_config();
        let email_service = EmailService::new(&config).unwrap();

        let welcome = email_service.render_body(&EmailTemplate::Welcome { name: "A".to_string() });
        assert!(!welcome.contains("href"));

        let reset = email_service.render_body(&EmailTemplate::PasswordReset { name: "A".to_string() });
        assert!(!reset.contains("href"));
    }

    #[tokio::test]
    async fn test_mailer_queue_delivers() {
        let config = create_test_config();
        let dir = tempfile::tempdir().unwrap();
        let mut config = config;
        config.email.transport = crate::config::EmailTransportConfig::File {
            path: dir.path().to_string_lossy().to_string(),
        };

        let shutdown = CancellationToken::new();
        let (mailer, handle) = Mailer::spawn(EmailService::new(&config).unwrap(), shutdown.clone());

        mailer.enqueue(EmailRequest {
            to: "queued@example.com".to_string(),
            template: EmailTemplate::Welcome { name: "Q".to_string() },
        });

        // Shutdown drains the queue before the worker exits
        shutdown.cancel();
        handle.await.unwrap();

        let sent = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(sent, 1);
    }
}
