use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, instrument};

use super::{EmailError, EmailMessage, EmailSender};
use crate::config::SmtpConfig;

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    from_name: String,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, EmailError> {
        let creds = Credentials::new(config.username.clone(), config.password.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| EmailError::Transport(format!("failed to create SMTP transport: {}", e)))?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self {
            transport,
            from_email: config.from_email.clone(),
            from_name: config.from_name.clone(),
        })
    }
}

#[async_trait]
impl EmailSender for SmtpMailer {
    #[instrument(skip(self, message), fields(subject = %message.subject))]
    async fn send(&self, message: EmailMessage) -> Result<(), EmailError> {
        let from_address = format!("{} <{}>", self.from_name, self.from_email);

        let builder = Message::builder()
            .from(
                from_address
                    .parse()
                    .map_err(|e| EmailError::Address(format!("from: {}", e)))?,
            )
            .to(message
                .to
                .parse()
                .map_err(|e| EmailError::Address(format!("to: {}", e)))?)
            .subject(&message.subject);

        let email = match message.body_text {
            Some(text) => builder.multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(message.body_html),
                    ),
            ),
            None => builder
                .header(ContentType::TEXT_HTML)
                .body(message.body_html),
        }
        .map_err(|e| EmailError::Build(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))?;

        debug!("email handed to SMTP relay");
        Ok(())
    }
}
