//! HTTP email relay: `POST {endpoint}` with `{from,to,subject,body}`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::{EmailError, EmailMessage, EmailSender};
use crate::core::credential::Credential;

const EMAIL_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Serialize)]
struct RelayRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<&'a str>,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

pub struct HttpEmailSender {
    endpoint: String,
    sender_address: Option<String>,
    /// None when the endpoint URL carries its own signature.
    credential: Option<Arc<dyn Credential>>,
    http: reqwest::Client,
}

impl HttpEmailSender {
    pub fn new(
        endpoint: impl Into<String>,
        sender_address: Option<String>,
        credential: Option<Arc<dyn Credential>>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(EMAIL_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            endpoint: endpoint.into(),
            sender_address,
            credential,
            http,
        }
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        let mut request = self.http.post(&self.endpoint).json(&RelayRequest {
            from: self.sender_address.as_deref(),
            to: &message.recipient,
            subject: &message.subject,
            body: &message.body,
        });

        if let Some(credential) = &self.credential {
            let (header, value) = credential.resolve().await?.header();
            request = request.header(header, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EmailError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EmailError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        tracing::info!(recipient = %message.recipient, "Email accepted by relay");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::credential::KeyCredential;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message() -> EmailMessage {
        EmailMessage {
            recipient: "user@example.com".to_string(),
            subject: "Meeting".to_string(),
            body: "Book a slot.".to_string(),
        }
    }

    #[tokio::test]
    async fn test_send_posts_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .and(header("api-key", "mail-key"))
            .and(body_json(json!({
                "from": "assistant@example.com",
                "to": "user@example.com",
                "subject": "Meeting",
                "body": "Book a slot."
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let sender = HttpEmailSender::new(
            format!("{}/send", server.uri()),
            Some("assistant@example.com".to_string()),
            Some(Arc::new(KeyCredential::new("mail-key"))),
        );
        sender.send(&message()).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("smtp down"))
            .mount(&server)
            .await;

        let sender = HttpEmailSender::new(server.uri(), None, None);
        let err = sender.send(&message()).await.unwrap_err();
        assert!(matches!(err, EmailError::Rejected { status: 500, .. }));
    }
}
