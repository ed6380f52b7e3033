use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::base::{ToolContext, ToolError, ToolHandler, ToolOutput, typed_arguments};
use crate::core::email::{EmailError, EmailMessage, EmailSender};

pub const SEND_EMAIL_TOOL_NAME: &str = "send_email";

pub const SEND_EMAIL_DESCRIPTION: &str = "Send an email on behalf of the assistant, for example \
a meeting invitation the user agreed to receive. Report the outcome to the user: if sending \
failed, say you will try again shortly.";

pub fn send_email_parameters() -> Value {
    json!({
        "type": "object",
        "properties": {
            "recipient": { "type": "string", "description": "Email address of the recipient" },
            "subject": { "type": "string", "description": "Subject line" },
            "body": { "type": "string", "description": "Message body; may contain simple HTML links" }
        },
        "required": ["recipient", "subject", "body"],
        "additionalProperties": false
    })
}

#[derive(Deserialize)]
struct SendEmailArgs {
    recipient: String,
    subject: String,
    body: String,
}

pub struct SendEmailTool {
    sender: Arc<dyn EmailSender>,
}

impl SendEmailTool {
    pub fn new(sender: Arc<dyn EmailSender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl ToolHandler for SendEmailTool {
    async fn call(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let args: SendEmailArgs = typed_arguments(SEND_EMAIL_TOOL_NAME, arguments)?;
        let recipient = args.recipient.trim().to_string();
        if !is_plausible_address(&recipient) {
            return Err(ToolError::InvalidArguments {
                tool: SEND_EMAIL_TOOL_NAME.to_string(),
                message: "recipient must be an email address".to_string(),
            });
        }

        let message = EmailMessage {
            recipient: recipient.clone(),
            subject: args.subject,
            body: args.body,
        };

        match self.sender.send(&message).await {
            Ok(()) => Ok(ToolOutput::json(&json!({
                "status": "sent",
                "recipient": recipient,
            }))),
            Err(EmailError::NotConfigured) => Err(ToolError::execution(
                SEND_EMAIL_TOOL_NAME,
                "Email delivery is not available.",
                false,
            )),
            Err(e) => {
                tracing::warn!(session_id = %ctx.session_id(), error = %e, "Email delivery failed");
                Err(ToolError::execution(
                    SEND_EMAIL_TOOL_NAME,
                    "The email could not be sent right now; tell the user you will retry shortly.",
                    true,
                ))
            }
        }
    }
}

fn is_plausible_address(address: &str) -> bool {
    match address.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !address.contains(char::is_whitespace)
        }
        None => false,
    }
}
