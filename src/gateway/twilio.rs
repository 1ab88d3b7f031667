use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::TwilioConfig;

use super::{GatewayError, GatewayReceipt, MessageGateway, OutboundMessage};

/// Twilio WhatsApp sender using the Content API. Template variables travel
/// as a JSON object in the `ContentVariables` form field.
pub struct TwilioGateway {
    client: Client,
    config: TwilioConfig,
}

#[derive(Deserialize)]
struct TwilioMessageResponse {
    sid: String,
    status: String,
}

#[derive(Deserialize)]
struct TwilioErrorResponse {
    message: Option<String>,
    code: Option<i64>,
}

impl TwilioGateway {
    pub fn new(config: TwilioConfig) -> Self {
        let client = Client::builder()
            .timeout(config.send_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.api_base_url, self.config.account_sid
        )
    }
}

#[async_trait]
impl MessageGateway for TwilioGateway {
    async fn send(&self, message: &OutboundMessage) -> Result<GatewayReceipt, GatewayError> {
        let content_variables = serde_json::to_string(&message.variables)
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        let form = [
            ("To", format!("whatsapp:{}", message.to)),
            ("From", self.config.from_number.clone()),
            ("ContentSid", message.content_sid.clone()),
            ("ContentVariables", content_variables),
        ];

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Network(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<TwilioErrorResponse>()
                .await
                .ok()
                .and_then(|body| {
                    body.message
                        .map(|m| match body.code {
                            Some(code) => format!("{m} (code {code})"),
                            None => m,
                        })
                })
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(GatewayError::Rejected(detail));
        }

        let body: TwilioMessageResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        debug!(sid = %body.sid, status = %body.status, to = %message.to, "gateway accepted message");

        Ok(GatewayReceipt {
            sid: body.sid,
            status: body.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String) -> TwilioConfig {
        TwilioConfig {
            account_sid: "AC00000000000000000000000000000000".to_string(),
            auth_token: "secret".to_string(),
            from_number: "whatsapp:+14155238886".to_string(),
            api_base_url: base_url,
            send_timeout: Duration::from_secs(5),
        }
    }

    fn message() -> OutboundMessage {
        OutboundMessage {
            to: "+573000000000".to_string(),
            content_sid: "HX0000000000000000000000000000000".to_string(),
            variables: HashMap::from([("1".to_string(), "Ana".to_string())]),
        }
    }

    #[tokio::test]
    async fn sends_template_and_returns_receipt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(
                "/2010-04-01/Accounts/AC00000000000000000000000000000000/Messages.json",
            ))
            .and(body_string_contains("ContentSid=HX0000000000000000000000000000000"))
            .and(body_string_contains("whatsapp%3A%2B573000000000"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "sid": "SM123",
                "status": "queued"
            })))
            .mount(&server)
            .await;

        let gateway = TwilioGateway::new(config(server.uri()));
        let receipt = gateway.send(&message()).await.unwrap();
        assert_eq!(receipt.sid, "SM123");
        assert_eq!(receipt.status, "queued");
    }

    #[tokio::test]
    async fn maps_gateway_rejection_to_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "message": "Invalid 'To' Phone Number",
                "code": 21211
            })))
            .mount(&server)
            .await;

        let gateway = TwilioGateway::new(config(server.uri()));
        let err = gateway.send(&message()).await.unwrap_err();
        match err {
            GatewayError::Rejected(detail) => {
                assert!(detail.contains("21211"), "{detail}");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }
}
