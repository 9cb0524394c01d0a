//! Messaging transport: the outbound `send` call and its Telegram Bot API
//! implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use herald_common::error::{AppError, DeliveryError};
use herald_common::types::{ActionKind, InlineAction, NotificationPayload, ParseMode};

/// Delivers one notification to one recipient.
///
/// Implementations must be safe to call concurrently from many sends.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send(
        &self,
        recipient_id: &str,
        payload: &NotificationPayload,
    ) -> Result<(), DeliveryError>;
}

/// Telegram Bot API client (`sendMessage`).
pub struct TelegramTransport {
    client: reqwest::Client,
    send_message_url: String,
}

impl TelegramTransport {
    pub fn new(api_url: &str, bot_token: &str, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            send_message_url: format!(
                "{}/bot{}/sendMessage",
                api_url.trim_end_matches('/'),
                bot_token
            ),
        })
    }
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<ParseMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<InlineKeyboardMarkup<'a>>,
}

#[derive(Debug, Serialize)]
struct InlineKeyboardMarkup<'a> {
    inline_keyboard: Vec<Vec<InlineKeyboardButton<'a>>>,
}

#[derive(Debug, Serialize)]
struct InlineKeyboardButton<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    web_app: Option<WebAppInfo<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct WebAppInfo<'a> {
    url: &'a str,
}

impl<'a> From<&'a InlineAction> for InlineKeyboardMarkup<'a> {
    fn from(action: &'a InlineAction) -> Self {
        let button = match action.kind {
            ActionKind::WebApp => InlineKeyboardButton {
                text: &action.label,
                web_app: Some(WebAppInfo { url: &action.url }),
                url: None,
            },
            ActionKind::Url => InlineKeyboardButton {
                text: &action.label,
                web_app: None,
                url: Some(&action.url),
            },
        };
        Self {
            inline_keyboard: vec![vec![button]],
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    error_code: Option<i64>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

/// Map a failed Bot API response onto the delivery error taxonomy.
fn classify(status: u16, response: ApiResponse) -> DeliveryError {
    let code = response.error_code.unwrap_or(i64::from(status));
    let description = response
        .description
        .unwrap_or_else(|| format!("HTTP {status}"));

    match code {
        403 => DeliveryError::Blocked { code, description },
        400 if description.to_ascii_lowercase().contains("chat not found") => {
            DeliveryError::Unreachable { code, description }
        }
        429 => DeliveryError::RateLimited {
            retry_after: response.parameters.and_then(|p| p.retry_after),
            description,
        },
        _ => DeliveryError::Api { code, description },
    }
}

#[async_trait]
impl MessageTransport for TelegramTransport {
    async fn send(
        &self,
        recipient_id: &str,
        payload: &NotificationPayload,
    ) -> Result<(), DeliveryError> {
        let request = SendMessageRequest {
            chat_id: recipient_id,
            text: &payload.text,
            parse_mode: payload.parse_mode,
            reply_markup: payload.action.as_ref().map(InlineKeyboardMarkup::from),
        };

        let response = self
            .client
            .post(&self.send_message_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| DeliveryError::Network(e.without_url().to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DeliveryError::Network(e.without_url().to_string()))?;

        match serde_json::from_slice::<ApiResponse>(&bytes) {
            Ok(body) if body.ok => Ok(()),
            Ok(body) => Err(classify(status.as_u16(), body)),
            // Proxies in front of the Bot API answer errors with HTML pages
            Err(_) if !status.is_success() => Err(classify(
                status.as_u16(),
                ApiResponse {
                    ok: false,
                    error_code: None,
                    description: None,
                    parameters: None,
                },
            )),
            Err(e) => Err(DeliveryError::Network(format!(
                "invalid response body: {e}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(code: i64, description: &str) -> ApiResponse {
        ApiResponse {
            ok: false,
            error_code: Some(code),
            description: Some(description.to_string()),
            parameters: None,
        }
    }

    #[test]
    fn test_classify_blocked() {
        let err = classify(403, failed(403, "Forbidden: bot was blocked by the user"));
        assert!(matches!(err, DeliveryError::Blocked { code: 403, .. }));
        assert!(err.is_permanent());
    }

    #[test]
    fn test_classify_chat_not_found() {
        let err = classify(400, failed(400, "Bad Request: chat not found"));
        assert!(matches!(err, DeliveryError::Unreachable { code: 400, .. }));
    }

    #[test]
    fn test_classify_other_bad_request_is_transient() {
        let err = classify(400, failed(400, "Bad Request: can't parse entities"));
        assert!(matches!(err, DeliveryError::Api { code: 400, .. }));
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_classify_rate_limited() {
        let mut response = failed(429, "Too Many Requests: retry after 7");
        response.parameters = Some(ResponseParameters {
            retry_after: Some(7),
        });
        let err = classify(429, response);
        assert_eq!(
            err,
            DeliveryError::RateLimited {
                retry_after: Some(7),
                description: "Too Many Requests: retry after 7".to_string(),
            }
        );
    }

    #[test]
    fn test_classify_falls_back_to_http_status() {
        let response = ApiResponse {
            ok: false,
            error_code: None,
            description: None,
            parameters: None,
        };
        let err = classify(502, response);
        assert_eq!(
            err,
            DeliveryError::Api {
                code: 502,
                description: "HTTP 502".to_string(),
            }
        );
    }

    #[test]
    fn test_web_app_keyboard_shape() {
        let action = InlineAction::web_app("Open", "https://app.example.com");
        let markup = InlineKeyboardMarkup::from(&action);
        let json = serde_json::to_value(&markup).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "inline_keyboard": [[
                    { "text": "Open", "web_app": { "url": "https://app.example.com" } }
                ]]
            })
        );
    }

    #[test]
    fn test_link_keyboard_shape() {
        let action = InlineAction::link("Read", "https://example.com/news");
        let json = serde_json::to_value(InlineKeyboardMarkup::from(&action)).unwrap();
        assert_eq!(
            json["inline_keyboard"][0][0],
            serde_json::json!({ "text": "Read", "url": "https://example.com/news" })
        );
    }

    #[test]
    fn test_request_omits_absent_fields() {
        let request = SendMessageRequest {
            chat_id: "42",
            text: "hi",
            parse_mode: None,
            reply_markup: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, serde_json::json!({ "chat_id": "42", "text": "hi" }));
    }

    #[test]
    fn test_token_embedded_in_url() {
        let transport =
            TelegramTransport::new("https://api.telegram.org/", "123:abc", Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            transport.send_message_url,
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }
}
