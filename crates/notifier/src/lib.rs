//! Herald notifier: delivers the scheduled broadcast to every subscriber.
//!
//! - [`source`]: where recipients come from (PostgreSQL, in-memory)
//! - [`transport`]: how a message reaches one recipient (Telegram Bot API)
//! - [`dispatcher`]: bounded fan-out, per-recipient failure isolation, reporting

pub mod dispatcher;
pub mod source;
pub mod transport;

use herald_common::config::AppConfig;
use herald_common::types::{InlineAction, NotificationPayload};

/// Build the broadcast payload: configured text plus the Mini App button.
pub fn payload_from_config(config: &AppConfig) -> NotificationPayload {
    NotificationPayload::text(config.broadcast_message.clone())
        .with_parse_mode(config.broadcast_parse_mode)
        .with_action(InlineAction::web_app(
            config.broadcast_button_label.clone(),
            config.mini_app_url.clone(),
        ))
}
