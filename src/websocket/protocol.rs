//! Pusher Channels wire format (protocol 7).

use crate::channel::{Member, RawPresenceData};
use crate::infrastructure::ChannelAuth;
use crate::messaging::{ProviderErrorKind, ProviderEvent};
use crate::provider::ProviderConfig;
use crate::types::{
    CLIENT_NAME, ChannelMessage, PROTOCOL_VERSION, RealtimeError, Result, pusher_events,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// A single protocol frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PusherFrame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl PusherFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            channel: None,
            data,
            user_id: None,
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// `data` with one level of JSON-in-a-string decoded
    pub fn decoded_data(&self) -> Value {
        match &self.data {
            Value::String(raw) => serde_json::from_str(raw).unwrap_or_else(|_| self.data.clone()),
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ConnectionEstablished {
    socket_id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorData {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: String,
}

/// What the read loop should do with an inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Established { socket_id: String },
    Ping,
    Pong,
    Event(ProviderEvent),
    Ignored(String),
}

/// Maps a decoded frame onto provider events
pub fn interpret(frame: PusherFrame, raw_len: usize) -> Inbound {
    let data = frame.decoded_data();

    match frame.event.as_str() {
        pusher_events::CONNECTION_ESTABLISHED => {
            match serde_json::from_value::<ConnectionEstablished>(data) {
                Ok(established) => Inbound::Established {
                    socket_id: established.socket_id,
                },
                Err(e) => Inbound::Event(ProviderEvent::error(
                    ProviderErrorKind::Protocol,
                    format!("Malformed connection_established: {}", e),
                )),
            }
        }
        pusher_events::ERROR => {
            let error = serde_json::from_value::<ErrorData>(data).unwrap_or(ErrorData {
                code: None,
                message: "unknown error".to_string(),
            });
            Inbound::Event(ProviderEvent::Error {
                kind: ProviderErrorKind::from_code(error.code),
                message: error.message,
                code: error.code,
            })
        }
        pusher_events::PING => Inbound::Ping,
        pusher_events::PONG => Inbound::Pong,
        pusher_events::SUBSCRIPTION_SUCCEEDED => match frame.channel {
            Some(channel) => {
                let presence = serde_json::from_value::<RawPresenceData>(data)
                    .ok()
                    .map(|raw| raw.into_snapshot(None));
                Inbound::Event(ProviderEvent::SubscriptionSucceeded { channel, presence })
            }
            None => Inbound::Ignored("subscription_succeeded without channel".to_string()),
        },
        pusher_events::SUBSCRIPTION_ERROR => match frame.channel {
            Some(channel) => {
                let message = data
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| data.to_string());
                Inbound::Event(ProviderEvent::SubscriptionError { channel, message })
            }
            None => Inbound::Ignored("subscription_error without channel".to_string()),
        },
        pusher_events::MEMBER_ADDED => match (frame.channel, parse_member(&data)) {
            (Some(channel), Some(member)) => {
                Inbound::Event(ProviderEvent::MemberAdded { channel, member })
            }
            _ => Inbound::Ignored("malformed member_added".to_string()),
        },
        pusher_events::MEMBER_REMOVED => match (frame.channel, user_id_of(&data)) {
            (Some(channel), Some(user_id)) => {
                Inbound::Event(ProviderEvent::MemberRemoved { channel, user_id })
            }
            _ => Inbound::Ignored("malformed member_removed".to_string()),
        },
        _ => match frame.channel {
            Some(channel) => {
                let mut message = ChannelMessage::new(channel, frame.event, data).with_size(raw_len);
                message.user_id = frame.user_id;
                Inbound::Event(ProviderEvent::Message(message))
            }
            None => Inbound::Ignored(format!("event '{}' without channel", frame.event)),
        },
    }
}

/// User ids may arrive as strings or numbers
fn user_id_of(data: &Value) -> Option<String> {
    match data.get("user_id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn parse_member(data: &Value) -> Option<Member> {
    let id = user_id_of(data)?;
    let info = data.get("user_info").cloned().unwrap_or(Value::Null);
    Some(Member::new(id, info))
}

/// Parses the `channel_data` string of a presence authorization
pub fn parse_channel_data(channel_data: &str) -> Option<Member> {
    let data: Value = serde_json::from_str(channel_data).ok()?;
    parse_member(&data)
}

/// Builds the socket URL for a session
pub fn socket_url(config: &ProviderConfig) -> Result<Url> {
    if config.key.is_empty() {
        return Err(RealtimeError::Auth("App key is required".to_string()));
    }

    let scheme = if config.force_tls { "wss" } else { "ws" };
    let host = match &config.host {
        Some(host) => host.clone(),
        None => format!("ws-{}.pusher.com", config.cluster),
    };

    let mut url = Url::parse(&format!("{}://{}/app/{}", scheme, host, config.key))?;
    url.query_pairs_mut()
        .append_pair("protocol", &PROTOCOL_VERSION.to_string())
        .append_pair("client", CLIENT_NAME)
        .append_pair("version", env!("CARGO_PKG_VERSION"))
        .append_pair("flash", "false");

    Ok(url)
}

pub fn subscribe_frame(channel: &str, auth: Option<&ChannelAuth>) -> PusherFrame {
    let mut data = serde_json::json!({ "channel": channel });
    if let Some(auth) = auth {
        data["auth"] = Value::String(auth.auth.clone());
        if let Some(channel_data) = &auth.channel_data {
            data["channel_data"] = Value::String(channel_data.clone());
        }
    }
    PusherFrame::new(pusher_events::SUBSCRIBE, data)
}

pub fn unsubscribe_frame(channel: &str) -> PusherFrame {
    PusherFrame::new(
        pusher_events::UNSUBSCRIBE,
        serde_json::json!({ "channel": channel }),
    )
}

pub fn ping_frame() -> PusherFrame {
    PusherFrame::new(pusher_events::PING, serde_json::json!({}))
}

pub fn pong_frame() -> PusherFrame {
    PusherFrame::new(pusher_events::PONG, serde_json::json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(raw: &str) -> PusherFrame {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_connection_established_with_string_data() {
        let raw = r#"{"event":"pusher:connection_established","data":"{\"socket_id\":\"123.456\",\"activity_timeout\":120}"}"#;
        assert_eq!(
            interpret(frame(raw), raw.len()),
            Inbound::Established {
                socket_id: "123.456".to_string()
            }
        );
    }

    #[test]
    fn test_error_frame_classification() {
        let raw = r#"{"event":"pusher:error","data":{"code":4001,"message":"App key not in this cluster"}}"#;
        match interpret(frame(raw), raw.len()) {
            Inbound::Event(ProviderEvent::Error {
                kind,
                message,
                code,
            }) => {
                assert_eq!(kind, ProviderErrorKind::Auth);
                assert_eq!(message, "App key not in this cluster");
                assert_eq!(code, Some(4001));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_presence_subscription_succeeded() {
        let raw = r#"{"event":"pusher_internal:subscription_succeeded","channel":"presence-class-7","data":"{\"presence\":{\"ids\":[\"1\",\"2\"],\"hash\":{\"1\":{\"name\":\"Ada\"},\"2\":{\"name\":\"Bo\"}},\"count\":2}}"}"#;
        match interpret(frame(raw), raw.len()) {
            Inbound::Event(ProviderEvent::SubscriptionSucceeded { channel, presence }) => {
                assert_eq!(channel, "presence-class-7");
                let presence = presence.unwrap();
                assert_eq!(presence.members.len(), 2);
                assert_eq!(presence.members["1"], json!({"name": "Ada"}));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_public_subscription_succeeded_has_no_presence() {
        let raw = r#"{"event":"pusher_internal:subscription_succeeded","channel":"metrics","data":"{}"}"#;
        assert_eq!(
            interpret(frame(raw), raw.len()),
            Inbound::Event(ProviderEvent::SubscriptionSucceeded {
                channel: "metrics".to_string(),
                presence: None
            })
        );
    }

    #[test]
    fn test_member_events() {
        let raw = r#"{"event":"pusher_internal:member_added","channel":"presence-class-7","data":"{\"user_id\":42,\"user_info\":{\"name\":\"Cy\"}}"}"#;
        assert_eq!(
            interpret(frame(raw), raw.len()),
            Inbound::Event(ProviderEvent::MemberAdded {
                channel: "presence-class-7".to_string(),
                member: Member::new("42", json!({"name": "Cy"})),
            })
        );

        let raw = r#"{"event":"pusher_internal:member_removed","channel":"presence-class-7","data":"{\"user_id\":\"42\"}"}"#;
        assert_eq!(
            interpret(frame(raw), raw.len()),
            Inbound::Event(ProviderEvent::MemberRemoved {
                channel: "presence-class-7".to_string(),
                user_id: "42".to_string(),
            })
        );
    }

    #[test]
    fn test_application_event() {
        let raw = r#"{"event":"enrollment-changed","channel":"dashboard","data":"{\"classes\":12}"}"#;
        match interpret(frame(raw), raw.len()) {
            Inbound::Event(ProviderEvent::Message(message)) => {
                assert_eq!(message.channel, "dashboard");
                assert_eq!(message.event, "enrollment-changed");
                assert_eq!(message.data, json!({"classes": 12}));
                assert_eq!(message.size, raw.len());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_non_json_string_data_is_kept() {
        let raw = r#"{"event":"note","channel":"dashboard","data":"plain text"}"#;
        match interpret(frame(raw), raw.len()) {
            Inbound::Event(ProviderEvent::Message(message)) => {
                assert_eq!(message.data, json!("plain text"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_ping_pong_and_unknown() {
        assert_eq!(interpret(frame(r#"{"event":"pusher:ping","data":{}}"#), 0), Inbound::Ping);
        assert_eq!(interpret(frame(r#"{"event":"pusher:pong","data":{}}"#), 0), Inbound::Pong);
        assert!(matches!(
            interpret(frame(r#"{"event":"mystery","data":{}}"#), 0),
            Inbound::Ignored(_)
        ));
    }

    #[test]
    fn test_socket_url() {
        let config = ProviderConfig {
            key: "app-key".to_string(),
            cluster: "eu".to_string(),
            force_tls: true,
            ..Default::default()
        };
        let url = socket_url(&config).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.host_str(), Some("ws-eu.pusher.com"));
        assert_eq!(url.path(), "/app/app-key");
        assert!(url.query().unwrap().contains("protocol=7"));
    }

    #[test]
    fn test_socket_url_with_host_override() {
        let config = ProviderConfig {
            key: "local".to_string(),
            host: Some("localhost:6001".to_string()),
            force_tls: false,
            ..Default::default()
        };
        let url = socket_url(&config).unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.port(), Some(6001));
    }

    #[test]
    fn test_socket_url_requires_key() {
        assert!(matches!(
            socket_url(&ProviderConfig::default()),
            Err(RealtimeError::Auth(_))
        ));
    }

    #[test]
    fn test_subscribe_frame_with_auth() {
        let auth = ChannelAuth {
            auth: "key:sig".to_string(),
            channel_data: Some(r#"{"user_id":"t-1"}"#.to_string()),
        };
        let frame = subscribe_frame("presence-class-7", Some(&auth));
        assert_eq!(frame.event, "pusher:subscribe");
        assert_eq!(frame.data["channel"], "presence-class-7");
        assert_eq!(frame.data["auth"], "key:sig");
        assert_eq!(frame.data["channel_data"], r#"{"user_id":"t-1"}"#);

        let public = subscribe_frame("metrics", None);
        assert!(public.data.get("auth").is_none());
    }

    #[test]
    fn test_parse_channel_data() {
        let me = parse_channel_data(r#"{"user_id":"t-1","user_info":{"name":"Ms. Rivera"}}"#);
        assert_eq!(me, Some(Member::new("t-1", json!({"name": "Ms. Rivera"}))));
        assert_eq!(parse_channel_data("not json"), None);
    }
}
