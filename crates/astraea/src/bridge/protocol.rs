//! Wire types exchanged with the decision process.
//!
//! Client to decision process: a [`ControlMessage`] carrying a state snapshot.
//! Decision process to client: a [`Decision`] carrying the new congestion window.
//!
//! On the wire the message kind is an integer `type` field rather than a string
//! tag, so [`ControlMessage`] goes through [`WireMessage`] for (de)serialization.

use serde::{Deserialize, Serialize};

use crate::state::StateSnapshot;

/// Integer codes of the message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum MessageCode {
    Init = 0,
    Start = 1,
    End = 2,
    Alive = 3,
    Observe = 4,
}

impl From<MessageCode> for u8 {
    fn from(code: MessageCode) -> Self {
        code as u8
    }
}

impl TryFrom<u8> for MessageCode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Init),
            1 => Ok(Self::Start),
            2 => Ok(Self::End),
            3 => Ok(Self::Alive),
            4 => Ok(Self::Observe),
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown message type {0}")]
    UnknownKind(u8),
    #[error("OBSERVE message without {0}")]
    MissingObserveField(&'static str),
}

/// Kind of a control message. Only OBSERVE carries extra data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Init,
    Start,
    End,
    /// Periodic state report; the decision process answers with a [`Decision`].
    Alive,
    Observe { observer: i64, step: i64 },
}

impl MessageKind {
    pub fn code(&self) -> MessageCode {
        match self {
            Self::Init => MessageCode::Init,
            Self::Start => MessageCode::Start,
            Self::End => MessageCode::End,
            Self::Alive => MessageCode::Alive,
            Self::Observe { .. } => MessageCode::Observe,
        }
    }
}

/// Message from the client to the decision process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "WireMessage", try_from = "WireMessage")]
pub struct ControlMessage {
    pub kind: MessageKind,
    /// `None` when the flow was started without `--id`.
    pub flow_id: Option<i64>,
    pub state: StateSnapshot,
}

impl ControlMessage {
    pub fn new(kind: MessageKind, flow_id: Option<i64>, state: StateSnapshot) -> Self {
        Self {
            kind,
            flow_id,
            state,
        }
    }

    pub fn alive(flow_id: Option<i64>, state: StateSnapshot) -> Self {
        Self::new(MessageKind::Alive, flow_id, state)
    }
}

/// Flat wire shape of a [`ControlMessage`].
///
/// `flow_id` is always present (null when unset); `observer` and `step` only
/// appear on OBSERVE messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    code: MessageCode,
    #[serde(default)]
    flow_id: Option<i64>,
    state: StateSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    observer: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    step: Option<i64>,
}

impl From<ControlMessage> for WireMessage {
    fn from(message: ControlMessage) -> Self {
        let (observer, step) = match message.kind {
            MessageKind::Observe { observer, step } => (Some(observer), Some(step)),
            _ => (None, None),
        };
        Self {
            code: message.kind.code(),
            flow_id: message.flow_id,
            state: message.state,
            observer,
            step,
        }
    }
}

impl TryFrom<WireMessage> for ControlMessage {
    type Error = ProtocolError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let kind = match wire.code {
            MessageCode::Init => MessageKind::Init,
            MessageCode::Start => MessageKind::Start,
            MessageCode::End => MessageKind::End,
            MessageCode::Alive => MessageKind::Alive,
            MessageCode::Observe => MessageKind::Observe {
                observer: wire
                    .observer
                    .ok_or(ProtocolError::MissingObserveField("observer"))?,
                step: wire.step.ok_or(ProtocolError::MissingObserveField("step"))?,
            },
        };
        Ok(Self {
            kind,
            flow_id: wire.flow_id,
            state: wire.state,
        })
    }
}

/// Reply from the decision process. Extra keys are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub cwnd: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_state() -> StateSnapshot {
        StateSnapshot {
            min_rtt: 10_000,
            avg_urtt: 12_000,
            cnt: 40,
            srtt_us: 96_000,
            avg_thr: 1_250_000,
            thr_cnt: 38,
            pacing_rate: 2_500_000,
            loss_bytes: 0,
            packets_out: 17,
            retrans_out: 0,
            max_packets_out: 21,
            cwnd: 20,
        }
    }

    #[test]
    fn alive_serializes() {
        let message = ControlMessage::alive(Some(7), test_state());
        insta::assert_json_snapshot!(message, @r#"
        {
          "type": 3,
          "flow_id": 7,
          "state": {
            "min_rtt": 10000,
            "avg_urtt": 12000,
            "cnt": 40,
            "srtt_us": 96000,
            "avg_thr": 1250000,
            "thr_cnt": 38,
            "pacing_rate": 2500000,
            "loss_bytes": 0,
            "packets_out": 17,
            "retrans_out": 0,
            "max_packets_out": 21,
            "cwnd": 20
          }
        }
        "#);
    }

    #[test]
    fn unset_flow_id_serializes_as_null() {
        let message = ControlMessage::alive(None, test_state());
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["flow_id"], serde_json::Value::Null);
        assert!(value.get("observer").is_none());
        assert!(value.get("step").is_none());
    }

    #[test]
    fn observe_carries_observer_and_step() {
        let message = ControlMessage::new(
            MessageKind::Observe {
                observer: 2,
                step: 15,
            },
            Some(1),
            test_state(),
        );
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], json!(4));
        assert_eq!(value["observer"], json!(2));
        assert_eq!(value["step"], json!(15));
    }

    #[test]
    fn every_kind_uses_its_code() {
        let kinds = [
            (MessageKind::Init, 0),
            (MessageKind::Start, 1),
            (MessageKind::End, 2),
            (MessageKind::Alive, 3),
            (
                MessageKind::Observe {
                    observer: 0,
                    step: 0,
                },
                4,
            ),
        ];
        for (kind, code) in kinds {
            let value = serde_json::to_value(ControlMessage::new(kind, None, test_state())).unwrap();
            assert_eq!(value["type"], json!(code), "{kind:?}");

            let parsed: ControlMessage = serde_json::from_value(value).unwrap();
            assert_eq!(parsed.kind, kind);
        }
    }

    #[test]
    fn observe_without_step_is_rejected() {
        let value = json!({
            "type": 4,
            "flow_id": 1,
            "observer": 3,
            "state": serde_json::to_value(test_state()).unwrap(),
        });
        let err = serde_json::from_value::<ControlMessage>(value).unwrap_err();
        assert!(err.to_string().contains("without step"), "{err}");
    }

    #[test]
    fn unknown_type_is_rejected() {
        let value = json!({
            "type": 9,
            "flow_id": null,
            "state": serde_json::to_value(test_state()).unwrap(),
        });
        assert!(serde_json::from_value::<ControlMessage>(value).is_err());
    }

    #[test]
    fn missing_flow_id_decodes_as_unset() {
        let value = json!({
            "type": 3,
            "state": serde_json::to_value(test_state()).unwrap(),
        });
        let parsed: ControlMessage = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.flow_id, None);
    }

    #[test]
    fn decision_requires_integer_cwnd() {
        let ok: Decision = serde_json::from_str(r#"{"cwnd": 42, "note": "x"}"#).unwrap();
        assert_eq!(ok.cwnd, 42);

        assert!(serde_json::from_str::<Decision>(r#"{"cwnd": 42.5}"#).is_err());
        assert!(serde_json::from_str::<Decision>(r#"{"cwnd": "42"}"#).is_err());
        assert!(serde_json::from_str::<Decision>(r#"{"cwnd": -1}"#).is_err());
        assert!(serde_json::from_str::<Decision>(r#"{"window": 42}"#).is_err());
    }
}
