//! Command surface and its JSON wire format.
//!
//! Commands arrive as objects tagged by `type`, e.g. `{"type":"SET_BOOST","value":1.5}`.
//! Every command is answered with a [`Response`]; GET_STATE carries a [`StateSnapshot`].

use crate::chain::ChainState;
use crate::coordinator::SuppressionStatus;
use crate::engine::RunState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    SetBoost { value: f32 },
    AdjustBoost { delta: f32 },
    ResetBoost,
    SetMute { muted: bool },
    ToggleMute,
    SetClarity { enabled: bool },
    ToggleClarity,
    GetState,
}

impl Command {
    /// Commands that change what the listener hears.
    pub fn is_audible(&self) -> bool {
        !matches!(self, Command::GetState)
    }
}

/// Boost step of the `boost_up`/`boost_down` shortcuts.
pub const SHORTCUT_BOOST_STEP: f32 = 0.1;

/// Maps a host keyboard-shortcut name to its command. Unknown names map to nothing.
pub fn shortcut(name: &str) -> Option<Command> {
    match name {
        "toggle_speech_focus" => Some(Command::ToggleClarity),
        "toggle_mute" => Some(Command::ToggleMute),
        "boost_up" => Some(Command::AdjustBoost {
            delta: SHORTCUT_BOOST_STEP,
        }),
        "boost_down" => Some(Command::AdjustBoost {
            delta: -SHORTCUT_BOOST_STEP,
        }),
        "reset_boost" => Some(Command::ResetBoost),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub boost: f32,
    pub auto_gain: f32,
    pub clarity_enabled: bool,
    pub muted: bool,
    pub hooked_sources: usize,
    pub blocked: bool,
    /// Last media tap failure.
    pub last_error: Option<String>,
    /// Last model load or inference failure.
    pub suppression_error: Option<String>,
    pub suppression: SuppressionStatus,
    pub chain: ChainState,
    pub run_state: RunState,
    pub resume_requested: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<StateSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ack() -> Self {
        Self {
            ok: true,
            state: None,
            error: None,
        }
    }

    pub fn state(state: StateSnapshot) -> Self {
        Self {
            ok: true,
            state: Some(state),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            state: None,
            error: Some(msg.into()),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!(r#"{{"ok":false,"error":"{}"}}"#, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        let cmd: Command = serde_json::from_str(r#"{"type":"SET_BOOST","value":1.5}"#).unwrap();
        assert_eq!(cmd, Command::SetBoost { value: 1.5 });
        let cmd: Command = serde_json::from_str(r#"{"type":"TOGGLE_CLARITY"}"#).unwrap();
        assert_eq!(cmd, Command::ToggleClarity);
        assert_eq!(
            serde_json::to_string(&Command::SetMute { muted: true }).unwrap(),
            r#"{"type":"SET_MUTE","muted":true}"#
        );
    }

    #[test]
    fn test_malformed_commands_rejected() {
        assert!(serde_json::from_str::<Command>(r#"{"type":"SET_VOLUME","value":1}"#).is_err());
        assert!(serde_json::from_str::<Command>(r#"{"type":"SET_BOOST"}"#).is_err());
        assert!(serde_json::from_str::<Command>("not json").is_err());
    }

    #[test]
    fn test_shortcuts() {
        assert_eq!(shortcut("toggle_speech_focus"), Some(Command::ToggleClarity));
        assert_eq!(shortcut("boost_down"), Some(Command::AdjustBoost { delta: -0.1 }));
        assert_eq!(shortcut("open_options"), None);
    }

    #[test]
    fn test_ack_omits_empty_fields() {
        assert_eq!(Response::ack().to_json(), r#"{"ok":true}"#);
        assert_eq!(Response::error("bad").to_json(), r#"{"ok":false,"error":"bad"}"#);
    }
}
