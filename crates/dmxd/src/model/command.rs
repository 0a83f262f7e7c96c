//! Command payloads accepted from REST, WS, and MQTT ingress.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Easing {
    Linear,
    SCurve,
    Expo,
}

impl Default for Easing {
    fn default() -> Self {
        Easing::Linear
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct ChannelItem {
    pub ch: u16,
    pub val: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum FixtureAttrValue {
    Scalar(u32),
    Wide { value16: u32 },
}

/// A tagged command variant, routed by an exhaustive match in the ingress
/// pipeline. `id`, `ts`, and `src` are carried on every variant.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type")]
pub enum Command {
    #[serde(rename = "dmx.set")]
    Set {
        id: Option<String>,
        ts: Option<i64>,
        src: Option<String>,
        universe: u32,
        channel: u16,
        value: u8,
    },
    #[serde(rename = "dmx.patch")]
    Patch {
        id: Option<String>,
        ts: Option<i64>,
        src: Option<String>,
        universe: u32,
        items: Vec<ChannelItem>,
    },
    #[serde(rename = "dmx.fade")]
    Fade {
        id: Option<String>,
        ts: Option<i64>,
        src: Option<String>,
        universe: u32,
        #[serde(rename = "durationMs")]
        duration_ms: u64,
        #[serde(default)]
        easing: Easing,
        items: Vec<ChannelItem>,
    },
    #[serde(rename = "fixture.set")]
    FixtureSet {
        id: Option<String>,
        ts: Option<i64>,
        src: Option<String>,
        #[serde(rename = "fixtureId")]
        fixture_id: String,
        attrs: HashMap<String, FixtureAttrValue>,
    },
}

impl Command {
    pub fn id(&self) -> Option<&str> {
        match self {
            Command::Set { id, .. }
            | Command::Patch { id, .. }
            | Command::Fade { id, .. }
            | Command::FixtureSet { id, .. } => id.as_deref(),
        }
    }

    pub fn universe(&self) -> Option<u32> {
        match self {
            Command::Set { universe, .. }
            | Command::Patch { universe, .. }
            | Command::Fade { universe, .. } => Some(*universe),
            Command::FixtureSet { .. } => None,
        }
    }

    pub fn src(&self) -> Option<&str> {
        match self {
            Command::Set { src, .. }
            | Command::Patch { src, .. }
            | Command::Fade { src, .. }
            | Command::FixtureSet { src, .. } => src.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_roundtrips_through_json() {
        let cmd = Command::Patch {
            id: Some("A".into()),
            ts: None,
            src: Some("test".into()),
            universe: 0,
            items: vec![ChannelItem { ch: 1, val: 10 }],
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"type\":\"dmx.patch\""));
        let back: Command = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id(), Some("A"));
        assert_eq!(back.universe(), Some(0));
    }

    #[test]
    fn fade_defaults_to_linear_easing() {
        let json = r#"{"type":"dmx.fade","universe":0,"durationMs":1000,"items":[{"ch":1,"val":5}]}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        match cmd {
            Command::Fade { easing, .. } => assert_eq!(easing, Easing::Linear),
            _ => panic!("expected Fade"),
        }
    }
}
