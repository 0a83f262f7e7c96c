//! OLA HTTP bridge back-end: `POST <base>/set_dmx` with a form-encoded
//! universe and comma-separated decimal slot list.

use super::OutputBackend;
use crate::error::OutputError;
use crate::model::{Frame, UniverseId};
use async_trait::async_trait;
use std::time::Duration;

pub struct OlaBackend {
    client: reqwest::Client,
    base_url: String,
}

impl OlaBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(500))
            .build()
            .expect("reqwest client builds with no custom TLS config");
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl OutputBackend for OlaBackend {
    async fn send(&self, universe: UniverseId, frame: &Frame) -> Result<(), OutputError> {
        let body = encode_form(universe, frame);
        let url = format!("{}/set_dmx", self.base_url.trim_end_matches('/'));

        let result = self
            .client
            .post(&url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .timeout(Duration::from_millis(500))
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(OutputError::HttpStatus(resp.status().as_u16())),
            Err(e) if e.is_timeout() => Err(OutputError::Timeout),
            Err(e) => Err(OutputError::Transport(e.to_string())),
        }
    }
}

fn encode_form(universe: UniverseId, frame: &Frame) -> String {
    let mut values = String::with_capacity(frame.len() * 4);
    for (i, v) in frame.iter().enumerate() {
        if i > 0 {
            values.push(',');
        }
        values.push_str(&v.to_string());
    }
    format!("u={universe}&d={values}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_body_has_expected_shape() {
        let mut frame = [0u8; 512];
        frame[0] = 1;
        frame[1] = 2;
        let body = encode_form(5, &frame);
        assert!(body.starts_with("u=5&d=1,2,0,0"));
    }
}
