//! `GoogleSttPlugin`: the documented default batch backend (spec §4.5,
//! §6 `stt.module` default `"google"`). Grounded on the teacher's
//! `command_executor/services/weather.rs` blocking-`reqwest` + `url::Url`
//! request shape, adapted to POST raw audio instead of GET query params.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use crate::error::{ListenerError, Result};
use crate::stt::{SttPlugin, Transcription};

const ENDPOINT: &str = "https://speech.googleapis.com/v1/speech:recognize";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<RecognizeResult>,
}

#[derive(Deserialize)]
struct RecognizeResult {
    #[serde(default)]
    alternatives: Vec<RecognizeAlternative>,
}

#[derive(Deserialize)]
struct RecognizeAlternative {
    transcript: String,
    #[serde(default, rename = "confidence")]
    confidence: f32,
}

pub struct GoogleSttPlugin {
    api_key: SecretString,
    client: reqwest::blocking::Client,
    sample_rate_hz: u32,
}

impl GoogleSttPlugin {
    pub fn new(api_key: SecretString, sample_rate_hz: u32) -> Self {
        Self {
            api_key,
            client: reqwest::blocking::Client::new(),
            sample_rate_hz,
        }
    }

    fn request_url(&self) -> Result<Url> {
        Url::parse_with_params(ENDPOINT, [("key", self.api_key.expose_secret())]).map_err(|e| {
            ListenerError::PluginRuntime {
                plugin_id: "google".into(),
                reason: e.to_string(),
            }
        })
    }
}

impl SttPlugin for GoogleSttPlugin {
    fn id(&self) -> &str {
        "google"
    }

    fn execute(&mut self, clip_bytes: &[u8], lang: &str) -> Result<Vec<Transcription>> {
        let url = self.request_url()?;
        let body = serde_json::json!({
            "config": {
                "encoding": "LINEAR16",
                "sampleRateHertz": self.sample_rate_hz,
                "languageCode": lang,
            },
            "audio": {
                "content": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, clip_bytes),
            },
        });

        let response = self
            .client
            .post(url)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .map_err(|e| ListenerError::PluginRuntime {
                plugin_id: "google".into(),
                reason: e.to_string(),
            })?
            .error_for_status()
            .map_err(|e| ListenerError::PluginRuntime {
                plugin_id: "google".into(),
                reason: e.to_string(),
            })?;

        let parsed: RecognizeResponse = response.json().map_err(|e| ListenerError::PluginRuntime {
            plugin_id: "google".into(),
            reason: e.to_string(),
        })?;

        Ok(parsed
            .results
            .into_iter()
            .flat_map(|r| r.alternatives)
            .map(|a| (a.transcript, a.confidence))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_url_carries_key_as_query_param() {
        let plugin = GoogleSttPlugin::new(SecretString::from("abc123".to_string()), 16000);
        let url = plugin.request_url().unwrap();
        assert!(url.query().unwrap().contains("key=abc123"));
    }
}
