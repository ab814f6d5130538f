use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::SpeechSynthesizer;
use crate::config::{RetryConfig, VoiceConfig};
use crate::http::{check_status, ServiceError};
use crate::retry::with_retry;

const SERVICE: &str = "speech synthesis";

/// Google Cloud Text-to-Speech REST client
pub struct GoogleTts {
    client: Client,
    url: String,
    api_key: String,
    voice: VoiceConfig,
    retry: RetryConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeRequest<'a> {
    input: SynthesisInput<'a>,
    voice: VoiceSelection<'a>,
    audio_config: AudioConfig,
}

#[derive(Debug, Serialize)]
struct SynthesisInput<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceSelection<'a> {
    language_code: &'a str,
    name: &'a str,
    ssml_gender: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AudioConfig {
    audio_encoding: &'static str,
    speaking_rate: f64,
    pitch: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    #[serde(default)]
    audio_content: String,
}

impl GoogleTts {
    pub fn new(client: Client, url: impl Into<String>, api_key: String, voice: VoiceConfig, retry: RetryConfig) -> Self {
        Self {
            client,
            url: url.into(),
            api_key,
            voice,
            retry,
        }
    }

    fn request<'a>(&'a self, text: &'a str) -> SynthesizeRequest<'a> {
        SynthesizeRequest {
            input: SynthesisInput { text },
            voice: VoiceSelection {
                language_code: &self.voice.language_code,
                name: &self.voice.name,
                ssml_gender: &self.voice.ssml_gender,
            },
            audio_config: AudioConfig {
                audio_encoding: "MP3",
                speaking_rate: self.voice.speaking_rate,
                pitch: self.voice.pitch,
            },
        }
    }
}

fn decode_audio(response: SynthesizeResponse) -> Result<Vec<u8>, ServiceError> {
    base64::engine::general_purpose::STANDARD
        .decode(response.audio_content.trim())
        .map_err(|e| ServiceError::malformed(SERVICE, format!("audioContent is not base64: {}", e)))
}

#[async_trait]
impl SpeechSynthesizer for GoogleTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ServiceError> {
        let request = self.request(text);

        let response = with_retry(&self.retry, "speech synthesis", || {
            let request = &request;
            async move {
                let response = self
                    .client
                    .post(&self.url)
                    .header("x-goog-api-key", &self.api_key)
                    .json(request)
                    .send()
                    .await
                    .map_err(|e| ServiceError::from_reqwest(SERVICE, e))?;

                check_status(SERVICE, response)
                    .await?
                    .json::<SynthesizeResponse>()
                    .await
                    .map_err(|e| ServiceError::from_reqwest(SERVICE, e))
            }
        })
        .await?;

        decode_audio(response)
    }

    fn voice_name(&self) -> String {
        self.voice.name.clone()
    }
}
