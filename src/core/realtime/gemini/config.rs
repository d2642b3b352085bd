//! Gemini Live constants and voice selection.

/// Gemini Live bidirectional streaming endpoint.
pub const GEMINI_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// PCM16 rate Gemini Live expects for input audio.
pub const GEMINI_INPUT_SAMPLE_RATE: u32 = 16000;

/// PCM16 rate of Gemini Live output audio.
pub const GEMINI_OUTPUT_SAMPLE_RATE: u32 = 24000;

pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.0-flash-live-001";

pub const GEMINI_DEFAULT_VOICE: &str = "Puck";

/// Prebuilt voices offered by Gemini Live.
pub const GEMINI_VOICES: &[&str] = &["Puck", "Charon", "Kore", "Fenrir", "Aoede", "Leda", "Orus", "Zephyr"];

/// MIME type of outbound audio chunks.
pub fn input_mime_type() -> String {
    format!("audio/pcm;rate={GEMINI_INPUT_SAMPLE_RATE}")
}

/// Model resource name, adding the `models/` prefix when missing.
pub fn model_resource(model: &str) -> String {
    let model = if model.is_empty() { GEMINI_DEFAULT_MODEL } else { model };
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

/// Case-insensitive voice lookup, falling back to the default voice.
pub fn voice_name(voice: Option<&str>) -> &'static str {
    voice
        .and_then(|v| GEMINI_VOICES.iter().find(|known| known.eq_ignore_ascii_case(v)))
        .copied()
        .unwrap_or(GEMINI_DEFAULT_VOICE)
}

/// WebSocket URL carrying the API key, honouring an endpoint override.
pub fn live_url(endpoint: Option<&str>, api_key: &str) -> String {
    let base = endpoint.unwrap_or(GEMINI_LIVE_URL);
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}key={api_key}")
}

/// Sample rate declared in a `audio/pcm;rate=N` MIME type.
pub fn rate_from_mime(mime: &str) -> Option<u32> {
    mime.split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
}
