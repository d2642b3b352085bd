//! OpenAI Realtime constants, model and voice selection.

/// OpenAI Realtime API WebSocket endpoint.
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// PCM16 sample rate for OpenAI Realtime input and output.
pub const OPENAI_REALTIME_SAMPLE_RATE: u32 = 24000;

/// Model used for transcribing the user's audio.
pub const OPENAI_INPUT_TRANSCRIPTION_MODEL: &str = "whisper-1";

pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-realtime-preview";

pub const OPENAI_DEFAULT_VOICE: &str = "alloy";

/// Voices accepted by the Realtime API.
pub const OPENAI_VOICES: &[&str] = &[
    "alloy", "ash", "ballad", "coral", "echo", "sage", "shimmer", "verse",
];

/// Configured model, or the default when unset.
pub fn model_name(model: &str) -> &str {
    let model = model.trim();
    if model.is_empty() { OPENAI_DEFAULT_MODEL } else { model }
}

/// Case-insensitive voice lookup, falling back to the default voice.
pub fn voice_name(voice: Option<&str>) -> &'static str {
    voice
        .map(str::trim)
        .and_then(|v| OPENAI_VOICES.iter().find(|known| known.eq_ignore_ascii_case(v)))
        .copied()
        .unwrap_or(OPENAI_DEFAULT_VOICE)
}

/// WebSocket URL for `model`, honouring an endpoint override.
pub fn realtime_url(endpoint: Option<&str>, model: &str) -> String {
    let base = endpoint.unwrap_or(OPENAI_REALTIME_URL);
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}model={}", model_name(model))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_name() {
        assert_eq!(model_name(""), OPENAI_DEFAULT_MODEL);
        assert_eq!(
            model_name(" gpt-4o-mini-realtime-preview "),
            "gpt-4o-mini-realtime-preview"
        );
    }

    #[test]
    fn test_voice_name() {
        assert_eq!(voice_name(Some("SHIMMER")), "shimmer");
        assert_eq!(voice_name(Some("nova-ultra")), OPENAI_DEFAULT_VOICE);
        assert_eq!(voice_name(None), OPENAI_DEFAULT_VOICE);
    }

    #[test]
    fn test_realtime_url() {
        assert_eq!(
            realtime_url(None, ""),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview"
        );
        assert_eq!(
            realtime_url(Some("ws://127.0.0.1:9000/rt"), "gpt-4o-mini-realtime-preview"),
            "ws://127.0.0.1:9000/rt?model=gpt-4o-mini-realtime-preview"
        );
        assert_eq!(
            realtime_url(Some("ws://proxy/rt?tenant=a"), ""),
            "ws://proxy/rt?tenant=a&model=gpt-4o-realtime-preview"
        );
    }
}
