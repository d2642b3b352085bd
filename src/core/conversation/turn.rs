//! Turn-taking state.
//!
//! Pure bookkeeping over caller-supplied instants. The loop asks it whether
//! a silence timeout should close the user's turn and whether the model is
//! still considered to be speaking.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct TurnPolicy {
    speaking_timeout: Duration,
    debounce: Duration,
    user_spoke: bool,
    last_completion: Option<Instant>,
    model_speaking: bool,
    last_model_audio: Option<Instant>,
}

impl TurnPolicy {
    pub fn new(speaking_timeout: Duration, debounce: Duration) -> Self {
        Self {
            speaking_timeout,
            debounce,
            user_spoke: false,
            last_completion: None,
            model_speaking: false,
            last_model_audio: None,
        }
    }

    /// A user segment was forwarded upstream.
    pub fn on_user_audio(&mut self) {
        self.user_spoke = true;
    }

    pub fn user_spoke(&self) -> bool {
        self.user_spoke
    }

    /// Whether a silence timeout at `now` closes the turn. Records the
    /// completion when it does.
    pub fn on_silence_timeout(&mut self, now: Instant) -> bool {
        if !self.user_spoke {
            return false;
        }
        if let Some(last) = self.last_completion {
            if now.saturating_duration_since(last) < self.debounce {
                return false;
            }
        }
        self.user_spoke = false;
        self.last_completion = Some(now);
        true
    }

    /// Forget the in-flight turn after a failed send.
    pub fn abort_turn(&mut self) {
        self.user_spoke = false;
    }

    /// Model audio arrived. Returns true when this starts a speaking run.
    pub fn on_model_audio(&mut self, now: Instant) -> bool {
        self.last_model_audio = Some(now);
        !std::mem::replace(&mut self.model_speaking, true)
    }

    /// Turn complete or interruption. Returns true if the model was speaking.
    pub fn on_model_turn_end(&mut self) -> bool {
        std::mem::replace(&mut self.model_speaking, false)
    }

    /// Clear the speaking flag once the timeout since the last model audio
    /// has elapsed. Returns true when it was cleared by this call.
    pub fn expire_speaking(&mut self, now: Instant) -> bool {
        if !self.model_speaking {
            return false;
        }
        let expired = self
            .last_model_audio
            .is_none_or(|last| now.saturating_duration_since(last) >= self.speaking_timeout);
        if expired {
            self.model_speaking = false;
        }
        expired
    }

    pub fn is_model_speaking(&self) -> bool {
        self.model_speaking
    }
}
