//! Clock and token sources.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::model::BookingToken;

/// Length of generated lookup tokens.
pub const TOKEN_LENGTH: usize = 32;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at a given instant, for deterministic runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a clock that always reports `time`.
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Source of unguessable lookup tokens.
pub trait TokenGenerator: Send + Sync {
    /// Produce a fresh token.
    fn generate(&self) -> BookingToken;
}

/// Alphanumeric tokens drawn from the thread-local CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomTokenGenerator;

impl TokenGenerator for RandomTokenGenerator {
    fn generate(&self) -> BookingToken {
        let token = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();
        BookingToken(token)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn random_tokens_are_alphanumeric_and_distinct() {
        let generator = RandomTokenGenerator;
        let tokens: HashSet<String> = (0..256).map(|_| generator.generate().0).collect();

        assert_eq!(tokens.len(), 256, "tokens must not repeat");
        assert!(
            tokens
                .iter()
                .all(|token| token.len() == TOKEN_LENGTH
                    && token.chars().all(|ch| ch.is_ascii_alphanumeric())),
            "tokens must be {TOKEN_LENGTH} alphanumeric characters"
        );
    }

    #[test]
    fn fixed_clock_does_not_move() {
        let clock = FixedClock::new(Utc::now());
        assert_eq!(clock.now(), clock.now(), "fixed clock must be stable");
    }
}
