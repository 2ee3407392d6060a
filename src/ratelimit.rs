// src/ratelimit.rs
use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// Per-(command, caller) cooldown gate for operator commands.
/// - First call always allowed.
/// - Inside cooldown, calls are refused with the seconds left.
/// - Allowed calls are recorded immediately.
#[derive(Debug, Clone, Default)]
pub struct CommandCooldown {
    last_used: HashMap<(String, String), DateTime<Utc>>,
}

impl CommandCooldown {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Ok(())` and record the call, or `Err(secs_remaining)`.
    /// `cooldown_secs` < 0 is treated as 0 (no cooldown).
    pub fn check(
        &mut self,
        command: &str,
        caller: &str,
        cooldown_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<(), i64> {
        let cooldown = ChronoDuration::seconds(cooldown_secs.max(0));
        let key = (command.to_string(), caller.to_string());

        if let Some(last) = self.last_used.get(&key) {
            let remaining = cooldown - now.signed_duration_since(*last);
            if remaining > ChronoDuration::zero() {
                // Round partial seconds up so "0s" is never shown.
                let ms = remaining.num_milliseconds();
                return Err((ms + 999) / 1000);
            }
        }

        self.last_used.insert(key, now);
        self.cleanup(command, cooldown, now);
        Ok(())
    }

    fn cleanup(&mut self, command: &str, cooldown: ChronoDuration, now: DateTime<Utc>) {
        self.last_used
            .retain(|(cmd, _), ts| cmd != command || now.signed_duration_since(*ts) <= cooldown);
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.last_used.len()
    }
}

/// `65` -> `1m 5s`, `120` -> `2m`, `9` -> `9s`.
pub fn format_wait(secs: i64) -> String {
    if secs >= 60 {
        let (m, s) = (secs / 60, secs % 60);
        if s > 0 {
            format!("{m}m {s}s")
        } else {
            format!("{m}m")
        }
    } else {
        format!("{secs}s")
    }
}
