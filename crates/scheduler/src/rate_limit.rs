//! Pool-wide task start limiter.
//!
//! Token bucket of capacity `R` where each token refills one second after it
//! was spent. That makes the guarantee exact: no 1-second window ever holds
//! more than `R` starts. Callers without a token wait; nothing is rejected.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(1);

pub struct RateLimiter {
    per_second: u32,
    /// Start instants of the tokens currently spent, oldest first.
    spent: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// `per_second == 0` disables limiting.
    pub fn new(per_second: u32) -> Self {
        Self {
            per_second,
            spent: Mutex::new(VecDeque::with_capacity(per_second as usize)),
        }
    }

    pub fn per_second(&self) -> u32 {
        self.per_second
    }

    /// Wait for a token and consume it.
    pub async fn acquire(&self) {
        if self.per_second == 0 {
            return;
        }
        loop {
            let wait = {
                let mut spent = self.spent.lock().await;
                let now = Instant::now();
                refill(&mut spent, now);
                match spent.front() {
                    Some(oldest) if spent.len() >= self.per_second as usize => {
                        WINDOW.saturating_sub(now.duration_since(*oldest))
                    }
                    _ => {
                        spent.push_back(now);
                        return;
                    }
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens available right now (`None` when unlimited).
    pub async fn available(&self) -> Option<u32> {
        if self.per_second == 0 {
            return None;
        }
        let mut spent = self.spent.lock().await;
        refill(&mut spent, Instant::now());
        Some(self.per_second.saturating_sub(spent.len() as u32))
    }
}

fn refill(spent: &mut VecDeque<Instant>, now: Instant) {
    while let Some(oldest) = spent.front() {
        if now.duration_since(*oldest) >= WINDOW {
            spent.pop_front();
        } else {
            break;
        }
    }
}
