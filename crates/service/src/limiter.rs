//! Per-IP rate limiting for expensive handlers.
//!
//! One bucket per declared risk class. The window is sliding: a hit is
//! admitted only if fewer than `count` hits landed in the last `window`,
//! under any arrival pattern. Buckets are process-local; a denied hit
//! produces a denial packet upstream, never a dropped connection.

use std::{
    collections::VecDeque,
    net::IpAddr,
    time::{Duration, Instant},
};

use ahash::{HashMap, HashMapExt};
use parking_lot::Mutex;

/// The only class declared today: credential hellos on the auth
/// service.
pub const AUTH_CLASS: &str = "auth";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub window: Duration,
    pub count: usize,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            count: 5,
        }
    }
}

pub struct RateLimiter {
    classes: HashMap<&'static str, RateLimit>,
    hits: Mutex<HashMap<(&'static str, IpAddr), VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(classes: &[(&'static str, RateLimit)]) -> Self {
        Self {
            classes: classes.iter().copied().collect(),
            hits: Mutex::new(HashMap::new()),
        }
    }

    /// Record a hit for `(class, ip)` and report whether it is admitted.
    /// Classes that were never declared admit everything.
    pub fn admit(&self, class: &'static str, ip: IpAddr) -> bool {
        self.admit_at(class, ip, Instant::now())
    }

    pub fn admit_at(&self, class: &'static str, ip: IpAddr, now: Instant) -> bool {
        let Some(limit) = self.classes.get(class) else {
            return true;
        };

        let mut hits = self.hits.lock();
        let bucket = hits.entry((class, ip.to_canonical())).or_default();

        while let Some(oldest) = bucket.front() {
            if now.duration_since(*oldest) >= limit.window {
                bucket.pop_front();
            } else {
                break;
            }
        }

        if bucket.len() < limit.count {
            bucket.push_back(now);
            true
        } else {
            false
        }
    }
}
