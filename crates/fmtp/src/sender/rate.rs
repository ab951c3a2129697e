// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Token-bucket rate shaper for multicast egress.
//!
//! Single consumer: only the egress thread calls [`RateShaper::consume`],
//! which blocks the caller once the sustained rate is exceeded. `set_rate`
//! may be called from any thread; the new rate takes effect on the next
//! consume. Bucket capacity is one second's worth of bytes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug)]
struct Bucket {
    /// Byte credit; may go negative transiently while we sleep it off.
    available: f64,
    last_refill: Instant,
}

/// Blocking token bucket over bits/second.
pub struct RateShaper {
    rate_bps: AtomicU64,
    bucket: Mutex<Bucket>,
}

impl RateShaper {
    /// `rate_bps` = sustained rate in bits/second; 0 disables shaping.
    pub fn new(rate_bps: u64) -> RateShaper {
        RateShaper {
            rate_bps: AtomicU64::new(rate_bps),
            bucket: Mutex::new(Bucket {
                available: 0.0,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn set_rate(&self, rate_bps: u64) {
        self.rate_bps.store(rate_bps, Ordering::Relaxed);
    }

    pub fn rate(&self) -> u64 {
        self.rate_bps.load(Ordering::Relaxed)
    }

    /// Account for `bytes` about to hit the wire, sleeping as needed to
    /// hold the sustained rate.
    pub fn consume(&self, bytes: usize) {
        let rate = self.rate_bps.load(Ordering::Relaxed);
        if rate == 0 {
            return;
        }
        let byte_rate = rate as f64 / 8.0;

        let sleep_for = {
            let mut bucket = self.bucket.lock();
            let now = Instant::now();
            let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
            bucket.last_refill = now;
            bucket.available = (bucket.available + elapsed * byte_rate).min(byte_rate);
            bucket.available -= bytes as f64;
            if bucket.available < 0.0 {
                Some(Duration::from_secs_f64(-bucket.available / byte_rate))
            } else {
                None
            }
        };

        if let Some(dur) = sleep_for {
            std::thread::sleep(dur);
        }
    }
}
