use std::collections::VecDeque;

use bytes::Bytes;
use tokio::time::{Duration, Instant, Interval, MissedTickBehavior};

/// A ping waiting for its pong.
#[derive(Debug)]
struct PendingPing {
    payload: Bytes,
    sent_at: Instant,
}

/// Registry of pings sent on the current connection, keyed by payload.
///
/// Holds both keepalive pings and pings sent by the caller. Pongs with an
/// unknown payload are ignored.
#[derive(Debug, Default)]
pub struct PendingPings {
    pending: VecDeque<PendingPing>,
}

impl PendingPings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, payload: Bytes) {
        self.pending.push_back(PendingPing {
            payload,
            sent_at: Instant::now(),
        });
    }

    pub fn contains(&self, payload: &[u8]) -> bool {
        self.pending.iter().any(|ping| ping.payload == payload)
    }

    /// Removes the oldest ping with this payload and returns its round trip time.
    pub fn on_pong(&mut self, payload: &[u8]) -> Option<Duration> {
        let index = self
            .pending
            .iter()
            .position(|ping| ping.payload == payload)?;

        self.pending
            .remove(index)
            .map(|ping| ping.sent_at.elapsed())
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// What to do when the keepalive timer fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// Send a ping with this payload.
    Ping(Bytes),
    /// The previous keepalive ping was never answered.
    Dead,
}

/// Periodic liveness pings for one open connection.
#[derive(Debug)]
pub struct Keepalive {
    interval: Interval,
    nonce: u64,
    outstanding: Option<Bytes>,
}

impl Keepalive {
    /// The first ping is due one `period` from now.
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            interval,
            nonce: 0,
            outstanding: None,
        }
    }

    /// Completes when the next ping is due. Cancel safe.
    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }

    /// Decides the action for a fired tick, given the pings still waiting for a pong.
    pub fn on_tick(&mut self, pings: &PendingPings) -> Tick {
        if let Some(outstanding) = &self.outstanding {
            if pings.contains(outstanding) {
                return Tick::Dead;
            }
        }

        self.nonce = self.nonce.wrapping_add(1);

        let payload = Bytes::copy_from_slice(&self.nonce.to_be_bytes());
        self.outstanding = Some(payload.clone());

        Tick::Ping(payload)
    }
}
