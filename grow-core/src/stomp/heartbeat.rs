use std::time::Duration;

/// Upper bound for a negotiated interval. Timers are armed at `now + interval`
/// and must not overflow.
pub const MAX_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;

/// The `heart-beat` header: `outgoing,incoming` in milliseconds, 0 meaning
/// "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    pub outgoing_ms: u64,
    pub incoming_ms: u64,
}

impl HeartBeat {
    pub fn new(outgoing_ms: u64, incoming_ms: u64) -> Self {
        Self {
            outgoing_ms,
            incoming_ms,
        }
    }

    /// Missing or unparsable headers mean no heart-beating.
    pub fn parse(header: Option<&str>) -> Self {
        let Some((out, inc)) = header.and_then(|h| h.split_once(',')) else {
            return Self::default();
        };
        Self {
            outgoing_ms: out.trim().parse().unwrap_or(0),
            incoming_ms: inc.trim().parse().unwrap_or(0),
        }
    }

    pub fn header_value(&self) -> String {
        format!("{},{}", self.outgoing_ms, self.incoming_ms)
    }

    /// Resolves the intervals for the side that sent `self` after receiving
    /// `remote`. Returns `(send_every, expect_every)`.
    pub fn negotiate(&self, remote: &HeartBeat) -> (Option<Duration>, Option<Duration>) {
        let send = interval(self.outgoing_ms, remote.incoming_ms);
        let expect = interval(self.incoming_ms, remote.outgoing_ms);
        (send, expect)
    }
}

fn interval(local: u64, remote: u64) -> Option<Duration> {
    if local == 0 || remote == 0 {
        return None;
    }
    Some(Duration::from_millis(local.max(remote).min(MAX_INTERVAL_MS)))
}

/// How long a peer may stay silent before its connection is considered dead.
pub fn dead_after(expect_every: Duration) -> Duration {
    expect_every.saturating_mul(2)
}
