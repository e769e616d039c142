use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Data channel wire protocol: bare text tags, no payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMessage {
    Ping,
    Pong,
}

impl ProbeMessage {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "ping" => Some(ProbeMessage::Ping),
            "pong" => Some(ProbeMessage::Pong),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeMessage::Ping => "ping",
            ProbeMessage::Pong => "pong",
        }
    }
}

/// One completed ping/pong exchange
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySample {
    pub ping_sent_at: Instant,
    pub pong_received_at: Instant,
    /// Round-trip time in milliseconds
    pub rtt: f64,
    /// Half the round trip, in milliseconds
    pub estimated_one_way_latency: f64,
}

impl LatencySample {
    pub fn measure(ping_sent_at: Instant, pong_received_at: Instant) -> Self {
        // Saturating: a pong can never be reported as earlier than its ping.
        let rtt = pong_received_at
            .saturating_duration_since(ping_sent_at)
            .as_nanos() as f64
            / 1_000_000.0;
        Self {
            ping_sent_at,
            pong_received_at,
            rtt,
            estimated_one_way_latency: rtt / 2.0,
        }
    }
}

/// Per-peer sampling state for one open data channel.
///
/// Holds at most one ping in flight, the current and previous sample, and the
/// timer for the next ping. Dropping the prober aborts that timer.
#[derive(Debug, Default)]
pub struct LatencyProber {
    in_flight: Option<Instant>,
    current: Option<LatencySample>,
    previous: Option<LatencySample>,
    next_ping: Option<JoinHandle<()>>,
}

impl LatencyProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ping_sent(&mut self, at: Instant) {
        self.in_flight = Some(at);
    }

    pub fn has_ping_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Close out the in-flight ping; `None` if no ping was outstanding
    pub fn pong_received(&mut self, at: Instant) -> Option<LatencySample> {
        let sent = self.in_flight.take()?;
        let sample = LatencySample::measure(sent, at);
        self.previous = self.current.replace(sample);
        Some(sample)
    }

    pub fn current(&self) -> Option<&LatencySample> {
        self.current.as_ref()
    }

    pub fn previous(&self) -> Option<&LatencySample> {
        self.previous.as_ref()
    }

    /// Difference between the last two round trips, in milliseconds
    pub fn jitter(&self) -> Option<f64> {
        match (&self.current, &self.previous) {
            (Some(current), Some(previous)) => Some((current.rtt - previous.rtt).abs()),
            _ => None,
        }
    }

    /// Track the timer for the next ping, aborting any earlier one
    pub fn schedule(&mut self, timer: JoinHandle<()>) {
        if let Some(old) = self.next_ping.replace(timer) {
            old.abort();
        }
    }

    /// The scheduled ping has fired
    pub fn timer_fired(&mut self) {
        self.next_ping = None;
    }

    /// Abort the scheduled ping and forget the in-flight one
    pub fn cancel(&mut self) {
        if let Some(timer) = self.next_ping.take() {
            timer.abort();
        }
        self.in_flight = None;
    }
}

impl Drop for LatencyProber {
    fn drop(&mut self) {
        self.cancel();
    }
}
