//! Connection state machines for the client side of the channel.
//!
//! Both machines are pure: they take a signal and return the side effects
//! the driver must perform. Timers and sockets live in the driver, so the
//! transitions can be exercised without a network or a clock.

use std::time::Duration;

/// Client leg of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

/// Input to [`ChannelStateMachine::handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSignal {
    /// Client started
    Start,
    /// Transport handshake completed
    Connected,
    /// Connect attempt failed or an open connection dropped
    Fault,
    /// Reconnect delay elapsed
    RetryDue,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEffect {
    /// Start a connect attempt
    OpenConnection,
    /// Publish the new `is_connected` value to consumers
    SetLive(bool),
    /// Signal [`ChannelSignal::RetryDue`] after the delay
    ScheduleReconnect(Duration),
}

/// Capped exponential backoff that never gives up.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            attempt: 0,
        }
    }

    /// Delay before the next attempt; doubles per call up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(16));
        self.attempt = self.attempt.saturating_add(1);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

/// `Disconnected -> Connecting -> Connected -> (fault) -> Disconnected -> (backoff) -> Connecting ...`
#[derive(Debug, Clone)]
pub struct ChannelStateMachine {
    state: ChannelState,
    backoff: Backoff,
}

impl ChannelStateMachine {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: ChannelState::Disconnected,
            backoff,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ChannelState::Connected
    }

    /// Apply a signal. Signals that make no sense in the current state are
    /// ignored and produce no effects.
    pub fn handle(&mut self, signal: ChannelSignal) -> Vec<ChannelEffect> {
        use ChannelSignal as S;
        use ChannelState::*;

        match (self.state, signal) {
            (Disconnected, S::Start | S::RetryDue) => {
                self.state = Connecting;
                vec![ChannelEffect::OpenConnection]
            }
            (Connecting, S::Connected) => {
                self.state = Connected;
                self.backoff.reset();
                vec![ChannelEffect::SetLive(true)]
            }
            (Connecting, S::Fault) => {
                self.state = Disconnected;
                vec![ChannelEffect::ScheduleReconnect(self.backoff.next_delay())]
            }
            (Connected, S::Fault) => {
                self.state = Disconnected;
                vec![
                    ChannelEffect::SetLive(false),
                    ChannelEffect::ScheduleReconnect(self.backoff.next_delay()),
                ]
            }
            _ => Vec::new(),
        }
    }
}

/// Timer decision of [`FallbackPoller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerEffect {
    StartTimer,
    /// Stop polling; `catch_up` asks for one refresh to cover events
    /// missed while the channel was down.
    StopTimer { catch_up: bool },
    None,
}

/// Runs the fallback polling timer only while the channel is not live.
#[derive(Debug, Clone, Default)]
pub struct FallbackPoller {
    timer_running: bool,
}

impl FallbackPoller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timer_running(&self) -> bool {
        self.timer_running
    }

    pub fn on_connection_change(&mut self, connected: bool) -> PollerEffect {
        match (connected, self.timer_running) {
            (true, true) => {
                self.timer_running = false;
                PollerEffect::StopTimer { catch_up: true }
            }
            (false, false) => {
                self.timer_running = true;
                PollerEffect::StartTimer
            }
            _ => PollerEffect::None,
        }
    }
}
