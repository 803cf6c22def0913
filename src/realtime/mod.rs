//! Real-time change propagation.
//!
//! Server side: [`ChangeNotifier`] fans [`ChangeEvent`]s out to every
//! channel subscriber. Client side: [`RealtimeClient`] keeps a connection
//! alive with backoff, and [`LiveRefresh`] turns events (or, while the
//! channel is down, a polling timer) into coalesced refreshes through
//! [`RefreshController`].

mod client;
mod consumer;
mod event;
mod notifier;
mod refresh;
mod state;

#[cfg(test)]
mod refresh_test;

pub use client::{
    ChannelError, ChannelFrame, Connector, EventStream, RealtimeClient, Subscription,
    SubscriptionHandle, WsConnector,
};
pub use consumer::LiveRefresh;
pub use event::{ChangeEvent, ChangeOperation};
pub use notifier::ChangeNotifier;
pub use refresh::{RefreshController, RefreshError, RefreshOutcome};
pub use state::{
    Backoff, ChannelEffect, ChannelSignal, ChannelState, ChannelStateMachine, FallbackPoller,
    PollerEffect,
};
