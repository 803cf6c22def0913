//! Keeps a view fresh from channel events, polling while the channel is down.

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use super::client::{Subscription, SubscriptionHandle};
use super::event::ChangeEvent;
use super::refresh::RefreshController;
use super::state::{FallbackPoller, PollerEffect};

/// Wires a [`Subscription`] to a [`RefreshController`].
///
/// Every change event requests a refresh. While the channel is not live a
/// timer requests one every `poll_interval`; when the channel comes back
/// the timer stops and one catch-up refresh covers anything missed.
pub struct LiveRefresh;

impl LiveRefresh {
    pub fn start(
        subscription: Subscription,
        controller: RefreshController,
        poll_interval: Duration,
    ) -> SubscriptionHandle {
        SubscriptionHandle::spawn(move |cancel| async move {
            let mut connected = subscription.connection_state();
            let mut subscription = Some(subscription);
            let mut watching = true;
            let mut poller = FallbackPoller::new();
            let mut timer = None;

            apply(
                poller.on_connection_change(*connected.borrow_and_update()),
                &mut timer,
                poll_interval,
                &controller,
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = next_event(&mut subscription) => match event {
                        Some(event) => {
                            debug!(
                                "Refreshing after {} {} change",
                                event.entity_type, event.entity_id
                            );
                            trigger(&controller);
                        }
                        None => {
                            debug!("Event stream ended");
                            subscription = None;
                        }
                    },
                    changed = connected.changed(), if watching => {
                        let is_live = match changed {
                            Ok(()) => *connected.borrow_and_update(),
                            Err(_) => {
                                watching = false;
                                false
                            }
                        };
                        apply(
                            poller.on_connection_change(is_live),
                            &mut timer,
                            poll_interval,
                            &controller,
                        );
                    }
                    _ = tick(&mut timer) => {
                        debug!("Fallback poll");
                        trigger(&controller);
                    }
                }
            }
        })
    }
}

fn apply(
    effect: PollerEffect,
    timer: &mut Option<Interval>,
    poll_interval: Duration,
    controller: &RefreshController,
) {
    match effect {
        PollerEffect::StartTimer => {
            info!("Polling every {:?} until the channel is live", poll_interval);
            let mut interval =
                tokio::time::interval_at(Instant::now() + poll_interval, poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            *timer = Some(interval);
        }
        PollerEffect::StopTimer { catch_up } => {
            info!("Channel live, polling stopped");
            *timer = None;
            if catch_up {
                trigger(controller);
            }
        }
        PollerEffect::None => {}
    }
}

/// Fire and forget; the controller folds overlapping requests together.
fn trigger(controller: &RefreshController) {
    let controller = controller.clone();
    tokio::spawn(async move {
        let _ = controller.request_refresh().await;
    });
}

async fn next_event(subscription: &mut Option<Subscription>) -> Option<ChangeEvent> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
