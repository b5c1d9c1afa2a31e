use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::db::DestinationKey;
use crate::events::ChatEvent;
use crate::moderation::ModerationMirror;
use crate::pipeline::MessagePipeline;
use crate::platform::ChatPlatform;
use crate::registry::MappingRegistry;
use crate::utils::formatting::preview_text;
use crate::web::metrics::Metrics;
use crate::webhook_cache::WebhookCache;

pub mod dedup;
pub mod delivery;
pub mod logic;

pub use self::dedup::DedupWindow;
pub use self::delivery::DeliveryOutcome;
pub use self::logic::{DispatchReport, DropReason};

use self::delivery::{Courier, Lanes};
use self::logic::{summarize, unique_destinations};

/// Deliveries queued for one event.
pub struct PendingDispatch {
    dedup_key: String,
    state: PendingState,
}

enum PendingState {
    Dropped(DropReason),
    InFlight(Vec<(DestinationKey, oneshot::Receiver<DeliveryOutcome>)>),
}

impl PendingDispatch {
    /// Waits for every destination of the event to settle.
    pub async fn settle(self) -> DispatchReport {
        let receivers = match self.state {
            PendingState::Dropped(reason) => return DispatchReport::Dropped(reason),
            PendingState::InFlight(receivers) => receivers,
        };

        let waits = receivers.into_iter().map(|(key, rx)| async move {
            rx.await.unwrap_or_else(|_| {
                DeliveryOutcome::Failed(format!("delivery lane {key} stopped"))
            })
        });
        let outcomes = futures::future::join_all(waits).await;

        for outcome in &outcomes {
            match outcome {
                DeliveryOutcome::Delivered { .. } => Metrics::delivery_succeeded(),
                DeliveryOutcome::Failed(_) => Metrics::delivery_failed(),
                DeliveryOutcome::Command(_) => Metrics::command_handled(),
                DeliveryOutcome::Skipped => {}
            }
        }

        let report = summarize(&outcomes);
        debug!("event {} settled: {:?}", self.dedup_key, report);
        report
    }
}

/// Fans inbound chat events out to every mapped destination.
pub struct Dispatcher {
    registry: Arc<MappingRegistry>,
    pipeline: Arc<MessagePipeline>,
    dedup: DedupWindow,
    lanes: Lanes,
}

impl Dispatcher {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        registry: Arc<MappingRegistry>,
        pipeline: Arc<MessagePipeline>,
        webhooks: Arc<WebhookCache>,
        dedup: DedupWindow,
        delivery_timeout: Duration,
    ) -> Self {
        let settings = pipeline.settings();
        let mirror = Arc::new(ModerationMirror::new(
            platform.clone(),
            webhooks.clone(),
            &settings.webhook_name,
            &settings.webhook_avatar_url,
            &settings.reserved_marker,
        ));
        let courier = Arc::new(Courier::new(
            platform,
            pipeline.clone(),
            webhooks,
            mirror,
            delivery_timeout,
        ));
        Self {
            registry,
            pipeline,
            dedup,
            lanes: Lanes::new(courier),
        }
    }

    /// Dedups, resolves and queues the event on its destination lanes, so
    /// per-destination order follows call order. Lookups run in the background.
    pub fn enqueue(&self, event: ChatEvent) -> PendingDispatch {
        Metrics::event_received();
        let dedup_key = event.dedup_key.clone();
        let dropped = |reason| PendingDispatch {
            dedup_key: dedup_key.clone(),
            state: PendingState::Dropped(reason),
        };

        if !self.dedup.first_seen(&event.dedup_key) {
            Metrics::event_deduplicated();
            debug!("dropping duplicate event {}", event.dedup_key);
            return dropped(DropReason::Duplicate);
        }

        let Some(mapping) = self.registry.find_by_source(&event.source_channel) else {
            Metrics::event_dropped();
            debug!("no destinations for source={}", event.source_channel);
            return dropped(DropReason::Unmapped);
        };
        let destinations = unique_destinations(&mapping);

        debug!(
            "dispatching {} from {} in {} to {} destinations preview={}",
            event.kind.as_str(),
            event.source_user,
            event.source_channel,
            destinations.len(),
            preview_text(&event.display_text)
        );

        let pipeline = self.pipeline.clone();
        let prepared = async move { Arc::new(pipeline.prepare_event(event).await) }
            .boxed()
            .shared();
        // start the lookups now rather than when the first lane gets to them
        tokio::spawn(prepared.clone());
        let receivers = destinations
            .into_iter()
            .map(|destination| {
                let key = destination.key();
                (key, self.lanes.enqueue(prepared.clone(), destination))
            })
            .collect();

        PendingDispatch {
            dedup_key,
            state: PendingState::InFlight(receivers),
        }
    }

    pub async fn dispatch(&self, event: ChatEvent) -> DispatchReport {
        self.enqueue(event).settle().await
    }

    /// Consumes events until every producer is gone. The loop never waits on
    /// a lookup or a destination.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<ChatEvent>) {
        info!("dispatcher started");
        while let Some(event) = events.recv().await {
            let pending = self.enqueue(event);
            tokio::spawn(async move {
                if let DispatchReport::Delivered { failed, .. } = pending.settle().await {
                    if failed > 0 {
                        warn!("{} deliveries failed", failed);
                    }
                }
            });
        }
        info!("dispatcher stopped, {} delivery lanes idle", self.lanes.len());
    }
}
