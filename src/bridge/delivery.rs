use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::db::{Destination, DestinationKey};
use crate::error::RelayError;
use crate::events::ChatEventKind;
use crate::moderation::ModerationMirror;
use crate::pipeline::{InlineCommand, MessagePipeline, PipelineOutcome, PreparedEvent};
use crate::platform::ChatPlatform;
use crate::utils::formatting::preview_text;
use crate::webhook_cache::WebhookCache;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { message_id: String },
    Command(InlineCommand),
    Skipped,
    Failed(String),
}

/// Per-event lookups, started once and awaited by every lane of the event.
pub type SharedPrepared = Shared<BoxFuture<'static, Arc<PreparedEvent>>>;

struct DeliveryJob {
    prepared: SharedPrepared,
    destination: Destination,
    done: oneshot::Sender<DeliveryOutcome>,
}

/// Runs one event against one destination.
pub struct Courier {
    platform: Arc<dyn ChatPlatform>,
    pipeline: Arc<MessagePipeline>,
    webhooks: Arc<WebhookCache>,
    mirror: Arc<ModerationMirror>,
    timeout: Duration,
}

impl Courier {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        pipeline: Arc<MessagePipeline>,
        webhooks: Arc<WebhookCache>,
        mirror: Arc<ModerationMirror>,
        timeout: Duration,
    ) -> Self {
        Self {
            platform,
            pipeline,
            webhooks,
            mirror,
            timeout,
        }
    }

    async fn deliver(&self, prepared: &PreparedEvent, destination: &Destination) -> DeliveryOutcome {
        let message = match self.pipeline.render(prepared, destination).await {
            PipelineOutcome::Forward(message) => message,
            PipelineOutcome::CommandHandled(command) => return DeliveryOutcome::Command(command),
            PipelineOutcome::Empty => return DeliveryOutcome::Skipped,
        };

        let settings = self.pipeline.settings();
        let handle = match self
            .webhooks
            .get_or_create(destination, &settings.webhook_name, &settings.webhook_avatar_url)
            .await
        {
            Ok(handle) => handle,
            Err(e) => return DeliveryOutcome::Failed(e.to_string()),
        };

        match self.platform.send_via_webhook(&handle, &message).await {
            Ok(message_id) => {
                debug!(
                    "delivered to destination={} message={} preview={}",
                    destination.key(),
                    message_id,
                    preview_text(&message.content)
                );
                DeliveryOutcome::Delivered { message_id }
            }
            Err(e) => {
                self.webhooks.evict(destination);
                let err = RelayError::DeliveryFailed {
                    channel_id: destination.channel_id.clone(),
                    reason: e.to_string(),
                };
                DeliveryOutcome::Failed(err.to_string())
            }
        }
    }

    async fn run_job(&self, job: DeliveryJob) {
        let DeliveryJob {
            prepared,
            destination,
            done,
        } = job;

        let prepared = prepared.await;
        let outcome = match tokio::time::timeout(self.timeout, self.deliver(&prepared, &destination)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.webhooks.evict(&destination);
                DeliveryOutcome::Failed(format!("timed out after {:?}", self.timeout))
            }
        };
        if let DeliveryOutcome::Failed(reason) = &outcome {
            warn!(
                "{} {} for destination={} failed: {}",
                prepared.event.kind.as_str(),
                prepared.event.dedup_key,
                destination.key(),
                reason
            );
        }

        let notice_id = match &outcome {
            DeliveryOutcome::Delivered { message_id } => Some(message_id.clone()),
            _ => None,
        };
        // the receiver may have stopped listening
        let _ = done.send(outcome);

        if prepared.event.kind.is_moderation() {
            let user = prepared.event.source_user.as_str();
            let mirrored = async {
                match prepared.event.kind {
                    ChatEventKind::Ban => {
                        self.mirror
                            .on_ban(&destination, user, notice_id.as_deref())
                            .await
                    }
                    _ => self.mirror.on_unban(&destination, user).await,
                }
            };
            if tokio::time::timeout(self.timeout, mirrored).await.is_err() {
                warn!(
                    "moderation mirror for {} in destination={} timed out",
                    user,
                    destination.key()
                );
            }
        }
    }
}

/// One ordered queue per destination. A slow destination only delays itself.
pub struct Lanes {
    courier: Arc<Courier>,
    lanes: Mutex<HashMap<DestinationKey, mpsc::UnboundedSender<DeliveryJob>>>,
}

impl Lanes {
    pub fn new(courier: Arc<Courier>) -> Self {
        Self {
            courier,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    fn spawn_lane(&self, key: &DestinationKey) -> mpsc::UnboundedSender<DeliveryJob> {
        let (tx, mut rx) = mpsc::unbounded_channel::<DeliveryJob>();
        let courier = self.courier.clone();
        let lane = key.to_string();
        tokio::spawn(async move {
            debug!("delivery lane {} started", lane);
            while let Some(job) = rx.recv().await {
                courier.run_job(job).await;
            }
            debug!("delivery lane {} stopped", lane);
        });
        tx
    }

    /// Queues the event behind earlier jobs for the same destination.
    pub fn enqueue(
        &self,
        prepared: SharedPrepared,
        destination: Destination,
    ) -> oneshot::Receiver<DeliveryOutcome> {
        let (done, outcome) = oneshot::channel();
        let key = destination.key();
        let mut job = DeliveryJob {
            prepared,
            destination,
            done,
        };

        let mut lanes = self.lanes.lock();
        if let Some(tx) = lanes.get(&key) {
            match tx.send(job) {
                Ok(()) => return outcome,
                Err(mpsc::error::SendError(returned)) => job = returned,
            }
        }

        let tx = self.spawn_lane(&key);
        if tx.send(job).is_err() {
            warn!("delivery lane {} closed before its first job", key);
        }
        lanes.insert(key, tx);
        outcome
    }

    pub fn len(&self) -> usize {
        self.lanes.lock().len()
    }
}
