use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use salvo::prelude::*;
use secrecy::SecretString;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::{RedemptionConfig, WebConfig};
use crate::events::ChatEvent;
use crate::registry::MappingRegistry;

pub mod handlers;
pub mod metrics;
pub mod middleware;

use self::middleware::auth::create_router;

pub struct WebState {
    pub registry: Arc<MappingRegistry>,
    pub events_tx: mpsc::Sender<ChatEvent>,
    pub redemption: RedemptionConfig,
    pub admin_token: Option<SecretString>,
    pub started_at: Instant,
}

impl WebState {
    pub fn new(
        registry: Arc<MappingRegistry>,
        events_tx: mpsc::Sender<ChatEvent>,
        redemption: RedemptionConfig,
        admin_token: Option<&str>,
    ) -> Self {
        Self {
            registry,
            events_tx,
            redemption,
            admin_token: admin_token
                .filter(|token| !token.is_empty())
                .map(|token| SecretString::from(token.to_string())),
            started_at: Instant::now(),
        }
    }
}

/// Puts the shared state into every request's depot.
struct InjectState(Arc<WebState>);

#[async_trait]
impl Handler for InjectState {
    async fn handle(&self, _req: &mut Request, depot: &mut Depot, _res: &mut Response, _ctrl: &mut FlowCtrl) {
        depot.inject(self.0.clone());
    }
}

/// Shared state of the current request, absent when the router was built
/// without it.
pub fn web_state(depot: &Depot) -> Option<Arc<WebState>> {
    depot.obtain::<Arc<WebState>>().ok().cloned()
}

pub fn service(state: Arc<WebState>) -> Service {
    Service::new(Router::new().hoop(InjectState(state)).push(create_router()))
}

pub struct WebServer {
    config: WebConfig,
    state: Arc<WebState>,
}

impl WebServer {
    pub fn new(config: WebConfig, state: WebState) -> Self {
        Self {
            config,
            state: Arc::new(state),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let bind_addr = format!("{}:{}", self.config.bind_address, self.config.port);
        info!("starting admin web server on {}", bind_addr);
        if self.state.admin_token.is_none() {
            info!("admin token not configured, admin routes are unauthenticated");
        }

        let acceptor = TcpListener::new(bind_addr).bind().await;
        Server::new(acceptor).serve(service(self.state.clone())).await;

        Ok(())
    }
}
