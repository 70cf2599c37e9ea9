//! Application state shared across handlers

use std::sync::Arc;

use crate::claims::ClaimService;
use crate::config::Config;
use crate::escrow::EscrowService;
use crate::notifications::Notifier;
use crate::webhooks::WebhookReconciler;
use crate::websocket::WsState;

use axum::extract::FromRef;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub escrow_service: Arc<EscrowService>,
    pub claim_service: Arc<ClaimService>,
    pub reconciler: Arc<WebhookReconciler>,
    pub notifier: Arc<Notifier>,
    pub ws_state: WsState,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        escrow_service: Arc<EscrowService>,
        claim_service: Arc<ClaimService>,
        reconciler: Arc<WebhookReconciler>,
        notifier: Arc<Notifier>,
        ws_state: WsState,
        config: Arc<Config>,
    ) -> Self {
        Self {
            escrow_service,
            claim_service,
            reconciler,
            notifier,
            ws_state,
            config,
        }
    }

    /// Dispatch domain events to the notification outbox and the WebSocket
    /// broadcast
    pub async fn publish_events(&self, events: &[crate::escrow::DomainEvent]) {
        self.notifier.dispatch(events).await;
        self.ws_state.broadcast(events);
    }
}

impl FromRef<AppState> for WsState {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.ws_state.clone()
    }
}

impl FromRef<AppState> for Arc<EscrowService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.escrow_service.clone()
    }
}

impl FromRef<AppState> for Arc<ClaimService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.claim_service.clone()
    }
}

impl FromRef<AppState> for Arc<WebhookReconciler> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.reconciler.clone()
    }
}
