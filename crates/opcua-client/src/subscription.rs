//! Subscriptions, monitored items and the publish loop.
//!
//! The engine keeps N = max(2, subscription count) Publish requests parked on
//! the server so there is always one to answer into. Responses are processed
//! on a single task, so callbacks for one subscription fire in notification
//! order. Acknowledgements ride on the next PublishRequest; acks drained into
//! a failed publish are re-queued rather than lost.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinSet;

use opcua_core::types::{DataValue, ExtensionObject, NodeId, StatusCode, Variant};

use crate::error::{Error, Result};
use crate::messages::subscription::{
    CreateMonitoredItemsRequest, CreateMonitoredItemsResponse, CreateSubscriptionRequest,
    CreateSubscriptionResponse, DeleteMonitoredItemsRequest, DeleteMonitoredItemsResponse,
    DeleteSubscriptionsRequest, DeleteSubscriptionsResponse, ModifyMonitoredItemsRequest,
    ModifyMonitoredItemsResponse, ModifySubscriptionRequest, ModifySubscriptionResponse,
    MonitoredItemCreateRequest, MonitoredItemModifyRequest, MonitoringParameters,
    NotificationMessage, NotificationPayload, PublishRequest, PublishResponse, RepublishRequest,
    RepublishResponse, SetMonitoringModeRequest, SetMonitoringModeResponse,
    SetPublishingModeRequest, SetPublishingModeResponse, SubscriptionAcknowledgement,
    TransferSubscriptionsRequest, TransferSubscriptionsResponse,
};
use crate::messages::attributes::ReadValueId;
use crate::messages::{MonitoringMode, TimestampsToReturn};
use crate::session::Session;

/// A keep-alive gap of this multiple of the expected silent period marks the
/// subscription dead.
const KEEP_ALIVE_SLACK: f64 = 1.5;

// ── User-facing types ─────────────────────────────────────────────────────────

pub type DataChangeCallback = Arc<dyn Fn(u32, DataValue) + Send + Sync>;
pub type EventCallback = Arc<dyn Fn(u32, Vec<Variant>) + Send + Sync>;

/// Where notifications for one monitored item go.
#[derive(Clone)]
pub enum MonitoredItemCallback {
    DataChange(DataChangeCallback),
    Event(EventCallback),
}

impl MonitoredItemCallback {
    pub fn on_data_change(f: impl Fn(u32, DataValue) + Send + Sync + 'static) -> Self {
        MonitoredItemCallback::DataChange(Arc::new(f))
    }

    pub fn on_event(f: impl Fn(u32, Vec<Variant>) + Send + Sync + 'static) -> Self {
        MonitoredItemCallback::Event(Arc::new(f))
    }
}

#[derive(Clone)]
pub struct SubscriptionOptions {
    pub publishing_interval_ms: f64,
    pub lifetime_count: u32,
    pub max_keep_alive_count: u32,
    pub max_notifications_per_publish: u32,
    pub publishing_enabled: bool,
    pub priority: u8,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        SubscriptionOptions {
            publishing_interval_ms: 1000.0,
            lifetime_count: 60,
            max_keep_alive_count: 10,
            max_notifications_per_publish: 0,
            publishing_enabled: true,
            priority: 0,
        }
    }
}

/// One item to monitor, with its delivery callback.
#[derive(Clone)]
pub struct MonitoredItemSpec {
    pub node_id: NodeId,
    pub attribute_id: u32,
    pub sampling_interval_ms: f64,
    pub queue_size: u32,
    pub discard_oldest: bool,
    pub monitoring_mode: MonitoringMode,
    pub filter: ExtensionObject,
    pub callback: MonitoredItemCallback,
}

impl MonitoredItemSpec {
    /// Value-attribute data changes with defaults.
    pub fn value(node_id: NodeId, callback: MonitoredItemCallback) -> Self {
        MonitoredItemSpec {
            node_id,
            attribute_id: crate::messages::attribute_id::VALUE,
            sampling_interval_ms: -1.0,
            queue_size: 10,
            discard_oldest: true,
            monitoring_mode: MonitoringMode::Reporting,
            filter: ExtensionObject::NULL,
            callback,
        }
    }
}

/// Per-item creation outcome. A bad status is data, not an error.
#[derive(Debug, Clone)]
pub struct MonitoredItemOutcome {
    pub client_handle: u32,
    pub status: StatusCode,
    pub monitored_item_id: u32,
    pub revised_sampling_interval_ms: f64,
    pub revised_queue_size: u32,
}

/// Snapshot of one subscription's revised parameters.
#[derive(Debug, Clone)]
pub struct SubscriptionInfo {
    pub subscription_id: u32,
    pub publishing_interval_ms: f64,
    pub lifetime_count: u32,
    pub max_keep_alive_count: u32,
    pub publishing_enabled: bool,
    pub alive: bool,
    pub monitored_items: usize,
}

// ── Internal state ────────────────────────────────────────────────────────────

struct ItemEntry {
    monitored_item_id: u32,
    callback: MonitoredItemCallback,
}

#[derive(Clone, Copy)]
struct RevisedParameters {
    publishing_interval_ms: f64,
    lifetime_count: u32,
    max_keep_alive_count: u32,
}

struct SubscriptionState {
    id: u32,
    revised: Mutex<RevisedParameters>,
    publishing_enabled: AtomicBool,
    items: DashMap<u32, ItemEntry>,
    pending_acks: Mutex<Vec<u32>>,
    last_sequence: AtomicU32,
    last_activity: Mutex<Instant>,
    alive: AtomicBool,
}

impl SubscriptionState {
    /// Longest silence before the subscription is presumed dead.
    fn keep_alive_deadline(&self) -> Duration {
        let revised = self.revised.lock().expect("not poisoned");
        let ms = revised.publishing_interval_ms
            * f64::from(revised.max_keep_alive_count.max(1))
            * KEEP_ALIVE_SLACK;
        Duration::from_millis(ms.max(1000.0) as u64)
    }

    fn touch(&self) {
        *self.last_activity.lock().expect("not poisoned") = Instant::now();
    }
}

enum LoopDirective {
    Continue,
    Stop,
}

struct EngineInner {
    session: Arc<Session>,
    subscriptions: DashMap<u32, Arc<SubscriptionState>>,
    next_client_handle: AtomicU32,
    /// Reduction of the outstanding-publish target after
    /// Bad_TooManyPublishRequests.
    publish_backoff: AtomicUsize,
    publish_timeout_ms: u32,
    loop_running: Mutex<bool>,
    shutdown: watch::Sender<bool>,
}

pub(crate) struct SubscriptionEngine {
    inner: Arc<EngineInner>,
}

impl SubscriptionEngine {
    pub fn new(session: Arc<Session>, publish_timeout_ms: u32) -> Self {
        let (shutdown, _) = watch::channel(false);
        SubscriptionEngine {
            inner: Arc::new(EngineInner {
                session,
                subscriptions: DashMap::new(),
                next_client_handle: AtomicU32::new(1),
                publish_backoff: AtomicUsize::new(0),
                publish_timeout_ms,
                loop_running: Mutex::new(false),
                shutdown,
            }),
        }
    }

    /// Stop the publish loop. Safe from Drop.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
    }

    // ── Subscription lifecycle ────────────────────────────────────────────────

    pub async fn create_subscription(&self, options: SubscriptionOptions) -> Result<u32> {
        let request = CreateSubscriptionRequest {
            request_header: self.inner.session.new_request_header()?,
            requested_publishing_interval: options.publishing_interval_ms,
            requested_lifetime_count: options.lifetime_count,
            requested_max_keep_alive_count: options.max_keep_alive_count,
            max_notifications_per_publish: options.max_notifications_per_publish,
            publishing_enabled: options.publishing_enabled,
            priority: options.priority,
        };
        let response: CreateSubscriptionResponse =
            self.inner.session.dispatcher().call(&request).await?;

        let state = Arc::new(SubscriptionState {
            id: response.subscription_id,
            revised: Mutex::new(RevisedParameters {
                publishing_interval_ms: response.revised_publishing_interval,
                lifetime_count: response.revised_lifetime_count,
                max_keep_alive_count: response.revised_max_keep_alive_count,
            }),
            publishing_enabled: AtomicBool::new(options.publishing_enabled),
            items: DashMap::new(),
            pending_acks: Mutex::new(Vec::new()),
            last_sequence: AtomicU32::new(0),
            last_activity: Mutex::new(Instant::now()),
            alive: AtomicBool::new(true),
        });
        tracing::info!(
            subscription_id = state.id,
            revised_interval_ms = response.revised_publishing_interval,
            revised_keep_alive = response.revised_max_keep_alive_count,
            "subscription created"
        );
        self.inner.subscriptions.insert(state.id, state);
        self.ensure_publish_loop();
        Ok(response.subscription_id)
    }

    pub async fn modify_subscription(
        &self,
        subscription_id: u32,
        options: SubscriptionOptions,
    ) -> Result<()> {
        let request = ModifySubscriptionRequest {
            request_header: self.inner.session.new_request_header()?,
            subscription_id,
            requested_publishing_interval: options.publishing_interval_ms,
            requested_lifetime_count: options.lifetime_count,
            requested_max_keep_alive_count: options.max_keep_alive_count,
            max_notifications_per_publish: options.max_notifications_per_publish,
            priority: options.priority,
        };
        let response: ModifySubscriptionResponse =
            self.inner.session.dispatcher().call(&request).await?;
        if let Some(state) = self.inner.subscriptions.get(&subscription_id) {
            *state.revised.lock().expect("not poisoned") = RevisedParameters {
                publishing_interval_ms: response.revised_publishing_interval,
                lifetime_count: response.revised_lifetime_count,
                max_keep_alive_count: response.revised_max_keep_alive_count,
            };
        }
        Ok(())
    }

    pub async fn set_publishing_mode(
        &self,
        subscription_ids: &[u32],
        enabled: bool,
    ) -> Result<Vec<StatusCode>> {
        let request = SetPublishingModeRequest {
            request_header: self.inner.session.new_request_header()?,
            publishing_enabled: enabled,
            subscription_ids: Some(subscription_ids.to_vec()),
        };
        let response: SetPublishingModeResponse =
            self.inner.session.dispatcher().call(&request).await?;
        let results = response.results.unwrap_or_default();
        for (id, status) in subscription_ids.iter().zip(&results) {
            if status.is_good() {
                if let Some(state) = self.inner.subscriptions.get(id) {
                    state.publishing_enabled.store(enabled, Ordering::SeqCst);
                }
            }
        }
        Ok(results)
    }

    pub async fn transfer_subscriptions(
        &self,
        subscription_ids: &[u32],
        send_initial_values: bool,
    ) -> Result<Vec<StatusCode>> {
        let request = TransferSubscriptionsRequest {
            request_header: self.inner.session.new_request_header()?,
            subscription_ids: Some(subscription_ids.to_vec()),
            send_initial_values,
        };
        let response: TransferSubscriptionsResponse =
            self.inner.session.dispatcher().call(&request).await?;
        Ok(response
            .results
            .unwrap_or_default()
            .into_iter()
            .map(|r| r.status_code)
            .collect())
    }

    pub async fn delete_subscriptions(&self, subscription_ids: &[u32]) -> Result<Vec<StatusCode>> {
        let request = DeleteSubscriptionsRequest {
            request_header: self.inner.session.new_request_header()?,
            subscription_ids: Some(subscription_ids.to_vec()),
        };
        let response: DeleteSubscriptionsResponse =
            self.inner.session.dispatcher().call(&request).await?;
        // Gone on the server either way; outstanding publishes for these ids
        // will come back Bad and are ignored by the loop.
        for id in subscription_ids {
            self.inner.subscriptions.remove(id);
        }
        Ok(response.results.unwrap_or_default())
    }

    pub fn subscription_info(&self, subscription_id: u32) -> Option<SubscriptionInfo> {
        let state = self.inner.subscriptions.get(&subscription_id)?;
        let revised = *state.revised.lock().expect("not poisoned");
        Some(SubscriptionInfo {
            subscription_id,
            publishing_interval_ms: revised.publishing_interval_ms,
            lifetime_count: revised.lifetime_count,
            max_keep_alive_count: revised.max_keep_alive_count,
            publishing_enabled: state.publishing_enabled.load(Ordering::SeqCst),
            alive: state.alive.load(Ordering::SeqCst),
            monitored_items: state.items.len(),
        })
    }

    // ── Monitored items ───────────────────────────────────────────────────────

    pub async fn create_monitored_items(
        &self,
        subscription_id: u32,
        specs: Vec<MonitoredItemSpec>,
    ) -> Result<Vec<MonitoredItemOutcome>> {
        if specs.is_empty() {
            return Err(Error::usage("create_monitored_items needs at least one item"));
        }
        let state = self
            .inner
            .subscriptions
            .get(&subscription_id)
            .ok_or_else(|| Error::usage(format!("unknown subscription {subscription_id}")))?
            .clone();

        let handles: Vec<u32> = specs
            .iter()
            .map(|_| self.inner.next_client_handle.fetch_add(1, Ordering::Relaxed))
            .collect();
        let items_to_create = specs
            .iter()
            .zip(&handles)
            .map(|(spec, handle)| MonitoredItemCreateRequest {
                item_to_monitor: ReadValueId {
                    node_id: spec.node_id.clone(),
                    attribute_id: spec.attribute_id,
                    index_range: None,
                    data_encoding: Default::default(),
                },
                monitoring_mode: spec.monitoring_mode,
                requested_parameters: MonitoringParameters {
                    client_handle: *handle,
                    sampling_interval: spec.sampling_interval_ms,
                    filter: spec.filter.clone(),
                    queue_size: spec.queue_size,
                    discard_oldest: spec.discard_oldest,
                },
            })
            .collect();

        let request = CreateMonitoredItemsRequest {
            request_header: self.inner.session.new_request_header()?,
            subscription_id,
            timestamps_to_return: TimestampsToReturn::Both,
            items_to_create: Some(items_to_create),
        };
        let response: CreateMonitoredItemsResponse =
            self.inner.session.dispatcher().call(&request).await?;
        let results = response.results.unwrap_or_default();

        let mut outcomes = Vec::with_capacity(results.len());
        for ((spec, handle), result) in specs.into_iter().zip(handles).zip(results) {
            if result.status_code.is_good() {
                state.items.insert(
                    handle,
                    ItemEntry {
                        monitored_item_id: result.monitored_item_id,
                        callback: spec.callback,
                    },
                );
            }
            outcomes.push(MonitoredItemOutcome {
                client_handle: handle,
                status: result.status_code,
                monitored_item_id: result.monitored_item_id,
                revised_sampling_interval_ms: result.revised_sampling_interval,
                revised_queue_size: result.revised_queue_size,
            });
        }
        Ok(outcomes)
    }

    /// Revise sampling parameters of existing items, addressed by client
    /// handle.
    pub async fn modify_monitored_items(
        &self,
        subscription_id: u32,
        changes: &[(u32, MonitoringParameters)],
    ) -> Result<Vec<StatusCode>> {
        let state = self
            .inner
            .subscriptions
            .get(&subscription_id)
            .ok_or_else(|| Error::usage(format!("unknown subscription {subscription_id}")))?
            .clone();
        let items_to_modify = changes
            .iter()
            .map(|(handle, parameters)| {
                let monitored_item_id = state
                    .items
                    .get(handle)
                    .map(|item| item.monitored_item_id)
                    .ok_or_else(|| Error::usage(format!("unknown client handle {handle}")))?;
                let mut parameters = parameters.clone();
                // The handle stays stable across modifications.
                parameters.client_handle = *handle;
                Ok(MonitoredItemModifyRequest {
                    monitored_item_id,
                    requested_parameters: parameters,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let request = ModifyMonitoredItemsRequest {
            request_header: self.inner.session.new_request_header()?,
            subscription_id,
            timestamps_to_return: TimestampsToReturn::Both,
            items_to_modify: Some(items_to_modify),
        };
        let response: ModifyMonitoredItemsResponse =
            self.inner.session.dispatcher().call(&request).await?;
        Ok(response
            .results
            .unwrap_or_default()
            .into_iter()
            .map(|r| r.status_code)
            .collect())
    }

    pub async fn set_monitoring_mode(
        &self,
        subscription_id: u32,
        client_handles: &[u32],
        mode: MonitoringMode,
    ) -> Result<Vec<StatusCode>> {
        let state = self
            .inner
            .subscriptions
            .get(&subscription_id)
            .ok_or_else(|| Error::usage(format!("unknown subscription {subscription_id}")))?
            .clone();
        let monitored_item_ids = self.server_ids(&state, client_handles)?;
        let request = SetMonitoringModeRequest {
            request_header: self.inner.session.new_request_header()?,
            subscription_id,
            monitoring_mode: mode,
            monitored_item_ids: Some(monitored_item_ids),
        };
        let response: SetMonitoringModeResponse =
            self.inner.session.dispatcher().call(&request).await?;
        Ok(response.results.unwrap_or_default())
    }

    pub async fn delete_monitored_items(
        &self,
        subscription_id: u32,
        client_handles: &[u32],
    ) -> Result<Vec<StatusCode>> {
        let state = self
            .inner
            .subscriptions
            .get(&subscription_id)
            .ok_or_else(|| Error::usage(format!("unknown subscription {subscription_id}")))?
            .clone();
        let monitored_item_ids = self.server_ids(&state, client_handles)?;
        let request = DeleteMonitoredItemsRequest {
            request_header: self.inner.session.new_request_header()?,
            subscription_id,
            monitored_item_ids: Some(monitored_item_ids),
        };
        let response: DeleteMonitoredItemsResponse =
            self.inner.session.dispatcher().call(&request).await?;
        let results = response.results.unwrap_or_default();
        for (handle, status) in client_handles.iter().zip(&results) {
            if status.is_good() {
                state.items.remove(handle);
            }
        }
        Ok(results)
    }

    fn server_ids(&self, state: &SubscriptionState, client_handles: &[u32]) -> Result<Vec<u32>> {
        client_handles
            .iter()
            .map(|handle| {
                state
                    .items
                    .get(handle)
                    .map(|item| item.monitored_item_id)
                    .ok_or_else(|| Error::usage(format!("unknown client handle {handle}")))
            })
            .collect()
    }

    /// Recover a missed notification by sequence number.
    pub async fn republish(
        &self,
        subscription_id: u32,
        sequence_number: u32,
    ) -> Result<NotificationMessage> {
        let request = RepublishRequest {
            request_header: self.inner.session.new_request_header()?,
            subscription_id,
            retransmit_sequence_number: sequence_number,
        };
        let response: RepublishResponse = self.inner.session.dispatcher().call(&request).await?;
        Ok(response.notification_message)
    }

    // ── Publish loop ──────────────────────────────────────────────────────────

    fn ensure_publish_loop(&self) {
        let mut running = self.inner.loop_running.lock().expect("not poisoned");
        if !*running {
            *running = true;
            let inner = self.inner.clone();
            let shutdown = self.inner.shutdown.subscribe();
            tokio::spawn(publish_loop(inner, shutdown));
        }
    }
}

impl EngineInner {
    fn target_outstanding(&self) -> usize {
        let base = self.subscriptions.len().max(2);
        base.saturating_sub(self.publish_backoff.load(Ordering::SeqCst))
            .max(1)
    }

    /// Drain every subscription's pending acks into one request.
    fn drain_acks(&self) -> Vec<SubscriptionAcknowledgement> {
        let mut acks = Vec::new();
        for entry in self.subscriptions.iter() {
            let mut pending = entry.pending_acks.lock().expect("not poisoned");
            acks.extend(pending.drain(..).map(|sequence_number| {
                SubscriptionAcknowledgement {
                    subscription_id: entry.id,
                    sequence_number,
                }
            }));
        }
        acks
    }

    fn requeue_acks(&self, acks: Vec<SubscriptionAcknowledgement>) {
        for ack in acks {
            if let Some(state) = self.subscriptions.get(&ack.subscription_id) {
                state
                    .pending_acks
                    .lock()
                    .expect("not poisoned")
                    .push(ack.sequence_number);
            }
        }
    }

    async fn publish_once(
        self: Arc<Self>,
    ) -> (Vec<SubscriptionAcknowledgement>, Result<PublishResponse>) {
        let acks = self.drain_acks();
        let header = match self
            .session
            .new_request_header_with_timeout(self.publish_timeout_ms)
        {
            Ok(header) => header,
            Err(e) => return (acks, Err(e)),
        };
        let request = PublishRequest {
            request_header: header,
            subscription_acknowledgements: Some(acks.clone()),
        };
        let result = self.session.dispatcher().call(&request).await;
        (acks, result)
    }

    fn handle_publish_response(&self, response: PublishResponse) {
        let state = match self.subscriptions.get(&response.subscription_id) {
            Some(state) => state.clone(),
            None => {
                tracing::debug!(
                    subscription_id = response.subscription_id,
                    "publish response for unknown subscription dropped"
                );
                return;
            }
        };
        state.touch();
        state.alive.store(true, Ordering::SeqCst);

        for (ack, status) in response
            .results
            .unwrap_or_default()
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_bad())
        {
            tracing::debug!(subscription_id = state.id, index = ack, status = %status, "ack rejected");
        }

        let message = response.notification_message;
        if message.is_keep_alive() {
            tracing::trace!(subscription_id = state.id, "keep-alive");
            return;
        }

        // Within a subscription, sequence numbers strictly increase.
        let last = state.last_sequence.load(Ordering::SeqCst);
        if last != 0 && message.sequence_number <= last {
            tracing::warn!(
                subscription_id = state.id,
                sequence = message.sequence_number,
                last,
                "out-of-order notification dropped"
            );
            return;
        }
        state
            .last_sequence
            .store(message.sequence_number, Ordering::SeqCst);
        state
            .pending_acks
            .lock()
            .expect("not poisoned")
            .push(message.sequence_number);

        for object in message.notification_data.unwrap_or_default() {
            match NotificationPayload::from_extension_object(object) {
                Ok(NotificationPayload::DataChange(notification)) => {
                    for item in notification.monitored_items.unwrap_or_default() {
                        self.deliver_data_change(&state, item.client_handle, item.value);
                    }
                }
                Ok(NotificationPayload::Events(notification)) => {
                    for event in notification.events.unwrap_or_default() {
                        self.deliver_event(
                            &state,
                            event.client_handle,
                            event.event_fields.unwrap_or_default(),
                        );
                    }
                }
                Ok(NotificationPayload::StatusChange(notification)) => {
                    tracing::warn!(
                        subscription_id = state.id,
                        status = %notification.status,
                        "subscription status change"
                    );
                    if notification.status.is_bad() {
                        state.alive.store(false, Ordering::SeqCst);
                    }
                }
                Ok(NotificationPayload::Unknown(object)) => {
                    tracing::debug!(
                        subscription_id = state.id,
                        type_id = %object.type_id,
                        "unknown notification payload preserved"
                    );
                }
                Err(e) => {
                    tracing::warn!(subscription_id = state.id, error = %e, "notification decode failed");
                }
            }
        }
    }

    fn deliver_data_change(&self, state: &SubscriptionState, client_handle: u32, value: DataValue) {
        match state.items.get(&client_handle) {
            Some(item) => match &item.callback {
                MonitoredItemCallback::DataChange(callback) => callback(client_handle, value),
                MonitoredItemCallback::Event(_) => {
                    tracing::warn!(client_handle, "data change for an event item dropped")
                }
            },
            None => tracing::debug!(client_handle, "data change for unknown handle dropped"),
        }
    }

    fn deliver_event(&self, state: &SubscriptionState, client_handle: u32, fields: Vec<Variant>) {
        match state.items.get(&client_handle) {
            Some(item) => match &item.callback {
                MonitoredItemCallback::Event(callback) => callback(client_handle, fields),
                MonitoredItemCallback::DataChange(_) => {
                    tracing::warn!(client_handle, "event for a data-change item dropped")
                }
            },
            None => tracing::debug!(client_handle, "event for unknown handle dropped"),
        }
    }

    fn handle_publish_error(&self, error: &Error) -> LoopDirective {
        match error.status_code() {
            Some(StatusCode::BAD_TOO_MANY_PUBLISH_REQUESTS) => {
                let backoff = self.publish_backoff.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::debug!(backoff, "server throttles publish pipeline");
                LoopDirective::Continue
            }
            Some(StatusCode::BAD_SESSION_CLOSED) | Some(StatusCode::BAD_SESSION_ID_INVALID) => {
                tracing::warn!("session gone, stopping publish loop");
                self.mark_all_dead();
                LoopDirective::Stop
            }
            Some(StatusCode::BAD_NO_SUBSCRIPTION)
            | Some(StatusCode::BAD_SUBSCRIPTION_ID_INVALID) => LoopDirective::Continue,
            Some(status) => {
                tracing::warn!(%status, "publish failed");
                LoopDirective::Continue
            }
            None => match error {
                Error::Timeout => LoopDirective::Continue,
                Error::ChannelClosed | Error::Transport(_) => {
                    tracing::warn!(error = %error, "channel gone, stopping publish loop");
                    self.mark_all_dead();
                    LoopDirective::Stop
                }
                other => {
                    tracing::warn!(error = %other, "publish failed");
                    LoopDirective::Continue
                }
            },
        }
    }

    fn mark_all_dead(&self) {
        for entry in self.subscriptions.iter() {
            entry.alive.store(false, Ordering::SeqCst);
        }
    }

    fn check_keep_alive_deadlines(&self) {
        for entry in self.subscriptions.iter() {
            if !entry.alive.load(Ordering::SeqCst) {
                continue;
            }
            let elapsed = entry.last_activity.lock().expect("not poisoned").elapsed();
            let deadline = entry.keep_alive_deadline();
            if elapsed > deadline {
                tracing::warn!(
                    subscription_id = entry.id,
                    silent_ms = elapsed.as_millis() as u64,
                    deadline_ms = deadline.as_millis() as u64,
                    "no publish response within keep-alive window, subscription presumed dead"
                );
                entry.alive.store(false, Ordering::SeqCst);
            }
        }
    }
}

async fn publish_loop(inner: Arc<EngineInner>, mut shutdown: watch::Receiver<bool>) {
    tracing::debug!("publish loop started");
    let mut inflight: JoinSet<(Vec<SubscriptionAcknowledgement>, Result<PublishResponse>)> =
        JoinSet::new();
    let mut watchdog = tokio::time::interval(Duration::from_secs(1));
    watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }
        if inner.subscriptions.is_empty() && inflight.is_empty() {
            // Double-check under the running flag so a concurrent
            // create_subscription cannot observe a live flag on a dead loop.
            let mut running = inner.loop_running.lock().expect("not poisoned");
            if inner.subscriptions.is_empty() {
                *running = false;
                tracing::debug!("publish loop stopped, no subscriptions");
                return;
            }
            continue;
        }

        let target = inner.target_outstanding();
        while !inner.subscriptions.is_empty() && inflight.len() < target {
            let inner = inner.clone();
            inflight.spawn(async move { inner.publish_once().await });
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = watchdog.tick() => inner.check_keep_alive_deadlines(),
            joined = inflight.join_next() => match joined {
                Some(Ok((_acks, Ok(response)))) => {
                    inner.handle_publish_response(response);
                }
                Some(Ok((acks, Err(error)))) => {
                    inner.requeue_acks(acks);
                    if matches!(inner.handle_publish_error(&error), LoopDirective::Stop) {
                        break;
                    }
                }
                Some(Err(join_error)) => {
                    tracing::warn!(error = %join_error, "publish task panicked");
                }
                None => {}
            },
        }
    }

    inflight.abort_all();
    *inner.loop_running.lock().expect("not poisoned") = false;
    tracing::debug!("publish loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_match_protocol_expectations() {
        let options = SubscriptionOptions::default();
        assert_eq!(options.publishing_interval_ms, 1000.0);
        assert!(options.publishing_enabled);
        assert_eq!(options.max_notifications_per_publish, 0);
    }

    #[test]
    fn keep_alive_deadline_scales_with_interval_and_count() {
        let state = SubscriptionState {
            id: 1,
            revised: Mutex::new(RevisedParameters {
                publishing_interval_ms: 1000.0,
                lifetime_count: 60,
                max_keep_alive_count: 10,
            }),
            publishing_enabled: AtomicBool::new(true),
            items: DashMap::new(),
            pending_acks: Mutex::new(Vec::new()),
            last_sequence: AtomicU32::new(0),
            last_activity: Mutex::new(Instant::now()),
            alive: AtomicBool::new(true),
        };
        // 1000 ms × 10 × 1.5
        assert_eq!(state.keep_alive_deadline(), Duration::from_millis(15_000));
    }

    #[test]
    fn monitored_item_spec_value_defaults() {
        let spec = MonitoredItemSpec::value(
            NodeId::numeric(2, 42),
            MonitoredItemCallback::on_data_change(|_, _| {}),
        );
        assert_eq!(spec.attribute_id, crate::messages::attribute_id::VALUE);
        assert_eq!(spec.monitoring_mode, MonitoringMode::Reporting);
        assert!(spec.discard_oldest);
    }
}
