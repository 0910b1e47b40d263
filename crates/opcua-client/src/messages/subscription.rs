//! Subscription, monitored-item and publish services, plus the notification
//! payloads the publish loop routes.

use opcua_core::types::{
    ByteString, DataValue, DateTime, DiagnosticInfo, ExtensionObject, RequestHeader,
    ResponseHeader, StatusCode, Variant,
};

use super::attributes::ReadValueId;
use super::{
    binary_struct, impl_service_request, impl_service_response, MonitoringMode,
    TimestampsToReturn,
};

pub const CREATE_MONITORED_ITEMS_REQUEST_TYPE_ID: u32 = 751;
pub const CREATE_MONITORED_ITEMS_RESPONSE_TYPE_ID: u32 = 754;
pub const MODIFY_MONITORED_ITEMS_REQUEST_TYPE_ID: u32 = 757;
pub const MODIFY_MONITORED_ITEMS_RESPONSE_TYPE_ID: u32 = 760;
pub const SET_MONITORING_MODE_REQUEST_TYPE_ID: u32 = 769;
pub const SET_MONITORING_MODE_RESPONSE_TYPE_ID: u32 = 772;
pub const DELETE_MONITORED_ITEMS_REQUEST_TYPE_ID: u32 = 781;
pub const DELETE_MONITORED_ITEMS_RESPONSE_TYPE_ID: u32 = 784;
pub const CREATE_SUBSCRIPTION_REQUEST_TYPE_ID: u32 = 787;
pub const CREATE_SUBSCRIPTION_RESPONSE_TYPE_ID: u32 = 790;
pub const MODIFY_SUBSCRIPTION_REQUEST_TYPE_ID: u32 = 793;
pub const MODIFY_SUBSCRIPTION_RESPONSE_TYPE_ID: u32 = 796;
pub const SET_PUBLISHING_MODE_REQUEST_TYPE_ID: u32 = 799;
pub const SET_PUBLISHING_MODE_RESPONSE_TYPE_ID: u32 = 802;
pub const PUBLISH_REQUEST_TYPE_ID: u32 = 826;
pub const PUBLISH_RESPONSE_TYPE_ID: u32 = 829;
pub const REPUBLISH_REQUEST_TYPE_ID: u32 = 832;
pub const REPUBLISH_RESPONSE_TYPE_ID: u32 = 835;
pub const TRANSFER_SUBSCRIPTIONS_REQUEST_TYPE_ID: u32 = 841;
pub const TRANSFER_SUBSCRIPTIONS_RESPONSE_TYPE_ID: u32 = 844;
pub const DELETE_SUBSCRIPTIONS_REQUEST_TYPE_ID: u32 = 847;
pub const DELETE_SUBSCRIPTIONS_RESPONSE_TYPE_ID: u32 = 850;

pub const DATA_CHANGE_NOTIFICATION_TYPE_ID: u32 = 811;
pub const STATUS_CHANGE_NOTIFICATION_TYPE_ID: u32 = 820;
pub const EVENT_NOTIFICATION_LIST_TYPE_ID: u32 = 916;

// ── Subscription lifecycle ────────────────────────────────────────────────────

binary_struct! {
    pub struct CreateSubscriptionRequest {
        pub request_header: RequestHeader,
        /// Milliseconds between publish cycles.
        pub requested_publishing_interval: f64,
        /// Cycles the server keeps the subscription alive without publishes.
        pub requested_lifetime_count: u32,
        /// Cycles between keep-alive notifications on an idle subscription.
        pub requested_max_keep_alive_count: u32,
        /// 0 means no limit.
        pub max_notifications_per_publish: u32,
        pub publishing_enabled: bool,
        pub priority: u8,
    }
}

impl_service_request!(CreateSubscriptionRequest, CREATE_SUBSCRIPTION_REQUEST_TYPE_ID);

binary_struct! {
    pub struct CreateSubscriptionResponse {
        pub response_header: ResponseHeader,
        pub subscription_id: u32,
        pub revised_publishing_interval: f64,
        pub revised_lifetime_count: u32,
        pub revised_max_keep_alive_count: u32,
    }
}

impl_service_response!(CreateSubscriptionResponse, CREATE_SUBSCRIPTION_RESPONSE_TYPE_ID);

binary_struct! {
    pub struct ModifySubscriptionRequest {
        pub request_header: RequestHeader,
        pub subscription_id: u32,
        pub requested_publishing_interval: f64,
        pub requested_lifetime_count: u32,
        pub requested_max_keep_alive_count: u32,
        pub max_notifications_per_publish: u32,
        pub priority: u8,
    }
}

impl_service_request!(ModifySubscriptionRequest, MODIFY_SUBSCRIPTION_REQUEST_TYPE_ID);

binary_struct! {
    pub struct ModifySubscriptionResponse {
        pub response_header: ResponseHeader,
        pub revised_publishing_interval: f64,
        pub revised_lifetime_count: u32,
        pub revised_max_keep_alive_count: u32,
    }
}

impl_service_response!(ModifySubscriptionResponse, MODIFY_SUBSCRIPTION_RESPONSE_TYPE_ID);

binary_struct! {
    pub struct SetPublishingModeRequest {
        pub request_header: RequestHeader,
        pub publishing_enabled: bool,
        pub subscription_ids: Option<Vec<u32>>,
    }
}

impl_service_request!(SetPublishingModeRequest, SET_PUBLISHING_MODE_REQUEST_TYPE_ID);

binary_struct! {
    pub struct SetPublishingModeResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<StatusCode>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

impl_service_response!(SetPublishingModeResponse, SET_PUBLISHING_MODE_RESPONSE_TYPE_ID);

binary_struct! {
    pub struct TransferResult {
        pub status_code: StatusCode,
        pub available_sequence_numbers: Option<Vec<u32>>,
    }
}

binary_struct! {
    pub struct TransferSubscriptionsRequest {
        pub request_header: RequestHeader,
        pub subscription_ids: Option<Vec<u32>>,
        pub send_initial_values: bool,
    }
}

impl_service_request!(
    TransferSubscriptionsRequest,
    TRANSFER_SUBSCRIPTIONS_REQUEST_TYPE_ID
);

binary_struct! {
    pub struct TransferSubscriptionsResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<TransferResult>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

impl_service_response!(
    TransferSubscriptionsResponse,
    TRANSFER_SUBSCRIPTIONS_RESPONSE_TYPE_ID
);

binary_struct! {
    pub struct DeleteSubscriptionsRequest {
        pub request_header: RequestHeader,
        pub subscription_ids: Option<Vec<u32>>,
    }
}

impl_service_request!(DeleteSubscriptionsRequest, DELETE_SUBSCRIPTIONS_REQUEST_TYPE_ID);

binary_struct! {
    pub struct DeleteSubscriptionsResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<StatusCode>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

impl_service_response!(DeleteSubscriptionsResponse, DELETE_SUBSCRIPTIONS_RESPONSE_TYPE_ID);

// ── Monitored items ───────────────────────────────────────────────────────────

binary_struct! {
    pub struct MonitoringParameters {
        /// Echoed in every notification; routes to the user callback.
        pub client_handle: u32,
        /// Milliseconds; -1 inherits the publishing interval.
        pub sampling_interval: f64,
        pub filter: ExtensionObject,
        pub queue_size: u32,
        pub discard_oldest: bool,
    }
}

binary_struct! {
    pub struct MonitoredItemCreateRequest {
        pub item_to_monitor: ReadValueId,
        pub monitoring_mode: MonitoringMode,
        pub requested_parameters: MonitoringParameters,
    }
}

binary_struct! {
    pub struct MonitoredItemCreateResult {
        pub status_code: StatusCode,
        pub monitored_item_id: u32,
        pub revised_sampling_interval: f64,
        pub revised_queue_size: u32,
        pub filter_result: ExtensionObject,
    }
}

binary_struct! {
    pub struct CreateMonitoredItemsRequest {
        pub request_header: RequestHeader,
        pub subscription_id: u32,
        pub timestamps_to_return: TimestampsToReturn,
        pub items_to_create: Option<Vec<MonitoredItemCreateRequest>>,
    }
}

impl_service_request!(
    CreateMonitoredItemsRequest,
    CREATE_MONITORED_ITEMS_REQUEST_TYPE_ID
);

binary_struct! {
    pub struct CreateMonitoredItemsResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<MonitoredItemCreateResult>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

impl_service_response!(
    CreateMonitoredItemsResponse,
    CREATE_MONITORED_ITEMS_RESPONSE_TYPE_ID
);

binary_struct! {
    pub struct MonitoredItemModifyRequest {
        pub monitored_item_id: u32,
        pub requested_parameters: MonitoringParameters,
    }
}

binary_struct! {
    pub struct MonitoredItemModifyResult {
        pub status_code: StatusCode,
        pub revised_sampling_interval: f64,
        pub revised_queue_size: u32,
        pub filter_result: ExtensionObject,
    }
}

binary_struct! {
    pub struct ModifyMonitoredItemsRequest {
        pub request_header: RequestHeader,
        pub subscription_id: u32,
        pub timestamps_to_return: TimestampsToReturn,
        pub items_to_modify: Option<Vec<MonitoredItemModifyRequest>>,
    }
}

impl_service_request!(
    ModifyMonitoredItemsRequest,
    MODIFY_MONITORED_ITEMS_REQUEST_TYPE_ID
);

binary_struct! {
    pub struct ModifyMonitoredItemsResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<MonitoredItemModifyResult>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

impl_service_response!(
    ModifyMonitoredItemsResponse,
    MODIFY_MONITORED_ITEMS_RESPONSE_TYPE_ID
);

binary_struct! {
    pub struct SetMonitoringModeRequest {
        pub request_header: RequestHeader,
        pub subscription_id: u32,
        pub monitoring_mode: MonitoringMode,
        pub monitored_item_ids: Option<Vec<u32>>,
    }
}

impl_service_request!(SetMonitoringModeRequest, SET_MONITORING_MODE_REQUEST_TYPE_ID);

binary_struct! {
    pub struct SetMonitoringModeResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<StatusCode>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

impl_service_response!(SetMonitoringModeResponse, SET_MONITORING_MODE_RESPONSE_TYPE_ID);

binary_struct! {
    pub struct DeleteMonitoredItemsRequest {
        pub request_header: RequestHeader,
        pub subscription_id: u32,
        pub monitored_item_ids: Option<Vec<u32>>,
    }
}

impl_service_request!(
    DeleteMonitoredItemsRequest,
    DELETE_MONITORED_ITEMS_REQUEST_TYPE_ID
);

binary_struct! {
    pub struct DeleteMonitoredItemsResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<StatusCode>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

impl_service_response!(
    DeleteMonitoredItemsResponse,
    DELETE_MONITORED_ITEMS_RESPONSE_TYPE_ID
);

// ── Publish ───────────────────────────────────────────────────────────────────

binary_struct! {
    pub struct SubscriptionAcknowledgement {
        pub subscription_id: u32,
        pub sequence_number: u32,
    }
}

binary_struct! {
    pub struct PublishRequest {
        pub request_header: RequestHeader,
        pub subscription_acknowledgements: Option<Vec<SubscriptionAcknowledgement>>,
    }
}

impl_service_request!(PublishRequest, PUBLISH_REQUEST_TYPE_ID);

binary_struct! {
    /// One notification cycle. Empty `notification_data` is a keep-alive.
    pub struct NotificationMessage {
        pub sequence_number: u32,
        pub publish_time: DateTime,
        pub notification_data: Option<Vec<ExtensionObject>>,
    }
}

impl NotificationMessage {
    pub fn is_keep_alive(&self) -> bool {
        self.notification_data
            .as_deref()
            .map_or(true, |data| data.is_empty())
    }
}

binary_struct! {
    pub struct PublishResponse {
        pub response_header: ResponseHeader,
        pub subscription_id: u32,
        pub available_sequence_numbers: Option<Vec<u32>>,
        pub more_notifications: bool,
        pub notification_message: NotificationMessage,
        pub results: Option<Vec<StatusCode>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

impl_service_response!(PublishResponse, PUBLISH_RESPONSE_TYPE_ID);

binary_struct! {
    pub struct RepublishRequest {
        pub request_header: RequestHeader,
        pub subscription_id: u32,
        pub retransmit_sequence_number: u32,
    }
}

impl_service_request!(RepublishRequest, REPUBLISH_REQUEST_TYPE_ID);

binary_struct! {
    pub struct RepublishResponse {
        pub response_header: ResponseHeader,
        pub notification_message: NotificationMessage,
    }
}

impl_service_response!(RepublishResponse, REPUBLISH_RESPONSE_TYPE_ID);

// ── Notification payloads ─────────────────────────────────────────────────────

binary_struct! {
    pub struct MonitoredItemNotification {
        pub client_handle: u32,
        pub value: DataValue,
    }
}

binary_struct! {
    pub struct DataChangeNotification {
        pub monitored_items: Option<Vec<MonitoredItemNotification>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

binary_struct! {
    pub struct EventFieldList {
        pub client_handle: u32,
        pub event_fields: Option<Vec<Variant>>,
    }
}

binary_struct! {
    pub struct EventNotificationList {
        pub events: Option<Vec<EventFieldList>>,
    }
}

binary_struct! {
    pub struct StatusChangeNotification {
        pub status: StatusCode,
        pub diagnostic_info: DiagnosticInfo,
    }
}

/// A notification payload routed out of a publish response.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationPayload {
    DataChange(DataChangeNotification),
    Events(EventNotificationList),
    StatusChange(StatusChangeNotification),
    /// Preserved unknown payload.
    Unknown(ExtensionObject),
}

impl NotificationPayload {
    /// Decode one entry of `notification_data` by its encoding id; unknown
    /// ids are preserved raw rather than rejected.
    pub fn from_extension_object(
        object: ExtensionObject,
    ) -> Result<Self, opcua_core::codec::CodecError> {
        match object.type_id.as_type_id() {
            Some(DATA_CHANGE_NOTIFICATION_TYPE_ID) => {
                Ok(NotificationPayload::DataChange(object.decode_inner()?))
            }
            Some(EVENT_NOTIFICATION_LIST_TYPE_ID) => {
                Ok(NotificationPayload::Events(object.decode_inner()?))
            }
            Some(STATUS_CHANGE_NOTIFICATION_TYPE_ID) => {
                Ok(NotificationPayload::StatusChange(object.decode_inner()?))
            }
            _ => Ok(NotificationPayload::Unknown(object)),
        }
    }
}
