//! Address-space services: Browse, Read, Write, Call, TranslateBrowsePaths,
//! Register/UnregisterNodes and HistoryRead.

use opcua_core::types::{
    ByteString, DataValue, DateTime, DiagnosticInfo, ExpandedNodeId, ExtensionObject,
    LocalizedText, NodeId, QualifiedName, RequestHeader, ResponseHeader, StatusCode, Variant,
};

use super::{
    binary_struct, impl_service_request, impl_service_response, BrowseDirection,
    TimestampsToReturn,
};

pub const BROWSE_REQUEST_TYPE_ID: u32 = 527;
pub const BROWSE_RESPONSE_TYPE_ID: u32 = 530;
pub const BROWSE_NEXT_REQUEST_TYPE_ID: u32 = 533;
pub const BROWSE_NEXT_RESPONSE_TYPE_ID: u32 = 536;
pub const TRANSLATE_BROWSE_PATHS_REQUEST_TYPE_ID: u32 = 554;
pub const TRANSLATE_BROWSE_PATHS_RESPONSE_TYPE_ID: u32 = 557;
pub const REGISTER_NODES_REQUEST_TYPE_ID: u32 = 560;
pub const REGISTER_NODES_RESPONSE_TYPE_ID: u32 = 563;
pub const UNREGISTER_NODES_REQUEST_TYPE_ID: u32 = 566;
pub const UNREGISTER_NODES_RESPONSE_TYPE_ID: u32 = 569;
pub const READ_REQUEST_TYPE_ID: u32 = 631;
pub const READ_RESPONSE_TYPE_ID: u32 = 634;
pub const HISTORY_READ_REQUEST_TYPE_ID: u32 = 664;
pub const HISTORY_READ_RESPONSE_TYPE_ID: u32 = 667;
pub const WRITE_REQUEST_TYPE_ID: u32 = 673;
pub const WRITE_RESPONSE_TYPE_ID: u32 = 676;
pub const CALL_REQUEST_TYPE_ID: u32 = 712;
pub const CALL_RESPONSE_TYPE_ID: u32 = 715;

// ── Read / Write ──────────────────────────────────────────────────────────────

binary_struct! {
    pub struct ReadValueId {
        pub node_id: NodeId,
        pub attribute_id: u32,
        pub index_range: Option<String>,
        pub data_encoding: QualifiedName,
    }
}

impl ReadValueId {
    /// Read the Value attribute of a node.
    pub fn value_of(node_id: NodeId) -> Self {
        ReadValueId {
            node_id,
            attribute_id: super::attribute_id::VALUE,
            index_range: None,
            data_encoding: QualifiedName::default(),
        }
    }
}

binary_struct! {
    pub struct ReadRequest {
        pub request_header: RequestHeader,
        /// Maximum acceptable cache age, milliseconds; 0 forces a device read.
        pub max_age: f64,
        pub timestamps_to_return: TimestampsToReturn,
        pub nodes_to_read: Option<Vec<ReadValueId>>,
    }
}

impl_service_request!(ReadRequest, READ_REQUEST_TYPE_ID);

binary_struct! {
    pub struct ReadResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<DataValue>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

impl_service_response!(ReadResponse, READ_RESPONSE_TYPE_ID);

binary_struct! {
    pub struct WriteValue {
        pub node_id: NodeId,
        pub attribute_id: u32,
        pub index_range: Option<String>,
        pub value: DataValue,
    }
}

impl WriteValue {
    /// Write the Value attribute of a node.
    pub fn value_of(node_id: NodeId, value: impl Into<Variant>) -> Self {
        WriteValue {
            node_id,
            attribute_id: super::attribute_id::VALUE,
            index_range: None,
            value: DataValue::new(value),
        }
    }
}

binary_struct! {
    pub struct WriteRequest {
        pub request_header: RequestHeader,
        pub nodes_to_write: Option<Vec<WriteValue>>,
    }
}

impl_service_request!(WriteRequest, WRITE_REQUEST_TYPE_ID);

binary_struct! {
    pub struct WriteResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<StatusCode>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

impl_service_response!(WriteResponse, WRITE_RESPONSE_TYPE_ID);

// ── Browse ────────────────────────────────────────────────────────────────────

binary_struct! {
    pub struct ViewDescription {
        pub view_id: NodeId,
        pub timestamp: DateTime,
        pub view_version: u32,
    }
}

impl Default for ViewDescription {
    fn default() -> Self {
        ViewDescription {
            view_id: NodeId::NULL,
            timestamp: DateTime::NULL,
            view_version: 0,
        }
    }
}

binary_struct! {
    pub struct BrowseDescription {
        pub node_id: NodeId,
        pub browse_direction: BrowseDirection,
        pub reference_type_id: NodeId,
        pub include_subtypes: bool,
        /// NodeClass filter bits; 0 means all classes.
        pub node_class_mask: u32,
        /// Which ReferenceDescription fields to fill; 63 means all.
        pub result_mask: u32,
    }
}

impl BrowseDescription {
    /// Forward hierarchical browse returning everything.
    pub fn all_of(node_id: NodeId) -> Self {
        BrowseDescription {
            node_id,
            browse_direction: BrowseDirection::Forward,
            // HierarchicalReferences
            reference_type_id: NodeId::numeric(0, 33),
            include_subtypes: true,
            node_class_mask: 0,
            result_mask: 63,
        }
    }
}

binary_struct! {
    pub struct ReferenceDescription {
        pub reference_type_id: NodeId,
        pub is_forward: bool,
        pub node_id: ExpandedNodeId,
        pub browse_name: QualifiedName,
        pub display_name: LocalizedText,
        pub node_class: u32,
        pub type_definition: ExpandedNodeId,
    }
}

binary_struct! {
    pub struct BrowseResult {
        pub status_code: StatusCode,
        /// Non-null when the server has more references to hand out.
        pub continuation_point: ByteString,
        pub references: Option<Vec<ReferenceDescription>>,
    }
}

binary_struct! {
    pub struct BrowseRequest {
        pub request_header: RequestHeader,
        pub view: ViewDescription,
        /// 0 lets the server choose.
        pub requested_max_references_per_node: u32,
        pub nodes_to_browse: Option<Vec<BrowseDescription>>,
    }
}

impl_service_request!(BrowseRequest, BROWSE_REQUEST_TYPE_ID);

binary_struct! {
    pub struct BrowseResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<BrowseResult>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

impl_service_response!(BrowseResponse, BROWSE_RESPONSE_TYPE_ID);

binary_struct! {
    pub struct BrowseNextRequest {
        pub request_header: RequestHeader,
        /// True frees the continuation points without returning results.
        pub release_continuation_points: bool,
        pub continuation_points: Option<Vec<ByteString>>,
    }
}

impl_service_request!(BrowseNextRequest, BROWSE_NEXT_REQUEST_TYPE_ID);

binary_struct! {
    pub struct BrowseNextResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<BrowseResult>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

impl_service_response!(BrowseNextResponse, BROWSE_NEXT_RESPONSE_TYPE_ID);

// ── TranslateBrowsePaths ──────────────────────────────────────────────────────

binary_struct! {
    pub struct RelativePathElement {
        pub reference_type_id: NodeId,
        pub is_inverse: bool,
        pub include_subtypes: bool,
        pub target_name: QualifiedName,
    }
}

binary_struct! {
    pub struct RelativePath {
        pub elements: Option<Vec<RelativePathElement>>,
    }
}

binary_struct! {
    pub struct BrowsePath {
        pub starting_node: NodeId,
        pub relative_path: RelativePath,
    }
}

binary_struct! {
    pub struct BrowsePathTarget {
        pub target_id: ExpandedNodeId,
        /// Index of the first unprocessed path element; u32::MAX when done.
        pub remaining_path_index: u32,
    }
}

binary_struct! {
    pub struct BrowsePathResult {
        pub status_code: StatusCode,
        pub targets: Option<Vec<BrowsePathTarget>>,
    }
}

binary_struct! {
    pub struct TranslateBrowsePathsToNodeIdsRequest {
        pub request_header: RequestHeader,
        pub browse_paths: Option<Vec<BrowsePath>>,
    }
}

impl_service_request!(
    TranslateBrowsePathsToNodeIdsRequest,
    TRANSLATE_BROWSE_PATHS_REQUEST_TYPE_ID
);

binary_struct! {
    pub struct TranslateBrowsePathsToNodeIdsResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<BrowsePathResult>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

impl_service_response!(
    TranslateBrowsePathsToNodeIdsResponse,
    TRANSLATE_BROWSE_PATHS_RESPONSE_TYPE_ID
);

// ── Register / Unregister ─────────────────────────────────────────────────────

binary_struct! {
    pub struct RegisterNodesRequest {
        pub request_header: RequestHeader,
        pub nodes_to_register: Option<Vec<NodeId>>,
    }
}

impl_service_request!(RegisterNodesRequest, REGISTER_NODES_REQUEST_TYPE_ID);

binary_struct! {
    pub struct RegisterNodesResponse {
        pub response_header: ResponseHeader,
        /// Aliases to use in place of the registered ids.
        pub registered_node_ids: Option<Vec<NodeId>>,
    }
}

impl_service_response!(RegisterNodesResponse, REGISTER_NODES_RESPONSE_TYPE_ID);

binary_struct! {
    pub struct UnregisterNodesRequest {
        pub request_header: RequestHeader,
        pub nodes_to_unregister: Option<Vec<NodeId>>,
    }
}

impl_service_request!(UnregisterNodesRequest, UNREGISTER_NODES_REQUEST_TYPE_ID);

binary_struct! {
    pub struct UnregisterNodesResponse {
        pub response_header: ResponseHeader,
    }
}

impl_service_response!(UnregisterNodesResponse, UNREGISTER_NODES_RESPONSE_TYPE_ID);

// ── Call ──────────────────────────────────────────────────────────────────────

binary_struct! {
    pub struct CallMethodRequest {
        pub object_id: NodeId,
        pub method_id: NodeId,
        pub input_arguments: Option<Vec<Variant>>,
    }
}

binary_struct! {
    pub struct CallMethodResult {
        pub status_code: StatusCode,
        pub input_argument_results: Option<Vec<StatusCode>>,
        pub input_argument_diagnostic_infos: Option<Vec<DiagnosticInfo>>,
        pub output_arguments: Option<Vec<Variant>>,
    }
}

binary_struct! {
    pub struct CallRequest {
        pub request_header: RequestHeader,
        pub methods_to_call: Option<Vec<CallMethodRequest>>,
    }
}

impl_service_request!(CallRequest, CALL_REQUEST_TYPE_ID);

binary_struct! {
    pub struct CallResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<CallMethodResult>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

impl_service_response!(CallResponse, CALL_RESPONSE_TYPE_ID);

// ── HistoryRead ───────────────────────────────────────────────────────────────

binary_struct! {
    pub struct HistoryReadValueId {
        pub node_id: NodeId,
        pub index_range: Option<String>,
        pub data_encoding: QualifiedName,
        pub continuation_point: ByteString,
    }
}

binary_struct! {
    pub struct HistoryReadResult {
        pub status_code: StatusCode,
        pub continuation_point: ByteString,
        /// HistoryData / HistoryEvent payload, kept as its extension object.
        pub history_data: ExtensionObject,
    }
}

binary_struct! {
    pub struct HistoryReadRequest {
        pub request_header: RequestHeader,
        /// ReadRawModifiedDetails, ReadProcessedDetails, … as chosen by the
        /// caller.
        pub history_read_details: ExtensionObject,
        pub timestamps_to_return: TimestampsToReturn,
        pub release_continuation_points: bool,
        pub nodes_to_read: Option<Vec<HistoryReadValueId>>,
    }
}

impl_service_request!(HistoryReadRequest, HISTORY_READ_REQUEST_TYPE_ID);

binary_struct! {
    pub struct HistoryReadResponse {
        pub response_header: ResponseHeader,
        pub results: Option<Vec<HistoryReadResult>>,
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

impl_service_response!(HistoryReadResponse, HISTORY_READ_RESPONSE_TYPE_ID);

#[cfg(test)]
mod tests {
    use super::*;
    use opcua_core::codec::{BinaryDecode, BinaryEncode, BinaryReader};

    fn round_trip<T: BinaryEncode + BinaryDecode + PartialEq + std::fmt::Debug>(value: T) {
        let bytes = value.encode_to_vec();
        let mut reader = BinaryReader::new(&bytes);
        assert_eq!(T::decode(&mut reader).unwrap(), value);
        assert!(reader.is_empty(), "decoder left trailing bytes");
    }

    #[test]
    fn read_request_round_trips() {
        round_trip(ReadRequest {
            request_header: RequestHeader::default(),
            max_age: 0.0,
            timestamps_to_return: TimestampsToReturn::Both,
            nodes_to_read: Some(vec![ReadValueId::value_of(NodeId::numeric(0, 2258))]),
        });
    }

    #[test]
    fn read_response_keeps_per_item_status() {
        round_trip(ReadResponse {
            response_header: ResponseHeader::default(),
            results: Some(vec![
                DataValue::new(Variant::Int32(20)),
                DataValue {
                    status: Some(StatusCode::BAD_NODE_ID_UNKNOWN),
                    ..Default::default()
                },
            ]),
            diagnostic_infos: None,
        });
    }

    #[test]
    fn write_and_call_round_trip() {
        round_trip(WriteRequest {
            request_header: RequestHeader::default(),
            nodes_to_write: Some(vec![WriteValue::value_of(
                NodeId::string(2, "setpoint"),
                42.5f64,
            )]),
        });
        round_trip(CallRequest {
            request_header: RequestHeader::default(),
            methods_to_call: Some(vec![CallMethodRequest {
                object_id: NodeId::numeric(0, 2253),
                method_id: NodeId::string(1, "Restart"),
                input_arguments: Some(vec![Variant::UInt32(3)]),
            }]),
        });
    }

    #[test]
    fn browse_round_trips_with_continuation() {
        round_trip(BrowseResponse {
            response_header: ResponseHeader::default(),
            results: Some(vec![BrowseResult {
                status_code: StatusCode::GOOD,
                continuation_point: ByteString::new(vec![0xca, 0xfe]),
                references: Some(vec![ReferenceDescription {
                    reference_type_id: NodeId::numeric(0, 35),
                    is_forward: true,
                    node_id: NodeId::numeric(0, 2253).into(),
                    browse_name: QualifiedName::new(0, "Server"),
                    display_name: LocalizedText::new("Server"),
                    node_class: super::super::node_class::OBJECT,
                    type_definition: NodeId::numeric(0, 2004).into(),
                }]),
            }]),
            diagnostic_infos: None,
        });
        round_trip(BrowseNextRequest {
            request_header: RequestHeader::default(),
            release_continuation_points: false,
            continuation_points: Some(vec![ByteString::new(vec![0xca, 0xfe])]),
        });
    }

    #[test]
    fn translate_and_registration_round_trip() {
        round_trip(TranslateBrowsePathsToNodeIdsRequest {
            request_header: RequestHeader::default(),
            browse_paths: Some(vec![BrowsePath {
                starting_node: NodeId::numeric(0, 85),
                relative_path: RelativePath {
                    elements: Some(vec![RelativePathElement {
                        reference_type_id: NodeId::numeric(0, 33),
                        is_inverse: false,
                        include_subtypes: true,
                        target_name: QualifiedName::new(2, "Line7"),
                    }]),
                },
            }]),
        });
        round_trip(RegisterNodesRequest {
            request_header: RequestHeader::default(),
            nodes_to_register: Some(vec![NodeId::string(3, "hot")]),
        });
    }

    #[test]
    fn history_read_round_trips() {
        round_trip(HistoryReadRequest {
            request_header: RequestHeader::default(),
            history_read_details: ExtensionObject::NULL,
            timestamps_to_return: TimestampsToReturn::Source,
            release_continuation_points: false,
            nodes_to_read: Some(vec![HistoryReadValueId {
                node_id: NodeId::string(2, "trend"),
                index_range: None,
                data_encoding: QualifiedName::default(),
                continuation_point: ByteString::NULL,
            }]),
        });
    }
}
