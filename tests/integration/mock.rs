//! Scripted loopback OPC UA server (policy None).
//!
//! Speaks just enough of the binary protocol to drive the client through
//! connect, session setup, attribute services and the publish loop. Fault
//! injection knobs cover the replay and ServiceFault scenarios.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use opcua_core::codec::{BinaryDecode, BinaryEncode, BinaryReader};
use opcua_core::crypto::{MessageSecurityMode, SecurityPolicy};
use opcua_core::types::{
    ByteString, DataValue, DateTime, ExtensionObject, LocalizedText, NodeId, QualifiedName,
    ResponseHeader, StatusCode, Variant,
};
use opcua_core::wire::{Acknowledge, AsymmetricSecurityHeader, Hello};

use opcua_client::messages::attributes::*;
use opcua_client::messages::endpoints::*;
use opcua_client::messages::secure_channel::*;
use opcua_client::messages::session::*;
use opcua_client::messages::subscription::*;
use opcua_client::messages::{ServiceFault, SERVICE_FAULT_TYPE_ID};

const CHANNEL_ID: u32 = 99;
const TOKEN_ID: u32 = 7;

/// Fault-injection and behavior knobs.
#[derive(Clone)]
pub struct MockOptions {
    /// Send the Nth MSG response frame twice (replay injection).
    pub duplicate_response_at: Option<usize>,
    /// Answer Read with a ServiceFault instead of results.
    pub fault_on_read: bool,
    /// Data-change notifications to emit before switching to keep-alives.
    pub notification_limit: usize,
    /// Pacing of publish responses.
    pub publish_interval: Duration,
}

impl Default for MockOptions {
    fn default() -> Self {
        MockOptions {
            duplicate_response_at: None,
            fault_on_read: false,
            notification_limit: usize::MAX,
            publish_interval: Duration::from_millis(50),
        }
    }
}

/// What the mock observed, for assertions.
#[derive(Default)]
pub struct MockObservations {
    /// (subscription id, sequence number) pairs acknowledged by the client.
    pub acks: Mutex<Vec<(u32, u32)>>,
    /// Notification sequence numbers the mock sent.
    pub sent_sequences: Mutex<Vec<u32>>,
    pub close_session_seen: Mutex<bool>,
    pub close_channel_seen: Mutex<bool>,
}

pub struct MockServer {
    pub url: String,
    pub observations: Arc<MockObservations>,
}

impl MockServer {
    pub async fn spawn(options: MockOptions) -> MockServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let observations = Arc::new(MockObservations::default());
        let state = ServerState {
            options,
            observations: observations.clone(),
            sequence: AtomicU32::new(0),
            notification_sequence: AtomicU32::new(0),
            counter_value: AtomicI32::new(0),
            monitored_handles: Mutex::new(Vec::new()),
            responses_sent: AtomicU32::new(0),
        };
        tokio::spawn(async move {
            let (socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            if let Err(e) = serve(socket, state).await {
                eprintln!("mock server stopped: {e}");
            }
        });
        MockServer {
            url: format!("opc.tcp://127.0.0.1:{}", addr.port()),
            observations,
        }
    }
}

struct ServerState {
    options: MockOptions,
    observations: Arc<MockObservations>,
    sequence: AtomicU32,
    notification_sequence: AtomicU32,
    counter_value: AtomicI32,
    monitored_handles: Mutex<Vec<u32>>,
    responses_sent: AtomicU32,
}

async fn read_frame(socket: &mut TcpStream) -> std::io::Result<(String, u8, Vec<u8>)> {
    let mut header = [0u8; 8];
    socket.read_exact(&mut header).await?;
    let kind = String::from_utf8_lossy(&header[..3]).to_string();
    let size = u32::from_le_bytes(header[4..8].try_into().unwrap()) as usize;
    let mut body = vec![0u8; size - 8];
    socket.read_exact(&mut body).await?;
    Ok((kind, header[3], body))
}

fn frame(kind: &[u8; 3], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + body.len());
    out.extend_from_slice(kind);
    out.push(b'F');
    out.extend_from_slice(&((8 + body.len()) as u32).to_le_bytes());
    out.extend_from_slice(body);
    out
}

fn good_header(request_handle: u32) -> ResponseHeader {
    ResponseHeader {
        timestamp: DateTime::now(),
        request_handle,
        service_result: StatusCode::GOOD,
        ..Default::default()
    }
}

fn endpoint_description(policy: SecurityPolicy) -> EndpointDescription {
    EndpointDescription {
        endpoint_url: Some("opc.tcp://mock-internal:4840/ua".into()),
        server: ApplicationDescription {
            application_uri: Some("urn:mock:server".into()),
            product_uri: None,
            application_name: LocalizedText::new("mock server"),
            application_type: ApplicationType::Server,
            gateway_server_uri: None,
            discovery_profile_uri: None,
            discovery_urls: None,
        },
        server_certificate: ByteString::NULL,
        security_mode: MessageSecurityMode::None,
        security_policy_uri: Some(policy.uri().into()),
        user_identity_tokens: Some(vec![
            UserTokenPolicy {
                policy_id: Some("anon".into()),
                token_type: UserTokenType::Anonymous,
                issued_token_type: None,
                issuer_endpoint_url: None,
                security_policy_uri: None,
            },
            UserTokenPolicy {
                policy_id: Some("user_plain".into()),
                token_type: UserTokenType::UserName,
                issued_token_type: None,
                issuer_endpoint_url: None,
                security_policy_uri: Some(SecurityPolicy::None.uri().into()),
            },
        ]),
        transport_profile_uri: None,
        security_level: 0,
    }
}

impl ServerState {
    fn msg_frame(&self, request_id: u32, type_id: u32, body: &dyn BinaryEncode) -> Vec<u8> {
        let mut payload = BytesMut::new();
        // Symmetric security header, then sequence header.
        payload.put_u32_le(CHANNEL_ID);
        payload.put_u32_le(TOKEN_ID);
        payload.put_u32_le(self.sequence.fetch_add(1, Ordering::SeqCst) + 1);
        payload.put_u32_le(request_id);
        NodeId::numeric(0, type_id).encode(&mut payload);
        body.encode(&mut payload);
        frame(b"MSG", &payload)
    }
}

async fn serve(mut socket: TcpStream, state: ServerState) -> anyhow::Result<()> {
    // HEL → ACK
    let (kind, _, body) = read_frame(&mut socket).await?;
    anyhow::ensure!(kind == "HEL", "expected HEL, got {kind}");
    let mut reader = BinaryReader::new(&body);
    let hello = Hello::decode(&mut reader)?;
    let ack = Acknowledge {
        protocol_version: 0,
        receive_buffer_size: hello.receive_buffer_size.min(65_535),
        send_buffer_size: hello.send_buffer_size.min(65_535),
        max_message_size: 0,
        max_chunk_count: 0,
    };
    socket.write_all(&frame(b"ACK", &ack.encode_to_vec())).await?;

    loop {
        let (kind, _, body) = match read_frame(&mut socket).await {
            Ok(frame) => frame,
            Err(_) => return Ok(()),
        };
        match kind.as_str() {
            "OPN" => handle_open(&mut socket, &state, &body).await?,
            "MSG" => handle_message(&mut socket, &state, &body).await?,
            "CLO" => {
                *state.observations.close_channel_seen.lock().unwrap() = true;
                return Ok(());
            }
            other => anyhow::bail!("unexpected frame {other}"),
        }
    }
}

async fn handle_open(
    socket: &mut TcpStream,
    state: &ServerState,
    body: &[u8],
) -> anyhow::Result<()> {
    let mut reader = BinaryReader::new(body);
    let _header = AsymmetricSecurityHeader::decode(&mut reader)?;
    let _sequence_number = reader.read_u32()?;
    let request_id = reader.read_u32()?;

    let response = OpenSecureChannelResponse {
        response_header: good_header(0),
        server_protocol_version: 0,
        security_token: ChannelSecurityToken {
            channel_id: CHANNEL_ID,
            token_id: TOKEN_ID,
            created_at: DateTime::now(),
            revised_lifetime: 3_600_000,
        },
        server_nonce: ByteString::NULL,
    };

    let header = AsymmetricSecurityHeader {
        channel_id: CHANNEL_ID,
        policy_uri: SecurityPolicy::None.uri().into(),
        sender_certificate: ByteString::NULL,
        receiver_thumbprint: ByteString::NULL,
    };
    let mut payload = header.encode_to_vec();
    payload.extend_from_slice(
        &(state.sequence.fetch_add(1, Ordering::SeqCst) + 1).to_le_bytes(),
    );
    payload.extend_from_slice(&request_id.to_le_bytes());
    let mut rest = BytesMut::new();
    NodeId::numeric(0, OPEN_SECURE_CHANNEL_RESPONSE_TYPE_ID).encode(&mut rest);
    response.encode(&mut rest);
    payload.extend_from_slice(&rest);
    socket.write_all(&frame(b"OPN", &payload)).await?;
    Ok(())
}

async fn handle_message(
    socket: &mut TcpStream,
    state: &ServerState,
    body: &[u8],
) -> anyhow::Result<()> {
    let mut reader = BinaryReader::new(body);
    reader.read_bytes(8)?; // symmetric header
    let sequence_bytes = reader.read_bytes(8)?;
    let request_id = u32::from_le_bytes(sequence_bytes[4..8].try_into().unwrap());
    let type_node = NodeId::decode(&mut reader)?;
    let type_id = type_node.as_type_id().expect("numeric type id");

    let response_frame = match type_id {
        GET_ENDPOINTS_REQUEST_TYPE_ID => {
            let request = GetEndpointsRequest::decode(&mut reader)?;
            let response = GetEndpointsResponse {
                response_header: good_header(request.request_header.request_handle),
                endpoints: Some(vec![endpoint_description(SecurityPolicy::None)]),
            };
            state.msg_frame(request_id, GET_ENDPOINTS_RESPONSE_TYPE_ID, &response)
        }
        CREATE_SESSION_REQUEST_TYPE_ID => {
            let request = CreateSessionRequest::decode(&mut reader)?;
            let response = CreateSessionResponse {
                response_header: good_header(request.request_header.request_handle),
                session_id: NodeId::numeric(1, 1234),
                authentication_token: NodeId::opaque(0, vec![0xaa, 0xbb, 0xcc, 0xdd]),
                revised_session_timeout: request.requested_session_timeout,
                server_nonce: ByteString::new(vec![0x11; 32]),
                server_certificate: ByteString::NULL,
                server_endpoints: Some(vec![endpoint_description(SecurityPolicy::None)]),
                server_software_certificates: None,
                server_signature: SignatureData::NULL,
                max_request_message_size: 0,
            };
            state.msg_frame(request_id, CREATE_SESSION_RESPONSE_TYPE_ID, &response)
        }
        ACTIVATE_SESSION_REQUEST_TYPE_ID => {
            let request = ActivateSessionRequest::decode(&mut reader)?;
            let response = ActivateSessionResponse {
                response_header: good_header(request.request_header.request_handle),
                server_nonce: ByteString::new(vec![0x22; 32]),
                results: Some(vec![StatusCode::GOOD]),
                diagnostic_infos: None,
            };
            state.msg_frame(request_id, ACTIVATE_SESSION_RESPONSE_TYPE_ID, &response)
        }
        READ_REQUEST_TYPE_ID => {
            let request = ReadRequest::decode(&mut reader)?;
            if state.options.fault_on_read {
                let fault = ServiceFault {
                    response_header: ResponseHeader {
                        timestamp: DateTime::now(),
                        request_handle: request.request_header.request_handle,
                        service_result: StatusCode::BAD_SERVICE_UNSUPPORTED,
                        ..Default::default()
                    },
                };
                state.msg_frame(request_id, SERVICE_FAULT_TYPE_ID, &fault)
            } else {
                let results = request
                    .nodes_to_read
                    .unwrap_or_default()
                    .iter()
                    .map(|node| read_node(state, node))
                    .collect();
                let response = ReadResponse {
                    response_header: good_header(request.request_header.request_handle),
                    results: Some(results),
                    diagnostic_infos: None,
                };
                state.msg_frame(request_id, READ_RESPONSE_TYPE_ID, &response)
            }
        }
        WRITE_REQUEST_TYPE_ID => {
            let request = WriteRequest::decode(&mut reader)?;
            let count = request.nodes_to_write.unwrap_or_default().len();
            let response = WriteResponse {
                response_header: good_header(request.request_header.request_handle),
                results: Some(vec![StatusCode::GOOD; count]),
                diagnostic_infos: None,
            };
            state.msg_frame(request_id, WRITE_RESPONSE_TYPE_ID, &response)
        }
        BROWSE_REQUEST_TYPE_ID => {
            let request = BrowseRequest::decode(&mut reader)?;
            let results = request
                .nodes_to_browse
                .unwrap_or_default()
                .iter()
                .map(|description| browse_node(description))
                .collect();
            let response = BrowseResponse {
                response_header: good_header(request.request_header.request_handle),
                results: Some(results),
                diagnostic_infos: None,
            };
            state.msg_frame(request_id, BROWSE_RESPONSE_TYPE_ID, &response)
        }
        BROWSE_NEXT_REQUEST_TYPE_ID => {
            let request = BrowseNextRequest::decode(&mut reader)?;
            let results = request
                .continuation_points
                .unwrap_or_default()
                .iter()
                .map(|_| BrowseResult {
                    status_code: StatusCode::GOOD,
                    continuation_point: ByteString::NULL,
                    references: Some(vec![reference(
                        NodeId::numeric(0, 2254),
                        "ServerArray",
                        opcua_client::messages::node_class::VARIABLE,
                    )]),
                })
                .collect();
            let response = BrowseNextResponse {
                response_header: good_header(request.request_header.request_handle),
                results: Some(results),
                diagnostic_infos: None,
            };
            state.msg_frame(request_id, BROWSE_NEXT_RESPONSE_TYPE_ID, &response)
        }
        CALL_REQUEST_TYPE_ID => {
            let request = CallRequest::decode(&mut reader)?;
            let results = request
                .methods_to_call
                .unwrap_or_default()
                .into_iter()
                .map(|method| CallMethodResult {
                    status_code: StatusCode::GOOD,
                    input_argument_results: None,
                    input_argument_diagnostic_infos: None,
                    output_arguments: method.input_arguments,
                })
                .collect();
            let response = CallResponse {
                response_header: good_header(request.request_header.request_handle),
                results: Some(results),
                diagnostic_infos: None,
            };
            state.msg_frame(request_id, CALL_RESPONSE_TYPE_ID, &response)
        }
        TRANSLATE_BROWSE_PATHS_REQUEST_TYPE_ID => {
            let request = TranslateBrowsePathsToNodeIdsRequest::decode(&mut reader)?;
            let count = request.browse_paths.unwrap_or_default().len();
            let result = BrowsePathResult {
                status_code: StatusCode::GOOD,
                targets: Some(vec![BrowsePathTarget {
                    target_id: NodeId::numeric(0, 2253).into(),
                    remaining_path_index: u32::MAX,
                }]),
            };
            let response = TranslateBrowsePathsToNodeIdsResponse {
                response_header: good_header(request.request_header.request_handle),
                results: Some(vec![result; count]),
                diagnostic_infos: None,
            };
            state.msg_frame(request_id, TRANSLATE_BROWSE_PATHS_RESPONSE_TYPE_ID, &response)
        }
        REGISTER_NODES_REQUEST_TYPE_ID => {
            let request = RegisterNodesRequest::decode(&mut reader)?;
            let response = RegisterNodesResponse {
                response_header: good_header(request.request_header.request_handle),
                registered_node_ids: request.nodes_to_register,
            };
            state.msg_frame(request_id, REGISTER_NODES_RESPONSE_TYPE_ID, &response)
        }
        UNREGISTER_NODES_REQUEST_TYPE_ID => {
            let request = UnregisterNodesRequest::decode(&mut reader)?;
            let response = UnregisterNodesResponse {
                response_header: good_header(request.request_header.request_handle),
            };
            state.msg_frame(request_id, UNREGISTER_NODES_RESPONSE_TYPE_ID, &response)
        }
        HISTORY_READ_REQUEST_TYPE_ID => {
            let request = HistoryReadRequest::decode(&mut reader)?;
            let count = request.nodes_to_read.unwrap_or_default().len();
            let result = HistoryReadResult {
                status_code: StatusCode::GOOD,
                continuation_point: ByteString::NULL,
                history_data: ExtensionObject::NULL,
            };
            let response = HistoryReadResponse {
                response_header: good_header(request.request_header.request_handle),
                results: Some(vec![result; count]),
                diagnostic_infos: None,
            };
            state.msg_frame(request_id, HISTORY_READ_RESPONSE_TYPE_ID, &response)
        }
        CREATE_SUBSCRIPTION_REQUEST_TYPE_ID => {
            let request = CreateSubscriptionRequest::decode(&mut reader)?;
            let response = CreateSubscriptionResponse {
                response_header: good_header(request.request_header.request_handle),
                subscription_id: 1,
                revised_publishing_interval: request.requested_publishing_interval,
                revised_lifetime_count: request.requested_lifetime_count,
                revised_max_keep_alive_count: request.requested_max_keep_alive_count,
            };
            state.msg_frame(request_id, CREATE_SUBSCRIPTION_RESPONSE_TYPE_ID, &response)
        }
        CREATE_MONITORED_ITEMS_REQUEST_TYPE_ID => {
            let request = CreateMonitoredItemsRequest::decode(&mut reader)?;
            let items = request.items_to_create.unwrap_or_default();
            let mut handles = state.monitored_handles.lock().unwrap();
            let results = items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    handles.push(item.requested_parameters.client_handle);
                    MonitoredItemCreateResult {
                        status_code: StatusCode::GOOD,
                        monitored_item_id: 100 + i as u32,
                        revised_sampling_interval: item.requested_parameters.sampling_interval,
                        revised_queue_size: item.requested_parameters.queue_size,
                        filter_result: ExtensionObject::NULL,
                    }
                })
                .collect();
            let response = CreateMonitoredItemsResponse {
                response_header: good_header(request.request_header.request_handle),
                results: Some(results),
                diagnostic_infos: None,
            };
            state.msg_frame(request_id, CREATE_MONITORED_ITEMS_RESPONSE_TYPE_ID, &response)
        }
        PUBLISH_REQUEST_TYPE_ID => {
            let request = PublishRequest::decode(&mut reader)?;
            for ack in request.subscription_acknowledgements.unwrap_or_default() {
                state
                    .observations
                    .acks
                    .lock()
                    .unwrap()
                    .push((ack.subscription_id, ack.sequence_number));
            }
            tokio::time::sleep(state.options.publish_interval).await;

            // A subscription with no items (or an exhausted feed) answers
            // with keep-alives carrying the next expected sequence number.
            let handles = state.monitored_handles.lock().unwrap().clone();
            let emitted = state.notification_sequence.load(Ordering::SeqCst) as usize;
            let (sequence_number, notification_data) = if !handles.is_empty()
                && emitted < state.options.notification_limit
            {
                let sequence_number = state.notification_sequence.fetch_add(1, Ordering::SeqCst) + 1;
                state
                    .observations
                    .sent_sequences
                    .lock()
                    .unwrap()
                    .push(sequence_number);
                let notification = DataChangeNotification {
                    monitored_items: Some(
                        handles
                            .into_iter()
                            .map(|client_handle| MonitoredItemNotification {
                                client_handle,
                                value: DataValue {
                                    value: Some(Variant::Int32(
                                        state.counter_value.fetch_add(1, Ordering::SeqCst),
                                    )),
                                    status: None,
                                    source_timestamp: Some(DateTime::now()),
                                    source_picoseconds: None,
                                    server_timestamp: Some(DateTime::now()),
                                    server_picoseconds: None,
                                },
                            })
                            .collect(),
                    ),
                    diagnostic_infos: None,
                };
                (
                    sequence_number,
                    Some(vec![ExtensionObject::from_encodable(
                        DATA_CHANGE_NOTIFICATION_TYPE_ID,
                        &notification,
                    )]),
                )
            } else {
                (state.notification_sequence.load(Ordering::SeqCst) + 1, None)
            };

            let response = PublishResponse {
                response_header: good_header(request.request_header.request_handle),
                subscription_id: 1,
                available_sequence_numbers: None,
                more_notifications: false,
                notification_message: NotificationMessage {
                    sequence_number,
                    publish_time: DateTime::now(),
                    notification_data,
                },
                results: None,
                diagnostic_infos: None,
            };
            state.msg_frame(request_id, PUBLISH_RESPONSE_TYPE_ID, &response)
        }
        DELETE_SUBSCRIPTIONS_REQUEST_TYPE_ID => {
            let request = DeleteSubscriptionsRequest::decode(&mut reader)?;
            let count = request.subscription_ids.unwrap_or_default().len();
            let response = DeleteSubscriptionsResponse {
                response_header: good_header(request.request_header.request_handle),
                results: Some(vec![StatusCode::GOOD; count]),
                diagnostic_infos: None,
            };
            state.msg_frame(request_id, DELETE_SUBSCRIPTIONS_RESPONSE_TYPE_ID, &response)
        }
        CLOSE_SESSION_REQUEST_TYPE_ID => {
            let request = CloseSessionRequest::decode(&mut reader)?;
            *state.observations.close_session_seen.lock().unwrap() = true;
            let response = CloseSessionResponse {
                response_header: good_header(request.request_header.request_handle),
            };
            state.msg_frame(request_id, CLOSE_SESSION_RESPONSE_TYPE_ID, &response)
        }
        other => {
            let fault = ServiceFault {
                response_header: ResponseHeader {
                    timestamp: DateTime::now(),
                    request_handle: 0,
                    service_result: StatusCode::BAD_SERVICE_UNSUPPORTED,
                    ..Default::default()
                },
            };
            eprintln!("mock: unsupported service {other}");
            state.msg_frame(request_id, SERVICE_FAULT_TYPE_ID, &fault)
        }
    };

    socket.write_all(&response_frame).await?;
    let sent = state.responses_sent.fetch_add(1, Ordering::SeqCst) as usize + 1;
    if state.options.duplicate_response_at == Some(sent) {
        // Replay: the identical frame again, same sequence number.
        socket.write_all(&response_frame).await?;
    }
    Ok(())
}

fn read_node(state: &ServerState, node: &ReadValueId) -> DataValue {
    match &node.node_id {
        id if *id == NodeId::numeric(0, 2258) => DataValue {
            value: Some(Variant::DateTime(DateTime::now())),
            status: None,
            source_timestamp: Some(DateTime::now()),
            source_picoseconds: None,
            server_timestamp: Some(DateTime::now()),
            server_picoseconds: None,
        },
        id if *id == NodeId::string(2, "counter") => DataValue::new(Variant::Int32(
            state.counter_value.fetch_add(1, Ordering::SeqCst),
        )),
        _ => DataValue {
            value: None,
            status: Some(StatusCode::BAD_NODE_ID_UNKNOWN),
            source_timestamp: None,
            source_picoseconds: None,
            server_timestamp: None,
            server_picoseconds: None,
        },
    }
}

fn reference(node_id: NodeId, name: &str, node_class: u32) -> ReferenceDescription {
    ReferenceDescription {
        reference_type_id: NodeId::numeric(0, 35),
        is_forward: true,
        node_id: node_id.into(),
        browse_name: QualifiedName::new(0, name),
        display_name: LocalizedText::new(name),
        node_class,
        type_definition: NodeId::numeric(0, 2004).into(),
    }
}

fn browse_node(description: &BrowseDescription) -> BrowseResult {
    if description.node_id == NodeId::numeric(0, 85) {
        // Objects folder: Server object now, more via the continuation point.
        BrowseResult {
            status_code: StatusCode::GOOD,
            continuation_point: ByteString::new(vec![0xc0, 0x01]),
            references: Some(vec![reference(
                NodeId::numeric(0, 2253),
                "Server",
                opcua_client::messages::node_class::OBJECT,
            )]),
        }
    } else {
        BrowseResult {
            status_code: StatusCode::BAD_NODE_ID_UNKNOWN,
            continuation_point: ByteString::NULL,
            references: None,
        }
    }
}
