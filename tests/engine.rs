//! End-to-end engine behavior.
//!
//! These tests run a real engine and speak real protocol bytes to it over
//! an in-memory duplex transport: HEL/ACK, OPN, then framed MSG chunks
//! encoded with the crate's own codec. Nothing reaches into engine
//! internals; everything is observed the way a client would observe it.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::{advance, Duration};

use uastack::chunk::{ChunkHeader, ChunkMessageType, IsFinal, CHUNK_HEADER_SIZE};
use uastack::messages::*;
use uastack::types::ids::{object_ids, reference_type_ids, variable_ids, AttributeId};
use uastack::types::{
    BinaryDecode, BinaryEncode, ByteString, DataValue, DateTime, DecodingLimits, NodeId,
    QualifiedName, StatusCode, Variant,
};
use uastack::{Server, ServerConfig};

// ============================================================================
// TEST CLIENT
// ============================================================================

/// Minimal OPC UA binary client for black-box testing.
struct TestClient {
    io: DuplexStream,
    channel_id: u32,
    token_id: u32,
    sequence_number: u32,
    next_request_id: u32,
    auth_token: NodeId,
    limits: DecodingLimits,
}

impl TestClient {
    /// Attach to the server over a fresh duplex pipe and complete the
    /// HEL/ACK and OPN handshakes.
    async fn connect(server: &Server) -> Self {
        let (client_io, server_io) = tokio::io::duplex(1 << 20);
        server.attach(server_io).await;
        let mut client = Self {
            io: client_io,
            channel_id: 0,
            token_id: 0,
            sequence_number: 0,
            next_request_id: 0,
            auth_token: NodeId::null(),
            limits: DecodingLimits::default(),
        };
        client.handshake().await;
        client
    }

    async fn handshake(&mut self) {
        // HEL
        let hello = HelloMessage {
            protocol_version: 0,
            receive_buffer_size: 65_535,
            send_buffer_size: 65_535,
            max_message_size: 0,
            max_chunk_count: 0,
            endpoint_url: Some("opc.tcp://localhost:4840/".to_string()),
        };
        let mut payload = BytesMut::new();
        hello.encode(&mut payload).unwrap();
        self.write_raw_frame(ChunkMessageType::Hello, &payload).await;
        let (header, mut body) = self.read_frame().await;
        assert_eq!(header.message_type, ChunkMessageType::Acknowledge);
        let ack = AcknowledgeMessage::decode(&mut body, &self.limits).unwrap();
        assert_eq!(ack.protocol_version, 0);

        // OPN
        let open = OpenSecureChannelRequest {
            request_header: RequestHeader {
                timestamp: DateTime::now(),
                request_handle: 1,
                ..Default::default()
            },
            client_protocol_version: 0,
            request_type: SecurityTokenRequestType::Issue,
            security_mode: MessageSecurityMode::None,
            client_nonce: ByteString::null(),
            requested_lifetime: 3_600_000,
        };
        let mut body = BytesMut::new();
        AsymmetricSecurityHeader {
            security_policy_uri: Some(
                "http://opcfoundation.org/UA/SecurityPolicy#None".to_string(),
            ),
            sender_certificate: ByteString::null(),
            receiver_certificate_thumbprint: ByteString::null(),
        }
        .encode(&mut body)
        .unwrap();
        self.sequence_number += 1;
        SequenceHeader {
            sequence_number: self.sequence_number,
            request_id: self.take_request_id(),
        }
        .encode(&mut body)
        .unwrap();
        RequestMessage::OpenSecureChannel(open)
            .encode(&mut body)
            .unwrap();
        let mut frame = BytesMut::new();
        ChunkHeader {
            message_type: ChunkMessageType::OpenChannel,
            is_final: IsFinal::Final,
            size: (CHUNK_HEADER_SIZE + 4 + body.len()) as u32,
        }
        .serialize(&mut frame);
        frame.extend_from_slice(&0u32.to_le_bytes());
        frame.extend_from_slice(&body);
        self.io.write_all(&frame).await.unwrap();

        let (header, mut body) = self.read_frame().await;
        assert_eq!(header.message_type, ChunkMessageType::OpenChannel);
        // channel id | asymmetric header | sequence header | response
        let _channel_id = body.get_u32_le();
        let _security = AsymmetricSecurityHeader::decode(&mut body, &self.limits).unwrap();
        let _sequence = SequenceHeader::decode(&mut body, &self.limits).unwrap();
        let response = ResponseMessage::decode(&mut body, &self.limits).unwrap();
        let ResponseMessage::OpenSecureChannel(open) = response else {
            panic!("expected OPN response, got {response:?}");
        };
        assert!(open.response_header.service_result.is_good());
        self.channel_id = open.security_token.channel_id;
        self.token_id = open.security_token.token_id;
    }

    async fn write_raw_frame(&mut self, message_type: ChunkMessageType, payload: &[u8]) {
        let mut frame = BytesMut::new();
        ChunkHeader {
            message_type,
            is_final: IsFinal::Final,
            size: (CHUNK_HEADER_SIZE + payload.len()) as u32,
        }
        .serialize(&mut frame);
        frame.extend_from_slice(payload);
        self.io.write_all(&frame).await.unwrap();
    }

    async fn read_frame(&mut self) -> (ChunkHeader, Bytes) {
        let mut header_bytes = [0u8; CHUNK_HEADER_SIZE];
        self.io.read_exact(&mut header_bytes).await.unwrap();
        let header = ChunkHeader::parse(&mut &header_bytes[..]).unwrap();
        let mut rest = vec![0u8; header.size as usize - CHUNK_HEADER_SIZE];
        self.io.read_exact(&mut rest).await.unwrap();
        (header, Bytes::from(rest))
    }

    fn take_request_id(&mut self) -> u32 {
        self.next_request_id += 1;
        self.next_request_id
    }

    /// Send a request in one MSG chunk; returns the request id.
    async fn send(&mut self, mut request: RequestMessage) -> u32 {
        set_auth_token(&mut request, &self.auth_token);
        let mut encoded = BytesMut::new();
        request.encode(&mut encoded).unwrap();

        let request_id = self.take_request_id();
        self.sequence_number += 1;
        let mut frame = BytesMut::new();
        ChunkHeader {
            message_type: ChunkMessageType::Message,
            is_final: IsFinal::Final,
            size: (CHUNK_HEADER_SIZE + 16 + encoded.len()) as u32,
        }
        .serialize(&mut frame);
        frame.extend_from_slice(&self.channel_id.to_le_bytes());
        frame.extend_from_slice(&self.token_id.to_le_bytes());
        frame.extend_from_slice(&self.sequence_number.to_le_bytes());
        frame.extend_from_slice(&request_id.to_le_bytes());
        frame.extend_from_slice(&encoded);
        self.io.write_all(&frame).await.unwrap();
        request_id
    }

    /// Receive one complete response message (reassembling chunks).
    async fn recv(&mut self) -> (u32, ResponseMessage) {
        let mut assembled = BytesMut::new();
        loop {
            let (header, mut body) = self.read_frame().await;
            assert_eq!(
                header.message_type,
                ChunkMessageType::Message,
                "unexpected frame type"
            );
            let _channel_id = body.get_u32_le();
            let _token_id = body.get_u32_le();
            let _sequence_number = body.get_u32_le();
            let request_id = body.get_u32_le();
            assembled.extend_from_slice(&body);
            match header.is_final {
                IsFinal::Final => {
                    let mut cursor = assembled.freeze();
                    let response = ResponseMessage::decode(&mut cursor, &self.limits).unwrap();
                    return (request_id, response);
                }
                IsFinal::Intermediate => continue,
                IsFinal::Aborted => panic!("server aborted a response"),
            }
        }
    }

    /// Round-trip one request.
    async fn request(&mut self, request: RequestMessage) -> ResponseMessage {
        let id = self.send(request).await;
        loop {
            let (response_id, response) = self.recv().await;
            if response_id == id {
                return response;
            }
        }
    }

    /// CreateSession + ActivateSession with anonymous identity.
    async fn open_session(&mut self, name: &str) {
        let response = self
            .request(RequestMessage::CreateSession(CreateSessionRequest {
                request_header: header(),
                client_description: ApplicationDescription {
                    application_uri: Some("urn:uastack:test-client".to_string()),
                    application_type: ApplicationType::Client,
                    ..Default::default()
                },
                session_name: Some(name.to_string()),
                requested_session_timeout: 60_000.0,
                ..Default::default()
            }))
            .await;
        let ResponseMessage::CreateSession(created) = response else {
            panic!("expected CreateSessionResponse, got {response:?}");
        };
        assert!(created.response_header.service_result.is_good());
        self.auth_token = created.authentication_token.clone();

        let response = self
            .request(RequestMessage::ActivateSession(ActivateSessionRequest {
                request_header: header(),
                ..Default::default()
            }))
            .await;
        let ResponseMessage::ActivateSession(activated) = response else {
            panic!("expected ActivateSessionResponse, got {response:?}");
        };
        assert!(activated.response_header.service_result.is_good());
    }

    async fn create_subscription(&mut self, interval_ms: f64, max_per_publish: u32) -> u32 {
        let response = self
            .request(RequestMessage::CreateSubscription(
                CreateSubscriptionRequest {
                    request_header: header(),
                    requested_publishing_interval: interval_ms,
                    requested_lifetime_count: 60,
                    requested_max_keep_alive_count: 10,
                    max_notifications_per_publish: max_per_publish,
                    publishing_enabled: true,
                    priority: 0,
                },
            ))
            .await;
        let ResponseMessage::CreateSubscription(created) = response else {
            panic!("expected CreateSubscriptionResponse, got {response:?}");
        };
        assert!(created.response_header.service_result.is_good());
        created.subscription_id
    }

    async fn create_data_item(
        &mut self,
        subscription_id: u32,
        node_id: NodeId,
        sampling_ms: f64,
        queue_size: u32,
        deadband: Option<f64>,
    ) -> u32 {
        let filter = match deadband {
            None => uastack::types::ExtensionObject::null(),
            Some(value) => uastack::types::ExtensionObject::from_encodable(
                NodeId::from(uastack::types::ids::encoding_ids::DATA_CHANGE_FILTER),
                &DataChangeFilter {
                    trigger: DataChangeTrigger::StatusValue,
                    deadband_type: deadband_type::ABSOLUTE,
                    deadband_value: value,
                },
            )
            .unwrap(),
        };
        let response = self
            .request(RequestMessage::CreateMonitoredItems(
                CreateMonitoredItemsRequest {
                    request_header: header(),
                    subscription_id,
                    timestamps_to_return: TimestampsToReturn::Both,
                    items_to_create: Some(vec![MonitoredItemCreateRequest {
                        item_to_monitor: ReadValueId {
                            node_id,
                            attribute_id: AttributeId::Value as u32,
                            ..Default::default()
                        },
                        monitoring_mode: MonitoringMode::Reporting,
                        requested_parameters: MonitoringParameters {
                            client_handle: 1,
                            sampling_interval: sampling_ms,
                            filter,
                            queue_size,
                            discard_oldest: true,
                        },
                    }]),
                },
            ))
            .await;
        let ResponseMessage::CreateMonitoredItems(created) = response else {
            panic!("expected CreateMonitoredItemsResponse, got {response:?}");
        };
        let result = &created.results.as_ref().unwrap()[0];
        assert!(result.status_code.is_good(), "item create: {}", result.status_code);
        result.monitored_item_id
    }

    /// Send a Publish and wait for its response.
    async fn publish(&mut self, acks: Vec<SubscriptionAcknowledgement>) -> PublishResponse {
        let response = self
            .request(RequestMessage::Publish(PublishRequest {
                request_header: header(),
                subscription_acknowledgements: if acks.is_empty() { None } else { Some(acks) },
            }))
            .await;
        match response {
            ResponseMessage::Publish(publish) => publish,
            ResponseMessage::ServiceFault(fault) => {
                panic!("publish fault: {}", fault.response_header.service_result)
            }
            other => panic!("expected PublishResponse, got {other:?}"),
        }
    }
}

fn header() -> RequestHeader {
    RequestHeader {
        timestamp: DateTime::now(),
        request_handle: 1,
        timeout_hint: 30_000,
        ..Default::default()
    }
}

fn set_auth_token(request: &mut RequestMessage, token: &NodeId) {
    // Every variant's first field is the request header.
    macro_rules! set {
        ($($variant:ident),+) => {
            match request {
                $( RequestMessage::$variant(r) => r.request_header.authentication_token = token.clone(), )+
            }
        };
    }
    set!(
        OpenSecureChannel, CloseSecureChannel, CreateSession, ActivateSession, CloseSession,
        Cancel, Read, Write, Browse, BrowseNext, TranslateBrowsePaths, RegisterNodes,
        UnregisterNodes, Call, HistoryRead, HistoryUpdate, CreateSubscription,
        ModifySubscription, SetPublishingMode, Publish, Republish, TransferSubscriptions,
        DeleteSubscriptions, CreateMonitoredItems, ModifyMonitoredItems, DeleteMonitoredItems,
        SetMonitoringMode, SetTriggering
    );
}

fn data_change_values(message: &NotificationMessage) -> Vec<f64> {
    let mut values = Vec::new();
    for object in message.notification_data.as_deref().unwrap_or(&[]) {
        if let Ok(body) = object.decode_body::<DataChangeNotification>(&DecodingLimits::default())
        {
            for item in body.monitored_items.as_deref().unwrap_or(&[]) {
                if let Some(v) = item.value.value.as_f64() {
                    values.push(v);
                }
            }
        }
    }
    values
}

fn add_test_variable(server: &Server, name: &str, initial: f64) -> NodeId {
    let node_id = NodeId::new_string(1, name);
    let space = server.address_space();
    let mut space = space.write();
    space.add_variable(
        uastack::address_space::VariableBuilder::new(
            node_id.clone(),
            QualifiedName::new(1, name),
        )
        .parent(
            NodeId::from(object_ids::OBJECTS_FOLDER),
            reference_type_ids::ORGANIZES,
        )
        .value(initial)
        .writable(),
    );
    node_id
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[test_log::test(tokio::test(start_paused = true))]
async fn basic_browse_finds_server_object() {
    let server = Server::new(ServerConfig::default());
    let mut client = TestClient::connect(&server).await;
    client.open_session("browse-test").await;

    let response = client
        .request(RequestMessage::Browse(BrowseRequest {
            request_header: header(),
            view: ViewDescription::default(),
            requested_max_references_per_node: 0,
            nodes_to_browse: Some(vec![BrowseDescription {
                node_id: NodeId::from(object_ids::OBJECTS_FOLDER),
                browse_direction: BrowseDirection::Forward,
                reference_type_id: NodeId::from(reference_type_ids::HIERARCHICAL_REFERENCES),
                include_subtypes: true,
                node_class_mask: 0,
                result_mask: browse_result_mask::ALL,
            }]),
        }))
        .await;

    let ResponseMessage::Browse(browse) = response else {
        panic!("expected BrowseResponse, got {response:?}");
    };
    let result = &browse.results.as_ref().unwrap()[0];
    assert!(result.status_code.is_good());
    let server_ref = result
        .references
        .as_ref()
        .unwrap()
        .iter()
        .find(|r| r.node_id.node_id == NodeId::from(object_ids::SERVER))
        .expect("Server reference present");
    assert!(server_ref.is_forward);
    assert_eq!(server_ref.browse_name, QualifiedName::new(0, "Server"));

    server.shutdown().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn read_server_status_state_is_running() {
    let server = Server::new(ServerConfig::default());
    let mut client = TestClient::connect(&server).await;
    client.open_session("read-test").await;

    let response = client
        .request(RequestMessage::Read(ReadRequest {
            request_header: header(),
            max_age: 0.0,
            timestamps_to_return: TimestampsToReturn::Both,
            nodes_to_read: Some(vec![ReadValueId {
                node_id: NodeId::from(variable_ids::SERVER_SERVER_STATUS_STATE),
                attribute_id: AttributeId::Value as u32,
                ..Default::default()
            }]),
        }))
        .await;

    let ResponseMessage::Read(read) = response else {
        panic!("expected ReadResponse, got {response:?}");
    };
    let value = &read.results.as_ref().unwrap()[0];
    assert!(value.is_good());
    assert_eq!(value.value, Variant::Int32(0), "ServerState Running");
    let source = value.source_timestamp.expect("source timestamp");
    assert!(DateTime::now().millis_since(source) < 5000);

    server.shutdown().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn subscription_lifecycle_keep_alives() {
    let server = Server::new(ServerConfig::default());
    let mut client = TestClient::connect(&server).await;
    client.open_session("keepalive-test").await;

    let subscription_id = client.create_subscription(100.0, 0).await;

    // First Publish parks; the keep-alive arrives after
    // maxKeepAliveCount x publishingInterval = 10 x 100 ms.
    let publish_id = client.send(RequestMessage::Publish(PublishRequest {
        request_header: header(),
        subscription_acknowledgements: None,
    })).await;
    let (id, response) = client.recv().await;
    assert_eq!(id, publish_id);
    let ResponseMessage::Publish(publish) = response else {
        panic!("expected PublishResponse, got {response:?}");
    };
    assert_eq!(publish.subscription_id, subscription_id);
    assert!(publish.notification_message.is_keep_alive());
    assert_eq!(publish.notification_message.sequence_number, 1);

    // Ten more publishes, ten more keep-alives with sequence 2..=11.
    for expected_sequence in 2u32..=11 {
        let publish = client.publish(Vec::new()).await;
        assert!(publish.notification_message.is_keep_alive());
        assert_eq!(publish.notification_message.sequence_number, expected_sequence);
    }

    server.shutdown().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn data_change_with_absolute_deadband() {
    let server = Server::new(ServerConfig::default());
    let node_id = add_test_variable(&server, "Process.Level", 1.0);
    let mut client = TestClient::connect(&server).await;
    client.open_session("deadband-test").await;

    let subscription_id = client.create_subscription(100.0, 0).await;
    client
        .create_data_item(subscription_id, node_id.clone(), 50.0, 4, Some(0.5))
        .await;

    // 1.0 is the initial sample; the remaining writes land one sampling
    // interval apart so each is observed exactly once.
    for value in [1.2, 1.8, 2.5, 2.6] {
        advance(Duration::from_millis(60)).await;
        server.set_value(&node_id, value);
    }
    advance(Duration::from_millis(60)).await;

    let mut reported = Vec::new();
    let mut rounds = 0;
    while reported.len() < 3 {
        rounds += 1;
        assert!(rounds < 50, "values never arrived: {reported:?}");
        let publish = client.publish(Vec::new()).await;
        reported.extend(data_change_values(&publish.notification_message));
        assert!(reported.len() <= 3, "deadband leaked a value: {reported:?}");
    }
    assert_eq!(reported, vec![1.0, 1.8, 2.5]);

    server.shutdown().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn transfer_subscription_preserves_queue() {
    let server = Server::new(ServerConfig::default());
    // V1 is in place before the item exists, so the initial sample IS V1.
    let node_id = add_test_variable(&server, "Line.Counter", 1.0);

    // Session A produces values but never publishes.
    let mut client_a = TestClient::connect(&server).await;
    client_a.open_session("transfer-source").await;
    let subscription_id = client_a.create_subscription(100.0, 1).await;
    client_a
        .create_data_item(subscription_id, node_id.clone(), 0.0, 10, None)
        .await;

    // V2..V5, each picked up by a tick (exception-based sampling).
    for value in [2.0, 3.0, 4.0, 5.0] {
        advance(Duration::from_millis(120)).await;
        server.set_value(&node_id, value);
    }
    advance(Duration::from_millis(120)).await;

    // Session B claims the subscription.
    let mut client_b = TestClient::connect(&server).await;
    client_b.open_session("transfer-target").await;
    let response = client_b
        .request(RequestMessage::TransferSubscriptions(
            TransferSubscriptionsRequest {
                request_header: header(),
                subscription_ids: Some(vec![subscription_id]),
                send_initial_values: false,
            },
        ))
        .await;
    let ResponseMessage::TransferSubscriptions(transfer) = response else {
        panic!("expected TransferSubscriptionsResponse, got {response:?}");
    };
    let result = &transfer.results.as_ref().unwrap()[0];
    assert!(result.status_code.is_good(), "transfer: {}", result.status_code);

    // B now drains the queued values in order, one per publish
    // (maxNotificationsPerPublish = 1): V1 first, then V2..V5.
    let mut received = Vec::new();
    let mut sequence_numbers = Vec::new();
    let mut rounds = 0;
    while received.len() < 5 {
        rounds += 1;
        assert!(rounds < 50, "values never arrived: {received:?}");
        let publish = client_b.publish(Vec::new()).await;
        if publish.notification_message.is_keep_alive() {
            continue;
        }
        sequence_numbers.push(publish.notification_message.sequence_number);
        received.extend(data_change_values(&publish.notification_message));
    }
    assert_eq!(received, vec![1.0, 2.0, 3.0, 4.0, 5.0]);

    // No gap, no repeat.
    let mut sorted = sequence_numbers.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), sequence_numbers.len(), "duplicate sequence numbers");
    for pair in sequence_numbers.windows(2) {
        assert_eq!(pair[1], pair[0] + 1, "sequence gap in {sequence_numbers:?}");
    }

    server.shutdown().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn translate_browse_path_to_current_time() {
    let server = Server::new(ServerConfig::default());
    let mut client = TestClient::connect(&server).await;
    client.open_session("translate-test").await;

    let path = uastack::address_space::relative_path::parse_relative_path(
        "/0:ServerStatus.0:CurrentTime",
    )
    .unwrap();
    let response = client
        .request(RequestMessage::TranslateBrowsePaths(
            TranslateBrowsePathsRequest {
                request_header: header(),
                browse_paths: Some(vec![BrowsePath {
                    starting_node: NodeId::from(object_ids::SERVER),
                    relative_path: path,
                }]),
            },
        ))
        .await;

    let ResponseMessage::TranslateBrowsePaths(translated) = response else {
        panic!("expected TranslateBrowsePathsResponse, got {response:?}");
    };
    let result = &translated.results.as_ref().unwrap()[0];
    assert!(result.status_code.is_good());
    let targets = result.targets.as_ref().unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(
        targets[0].target_id.node_id,
        NodeId::from(variable_ids::SERVER_SERVER_STATUS_CURRENT_TIME)
    );
    assert_eq!(targets[0].remaining_path_index, u32::MAX);

    server.shutdown().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn republish_and_acknowledgement() {
    let server = Server::new(ServerConfig::default());
    let node_id = add_test_variable(&server, "Repub.Value", 10.0);
    let mut client = TestClient::connect(&server).await;
    client.open_session("republish-test").await;

    let subscription_id = client.create_subscription(100.0, 0).await;
    client
        .create_data_item(subscription_id, node_id.clone(), 0.0, 10, None)
        .await;

    // Collect one real notification.
    let mut rounds = 0;
    let first = loop {
        rounds += 1;
        assert!(rounds < 50, "notification never arrived");
        let publish = client.publish(Vec::new()).await;
        if !publish.notification_message.is_keep_alive() {
            break publish;
        }
    };
    let sequence_number = first.notification_message.sequence_number;
    assert!(first
        .available_sequence_numbers
        .as_ref()
        .unwrap()
        .contains(&sequence_number));

    // Republish returns the same message while unacknowledged.
    let response = client
        .request(RequestMessage::Republish(RepublishRequest {
            request_header: header(),
            subscription_id,
            retransmit_sequence_number: sequence_number,
        }))
        .await;
    let ResponseMessage::Republish(republish) = response else {
        panic!("expected RepublishResponse, got {response:?}");
    };
    assert_eq!(
        republish.notification_message.sequence_number,
        sequence_number
    );

    // After acknowledgement the message is gone.
    let publish = client
        .publish(vec![SubscriptionAcknowledgement {
            subscription_id,
            sequence_number,
        }])
        .await;
    assert_eq!(publish.results.as_deref(), Some(&[StatusCode::GOOD][..]));

    let response = client
        .request(RequestMessage::Republish(RepublishRequest {
            request_header: header(),
            subscription_id,
            retransmit_sequence_number: sequence_number,
        }))
        .await;
    let ResponseMessage::ServiceFault(fault) = response else {
        panic!("expected fault after ack, got {response:?}");
    };
    assert_eq!(
        fault.response_header.service_result,
        StatusCode::BAD_MESSAGE_NOT_AVAILABLE
    );

    server.shutdown().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn write_service_updates_variable() {
    let server = Server::new(ServerConfig::default());
    let node_id = add_test_variable(&server, "Setpoint", 20.0);
    let mut client = TestClient::connect(&server).await;
    client.open_session("write-test").await;

    let response = client
        .request(RequestMessage::Write(WriteRequest {
            request_header: header(),
            nodes_to_write: Some(vec![WriteValue {
                node_id: node_id.clone(),
                attribute_id: AttributeId::Value as u32,
                index_range: None,
                value: DataValue::new(21.5, DateTime::now()),
            }]),
        }))
        .await;
    let ResponseMessage::Write(write) = response else {
        panic!("expected WriteResponse, got {response:?}");
    };
    assert_eq!(write.results.as_deref(), Some(&[StatusCode::GOOD][..]));

    // Non-writable attribute is rejected per operation, service is Good.
    let response = client
        .request(RequestMessage::Write(WriteRequest {
            request_header: header(),
            nodes_to_write: Some(vec![WriteValue {
                node_id: node_id.clone(),
                attribute_id: AttributeId::BrowseName as u32,
                index_range: None,
                value: DataValue::new(1i32, DateTime::now()),
            }]),
        }))
        .await;
    let ResponseMessage::Write(write) = response else {
        panic!("expected WriteResponse, got {response:?}");
    };
    assert_eq!(
        write.results.as_deref(),
        Some(&[StatusCode::BAD_NOT_WRITABLE][..])
    );

    server.shutdown().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn requests_without_session_are_faulted() {
    let server = Server::new(ServerConfig::default());
    let mut client = TestClient::connect(&server).await;
    // No session created: the read must fail at the session layer.
    let response = client
        .request(RequestMessage::Read(ReadRequest {
            request_header: header(),
            max_age: 0.0,
            timestamps_to_return: TimestampsToReturn::Both,
            nodes_to_read: Some(vec![ReadValueId {
                node_id: NodeId::from(variable_ids::SERVER_SERVER_STATUS_STATE),
                attribute_id: AttributeId::Value as u32,
                ..Default::default()
            }]),
        }))
        .await;
    let ResponseMessage::ServiceFault(fault) = response else {
        panic!("expected fault, got {response:?}");
    };
    assert_eq!(
        fault.response_header.service_result,
        StatusCode::BAD_SESSION_ID_INVALID
    );
    assert!(server.diagnostics().rejected_requests_count >= 1);

    server.shutdown().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn get_monitored_items_method() {
    let server = Server::new(ServerConfig::default());
    let node_id = add_test_variable(&server, "Monitored", 5.0);
    let mut client = TestClient::connect(&server).await;
    client.open_session("method-test").await;

    let subscription_id = client.create_subscription(100.0, 0).await;
    let item_id = client
        .create_data_item(subscription_id, node_id, 100.0, 2, None)
        .await;

    let response = client
        .request(RequestMessage::Call(CallRequest {
            request_header: header(),
            methods_to_call: Some(vec![CallMethodRequest {
                object_id: NodeId::from(object_ids::SERVER),
                method_id: NodeId::from(
                    uastack::types::ids::method_ids::SERVER_GET_MONITORED_ITEMS,
                ),
                input_arguments: Some(vec![Variant::UInt32(subscription_id)]),
            }]),
        }))
        .await;
    let ResponseMessage::Call(call) = response else {
        panic!("expected CallResponse, got {response:?}");
    };
    let result = &call.results.as_ref().unwrap()[0];
    assert!(result.status_code.is_good());
    let outputs = result.output_arguments.as_ref().unwrap();
    assert_eq!(outputs.len(), 2);
    let Variant::Array(server_handles) = &outputs[0] else {
        panic!("expected array of server handles");
    };
    assert_eq!(server_handles.values, vec![Variant::UInt32(item_id)]);

    server.shutdown().await.unwrap();
}
