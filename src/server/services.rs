//! Service dispatch.
//!
//! Every handler takes `&mut EngineState` plus the connection the request
//! arrived on and returns the responses to send. A request can fan out
//! into several responses (closing a session completes its parked Publish
//! requests, possibly on another connection), so the result is a list of
//! [`Outbound`] frames rather than a single message.
//!
//! Per-operation failures ride inside result arrays with the service
//! result `Good`; service-level failures become `ServiceFault`.

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::address_space::{CallContext, NodeKind};
use crate::messages::*;
use crate::server::monitored_item::MonitoredItem;
use crate::server::publish::{priority_order, ParkedPublish};
use crate::server::session::{
    revise_session_timeout, BrowseContinuationPoint, CloseReason, Session, SessionStatus,
    UserIdentity,
};
use crate::server::state::{
    random_authentication_token, Diagnostics, EngineState, SessionInfo, SubscriptionHome,
};
use crate::server::subscription::Subscription;
use crate::types::ids::{encoding_ids, method_ids, variable_ids, AttributeId};
use crate::types::{
    ByteString, DataValue, DateTime, NodeId, StatusCode, Variant, VariantType,
};

/// Per-connection facts the dispatcher needs.
#[derive(Debug)]
pub struct ConnectionMeta {
    pub connection_id: u64,
    /// Client application URI learned from CreateSession on this
    /// connection; re-binding checks compare against it.
    pub application_uri: Option<String>,
}

/// One response frame to emit.
#[derive(Debug)]
pub struct Outbound {
    pub connection_id: u64,
    pub request_id: u32,
    pub response: ResponseMessage,
}

/// Result of dispatching one request.
pub enum DispatchResult {
    /// All responses are ready.
    Done(Vec<Outbound>),
    /// A Call into user code; the event loop runs it off-loop.
    CallPending {
        session_id: NodeId,
        request: CallRequest,
    },
}

/// Dispatch one decoded request.
pub fn dispatch(
    state: &mut EngineState,
    meta: &mut ConnectionMeta,
    request_id: u32,
    request: RequestMessage,
    now: Instant,
) -> DispatchResult {
    let connection_id = meta.connection_id;
    let single = |response: ResponseMessage| {
        DispatchResult::Done(vec![Outbound {
            connection_id,
            request_id,
            response,
        }])
    };

    match request {
        RequestMessage::CreateSession(request) => {
            let (response, extra) = create_session(state, meta, &request, now);
            let mut out = vec![Outbound {
                connection_id,
                request_id,
                response,
            }];
            out.extend(extra);
            DispatchResult::Done(out)
        }
        RequestMessage::ActivateSession(request) => {
            single(activate_session(state, meta, &request, now))
        }
        RequestMessage::CloseSession(request) => {
            let header = request.request_header.clone();
            match resolve_session(state, &header, connection_id, now, false) {
                Err(status) => single(fault(state, &header, status)),
                Ok(token) => {
                    let mut out = close_session(
                        state,
                        &token,
                        request.delete_subscriptions,
                        CloseReason::CloseSession,
                    );
                    out.push(Outbound {
                        connection_id,
                        request_id,
                        response: ResponseMessage::CloseSession(CloseSessionResponse {
                            response_header: ResponseHeader::new(&header, StatusCode::GOOD),
                        }),
                    });
                    DispatchResult::Done(out)
                }
            }
        }
        RequestMessage::Cancel(request) => {
            let header = request.request_header.clone();
            match resolve_session(state, &header, connection_id, now, true) {
                Err(status) => single(fault(state, &header, status)),
                Ok(token) => {
                    let session = state.sessions.get_mut(&token).expect("resolved");
                    let cancelled = session.publish_queue.cancel_by_handle(request.request_handle);
                    let cancel_count = cancelled.len() as u32;
                    let mut out: Vec<Outbound> = cancelled
                        .into_iter()
                        .map(|parked| {
                            complete_publish_with_fault(
                                parked,
                                StatusCode::BAD_REQUEST_CANCELLED_BY_REQUEST,
                            )
                        })
                        .collect();
                    out.push(Outbound {
                        connection_id,
                        request_id,
                        response: ResponseMessage::Cancel(CancelResponse {
                            response_header: ResponseHeader::new(&header, StatusCode::GOOD),
                            cancel_count,
                        }),
                    });
                    DispatchResult::Done(out)
                }
            }
        }
        RequestMessage::Read(request) => with_session(state, connection_id, request_id, now, request.request_header.clone(), |state, _token| {
            read(state, &request)
        }),
        RequestMessage::Write(request) => with_session(state, connection_id, request_id, now, request.request_header.clone(), |state, _token| {
            write(state, &request)
        }),
        RequestMessage::Browse(request) => with_session(state, connection_id, request_id, now, request.request_header.clone(), |state, token| {
            browse(state, token, &request)
        }),
        RequestMessage::BrowseNext(request) => with_session(state, connection_id, request_id, now, request.request_header.clone(), |state, token| {
            browse_next(state, token, &request)
        }),
        RequestMessage::TranslateBrowsePaths(request) => with_session(state, connection_id, request_id, now, request.request_header.clone(), |state, _token| {
            translate_browse_paths(state, &request)
        }),
        RequestMessage::RegisterNodes(request) => with_session(state, connection_id, request_id, now, request.request_header.clone(), |state, token| {
            register_nodes(state, token, &request)
        }),
        RequestMessage::UnregisterNodes(request) => with_session(state, connection_id, request_id, now, request.request_header.clone(), |state, token| {
            unregister_nodes(state, token, &request)
        }),
        RequestMessage::Call(request) => {
            let header = request.request_header.clone();
            match resolve_session(state, &header, connection_id, now, true) {
                Err(status) => single(fault(state, &header, status)),
                Ok(token) => {
                    // Well-known server methods touch engine state and run
                    // inline; everything else is user code and runs off
                    // the event loop.
                    if calls_engine_methods(&request) {
                        single(crate::server::methods::call_engine_methods(
                            state, &token, &request,
                        ))
                    } else {
                        let session_id = state.sessions[&token].session_id.clone();
                        DispatchResult::CallPending {
                            session_id,
                            request,
                        }
                    }
                }
            }
        }
        RequestMessage::HistoryRead(request) => with_session(state, connection_id, request_id, now, request.request_header.clone(), |_state, _token| {
            history_read(&request)
        }),
        RequestMessage::HistoryUpdate(request) => with_session(state, connection_id, request_id, now, request.request_header.clone(), |_state, _token| {
            history_update(&request)
        }),
        RequestMessage::CreateSubscription(request) => with_session(state, connection_id, request_id, now, request.request_header.clone(), |state, token| {
            create_subscription(state, token, &request, now)
        }),
        RequestMessage::ModifySubscription(request) => with_session(state, connection_id, request_id, now, request.request_header.clone(), |state, token| {
            modify_subscription(state, token, &request)
        }),
        RequestMessage::SetPublishingMode(request) => with_session(state, connection_id, request_id, now, request.request_header.clone(), |state, token| {
            set_publishing_mode(state, token, &request)
        }),
        RequestMessage::DeleteSubscriptions(request) => with_session(state, connection_id, request_id, now, request.request_header.clone(), |state, token| {
            delete_subscriptions(state, token, &request)
        }),
        RequestMessage::TransferSubscriptions(request) => with_session(state, connection_id, request_id, now, request.request_header.clone(), |state, token| {
            transfer_subscriptions(state, token, &request, now)
        }),
        RequestMessage::Publish(request) => {
            let header = request.request_header.clone();
            match resolve_session(state, &header, connection_id, now, true) {
                Err(status) => single(fault(state, &header, status)),
                Ok(token) => DispatchResult::Done(publish(
                    state,
                    &token,
                    connection_id,
                    request_id,
                    &request,
                    now,
                )),
            }
        }
        RequestMessage::Republish(request) => with_session(state, connection_id, request_id, now, request.request_header.clone(), |state, token| {
            republish(state, token, &request)
        }),
        RequestMessage::CreateMonitoredItems(request) => with_session(state, connection_id, request_id, now, request.request_header.clone(), |state, token| {
            create_monitored_items(state, token, &request, now)
        }),
        RequestMessage::ModifyMonitoredItems(request) => with_session(state, connection_id, request_id, now, request.request_header.clone(), |state, token| {
            modify_monitored_items(state, token, &request)
        }),
        RequestMessage::DeleteMonitoredItems(request) => with_session(state, connection_id, request_id, now, request.request_header.clone(), |state, token| {
            delete_monitored_items(state, token, &request)
        }),
        RequestMessage::SetMonitoringMode(request) => with_session(state, connection_id, request_id, now, request.request_header.clone(), |state, token| {
            set_monitoring_mode(state, token, &request)
        }),
        RequestMessage::SetTriggering(request) => with_session(state, connection_id, request_id, now, request.request_header.clone(), |state, token| {
            set_triggering(state, token, &request)
        }),
        // OPN and CLO are transport-level and never reach the dispatcher.
        RequestMessage::OpenSecureChannel(request) => single(ResponseMessage::fault(
            &request.request_header,
            StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID,
        )),
        RequestMessage::CloseSecureChannel(request) => single(ResponseMessage::fault(
            &request.request_header,
            StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID,
        )),
    }
}

// ============================================================================
// SESSION RESOLUTION
// ============================================================================

fn fault(state: &EngineState, header: &RequestHeader, status: StatusCode) -> ResponseMessage {
    if status == StatusCode::BAD_SECURITY_CHECKS_FAILED {
        Diagnostics::bump(&state.diagnostics.security_rejected_requests_count);
    } else {
        Diagnostics::bump(&state.diagnostics.rejected_requests_count);
    }
    ResponseMessage::fault(header, status)
}

/// Whether the session behind `token` currently owns `subscription_id`.
fn owns_subscription(state: &EngineState, token: &NodeId, subscription_id: u32) -> bool {
    state
        .sessions
        .get(token)
        .is_some_and(|s| s.subscriptions.contains_key(&subscription_id))
}

/// Locate the session a request belongs to and refresh its watchdog.
fn resolve_session(
    state: &mut EngineState,
    header: &RequestHeader,
    connection_id: u64,
    now: Instant,
    require_active: bool,
) -> Result<NodeId, StatusCode> {
    let token = header.authentication_token.clone();
    let Some(session) = state.sessions.get_mut(&token) else {
        return Err(StatusCode::BAD_SESSION_ID_INVALID);
    };
    if require_active {
        match session.status {
            SessionStatus::Active => {}
            SessionStatus::New | SessionStatus::Screwed => {
                return Err(StatusCode::BAD_SESSION_NOT_ACTIVATED)
            }
            SessionStatus::Closed | SessionStatus::Disposed => {
                return Err(StatusCode::BAD_SESSION_ID_INVALID)
            }
        }
        if session.connection_id != Some(connection_id) {
            return Err(StatusCode::BAD_SESSION_ID_INVALID);
        }
    }
    session.touch(now);
    Ok(token)
}

fn with_session(
    state: &mut EngineState,
    connection_id: u64,
    request_id: u32,
    now: Instant,
    header: RequestHeader,
    handler: impl FnOnce(&mut EngineState, &NodeId) -> ResponseMessage,
) -> DispatchResult {
    let response = match resolve_session(state, &header, connection_id, now, true) {
        Err(status) => fault(state, &header, status),
        Ok(token) => handler(state, &token),
    };
    DispatchResult::Done(vec![Outbound {
        connection_id,
        request_id,
        response,
    }])
}

// ============================================================================
// SESSION SERVICES
// ============================================================================

fn create_session(
    state: &mut EngineState,
    meta: &mut ConnectionMeta,
    request: &CreateSessionRequest,
    now: Instant,
) -> (ResponseMessage, Vec<Outbound>) {
    let mut extra = Vec::new();

    // Admission control with eviction of the oldest lifeless session.
    if state.sessions.len() >= state.config.max_sessions {
        let evictable = state
            .sessions
            .values()
            .filter(|s| {
                matches!(
                    s.status,
                    SessionStatus::Screwed | SessionStatus::Closed | SessionStatus::Disposed
                )
            })
            .min_by_key(|s| s.last_activity)
            .or_else(|| {
                state
                    .sessions
                    .values()
                    .filter(|s| s.status == SessionStatus::New)
                    .min_by_key(|s| s.last_activity)
            })
            .map(|s| s.authentication_token.clone());
        match evictable {
            Some(victim) => {
                debug!(%victim, "evicting inactive session to admit a new one");
                extra = close_session(state, &victim, true, CloseReason::Forcing);
            }
            None => {
                Diagnostics::bump(&state.diagnostics.rejected_session_count);
                return (
                    fault(
                        state,
                        &request.request_header,
                        StatusCode::BAD_TOO_MANY_SESSIONS,
                    ),
                    extra,
                );
            }
        }
    }

    let session_id = NodeId::new_numeric(1, state.session_ids.next());
    let authentication_token = random_authentication_token();
    let revised_timeout = revise_session_timeout(
        request.requested_session_timeout,
        state.config.min_session_timeout,
        state.config.max_session_timeout,
    );
    let client_uri = request
        .client_description
        .application_uri
        .clone()
        .unwrap_or_default();
    if meta.application_uri.is_none() && !client_uri.is_empty() {
        meta.application_uri = Some(client_uri.clone());
    }

    let mut session = Session::new(
        session_id.clone(),
        authentication_token.clone(),
        request.session_name.clone().unwrap_or_default(),
        revised_timeout,
        meta.connection_id,
        client_uri,
        now,
    );
    session.server_nonce = random_nonce();
    let server_nonce = session.server_nonce.clone();

    Diagnostics::bump(&state.diagnostics.cumulated_session_count);
    Diagnostics::bump(&state.diagnostics.current_session_count);
    state.session_infos.insert(
        authentication_token.clone(),
        SessionInfo {
            session_id: session_id.clone(),
            name: session.name.clone(),
            created_at: session.created_at,
            subscription_count: 0,
        },
    );
    state.sessions.insert(authentication_token.clone(), session);
    debug!(%session_id, timeout_ms = revised_timeout, "session created");

    let response = ResponseMessage::CreateSession(CreateSessionResponse {
        response_header: ResponseHeader::new(&request.request_header, StatusCode::GOOD),
        session_id,
        authentication_token,
        revised_session_timeout: revised_timeout,
        server_nonce,
        server_certificate: ByteString::null(),
        server_endpoints: Some(vec![default_endpoint(state)]),
        server_software_certificates: None,
        server_signature: SignatureData::default(),
        max_request_message_size: state.config.transport.max_message_size,
    });
    (response, extra)
}

fn default_endpoint(state: &EngineState) -> EndpointDescription {
    EndpointDescription {
        endpoint_url: Some(format!(
            "opc.tcp://localhost:{}/",
            state.config.port
        )),
        server: ApplicationDescription {
            application_uri: Some(state.config.application_uri.clone()),
            product_uri: Some(state.config.product_uri.clone()),
            application_name: crate::types::LocalizedText::new(
                state.config.application_name.clone(),
            ),
            application_type: ApplicationType::Server,
            ..Default::default()
        },
        server_certificate: ByteString::null(),
        security_mode: MessageSecurityMode::None,
        security_policy_uri: Some(
            "http://opcfoundation.org/UA/SecurityPolicy#None".to_string(),
        ),
        user_identity_tokens: Some(vec![
            UserTokenPolicy {
                policy_id: Some("anonymous".to_string()),
                token_type: UserTokenType::Anonymous,
                ..Default::default()
            },
            UserTokenPolicy {
                policy_id: Some("username".to_string()),
                token_type: UserTokenType::UserName,
                ..Default::default()
            },
        ]),
        transport_profile_uri: Some(
            "http://opcfoundation.org/UA-Profile/Transport/uatcp-uasc-uabinary".to_string(),
        ),
        security_level: 0,
    }
}

fn random_nonce() -> ByteString {
    use rand::RngCore;
    let mut bytes = vec![0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    ByteString::from_bytes(bytes)
}

fn activate_session(
    state: &mut EngineState,
    meta: &mut ConnectionMeta,
    request: &ActivateSessionRequest,
    now: Instant,
) -> ResponseMessage {
    let header = &request.request_header;
    let token = header.authentication_token.clone();
    let identity = match parse_identity(state, &request.user_identity_token) {
        Ok(identity) => identity,
        Err(status) => return fault(state, header, status),
    };

    if !state.sessions.contains_key(&token) {
        return fault(state, header, StatusCode::BAD_SESSION_ID_INVALID);
    }
    let session = state.sessions.get_mut(&token).expect("checked");

    // Re-binding onto a connection whose client application differs from
    // the one that created the session is rejected.
    match (&meta.application_uri, session.client_application_uri.as_str()) {
        (Some(bound), original) if !original.is_empty() && bound != original => {
            warn!(session = %session.session_id, "activation from foreign application");
            Diagnostics::bump(&state.diagnostics.security_rejected_requests_count);
            return ResponseMessage::fault(header, StatusCode::BAD_APPLICATION_SIGNATURE_INVALID);
        }
        (None, original) if !original.is_empty() => {
            meta.application_uri = Some(original.to_string());
        }
        _ => {}
    }

    session.user_identity = identity;
    session.bind_channel(meta.connection_id, now);
    session.server_nonce = random_nonce();
    debug!(session = %session.session_id, "session activated");

    ResponseMessage::ActivateSession(ActivateSessionResponse {
        response_header: ResponseHeader::new(header, StatusCode::GOOD),
        server_nonce: session.server_nonce.clone(),
        results: None,
        diagnostic_infos: None,
    })
}

fn parse_identity(
    state: &EngineState,
    token: &crate::types::ExtensionObject,
) -> Result<UserIdentity, StatusCode> {
    if token.is_null() {
        return Ok(UserIdentity::Anonymous);
    }
    match token.type_id.as_ns0_numeric() {
        Some(id) if id == encoding_ids::ANONYMOUS_IDENTITY_TOKEN => Ok(UserIdentity::Anonymous),
        Some(id) if id == encoding_ids::USER_NAME_IDENTITY_TOKEN => {
            let parsed: UserNameIdentityToken = token
                .decode_body(&state.config.decoding)
                .map_err(|_| StatusCode::BAD_IDENTITY_TOKEN_INVALID)?;
            let user = parsed.user_name.unwrap_or_default();
            if user.is_empty() {
                return Err(StatusCode::BAD_IDENTITY_TOKEN_INVALID);
            }
            Ok(UserIdentity::UserName {
                user,
                key: parsed.password,
            })
        }
        _ => Err(StatusCode::BAD_IDENTITY_TOKEN_REJECTED),
    }
}

/// Close a session and release everything it owns. Used by the
/// CloseSession service, the watchdog, eviction and shutdown.
pub fn close_session(
    state: &mut EngineState,
    token: &NodeId,
    delete_subscriptions: bool,
    reason: CloseReason,
) -> Vec<Outbound> {
    let Some(mut session) = state.sessions.remove(token) else {
        return Vec::new();
    };
    debug!(session = %session.session_id, ?reason, "closing session");

    let mut out: Vec<Outbound> = session
        .publish_queue
        .drain()
        .into_iter()
        .map(|parked| complete_publish_with_fault(parked, StatusCode::BAD_SESSION_CLOSED))
        .collect();

    let subscriptions = std::mem::take(&mut session.subscriptions);
    for (id, subscription) in subscriptions {
        if delete_subscriptions {
            state.subscription_home.remove(&id);
            Diagnostics::decrement(&state.diagnostics.current_subscription_count);
        } else {
            // Detach to the orphanage: lifetime counters keep running,
            // no Publish requests are accepted there.
            state.subscription_home.insert(id, SubscriptionHome::Orphanage);
            state.orphanage.insert(id, subscription);
        }
    }

    session.status = SessionStatus::Closed;
    state.session_infos.remove(token);
    Diagnostics::decrement(&state.diagnostics.current_session_count);
    match reason {
        CloseReason::Timeout => Diagnostics::bump(&state.diagnostics.session_timeout_count),
        CloseReason::Forcing | CloseReason::Terminated => {
            Diagnostics::bump(&state.diagnostics.session_abort_count)
        }
        CloseReason::CloseSession => {}
    }
    out.shrink_to_fit();
    out
}

fn complete_publish_with_fault(parked: ParkedPublish, status: StatusCode) -> Outbound {
    let header = RequestHeader {
        request_handle: parked.request_handle,
        ..Default::default()
    };
    Outbound {
        connection_id: parked.connection_id,
        request_id: parked.request_id,
        response: ResponseMessage::fault(&header, status),
    }
}

// ============================================================================
// ATTRIBUTE SERVICES
// ============================================================================

fn read(state: &mut EngineState, request: &ReadRequest) -> ResponseMessage {
    let header = &request.request_header;
    if request.max_age < 0.0 {
        return fault(state, header, StatusCode::BAD_MAX_AGE_INVALID);
    }
    if request.timestamps_to_return == TimestampsToReturn::Invalid {
        return fault(state, header, StatusCode::BAD_TIMESTAMPS_TO_RETURN_INVALID);
    }
    let Some(nodes) = request.nodes_to_read.as_ref().filter(|n| !n.is_empty()) else {
        return fault(state, header, StatusCode::BAD_NOTHING_TO_DO);
    };

    refresh_server_variables(state);
    let space = state.address_space.clone();
    let space = space.read();
    let results: Vec<DataValue> = nodes
        .iter()
        .map(|node| {
            let mut value = space.read_attribute(&node.node_id, node.attribute_id, request.max_age);
            match request.timestamps_to_return {
                TimestampsToReturn::Source => value.server_timestamp = None,
                TimestampsToReturn::Server => value.source_timestamp = None,
                TimestampsToReturn::Neither => {
                    value.source_timestamp = None;
                    value.server_timestamp = None;
                }
                _ => {}
            }
            value
        })
        .collect();

    ResponseMessage::Read(ReadResponse {
        response_header: ResponseHeader::new(header, StatusCode::GOOD),
        results: Some(results),
        diagnostic_infos: None,
    })
}

/// Values under ServerStatus are served live.
fn refresh_server_variables(state: &EngineState) {
    let mut space = state.address_space.write();
    let now = DateTime::now();
    space.set_value(
        &NodeId::from(variable_ids::SERVER_SERVER_STATUS_CURRENT_TIME),
        Variant::DateTime(now),
    );
    let summary = state.diagnostics.snapshot();
    let wire = ServerDiagnosticsSummary {
        server_view_count: 0,
        current_session_count: summary.current_session_count,
        cumulated_session_count: summary.cumulated_session_count,
        security_rejected_session_count: 0,
        rejected_session_count: summary.rejected_session_count,
        session_timeout_count: summary.session_timeout_count,
        session_abort_count: 0,
        publishing_interval_count: summary.current_subscription_count,
        current_subscription_count: summary.current_subscription_count,
        cumulated_subscription_count: summary.cumulated_subscription_count,
        security_rejected_requests_count: summary.security_rejected_requests_count,
        rejected_requests_count: summary.rejected_requests_count,
    };
    if let Ok(object) = crate::types::ExtensionObject::from_encodable(
        NodeId::from(encoding_ids::SERVER_DIAGNOSTICS_SUMMARY),
        &wire,
    ) {
        space.set_value(
            &NodeId::from(variable_ids::SERVER_SERVER_DIAGNOSTICS_SERVER_DIAGNOSTICS_SUMMARY),
            Variant::ExtensionObject(Box::new(object)),
        );
    }
}

fn write(state: &mut EngineState, request: &WriteRequest) -> ResponseMessage {
    let header = &request.request_header;
    let Some(nodes) = request.nodes_to_write.as_ref().filter(|n| !n.is_empty()) else {
        return fault(state, header, StatusCode::BAD_NOTHING_TO_DO);
    };
    let space = state.address_space.clone();
    let mut space = space.write();
    let results: Vec<StatusCode> = nodes
        .iter()
        .map(|write| space.write_attribute(&write.node_id, write.attribute_id, &write.value))
        .collect();
    ResponseMessage::Write(WriteResponse {
        response_header: ResponseHeader::new(header, StatusCode::GOOD),
        results: Some(results),
        diagnostic_infos: None,
    })
}

fn history_read(request: &HistoryReadRequest) -> ResponseMessage {
    // Dispatch only; storage back-ends are not in scope.
    let results = request
        .nodes_to_read
        .as_ref()
        .map(|nodes| {
            nodes
                .iter()
                .map(|_| HistoryReadResult {
                    status_code: StatusCode::BAD_HISTORY_OPERATION_UNSUPPORTED,
                    continuation_point: ByteString::null(),
                    history_data: crate::types::ExtensionObject::null(),
                })
                .collect()
        })
        .unwrap_or_default();
    ResponseMessage::HistoryRead(HistoryReadResponse {
        response_header: ResponseHeader::new(&request.request_header, StatusCode::GOOD),
        results: Some(results),
        diagnostic_infos: None,
    })
}

fn history_update(request: &HistoryUpdateRequest) -> ResponseMessage {
    let results = request
        .history_update_details
        .as_ref()
        .map(|details| {
            details
                .iter()
                .map(|_| HistoryUpdateResult {
                    status_code: StatusCode::BAD_HISTORY_OPERATION_UNSUPPORTED,
                    operation_results: None,
                    diagnostic_infos: None,
                })
                .collect()
        })
        .unwrap_or_default();
    ResponseMessage::HistoryUpdate(HistoryUpdateResponse {
        response_header: ResponseHeader::new(&request.request_header, StatusCode::GOOD),
        results: Some(results),
        diagnostic_infos: None,
    })
}

// ============================================================================
// VIEW SERVICES
// ============================================================================

fn browse(state: &mut EngineState, token: &NodeId, request: &BrowseRequest) -> ResponseMessage {
    let header = &request.request_header;
    if !request.view.view_id.is_null() {
        return fault(state, header, StatusCode::BAD_NODE_ID_UNKNOWN);
    }
    let Some(descriptions) = request.nodes_to_browse.as_ref().filter(|n| !n.is_empty()) else {
        return fault(state, header, StatusCode::BAD_NOTHING_TO_DO);
    };
    let max_references = if request.requested_max_references_per_node == 0 {
        state.config.max_references_per_node
    } else {
        (request.requested_max_references_per_node as usize)
            .min(state.config.max_references_per_node)
    };

    let space = state.address_space.clone();
    let space = space.read();
    let max_points = state.config.max_browse_continuation_points;
    let session = state.sessions.get_mut(token).expect("resolved");

    let results: Vec<BrowseResult> = descriptions
        .iter()
        .map(|description| match space.browse(description) {
            Err(status) => BrowseResult {
                status_code: status,
                continuation_point: ByteString::null(),
                references: None,
            },
            Ok(mut references) => {
                apply_result_mask(&mut references, description.result_mask);
                if references.len() <= max_references {
                    BrowseResult {
                        status_code: StatusCode::GOOD,
                        continuation_point: ByteString::null(),
                        references: Some(references),
                    }
                } else {
                    let remaining = references.split_off(max_references);
                    let id = random_nonce();
                    let stored = session.store_continuation_point(
                        BrowseContinuationPoint {
                            id: id.clone(),
                            remaining,
                            max_references,
                        },
                        max_points,
                    );
                    if stored {
                        BrowseResult {
                            status_code: StatusCode::GOOD,
                            continuation_point: id,
                            references: Some(references),
                        }
                    } else {
                        BrowseResult {
                            status_code: StatusCode::BAD_NO_CONTINUATION_POINTS,
                            continuation_point: ByteString::null(),
                            references: None,
                        }
                    }
                }
            }
        })
        .collect();

    ResponseMessage::Browse(BrowseResponse {
        response_header: ResponseHeader::new(header, StatusCode::GOOD),
        results: Some(results),
        diagnostic_infos: None,
    })
}

fn apply_result_mask(references: &mut [ReferenceDescription], mask: u32) {
    use crate::messages::browse_result_mask as rm;
    for reference in references {
        if mask & rm::REFERENCE_TYPE == 0 {
            reference.reference_type_id = NodeId::null();
        }
        if mask & rm::NODE_CLASS == 0 {
            reference.node_class = NodeClass::Unspecified;
        }
        if mask & rm::BROWSE_NAME == 0 {
            reference.browse_name = crate::types::QualifiedName::null();
        }
        if mask & rm::DISPLAY_NAME == 0 {
            reference.display_name = crate::types::LocalizedText::default();
        }
        if mask & rm::TYPE_DEFINITION == 0 {
            reference.type_definition = crate::types::ExpandedNodeId::default();
        }
    }
}

fn browse_next(
    state: &mut EngineState,
    token: &NodeId,
    request: &BrowseNextRequest,
) -> ResponseMessage {
    let header = &request.request_header;
    let Some(points) = request
        .continuation_points
        .as_ref()
        .filter(|p| !p.is_empty())
    else {
        return fault(state, header, StatusCode::BAD_NOTHING_TO_DO);
    };
    let max_points = state.config.max_browse_continuation_points;
    let session = state.sessions.get_mut(token).expect("resolved");

    let results: Vec<BrowseResult> = points
        .iter()
        .map(|id| match session.take_continuation_point(id) {
            None => BrowseResult {
                status_code: StatusCode::BAD_CONTINUATION_POINT_INVALID,
                continuation_point: ByteString::null(),
                references: None,
            },
            Some(point) if request.release_continuation_points => BrowseResult {
                status_code: StatusCode::GOOD,
                continuation_point: ByteString::null(),
                references: None,
            },
            Some(mut point) => {
                let mut references = std::mem::take(&mut point.remaining);
                if references.len() > point.max_references {
                    point.remaining = references.split_off(point.max_references);
                    point.id = random_nonce();
                    let new_id = point.id.clone();
                    session.store_continuation_point(point, max_points);
                    BrowseResult {
                        status_code: StatusCode::GOOD,
                        continuation_point: new_id,
                        references: Some(references),
                    }
                } else {
                    BrowseResult {
                        status_code: StatusCode::GOOD,
                        continuation_point: ByteString::null(),
                        references: Some(references),
                    }
                }
            }
        })
        .collect();

    ResponseMessage::BrowseNext(BrowseNextResponse {
        response_header: ResponseHeader::new(header, StatusCode::GOOD),
        results: Some(results),
        diagnostic_infos: None,
    })
}

fn translate_browse_paths(
    state: &mut EngineState,
    request: &TranslateBrowsePathsRequest,
) -> ResponseMessage {
    let header = &request.request_header;
    let Some(paths) = request.browse_paths.as_ref().filter(|p| !p.is_empty()) else {
        return fault(state, header, StatusCode::BAD_NOTHING_TO_DO);
    };
    let space = state.address_space.clone();
    let space = space.read();
    let results: Vec<BrowsePathResult> = paths
        .iter()
        .map(|path| {
            match space.translate_path(&path.starting_node, &path.relative_path) {
                Ok(targets) => BrowsePathResult {
                    status_code: StatusCode::GOOD,
                    targets: Some(
                        targets
                            .into_iter()
                            .map(|node_id| BrowsePathTarget {
                                target_id: crate::types::ExpandedNodeId::local(node_id),
                                // The whole path resolved.
                                remaining_path_index: u32::MAX,
                            })
                            .collect(),
                    ),
                },
                Err(status) => BrowsePathResult {
                    status_code: status,
                    targets: None,
                },
            }
        })
        .collect();
    ResponseMessage::TranslateBrowsePaths(TranslateBrowsePathsResponse {
        response_header: ResponseHeader::new(header, StatusCode::GOOD),
        results: Some(results),
        diagnostic_infos: None,
    })
}

fn register_nodes(
    state: &mut EngineState,
    token: &NodeId,
    request: &RegisterNodesRequest,
) -> ResponseMessage {
    let header = &request.request_header;
    let Some(nodes) = request.nodes_to_register.as_ref().filter(|n| !n.is_empty()) else {
        return fault(state, header, StatusCode::BAD_NOTHING_TO_DO);
    };
    let session = state.sessions.get_mut(token).expect("resolved");
    // Identity mapping: the registered id is the original id. The table
    // still tracks registrations so UnregisterNodes stays meaningful.
    for node in nodes {
        session.registered_nodes.insert(node.clone(), node.clone());
    }
    ResponseMessage::RegisterNodes(RegisterNodesResponse {
        response_header: ResponseHeader::new(header, StatusCode::GOOD),
        registered_node_ids: Some(nodes.clone()),
    })
}

fn unregister_nodes(
    state: &mut EngineState,
    token: &NodeId,
    request: &UnregisterNodesRequest,
) -> ResponseMessage {
    let header = &request.request_header;
    let Some(nodes) = request
        .nodes_to_unregister
        .as_ref()
        .filter(|n| !n.is_empty())
    else {
        return fault(state, header, StatusCode::BAD_NOTHING_TO_DO);
    };
    let session = state.sessions.get_mut(token).expect("resolved");
    for node in nodes {
        session.registered_nodes.remove(node);
    }
    ResponseMessage::UnregisterNodes(UnregisterNodesResponse {
        response_header: ResponseHeader::new(header, StatusCode::GOOD),
    })
}

// ============================================================================
// SUBSCRIPTION SERVICES
// ============================================================================

fn create_subscription(
    state: &mut EngineState,
    token: &NodeId,
    request: &CreateSubscriptionRequest,
    now: Instant,
) -> ResponseMessage {
    let header = &request.request_header;
    let max_subscriptions = state.config.max_subscriptions_per_session;
    let at_capacity = state
        .sessions
        .get(token)
        .is_some_and(|s| s.subscriptions.len() >= max_subscriptions);
    if at_capacity {
        return fault(state, header, StatusCode::BAD_TOO_MANY_SUBSCRIPTIONS);
    }
    let session = state.sessions.get_mut(token).expect("resolved");
    let id = state.subscription_ids.next();
    let subscription = Subscription::new(
        id,
        &state.config,
        request.requested_publishing_interval,
        request.requested_lifetime_count,
        request.requested_max_keep_alive_count,
        request.max_notifications_per_publish,
        request.publishing_enabled,
        request.priority,
        now,
    );
    let revised_publishing_interval = subscription.publishing_interval;
    let revised_lifetime_count = subscription.lifetime_count;
    let revised_max_keep_alive_count = subscription.max_keep_alive_count;
    session.subscriptions.insert(id, subscription);
    state
        .subscription_home
        .insert(id, SubscriptionHome::Session(token.clone()));
    Diagnostics::bump(&state.diagnostics.cumulated_subscription_count);
    Diagnostics::bump(&state.diagnostics.current_subscription_count);
    if let Some(mut info) = state.session_infos.get_mut(token) {
        info.subscription_count += 1;
    }
    debug!(subscription = id, interval_ms = revised_publishing_interval, "subscription created");

    ResponseMessage::CreateSubscription(CreateSubscriptionResponse {
        response_header: ResponseHeader::new(header, StatusCode::GOOD),
        subscription_id: id,
        revised_publishing_interval,
        revised_lifetime_count,
        revised_max_keep_alive_count,
    })
}

fn modify_subscription(
    state: &mut EngineState,
    token: &NodeId,
    request: &ModifySubscriptionRequest,
) -> ResponseMessage {
    let header = &request.request_header;
    let config = state.config.clone();
    if !owns_subscription(state, token, request.subscription_id) {
        return fault(state, header, StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
    }
    let session = state.sessions.get_mut(token).expect("resolved");
    let subscription = session
        .subscriptions
        .get_mut(&request.subscription_id)
        .expect("checked");
    let (revised_publishing_interval, revised_lifetime_count, revised_max_keep_alive_count) =
        subscription.modify(
            &config,
            request.requested_publishing_interval,
            request.requested_lifetime_count,
            request.requested_max_keep_alive_count,
            request.max_notifications_per_publish,
            request.priority,
        );
    ResponseMessage::ModifySubscription(ModifySubscriptionResponse {
        response_header: ResponseHeader::new(header, StatusCode::GOOD),
        revised_publishing_interval,
        revised_lifetime_count,
        revised_max_keep_alive_count,
    })
}

fn set_publishing_mode(
    state: &mut EngineState,
    token: &NodeId,
    request: &SetPublishingModeRequest,
) -> ResponseMessage {
    let header = &request.request_header;
    let Some(ids) = request.subscription_ids.as_ref().filter(|i| !i.is_empty()) else {
        return fault(state, header, StatusCode::BAD_NOTHING_TO_DO);
    };
    let session = state.sessions.get_mut(token).expect("resolved");
    let results: Vec<StatusCode> = ids
        .iter()
        .map(|id| match session.subscriptions.get_mut(id) {
            Some(subscription) => {
                subscription.publishing_enabled = request.publishing_enabled;
                StatusCode::GOOD
            }
            None => StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
        })
        .collect();
    ResponseMessage::SetPublishingMode(SetPublishingModeResponse {
        response_header: ResponseHeader::new(header, StatusCode::GOOD),
        results: Some(results),
        diagnostic_infos: None,
    })
}

fn delete_subscriptions(
    state: &mut EngineState,
    token: &NodeId,
    request: &DeleteSubscriptionsRequest,
) -> ResponseMessage {
    let header = &request.request_header;
    let Some(ids) = request.subscription_ids.as_ref().filter(|i| !i.is_empty()) else {
        return fault(state, header, StatusCode::BAD_NOTHING_TO_DO);
    };
    let session = state.sessions.get_mut(token).expect("resolved");
    let mut removed = 0usize;
    let results: Vec<StatusCode> = ids
        .iter()
        .map(|id| {
            if session.subscriptions.remove(id).is_some() {
                state.subscription_home.remove(id);
                removed += 1;
                StatusCode::GOOD
            } else {
                StatusCode::BAD_SUBSCRIPTION_ID_INVALID
            }
        })
        .collect();
    for _ in 0..removed {
        Diagnostics::decrement(&state.diagnostics.current_subscription_count);
    }
    if let Some(mut info) = state.session_infos.get_mut(token) {
        info.subscription_count = info.subscription_count.saturating_sub(removed);
    }
    ResponseMessage::DeleteSubscriptions(DeleteSubscriptionsResponse {
        response_header: ResponseHeader::new(header, StatusCode::GOOD),
        results: Some(results),
        diagnostic_infos: None,
    })
}

fn transfer_subscriptions(
    state: &mut EngineState,
    token: &NodeId,
    request: &TransferSubscriptionsRequest,
    now: Instant,
) -> ResponseMessage {
    let header = &request.request_header;
    let Some(ids) = request.subscription_ids.as_ref().filter(|i| !i.is_empty()) else {
        return fault(state, header, StatusCode::BAD_NOTHING_TO_DO);
    };
    Diagnostics::bump(&state.diagnostics.transfer_request_count);

    let results: Vec<TransferResult> = ids
        .iter()
        .map(|id| transfer_one(state, token, *id, request.send_initial_values, now))
        .collect();

    ResponseMessage::TransferSubscriptions(TransferSubscriptionsResponse {
        response_header: ResponseHeader::new(header, StatusCode::GOOD),
        results: Some(results),
        diagnostic_infos: None,
    })
}

fn transfer_one(
    state: &mut EngineState,
    target_token: &NodeId,
    subscription_id: u32,
    send_initial_values: bool,
    _now: Instant,
) -> TransferResult {
    let bad = |status: StatusCode| TransferResult {
        status_code: status,
        available_sequence_numbers: None,
    };

    let home = match state.subscription_home.get(&subscription_id) {
        Some(home) => home.clone(),
        None => return bad(StatusCode::BAD_SUBSCRIPTION_ID_INVALID),
    };

    let mut subscription = match home {
        SubscriptionHome::Session(ref source_token) if source_token == target_token => {
            return bad(StatusCode::BAD_NOTHING_TO_DO);
        }
        SubscriptionHome::Session(source_token) => {
            // Identity must match across source and target.
            let identities_match = {
                let source = state.sessions.get(&source_token);
                let target = state.sessions.get(target_token);
                match (source, target) {
                    (Some(source), Some(target)) => source.same_identity(target),
                    _ => false,
                }
            };
            if !identities_match {
                return bad(StatusCode::BAD_USER_ACCESS_DENIED);
            }
            let source = state
                .sessions
                .get_mut(&source_token)
                .expect("checked above");
            let Some(subscription) = source.subscriptions.remove(&subscription_id) else {
                return bad(StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
            };
            if let Some(mut info) = state.session_infos.get_mut(&source_token) {
                info.subscription_count = info.subscription_count.saturating_sub(1);
            }
            subscription
        }
        SubscriptionHome::Orphanage => {
            // Orphans belong to nobody; the claiming identity wins.
            match state.orphanage.remove(&subscription_id) {
                Some(subscription) => subscription,
                None => return bad(StatusCode::BAD_SUBSCRIPTION_ID_INVALID),
            }
        }
    };

    if send_initial_values {
        for item in subscription.monitored_items.values_mut() {
            item.requeue_last_value();
        }
    }
    let available = subscription.available_sequence_numbers();

    let target = state
        .sessions
        .get_mut(target_token)
        .expect("resolved earlier");
    target.subscriptions.insert(subscription_id, subscription);
    state
        .subscription_home
        .insert(subscription_id, SubscriptionHome::Session(target_token.clone()));
    if let Some(mut info) = state.session_infos.get_mut(target_token) {
        info.subscription_count += 1;
    }
    Diagnostics::bump(&state.diagnostics.transferred_to_alt_client_count);
    debug!(subscription = subscription_id, "subscription transferred");

    TransferResult {
        status_code: StatusCode::GOOD,
        available_sequence_numbers: Some(available),
    }
}

// ============================================================================
// PUBLISH / REPUBLISH
// ============================================================================

fn publish(
    state: &mut EngineState,
    token: &NodeId,
    connection_id: u64,
    request_id: u32,
    request: &PublishRequest,
    now: Instant,
) -> Vec<Outbound> {
    Diagnostics::bump(&state.diagnostics.publish_request_count);
    let max_depth = state.config.max_publish_requests_per_session;
    let session = state.sessions.get_mut(token).expect("resolved");

    // 1. Acknowledgements evict from the respective retransmission queues.
    let ack_results = request.subscription_acknowledgements.as_ref().map(|acks| {
        acks.iter()
            .map(|ack| match session.subscriptions.get_mut(&ack.subscription_id) {
                Some(subscription) => subscription.acknowledge(ack.sequence_number),
                None => StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
            })
            .collect::<Vec<StatusCode>>()
    });

    // 2. Park the credit.
    let mut out = Vec::new();
    if let Some(evicted) = session.publish_queue.park(
        ParkedPublish {
            connection_id,
            request_id,
            request_handle: request.request_header.request_handle,
            ack_results,
            received_at: now,
        },
        max_depth,
    ) {
        trace!(session = %session.session_id, "publish queue overflow");
        out.push(complete_publish_with_fault(
            evicted,
            StatusCode::BAD_TOO_MANY_PUBLISH_REQUESTS,
        ));
    }

    // 3. Let owing subscriptions spend the fresh credit.
    out.extend(drain_session_publishes(session));
    out
}

/// Pair parked Publish credits with subscriptions that owe messages.
/// Highest priority first, FIFO within a priority; stashed status changes
/// of dead subscriptions go out before anything else.
pub fn drain_session_publishes(session: &mut Session) -> Vec<Outbound> {
    let mut out = Vec::new();
    loop {
        if session.publish_queue.is_empty() {
            break;
        }
        if let Some((subscription_id, message)) = pop_status_change(session) {
            let parked = session.publish_queue.take().expect("checked non-empty");
            out.push(publish_outbound(parked, subscription_id, Vec::new(), false, message));
            continue;
        }

        let order = priority_order(
            session
                .subscriptions
                .values()
                .map(|s| (s.id, s.priority)),
        );
        let mut spent = false;
        for id in order {
            let Some(subscription) = session.subscriptions.get_mut(&id) else {
                continue;
            };
            if let Some(message) = subscription.on_publish_available() {
                let available = subscription.available_sequence_numbers();
                let more = subscription.pending_count() > 0;
                let parked = session.publish_queue.take().expect("checked non-empty");
                out.push(publish_outbound(parked, id, available, more, message));
                spent = true;
                break;
            }
        }
        if !spent {
            break;
        }
    }
    out
}

fn pop_status_change(session: &mut Session) -> Option<(u32, NotificationMessage)> {
    if session.pending_status_changes.is_empty() {
        None
    } else {
        Some(session.pending_status_changes.remove(0))
    }
}

pub fn publish_outbound(
    parked: ParkedPublish,
    subscription_id: u32,
    available_sequence_numbers: Vec<u32>,
    more_notifications: bool,
    message: NotificationMessage,
) -> Outbound {
    let header = RequestHeader {
        request_handle: parked.request_handle,
        ..Default::default()
    };
    Outbound {
        connection_id: parked.connection_id,
        request_id: parked.request_id,
        response: ResponseMessage::Publish(PublishResponse {
            response_header: ResponseHeader::new(&header, StatusCode::GOOD),
            subscription_id,
            available_sequence_numbers: Some(available_sequence_numbers),
            more_notifications,
            notification_message: message,
            results: parked.ack_results,
            diagnostic_infos: None,
        }),
    }
}

fn republish(
    state: &mut EngineState,
    token: &NodeId,
    request: &RepublishRequest,
) -> ResponseMessage {
    let header = &request.request_header;
    let session = state.sessions.get(token).expect("resolved");
    let Some(subscription) = session.subscriptions.get(&request.subscription_id) else {
        return fault(state, header, StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
    };
    match subscription.republish(request.retransmit_sequence_number) {
        Ok(notification_message) => ResponseMessage::Republish(RepublishResponse {
            response_header: ResponseHeader::new(header, StatusCode::GOOD),
            notification_message,
        }),
        Err(status) => fault(state, header, status),
    }
}

// ============================================================================
// MONITORED ITEM SERVICES
// ============================================================================

fn revise_sampling_interval(state: &EngineState, requested: f64, publishing_interval: f64) -> f64 {
    if requested < 0.0 {
        // "Use the publishing interval."
        return publishing_interval;
    }
    if requested == 0.0 {
        // Exception-based reporting, driven by value writes.
        return 0.0;
    }
    requested.clamp(
        state.config.min_sampling_interval,
        state.config.max_sampling_interval,
    )
}

const MAX_QUEUE_SIZE: usize = 10_000;

fn create_monitored_items(
    state: &mut EngineState,
    token: &NodeId,
    request: &CreateMonitoredItemsRequest,
    now: Instant,
) -> ResponseMessage {
    let header = &request.request_header;
    if request.timestamps_to_return == TimestampsToReturn::Invalid {
        return fault(state, header, StatusCode::BAD_TIMESTAMPS_TO_RETURN_INVALID);
    }
    let Some(items) = request.items_to_create.as_ref().filter(|i| !i.is_empty()) else {
        return fault(state, header, StatusCode::BAD_NOTHING_TO_DO);
    };
    if !state
        .sessions
        .get(token)
        .expect("resolved")
        .subscriptions
        .contains_key(&request.subscription_id)
    {
        return fault(state, header, StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
    }

    let results: Vec<MonitoredItemCreateResult> = items
        .iter()
        .map(|item| create_one_item(state, token, request, item, now))
        .collect();

    ResponseMessage::CreateMonitoredItems(CreateMonitoredItemsResponse {
        response_header: ResponseHeader::new(header, StatusCode::GOOD),
        results: Some(results),
        diagnostic_infos: None,
    })
}

fn create_one_item(
    state: &mut EngineState,
    token: &NodeId,
    request: &CreateMonitoredItemsRequest,
    item: &MonitoredItemCreateRequest,
    now: Instant,
) -> MonitoredItemCreateResult {
    let node_id = &item.item_to_monitor.node_id;
    let attribute_id = item.item_to_monitor.attribute_id;
    if AttributeId::from_u32(attribute_id).is_none() {
        return MonitoredItemCreateResult::bad(StatusCode::BAD_ATTRIBUTE_ID_INVALID);
    }

    let filter = match MonitoringFilter::from_extension_object(
        &item.requested_parameters.filter,
        &state.config.decoding,
    ) {
        Ok(filter) => filter,
        Err(status) => return MonitoredItemCreateResult::bad(status),
    };

    // Validate against the address space and pin the filter down.
    let (filter, initial_value, write_version) = {
        let space = state.address_space.read();
        let write_version = space.write_version(node_id).unwrap_or(0);
        let Some(node) = space.find(node_id) else {
            return MonitoredItemCreateResult::bad(StatusCode::BAD_NODE_ID_UNKNOWN);
        };
        match &filter {
            MonitoringFilter::Event(event_filter) => {
                if attribute_id != AttributeId::EventNotifier as u32 {
                    return MonitoredItemCreateResult::bad(StatusCode::BAD_FILTER_NOT_ALLOWED);
                }
                if !matches!(node.kind, NodeKind::Object { .. }) {
                    return MonitoredItemCreateResult::bad(StatusCode::BAD_FILTER_NOT_ALLOWED);
                }
                if let Err(status) = crate::server::events::validate_event_filter(event_filter) {
                    return MonitoredItemCreateResult::bad(status);
                }
                (filter.clone(), None, write_version)
            }
            MonitoringFilter::DataChange(data_filter) => {
                if attribute_id != AttributeId::Value as u32 {
                    return MonitoredItemCreateResult::bad(StatusCode::BAD_FILTER_NOT_ALLOWED);
                }
                let resolved = match resolve_deadband(&space, node_id, data_filter) {
                    Ok(filter) => filter,
                    Err(status) => return MonitoredItemCreateResult::bad(status),
                };
                let value = space.read_attribute(node_id, attribute_id, 0.0);
                (MonitoringFilter::DataChange(resolved), Some(value), write_version)
            }
            MonitoringFilter::None => {
                let value = space.read_attribute(node_id, attribute_id, 0.0);
                if value.status == StatusCode::BAD_ATTRIBUTE_ID_INVALID {
                    return MonitoredItemCreateResult::bad(StatusCode::BAD_ATTRIBUTE_ID_INVALID);
                }
                (MonitoringFilter::None, Some(value), write_version)
            }
        }
    };

    let max_items = state.config.max_monitored_items_per_subscription;
    let publishing_interval = {
        let session = state.sessions.get_mut(token).expect("resolved");
        let subscription = session
            .subscriptions
            .get_mut(&request.subscription_id)
            .expect("checked by caller");
        if subscription.monitored_items.len() >= max_items {
            return MonitoredItemCreateResult::bad(StatusCode::BAD_TOO_MANY_MONITORED_ITEMS);
        }
        subscription.publishing_interval
    };

    let revised_sampling_interval = revise_sampling_interval(
        state,
        item.requested_parameters.sampling_interval,
        publishing_interval,
    );
    let revised_queue_size = (item.requested_parameters.queue_size as usize)
        .clamp(1, MAX_QUEUE_SIZE);

    let session = state.sessions.get_mut(token).expect("resolved");
    let subscription = session
        .subscriptions
        .get_mut(&request.subscription_id)
        .expect("checked by caller");
    let id = subscription.next_item_id();
    let mut monitored_item = MonitoredItem::new(
        id,
        node_id.clone(),
        attribute_id,
        item.requested_parameters.client_handle,
        revised_sampling_interval,
        revised_queue_size,
        item.requested_parameters.discard_oldest,
        filter,
        item.monitoring_mode,
        request.timestamps_to_return,
    );
    monitored_item.last_write_version = write_version;
    // The first notification is the current value.
    if let Some(value) = initial_value {
        monitored_item.sample(now, value);
    }
    subscription.monitored_items.insert(id, monitored_item);
    trace!(subscription = request.subscription_id, item = id, "monitored item created");

    MonitoredItemCreateResult {
        status_code: StatusCode::GOOD,
        monitored_item_id: id,
        revised_sampling_interval,
        revised_queue_size: revised_queue_size as u32,
        filter_result: crate::types::ExtensionObject::null(),
    }
}

/// Rewrite a percent deadband into an absolute threshold against the
/// node's EURange property.
fn resolve_deadband(
    space: &crate::address_space::AddressSpace,
    node_id: &NodeId,
    filter: &DataChangeFilter,
) -> Result<DataChangeFilter, StatusCode> {
    match filter.deadband_type {
        deadband_type::NONE | deadband_type::ABSOLUTE => {
            if filter.deadband_value < 0.0 {
                return Err(StatusCode::BAD_DEADBAND_FILTER_INVALID);
            }
            Ok(filter.clone())
        }
        deadband_type::PERCENT => {
            if !(0.0..=100.0).contains(&filter.deadband_value) {
                return Err(StatusCode::BAD_DEADBAND_FILTER_INVALID);
            }
            let range = space
                .property_value(node_id, "EURange")
                .ok_or(StatusCode::BAD_DEADBAND_FILTER_INVALID)?;
            let Variant::Array(array) = &range.value else {
                return Err(StatusCode::BAD_DEADBAND_FILTER_INVALID);
            };
            if array.value_type != VariantType::Double || array.values.len() != 2 {
                return Err(StatusCode::BAD_DEADBAND_FILTER_INVALID);
            }
            let low = array.values[0].as_f64().unwrap_or(0.0);
            let high = array.values[1].as_f64().unwrap_or(0.0);
            Ok(DataChangeFilter {
                trigger: filter.trigger,
                deadband_type: deadband_type::ABSOLUTE,
                deadband_value: (high - low).abs() * filter.deadband_value / 100.0,
            })
        }
        _ => Err(StatusCode::BAD_DEADBAND_FILTER_INVALID),
    }
}

fn modify_monitored_items(
    state: &mut EngineState,
    token: &NodeId,
    request: &ModifyMonitoredItemsRequest,
) -> ResponseMessage {
    let header = &request.request_header;
    let Some(items) = request.items_to_modify.as_ref().filter(|i| !i.is_empty()) else {
        return fault(state, header, StatusCode::BAD_NOTHING_TO_DO);
    };
    let decoding = state.config.decoding.clone();
    let min_sampling = state.config.min_sampling_interval;
    let max_sampling = state.config.max_sampling_interval;
    if !owns_subscription(state, token, request.subscription_id) {
        return fault(state, header, StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
    }
    let session = state.sessions.get_mut(token).expect("resolved");
    let subscription = session
        .subscriptions
        .get_mut(&request.subscription_id)
        .expect("checked");
    let publishing_interval = subscription.publishing_interval;

    let results: Vec<MonitoredItemModifyResult> = items
        .iter()
        .map(|modify| {
            let Some(item) = subscription.monitored_items.get_mut(&modify.monitored_item_id)
            else {
                return MonitoredItemModifyResult {
                    status_code: StatusCode::BAD_MONITORED_ITEM_ID_INVALID,
                    ..Default::default()
                };
            };
            let filter = match MonitoringFilter::from_extension_object(
                &modify.requested_parameters.filter,
                &decoding,
            ) {
                Ok(filter) => filter,
                Err(status) => {
                    return MonitoredItemModifyResult {
                        status_code: status,
                        ..Default::default()
                    }
                }
            };
            // An event item stays an event item; swapping filter kinds is
            // not allowed.
            if item.is_event_item() != matches!(filter, MonitoringFilter::Event(_)) {
                return MonitoredItemModifyResult {
                    status_code: StatusCode::BAD_FILTER_NOT_ALLOWED,
                    ..Default::default()
                };
            }
            let requested = modify.requested_parameters.sampling_interval;
            let revised_sampling_interval = if requested < 0.0 {
                publishing_interval
            } else if requested == 0.0 {
                0.0
            } else {
                requested.clamp(min_sampling, max_sampling)
            };
            let revised_queue_size =
                (modify.requested_parameters.queue_size as usize).clamp(1, MAX_QUEUE_SIZE);
            item.sampling_interval = revised_sampling_interval;
            item.queue_size = revised_queue_size;
            item.discard_oldest = modify.requested_parameters.discard_oldest;
            item.client_handle = modify.requested_parameters.client_handle;
            item.filter = filter;
            MonitoredItemModifyResult {
                status_code: StatusCode::GOOD,
                revised_sampling_interval,
                revised_queue_size: revised_queue_size as u32,
                filter_result: crate::types::ExtensionObject::null(),
            }
        })
        .collect();

    ResponseMessage::ModifyMonitoredItems(ModifyMonitoredItemsResponse {
        response_header: ResponseHeader::new(header, StatusCode::GOOD),
        results: Some(results),
        diagnostic_infos: None,
    })
}

fn delete_monitored_items(
    state: &mut EngineState,
    token: &NodeId,
    request: &DeleteMonitoredItemsRequest,
) -> ResponseMessage {
    let header = &request.request_header;
    let Some(ids) = request
        .monitored_item_ids
        .as_ref()
        .filter(|i| !i.is_empty())
    else {
        return fault(state, header, StatusCode::BAD_NOTHING_TO_DO);
    };
    if !owns_subscription(state, token, request.subscription_id) {
        return fault(state, header, StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
    }
    let session = state.sessions.get_mut(token).expect("resolved");
    let subscription = session
        .subscriptions
        .get_mut(&request.subscription_id)
        .expect("checked");
    let results: Vec<StatusCode> = ids
        .iter()
        .map(|id| {
            if subscription.monitored_items.remove(id).is_some() {
                StatusCode::GOOD
            } else {
                StatusCode::BAD_MONITORED_ITEM_ID_INVALID
            }
        })
        .collect();
    ResponseMessage::DeleteMonitoredItems(DeleteMonitoredItemsResponse {
        response_header: ResponseHeader::new(header, StatusCode::GOOD),
        results: Some(results),
        diagnostic_infos: None,
    })
}

fn set_monitoring_mode(
    state: &mut EngineState,
    token: &NodeId,
    request: &SetMonitoringModeRequest,
) -> ResponseMessage {
    let header = &request.request_header;
    let Some(ids) = request
        .monitored_item_ids
        .as_ref()
        .filter(|i| !i.is_empty())
    else {
        return fault(state, header, StatusCode::BAD_NOTHING_TO_DO);
    };
    if !owns_subscription(state, token, request.subscription_id) {
        return fault(state, header, StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
    }
    let session = state.sessions.get_mut(token).expect("resolved");
    let subscription = session
        .subscriptions
        .get_mut(&request.subscription_id)
        .expect("checked");
    let results: Vec<StatusCode> = ids
        .iter()
        .map(|id| match subscription.monitored_items.get_mut(id) {
            Some(item) => {
                item.monitoring_mode = request.monitoring_mode;
                StatusCode::GOOD
            }
            None => StatusCode::BAD_MONITORED_ITEM_ID_INVALID,
        })
        .collect();
    ResponseMessage::SetMonitoringMode(SetMonitoringModeResponse {
        response_header: ResponseHeader::new(header, StatusCode::GOOD),
        results: Some(results),
        diagnostic_infos: None,
    })
}

fn set_triggering(
    state: &mut EngineState,
    token: &NodeId,
    request: &SetTriggeringRequest,
) -> ResponseMessage {
    let header = &request.request_header;
    if !owns_subscription(state, token, request.subscription_id) {
        return fault(state, header, StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
    }
    let has_trigger = state.sessions[token]
        .subscriptions[&request.subscription_id]
        .monitored_items
        .contains_key(&request.triggering_item_id);
    if !has_trigger {
        return fault(state, header, StatusCode::BAD_MONITORED_ITEM_ID_INVALID);
    }
    let session = state.sessions.get_mut(token).expect("resolved");
    let subscription = session
        .subscriptions
        .get_mut(&request.subscription_id)
        .expect("checked");

    let known: std::collections::HashSet<u32> =
        subscription.monitored_items.keys().copied().collect();

    let add_results: Option<Vec<StatusCode>> = request.links_to_add.as_ref().map(|links| {
        links
            .iter()
            .map(|link| {
                if known.contains(link) {
                    subscription
                        .monitored_items
                        .get_mut(&request.triggering_item_id)
                        .expect("checked")
                        .triggered_items
                        .insert(*link);
                    StatusCode::GOOD
                } else {
                    StatusCode::BAD_MONITORED_ITEM_ID_INVALID
                }
            })
            .collect()
    });
    let remove_results: Option<Vec<StatusCode>> = request.links_to_remove.as_ref().map(|links| {
        links
            .iter()
            .map(|link| {
                let removed = subscription
                    .monitored_items
                    .get_mut(&request.triggering_item_id)
                    .expect("checked")
                    .triggered_items
                    .remove(link);
                if removed {
                    StatusCode::GOOD
                } else {
                    StatusCode::BAD_MONITORED_ITEM_ID_INVALID
                }
            })
            .collect()
    });

    if add_results.is_none() && remove_results.is_none() {
        return fault(state, header, StatusCode::BAD_NOTHING_TO_DO);
    }

    ResponseMessage::SetTriggering(SetTriggeringResponse {
        response_header: ResponseHeader::new(header, StatusCode::GOOD),
        add_results,
        add_diagnostic_infos: None,
        remove_results,
        remove_diagnostic_infos: None,
    })
}

// ============================================================================
// CALL
// ============================================================================

fn calls_engine_methods(request: &CallRequest) -> bool {
    request
        .methods_to_call
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .any(|call| {
            matches!(
                call.method_id.as_ns0_numeric(),
                Some(method_ids::SERVER_GET_MONITORED_ITEMS)
                    | Some(method_ids::SERVER_SET_SUBSCRIPTION_DURABLE)
                    | Some(method_ids::SERVER_RESEND_DATA)
                    | Some(method_ids::SERVER_REQUEST_SERVER_STATE_CHANGE)
            )
        })
}

/// Run a CallRequest against user-registered methods. Invoked off the
/// event loop; takes the address space directly.
pub fn call_user_methods(
    address_space: &parking_lot::RwLock<crate::address_space::AddressSpace>,
    session_id: &NodeId,
    request: &CallRequest,
) -> ResponseMessage {
    let header = &request.request_header;
    let Some(calls) = request.methods_to_call.as_ref().filter(|c| !c.is_empty()) else {
        return ResponseMessage::fault(header, StatusCode::BAD_NOTHING_TO_DO);
    };
    let mut space = address_space.write();
    let results: Vec<CallMethodResult> = calls
        .iter()
        .map(|call| {
            let context = CallContext {
                session_id: session_id.clone(),
                object_id: call.object_id.clone(),
            };
            let inputs = call.input_arguments.as_deref().unwrap_or(&[]);
            match space.call_method(&context, &call.object_id, &call.method_id, inputs) {
                Ok(outputs) => CallMethodResult::good(outputs),
                Err(status) => CallMethodResult::bad(status),
            }
        })
        .collect();
    ResponseMessage::Call(CallResponse {
        response_header: ResponseHeader::new(header, StatusCode::GOOD),
        results: Some(results),
        diagnostic_infos: None,
    })
}

// ============================================================================
// TIMERS
// ============================================================================

/// Sample every due data-change item against the address space.
/// Exception-based items (interval 0) are read whenever the variable's
/// write version moved since the last look.
fn sample_due_items(state: &mut EngineState, now: Instant) {
    let space = state.address_space.clone();
    let space = space.read();
    for session in state.sessions.values_mut() {
        for subscription in session.subscriptions.values_mut() {
            for item in subscription.monitored_items.values_mut() {
                if item.is_event_item() {
                    continue;
                }
                if item.sampling_interval == 0.0 {
                    let Some(version) = space.write_version(&item.node_id) else {
                        continue;
                    };
                    if version != item.last_write_version {
                        item.last_write_version = version;
                        let value = space.read_attribute(&item.node_id, item.attribute_id, 0.0);
                        item.sample(now, value);
                    }
                } else if item.due(now) {
                    let value = space.read_attribute(&item.node_id, item.attribute_id, 0.0);
                    item.sample(now, value);
                }
            }
        }
    }
}

/// Run everything that is due at `now`: item sampling, subscription ticks
/// (paired with parked credits), orphanage aging, and session watchdogs.
pub fn run_timers(state: &mut EngineState, now: Instant) -> Vec<Outbound> {
    let mut out = Vec::new();

    sample_due_items(state, now);

    // Session subscriptions tick against their publish queues.
    let tokens: Vec<NodeId> = state.sessions.keys().cloned().collect();
    for token in &tokens {
        let session = state.sessions.get_mut(token).expect("listed");
        let due: Vec<u32> = session
            .subscriptions
            .values()
            .filter(|s| s.next_tick() <= now)
            .map(|s| s.id)
            .collect();
        let mut closed: Vec<u32> = Vec::new();
        for id in due {
            let credits = session.publish_queue.len();
            let Some(subscription) = session.subscriptions.get_mut(&id) else {
                continue;
            };
            let outcome = subscription.tick(now, credits);
            for message in outcome.ready {
                let available = subscription.available_sequence_numbers();
                let more = subscription.pending_count() > 0;
                let parked = session
                    .publish_queue
                    .take()
                    .expect("tick never exceeds credits");
                out.push(publish_outbound(parked, id, available, more, message));
            }
            if outcome.closed {
                closed.push(id);
                if let Some(status_change) = outcome.status_change {
                    if let Some(parked) = session.publish_queue.take() {
                        out.push(publish_outbound(parked, id, Vec::new(), false, status_change));
                    } else {
                        session.pending_status_changes.push((id, status_change));
                    }
                }
            }
        }
        for id in closed {
            session.subscriptions.remove(&id);
            state.subscription_home.remove(&id);
            Diagnostics::decrement(&state.diagnostics.current_subscription_count);
        }
        // A keep-alive may have become due for a parked credit.
        out.extend(drain_session_publishes(session));
    }

    // Orphans age without any credits.
    let due_orphans: Vec<u32> = state
        .orphanage
        .values()
        .filter(|s| s.next_tick() <= now)
        .map(|s| s.id)
        .collect();
    for id in due_orphans {
        let Some(subscription) = state.orphanage.get_mut(&id) else {
            continue;
        };
        let outcome = subscription.tick(now, 0);
        if outcome.closed {
            debug!(subscription = id, "orphaned subscription expired");
            state.orphanage.remove(&id);
            state.subscription_home.remove(&id);
            Diagnostics::decrement(&state.diagnostics.current_subscription_count);
        }
    }

    // Session watchdogs.
    let expired: Vec<NodeId> = state
        .sessions
        .iter()
        .filter(|(_, session)| session.timed_out(now))
        .map(|(token, _)| token.clone())
        .collect();
    for token in expired {
        debug!("session watchdog fired");
        out.extend(close_session(state, &token, false, CloseReason::Timeout));
    }

    out
}

// ============================================================================
// EVENTS
// ============================================================================

/// Route an application-raised event to every listening event item.
pub fn post_event(state: &mut EngineState, event: &crate::server::events::ServerEvent) {
    let decoding = state.config.decoding.clone();
    let server_node = NodeId::from(crate::types::ids::object_ids::SERVER);
    for session in state.sessions.values_mut() {
        for subscription in session.subscriptions.values_mut() {
            for item in subscription.monitored_items.values_mut() {
                if !item.is_event_item() {
                    continue;
                }
                if item.node_id != event.source_node && item.node_id != server_node {
                    continue;
                }
                let MonitoringFilter::Event(filter) = item.filter.clone() else {
                    continue;
                };
                if !event.matches(&filter, &decoding) {
                    continue;
                }
                let fields = event.project(&filter);
                item.post_event(fields);
            }
        }
    }
}
