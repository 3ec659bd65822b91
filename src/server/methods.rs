//! The well-known Server-object methods.
//!
//! These need engine state (subscriptions, monitored items), so they run
//! inside the event loop instead of going through the address-space
//! method table like user methods do.

use tracing::debug;

use crate::messages::{
    CallMethodRequest, CallMethodResult, CallRequest, CallResponse, ResponseHeader,
    ResponseMessage,
};
use crate::server::state::{EngineState, SubscriptionHome};
use crate::types::ids::method_ids;
use crate::types::{NodeId, StatusCode, Variant, VariantType};

/// Handle a CallRequest that targets at least one engine method. Calls to
/// other methods inside the same request resolve against the address
/// space as usual.
pub fn call_engine_methods(
    state: &mut EngineState,
    token: &NodeId,
    request: &CallRequest,
) -> ResponseMessage {
    let header = &request.request_header;
    let Some(calls) = request.methods_to_call.as_ref().filter(|c| !c.is_empty()) else {
        return ResponseMessage::fault(header, StatusCode::BAD_NOTHING_TO_DO);
    };
    let results: Vec<CallMethodResult> = calls
        .iter()
        .map(|call| match call.method_id.as_ns0_numeric() {
            Some(method_ids::SERVER_GET_MONITORED_ITEMS) => get_monitored_items(state, token, call),
            Some(method_ids::SERVER_SET_SUBSCRIPTION_DURABLE) => {
                set_subscription_durable(state, token, call)
            }
            Some(method_ids::SERVER_RESEND_DATA) => resend_data(state, token, call),
            Some(method_ids::SERVER_REQUEST_SERVER_STATE_CHANGE) => {
                request_server_state_change(call)
            }
            _ => {
                // Mixed requests fall back to the address space for the
                // rest.
                let session_id = state
                    .sessions
                    .get(token)
                    .map(|s| s.session_id.clone())
                    .unwrap_or_default();
                let space = state.address_space.clone();
                let mut space = space.write();
                let context = crate::address_space::CallContext {
                    session_id,
                    object_id: call.object_id.clone(),
                };
                let inputs = call.input_arguments.as_deref().unwrap_or(&[]);
                match space.call_method(&context, &call.object_id, &call.method_id, inputs) {
                    Ok(outputs) => CallMethodResult::good(outputs),
                    Err(status) => CallMethodResult::bad(status),
                }
            }
        })
        .collect();
    ResponseMessage::Call(CallResponse {
        response_header: ResponseHeader::new(header, StatusCode::GOOD),
        results: Some(results),
        diagnostic_infos: None,
    })
}

fn subscription_id_argument(call: &CallMethodRequest) -> Result<u32, CallMethodResult> {
    let inputs = call.input_arguments.as_deref().unwrap_or(&[]);
    match inputs {
        [] => Err(CallMethodResult::bad(StatusCode::BAD_ARGUMENTS_MISSING)),
        [Variant::UInt32(id)] => Ok(*id),
        [_] => Err(CallMethodResult::bad(StatusCode::BAD_TYPE_MISMATCH)),
        _ => Err(CallMethodResult::bad(StatusCode::BAD_TOO_MANY_ARGUMENTS)),
    }
}

/// GetMonitoredItems: `(subscriptionId) -> (serverHandles[], clientHandles[])`.
///
/// Only subscriptions of the calling session are visible.
fn get_monitored_items(
    state: &EngineState,
    token: &NodeId,
    call: &CallMethodRequest,
) -> CallMethodResult {
    let subscription_id = match subscription_id_argument(call) {
        Ok(id) => id,
        Err(result) => return result,
    };
    let Some(session) = state.sessions.get(token) else {
        return CallMethodResult::bad(StatusCode::BAD_SESSION_ID_INVALID);
    };
    let Some(subscription) = session.subscriptions.get(&subscription_id) else {
        return CallMethodResult::bad(StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
    };
    let server_handles: Vec<Variant> = subscription
        .monitored_items
        .keys()
        .map(|id| Variant::UInt32(*id))
        .collect();
    let client_handles: Vec<Variant> = subscription
        .monitored_items
        .values()
        .map(|item| Variant::UInt32(item.client_handle))
        .collect();
    CallMethodResult::good(vec![
        Variant::array(VariantType::UInt32, server_handles),
        Variant::array(VariantType::UInt32, client_handles),
    ])
}

/// SetSubscriptionDurable: `(subscriptionId, lifetimeInHours) ->
/// (revisedLifetimeInHours)`. Only valid before any monitored item
/// exists.
fn set_subscription_durable(
    state: &mut EngineState,
    token: &NodeId,
    call: &CallMethodRequest,
) -> CallMethodResult {
    let inputs = call.input_arguments.as_deref().unwrap_or(&[]);
    let (subscription_id, lifetime_hours) = match inputs {
        [Variant::UInt32(id), Variant::UInt32(hours)] => (*id, *hours),
        [] | [_] => return CallMethodResult::bad(StatusCode::BAD_ARGUMENTS_MISSING),
        [_, _] => return CallMethodResult::bad(StatusCode::BAD_TYPE_MISMATCH),
        _ => return CallMethodResult::bad(StatusCode::BAD_TOO_MANY_ARGUMENTS),
    };
    let Some(session) = state.sessions.get_mut(token) else {
        return CallMethodResult::bad(StatusCode::BAD_SESSION_ID_INVALID);
    };
    let Some(subscription) = session.subscriptions.get_mut(&subscription_id) else {
        return CallMethodResult::bad(StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
    };
    match subscription.set_durable(lifetime_hours) {
        Ok(revised) => {
            debug!(subscription = subscription_id, revised, "subscription made durable");
            CallMethodResult::good(vec![Variant::UInt32(revised)])
        }
        Err(status) => CallMethodResult::bad(status),
    }
}

/// ResendData: `(subscriptionId)`. Re-queues the current value of every
/// data-change item, like a transfer with `sendInitialValues`.
fn resend_data(state: &mut EngineState, token: &NodeId, call: &CallMethodRequest) -> CallMethodResult {
    let subscription_id = match subscription_id_argument(call) {
        Ok(id) => id,
        Err(result) => return result,
    };
    // The subscription must belong to the calling session.
    match state.subscription_home.get(&subscription_id) {
        Some(SubscriptionHome::Session(owner)) if owner == token => {}
        Some(_) => return CallMethodResult::bad(StatusCode::BAD_USER_ACCESS_DENIED),
        None => return CallMethodResult::bad(StatusCode::BAD_SUBSCRIPTION_ID_INVALID),
    }
    let Some(session) = state.sessions.get_mut(token) else {
        return CallMethodResult::bad(StatusCode::BAD_SESSION_ID_INVALID);
    };
    let Some(subscription) = session.subscriptions.get_mut(&subscription_id) else {
        return CallMethodResult::bad(StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
    };
    for item in subscription.monitored_items.values_mut() {
        item.requeue_last_value();
    }
    CallMethodResult::good(Vec::new())
}

/// RequestServerStateChange: accepted only for the Running state; this
/// engine has no shutdown-by-client path.
fn request_server_state_change(call: &CallMethodRequest) -> CallMethodResult {
    let inputs = call.input_arguments.as_deref().unwrap_or(&[]);
    match inputs.first() {
        None => CallMethodResult::bad(StatusCode::BAD_ARGUMENTS_MISSING),
        Some(Variant::Int32(0)) => CallMethodResult::good(Vec::new()),
        Some(Variant::Int32(_)) => CallMethodResult::bad(StatusCode::BAD_NOT_SUPPORTED),
        Some(_) => CallMethodResult::bad(StatusCode::BAD_TYPE_MISMATCH),
    }
}
