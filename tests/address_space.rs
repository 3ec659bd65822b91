//! Address-space behavior: browsing the default nodeset, path
//! translation with the textual grammar, and method invocation.

use uastack::address_space::relative_path::parse_relative_path;
use uastack::address_space::{AddressSpace, CallContext, VariableBuilder};
use uastack::messages::{browse_result_mask, BrowseDescription, BrowseDirection};
use uastack::types::ids::{object_ids, reference_type_ids, variable_ids, AttributeId};
use uastack::types::{NodeId, QualifiedName, StatusCode, Variant};

fn space() -> AddressSpace {
    AddressSpace::new_with_defaults("urn:uastack:test")
}

#[test]
fn browse_objects_forward_hierarchical_contains_server() {
    let space = space();
    let references = space
        .browse(&BrowseDescription {
            node_id: NodeId::from(object_ids::OBJECTS_FOLDER),
            browse_direction: BrowseDirection::Forward,
            reference_type_id: NodeId::from(reference_type_ids::HIERARCHICAL_REFERENCES),
            include_subtypes: true,
            node_class_mask: 0,
            result_mask: browse_result_mask::ALL,
        })
        .unwrap();
    let server = references
        .iter()
        .find(|r| r.node_id.node_id == NodeId::from(object_ids::SERVER))
        .expect("Objects organizes Server");
    assert!(server.is_forward);
    assert_eq!(server.browse_name, QualifiedName::new(0, "Server"));
}

#[test]
fn inverse_browse_reaches_parent() {
    let space = space();
    let references = space
        .browse(&BrowseDescription {
            node_id: NodeId::from(object_ids::SERVER),
            browse_direction: BrowseDirection::Inverse,
            reference_type_id: NodeId::from(reference_type_ids::HIERARCHICAL_REFERENCES),
            include_subtypes: true,
            node_class_mask: 0,
            result_mask: browse_result_mask::ALL,
        })
        .unwrap();
    assert!(references
        .iter()
        .any(|r| r.node_id.node_id == NodeId::from(object_ids::OBJECTS_FOLDER)));
}

#[test]
fn browse_unknown_node_fails() {
    let space = space();
    let err = space
        .browse(&BrowseDescription {
            node_id: NodeId::new_numeric(9, 424242),
            browse_direction: BrowseDirection::Forward,
            reference_type_id: NodeId::null(),
            include_subtypes: true,
            node_class_mask: 0,
            result_mask: 0,
        })
        .unwrap_err();
    assert_eq!(err, StatusCode::BAD_NODE_ID_UNKNOWN);
}

#[test]
fn translate_server_status_current_time() {
    // Scenario: /0:ServerStatus.0:CurrentTime from the Server object.
    let space = space();
    let path = parse_relative_path("/0:ServerStatus.0:CurrentTime").unwrap();
    let targets = space
        .translate_path(&NodeId::from(object_ids::SERVER), &path)
        .unwrap();
    assert_eq!(
        targets,
        vec![NodeId::from(variable_ids::SERVER_SERVER_STATUS_CURRENT_TIME)]
    );
}

#[test]
fn translate_with_escaped_target() {
    let mut space = space();
    space.add_variable(
        VariableBuilder::new(
            NodeId::new_string(1, "odd"),
            QualifiedName::new(1, "Tag/With.Reserved"),
        )
        .parent(
            NodeId::from(object_ids::OBJECTS_FOLDER),
            reference_type_ids::ORGANIZES,
        )
        .value(1i32),
    );
    let path = parse_relative_path("/1:Tag&/With&.Reserved").unwrap();
    let targets = space
        .translate_path(&NodeId::from(object_ids::OBJECTS_FOLDER), &path)
        .unwrap();
    assert_eq!(targets, vec![NodeId::new_string(1, "odd")]);
}

#[test]
fn translate_no_match() {
    let space = space();
    let path = parse_relative_path("/0:DoesNotExist").unwrap();
    assert_eq!(
        space
            .translate_path(&NodeId::from(object_ids::SERVER), &path)
            .unwrap_err(),
        StatusCode::BAD_NO_MATCH
    );
}

#[test]
fn server_status_state_reads_running() {
    let space = space();
    let value = space.read_attribute(
        &NodeId::from(variable_ids::SERVER_SERVER_STATUS_STATE),
        AttributeId::Value as u32,
        0.0,
    );
    assert!(value.is_good());
    assert_eq!(value.value, Variant::Int32(0));
    assert!(value.source_timestamp.is_some());
}

#[test]
fn namespace_registration_is_idempotent() {
    let mut space = space();
    let a = space.register_namespace("urn:plant:line1");
    let b = space.register_namespace("urn:plant:line1");
    assert_eq!(a, b);
    assert_eq!(a, 1);
    assert_eq!(space.namespaces().len(), 2);
}

#[test]
fn method_round_trip_through_call() {
    let mut space = space();
    let object = NodeId::from(object_ids::SERVER);
    let method = NodeId::new_string(1, "Echo");
    space.add_method(
        method.clone(),
        QualifiedName::new(1, "Echo"),
        &object,
        vec![],
        vec![],
        Box::new(|_: &CallContext, _inputs: &[Variant]| Ok(vec![Variant::from("pong")])),
    );
    let out = space
        .call_method(&CallContext::default(), &object, &method, &[])
        .unwrap();
    assert_eq!(out, vec![Variant::from("pong")]);
}

#[test]
fn call_on_non_method_node_is_invalid() {
    let mut space = space();
    let err = space
        .call_method(
            &CallContext::default(),
            &NodeId::from(object_ids::SERVER),
            &NodeId::from(variable_ids::SERVER_SERVER_STATUS),
            &[],
        )
        .unwrap_err();
    assert_eq!(err, StatusCode::BAD_METHOD_INVALID);
}

#[test]
fn cyclic_references_browse_safely() {
    let mut space = space();
    let a = NodeId::new_string(1, "A");
    let b = NodeId::new_string(1, "B");
    let objects = NodeId::from(object_ids::OBJECTS_FOLDER);
    space.add_object(a.clone(), QualifiedName::new(1, "A"), &objects, reference_type_ids::ORGANIZES);
    space.add_object(b.clone(), QualifiedName::new(1, "B"), &a, reference_type_ids::ORGANIZES);
    // Close the cycle: B organizes A.
    assert!(space.add_reference(&b, reference_type_ids::ORGANIZES, &a));

    let from_a = space
        .browse(&BrowseDescription {
            node_id: a.clone(),
            browse_direction: BrowseDirection::Forward,
            reference_type_id: NodeId::from(reference_type_ids::ORGANIZES),
            include_subtypes: false,
            node_class_mask: 0,
            result_mask: browse_result_mask::ALL,
        })
        .unwrap();
    assert!(from_a.iter().any(|r| r.node_id.node_id == b));

    let from_b = space
        .browse(&BrowseDescription {
            node_id: b,
            browse_direction: BrowseDirection::Forward,
            reference_type_id: NodeId::from(reference_type_ids::ORGANIZES),
            include_subtypes: false,
            node_class_mask: 0,
            result_mask: browse_result_mask::ALL,
        })
        .unwrap();
    assert!(from_b.iter().any(|r| r.node_id.node_id == a));
}
