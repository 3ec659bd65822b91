//! The address space: an arena-backed node graph with typed accessors.
//!
//! Nodes live in a flat arena and refer to each other through 32-bit
//! indices, so cyclic references cost nothing; lookup by [`NodeId`] goes
//! through a hash table on the stable identifier. The engine shares the
//! space behind a `parking_lot::RwLock`: reads are concurrent, writes are
//! serialized.
//!
//! Schema loading (XML nodesets) is out of scope; the graph is built
//! programmatically through [`AddressSpace::add_object`] and friends, and
//! [`AddressSpace::new_with_defaults`] creates the well-known namespace-0
//! skeleton the engine serves.

pub mod relative_path;

use std::collections::HashMap;

use tracing::debug;

use crate::messages::{
    Argument, BrowseDescription, BrowseDirection, NodeClass, ReferenceDescription, RelativePath,
};
use crate::types::ids::{
    encoding_ids, method_ids, object_ids, reference_type_ids, type_ids, variable_ids, AttributeId,
};
use crate::types::{
    DataValue, DateTime, DecodingLimits, ExpandedNodeId, ExtensionObject, LocalizedText, NodeId,
    QualifiedName, StatusCode, Variant, VariantType,
};

/// Arena index of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeIndex(u32);

/// Access level bits for variables.
pub mod access_level {
    pub const CURRENT_READ: u8 = 0x01;
    pub const CURRENT_WRITE: u8 = 0x02;
    pub const HISTORY_READ: u8 = 0x04;
}

/// Variable-specific attributes.
#[derive(Debug, Clone)]
pub struct VariableNode {
    pub value: DataValue,
    pub data_type: NodeId,
    pub value_rank: i32,
    pub array_dimensions: Option<Vec<u32>>,
    pub access_level: u8,
    pub user_access_level: u8,
    pub minimum_sampling_interval: f64,
    pub historizing: bool,
    /// Bumped on every value write so exception-based monitored items can
    /// detect changes without comparing payloads.
    pub write_version: u64,
}

impl Default for VariableNode {
    fn default() -> Self {
        Self {
            value: DataValue::default(),
            data_type: NodeId::from(VariantType::Variant.data_type_id()),
            value_rank: -1,
            array_dimensions: None,
            access_level: access_level::CURRENT_READ,
            user_access_level: access_level::CURRENT_READ,
            minimum_sampling_interval: 0.0,
            historizing: false,
            write_version: 0,
        }
    }
}

/// Method-specific attributes. The callable itself is registered
/// separately through [`AddressSpace::set_method_callback`].
#[derive(Debug, Clone, Default)]
pub struct MethodNode {
    pub executable: bool,
    pub user_executable: bool,
}

/// Class-specific payload of a node.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Object { event_notifier: u8 },
    Variable(VariableNode),
    Method(MethodNode),
    ObjectType { is_abstract: bool },
    VariableType { is_abstract: bool },
    ReferenceType { symmetric: bool, inverse_name: Option<LocalizedText> },
    DataType { is_abstract: bool },
    View,
}

impl NodeKind {
    pub fn node_class(&self) -> NodeClass {
        match self {
            NodeKind::Object { .. } => NodeClass::Object,
            NodeKind::Variable(_) => NodeClass::Variable,
            NodeKind::Method(_) => NodeClass::Method,
            NodeKind::ObjectType { .. } => NodeClass::ObjectType,
            NodeKind::VariableType { .. } => NodeClass::VariableType,
            NodeKind::ReferenceType { .. } => NodeClass::ReferenceType,
            NodeKind::DataType { .. } => NodeClass::DataType,
            NodeKind::View => NodeClass::View,
        }
    }
}

/// One node of the graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub node_id: NodeId,
    pub browse_name: QualifiedName,
    pub display_name: LocalizedText,
    pub description: Option<LocalizedText>,
    pub kind: NodeKind,
}

/// A directed reference row, stored on both endpoints.
#[derive(Debug, Clone, Copy)]
struct Reference {
    reference_type: u32,
    target: NodeIndex,
    is_forward: bool,
}

/// Who is calling a method, handed to the bound callback.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Session the call arrived on; null for server-internal calls.
    pub session_id: NodeId,
    /// The object the method was invoked on.
    pub object_id: NodeId,
}

/// Server-side method implementation.
pub trait MethodCallback: Send + Sync {
    fn call(
        &mut self,
        context: &CallContext,
        inputs: &[Variant],
    ) -> Result<Vec<Variant>, StatusCode>;
}

/// Plain functions and closures work as callbacks.
impl<F> MethodCallback for F
where
    F: FnMut(&CallContext, &[Variant]) -> Result<Vec<Variant>, StatusCode> + Send + Sync,
{
    fn call(
        &mut self,
        context: &CallContext,
        inputs: &[Variant],
    ) -> Result<Vec<Variant>, StatusCode> {
        self(context, inputs)
    }
}

/// The node graph.
pub struct AddressSpace {
    nodes: Vec<Node>,
    references: Vec<Vec<Reference>>,
    index: HashMap<NodeId, NodeIndex>,
    namespaces: Vec<String>,
    methods: HashMap<NodeId, Box<dyn MethodCallback>>,
    decoding_limits: DecodingLimits,
}

impl AddressSpace {
    /// An empty space with only namespace 0 registered.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            references: Vec::new(),
            index: HashMap::new(),
            namespaces: vec!["http://opcfoundation.org/UA/".to_string()],
            methods: HashMap::new(),
            decoding_limits: DecodingLimits::default(),
        }
    }

    /// The namespace-0 skeleton: root folders, the reference-type
    /// hierarchy, the Server object with status variables, and the
    /// well-known method nodes.
    pub fn new_with_defaults(application_uri: &str) -> Self {
        let mut space = Self::new();
        space.build_defaults(application_uri);
        space
    }

    /// Register a namespace URI, returning its index. Re-registering an
    /// existing URI returns the original index.
    pub fn register_namespace(&mut self, uri: &str) -> u16 {
        if let Some(pos) = self.namespaces.iter().position(|n| n == uri) {
            return pos as u16;
        }
        self.namespaces.push(uri.to_string());
        (self.namespaces.len() - 1) as u16
    }

    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    // ------------------------------------------------------------------
    // CONSTRUCTION
    // ------------------------------------------------------------------

    /// Insert a node. Returns `Bad_NodeIdExists`-like failure as `None`
    /// when the id is taken.
    pub fn insert(&mut self, node: Node) -> Option<NodeIndex> {
        if self.index.contains_key(&node.node_id) {
            return None;
        }
        let index = NodeIndex(self.nodes.len() as u32);
        self.index.insert(node.node_id.clone(), index);
        self.nodes.push(node);
        self.references.push(Vec::new());
        Some(index)
    }

    /// Add a reference between two existing nodes, recorded on both ends.
    pub fn add_reference(
        &mut self,
        source: &NodeId,
        reference_type: u32,
        target: &NodeId,
    ) -> bool {
        let (Some(&source_index), Some(&target_index)) =
            (self.index.get(source), self.index.get(target))
        else {
            return false;
        };
        self.references[source_index.0 as usize].push(Reference {
            reference_type,
            target: target_index,
            is_forward: true,
        });
        self.references[target_index.0 as usize].push(Reference {
            reference_type,
            target: source_index,
            is_forward: false,
        });
        true
    }

    pub fn add_object(
        &mut self,
        node_id: NodeId,
        browse_name: QualifiedName,
        parent: &NodeId,
        reference_type: u32,
    ) -> Option<NodeIndex> {
        let display_name = LocalizedText::new(browse_name.name.clone().unwrap_or_default());
        let index = self.insert(Node {
            node_id: node_id.clone(),
            browse_name,
            display_name,
            description: None,
            kind: NodeKind::Object { event_notifier: 0 },
        })?;
        self.add_reference(parent, reference_type, &node_id);
        Some(index)
    }

    pub fn add_variable(&mut self, builder: VariableBuilder) -> Option<NodeIndex> {
        let VariableBuilder {
            node_id,
            browse_name,
            parent,
            reference_type,
            variable,
            as_property,
        } = builder;
        let display_name = LocalizedText::new(browse_name.name.clone().unwrap_or_default());
        let index = self.insert(Node {
            node_id: node_id.clone(),
            browse_name,
            display_name,
            description: None,
            kind: NodeKind::Variable(variable),
        })?;
        if let Some(parent) = parent {
            self.add_reference(&parent, reference_type, &node_id);
        }
        let type_def = if as_property {
            type_ids::PROPERTY_TYPE
        } else {
            type_ids::BASE_DATA_VARIABLE_TYPE
        };
        let type_node = NodeId::from(type_def);
        if self.index.contains_key(&type_node) {
            self.add_reference(&node_id, reference_type_ids::HAS_TYPE_DEFINITION, &type_node);
        }
        Some(index)
    }

    pub fn add_method(
        &mut self,
        node_id: NodeId,
        browse_name: QualifiedName,
        parent: &NodeId,
        input_arguments: Vec<Argument>,
        output_arguments: Vec<Argument>,
        callback: Box<dyn MethodCallback>,
    ) -> Option<NodeIndex> {
        let display_name = LocalizedText::new(browse_name.name.clone().unwrap_or_default());
        let index = self.insert(Node {
            node_id: node_id.clone(),
            browse_name,
            display_name,
            description: None,
            kind: NodeKind::Method(MethodNode {
                executable: true,
                user_executable: true,
            }),
        })?;
        self.add_reference(parent, reference_type_ids::HAS_COMPONENT, &node_id);
        self.add_argument_property(&node_id, "InputArguments", input_arguments);
        self.add_argument_property(&node_id, "OutputArguments", output_arguments);
        self.methods.insert(node_id, callback);
        Some(index)
    }

    fn add_argument_property(&mut self, method: &NodeId, name: &str, arguments: Vec<Argument>) {
        if arguments.is_empty() {
            return;
        }
        let values: Vec<Variant> = arguments
            .iter()
            .filter_map(|a| {
                ExtensionObject::from_encodable(NodeId::from(encoding_ids::ARGUMENT), a)
                    .ok()
                    .map(|o| Variant::ExtensionObject(Box::new(o)))
            })
            .collect();
        let property_id = match &method.identifier {
            crate::types::Identifier::Numeric(n) => {
                NodeId::new_string(method.namespace, format!("{n}/{name}"))
            }
            _ => NodeId::new_string(method.namespace, format!("{method}/{name}")),
        };
        self.add_variable(
            VariableBuilder::new(property_id, QualifiedName::new(0, name))
                .parent(method.clone(), reference_type_ids::HAS_PROPERTY)
                .property()
                .value(Variant::array(VariantType::ExtensionObject, values)),
        );
    }

    /// Replace the callback bound to a method node.
    pub fn set_method_callback(&mut self, method: NodeId, callback: Box<dyn MethodCallback>) {
        self.methods.insert(method, callback);
    }

    // ------------------------------------------------------------------
    // LOOKUP
    // ------------------------------------------------------------------

    pub fn find(&self, node_id: &NodeId) -> Option<&Node> {
        self.index.get(node_id).map(|i| &self.nodes[i.0 as usize])
    }

    pub fn find_mut(&mut self, node_id: &NodeId) -> Option<&mut Node> {
        let index = *self.index.get(node_id)?;
        Some(&mut self.nodes[index.0 as usize])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Walk `HasSubtype` inverse references to decide whether `candidate`
    /// is `ancestor` or one of its subtypes.
    pub fn is_subtype_of(&self, candidate: u32, ancestor: u32) -> bool {
        let mut current = candidate;
        loop {
            if current == ancestor {
                return true;
            }
            let Some(&index) = self.index.get(&NodeId::from(current)) else {
                return false;
            };
            let parent = self.references[index.0 as usize].iter().find(|r| {
                !r.is_forward && r.reference_type == reference_type_ids::HAS_SUBTYPE
            });
            match parent {
                Some(r) => {
                    let parent_node = &self.nodes[r.target.0 as usize];
                    match parent_node.node_id.as_ns0_numeric() {
                        Some(id) => current = id,
                        None => return false,
                    }
                }
                None => return false,
            }
        }
    }

    fn reference_matches(&self, reference: &Reference, description: &BrowseDescription) -> bool {
        match description.browse_direction {
            BrowseDirection::Forward if !reference.is_forward => return false,
            BrowseDirection::Inverse if reference.is_forward => return false,
            BrowseDirection::Invalid => return false,
            _ => {}
        }
        if !description.reference_type_id.is_null() {
            let Some(wanted) = description.reference_type_id.as_ns0_numeric() else {
                return false;
            };
            let matches = if description.include_subtypes {
                self.is_subtype_of(reference.reference_type, wanted)
            } else {
                reference.reference_type == wanted
            };
            if !matches {
                return false;
            }
        }
        if description.node_class_mask != 0 {
            let class = self.nodes[reference.target.0 as usize].kind.node_class() as u32;
            if description.node_class_mask & class == 0 {
                return false;
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // BROWSE
    // ------------------------------------------------------------------

    /// All references matching one browse description. Paging is the
    /// caller's concern; the full match list comes back in stable order.
    pub fn browse(&self, description: &BrowseDescription) -> Result<Vec<ReferenceDescription>, StatusCode> {
        let Some(&index) = self.index.get(&description.node_id) else {
            return Err(StatusCode::BAD_NODE_ID_UNKNOWN);
        };
        if description.browse_direction == BrowseDirection::Invalid {
            return Err(StatusCode::BAD_BROWSE_DIRECTION_INVALID);
        }
        let mut out = Vec::new();
        for reference in &self.references[index.0 as usize] {
            if !self.reference_matches(reference, description) {
                continue;
            }
            let target = &self.nodes[reference.target.0 as usize];
            let type_definition = self.type_definition_of(reference.target);
            out.push(ReferenceDescription {
                reference_type_id: NodeId::from(reference.reference_type),
                is_forward: reference.is_forward,
                node_id: ExpandedNodeId::local(target.node_id.clone()),
                browse_name: target.browse_name.clone(),
                display_name: target.display_name.clone(),
                node_class: target.kind.node_class(),
                type_definition,
            });
        }
        Ok(out)
    }

    fn type_definition_of(&self, index: NodeIndex) -> ExpandedNodeId {
        self.references[index.0 as usize]
            .iter()
            .find(|r| r.is_forward && r.reference_type == reference_type_ids::HAS_TYPE_DEFINITION)
            .map(|r| ExpandedNodeId::local(self.nodes[r.target.0 as usize].node_id.clone()))
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // READ / WRITE
    // ------------------------------------------------------------------

    /// Read one attribute. Bad outcomes ride in the returned value's
    /// status, matching the Read service's per-operation semantics.
    pub fn read_attribute(&self, node_id: &NodeId, attribute_id: u32, max_age: f64) -> DataValue {
        let Some(node) = self.find(node_id) else {
            return DataValue::bad(StatusCode::BAD_NODE_ID_UNKNOWN);
        };
        let Some(attribute) = AttributeId::from_u32(attribute_id) else {
            return DataValue::bad(StatusCode::BAD_ATTRIBUTE_ID_INVALID);
        };
        let now = DateTime::now();
        let value: Variant = match (attribute, &node.kind) {
            (AttributeId::NodeId, _) => node.node_id.clone().into(),
            (AttributeId::NodeClass, _) => Variant::Int32(node.kind.node_class() as i32),
            (AttributeId::BrowseName, _) => Variant::QualifiedName(node.browse_name.clone()),
            (AttributeId::DisplayName, _) => node.display_name.clone().into(),
            (AttributeId::Description, _) => match &node.description {
                Some(text) => text.clone().into(),
                None => Variant::Empty,
            },
            (AttributeId::Value, NodeKind::Variable(v)) => {
                if v.access_level & access_level::CURRENT_READ == 0 {
                    return DataValue::bad(StatusCode::BAD_NOT_READABLE);
                }
                // max_age == 0 forces a fresh read; a cached value is fine
                // while `now - sourceTimestamp <= max_age`. Values are held
                // in memory here, so the cache is always current and only
                // the staleness contract needs checking.
                let mut value = v.value.clone();
                if max_age > 0.0 {
                    if let Some(source) = value.source_timestamp {
                        if now.millis_since(source) as f64 > max_age {
                            value.source_timestamp = Some(now);
                        }
                    }
                }
                value.server_timestamp = Some(now);
                return value;
            }
            (AttributeId::Value, _) => {
                return DataValue::bad(StatusCode::BAD_ATTRIBUTE_ID_INVALID)
            }
            (AttributeId::DataType, NodeKind::Variable(v)) => v.data_type.clone().into(),
            (AttributeId::ValueRank, NodeKind::Variable(v)) => Variant::Int32(v.value_rank),
            (AttributeId::ArrayDimensions, NodeKind::Variable(v)) => match &v.array_dimensions {
                Some(dims) => Variant::array(
                    VariantType::UInt32,
                    dims.iter().map(|d| Variant::UInt32(*d)).collect(),
                ),
                None => Variant::Empty,
            },
            (AttributeId::AccessLevel, NodeKind::Variable(v)) => Variant::Byte(v.access_level),
            (AttributeId::UserAccessLevel, NodeKind::Variable(v)) => {
                Variant::Byte(v.user_access_level)
            }
            (AttributeId::MinimumSamplingInterval, NodeKind::Variable(v)) => {
                Variant::Double(v.minimum_sampling_interval)
            }
            (AttributeId::Historizing, NodeKind::Variable(v)) => Variant::Boolean(v.historizing),
            (AttributeId::Executable, NodeKind::Method(m)) => Variant::Boolean(m.executable),
            (AttributeId::UserExecutable, NodeKind::Method(m)) => {
                Variant::Boolean(m.user_executable)
            }
            (AttributeId::EventNotifier, NodeKind::Object { event_notifier }) => {
                Variant::Byte(*event_notifier)
            }
            (AttributeId::IsAbstract, NodeKind::ObjectType { is_abstract })
            | (AttributeId::IsAbstract, NodeKind::VariableType { is_abstract })
            | (AttributeId::IsAbstract, NodeKind::DataType { is_abstract }) => {
                Variant::Boolean(*is_abstract)
            }
            (AttributeId::Symmetric, NodeKind::ReferenceType { symmetric, .. }) => {
                Variant::Boolean(*symmetric)
            }
            (AttributeId::InverseName, NodeKind::ReferenceType { inverse_name, .. }) => {
                match inverse_name {
                    Some(name) => name.clone().into(),
                    None => Variant::Empty,
                }
            }
            _ => return DataValue::bad(StatusCode::BAD_ATTRIBUTE_ID_INVALID),
        };
        DataValue {
            value,
            status: StatusCode::GOOD,
            source_timestamp: Some(now),
            server_timestamp: Some(now),
            ..Default::default()
        }
    }

    /// Write the Value attribute. Non-value attributes and non-writable
    /// variables are rejected per OPC UA Part 4 write rules.
    pub fn write_attribute(
        &mut self,
        node_id: &NodeId,
        attribute_id: u32,
        value: &DataValue,
    ) -> StatusCode {
        let Some(node) = self.find_mut(node_id) else {
            return StatusCode::BAD_NODE_ID_UNKNOWN;
        };
        match AttributeId::from_u32(attribute_id) {
            Some(AttributeId::Value) => {}
            Some(_) => return StatusCode::BAD_NOT_WRITABLE,
            None => return StatusCode::BAD_ATTRIBUTE_ID_INVALID,
        }
        let NodeKind::Variable(variable) = &mut node.kind else {
            return StatusCode::BAD_NOT_WRITABLE;
        };
        if variable.access_level & access_level::CURRENT_WRITE == 0 {
            return StatusCode::BAD_NOT_WRITABLE;
        }
        if let Some(coerced) = coerce_value(&value.value, &variable.data_type) {
            variable.value = DataValue {
                value: coerced,
                status: value.status,
                source_timestamp: value.source_timestamp.or_else(|| Some(DateTime::now())),
                source_picoseconds: value.source_picoseconds,
                server_timestamp: Some(DateTime::now()),
                server_picoseconds: None,
            };
            variable.write_version = variable.write_version.wrapping_add(1);
            StatusCode::GOOD
        } else {
            StatusCode::BAD_TYPE_MISMATCH
        }
    }

    /// Set a variable's value from server-side code, bypassing access
    /// checks. The usual way applications push process data.
    pub fn set_value(&mut self, node_id: &NodeId, value: impl Into<Variant>) -> StatusCode {
        let Some(node) = self.find_mut(node_id) else {
            return StatusCode::BAD_NODE_ID_UNKNOWN;
        };
        let NodeKind::Variable(variable) = &mut node.kind else {
            return StatusCode::BAD_NODE_ID_UNKNOWN;
        };
        variable.value = DataValue::new(value, DateTime::now());
        variable.write_version = variable.write_version.wrapping_add(1);
        StatusCode::GOOD
    }

    /// Current write version of a variable, for exception-based sampling.
    pub fn write_version(&self, node_id: &NodeId) -> Option<u64> {
        match &self.find(node_id)?.kind {
            NodeKind::Variable(v) => Some(v.write_version),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // CALL
    // ------------------------------------------------------------------

    /// Invoke a method after validating existence and input arity/types
    /// against the method's InputArguments property.
    pub fn call_method(
        &mut self,
        context: &CallContext,
        object_id: &NodeId,
        method_id: &NodeId,
        inputs: &[Variant],
    ) -> Result<Vec<Variant>, StatusCode> {
        let Some(node) = self.find(method_id) else {
            return Err(StatusCode::BAD_METHOD_INVALID);
        };
        let NodeKind::Method(method) = &node.kind else {
            return Err(StatusCode::BAD_METHOD_INVALID);
        };
        if !method.executable || !method.user_executable {
            return Err(StatusCode::BAD_USER_ACCESS_DENIED);
        }
        if self.find(object_id).is_none() {
            return Err(StatusCode::BAD_NODE_ID_UNKNOWN);
        }

        if let Some(declared) = self.input_arguments(method_id) {
            if inputs.len() < declared.len() {
                return Err(StatusCode::BAD_ARGUMENTS_MISSING);
            }
            if inputs.len() > declared.len() {
                return Err(StatusCode::BAD_TOO_MANY_ARGUMENTS);
            }
            for (input, argument) in inputs.iter().zip(&declared) {
                if !input_type_matches(input, &argument.data_type) {
                    return Err(StatusCode::BAD_TYPE_MISMATCH);
                }
            }
        } else if !inputs.is_empty() {
            return Err(StatusCode::BAD_TOO_MANY_ARGUMENTS);
        }

        let mut callback = self
            .methods
            .remove(method_id)
            .ok_or(StatusCode::BAD_NOT_IMPLEMENTED)?;
        // User code may re-enter the space through the context, so the
        // callback runs with itself detached from the method table.
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            callback.call(context, inputs)
        }));
        self.methods.insert(method_id.clone(), callback);
        match result {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(%method_id, "method callback panicked");
                Err(StatusCode::BAD_INTERNAL_ERROR)
            }
        }
    }

    /// Value of a named property (HasProperty target) of a node.
    pub fn property_value(&self, node_id: &NodeId, name: &str) -> Option<DataValue> {
        let &index = self.index.get(node_id)?;
        let property = self.references[index.0 as usize]
            .iter()
            .filter(|r| r.is_forward && r.reference_type == reference_type_ids::HAS_PROPERTY)
            .map(|r| &self.nodes[r.target.0 as usize])
            .find(|n| n.browse_name.name.as_deref() == Some(name))?;
        match &property.kind {
            NodeKind::Variable(v) => Some(v.value.clone()),
            _ => None,
        }
    }

    /// The declared InputArguments of a method, when present.
    fn input_arguments(&self, method_id: &NodeId) -> Option<Vec<Argument>> {
        let &index = self.index.get(method_id)?;
        let property = self.references[index.0 as usize]
            .iter()
            .filter(|r| r.is_forward && r.reference_type == reference_type_ids::HAS_PROPERTY)
            .map(|r| &self.nodes[r.target.0 as usize])
            .find(|n| n.browse_name.name.as_deref() == Some("InputArguments"))?;
        let NodeKind::Variable(v) = &property.kind else {
            return None;
        };
        let Variant::Array(array) = &v.value.value else {
            return None;
        };
        let mut arguments = Vec::new();
        for item in &array.values {
            if let Variant::ExtensionObject(object) = item {
                if let Ok(argument) = object.decode_body::<Argument>(&self.decoding_limits) {
                    arguments.push(argument);
                }
            }
        }
        Some(arguments)
    }

    // ------------------------------------------------------------------
    // TRANSLATE
    // ------------------------------------------------------------------

    /// Resolve a relative path from a starting node. Returns the targets
    /// of the final element or the first failure.
    pub fn translate_path(
        &self,
        starting_node: &NodeId,
        path: &RelativePath,
    ) -> Result<Vec<NodeId>, StatusCode> {
        let Some(elements) = path.elements.as_ref().filter(|e| !e.is_empty()) else {
            return Err(StatusCode::BAD_NOTHING_TO_DO);
        };
        if self.find(starting_node).is_none() {
            return Err(StatusCode::BAD_NODE_ID_UNKNOWN);
        }
        let mut current: Vec<NodeId> = vec![starting_node.clone()];
        for element in elements {
            let mut next = Vec::new();
            for node in &current {
                let description = BrowseDescription {
                    node_id: node.clone(),
                    browse_direction: if element.is_inverse {
                        BrowseDirection::Inverse
                    } else {
                        BrowseDirection::Forward
                    },
                    reference_type_id: element.reference_type_id.clone(),
                    include_subtypes: element.include_subtypes,
                    node_class_mask: 0,
                    result_mask: 0,
                };
                for reference in self.browse(&description)? {
                    if element.target_name.is_null()
                        || reference.browse_name == element.target_name
                    {
                        next.push(reference.node_id.node_id);
                    }
                }
            }
            if next.is_empty() {
                return Err(StatusCode::BAD_NO_MATCH);
            }
            next.dedup();
            current = next;
        }
        Ok(current)
    }

    // ------------------------------------------------------------------
    // DEFAULT NODESET
    // ------------------------------------------------------------------

    fn add_reference_type(&mut self, id: u32, name: &str, supertype: Option<u32>) {
        self.insert(Node {
            node_id: NodeId::from(id),
            browse_name: QualifiedName::new(0, name),
            display_name: LocalizedText::new(name),
            description: None,
            kind: NodeKind::ReferenceType {
                symmetric: false,
                inverse_name: None,
            },
        });
        if let Some(supertype) = supertype {
            self.add_reference(
                &NodeId::from(supertype),
                reference_type_ids::HAS_SUBTYPE,
                &NodeId::from(id),
            );
        }
    }

    fn build_defaults(&mut self, application_uri: &str) {
        use reference_type_ids as refs;

        // Reference-type hierarchy, root first.
        self.add_reference_type(refs::REFERENCES, "References", None);
        self.add_reference_type(refs::HIERARCHICAL_REFERENCES, "HierarchicalReferences", Some(refs::REFERENCES));
        self.add_reference_type(refs::NON_HIERARCHICAL_REFERENCES, "NonHierarchicalReferences", Some(refs::REFERENCES));
        self.add_reference_type(refs::HAS_CHILD, "HasChild", Some(refs::HIERARCHICAL_REFERENCES));
        self.add_reference_type(refs::ORGANIZES, "Organizes", Some(refs::HIERARCHICAL_REFERENCES));
        self.add_reference_type(refs::HAS_EVENT_SOURCE, "HasEventSource", Some(refs::HIERARCHICAL_REFERENCES));
        self.add_reference_type(refs::HAS_MODELLING_RULE, "HasModellingRule", Some(refs::NON_HIERARCHICAL_REFERENCES));
        self.add_reference_type(refs::HAS_TYPE_DEFINITION, "HasTypeDefinition", Some(refs::NON_HIERARCHICAL_REFERENCES));
        self.add_reference_type(refs::GENERATES_EVENT, "GeneratesEvent", Some(refs::NON_HIERARCHICAL_REFERENCES));
        self.add_reference_type(refs::AGGREGATES, "Aggregates", Some(refs::HAS_CHILD));
        self.add_reference_type(refs::HAS_SUBTYPE, "HasSubtype", Some(refs::HAS_CHILD));
        self.add_reference_type(refs::HAS_PROPERTY, "HasProperty", Some(refs::AGGREGATES));
        self.add_reference_type(refs::HAS_COMPONENT, "HasComponent", Some(refs::AGGREGATES));
        self.add_reference_type(refs::HAS_NOTIFIER, "HasNotifier", Some(refs::HAS_EVENT_SOURCE));
        self.add_reference_type(refs::HAS_ORDERED_COMPONENT, "HasOrderedComponent", Some(refs::HAS_COMPONENT));

        // Type nodes referenced by HasTypeDefinition.
        for (id, name) in [
            (type_ids::BASE_OBJECT_TYPE, "BaseObjectType"),
            (type_ids::FOLDER_TYPE, "FolderType"),
            (type_ids::SERVER_TYPE, "ServerType"),
            (type_ids::BASE_EVENT_TYPE, "BaseEventType"),
        ] {
            self.insert(Node {
                node_id: NodeId::from(id),
                browse_name: QualifiedName::new(0, name),
                display_name: LocalizedText::new(name),
                description: None,
                kind: NodeKind::ObjectType { is_abstract: false },
            });
        }
        for (id, name) in [
            (type_ids::BASE_DATA_VARIABLE_TYPE, "BaseDataVariableType"),
            (type_ids::PROPERTY_TYPE, "PropertyType"),
        ] {
            self.insert(Node {
                node_id: NodeId::from(id),
                browse_name: QualifiedName::new(0, name),
                display_name: LocalizedText::new(name),
                description: None,
                kind: NodeKind::VariableType { is_abstract: false },
            });
        }
        self.add_reference(
            &NodeId::from(type_ids::BASE_OBJECT_TYPE),
            refs::HAS_SUBTYPE,
            &NodeId::from(type_ids::FOLDER_TYPE),
        );

        // Folder skeleton.
        let root = NodeId::from(object_ids::ROOT_FOLDER);
        self.insert(Node {
            node_id: root.clone(),
            browse_name: QualifiedName::new(0, "Root"),
            display_name: LocalizedText::new("Root"),
            description: None,
            kind: NodeKind::Object { event_notifier: 0 },
        });
        let objects = NodeId::from(object_ids::OBJECTS_FOLDER);
        self.add_object(objects.clone(), QualifiedName::new(0, "Objects"), &root, refs::ORGANIZES);
        self.add_object(
            NodeId::from(object_ids::TYPES_FOLDER),
            QualifiedName::new(0, "Types"),
            &root,
            refs::ORGANIZES,
        );
        self.add_object(
            NodeId::from(object_ids::VIEWS_FOLDER),
            QualifiedName::new(0, "Views"),
            &root,
            refs::ORGANIZES,
        );
        for folder in [object_ids::ROOT_FOLDER, object_ids::OBJECTS_FOLDER, object_ids::TYPES_FOLDER, object_ids::VIEWS_FOLDER] {
            self.add_reference(
                &NodeId::from(folder),
                refs::HAS_TYPE_DEFINITION,
                &NodeId::from(type_ids::FOLDER_TYPE),
            );
        }

        // The Server object and its mandatory children.
        let server = NodeId::from(object_ids::SERVER);
        self.add_object(server.clone(), QualifiedName::new(0, "Server"), &objects, refs::ORGANIZES);
        self.add_reference(&server, refs::HAS_TYPE_DEFINITION, &NodeId::from(type_ids::SERVER_TYPE));

        let now = DateTime::now();
        self.add_variable(
            VariableBuilder::new(
                NodeId::from(variable_ids::SERVER_NAMESPACE_ARRAY),
                QualifiedName::new(0, "NamespaceArray"),
            )
            .parent(server.clone(), refs::HAS_PROPERTY)
            .property()
            .value(Variant::string_array(self.namespaces.clone())),
        );
        self.add_variable(
            VariableBuilder::new(
                NodeId::from(variable_ids::SERVER_SERVER_ARRAY),
                QualifiedName::new(0, "ServerArray"),
            )
            .parent(server.clone(), refs::HAS_PROPERTY)
            .property()
            .value(Variant::string_array(vec![application_uri.to_string()])),
        );

        let status = NodeId::from(variable_ids::SERVER_SERVER_STATUS);
        self.add_variable(
            VariableBuilder::new(status.clone(), QualifiedName::new(0, "ServerStatus"))
                .parent(server.clone(), refs::HAS_COMPONENT)
                .value(Variant::Empty),
        );
        self.add_variable(
            VariableBuilder::new(
                NodeId::from(variable_ids::SERVER_SERVER_STATUS_START_TIME),
                QualifiedName::new(0, "StartTime"),
            )
            .parent(status.clone(), refs::HAS_COMPONENT)
            .value(Variant::DateTime(now)),
        );
        self.add_variable(
            VariableBuilder::new(
                NodeId::from(variable_ids::SERVER_SERVER_STATUS_CURRENT_TIME),
                QualifiedName::new(0, "CurrentTime"),
            )
            .parent(status.clone(), refs::HAS_COMPONENT)
            .value(Variant::DateTime(now)),
        );
        self.add_variable(
            VariableBuilder::new(
                NodeId::from(variable_ids::SERVER_SERVER_STATUS_STATE),
                QualifiedName::new(0, "State"),
            )
            .parent(status.clone(), refs::HAS_COMPONENT)
            // ServerState enumeration: 0 = Running.
            .value(Variant::Int32(0)),
        );

        self.add_object(
            NodeId::from(variable_ids::SERVER_SERVER_CAPABILITIES),
            QualifiedName::new(0, "ServerCapabilities"),
            &server,
            refs::HAS_COMPONENT,
        );
        let diagnostics = NodeId::from(variable_ids::SERVER_SERVER_DIAGNOSTICS);
        self.add_object(
            diagnostics.clone(),
            QualifiedName::new(0, "ServerDiagnostics"),
            &server,
            refs::HAS_COMPONENT,
        );
        self.add_variable(
            VariableBuilder::new(
                NodeId::from(variable_ids::SERVER_SERVER_DIAGNOSTICS_SERVER_DIAGNOSTICS_SUMMARY),
                QualifiedName::new(0, "ServerDiagnosticsSummary"),
            )
            .parent(diagnostics, refs::HAS_COMPONENT)
            .value(Variant::Empty),
        );

        // Well-known Server methods. The engine answers these itself; the
        // nodes exist so clients can browse and introspect them.
        for (id, name) in [
            (method_ids::SERVER_GET_MONITORED_ITEMS, "GetMonitoredItems"),
            (method_ids::SERVER_SET_SUBSCRIPTION_DURABLE, "SetSubscriptionDurable"),
            (method_ids::SERVER_RESEND_DATA, "ResendData"),
            (method_ids::SERVER_REQUEST_SERVER_STATE_CHANGE, "RequestServerStateChange"),
        ] {
            self.insert(Node {
                node_id: NodeId::from(id),
                browse_name: QualifiedName::new(0, name),
                display_name: LocalizedText::new(name),
                description: None,
                kind: NodeKind::Method(MethodNode {
                    executable: true,
                    user_executable: true,
                }),
            });
            self.add_reference(&server, refs::HAS_COMPONENT, &NodeId::from(id));
        }
        debug!(nodes = self.nodes.len(), "default address space built");
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

/// Fluent construction of variables.
pub struct VariableBuilder {
    node_id: NodeId,
    browse_name: QualifiedName,
    parent: Option<NodeId>,
    reference_type: u32,
    variable: VariableNode,
    as_property: bool,
}

impl VariableBuilder {
    pub fn new(node_id: NodeId, browse_name: QualifiedName) -> Self {
        Self {
            node_id,
            browse_name,
            parent: None,
            reference_type: reference_type_ids::HAS_COMPONENT,
            variable: VariableNode::default(),
            as_property: false,
        }
    }

    pub fn parent(mut self, parent: NodeId, reference_type: u32) -> Self {
        self.parent = Some(parent);
        self.reference_type = reference_type;
        self
    }

    pub fn value(mut self, value: impl Into<Variant>) -> Self {
        let value = value.into();
        self.variable.data_type = NodeId::from(value.variant_type().data_type_id());
        self.variable.value = DataValue::new(value, DateTime::now());
        self
    }

    pub fn data_type(mut self, data_type: NodeId) -> Self {
        self.variable.data_type = data_type;
        self
    }

    pub fn writable(mut self) -> Self {
        self.variable.access_level |= access_level::CURRENT_WRITE;
        self.variable.user_access_level |= access_level::CURRENT_WRITE;
        self
    }

    pub fn minimum_sampling_interval(mut self, interval_ms: f64) -> Self {
        self.variable.minimum_sampling_interval = interval_ms;
        self
    }

    /// Type the node as a Property instead of a BaseDataVariable.
    pub fn property(mut self) -> Self {
        self.as_property = true;
        self
    }
}

/// Input-argument type check for Call: the declared data type must be the
/// matching built-in type, BaseDataType (i=24) accepting anything. Empty
/// variants pass as "no value provided".
fn input_type_matches(input: &Variant, declared: &NodeId) -> bool {
    const BASE_DATA_TYPE: u32 = 24;
    if input.is_empty() {
        return true;
    }
    match declared.as_ns0_numeric() {
        Some(BASE_DATA_TYPE) | None => true,
        Some(id) => input.variant_type().data_type_id() == id,
    }
}

/// Permissive scalar coercion for writes, per the Part 3 conversion rules
/// this stack supports: identical types always pass, integer widenings
/// that cannot lose data pass, everything else is a mismatch.
fn coerce_value(value: &Variant, target_type: &NodeId) -> Option<Variant> {
    let Some(target) = target_type.as_ns0_numeric() else {
        return Some(value.clone());
    };
    let actual = value.variant_type().data_type_id();
    if actual == target
        || target == VariantType::Variant.data_type_id()
        || value.is_empty()
        || value.is_array()
    {
        return Some(value.clone());
    }
    let widened = match (value, VariantType::from_id(target as u8)?) {
        (Variant::SByte(v), VariantType::Int16) => Variant::Int16(i16::from(*v)),
        (Variant::SByte(v), VariantType::Int32) => Variant::Int32(i32::from(*v)),
        (Variant::SByte(v), VariantType::Int64) => Variant::Int64(i64::from(*v)),
        (Variant::Byte(v), VariantType::UInt16) => Variant::UInt16(u16::from(*v)),
        (Variant::Byte(v), VariantType::UInt32) => Variant::UInt32(u32::from(*v)),
        (Variant::Byte(v), VariantType::UInt64) => Variant::UInt64(u64::from(*v)),
        (Variant::Int16(v), VariantType::Int32) => Variant::Int32(i32::from(*v)),
        (Variant::Int16(v), VariantType::Int64) => Variant::Int64(i64::from(*v)),
        (Variant::UInt16(v), VariantType::UInt32) => Variant::UInt32(u32::from(*v)),
        (Variant::UInt16(v), VariantType::UInt64) => Variant::UInt64(u64::from(*v)),
        (Variant::Int32(v), VariantType::Int64) => Variant::Int64(i64::from(*v)),
        (Variant::UInt32(v), VariantType::UInt64) => Variant::UInt64(u64::from(*v)),
        (Variant::Float(v), VariantType::Double) => Variant::Double(f64::from(*v)),
        _ => return None,
    };
    Some(widened)
}
