//! Server-side events and event-filter evaluation.
//!
//! Applications raise [`ServerEvent`]s through the server handle. The
//! engine routes each event to the event monitored items listening on its
//! source node (or on the Server object, which notifies for everything),
//! evaluates the item's where clause and projects the select clauses into
//! the field list that goes on the wire.

use tracing::trace;

use crate::messages::{ContentFilter, EventFilter, FilterOperator, LiteralOperand, SimpleAttributeOperand};
use crate::types::ids::encoding_ids;
use crate::types::{
    AttributeId, DateTime, DecodingLimits, LocalizedText, NodeId, StatusCode, Variant,
};

/// An event raised against the address space.
#[derive(Debug, Clone)]
pub struct ServerEvent {
    pub event_type: NodeId,
    /// Node the event originates from.
    pub source_node: NodeId,
    pub severity: u16,
    pub message: LocalizedText,
    pub time: DateTime,
    /// Additional fields addressed by their browse path, `/`-joined.
    pub fields: Vec<(String, Variant)>,
}

impl ServerEvent {
    pub fn new(event_type: NodeId, source_node: NodeId, message: impl Into<String>) -> Self {
        Self {
            event_type,
            source_node,
            severity: 500,
            message: LocalizedText::new(message),
            time: DateTime::now(),
            fields: Vec::new(),
        }
    }

    pub fn severity(mut self, severity: u16) -> Self {
        self.severity = severity;
        self
    }

    pub fn field(mut self, path: impl Into<String>, value: impl Into<Variant>) -> Self {
        self.fields.push((path.into(), value.into()));
        self
    }

    /// Look up one select-clause target on this event.
    fn select(&self, operand: &SimpleAttributeOperand) -> Variant {
        if operand.attribute_id != AttributeId::Value as u32 {
            return Variant::Empty;
        }
        let path = operand
            .browse_path
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .map(|q| q.name.as_deref().unwrap_or(""))
            .collect::<Vec<_>>()
            .join("/");
        match path.as_str() {
            "EventType" => Variant::NodeId(self.event_type.clone()),
            "SourceNode" => Variant::NodeId(self.source_node.clone()),
            "Time" => Variant::DateTime(self.time),
            "Message" => Variant::LocalizedText(self.message.clone()),
            "Severity" => Variant::UInt16(self.severity),
            other => self
                .fields
                .iter()
                .find(|(name, _)| name == other)
                .map(|(_, value)| value.clone())
                .unwrap_or(Variant::Empty),
        }
    }

    /// Project the select clauses into the wire field list, in clause
    /// order.
    pub fn project(&self, filter: &EventFilter) -> Vec<Variant> {
        filter
            .select_clauses
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .map(|clause| self.select(clause))
            .collect()
    }

    /// Evaluate the where clause. Only the operator subset accepted by
    /// [`validate_event_filter`] reaches this point.
    pub fn matches(&self, filter: &EventFilter, limits: &DecodingLimits) -> bool {
        let Some(elements) = filter.where_clause.elements.as_deref() else {
            return true;
        };
        let Some(first) = elements.first() else {
            return true;
        };
        match first.filter_operator {
            FilterOperator::OfType => {
                let Some(wanted) = literal_node_id(first, limits) else {
                    return false;
                };
                self.event_type == wanted
            }
            FilterOperator::Equals => {
                let operands = first.filter_operands.as_deref().unwrap_or(&[]);
                if operands.len() != 2 {
                    return false;
                }
                let resolved: Vec<Variant> = operands
                    .iter()
                    .filter_map(|o| self.resolve_operand(o, limits))
                    .collect();
                resolved.len() == 2 && resolved[0] == resolved[1]
            }
            _ => false,
        }
    }

    fn resolve_operand(
        &self,
        operand: &crate::types::ExtensionObject,
        limits: &DecodingLimits,
    ) -> Option<Variant> {
        match operand.type_id.as_ns0_numeric() {
            Some(id) if id == encoding_ids::LITERAL_OPERAND => operand
                .decode_body::<LiteralOperand>(limits)
                .ok()
                .map(|l| l.value),
            Some(id) if id == encoding_ids::SIMPLE_ATTRIBUTE_OPERAND => operand
                .decode_body::<SimpleAttributeOperand>(limits)
                .ok()
                .map(|s| self.select(&s)),
            _ => None,
        }
    }
}

fn literal_node_id(
    element: &crate::messages::ContentFilterElement,
    limits: &DecodingLimits,
) -> Option<NodeId> {
    let operand = element.filter_operands.as_deref()?.first()?;
    if operand.type_id.as_ns0_numeric()? != encoding_ids::LITERAL_OPERAND {
        return None;
    }
    match operand.decode_body::<LiteralOperand>(limits).ok()?.value {
        Variant::NodeId(id) => Some(id),
        _ => None,
    }
}

/// Accept an event filter at item creation. Unsupported operators are
/// rejected up front so evaluation never guesses.
pub fn validate_event_filter(filter: &EventFilter) -> Result<(), StatusCode> {
    if filter
        .select_clauses
        .as_deref()
        .unwrap_or(&[])
        .is_empty()
    {
        return Err(StatusCode::BAD_STRUCTURE_MISSING);
    }
    validate_where_clause(&filter.where_clause)
}

fn validate_where_clause(where_clause: &ContentFilter) -> Result<(), StatusCode> {
    for element in where_clause.elements.as_deref().unwrap_or(&[]) {
        match element.filter_operator {
            FilterOperator::OfType | FilterOperator::Equals => {}
            other => {
                trace!(?other, "unsupported where-clause operator");
                return Err(StatusCode::BAD_CONTENT_FILTER_INVALID);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ContentFilterElement;
    use crate::types::ids::type_ids;
    use crate::types::{ExtensionObject, QualifiedName};

    fn select(path: &[&str]) -> SimpleAttributeOperand {
        SimpleAttributeOperand {
            type_definition_id: NodeId::from(type_ids::BASE_EVENT_TYPE),
            browse_path: Some(path.iter().map(|p| QualifiedName::new(0, *p)).collect()),
            attribute_id: AttributeId::Value as u32,
            index_range: None,
        }
    }

    fn event() -> ServerEvent {
        ServerEvent::new(
            NodeId::from(type_ids::BASE_EVENT_TYPE),
            NodeId::new_string(1, "Boiler"),
            "pressure high",
        )
        .severity(800)
        .field("Pressure", 11.5)
    }

    #[test]
    fn projection_in_clause_order() {
        let filter = EventFilter {
            select_clauses: Some(vec![
                select(&["Severity"]),
                select(&["Message"]),
                select(&["Pressure"]),
                select(&["NoSuchField"]),
            ]),
            where_clause: ContentFilter::default(),
        };
        let fields = event().project(&filter);
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[0], Variant::UInt16(800));
        assert_eq!(fields[1], Variant::LocalizedText(LocalizedText::new("pressure high")));
        assert_eq!(fields[2], Variant::Double(11.5));
        assert_eq!(fields[3], Variant::Empty);
    }

    #[test]
    fn empty_where_clause_passes() {
        let filter = EventFilter {
            select_clauses: Some(vec![select(&["Severity"])]),
            where_clause: ContentFilter::default(),
        };
        assert!(event().matches(&filter, &DecodingLimits::default()));
    }

    #[test]
    fn of_type_matches_event_type() {
        let literal = |id: NodeId| {
            ExtensionObject::from_encodable(
                NodeId::from(encoding_ids::LITERAL_OPERAND),
                &LiteralOperand {
                    value: Variant::NodeId(id),
                },
            )
            .unwrap()
        };
        let mut filter = EventFilter {
            select_clauses: Some(vec![select(&["Severity"])]),
            where_clause: ContentFilter {
                elements: Some(vec![ContentFilterElement {
                    filter_operator: FilterOperator::OfType,
                    filter_operands: Some(vec![literal(NodeId::from(type_ids::BASE_EVENT_TYPE))]),
                }]),
            },
        };
        assert!(event().matches(&filter, &DecodingLimits::default()));

        filter.where_clause.elements.as_mut().unwrap()[0].filter_operands =
            Some(vec![literal(NodeId::new_numeric(0, 12345))]);
        assert!(!event().matches(&filter, &DecodingLimits::default()));
    }

    #[test]
    fn unsupported_operator_rejected_at_validation() {
        let filter = EventFilter {
            select_clauses: Some(vec![select(&["Severity"])]),
            where_clause: ContentFilter {
                elements: Some(vec![ContentFilterElement {
                    filter_operator: FilterOperator::Like,
                    filter_operands: None,
                }]),
            },
        };
        assert_eq!(
            validate_event_filter(&filter).unwrap_err(),
            StatusCode::BAD_CONTENT_FILTER_INVALID
        );
    }

    #[test]
    fn missing_select_clauses_rejected() {
        let filter = EventFilter::default();
        assert_eq!(
            validate_event_filter(&filter).unwrap_err(),
            StatusCode::BAD_STRUCTURE_MISSING
        );
    }
}
