//! Textual relative-path parsing.
//!
//! The grammar, as used by TranslateBrowsePathsToNodeIds tooling:
//!
//! ```text
//! Path        := Element+
//! Element     := RefSpec TargetName?
//! RefSpec     := '/'                      forward HierarchicalReferences, subtypes
//!              | '.'                      forward Aggregates, subtypes
//!              | '<' '#'? '!'? QName '>'  explicit type; '#' exact, '!' inverse
//! TargetName  := QName                    may be empty
//! QName       := (digits ':')? Chars      namespace index prefix
//! Chars       := any char, reserved ones escaped by '&'
//! Reserved    := / . < > : # ! &
//! ```
//!
//! Unescaped arbitrary Unicode is allowed in name positions.

use crate::messages::{RelativePath, RelativePathElement};
use crate::types::ids::reference_type_ids;
use crate::types::{NodeId, QualifiedName, StatusCode};

const RESERVED: &[char] = &['/', '.', '<', '>', ':', '#', '!', '&'];

/// Parse a textual relative path into its wire form.
pub fn parse_relative_path(input: &str) -> Result<RelativePath, StatusCode> {
    let mut chars = input.chars().peekable();
    let mut elements = Vec::new();

    while let Some(&c) = chars.peek() {
        let element = match c {
            '/' => {
                chars.next();
                RelativePathElement {
                    reference_type_id: NodeId::from(reference_type_ids::HIERARCHICAL_REFERENCES),
                    is_inverse: false,
                    include_subtypes: true,
                    target_name: QualifiedName::null(),
                }
            }
            '.' => {
                chars.next();
                RelativePathElement {
                    reference_type_id: NodeId::from(reference_type_ids::AGGREGATES),
                    is_inverse: false,
                    include_subtypes: true,
                    target_name: QualifiedName::null(),
                }
            }
            '<' => {
                chars.next();
                parse_explicit_reference(&mut chars)?
            }
            _ => return Err(StatusCode::BAD_BROWSE_NAME_INVALID),
        };
        let target_name = parse_qname(&mut chars)?;
        elements.push(RelativePathElement {
            target_name,
            ..element
        });
    }

    if elements.is_empty() {
        return Err(StatusCode::BAD_NOTHING_TO_DO);
    }
    Ok(RelativePath {
        elements: Some(elements),
    })
}

fn parse_explicit_reference(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Result<RelativePathElement, StatusCode> {
    let mut include_subtypes = true;
    let mut is_inverse = false;
    loop {
        match chars.peek() {
            Some('#') => {
                chars.next();
                include_subtypes = false;
            }
            Some('!') => {
                chars.next();
                is_inverse = true;
            }
            _ => break,
        }
    }
    let name = parse_qname_until(chars, Some('>'))?;
    match chars.next() {
        Some('>') => {}
        _ => return Err(StatusCode::BAD_BROWSE_NAME_INVALID),
    }
    let name = name.ok_or(StatusCode::BAD_BROWSE_NAME_INVALID)?;
    // Inside <...> a bare name defaults to namespace 0; the standard
    // reference types resolve to their well-known ids.
    let reference_type_id = match (name.namespace_index, name.name.as_deref()) {
        (0, Some(type_name)) => standard_reference_type(type_name)
            .map(NodeId::from)
            .unwrap_or_else(|| NodeId::new_string(0, type_name)),
        (ns, Some(type_name)) => NodeId::new_string(ns, type_name),
        (_, None) => return Err(StatusCode::BAD_BROWSE_NAME_INVALID),
    };
    Ok(RelativePathElement {
        reference_type_id,
        is_inverse,
        include_subtypes,
        target_name: QualifiedName::null(),
    })
}

fn standard_reference_type(name: &str) -> Option<u32> {
    Some(match name {
        "References" => reference_type_ids::REFERENCES,
        "HierarchicalReferences" => reference_type_ids::HIERARCHICAL_REFERENCES,
        "NonHierarchicalReferences" => reference_type_ids::NON_HIERARCHICAL_REFERENCES,
        "HasChild" => reference_type_ids::HAS_CHILD,
        "Organizes" => reference_type_ids::ORGANIZES,
        "HasEventSource" => reference_type_ids::HAS_EVENT_SOURCE,
        "HasModellingRule" => reference_type_ids::HAS_MODELLING_RULE,
        "HasTypeDefinition" => reference_type_ids::HAS_TYPE_DEFINITION,
        "GeneratesEvent" => reference_type_ids::GENERATES_EVENT,
        "Aggregates" => reference_type_ids::AGGREGATES,
        "HasSubtype" => reference_type_ids::HAS_SUBTYPE,
        "HasProperty" => reference_type_ids::HAS_PROPERTY,
        "HasComponent" => reference_type_ids::HAS_COMPONENT,
        "HasNotifier" => reference_type_ids::HAS_NOTIFIER,
        "HasOrderedComponent" => reference_type_ids::HAS_ORDERED_COMPONENT,
        _ => return None,
    })
}

/// Parse a qualified name terminated by the next unescaped reference
/// specifier (or end of input). Returns `None` for an empty name.
fn parse_qname(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Result<QualifiedName, StatusCode> {
    Ok(parse_qname_until(chars, None)?.unwrap_or_default())
}

fn parse_qname_until(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    terminator: Option<char>,
) -> Result<Option<QualifiedName>, StatusCode> {
    let mut raw = String::new();
    let mut digits = String::new();
    let mut namespace: Option<u16> = None;

    loop {
        match chars.peek() {
            None => break,
            Some(&c) if Some(c) == terminator => break,
            // An unescaped path delimiter ends the name.
            Some('/') | Some('.') | Some('<') if terminator.is_none() => break,
            Some('&') => {
                chars.next();
                match chars.next() {
                    Some(escaped) if RESERVED.contains(&escaped) => raw.push(escaped),
                    _ => return Err(StatusCode::BAD_BROWSE_NAME_INVALID),
                }
            }
            Some(&c) if RESERVED.contains(&c) => {
                if c == ':' && namespace.is_none() && !digits.is_empty() && raw == digits {
                    // "NN:" prefix completed; what we read so far was the
                    // namespace index.
                    chars.next();
                    namespace = Some(
                        digits
                            .parse::<u16>()
                            .map_err(|_| StatusCode::BAD_BROWSE_NAME_INVALID)?,
                    );
                    raw.clear();
                    digits.clear();
                } else {
                    return Err(StatusCode::BAD_BROWSE_NAME_INVALID);
                }
            }
            Some(&c) => {
                chars.next();
                if c.is_ascii_digit() && raw == digits {
                    digits.push(c);
                }
                raw.push(c);
            }
        }
    }

    if raw.is_empty() && namespace.is_none() {
        return Ok(None);
    }
    Ok(Some(QualifiedName {
        namespace_index: namespace.unwrap_or(0),
        name: Some(raw),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elements(path: &str) -> Vec<RelativePathElement> {
        parse_relative_path(path).unwrap().elements.unwrap()
    }

    #[test]
    fn hierarchical_and_aggregates_specifiers() {
        let parsed = elements("/0:ServerStatus.0:CurrentTime");
        assert_eq!(parsed.len(), 2);
        assert_eq!(
            parsed[0].reference_type_id,
            NodeId::from(reference_type_ids::HIERARCHICAL_REFERENCES)
        );
        assert!(parsed[0].include_subtypes);
        assert!(!parsed[0].is_inverse);
        assert_eq!(parsed[0].target_name, QualifiedName::new(0, "ServerStatus"));
        assert_eq!(
            parsed[1].reference_type_id,
            NodeId::from(reference_type_ids::AGGREGATES)
        );
        assert_eq!(parsed[1].target_name, QualifiedName::new(0, "CurrentTime"));
    }

    #[test]
    fn namespace_prefix_parsed() {
        let parsed = elements("/2:Block&.Output");
        assert_eq!(parsed[0].target_name.namespace_index, 2);
        assert_eq!(
            parsed[0].target_name.name.as_deref(),
            Some("Block.Output")
        );
    }

    #[test]
    fn default_namespace_is_zero() {
        let parsed = elements("/Truck");
        assert_eq!(parsed[0].target_name, QualifiedName::new(0, "Truck"));
    }

    #[test]
    fn every_reserved_char_escapes() {
        for c in super::RESERVED {
            let path = format!("/1:x&{c}y");
            let parsed = elements(&path);
            assert_eq!(
                parsed[0].target_name.name.as_deref(),
                Some(format!("x{c}y").as_str()),
                "escape of {c:?}"
            );
        }
    }

    #[test]
    fn explicit_reference_type() {
        let parsed = elements("<HasComponent>1:Wheel");
        assert_eq!(
            parsed[0].reference_type_id,
            NodeId::from(reference_type_ids::HAS_COMPONENT)
        );
        assert!(parsed[0].include_subtypes);
        assert!(!parsed[0].is_inverse);
        assert_eq!(parsed[0].target_name, QualifiedName::new(1, "Wheel"));
    }

    #[test]
    fn explicit_reference_flags() {
        let parsed = elements("<#!HasChild>Truck");
        assert!(!parsed[0].include_subtypes);
        assert!(parsed[0].is_inverse);
        assert_eq!(
            parsed[0].reference_type_id,
            NodeId::from(reference_type_ids::HAS_CHILD)
        );
    }

    #[test]
    fn custom_reference_type_name() {
        let parsed = elements("<2:Powers>3:Pump");
        assert_eq!(parsed[0].reference_type_id, NodeId::new_string(2, "Powers"));
        assert_eq!(parsed[0].target_name, QualifiedName::new(3, "Pump"));
    }

    #[test]
    fn empty_target_name_allowed() {
        let parsed = elements("/1:Block/");
        assert_eq!(parsed.len(), 2);
        assert!(parsed[1].target_name.is_null());
    }

    #[test]
    fn unicode_in_names() {
        let parsed = elements("/3:Kessel⟶Düse");
        assert_eq!(
            parsed[0].target_name.name.as_deref(),
            Some("Kessel⟶Düse")
        );
    }

    #[test]
    fn malformed_paths_rejected() {
        assert_eq!(
            parse_relative_path("").unwrap_err(),
            StatusCode::BAD_NOTHING_TO_DO
        );
        assert_eq!(
            parse_relative_path("Truck").unwrap_err(),
            StatusCode::BAD_BROWSE_NAME_INVALID
        );
        assert_eq!(
            parse_relative_path("/1:x&z").unwrap_err(),
            StatusCode::BAD_BROWSE_NAME_INVALID,
            "escape of a non-reserved char"
        );
        assert_eq!(
            parse_relative_path("<HasChild").unwrap_err(),
            StatusCode::BAD_BROWSE_NAME_INVALID
        );
        assert_eq!(
            parse_relative_path("/99999:x").unwrap_err(),
            StatusCode::BAD_BROWSE_NAME_INVALID
        );
    }
}
