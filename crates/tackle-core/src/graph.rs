//! Property-graph element model shared by every graph store.
//!
//! Elements are addressed by store-generated integer ids; adjacency is
//! expressed through edge endpoints rather than in-memory references, so
//! copying a graph is a pure data transformation over ids.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::defaults::{EDGE_TYPE_DELIMITER, TYPE_PROP};

/// Store-generated element identifier.
pub type ElementId = i64;

/// Attribute bag of a graph element.
pub type PropertyMap = BTreeMap<String, JsonValue>;

/// A vertex with multi-valued type tags and an opaque property bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub id: ElementId,
    #[serde(default, rename = "types")]
    pub type_tags: Vec<String>,
    #[serde(default)]
    pub properties: PropertyMap,
}

impl Vertex {
    /// Whether the vertex carries the given type tag.
    pub fn has_type(&self, tag: &str) -> bool {
        self.type_tags.iter().any(|t| t == tag)
    }

    pub fn property(&self, key: &str) -> Option<&JsonValue> {
        self.properties.get(key)
    }

    pub fn str_property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(JsonValue::as_str)
    }

    pub fn i64_property(&self, key: &str) -> Option<i64> {
        self.properties.get(key).and_then(JsonValue::as_i64)
    }
}

/// A directed, labelled edge between two vertices.
///
/// The edge's type tags live in the [`TYPE_PROP`] property as one string
/// joined with [`EDGE_TYPE_DELIMITER`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: ElementId,
    pub label: String,
    #[serde(rename = "outV")]
    pub out_vertex: ElementId,
    #[serde(rename = "inV")]
    pub in_vertex: ElementId,
    #[serde(default)]
    pub properties: PropertyMap,
}

impl Edge {
    /// Split the joined type property into individual tags.
    pub fn type_tags(&self) -> Vec<String> {
        match self.properties.get(TYPE_PROP).and_then(JsonValue::as_str) {
            Some(joined) => split_edge_tags(joined),
            None => Vec::new(),
        }
    }

    pub fn property(&self, key: &str) -> Option<&JsonValue> {
        self.properties.get(key)
    }
}

/// Join several type tags into the single-valued edge representation.
pub fn join_edge_tags<S: AsRef<str>>(tags: &[S]) -> String {
    let mut joined = String::new();
    for (i, tag) in tags.iter().enumerate() {
        if i > 0 {
            joined.push(EDGE_TYPE_DELIMITER);
        }
        joined.push_str(tag.as_ref());
    }
    joined
}

/// Split a joined edge type property back into tags, ignoring empty segments.
pub fn split_edge_tags(joined: &str) -> Vec<String> {
    joined
        .split(EDGE_TYPE_DELIMITER)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Value of the isolation tag property for an owning analysis.
///
/// Stored as a string so the store can index it as text.
pub fn isolation_tag(analysis_id: i64) -> JsonValue {
    JsonValue::String(analysis_id.to_string())
}

/// Vertex selection criteria. All present criteria must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexFilter {
    /// Vertex must carry this type tag.
    pub type_tag: Option<String>,
    /// Vertex must have this property (any value).
    pub has_property: Option<String>,
    /// Vertex property must equal the given value.
    pub equals: Vec<(String, JsonValue)>,
}

impl VertexFilter {
    /// Filter matching every vertex.
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter matching vertices with the given type tag.
    pub fn of_type(tag: impl Into<String>) -> Self {
        Self {
            type_tag: Some(tag.into()),
            ..Default::default()
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.equals.push((key.into(), value.into()));
        self
    }

    pub fn having(mut self, key: impl Into<String>) -> Self {
        self.has_property = Some(key.into());
        self
    }

    /// In-memory evaluation of the filter.
    pub fn matches(&self, vertex: &Vertex) -> bool {
        if let Some(ref tag) = self.type_tag {
            if !vertex.has_type(tag) {
                return false;
            }
        }
        if let Some(ref key) = self.has_property {
            if !vertex.properties.contains_key(key) {
                return false;
            }
        }
        self.equals
            .iter()
            .all(|(key, value)| vertex.properties.get(key) == Some(value))
    }
}

/// Edge selection criteria. All present criteria must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeFilter {
    pub label: Option<String>,
    pub equals: Vec<(String, JsonValue)>,
}

impl EdgeFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Default::default()
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.equals.push((key.into(), value.into()));
        self
    }

    pub fn matches(&self, edge: &Edge) -> bool {
        if let Some(ref label) = self.label {
            if &edge.label != label {
                return false;
            }
        }
        self.equals
            .iter()
            .all(|(key, value)| edge.properties.get(key) == Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vertex(tags: &[&str], props: &[(&str, JsonValue)]) -> Vertex {
        Vertex {
            id: 1,
            type_tags: tags.iter().map(|s| s.to_string()).collect(),
            properties: props
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn test_join_and_split_edge_tags() {
        let joined = join_edge_tags(&["A", "B", "C"]);
        assert_eq!(joined, "A|B|C");
        assert_eq!(split_edge_tags(&joined), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_split_edge_tags_ignores_empty_segments() {
        assert_eq!(split_edge_tags("A||B|"), vec!["A", "B"]);
        assert!(split_edge_tags("").is_empty());
    }

    #[test]
    fn test_edge_type_tags_from_property() {
        let mut properties = PropertyMap::new();
        properties.insert(TYPE_PROP.to_string(), json!("Link|Reference"));
        let edge = Edge {
            id: 7,
            label: "links".into(),
            out_vertex: 1,
            in_vertex: 2,
            properties,
        };
        assert_eq!(edge.type_tags(), vec!["Link", "Reference"]);
    }

    #[test]
    fn test_edge_without_type_property_has_no_tags() {
        let edge = Edge {
            id: 7,
            label: "links".into(),
            out_vertex: 1,
            in_vertex: 2,
            properties: PropertyMap::new(),
        };
        assert!(edge.type_tags().is_empty());
    }

    #[test]
    fn test_vertex_filter_type_and_property() {
        let v = vertex(&["FileResource"], &[("analysisId", json!("42"))]);
        assert!(VertexFilter::of_type("FileResource").matches(&v));
        assert!(!VertexFilter::of_type("ArchiveModel").matches(&v));
        assert!(VertexFilter::of_type("FileResource")
            .with_property("analysisId", "42")
            .matches(&v));
        assert!(!VertexFilter::all().with_property("analysisId", "7").matches(&v));
    }

    #[test]
    fn test_vertex_filter_having() {
        let v = vertex(&[], &[("filePath", json!("/a"))]);
        assert!(VertexFilter::all().having("filePath").matches(&v));
        assert!(!VertexFilter::all().having("analysisId").matches(&v));
    }

    #[test]
    fn test_edge_filter() {
        let mut properties = PropertyMap::new();
        properties.insert("analysisId".into(), json!("42"));
        let edge = Edge {
            id: 1,
            label: "uses".into(),
            out_vertex: 1,
            in_vertex: 2,
            properties,
        };
        assert!(EdgeFilter::labelled("uses").matches(&edge));
        assert!(!EdgeFilter::labelled("owns").matches(&edge));
        assert!(EdgeFilter::all().with_property("analysisId", "42").matches(&edge));
    }

    #[test]
    fn test_isolation_tag_is_string() {
        assert_eq!(isolation_tag(42), json!("42"));
    }

    #[test]
    fn test_vertex_json_shape() {
        let v: Vertex = serde_json::from_value(json!({
            "id": 3,
            "types": ["A", "B"],
            "properties": {"name": "x"}
        }))
        .unwrap();
        assert_eq!(v.type_tags, vec!["A", "B"]);
        assert_eq!(v.str_property("name"), Some("x"));
    }
}
