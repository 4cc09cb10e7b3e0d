//! Static text resources served by the controller as XML
//!
//! The controller ships display texts for datapoints, levels, enum values and
//! error codes as XML documents (`/res/xml/<Kind>_<lang>.xml`). They are
//! flattened into a nested `id -> text` tree:
//!
//! - an element whose only child is text becomes `id -> text`
//! - an element with element children becomes a map, keyed by its own `id`
//!   (or merged into the parent when it has none)
//! - a childless `<error code=".." text=".."/>` becomes `code -> text`
//! - any other childless element becomes `id -> (empty)`

use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;

use crate::error::{ConvError, ConvResult};

/// Kind of text resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Datapoint names by group/member
    DatapointNames,
    /// Level names by function type/level
    LevelNames,
    /// Enum labels by group/member/code
    EnumNames,
    /// Error texts by code
    ErrorTexts,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::DatapointNames,
        ResourceKind::LevelNames,
        ResourceKind::EnumNames,
        ResourceKind::ErrorTexts,
    ];

    /// File stem used by the controller
    pub fn file_stem(&self) -> &'static str {
        match self {
            ResourceKind::DatapointNames => "VarIdentTexte",
            ResourceKind::LevelNames => "EbenenTexte",
            ResourceKind::EnumNames => "AufzaehlTexte",
            ResourceKind::ErrorTexts => "ErrorTexte",
        }
    }

    /// Resource path for a language, e.g. `/res/xml/VarIdentTexte_de.xml`
    pub fn path(&self, lang: &str) -> String {
        format!("/res/xml/{}_{}.xml", self.file_stem(), lang)
    }
}

/// One node of a flattened resource tree
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResourceNode {
    Text(String),
    Map(BTreeMap<String, ResourceNode>),
    Empty,
}

impl ResourceNode {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResourceNode::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, ResourceNode>> {
        match self {
            ResourceNode::Map(m) => Some(m),
            _ => None,
        }
    }
}

/// Flattened resource document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceTree {
    root: BTreeMap<String, ResourceNode>,
}

impl ResourceTree {
    /// Parse and flatten a resource XML document
    pub fn from_xml(xml: &str) -> ConvResult<Self> {
        let element = parse_root(xml)?;
        let mut root = BTreeMap::new();
        match flatten(&element)? {
            (Some(id), node) => {
                root.insert(id, node);
            }
            (None, ResourceNode::Map(map)) => root = map,
            (None, _) => {}
        }
        Ok(Self { root })
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Walk the tree along `path`
    pub fn get(&self, path: &[&str]) -> Option<&ResourceNode> {
        let (first, rest) = path.split_first()?;
        let mut node = self.root.get(*first)?;
        for key in rest {
            node = node.as_map()?.get(*key)?;
        }
        Some(node)
    }

    /// Text at `path`, if the node there is a text leaf
    pub fn text(&self, path: &[&str]) -> Option<&str> {
        self.get(path).and_then(ResourceNode::as_text)
    }

    /// Top level entries
    pub fn entries(&self) -> &BTreeMap<String, ResourceNode> {
        &self.root
    }
}

/// Display texts of one controller language
#[derive(Debug, Clone, Default)]
pub struct TextResources {
    pub datapoint_names: ResourceTree,
    pub level_names: ResourceTree,
    pub enum_names: ResourceTree,
    pub error_texts: ResourceTree,
}

impl TextResources {
    /// Install a flattened tree for a resource kind
    pub fn set(&mut self, kind: ResourceKind, tree: ResourceTree) {
        match kind {
            ResourceKind::DatapointNames => self.datapoint_names = tree,
            ResourceKind::LevelNames => self.level_names = tree,
            ResourceKind::EnumNames => self.enum_names = tree,
            ResourceKind::ErrorTexts => self.error_texts = tree,
        }
    }

    /// Datapoint display name by group/member
    pub fn dp_name(&self, group_nr: u32, member_nr: u32) -> Option<&str> {
        self.datapoint_names
            .text(&[&group_nr.to_string(), &member_nr.to_string()])
    }

    /// Level display name by function type/level id
    pub fn level_name(&self, fct_type: i64, level_id: i64) -> Option<&str> {
        self.level_names
            .text(&[&fct_type.to_string(), &level_id.to_string()])
    }

    /// Enum labels by group/member, restricted to `codes` when given
    ///
    /// A code without a label maps to the code itself.
    pub fn enum_names(
        &self,
        group_nr: u32,
        member_nr: u32,
        codes: Option<&[i64]>,
    ) -> Option<BTreeMap<String, String>> {
        let labels = self
            .enum_names
            .get(&[&group_nr.to_string(), &member_nr.to_string()])
            .and_then(ResourceNode::as_map);

        match (labels, codes) {
            (Some(labels), None) => Some(
                labels
                    .iter()
                    .filter_map(|(k, v)| v.as_text().map(|t| (k.clone(), t.to_string())))
                    .collect(),
            ),
            (labels, Some(codes)) => Some(
                codes
                    .iter()
                    .map(|code| {
                        let key = code.to_string();
                        let label = labels
                            .and_then(|l| l.get(&key))
                            .and_then(ResourceNode::as_text)
                            .map(str::to_string)
                            .unwrap_or_else(|| key.clone());
                        (key, label)
                    })
                    .collect(),
            ),
            (None, None) => None,
        }
    }

    /// Error text by code
    pub fn error_text(&self, code: &str) -> Option<&str> {
        self.error_texts.text(&[code])
    }
}

// =============================================================================
// XML parsing
// =============================================================================

#[derive(Debug, Default)]
struct XmlElement {
    name: String,
    attributes: BTreeMap<String, String>,
    children: Vec<XmlChild>,
}

#[derive(Debug)]
enum XmlChild {
    Element(XmlElement),
    Text(String),
}

impl XmlElement {
    fn from_start(start: &BytesStart<'_>) -> ConvResult<Self> {
        let mut attributes = BTreeMap::new();
        for attr in start.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attributes.insert(key, value);
        }
        Ok(Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            attributes,
            children: Vec::new(),
        })
    }
}

/// Build the element tree and return the first top-level element
fn parse_root(xml: &str) -> ConvResult<XmlElement> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(XmlElement::from_start(&start)?),
            Event::Empty(start) => {
                let element = XmlElement::from_start(&start)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(XmlChild::Element(element)),
                    None => return Ok(element),
                }
            }
            Event::Text(text) => {
                let text = text.unescape()?.into_owned();
                if let Some(parent) = stack.last_mut() {
                    if !text.trim().is_empty() {
                        parent.children.push(XmlChild::Text(text));
                    }
                }
            }
            Event::CData(data) => {
                let text = String::from_utf8_lossy(&data.into_inner()).into_owned();
                if let Some(parent) = stack.last_mut() {
                    if !text.trim().is_empty() {
                        parent.children.push(XmlChild::Text(text));
                    }
                }
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| ConvError::InvalidResource("unbalanced end tag".into()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(XmlChild::Element(element)),
                    None => return Ok(element),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Err(ConvError::InvalidResource("no root element".into()))
}

/// Flatten one element into `(id, node)`
fn flatten(element: &XmlElement) -> ConvResult<(Option<String>, ResourceNode)> {
    let id = element.attributes.get("id").cloned();

    if element.children.is_empty() {
        if element.name == "error" {
            let code = element.attributes.get("code").cloned();
            let text = element.attributes.get("text").cloned().unwrap_or_default();
            return Ok((code, ResourceNode::Text(text)));
        }
        return Ok((id, ResourceNode::Empty));
    }

    if let [XmlChild::Text(text)] = element.children.as_slice() {
        return Ok((id, ResourceNode::Text(text.clone())));
    }

    let mut map = BTreeMap::new();
    for child in &element.children {
        let XmlChild::Element(child) = child else {
            continue;
        };
        match flatten(child)? {
            (Some(child_id), node) => {
                map.insert(child_id, node);
            }
            (None, ResourceNode::Map(inner)) => map.extend(inner),
            (None, _) => {}
        }
    }

    Ok((id, ResourceNode::Map(map)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const VAR_IDENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!-- datapoint names -->
<texts>
  <group id="0">
    <member id="1">Außentemperatur</member>
    <member id="2">Vorlauftemperatur &amp; Soll</member>
  </group>
  <group id="5">
    <member id="12">Betriebsart</member>
    <member id="13"/>
  </group>
</texts>
"#;

    const ERRORS: &str = r#"<?xml version="1.0"?>
<errors>
  <error code="101" text="Fühlerbruch"/>
  <error code="102" text="Zündfehler"/>
</errors>
"#;

    const ENUMS: &str = r#"<root>
  <group id="5"><member id="12"><entry id="0">Aus</entry><entry id="1">Ein</entry><entry id="2">Auto</entry></member></group>
</root>"#;

    #[test]
    fn test_leaf_and_nested() {
        let tree = ResourceTree::from_xml(VAR_IDENT).unwrap();
        assert_eq!(tree.text(&["0", "1"]), Some("Außentemperatur"));
        assert_eq!(tree.text(&["0", "2"]), Some("Vorlauftemperatur & Soll"));
        assert_eq!(tree.get(&["5", "13"]), Some(&ResourceNode::Empty));
        assert_eq!(tree.text(&["5", "13"]), None);
        assert_eq!(tree.entries().len(), 2);
    }

    #[test]
    fn test_error_codes() {
        let tree = ResourceTree::from_xml(ERRORS).unwrap();
        assert_eq!(tree.text(&["101"]), Some("Fühlerbruch"));
        assert_eq!(tree.text(&["102"]), Some("Zündfehler"));
    }

    #[test]
    fn test_text_resources() {
        let mut res = TextResources::default();
        res.set(
            ResourceKind::DatapointNames,
            ResourceTree::from_xml(VAR_IDENT).unwrap(),
        );
        res.set(ResourceKind::EnumNames, ResourceTree::from_xml(ENUMS).unwrap());
        res.set(ResourceKind::ErrorTexts, ResourceTree::from_xml(ERRORS).unwrap());

        assert_eq!(res.dp_name(0, 1), Some("Außentemperatur"));
        assert_eq!(res.dp_name(9, 9), None);
        assert_eq!(res.error_text("101"), Some("Fühlerbruch"));

        let all = res.enum_names(5, 12, None).unwrap();
        assert_eq!(all.len(), 3);

        let some = res.enum_names(5, 12, Some(&[0, 2, 7])).unwrap();
        let expected: BTreeMap<String, String> = [
            ("0".to_string(), "Aus".to_string()),
            ("2".to_string(), "Auto".to_string()),
            ("7".to_string(), "7".to_string()),
        ]
        .into_iter()
        .collect();
        assert_eq!(some, expected);

        assert_eq!(res.enum_names(1, 1, None), None);
    }

    #[test]
    fn test_invalid_document() {
        assert!(ResourceTree::from_xml("").is_err());
        assert!(ResourceTree::from_xml("<a><b></a>").is_err());
    }

    #[test]
    fn test_resource_path() {
        assert_eq!(
            ResourceKind::DatapointNames.path("de"),
            "/res/xml/VarIdentTexte_de.xml"
        );
        assert_eq!(ResourceKind::ErrorTexts.path("en"), "/res/xml/ErrorTexte_en.xml");
    }
}
