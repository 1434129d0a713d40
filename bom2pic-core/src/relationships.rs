//! Relationship-descriptor (`_rels/*.rels`) parsing and target resolution.

#[cfg(feature = "fast-hash")]
use hashbrown::HashMap;
#[cfg(not(feature = "fast-hash"))]
use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{Bom2PicError, Result};
use crate::package::Package;

/// Kind of part a relationship points at, derived from its `Type` URI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RelationshipType {
    OfficeDocument,
    Worksheet,
    Drawing,
    Image,
    SharedStrings,
    Styles,
    Other,
}

impl RelationshipType {
    /// Classify a relationship `Type` URI by its last path segment.
    ///
    /// Transitional and strict namespaces share segment names, so only the
    /// tail is compared.
    pub fn from_type_uri(uri: &str) -> Self {
        match uri.rsplit('/').next().unwrap_or("") {
            "officeDocument" => RelationshipType::OfficeDocument,
            "worksheet" => RelationshipType::Worksheet,
            "drawing" => RelationshipType::Drawing,
            "image" => RelationshipType::Image,
            "sharedStrings" => RelationshipType::SharedStrings,
            "styles" => RelationshipType::Styles,
            _ => RelationshipType::Other,
        }
    }
}

/// A single relationship declared by a source part.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relationship {
    /// Relationship id, e.g. `rId3`.
    pub id: String,
    /// Package path of the target, resolved against the source part.
    /// For external targets this is the raw `Target` attribute.
    pub target_path: String,
    pub kind: RelationshipType,
    /// `TargetMode="External"`; such targets are never read from the package.
    pub external: bool,
}

/// All relationships declared by one source part, in document order.
#[derive(Clone, Debug, Default)]
pub struct Relationships {
    entries: Vec<Relationship>,
    by_id: HashMap<String, usize>,
}

impl Relationships {
    /// A source part without a descriptor has no relationships.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a relationship by id.
    pub fn get(&self, id: &str) -> Option<&Relationship> {
        self.by_id.get(id).map(|&idx| &self.entries[idx])
    }

    /// First internal relationship of the given kind, in document order.
    pub fn first_of_kind(&self, kind: RelationshipType) -> Option<&Relationship> {
        self.entries.iter().find(|rel| rel.kind == kind && !rel.external)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.entries.iter()
    }

    fn push(&mut self, rel: Relationship) {
        if self.by_id.contains_key(&rel.id) {
            tracing::debug!(id = %rel.id, "duplicate relationship id ignored");
            return;
        }
        self.by_id.insert(rel.id.clone(), self.entries.len());
        self.entries.push(rel);
    }
}

/// Path of the relationship descriptor for a part.
///
/// `xl/worksheets/sheet1.xml` -> `xl/worksheets/_rels/sheet1.xml.rels`
pub fn rels_path_for(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file_name)) => format!("{dir}/_rels/{file_name}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// Resolve a relationship target against the part that declares it.
///
/// Relative targets are joined to the source part's directory, absolute
/// targets are rooted at the package, and URI fragments are dropped.
pub fn resolve_target(source_part: &str, target: &str) -> String {
    let target = target.split('#').next().unwrap_or(target);
    if target.is_empty() {
        return normalize(source_part);
    }
    if let Some(rooted) = target.strip_prefix('/') {
        return normalize(rooted);
    }
    let base_dir = source_part.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
    normalize(&format!("{base_dir}/{target}"))
}

fn normalize(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out.join("/")
}

/// Parse a relationship descriptor declared by `source_part`.
///
/// Entries without an `Id` or `Target` are skipped. Unparseable markup is
/// reported as [`Bom2PicError::MalformedRelationships`] for the descriptor.
pub fn parse_relationships(xml: &[u8], source_part: &str) -> Result<Relationships> {
    let rels_part = rels_path_for(source_part);
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut rels = Relationships::empty();
    let mut buf = Vec::new();
    let mut saw_root = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) => {
                let local = e.local_name();
                let local = local.as_ref();

                if local == b"Relationships" {
                    saw_root = true;
                } else if local == b"Relationship" {
                    let mut rel_id: Option<String> = None;
                    let mut target: Option<String> = None;
                    let mut type_uri = String::new();
                    let mut external = false;

                    for attr in e.attributes() {
                        let attr = attr.map_err(|err| Bom2PicError::malformed_rels(&rels_part, err))?;
                        let value = attr
                            .unescape_value()
                            .map_err(|err| Bom2PicError::malformed_rels(&rels_part, err))?;
                        match attr.key.as_ref() {
                            b"Id" => rel_id = Some(value.into_owned()),
                            b"Target" => target = Some(value.into_owned()),
                            b"Type" => type_uri = value.into_owned(),
                            b"TargetMode" => external = value.eq_ignore_ascii_case("External"),
                            _ => {}
                        }
                    }

                    if let (Some(id), Some(target)) = (rel_id, target) {
                        let target_path = if external {
                            target
                        } else {
                            resolve_target(source_part, &target)
                        };
                        rels.push(Relationship {
                            id,
                            target_path,
                            kind: RelationshipType::from_type_uri(&type_uri),
                            external,
                        });
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Bom2PicError::malformed_rels(&rels_part, e)),
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(Bom2PicError::malformed_rels(&rels_part, "missing <Relationships> root"));
    }

    Ok(rels)
}

/// Load the relationships declared by `part`.
///
/// A missing descriptor is not an error: the part simply has no
/// relationships.
pub fn load_relationships(package: &mut Package<'_>, part: &str) -> Result<Relationships> {
    let rels_part = rels_path_for(part);
    let xml = match package.read_part(&rels_part) {
        Ok(Some(xml)) => xml,
        Ok(None) => return Ok(Relationships::empty()),
        Err(e) => return Err(Bom2PicError::malformed_rels(&rels_part, e)),
    };
    parse_relationships(&xml, part)
}
