//! DrawingML anchor parsing.
//!
//! A drawing part lists the shapes floating over a worksheet. Each top-level
//! anchor element positions its content either by cell markers
//! (`twoCellAnchor`, `oneCellAnchor`) or by absolute offsets
//! (`absoluteAnchor`). Pictures reference their image through the drawing's
//! relationships via `a:blip r:embed`.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Bom2PicError, Result};
use crate::utils::parse_u32_bytes;
use crate::worksheet::SheetGeometry;

/// A zero-based cell position on a sheet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellPosition {
    pub row: u32,
    pub col: u32,
}

impl CellPosition {
    pub fn new(row: u32, col: u32) -> Self {
        CellPosition { row, col }
    }
}

/// How a picture is attached to the sheet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Anchor {
    TwoCell {
        from: CellPosition,
        to: Option<CellPosition>,
    },
    OneCell {
        from: CellPosition,
    },
    /// Offsets in EMUs from the sheet's top-left corner.
    Absolute { x: i64, y: i64 },
    /// No usable position could be recovered.
    Unanchored,
}

impl Anchor {
    /// Cell holding the picture's top-left corner.
    pub fn resolve(&self, geometry: &SheetGeometry) -> Option<CellPosition> {
        match self {
            Anchor::TwoCell { from, .. } | Anchor::OneCell { from } => Some(*from),
            Anchor::Absolute { x, y } => Some(CellPosition::new(geometry.row_at(*y), geometry.col_at(*x))),
            Anchor::Unanchored => None,
        }
    }
}

/// A picture found in a drawing part, in document order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrawingPicture {
    /// `r:embed` id of the picture's blip.
    pub relationship_id: String,
    pub anchor: Anchor,
    /// Shape name from `cNvPr`, if present.
    pub name: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum AnchorKind {
    TwoCell,
    OneCell,
    Absolute,
}

#[derive(Default)]
struct Marker {
    col: Option<u32>,
    row: Option<u32>,
}

impl Marker {
    fn position(&self) -> Option<CellPosition> {
        Some(CellPosition::new(self.row?, self.col?))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum MarkerSlot {
    From,
    To,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum MarkerField {
    Col,
    Row,
}

struct OpenAnchor {
    kind: AnchorKind,
    from: Marker,
    to: Marker,
    pos: Option<(i64, i64)>,
    pictures: Vec<(String, Option<String>)>,
}

impl OpenAnchor {
    fn new(kind: AnchorKind) -> Self {
        OpenAnchor {
            kind,
            from: Marker::default(),
            to: Marker::default(),
            pos: None,
            pictures: Vec::new(),
        }
    }

    fn anchor(&self) -> Anchor {
        let resolved = match self.kind {
            AnchorKind::TwoCell => self.from.position().map(|from| Anchor::TwoCell {
                from,
                to: self.to.position(),
            }),
            AnchorKind::OneCell => self.from.position().map(|from| Anchor::OneCell { from }),
            AnchorKind::Absolute => self.pos.map(|(x, y)| Anchor::Absolute { x, y }),
        };
        resolved.unwrap_or(Anchor::Unanchored)
    }
}

fn anchor_kind(local: &[u8]) -> Option<AnchorKind> {
    match local {
        b"twoCellAnchor" => Some(AnchorKind::TwoCell),
        b"oneCellAnchor" => Some(AnchorKind::OneCell),
        b"absoluteAnchor" => Some(AnchorKind::Absolute),
        _ => None,
    }
}

fn embed_id(e: &BytesStart<'_>) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == b"embed")
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
        .filter(|id| !id.is_empty())
}

fn shape_name(e: &BytesStart<'_>) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == b"name")
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
}

fn offsets(e: &BytesStart<'_>) -> Option<(i64, i64)> {
    let mut x = None;
    let mut y = None;
    for attr in e.attributes().flatten() {
        let value = std::str::from_utf8(&attr.value).ok().and_then(|v| v.trim().parse::<i64>().ok());
        match attr.key.as_ref() {
            b"x" => x = value,
            b"y" => y = value,
            _ => {}
        }
    }
    Some((x?, y?))
}

fn on_element(
    e: &BytesStart<'_>,
    anchor: &mut Option<OpenAnchor>,
    pic_depth: u32,
    fallback_depth: u32,
    pic_name: &mut Option<String>,
    pictures: &mut Vec<DrawingPicture>,
) {
    match e.local_name().as_ref() {
        b"cNvPr" if pic_depth > 0 => *pic_name = shape_name(e),
        b"blip" if pic_depth > 0 && fallback_depth == 0 => {
            if let Some(id) = embed_id(e) {
                match anchor.as_mut() {
                    Some(open) => open.pictures.push((id, pic_name.clone())),
                    None => pictures.push(DrawingPicture {
                        relationship_id: id,
                        anchor: Anchor::Unanchored,
                        name: pic_name.clone(),
                    }),
                }
            }
        }
        b"pos" => {
            if let Some(open) = anchor.as_mut() {
                if open.kind == AnchorKind::Absolute && open.pos.is_none() {
                    open.pos = offsets(e);
                }
            }
        }
        _ => {}
    }
}

/// Parse a drawing part into its pictures, in document order.
///
/// Pictures inside an `mc:Fallback` branch are skipped: the matching
/// `mc:Choice` branch already carries them. Pictures grouped inside a group
/// shape share the group's anchor. A picture whose anchor markers are missing
/// or unparseable is reported as [`Anchor::Unanchored`].
pub fn parse_drawing(xml: &[u8], part: &str) -> Result<Vec<DrawingPicture>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut pictures = Vec::new();
    let mut buf = Vec::new();

    let mut anchor: Option<OpenAnchor> = None;
    let mut slot: Option<MarkerSlot> = None;
    let mut field: Option<MarkerField> = None;
    let mut pic_depth: u32 = 0;
    let mut fallback_depth: u32 = 0;
    let mut pic_name: Option<String> = None;
    let mut nested_anchors: u32 = 0;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let local = e.local_name();
                let local = local.as_ref();
                if let Some(kind) = anchor_kind(local) {
                    if anchor.is_some() {
                        nested_anchors += 1;
                        tracing::debug!(part, "nested anchor element ignored");
                    } else {
                        anchor = Some(OpenAnchor::new(kind));
                    }
                } else if anchor.is_some() && pic_depth == 0 && (local == b"from" || local == b"to") {
                    slot = Some(if local == b"from" { MarkerSlot::From } else { MarkerSlot::To });
                } else if slot.is_some() && local == b"col" {
                    field = Some(MarkerField::Col);
                } else if slot.is_some() && local == b"row" {
                    field = Some(MarkerField::Row);
                } else if local == b"pic" {
                    pic_depth += 1;
                    pic_name = None;
                } else if local == b"Fallback" {
                    fallback_depth += 1;
                } else {
                    on_element(&e, &mut anchor, pic_depth, fallback_depth, &mut pic_name, &mut pictures);
                }
            }
            Ok(Event::Empty(e)) => {
                on_element(&e, &mut anchor, pic_depth, fallback_depth, &mut pic_name, &mut pictures);
            }
            Ok(Event::Text(e)) => {
                if let (Some(open), Some(which), Some(f)) = (anchor.as_mut(), slot, field) {
                    let value = std::str::from_utf8(&e).ok().and_then(|text| parse_u32_bytes(text.trim().as_bytes()));
                    let marker = match which {
                        MarkerSlot::From => &mut open.from,
                        MarkerSlot::To => &mut open.to,
                    };
                    match f {
                        MarkerField::Col => marker.col = value,
                        MarkerField::Row => marker.row = value,
                    }
                }
            }
            Ok(Event::End(e)) => {
                let local = e.local_name();
                let local = local.as_ref();
                if anchor_kind(local).is_some() && nested_anchors > 0 {
                    nested_anchors -= 1;
                } else if anchor_kind(local).is_some() {
                    if let Some(open) = anchor.take() {
                        let resolved = open.anchor();
                        if resolved == Anchor::Unanchored && !open.pictures.is_empty() {
                            tracing::debug!(part, pictures = open.pictures.len(), "anchor without usable position");
                        }
                        for (relationship_id, name) in open.pictures {
                            pictures.push(DrawingPicture {
                                relationship_id,
                                anchor: resolved.clone(),
                                name,
                            });
                        }
                    }
                    slot = None;
                    field = None;
                } else {
                    match local {
                        b"from" | b"to" => slot = None,
                        b"col" | b"row" => field = None,
                        b"pic" => pic_depth = pic_depth.saturating_sub(1),
                        b"Fallback" => fallback_depth = fallback_depth.saturating_sub(1),
                        _ => {}
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Bom2PicError::malformed_part(part, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(pictures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worksheet::{EMU_PER_PIXEL, EMU_PER_POINT};

    const PART: &str = "xl/drawings/drawing1.xml";

    fn wrap(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<xdr:wsDr xmlns:xdr="http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing"
    xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main"
    xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"
    xmlns:mc="http://schemas.openxmlformats.org/markup-compatibility/2006">{body}</xdr:wsDr>"#
        )
    }

    fn pic(id: u32, embed: &str) -> String {
        format!(
            r#"<xdr:pic><xdr:nvPicPr><xdr:cNvPr id="{id}" name="Picture {id}"/><xdr:cNvPicPr/></xdr:nvPicPr>
<xdr:blipFill><a:blip r:embed="{embed}"/><a:stretch><a:fillRect/></a:stretch></xdr:blipFill>
<xdr:spPr/></xdr:pic>"#
        )
    }

    fn two_cell(col: u32, row: u32, content: &str) -> String {
        format!(
            r#"<xdr:twoCellAnchor editAs="oneCell">
<xdr:from><xdr:col>{col}</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>{row}</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from>
<xdr:to><xdr:col>{}</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>{}</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:to>
{content}<xdr:clientData/></xdr:twoCellAnchor>"#,
            col + 1,
            row + 1
        )
    }

    #[test]
    fn test_two_cell_anchor() {
        let xml = wrap(&two_cell(0, 1, &pic(2, "rId1")));
        let pictures = parse_drawing(xml.as_bytes(), PART).unwrap();
        assert_eq!(pictures.len(), 1);
        assert_eq!(pictures[0].relationship_id, "rId1");
        assert_eq!(pictures[0].name.as_deref(), Some("Picture 2"));
        assert_eq!(
            pictures[0].anchor,
            Anchor::TwoCell {
                from: CellPosition::new(1, 0),
                to: Some(CellPosition::new(2, 1)),
            }
        );
        assert_eq!(
            pictures[0].anchor.resolve(&SheetGeometry::default()),
            Some(CellPosition::new(1, 0))
        );
    }

    #[test]
    fn test_document_order_is_preserved() {
        let body = format!(
            "{}{}{}",
            two_cell(0, 5, &pic(2, "rId3")),
            two_cell(0, 1, &pic(3, "rId1")),
            two_cell(0, 3, &pic(4, "rId2")),
        );
        let pictures = parse_drawing(wrap(&body).as_bytes(), PART).unwrap();
        let ids: Vec<&str> = pictures.iter().map(|p| p.relationship_id.as_str()).collect();
        assert_eq!(ids, vec!["rId3", "rId1", "rId2"]);
    }

    #[test]
    fn test_one_cell_and_absolute_anchors() {
        let body = format!(
            r#"<xdr:oneCellAnchor><xdr:from><xdr:col>2</xdr:col><xdr:colOff>10</xdr:colOff><xdr:row>7</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from><xdr:ext cx="100" cy="100"/>{}<xdr:clientData/></xdr:oneCellAnchor>
<xdr:absoluteAnchor><xdr:pos x="{}" y="{}"/><xdr:ext cx="100" cy="100"/>{}<xdr:clientData/></xdr:absoluteAnchor>"#,
            pic(2, "rId1"),
            64 * EMU_PER_PIXEL + 5,
            15 * EMU_PER_POINT * 4 + 10,
            pic(3, "rId2"),
        );
        let pictures = parse_drawing(wrap(&body).as_bytes(), PART).unwrap();
        assert_eq!(pictures.len(), 2);
        assert_eq!(pictures[0].anchor, Anchor::OneCell { from: CellPosition::new(7, 2) });

        let geometry = SheetGeometry::default();
        assert!(matches!(pictures[1].anchor, Anchor::Absolute { .. }));
        assert_eq!(pictures[1].anchor.resolve(&geometry), Some(CellPosition::new(4, 1)));
    }

    #[test]
    fn test_missing_marker_is_unanchored() {
        let body = format!(
            r#"<xdr:twoCellAnchor><xdr:from><xdr:col>1</xdr:col><xdr:row>bogus</xdr:row></xdr:from>{}<xdr:clientData/></xdr:twoCellAnchor>"#,
            pic(2, "rId1")
        );
        let pictures = parse_drawing(wrap(&body).as_bytes(), PART).unwrap();
        assert_eq!(pictures.len(), 1);
        assert_eq!(pictures[0].anchor, Anchor::Unanchored);
        assert_eq!(pictures[0].anchor.resolve(&SheetGeometry::default()), None);
    }

    #[test]
    fn test_fallback_pictures_are_skipped() {
        let content = format!(
            r#"<mc:AlternateContent><mc:Choice Requires="a14">{}</mc:Choice><mc:Fallback>{}</mc:Fallback></mc:AlternateContent>"#,
            pic(2, "rId1"),
            pic(3, "rId2")
        );
        let xml = wrap(&two_cell(1, 1, &content));
        let pictures = parse_drawing(xml.as_bytes(), PART).unwrap();
        let ids: Vec<&str> = pictures.iter().map(|p| p.relationship_id.as_str()).collect();
        assert_eq!(ids, vec!["rId1"]);
    }

    #[test]
    fn test_group_shares_anchor_and_shapes_are_ignored() {
        let content = format!(
            r#"<xdr:grpSp><xdr:nvGrpSpPr><xdr:cNvPr id="9" name="Group 9"/><xdr:cNvGrpSpPr/></xdr:nvGrpSpPr><xdr:grpSpPr/>
{}{}
<xdr:sp><xdr:nvSpPr><xdr:cNvPr id="12" name="Rect"/><xdr:cNvSpPr/></xdr:nvSpPr><xdr:spPr><a:blipFill><a:blip r:embed="rId9"/></a:blipFill></xdr:spPr></xdr:sp>
</xdr:grpSp>"#,
            pic(10, "rId1"),
            pic(11, "rId2")
        );
        let xml = wrap(&two_cell(3, 4, &content));
        let pictures = parse_drawing(xml.as_bytes(), PART).unwrap();
        assert_eq!(pictures.len(), 2);
        for picture in &pictures {
            assert_eq!(picture.anchor.resolve(&SheetGeometry::default()), Some(CellPosition::new(4, 3)));
        }
        assert_eq!(pictures[1].name.as_deref(), Some("Picture 11"));
    }

    #[test]
    fn test_picture_outside_anchor() {
        let xml = wrap(&pic(2, "rId4"));
        let pictures = parse_drawing(xml.as_bytes(), PART).unwrap();
        assert_eq!(pictures.len(), 1);
        assert_eq!(pictures[0].anchor, Anchor::Unanchored);
    }

    #[test]
    fn test_malformed_drawing() {
        let err = parse_drawing(b"<xdr:wsDr><xdr:twoCellAnchor></xdr:wsDr>", PART).unwrap_err();
        assert!(matches!(err, Bom2PicError::MalformedPart { part, .. } if part == PART));
    }

    #[test]
    fn test_empty_drawing() {
        let pictures = parse_drawing(wrap("").as_bytes(), PART).unwrap();
        assert!(pictures.is_empty());
    }
}
