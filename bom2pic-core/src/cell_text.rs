//! Turning raw cell payloads into the text used for filenames.
//!
//! Covers the workbook-level lookups a worksheet cell may depend on (shared
//! strings, number-format categories from `styles.xml`) and the rendering of
//! numbers and dates.

use chrono::{Days, NaiveDate, NaiveTime};
use quick_xml::events::Event;
use quick_xml::Reader;

#[cfg(feature = "fast-hash")]
use hashbrown::HashMap;
#[cfg(not(feature = "fast-hash"))]
use std::collections::HashMap;

use crate::error::{Bom2PicError, Result};

/// Coarse formatting category of a number format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NumberCategory {
    #[default]
    General,
    Date,
    DateTime,
    Time,
}

impl NumberCategory {
    /// Category of a built-in number format id.
    pub fn from_builtin_id(id: u32) -> Self {
        match id {
            14..=17 | 27..=36 | 50..=58 => NumberCategory::Date,
            22 => NumberCategory::DateTime,
            18..=21 | 45..=47 => NumberCategory::Time,
            _ => NumberCategory::General,
        }
    }

    /// Category of a custom format code such as `yyyy-mm-dd` or `0.00`.
    pub fn from_format_code(code: &str) -> Self {
        let section = code.split(';').next().unwrap_or("");
        let mut has_date = false;
        let mut has_time = false;
        let mut chars = section.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '"' => {
                    for q in chars.by_ref() {
                        if q == '"' {
                            break;
                        }
                    }
                }
                '\\' | '_' | '*' => {
                    chars.next();
                }
                '[' => {
                    let mut inner = String::new();
                    for b in chars.by_ref() {
                        if b == ']' {
                            break;
                        }
                        inner.push(b);
                    }
                    // [h], [mm], [ss] are elapsed-time tokens; colors and locales are not.
                    let inner = inner.to_ascii_lowercase();
                    if !inner.is_empty() && inner.chars().all(|ch| matches!(ch, 'h' | 'm' | 's')) {
                        has_time = true;
                    }
                }
                'y' | 'Y' | 'd' | 'D' => has_date = true,
                'h' | 'H' | 's' | 'S' => has_time = true,
                _ => {}
            }
        }

        match (has_date, has_time) {
            (true, true) => NumberCategory::DateTime,
            (true, false) => NumberCategory::Date,
            (false, true) => NumberCategory::Time,
            (false, false) => NumberCategory::General,
        }
    }
}

/// Number-format category per cell style index (`<c s="...">`).
#[derive(Clone, Debug, Default)]
pub struct NumberFormats {
    xf_categories: Vec<NumberCategory>,
}

impl NumberFormats {
    pub fn category(&self, style_index: Option<u32>) -> NumberCategory {
        style_index
            .and_then(|idx| self.xf_categories.get(idx as usize).copied())
            .unwrap_or_default()
    }

    /// Parse `xl/styles.xml`, keeping only what is needed to classify numbers.
    pub fn parse(xml: &[u8], part: &str) -> Result<Self> {
        let mut reader = Reader::from_reader(xml);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut custom: HashMap<u32, NumberCategory> = HashMap::new();
        let mut xf_ids: Vec<u32> = Vec::new();
        let mut in_cell_xfs = false;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) if e.local_name().as_ref() == b"cellXfs" => {
                    in_cell_xfs = true;
                }
                Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                    b"numFmt" => {
                        let mut id: Option<u32> = None;
                        let mut code: Option<String> = None;
                        for attr in e.attributes().flatten() {
                            match attr.key.as_ref() {
                                b"numFmtId" => id = String::from_utf8_lossy(&attr.value).parse().ok(),
                                b"formatCode" => {
                                    code = attr.unescape_value().ok().map(|v| v.into_owned())
                                }
                                _ => {}
                            }
                        }
                        if let (Some(id), Some(code)) = (id, code) {
                            custom.insert(id, NumberCategory::from_format_code(&code));
                        }
                    }
                    b"xf" if in_cell_xfs => {
                        let id = e
                            .attributes()
                            .flatten()
                            .find(|attr| attr.key.as_ref() == b"numFmtId")
                            .and_then(|attr| String::from_utf8_lossy(&attr.value).parse().ok())
                            .unwrap_or(0);
                        xf_ids.push(id);
                    }
                    _ => {}
                },
                Ok(Event::End(e)) => {
                    if e.local_name().as_ref() == b"cellXfs" {
                        in_cell_xfs = false;
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(Bom2PicError::malformed_part(part, e)),
                _ => {}
            }
            buf.clear();
        }

        let xf_categories = xf_ids
            .into_iter()
            .map(|id| {
                custom
                    .get(&id)
                    .copied()
                    .unwrap_or_else(|| NumberCategory::from_builtin_id(id))
            })
            .collect();

        Ok(NumberFormats { xf_categories })
    }
}

/// Parse `xl/sharedStrings.xml` into its string table.
///
/// Rich-text runs are concatenated; phonetic guide runs (`rPh`) are skipped.
pub fn parse_shared_strings(xml: &[u8], part: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_reader(xml);
    // Preserve whitespace inside string values
    reader.config_mut().trim_text(false);

    let mut strings = Vec::new();
    let mut buf = Vec::new();
    let mut current = String::new();
    let mut in_t = false;
    let mut in_phonetic = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_t = true,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_t && !in_phonetic {
                    let text = e.unescape().map_err(|err| Bom2PicError::malformed_part(part, err))?;
                    current.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"rPh" => in_phonetic = false,
                b"si" => strings.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"si" {
                    strings.push(String::new());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Bom2PicError::malformed_part(part, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(strings)
}

/// Render a number the way a person would type it into a name cell.
///
/// Integral values print without a decimal point; everything else uses the
/// shortest representation that round-trips.
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        let mut buf = itoa::Buffer::new();
        buf.format(value as i64).to_string()
    } else {
        let mut buf = ryu::Buffer::new();
        buf.format(value).to_string()
    }
}

/// Convert a spreadsheet date serial into a calendar date and time of day.
pub fn serial_to_datetime(serial: f64, date1904: bool) -> Option<(NaiveDate, NaiveTime)> {
    if !serial.is_finite() || serial < 0.0 || serial > 2_958_465.0 {
        return None;
    }

    let mut days = serial.floor() as u64;
    let mut seconds = ((serial - serial.floor()) * 86_400.0).round() as u32;
    if seconds >= 86_400 {
        days += 1;
        seconds = 0;
    }

    let base = if date1904 {
        NaiveDate::from_ymd_opt(1904, 1, 1)?
    } else if days < 60 {
        // Serials before the fictitious 1900-02-29 are off by one
        NaiveDate::from_ymd_opt(1899, 12, 31)?
    } else {
        NaiveDate::from_ymd_opt(1899, 12, 30)?
    };

    let date = base.checked_add_days(Days::new(days))?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0)?;
    Some((date, time))
}

/// Render a numeric cell according to its formatting category.
pub fn format_numeric_cell(value: f64, category: NumberCategory, date1904: bool) -> String {
    let rendered = match category {
        NumberCategory::General => None,
        NumberCategory::Date => {
            serial_to_datetime(value, date1904).map(|(d, _)| d.format("%Y-%m-%d").to_string())
        }
        NumberCategory::DateTime => serial_to_datetime(value, date1904)
            .map(|(d, t)| format!("{} {}", d.format("%Y-%m-%d"), t.format("%H:%M:%S"))),
        NumberCategory::Time => {
            serial_to_datetime(value, date1904).map(|(_, t)| t.format("%H:%M:%S").to_string())
        }
    };
    rendered.unwrap_or_else(|| format_number(value))
}

/// Render an ISO-8601 value from a `t="d"` cell.
pub fn format_iso_date_cell(raw: &str) -> String {
    let raw = raw.trim();
    match raw.split_once('T') {
        Some((date, time)) => {
            let time = time.trim_end_matches('Z');
            let time = time.split('.').next().unwrap_or(time);
            if time.is_empty() || time == "00:00:00" || time == "00:00" {
                date.to_string()
            } else {
                format!("{} {}", date, time)
            }
        }
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_categories() {
        assert_eq!(NumberCategory::from_builtin_id(0), NumberCategory::General);
        assert_eq!(NumberCategory::from_builtin_id(14), NumberCategory::Date);
        assert_eq!(NumberCategory::from_builtin_id(22), NumberCategory::DateTime);
        assert_eq!(NumberCategory::from_builtin_id(20), NumberCategory::Time);
        assert_eq!(NumberCategory::from_builtin_id(49), NumberCategory::General);
    }

    #[test]
    fn test_custom_format_codes() {
        assert_eq!(NumberCategory::from_format_code("yyyy-mm-dd"), NumberCategory::Date);
        assert_eq!(NumberCategory::from_format_code("dd/mm/yyyy hh:mm"), NumberCategory::DateTime);
        assert_eq!(NumberCategory::from_format_code("[h]:mm"), NumberCategory::Time);
        assert_eq!(NumberCategory::from_format_code("0.00"), NumberCategory::General);
        assert_eq!(NumberCategory::from_format_code("[Red]0.00;\"days\""), NumberCategory::General);
        assert_eq!(NumberCategory::from_format_code("\"Day\" 0"), NumberCategory::General);
        assert_eq!(NumberCategory::from_format_code("[$-409]mmm d, yyyy"), NumberCategory::Date);
    }

    #[test]
    fn test_number_formats_from_styles() {
        let xml = br#"<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
            <numFmts count="1"><numFmt numFmtId="164" formatCode="yyyy\-mm\-dd"/></numFmts>
            <cellStyleXfs count="1"><xf numFmtId="14"/></cellStyleXfs>
            <cellXfs count="3">
                <xf numFmtId="0" fontId="0"/>
                <xf numFmtId="164" fontId="0" applyNumberFormat="1"/>
                <xf numFmtId="22"><alignment horizontal="left"/></xf>
            </cellXfs>
        </styleSheet>"#;
        let formats = NumberFormats::parse(xml, "xl/styles.xml").unwrap();
        assert_eq!(formats.category(Some(0)), NumberCategory::General);
        assert_eq!(formats.category(Some(1)), NumberCategory::Date);
        assert_eq!(formats.category(Some(2)), NumberCategory::DateTime);
        assert_eq!(formats.category(Some(9)), NumberCategory::General);
        assert_eq!(formats.category(None), NumberCategory::General);
    }

    #[test]
    fn test_shared_strings_rich_text_and_phonetics() {
        let xml = r#"<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="4">
            <si><t>R1</t></si>
            <si><r><t>Bolt </t></r><r><rPr><b/></rPr><t>M6</t></r><rPh sb="0" eb="1"><t>ボルト</t></rPh></si>
            <si/>
            <si><t xml:space="preserve"> spaced </t></si>
        </sst>"#;
        let strings = parse_shared_strings(xml.as_bytes(), "xl/sharedStrings.xml").unwrap();
        assert_eq!(strings, vec!["R1", "Bolt M6", "", " spaced "]);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1001.0), "1001");
        assert_eq!(format_number(-7.0), "-7");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(0.1), "0.1");
    }

    #[test]
    fn test_serial_dates() {
        let (date, _) = serial_to_datetime(45292.0, false).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let (date, _) = serial_to_datetime(1.0, false).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(1900, 1, 1).unwrap());
        let (date, _) = serial_to_datetime(0.0, true).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(1904, 1, 1).unwrap());
        assert!(serial_to_datetime(-1.0, false).is_none());
    }

    #[test]
    fn test_format_numeric_cell() {
        assert_eq!(format_numeric_cell(45292.0, NumberCategory::Date, false), "2024-01-01");
        assert_eq!(
            format_numeric_cell(45292.5, NumberCategory::DateTime, false),
            "2024-01-01 12:00:00"
        );
        assert_eq!(format_numeric_cell(0.25, NumberCategory::Time, false), "06:00:00");
        assert_eq!(format_numeric_cell(42.0, NumberCategory::General, false), "42");
    }

    #[test]
    fn test_iso_date_cells() {
        assert_eq!(format_iso_date_cell("2024-03-05T00:00:00Z"), "2024-03-05");
        assert_eq!(format_iso_date_cell("2024-03-05T10:30:00.000"), "2024-03-05 10:30:00");
        assert_eq!(format_iso_date_cell("2024-03-05"), "2024-03-05");
    }
}
