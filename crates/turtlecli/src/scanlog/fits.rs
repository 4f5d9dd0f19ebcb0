//! Just enough FITS to pull the scan timestamps out of a `ScanLog.fits` file:
//! skip the primary HDU, read the first `BINTABLE` extension, and decode one
//! ASCII column per row.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result, anyhow, bail};
use time::PrimitiveDateTime;

use crate::utils::time::parse_user_datetime;

const BLOCK_LEN: usize = 2880;
const CARD_LEN: usize = 80;
const TIMESTAMP_COLUMN: &str = "DATE-OBS";
const MAX_FIELDS: usize = 999;

#[derive(Debug, Default)]
struct Header {
    cards: BTreeMap<String, String>,
    data_offset: usize,
}

impl Header {
    fn text(&self, keyword: &str) -> Option<&str> {
        self.cards.get(keyword).map(String::as_str)
    }

    fn integer(&self, keyword: &str) -> Result<i64> {
        let raw = self
            .text(keyword)
            .ok_or_else(|| anyhow!("missing FITS keyword {keyword}"))?;
        raw.parse::<i64>()
            .with_context(|| format!("FITS keyword {keyword} is not an integer: `{raw}`"))
    }

    fn integer_or(&self, keyword: &str, default: i64) -> Result<i64> {
        if self.text(keyword).is_some() {
            self.integer(keyword)
        } else {
            Ok(default)
        }
    }

    fn count(&self, keyword: &str) -> Result<usize> {
        usize::try_from(self.integer(keyword)?)
            .with_context(|| format!("FITS keyword {keyword} must not be negative"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnFormat {
    repeat: usize,
    code: char,
}

impl ColumnFormat {
    fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let digits = raw.chars().take_while(char::is_ascii_digit).count();
        let repeat = if digits == 0 {
            1
        } else {
            raw[..digits]
                .parse::<usize>()
                .with_context(|| format!("invalid TFORM repeat count in `{raw}`"))?
        };
        let code = raw[digits..]
            .chars()
            .next()
            .ok_or_else(|| anyhow!("TFORM `{raw}` has no type code"))?
            .to_ascii_uppercase();
        Ok(Self { repeat, code })
    }

    fn width(self) -> Result<usize> {
        let element = match self.code {
            'L' | 'B' | 'A' => 1,
            'I' => 2,
            'J' | 'E' => 4,
            'K' | 'D' | 'C' | 'P' => 8,
            'M' | 'Q' => 16,
            'X' => return Ok(self.repeat.div_ceil(8)),
            other => bail!("unsupported TFORM type code `{other}`"),
        };
        self.repeat
            .checked_mul(element)
            .ok_or_else(|| anyhow!("TFORM repeat count {} is too large", self.repeat))
    }
}

/// Returns the sorted, de-duplicated scan timestamps in a scan log.
pub fn read_scan_times(bytes: &[u8]) -> Result<Vec<PrimitiveDateTime>> {
    let primary = parse_header(bytes, 0).context("failed to read primary FITS header")?;
    let extension_offset = primary
        .data_offset
        .checked_add(padded(primary_data_len(&primary)?)?)
        .ok_or_else(|| anyhow!("primary FITS data is too large"))?;
    let table = parse_header(bytes, extension_offset)
        .context("failed to read binary table header")?;

    match table.text("XTENSION") {
        Some("BINTABLE") => {}
        Some(other) => bail!("first FITS extension is `{other}`, expected BINTABLE"),
        None => bail!("scan log has no FITS extension"),
    }

    let row_len = table.count("NAXIS1")?;
    let row_count = table.count("NAXIS2")?;
    let field_count = table.count("TFIELDS")?;
    if field_count > MAX_FIELDS {
        bail!("TFIELDS is {field_count}, at most {MAX_FIELDS} columns are allowed");
    }

    let mut columns = Vec::with_capacity(field_count);
    for index in 1..=field_count {
        let form = table
            .text(&format!("TFORM{index}"))
            .ok_or_else(|| anyhow!("missing FITS keyword TFORM{index}"))?;
        let name = table.text(&format!("TTYPE{index}")).unwrap_or_default();
        columns.push((name.to_string(), ColumnFormat::parse(form)?));
    }

    let position = columns
        .iter()
        .position(|(name, _)| name.eq_ignore_ascii_case(TIMESTAMP_COLUMN))
        .unwrap_or(0);
    let (_, format) = columns
        .get(position)
        .ok_or_else(|| anyhow!("binary table has no columns"))?;
    if format.code != 'A' {
        bail!(
            "timestamp column {} has type `{}`, expected character data",
            position + 1,
            format.code
        );
    }

    let mut column_offset: usize = 0;
    for (_, preceding) in &columns[..position] {
        column_offset = column_offset
            .checked_add(preceding.width()?)
            .ok_or_else(|| anyhow!("binary table columns are too wide"))?;
    }
    let column_len = format.width()?;
    let column_end = column_offset
        .checked_add(column_len)
        .ok_or_else(|| anyhow!("binary table columns are too wide"))?;
    if column_end > row_len {
        bail!("timestamp column extends past the row length ({row_len} bytes)");
    }

    let data = bytes
        .get(table.data_offset..)
        .ok_or_else(|| anyhow!("binary table data is missing"))?;
    let table_len = row_len.checked_mul(row_count).ok_or_else(|| {
        anyhow!("binary table dimensions {row_len} x {row_count} are too large")
    })?;
    if data.len() < table_len {
        bail!(
            "binary table is truncated: expected {table_len} bytes of rows, found {}",
            data.len()
        );
    }

    let mut times = BTreeSet::new();
    for (index, row) in data[..table_len].chunks_exact(row_len.max(1)).enumerate() {
        let raw = &row[column_offset..column_end];
        let text = String::from_utf8_lossy(raw);
        let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
        if text.is_empty() {
            continue;
        }
        let parsed = parse_user_datetime(text)
            .with_context(|| format!("row {} has an unreadable timestamp", index + 1))?;
        times.insert(parsed);
    }

    Ok(times.into_iter().collect())
}

fn parse_header(bytes: &[u8], offset: usize) -> Result<Header> {
    let mut header = Header::default();
    let mut position = offset;

    loop {
        let card = position
            .checked_add(CARD_LEN)
            .and_then(|end| bytes.get(position..end))
            .ok_or_else(|| anyhow!("FITS header at byte {offset} has no END card"))?;
        position += CARD_LEN;

        let card = String::from_utf8_lossy(card);
        let keyword = card.get(..8).unwrap_or(&card).trim_end();
        if keyword == "END" {
            break;
        }
        if keyword.is_empty() || card.get(8..10) != Some("= ") {
            continue;
        }
        header
            .cards
            .insert(keyword.to_string(), card_value(card.get(10..).unwrap_or_default()));
    }

    header.data_offset = offset
        .checked_add(padded(position - offset)?)
        .ok_or_else(|| anyhow!("FITS header at byte {offset} runs past the addressable range"))?;
    Ok(header)
}

fn card_value(raw: &str) -> String {
    let trimmed = raw.trim_start();
    if let Some(quoted) = trimmed.strip_prefix('\'') {
        let mut value = String::new();
        let mut chars = quoted.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    value.push('\'');
                    chars.next();
                    continue;
                }
                break;
            }
            value.push(c);
        }
        return value.trim_end().to_string();
    }

    trimmed
        .split('/')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn primary_data_len(header: &Header) -> Result<usize> {
    let axes = header.count("NAXIS")?;
    if axes == 0 {
        return Ok(0);
    }
    let bits = header.integer("BITPIX")?.unsigned_abs();
    let mut elements: u64 = 1;
    for axis in 1..=axes {
        let length = header.count(&format!("NAXIS{axis}"))?;
        elements = elements.saturating_mul(length as u64);
    }
    let groups = header.integer_or("GCOUNT", 1)?.unsigned_abs();
    let parameters = header.integer_or("PCOUNT", 0)?.unsigned_abs();
    let total = (bits / 8).saturating_mul(groups.saturating_mul(elements.saturating_add(parameters)));
    usize::try_from(total).context("primary FITS data is too large")
}

fn padded(len: usize) -> Result<usize> {
    len.div_ceil(BLOCK_LEN)
        .checked_mul(BLOCK_LEN)
        .ok_or_else(|| anyhow!("FITS section of {len} bytes is too large"))
}

#[cfg(test)]
fn push_header(out: &mut Vec<u8>, cards: &[String]) {
    let start = out.len();
    for card in cards.iter().map(String::as_str).chain(["END"]) {
        out.extend(format!("{card:<80}").bytes());
    }
    let len = padded(out.len() - start).expect("test header fits in memory");
    out.resize(start + len, b' ');
}

/// Encodes a primary HDU followed by a binary table header built from `cards`.
#[cfg(test)]
pub(crate) fn encode_table_header(cards: &[(&str, String)]) -> Vec<u8> {
    let mut out = Vec::new();
    push_header(
        &mut out,
        &[
            format!("{:<8}= {:>20}", "SIMPLE", "T"),
            format!("{:<8}= {:>20}", "BITPIX", 8),
            format!("{:<8}= {:>20}", "NAXIS", 0),
        ],
    );
    let cards = cards
        .iter()
        .map(|(keyword, value)| format!("{keyword:<8}= {value:>20}"))
        .collect::<Vec<_>>();
    push_header(&mut out, &cards);
    out
}

#[cfg(test)]
pub(crate) fn encode_scan_log(timestamps: &[&str]) -> Vec<u8> {
    let row_len = 4 + 24;
    let mut out = encode_table_header(&[
        ("XTENSION", "'BINTABLE'".to_string()),
        ("BITPIX", "8".to_string()),
        ("NAXIS", "2".to_string()),
        ("NAXIS1", row_len.to_string()),
        ("NAXIS2", timestamps.len().to_string()),
        ("PCOUNT", "0".to_string()),
        ("GCOUNT", "1".to_string()),
        ("TFIELDS", "2".to_string()),
        ("TTYPE1", "'SCAN    '".to_string()),
        ("TFORM1", "'J       '".to_string()),
        ("TTYPE2", "'DATE-OBS'".to_string()),
        ("TFORM2", "'24A     '".to_string()),
    ]);

    let start = out.len();
    for (scan, timestamp) in timestamps.iter().enumerate() {
        out.extend((scan as i32 + 1).to_be_bytes());
        out.extend(format!("{timestamp:<24}").bytes());
    }
    let len = padded(out.len() - start).expect("test table fits in memory");
    out.resize(start + len, 0);
    out
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::{
        ColumnFormat, card_value, encode_scan_log, encode_table_header, read_scan_times,
    };

    fn oversized_table(row_len: &str, row_count: &str, timestamp_form: &str) -> Vec<u8> {
        let mut bytes = encode_table_header(&[
            ("XTENSION", "'BINTABLE'".to_string()),
            ("BITPIX", "8".to_string()),
            ("NAXIS", "2".to_string()),
            ("NAXIS1", row_len.to_string()),
            ("NAXIS2", row_count.to_string()),
            ("TFIELDS", "1".to_string()),
            ("TTYPE1", "'DATE-OBS'".to_string()),
            ("TFORM1", format!("'{timestamp_form}'")),
        ]);
        bytes.extend(format!("{:<24}", "2019-03-05T04:30:00").bytes());
        bytes
    }

    #[test]
    fn reads_sorted_unique_timestamps() {
        let bytes = encode_scan_log(&[
            "2019-03-05T04:30:00",
            "2019-03-05T04:05:06.50",
            "2019-03-05T04:30:00",
        ]);
        let times = read_scan_times(&bytes).expect("scan log should decode");
        assert_eq!(
            times,
            vec![
                datetime!(2019-03-05 04:05:06.5),
                datetime!(2019-03-05 04:30:00)
            ]
        );
    }

    #[test]
    fn empty_table_yields_no_timestamps() {
        let bytes = encode_scan_log(&[]);
        assert!(
            read_scan_times(&bytes)
                .expect("empty table should decode")
                .is_empty()
        );
    }

    #[test]
    fn truncated_file_is_an_error() {
        let bytes = encode_scan_log(&["2019-03-05T04:30:00"]);
        let err = read_scan_times(&bytes[..3000]).expect_err("truncated file must fail");
        assert!(format!("{err:#}").contains("binary table"));
    }

    #[test]
    fn huge_table_dimensions_are_an_error() {
        let bytes = oversized_table("4294967296", "4294967296", "24A");
        let err = read_scan_times(&bytes).expect_err("overflowing dimensions must fail");
        assert!(
            format!("{err:#}").contains("too large"),
            "unexpected error: {err:#}"
        );
    }

    #[test]
    fn huge_repeat_count_is_an_error() {
        let bytes = oversized_table("24", "1", "18446744073709551615A");
        assert!(read_scan_times(&bytes).is_err());

        let err = ColumnFormat::parse("18446744073709551615D")
            .and_then(ColumnFormat::width)
            .expect_err("repeat times element width overflows");
        assert!(format!("{err:#}").contains("too large"));
    }

    #[test]
    fn oversized_primary_data_is_an_error() {
        let mut bytes = Vec::new();
        super::push_header(
            &mut bytes,
            &[
                format!("{:<8}= {:>20}", "SIMPLE", "T"),
                format!("{:<8}= {:>20}", "BITPIX", -64),
                format!("{:<8}= {:>20}", "NAXIS", 2),
                format!("{:<8}= {:>20}", "NAXIS1", "9223372036854775807"),
                format!("{:<8}= {:>20}", "NAXIS2", "9223372036854775807"),
            ],
        );
        assert!(read_scan_times(&bytes).is_err());
    }

    #[test]
    fn parses_quoted_card_values_with_escapes() {
        assert_eq!(card_value(" 'O''Brien '  / comment"), "O'Brien");
        assert_eq!(card_value("                  12 / rows"), "12");
    }

    #[test]
    fn column_widths_follow_type_codes() {
        let width = |raw: &str| {
            ColumnFormat::parse(raw)
                .and_then(ColumnFormat::width)
                .expect("format should parse")
        };
        assert_eq!(width("24A"), 24);
        assert_eq!(width("J"), 4);
        assert_eq!(width("2D"), 16);
        assert_eq!(width("9X"), 2);
    }
}
