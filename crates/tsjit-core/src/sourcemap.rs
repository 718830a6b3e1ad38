use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const BASE64_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

const DATA_URI_PREFIX: &str = "data:application/json;";

/// A source map builder following the Source Map v3 specification
/// https://sourcemaps.info/spec.html
///
/// All positions are 0-based.
#[derive(Debug)]
pub struct SourceMapBuilder {
    file: Option<String>,
    source_root: Option<String>,
    sources: Vec<String>,
    sources_content: Vec<Option<String>>,
    names: Vec<String>,
    mappings: Vec<Mapping>,
    generated_line: u32,
    generated_column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Mapping {
    generated_line: u32,
    generated_column: u32,
    source_index: u32,
    source_line: u32,
    source_column: u32,
    name_index: Option<u32>,
}

/// The JSON structure for source maps
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMap {
    pub version: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_root: Option<String>,
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources_content: Vec<Option<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
    pub mappings: String,

    #[serde(skip)]
    decoded: OnceLock<Vec<Mapping>>,
}

/// Position in an original source, 0-based
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalPosition {
    pub source: String,
    pub line: u32,
    pub column: u32,
    pub name: Option<String>,
}

impl SourceMapBuilder {
    pub fn new(source_file: String) -> Self {
        Self::new_multi_source(vec![source_file])
    }

    /// Create a new source map builder with multiple source files
    pub fn new_multi_source(source_files: Vec<String>) -> Self {
        Self {
            file: None,
            source_root: None,
            sources: source_files,
            sources_content: Vec::new(),
            names: Vec::new(),
            mappings: Vec::new(),
            generated_line: 0,
            generated_column: 0,
        }
    }

    /// Add a source file and return its index
    pub fn add_source(&mut self, source_file: String) -> u32 {
        let idx = match self.sources.iter().position(|s| s == &source_file) {
            Some(idx) => idx,
            None => {
                self.sources.push(source_file);
                self.sources.len() - 1
            }
        };
        idx as u32
    }

    pub fn set_file(&mut self, file: String) {
        self.file = Some(file);
    }

    pub fn set_source_root(&mut self, source_root: String) {
        self.source_root = Some(source_root);
    }

    pub fn add_source_content(&mut self, content: String) {
        self.sources_content.push(Some(content));
    }

    /// Map the current generated position to a position in the first source
    pub fn add_mapping(&mut self, source_line: u32, source_column: u32, name: Option<String>) {
        self.add_mapping_with_source(0, source_line, source_column, name);
    }

    /// Map the current generated position to a position in an explicit source
    pub fn add_mapping_with_source(
        &mut self,
        source_index: u32,
        source_line: u32,
        source_column: u32,
        name: Option<String>,
    ) {
        let name_index = name.map(|n| {
            let idx = match self.names.iter().position(|existing| existing == &n) {
                Some(idx) => idx,
                None => {
                    self.names.push(n);
                    self.names.len() - 1
                }
            };
            idx as u32
        });

        self.mappings.push(Mapping {
            generated_line: self.generated_line,
            generated_column: self.generated_column,
            source_index,
            source_line,
            source_column,
            name_index,
        });
    }

    /// Advance the generated position by writing text
    pub fn advance(&mut self, text: &str) {
        for ch in text.chars() {
            if ch == '\n' {
                self.generated_line += 1;
                self.generated_column = 0;
            } else {
                self.generated_column += 1;
            }
        }
    }

    /// Build the final source map
    pub fn build(self) -> SourceMap {
        let mappings = encode_mappings(&self.mappings);

        SourceMap {
            version: 3,
            file: self.file,
            source_root: self.source_root,
            sources: self.sources,
            sources_content: self.sources_content,
            names: self.names,
            mappings,
            decoded: OnceLock::new(),
        }
    }
}

/// Encode mappings using VLQ (Variable Length Quantity) encoding
fn encode_mappings(mappings: &[Mapping]) -> String {
    let mut result = String::new();
    let mut prev_generated_line = 0;
    let mut prev_generated_col = 0i64;
    let mut prev_source_index = 0i64;
    let mut prev_source_line = 0i64;
    let mut prev_source_col = 0i64;
    let mut prev_name_index = 0i64;

    for mapping in mappings {
        // Add semicolons for new lines
        while prev_generated_line < mapping.generated_line {
            result.push(';');
            prev_generated_line += 1;
            prev_generated_col = 0;
        }

        if !result.is_empty() && !result.ends_with(';') {
            result.push(',');
        }

        // [generated_col, source_index, source_line, source_col, name_index],
        // each relative to the previous segment
        let generated_col = i64::from(mapping.generated_column);
        encode_vlq(&mut result, generated_col - prev_generated_col);
        prev_generated_col = generated_col;

        let source_index = i64::from(mapping.source_index);
        encode_vlq(&mut result, source_index - prev_source_index);
        prev_source_index = source_index;

        let source_line = i64::from(mapping.source_line);
        encode_vlq(&mut result, source_line - prev_source_line);
        prev_source_line = source_line;

        let source_col = i64::from(mapping.source_column);
        encode_vlq(&mut result, source_col - prev_source_col);
        prev_source_col = source_col;

        if let Some(name_idx) = mapping.name_index {
            let name_idx = i64::from(name_idx);
            encode_vlq(&mut result, name_idx - prev_name_index);
            prev_name_index = name_idx;
        }
    }

    result
}

/// Encode a single value using VLQ Base64 encoding
fn encode_vlq(out: &mut String, value: i64) {
    let mut vlq = if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    };

    loop {
        let mut digit = (vlq & 0x1F) as u8;
        vlq >>= 5;

        if vlq > 0 {
            digit |= 0x20; // Continuation bit
        }

        out.push(BASE64_CHARS[digit as usize] as char);

        if vlq == 0 {
            break;
        }
    }
}

fn base64_value(byte: u8) -> Option<i64> {
    BASE64_CHARS
        .iter()
        .position(|&c| c == byte)
        .map(|v| v as i64)
}

/// Decode every VLQ value of one segment; `None` on malformed input
fn decode_segment(segment: &str) -> Option<Vec<i64>> {
    let mut values = Vec::with_capacity(5);
    let mut value = 0i64;
    let mut shift = 0u32;

    for byte in segment.bytes() {
        let digit = base64_value(byte)?;
        if shift > 60 {
            return None;
        }
        value |= (digit & 0x1F) << shift;
        if digit & 0x20 != 0 {
            shift += 5;
            continue;
        }
        let negative = value & 1 == 1;
        value >>= 1;
        values.push(if negative { -value } else { value });
        value = 0;
        shift = 0;
    }

    // A trailing continuation bit leaves a value unfinished
    (shift == 0).then_some(values)
}

/// Decode a `mappings` string. Segments without a source are skipped.
///
/// A generated column that overflows drops the rest of its line. Source fields
/// carry across lines, so an overflow there ends decoding.
fn decode_mappings(mappings: &str) -> Vec<Mapping> {
    let mut decoded = Vec::new();
    let mut source_index = 0i64;
    let mut source_line = 0i64;
    let mut source_col = 0i64;
    let mut name_index = 0i64;

    'lines: for (line, groups) in mappings.split(';').enumerate() {
        let Ok(generated_line) = u32::try_from(line) else {
            break;
        };
        let mut generated_col = 0i64;

        for segment in groups.split(',').filter(|s| !s.is_empty()) {
            let Some(fields) = decode_segment(segment) else {
                continue;
            };

            let Some(col) = fields.first().and_then(|d| generated_col.checked_add(*d)) else {
                continue 'lines;
            };
            generated_col = col;
            if fields.len() < 4 {
                continue;
            }

            let (Some(index), Some(src_line), Some(src_col)) = (
                source_index.checked_add(fields[1]),
                source_line.checked_add(fields[2]),
                source_col.checked_add(fields[3]),
            ) else {
                break 'lines;
            };
            source_index = index;
            source_line = src_line;
            source_col = src_col;

            let name = match fields.get(4) {
                Some(delta) => {
                    let Some(next) = name_index.checked_add(*delta) else {
                        break 'lines;
                    };
                    name_index = next;
                    Some(name_index)
                }
                None => None,
            };

            let (Ok(generated_column), Ok(source_index), Ok(source_line), Ok(source_column)) = (
                u32::try_from(generated_col),
                u32::try_from(source_index),
                u32::try_from(source_line),
                u32::try_from(source_col),
            ) else {
                continue;
            };

            decoded.push(Mapping {
                generated_line,
                generated_column,
                source_index,
                source_line,
                source_column,
                name_index: name.and_then(|n| u32::try_from(n).ok()),
            });
        }
    }

    decoded.sort_by_key(|m| (m.generated_line, m.generated_column));
    decoded
}

impl SourceMap {
    /// Parse a source map from its JSON form
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Generate the inline source map data URI
    pub fn to_data_uri(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(json.as_bytes());
        Ok(format!(
            "data:application/json;charset=utf-8;base64,{}",
            encoded
        ))
    }

    /// Parse an inline `data:application/json;...;base64,` URI
    pub fn from_data_uri(uri: &str) -> Option<Self> {
        let rest = uri.strip_prefix(DATA_URI_PREFIX)?;
        let (_, payload) = rest.split_once("base64,")?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Generate the source mapping URL comment for generated JavaScript
    pub fn to_comment(&self) -> Result<String, serde_json::Error> {
        let data_uri = self.to_data_uri()?;
        Ok(format!("//# sourceMappingURL={}", data_uri))
    }

    /// Original position of a generated position (both 0-based).
    ///
    /// Picks the closest mapping at or before `column` on the same generated line.
    pub fn original_position_for(&self, line: u32, column: u32) -> Option<OriginalPosition> {
        let decoded = self.decoded.get_or_init(|| decode_mappings(&self.mappings));

        let end = decoded.partition_point(|m| (m.generated_line, m.generated_column) <= (line, column));
        let mapping = decoded[..end].last()?;
        if mapping.generated_line != line {
            return None;
        }

        let source = self.sources.get(mapping.source_index as usize)?;
        let source = match self.source_root.as_deref() {
            Some(root) if !root.is_empty() && !source.starts_with('/') => {
                format!("{}/{}", root.trim_end_matches('/'), source)
            }
            _ => source.clone(),
        };

        Some(OriginalPosition {
            source,
            line: mapping.source_line,
            column: mapping.source_column,
            name: mapping
                .name_index
                .and_then(|idx| self.names.get(idx as usize).cloned()),
        })
    }
}
