//! The indexable document record (§3) and its sidecar-field conventions.

/// Reserved document-field names and sentinels (§6). These values must
/// match the ones already on disk for existing persistent indexes to
/// remain readable, so they are not configurable.
pub const DOCUMENT_ID_FIELD_NAME: &str = "__document_id";
pub const DISTANCE_FIELD_NAME: &str = "__distance";
pub const NULL_VALUE: &str = "NULL_VALUE";
pub const EMPTY_STRING: &str = "EMPTY_STRING";

pub const SIDECAR_IS_ARRAY: &str = "_IsArray";
pub const SIDECAR_RANGE: &str = "_Range";
pub const SIDECAR_CONVERT_TO_JSON: &str = "_ConvertToJson";

/// All reserved sidecar suffixes, in the order projection rules check them.
pub const RESERVED_SIDECAR_SUFFIXES: [&str; 3] =
    [SIDECAR_IS_ARRAY, SIDECAR_RANGE, SIDECAR_CONVERT_TO_JSON];

pub fn is_sidecar_field(name: &str) -> bool {
    RESERVED_SIDECAR_SUFFIXES
        .iter()
        .any(|suffix| name.ends_with(suffix))
}

/// How a field's value is represented for storage and indexing purposes.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Int(i32),
    Long(i64),
    Double(f64),
    Float(f32),
    Binary(Vec<u8>),
}

/// Whether, and how, a field's text is analyzed when written to the index.
/// Mirrors the Definition-level `IndexingMode` but at field-instance
/// granularity, since an individual write can override the schema default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexingMode {
    Analyzed,
    NotAnalyzed,
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexableField {
    pub name: String,
    pub value: FieldValue,
    pub stored: bool,
    pub indexed: bool,
    pub analyzed: bool,
}

impl IndexableField {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: FieldValue::Text(value.into()),
            stored: true,
            indexed: true,
            analyzed: true,
        }
    }

    pub fn is_sidecar(&self) -> bool {
        is_sidecar_field(&self.name)
    }
}

/// An ordered collection of fields, as produced by a view generator's
/// transform, and as stored to / read back from the writer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexableDocument {
    pub fields: Vec<IndexableField>,
}

impl IndexableDocument {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn push(&mut self, field: IndexableField) -> &mut Self {
        self.fields.push(field);
        self
    }

    pub fn document_id(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == DOCUMENT_ID_FIELD_NAME)
            .and_then(|f| match &f.value {
                FieldValue::Text(s) => Some(s.as_str()),
                _ => None,
            })
    }

    pub fn fields_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a IndexableField> {
        self.fields.iter().filter(move |f| f.name == name)
    }

    pub fn has_sidecar(&self, base_name: &str, suffix: &str) -> bool {
        let sidecar_name = format!("{}{}", base_name, suffix);
        self.fields.iter().any(|f| f.name == sidecar_name)
    }
}

/// Deep-copies an [`IndexableDocument`] so extension observers can retain it
/// past the lifetime of the current write batch (§4.6).
///
/// Numeric fields preserve their numeric type; binary fields preserve
/// bytes; text fields preserve the stored flag and are normalized to
/// analyzed-no-norms when indexed, not-analyzed-no-norms when not indexed —
/// the clone is a read-only observer copy, not a copy destined to be
/// re-added to the writer, so norms never matter for it either way.
pub struct DocumentCloner;

impl DocumentCloner {
    pub fn clone_document(doc: &IndexableDocument) -> IndexableDocument {
        let fields = doc
            .fields
            .iter()
            .map(|field| IndexableField {
                name: field.name.clone(),
                value: field.value.clone(),
                stored: field.stored,
                indexed: field.indexed,
                analyzed: field.indexed,
            })
            .collect();

        IndexableDocument { fields }
    }

    pub fn clone_many(docs: &[IndexableDocument]) -> Vec<IndexableDocument> {
        docs.iter().map(Self::clone_document).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_is_independent_and_preserves_types() {
        let mut original = IndexableDocument::new();
        original.push(IndexableField::text("title", "hello world"));
        original.push(IndexableField {
            name: "count".to_string(),
            value: FieldValue::Long(42),
            stored: true,
            indexed: false,
            analyzed: false,
        });
        original.push(IndexableField {
            name: "blob".to_string(),
            value: FieldValue::Binary(vec![1, 2, 3]),
            stored: true,
            indexed: false,
            analyzed: false,
        });

        let cloned = DocumentCloner::clone_document(&original);
        assert_eq!(cloned, original);

        // Mutating the original after clone must not affect the clone.
        let mut original = original;
        original.fields[0].value = FieldValue::Text("mutated".to_string());
        assert_eq!(
            cloned.fields[0].value,
            FieldValue::Text("hello world".to_string())
        );
    }

    #[test]
    fn clone_normalizes_analyzed_flag_by_indexed_state() {
        // `NotAnalyzed`/keyword fields arrive as indexed but not analyzed;
        // the clone must still mark them analyzed since it only tracks
        // "is this field indexed at all", never the original tokenizer.
        let original = {
            let mut d = IndexableDocument::new();
            d.push(IndexableField {
                name: "sku".to_string(),
                value: FieldValue::Text("ABC-123".to_string()),
                stored: true,
                indexed: true,
                analyzed: false,
            });
            d
        };

        let cloned = DocumentCloner::clone_document(&original);
        assert!(cloned.fields[0].indexed);
        assert!(cloned.fields[0].analyzed);
    }

    #[test]
    fn sidecar_detection() {
        assert!(is_sidecar_field("tags_IsArray"));
        assert!(is_sidecar_field("price_Range"));
        assert!(is_sidecar_field("meta_ConvertToJson"));
        assert!(!is_sidecar_field("tags"));
    }
}
