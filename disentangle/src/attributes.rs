//! Named configuration attributes for model-import tooling
//!
//! Importers map attributes found in a model graph (`span`, `factor`) onto a
//! [`DisentangledConfig`](crate::DisentangledConfig). The set of accepted
//! attributes is described by a read-only static built on first use.

use std::fmt;
use std::sync::LazyLock;

/// Element type of an attribute value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int32,
    Float32,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int32 => write!(f, "int32"),
            Self::Float32 => write!(f, "float32"),
        }
    }
}

/// Description of one accepted attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    /// Number of values the attribute carries
    pub length: usize,
}

/// All attributes a kernel instance can be created from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCollection {
    fields: Vec<FieldSpec>,
}

impl FieldCollection {
    #[must_use]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Look up an attribute description by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

static FIELD_COLLECTION: LazyLock<FieldCollection> = LazyLock::new(|| FieldCollection {
    fields: vec![
        FieldSpec {
            name: "span",
            field_type: FieldType::Int32,
            length: 1,
        },
        FieldSpec {
            name: "factor",
            field_type: FieldType::Float32,
            length: 1,
        },
    ],
});

/// The attributes accepted by [`DisentangledConfig::from_fields`](crate::DisentangledConfig::from_fields)
#[must_use]
pub fn field_collection() -> &'static FieldCollection {
    &FIELD_COLLECTION
}

/// Values of one attribute
#[derive(Debug, Clone, PartialEq)]
pub enum FieldData {
    Int32(Vec<i32>),
    Float32(Vec<f32>),
}

impl FieldData {
    #[must_use]
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Int32(_) => FieldType::Int32,
            Self::Float32(_) => FieldType::Float32,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Int32(v) => v.len(),
            Self::Float32(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A named attribute value supplied at creation time
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub data: FieldData,
}

impl Field {
    #[must_use]
    pub fn int32(name: &str, value: i32) -> Self {
        Self {
            name: name.to_string(),
            data: FieldData::Int32(vec![value]),
        }
    }

    #[must_use]
    pub fn float32(name: &str, value: f32) -> Self {
        Self {
            name: name.to_string(),
            data: FieldData::Float32(vec![value]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_describes_span_and_factor() {
        let fc = field_collection();
        assert_eq!(fc.len(), 2);
        let span = fc.get("span").unwrap();
        assert_eq!(span.field_type, FieldType::Int32);
        assert_eq!(span.length, 1);
        let factor = fc.get("factor").unwrap();
        assert_eq!(factor.field_type, FieldType::Float32);
        assert_eq!(factor.length, 1);
        assert!(fc.get("scale").is_none());
    }

    #[test]
    fn test_collection_is_shared() {
        assert!(std::ptr::eq(field_collection(), field_collection()));
    }

    #[test]
    fn test_field_constructors() {
        let f = Field::int32("span", 4);
        assert_eq!(f.data.field_type(), FieldType::Int32);
        assert_eq!(f.data.len(), 1);
        let g = Field::float32("factor", 0.5);
        assert_eq!(g.data, FieldData::Float32(vec![0.5]));
    }
}
