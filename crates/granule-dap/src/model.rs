use crate::error::DapError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A dataset's structure and attributes, independent of any one document format.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    /// Shared dimensions, in declaration order.
    pub dimensions: Vec<Dimension>,
    pub variables: Vec<Variable>,
    /// Global attributes.
    pub attributes: Vec<Attribute>,
}

impl Dataset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|dim| dim.name == name)
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|var| var.name == name)
    }

    /// Every variable dimension must name a declared shared dimension; the
    /// XML documents have no way to express anything else.
    pub fn check_dimensions(&self) -> Result<(), DapError> {
        for var in &self.variables {
            if let Some(dim) = var.dims.iter().find(|d| self.dimension(d).is_none()) {
                return Err(DapError::UnknownDimension {
                    variable: var.name.clone(),
                    dimension: dim.clone(),
                });
            }
        }
        Ok(())
    }

    /// True when at least one variable carries a chunk layout.
    pub fn has_chunk_layouts(&self) -> bool {
        self.variables.iter().any(|var| var.chunks.is_some())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub size: u64,
}

impl Dimension {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub data_type: DataType,
    /// Names of the shared dimensions this variable is indexed by, outermost first.
    pub dims: Vec<String>,
    pub attributes: Vec<Attribute>,
    /// Where the variable's chunks live in the source file, when known.
    pub chunks: Option<ChunkLayout>,
}

impl Variable {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            dims: Vec::new(),
            attributes: Vec::new(),
            chunks: None,
        }
    }

    pub fn with_dims<I, S>(mut self, dims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dims = dims.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_chunks(mut self, chunks: ChunkLayout) -> Self {
        self.chunks = Some(chunks);
        self
    }
}

/// A named, typed attribute. Values are kept in their textual form so that
/// documents round-trip without float formatting drift.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub data_type: DataType,
    pub values: Vec<String>,
}

impl Attribute {
    pub fn new<I, S>(name: impl Into<String>, data_type: DataType, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            data_type,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, DataType::String, [value.into()])
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLayout {
    /// Size of a chunk along each dimension.
    pub chunk_shape: Vec<u64>,
    pub chunks: Vec<Chunk>,
}

/// One stored chunk of a variable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Byte offset of the chunk in the source file.
    pub offset: u64,
    /// Stored size in bytes.
    pub size: u64,
    /// Index of the chunk's first element within the variable.
    pub position: Vec<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int8,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    String,
    Url,
}

impl DataType {
    pub const ALL: [DataType; 12] = [
        DataType::Int8,
        DataType::Byte,
        DataType::Int16,
        DataType::UInt16,
        DataType::Int32,
        DataType::UInt32,
        DataType::Int64,
        DataType::UInt64,
        DataType::Float32,
        DataType::Float64,
        DataType::String,
        DataType::Url,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Int8 => "Int8",
            DataType::Byte => "Byte",
            DataType::Int16 => "Int16",
            DataType::UInt16 => "UInt16",
            DataType::Int32 => "Int32",
            DataType::UInt32 => "UInt32",
            DataType::Int64 => "Int64",
            DataType::UInt64 => "UInt64",
            DataType::Float32 => "Float32",
            DataType::Float64 => "Float64",
            DataType::String => "String",
            DataType::Url => "URL",
        }
    }

    /// String-like types are quoted in the attribute listing.
    pub fn is_textual(self) -> bool {
        matches!(self, DataType::String | DataType::Url)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = DapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataType::ALL
            .into_iter()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| DapError::UnknownType { name: s.to_owned() })
    }
}
