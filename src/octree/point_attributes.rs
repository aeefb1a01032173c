use crate::metadata::{AttributeMetadata, AttributeType};

#[derive(Debug, Clone)]
pub struct PointAttributeType {
    pub ordinal: usize,
    pub name: &'static str,
    pub size: u16,
}

macro_rules! create_data_type {
    ($const_name:ident, $ord:expr, $name:expr, $size:expr) => {
        pub static $const_name: PointAttributeType = PointAttributeType {
            ordinal: $ord,
            name: $name,
            size: $size,
        };
    };
}

create_data_type!(DATA_TYPE_DOUBLE, 0, "double", 8);
create_data_type!(DATA_TYPE_FLOAT, 1, "float", 4);
create_data_type!(DATA_TYPE_INT8, 2, "int8", 1);
create_data_type!(DATA_TYPE_UINT8, 3, "uint8", 1);
create_data_type!(DATA_TYPE_INT16, 4, "int16", 2);
create_data_type!(DATA_TYPE_UINT16, 5, "uint16", 2);
create_data_type!(DATA_TYPE_INT32, 6, "int32", 4);
create_data_type!(DATA_TYPE_UINT32, 7, "uint32", 4);
create_data_type!(DATA_TYPE_INT64, 8, "int64", 8);
create_data_type!(DATA_TYPE_UINT64, 9, "uint64", 8);
create_data_type!(DATA_TYPE_UNDEFINED, 10, "undefined", 1);

impl AttributeType {
    pub fn data_type(&self) -> &'static PointAttributeType {
        match self {
            AttributeType::Double => &DATA_TYPE_DOUBLE,
            AttributeType::Float => &DATA_TYPE_FLOAT,
            AttributeType::Int8 => &DATA_TYPE_INT8,
            AttributeType::UInt8 => &DATA_TYPE_UINT8,
            AttributeType::Int16 => &DATA_TYPE_INT16,
            AttributeType::UInt16 => &DATA_TYPE_UINT16,
            AttributeType::Int32 => &DATA_TYPE_INT32,
            AttributeType::UInt32 => &DATA_TYPE_UINT32,
            AttributeType::Int64 => &DATA_TYPE_INT64,
            AttributeType::UInt64 => &DATA_TYPE_UINT64,
            AttributeType::Undefined => &DATA_TYPE_UNDEFINED,
        }
    }
}

/// How the decoders treat an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Position,
    Rgb,
    Generic,
}

#[derive(Debug, Clone)]
pub struct PointAttribute {
    pub name: String,
    pub kind: AttributeKind,
    pub r#type: AttributeType,
    pub num_elements: u16,
    pub byte_size: u16,
    /// Offset of this attribute inside an interleaved point record.
    pub byte_offset: u16,
    pub range: (Vec<f64>, Vec<f64>),
}

impl PointAttribute {
    pub fn element_size(&self) -> u16 {
        self.r#type.data_type().size
    }
}

/// Point record layout derived from the dataset metadata.
#[derive(Debug, Clone)]
pub struct PointAttributes {
    pub attributes: Vec<PointAttribute>,
    /// Bytes per point in an interleaved record.
    pub byte_size: u16,
}

impl PointAttributes {
    pub fn from_metadata(attributes: &[AttributeMetadata]) -> Self {
        let mut byte_offset = 0u16;
        let attributes = attributes
            .iter()
            .map(|metadata| {
                let kind = match metadata.name.as_str() {
                    "position" | "POSITION_CARTESIAN" => AttributeKind::Position,
                    "rgb" | "rgba" | "RGB" | "RGBA" | "RGBA_PACKED" => AttributeKind::Rgb,
                    _ => AttributeKind::Generic,
                };
                let attribute = PointAttribute {
                    name: metadata.name.clone(),
                    kind,
                    r#type: metadata.r#type,
                    num_elements: metadata.num_elements,
                    byte_size: metadata.size,
                    byte_offset,
                    range: (metadata.min.clone(), metadata.max.clone()),
                };
                byte_offset += metadata.size;
                attribute
            })
            .collect();

        Self {
            attributes,
            byte_size: byte_offset,
        }
    }

    pub fn get(&self, name: &str) -> Option<&PointAttribute> {
        self.attributes.iter().find(|attribute| attribute.name == name)
    }

    pub fn position(&self) -> Option<&PointAttribute> {
        self.attributes
            .iter()
            .find(|attribute| attribute.kind == AttributeKind::Position)
    }
}
