use crate::octree::aabb::Aabb;
use glam::DVec3;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum MetadataError {
    #[error("Dataset declares no point attributes")]
    NoAttributes,

    #[error("Dataset has no position attribute")]
    MissingPosition,

    #[error("Encoding not supported: {0}")]
    UnsupportedEncoding(String),

    #[error("First hierarchy chunk is empty")]
    EmptyFirstChunk,

    #[error("Bounding box is inverted: min {min:?}, max {max:?}")]
    InvertedBoundingBox { min: [f64; 3], max: [f64; 3] },

    #[error("Scale must be positive on every axis, got {0:?}")]
    InvalidScale([f64; 3]),
}

/// Content of a Potree 2.0 `metadata.json`.
#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub points: u64,
    #[serde(default)]
    pub projection: String,
    pub hierarchy: HierarchyMetadata,
    pub offset: [f64; 3],
    pub scale: [f64; 3],
    pub spacing: f64,
    pub bounding_box: BoundingBox,
    pub encoding: Encoding,
    pub attributes: Vec<AttributeMetadata>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyMetadata {
    pub first_chunk_size: u64,
    pub step_size: u16,
    pub depth: u16,
}

#[derive(Deserialize, Clone, Copy, Debug)]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

/// Point payload encoding. Anything the converter may write but we cannot
/// decode ends up in `Other` and is rejected by [`Metadata::validate`].
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum Encoding {
    #[serde(rename = "DEFAULT")]
    Default,
    #[serde(rename = "BROTLI")]
    Brotli,
    #[serde(untagged)]
    Other(String),
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeType {
    #[serde(rename = "int8")]
    Int8,
    #[serde(rename = "int16")]
    Int16,
    #[serde(rename = "int32")]
    Int32,
    #[serde(rename = "int64")]
    Int64,
    #[serde(rename = "uint8")]
    UInt8,
    #[serde(rename = "uint16")]
    UInt16,
    #[serde(rename = "uint32")]
    UInt32,
    #[serde(rename = "uint64")]
    UInt64,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "double")]
    Double,
    #[serde(rename = "undefined")]
    Undefined,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AttributeMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub size: u16,
    pub num_elements: u16,
    pub element_size: u16,
    pub r#type: AttributeType,
    #[serde(default)]
    pub min: Vec<f64>,
    #[serde(default)]
    pub max: Vec<f64>,
}

impl Metadata {
    /// Checks what traversal and decoding rely on. Failing here fails the
    /// whole octree open.
    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.attributes.is_empty() {
            return Err(MetadataError::NoAttributes);
        }
        if !self
            .attributes
            .iter()
            .any(|attribute| matches!(attribute.name.as_str(), "position" | "POSITION_CARTESIAN"))
        {
            return Err(MetadataError::MissingPosition);
        }
        if let Encoding::Other(encoding) = &self.encoding {
            return Err(MetadataError::UnsupportedEncoding(encoding.clone()));
        }
        if self.hierarchy.first_chunk_size == 0 {
            return Err(MetadataError::EmptyFirstChunk);
        }

        let BoundingBox { min, max } = self.bounding_box;
        if min.iter().zip(max.iter()).any(|(min, max)| min > max) {
            return Err(MetadataError::InvertedBoundingBox { min, max });
        }
        if self.scale.iter().any(|scale| *scale <= 0.0) {
            return Err(MetadataError::InvalidScale(self.scale));
        }

        Ok(())
    }

    pub fn scale(&self) -> DVec3 {
        DVec3::from_array(self.scale)
    }

    pub fn offset(&self) -> DVec3 {
        DVec3::from_array(self.offset)
    }
}

impl From<BoundingBox> for Aabb {
    fn from(bounding_box: BoundingBox) -> Self {
        Aabb::new(
            DVec3::from_array(bounding_box.min),
            DVec3::from_array(bounding_box.max),
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const METADATA_JSON: &str = r#"{
        "version": "2.0",
        "name": "synthetic",
        "description": "",
        "points": 1800,
        "projection": "",
        "hierarchy": { "firstChunkSize": 198, "stepSize": 4, "depth": 1 },
        "offset": [0, 0, 0],
        "scale": [0.001, 0.001, 0.001],
        "spacing": 0.5,
        "boundingBox": { "min": [0, 0, 0], "max": [8, 8, 8] },
        "encoding": "DEFAULT",
        "attributes": [
            {
                "name": "position", "description": "", "size": 12, "numElements": 3,
                "elementSize": 4, "type": "int32", "min": [0, 0, 0], "max": [8, 8, 8]
            },
            {
                "name": "rgb", "description": "", "size": 6, "numElements": 3,
                "elementSize": 2, "type": "uint16", "min": [0, 0, 0], "max": [65535, 65535, 65535]
            }
        ]
    }"#;

    fn metadata() -> Metadata {
        serde_json::from_str(METADATA_JSON).unwrap()
    }

    #[test]
    fn test_parse_potree2_metadata() {
        let metadata = metadata();

        assert_eq!(metadata.encoding, Encoding::Default);
        assert_eq!(metadata.hierarchy.first_chunk_size, 198);
        assert_eq!(metadata.attributes[1].r#type, AttributeType::UInt16);
        assert_eq!(Aabb::from(metadata.bounding_box).max, DVec3::splat(8.0));
        assert_eq!(metadata.validate(), Ok(()));
    }

    #[test]
    fn test_unknown_encoding_is_rejected() {
        let json = METADATA_JSON.replace("\"DEFAULT\"", "\"LAZ\"");
        let metadata: Metadata = serde_json::from_str(&json).unwrap();

        assert_eq!(
            metadata.validate(),
            Err(MetadataError::UnsupportedEncoding("LAZ".to_string()))
        );
    }

    #[test]
    fn test_validation_failures() {
        let mut missing_position = metadata();
        missing_position.attributes.remove(0);
        assert_eq!(missing_position.validate(), Err(MetadataError::MissingPosition));

        let mut no_attributes = metadata();
        no_attributes.attributes.clear();
        assert_eq!(no_attributes.validate(), Err(MetadataError::NoAttributes));

        let mut inverted = metadata();
        inverted.bounding_box.min[1] = 9.0;
        assert!(matches!(
            inverted.validate(),
            Err(MetadataError::InvertedBoundingBox { .. })
        ));

        let mut zero_scale = metadata();
        zero_scale.scale[2] = 0.0;
        assert!(matches!(zero_scale.validate(), Err(MetadataError::InvalidScale(_))));

        let mut empty_chunk = metadata();
        empty_chunk.hierarchy.first_chunk_size = 0;
        assert_eq!(empty_chunk.validate(), Err(MetadataError::EmptyFirstChunk));
    }

    #[test]
    fn test_missing_required_field_fails_to_parse() {
        let json = METADATA_JSON.replace("\"spacing\": 0.5,", "");
        assert!(serde_json::from_str::<Metadata>(&json).is_err());
    }
}
