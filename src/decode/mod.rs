pub mod brotli;
pub mod default;
pub mod pool;

use crate::metadata::{AttributeType, Encoding};
use crate::octree::aabb::Aabb;
use crate::octree::point_attributes::{PointAttribute, PointAttributes};
use byteorder::{ByteOrder, LittleEndian};
use glam::{DVec3, Vec3};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Side length of the occupancy grid used for the density estimate.
const DENSITY_GRID_SIZE: usize = 32;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Attribute {attribute} needs {needed} bytes, buffer holds {available}")]
    Truncated {
        attribute: String,
        needed: usize,
        available: usize,
    },

    #[error("Buffer of {len} bytes is not a whole number of {record} byte records")]
    PartialRecord { len: usize, record: usize },

    #[error("Dataset has no position attribute")]
    MissingPosition,

    #[error("Decompression failed: {0}")]
    Decompress(#[from] std::io::Error),

    #[error("Decoder worker panicked")]
    WorkerPanicked,

    #[error("Decoder pool is shut down")]
    PoolShutDown,

    #[error("Could not start a decoder worker: {0}")]
    WorkerSpawn(String),
}

/// Which decoder a node payload goes to. Each kind gets its own workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DecoderKind {
    Default,
    Brotli,
}

impl DecoderKind {
    pub fn for_encoding(encoding: &Encoding) -> Option<Self> {
        match encoding {
            Encoding::Default => Some(DecoderKind::Default),
            Encoding::Brotli => Some(DecoderKind::Brotli),
            Encoding::Other(_) => None,
        }
    }
}

impl fmt::Display for DecoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecoderKind::Default => f.write_str("default"),
            DecoderKind::Brotli => f.write_str("brotli"),
        }
    }
}

/// Everything a worker needs to decode one node. The raw buffer is moved in.
#[derive(Clone, Debug)]
pub struct DecodeRequest {
    pub buffer: Vec<u8>,
    pub attributes: Arc<PointAttributes>,
    pub scale: DVec3,
    pub offset: DVec3,
    pub bounding_box: Aabb,
    pub num_points: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AttributeData {
    /// Positions relative to the node's bounding box minimum.
    Position(Vec<Vec3>),
    Color(Vec<[u8; 4]>),
    /// `num_elements` values per point, point-major.
    Scalar(Vec<f64>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct AttributeBuffer {
    pub name: String,
    pub num_elements: u16,
    pub data: AttributeData,
}

/// Typed per-attribute arrays of one node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedBuffers {
    pub num_points: u32,
    pub attributes: Vec<AttributeBuffer>,
    /// Points per occupied cell of a 32³ grid over the node box.
    pub density: f64,
}

impl DecodedBuffers {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeBuffer> {
        self.attributes.iter().find(|buffer| buffer.name == name)
    }

    pub fn positions(&self) -> Option<&[Vec3]> {
        self.attributes.iter().find_map(|buffer| match &buffer.data {
            AttributeData::Position(positions) => Some(positions.as_slice()),
            _ => None,
        })
    }
}

/// Runs the decoder for `kind` on the calling thread.
pub fn decode(kind: DecoderKind, request: &DecodeRequest) -> Result<DecodedBuffers, DecodeError> {
    match kind {
        DecoderKind::Default => default::decode(request),
        DecoderKind::Brotli => brotli::decode(request),
    }
}

pub(crate) fn read_element(r#type: AttributeType, bytes: &[u8]) -> f64 {
    match r#type {
        AttributeType::Int8 => bytes[0] as i8 as f64,
        AttributeType::UInt8 | AttributeType::Undefined => bytes[0] as f64,
        AttributeType::Int16 => LittleEndian::read_i16(bytes) as f64,
        AttributeType::UInt16 => LittleEndian::read_u16(bytes) as f64,
        AttributeType::Int32 => LittleEndian::read_i32(bytes) as f64,
        AttributeType::UInt32 => LittleEndian::read_u32(bytes) as f64,
        AttributeType::Int64 => LittleEndian::read_i64(bytes) as f64,
        AttributeType::UInt64 => LittleEndian::read_u64(bytes) as f64,
        AttributeType::Float => LittleEndian::read_f32(bytes) as f64,
        AttributeType::Double => LittleEndian::read_f64(bytes),
    }
}

/// Reads every element of a non-position, non-colour attribute from a
/// `stride`-spaced sequence of records starting at `start`.
pub(crate) fn read_scalars(
    attribute: &PointAttribute,
    buffer: &[u8],
    start: usize,
    stride: usize,
    num_points: usize,
) -> Vec<f64> {
    let element_size = attribute.element_size() as usize;
    let mut values = Vec::with_capacity(num_points * attribute.num_elements as usize);

    for point in 0..num_points {
        let record = start + point * stride;
        for element in 0..attribute.num_elements as usize {
            let at = record + element * element_size;
            values.push(read_element(attribute.r#type, &buffer[at..at + element_size]));
        }
    }

    values
}

/// 16-bit colour channels are scaled down, 8-bit ones stored as is.
pub(crate) fn color_channel(value: u16) -> u8 {
    if value > 255 {
        (value / 256) as u8
    } else {
        value as u8
    }
}

pub(crate) fn ensure_len(attribute: &str, needed: usize, available: usize) -> Result<(), DecodeError> {
    if needed > available {
        return Err(DecodeError::Truncated {
            attribute: attribute.to_string(),
            needed,
            available,
        });
    }
    Ok(())
}

pub(crate) fn estimate_density(positions: &[Vec3], size: DVec3) -> f64 {
    if positions.is_empty() {
        return 0.0;
    }

    let n = DENSITY_GRID_SIZE;
    let mut grid = vec![0u32; n * n * n];
    let mut occupied = 0usize;
    let cell = |value: f32, extent: f64| -> usize {
        if extent <= 0.0 {
            return 0;
        }
        ((value as f64 / extent) * n as f64).clamp(0.0, (n - 1) as f64) as usize
    };

    for position in positions {
        let x = cell(position.x, size.x);
        let y = cell(position.y, size.y);
        let z = cell(position.z, size.z);
        let index = x + y * n + z * n * n;
        if grid[index] == 0 {
            occupied += 1;
        }
        grid[index] += 1;
    }

    positions.len() as f64 / occupied as f64
}
