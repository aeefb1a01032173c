use super::{
    color_channel, ensure_len, estimate_density, read_scalars, AttributeBuffer, AttributeData,
    DecodeError, DecodeRequest, DecodedBuffers,
};
use crate::octree::point_attributes::AttributeKind;
use byteorder::{ByteOrder, LittleEndian};
use glam::{DVec3, Vec3};
use std::io::{Cursor, Read};

const POSITION_BYTES: usize = 16;
const COLOR_BYTES: usize = 8;

/// Decodes a brotli-compressed node. Attributes are stored column after
/// column; positions and colours are Morton coded.
pub fn decode(request: &DecodeRequest) -> Result<DecodedBuffers, DecodeError> {
    let mut cursor = Cursor::new(&request.buffer);
    let mut input = brotli_decompressor::Decompressor::new(&mut cursor, 4096);
    let mut buffer = Vec::new();
    input.read_to_end(&mut buffer)?;

    let num_points = request.num_points as usize;
    let min = request.bounding_box.min;
    let mut byte_offset = 0usize;
    let mut attributes = Vec::with_capacity(request.attributes.attributes.len());
    let mut density = 0.0;

    for attribute in &request.attributes.attributes {
        let data = match attribute.kind {
            AttributeKind::Position => {
                let end = byte_offset + num_points * POSITION_BYTES;
                ensure_len(&attribute.name, end, buffer.len())?;

                let positions: Vec<Vec3> = buffer[byte_offset..end]
                    .chunks_exact(POSITION_BYTES)
                    .map(|bytes| {
                        let (x, y, z) = read_morton_128(bytes);
                        let raw = DVec3::new(x as f64, y as f64, z as f64);
                        (raw * request.scale + request.offset - min).as_vec3()
                    })
                    .collect();
                byte_offset = end;
                density = estimate_density(&positions, request.bounding_box.size());
                AttributeData::Position(positions)
            }
            AttributeKind::Rgb => {
                let end = byte_offset + num_points * COLOR_BYTES;
                ensure_len(&attribute.name, end, buffer.len())?;

                let colors = buffer[byte_offset..end]
                    .chunks_exact(COLOR_BYTES)
                    .map(|bytes| {
                        let (r, g, b) = read_morton_64(bytes);
                        [color_channel(r), color_channel(g), color_channel(b), 255]
                    })
                    .collect();
                byte_offset = end;
                AttributeData::Color(colors)
            }
            AttributeKind::Generic => {
                let size = attribute.byte_size as usize;
                let end = byte_offset + num_points * size;
                ensure_len(&attribute.name, end, buffer.len())?;

                let values = read_scalars(attribute, &buffer, byte_offset, size, num_points);
                byte_offset = end;
                AttributeData::Scalar(values)
            }
        };

        attributes.push(AttributeBuffer {
            name: attribute.name.clone(),
            num_elements: attribute.num_elements,
            data,
        });
    }

    Ok(DecodedBuffers {
        num_points: request.num_points,
        attributes,
        density,
    })
}

fn read_morton_64(bytes: &[u8]) -> (u16, u16, u16) {
    let mc_0 = LittleEndian::read_u32(&bytes[4..8]);
    let mc_1 = LittleEndian::read_u32(&bytes[0..4]);

    decode_morton_64(mc_0, mc_1)
}

fn read_morton_128(bytes: &[u8]) -> (u32, u32, u32) {
    let mc_0 = LittleEndian::read_u32(&bytes[4..8]);
    let mc_1 = LittleEndian::read_u32(&bytes[0..4]);
    let mc_2 = LittleEndian::read_u32(&bytes[12..16]);
    let mc_3 = LittleEndian::read_u32(&bytes[8..12]);

    decode_morton_128(mc_0, mc_1, mc_2, mc_3)
}

/// Keeps every third bit of a 24-bit Morton word, packed into 8 bits.
fn dealign_24b(mut morton: u32) -> u32 {
    morton &= 0x09249249;
    morton = (morton | (morton >> 2)) & 0x030c30c3;
    morton = (morton | (morton >> 4)) & 0x0300f00f;
    morton = (morton | (morton >> 8)) & 0x030000ff;
    morton = (morton | (morton >> 16)) & 0x000003ff;

    morton
}

fn decode_morton_64(mc_0: u32, mc_1: u32) -> (u16, u16, u16) {
    let low = mc_1 & 0x00FFFFFF;
    let high = (mc_1 >> 24) | (mc_0 << 8);

    let r = dealign_24b(low) | (dealign_24b(high) << 8);
    let g = dealign_24b(low >> 1) | (dealign_24b(high >> 1) << 8);
    let b = dealign_24b(low >> 2) | (dealign_24b(high >> 2) << 8);

    (r as u16, g as u16, b as u16)
}

fn decode_morton_128(mc_0: u32, mc_1: u32, mc_2: u32, mc_3: u32) -> (u32, u32, u32) {
    let low = mc_3 & 0x00FFFFFF;
    let high = (mc_3 >> 24) | (mc_2 << 8);

    let mut x = dealign_24b(low) | (dealign_24b(high) << 8);
    let mut y = dealign_24b(low >> 1) | (dealign_24b(high >> 1) << 8);
    let mut z = dealign_24b(low >> 2) | (dealign_24b(high >> 2) << 8);

    if mc_1 != 0 || mc_2 != 0 {
        let low = mc_1 & 0x00FFFFFF;
        let high = (mc_1 >> 24) | (mc_0 << 8);

        x |= (dealign_24b(low) << 16) | (dealign_24b(high) << 24);
        y |= (dealign_24b(low >> 1) << 16) | (dealign_24b(high >> 1) << 24);
        z |= (dealign_24b(low >> 2) << 16) | (dealign_24b(high >> 2) << 24);
    }

    (x, y, z)
}
