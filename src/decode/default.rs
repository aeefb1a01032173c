use super::{
    color_channel, ensure_len, estimate_density, read_scalars, AttributeBuffer, AttributeData,
    DecodeError, DecodeRequest, DecodedBuffers,
};
use crate::metadata::AttributeType;
use crate::octree::point_attributes::AttributeKind;
use byteorder::{ByteOrder, LittleEndian};
use glam::{DVec3, Vec3};

/// Decodes interleaved point records, one `attributes.byte_size` record per
/// point. The point count comes from the buffer length.
pub fn decode(request: &DecodeRequest) -> Result<DecodedBuffers, DecodeError> {
    let buffer = &request.buffer;
    let stride = request.attributes.byte_size as usize;
    if stride == 0 || buffer.len() % stride != 0 {
        return Err(DecodeError::PartialRecord {
            len: buffer.len(),
            record: stride,
        });
    }
    let num_points = buffer.len() / stride;
    let min = request.bounding_box.min;

    let mut attributes = Vec::with_capacity(request.attributes.attributes.len());
    let mut density = 0.0;

    for attribute in &request.attributes.attributes {
        let offset = attribute.byte_offset as usize;

        let data = match attribute.kind {
            AttributeKind::Position => {
                ensure_len(&attribute.name, offset + 12, stride)?;
                let positions: Vec<Vec3> = (0..num_points)
                    .map(|i| {
                        let at = i * stride + offset;
                        let raw = DVec3::new(
                            read_coordinate(attribute.r#type, &buffer[at..]),
                            read_coordinate(attribute.r#type, &buffer[at + 4..]),
                            read_coordinate(attribute.r#type, &buffer[at + 8..]),
                        );
                        (raw * request.scale + request.offset - min).as_vec3()
                    })
                    .collect();
                density = estimate_density(&positions, request.bounding_box.size());
                AttributeData::Position(positions)
            }
            AttributeKind::Rgb => {
                ensure_len(&attribute.name, offset + 6, stride)?;
                let colors = (0..num_points)
                    .map(|i| {
                        let at = i * stride + offset;
                        [
                            color_channel(LittleEndian::read_u16(&buffer[at..])),
                            color_channel(LittleEndian::read_u16(&buffer[at + 2..])),
                            color_channel(LittleEndian::read_u16(&buffer[at + 4..])),
                            255,
                        ]
                    })
                    .collect();
                AttributeData::Color(colors)
            }
            AttributeKind::Generic => {
                ensure_len(&attribute.name, offset + attribute.byte_size as usize, stride)?;
                AttributeData::Scalar(read_scalars(attribute, buffer, offset, stride, num_points))
            }
        };

        attributes.push(AttributeBuffer {
            name: attribute.name.clone(),
            num_elements: attribute.num_elements,
            data,
        });
    }

    Ok(DecodedBuffers {
        num_points: num_points as u32,
        attributes,
        density,
    })
}

fn read_coordinate(r#type: AttributeType, bytes: &[u8]) -> f64 {
    match r#type {
        AttributeType::Float => LittleEndian::read_f32(bytes) as f64,
        _ => LittleEndian::read_i32(bytes) as f64,
    }
}
