//! Mesh vertex/index decoding and Wavefront OBJ export.

use std::fmt::Write as _;

use half::f16;

use super::reader::{BinaryReader, Endian};
use super::{BundleObject, Result, UnityError, UnityVersion, Value};

const TRIANGLES: i64 = 0;

/// Component encodings of vertex channels, normalised across Unity versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VertexFormat {
    Float32,
    Float16,
    UNorm8,
    SNorm8,
    UNorm16,
    SNorm16,
    UInt8,
    SInt8,
    UInt16,
    SInt16,
    UInt32,
    SInt32,
}

impl VertexFormat {
    fn from_raw(raw: u8, version: UnityVersion) -> Result<Self> {
        use VertexFormat::*;
        let format = if version.major >= 2019 {
            [
                Float32, Float16, UNorm8, SNorm8, UNorm16, SNorm16, UInt8, SInt8, UInt16, SInt16,
                UInt32, SInt32,
            ]
            .get(raw as usize)
            .copied()
        } else if version.major >= 2017 {
            // 2017/2018 carry a separate "Color" entry at index 2
            [
                Float32, Float16, UNorm8, UNorm8, SNorm8, UNorm16, SNorm16, UInt8, SInt8, UInt16,
                SInt16, UInt32, SInt32,
            ]
            .get(raw as usize)
            .copied()
        } else {
            [Float32, Float16, UNorm8, UInt8, UInt32]
                .get(raw as usize)
                .copied()
        };
        format.ok_or_else(|| UnityError::Unsupported(format!("vertex format {raw}")))
    }

    fn size(self) -> usize {
        match self {
            Self::Float32 | Self::UInt32 | Self::SInt32 => 4,
            Self::Float16 | Self::UNorm16 | Self::SNorm16 | Self::UInt16 | Self::SInt16 => 2,
            Self::UNorm8 | Self::SNorm8 | Self::UInt8 | Self::SInt8 => 1,
        }
    }

    fn read(self, reader: &mut BinaryReader<'_>) -> Result<f32> {
        Ok(match self {
            Self::Float32 => reader.read_f32()?,
            Self::Float16 => f16::from_bits(reader.read_u16()?).to_f32(),
            Self::UNorm8 => f32::from(reader.read_u8()?) / 255.0,
            Self::SNorm8 => (f32::from(reader.read_i8()?) / 127.0).max(-1.0),
            Self::UNorm16 => f32::from(reader.read_u16()?) / 65535.0,
            Self::SNorm16 => (f32::from(reader.read_i16()?) / 32767.0).max(-1.0),
            Self::UInt8 => f32::from(reader.read_u8()?),
            Self::SInt8 => f32::from(reader.read_i8()?),
            Self::UInt16 => f32::from(reader.read_u16()?),
            Self::SInt16 => f32::from(reader.read_i16()?),
            Self::UInt32 => reader.read_u32()? as f32,
            Self::SInt32 => reader.read_i32()? as f32,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Channel {
    stream: u8,
    offset: u8,
    format: u8,
    dimension: u8,
}

impl Channel {
    fn dimension(&self) -> usize {
        usize::from(self.dimension & 0xF)
    }
}

/// Which channel slots hold position, normal and the first UV set.
#[derive(Debug, Clone, Copy)]
struct ChannelLayout {
    position: usize,
    normal: usize,
    uv0: usize,
}

impl ChannelLayout {
    fn for_channel_count(count: usize) -> Self {
        if count >= 14 {
            // 2018+: pos, normal, tangent, color, uv0..uv7, weights, indices
            Self {
                position: 0,
                normal: 1,
                uv0: 4,
            }
        } else {
            // 5.x-2017: pos, normal, color, uv0, uv1, ...
            Self {
                position: 0,
                normal: 1,
                uv0: 3,
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct StreamLayout {
    offset: usize,
    stride: usize,
}

/// Decoded geometry, still in Unity's left-handed space.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MeshGeometry {
    pub name: String,
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    /// Triangle index lists, one per sub-mesh.
    pub submeshes: Vec<Vec<u32>>,
}

impl MeshGeometry {
    pub fn read(object: &BundleObject<'_>, value: &Value) -> Result<Self> {
        let name = value.str_field("m_Name")?.to_string();
        let vertex_data = value.field("m_VertexData")?;
        let vertex_count = usize::try_from(vertex_data.u64_field("m_VertexCount")?)
            .map_err(|_| UnityError::Malformed("vertex count".to_string()))?;

        let channels = vertex_data
            .array_field("m_Channels")?
            .iter()
            .map(|c| {
                Ok(Channel {
                    stream: small(c, "stream")?,
                    offset: small(c, "offset")?,
                    format: small(c, "format")?,
                    dimension: small(c, "dimension")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let data = match object.streamed(value)? {
            Some(bytes) => bytes,
            None => vertex_data.bytes_field("m_DataSize")?,
        };
        if vertex_count > 0 && data.is_empty() {
            return Err(UnityError::Unsupported(
                "compressed mesh data".to_string(),
            ));
        }

        let version = object.unity_version();
        let decoder = VertexDecoder::new(&channels, vertex_count, data, object.endian(), version)?;
        let layout = ChannelLayout::for_channel_count(channels.len());

        let positions = decoder
            .read_channel(layout.position)?
            .map(|v| to_vec3(&v))
            .unwrap_or_default();
        let normals = decoder
            .read_channel(layout.normal)?
            .map(|v| to_vec3(&v))
            .unwrap_or_default();
        let uvs = decoder
            .read_channel(layout.uv0)?
            .map(|v| to_vec2(&v))
            .unwrap_or_default();

        let submeshes = read_submeshes(value, vertex_count)?;

        Ok(Self {
            name,
            positions,
            normals,
            uvs,
            submeshes,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() || self.submeshes.iter().all(Vec::is_empty)
    }

    /// Wavefront OBJ text. X is mirrored into right-handed space, which
    /// also reverses the triangle winding.
    pub fn to_obj(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "g {}", self.name);
        for [x, y, z] in &self.positions {
            let _ = writeln!(out, "v {} {} {}", mirror(*x), y, z);
        }
        for [u, v] in &self.uvs {
            let _ = writeln!(out, "vt {} {}", u, v);
        }
        for [x, y, z] in &self.normals {
            let _ = writeln!(out, "vn {} {} {}", mirror(*x), y, z);
        }

        let has_uv = self.uvs.len() == self.positions.len();
        let has_normal = self.normals.len() == self.positions.len();
        let vertex = |i: u32| {
            let i = i + 1;
            match (has_uv, has_normal) {
                (true, true) => format!("{i}/{i}/{i}"),
                (true, false) => format!("{i}/{i}"),
                (false, true) => format!("{i}//{i}"),
                (false, false) => i.to_string(),
            }
        };

        for (index, triangles) in self.submeshes.iter().enumerate() {
            let _ = writeln!(out, "g {}_{}", self.name, index);
            for tri in triangles.chunks_exact(3) {
                let _ = writeln!(out, "f {} {} {}", vertex(tri[2]), vertex(tri[1]), vertex(tri[0]));
            }
        }
        out
    }
}

/// Negates without producing `-0`.
fn mirror(x: f32) -> f32 {
    0.0 - x
}

fn small(value: &Value, field: &str) -> Result<u8> {
    u8::try_from(value.u64_field(field)?)
        .map_err(|_| UnityError::Malformed(format!("channel {field} out of range")))
}

fn to_vec3(values: &[Vec<f32>]) -> Vec<[f32; 3]> {
    values
        .iter()
        .map(|v| [comp(v, 0), comp(v, 1), comp(v, 2)])
        .collect()
}

fn to_vec2(values: &[Vec<f32>]) -> Vec<[f32; 2]> {
    values.iter().map(|v| [comp(v, 0), comp(v, 1)]).collect()
}

fn comp(v: &[f32], i: usize) -> f32 {
    v.get(i).copied().unwrap_or(0.0)
}

struct VertexDecoder<'d> {
    channels: Vec<Channel>,
    streams: Vec<StreamLayout>,
    vertex_count: usize,
    data: &'d [u8],
    endian: Endian,
    version: UnityVersion,
}

impl<'d> VertexDecoder<'d> {
    fn new(
        channels: &[Channel],
        vertex_count: usize,
        data: &'d [u8],
        endian: Endian,
        version: UnityVersion,
    ) -> Result<Self> {
        let stream_count = channels.iter().map(|c| usize::from(c.stream) + 1).max().unwrap_or(0);
        let mut streams = Vec::with_capacity(stream_count);
        let mut offset = 0usize;
        for stream in 0..stream_count {
            let mut stride = 0;
            for channel in channels
                .iter()
                .filter(|c| usize::from(c.stream) == stream && c.dimension() > 0)
            {
                stride += channel.dimension() * VertexFormat::from_raw(channel.format, version)?.size();
            }
            // The whole stream must fit in the vertex data.
            let end = vertex_count
                .checked_mul(stride)
                .and_then(|len| offset.checked_add(len))
                .filter(|end| *end <= data.len())
                .ok_or_else(|| {
                    UnityError::Malformed(format!(
                        "vertex stream {stream} of {vertex_count} x {stride} bytes exceeds {} bytes of vertex data",
                        data.len()
                    ))
                })?;
            streams.push(StreamLayout { offset, stride });
            offset = (end + 15) & !15;
        }

        Ok(Self {
            channels: channels.to_vec(),
            streams,
            vertex_count,
            data,
            endian,
            version,
        })
    }

    /// Per-vertex components of one channel, or `None` if the mesh lacks it.
    fn read_channel(&self, slot: usize) -> Result<Option<Vec<Vec<f32>>>> {
        let Some(channel) = self.channels.get(slot).filter(|c| c.dimension() > 0) else {
            return Ok(None);
        };
        let stream = self.streams[usize::from(channel.stream)];
        let format = VertexFormat::from_raw(channel.format, self.version)?;
        let dimension = channel.dimension();

        let mut reader = BinaryReader::new(self.data, self.endian);
        let mut out = Vec::with_capacity(self.vertex_count);
        for vertex in 0..self.vertex_count {
            reader.seek(stream.offset + usize::from(channel.offset) + stream.stride * vertex)?;
            let mut components = Vec::with_capacity(dimension);
            for _ in 0..dimension {
                components.push(format.read(&mut reader)?);
            }
            out.push(components);
        }
        Ok(Some(out))
    }
}

fn read_submeshes(value: &Value, vertex_count: usize) -> Result<Vec<Vec<u32>>> {
    let wide = value.get("m_IndexFormat").and_then(Value::as_i64) == Some(1);
    let index_size = if wide { 4 } else { 2 };
    let buffer = value.bytes_field("m_IndexBuffer")?;

    let mut out = Vec::new();
    for submesh in value.array_field("m_SubMeshes")? {
        let topology = submesh.get("topology").and_then(Value::as_i64).unwrap_or(TRIANGLES);
        if topology != TRIANGLES {
            tracing::warn!("Skipping sub-mesh with topology {}", topology);
            out.push(Vec::new());
            continue;
        }

        let first = usize::try_from(submesh.u64_field("firstByte")?).unwrap_or(usize::MAX) / index_size;
        let count = usize::try_from(submesh.u64_field("indexCount")?).unwrap_or(usize::MAX);
        let base = submesh
            .get("baseVertex")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        let bytes = first
            .checked_mul(index_size)
            .zip(count.checked_mul(index_size))
            .and_then(|(start, len)| buffer.get(start..start.checked_add(len)?))
            .ok_or_else(|| UnityError::Malformed("sub-mesh outside index buffer".to_string()))?;

        let mut indices = Vec::with_capacity(count);
        for raw in bytes.chunks_exact(index_size) {
            let index = if wide {
                u64::from(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            } else {
                u64::from(u16::from_le_bytes([raw[0], raw[1]]))
            } + base;
            let index = u32::try_from(index)
                .ok()
                .filter(|i| (*i as usize) < vertex_count)
                .ok_or_else(|| UnityError::Malformed(format!("index {index} out of range")))?;
            indices.push(index);
        }
        indices.truncate(indices.len() / 3 * 3);
        out.push(indices);
    }
    Ok(out)
}
