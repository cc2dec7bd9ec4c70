use super::reader::{BinaryReader, Endian};
use super::typetree::{TypeTreeNode, Value};
use super::{Result, UnityError};

/// Oldest serialized-file layout the reader understands (Unity 5.0).
pub const MIN_FORMAT_VERSION: u32 = 14;
/// Anything above this is not a serialized file at all.
const MAX_FORMAT_VERSION: u32 = 64;
const MAX_TYPES: usize = 1 << 14;
const MAX_OBJECTS: usize = 1 << 22;
const MONO_BEHAVIOUR_CLASS: i32 = 114;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnityVersion {
    pub major: u32,
    pub minor: u32,
}

impl UnityVersion {
    /// Parses strings such as `2019.4.28f1`. Stripped builds report `0.0.0`.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(|c: char| !c.is_ascii_digit());
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        (major > 0).then_some(Self { major, minor })
    }
}

#[derive(Debug, Clone)]
pub struct SerializedType {
    pub class_id: i32,
    pub tree: TypeTreeNode,
}

#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub path_id: i64,
    pub byte_start: u64,
    pub byte_size: u32,
    pub class_id: i32,
    pub type_index: Option<usize>,
}

/// One `CAB-*` asset file stored inside a bundle.
#[derive(Debug)]
pub struct SerializedFile {
    pub name: String,
    pub unity_version: String,
    pub endian: Endian,
    pub types: Vec<SerializedType>,
    pub objects: Vec<ObjectInfo>,
    data: Vec<u8>,
}

impl SerializedFile {
    pub fn parse(name: &str, data: Vec<u8>) -> Result<Self> {
        let mut reader = BinaryReader::new(&data, Endian::Big);

        let _metadata_size = reader.read_u32()?;
        let _file_size = reader.read_u32()?;
        let format_version = reader.read_u32()?;
        let mut data_offset = u64::from(reader.read_u32()?);

        if format_version == 0 || format_version > MAX_FORMAT_VERSION {
            return Err(UnityError::Malformed(format!(
                "'{name}' is not a serialized file (format {format_version})"
            )));
        }
        if format_version < MIN_FORMAT_VERSION {
            return Err(UnityError::Unsupported(format!(
                "serialized file format {format_version} predates Unity 5"
            )));
        }

        let endian = if reader.read_u8()? == 0 {
            Endian::Little
        } else {
            Endian::Big
        };
        reader.skip(3)?;

        if format_version >= 22 {
            let _metadata_size = reader.read_u32()?;
            let _file_size = reader.read_i64()?;
            data_offset = reader.read_u64()?;
            let _unknown = reader.read_i64()?;
        }

        reader.set_endian(endian);
        let unity_version = reader.read_cstring()?;
        let _target_platform = reader.read_i32()?;
        let enable_type_tree = reader.read_bool()?;
        if !enable_type_tree {
            return Err(UnityError::Unsupported(
                "asset file was built without type trees".to_string(),
            ));
        }

        let type_count = reader.read_count(MAX_TYPES)?;
        let mut types = Vec::with_capacity(type_count);
        for _ in 0..type_count {
            types.push(read_serialized_type(&mut reader, format_version)?);
        }

        let object_count = reader.read_count(MAX_OBJECTS)?;
        let mut objects = Vec::with_capacity(object_count.min(4096));
        for _ in 0..object_count {
            reader.align(4)?;
            let path_id = reader.read_i64()?;
            let relative_start = if format_version >= 22 {
                reader.read_u64()?
            } else {
                u64::from(reader.read_u32()?)
            };
            let byte_start = relative_start.checked_add(data_offset).ok_or_else(|| {
                UnityError::Malformed(format!("object {path_id} starts past the end of the file"))
            })?;
            let byte_size = reader.read_u32()?;
            let type_id = reader.read_i32()?;

            let (class_id, type_index) = if format_version < 16 {
                let class_id = i32::from(reader.read_u16()?);
                let index = types.iter().position(|t| t.class_id == type_id);
                (class_id, index)
            } else {
                let index = usize::try_from(type_id).ok().filter(|i| *i < types.len());
                let class_id = index.map(|i| types[i].class_id).ok_or_else(|| {
                    UnityError::Malformed(format!("object {path_id} references type {type_id}"))
                })?;
                (class_id, index)
            };
            if format_version < 17 {
                let _script_type_index = reader.read_i16()?;
            }
            if format_version == 15 || format_version == 16 {
                let _stripped = reader.read_u8()?;
            }

            objects.push(ObjectInfo {
                path_id,
                byte_start,
                byte_size,
                class_id,
                type_index,
            });
        }

        Ok(Self {
            name: name.to_string(),
            unity_version,
            endian,
            types,
            objects,
            data,
        })
    }

    pub fn object_bytes(&self, info: &ObjectInfo) -> Result<&[u8]> {
        let start = usize::try_from(info.byte_start)
            .map_err(|_| UnityError::Malformed(format!("object {} offset", info.path_id)))?;
        let end = start
            .checked_add(info.byte_size as usize)
            .filter(|end| *end <= self.data.len())
            .ok_or(UnityError::UnexpectedEof {
                offset: start,
                wanted: info.byte_size as usize,
            })?;
        Ok(&self.data[start..end])
    }

    pub fn read_object(&self, info: &ObjectInfo) -> Result<Value> {
        let tree = info
            .type_index
            .and_then(|i| self.types.get(i))
            .map(|t| &t.tree)
            .ok_or_else(|| {
                UnityError::Unsupported(format!(
                    "no type tree for class {} in '{}'",
                    info.class_id, self.name
                ))
            })?;
        let mut reader = BinaryReader::new(self.object_bytes(info)?, self.endian);
        tree.read_value(&mut reader)
    }
}

fn read_serialized_type(reader: &mut BinaryReader<'_>, format_version: u32) -> Result<SerializedType> {
    let class_id = reader.read_i32()?;
    if format_version >= 16 {
        let _stripped = reader.read_bool()?;
    }
    if format_version >= 17 {
        let _script_type_index = reader.read_i16()?;
    }

    let has_script_id = if format_version < 16 {
        class_id < 0
    } else {
        class_id == MONO_BEHAVIOUR_CLASS
    };
    if has_script_id {
        reader.skip(16)?;
    }
    let _old_type_hash = reader.read_bytes(16)?;

    let tree = TypeTreeNode::read_blob(reader, format_version)?;

    if format_version >= 21 {
        let dependency_count = reader.read_count(reader.remaining() / 4)?;
        reader.skip(dependency_count * 4)?;
    }

    Ok(SerializedType {
        class_id,
        tree,
    })
}
