use super::common_strings;
use super::reader::BinaryReader;
use super::{Result, UnityError};

const ALIGN_FLAG: i32 = 0x4000;
const COMMON_STRING_FLAG: u32 = 0x8000_0000;
const MAX_NODES: usize = 1 << 16;

/// One field of a serialized type layout.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeTreeNode {
    pub type_name: String,
    pub name: String,
    pub byte_size: i32,
    pub meta_flag: i32,
    pub children: Vec<TypeTreeNode>,
}

impl TypeTreeNode {
    fn aligned(&self) -> bool {
        self.meta_flag & ALIGN_FLAG != 0
    }

    fn is_array(&self) -> bool {
        self.type_name == "Array"
    }

    /// Containers (`vector`, `map`, `staticvector`, ...) wrap a single `Array` child.
    fn array_child(&self) -> Option<&TypeTreeNode> {
        self.children.first().filter(|child| child.is_array())
    }

    /// Fewest bytes a value of this layout can occupy.
    fn min_size(&self) -> usize {
        match self.type_name.as_str() {
            "SInt8" | "UInt8" | "char" | "bool" => 1,
            "SInt16" | "short" | "UInt16" | "unsigned short" => 2,
            "SInt32" | "int" | "UInt32" | "unsigned int" | "Type*" | "float" => 4,
            "string" | "TypelessData" => 4,
            "SInt64" | "long long" | "UInt64" | "unsigned long long" | "FileSize" | "double" => 8,
            _ if self.is_array() || self.array_child().is_some() => 4,
            _ => self
                .children
                .iter()
                .map(TypeTreeNode::min_size)
                .fold(0, usize::saturating_add),
        }
    }

    /// Parses the flat blob layout used by serialized files since Unity 5.
    pub fn read_blob(reader: &mut BinaryReader<'_>, format_version: u32) -> Result<Self> {
        let node_count = reader.read_count(MAX_NODES)?;
        let string_buffer_size = reader.read_count(reader.remaining())?;

        let mut flat = Vec::with_capacity(node_count);
        for _ in 0..node_count {
            let _version = reader.read_u16()?;
            let level = reader.read_u8()?;
            let _type_flags = reader.read_u8()?;
            let type_offset = reader.read_u32()?;
            let name_offset = reader.read_u32()?;
            let byte_size = reader.read_i32()?;
            let _index = reader.read_i32()?;
            let meta_flag = reader.read_i32()?;
            if format_version >= 19 {
                let _ref_type_hash = reader.read_u64()?;
            }
            flat.push(FlatNode {
                level,
                type_offset,
                name_offset,
                byte_size,
                meta_flag,
            });
        }
        let strings = reader.read_bytes(string_buffer_size)?;

        if flat.is_empty() {
            return Err(UnityError::Malformed("empty type tree".to_string()));
        }

        let mut pos = 0;
        let root = build_node(&flat, strings, &mut pos)?;
        if pos != flat.len() {
            return Err(UnityError::Malformed(format!(
                "type tree has {} nodes outside its root",
                flat.len() - pos
            )));
        }
        Ok(root)
    }

    /// Deserializes one object's bytes according to this layout.
    pub fn read_value(&self, reader: &mut BinaryReader<'_>) -> Result<Value> {
        let mut align = self.aligned();
        let value = match self.type_name.as_str() {
            "SInt8" => Value::Int(reader.read_i8()?.into()),
            "UInt8" | "char" => Value::UInt(reader.read_u8()?.into()),
            "SInt16" | "short" => Value::Int(reader.read_i16()?.into()),
            "UInt16" | "unsigned short" => Value::UInt(reader.read_u16()?.into()),
            "SInt32" | "int" => Value::Int(reader.read_i32()?.into()),
            "UInt32" | "unsigned int" | "Type*" => Value::UInt(reader.read_u32()?.into()),
            "SInt64" | "long long" => Value::Int(reader.read_i64()?),
            "UInt64" | "unsigned long long" | "FileSize" => Value::UInt(reader.read_u64()?),
            "float" => Value::Float(reader.read_f32()?.into()),
            "double" => Value::Float(reader.read_f64()?),
            "bool" => Value::Bool(reader.read_bool()?),
            "string" => Value::String(reader.read_aligned_string()?),
            "TypelessData" => {
                let len = reader.read_count(reader.remaining())?;
                Value::Bytes(reader.read_bytes(len)?.to_vec())
            }
            _ => {
                if let Some(array) = self.array_child() {
                    align |= array.aligned();
                    read_array(array, reader)?
                } else if self.is_array() {
                    read_array(self, reader)?
                } else {
                    let mut fields = Vec::with_capacity(self.children.len());
                    for child in &self.children {
                        fields.push((child.name.clone(), child.read_value(reader)?));
                    }
                    Value::Object(fields)
                }
            }
        };
        if align {
            reader.align(4)?;
        }
        Ok(value)
    }
}

fn read_array(array: &TypeTreeNode, reader: &mut BinaryReader<'_>) -> Result<Value> {
    let element = array.children.get(1).ok_or_else(|| {
        UnityError::Malformed("array node without an element type".to_string())
    })?;
    let width = element.min_size();
    let count = reader.read_count(reader.remaining() / width.max(1))?;
    if width == 0 && count > 0 {
        return Err(UnityError::Malformed(format!(
            "array of {count} zero-width '{}' elements",
            element.type_name
        )));
    }

    if matches!(element.type_name.as_str(), "UInt8" | "char") && element.children.is_empty() {
        return Ok(Value::Bytes(reader.read_bytes(count)?.to_vec()));
    }

    let mut items = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        items.push(element.read_value(reader)?);
    }
    Ok(Value::Array(items))
}

struct FlatNode {
    level: u8,
    type_offset: u32,
    name_offset: u32,
    byte_size: i32,
    meta_flag: i32,
}

fn build_node(flat: &[FlatNode], strings: &[u8], pos: &mut usize) -> Result<TypeTreeNode> {
    let entry = &flat[*pos];
    *pos += 1;

    let mut node = TypeTreeNode {
        type_name: resolve_string(strings, entry.type_offset)?,
        name: resolve_string(strings, entry.name_offset)?,
        byte_size: entry.byte_size,
        meta_flag: entry.meta_flag,
        children: Vec::new(),
    };
    while *pos < flat.len() && flat[*pos].level > entry.level {
        node.children.push(build_node(flat, strings, pos)?);
    }
    Ok(node)
}

fn resolve_string(local: &[u8], offset: u32) -> Result<String> {
    if offset & COMMON_STRING_FLAG != 0 {
        let common = offset & !COMMON_STRING_FLAG;
        return common_strings::lookup(common)
            .map(str::to_string)
            .ok_or_else(|| UnityError::Malformed(format!("unknown common string {common}")));
    }

    let start = offset as usize;
    let tail = local
        .get(start..)
        .ok_or_else(|| UnityError::Malformed(format!("string offset {start} out of range")))?;
    let end = tail.iter().position(|b| *b == 0).unwrap_or(tail.len());
    Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
}

/// Dynamically typed object read through a type tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Object(Vec<(String, Value)>),
}

impl Value {
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object(fields) => fields.iter().find(|(key, _)| key == name).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Result<&Value> {
        self.get(name)
            .ok_or_else(|| UnityError::MissingField(name.to_string()))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            Value::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Int(v) => u64::try_from(*v).ok(),
            Value::UInt(v) => Some(*v),
            Value::Bool(v) => Some(u64::from(*v)),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v as f32),
            Value::Int(v) => Some(*v as f32),
            Value::UInt(v) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn i64_field(&self, name: &str) -> Result<i64> {
        self.field(name)?.as_i64().ok_or_else(|| type_mismatch(name, "integer"))
    }

    pub fn u64_field(&self, name: &str) -> Result<u64> {
        self.field(name)?.as_u64().ok_or_else(|| type_mismatch(name, "unsigned integer"))
    }

    pub fn f32_field(&self, name: &str) -> Result<f32> {
        self.field(name)?.as_f32().ok_or_else(|| type_mismatch(name, "number"))
    }

    pub fn str_field(&self, name: &str) -> Result<&str> {
        self.field(name)?.as_str().ok_or_else(|| type_mismatch(name, "string"))
    }

    pub fn bytes_field(&self, name: &str) -> Result<&[u8]> {
        self.field(name)?.as_bytes().ok_or_else(|| type_mismatch(name, "byte array"))
    }

    pub fn array_field(&self, name: &str) -> Result<&[Value]> {
        self.field(name)?.as_array().ok_or_else(|| type_mismatch(name, "array"))
    }
}

fn type_mismatch(name: &str, expected: &str) -> UnityError {
    UnityError::Malformed(format!("field '{name}' is not a {expected}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unity::reader::Endian;

    fn node(type_name: &str, name: &str, meta_flag: i32, children: Vec<TypeTreeNode>) -> TypeTreeNode {
        TypeTreeNode {
            type_name: type_name.to_string(),
            name: name.to_string(),
            byte_size: -1,
            meta_flag,
            children,
        }
    }

    fn byte_vector(name: &str) -> TypeTreeNode {
        node(
            "vector",
            name,
            0,
            vec![node(
                "Array",
                "Array",
                ALIGN_FLAG,
                vec![node("int", "size", 0, vec![]), node("UInt8", "data", 0, vec![])],
            )],
        )
    }

    #[test]
    fn test_reads_struct_with_string_and_aligned_bytes() {
        let tree = node(
            "Mesh",
            "Base",
            0,
            vec![
                node("string", "m_Name", ALIGN_FLAG, vec![]),
                byte_vector("m_IndexBuffer"),
                node("int", "m_IndexFormat", 0, vec![]),
            ],
        );

        let mut data = Vec::new();
        data.extend_from_slice(&5i32.to_le_bytes());
        data.extend_from_slice(b"blade\0\0\0");
        data.extend_from_slice(&3i32.to_le_bytes());
        data.extend_from_slice(&[1, 2, 3, 0]);
        data.extend_from_slice(&1i32.to_le_bytes());

        let mut reader = BinaryReader::new(&data, Endian::Little);
        let value = tree.read_value(&mut reader).unwrap();

        assert_eq!(value.str_field("m_Name").unwrap(), "blade");
        assert_eq!(value.bytes_field("m_IndexBuffer").unwrap(), &[1, 2, 3]);
        assert_eq!(value.i64_field("m_IndexFormat").unwrap(), 1);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_reads_vector_of_structs() {
        let color = node(
            "ColorRGBA",
            "data",
            0,
            ["r", "g", "b", "a"]
                .iter()
                .map(|c| node("float", c, 0, vec![]))
                .collect(),
        );
        let tree = node(
            "vector",
            "m_Colors",
            0,
            vec![node(
                "Array",
                "Array",
                0,
                vec![node("int", "size", 0, vec![]), color],
            )],
        );

        let mut data = 2i32.to_le_bytes().to_vec();
        for v in [1.0f32, 0.5, 0.25, 1.0, 0.0, 0.0, 0.0, 1.0] {
            data.extend_from_slice(&v.to_le_bytes());
        }

        let mut reader = BinaryReader::new(&data, Endian::Little);
        let value = tree.read_value(&mut reader).unwrap();
        let items = value.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].f32_field("g").unwrap(), 0.5);
    }

    fn vector_of(element: TypeTreeNode) -> TypeTreeNode {
        node(
            "vector",
            "m_Items",
            0,
            vec![node(
                "Array",
                "Array",
                0,
                vec![node("int", "size", 0, vec![]), element],
            )],
        )
    }

    #[test]
    fn test_array_count_is_bounded_by_element_size() {
        let tree = vector_of(node("int", "data", 0, vec![]));

        // Three ints claimed, two present
        let mut data = 3i32.to_le_bytes().to_vec();
        data.extend_from_slice(&[0; 8]);
        let mut reader = BinaryReader::new(&data, Endian::Little);
        assert!(matches!(
            tree.read_value(&mut reader),
            Err(UnityError::Malformed(_))
        ));

        let mut data = 2i32.to_le_bytes().to_vec();
        data.extend_from_slice(&[0; 8]);
        let mut reader = BinaryReader::new(&data, Endian::Little);
        assert_eq!(tree.read_value(&mut reader).unwrap().as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_zero_width_elements_are_rejected() {
        let empty = node("Empty", "data", 0, vec![node("Nested", "inner", 0, vec![])]);
        let tree = vector_of(empty);

        let mut data = 1_000_000i32.to_le_bytes().to_vec();
        data.extend_from_slice(&[0; 4]);
        let mut reader = BinaryReader::new(&data, Endian::Little);
        match tree.read_value(&mut reader) {
            Err(UnityError::Malformed(msg)) => assert!(msg.contains("zero-width")),
            other => panic!("unexpected {:?}", other),
        }

        // No elements is still a valid empty array
        let data = 0i32.to_le_bytes();
        let mut reader = BinaryReader::new(&data, Endian::Little);
        assert!(tree.read_value(&mut reader).unwrap().as_array().unwrap().is_empty());
    }

    #[test]
    fn test_missing_field_is_reported_by_name() {
        let value = Value::Object(vec![("m_Name".to_string(), Value::String("x".into()))]);
        match value.i64_field("m_Width") {
            Err(UnityError::MissingField(name)) => assert_eq!(name, "m_Width"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_blob_resolves_local_and_common_strings() {
        let mut data = Vec::new();
        data.extend_from_slice(&2i32.to_le_bytes());
        let local = b"Sprite\0";
        data.extend_from_slice(&(local.len() as i32).to_le_bytes());
        // root: local "Sprite" / common "Base" (offset 55)
        data.extend_from_slice(&1u16.to_le_bytes());
        data.push(0);
        data.push(0);
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&(COMMON_STRING_FLAG | 55).to_le_bytes());
        data.extend_from_slice(&(-1i32).to_le_bytes());
        data.extend_from_slice(&0i32.to_le_bytes());
        data.extend_from_slice(&0i32.to_le_bytes());
        // child: common "string" (840) / common "m_Name" (427)
        data.extend_from_slice(&1u16.to_le_bytes());
        data.push(1);
        data.push(0);
        data.extend_from_slice(&(COMMON_STRING_FLAG | 840).to_le_bytes());
        data.extend_from_slice(&(COMMON_STRING_FLAG | 427).to_le_bytes());
        data.extend_from_slice(&(-1i32).to_le_bytes());
        data.extend_from_slice(&1i32.to_le_bytes());
        data.extend_from_slice(&ALIGN_FLAG.to_le_bytes());
        data.extend_from_slice(local);

        let mut reader = BinaryReader::new(&data, Endian::Little);
        let tree = TypeTreeNode::read_blob(&mut reader, 17).unwrap();
        assert_eq!(tree.type_name, "Sprite");
        assert_eq!(tree.name, "Base");
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].type_name, "string");
        assert_eq!(tree.children[0].name, "m_Name");
    }
}
