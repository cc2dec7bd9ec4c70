use super::typetree::Value;

/// The subset of Unity classes the converter consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Material,
    Texture2D,
    Mesh,
    Sprite,
    Other(i32),
}

impl ObjectKind {
    pub fn from_class_id(class_id: i32) -> Self {
        match class_id {
            21 => Self::Material,
            28 => Self::Texture2D,
            43 => Self::Mesh,
            213 => Self::Sprite,
            other => Self::Other(other),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Material => "material",
            Self::Texture2D => "texture",
            Self::Mesh => "mesh",
            Self::Sprite => "sprite",
            Self::Other(_) => "object",
        }
    }
}

/// Location of payload bytes kept outside the object, in a `.resS` node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingInfo {
    pub offset: u64,
    pub size: u64,
    pub path: String,
}

impl StreamingInfo {
    /// Returns `None` when the object keeps its payload inline.
    pub fn from_value(value: &Value) -> Option<Self> {
        let info = value.get("m_StreamData")?;
        let size = info.get("size")?.as_u64()?;
        let path = info.get("path")?.as_str()?;
        if size == 0 || path.is_empty() {
            return None;
        }
        Some(Self {
            offset: info.get("offset")?.as_u64()?,
            size,
            path: path.to_string(),
        })
    }

    /// `archive:/CAB-abc/CAB-abc.resS` → `CAB-abc.resS`
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// A `PPtr<T>` reference to another object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRef {
    pub file_id: i32,
    pub path_id: i64,
}

impl ObjectRef {
    pub fn from_value(value: &Value) -> Option<Self> {
        let file_id = value.get("m_FileID")?.as_i64()?;
        let path_id = value.get("m_PathID")?.as_i64()?;
        if path_id == 0 {
            return None;
        }
        Some(Self {
            file_id: i32::try_from(file_id).ok()?,
            path_id,
        })
    }
}
