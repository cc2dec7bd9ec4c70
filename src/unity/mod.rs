//! Reader for Unity `UnityFS` asset bundles.
//!
//! The converter only needs a narrow view of a bundle: the list of objects
//! it contains, their class, and their fields as described by the embedded
//! type trees. Everything here is synchronous and works on in-memory bytes.

mod bundle;
mod common_strings;
pub mod mesh;
mod objects;
mod reader;
mod serialized;
pub mod texture;
mod typetree;

use std::path::Path;

use thiserror::Error;
use tracing::debug;

pub use bundle::BundleHeader;
pub use objects::{ObjectKind, ObjectRef, StreamingInfo};
pub use reader::Endian;
pub use serialized::UnityVersion;
pub use typetree::Value;

use bundle::BundleNode;
use serialized::{ObjectInfo, SerializedFile};

/// Used when neither the asset file nor the bundle header carry a usable version.
const FALLBACK_VERSION: UnityVersion = UnityVersion {
    major: 2019,
    minor: 4,
};

#[derive(Error, Debug)]
pub enum UnityError {
    #[error("unexpected end of data at offset {offset} (wanted {wanted} bytes)")]
    UnexpectedEof { offset: usize, wanted: usize },

    #[error("malformed data: {0}")]
    Malformed(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error("missing field '{0}'")]
    MissingField(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = UnityError> = std::result::Result<T, E>;

/// A fully unpacked bundle: its asset files plus raw resource nodes.
#[derive(Debug)]
pub struct AssetBundle {
    header: BundleHeader,
    files: Vec<SerializedFile>,
    resources: Vec<BundleNode>,
}

impl AssetBundle {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (header, nodes) = bundle::read_container(data)?;

        let mut files = Vec::new();
        let mut resources = Vec::new();
        for node in nodes {
            if is_resource_path(&node.path) {
                resources.push(node);
                continue;
            }
            // Parsing needs ownership of the bytes; keep a copy for the
            // rare node that turns out to be a raw resource after all.
            match SerializedFile::parse(&node.path, node.data.clone()) {
                Ok(file) => files.push(file),
                Err(UnityError::Unsupported(reason)) => {
                    return Err(UnityError::Unsupported(reason));
                }
                Err(e) => {
                    debug!("Treating node '{}' as a raw resource: {}", node.path, e);
                    resources.push(node);
                }
            }
        }

        if files.is_empty() {
            return Err(UnityError::Unsupported(
                "bundle contains no serialized asset files".to_string(),
            ));
        }

        Ok(Self {
            header,
            files,
            resources,
        })
    }

    pub fn header(&self) -> &BundleHeader {
        &self.header
    }

    /// All objects in bundle order.
    pub fn objects(&self) -> impl Iterator<Item = BundleObject<'_>> {
        self.files.iter().flat_map(move |file| {
            file.objects.iter().map(move |info| BundleObject {
                bundle: self,
                file,
                info,
            })
        })
    }

    /// Resolves a `PPtr`. References into other asset files of the same
    /// bundle are matched on path id alone.
    pub fn resolve(&self, from: &BundleObject<'_>, target: ObjectRef) -> Option<BundleObject<'_>> {
        let find_in = |file: &SerializedFile| -> Option<usize> {
            file.objects.iter().position(|o| o.path_id == target.path_id)
        };

        if target.file_id == 0 {
            let file = self.files.iter().find(|f| std::ptr::eq(*f, from.file))?;
            let index = find_in(file)?;
            return Some(BundleObject {
                bundle: self,
                file,
                info: &file.objects[index],
            });
        }

        self.files.iter().find_map(|file| {
            find_in(file).map(|index| BundleObject {
                bundle: self,
                file,
                info: &file.objects[index],
            })
        })
    }

    /// Bytes an object keeps in a `.resS` node.
    pub fn stream_data(&self, info: &StreamingInfo) -> Result<&[u8]> {
        let name = info.file_name();
        let node = self
            .resources
            .iter()
            .find(|node| node.path.rsplit('/').next() == Some(name))
            .ok_or_else(|| {
                UnityError::Malformed(format!("resource '{}' not found in bundle", info.path))
            })?;

        let start = usize::try_from(info.offset).ok();
        let len = usize::try_from(info.size).ok();
        start
            .zip(len)
            .and_then(|(start, len)| node.data.get(start..start.checked_add(len)?))
            .ok_or(UnityError::UnexpectedEof {
                offset: start.unwrap_or(usize::MAX),
                wanted: len.unwrap_or(usize::MAX),
            })
    }

    fn fallback_version(&self) -> UnityVersion {
        UnityVersion::parse(&self.header.unity_revision).unwrap_or(FALLBACK_VERSION)
    }
}

fn is_resource_path(path: &str) -> bool {
    path.ends_with(".resS") || path.ends_with(".resource")
}

/// Handle to one object inside an [`AssetBundle`].
#[derive(Clone, Copy)]
pub struct BundleObject<'a> {
    bundle: &'a AssetBundle,
    file: &'a SerializedFile,
    info: &'a ObjectInfo,
}

impl<'a> BundleObject<'a> {
    pub fn path_id(&self) -> i64 {
        self.info.path_id
    }

    pub fn class_id(&self) -> i32 {
        self.info.class_id
    }

    pub fn kind(&self) -> ObjectKind {
        ObjectKind::from_class_id(self.info.class_id)
    }

    pub fn endian(&self) -> Endian {
        self.file.endian
    }

    pub fn unity_version(&self) -> UnityVersion {
        UnityVersion::parse(&self.file.unity_version)
            .unwrap_or_else(|| self.bundle.fallback_version())
    }

    pub fn bundle(&self) -> &'a AssetBundle {
        self.bundle
    }

    pub fn read(&self) -> Result<Value> {
        self.file.read_object(self.info)
    }

    /// Payload bytes kept in a `.resS` node, when `m_StreamData` is set.
    pub fn streamed(&self, value: &Value) -> Result<Option<&'a [u8]>> {
        StreamingInfo::from_value(value)
            .map(|info| self.bundle.stream_data(&info))
            .transpose()
    }
}

impl std::fmt::Debug for BundleObject<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleObject")
            .field("file", &self.file.name)
            .field("path_id", &self.info.path_id)
            .field("class_id", &self.info.class_id)
            .finish()
    }
}
