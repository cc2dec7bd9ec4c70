use std::io::Cursor;

use lzma_rs::decompress::{Options, UnpackedSize};
use tracing::debug;

use super::reader::{BinaryReader, Endian};
use super::{Result, UnityError};

const UNITY_FS: &[u8] = b"UnityFS\0";
const LEGACY_SIGNATURES: [&str; 3] = ["UnityWeb", "UnityRaw", "UnityArchive"];

const COMPRESSION_MASK: u32 = 0x3F;
const BLOCKS_INFO_AT_END: u32 = 0x80;
const BLOCK_INFO_NEEDS_PADDING: u32 = 0x200;

/// Upper bound on the unpacked size of a single bundle.
const MAX_UNPACKED_SIZE: u64 = 1 << 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lzma,
    Lz4,
}

impl Compression {
    fn from_flags(flags: u32) -> Result<Self> {
        match flags & COMPRESSION_MASK {
            0 => Ok(Self::None),
            1 => Ok(Self::Lzma),
            // LZ4HC shares the LZ4 block format
            2 | 3 => Ok(Self::Lz4),
            other => Err(UnityError::Unsupported(format!(
                "bundle compression type {other}"
            ))),
        }
    }

    fn decompress(self, input: &[u8], unpacked_size: usize) -> Result<Vec<u8>> {
        if unpacked_size as u64 > MAX_UNPACKED_SIZE {
            return Err(UnityError::Malformed(format!(
                "block claims {unpacked_size} unpacked bytes"
            )));
        }
        let output = match self {
            Self::None => input.to_vec(),
            Self::Lz4 => lz4_flex::block::decompress(input, unpacked_size)
                .map_err(|e| UnityError::Decompress(format!("lz4: {e}")))?,
            Self::Lzma => {
                let mut output = Vec::with_capacity(unpacked_size);
                let options = Options {
                    unpacked_size: UnpackedSize::UseProvided(Some(unpacked_size as u64)),
                    ..Default::default()
                };
                lzma_rs::lzma_decompress_with_options(&mut Cursor::new(input), &mut output, &options)
                    .map_err(|e| UnityError::Decompress(format!("lzma: {e}")))?;
                output
            }
        };
        if output.len() != unpacked_size {
            return Err(UnityError::Decompress(format!(
                "expected {unpacked_size} bytes, got {}",
                output.len()
            )));
        }
        Ok(output)
    }
}

#[derive(Debug, Clone)]
pub struct BundleHeader {
    pub format_version: u32,
    pub unity_version: String,
    pub unity_revision: String,
    pub flags: u32,
}

/// A file stored inside the bundle, e.g. `CAB-1234` or `CAB-1234.resS`.
#[derive(Debug)]
pub struct BundleNode {
    pub path: String,
    pub data: Vec<u8>,
}

struct BlockInfo {
    unpacked_size: u32,
    packed_size: u32,
    flags: u16,
}

struct NodeInfo {
    offset: u64,
    size: u64,
    path: String,
}

pub fn read_container(data: &[u8]) -> Result<(BundleHeader, Vec<BundleNode>)> {
    if !data.starts_with(UNITY_FS) {
        if let Some(legacy) = LEGACY_SIGNATURES
            .iter()
            .find(|sig| data.starts_with(sig.as_bytes()))
        {
            return Err(UnityError::Unsupported(format!(
                "legacy '{legacy}' bundles are not supported"
            )));
        }
        return Err(UnityError::Malformed(
            "file is not a Unity asset bundle".to_string(),
        ));
    }

    let mut reader = BinaryReader::new(data, Endian::Big);
    let _signature = reader.read_cstring()?;
    let format_version = reader.read_u32()?;
    let unity_version = reader.read_cstring()?;
    let unity_revision = reader.read_cstring()?;
    let _total_size = reader.read_i64()?;
    let packed_info_size = reader.read_u32()? as usize;
    let unpacked_info_size = reader.read_u32()? as usize;
    let flags = reader.read_u32()?;

    debug!(
        "UnityFS v{} built with {} ({}), flags {:#x}",
        format_version, unity_revision, unity_version, flags
    );

    if format_version >= 7 {
        reader.align(16)?;
    }

    let packed_info = if flags & BLOCKS_INFO_AT_END != 0 {
        let start = data.len().checked_sub(packed_info_size).ok_or(
            UnityError::UnexpectedEof {
                offset: 0,
                wanted: packed_info_size,
            },
        )?;
        &data[start..]
    } else {
        reader.read_bytes(packed_info_size)?
    };
    let info = Compression::from_flags(flags)?.decompress(packed_info, unpacked_info_size)?;
    let (blocks, nodes) = read_blocks_info(&info)?;

    if flags & BLOCK_INFO_NEEDS_PADDING != 0 {
        reader.align(16)?;
    }

    let total: u64 = blocks.iter().map(|b| u64::from(b.unpacked_size)).sum();
    if total > MAX_UNPACKED_SIZE {
        return Err(UnityError::Malformed(format!(
            "bundle claims {total} unpacked bytes"
        )));
    }

    let mut unpacked = Vec::with_capacity(total as usize);
    for block in &blocks {
        let packed = reader.read_bytes(block.packed_size as usize)?;
        let compression = Compression::from_flags(u32::from(block.flags))?;
        unpacked.extend(compression.decompress(packed, block.unpacked_size as usize)?);
    }

    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        let range = usize::try_from(node.offset)
            .ok()
            .zip(usize::try_from(node.size).ok())
            .and_then(|(start, len)| Some(start..start.checked_add(len)?))
            .filter(|range| range.end <= unpacked.len())
            .ok_or_else(|| {
                UnityError::Malformed(format!("node '{}' lies outside the bundle data", node.path))
            })?;
        out.push(BundleNode {
            path: node.path,
            data: unpacked[range].to_vec(),
        });
    }

    Ok((
        BundleHeader {
            format_version,
            unity_version,
            unity_revision,
            flags,
        },
        out,
    ))
}

fn read_blocks_info(info: &[u8]) -> Result<(Vec<BlockInfo>, Vec<NodeInfo>)> {
    let mut reader = BinaryReader::new(info, Endian::Big);
    let _hash = reader.read_bytes(16)?;

    let block_count = reader.read_count(reader.remaining() / 10)?;
    let mut blocks = Vec::with_capacity(block_count);
    for _ in 0..block_count {
        blocks.push(BlockInfo {
            unpacked_size: reader.read_u32()?,
            packed_size: reader.read_u32()?,
            flags: reader.read_u16()?,
        });
    }

    let node_count = reader.read_count(reader.remaining() / 20)?;
    let mut nodes = Vec::with_capacity(node_count);
    for _ in 0..node_count {
        let offset = reader.read_i64()?;
        let size = reader.read_i64()?;
        let _flags = reader.read_u32()?;
        let path = reader.read_cstring()?;
        let (Ok(offset), Ok(size)) = (u64::try_from(offset), u64::try_from(size)) else {
            return Err(UnityError::Malformed(format!("node '{path}' has a negative extent")));
        };
        nodes.push(NodeInfo { offset, size, path });
    }

    Ok((blocks, nodes))
}
