//! Builds small synthetic `.saber` bundles: a UnityFS container holding one
//! serialized asset file (format 19, Unity 2019.4) with embedded type trees.
#![allow(dead_code)]

use std::collections::HashMap;

pub const UNITY_VERSION: &str = "2019.4.28f1";
const ASSET_FILE: &str = "CAB-fixture";
const RESOURCE_FILE: &str = "CAB-fixture.resS";
const ALIGN: i32 = 0x4000;

pub const CLASS_MATERIAL: i32 = 21;
pub const CLASS_TEXTURE2D: i32 = 28;
pub const CLASS_MESH: i32 = 43;
pub const CLASS_SPRITE: i32 = 213;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lzma,
    Lz4,
}

impl Compression {
    fn flag(self) -> u16 {
        match self {
            Self::None => 0,
            Self::Lzma => 1,
            Self::Lz4 => 2,
        }
    }

    fn pack(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::None => data.to_vec(),
            Self::Lzma => {
                let mut packed = Vec::new();
                lzma_rs::lzma_compress(&mut std::io::Cursor::new(data), &mut packed).unwrap();
                // Bundles keep the 5 property bytes but not the 8 byte size field
                packed.drain(5..13);
                packed
            }
            Self::Lz4 => lz4_flex::block::compress(data),
        }
    }
}

// --- Type trees ---

#[derive(Debug, Clone)]
pub struct Node {
    type_name: &'static str,
    name: &'static str,
    byte_size: i32,
    meta_flag: i32,
    children: Vec<Node>,
}

fn leaf(type_name: &'static str, name: &'static str, byte_size: i32) -> Node {
    Node {
        type_name,
        name,
        byte_size,
        meta_flag: 0,
        children: Vec::new(),
    }
}

fn object(type_name: &'static str, name: &'static str, children: Vec<Node>) -> Node {
    Node {
        type_name,
        name,
        byte_size: -1,
        meta_flag: 0,
        children,
    }
}

fn string(name: &'static str) -> Node {
    leaf("string", name, -1)
}

fn container(type_name: &'static str, name: &'static str, mut element: Node, aligned: bool) -> Node {
    element.name = "data";
    let array = Node {
        type_name: "Array",
        name: "Array",
        byte_size: -1,
        meta_flag: if aligned { ALIGN } else { 0 },
        children: vec![leaf("int", "size", 4), element],
    };
    object(type_name, name, vec![array])
}

fn byte_vector(name: &'static str) -> Node {
    container("vector", name, leaf("UInt8", "data", 1), true)
}

fn rect(name: &'static str) -> Node {
    object(
        "Rectf",
        name,
        vec![
            leaf("float", "x", 4),
            leaf("float", "y", 4),
            leaf("float", "width", 4),
            leaf("float", "height", 4),
        ],
    )
}

fn streaming_info() -> Node {
    object(
        "StreamingInfo",
        "m_StreamData",
        vec![
            leaf("unsigned int", "offset", 4),
            leaf("unsigned int", "size", 4),
            string("path"),
        ],
    )
}

fn texture_tree() -> Node {
    let mut image_data = leaf("TypelessData", "image data", -1);
    image_data.meta_flag = ALIGN;
    object(
        "Texture2D",
        "Base",
        vec![
            string("m_Name"),
            leaf("int", "m_Width", 4),
            leaf("int", "m_Height", 4),
            leaf("int", "m_TextureFormat", 4),
            image_data,
            streaming_info(),
        ],
    )
}

fn mesh_tree() -> Node {
    let submesh = object(
        "SubMesh",
        "data",
        vec![
            leaf("unsigned int", "firstByte", 4),
            leaf("unsigned int", "indexCount", 4),
            leaf("int", "topology", 4),
            leaf("unsigned int", "baseVertex", 4),
            leaf("unsigned int", "firstVertex", 4),
            leaf("unsigned int", "vertexCount", 4),
        ],
    );
    let channel = object(
        "ChannelInfo",
        "data",
        vec![
            leaf("UInt8", "stream", 1),
            leaf("UInt8", "offset", 1),
            leaf("UInt8", "format", 1),
            leaf("UInt8", "dimension", 1),
        ],
    );
    object(
        "Mesh",
        "Base",
        vec![
            string("m_Name"),
            container("vector", "m_SubMeshes", submesh, false),
            leaf("int", "m_IndexFormat", 4),
            byte_vector("m_IndexBuffer"),
            object(
                "VertexData",
                "m_VertexData",
                vec![
                    leaf("unsigned int", "m_VertexCount", 4),
                    container("vector", "m_Channels", channel, false),
                    byte_vector("m_DataSize"),
                ],
            ),
        ],
    )
}

fn material_tree() -> Node {
    let color = object(
        "ColorRGBA",
        "second",
        vec![
            leaf("float", "r", 4),
            leaf("float", "g", 4),
            leaf("float", "b", 4),
            leaf("float", "a", 4),
        ],
    );
    let pair = object("pair", "data", vec![string("first"), color]);
    object(
        "Material",
        "Base",
        vec![
            string("m_Name"),
            object(
                "UnityPropertySheet",
                "m_SavedProperties",
                vec![container("map", "m_Colors", pair, false)],
            ),
        ],
    )
}

fn sprite_tree() -> Node {
    object(
        "Sprite",
        "Base",
        vec![
            string("m_Name"),
            rect("m_Rect"),
            object(
                "SpriteRenderData",
                "m_RD",
                vec![
                    object(
                        "PPtr<Texture2D>",
                        "texture",
                        vec![leaf("int", "m_FileID", 4), leaf("SInt64", "m_PathID", 8)],
                    ),
                    rect("textureRect"),
                ],
            ),
        ],
    )
}

// --- Little-endian object data ---

#[derive(Debug, Default, Clone)]
struct Data(Vec<u8>);

impl Data {
    fn u8(&mut self, v: u8) -> &mut Self {
        self.0.push(v);
        self
    }

    fn i32(&mut self, v: i32) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn u32(&mut self, v: u32) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn i64(&mut self, v: i64) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn f32(&mut self, v: f32) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn align(&mut self) -> &mut Self {
        while self.0.len() % 4 != 0 {
            self.0.push(0);
        }
        self
    }

    fn string(&mut self, s: &str) -> &mut Self {
        self.i32(s.len() as i32);
        self.0.extend_from_slice(s.as_bytes());
        self.align()
    }

    fn bytes(&mut self, b: &[u8]) -> &mut Self {
        self.i32(b.len() as i32);
        self.0.extend_from_slice(b);
        self.align()
    }
}

// --- Bundle ---

#[derive(Debug, Clone)]
struct FixtureObject {
    class_id: i32,
    path_id: i64,
    tree: Node,
    data: Vec<u8>,
}

/// Deterministic RGBA pixels for a `width` x `height` texture.
pub fn rgba_pixels(width: u32, height: u32) -> Vec<u8> {
    (0..width * height)
        .flat_map(|i| [(i * 7) as u8, (i * 13) as u8, (i * 29) as u8, 255])
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct FixtureBundle {
    objects: Vec<FixtureObject>,
    resource: Vec<u8>,
}

impl FixtureBundle {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, class_id: i32, path_id: i64, tree: Node, data: Data) -> Self {
        self.objects.push(FixtureObject {
            class_id,
            path_id,
            tree,
            data: data.0,
        });
        self
    }

    /// A single triangle with positions, normals and one UV set.
    pub fn mesh(self, path_id: i64, name: &str) -> Self {
        self.mesh_with_vertex_count(path_id, name, 3)
    }

    /// The same triangle, but `m_VertexCount` says `vertex_count`.
    pub fn mesh_with_vertex_count(self, path_id: i64, name: &str, vertex_count: u32) -> Self {
        let positions = [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let uvs = [[0.0f32, 0.0], [1.0, 0.0], [0.0, 1.0]];

        let mut vertices = Data::default();
        for (pos, uv) in positions.iter().zip(uvs) {
            for c in pos {
                vertices.f32(*c);
            }
            vertices.f32(0.0).f32(0.0).f32(1.0);
            vertices.f32(uv[0]).f32(uv[1]);
        }

        let mut indices = Vec::new();
        for i in [0u16, 1, 2] {
            indices.extend_from_slice(&i.to_le_bytes());
        }

        let mut data = Data::default();
        data.string(name);
        // one triangle sub-mesh
        data.i32(1).u32(0).u32(3).i32(0).u32(0).u32(0).u32(3);
        data.i32(0); // 16-bit indices
        data.bytes(&indices);
        data.u32(vertex_count);
        // 14 channels: position, normal, tangent, color, uv0..uv7, weights, indices
        data.i32(14);
        for (offset, dimension) in [(0u8, 3u8), (12, 3), (0, 0), (0, 0), (24, 2)]
            .into_iter()
            .chain(std::iter::repeat((0, 0)).take(9))
        {
            data.u8(0).u8(offset).u8(0).u8(dimension);
        }
        data.bytes(&vertices.0);

        self.push(CLASS_MESH, path_id, mesh_tree(), data)
    }

    /// An RGBA32 texture stored inline.
    pub fn texture(self, path_id: i64, name: &str, width: u32, height: u32) -> Self {
        self.encoded_texture(path_id, name, width, height, 4, &rgba_pixels(width, height))
    }

    /// An inline texture with arbitrary `TextureFormat` id and pixel bytes.
    pub fn encoded_texture(
        self,
        path_id: i64,
        name: &str,
        width: u32,
        height: u32,
        format: i32,
        pixels: &[u8],
    ) -> Self {
        let mut data = Data::default();
        data.string(name)
            .i32(width as i32)
            .i32(height as i32)
            .i32(format)
            .bytes(pixels)
            .u32(0)
            .u32(0)
            .string("");
        self.push(CLASS_TEXTURE2D, path_id, texture_tree(), data)
    }

    /// An RGBA32 texture whose pixels live in the `.resS` node.
    pub fn streamed_texture(mut self, path_id: i64, name: &str, width: u32, height: u32) -> Self {
        let pixels = rgba_pixels(width, height);
        let offset = self.resource.len() as u32;
        self.resource.extend_from_slice(&pixels);

        let mut data = Data::default();
        data.string(name)
            .i32(width as i32)
            .i32(height as i32)
            .i32(4)
            .bytes(&[])
            .u32(offset)
            .u32(pixels.len() as u32)
            .string(&format!("archive:/{ASSET_FILE}/{RESOURCE_FILE}"));
        self.push(CLASS_TEXTURE2D, path_id, texture_tree(), data)
    }

    /// A texture with an unsupported pixel format (ETC2), which the
    /// converter must skip.
    pub fn undecodable_texture(self, path_id: i64, name: &str) -> Self {
        // YUY2, which the converter does not decode
        self.encoded_texture(path_id, name, 4, 4, 21, &[0; 16])
    }

    /// A sprite cut from `texture_path_id`, rect measured from the bottom left.
    pub fn sprite(self, path_id: i64, name: &str, texture_path_id: i64, rect: [f32; 4]) -> Self {
        let mut data = Data::default();
        data.string(name);
        for v in rect {
            data.f32(v);
        }
        data.i32(0).i64(texture_path_id);
        for v in rect {
            data.f32(v);
        }
        self.push(CLASS_SPRITE, path_id, sprite_tree(), data)
    }

    pub fn material(self, path_id: i64, name: &str, color: [f32; 4]) -> Self {
        let mut data = Data::default();
        data.string(name);
        data.i32(2);
        data.string("_EmissionColor").f32(0.0).f32(0.0).f32(0.0).f32(1.0);
        data.string("_Color");
        for c in color {
            data.f32(c);
        }
        self.push(CLASS_MATERIAL, path_id, material_tree(), data)
    }

    pub fn build(&self, compression: Compression) -> Vec<u8> {
        let mut nodes = vec![(ASSET_FILE, 4u32, self.serialized_file())];
        if !self.resource.is_empty() {
            nodes.push((RESOURCE_FILE, 0, self.resource.clone()));
        }
        unityfs(&nodes, compression)
    }

    fn serialized_file(&self) -> Vec<u8> {
        let mut type_classes: Vec<i32> = Vec::new();
        let mut type_trees: Vec<&Node> = Vec::new();
        for obj in &self.objects {
            if !type_classes.contains(&obj.class_id) {
                type_classes.push(obj.class_id);
                type_trees.push(&obj.tree);
            }
        }

        let mut meta = Vec::new();
        meta.extend_from_slice(UNITY_VERSION.as_bytes());
        meta.push(0);
        meta.extend_from_slice(&19i32.to_le_bytes()); // target platform
        meta.push(1); // type trees enabled

        meta.extend_from_slice(&(type_classes.len() as i32).to_le_bytes());
        for (class_id, tree) in type_classes.iter().zip(&type_trees) {
            meta.extend_from_slice(&class_id.to_le_bytes());
            meta.push(0); // stripped
            meta.extend_from_slice(&(-1i16).to_le_bytes());
            meta.extend_from_slice(&[0; 16]);
            meta.extend_from_slice(&type_tree_blob(tree));
        }

        const HEADER_LEN: usize = 20;
        let mut object_data = Vec::new();
        let mut placements = Vec::new();
        for obj in &self.objects {
            while object_data.len() % 8 != 0 {
                object_data.push(0);
            }
            placements.push((object_data.len() as u32, obj.data.len() as u32));
            object_data.extend_from_slice(&obj.data);
        }

        meta.extend_from_slice(&(self.objects.len() as i32).to_le_bytes());
        for (obj, (start, size)) in self.objects.iter().zip(&placements) {
            while (HEADER_LEN + meta.len()) % 4 != 0 {
                meta.push(0);
            }
            let type_index = type_classes
                .iter()
                .position(|c| *c == obj.class_id)
                .unwrap_or_default() as i32;
            meta.extend_from_slice(&obj.path_id.to_le_bytes());
            meta.extend_from_slice(&start.to_le_bytes());
            meta.extend_from_slice(&size.to_le_bytes());
            meta.extend_from_slice(&type_index.to_le_bytes());
        }

        let data_offset = (HEADER_LEN + meta.len()).div_ceil(16) * 16;
        let file_size = data_offset + object_data.len();

        let mut out = Vec::with_capacity(file_size);
        out.extend_from_slice(&(meta.len() as u32).to_be_bytes());
        out.extend_from_slice(&(file_size as u32).to_be_bytes());
        out.extend_from_slice(&19u32.to_be_bytes());
        out.extend_from_slice(&(data_offset as u32).to_be_bytes());
        out.extend_from_slice(&[0, 0, 0, 0]); // little endian + reserved
        out.extend_from_slice(&meta);
        out.resize(data_offset, 0);
        out.extend_from_slice(&object_data);
        out
    }
}

fn type_tree_blob(root: &Node) -> Vec<u8> {
    fn flatten<'a>(node: &'a Node, level: u8, out: &mut Vec<(u8, &'a Node)>) {
        out.push((level, node));
        for child in &node.children {
            flatten(child, level + 1, out);
        }
    }

    let mut flat = Vec::new();
    flatten(root, 0, &mut flat);

    let mut strings = Vec::new();
    let mut offsets: HashMap<&str, u32> = HashMap::new();
    let mut intern = |s: &'static str, strings: &mut Vec<u8>| -> u32 {
        *offsets.entry(s).or_insert_with(|| {
            let offset = strings.len() as u32;
            strings.extend_from_slice(s.as_bytes());
            strings.push(0);
            offset
        })
    };

    let mut nodes = Vec::new();
    for (index, (level, node)) in flat.iter().enumerate() {
        let type_offset = intern(node.type_name, &mut strings);
        let name_offset = intern(node.name, &mut strings);
        nodes.extend_from_slice(&1u16.to_le_bytes());
        nodes.push(*level);
        nodes.push(u8::from(node.type_name == "Array"));
        nodes.extend_from_slice(&type_offset.to_le_bytes());
        nodes.extend_from_slice(&name_offset.to_le_bytes());
        nodes.extend_from_slice(&node.byte_size.to_le_bytes());
        nodes.extend_from_slice(&(index as i32).to_le_bytes());
        nodes.extend_from_slice(&node.meta_flag.to_le_bytes());
        nodes.extend_from_slice(&0u64.to_le_bytes());
    }

    let mut blob = Vec::new();
    blob.extend_from_slice(&(flat.len() as i32).to_le_bytes());
    blob.extend_from_slice(&(strings.len() as i32).to_le_bytes());
    blob.extend_from_slice(&nodes);
    blob.extend_from_slice(&strings);
    blob
}

fn unityfs(nodes: &[(&str, u32, Vec<u8>)], compression: Compression) -> Vec<u8> {
    let data: Vec<u8> = nodes.iter().flat_map(|(_, _, d)| d.iter().copied()).collect();
    let block = compression.pack(&data);
    let flag = compression.flag();

    let mut info = Vec::new();
    info.extend_from_slice(&[0; 16]);
    info.extend_from_slice(&1i32.to_be_bytes());
    info.extend_from_slice(&(data.len() as u32).to_be_bytes());
    info.extend_from_slice(&(block.len() as u32).to_be_bytes());
    info.extend_from_slice(&flag.to_be_bytes());
    info.extend_from_slice(&(nodes.len() as i32).to_be_bytes());
    let mut offset = 0i64;
    for (path, node_flags, bytes) in nodes {
        info.extend_from_slice(&offset.to_be_bytes());
        info.extend_from_slice(&(bytes.len() as i64).to_be_bytes());
        info.extend_from_slice(&node_flags.to_be_bytes());
        info.extend_from_slice(path.as_bytes());
        info.push(0);
        offset += bytes.len() as i64;
    }
    let packed_info = compression.pack(&info);

    let mut header = Vec::new();
    header.extend_from_slice(b"UnityFS\0");
    header.extend_from_slice(&6u32.to_be_bytes());
    header.extend_from_slice(b"5.x.x\0");
    header.extend_from_slice(UNITY_VERSION.as_bytes());
    header.push(0);
    let total = header.len() + 8 + 12 + packed_info.len() + block.len();
    header.extend_from_slice(&(total as i64).to_be_bytes());
    header.extend_from_slice(&(packed_info.len() as u32).to_be_bytes());
    header.extend_from_slice(&(info.len() as u32).to_be_bytes());
    header.extend_from_slice(&(0x40 | u32::from(flag)).to_be_bytes());

    let mut out = header;
    out.extend_from_slice(&packed_info);
    out.extend_from_slice(&block);
    out
}

/// A typical saber: a blade mesh, its texture and a tinted material.
pub fn blade_saber(compression: Compression) -> Vec<u8> {
    FixtureBundle::new()
        .material(1, "BladeMaterial", [0.0, 0.5, 1.0, 1.0])
        .mesh(2, "blade")
        .texture(3, "blade_tex", 4, 4)
        .build(compression)
}
