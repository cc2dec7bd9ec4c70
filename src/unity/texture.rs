//! Texture2D and Sprite decoding to RGBA images.

use image::{RgbaImage, imageops};

use super::{BundleObject, ObjectRef, Result, UnityError, UnityVersion, Value};

/// Pixel formats the decoder understands, keyed by Unity's `TextureFormat` id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    Alpha8,
    Argb4444,
    Rgb24,
    Rgba32,
    Argb32,
    Rgb565,
    R8,
    Bgra32,
    Rgba4444,
    Dxt1,
    Dxt5,
    Bc4,
    Bc5,
    Bc7,
    EtcRgb4,
    EacR,
    EacRg,
    Etc2Rgb,
    Etc2Rgba1,
    Etc2Rgba8,
    /// ASTC with square blocks of the given edge length.
    Astc(usize),
    /// Crunch-compressed DXT or ETC. `legacy` selects the pre-2017.3 codec.
    Crunched { legacy: bool },
}

impl TextureFormat {
    pub fn from_id(id: i64) -> Result<Self> {
        Ok(match id {
            1 => Self::Alpha8,
            2 => Self::Argb4444,
            3 => Self::Rgb24,
            4 => Self::Rgba32,
            5 => Self::Argb32,
            7 => Self::Rgb565,
            10 => Self::Dxt1,
            12 => Self::Dxt5,
            13 => Self::Rgba4444,
            14 => Self::Bgra32,
            26 => Self::Bc4,
            27 => Self::Bc5,
            25 => Self::Bc7,
            28 | 29 | 64 | 65 => Self::Crunched { legacy: false },
            34 | 60 => Self::EtcRgb4,
            41 => Self::EacR,
            43 => Self::EacRg,
            45 => Self::Etc2Rgb,
            46 => Self::Etc2Rgba1,
            47 | 61 => Self::Etc2Rgba8,
            48 | 54 => Self::Astc(4),
            49 | 55 => Self::Astc(5),
            50 | 56 => Self::Astc(6),
            51 | 57 => Self::Astc(8),
            52 | 58 => Self::Astc(10),
            53 | 59 => Self::Astc(12),
            63 => Self::R8,
            other => {
                return Err(UnityError::Unsupported(format!("texture format {other}")));
            }
        })
    }

    /// Bytes needed for the top mip level; `None` when only the codec knows.
    fn level_size(self, width: usize, height: usize) -> Option<usize> {
        let blocks = width.div_ceil(4) * height.div_ceil(4);
        Some(match self {
            Self::Alpha8 | Self::R8 => width * height,
            Self::Argb4444 | Self::Rgba4444 | Self::Rgb565 => width * height * 2,
            Self::Rgb24 => width * height * 3,
            Self::Rgba32 | Self::Argb32 | Self::Bgra32 => width * height * 4,
            Self::Dxt1 | Self::Bc4 | Self::EtcRgb4 | Self::EacR | Self::Etc2Rgb | Self::Etc2Rgba1 => {
                blocks * 8
            }
            Self::Dxt5 | Self::Bc5 | Self::Bc7 | Self::EacRg | Self::Etc2Rgba8 => blocks * 16,
            Self::Astc(edge) => width.div_ceil(edge) * height.div_ceil(edge) * 16,
            Self::Crunched { .. } => return None,
        })
    }
}

/// Crunched DXT textures switched codecs in Unity 2017.3; crunched ETC
/// only ever used the newer one.
const UNITY_CRUNCH_SINCE: UnityVersion = UnityVersion {
    major: 2017,
    minor: 3,
};

/// Decodes a `Texture2D` object into a top-down RGBA image.
pub fn decode_texture(object: &BundleObject<'_>, value: &Value) -> Result<RgbaImage> {
    let width = dimension(value, "m_Width")?;
    let height = dimension(value, "m_Height")?;
    let id = value.i64_field("m_TextureFormat")?;
    let format = match TextureFormat::from_id(id)? {
        TextureFormat::Crunched { .. } => TextureFormat::Crunched {
            legacy: matches!(id, 28 | 29) && object.unity_version() < UNITY_CRUNCH_SINCE,
        },
        format => format,
    };

    let data = match object.streamed(value)? {
        Some(bytes) => bytes,
        None => value.bytes_field("image data")?,
    };
    decode_pixels(format, width, height, data)
}

/// Decodes a `Sprite` by cropping its rectangle out of the atlas texture.
pub fn decode_sprite(object: &BundleObject<'_>, value: &Value) -> Result<RgbaImage> {
    let render_data = value.field("m_RD")?;
    let texture_ref = ObjectRef::from_value(render_data.field("texture")?)
        .ok_or_else(|| UnityError::Malformed("sprite has no texture".to_string()))?;
    let texture_object = object
        .bundle()
        .resolve(object, texture_ref)
        .ok_or_else(|| {
            UnityError::Malformed(format!(
                "sprite texture {} not found in bundle",
                texture_ref.path_id
            ))
        })?;
    let texture = decode_texture(&texture_object, &texture_object.read()?)?;

    let rect = render_data
        .get("textureRect")
        .or_else(|| value.get("m_Rect"))
        .ok_or_else(|| UnityError::MissingField("textureRect".to_string()))?;
    crop(&texture, rect)
}

fn crop(texture: &RgbaImage, rect: &Value) -> Result<RgbaImage> {
    let x = rect.f32_field("x")?.round().max(0.0) as u32;
    let y = rect.f32_field("y")?.round().max(0.0) as u32;
    let w = rect.f32_field("width")?.round().max(0.0) as u32;
    let h = rect.f32_field("height")?.round().max(0.0) as u32;

    let fits = |start: u32, len: u32, limit: u32| start.checked_add(len).is_some_and(|end| end <= limit);
    if w == 0 || h == 0 || !fits(x, w, texture.width()) || !fits(y, h, texture.height()) {
        return Err(UnityError::Malformed(format!(
            "sprite rect {w}x{h}+{x}+{y} outside {}x{} texture",
            texture.width(),
            texture.height()
        )));
    }
    // Unity rects are measured from the bottom edge.
    let top = texture.height() - y - h;
    Ok(imageops::crop_imm(texture, x, top, w, h).to_image())
}

fn dimension(value: &Value, field: &str) -> Result<usize> {
    let raw = value.i64_field(field)?;
    usize::try_from(raw)
        .ok()
        .filter(|v| (1..=16384).contains(v))
        .ok_or_else(|| UnityError::Malformed(format!("{field} = {raw}")))
}

/// Decodes the top mip level of raw texture bytes, flipping rows to top-down.
pub fn decode_pixels(
    format: TextureFormat,
    width: usize,
    height: usize,
    data: &[u8],
) -> Result<RgbaImage> {
    let data = match format.level_size(width, height) {
        Some(needed) if data.len() < needed => {
            return Err(UnityError::UnexpectedEof {
                offset: data.len(),
                wanted: needed,
            });
        }
        Some(needed) => &data[..needed],
        None => data,
    };

    let rgba = match format {
        TextureFormat::Dxt1 => decode_blocks(width, height, data, 8, |block, out| {
            decode_color_block(block, out, true)
        }),
        TextureFormat::Dxt5 => decode_blocks(width, height, data, 16, |block, out| {
            decode_color_block(&block[8..], out, false);
            decode_alpha_block(&block[..8], out);
        }),
        TextureFormat::Bc4 => {
            decode_with(width, height, |px| texture2ddecoder::decode_bc4(data, width, height, px))?
        }
        TextureFormat::Bc5 => {
            decode_with(width, height, |px| texture2ddecoder::decode_bc5(data, width, height, px))?
        }
        TextureFormat::Bc7 => {
            decode_with(width, height, |px| texture2ddecoder::decode_bc7(data, width, height, px))?
        }
        TextureFormat::EtcRgb4 => {
            decode_with(width, height, |px| texture2ddecoder::decode_etc1(data, width, height, px))?
        }
        TextureFormat::EacR => {
            decode_with(width, height, |px| texture2ddecoder::decode_eacr(data, width, height, px))?
        }
        TextureFormat::EacRg => {
            decode_with(width, height, |px| texture2ddecoder::decode_eacrg(data, width, height, px))?
        }
        TextureFormat::Etc2Rgb => decode_with(width, height, |px| {
            texture2ddecoder::decode_etc2_rgb(data, width, height, px)
        })?,
        TextureFormat::Etc2Rgba1 => decode_with(width, height, |px| {
            texture2ddecoder::decode_etc2_rgba1(data, width, height, px)
        })?,
        TextureFormat::Etc2Rgba8 => decode_with(width, height, |px| {
            texture2ddecoder::decode_etc2_rgba8(data, width, height, px)
        })?,
        TextureFormat::Astc(edge) => decode_with(width, height, |px| {
            texture2ddecoder::decode_astc(data, width, height, edge, edge, px)
        })?,
        TextureFormat::Crunched { legacy: true } => decode_with(width, height, |px| {
            texture2ddecoder::decode_crunch(data, width, height, px)
        })?,
        TextureFormat::Crunched { legacy: false } => decode_with(width, height, |px| {
            texture2ddecoder::decode_unity_crunch(data, width, height, px)
        })?,
        _ => data
            .chunks_exact(pixel_size(format))
            .flat_map(|px| convert_pixel(format, px))
            .collect(),
    };

    let image = RgbaImage::from_raw(width as u32, height as u32, rgba)
        .ok_or_else(|| UnityError::Malformed("pixel buffer size mismatch".to_string()))?;
    Ok(imageops::flip_vertical(&image))
}

/// Runs a `texture2ddecoder` codec and converts its packed BGRA words to RGBA bytes.
fn decode_with<F>(width: usize, height: usize, decode: F) -> Result<Vec<u8>>
where
    F: FnOnce(&mut [u32]) -> std::result::Result<(), &'static str>,
{
    let mut pixels = vec![0u32; width * height];
    decode(&mut pixels).map_err(|e| UnityError::Malformed(format!("texture blocks: {e}")))?;
    Ok(pixels
        .into_iter()
        .flat_map(|px| {
            let [b, g, r, a] = px.to_le_bytes();
            [r, g, b, a]
        })
        .collect())
}

fn pixel_size(format: TextureFormat) -> usize {
    match format {
        TextureFormat::Alpha8 | TextureFormat::R8 => 1,
        TextureFormat::Argb4444 | TextureFormat::Rgba4444 | TextureFormat::Rgb565 => 2,
        TextureFormat::Rgb24 => 3,
        _ => 4,
    }
}

fn convert_pixel(format: TextureFormat, px: &[u8]) -> [u8; 4] {
    match format {
        TextureFormat::Alpha8 => [255, 255, 255, px[0]],
        TextureFormat::R8 => [px[0], 0, 0, 255],
        TextureFormat::Rgb24 => [px[0], px[1], px[2], 255],
        TextureFormat::Rgba32 => [px[0], px[1], px[2], px[3]],
        TextureFormat::Argb32 => [px[1], px[2], px[3], px[0]],
        TextureFormat::Bgra32 => [px[2], px[1], px[0], px[3]],
        TextureFormat::Rgb565 => {
            let [r, g, b] = rgb565(u16::from_le_bytes([px[0], px[1]]));
            [r, g, b, 255]
        }
        TextureFormat::Argb4444 => {
            let v = u16::from_le_bytes([px[0], px[1]]);
            nibbles([(v >> 8) & 0xF, (v >> 4) & 0xF, v & 0xF, v >> 12])
        }
        TextureFormat::Rgba4444 => {
            let v = u16::from_le_bytes([px[0], px[1]]);
            nibbles([v >> 12, (v >> 8) & 0xF, (v >> 4) & 0xF, v & 0xF])
        }
        _ => [0, 0, 0, 0],
    }
}

fn nibbles(values: [u16; 4]) -> [u8; 4] {
    values.map(|v| (v as u8) * 17)
}

fn rgb565(v: u16) -> [u8; 3] {
    let r = ((v >> 11) & 0x1F) as u32;
    let g = ((v >> 5) & 0x3F) as u32;
    let b = (v & 0x1F) as u32;
    [
        ((r * 255 + 15) / 31) as u8,
        ((g * 255 + 31) / 63) as u8,
        ((b * 255 + 15) / 31) as u8,
    ]
}

/// Walks 4x4 blocks, handing each block a 16-pixel RGBA scratch buffer.
fn decode_blocks<F>(width: usize, height: usize, data: &[u8], block_size: usize, decode: F) -> Vec<u8>
where
    F: Fn(&[u8], &mut [[u8; 4]; 16]),
{
    let blocks_x = width.div_ceil(4);
    let mut out = vec![0u8; width * height * 4];

    for (index, block) in data.chunks_exact(block_size).enumerate() {
        let bx = (index % blocks_x) * 4;
        let by = (index / blocks_x) * 4;
        let mut pixels = [[0u8; 4]; 16];
        decode(block, &mut pixels);

        for (i, px) in pixels.iter().enumerate() {
            let (x, y) = (bx + i % 4, by + i / 4);
            if x < width && y < height {
                let at = (y * width + x) * 4;
                out[at..at + 4].copy_from_slice(px);
            }
        }
    }
    out
}

fn decode_color_block(block: &[u8], out: &mut [[u8; 4]; 16], allow_transparent: bool) {
    let c0 = u16::from_le_bytes([block[0], block[1]]);
    let c1 = u16::from_le_bytes([block[2], block[3]]);
    let [r0, g0, b0] = rgb565(c0).map(u16::from);
    let [r1, g1, b1] = rgb565(c1).map(u16::from);

    let mix = |a: u16, b: u16, wa: u16, wb: u16, d: u16| ((a * wa + b * wb) / d) as u8;
    let mut palette = [
        [r0 as u8, g0 as u8, b0 as u8, 255],
        [r1 as u8, g1 as u8, b1 as u8, 255],
        [0, 0, 0, 255],
        [0, 0, 0, 255],
    ];
    if c0 > c1 || !allow_transparent {
        palette[2] = [mix(r0, r1, 2, 1, 3), mix(g0, g1, 2, 1, 3), mix(b0, b1, 2, 1, 3), 255];
        palette[3] = [mix(r0, r1, 1, 2, 3), mix(g0, g1, 1, 2, 3), mix(b0, b1, 1, 2, 3), 255];
    } else {
        palette[2] = [mix(r0, r1, 1, 1, 2), mix(g0, g1, 1, 1, 2), mix(b0, b1, 1, 1, 2), 255];
        palette[3] = [0, 0, 0, 0];
    }

    let indices = u32::from_le_bytes([block[4], block[5], block[6], block[7]]);
    for (i, px) in out.iter_mut().enumerate() {
        let alpha = px[3];
        *px = palette[((indices >> (2 * i)) & 0b11) as usize];
        if !allow_transparent {
            px[3] = alpha;
        }
    }
}

fn decode_alpha_block(block: &[u8], out: &mut [[u8; 4]; 16]) {
    let a0 = u16::from(block[0]);
    let a1 = u16::from(block[1]);
    let mut alphas = [a0 as u8, a1 as u8, 0, 0, 0, 0, 0, 0];
    if a0 > a1 {
        for i in 1..7u16 {
            alphas[i as usize + 1] = (((7 - i) * a0 + i * a1) / 7) as u8;
        }
    } else {
        for i in 1..5u16 {
            alphas[i as usize + 1] = (((5 - i) * a0 + i * a1) / 5) as u8;
        }
        alphas[6] = 0;
        alphas[7] = 255;
    }

    let mut bits = 0u64;
    for (i, byte) in block[2..8].iter().enumerate() {
        bits |= u64::from(*byte) << (8 * i);
    }
    for (i, px) in out.iter_mut().enumerate() {
        px[3] = alphas[((bits >> (3 * i)) & 0b111) as usize];
    }
}
