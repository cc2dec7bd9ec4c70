use std::collections::HashSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use image::ImageFormat;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ConverterConfig;
use crate::services::packaging::package_directory;
use crate::services::preset::{Color, PresetAsset, PresetBuilder};
use crate::unity::mesh::MeshGeometry;
use crate::unity::{AssetBundle, BundleObject, ObjectKind, UnityError, Value, texture};
use crate::utils::validation::sanitize_asset_name;

pub const PRESETS_DIR: &str = "Presets";
pub const GEOMETRY_DIR: &str = "CustomGeometry";
pub const TEXTURES_DIR: &str = "CustomTextures";

const DEFAULT_SABER_NAME: &str = "saber";

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to parse bundle: {0}")]
    ParseFailure(String),

    #[error("Packaging failed: {0}")]
    PackagingFailure(String),
}

impl ConversionError {
    /// Stable machine-readable name, used in error response bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::ParseFailure(_) => "parse_failure",
            Self::PackagingFailure(_) => "packaging_failure",
        }
    }
}

impl From<UnityError> for ConversionError {
    fn from(e: UnityError) -> Self {
        match e {
            UnityError::Unsupported(reason) => Self::UnsupportedFormat(reason),
            other => Self::ParseFailure(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ConversionError {
    fn from(e: std::io::Error) -> Self {
        Self::PackagingFailure(e.to_string())
    }
}

impl From<zip::result::ZipError> for ConversionError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::PackagingFailure(e.to_string())
    }
}

impl From<serde_json::Error> for ConversionError {
    fn from(e: serde_json::Error) -> Self {
        Self::PackagingFailure(format!("preset serialization: {e}"))
    }
}

/// What a successful conversion produced.
#[derive(Debug, Clone)]
pub struct ConversionOutcome {
    pub saber_name: String,
    pub archive_path: PathBuf,
    /// Archive-relative path of the preset, e.g. `Presets/MySaber.json`.
    pub preset_file: String,
    pub meshes: Vec<String>,
    pub textures: Vec<String>,
}

/// Hands out collision-free file stems within one output folder.
#[derive(Debug, Default)]
pub struct AssetNamer {
    taken: HashSet<String>,
}

impl AssetNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `raw` reduced to safe characters; `<fallback>_<path id>` when nothing
    /// is left, and `_<path id>` appended when the name is already taken.
    pub fn assign(&mut self, raw: &str, fallback: &str, path_id: i64) -> String {
        let mut name = sanitize_asset_name(raw);
        if name.is_empty() {
            name = format!("{fallback}_{path_id}");
        }
        if self.taken.contains(&name) {
            name = format!("{name}_{path_id}");
        }
        let mut unique = name.clone();
        let mut n = 2;
        while self.taken.contains(&unique) {
            unique = format!("{name}_{n}");
            n += 1;
        }
        self.taken.insert(unique.clone());
        unique
    }
}

struct ExtractedAsset {
    file_name: String,
    source_name: String,
    bytes: Vec<u8>,
}

impl ExtractedAsset {
    fn as_preset_asset(&self) -> PresetAsset<'_> {
        PresetAsset {
            file_name: &self.file_name,
            source_name: &self.source_name,
            bytes: &self.bytes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversionPipeline {
    mod_version: String,
    embed_binary_assets: bool,
}

impl ConversionPipeline {
    pub fn new(config: &ConverterConfig) -> Self {
        Self {
            mod_version: config.mod_version.clone(),
            embed_binary_assets: config.embed_binary_assets,
        }
    }

    /// Converts the bundle at `bundle_path`, staging the ReeSabers folder
    /// layout in `staging_dir` and zipping it to `archive_path`.
    ///
    /// Blocking; run it off the async runtime.
    pub fn convert(
        &self,
        bundle_path: &Path,
        saber_name: &str,
        staging_dir: &Path,
        archive_path: &Path,
    ) -> Result<ConversionOutcome, ConversionError> {
        let saber_name = match sanitize_asset_name(saber_name) {
            name if name.is_empty() => DEFAULT_SABER_NAME.to_string(),
            name => name,
        };

        if !bundle_path.is_file() {
            return Err(ConversionError::InvalidInput(format!(
                "bundle '{}' does not exist",
                bundle_path.display()
            )));
        }
        let bundle = AssetBundle::open(bundle_path)?;
        let header = bundle.header();
        info!(
            "📦 Opened bundle '{}' (UnityFS v{}, {})",
            saber_name, header.format_version, header.unity_revision
        );

        let meshes = extract_meshes(&bundle);
        // Sprites land in the texture folder, so they share its names.
        let mut texture_names = AssetNamer::new();
        let mut textures = extract_textures(&bundle, &mut texture_names);
        textures.extend(extract_sprites(&bundle, &mut texture_names));

        info!(
            "🔍 Extracted {} mesh(es) and {} texture(s)",
            meshes.len(),
            textures.len()
        );
        if meshes.is_empty() && textures.is_empty() {
            return Err(ConversionError::UnsupportedFormat(
                "no meshes or textures could be extracted from the bundle".to_string(),
            ));
        }
        if meshes.is_empty() {
            warn!("No meshes extracted; the preset will only contain a trail");
        }

        let model_color = find_model_color(&bundle).unwrap_or(Color::WHITE);

        write_assets(&staging_dir.join(GEOMETRY_DIR), &meshes)?;
        write_assets(&staging_dir.join(TEXTURES_DIR), &textures)?;

        let mesh_refs: Vec<_> = meshes.iter().map(ExtractedAsset::as_preset_asset).collect();
        let texture_refs: Vec<_> = textures.iter().map(ExtractedAsset::as_preset_asset).collect();
        let preset = PresetBuilder::new(self.mod_version.clone())
            .embed_assets(self.embed_binary_assets)
            .model_color(model_color)
            .build(&mesh_refs, &texture_refs);

        let presets_dir = staging_dir.join(PRESETS_DIR);
        std::fs::create_dir_all(&presets_dir)?;
        let preset_name = format!("{saber_name}.json");
        std::fs::write(presets_dir.join(&preset_name), preset.to_json()?)?;

        let entries = package_directory(staging_dir, archive_path)?;
        info!("🗜️  Packaged {} file(s) into archive", entries);

        Ok(ConversionOutcome {
            saber_name,
            archive_path: archive_path.to_path_buf(),
            preset_file: format!("{PRESETS_DIR}/{preset_name}"),
            meshes: meshes.into_iter().map(|m| m.file_name).collect(),
            textures: textures.into_iter().map(|t| t.file_name).collect(),
        })
    }
}

fn write_assets(dir: &Path, assets: &[ExtractedAsset]) -> Result<(), ConversionError> {
    if assets.is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(dir)?;
    for asset in assets {
        std::fs::write(dir.join(&asset.file_name), &asset.bytes)?;
    }
    Ok(())
}

/// Runs `extract` on every object of `kind`, logging and skipping failures.
fn extract_each<F>(bundle: &AssetBundle, kind: ObjectKind, mut extract: F) -> Vec<ExtractedAsset>
where
    F: FnMut(&BundleObject<'_>, &Value) -> anyhow::Result<Option<ExtractedAsset>>,
{
    let mut out = Vec::new();
    for object in bundle.objects().filter(|o| o.kind() == kind) {
        let result = object
            .read()
            .map_err(anyhow::Error::from)
            .and_then(|value| extract(&object, &value));
        match result {
            Ok(Some(asset)) => {
                debug!(
                    "Extracted {} '{}' ({} bytes)",
                    kind.label(),
                    asset.file_name,
                    asset.bytes.len()
                );
                out.push(asset);
            }
            Ok(None) => {}
            Err(e) => warn!(
                "Skipping {} with path id {}: {:#}",
                kind.label(),
                object.path_id(),
                e
            ),
        }
    }
    out
}

fn object_name(value: &Value) -> String {
    value
        .get("m_Name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn extract_meshes(bundle: &AssetBundle) -> Vec<ExtractedAsset> {
    let mut namer = AssetNamer::new();
    extract_each(bundle, ObjectKind::Mesh, |object, value| {
        let mut geometry = MeshGeometry::read(object, value)?;
        let source_name = geometry.name.clone();
        if geometry.is_empty() {
            warn!("Empty mesh export for '{}', skipping", source_name);
            return Ok(None);
        }
        let stem = namer.assign(&source_name, "mesh", object.path_id());
        geometry.name = stem.clone();
        Ok(Some(ExtractedAsset {
            file_name: format!("{stem}.obj"),
            source_name,
            bytes: geometry.to_obj().into_bytes(),
        }))
    })
}

fn extract_textures(bundle: &AssetBundle, namer: &mut AssetNamer) -> Vec<ExtractedAsset> {
    extract_each(bundle, ObjectKind::Texture2D, |object, value| {
        let image = texture::decode_texture(object, value)?;
        let source_name = object_name(value);
        let stem = namer.assign(&source_name, "texture", object.path_id());
        Ok(Some(ExtractedAsset {
            file_name: format!("{stem}.png"),
            source_name,
            bytes: encode_png(&image)?,
        }))
    })
}

fn extract_sprites(bundle: &AssetBundle, namer: &mut AssetNamer) -> Vec<ExtractedAsset> {
    extract_each(bundle, ObjectKind::Sprite, |object, value| {
        let image = texture::decode_sprite(object, value)?;
        let source_name = object_name(value);
        let stem = namer.assign(&source_name, "sprite", object.path_id());
        Ok(Some(ExtractedAsset {
            file_name: format!("{stem}.png"),
            source_name,
            bytes: encode_png(&image)?,
        }))
    })
}

fn encode_png(image: &image::RgbaImage) -> anyhow::Result<Vec<u8>> {
    let mut out = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(|e| anyhow!("Failed to encode PNG: {}", e))?;
    Ok(out)
}

/// First `_Color` found in any material's saved properties.
fn find_model_color(bundle: &AssetBundle) -> Option<Color> {
    bundle
        .objects()
        .filter(|o| o.kind() == ObjectKind::Material)
        .find_map(|material| {
            let value = match material.read() {
                Ok(value) => value,
                Err(e) => {
                    debug!("Ignoring material {}: {}", material.path_id(), e);
                    return None;
                }
            };
            material_color(&value, "_Color")
        })
}

fn material_color(material: &Value, property: &str) -> Option<Color> {
    let colors = material.get("m_SavedProperties")?.get("m_Colors")?.as_array()?;
    colors.iter().find_map(|entry| {
        let key = entry.get("first")?;
        // FastPropertyName is a bare string on newer versions, `{ name }` on older ones
        let key = key.as_str().or_else(|| key.get("name")?.as_str())?;
        if key != property {
            return None;
        }
        let color = entry.get("second")?;
        Some(Color {
            r: color.get("r")?.as_f32()?,
            g: color.get("g")?.as_f32()?,
            b: color.get("b")?.as_f32()?,
            a: color.get("a")?.as_f32()?,
        })
    })
}
