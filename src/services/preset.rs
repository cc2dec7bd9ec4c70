//! ReeSabers preset document.
//!
//! Field names and default values follow what the ReeSabers mod writes for a
//! fresh preset; only asset ids, model tint and module names vary per saber.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

pub const TRAIL_MODULE_ID: &str = "reezonate.simple-trail";
pub const CUSTOM_MODEL_MODULE_ID: &str = "reezonate.custom-model";

const HILT_KEYWORDS: &[&str] = &["hilt", "handle", "grip", "guard", "pommel", "emitter"];
const BLADE_KEYWORDS: &[&str] = &["blade", "beam", "glow", "laser"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Self = Self {
        r: 1.0,
        g: 1.0,
        b: 1.0,
        a: 1.0,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec4 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3 {
                x: 0.0,
                y: 0.0,
                z: 0.0,
            },
            rotation: Vec3 {
                x: 0.0,
                y: 0.0,
                z: 0.0,
            },
            scale: Vec3 {
                x: 1.0,
                y: 1.0,
                z: 1.0,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPoint<T> {
    pub time: f32,
    pub value: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Curve<T> {
    pub interpolation_type: u8,
    pub control_points: Vec<ControlPoint<T>>,
}

impl<T> Curve<T> {
    fn constant(value: T) -> Self {
        Self {
            interpolation_type: 0,
            control_points: vec![ControlPoint { time: 0.0, value }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueMapping {
    pub color_over_value: Curve<Color>,
    pub alpha_over_value: Curve<f32>,
    pub scale_over_value: Curve<f32>,
    pub value_from: f32,
    pub value_to: f32,
}

impl Default for ValueMapping {
    fn default() -> Self {
        Self {
            color_over_value: Curve::constant(Color::WHITE),
            alpha_over_value: Curve::constant(1.0),
            scale_over_value: Curve::constant(1.0),
            value_from: 0.0,
            value_to: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnimationLayout {
    pub total_frames: u32,
    pub frames_per_row: u32,
    pub frames_per_column: u32,
    pub frame_duration: f32,
}

impl Default for AnimationLayout {
    fn default() -> Self {
        Self {
            total_frames: 1,
            frames_per_row: 1,
            frames_per_column: 1,
            frame_duration: 1.0,
        }
    }
}

const DEFAULT_TILING: Vec4 = Vec4 {
    x: 1.0,
    y: 1.0,
    z: 0.0,
    w: 0.0,
};

const NO_SCROLL: Vec2 = Vec2 { x: 0.0, y: 0.0 };

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorOverride {
    #[serde(rename = "type")]
    pub kind: u8,
    pub hue: f32,
    pub saturation: f32,
    pub value: f32,
    pub hue_shift_per_second: f32,
    pub fake_glow_multiplier: f32,
    pub color_source: u8,
}

impl Default for ColorOverride {
    fn default() -> Self {
        Self {
            kind: 0,
            hue: 0.0,
            saturation: 1.0,
            value: 1.0,
            hue_shift_per_second: 0.0,
            fake_glow_multiplier: 1.0,
            color_source: 0,
        }
    }
}

// --- Trail module ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrailMeshSettings {
    pub trail_length: f32,
    pub horizontal_resolution: u32,
    pub vertical_resolution: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailGeneralSettings {
    pub custom_texture_id: String,
    pub opacity_texture_id: String,
    pub animation_layout: AnimationLayout,
    pub tiling_layout: Vec4,
    pub uv_scroll: Vec2,
    pub blending_mode: u8,
    pub always_on_top: bool,
    pub render_queue: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailMaskSettings {
    pub main_mask_resolution: u32,
    pub drivers_mask_resolution: u32,
    pub length_mappings: ValueMapping,
    pub width_mappings: ValueMapping,
    pub drivers_sample_mode: u8,
    pub viewing_angle_mappings: ValueMapping,
    pub surface_angle_mappings: ValueMapping,
    pub drivers: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailMaterialSettings {
    pub trail_type: u8,
    pub material_type: u8,
    pub mapping_type: u8,
    pub offset: f32,
    pub width: f32,
    pub distortion_multiplier: f32,
    pub general_settings: TrailGeneralSettings,
    pub mask_settings: TrailMaskSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrailConfig {
    pub mesh_settings: TrailMeshSettings,
    pub material_settings: TrailMaterialSettings,
    pub enabled: bool,
    pub name: String,
    pub local_transform: Transform,
    pub force_color_override: bool,
    pub color_override: ColorOverride,
}

impl TrailConfig {
    pub fn new(texture_id: &str) -> Self {
        Self {
            mesh_settings: TrailMeshSettings {
                trail_length: 0.3,
                horizontal_resolution: 4,
                vertical_resolution: 60,
            },
            material_settings: TrailMaterialSettings {
                trail_type: 0,
                material_type: 0,
                mapping_type: 0,
                offset: 1.0,
                width: 0.03,
                distortion_multiplier: 1.0,
                general_settings: TrailGeneralSettings {
                    custom_texture_id: texture_id.to_string(),
                    opacity_texture_id: texture_id.to_string(),
                    animation_layout: AnimationLayout::default(),
                    tiling_layout: DEFAULT_TILING,
                    uv_scroll: NO_SCROLL,
                    blending_mode: 0,
                    always_on_top: false,
                    render_queue: 3000,
                },
                mask_settings: TrailMaskSettings {
                    main_mask_resolution: 128,
                    drivers_mask_resolution: 32,
                    length_mappings: ValueMapping::default(),
                    width_mappings: ValueMapping::default(),
                    drivers_sample_mode: 0,
                    viewing_angle_mappings: ValueMapping::default(),
                    surface_angle_mappings: ValueMapping::default(),
                    drivers: Vec::new(),
                },
            },
            enabled: true,
            name: "Trail".to_string(),
            local_transform: Transform::default(),
            force_color_override: false,
            color_override: ColorOverride::default(),
        }
    }
}

// --- Custom model module ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMeshSettings {
    pub model_id: String,
    pub scale: f32,
    pub flip_normals: bool,
    pub mirror_x: bool,
    pub mirror_y: bool,
    pub mirror_z: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMaskSettings {
    pub drivers_mask_resolution: u32,
    pub drivers_sample_mode: u8,
    pub viewing_angle_mappings: ValueMapping,
    pub surface_angle_mappings: ValueMapping,
    pub drivers: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMaterialSettings {
    pub color: Color,
    pub reflection_color: Color,
    pub env_light_color: Color,
    pub opacity: f32,
    pub fresnel_power: f32,
    pub metallic: f32,
    pub roughness: f32,
    pub env_light_intensity: f32,
    pub reflection_intensity: f32,
    pub normal_map_intensity: f32,
    pub scene_reflections: bool,
    pub scene_lights: bool,
    pub render_queue: u32,
    pub cull_mode: u8,
    pub depth_write: bool,
    pub mask_settings: ModelMaskSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelTexturesSettings {
    pub animation_layout: AnimationLayout,
    pub tiling_layout: Vec4,
    pub uv_scroll: Vec2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModelConfig {
    pub mesh_settings: ModelMeshSettings,
    pub material_settings: ModelMaterialSettings,
    pub textures_settings: ModelTexturesSettings,
    pub enabled: bool,
    pub name: String,
    pub local_transform: Transform,
    pub force_color_override: bool,
    pub color_override: ColorOverride,
}

impl ModelConfig {
    pub fn new(model_id: &str, role: MeshRole, color: Color) -> Self {
        Self {
            mesh_settings: ModelMeshSettings {
                model_id: model_id.to_string(),
                scale: 1.0,
                flip_normals: false,
                mirror_x: false,
                mirror_y: false,
                mirror_z: false,
            },
            material_settings: ModelMaterialSettings {
                color,
                reflection_color: Color::WHITE,
                env_light_color: Color::WHITE,
                opacity: 1.0,
                fresnel_power: 5.0,
                metallic: 0.0,
                roughness: 0.0,
                env_light_intensity: 1.0,
                reflection_intensity: 1.0,
                normal_map_intensity: 1.0,
                scene_reflections: false,
                scene_lights: false,
                render_queue: 2990,
                cull_mode: 0,
                depth_write: true,
                mask_settings: ModelMaskSettings {
                    drivers_mask_resolution: 32,
                    drivers_sample_mode: 0,
                    viewing_angle_mappings: ValueMapping::default(),
                    surface_angle_mappings: ValueMapping::default(),
                    drivers: Vec::new(),
                },
            },
            textures_settings: ModelTexturesSettings {
                animation_layout: AnimationLayout::default(),
                tiling_layout: DEFAULT_TILING,
                uv_scroll: NO_SCROLL,
            },
            enabled: true,
            name: role.label().to_string(),
            local_transform: Transform::default(),
            force_color_override: false,
            color_override: ColorOverride::default(),
        }
    }
}

// --- Document ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModuleConfig {
    Trail(Box<TrailConfig>),
    CustomModel(Box<ModelConfig>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Module {
    pub module_id: String,
    pub version: u32,
    pub config: ModuleConfig,
    pub children: Vec<Module>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RootSettings {
    #[serde(rename = "Type")]
    pub kind: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BinaryAsset {
    pub asset_name: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BinaryAssets {
    pub textures: Vec<BinaryAsset>,
    pub geometry: Vec<BinaryAsset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Preset {
    pub mod_version: String,
    pub version: u32,
    pub root_settings: RootSettings,
    pub local_transform: Transform,
    pub modules: Vec<Module>,
    pub binary_assets: BinaryAssets,
}

impl Preset {
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    /// Every file name the preset points at, in document order.
    pub fn referenced_assets(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .binary_assets
            .geometry
            .iter()
            .chain(&self.binary_assets.textures)
            .map(|asset| asset.asset_name.as_str())
            .collect();
        for module in &self.modules {
            match &module.config {
                ModuleConfig::Trail(trail) => {
                    let general = &trail.material_settings.general_settings;
                    for id in [&general.custom_texture_id, &general.opacity_texture_id] {
                        if !id.is_empty() {
                            names.push(id);
                        }
                    }
                }
                ModuleConfig::CustomModel(model) => names.push(&model.mesh_settings.model_id),
            }
        }
        names
    }
}

/// Which part of the saber a mesh most likely is, judged by its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshRole {
    Hilt,
    Blade,
}

impl MeshRole {
    pub fn from_name(name: &str) -> Self {
        let name = name.to_lowercase();
        if HILT_KEYWORDS.iter().any(|k| name.contains(k)) {
            Self::Hilt
        } else if BLADE_KEYWORDS.iter().any(|k| name.contains(k)) {
            Self::Blade
        } else {
            Self::Hilt
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Hilt => "Hilt",
            Self::Blade => "Blade",
        }
    }
}

/// An extracted file as the preset sees it.
#[derive(Debug, Clone)]
pub struct PresetAsset<'a> {
    pub file_name: &'a str,
    pub source_name: &'a str,
    pub bytes: &'a [u8],
}

#[derive(Debug, Clone)]
pub struct PresetBuilder {
    mod_version: String,
    embed_assets: bool,
    model_color: Color,
}

impl PresetBuilder {
    pub fn new(mod_version: impl Into<String>) -> Self {
        Self {
            mod_version: mod_version.into(),
            embed_assets: true,
            model_color: Color::WHITE,
        }
    }

    pub fn embed_assets(mut self, embed: bool) -> Self {
        self.embed_assets = embed;
        self
    }

    pub fn model_color(mut self, color: Color) -> Self {
        self.model_color = color;
        self
    }

    /// One trail module textured with the first texture, then one custom
    /// model module per mesh.
    pub fn build(&self, meshes: &[PresetAsset<'_>], textures: &[PresetAsset<'_>]) -> Preset {
        let trail_texture = textures.first().map(|t| t.file_name).unwrap_or("");

        let mut modules = vec![Module {
            module_id: TRAIL_MODULE_ID.to_string(),
            version: 1,
            config: ModuleConfig::Trail(Box::new(TrailConfig::new(trail_texture))),
            children: Vec::new(),
        }];
        modules.extend(meshes.iter().map(|mesh| Module {
            module_id: CUSTOM_MODEL_MODULE_ID.to_string(),
            version: 1,
            config: ModuleConfig::CustomModel(Box::new(ModelConfig::new(
                mesh.file_name,
                MeshRole::from_name(mesh.source_name),
                self.model_color,
            ))),
            children: Vec::new(),
        }));

        Preset {
            mod_version: self.mod_version.clone(),
            version: 1,
            root_settings: RootSettings { kind: 0 },
            local_transform: Transform::default(),
            modules,
            binary_assets: BinaryAssets {
                textures: textures.iter().map(|a| self.binary_asset(a)).collect(),
                geometry: meshes.iter().map(|a| self.binary_asset(a)).collect(),
            },
        }
    }

    fn binary_asset(&self, asset: &PresetAsset<'_>) -> BinaryAsset {
        BinaryAsset {
            asset_name: asset.file_name.to_string(),
            data: if self.embed_assets {
                STANDARD.encode(asset.bytes)
            } else {
                String::new()
            },
        }
    }
}
