use std::env;
use std::path::PathBuf;

/// Runtime configuration for the converter service
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    /// Maximum upload size in bytes (default: 64 MB)
    pub max_file_size: usize,

    /// Directory under which per-request workspaces are created
    /// (default: `<system temp>/saber-converter`)
    pub temp_root: PathBuf,

    /// ReeSabers version written into presets (default: "0.3.17")
    pub mod_version: String,

    /// Embed base64 asset copies in the preset's BinaryAssets (default: true)
    pub embed_binary_assets: bool,

    /// Origins allowed by CORS; empty means any origin
    pub allowed_origins: Vec<String>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            max_file_size: 64 * 1024 * 1024, // 64 MB
            temp_root: env::temp_dir().join("saber-converter"),
            mod_version: "0.3.17".to_string(),
            embed_binary_assets: true,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

impl ConverterConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            temp_root: env::var("CONVERTER_TEMP_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(default.temp_root),

            mod_version: env::var("REESABERS_MOD_VERSION").unwrap_or(default.mod_version),

            embed_binary_assets: env::var("EMBED_BINARY_ASSETS")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(default.embed_binary_assets),

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .map(|v| parse_origins(&v))
                .unwrap_or(default.allowed_origins),
        }
    }

    /// Create config for development (any origin, small presets)
    pub fn development() -> Self {
        Self {
            embed_binary_assets: false,
            allowed_origins: Vec::new(),
            ..Self::default()
        }
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty() && *o != "*")
        .map(str::to_string)
        .collect()
}
