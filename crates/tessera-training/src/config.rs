use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// The closed set of model families the backend can train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Flux,
    Sdxl,
    Sd15,
}

impl ModelType {
    pub const ALL: [ModelType; 3] = [ModelType::Flux, ModelType::Sdxl, ModelType::Sd15];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flux => "flux",
            Self::Sdxl => "sdxl",
            Self::Sd15 => "sd15",
        }
    }

    /// Entry-point script inside the backend scripts directory.
    #[must_use]
    pub fn script_name(self) -> &'static str {
        match self {
            Self::Flux => "flux_train_network.py",
            Self::Sdxl => "sdxl_train_network.py",
            Self::Sd15 => "train_network.py",
        }
    }

    /// Python module path of the LoRA network implementation for this family.
    #[must_use]
    pub fn network_module(self) -> &'static str {
        match self {
            Self::Flux => "networks.lora_flux",
            Self::Sdxl | Self::Sd15 => "networks.lora",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flux" => Ok(Self::Flux),
            "sdxl" => Ok(Self::Sdxl),
            "sd15" | "sd1.5" => Ok(Self::Sd15),
            other => Err(TrainingError::UnsupportedModelType(other.to_string())),
        }
    }
}

/// Training resolution: either a square edge (`1024`) or `width,height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Square(u32),
    Rect { width: u32, height: u32 },
}

impl Resolution {
    /// Value passed to `--resolution`.
    #[must_use]
    pub fn to_arg(self) -> String {
        match self {
            Self::Square(edge) => edge.to_string(),
            Self::Rect { width, height } => format!("{width},{height}"),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_arg())
    }
}

impl FromStr for Resolution {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_edge = |part: &str| -> TrainingResult<u32> {
            let edge: u32 = part
                .trim()
                .parse()
                .map_err(|_| TrainingError::validation(format!("invalid resolution '{s}'")))?;
            if edge == 0 {
                return Err(TrainingError::validation(format!("resolution must be > 0, got '{s}'")));
            }
            Ok(edge)
        };

        match s.split_once(',') {
            Some((w, h)) => Ok(Self::Rect { width: parse_edge(w)?, height: parse_edge(h)? }),
            None => Ok(Self::Square(parse_edge(s)?)),
        }
    }
}

impl Serialize for Resolution {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Square(edge) => serializer.serialize_u32(*edge),
            Self::Rect { .. } => serializer.serialize_str(&self.to_arg()),
        }
    }
}

impl<'de> Deserialize<'de> for Resolution {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Edge(u32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Edge(0) => Err(serde::de::Error::custom("resolution must be > 0")),
            Raw::Edge(edge) => Ok(Self::Square(edge)),
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Model component paths, one variant per supported family.
///
/// Each family names exactly the components its entry point understands, so a Flux
/// autoencoder can never be handed to an SDXL script and vice versa.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model_type", rename_all = "lowercase")]
pub enum ModelFamily {
    Flux {
        clip_l: PathBuf,
        t5xxl: PathBuf,
        ae: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        guidance_scale: Option<f32>,
    },
    Sdxl {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        vae: Option<PathBuf>,
    },
    Sd15 {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        vae: Option<PathBuf>,
        #[serde(default)]
        v2: bool,
    },
}

impl ModelFamily {
    #[must_use]
    pub fn model_type(&self) -> ModelType {
        match self {
            Self::Flux { .. } => ModelType::Flux,
            Self::Sdxl { .. } => ModelType::Sdxl,
            Self::Sd15 { .. } => ModelType::Sd15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparams {
    pub learning_rate: f64,
    pub max_train_epochs: u32,
    #[serde(default = "default_network_dim")]
    pub network_dim: u32,
    #[serde(default = "default_network_alpha")]
    pub network_alpha: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_every_n_epochs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_network_dim() -> u32 {
    16
}

fn default_network_alpha() -> f32 {
    16.0
}

impl Hyperparams {
    pub fn validate(&self) -> TrainingResult<()> {
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(TrainingError::validation("learning_rate must be > 0"));
        }
        if self.max_train_epochs == 0 {
            return Err(TrainingError::validation("max_train_epochs must be >= 1"));
        }
        if self.network_dim == 0 {
            return Err(TrainingError::validation("network_dim must be >= 1"));
        }
        if !self.network_alpha.is_finite() || self.network_alpha <= 0.0 {
            return Err(TrainingError::validation("network_alpha must be > 0"));
        }
        if self.save_every_n_epochs == Some(0) {
            return Err(TrainingError::validation("save_every_n_epochs must be >= 1"));
        }
        Ok(())
    }
}

/// A fully described LoRA training request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(flatten)]
    pub model: ModelFamily,
    pub pretrained_model: PathBuf,
    pub train_data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub output_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vram_preset: Option<String>,
    #[serde(default = "default_caption_extension")]
    pub caption_extension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_prompts: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_every_n_epochs: Option<u32>,
    pub hyperparams: Hyperparams,
}

fn default_caption_extension() -> String {
    ".txt".to_string()
}

impl TrainingConfig {
    #[must_use]
    pub fn model_type(&self) -> ModelType {
        self.model.model_type()
    }

    /// Parse a JSON job description, rejecting unknown model types before field decoding.
    pub fn from_json_str(s: &str) -> TrainingResult<Self> {
        let value: serde_json::Value = serde_json::from_str(s)?;
        let model_type = value.get("model_type").and_then(serde_json::Value::as_str);
        check_model_type(model_type)?;
        serde_json::from_value(value).map_err(|e| TrainingError::validation(e.to_string()))
    }

    /// Parse a TOML job description, rejecting unknown model types before field decoding.
    pub fn from_toml_str(s: &str) -> TrainingResult<Self> {
        let value: toml::Value =
            toml::from_str(s).map_err(|e| TrainingError::validation(e.to_string()))?;
        let model_type = value.get("model_type").and_then(toml::Value::as_str);
        check_model_type(model_type)?;
        value.try_into().map_err(|e: toml::de::Error| TrainingError::validation(e.to_string()))
    }

    /// Load a job file, choosing the format from its extension (`.json`, otherwise TOML).
    pub fn load(path: &Path) -> TrainingResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&contents),
            _ => Self::from_toml_str(&contents),
        }
    }

    /// Field-level checks that do not depend on the chosen preset.
    pub fn validate(&self) -> TrainingResult<()> {
        if self.resolution.is_none() {
            return Err(TrainingError::validation("resolution is required"));
        }
        require_path("pretrained_model", &self.pretrained_model)?;
        require_path("train_data_dir", &self.train_data_dir)?;
        require_path("output_dir", &self.output_dir)?;
        if self.output_name.trim().is_empty() {
            return Err(TrainingError::validation("output_name is required"));
        }
        if !self.caption_extension.starts_with('.') || self.caption_extension.len() < 2 {
            return Err(TrainingError::validation(format!(
                "caption_extension must look like '.txt', got '{}'",
                self.caption_extension
            )));
        }
        if let ModelFamily::Flux { clip_l, t5xxl, ae, .. } = &self.model {
            require_path("clip_l", clip_l)?;
            require_path("t5xxl", t5xxl)?;
            require_path("ae", ae)?;
        }
        if self.sample_every_n_epochs.is_some() && self.sample_prompts.is_none() {
            return Err(TrainingError::validation("sample_every_n_epochs requires sample_prompts"));
        }
        self.hyperparams.validate()
    }
}

fn check_model_type(raw: Option<&str>) -> TrainingResult<ModelType> {
    let raw = raw.ok_or_else(|| TrainingError::validation("model_type is required"))?;
    raw.parse()
}

fn require_path(field: &str, path: &Path) -> TrainingResult<()> {
    if path.as_os_str().is_empty() {
        return Err(TrainingError::validation(format!("{field} is required")));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn flux_config() -> TrainingConfig {
        TrainingConfig {
            model: ModelFamily::Flux {
                clip_l: PathBuf::from("/models/clip_l.safetensors"),
                t5xxl: PathBuf::from("/models/t5xxl_fp16.safetensors"),
                ae: PathBuf::from("/models/ae.safetensors"),
                guidance_scale: None,
            },
            pretrained_model: PathBuf::from("/models/flux1-dev.safetensors"),
            train_data_dir: PathBuf::from("/data/subject"),
            output_dir: PathBuf::from("/out"),
            output_name: "subject-lora".to_string(),
            resolution: Some(Resolution::Rect { width: 1024, height: 1024 }),
            vram_preset: Some("Low VRAM (12GB)".to_string()),
            caption_extension: ".txt".to_string(),
            sample_prompts: None,
            sample_every_n_epochs: None,
            hyperparams: Hyperparams {
                learning_rate: 1e-4,
                max_train_epochs: 10,
                network_dim: 16,
                network_alpha: 16.0,
                save_every_n_epochs: Some(2),
                seed: Some(42),
            },
        }
    }

    pub(crate) fn sdxl_config() -> TrainingConfig {
        TrainingConfig {
            model: ModelFamily::Sdxl { vae: Some(PathBuf::from("/models/sdxl_vae.safetensors")) },
            pretrained_model: PathBuf::from("/models/sd_xl_base_1.0.safetensors"),
            vram_preset: Some("Medium VRAM (16GB)".to_string()),
            ..flux_config()
        }
    }

    #[test]
    fn test_resolution_parsing() {
        assert_eq!("1024".parse::<Resolution>().unwrap(), Resolution::Square(1024));
        assert_eq!(
            "1024, 768".parse::<Resolution>().unwrap(),
            Resolution::Rect { width: 1024, height: 768 }
        );
        assert!("0".parse::<Resolution>().is_err());
        assert!("big".parse::<Resolution>().is_err());
        assert!("1024,".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_model_type_rejects_unknown() {
        assert_eq!("FLUX".parse::<ModelType>().unwrap(), ModelType::Flux);
        let err = "sd3".parse::<ModelType>().unwrap_err();
        assert!(matches!(err, TrainingError::UnsupportedModelType(ref t) if t == "sd3"));
    }

    #[test]
    fn test_from_toml_rejects_unknown_model_type_at_boundary() {
        let toml = r#"
            model_type = "kandinsky"
            pretrained_model = "/m.safetensors"
        "#;
        let err = TrainingConfig::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, TrainingError::UnsupportedModelType(_)));
    }

    #[test]
    fn test_from_toml_flux_job() {
        let toml = r#"
            model_type = "flux"
            clip_l = "/models/clip_l.safetensors"
            t5xxl = "/models/t5xxl.safetensors"
            ae = "/models/ae.safetensors"
            pretrained_model = "/models/flux1-dev.safetensors"
            train_data_dir = "/data/img"
            output_dir = "/out"
            output_name = "my-lora"
            resolution = "1024,1024"
            vram_preset = "Low VRAM (12GB)"

            [hyperparams]
            learning_rate = 0.0001
            max_train_epochs = 4
        "#;
        let config = TrainingConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.model_type(), ModelType::Flux);
        assert_eq!(config.resolution, Some(Resolution::Rect { width: 1024, height: 1024 }));
        assert_eq!(config.caption_extension, ".txt");
        assert_eq!(config.hyperparams.network_dim, 16);
        config.validate().unwrap();
    }

    #[test]
    fn test_from_json_integer_resolution() {
        let json = serde_json::json!({
            "model_type": "sdxl",
            "pretrained_model": "/models/base.safetensors",
            "train_data_dir": "/data",
            "output_dir": "/out",
            "output_name": "x",
            "resolution": 768,
            "hyperparams": { "learning_rate": 0.0004, "max_train_epochs": 1 }
        });
        let config = TrainingConfig::from_json_str(&json.to_string()).unwrap();
        assert_eq!(config.resolution, Some(Resolution::Square(768)));
        assert_eq!(config.model, ModelFamily::Sdxl { vae: None });
    }

    #[test]
    fn test_validate_requires_resolution() {
        let mut config = flux_config();
        config.resolution = None;
        assert!(matches!(config.validate(), Err(TrainingError::Validation(_))));
    }

    #[test]
    fn test_validate_hyperparams() {
        let mut config = sdxl_config();
        config.hyperparams.learning_rate = 0.0;
        assert!(config.validate().is_err());

        let mut config = sdxl_config();
        config.caption_extension = "txt".to_string();
        assert!(config.validate().is_err());
    }
}
