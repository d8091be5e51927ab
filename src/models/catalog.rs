//! Downloadable model catalog and local model inventory records.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Bumped whenever catalog entries change.
pub const CATALOG_VERSION: u32 = 1;

const MB: u64 = 1024 * 1024;
const GB: u64 = 1024 * MB;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelCategory {
    Small,
    Medium,
    Large,
}

impl std::fmt::Display for ModelCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelCategory::Small => write!(f, "small"),
            ModelCategory::Medium => write!(f, "medium"),
            ModelCategory::Large => write!(f, "large"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub url: String,
    pub filename: String,
    pub download_size_bytes: u64,
    pub ram_required_bytes: u64,
    pub quantization: String,
    pub category: ModelCategory,
}

/// A versioned list of downloadable models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCatalog {
    pub version: u32,
    pub models: Vec<ModelDescriptor>,
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        Self {
            version: CATALOG_VERSION,
            models,
        }
    }

    pub fn builtin() -> Self {
        Self::new(vec![
            ModelDescriptor {
                id: "tinyllama-1.1b-chat-v1.0.Q4_K_M".to_string(),
                name: "TinyLlama 1.1B Chat".to_string(),
                description: "Fast and lightweight, suited to older hardware.".to_string(),
                url: "https://huggingface.co/TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF/resolve/main/tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf".to_string(),
                filename: "tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf".to_string(),
                download_size_bytes: 668 * MB,
                ram_required_bytes: 2 * GB,
                quantization: "Q4_K_M".to_string(),
                category: ModelCategory::Small,
            },
            ModelDescriptor {
                id: "phi-2.Q4_K_M".to_string(),
                name: "Phi-2".to_string(),
                description: "Compact 2.7B model with strong reasoning for its size.".to_string(),
                url: "https://huggingface.co/TheBloke/phi-2-GGUF/resolve/main/phi-2.Q4_K_M.gguf".to_string(),
                filename: "phi-2.Q4_K_M.gguf".to_string(),
                download_size_bytes: 1790 * MB,
                ram_required_bytes: 4 * GB,
                quantization: "Q4_K_M".to_string(),
                category: ModelCategory::Medium,
            },
            ModelDescriptor {
                id: "mistral-7b-instruct-v0.1.Q4_K_M".to_string(),
                name: "Mistral 7B Instruct".to_string(),
                description: "High quality 7B instruction-tuned model.".to_string(),
                url: "https://huggingface.co/TheBloke/Mistral-7B-Instruct-v0.1-GGUF/resolve/main/mistral-7b-instruct-v0.1.Q4_K_M.gguf".to_string(),
                filename: "mistral-7b-instruct-v0.1.Q4_K_M.gguf".to_string(),
                download_size_bytes: 4370 * MB,
                ram_required_bytes: 8 * GB,
                quantization: "Q4_K_M".to_string(),
                category: ModelCategory::Large,
            },
        ])
    }

    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }
}

/// A model file present in the models directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalModel {
    pub id: String,
    pub name: String,
    pub filename: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl LocalModel {
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / MB as f64
    }
}

/// Turn a file stem like `phi-2.Q4_K_M` into `phi 2 Q4_K_M`.
pub fn display_name(stem: &str) -> String {
    stem.replace(['-', '.'], " ")
}
