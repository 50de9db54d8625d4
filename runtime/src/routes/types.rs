use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

use crate::{
    chunkers::{ChunkerInfo, ChunkingResult},
    providers::{OutputFormat, ProviderInfo},
    storage::TaskStatus,
};

#[derive(Serialize, TS)]
#[ts(export)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct LibrariesResponse {
    pub libraries: Vec<ProviderInfo>,
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct PrepareResponse {
    pub success: bool,
    pub library: String,
    pub message: String,
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct ConvertResponse {
    pub success: bool,
    pub library_used: String,
    pub filename: String,
    pub format: OutputFormat,
    pub duration_seconds: f64,
    /// Set for markdown and text output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Set for json output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Serialize)]
pub struct ChunkersResponse {
    pub chunkers: Vec<ChunkerInfo>,
}

#[derive(Deserialize, TS)]
#[ts(export)]
pub struct ChunkRequest {
    pub text: String,
    pub chunker: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

#[derive(Serialize)]
pub struct ConvertChunkResponse {
    pub success: bool,
    pub library_used: String,
    pub filename: String,
    pub format: OutputFormat,
    pub conversion_duration_seconds: f64,
    pub chunking: ChunkingResult,
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct CompareResponse {
    pub task_id: String,
    pub status: TaskStatus,
    pub libraries: Vec<String>,
}

#[derive(Deserialize)]
pub struct TaskListQuery {
    #[serde(default = "first_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn first_page() -> usize {
    1
}

fn default_page_size() -> usize {
    20
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct TaskResultResponse {
    pub task_id: String,
    pub library: String,
    pub format: OutputFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct DeleteResponse {
    pub task_id: String,
    pub deleted: bool,
}
