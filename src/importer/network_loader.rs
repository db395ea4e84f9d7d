// ==========================================
// 铁路区段调度系统 - 线路定义加载
// ==========================================
// 支持: JSON（NetworkDefinition）
// 说明: 只做反序列化；拓扑校验由 TrackNetwork::load 负责
// ==========================================

use crate::domain::network::NetworkDefinition;
use crate::importer::error::{ImportError, ImportResult};
use std::path::Path;

/// 从 JSON 文件读取线路定义
pub fn load_network_definition(path: &Path) -> ImportResult<NetworkDefinition> {
    if !path.exists() {
        return Err(ImportError::FileNotFound(path.display().to_string()));
    }
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if ext != "json" {
        return Err(ImportError::UnsupportedFormat(ext));
    }

    let raw = std::fs::read_to_string(path)?;
    let definition = parse_network_definition(&raw)?;
    tracing::info!(
        "读取线路定义: path={}, nodes={}, sections={}",
        path.display(),
        definition.nodes.len(),
        definition.sections.len()
    );
    Ok(definition)
}

pub fn parse_network_definition(raw: &str) -> ImportResult<NetworkDefinition> {
    NetworkDefinition::from_json(raw).map_err(|e| ImportError::JsonParseError(e.to_string()))
}
