//! JSON-RPC 2.0 tool protocol for AI coding assistants.
//!
//! Seven methods are exposed: `analyze_repo`, `get_topk`, `get_item`,
//! `get_impact_packs`, `set_weights`, `ping`, and `initialize`. Transport is
//! an external concern; [`McpServer::handle_message`] consumes one decoded
//! JSON-RPC message and produces the response value, which the thin stdio
//! binary frames line-by-line.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::api::engine::ValknutEngine;
use crate::core::config::{ValknutConfig, WeightsConfig};
use crate::core::featureset::RefactoringSuggestion;
use crate::core::pipeline::{AnalysisInputs, PipelineResult};

/// Protocol version advertised on initialize.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC error codes used by the server.
pub mod error_codes {
    /// Invalid JSON was received
    pub const PARSE_ERROR: i64 = -32700;
    /// The message is not a valid JSON-RPC 2.0 request
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters (including unknown result ids)
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal error escaping stage-level guards
    pub const INTERNAL_ERROR: i64 = -32603;
    /// A tool method was called before initialize
    pub const NOT_INITIALIZED: i64 = -32002;
}

/// Brief description of one ranked entity, sized for tool consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BriefItem {
    /// Entity id
    pub entity_id: String,
    /// Human-readable name
    pub name: String,
    /// Entity kind
    pub kind: String,
    /// Containing file path
    pub path: String,
    /// Line range in `"A-B"` form
    pub lines: String,
    /// Refactorability score in [0, 1]
    pub score: f64,
    /// 1-based position in the ranking
    pub rank: usize,
    /// Score explanations
    pub explanations: Vec<String>,
    /// Declaration signature, when configured and available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Detected refactoring suggestions, when configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<RefactoringSuggestion>>,
}

/// Build a brief for the ranked entity at `rank` (1-based), honoring the
/// briefs configuration.
pub fn build_brief(result: &PipelineResult, rank: usize) -> Option<BriefItem> {
    let ranked = result.ranked_entities.get(rank - 1)?;
    let briefs = &result.config.briefs;
    let summary = result.entity_summaries.get(&ranked.entity_id);

    let mut item = BriefItem {
        entity_id: ranked.entity_id.clone(),
        name: summary.map(|s| s.name.clone()).unwrap_or_default(),
        kind: summary
            .map(|s| s.kind.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        path: summary.map(|s| s.file_path.clone()).unwrap_or_default(),
        lines: summary
            .map(|s| format!("{}-{}", s.start_line, s.end_line))
            .unwrap_or_default(),
        score: ranked.score,
        rank,
        explanations: ranked.explanations.clone(),
        signature: if briefs.include_signatures {
            summary.and_then(|s| s.signature.clone())
        } else {
            None
        },
        suggestions: if briefs.include_detected_refactors {
            Some(ranked.vector.refactoring_suggestions.clone())
        } else {
            None
        },
    };

    // Budget roughly four characters per token; shed the bulkiest fields
    // first when over budget.
    let budget_chars = briefs.max_tokens_per_item.saturating_mul(4);
    if brief_size(&item) > budget_chars {
        if let Some(suggestions) = item.suggestions.as_mut() {
            suggestions.truncate(3);
            for suggestion in suggestions.iter_mut() {
                suggestion.before = None;
                suggestion.after = None;
            }
        }
    }
    if brief_size(&item) > budget_chars {
        item.suggestions = None;
        item.explanations.truncate(3);
    }

    Some(item)
}

fn brief_size(item: &BriefItem) -> usize {
    serde_json::to_string(item).map(|s| s.len()).unwrap_or(0)
}

/// JSON-RPC method dispatcher for the tool protocol.
pub struct McpServer {
    engine: Arc<ValknutEngine>,
    initialized: AtomicBool,
}

impl McpServer {
    /// Create a server over an engine
    pub fn new(engine: Arc<ValknutEngine>) -> Self {
        Self {
            engine,
            initialized: AtomicBool::new(false),
        }
    }

    /// Build the error response emitted for undecodable input.
    pub fn parse_error_response(details: impl Into<String>) -> Value {
        error_response(
            Value::Null,
            error_codes::PARSE_ERROR,
            "Parse error",
            Some(json!({ "details": details.into() })),
        )
    }

    /// Handle one decoded JSON-RPC message. Returns `None` for notifications
    /// (requests without an id) that succeed.
    pub async fn handle_message(&self, message: Value) -> Option<Value> {
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        let is_notification = message.get("id").is_none();

        if message.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return Some(error_response(
                id,
                error_codes::INVALID_REQUEST,
                "Invalid Request",
                Some(json!({ "details": "only JSON-RPC 2.0 is supported" })),
            ));
        }
        let Some(method) = message.get("method").and_then(Value::as_str) else {
            return Some(error_response(
                id,
                error_codes::INVALID_REQUEST,
                "Invalid Request",
                Some(json!({ "details": "missing method" })),
            ));
        };
        let params = message.get("params").cloned().unwrap_or_else(|| json!({}));

        if method != "initialize" && method != "ping" && !self.initialized.load(Ordering::SeqCst) {
            return Some(error_response(
                id,
                error_codes::NOT_INITIALIZED,
                "Not initialized",
                None,
            ));
        }

        let outcome = match method {
            "initialize" => self.initialize(params),
            "ping" => Ok(Self::ping()),
            "analyze_repo" => self.analyze_repo(params).await,
            "get_topk" => self.get_topk(params),
            "get_item" => self.get_item(params),
            "get_impact_packs" => self.get_impact_packs(params),
            "set_weights" => self.set_weights(params),
            _ => {
                return Some(error_response(
                    id,
                    error_codes::METHOD_NOT_FOUND,
                    "Method not found",
                    Some(json!({ "method": method })),
                ));
            }
        };

        match outcome {
            Ok(_) if is_notification => None,
            Ok(result) => Some(json!({ "jsonrpc": "2.0", "id": id, "result": result })),
            Err(rpc_error) => Some(error_response(
                id,
                rpc_error.code,
                &rpc_error.message,
                rpc_error.data,
            )),
        }
    }

    fn initialize(&self, params: Value) -> std::result::Result<Value, RpcError> {
        if params.get("clientInfo").is_none() {
            return Err(RpcError::invalid_request("missing clientInfo"));
        }
        let protocol = params.get("protocolVersion").and_then(Value::as_str);
        if protocol != Some(PROTOCOL_VERSION) {
            return Err(RpcError::invalid_request("unsupported protocol version"));
        }

        self.initialized.store(true, Ordering::SeqCst);
        let client_name = params
            .pointer("/clientInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!(client = %client_name, "tool protocol initialized");

        Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "valknut", "version": crate::VERSION },
        }))
    }

    fn ping() -> Value {
        json!({
            "time": chrono::Utc::now().to_rfc3339(),
            "status": "ok",
        })
    }

    async fn analyze_repo(&self, params: Value) -> std::result::Result<Value, RpcError> {
        let paths: Vec<PathBuf> = params
            .get("paths")
            .and_then(Value::as_array)
            .map(|array| {
                array
                    .iter()
                    .filter_map(Value::as_str)
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();
        if paths.is_empty() {
            return Err(RpcError::invalid_params("paths must be a non-empty array"));
        }

        let top_k = params
            .get("top_k")
            .and_then(Value::as_u64)
            .map(|v| v as usize);

        fn map_error(e: crate::core::errors::ValknutError) -> RpcError {
            warn!(error = %e, "analysis failed");
            if e.is_fatal() {
                RpcError::invalid_params(e.to_string())
            } else {
                RpcError::internal(e.to_string())
            }
        }

        // An inline config overrides the engine configuration for this run.
        let result = if let Some(config_value) = params.get("config") {
            let mut config: ValknutConfig = serde_json::from_value(config_value.clone())
                .map_err(|e| RpcError::invalid_params(format!("invalid config: {e}")))?;
            config.roots = paths
                .iter()
                .map(|p| crate::core::config::RootConfig::new(p))
                .collect();
            if let Some(top_k) = top_k {
                config.ranking.top_k = top_k;
            }
            config
                .validate()
                .map_err(|e| RpcError::invalid_params(e.to_string()))?;

            let pipeline =
                crate::core::pipeline::Pipeline::new(config).map_err(map_error)?;
            let result = pipeline
                .analyze(AnalysisInputs::default())
                .await
                .map_err(map_error)?;
            crate::core::pipeline::ResultRegistry::insert(result)
        } else {
            self.engine
                .analyze_paths_with(&paths, AnalysisInputs::default(), top_k)
                .await
                .map_err(map_error)?
        };

        Ok(json!({
            "result_id": result.result_id,
            "status": "completed",
            "total_files": result.total_files,
            "total_entities": result.total_entities,
            "processing_time": result.processing_time,
        }))
    }

    fn get_topk(&self, params: Value) -> std::result::Result<Value, RpcError> {
        let result = self.lookup_result(&params)?;
        let items: Vec<BriefItem> = (1..=result.top_k_entities().len())
            .filter_map(|rank| build_brief(&result, rank))
            .collect();
        Ok(json!({ "items": items }))
    }

    fn get_item(&self, params: Value) -> std::result::Result<Value, RpcError> {
        let result = self.lookup_result(&params)?;
        let entity_id = params
            .get("entity_id")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("entity_id is required"))?;

        let brief = result
            .ranked_entities
            .iter()
            .position(|r| r.entity_id == entity_id)
            .and_then(|index| build_brief(&result, index + 1));
        Ok(json!({ "brief": brief }))
    }

    fn get_impact_packs(&self, params: Value) -> std::result::Result<Value, RpcError> {
        let result = self.lookup_result(&params)?;
        Ok(json!({ "impact_packs": result.impact_packs }))
    }

    fn set_weights(&self, params: Value) -> std::result::Result<Value, RpcError> {
        let weights_value = params
            .get("weights")
            .ok_or_else(|| RpcError::invalid_params("weights is required"))?;
        let weights: WeightsConfig = serde_json::from_value(weights_value.clone())
            .map_err(|e| RpcError::invalid_params(format!("invalid weights: {e}")))?;

        self.engine
            .set_weights(weights)
            .map_err(|e| RpcError::invalid_params(e.to_string()))?;
        Ok(json!({ "ok": true, "message": "weights updated for subsequent analyses" }))
    }

    fn lookup_result(&self, params: &Value) -> std::result::Result<Arc<PipelineResult>, RpcError> {
        let result_id = params
            .get("result_id")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("result_id is required"))?;
        self.engine
            .get_result(result_id)
            .ok_or_else(|| RpcError::invalid_params(format!("result not found: {result_id}")))
    }
}

struct RpcError {
    code: i64,
    message: String,
    data: Option<Value>,
}

impl RpcError {
    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: error_codes::INVALID_REQUEST,
            message: message.into(),
            data: None,
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: error_codes::INVALID_PARAMS,
            message: message.into(),
            data: None,
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            code: error_codes::INTERNAL_ERROR,
            message: message.into(),
            data: None,
        }
    }
}

fn error_response(id: Value, code: i64, message: &str, data: Option<Value>) -> Value {
    let mut error = json!({ "code": code, "message": message });
    if let Some(data) = data {
        error["data"] = data;
    }
    json!({ "jsonrpc": "2.0", "id": id, "error": error })
}
