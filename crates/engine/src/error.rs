//! Fatal evaluation faults and settings errors.
//!
//! Ordinary spreadsheet errors are values (`Value::Error`) and never appear
//! here. An `EvalFault` means the evaluator or cache cannot continue.

use thiserror::Error;

use crate::cell_id::CellId;

/// Unrecoverable conditions raised while evaluating or invalidating.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalFault {
    /// Nested evaluation went deeper than `eval.maxDepth`
    #[error("evaluation depth limit {limit} exceeded (chain: {})", format_chain(.chain))]
    DepthExceeded { limit: usize, chain: Vec<CellId> },
    /// An edge refers to an entry the cache does not own
    #[error("dangling cache edge from {from} to entry #{to}")]
    DanglingEdge { from: String, to: u32 },
    /// Dependency and consumer sets are not mutual inverses
    #[error("asymmetric cache edge: {consumer} depends on {producer} but is not in its consumers")]
    AsymmetricEdge { consumer: String, producer: String },
}

fn format_chain(chain: &[CellId]) -> String {
    chain.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(" -> ")
}

/// Errors from loading or validating [`EvaluatorSettings`](crate::settings::EvaluatorSettings).
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid JSON settings: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid TOML settings: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("eval.maxDepth must be at least 1")]
    ZeroDepth,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::SheetId;

    #[test]
    fn test_depth_exceeded_message_names_chain() {
        let sheet = SheetId::from_raw(1);
        let fault = EvalFault::DepthExceeded {
            limit: 2,
            chain: vec![CellId::new(sheet, 0, 0), CellId::new(sheet, 1, 0)],
        };
        let msg = fault.to_string();
        assert!(msg.contains("limit 2"));
        assert!(msg.contains("Sheet1!A1 -> Sheet1!A2"));
    }
}
