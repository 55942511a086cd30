use thiserror::Error;

/// Failure taxonomy for one alert invocation.
///
/// Each variant wraps the underlying `anyhow` chain so the top-level report can print
/// the full cause list.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("network failure: {0:#}")]
    Network(anyhow::Error),

    #[error("no station data available")]
    EmptyDataset,

    #[error("panel not ready after {waited_ms} ms: {condition}")]
    RenderTimeout { condition: String, waited_ms: u64 },

    #[error("render failure: {0:#}")]
    Render(anyhow::Error),

    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),

    #[error("dispatch failure: {0:#}")]
    Dispatch(anyhow::Error),

    #[error("configuration error: {0:#}")]
    Config(anyhow::Error),
}

impl AlertError {
    /// Short machine-readable kind, used in the run ledger.
    pub fn kind(&self) -> &'static str {
        match self {
            AlertError::Network(_) => "network",
            AlertError::EmptyDataset => "empty_dataset",
            AlertError::RenderTimeout { .. } => "render_timeout",
            AlertError::Render(_) => "render",
            AlertError::Storage(_) => "storage",
            AlertError::Dispatch(_) => "dispatch",
            AlertError::Config(_) => "config",
        }
    }

    /// Cause chain, outermost first.
    pub fn chain(&self) -> Vec<String> {
        let inner = match self {
            AlertError::Network(e)
            | AlertError::Render(e)
            | AlertError::Storage(e)
            | AlertError::Dispatch(e)
            | AlertError::Config(e) => Some(e),
            AlertError::EmptyDataset | AlertError::RenderTimeout { .. } => None,
        };
        let mut lines = vec![self.kind().to_string()];
        if let Some(e) = inner {
            lines.extend(e.chain().map(|c| c.to_string()));
        } else {
            lines.push(self.to_string());
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_chain_includes_context_layers() {
        let inner: anyhow::Result<()> = Err(anyhow::anyhow!("connection refused"));
        let err = AlertError::Network(inner.context("GET /ias/current failed").unwrap_err());
        let chain = err.chain();
        assert_eq!(chain[0], "network");
        assert_eq!(chain[1], "GET /ias/current failed");
        assert_eq!(chain[2], "connection refused");
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_timeout_message() {
        let err = AlertError::RenderTimeout {
            condition: "#iasValue still '--'".into(),
            waited_ms: 15_000,
        };
        assert_eq!(err.kind(), "render_timeout");
        assert_eq!(err.chain().len(), 2);
        assert!(err.to_string().contains("15000 ms"));
    }
}
