use async_trait::async_trait;
use stratus_domain::{AgentTools, AgentVersion};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolsError {
    #[error("no agent binaries for version {version} series {series} arch {arch:?}")]
    NoMatch {
        version: AgentVersion,
        series: String,
        arch: Option<String>,
    },

    #[error("internal tools error: {0}")]
    Internal(String),
}

/// Lookup of published agent binaries. A successful result is never empty;
/// an empty match is reported as [`ToolsError::NoMatch`].
#[async_trait]
pub trait ToolsFinder: Send + Sync + 'static {
    async fn find_tools(
        &self,
        version: &AgentVersion,
        series: &str,
        arch: Option<&str>,
    ) -> Result<Vec<AgentTools>, ToolsError>;
}

/// A finder over a fixed catalogue, filtered by version, series, and
/// (when constrained) architecture.
#[derive(Debug, Clone, Default)]
pub struct StaticToolsFinder {
    catalogue: Vec<AgentTools>,
}

impl StaticToolsFinder {
    pub fn new(catalogue: Vec<AgentTools>) -> Self {
        Self { catalogue }
    }
}

#[async_trait]
impl ToolsFinder for StaticToolsFinder {
    async fn find_tools(
        &self,
        version: &AgentVersion,
        series: &str,
        arch: Option<&str>,
    ) -> Result<Vec<AgentTools>, ToolsError> {
        let matched: Vec<AgentTools> = self
            .catalogue
            .iter()
            .filter(|t| {
                &t.version == version
                    && t.series == series
                    && arch.map_or(true, |a| t.arch == a)
            })
            .cloned()
            .collect();
        if matched.is_empty() {
            return Err(ToolsError::NoMatch {
                version: version.clone(),
                series: series.to_string(),
                arch: arch.map(str::to_string),
            });
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools(series: &str, arch: &str) -> AgentTools {
        AgentTools {
            version: AgentVersion::new(2, 9, 0),
            series: series.into(),
            arch: arch.into(),
            url: format!("https://tools.example/2.9.0-{}-{}", series, arch),
            sha256: "deadbeef".into(),
            size: 1024,
        }
    }

    #[tokio::test]
    async fn filters_by_series_and_arch() {
        let finder = StaticToolsFinder::new(vec![
            tools("jammy", "amd64"),
            tools("jammy", "arm64"),
            tools("focal", "amd64"),
        ]);

        let found = finder
            .find_tools(&AgentVersion::new(2, 9, 0), "jammy", Some("arm64"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].arch, "arm64");

        let found = finder
            .find_tools(&AgentVersion::new(2, 9, 0), "jammy", None)
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn empty_match_is_an_error() {
        let finder = StaticToolsFinder::new(vec![tools("jammy", "amd64")]);
        let err = finder
            .find_tools(&AgentVersion::new(3, 0, 0), "jammy", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolsError::NoMatch { .. }));
    }
}
