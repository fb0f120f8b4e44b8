use async_trait::async_trait;

/// Opaque text generator. The memory layer only ever hands it a finished
/// prompt and stores whatever comes back.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "language-model"
    }
}
