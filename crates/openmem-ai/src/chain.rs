use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use openmem_types::{MemoryMode, ObservationDraft};
use tracing::{debug, warn};

use crate::{AiError, BasicExtractor, CaptureInput, Compressor, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const ATTEMPTS_PER_PROVIDER: u32 = 2;

/// Provider chain with retry and fallback classification.
///
/// Tries each provider in order; retryable failures (rate limit, transient
/// 5xx, timeout) fall through to the next provider, configuration errors
/// short-circuit with no fallback. When every provider is exhausted the
/// basic extractor answers, so compression only fails on configuration
/// errors. This wrapper is the sole retry site for compression.
pub struct ChainedCompressor {
    providers: Vec<Arc<dyn Compressor>>,
    timeout: Duration,
    fallback: BasicExtractor,
}

impl ChainedCompressor {
    pub fn new(providers: Vec<Arc<dyn Compressor>>) -> Self {
        Self {
            providers,
            timeout: DEFAULT_TIMEOUT,
            fallback: BasicExtractor,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn try_provider(
        &self,
        provider: &Arc<dyn Compressor>,
        capture: &CaptureInput,
        mode: &MemoryMode,
    ) -> Result<ObservationDraft> {
        match tokio::time::timeout(self.timeout, provider.compress(capture, mode)).await {
            Ok(result) => result,
            Err(_) => Err(AiError::Retryable(format!(
                "{} timed out after {:?}",
                provider.name(),
                self.timeout
            ))),
        }
    }
}

#[async_trait]
impl Compressor for ChainedCompressor {
    async fn compress(
        &self,
        capture: &CaptureInput,
        mode: &MemoryMode,
    ) -> Result<ObservationDraft> {
        for provider in &self.providers {
            for attempt in 1..=ATTEMPTS_PER_PROVIDER {
                match self.try_provider(provider, capture, mode).await {
                    Ok(draft) => return Ok(draft),
                    Err(AiError::Retryable(msg)) => {
                        debug!(
                            provider = provider.name(),
                            attempt, error = %msg,
                            "retryable compression failure"
                        );
                    }
                    Err(err @ AiError::Config(_)) => {
                        warn!(provider = provider.name(), error = %err, "compression misconfigured");
                        return Err(err);
                    }
                }
            }
        }

        if !self.providers.is_empty() {
            warn!("all compression providers exhausted, using basic extraction");
        }
        Ok(self.fallback.extract(capture))
    }

    fn name(&self) -> &str {
        "chained-compressor"
    }
}
