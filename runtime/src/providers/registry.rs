use std::{path::Path, sync::Arc, time::Duration};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::{ComparisonConfig, ProvidersConfig};

use super::{
    CommandConverter, ConvertedContent, Converter, LopdfConverter, OutputFormat,
    PreparationStatus, ProviderError, ProviderInfo,
};

type SharedPreparation = Shared<BoxFuture<'static, Result<(), String>>>;

#[derive(Default)]
struct PreparationSlot {
    next_attempt: u64,
    inflight: Option<(u64, SharedPreparation)>,
    ready: bool,
}

struct ProviderSlot {
    provider: Arc<dyn Converter>,
    preparation: Mutex<PreparationSlot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareOutcome {
    NotRequired,
    AlreadyReady,
    Prepared,
}

impl PrepareOutcome {
    pub fn message(&self, name: &str) -> String {
        match self {
            PrepareOutcome::NotRequired => {
                format!("Converter '{name}' does not require model downloads")
            }
            PrepareOutcome::AlreadyReady => format!("Converter '{name}' is already prepared"),
            PrepareOutcome::Prepared => {
                format!("Converter '{name}' models downloaded successfully")
            }
        }
    }
}

/// Name → provider table, resolved once at startup.
pub struct ConverterRegistry {
    providers: Vec<ProviderSlot>,
    conversion_timeout: Duration,
}

impl ConverterRegistry {
    pub fn new(conversion_timeout: Duration) -> Self {
        Self {
            providers: Vec::new(),
            conversion_timeout,
        }
    }

    pub fn from_config(providers: &ProvidersConfig, comparison: &ComparisonConfig) -> Self {
        let mut registry = Self::new(comparison.conversion_timeout());
        if providers.lopdf {
            registry.register(Arc::new(LopdfConverter::new()));
        }
        for command in &providers.commands {
            registry.register(Arc::new(CommandConverter::new(command.clone())));
        }
        registry
    }

    /// Registers `provider`, replacing any earlier provider with the same name.
    pub fn register(&mut self, provider: Arc<dyn Converter>) {
        if provider.available() {
            info!(converter = %provider.name(), "Registered converter");
        } else {
            let reason = provider
                .unavailable_reason()
                .unwrap_or_else(|| "dependencies not installed".to_string());
            warn!(converter = %provider.name(), reason = %reason, "Converter is not available");
        }

        let slot = ProviderSlot {
            provider,
            preparation: Mutex::new(PreparationSlot::default()),
        };

        match self
            .providers
            .iter_mut()
            .find(|existing| existing.provider.name() == slot.provider.name())
        {
            Some(existing) => *existing = slot,
            None => self.providers.push(slot),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|slot| slot.provider.name().to_string())
            .collect()
    }

    pub fn list(&self) -> Vec<ProviderInfo> {
        self.providers
            .iter()
            .map(|slot| {
                let provider = &slot.provider;
                let available = provider.available();
                ProviderInfo {
                    name: provider.name().to_string(),
                    available,
                    error: if available {
                        None
                    } else {
                        Some(
                            provider
                                .unavailable_reason()
                                .unwrap_or_else(|| "Unavailable".to_string()),
                        )
                    },
                    requires_preparation: provider.requires_preparation(),
                    preparation_status: provider.preparation_status(),
                    preparation_error: provider.preparation_error(),
                }
            })
            .collect()
    }

    fn slot(&self, name: &str) -> Result<&ProviderSlot, ProviderError> {
        self.providers
            .iter()
            .find(|slot| slot.provider.name() == name)
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Converter>, ProviderError> {
        let provider = self.slot(name)?.provider.clone();
        if !provider.available() {
            return Err(ProviderError::Unavailable {
                name: name.to_string(),
                reason: provider
                    .unavailable_reason()
                    .unwrap_or_else(|| "library is not installed".to_string()),
            });
        }
        Ok(provider)
    }

    /// Runs the provider's one-time preparation.
    ///
    /// Concurrent callers for the same provider join the attempt already in
    /// flight; once an attempt succeeds later calls return without work.
    pub async fn prepare(&self, name: &str) -> Result<PrepareOutcome, ProviderError> {
        let slot = self.slot(name)?;
        let provider = self.get(name)?;

        if !provider.requires_preparation() {
            return Ok(PrepareOutcome::NotRequired);
        }

        let (attempt, preparation, started) = {
            let mut state = slot.preparation.lock().await;
            if state.ready || provider.preparation_status() == PreparationStatus::Ready {
                state.ready = true;
                return Ok(PrepareOutcome::AlreadyReady);
            }

            let joined = state
                .inflight
                .as_ref()
                .map(|(attempt, preparation)| (*attempt, preparation.clone()));

            match joined {
                Some((attempt, preparation)) => (attempt, preparation, false),
                None => {
                    state.next_attempt += 1;
                    let attempt = state.next_attempt;
                    let runner = provider.clone();
                    // Detached: the attempt runs to completion even if every waiter is dropped.
                    let handle = tokio::spawn(async move {
                        runner.prepare().await.map_err(|err| match err {
                            ProviderError::PreparationFailed { message, .. } => message,
                            other => other.to_string(),
                        })
                    });
                    let preparation = async move {
                        handle
                            .await
                            .unwrap_or_else(|err| Err(format!("preparation task aborted: {err}")))
                    }
                    .boxed()
                    .shared();
                    state.inflight = Some((attempt, preparation.clone()));
                    (attempt, preparation, true)
                }
            }
        };

        if started {
            info!(converter = %name, attempt, "Starting converter preparation");
        } else {
            info!(converter = %name, attempt, "Joining in-flight converter preparation");
        }

        let result = preparation.await;

        {
            let mut state = slot.preparation.lock().await;
            if matches!(&state.inflight, Some((current, _)) if *current == attempt) {
                state.inflight = None;
                state.ready = result.is_ok();
            }
        }

        match result {
            Ok(()) => {
                if started {
                    info!(converter = %name, "Converter preparation finished");
                }
                Ok(PrepareOutcome::Prepared)
            }
            Err(message) => {
                if started {
                    error!(converter = %name, error = %message, "Converter preparation failed");
                }
                Err(ProviderError::PreparationFailed {
                    name: name.to_string(),
                    message,
                })
            }
        }
    }

    /// Resolves `name` and converts under the registry's conversion timeout.
    pub async fn convert(
        &self,
        name: &str,
        file_path: &Path,
        format: OutputFormat,
    ) -> Result<ConvertedContent, ProviderError> {
        let provider = self.get(name)?;
        if !provider.supports_format(format) {
            return Err(ProviderError::UnsupportedFormat {
                name: name.to_string(),
                format,
            });
        }

        match tokio::time::timeout(self.conversion_timeout, provider.convert(file_path, format))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                name: name.to_string(),
                timeout: self.conversion_timeout,
            }),
        }
    }
}
