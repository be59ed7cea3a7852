// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::EngineError;

use super::{EngineKey, EngineLoader, TranscriptionEngine};

type Slot = Arc<OnceCell<Arc<dyn TranscriptionEngine>>>;

/// Process-wide cache of initialized engines
///
/// Entries are only ever added. The first caller for a key runs the loader;
/// concurrent callers for the same key wait for it and share the result. A
/// failed load leaves the slot empty so a later run can try again.
#[derive(Default)]
pub struct EngineCache {
    slots: Mutex<HashMap<EngineKey, Slot>>,
}

impl EngineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_load(
        &self,
        key: &EngineKey,
        loader: &dyn EngineLoader,
    ) -> Result<Arc<dyn TranscriptionEngine>, EngineError> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.entry(key.clone()).or_default().clone()
        };

        if let Some(engine) = slot.get() {
            debug!(?key, "Reusing cached engine");
            return Ok(engine.clone());
        }

        let engine = slot
            .get_or_try_init(|| async {
                info!(
                    engine = %key.engine,
                    model = %key.model_size,
                    device = %key.device,
                    precision = %key.precision,
                    "Loading transcription engine"
                );
                loader.load(key).await
            })
            .await?;

        Ok(engine.clone())
    }

    /// Number of successfully loaded engines
    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.values().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Transcript, TranscriptionConfig};
    use crate::progress::FractionReporter;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct NullEngine;

    #[async_trait]
    impl TranscriptionEngine for NullEngine {
        async fn transcribe(
            &self,
            _audio: &Path,
            _config: &TranscriptionConfig,
            _progress: &dyn FractionReporter,
            _cancel: &CancellationToken,
        ) -> Result<Transcript, EngineError> {
            Ok(Transcript::default())
        }
    }

    #[derive(Default)]
    struct CountingLoader {
        loads: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl EngineLoader for CountingLoader {
        async fn load(&self, _key: &EngineKey) -> Result<Arc<dyn TranscriptionEngine>, EngineError> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail_first && n == 0 {
                return Err(EngineError::EngineUnavailable("model missing".to_string()));
            }
            Ok(Arc::new(NullEngine))
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_load() {
        let cache = Arc::new(EngineCache::new());
        let loader = Arc::new(CountingLoader::default());
        let key = TranscriptionConfig::default().key();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let loader = loader.clone();
                let key = key.clone();
                tokio::spawn(async move { cache.get_or_load(&key, loader.as_ref()).await.map(|_| ()) })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn distinct_keys_load_separately() {
        let cache = EngineCache::new();
        let loader = CountingLoader::default();
        let small = TranscriptionConfig::default().key();
        let large = TranscriptionConfig {
            model_size: "large-v3".to_string(),
            ..Default::default()
        }
        .key();

        cache.get_or_load(&small, &loader).await.unwrap();
        cache.get_or_load(&large, &loader).await.unwrap();
        cache.get_or_load(&small, &loader).await.unwrap();

        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_load_can_be_retried() {
        let cache = EngineCache::new();
        let loader = CountingLoader {
            fail_first: true,
            ..Default::default()
        };
        let key = TranscriptionConfig::default().key();

        assert!(cache.get_or_load(&key, &loader).await.is_err());
        assert!(cache.is_empty());
        assert!(cache.get_or_load(&key, &loader).await.is_ok());
        assert_eq!(cache.len(), 1);
    }
}
