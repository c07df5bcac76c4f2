//! Collector registry.
//!
//! Collectors are registered during startup wiring; the populated registry is
//! then shared behind an `Arc` and only read from.

pub mod collectors;

use std::any::Any;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("collector '{uid}' is already registered")]
    DuplicateCollector { uid: String },
}

/// One file of diagnostic content produced by a collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportItem {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl SupportItem {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }
}

/// Describes a collector to API clients.
#[derive(Debug, Clone, Serialize)]
pub struct CollectorMeta {
    pub uid: String,
    pub display_name: String,
    pub description: String,
    /// Pre-selected in UIs that offer a collector picker.
    pub included_by_default: bool,
    /// Always runs, whatever the caller selected.
    pub mandatory: bool,
}

/// Trait for all diagnostic collectors
#[async_trait::async_trait]
pub trait Collector: Send + Sync {
    fn meta(&self) -> CollectorMeta;

    /// Gather this collector's diagnostic content.
    async fn collect(&self) -> Result<SupportItem>;
}

/// Result of running a single collector.
#[derive(Debug)]
pub struct CollectorOutput {
    pub uid: String,
    pub result: std::result::Result<SupportItem, String>,
}

#[derive(Default)]
pub struct CollectorRegistry {
    collectors: Vec<Arc<dyn Collector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<C: Collector + 'static>(&mut self, collector: C) -> Result<(), RegistryError> {
        let uid = collector.meta().uid;
        if self.collectors.iter().any(|c| c.meta().uid == uid) {
            return Err(RegistryError::DuplicateCollector { uid });
        }
        tracing::debug!(collector = %uid, "Registered support bundle collector");
        self.collectors.push(Arc::new(collector));
        Ok(())
    }

    /// Metadata for every registered collector, in registration order.
    pub fn list(&self) -> Vec<CollectorMeta> {
        self.collectors.iter().map(|c| c.meta()).collect()
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Run the selected collectors concurrently, each on its own task.
    ///
    /// An empty selection runs everything; otherwise mandatory collectors are
    /// added to the selection. Outputs come back in registration order,
    /// followed by an error entry for each requested uid nobody registered.
    pub async fn run_all(&self, selected: &[String]) -> Vec<CollectorOutput> {
        let chosen: Vec<Arc<dyn Collector>> = self
            .collectors
            .iter()
            .filter(|c| {
                let meta = c.meta();
                selected.is_empty() || meta.mandatory || selected.contains(&meta.uid)
            })
            .cloned()
            .collect();

        let mut unknown: Vec<String> = Vec::new();
        for uid in selected {
            let known = self.collectors.iter().any(|c| &c.meta().uid == uid);
            if !known && !unknown.contains(uid) {
                unknown.push(uid.clone());
            }
        }

        // Each collector gets its own task so a blocking or stuck collector
        // cannot hold up the job's deadline. Dropping the set aborts them.
        let mut tasks = CollectorTasks(
            chosen
                .into_iter()
                .map(|collector| {
                    let uid = collector.meta().uid;
                    let handle = tokio::spawn(async move { collector.collect().await });
                    (uid, handle)
                })
                .collect(),
        );

        let mut outputs = Vec::with_capacity(tasks.0.len() + unknown.len());
        for (uid, handle) in tasks.0.iter_mut() {
            let result = match handle.await {
                Ok(Ok(item)) => Ok(item),
                Ok(Err(e)) => Err(format!("{:#}", e)),
                Err(e) if e.is_panic() => Err(format!(
                    "collector panicked: {}",
                    panic_message(e.into_panic().as_ref())
                )),
                Err(e) => Err(format!("collector task failed: {}", e)),
            };
            if let Err(e) = &result {
                tracing::warn!(collector = %uid, error = %e, "Collector failed");
            }
            outputs.push(CollectorOutput {
                uid: uid.clone(),
                result,
            });
        }

        outputs.extend(unknown.into_iter().map(|uid| CollectorOutput {
            uid,
            result: Err("unknown collector".to_string()),
        }));
        outputs
    }
}

/// Spawned collector tasks, aborted when dropped.
struct CollectorTasks(Vec<(String, JoinHandle<Result<SupportItem>>)>);

impl Drop for CollectorTasks {
    fn drop(&mut self) {
        for (_, handle) in &self.0 {
            handle.abort();
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Collectors with scripted behavior, shared by unit tests.

    use super::*;
    use std::time::Duration;

    pub enum Behavior {
        Succeed(&'static str),
        Fail(&'static str),
        Panic,
        Hang,
        /// Blocks the worker thread instead of yielding.
        Block(Duration),
    }

    pub struct ScriptedCollector {
        pub uid: &'static str,
        pub mandatory: bool,
        pub behavior: Behavior,
    }

    impl ScriptedCollector {
        pub fn new(uid: &'static str, behavior: Behavior) -> Self {
            Self {
                uid,
                mandatory: false,
                behavior,
            }
        }

        pub fn mandatory(mut self) -> Self {
            self.mandatory = true;
            self
        }
    }

    #[async_trait::async_trait]
    impl Collector for ScriptedCollector {
        fn meta(&self) -> CollectorMeta {
            CollectorMeta {
                uid: self.uid.to_string(),
                display_name: self.uid.to_uppercase(),
                description: format!("scripted {}", self.uid),
                included_by_default: true,
                mandatory: self.mandatory,
            }
        }

        async fn collect(&self) -> Result<SupportItem> {
            match self.behavior {
                Behavior::Succeed(body) => Ok(SupportItem::new(
                    format!("{}.txt", self.uid),
                    body.as_bytes().to_vec(),
                )),
                Behavior::Fail(msg) => anyhow::bail!("{}", msg),
                Behavior::Panic => panic!("{} exploded", self.uid),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    anyhow::bail!("woke up")
                }
                Behavior::Block(duration) => {
                    std::thread::sleep(duration);
                    Ok(SupportItem::new(format!("{}.txt", self.uid), b"late".to_vec()))
                }
            }
        }
    }
}
