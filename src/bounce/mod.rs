//! Bounce and complaint import.
//!
//! Each [`BounceAdapter`] pulls opt-out events from one external provider. The
//! [`BounceRegistry`] runs every registered adapter, collects what they return and
//! hands the whole batch to a single [`OptOutProcessor`], which decides how events
//! become opt-outs. Adapter failures stay local to the adapter and end up in the
//! [`ImportReport`].

pub mod http_feed;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rocket_okapi::okapi::schemars::JsonSchema;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinSet;

use crate::error::{OptOutError, OptOutResult};
use crate::models::BounceEvent;
use crate::service::SubscriptionService;

pub use http_feed::HttpFeedAdapter;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode provider response: {0}")]
    Decode(String),
    #[error("adapter misconfigured: {0}")]
    Config(String),
}

/// A source of opt-out events from an external mail provider.
#[rocket::async_trait]
pub trait BounceAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_opt_outs(&self) -> Result<Vec<BounceEvent>, AdapterError>;
}

/// Operator callback mapping imported events to opt-out calls.
#[rocket::async_trait]
pub trait OptOutProcessor: Send + Sync {
    async fn process_opt_outs(
        &self,
        service: &SubscriptionService,
        events: &[BounceEvent],
    ) -> OptOutResult<()>;
}

/// Opts every imported address out of a fixed set of companies on one list.
#[derive(Debug, Clone)]
pub struct OptOutFromCompanies {
    pub company_ids: Vec<i64>,
    pub list: String,
}

#[rocket::async_trait]
impl OptOutProcessor for OptOutFromCompanies {
    async fn process_opt_outs(
        &self,
        service: &SubscriptionService,
        events: &[BounceEvent],
    ) -> OptOutResult<()> {
        for event in events {
            for company_id in &self.company_ids {
                match service.opt_out(&event.email, *company_id, &self.list).await {
                    Ok(_) => {}
                    Err(OptOutError::InvalidArgument(message)) => {
                        log::warn!(
                            "skipping bounce event ({}) for company {}: {}",
                            event.reason,
                            company_id,
                            message
                        );
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(())
    }
}

pub type ProcessorFuture = Pin<Box<dyn Future<Output = OptOutResult<()>> + Send>>;

/// Adapts a closure into an [`OptOutProcessor`].
pub struct FnProcessor<F>(pub F);

#[rocket::async_trait]
impl<F> OptOutProcessor for FnProcessor<F>
where
    F: Fn(SubscriptionService, Vec<BounceEvent>) -> ProcessorFuture + Send + Sync,
{
    async fn process_opt_outs(
        &self,
        service: &SubscriptionService,
        events: &[BounceEvent],
    ) -> OptOutResult<()> {
        (self.0)(service.clone(), events.to_vec()).await
    }
}

#[derive(Debug, Clone, Serialize, JsonSchema, PartialEq, Eq)]
pub struct AdapterFailure {
    pub adapter: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, JsonSchema)]
pub struct ImportReport {
    #[serde(rename = "adaptersRun")]
    pub adapters_run: usize,
    #[serde(rename = "eventsFetched")]
    pub events_fetched: usize,
    /// Events dropped before processing because they carried no address.
    #[serde(rename = "eventsSkipped")]
    pub events_skipped: usize,
    pub failures: Vec<AdapterFailure>,
}

/// Explicit set of adapters plus the processor their events go to.
#[derive(Clone, Default)]
pub struct BounceRegistry {
    adapters: Vec<Arc<dyn BounceAdapter>>,
    processor: Option<Arc<dyn OptOutProcessor>>,
    concurrent: bool,
}

impl BounceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, adapter: impl BounceAdapter + 'static) -> Self {
        self.adapters.push(Arc::new(adapter));
        self
    }

    pub fn with_processor(mut self, processor: impl OptOutProcessor + 'static) -> Self {
        self.processor = Some(Arc::new(processor));
        self
    }

    /// Run adapters as parallel tasks instead of one after another.
    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub fn adapter_names(&self) -> Vec<&str> {
        self.adapters.iter().map(|adapter| adapter.name()).collect()
    }

    pub fn has_processor(&self) -> bool {
        self.processor.is_some()
    }

    /// Fetch from every adapter and pass the collected events to the processor.
    ///
    /// Fails with [`OptOutError::NotConfigured`] before any provider is contacted
    /// when no processor is registered.
    pub async fn fetch_opt_outs(&self, service: &SubscriptionService) -> OptOutResult<ImportReport> {
        let Some(processor) = self.processor.as_ref() else {
            log::error!(
                "bounce import requested with {} adapters but no opt-out processor is configured",
                self.adapters.len()
            );
            return Err(OptOutError::NotConfigured);
        };

        let results = if self.concurrent {
            self.fetch_concurrently().await
        } else {
            self.fetch_sequentially().await
        };

        let mut report = ImportReport {
            adapters_run: self.adapters.len(),
            ..ImportReport::default()
        };
        let mut events = Vec::new();

        for (adapter, result) in results {
            match result {
                Ok(fetched) => {
                    log::info!("bounce adapter {} returned {} events", adapter, fetched.len());
                    events.extend(fetched);
                }
                Err(message) => {
                    log::warn!("bounce adapter {} failed: {}", adapter, message);
                    report.failures.push(AdapterFailure { adapter, message });
                }
            }
        }

        report.events_fetched = events.len();
        events.retain(|event| {
            let usable = !event.email.trim().is_empty();
            if !usable {
                log::warn!("dropping bounce event ({}) without an email address", event.reason);
            }
            usable
        });
        report.events_skipped = report.events_fetched - events.len();

        processor.process_opt_outs(service, &events).await?;

        Ok(report)
    }

    async fn fetch_sequentially(&self) -> Vec<(String, Result<Vec<BounceEvent>, String>)> {
        let mut results = Vec::with_capacity(self.adapters.len());
        for adapter in &self.adapters {
            let result = adapter.fetch_opt_outs().await.map_err(|err| err.to_string());
            results.push((adapter.name().to_string(), result));
        }
        results
    }

    async fn fetch_concurrently(&self) -> Vec<(String, Result<Vec<BounceEvent>, String>)> {
        let mut tasks = JoinSet::new();
        for (index, adapter) in self.adapters.iter().enumerate() {
            let adapter = Arc::clone(adapter);
            tasks.spawn(async move {
                let result = adapter.fetch_opt_outs().await.map_err(|err| err.to_string());
                (index, result)
            });
        }

        let mut slots: Vec<Option<Result<Vec<BounceEvent>, String>>> =
            vec![None; self.adapters.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(err) => log::error!("bounce adapter task failed to complete: {}", err),
            }
        }

        // Keep registration order in the report.
        self.adapters
            .iter()
            .zip(slots)
            .map(|(adapter, slot)| {
                let result = slot.unwrap_or_else(|| Err("adapter task aborted".to_string()));
                (adapter.name().to_string(), result)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryOptOutStore;
    use chrono::{Duration, Utc};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticAdapter {
        name: &'static str,
        events: Vec<BounceEvent>,
        calls: Arc<AtomicUsize>,
    }

    #[rocket::async_trait]
    impl BounceAdapter for StaticAdapter {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch_opt_outs(&self) -> Result<Vec<BounceEvent>, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.events.clone())
        }
    }

    struct FailingAdapter;

    #[rocket::async_trait]
    impl BounceAdapter for FailingAdapter {
        fn name(&self) -> &str {
            "broken"
        }

        async fn fetch_opt_outs(&self) -> Result<Vec<BounceEvent>, AdapterError> {
            Err(AdapterError::Status {
                status: 401,
                body: "bad api key".into(),
            })
        }
    }

    fn event(email: &str, reason: &str) -> BounceEvent {
        BounceEvent {
            email: email.into(),
            timestamp: Utc::now() - Duration::days(1),
            reason: reason.into(),
        }
    }

    fn static_adapter(calls: &Arc<AtomicUsize>) -> StaticAdapter {
        StaticAdapter {
            name: "static",
            events: vec![
                event("test@example.com", "bounce"),
                event("test2@example.com", "spam"),
            ],
            calls: Arc::clone(calls),
        }
    }

    fn service() -> SubscriptionService {
        SubscriptionService::new(Arc::new(MemoryOptOutStore::new()))
    }

    #[tokio::test]
    async fn processes_events_from_all_adapters() {
        let service = service();
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = BounceRegistry::new()
            .register(static_adapter(&calls))
            .with_processor(OptOutFromCompanies {
                company_ids: vec![1, 2],
                list: "marketing".into(),
            });

        let report = registry.fetch_opt_outs(&service).await.expect("import runs");

        assert_eq!(report.adapters_run, 1);
        assert_eq!(report.events_fetched, 2);
        assert!(report.failures.is_empty());
        for company_id in [1, 2] {
            assert!(service.opted_out("test@example.com", company_id, "marketing").await.unwrap());
            assert!(service.opted_out("test2@example.com", company_id, "marketing").await.unwrap());
        }
    }

    #[tokio::test]
    async fn missing_processor_is_not_configured() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = BounceRegistry::new().register(static_adapter(&calls));

        let err = registry
            .fetch_opt_outs(&service())
            .await
            .expect_err("no processor");

        assert!(matches!(err, OptOutError::NotConfigured));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "providers are not contacted");
    }

    #[tokio::test]
    async fn failing_adapter_does_not_block_the_batch() {
        for concurrent in [false, true] {
            let service = service();
            let calls = Arc::new(AtomicUsize::new(0));
            let seen = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&seen);

            let registry = BounceRegistry::new()
                .register(FailingAdapter)
                .register(static_adapter(&calls))
                .concurrent(concurrent)
                .with_processor(FnProcessor(
                    move |_service: SubscriptionService, events: Vec<BounceEvent>| {
                        let sink = Arc::clone(&sink);
                        Box::pin(async move {
                            sink.lock().extend(events.into_iter().map(|event| event.email));
                            Ok::<(), OptOutError>(())
                        }) as ProcessorFuture
                    },
                ));

            let report = registry.fetch_opt_outs(&service).await.expect("import runs");

            assert_eq!(report.adapters_run, 2);
            assert_eq!(report.events_fetched, 2);
            assert_eq!(
                report.failures,
                vec![AdapterFailure {
                    adapter: "broken".into(),
                    message: "provider returned status 401: bad api key".into(),
                }]
            );
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert_eq!(
                *seen.lock(),
                vec!["test@example.com".to_string(), "test2@example.com".to_string()]
            );
        }
    }

    #[tokio::test]
    async fn blank_addresses_do_not_block_the_batch() {
        let service = service();
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = BounceRegistry::new()
            .register(StaticAdapter {
                name: "mixed",
                events: vec![event("  ", "bounce"), event("good@example.com", "bounce")],
                calls: Arc::clone(&calls),
            })
            .with_processor(OptOutFromCompanies {
                company_ids: vec![1],
                list: "marketing".into(),
            });

        let report = registry.fetch_opt_outs(&service).await.expect("import runs");

        assert_eq!(report.events_fetched, 2);
        assert_eq!(report.events_skipped, 1);
        assert!(report.failures.is_empty());
        assert!(service.opted_out("good@example.com", 1, "marketing").await.unwrap());
    }

    #[tokio::test]
    async fn stock_processor_skips_rejected_events() {
        let service = service();
        let processor = OptOutFromCompanies {
            company_ids: vec![1, 2],
            list: "marketing".into(),
        };

        processor
            .process_opt_outs(
                &service,
                &[event("", "spam"), event("good@example.com", "spam")],
            )
            .await
            .expect("invalid events are skipped");

        for company_id in [1, 2] {
            assert!(service.opted_out("good@example.com", company_id, "marketing").await.unwrap());
        }
    }

    #[tokio::test]
    async fn processor_errors_propagate() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = BounceRegistry::new()
            .register(static_adapter(&calls))
            .with_processor(FnProcessor(
                |_service: SubscriptionService, _events: Vec<BounceEvent>| {
                    Box::pin(async {
                        Err::<(), _>(OptOutError::InvalidArgument("Missing email".into()))
                    }) as ProcessorFuture
                },
            ));

        assert!(matches!(
            registry.fetch_opt_outs(&service()).await,
            Err(OptOutError::InvalidArgument(_))
        ));
    }
}
