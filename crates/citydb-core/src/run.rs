//! Run coordination.
//!
//! An [`ExportRun`] owns everything shared by the workers of one export: the
//! configuration, catalog and schemas, the identity caches, the reporter and
//! the metrics. [`ExportRun::execute`] drives a fixed pool of worker threads,
//! each with its own connection and session.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::{IdentityCaches, XlinkResolver};
use crate::catalog::TypeCatalog;
use crate::config::ExportConfig;
use crate::engine::DemuxEnv;
use crate::error::Error;
use crate::export::{ExportRequest, ExportSession};
use crate::metrics::{ExportMetrics, MetricsSnapshot};
use crate::policy::{ErrorReporter, Report, Severity};
use crate::query::Connection;
use crate::schema::SchemaRegistry;
use crate::services::{
    ExtensionDelegate, FeatureSink, GeometryService, IdGenerator, JsonGeometryService,
    NoExtensions, UuidGenerator,
};

/// Services shared by every worker of a run.
pub struct RunServices {
    pub config: ExportConfig,
    pub catalog: TypeCatalog,
    pub schemas: SchemaRegistry,
    pub caches: IdentityCaches,
    pub reporter: ErrorReporter,
    pub metrics: Arc<ExportMetrics>,
    pub stop: Arc<AtomicBool>,
    pub delegate: Arc<dyn ExtensionDelegate>,
    pub geometry: Arc<dyn GeometryService>,
    pub ids: Arc<dyn IdGenerator>,
}

impl RunServices {
    pub fn xlink(&self) -> XlinkResolver<'_> {
        XlinkResolver::new(&self.config.xlink, &self.caches, self.ids.as_ref(), &self.metrics)
    }

    pub fn demux_env(&self) -> DemuxEnv<'_> {
        DemuxEnv {
            catalog: &self.catalog,
            projection: &self.config.projection,
            reporter: &self.reporter,
            metrics: &self.metrics,
            xlink: self.xlink(),
            geometry: self.geometry.as_ref(),
            delegate: self.delegate.as_ref(),
        }
    }

    /// Whether cancellation or an abort was requested.
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Builder for [`ExportRun`].
pub struct ExportRunBuilder {
    config: ExportConfig,
    catalog: Option<TypeCatalog>,
    schemas: Option<SchemaRegistry>,
    delegate: Arc<dyn ExtensionDelegate>,
    geometry: Arc<dyn GeometryService>,
    ids: Arc<dyn IdGenerator>,
}

impl ExportRunBuilder {
    /// Use a custom type catalog instead of the CityGML one.
    pub fn with_catalog(mut self, catalog: TypeCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Use custom export schemas instead of the CityGML ones.
    pub fn with_schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = Some(schemas);
        self
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn ExtensionDelegate>) -> Self {
        self.delegate = delegate;
        self
    }

    pub fn with_geometry_service(mut self, geometry: Arc<dyn GeometryService>) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Validate the schemas against the catalog and open the identity caches.
    pub fn build(self) -> Result<ExportRun, Error> {
        let catalog = self.catalog.unwrap_or_else(TypeCatalog::citygml);
        let schemas = match self.schemas {
            Some(schemas) => schemas,
            None => SchemaRegistry::citygml()?,
        };
        schemas.check_targets()?;
        for name in schemas.names() {
            if let Some(schema) = schemas.get(name) {
                if let Some(class) = schema.classes.iter().find(|c| catalog.type_of(**c).is_err()) {
                    return Err(Error::InvalidSchema(format!(
                        "{name}: object class {class} is not in the catalog"
                    )));
                }
            }
        }

        let caches = IdentityCaches::open(&self.config.identity_cache)?;
        let metrics = Arc::new(ExportMetrics::new());
        let stop = Arc::new(AtomicBool::new(false));
        let reporter = ErrorReporter::new(self.config.error_policy, stop.clone(), metrics.clone());

        tracing::debug!(
            schemas = schemas.len(),
            types = catalog.len(),
            policy = ?self.config.error_policy,
            "export run ready"
        );

        Ok(ExportRun {
            services: Arc::new(RunServices {
                config: self.config,
                catalog,
                schemas,
                caches,
                reporter,
                metrics,
                stop,
                delegate: self.delegate,
                geometry: self.geometry,
                ids: self.ids,
            }),
        })
    }
}

/// Outcome of [`ExportRun::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub exported: usize,
    pub skipped: usize,
    /// The run stopped before its queue was empty.
    pub cancelled: bool,
    /// Requests never started.
    pub remaining: usize,
    pub warnings: usize,
    pub errors: usize,
    pub metrics: MetricsSnapshot,
}

/// One export run.
pub struct ExportRun {
    services: Arc<RunServices>,
}

impl ExportRun {
    pub fn builder(config: ExportConfig) -> ExportRunBuilder {
        ExportRunBuilder {
            config,
            catalog: None,
            schemas: None,
            delegate: Arc::new(NoExtensions),
            geometry: Arc::new(JsonGeometryService::new()),
            ids: Arc::new(UuidGenerator::default()),
        }
    }

    pub fn services(&self) -> &Arc<RunServices> {
        &self.services
    }

    /// A session over `connection`, for callers driving exports themselves.
    pub fn session(&self, connection: Arc<dyn Connection>, flat_output: bool) -> ExportSession {
        ExportSession::new(self.services.clone(), connection, flat_output)
    }

    /// Request cooperative cancellation. Workers stop before their next unit.
    pub fn cancel(&self) {
        self.services.stop.store(true, Ordering::SeqCst);
    }

    /// Flag raised by [`ExportRun::cancel`] and by fail-fast aborts.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.services.stop.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.services.metrics.snapshot()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.services.reporter.reports()
    }

    /// Export every request and write the results to `sink`.
    ///
    /// `connect` opens the connection of worker `n`. The first fatal error
    /// stops all workers and is returned once they have finished their
    /// current unit.
    pub fn execute<C>(
        &self,
        requests: Vec<ExportRequest>,
        connect: C,
        sink: &dyn FeatureSink,
    ) -> Result<RunSummary, Error>
    where
        C: Fn(usize) -> Result<Arc<dyn Connection>, Error> + Sync,
    {
        let total = requests.len();
        let workers = self.services.config.workers.clamp(1, total.max(1));
        let flat = sink.supports_flat_output();
        let queue = Mutex::new(VecDeque::from(requests));
        let exported = AtomicUsize::new(0);
        let skipped = AtomicUsize::new(0);
        let failure: Mutex<Option<Error>> = Mutex::new(None);

        tracing::info!(requests = total, workers, flat, "starting export");

        std::thread::scope(|scope| {
            for worker in 0..workers {
                let queue = &queue;
                let connect = &connect;
                let exported = &exported;
                let skipped = &skipped;
                let failure = &failure;
                scope.spawn(move || {
                    let result = self.work(worker, queue, connect, sink, flat, exported, skipped);
                    if let Err(e) = result {
                        tracing::error!(worker, error = %e, "worker stopped");
                        self.services.stop.store(true, Ordering::SeqCst);
                        failure.lock().get_or_insert(e);
                    }
                });
            }
        });

        if let Some(e) = failure.into_inner() {
            return Err(e);
        }

        let remaining = queue.into_inner().len();
        let reporter = &self.services.reporter;
        let summary = RunSummary {
            exported: exported.into_inner(),
            skipped: skipped.into_inner(),
            cancelled: self.services.is_stopped(),
            remaining,
            warnings: reporter.count(Severity::Warning),
            errors: reporter.count(Severity::Error),
            metrics: self.services.metrics.snapshot(),
        };
        tracing::info!(
            exported = summary.exported,
            skipped = summary.skipped,
            remaining,
            cancelled = summary.cancelled,
            "export finished"
        );
        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    fn work<C>(
        &self,
        worker: usize,
        queue: &Mutex<VecDeque<ExportRequest>>,
        connect: &C,
        sink: &dyn FeatureSink,
        flat: bool,
        exported: &AtomicUsize,
        skipped: &AtomicUsize,
    ) -> Result<(), Error>
    where
        C: Fn(usize) -> Result<Arc<dyn Connection>, Error> + Sync,
    {
        let session = self.session(connect(worker)?, flat);
        tracing::debug!(worker, "worker started");

        loop {
            if self.services.is_stopped() {
                tracing::debug!(worker, "stop requested");
                break;
            }
            let Some(request) = queue.lock().pop_front() else {
                break;
            };
            match session.export(request)? {
                Some(output) => {
                    sink.write(output)?;
                    exported.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    skipped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        Ok(())
    }
}
