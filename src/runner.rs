//! In-process execution driver.
//!
//! The connector itself never spawns threads. [`Runner`] plays the part of an execution
//! framework: it splits a source and reads every partition, or shards documents across
//! writers, either on the calling thread or on the rayon pool. Every reader and writer is
//! owned by exactly one task and is closed on every exit path.

use crate::bounded::BoundedSource;
use crate::config::WriteSpec;
use crate::error::MongoResult;
use crate::metrics::IoMetrics;
use crate::source::MongoSource;
use crate::store::MongoConnector;
use crate::writer::MongoWriter;
use anyhow::{Context, Result};
use bson::Document;
use log::debug;
use rayon::prelude::*;
use std::sync::Arc;

#[derive(Clone, Copy, Debug)]
pub enum ExecMode {
    Sequential,
    Parallel {
        threads: Option<usize>,
        partitions: Option<usize>,
    },
}

pub struct Runner {
    pub mode: ExecMode,
    pub default_partitions: usize,
    pub metrics: Option<Arc<IoMetrics>>,
}

impl Default for Runner {
    fn default() -> Self {
        Self {
            mode: ExecMode::Parallel {
                threads: None,
                partitions: None,
            },
            default_partitions: 2 * num_cpus::get().max(2),
            metrics: None,
        }
    }
}

impl Runner {
    #[must_use]
    pub fn sequential() -> Self {
        Self {
            mode: ExecMode::Sequential,
            ..Self::default()
        }
    }

    /// Attach counters to every source, reader and writer this runner drives.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<IoMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Number of partitions (read) or writers (write) to aim for.
    #[must_use]
    pub fn partitions(&self) -> usize {
        match self.mode {
            ExecMode::Sequential => self.default_partitions.max(1),
            ExecMode::Parallel { partitions, .. } => {
                partitions.unwrap_or(self.default_partitions).max(1)
            }
        }
    }

    fn configure_pool(&self) {
        if let ExecMode::Parallel {
            threads: Some(t), ..
        } = self.mode
        {
            // ok() to ignore "already built" on repeated calls in tests
            rayon::ThreadPoolBuilder::new()
                .num_threads(t)
                .build_global()
                .ok();
        }
    }

    fn attach(&self, source: &MongoSource) -> MongoSource {
        match &self.metrics {
            Some(metrics) => source.clone().with_metrics(Arc::clone(metrics)),
            None => source.clone(),
        }
    }

    /// Split `source` and read every partition.
    ///
    /// Partitions are read concurrently in parallel mode; the result is always the
    /// concatenation of the partitions in split order. Attached metrics time the run
    /// whether it succeeds or fails.
    ///
    /// # Errors
    ///
    /// Returns the first size estimation, split or read failure.
    pub fn read(&self, source: &MongoSource) -> Result<Vec<Document>> {
        let source = self.attach(source);
        self.timed(|| self.read_partitions(&source))
    }

    fn read_partitions(&self, source: &MongoSource) -> Result<Vec<Document>> {
        let size = source
            .estimated_size_bytes()
            .context("estimating collection size")?;
        let desired = size / self.partitions() as u64;
        let sources = source
            .split(desired)
            .with_context(|| format!("splitting into {desired} byte bundles"))?;
        debug!("Reading {} partitions", sources.len());

        let parts: Vec<Vec<Document>> = match self.mode {
            ExecMode::Sequential => sources
                .iter()
                .enumerate()
                .map(|(i, s)| read_partition(i, s))
                .collect::<Result<_>>()?,
            ExecMode::Parallel { .. } => {
                self.configure_pool();
                sources
                    .par_iter()
                    .enumerate()
                    .map(|(i, s)| read_partition(i, s))
                    .collect::<Result<_>>()?
            }
        };
        Ok(parts.into_iter().flatten().collect())
    }

    /// Write `docs` through one [`MongoWriter`] per shard.
    ///
    /// Each shard is fed to its writer in bundles of `bundle_size` documents. The writer's
    /// own `batch_size` decides how bundles turn into bulk inserts. Attached metrics time
    /// the run whether it succeeds or fails.
    ///
    /// # Errors
    ///
    /// Returns the first configuration, connection or ordered bulk-write failure.
    pub fn write(
        &self,
        spec: &WriteSpec,
        connector: Arc<dyn MongoConnector>,
        docs: Vec<Document>,
        bundle_size: usize,
    ) -> Result<()> {
        self.timed(|| self.write_shards(spec, connector, docs, bundle_size))
    }

    fn write_shards(
        &self,
        spec: &WriteSpec,
        connector: Arc<dyn MongoConnector>,
        docs: Vec<Document>,
        bundle_size: usize,
    ) -> Result<()> {
        let shards = match self.mode {
            ExecMode::Sequential => vec![docs],
            ExecMode::Parallel { .. } => split_vec(docs, self.partitions()),
        };
        let run = |(i, shard): (usize, Vec<Document>)| {
            let metrics = self.metrics.clone();
            write_shard(spec, Arc::clone(&connector), metrics, &shard, bundle_size)
                .with_context(|| format!("writer {i} ({} documents)", shard.len()))
        };

        match self.mode {
            ExecMode::Sequential => shards.into_iter().enumerate().try_for_each(run),
            ExecMode::Parallel { .. } => {
                self.configure_pool();
                shards
                    .into_par_iter()
                    .enumerate()
                    .map(run)
                    .collect::<Result<Vec<()>>>()
                    .map(|_| ())
            }
        }
    }

    // Brackets `body` with start/end marks on the attached metrics, on every exit path.
    fn timed<T>(&self, body: impl FnOnce() -> Result<T>) -> Result<T> {
        if let Some(metrics) = &self.metrics {
            metrics.record_start();
        }
        let result = body();
        if let Some(metrics) = &self.metrics {
            metrics.record_end();
        }
        result
    }
}

fn read_partition(index: usize, source: &MongoSource) -> Result<Vec<Document>> {
    source
        .create_reader()
        .documents()
        .collect::<MongoResult<Vec<_>>>()
        .with_context(|| {
            format!(
                "reading partition {index} (filter {})",
                source.spec().filter.as_deref().unwrap_or("{}")
            )
        })
}

fn write_shard(
    spec: &WriteSpec,
    connector: Arc<dyn MongoConnector>,
    metrics: Option<Arc<IoMetrics>>,
    docs: &[Document],
    bundle_size: usize,
) -> Result<()> {
    let mut writer = MongoWriter::new(spec.clone(), connector)?;
    if let Some(metrics) = metrics {
        writer = writer.with_metrics(metrics);
    }
    let result = drive_writer(&mut writer, docs, bundle_size);
    writer.teardown();
    Ok(result?)
}

fn drive_writer(
    writer: &mut MongoWriter,
    docs: &[Document],
    bundle_size: usize,
) -> MongoResult<()> {
    writer.setup()?;
    for bundle in docs.chunks(bundle_size.max(1)) {
        writer.start_bundle()?;
        for doc in bundle {
            writer.process(doc)?;
        }
        writer.finish_bundle()?;
    }
    Ok(())
}

fn split_vec<T>(v: Vec<T>, n: usize) -> Vec<Vec<T>> {
    let len = v.len();
    if n <= 1 || len <= 1 {
        return vec![v];
    }
    let chunk = len.div_ceil(n);
    let mut out = Vec::with_capacity(n);
    let mut rest = v;
    while rest.len() > chunk {
        let tail = rest.split_off(chunk);
        out.push(rest);
        rest = tail;
    }
    out.push(rest);
    out
}
