use crate::job::JobHandle;
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::orchestrator::{execute_job, BackendFactory, Backends};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Submits jobs to a fixed set of background threads.
///
/// Each thread loads its own backends on its first job and keeps them for the
/// rest of its life. A job whose backends cannot be loaded fails without being
/// started.
pub struct WorkerPool {
    tx: Sender<Arc<JobHandle>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn<F>(
        workers: usize,
        factory: Arc<F>,
        config: Arc<PipelineConfig>,
        media_root: PathBuf,
    ) -> Self
    where
        F: BackendFactory + ?Sized + 'static,
    {
        let (tx, rx) = unbounded::<Arc<JobHandle>>();
        let handles = (0..workers.max(1))
            .map(|n| {
                let rx = rx.clone();
                let factory = factory.clone();
                let config = config.clone();
                let media_root = media_root.clone();
                tracing::info!("Spawning new job worker {}", n);
                thread::spawn(move || job_worker(rx, factory.as_ref(), &config, &media_root))
            })
            .collect();

        Self { tx, handles }
    }

    pub fn submit(&self, job: Arc<JobHandle>) {
        let id = job.id();
        if self.tx.send(job).is_err() {
            tracing::error!("Job {} dropped: worker pool is shut down", id);
        }
    }

    /// Stop accepting jobs and wait for queued ones to finish.
    pub fn shutdown(self) {
        drop(self.tx);
        for handle in self.handles {
            if handle.join().is_err() {
                tracing::error!("Job worker panicked");
            }
        }
    }
}

fn job_worker<F>(
    rx: Receiver<Arc<JobHandle>>,
    factory: &F,
    config: &PipelineConfig,
    media_root: &std::path::Path,
) where
    F: BackendFactory + ?Sized,
{
    let mut backends: Option<Backends> = None;

    for job in rx {
        if backends.is_none() {
            match factory.create() {
                Ok(created) => backends = Some(created),
                Err(e) => {
                    tracing::error!("Job {} failed: {:#}", job.id(), e);
                    if let Err(fail_err) = job.fail(format!("{:#}", e)) {
                        tracing::warn!("Job {}: {}", job.id(), fail_err);
                    }
                    continue;
                }
            }
        }

        if let Some(backends) = backends.as_mut() {
            if let Err(e) = execute_job(&job, backends, config, media_root) {
                tracing::error!("Job {} failed: {:#}", job.id(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobRegistry, JobStatus};
    use crate::pipeline::types::Product;
    use crate::video::FrameSource;
    use anyhow::Result;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct BrokenFactory {
        attempts: AtomicUsize,
    }

    impl BackendFactory for BrokenFactory {
        fn create(&self) -> Result<Backends> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("model file not found")
        }

        fn frame_source(&self) -> Arc<dyn FrameSource> {
            Arc::new(crate::pipeline::orchestrator::tests::FakeSource {
                frames: 0,
                seconds: 0.0,
            })
        }
    }

    #[test]
    fn test_backend_failure_fails_each_job() {
        let dir = tempdir().unwrap();
        let registry = JobRegistry::load(dir.path()).unwrap();
        let factory = Arc::new(BrokenFactory {
            attempts: AtomicUsize::new(0),
        });
        let pool = WorkerPool::spawn(
            1,
            factory.clone(),
            Arc::new(PipelineConfig::default()),
            dir.path().to_path_buf(),
        );

        let produce = BTreeSet::from([Product::Detections]);
        let first = registry.create("a.mp4".into(), produce.clone()).unwrap();
        let second = registry.create("b.mp4".into(), produce).unwrap();
        pool.submit(first.clone());
        pool.submit(second.clone());
        pool.shutdown();

        for job in [first, second] {
            let record = job.snapshot();
            assert_eq!(record.status, JobStatus::Failed);
            assert_eq!(record.error.as_deref(), Some("model file not found"));
        }
        assert_eq!(factory.attempts.load(Ordering::SeqCst), 2);
    }
}
