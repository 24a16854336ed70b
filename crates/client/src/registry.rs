//! Keyed registry of live streams
//!
//! Several consumers can watch the same subject; the registry hands out
//! leases over one shared stream per subject, created on first acquire
//! and destroyed (connection closed intentionally) when the last lease is
//! released. Releases go through the lease's Drop so a panicking consumer
//! still returns its reference.

use std::ops::Deref;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use downlink_protocol::Subject;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::stream::{LogStream, ProcessStream};

/// A stream the registry can shut down on last release.
pub trait SharedStream: Send + Sync + 'static {
    fn shutdown(&self);
}

impl SharedStream for LogStream {
    fn shutdown(&self) {
        self.close();
    }
}

impl SharedStream for ProcessStream {
    fn shutdown(&self) {
        self.close();
    }
}

struct Slot<T> {
    stream: Arc<T>,
    refs: usize,
}

pub struct StreamRegistry {
    config: ClientConfig,
    logs: Arc<DashMap<Subject, Slot<LogStream>>>,
    processes: Arc<DashMap<Subject, Slot<ProcessStream>>>,
}

impl StreamRegistry {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            logs: Arc::new(DashMap::new()),
            processes: Arc::new(DashMap::new()),
        }
    }

    /// Lease the shared log stream for `subject`, creating it on first use.
    pub fn acquire_log(&self, subject: Subject) -> Result<StreamLease<LogStream>, ClientError> {
        acquire(&self.logs, subject, || {
            LogStream::open(self.config.clone(), subject)
        })
    }

    /// Lease the shared process stream for an attempt subject.
    pub fn acquire_processes(
        &self,
        subject: Subject,
    ) -> Result<StreamLease<ProcessStream>, ClientError> {
        acquire(&self.processes, subject, || {
            ProcessStream::open(self.config.clone(), subject)
        })
    }

    /// Number of live log streams (diagnostics).
    pub fn live_log_streams(&self) -> usize {
        self.logs.len()
    }
}

fn acquire<T: SharedStream>(
    slots: &Arc<DashMap<Subject, Slot<T>>>,
    subject: Subject,
    create: impl FnOnce() -> Result<T, ClientError>,
) -> Result<StreamLease<T>, ClientError> {
    let stream = match slots.entry(subject) {
        Entry::Occupied(mut occupied) => {
            occupied.get_mut().refs += 1;
            Arc::clone(&occupied.get().stream)
        }
        Entry::Vacant(vacant) => {
            let stream = Arc::new(create()?);
            debug!(
                component = "stream_registry",
                event = "registry.stream_created",
                subject = %subject,
                "Created shared stream"
            );
            vacant.insert(Slot {
                stream: Arc::clone(&stream),
                refs: 1,
            });
            stream
        }
    };
    Ok(StreamLease {
        subject,
        stream,
        slots: Arc::clone(slots),
    })
}

/// One consumer's reference to a shared stream.
pub struct StreamLease<T: SharedStream> {
    subject: Subject,
    stream: Arc<T>,
    slots: Arc<DashMap<Subject, Slot<T>>>,
}

impl<T: SharedStream> Deref for StreamLease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.stream
    }
}

impl<T: SharedStream> Drop for StreamLease<T> {
    fn drop(&mut self) {
        let mut destroy = None;
        if let Entry::Occupied(mut occupied) = self.slots.entry(self.subject) {
            occupied.get_mut().refs -= 1;
            if occupied.get().refs == 0 {
                destroy = Some(occupied.remove().stream);
            }
        }
        if let Some(stream) = destroy {
            debug!(
                component = "stream_registry",
                event = "registry.stream_destroyed",
                subject = %self.subject,
                "Destroying shared stream on last release"
            );
            stream.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;
    use uuid::Uuid;

    fn registry() -> StreamRegistry {
        let config = ClientConfig::new(Url::parse("http://127.0.0.1:1").unwrap());
        StreamRegistry::new(config)
    }

    #[tokio::test]
    async fn same_subject_shares_one_stream() {
        let registry = registry();
        let subject = Subject::ProcessLogs(Uuid::new_v4());

        let a = registry.acquire_log(subject).unwrap();
        let b = registry.acquire_log(subject).unwrap();
        assert_eq!(registry.live_log_streams(), 1);
        assert!(Arc::ptr_eq(&a.stream, &b.stream));
    }

    #[tokio::test]
    async fn last_release_destroys_the_stream() {
        let registry = registry();
        let subject = Subject::ProcessLogs(Uuid::new_v4());

        let a = registry.acquire_log(subject).unwrap();
        let b = registry.acquire_log(subject).unwrap();
        drop(a);
        assert_eq!(registry.live_log_streams(), 1);
        drop(b);
        assert_eq!(registry.live_log_streams(), 0);

        // A fresh acquire recreates the slot
        let _c = registry.acquire_log(subject).unwrap();
        assert_eq!(registry.live_log_streams(), 1);
    }

    #[tokio::test]
    async fn distinct_subjects_get_distinct_streams() {
        let registry = registry();
        let _a = registry
            .acquire_log(Subject::ProcessLogs(Uuid::new_v4()))
            .unwrap();
        let _b = registry
            .acquire_log(Subject::ProcessRaw(Uuid::new_v4()))
            .unwrap();
        assert_eq!(registry.live_log_streams(), 2);
    }
}
