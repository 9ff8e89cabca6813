use crate::error::AppError;

type Cleanup<R> = Box<dyn FnOnce(Vec<R>) -> Result<(), AppError> + Send>;

/// Scoped ownership of resources with a cleanup that runs exactly once.
///
/// The cleanup receives every registered resource when the guard is
/// released explicitly or dropped, whichever comes first, including drops
/// caused by `?` early returns or panics. Cleanup errors are logged.
///
/// ```
/// use vigil_core::guard::ResourceGuard;
///
/// let mut guard = ResourceGuard::new("tabs", |tabs: Vec<u32>| {
///     assert_eq!(tabs, vec![1, 2]);
///     Ok(())
/// });
/// guard.add(1);
/// guard.add(2);
/// drop(guard);
/// ```
pub struct ResourceGuard<R> {
    label: String,
    resources: Vec<R>,
    cleanup: Option<Cleanup<R>>,
}

impl<R> ResourceGuard<R> {
    pub fn new(
        label: impl Into<String>,
        cleanup: impl FnOnce(Vec<R>) -> Result<(), AppError> + Send + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            resources: Vec::new(),
            cleanup: Some(Box::new(cleanup)),
        }
    }

    /// Register another resource; it is handed to the cleanup on exit.
    pub fn add(&mut self, resource: R) {
        self.resources.push(resource);
    }

    pub fn resources(&self) -> &[R] {
        &self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Run the cleanup now. Later drops are no-ops.
    pub fn release(mut self) {
        self.run_cleanup();
    }

    fn run_cleanup(&mut self) {
        let Some(cleanup) = self.cleanup.take() else {
            return;
        };
        let resources = std::mem::take(&mut self.resources);
        let count = resources.len();
        match cleanup(resources) {
            Ok(()) => tracing::debug!(guard = %self.label, count, "Resources released"),
            Err(e) => tracing::warn!(guard = %self.label, error = %e, "Cleanup failed"),
        }
    }
}

impl<R> Drop for ResourceGuard<R> {
    fn drop(&mut self) {
        self.run_cleanup();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn recording_guard(log: &Arc<Mutex<Vec<Vec<&'static str>>>>) -> ResourceGuard<&'static str> {
        let log = Arc::clone(log);
        ResourceGuard::new("test", move |resources| {
            log.lock().unwrap().push(resources);
            Ok(())
        })
    }

    #[test]
    fn test_cleanup_runs_on_drop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let mut guard = recording_guard(&log);
            guard.add("session");
        }
        assert_eq!(*log.lock().unwrap(), vec![vec!["session"]]);
    }

    #[test]
    fn test_release_runs_cleanup_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut guard = recording_guard(&log);
        guard.add("session");
        guard.add("tab");
        guard.release();
        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(log.lock().unwrap()[0], vec!["session", "tab"]);
    }

    #[test]
    fn test_cleanup_runs_on_early_return() {
        fn work(log: &Arc<Mutex<Vec<Vec<&'static str>>>>, fail: bool) -> Result<(), AppError> {
            let mut guard = recording_guard(log);
            guard.add("session");
            if fail {
                return Err(AppError::Timeout(1));
            }
            guard.add("page");
            Ok(())
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        assert!(work(&log, true).is_err());
        assert_eq!(*log.lock().unwrap(), vec![vec!["session"]]);
    }

    #[test]
    fn test_cleanup_runs_on_panic() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner = Arc::clone(&log);
        let result = std::panic::catch_unwind(move || {
            let mut guard = recording_guard(&inner);
            guard.add("session");
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_cleanup_error_is_swallowed() {
        let guard: ResourceGuard<u8> =
            ResourceGuard::new("failing", |_| Err(AppError::Generic("close failed".into())));
        drop(guard);
    }
}
