/// Sink for messages the user should see before or after a filter runs.
pub trait UserNotifier: Send + Sync {
    fn warn(&self, title: &str, message: &str);

    fn info(&self, _title: &str, _message: &str) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl UserNotifier for TracingNotifier {
    fn warn(&self, title: &str, message: &str) {
        tracing::warn!(title, "{message}");
    }

    fn info(&self, title: &str, message: &str) {
        tracing::info!(title, "{message}");
    }
}
