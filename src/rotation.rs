use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::config::{self, CredentialSource};
use crate::store::CredentialStore;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Rotates the active credential set without service interruption.
///
/// Runs as a background task: re-resolves the configured sources on SIGHUP
/// (unix) and on a periodic poll, then atomically swaps the store. In-flight
/// challenge resolutions keep the snapshot they started with. A failed
/// reload keeps the previous set, so rotation never degrades a running agent.
pub struct RotationScheduler {
    store: CredentialStore,
    sources: Vec<Box<dyn CredentialSource>>,
    poll_interval: Duration,
}

impl RotationScheduler {
    pub fn new(store: CredentialStore, sources: Vec<Box<dyn CredentialSource>>) -> Self {
        Self {
            store,
            sources,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Spawn the rotation task. The handle may be dropped; the task runs for
    /// the life of the runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        tracing::info!(
            poll_secs = self.poll_interval.as_secs(),
            "credential rotation scheduler started"
        );
        let mut tick = tokio::time::interval(self.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; startup provisioning already
        // happened, so swallow it.
        tick.tick().await;

        #[cfg(unix)]
        let mut hangup =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                Ok(signal) => Some(signal),
                Err(err) => {
                    tracing::warn!("cannot listen for SIGHUP, poll-only rotation: {err}");
                    None
                }
            };

        loop {
            #[cfg(unix)]
            if let Some(signal) = hangup.as_mut() {
                tokio::select! {
                    _ = tick.tick() => self.reload("poll").await,
                    _ = signal.recv() => self.reload("sighup").await,
                }
                continue;
            }

            tick.tick().await;
            self.reload("poll").await;
        }
    }

    async fn reload(&self, trigger: &str) {
        match config::provision(&self.store, &self.sources).await {
            Ok(count) => {
                tracing::info!(trigger, credentials = count, "credential set rotated");
            }
            Err(err) => {
                tracing::warn!(trigger, "rotation failed, keeping previous set: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::ProxyAuthority;
    use crate::config::FileSource;

    fn yaml(username: &str) -> String {
        format!(
            "credentials:\n  - host: proxy.example\n    port: 8080\n    username: {username}\n    secret: pw\n"
        )
    }

    #[tokio::test]
    async fn test_poll_rotation_swaps_store() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), yaml("first")).unwrap();

        let store = CredentialStore::new();
        let sources: Vec<Box<dyn CredentialSource>> =
            vec![Box::new(FileSource::new(file.path()))];
        config::provision(&store, &sources).await.unwrap();

        let scheduler = RotationScheduler::new(store.clone(), sources)
            .with_poll_interval(Duration::from_millis(25));
        let handle = scheduler.spawn();

        std::fs::write(file.path(), yaml("second")).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let authority = ProxyAuthority::new("proxy.example", 8080);
        assert_eq!(store.snapshot().get(&authority).unwrap().username, "second");
        handle.abort();
    }

    #[tokio::test]
    async fn test_failed_rotation_keeps_previous_set() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), yaml("only")).unwrap();
        let path = file.path().to_path_buf();

        let store = CredentialStore::new();
        let sources: Vec<Box<dyn CredentialSource>> = vec![Box::new(FileSource::new(&path))];
        config::provision(&store, &sources).await.unwrap();

        let scheduler = RotationScheduler::new(store.clone(), sources)
            .with_poll_interval(Duration::from_millis(25));
        let handle = scheduler.spawn();

        // Secrets file disappears out from under the scheduler.
        drop(file);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let authority = ProxyAuthority::new("proxy.example", 8080);
        assert_eq!(store.snapshot().get(&authority).unwrap().username, "only");
        handle.abort();
    }
}
