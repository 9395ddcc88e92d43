//! Gateway — the main event loop connecting channels to the engine.
//!
//! Inbound updates from every channel fan into one queue, then fan out to
//! per-user worker tasks. A worker processes its user's updates strictly
//! one at a time, so two rapid messages from the same person can never
//! interleave their state transitions; updates from different people run
//! concurrently. Also owns the idle-session sweeper and graceful shutdown.

use crate::engine::Engine;
use qalabot_core::{config::SessionConfig, traits::Channel, update::Update};
use qalabot_session::SessionStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// The central gateway routing updates between channels and the engine.
pub struct Gateway {
    engine: Arc<Engine>,
    channels: HashMap<String, Arc<dyn Channel>>,
    store: SessionStore,
    session_config: SessionConfig,
}

impl Gateway {
    pub fn new(
        engine: Arc<Engine>,
        channels: HashMap<String, Arc<dyn Channel>>,
        store: SessionStore,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            engine,
            channels,
            store,
            session_config,
        }
    }

    /// Run the main event loop.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        info!(
            "Qalabot gateway running | channels: {} | idle threshold: {}s",
            self.channels.keys().cloned().collect::<Vec<_>>().join(", "),
            self.session_config.idle_threshold_secs
        );

        let (tx, mut rx) = mpsc::channel::<Update>(256);

        for (name, channel) in &self.channels {
            let mut channel_rx = channel
                .start()
                .await
                .map_err(|e| anyhow::anyhow!("failed to start channel {name}: {e}"))?;
            let tx = tx.clone();
            let channel_name = name.clone();

            tokio::spawn(async move {
                while let Some(update) = channel_rx.recv().await {
                    if tx.send(update).await.is_err() {
                        info!("gateway receiver dropped, stopping {channel_name} forwarder");
                        break;
                    }
                }
            });

            info!("Channel started: {name}");
        }

        drop(tx);

        // Spawn the idle-session sweeper.
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweep_handle = tokio::spawn(Self::sweeper_loop(
            self.store.clone(),
            self.session_config.clone(),
            shutdown_rx,
        ));

        let mut workers: HashMap<String, mpsc::Sender<Update>> = HashMap::new();

        // Main event loop with graceful shutdown.
        loop {
            tokio::select! {
                maybe_update = rx.recv() => {
                    match maybe_update {
                        Some(update) => self.dispatch(update, &mut workers),
                        None => {
                            info!("all channel forwarders stopped");
                            break;
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        // Graceful shutdown: stop the sweeper, let workers drain, stop channels.
        let _ = shutdown_tx.send(true);
        let _ = sweep_handle.await;
        drop(workers);

        for (name, channel) in &self.channels {
            if let Err(e) = channel.stop().await {
                warn!("failed to stop channel {name}: {e}");
            }
        }

        info!("Shutdown complete.");
        Ok(())
    }

    /// Background task: periodically evict conversations idle past the
    /// threshold. An entry refreshed while a sweep runs is spared by the
    /// store's removal-time re-check.
    async fn sweeper_loop(
        store: SessionStore,
        config: SessionConfig,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let interval = Duration::from_secs(config.sweep_interval_secs);
        let idle_threshold = chrono::Duration::seconds(config.idle_threshold_secs as i64);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let removed = store.sweep(idle_threshold, chrono::Utc::now());
                    if removed > 0 {
                        info!("sweeper: evicted {removed} idle conversations ({} remain)", store.len());
                    } else {
                        debug!("sweeper: nothing to evict ({} active)", store.len());
                    }
                }
                _ = shutdown.changed() => {
                    debug!("sweeper: shutdown");
                    break;
                }
            }
        }
    }

    /// Route an update to its user's worker, spawning or respawning the
    /// worker as needed. Never waits on a worker queue: a full queue means
    /// that user is sending faster than their steps complete, and the
    /// update is dropped so one user's backlog cannot stall dispatch for
    /// everyone else. A worker that idled out leaves a closed sender
    /// behind; the failed send hands the update back so nothing is lost.
    fn dispatch(&self, update: Update, workers: &mut HashMap<String, mpsc::Sender<Update>>) {
        let transport_id = update.transport_id.clone();

        let update = if let Some(worker_tx) = workers.get(&transport_id) {
            match worker_tx.try_send(update) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("worker queue full for {transport_id}, dropping update");
                    return;
                }
                Err(mpsc::error::TrySendError::Closed(update)) => {
                    debug!("worker for {transport_id} exited, respawning");
                    update
                }
            }
        } else {
            update
        };

        let worker_tx = self.spawn_worker(&transport_id);
        if worker_tx.try_send(update).is_err() {
            error!("fresh worker for {transport_id} rejected update");
        }
        workers.insert(transport_id, worker_tx);
    }

    /// Spawn a worker task that serializes one user's updates. The worker
    /// exits after sitting idle, releasing its task; the dispatch path
    /// respawns it on the user's next message.
    fn spawn_worker(&self, transport_id: &str) -> mpsc::Sender<Update> {
        let (tx, mut rx) = mpsc::channel::<Update>(32);
        let engine = self.engine.clone();
        let channels = self.channels.clone();
        let idle = Duration::from_secs(self.session_config.worker_idle_secs);
        let id = transport_id.to_string();

        tokio::spawn(async move {
            loop {
                let update = match tokio::time::timeout(idle, rx.recv()).await {
                    Ok(Some(update)) => update,
                    Ok(None) => break,
                    Err(_) => {
                        debug!("worker for {id} idle, exiting");
                        break;
                    }
                };

                if let (Some(channel), Some(target)) =
                    (channels.get(&update.channel), update.reply_target.as_deref())
                {
                    let _ = channel.send_typing(target).await;
                }

                let reply = engine.handle_update(&update).await;

                match channels.get(&update.channel) {
                    Some(channel) => {
                        if let Err(e) = channel.send(reply).await {
                            error!("failed to send reply via {}: {e}", update.channel);
                        }
                    }
                    None => error!("no channel '{}' for reply", update.channel),
                }
            }
        });

        tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use qalabot_core::error::QalaError;
    use qalabot_core::traits::{BackendApi, EventSummary, NewReport, PhotoStorage};
    use qalabot_core::update::Reply;
    use std::sync::Mutex;

    struct NoopBackend;

    #[async_trait]
    impl BackendApi for NoopBackend {
        async fn register(&self, _: &str, _: &str, _: &str) -> Result<i64, QalaError> {
            Ok(1)
        }
        async fn login(&self, _: &str, _: &str) -> Result<i64, QalaError> {
            Ok(1)
        }
        async fn create_report(&self, _: &NewReport) -> Result<i64, QalaError> {
            Ok(1)
        }
        async fn list_events(&self) -> Result<Vec<EventSummary>, QalaError> {
            Ok(vec![])
        }
        async fn join_event(&self, _: Option<i64>, _: i64) -> Result<(), QalaError> {
            Ok(())
        }
    }

    /// Backend whose event listing never completes, parking the worker.
    struct StalledBackend;

    #[async_trait]
    impl BackendApi for StalledBackend {
        async fn register(&self, _: &str, _: &str, _: &str) -> Result<i64, QalaError> {
            Ok(1)
        }
        async fn login(&self, _: &str, _: &str) -> Result<i64, QalaError> {
            Ok(1)
        }
        async fn create_report(&self, _: &NewReport) -> Result<i64, QalaError> {
            Ok(1)
        }
        async fn list_events(&self) -> Result<Vec<EventSummary>, QalaError> {
            std::future::pending().await
        }
        async fn join_event(&self, _: Option<i64>, _: i64) -> Result<(), QalaError> {
            Ok(())
        }
    }

    struct NoopPhotos;

    #[async_trait]
    impl PhotoStorage for NoopPhotos {
        async fn store(&self, _: &str) -> Result<String, QalaError> {
            Ok("https://cdn.example/p.jpg".into())
        }
    }

    /// Test channel that records every reply it is asked to send.
    struct RecordingChannel {
        sent: Mutex<Vec<Reply>>,
    }

    impl RecordingChannel {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<Reply> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            "test"
        }

        async fn start(&self) -> Result<mpsc::Receiver<Update>, QalaError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }

        async fn send(&self, reply: Reply) -> Result<(), QalaError> {
            self.sent.lock().unwrap().push(reply);
            Ok(())
        }

        async fn stop(&self) -> Result<(), QalaError> {
            Ok(())
        }
    }

    fn gateway_with(backend: Arc<dyn BackendApi>) -> (Gateway, Arc<RecordingChannel>) {
        let channel = Arc::new(RecordingChannel::new());
        let mut channels: HashMap<String, Arc<dyn Channel>> = HashMap::new();
        channels.insert("test".into(), channel.clone());

        let store = SessionStore::new();
        let engine = Arc::new(Engine::new(store.clone(), backend, Arc::new(NoopPhotos)));
        let gateway = Gateway::new(engine, channels, store, SessionConfig::default());
        (gateway, channel)
    }

    fn gateway() -> (Gateway, Arc<RecordingChannel>) {
        gateway_with(Arc::new(NoopBackend))
    }

    fn update(transport_id: &str, text: &str) -> Update {
        Update {
            id: uuid::Uuid::new_v4(),
            channel: "test".into(),
            transport_id: transport_id.into(),
            sender_name: None,
            text: Some(text.into()),
            callback: None,
            location: None,
            photo: None,
            timestamp: chrono::Utc::now(),
            reply_target: Some(format!("chat-{transport_id}")),
        }
    }

    async fn settle() {
        // Let the worker tasks drain their queues.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_worker_replies_in_order() {
        let (gateway, channel) = gateway();
        let mut workers = HashMap::new();

        gateway.dispatch(update("u1", "/report"), &mut workers);
        gateway.dispatch(update("u1", "Garbage"), &mut workers);
        settle().await;

        let sent = channel.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].text.contains("What kind of problem"));
        assert!(sent[1].text.contains("Describe"));
        assert_eq!(sent[0].reply_target.as_deref(), Some("chat-u1"));
    }

    #[tokio::test]
    async fn test_dispatch_respawns_exited_worker() {
        let (gateway, channel) = gateway();
        let mut workers = HashMap::new();

        // Simulate a worker that idled out: its receiver side is gone.
        let (dead_tx, dead_rx) = mpsc::channel::<Update>(1);
        drop(dead_rx);
        workers.insert("u1".to_string(), dead_tx);

        gateway.dispatch(update("u1", "/help"), &mut workers);
        settle().await;

        // The update survived the respawn and was answered.
        assert_eq!(channel.sent().len(), 1);
        assert!(!workers.get("u1").unwrap().is_closed());
    }

    #[tokio::test]
    async fn test_users_get_separate_workers() {
        let (gateway, channel) = gateway();
        let mut workers = HashMap::new();

        gateway.dispatch(update("a", "/report"), &mut workers);
        gateway.dispatch(update("b", "/register"), &mut workers);
        settle().await;

        assert_eq!(workers.len(), 2);
        assert_eq!(channel.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_flooded_user_does_not_stall_others() {
        let (gateway, channel) = gateway_with(Arc::new(StalledBackend));
        let mut workers = HashMap::new();

        // Park one user's worker in a backend call that never returns,
        // then flood well past the worker's queue capacity. The overflow
        // is shed instead of wedging dispatch.
        gateway.dispatch(update("slow", "/events"), &mut workers);
        for _ in 0..64 {
            gateway.dispatch(update("slow", "/help"), &mut workers);
        }

        // A different user still gets dispatched and answered.
        gateway.dispatch(update("fast", "/help"), &mut workers);
        settle().await;

        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].reply_target.as_deref(), Some("chat-fast"));
    }

    #[tokio::test]
    async fn test_reply_to_unknown_channel_is_dropped() {
        let (gateway, channel) = gateway();
        let mut workers = HashMap::new();

        let mut u = update("u1", "/help");
        u.channel = "nonexistent".into();
        gateway.dispatch(u, &mut workers);
        settle().await;

        // Nothing crashes; the reply has nowhere to go.
        assert!(channel.sent().is_empty());
    }
}
