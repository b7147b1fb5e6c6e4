// src/pipeline.rs
//! Wires sources into running components:
//! gate + interceptor per source on one hooked client, a bridge per source,
//! one privileged controller, one scheduler.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::bridge::channel::context_channel;
use crate::bridge::{Bridge, PrivilegedReceiver};
use crate::capture::{FingerprintGate, HookedClient, NetworkInterceptor, ReqwestTransport, Transport};
use crate::config::{CaptureConfig, DeliveryConfig, SourceProfile};
use crate::controller::Controller;
use crate::cycle::RefreshCycle;
use crate::delivery::{CollectorSink, DeliverySink};
use crate::scheduler::Scheduler;
use crate::state::{StateHandle, StateStore};

const SUMMARY_BUFFER: usize = 64;

pub fn collector_sink(profile: &SourceProfile, delivery: &DeliveryConfig) -> Arc<dyn DeliverySink> {
    Arc::new(
        CollectorSink::new(profile.collector_url.clone(), profile.fields.clone())
            .with_timeout(delivery.timeout_secs)
            .with_retries(delivery.max_attempts)
            .with_base_delay(Duration::from_millis(delivery.base_delay_ms)),
    )
}

pub struct CapturePipeline<T: Transport = ReqwestTransport> {
    pub client: Arc<HookedClient<T>>,
    pub controller: Arc<Controller>,
    pub scheduler: Scheduler,
    pub state: StateHandle,
    bridges: Vec<Bridge>,
    privileged_rx: Option<PrivilegedReceiver>,
}

impl CapturePipeline<ReqwestTransport> {
    /// Production wiring: reqwest transport, collector sinks from the config.
    pub fn build(cfg: &CaptureConfig, store: Arc<dyn StateStore>) -> Result<Self> {
        Self::build_with(cfg, ReqwestTransport::new(), store, collector_sink)
    }
}

impl<T: Transport + 'static> CapturePipeline<T> {
    pub fn build_with<F>(
        cfg: &CaptureConfig,
        transport: T,
        store: Arc<dyn StateStore>,
        make_sink: F,
    ) -> Result<Self>
    where
        F: Fn(&SourceProfile, &DeliveryConfig) -> Arc<dyn DeliverySink>,
    {
        let profiles = cfg.profiles()?;
        let (ptx, prx) = mpsc::unbounded_channel();

        let mut client = HookedClient::new(transport);
        let mut bridges = Vec::with_capacity(profiles.len());
        let mut refresh = Vec::new();

        for p in &profiles {
            let gate = Arc::new(FingerprintGate::new(cfg.dedup_window_ms));
            let (outbox, inbox) = context_channel(p.source_tag.clone());
            client.register(Arc::new(NetworkInterceptor::new(
                p.name.clone(),
                p.origin.clone(),
                p.target.clone(),
                p.fingerprint.clone(),
                gate,
                outbox,
            )));
            bridges.push(Bridge::new(
                p.name.clone(),
                inbox,
                make_sink(p, &cfg.delivery),
                ptx.clone(),
            ));
            refresh.extend(p.refresh_urls.iter().cloned());
            tracing::info!(
                target: "capture",
                source = %p.name,
                tag = %p.source_tag,
                collector = %p.collector_url,
                "source wired"
            );
        }

        let client = Arc::new(client);
        let state = StateHandle::new(store);
        let (summaries, _) = broadcast::channel(SUMMARY_BUFFER);

        let cycle = RefreshCycle::new(
            Arc::clone(&client),
            refresh,
            summaries.clone(),
            Duration::from_secs(cfg.scheduler.capture_wait_secs),
        );
        let scheduler = Scheduler::new(Arc::new(cycle), state.clone())
            .with_jitter(Duration::from_secs(cfg.scheduler.max_jitter_secs));
        let controller = Arc::new(Controller::new(scheduler.clone(), state.clone(), summaries));

        Ok(Self {
            client,
            controller,
            scheduler,
            state,
            bridges,
            privileged_rx: Some(prx),
        })
    }

    /// Start the bridges and the controller listener. Calling it twice is a no-op.
    pub fn spawn(&mut self) -> Vec<JoinHandle<()>> {
        let mut handles: Vec<JoinHandle<()>> =
            self.bridges.drain(..).map(Bridge::spawn).collect();
        if let Some(rx) = self.privileged_rx.take() {
            handles.push(self.controller.spawn_listener(rx));
        }
        handles
    }
}
