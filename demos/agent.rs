// Demos are allowed to use expect/unwrap for simplicity
#![allow(clippy::expect_used, clippy::unwrap_used)]

//! instrumentd agent demo
//!
//! Runs the manager against in-memory cluster state with a synthetic
//! process feed: Go processes start and exit in pod `shop/cart-0`, a config
//! update is pushed to the `cart` deployment, and status records are printed
//! as they change.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example agent
//! RUST_LOG=instrumentd_core=debug cargo run --example agent
//! ```
//!
//! Stop with Ctrl+C.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use instrumentd::core::{
    AgentConfig, ChannelConfigProvider, ChannelDetector, ConfigProvider, ConfigUpdate,
    Distribution, Factory, Instrumentation, InstrumentationManager, OtelSdk,
    Pid, PodWorkload, ProcessEvent, ProgrammingLanguage, Result, SdkConfig, Settings,
    WorkloadKind,
};
use instrumentd::k8s::{
    ContainerDistributionMatcher, ContainerInfo, DeclarativeSettingsGetter,
    EnvProcessDetailsResolver, InMemoryConfigSource, InMemoryPodCatalog, InMemoryStatusStore,
    InstanceReporter, PodInfo, StatusStore, WorkloadConfig, env,
};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

const GO_EBPF: Distribution = Distribution::new(ProgrammingLanguage::Go, OtelSdk::EBPF_COMMUNITY);

/// Instrumentation that logs instead of attaching probes.
struct DemoInstrumentation {
    pid: Pid,
    settings: Settings,
    provider: Arc<ChannelConfigProvider<SdkConfig>>,
}

#[async_trait]
impl Instrumentation for DemoInstrumentation {
    async fn load(&mut self) -> Result<()> {
        let attrs: Vec<String> = self
            .settings
            .resource_attributes
            .iter()
            .map(|kv: &opentelemetry::KeyValue| format!("{}={}", kv.key.as_str(), kv.value))
            .collect();
        tracing::info!(pid = %self.pid, service = %self.settings.service_name, ?attrs, "probes loaded");
        Ok(())
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut configs = self.provider.watch()?;
        let initial = self.provider.initial_config().await?;
        tracing::info!(pid = %self.pid, options = ?initial.options, "sdk started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                next = configs.next() => match next {
                    Some(config) => tracing::info!(pid = %self.pid, options = ?config.options, "sdk reconfigured"),
                    None => return Ok(()),
                },
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.provider.shutdown().await
    }

    async fn apply_config(&self, config: &SdkConfig) -> Result<()> {
        self.provider
            .send_config_timeout(config.clone(), Duration::from_secs(1))
            .await
    }
}

struct DemoFactory;

#[async_trait]
impl Factory for DemoFactory {
    async fn create(&self, pid: Pid, settings: Settings) -> Result<Box<dyn Instrumentation>> {
        let initial = settings.initial_config.clone().unwrap_or_default();
        Ok(Box::new(DemoInstrumentation {
            pid,
            settings,
            provider: Arc::new(ChannelConfigProvider::new(initial, 8)),
        }))
    }
}

fn exec(pid: u32) -> ProcessEvent {
    ProcessEvent::exec(Pid::new(pid), "/app/cart --listen :8080")
        .with_env(env::POD_NAME, "cart-0")
        .with_env(env::POD_NAMESPACE, "shop")
        .with_env(env::CONTAINER_NAME, "server")
        .with_env(env::OTEL_RESOURCE_ATTRIBUTES, "team=checkout")
        .with_exe_path("/app/cart")
}

/// Starts and stops a process every couple of seconds.
async fn synthetic_feed(feed: mpsc::Sender<ProcessEvent>, cancel: CancellationToken) {
    let mut pid = 1000;
    let mut live: Vec<u32> = Vec::new();
    let mut tick = tokio::time::interval(Duration::from_secs(2));
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = tick.tick() => {}
        }
        let event = if live.len() < 3 {
            pid += 1;
            live.push(pid);
            exec(pid)
        } else {
            ProcessEvent::exit(Pid::new(live.remove(0)))
        };
        if feed.send(event).await.is_err() {
            return;
        }
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let config = AgentConfig::new("demo-node");
    instrumentd::logging::init_logging(&config.log_filter)?;

    let cart = PodWorkload::new("shop", WorkloadKind::Deployment, "cart");

    let catalog = Arc::new(InMemoryPodCatalog::new());
    catalog.upsert(
        PodInfo::new("shop", "cart-0")
            .owned_by("ReplicaSet", "cart-6b7c9")
            .with_container(
                ContainerInfo::new("server").detected(ProgrammingLanguage::Go, OtelSdk::EBPF_COMMUNITY),
            ),
    );

    let configs = Arc::new(InMemoryConfigSource::new());
    configs.put(
        &cart,
        WorkloadConfig::new()
            .with_sdk_config(SdkConfig::for_language(ProgrammingLanguage::Go).with_option("sampler", "always_on")),
    );

    let store = Arc::new(InMemoryStatusStore::new());

    let (mut manager, updates) = InstrumentationManager::builder()
        .with_config(config)
        .with_details_resolver(Arc::new(EnvProcessDetailsResolver::new(catalog.clone())))
        .with_distribution_matcher(Arc::new(ContainerDistributionMatcher::new(catalog)))
        .with_settings_getter(Arc::new(DeclarativeSettingsGetter::new(configs)))
        .with_reporter(Arc::new(InstanceReporter::new(store.clone())))
        .with_factory(GO_EBPF, Arc::new(DemoFactory))
        .build()?;
    let metrics = manager.metrics().clone();

    let cancel = CancellationToken::new();
    let (feed, detector) = ChannelDetector::channel(64);
    tokio::spawn(synthetic_feed(feed, cancel.clone()));

    // Push a sampler change once a few processes are running.
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(Duration::from_secs(7)) => {
                    let update = ConfigUpdate::new(cart).with_config(
                        SdkConfig::for_language(ProgrammingLanguage::Go).with_option("sampler", "ratio:0.25"),
                    );
                    if let Err(err) = updates.send(update).await {
                        tracing::warn!(error = %err, "config update not delivered");
                    }
                }
            }
        }
    });

    // Print the status records every few seconds.
    tokio::spawn({
        let cancel = cancel.clone();
        let store = store.clone();
        async move {
            let mut tick = tokio::time::interval(Duration::from_secs(3));
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    _ = tick.tick() => {}
                }
                for record in store.list_by_owner("shop", "cart-0").await.unwrap_or_default() {
                    println!(
                        "[STATUS] {} healthy={:?} reason={:?} {}",
                        record.name, record.healthy, record.reason, record.message
                    );
                }
            }
        }
    });

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, shutting down");
            }
            cancel.cancel();
        }
    });

    manager.run(detector, cancel).await?;

    println!("[SHUTDOWN] {:?}", metrics.snapshot());
    Ok(())
}
