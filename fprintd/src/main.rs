use std::sync::Arc;

use clap::Parser;

use fprintd::config::{Cli, Config};
use fprintd::dbus::{DeviceIface, ManagerIface, BUS_NAME, MANAGER_PATH};
use fprintd::device::capability::Features;
use fprintd::device::mock::MockCapability;
use fprintd::manager::{DeviceDiscovery, Manager, StaticDiscovery};
use fprintd::policy::{AllowAllBackend, PolicyGate, PolkitBackend};
use fprintd::store::StoreRegistry;
use fprintd::suspend::{Logind1Backend, SuspendCoordinator};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = Config::load(&cli)?;
    log::info!("starting, state directory {:?}", fprintd::config::state_directory());

    let store_registry = StoreRegistry::with_defaults();
    let store = store_registry
        .build(&config.storage.store_type)
        .ok_or_else(|| anyhow::anyhow!("unknown storage backend {:?}", config.storage.store_type))?;
    store.init()?;

    let discovery: Box<dyn DeviceDiscovery> = if cli.mock_device {
        log::warn!("--mock-device set: registering a single in-memory mock reader");
        Box::new(StaticDiscovery::new(vec![Arc::new(MockCapability::new(
            "mock",
            "dev-0",
            5,
            Features { has_identify: true, has_storage: true, has_storage_list: true },
        ))]))
    } else {
        Box::new(StaticDiscovery::new(vec![]))
    };

    let manager = Manager::new(discovery.as_ref(), store, config.idle_timeout).await;

    let policy_backend: Arc<dyn fprintd::policy::PolicyBackend> = if cli.no_polkit {
        log::warn!("--no-polkit set: every request will be authorized unconditionally");
        Arc::new(AllowAllBackend)
    } else {
        match PolkitBackend::connect().await {
            Ok(backend) => Arc::new(backend),
            Err(e) => {
                log::error!("could not reach polkit ({e}); falling back to allow-all");
                Arc::new(AllowAllBackend)
            }
        }
    };
    let policy = Arc::new(PolicyGate::new(policy_backend));

    let connection = zbus::connection::Builder::system()?
        .name(BUS_NAME)?
        .build()
        .await?;

    connection
        .object_server()
        .at(MANAGER_PATH, ManagerIface::new(manager.clone()))
        .await?;

    for (index, session) in manager.devices().await.into_iter().enumerate() {
        let path = fprintd::dbus::device_path(index);
        connection
            .object_server()
            .at(path.clone(), DeviceIface::new(session.clone(), manager.clone(), policy.clone()))
            .await?;
        let emitter = connection
            .object_server()
            .interface::<_, DeviceIface>(path)
            .await?
            .signal_emitter()
            .to_owned();
        tokio::spawn(fprintd::dbus::forward_signals(session, emitter));
    }

    let idle_timer = tokio::spawn(manager.clone().run_idle_timer());

    let suspend_task = match Logind1Backend::connect().await {
        Ok(backend) => {
            let coordinator = SuspendCoordinator::new(Arc::new(backend), manager.clone());
            Some(tokio::spawn(coordinator.run()))
        }
        Err(e) => {
            log::warn!("could not reach logind ({e}); suspend/resume hooks are disabled");
            None
        }
    };

    wait_for_shutdown(&manager).await;

    log::info!("draining: refusing new claims, waiting for in-flight operations");
    manager.begin_drain();
    drain(&manager).await;

    log::info!("shutting down");
    idle_timer.abort();
    if let Some(task) = suspend_task {
        task.abort();
    }
    Ok(())
}

/// How long shutdown waits for claimed devices and in-flight operations to
/// finish on their own before giving up and tearing down anyway.
const DRAIN_DEADLINE: std::time::Duration = std::time::Duration::from_secs(10);
const DRAIN_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(200);

async fn drain(manager: &Arc<Manager>) {
    let wait = async {
        loop {
            if manager.is_idle().await {
                return;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    };
    if tokio::time::timeout(DRAIN_DEADLINE, wait).await.is_err() {
        log::warn!("drain timed out after {:?} with operations still in flight", DRAIN_DEADLINE);
    }
}

async fn wait_for_shutdown(manager: &Arc<Manager>) {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("could not install SIGTERM handler: {e}");
            return;
        }
    };

    tokio::select! {
        _ = manager.shutdown.cancelled() => {}
        _ = tokio::signal::ctrl_c() => { log::info!("received interrupt"); }
        _ = sigterm.recv() => { log::info!("received SIGTERM"); }
    }
}

fn init_logging(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();
}
