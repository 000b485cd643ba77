use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use bus::{Channel, Event, EventBus};
use common::config::{RunMode, StateBackend};
use common::{Candle, Config, Result, SignalStore};
use engine::{BacktestLoop, LiveLoop, PriceOracle, SignalHandle, SignalTracker, TrackerConfig, Walker};
use registry::{FrameSchema, RegistrySet, SchemaFile, StrategySchema};
use replay::ReplayClient;
use store::{FileStore, SqliteStore};
use strategy::build_strategy;

type CandleSeed = HashMap<String, Vec<Candle>>;

/// Memoized replay clients, one per exchange schema: every strategy on the
/// same exchange shares one instance (and one candle series).
struct ClientCache {
    clients: HashMap<String, Arc<ReplayClient>>,
    seed: CandleSeed,
}

impl ClientCache {
    fn new(seed: CandleSeed) -> Self {
        Self {
            clients: HashMap::new(),
            seed,
        }
    }

    async fn get(&mut self, registries: &RegistrySet, exchange_name: &str) -> Result<Arc<ReplayClient>> {
        if let Some(client) = self.clients.get(exchange_name) {
            return Ok(client.clone());
        }
        let schema = registries.exchanges.get(exchange_name)?;
        let client = Arc::new(ReplayClient::with_decimals(
            schema.price_decimals,
            schema.quantity_decimals,
        ));
        for (symbol, series) in &self.seed {
            client.load_candles(symbol, series.clone()).await;
        }
        self.clients.insert(exchange_name.to_string(), client.clone());
        Ok(client)
    }
}

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(mode = %cfg.run_mode, "sigil starting");

    // ── Schema registries ─────────────────────────────────────────────────────
    let schema_file = SchemaFile::load(&cfg.schema_path);
    let registries = RegistrySet::from_file(&schema_file)
        .unwrap_or_else(|e| panic!("Schema registration failed: {e}"));
    info!(
        strategies = registries.strategies.list().len(),
        walkers = registries.walkers.list().len(),
        "schemas registered"
    );

    // ── Persistence ───────────────────────────────────────────────────────────
    let store: Arc<dyn SignalStore> = match &cfg.state_backend {
        StateBackend::File(dir) => Arc::new(
            FileStore::new(dir)
                .unwrap_or_else(|e| panic!("Failed to open state directory '{dir}': {e}")),
        ),
        StateBackend::Sqlite(url) => Arc::new(
            SqliteStore::connect(url)
                .await
                .unwrap_or_else(|e| panic!("Failed to connect to database: {e}")),
        ),
    };

    // ── Event bus + log subscribers ───────────────────────────────────────────
    let bus = Arc::new(EventBus::new());
    attach_log_subscribers(&bus);

    // ── Exchange clients (memoized per exchange schema) ───────────────────────
    let seed = cfg
        .candles_path
        .as_deref()
        .map(load_candle_seed)
        .unwrap_or_default();
    if seed.is_empty() {
        warn!("no candle seed loaded; ticks will report insufficient data until candles exist");
    }
    let mut clients = ClientCache::new(seed);

    match cfg.run_mode {
        RunMode::Backtest => run_backtest(&cfg, &registries, &bus, &mut clients).await,
        RunMode::Live => run_live(&cfg, &registries, &bus, store, &mut clients).await,
    }
}

fn load_candle_seed(path: &str) -> CandleSeed {
    let raw = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read candle file at '{path}': {e}"));
    serde_json::from_str(&raw)
        .unwrap_or_else(|e| panic!("Failed to parse candle file at '{path}': {e}"))
}

/// Mirror the interesting channels into the log. Subscriptions stay active
/// for the lifetime of the bus.
fn attach_log_subscribers(bus: &Arc<EventBus>) {
    bus.subscribe(Channel::Performance, |event| async move {
        if let Event::Performance {
            symbol,
            reason,
            net_pnl,
        } = event
        {
            info!(%symbol, %reason, net_pnl, "position closed");
        }
    });
    bus.subscribe(Channel::RiskRejection, |event| async move {
        if let Event::RiskRejection { symbol, reason, .. } = event {
            warn!(%symbol, %reason, "entry rejected");
        }
    });
    bus.subscribe(Channel::Error, |event| async move {
        if let Event::Error { symbol, message } = event {
            warn!(%symbol, %message, "recoverable error");
        }
    });
    bus.subscribe(Channel::FatalError, |event| async move {
        if let Event::Fatal { symbol, message } = event {
            error!(%symbol, %message, "fatal error");
        }
    });
    bus.subscribe(Channel::Done, |event| async move {
        if let Event::Done(completion) = event {
            info!(
                symbol = %completion.symbol,
                strategy = %completion.strategy_name,
                backtest = completion.backtest,
                "loop completed"
            );
        }
    });
}

/// Resolve one strategy's schemas into a ready tracker handle.
async fn build_tracker(
    name: &str,
    frame_override: Option<&str>,
    cfg: &Config,
    registries: &RegistrySet,
    bus: &Arc<EventBus>,
    clients: &mut ClientCache,
) -> Result<(SignalHandle, StrategySchema, FrameSchema)> {
    let schema = registries.strategies.get(name)?;
    let frame = registries.frames.get(frame_override.unwrap_or(&schema.frame))?;
    let risk = registries.risks.get(&schema.risk)?;
    let sizing = registries.sizings.get(&schema.sizing)?;
    let client = clients.get(registries, &schema.exchange).await?;

    let strategy = build_strategy(&schema)?;
    let tracker = SignalTracker::new(
        TrackerConfig {
            symbol: schema.symbol.clone(),
            strategy_name: schema.name.clone(),
            exchange_name: schema.exchange.clone(),
            frame_name: frame.name.clone(),
            throttle: schema.interval,
            costs: cfg.costs,
            quantity: sizing.quantity,
            max_notional: risk.max_notional,
            expires_after: frame.expires_after(),
        },
        strategy,
        Arc::new(PriceOracle::new(client)),
        bus.clone(),
    );
    Ok((SignalHandle::new(tracker), schema, frame))
}

/// Backtest mode: run every walker schema, or every strategy over its own
/// frame when no walker is configured.
async fn run_backtest(
    cfg: &Config,
    registries: &RegistrySet,
    bus: &Arc<EventBus>,
    clients: &mut ClientCache,
) {
    let mut walker = Walker::new(bus.clone());

    let mut register = |walker: &mut Walker, handle: SignalHandle, schema: StrategySchema, frame: FrameSchema| {
        let timestamps = frame
            .timestamps()
            .unwrap_or_else(|e| panic!("Frame '{}' is unusable: {e}", frame.name));
        walker.register(
            schema.name.clone(),
            BacktestLoop::new(
                handle,
                bus.clone(),
                schema.symbol,
                schema.name,
                schema.exchange,
                timestamps,
            ),
        );
    };

    let walker_names = registries.walkers.list();
    if walker_names.is_empty() {
        for name in registries.strategies.list() {
            let (handle, schema, frame) =
                build_tracker(&name, None, cfg, registries, bus, clients)
                    .await
                    .unwrap_or_else(|e| panic!("Failed to build strategy '{name}': {e}"));
            register(&mut walker, handle, schema, frame);
        }
    } else {
        for walker_name in walker_names {
            let walker_schema = registries
                .walkers
                .get(&walker_name)
                .unwrap_or_else(|e| panic!("Walker '{walker_name}' vanished: {e}"));
            for name in &walker_schema.strategies {
                let (handle, schema, frame) =
                    build_tracker(name, Some(&walker_schema.frame), cfg, registries, bus, clients)
                        .await
                        .unwrap_or_else(|e| panic!("Failed to build strategy '{name}': {e}"));
                register(&mut walker, handle, schema, frame);
            }
        }
    }

    if let Err(e) = walker.run().await {
        error!(%e, "backtest run failed");
        std::process::exit(1);
    }
    // Give the bus workers a beat to flush the tail of the queues.
    tokio::time::sleep(Duration::from_millis(200)).await;
    info!("backtest complete");
}

/// Live mode: one loop per strategy, drained gracefully on ctrl-c.
async fn run_live(
    cfg: &Config,
    registries: &RegistrySet,
    bus: &Arc<EventBus>,
    store: Arc<dyn SignalStore>,
    clients: &mut ClientCache,
) {
    let mut stops = Vec::new();
    let mut tasks = Vec::new();

    for name in registries.strategies.list() {
        let (handle, schema, _frame) = build_tracker(&name, None, cfg, registries, bus, clients)
            .await
            .unwrap_or_else(|e| panic!("Failed to build strategy '{name}': {e}"));
        let live = LiveLoop::new(
            handle,
            store.clone(),
            bus.clone(),
            schema.symbol.clone(),
            schema.name.clone(),
            schema.exchange.clone(),
            Duration::from_secs(cfg.tick_secs),
        );
        stops.push(live.stop_handle());
        info!(strategy = %schema.name, symbol = %schema.symbol, "starting live loop");
        tasks.push(tokio::spawn(live.run()));
    }

    info!("all live loops started, waiting for shutdown signal");
    tokio::signal::ctrl_c().await.unwrap();
    info!("shutdown signal received, draining live loops");
    for stop in &stops {
        stop.stop();
    }
    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(%e, "live loop terminated with error"),
            Err(e) => error!(%e, "live loop panicked"),
        }
    }
    info!("all live loops drained, exiting");
}
