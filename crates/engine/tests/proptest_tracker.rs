use proptest::prelude::*;
use std::sync::Arc;

use async_trait::async_trait;
use bus::EventBus;
use chrono::{DateTime, Duration, Utc};
use common::{Costs, Interval, SignalPhase, TickContext, TradeAction};
use engine::{PriceOracle, SignalTracker, TrackerConfig};
use replay::ReplayClient;
use strategy::{EntryIntent, EntryMode, Strategy};

#[derive(Debug)]
struct OneIntent(EntryIntent);

#[async_trait]
impl Strategy for OneIntent {
    fn name(&self) -> &str {
        "one-intent"
    }

    fn symbol(&self) -> &str {
        "BTCUSDT"
    }

    async fn evaluate(&self, _ctx: &TickContext, _price: f64) -> Option<EntryIntent> {
        Some(self.0.clone())
    }
}

fn base_time() -> DateTime<Utc> {
    "2024-01-01T12:00:00Z".parse().unwrap()
}

fn tracker_with(intent: EntryIntent, client: Arc<ReplayClient>) -> SignalTracker {
    let cfg = TrackerConfig {
        symbol: "BTCUSDT".into(),
        strategy_name: "one-intent".into(),
        exchange_name: "replay".into(),
        frame_name: "prop".into(),
        throttle: Interval::M1,
        costs: Costs::default(),
        quantity: 1.0,
        max_notional: f64::MAX,
        expires_after: Duration::days(365),
    };
    SignalTracker::new(
        cfg,
        Arc::new(OneIntent(intent)),
        Arc::new(PriceOracle::new(client)),
        Arc::new(EventBus::new()),
    )
}

proptest! {
    /// A long whose protective distances are inverted (stop above entry,
    /// take below) must never open, whatever the magnitudes involved.
    #[test]
    fn inverted_levels_never_open(
        price in 1.0f64..1_000_000.0f64,
        tp_pct in -50.0f64..0.0f64,
        sl_pct in -50.0f64..0.0f64,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let intent = EntryIntent {
                action: TradeAction::Long,
                mode: EntryMode::Market,
                take_profit_pct: tp_pct,
                stop_loss_pct: sl_pct,
            };
            let client = Arc::new(ReplayClient::new());
            client.set_price("BTCUSDT", price, base_time()).await;
            let mut tracker = tracker_with(intent, client);

            let ctx = TickContext {
                symbol: "BTCUSDT".into(),
                timestamp: base_time(),
                backtest: true,
            };
            let signal = tracker.tick(&ctx).await.unwrap();
            prop_assert!(matches!(signal.phase, SignalPhase::Idle));
            Ok(())
        })?;
    }

    /// Valid entries always satisfy the ordering invariant regardless of
    /// the price level or the distances chosen.
    #[test]
    fn opened_longs_always_order_tp_entry_sl(
        price in 1.0f64..1_000_000.0f64,
        tp_pct in 0.1f64..50.0f64,
        sl_pct in 0.1f64..50.0f64,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let intent = EntryIntent {
                action: TradeAction::Long,
                mode: EntryMode::Market,
                take_profit_pct: tp_pct,
                stop_loss_pct: sl_pct,
            };
            let client = Arc::new(ReplayClient::new());
            client.set_price("BTCUSDT", price, base_time()).await;
            let mut tracker = tracker_with(intent, client);

            let ctx = TickContext {
                symbol: "BTCUSDT".into(),
                timestamp: base_time(),
                backtest: true,
            };
            let signal = tracker.tick(&ctx).await.unwrap();
            let position = signal.phase.position().expect("entry accepted");
            prop_assert!(position.take_profit > position.entry_price);
            prop_assert!(position.entry_price > position.stop_loss);
            Ok(())
        })?;
    }

    /// Alternating favorable and unfavorable trailing-stop shifts leave the
    /// stop at the most protective level ever requested, never worse.
    #[test]
    fn trailing_stop_never_regresses(
        shifts in prop::collection::vec((-40.0f64..100.0f64, 90.0f64..140.0f64), 1..20),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let intent = EntryIntent {
                action: TradeAction::Long,
                mode: EntryMode::Market,
                take_profit_pct: 200.0,
                stop_loss_pct: 5.0,
            };
            let client = Arc::new(ReplayClient::new());
            client.set_price("BTCUSDT", 100.0, base_time()).await;
            let mut tracker = tracker_with(intent, client);

            let ctx = TickContext {
                symbol: "BTCUSDT".into(),
                timestamp: base_time(),
                backtest: true,
            };
            tracker.tick(&ctx).await.unwrap();

            let mut best = tracker
                .snapshot()
                .phase
                .position()
                .expect("entry accepted")
                .stop_loss;
            for (shift_pct, current_price) in shifts {
                tracker.commit_trailing_stop(shift_pct, current_price).unwrap();
                let stop = tracker
                    .snapshot()
                    .phase
                    .position()
                    .expect("still open")
                    .stop_loss;
                prop_assert!(stop >= best, "stop {stop} regressed below {best}");
                best = stop;
            }
            Ok(())
        })?;
    }
}
