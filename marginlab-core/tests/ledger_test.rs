//! Integration tests for the ledger's cash accounting.
//!
//! Tests:
//! 1. Fee-free long and short round trips book the expected profit
//! 2. Default fees make an equal-price round trip lose money
//! 3. Undo asymmetry between longs and shorts
//! 4. Trade lifecycle: one collection at a time, closing twice fails

use chrono::{DateTime, Duration, TimeZone, Utc};
use marginlab_core::{
    ExitLevels, FeeSchedule, Ledger, LedgerError, MarginRollover, TradeError, TradeSide,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap()
}

fn frictionless(equity: f64) -> Ledger {
    Ledger::new(equity, FeeSchedule::zero()).unwrap()
}

// ── 1. Round trips ───────────────────────────────────────────────────

#[test]
fn long_100_to_110_books_100_profit() {
    let mut ledger = frictionless(1_000.0);
    let id = ledger
        .open_long(100.0, 1_000.0, t0(), 0.0, 1.0, ExitLevels::none())
        .unwrap()
        .id();
    assert_eq!(ledger.equity(), 0.0);

    let closed = ledger
        .close_long(110.0, id, t0() + Duration::days(1), 0.0)
        .unwrap();
    assert!((closed.profit() - 100.0).abs() < 1e-9);
    assert!((ledger.equity() - 1_100.0).abs() < 1e-9);
    assert_eq!(closed.duration(), Duration::days(1));
}

#[test]
fn leveraged_short_profits_from_a_drop() {
    let mut ledger = frictionless(1_000.0);
    let id = ledger
        .open_short(100.0, 500.0, t0(), 0.0, 2.0, ExitLevels::none())
        .unwrap()
        .id();
    assert_eq!(ledger.equity(), 1_000.0);

    // 10 units sold for 1000, bought back at 90.
    let closed = ledger.close_short(90.0, id, t0() + Duration::hours(1), 0.0).unwrap();
    assert!((closed.leveraged_total_sold - 1_000.0).abs() < 1e-9);
    assert!((closed.leveraged_total_bought - 900.0).abs() < 1e-9);
    assert!((ledger.equity() - 1_100.0).abs() < 1e-9);
}

#[test]
fn short_held_for_a_day_pays_rollover() {
    let fees = FeeSchedule {
        maker_fee: 0.0,
        taker_fee: 0.0,
        margin_opening_fee: 0.0001,
        margin_rollover: MarginRollover::new(0.0001, 4.0),
    };
    let mut ledger = Ledger::new(1_000.0, fees).unwrap();
    let id = ledger
        .open_short(100.0, 1_000.0, t0(), 0.0, 1.0, ExitLevels::none())
        .unwrap()
        .id();
    let closed = ledger
        .close_short(100.0, id, t0() + Duration::hours(24), 0.0)
        .unwrap();
    // 24h = 6 rollover periods + opening fee = 0.0007 on 10 borrowed units.
    let expected_bought = (10.0 + 10.0 * 0.0007) * 100.0;
    assert!((closed.leveraged_total_bought - expected_bought).abs() < 1e-9);
    assert!((closed.profit() + 0.7).abs() < 1e-9);
}

#[test]
fn default_fees_make_a_flat_round_trip_lose() {
    let mut ledger = Ledger::default();
    let fee = ledger.fees().maker_fee;
    let id = ledger
        .open_long(100.0, 500.0, t0(), fee, 1.0, ExitLevels::none())
        .unwrap()
        .id();
    let closed = ledger.close_trade(100.0, id, t0(), fee).unwrap();
    assert!(closed.profit() < 0.0);
    assert!(ledger.equity() < ledger.initial_equity());
}

// ── 2. Undo asymmetry ────────────────────────────────────────────────

#[test]
fn undo_restores_equity_for_long() {
    let mut ledger = frictionless(1_000.0);
    ledger
        .open_long(50.0, 400.0, t0(), 0.0, 5.0, ExitLevels::none())
        .unwrap();
    assert_eq!(ledger.equity(), 600.0);
    let discarded = ledger.undo_positions();
    assert_eq!(discarded.len(), 1);
    assert_eq!(discarded[0].side(), TradeSide::Long);
    assert!((ledger.equity() - 1_000.0).abs() < 1e-9);
}

#[test]
fn undo_leaves_equity_unchanged_for_short() {
    let mut ledger = frictionless(1_000.0);
    ledger
        .open_short(50.0, 400.0, t0(), 0.0, 5.0, ExitLevels::none())
        .unwrap();
    let before = ledger.equity();
    ledger.undo_positions();
    assert_eq!(ledger.equity(), before);
    assert!(ledger.is_flat());
}

// ── 3. Lifecycle ─────────────────────────────────────────────────────

#[test]
fn trade_lives_in_exactly_one_collection() {
    let mut ledger = frictionless(1_000.0);
    let id = ledger
        .open_long(10.0, 100.0, t0(), 0.0, 1.0, ExitLevels::none())
        .unwrap()
        .id();
    assert!(ledger.position(id).is_some());
    assert!(ledger.history().iter().all(|t| t.id != id));

    ledger.close_trade(10.0, id, t0(), 0.0).unwrap();
    assert!(ledger.position(id).is_none());
    assert_eq!(ledger.history().iter().filter(|t| t.id == id).count(), 1);
}

#[test]
fn closing_twice_fails_and_keeps_history() {
    let mut ledger = frictionless(1_000.0);
    let id = ledger
        .open_short(10.0, 100.0, t0(), 0.0, 1.0, ExitLevels::none())
        .unwrap()
        .id();
    ledger.close_short(9.0, id, t0(), 0.0).unwrap();
    let equity = ledger.equity();

    assert_eq!(
        ledger.close_short(9.0, id, t0(), 0.0),
        Err(LedgerError::TradeNotOpen(id))
    );
    assert_eq!(ledger.equity(), equity);
    assert_eq!(ledger.history().len(), 1);
}

#[test]
fn history_keeps_close_order() {
    let mut ledger = frictionless(1_000.0);
    let a = ledger
        .open_long(10.0, 100.0, t0(), 0.0, 1.0, ExitLevels::none())
        .unwrap()
        .id();
    let b = ledger
        .open_long(10.0, 100.0, t0(), 0.0, 1.0, ExitLevels::none())
        .unwrap()
        .id();
    ledger.close_trade(11.0, b, t0(), 0.0).unwrap();
    ledger.close_trade(12.0, a, t0(), 0.0).unwrap();
    let ids: Vec<_> = ledger.history().iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![b, a]);
}

#[test]
fn invalid_levels_are_rejected_at_open() {
    let mut ledger = frictionless(1_000.0);
    let levels = ExitLevels::new(Some(90.0), Some(110.0));
    let err = ledger
        .open_short(100.0, 100.0, t0(), 0.0, 1.0, levels)
        .unwrap_err();
    assert!(matches!(err, LedgerError::Trade(_)));
    assert!(ledger.is_flat());
}

#[test]
fn zero_take_profit_is_rejected_at_open() {
    let mut ledger = frictionless(1_000.0);
    let err = ledger
        .open_long(100.0, 100.0, t0(), 0.0, 1.0, ExitLevels::none().with_take_profit(0.0))
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::Trade(TradeError::NonPositiveLevel {
            level: "take_profit",
            price: 0.0
        })
    );
    assert!(ledger.is_flat());
    assert_eq!(ledger.equity(), 1_000.0);

    // The rejected open does not consume an id.
    let id = ledger
        .open_long(100.0, 100.0, t0(), 0.0, 1.0, ExitLevels::none())
        .unwrap()
        .id();
    assert_eq!(id.0, 1);
}
