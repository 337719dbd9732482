/// Signal ordering within a tick and rolling signal statistics

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use lodestar_core::{AccountId, Direction, Signal, SignalStatus};
use serde::Serialize;

/// Highest confidence first, then oldest, then lowest id.
pub fn rank_for_execution(signals: &mut [Signal]) {
    signals.sort_by(|a, b| {
        b.confidence
            .cmp(&a.confidence)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Splits signals per owning account, each group in execution order.
pub fn group_by_account(signals: Vec<Signal>) -> BTreeMap<AccountId, Vec<Signal>> {
    let mut groups: BTreeMap<AccountId, Vec<Signal>> = BTreeMap::new();
    for signal in signals {
        groups.entry(signal.account_id).or_default().push(signal);
    }
    for group in groups.values_mut() {
        rank_for_execution(group);
    }
    groups
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SignalStats {
    pub total: usize,
    pub buy: usize,
    pub sell: usize,
    pub hold: usize,
    pub avg_confidence: f64,
    pub active: usize,
    pub executed: usize,
    pub expired: usize,
}

impl SignalStats {
    /// Statistics over signals created in the 24 hours before `now`.
    pub fn last_24h(signals: &[Signal], now: DateTime<Utc>) -> Self {
        let since = now - Duration::hours(24);
        let recent: Vec<&Signal> = signals.iter().filter(|s| s.created_at > since).collect();

        let mut stats = SignalStats { total: recent.len(), ..Default::default() };
        for s in &recent {
            match s.direction {
                Direction::Buy => stats.buy += 1,
                Direction::Sell => stats.sell += 1,
                Direction::Hold => stats.hold += 1,
            }
            match s.status {
                SignalStatus::Active if !s.is_expired(now) => stats.active += 1,
                SignalStatus::Executed => stats.executed += 1,
                SignalStatus::Expired => stats.expired += 1,
                _ => {}
            }
        }
        if !recent.is_empty() {
            let sum: u32 = recent.iter().map(|s| s.confidence as u32).sum();
            stats.avg_confidence = sum as f64 / recent.len() as f64;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lodestar_core::SignalId;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 12, minute, 0).unwrap()
    }

    fn signal(id: u64, account: u64, confidence: u8, created: DateTime<Utc>) -> Signal {
        Signal {
            id: SignalId(id),
            account_id: AccountId(account),
            symbol: "BTCUSDT".into(),
            direction: Direction::Buy,
            price: 1.0,
            confidence,
            timeframe: "1h".into(),
            stop_loss: None,
            take_profit: None,
            risk_reward_ratio: None,
            status: SignalStatus::Active,
            expires_at: None,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn ranks_by_confidence_then_age() {
        let mut signals = vec![
            signal(1, 1, 80, at(5)),
            signal(2, 1, 90, at(10)),
            signal(3, 1, 80, at(1)),
            signal(4, 1, 90, at(10)),
        ];
        rank_for_execution(&mut signals);
        let ids: Vec<u64> = signals.iter().map(|s| s.id.0).collect();
        assert_eq!(ids, vec![2, 4, 3, 1]);
    }

    #[test]
    fn groups_per_account() {
        let groups = group_by_account(vec![
            signal(1, 2, 80, at(0)),
            signal(2, 1, 85, at(0)),
            signal(3, 2, 95, at(0)),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&AccountId(2)].iter().map(|s| s.id.0).collect::<Vec<_>>(), vec![3, 1]);
    }

    #[test]
    fn stats_cover_last_day_only() {
        let now = at(30);
        let mut old = signal(1, 1, 99, now - Duration::hours(30));
        old.status = SignalStatus::Executed;
        let mut sell = signal(2, 1, 70, at(0));
        sell.direction = Direction::Sell;
        sell.status = SignalStatus::Executed;
        let buy = signal(3, 1, 90, at(10));

        let stats = SignalStats::last_24h(&[old, sell, buy], now);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.buy, 1);
        assert_eq!(stats.sell, 1);
        assert_eq!(stats.executed, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.avg_confidence, 80.0);
    }
}
