//! 接続数メーター（プロセス全体 / IP ごと）
//!
//! 受付時に両方のメーターを取るか、どちらも取らないかのどちらかです。
//! 拒否された接続は枠を消費しません。解放は切断経路で必ず一度だけ
//! 呼ばれます（呼び出し側の単一クリーンアップ関数が保証）。

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

/// Admission rejection reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    GlobalLimit,
    IpLimit,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::GlobalLimit => "global_limit",
            RejectReason::IpLimit => "ip_limit",
        }
    }
}

/// Process-wide and per-IP open-connection counters.
pub struct ConnectionMeters {
    max_total: usize,
    max_per_ip: usize,
    total: AtomicUsize,
    per_ip: DashMap<IpAddr, usize>,
}

impl ConnectionMeters {
    pub fn new(max_total: usize, max_per_ip: usize) -> Self {
        Self {
            max_total,
            max_per_ip,
            total: AtomicUsize::new(0),
            per_ip: DashMap::new(),
        }
    }

    /// Try to take one global slot and one per-IP slot.
    ///
    /// On rejection neither meter is consumed.
    pub fn try_acquire(&self, ip: IpAddr) -> Result<(), RejectReason> {
        if self
            .total
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < self.max_total).then_some(current + 1)
            })
            .is_err()
        {
            return Err(RejectReason::GlobalLimit);
        }

        let mut entry = self.per_ip.entry(ip).or_insert(0);
        if *entry >= self.max_per_ip {
            drop(entry);
            // roll the global slot back so a rejected socket costs nothing
            self.total.fetch_sub(1, Ordering::SeqCst);
            // the freshly inserted zero entry must not linger
            self.per_ip.remove_if(&ip, |_, count| *count == 0);
            return Err(RejectReason::IpLimit);
        }
        *entry += 1;
        Ok(())
    }

    /// Release both slots. Must run exactly once per admitted connection.
    pub fn release(&self, ip: IpAddr) {
        self.total.fetch_sub(1, Ordering::SeqCst);
        if let Some(mut entry) = self.per_ip.get_mut(&ip) {
            *entry = entry.saturating_sub(1);
            let now_zero = *entry == 0;
            drop(entry);
            if now_zero {
                // drop the key at zero to bound memory
                self.per_ip.remove_if(&ip, |_, count| *count == 0);
            }
        }
    }

    /// Currently admitted connections.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Number of IPs with at least one open connection.
    pub fn tracked_ips(&self) -> usize {
        self.per_ip.len()
    }
}
