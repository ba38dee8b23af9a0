//! 订阅方注册表 - 状态反馈的收件人管理
//!
//! 订阅方往状态端口发 `SUBSCRIBE` 数据报注册想要的话题；注册带
//! TTL，订阅方需要周期性重发以保活，消失的订阅方在过期后被清理
//! （UDP 没有连接概念，只能靠保活判存活）。

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use lyra_proto::StatusTopic;
use parking_lot::Mutex;
use tracing::{debug, info};

/// 订阅有效期：超过这个时长没有重新订阅就视为离线
const SUBSCRIPTION_TTL: Duration = Duration::from_secs(30);

struct Subscription {
    topics: HashSet<StatusTopic>,
    last_seen: Instant,
}

/// 订阅方注册表（多线程共享）
#[derive(Default)]
pub struct SubscriberRegistry {
    entries: Mutex<HashMap<SocketAddr, Subscription>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册/刷新一个订阅方
    pub fn subscribe(&self, addr: SocketAddr, topics: Vec<StatusTopic>) {
        let mut entries = self.entries.lock();
        let is_new = !entries.contains_key(&addr);
        entries.insert(
            addr,
            Subscription { topics: topics.iter().copied().collect(), last_seen: Instant::now() },
        );
        if is_new {
            info!(%addr, ?topics, "status subscriber registered");
        } else {
            debug!(%addr, ?topics, "status subscription refreshed");
        }
    }

    /// 某个话题当前的收件地址
    pub fn addresses_for(&self, topic: StatusTopic) -> Vec<SocketAddr> {
        let entries = self.entries.lock();
        entries
            .iter()
            .filter(|(_, sub)| sub.topics.contains(&topic))
            .map(|(addr, _)| *addr)
            .collect()
    }

    /// 清理过期订阅，返回清掉的数量
    pub fn prune(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|addr, sub| {
            let alive = sub.last_seen.elapsed() < SUBSCRIPTION_TTL;
            if !alive {
                info!(%addr, "status subscriber expired");
            }
            alive
        });
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn test_subscribe_and_lookup() {
        let registry = SubscriberRegistry::new();
        registry.subscribe(addr(9001), vec![StatusTopic::Joints, StatusTopic::Status]);
        registry.subscribe(addr(9002), vec![StatusTopic::Pose]);

        assert_eq!(registry.addresses_for(StatusTopic::Joints), vec![addr(9001)]);
        assert_eq!(registry.addresses_for(StatusTopic::Pose), vec![addr(9002)]);
        assert!(registry.addresses_for(StatusTopic::Gripper).is_empty());
    }

    #[test]
    fn test_resubscribe_replaces_topics() {
        let registry = SubscriberRegistry::new();
        registry.subscribe(addr(9001), vec![StatusTopic::Joints]);
        registry.subscribe(addr(9001), vec![StatusTopic::Io]);

        assert!(registry.addresses_for(StatusTopic::Joints).is_empty());
        assert_eq!(registry.addresses_for(StatusTopic::Io), vec![addr(9001)]);
        assert_eq!(registry.len(), 1);
    }
}
