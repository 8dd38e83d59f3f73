use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use async_trait::async_trait;
use smart_queue_core::{
    traits::{Delivery, MessageQueue, QueueOptions},
    Message, SchedulerError, SchedulerResult,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// 内存消息队列实现
///
/// 语义与RabbitMQ主题交换机保持一致：按绑定键路由，优先级队列中高优先级先出、
/// 同优先级先进先出，消费后需显式确认，未确认的消息在 nack 或关闭时重新入队。
/// 适用于嵌入式部署和测试。
pub struct InMemoryMessageQueue {
    state: Mutex<QueueState>,
    connected: AtomicBool,
}

#[derive(Default)]
struct QueueState {
    exchanges: HashSet<String>,
    queues: HashMap<String, QueueBuffer>,
    bindings: Vec<Binding>,
    unacked: HashMap<u64, (String, QueuedMessage)>,
    next_delivery_tag: u64,
    next_sequence: u64,
}

struct QueueBuffer {
    options: QueueOptions,
    messages: BinaryHeap<QueuedMessage>,
}

struct Binding {
    exchange: String,
    queue: String,
    pattern: String,
}

#[derive(Clone)]
struct QueuedMessage {
    priority: u8,
    sequence: u64,
    payload: Vec<u8>,
    redelivered: bool,
}

impl PartialEq for QueuedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedMessage {}

impl PartialOrd for QueuedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedMessage {
    // BinaryHeap 是大顶堆：优先级高者在前，同优先级序号小者在前
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// AMQP主题匹配：`*` 匹配一个单词，`#` 匹配零个或多个单词
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pattern[1..], key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &key[1..]),
            (Some(p), Some(k)) if p == k => matches(&pattern[1..], &key[1..]),
            _ => false,
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches(&pattern, &key)
}

impl InMemoryMessageQueue {
    /// 创建新的内存消息队列实例（处于已连接状态）
    pub fn new() -> Self {
        info!("创建内存消息队列");
        Self {
            state: Mutex::new(QueueState::default()),
            connected: AtomicBool::new(true),
        }
    }

    fn ensure_connected(&self) -> SchedulerResult<()> {
        if self.connected.load(AtomicOrdering::SeqCst) {
            Ok(())
        } else {
            Err(SchedulerError::MessageQueue("内存消息队列已关闭".to_string()))
        }
    }

    /// 队列中未确认的消息数量
    pub async fn unacked_count(&self) -> usize {
        self.state.lock().await.unacked.len()
    }
}

impl Default for InMemoryMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueState {
    fn push(&mut self, queue: &str, payload: Vec<u8>, priority: Option<u8>) -> SchedulerResult<()> {
        self.next_sequence += 1;
        let sequence = self.next_sequence;
        let buffer = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| SchedulerError::MessageQueue(format!("队列不存在: {queue}")))?;
        let priority = match buffer.options.max_priority {
            Some(max) => priority.unwrap_or(0).min(max),
            None => 0,
        };
        buffer.messages.push(QueuedMessage {
            priority,
            sequence,
            payload,
            redelivered: false,
        });
        Ok(())
    }

    fn requeue(&mut self, queue: String, mut message: QueuedMessage) {
        message.redelivered = true;
        if let Some(buffer) = self.queues.get_mut(&queue) {
            buffer.messages.push(message);
        }
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn connect(&self) -> SchedulerResult<()> {
        self.connected.store(true, AtomicOrdering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(AtomicOrdering::SeqCst)
    }

    /// 关闭连接，未确认的消息重新入队
    async fn close(&self) -> SchedulerResult<()> {
        self.connected.store(false, AtomicOrdering::SeqCst);
        let mut state = self.state.lock().await;
        let pending: Vec<(String, QueuedMessage)> = state.unacked.drain().map(|(_, v)| v).collect();
        for (queue, message) in pending {
            state.requeue(queue, message);
        }
        info!("内存消息队列已关闭");
        Ok(())
    }

    async fn declare_exchange(&self, exchange: &str) -> SchedulerResult<()> {
        self.ensure_connected()?;
        self.state.lock().await.exchanges.insert(exchange.to_string());
        debug!("交换机 {} 声明成功", exchange);
        Ok(())
    }

    async fn declare_queue(&self, queue: &str, options: &QueueOptions) -> SchedulerResult<()> {
        self.ensure_connected()?;
        let mut state = self.state.lock().await;
        state
            .queues
            .entry(queue.to_string())
            .or_insert_with(|| QueueBuffer {
                options: options.clone(),
                messages: BinaryHeap::new(),
            });
        debug!("队列 {} 声明成功", queue);
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        binding_key: &str,
    ) -> SchedulerResult<()> {
        self.ensure_connected()?;
        let mut state = self.state.lock().await;
        if !state.exchanges.contains(exchange) {
            return Err(SchedulerError::MessageQueue(format!(
                "交换机不存在: {exchange}"
            )));
        }
        if !state.queues.contains_key(queue) {
            return Err(SchedulerError::MessageQueue(format!("队列不存在: {queue}")));
        }
        state.bindings.push(Binding {
            exchange: exchange.to_string(),
            queue: queue.to_string(),
            pattern: binding_key.to_string(),
        });
        Ok(())
    }

    async fn publish_message(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &Message,
        priority: Option<u8>,
    ) -> SchedulerResult<()> {
        self.ensure_connected()?;
        let payload = message
            .serialize_bytes()
            .map_err(|e| SchedulerError::Serialization(format!("序列化消息失败: {e}")))?;

        let mut state = self.state.lock().await;

        // 默认交换机按队列名直接投递
        if exchange.is_empty() {
            return state.push(routing_key, payload, priority);
        }

        if !state.exchanges.contains(exchange) {
            return Err(SchedulerError::MessageQueue(format!(
                "交换机不存在: {exchange}"
            )));
        }

        let targets: Vec<String> = state
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange && topic_matches(&b.pattern, routing_key))
            .map(|b| b.queue.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        if targets.is_empty() {
            debug!("消息无法路由，已丢弃: {} -> {}", exchange, routing_key);
        }
        for queue in targets {
            state.push(&queue, payload.clone(), priority)?;
        }
        Ok(())
    }

    async fn consume_messages(
        &self,
        queue: &str,
        max_messages: usize,
    ) -> SchedulerResult<Vec<Delivery>> {
        self.ensure_connected()?;
        let mut state = self.state.lock().await;
        let mut deliveries = Vec::new();

        while deliveries.len() < max_messages {
            let buffer = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| SchedulerError::MessageQueue(format!("队列不存在: {queue}")))?;
            let Some(message) = buffer.messages.pop() else {
                break;
            };

            state.next_delivery_tag += 1;
            let delivery_tag = state.next_delivery_tag;
            deliveries.push(Delivery {
                delivery_tag,
                payload: message.payload.clone(),
                redelivered: message.redelivered,
            });
            state
                .unacked
                .insert(delivery_tag, (queue.to_string(), message));
        }

        Ok(deliveries)
    }

    async fn ack_message(&self, delivery_tag: u64) -> SchedulerResult<()> {
        let mut state = self.state.lock().await;
        state
            .unacked
            .remove(&delivery_tag)
            .map(|_| ())
            .ok_or_else(|| {
                SchedulerError::MessageQueue(format!("未知的投递标签: {delivery_tag}"))
            })
    }

    async fn nack_message(&self, delivery_tag: u64, requeue: bool) -> SchedulerResult<()> {
        let mut state = self.state.lock().await;
        let (queue, message) = state.unacked.remove(&delivery_tag).ok_or_else(|| {
            SchedulerError::MessageQueue(format!("未知的投递标签: {delivery_tag}"))
        })?;
        if requeue {
            state.requeue(queue, message);
        }
        Ok(())
    }

    async fn get_queue_size(&self, queue: &str) -> SchedulerResult<u32> {
        let state = self.state.lock().await;
        state
            .queues
            .get(queue)
            .map(|buffer| buffer.messages.len() as u32)
            .ok_or_else(|| SchedulerError::MessageQueue(format!("队列不存在: {queue}")))
    }
}
