// crates/lf_tracker/src/parallel/comm.rs

//! 进程间通信
//!
//! [`Communicator`] 描述追踪器需要的最小通信能力：带标签的非阻塞
//! 点对点发送、按标签探测接收，以及屏障、全归约和全收集三种集合操作。
//!
//! [`LocalCluster`] 在同一进程内用线程模拟多个 rank，每个 rank 一个
//! 邮箱；集合操作通过代数计数的会合点实现。发送在消息进入目标邮箱时
//! 即完成（相当于缓冲发送）。

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::error;

/// 消息标签
pub type Tag = i32;

// ============================================================
// 发送请求
// ============================================================

#[derive(Debug, Default)]
struct Completion {
    done: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

/// 非阻塞发送的请求
///
/// 请求持有发送缓冲，在传输确认完成前缓冲保持有效。
/// 同一缓冲可被多个请求共享。
#[derive(Debug, Clone)]
pub struct SendRequest {
    buffer: Arc<[u8]>,
    completion: Arc<Completion>,
}

impl SendRequest {
    /// 未完成的请求
    pub fn pending(buffer: Arc<[u8]>) -> Self {
        Self {
            buffer,
            completion: Arc::new(Completion::default()),
        }
    }

    /// 已完成的请求
    pub fn completed(buffer: Arc<[u8]>) -> Self {
        let request = Self::pending(buffer);
        request.complete();
        request
    }

    /// 由传输层标记完成
    pub fn complete(&self) {
        let _guard = self.completion.lock.lock();
        self.completion.done.store(true, Ordering::Release);
        self.completion.cond.notify_all();
    }

    /// 是否已完成
    pub fn test(&self) -> bool {
        self.completion.done.load(Ordering::Acquire)
    }

    /// 阻塞直到完成
    pub fn wait(&self) {
        let mut guard = self.completion.lock.lock();
        while !self.test() {
            self.completion.cond.wait(&mut guard);
        }
    }

    pub fn buffer(&self) -> &Arc<[u8]> {
        &self.buffer
    }
}

// ============================================================
// 通信能力
// ============================================================

/// 进程间通信能力
///
/// 集合操作必须由所有 rank 以相同顺序调用。
pub trait Communicator: Send + Sync + fmt::Debug {
    /// 本进程编号
    fn rank(&self) -> usize;

    /// 进程总数
    fn size(&self) -> usize;

    /// 非阻塞发送
    fn isend(&self, dest: usize, tag: Tag, data: Arc<[u8]>) -> SendRequest;

    /// 接收任意来源的一条消息，没有时立即返回 None
    fn try_recv(&self, tag: Tag) -> Option<(usize, Vec<u8>)>;

    /// 接收指定来源的一条消息，没有时立即返回 None
    fn try_recv_from(&self, source: usize, tag: Tag) -> Option<Vec<u8>>;

    /// 阻塞接收指定来源的一条消息
    fn recv_from(&self, source: usize, tag: Tag) -> Vec<u8>;

    /// 屏障
    fn barrier(&self);

    /// 全收集：返回按 rank 排列的各进程数据，长度可以不同
    fn all_gather_bytes(&self, data: &[u8]) -> Vec<Vec<u8>>;

    /// 最大值全归约
    fn all_reduce_max_i64(&self, value: i64) -> i64 {
        self.all_gather_bytes(bytemuck::bytes_of(&value))
            .iter()
            .filter(|b| b.len() == 8)
            .map(|b| bytemuck::pod_read_unaligned::<i64>(b))
            .max()
            .unwrap_or(value)
    }

    /// f64 全收集
    fn all_gather_f64(&self, values: &[f64]) -> Vec<Vec<f64>> {
        self.all_gather_bytes(bytemuck::cast_slice(values))
            .iter()
            .map(|b| b.chunks_exact(8).map(bytemuck::pod_read_unaligned).collect())
            .collect()
    }

    /// i64 全收集
    fn all_gather_i64(&self, values: &[i64]) -> Vec<Vec<i64>> {
        self.all_gather_bytes(bytemuck::cast_slice(values))
            .iter()
            .map(|b| b.chunks_exact(8).map(bytemuck::pod_read_unaligned).collect())
            .collect()
    }

    /// 是否为协调进程
    fn is_root(&self) -> bool {
        self.rank() == 0
    }
}

// ============================================================
// 进程内实现
// ============================================================

#[derive(Debug)]
struct Envelope {
    source: usize,
    tag: Tag,
    data: Arc<[u8]>,
}

#[derive(Debug, Default)]
struct Mailbox {
    queue: Mutex<VecDeque<Envelope>>,
    arrived: Condvar,
}

impl Mailbox {
    fn take(&self, source: Option<usize>, tag: Tag) -> Option<Envelope> {
        let mut queue = self.queue.lock();
        let pos = queue
            .iter()
            .position(|e| e.tag == tag && source.map_or(true, |s| e.source == s))?;
        queue.remove(pos)
    }
}

#[derive(Debug, Default)]
struct Rendezvous {
    generation: u64,
    arrived: usize,
    slots: Vec<Vec<u8>>,
    result: Arc<Vec<Vec<u8>>>,
}

#[derive(Debug)]
struct ClusterShared {
    mailboxes: Vec<Mailbox>,
    collective: Mutex<Rendezvous>,
    released: Condvar,
}

/// 进程内多 rank 集群
#[derive(Debug)]
pub struct LocalCluster;

impl LocalCluster {
    /// 创建 `size` 个互联的通信端，第 i 个为 rank i
    pub fn create(size: usize) -> Vec<LocalComm> {
        let size = size.max(1);
        let shared = Arc::new(ClusterShared {
            mailboxes: (0..size).map(|_| Mailbox::default()).collect(),
            collective: Mutex::new(Rendezvous {
                slots: vec![Vec::new(); size],
                ..Default::default()
            }),
            released: Condvar::new(),
        });
        (0..size)
            .map(|rank| LocalComm {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

/// [`LocalCluster`] 中一个 rank 的通信端
#[derive(Debug, Clone)]
pub struct LocalComm {
    rank: usize,
    shared: Arc<ClusterShared>,
}

impl LocalComm {
    /// 本 rank 邮箱中尚未接收的消息数
    pub fn pending_messages(&self) -> usize {
        self.shared.mailboxes[self.rank].queue.lock().len()
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.mailboxes.len()
    }

    fn isend(&self, dest: usize, tag: Tag, data: Arc<[u8]>) -> SendRequest {
        let Some(mailbox) = self.shared.mailboxes.get(dest) else {
            error!("rank {} 向不存在的 rank {} 发送消息", self.rank, dest);
            return SendRequest::completed(data);
        };
        let request = SendRequest::pending(Arc::clone(&data));
        mailbox.queue.lock().push_back(Envelope {
            source: self.rank,
            tag,
            data,
        });
        mailbox.arrived.notify_all();
        request.complete();
        request
    }

    fn try_recv(&self, tag: Tag) -> Option<(usize, Vec<u8>)> {
        self.shared.mailboxes[self.rank]
            .take(None, tag)
            .map(|e| (e.source, e.data.to_vec()))
    }

    fn try_recv_from(&self, source: usize, tag: Tag) -> Option<Vec<u8>> {
        self.shared.mailboxes[self.rank]
            .take(Some(source), tag)
            .map(|e| e.data.to_vec())
    }

    fn recv_from(&self, source: usize, tag: Tag) -> Vec<u8> {
        let mailbox = &self.shared.mailboxes[self.rank];
        let mut queue = mailbox.queue.lock();
        loop {
            if let Some(pos) = queue.iter().position(|e| e.tag == tag && e.source == source) {
                if let Some(e) = queue.remove(pos) {
                    return e.data.to_vec();
                }
            }
            mailbox.arrived.wait(&mut queue);
        }
    }

    fn barrier(&self) {
        self.all_gather_bytes(&[]);
    }

    fn all_gather_bytes(&self, data: &[u8]) -> Vec<Vec<u8>> {
        let size = self.size();
        let mut state = self.shared.collective.lock();
        state.slots[self.rank] = data.to_vec();
        state.arrived += 1;
        if state.arrived == size {
            let slots = std::mem::replace(&mut state.slots, vec![Vec::new(); size]);
            state.result = Arc::new(slots);
            state.arrived = 0;
            state.generation += 1;
            self.shared.released.notify_all();
            return (*state.result).clone();
        }
        let generation = state.generation;
        while state.generation == generation {
            self.shared.released.wait(&mut state);
        }
        (*state.result).clone()
    }
}
