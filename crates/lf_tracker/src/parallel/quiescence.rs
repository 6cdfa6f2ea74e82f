// crates/lf_tracker/src/parallel/quiescence.rs

//! 两阶段终止检测
//!
//! rank 0 协调，其余 rank 在本地队列耗尽时进入等待：
//!
//! 1. 工作进程发送 `Empty`
//! 2. 协调进程等到所有工作进程都为 `Empty`，再检查自身队列和
//!    新到达的粒子，仍为空时广播 `Empty`
//! 3. 工作进程收到 `Empty` 后若仍无粒子，回复 `Finished`；
//!    若收到了粒子，发送 `Working` 并恢复积分
//! 4. 协调进程看到任一 `Working` 时广播 `Working`，回到第 2 步；
//!    看到全部 `Finished` 时广播 `Finished`，所有进程结束
//!
//! [`RootQuiescence`] 与 [`WorkerQuiescence`] 是不做任何通信的状态机，
//! 由 [`FeedCoordinator`] 负责收发标记并驱动轮询。
//!
//! 每条标记带轮次号。协调进程每广播一次 `Empty` 轮次加一，工作进程的
//! `Finished` 回复携带所应答的轮次，协调进程忽略旧轮次的 `Finished`。
//! 工作进程只应答比上次应答更新的 `Empty`。协调进程在广播 `Empty` 后
//! 记住期间出现过的任何 `Working`，避免被随后的 `Empty` 覆盖。

use super::comm::{Communicator, SendRequest};
use super::TAG_RANK_FLAG;
use crate::particle::Particle;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// 进程状态标记
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RankFlag {
    Working = 0,
    Empty = 1,
    Finished = 2,
}

impl RankFlag {
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::Working,
            1 => Self::Empty,
            2 => Self::Finished,
            _ => return None,
        })
    }

    #[inline]
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// 带轮次号的状态标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlagMessage {
    pub flag: RankFlag,
    /// 协调进程为当前轮次，工作进程的 `Finished` 为所应答的轮次
    pub round: u32,
}

impl FlagMessage {
    pub fn new(flag: RankFlag, round: u32) -> Self {
        Self { flag, round }
    }

    fn encode(self) -> [u32; 2] {
        [self.flag.code() as u32, self.round]
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        let [code, round]: [u32; 2] = bytemuck::try_pod_read_unaligned(bytes).ok()?;
        let flag = RankFlag::from_code(i32::try_from(code).ok()?)?;
        Some(Self { flag, round })
    }
}

/// 一次轮询后的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    /// 继续等待
    Wait,
    /// 本地有粒子，恢复积分
    Resume,
    /// 所有进程结束
    Finished,
}

/// 一次轮询的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuiescenceStep {
    /// 需要发出的标记（协调进程为广播，工作进程为发往 rank 0）
    pub send: Option<FlagMessage>,
    pub next: FeedState,
}

impl QuiescenceStep {
    fn wait() -> Self {
        Self {
            send: None,
            next: FeedState::Wait,
        }
    }

    fn send(flag: RankFlag, round: u32, next: FeedState) -> Self {
        Self {
            send: Some(FlagMessage::new(flag, round)),
            next,
        }
    }
}

// ============================================================
// 协调进程
// ============================================================

/// 协调进程阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootPhase {
    /// 等待所有工作进程报告 Empty
    WaitingEmpty,
    /// 已广播 Empty，等待 Finished 或 Working
    WaitingFinished,
    Finished,
}

/// 协调进程状态机
#[derive(Debug, Clone)]
pub struct RootQuiescence {
    phase: RootPhase,
    /// rank 1.. 的最新标记
    states: Vec<RankFlag>,
    saw_working: bool,
    /// 已广播的 Empty 轮数
    round: u32,
}

impl RootQuiescence {
    /// `n_ranks` 为进程总数（含协调进程）
    pub fn new(n_ranks: usize) -> Self {
        Self {
            phase: RootPhase::WaitingEmpty,
            states: vec![RankFlag::Working; n_ranks.saturating_sub(1)],
            saw_working: false,
            round: 0,
        }
    }

    pub fn phase(&self) -> RootPhase {
        self.phase
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    /// 记录工作进程发来的标记，按到达顺序逐条调用
    pub fn record(&mut self, rank: usize, message: FlagMessage) {
        let Some(state) = rank.checked_sub(1).and_then(|i| self.states.get_mut(i)) else {
            warn!("忽略来自 rank {} 的状态标记", rank);
            return;
        };
        let flag = message.flag;
        if flag == RankFlag::Finished && message.round != self.round {
            trace!("忽略 rank {} 对第 {} 轮的过期 Finished", rank, message.round);
            return;
        }
        *state = flag;
        if flag == RankFlag::Working {
            self.saw_working = true;
        }
    }

    fn all(&self, flag: RankFlag) -> bool {
        self.states.iter().all(|&s| s == flag)
    }

    /// 本地队列为空（`local_empty`）时推进一步
    pub fn poll(&mut self, local_empty: bool) -> QuiescenceStep {
        match self.phase {
            RootPhase::WaitingEmpty => {
                self.saw_working = false;
                if !local_empty {
                    QuiescenceStep {
                        send: None,
                        next: FeedState::Resume,
                    }
                } else if self.all(RankFlag::Empty) {
                    self.phase = RootPhase::WaitingFinished;
                    self.round += 1;
                    QuiescenceStep::send(RankFlag::Empty, self.round, FeedState::Wait)
                } else {
                    QuiescenceStep::wait()
                }
            }
            RootPhase::WaitingFinished => {
                if self.saw_working || !local_empty {
                    self.saw_working = false;
                    self.phase = RootPhase::WaitingEmpty;
                    let next = if local_empty { FeedState::Wait } else { FeedState::Resume };
                    QuiescenceStep::send(RankFlag::Working, self.round, next)
                } else if self.all(RankFlag::Finished) {
                    self.phase = RootPhase::Finished;
                    QuiescenceStep::send(RankFlag::Finished, self.round, FeedState::Finished)
                } else {
                    QuiescenceStep::wait()
                }
            }
            RootPhase::Finished => QuiescenceStep {
                send: None,
                next: FeedState::Finished,
            },
        }
    }
}

// ============================================================
// 工作进程
// ============================================================

/// 工作进程阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Working,
    /// 已报告 Empty
    Empty,
    /// 已回复 Finished，等待协调进程确认
    AwaitFinish,
    Finished,
}

/// 工作进程状态机
#[derive(Debug, Clone)]
pub struct WorkerQuiescence {
    phase: WorkerPhase,
    /// 协调进程的最新广播
    root: FlagMessage,
    /// 已回复 Finished（或恢复积分时作废）的最大轮次
    answered: u32,
}

impl Default for WorkerQuiescence {
    fn default() -> Self {
        Self {
            phase: WorkerPhase::Working,
            root: FlagMessage::new(RankFlag::Working, 0),
            answered: 0,
        }
    }
}

impl WorkerQuiescence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> WorkerPhase {
        self.phase
    }

    /// 记录协调进程的广播，只保留最新值
    pub fn record_root_flag(&mut self, message: FlagMessage) {
        self.root = message;
    }

    /// 已回复 Finished 后不再接收粒子
    pub fn accepts_particles(&self) -> bool {
        matches!(self.phase, WorkerPhase::Working | WorkerPhase::Empty)
    }

    /// 尚未应答的 Empty 广播
    fn pending_empty(&self) -> Option<u32> {
        (self.root.flag == RankFlag::Empty && self.root.round > self.answered).then_some(self.root.round)
    }

    fn finish(&mut self) -> QuiescenceStep {
        self.phase = WorkerPhase::Finished;
        QuiescenceStep {
            send: None,
            next: FeedState::Finished,
        }
    }

    fn answer(&mut self, round: u32) -> QuiescenceStep {
        self.phase = WorkerPhase::AwaitFinish;
        self.answered = round;
        QuiescenceStep::send(RankFlag::Finished, round, FeedState::Wait)
    }

    pub fn poll(&mut self, local_empty: bool) -> QuiescenceStep {
        let round = self.root.round;
        match self.phase {
            WorkerPhase::Working => {
                if local_empty {
                    self.phase = WorkerPhase::Empty;
                    QuiescenceStep::send(RankFlag::Empty, round, FeedState::Wait)
                } else {
                    QuiescenceStep {
                        send: None,
                        next: FeedState::Resume,
                    }
                }
            }
            WorkerPhase::Empty => {
                if self.root.flag == RankFlag::Finished {
                    return self.finish();
                }
                if !local_empty {
                    self.phase = WorkerPhase::Working;
                    // 已收到的 Empty 早于这批粒子，作废
                    self.answered = self.answered.max(round);
                    return QuiescenceStep::send(RankFlag::Working, round, FeedState::Resume);
                }
                match self.pending_empty() {
                    Some(round) => self.answer(round),
                    None => QuiescenceStep::wait(),
                }
            }
            WorkerPhase::AwaitFinish => match self.root.flag {
                RankFlag::Finished => self.finish(),
                RankFlag::Working => {
                    self.phase = WorkerPhase::Empty;
                    QuiescenceStep::send(RankFlag::Empty, round, FeedState::Wait)
                }
                // Working 与下一轮 Empty 在同一次读取中到达
                RankFlag::Empty => match self.pending_empty() {
                    Some(round) => self.answer(round),
                    None => QuiescenceStep::wait(),
                },
            },
            WorkerPhase::Finished => QuiescenceStep {
                send: None,
                next: FeedState::Finished,
            },
        }
    }
}

// ============================================================
// 轮询驱动
// ============================================================

#[derive(Debug)]
enum Role {
    Root(RootQuiescence),
    Worker(WorkerQuiescence),
}

/// 终止检测的轮询驱动
///
/// 在追踪器协调线程上同步运行，本地队列耗尽时调用 [`feed`]。
///
/// [`feed`]: FeedCoordinator::feed
#[derive(Debug)]
pub struct FeedCoordinator {
    comm: Arc<dyn Communicator>,
    role: Role,
    requests: Vec<SendRequest>,
    poll_interval: Duration,
}

impl FeedCoordinator {
    /// 默认轮询间隔
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(200);

    pub fn new(comm: Arc<dyn Communicator>) -> Self {
        let role = if comm.is_root() {
            Role::Root(RootQuiescence::new(comm.size()))
        } else {
            Role::Worker(WorkerQuiescence::new())
        };
        Self {
            comm,
            role,
            requests: Vec::new(),
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// 所有进程是否已结束
    pub fn is_finished(&self) -> bool {
        match &self.role {
            Role::Root(root) => root.phase() == RootPhase::Finished,
            Role::Worker(worker) => worker.phase() == WorkerPhase::Finished,
        }
    }

    /// 本地队列为空时等待新粒子或全局结束
    ///
    /// `receive` 把新到达的粒子追加到 `queue`。返回 true 表示 `queue`
    /// 中有待积分的粒子，false 表示所有进程都已结束。
    pub fn feed<F>(&mut self, mut receive: F, queue: &mut Vec<Particle>) -> bool
    where
        F: FnMut(&mut Vec<Particle>),
    {
        loop {
            self.drain_flags();
            let accepts = match &self.role {
                Role::Root(_) => true,
                Role::Worker(worker) => worker.accepts_particles(),
            };
            if accepts {
                receive(queue);
            }

            let step = match &mut self.role {
                Role::Root(root) => root.poll(queue.is_empty()),
                Role::Worker(worker) => worker.poll(queue.is_empty()),
            };
            if let Some(message) = step.send {
                self.send_flag(message);
            }
            match step.next {
                FeedState::Resume => return true,
                FeedState::Finished => {
                    debug!("rank {} 终止检测完成", self.comm.rank());
                    return false;
                }
                FeedState::Wait => thread::sleep(self.poll_interval),
            }
        }
    }

    fn drain_flags(&mut self) {
        match &mut self.role {
            Role::Root(root) => {
                while let Some((source, bytes)) = self.comm.try_recv(TAG_RANK_FLAG) {
                    match FlagMessage::decode(&bytes) {
                        Some(message) => root.record(source, message),
                        None => warn!("rank {} 发来无法识别的状态标记", source),
                    }
                }
            }
            Role::Worker(worker) => {
                while let Some(bytes) = self.comm.try_recv_from(0, TAG_RANK_FLAG) {
                    match FlagMessage::decode(&bytes) {
                        Some(message) => worker.record_root_flag(message),
                        None => warn!("协调进程发来无法识别的状态标记"),
                    }
                }
            }
        }
    }

    fn send_flag(&mut self, message: FlagMessage) {
        self.requests.retain(|r| !r.test());
        let buffer: Arc<[u8]> = Arc::from(bytemuck::bytes_of(&message.encode()).to_vec());
        let rank = self.comm.rank();
        trace!("rank {} 发送 {:?}（第 {} 轮）", rank, message.flag, message.round);
        if self.comm.is_root() {
            for dest in 1..self.comm.size() {
                self.requests
                    .push(self.comm.isend(dest, TAG_RANK_FLAG, Arc::clone(&buffer)));
            }
        } else {
            self.requests.push(self.comm.isend(0, TAG_RANK_FLAG, buffer));
        }
    }
}

impl Drop for FeedCoordinator {
    fn drop(&mut self) {
        for request in self.requests.drain(..) {
            request.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(flag: RankFlag, round: u32) -> FlagMessage {
        FlagMessage::new(flag, round)
    }

    fn sent(step: QuiescenceStep) -> Option<RankFlag> {
        step.send.map(|m| m.flag)
    }

    #[test]
    fn test_single_rank_finishes_immediately() {
        let mut root = RootQuiescence::new(1);
        assert_eq!(root.poll(true), QuiescenceStep::send(RankFlag::Empty, 1, FeedState::Wait));
        assert_eq!(
            root.poll(true),
            QuiescenceStep::send(RankFlag::Finished, 1, FeedState::Finished)
        );
    }

    #[test]
    fn test_two_phase_handshake() {
        let mut root = RootQuiescence::new(3);
        let mut w1 = WorkerQuiescence::new();
        let mut w2 = WorkerQuiescence::new();

        assert_eq!(sent(w1.poll(true)), Some(RankFlag::Empty));
        root.record(1, msg(RankFlag::Empty, 0));
        // rank 2 仍在工作
        assert_eq!(root.poll(true), QuiescenceStep::wait());

        assert_eq!(sent(w2.poll(true)), Some(RankFlag::Empty));
        root.record(2, msg(RankFlag::Empty, 0));
        assert_eq!(root.poll(true).send, Some(msg(RankFlag::Empty, 1)));

        w1.record_root_flag(msg(RankFlag::Empty, 1));
        w2.record_root_flag(msg(RankFlag::Empty, 1));
        assert_eq!(w1.poll(true).send, Some(msg(RankFlag::Finished, 1)));
        assert_eq!(w2.poll(true).send, Some(msg(RankFlag::Finished, 1)));
        root.record(1, msg(RankFlag::Finished, 1));
        assert_eq!(root.poll(true), QuiescenceStep::wait());
        root.record(2, msg(RankFlag::Finished, 1));
        assert_eq!(root.poll(true).next, FeedState::Finished);

        w1.record_root_flag(msg(RankFlag::Finished, 1));
        assert_eq!(w1.poll(true).next, FeedState::Finished);
        assert!(!w1.accepts_particles());
    }

    #[test]
    fn test_root_refill_prevents_premature_finish() {
        let mut root = RootQuiescence::new(2);
        let mut worker = WorkerQuiescence::new();
        assert_eq!(sent(worker.poll(true)), Some(RankFlag::Empty));
        root.record(1, msg(RankFlag::Empty, 0));

        for _ in 0..5 {
            // rank 1 已报告 Empty，rank 0 仍有粒子
            assert_eq!(root.poll(false).next, FeedState::Resume);
            // rank 0 耗尽，发起握手
            let empty = root.poll(true).send.unwrap();
            assert_eq!(empty.flag, RankFlag::Empty);
            worker.record_root_flag(empty);
            let reply = worker.poll(true).send.unwrap();
            assert_eq!(reply, msg(RankFlag::Finished, empty.round));
            root.record(1, reply);

            // 广播 Finished 之前 rank 0 又收到粒子
            let working = root.poll(false);
            assert_eq!(working, QuiescenceStep::send(RankFlag::Working, empty.round, FeedState::Resume));
            assert_ne!(root.phase(), RootPhase::Finished);
            worker.record_root_flag(working.send.unwrap());
            assert_eq!(sent(worker.poll(true)), Some(RankFlag::Empty));
            assert_eq!(worker.phase(), WorkerPhase::Empty);
            root.record(1, msg(RankFlag::Empty, empty.round));
        }
        assert_eq!(root.round(), 5);

        // rank 0 真正清空后才完成握手
        let empty = root.poll(true).send.unwrap();
        assert_eq!(empty, msg(RankFlag::Empty, 6));
        worker.record_root_flag(empty);
        let reply = worker.poll(true).send.unwrap();
        root.record(1, reply);
        let finished = root.poll(true);
        assert_eq!(finished.next, FeedState::Finished);
        worker.record_root_flag(finished.send.unwrap());
        assert_eq!(worker.poll(true).next, FeedState::Finished);
    }

    #[test]
    fn test_working_reply_restarts_round() {
        let mut root = RootQuiescence::new(3);
        root.record(1, msg(RankFlag::Empty, 0));
        root.record(2, msg(RankFlag::Empty, 0));
        assert_eq!(root.poll(true).send, Some(msg(RankFlag::Empty, 1)));

        // rank 1 收到迁移粒子，rank 2 已回复 Finished
        root.record(1, msg(RankFlag::Working, 1));
        root.record(2, msg(RankFlag::Finished, 1));
        // rank 1 很快又做完，Working 被 Empty 覆盖，但协调进程仍须重新开始
        root.record(1, msg(RankFlag::Empty, 1));
        assert_eq!(root.poll(true), QuiescenceStep::send(RankFlag::Working, 1, FeedState::Wait));
        assert_eq!(root.phase(), RootPhase::WaitingEmpty);
        // rank 2 的 Finished 不算 Empty
        assert_eq!(root.poll(true), QuiescenceStep::wait());
        root.record(2, msg(RankFlag::Empty, 1));
        assert_eq!(root.poll(true).send, Some(msg(RankFlag::Empty, 2)));
    }

    #[test]
    fn test_stale_finished_reply_does_not_end_run() {
        let mut root = RootQuiescence::new(2);
        let mut worker = WorkerQuiescence::new();

        root.record(1, worker.poll(true).send.unwrap());
        let round_a = root.poll(true).send.unwrap();
        assert_eq!(round_a, msg(RankFlag::Empty, 1));

        // 第 1 轮的 Empty 到达之前 rank 1 收到迁移粒子并做完
        let working = worker.poll(false).send.unwrap();
        let empty = worker.poll(true).send.unwrap();
        worker.record_root_flag(round_a);
        let stale = worker.poll(true).send.unwrap();
        assert_eq!(stale, msg(RankFlag::Finished, 1));

        // 协调进程先看到 Working，开始新一轮
        root.record(1, working);
        let round_b = root.poll(true).send.unwrap();
        assert_eq!(round_b.flag, RankFlag::Working);
        root.record(1, empty);
        let round_c = root.poll(true).send.unwrap();
        assert_eq!(round_c, msg(RankFlag::Empty, 2));
        // 对第 1 轮的 Finished 不能结束第 2 轮
        root.record(1, stale);
        assert_eq!(root.poll(true), QuiescenceStep::wait());
        assert_eq!(root.phase(), RootPhase::WaitingFinished);

        // 工作进程一次读到 Working 和第 2 轮 Empty
        worker.record_root_flag(round_b);
        worker.record_root_flag(round_c);
        let reply = worker.poll(true).send.unwrap();
        assert_eq!(reply, msg(RankFlag::Finished, 2));
        root.record(1, reply);
        let round_d = root.poll(true);
        assert_eq!(round_d.next, FeedState::Finished);

        worker.record_root_flag(round_d.send.unwrap());
        assert_eq!(worker.poll(true).next, FeedState::Finished);
        assert_eq!(worker.phase(), WorkerPhase::Finished);
    }

    #[test]
    fn test_worker_in_empty_accepts_finished_broadcast() {
        let mut worker = WorkerQuiescence::new();
        worker.poll(true);
        worker.record_root_flag(msg(RankFlag::Empty, 1));
        worker.record_root_flag(msg(RankFlag::Finished, 1));
        assert_eq!(worker.poll(true).next, FeedState::Finished);
        assert_eq!(worker.phase(), WorkerPhase::Finished);
    }

    #[test]
    fn test_worker_discards_stale_empty_on_resume() {
        let mut worker = WorkerQuiescence::new();
        worker.poll(true);
        worker.record_root_flag(msg(RankFlag::Empty, 1));
        // 收到粒子，恢复积分
        assert_eq!(
            worker.poll(false),
            QuiescenceStep::send(RankFlag::Working, 1, FeedState::Resume)
        );
        // 再次耗尽：不能凭旧的 Empty 回复 Finished
        assert_eq!(sent(worker.poll(true)), Some(RankFlag::Empty));
        assert_eq!(worker.poll(true), QuiescenceStep::wait());
        // 新一轮的 Empty 照常应答
        worker.record_root_flag(msg(RankFlag::Empty, 2));
        assert_eq!(worker.poll(true).send, Some(msg(RankFlag::Finished, 2)));
    }

    #[test]
    fn test_worker_returns_to_empty_on_working_broadcast() {
        let mut worker = WorkerQuiescence::new();
        worker.poll(true);
        worker.record_root_flag(msg(RankFlag::Empty, 1));
        assert_eq!(sent(worker.poll(true)), Some(RankFlag::Finished));
        worker.record_root_flag(msg(RankFlag::Working, 1));
        assert_eq!(worker.poll(true), QuiescenceStep::send(RankFlag::Empty, 1, FeedState::Wait));
        assert_eq!(worker.phase(), WorkerPhase::Empty);
        assert!(worker.accepts_particles());
    }

    #[test]
    fn test_flag_codes() {
        for code in 0..3 {
            assert_eq!(RankFlag::from_code(code).unwrap().code(), code);
        }
        let message = msg(RankFlag::Finished, 7);
        assert_eq!(FlagMessage::decode(bytemuck::bytes_of(&message.encode())), Some(message));
        assert_eq!(FlagMessage::decode(&1i32.to_ne_bytes()), None);
        assert_eq!(FlagMessage::decode(bytemuck::bytes_of(&[9u32, 0])), None);
    }
}
