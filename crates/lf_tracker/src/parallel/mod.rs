// crates/lf_tracker/src/parallel/mod.rs

//! 分布式追踪
//!
//! 流场被划分到多个进程（rank）上，每个进程只持有自己的流场分区，
//! 表面数据在所有进程上相同。跨越分区边界的粒子以二进制消息
//! 迁移到可能包含它的进程上继续积分。
//!
//! # 组成
//!
//! - [`comm`]: 进程间通信能力 [`Communicator`] 与进程内实现 [`LocalCluster`]
//! - [`wire`]: 粒子与数组模式的二进制编码
//! - [`schema`]: 种子数组模式协商
//! - [`stream`]: 粒子发送与接收
//! - [`quiescence`]: 两阶段终止检测状态机
//! - [`tracker`]: 接入追踪器的 [`DistributedFeed`]
//!
//! # 消息标签
//!
//! | 标签 | 用途 |
//! |------|------|
//! | 621 | 粒子 |
//! | 622 | 终止检测标记 |
//! | 623 | 数组模式 |

pub mod comm;
pub mod quiescence;
pub mod schema;
pub mod stream;
pub mod tracker;
pub mod wire;

pub use comm::{Communicator, LocalCluster, LocalComm, SendRequest, Tag};
pub use quiescence::{FeedCoordinator, FeedState, FlagMessage, QuiescenceStep, RankFlag, RootQuiescence, WorkerQuiescence};
pub use schema::negotiate_seed_schema;
pub use stream::ParticleStreamManager;
pub use tracker::{DistributedFeed, MigrationStats};
pub use wire::WireError;

/// 粒子消息标签
pub const TAG_PARTICLE: Tag = 621;
/// 终止检测标记标签
pub const TAG_RANK_FLAG: Tag = 622;
/// 数组模式标签
pub const TAG_ARRAY: Tag = 623;
