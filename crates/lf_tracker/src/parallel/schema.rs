// crates/lf_tracker/src/parallel/schema.rs

//! 种子数组模式协商
//!
//! 粒子消息只携带种子数据的数值，各进程必须对种子数组的布局达成一致。
//! 数组最多的进程中编号最大的一个作为权威，把模式发给其他进程：
//!
//! - 数组个数不足的进程丢弃本地数组（非空时记录警告），采用权威模式
//! - 数组个数相同的进程逐项比较，不一致只记录警告，继续使用本地模式
//!
//! 每个进程恰好参与两次最大值归约，调用顺序在所有分支上相同。

use super::comm::Communicator;
use super::wire::{decode_schema, encode_schema};
use super::TAG_ARRAY;
use crate::error::TrackerResult;
use crate::model::ArraySchema;
use std::sync::Arc;
use tracing::{debug, warn};

/// 协商种子数组模式
pub fn negotiate_seed_schema(comm: &dyn Communicator, local: ArraySchema) -> TrackerResult<ArraySchema> {
    let rank = comm.rank();
    let n_local = local.len() as i64;
    let n_max = comm.all_reduce_max_i64(n_local);

    if n_local != n_max {
        if n_local != 0 {
            warn!(
                "rank {} 的种子数组个数 ({}) 与其他进程 ({}) 不一致，丢弃本地数组",
                rank, n_local, n_max
            );
        }
        let owner = comm.all_reduce_max_i64(-1);
        let bytes = comm.recv_from(owner as usize, TAG_ARRAY);
        let schema = decode_schema(&bytes, n_max as usize)?;
        debug!("rank {} 从 rank {} 获得 {} 个种子数组", rank, owner, schema.len());
        return Ok(schema);
    }

    let owner = comm.all_reduce_max_i64(rank as i64);
    if owner as usize == rank {
        let bytes: Arc<[u8]> = Arc::from(encode_schema(&local));
        let requests: Vec<_> = (0..comm.size())
            .filter(|&r| r != rank)
            .map(|r| comm.isend(r, TAG_ARRAY, Arc::clone(&bytes)))
            .collect();
        for request in &requests {
            request.wait();
        }
    } else {
        let bytes = comm.recv_from(owner as usize, TAG_ARRAY);
        match decode_schema(&bytes, local.len()) {
            Ok(remote) => report_mismatch(rank, &local, &remote),
            Err(e) => warn!("rank {} 无法解析 rank {} 的数组模式: {}", rank, owner, e),
        }
    }
    Ok(local)
}

/// 逐项比较本地与权威模式，不一致时记录警告
fn report_mismatch(rank: usize, local: &ArraySchema, remote: &ArraySchema) {
    for (mine, theirs) in local.arrays().iter().zip(remote.arrays()) {
        if mine.data_type != theirs.data_type {
            warn!("rank {}: 数组 {} 的元素类型与其他进程不一致", rank, mine.name);
        }
        if mine.n_components != theirs.n_components {
            warn!("rank {}: 数组 {} 的分量数与其他进程不一致", rank, mine.name);
        }
        if mine.name != theirs.name {
            warn!("rank {}: 数组名 {} 与其他进程的 {} 不一致", rank, mine.name, theirs.name);
        }
        let names_differ = mine
            .component_names
            .iter()
            .zip(&theirs.component_names)
            .any(|(a, b)| a.is_some() && a != b);
        if names_differ {
            warn!("rank {}: 数组 {} 的分量名与其他进程不一致", rank, mine.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ArrayInfo;
    use crate::parallel::comm::LocalCluster;
    use lf_mesh::ArrayDataType;
    use std::thread;

    fn info(name: &str, n: usize) -> ArrayInfo {
        ArrayInfo {
            name: name.into(),
            data_type: ArrayDataType::Float64,
            n_components: n,
            component_names: vec![None; n],
        }
    }

    fn negotiate_all(locals: Vec<ArraySchema>) -> Vec<ArraySchema> {
        let comms = LocalCluster::create(locals.len());
        thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .zip(locals)
                .map(|(c, local)| s.spawn(move || negotiate_seed_schema(c, local).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    #[test]
    fn test_rank_without_seeds_adopts_schema() {
        let full = ArraySchema::new(vec![info("ParticleInitialVelocity", 3), info("ParticleDiameter", 1)]);
        let results = negotiate_all(vec![full.clone(), ArraySchema::default(), full.clone()]);
        for schema in results {
            assert_eq!(schema, full);
        }
    }

    #[test]
    fn test_mismatch_keeps_local() {
        let a = ArraySchema::new(vec![info("ParticleInitialVelocity", 3)]);
        let b = ArraySchema::new(vec![info("ParticleDiameter", 1)]);
        let results = negotiate_all(vec![a.clone(), b.clone()]);
        assert_eq!(results, vec![a, b]);
    }

    #[test]
    fn test_all_empty() {
        let results = negotiate_all(vec![ArraySchema::default(), ArraySchema::default()]);
        assert!(results.iter().all(|s| s.is_empty()));
    }
}
