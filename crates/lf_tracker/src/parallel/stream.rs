// crates/lf_tracker/src/parallel/stream.rs

//! 粒子迁移
//!
//! 创建时全收集各进程流场的包围盒。发送时把粒子发给包围盒包含
//! 其位置的所有其他进程（包围盒只是粗略划分，可能有多个进程包含
//! 同一位置，由接收方定位后决定保留还是丢弃）；标记为手动平移的
//! 粒子发给所有其他进程。
//!
//! 一条编码后的消息被所有目标共享，发送请求完成前缓冲保持有效，
//! 析构时等待全部未完成请求。

use super::comm::{Communicator, SendRequest};
use super::wire::{decode_particle, encode_particle};
use super::TAG_PARTICLE;
use crate::particle::Particle;
use lf_mesh::Bounds;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// 粒子发送与接收
#[derive(Debug)]
pub struct ParticleStreamManager {
    comm: Arc<dyn Communicator>,
    boxes: Vec<Bounds>,
    seed_components: usize,
    requests: Vec<SendRequest>,
    sent: u64,
    received: u64,
}

impl ParticleStreamManager {
    /// 集合操作：所有进程须同时创建
    pub fn new(comm: Arc<dyn Communicator>, local_bounds: &Bounds, seed_components: usize) -> Self {
        let boxes = comm
            .all_gather_f64(&local_bounds.to_array())
            .iter()
            .map(|b| Bounds::from_array(b).unwrap_or_else(Bounds::empty))
            .collect();
        Self {
            comm,
            boxes,
            seed_components,
            requests: Vec::new(),
            sent: 0,
            received: 0,
        }
    }

    /// 各进程流场包围盒
    pub fn boxes(&self) -> &[Bounds] {
        &self.boxes
    }

    /// 发送粒子，返回目标进程数
    pub fn send_particle(&mut self, particle: &Particle) -> usize {
        let rank = self.comm.rank();
        let position = particle.position();
        let targets: Vec<usize> = self
            .boxes
            .iter()
            .enumerate()
            .filter(|&(r, b)| r != rank && (particle.manual_shift || b.contains(position, 0.0)))
            .map(|(r, _)| r)
            .collect();

        self.clean_send_requests();
        if targets.is_empty() {
            debug!("粒子 {} 位于 {:?}，不在其他进程范围内", particle.id, position);
            return 0;
        }

        let buffer: Arc<[u8]> = Arc::from(encode_particle(particle));
        for &dest in &targets {
            self.requests
                .push(self.comm.isend(dest, TAG_PARTICLE, Arc::clone(&buffer)));
        }
        self.sent += 1;
        trace!("粒子 {} 发往 rank {:?}", particle.id, targets);
        targets.len()
    }

    /// 接收一个粒子，没有时返回 None
    ///
    /// 无法解码的消息记录警告后丢弃。
    pub fn receive_particle(&mut self) -> Option<Particle> {
        while let Some((source, bytes)) = self.comm.try_recv(TAG_PARTICLE) {
            match decode_particle(&bytes, self.seed_components) {
                Ok(particle) => {
                    self.received += 1;
                    return Some(particle);
                }
                Err(e) => warn!("丢弃来自 rank {} 的粒子消息: {}", source, e),
            }
        }
        None
    }

    /// 释放已完成的发送请求
    pub fn clean_send_requests(&mut self) {
        self.requests.retain(|r| !r.test());
    }

    /// 未完成的发送请求数
    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    /// 已发送的粒子数
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// 已接收的粒子数
    pub fn received(&self) -> u64 {
        self.received
    }
}

impl Drop for ParticleStreamManager {
    fn drop(&mut self) {
        for request in self.requests.drain(..) {
            request.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::comm::LocalCluster;
    use glam::DVec3;
    use std::thread;

    fn managers(bounds: Vec<Bounds>) -> Vec<ParticleStreamManager> {
        let comms = LocalCluster::create(bounds.len());
        thread::scope(|s| {
            let handles: Vec<_> = comms
                .into_iter()
                .zip(bounds)
                .map(|(c, b)| {
                    s.spawn(move || ParticleStreamManager::new(Arc::new(c) as Arc<dyn Communicator>, &b, 1))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    fn unit_box(x0: f64) -> Bounds {
        Bounds::new(DVec3::new(x0, 0.0, 0.0), DVec3::new(x0 + 1.0, 1.0, 1.0))
    }

    fn particle_at(x: f64) -> Particle {
        let mut p = Particle::new(6, 0, 1, 1, 0, 0.0, vec![0.5]);
        p.set_position(DVec3::new(x, 0.5, 0.5));
        p
    }

    #[test]
    fn test_send_to_containing_ranks() {
        let mut m = managers(vec![unit_box(0.0), unit_box(1.0), unit_box(0.5)]);
        assert_eq!(m[0].boxes().len(), 3);

        // 1.2 同时落在 rank 1 与 rank 2 的包围盒内
        assert_eq!(m[0].send_particle(&particle_at(1.2)), 2);
        assert_eq!(m[1].receive_particle().unwrap().id, 1);
        assert_eq!(m[2].receive_particle().unwrap().seed_data, vec![0.5]);
        assert!(m[1].receive_particle().is_none());

        // 不在任何其他进程内
        assert_eq!(m[0].send_particle(&particle_at(5.0)), 0);
        assert_eq!(m[0].sent(), 1);
        assert_eq!(m[0].pending_requests(), 0);
    }

    #[test]
    fn test_manual_shift_goes_everywhere() {
        let mut m = managers(vec![unit_box(0.0), unit_box(1.0), unit_box(2.0)]);
        let mut p = particle_at(-10.0);
        p.manual_shift = true;
        assert_eq!(m[1].send_particle(&p), 2);
        assert!(m[0].receive_particle().unwrap().manual_shift);
        assert!(m[2].receive_particle().is_some());
        assert_eq!(m[2].received(), 1);
    }

    #[test]
    fn test_rank_without_flow_receives_nothing() {
        let mut m = managers(vec![unit_box(0.0), Bounds::empty()]);
        assert_eq!(m[0].send_particle(&particle_at(1.5)), 0);
        assert!(m[1].receive_particle().is_none());
    }
}
