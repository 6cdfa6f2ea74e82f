// crates/lf_tracker/src/parallel/wire.rs

//! 二进制编码
//!
//! 字段按固定顺序依次写入，除字符串外没有长度前缀，收发两端必须
//! 使用同一顺序。数值按本机字节序写入，各进程需运行在相同架构上。
//!
//! 粒子消息：
//!
//! ```text
//! seed_id i64 | id i64 | parent_id i64 | n_variables i32 | n_tracked i32
//! number_of_steps i64 | integration_time f64 | prev_integration_time f64
//! user_flag i32 | insert_previous_position u8 | manual_shift u8
//! n_variables × (prev f64, cur f64, next f64)
//! prev_tracked | tracked | next_tracked      各 n_tracked × f64
//! seed_data                                  协商模式的总分量数 × f64
//! ```
//!
//! 数组模式消息，每个数组：
//!
//! ```text
//! data_type i32 | n_components i32 | name_len i32 | name bytes
//! n_components × (comp_name_len i32 | comp_name bytes)   长度 0 表示无名
//! ```
//!
//! 数组个数不在消息中，由协商时的归约结果给出。

use crate::model::{ArrayInfo, ArraySchema};
use crate::particle::Particle;
use bytemuck::Pod;
use lf_mesh::ArrayDataType;
use thiserror::Error;

/// 编码错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// 消息在读取字段时提前结束
    #[error("消息截断: 需要 {needed} 字节, 剩余 {remaining} 字节")]
    Truncated { needed: usize, remaining: usize },

    /// 读取完成后仍有多余字节
    #[error("消息末尾有 {0} 个多余字节")]
    TrailingBytes(usize),

    /// 计数字段为负
    #[error("字段 {field} 为负: {value}")]
    NegativeCount { field: &'static str, value: i64 },

    /// 种子数据分量数与协商模式不符
    #[error("种子数据长度不符: 期望 {expected} 个分量, 实际 {found}")]
    SeedDataMismatch { expected: usize, found: usize },

    /// 未知的数组元素类型
    #[error("未知的数组类型标签: {0}")]
    UnknownDataType(i32),

    /// 名称不是合法 UTF-8
    #[error("数组名称不是合法 UTF-8")]
    InvalidUtf8,
}

// ============================================================
// 读写器
// ============================================================

/// 顺序写入
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn put<T: Pod>(&mut self, value: T) -> &mut Self {
        self.buf.extend_from_slice(bytemuck::bytes_of(&value));
        self
    }

    pub fn put_slice(&mut self, values: &[f64]) -> &mut Self {
        self.buf.extend_from_slice(bytemuck::cast_slice(values));
        self
    }

    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.put(u8::from(value))
    }

    /// 长度前缀字符串
    pub fn put_str(&mut self, value: &str) -> &mut Self {
        self.put(value.len() as i32);
        self.buf.extend_from_slice(value.as_bytes());
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// 顺序读取
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.buf.len() < n {
            return Err(WireError::Truncated {
                needed: n,
                remaining: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn get<T: Pod>(&mut self) -> Result<T, WireError> {
        let bytes = self.take(std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    pub fn get_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.get::<u8>()? != 0)
    }

    /// 读取 `out.len()` 个 f64
    pub fn get_into(&mut self, out: &mut [f64]) -> Result<(), WireError> {
        let bytes = self.take(std::mem::size_of_val(out))?;
        for (dst, chunk) in out.iter_mut().zip(bytes.chunks_exact(8)) {
            *dst = bytemuck::pod_read_unaligned(chunk);
        }
        Ok(())
    }

    /// 读取非负 i32 计数
    pub fn get_count(&mut self, field: &'static str) -> Result<usize, WireError> {
        let value = self.get::<i32>()?;
        usize::try_from(value).map_err(|_| WireError::NegativeCount {
            field,
            value: i64::from(value),
        })
    }

    pub fn get_str(&mut self, field: &'static str) -> Result<String, WireError> {
        let len = self.get_count(field)?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// 确认已读完
    pub fn finish(self) -> Result<(), WireError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(WireError::TrailingBytes(self.buf.len()))
        }
    }
}

// ============================================================
// 粒子
// ============================================================

/// 固定头部长度
const PARTICLE_HEADER_LEN: usize = 8 * 3 + 4 * 2 + 8 + 8 * 2 + 4 + 1 + 1;

/// 粒子消息长度
pub fn particle_message_len(n_variables: usize, n_tracked: usize, seed_components: usize) -> usize {
    PARTICLE_HEADER_LEN + 8 * (3 * n_variables + 3 * n_tracked + seed_components)
}

/// 编码粒子
///
/// 定位缓存、模型私有数据与终止状态只在本进程有意义，不写入。
pub fn encode_particle(particle: &Particle) -> Vec<u8> {
    let n_var = particle.n_variables();
    let n_tracked = particle.n_tracked_user_data();
    let mut w = WireWriter::with_capacity(particle_message_len(n_var, n_tracked, particle.seed_data.len()));
    w.put(particle.seed_id)
        .put(particle.id)
        .put(particle.parent_id)
        .put(n_var as i32)
        .put(n_tracked as i32)
        .put(particle.number_of_steps)
        .put(particle.integration_time)
        .put(particle.prev_integration_time)
        .put(particle.user_flag)
        .put_bool(particle.insert_previous_position)
        .put_bool(particle.manual_shift);
    for i in 0..n_var {
        w.put(particle.prev_equation_variables[i])
            .put(particle.equation_variables[i])
            .put(particle.next_equation_variables[i]);
    }
    w.put_slice(&particle.prev_tracked_user_data)
        .put_slice(&particle.tracked_user_data)
        .put_slice(&particle.next_tracked_user_data)
        .put_slice(&particle.seed_data);
    w.finish()
}

/// 解码粒子
///
/// `seed_components` 为协商模式的总分量数。接收到的粒子没有本地
/// 种子元组，`seed_array_tuple_index` 置为 -1。
pub fn decode_particle(bytes: &[u8], seed_components: usize) -> Result<Particle, WireError> {
    let mut r = WireReader::new(bytes);
    let seed_id: i64 = r.get()?;
    let id: i64 = r.get()?;
    let parent_id: i64 = r.get()?;
    let n_var = r.get_count("n_variables")?;
    let n_tracked = r.get_count("n_tracked_user_data")?;
    let number_of_steps: i64 = r.get()?;
    let integration_time: f64 = r.get()?;
    let prev_integration_time: f64 = r.get()?;
    let user_flag: i32 = r.get()?;
    let insert_previous_position = r.get_bool()?;
    let manual_shift = r.get_bool()?;

    let body = 8 * (3 * n_var + 3 * n_tracked);
    if r.remaining() < body {
        return Err(WireError::Truncated {
            needed: body,
            remaining: r.remaining(),
        });
    }
    let found = (r.remaining() - body) / 8;
    if found != seed_components || (r.remaining() - body) % 8 != 0 {
        return Err(WireError::SeedDataMismatch {
            expected: seed_components,
            found,
        });
    }

    let mut p = Particle::new(
        n_var,
        n_tracked,
        id,
        seed_id,
        -1,
        integration_time,
        vec![0.0; seed_components],
    );
    p.parent_id = parent_id;
    p.number_of_steps = number_of_steps;
    p.prev_integration_time = prev_integration_time;
    p.user_flag = user_flag;
    p.insert_previous_position = insert_previous_position;
    p.manual_shift = manual_shift;
    for i in 0..n_var {
        p.prev_equation_variables[i] = r.get()?;
        p.equation_variables[i] = r.get()?;
        p.next_equation_variables[i] = r.get()?;
    }
    r.get_into(&mut p.prev_tracked_user_data)?;
    r.get_into(&mut p.tracked_user_data)?;
    r.get_into(&mut p.next_tracked_user_data)?;
    r.get_into(&mut p.seed_data)?;
    r.finish()?;
    Ok(p)
}

// ============================================================
// 数组模式
// ============================================================

/// 编码数组模式
pub fn encode_schema(schema: &ArraySchema) -> Vec<u8> {
    let mut w = WireWriter::default();
    for info in schema.arrays() {
        w.put(info.data_type.tag()).put(info.n_components as i32).put_str(&info.name);
        for c in 0..info.n_components {
            match info.component_names.get(c).and_then(|n| n.as_deref()) {
                Some(name) => w.put_str(name),
                None => w.put(0i32),
            };
        }
    }
    w.finish()
}

/// 解码 `n_arrays` 个数组的模式
pub fn decode_schema(bytes: &[u8], n_arrays: usize) -> Result<ArraySchema, WireError> {
    let mut r = WireReader::new(bytes);
    let mut arrays = Vec::with_capacity(n_arrays);
    for _ in 0..n_arrays {
        let tag: i32 = r.get()?;
        let data_type = ArrayDataType::from_tag(tag).ok_or(WireError::UnknownDataType(tag))?;
        let n_components = r.get_count("n_components")?;
        let name = r.get_str("name_len")?;
        let mut component_names = Vec::with_capacity(n_components);
        for _ in 0..n_components {
            let comp = r.get_str("component_name_len")?;
            component_names.push((!comp.is_empty()).then_some(comp));
        }
        arrays.push(ArrayInfo {
            name,
            data_type,
            n_components,
            component_names,
        });
    }
    r.finish()?;
    Ok(ArraySchema::new(arrays))
}
