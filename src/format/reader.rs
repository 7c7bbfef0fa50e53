//! 流式字节读取器
//!
//! 输入源按任意大小的 chunk 到达，本模块负责：
//! - 缓冲尚未消费的 chunk，并维护总长度
//! - 以「当前未消费位置」为基准的随机偏移读取（不消费）
//! - seek 丢弃前部数据，read_iter 边读边消费
//! - 判断流是否结束
//!
//! 约束：
//! - 已交付并消费的字节不会被再次拉取或保留
//! - 源的 chunk 边界对调用方透明
//! - 单个 chunk 内的窗口直接切片返回，不复制

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use crate::error::Result;
use crate::format::varint::{self, Decoded};

pub struct StreamReader<S> {
    source: S,
    chunks: VecDeque<Bytes>,
    buffered: usize,
    exhausted: bool,
}

impl<S> StreamReader<S>
where
    S: Iterator<Item = Result<Bytes>>,
{
    pub fn new(source: S) -> Self {
        Self {
            source,
            chunks: VecDeque::new(),
            buffered: 0,
            exhausted: false,
        }
    }

    /// 当前缓冲的字节数
    pub fn buffered_len(&self) -> usize {
        self.buffered
    }

    /// 读取 `[offset, offset + size)` 窗口，不消费
    ///
    /// 源提前结束时返回较短的数据，长度由调用方自行校验。
    pub fn read(&mut self, size: usize, offset: usize) -> Result<Bytes> {
        self.fill_to(offset.saturating_add(size))?;
        Ok(self.window(offset, size))
    }

    /// 丢弃前 `offset` 个字节，不足时从源继续拉取
    pub fn seek(&mut self, offset: usize) -> Result<()> {
        self.discard(offset)?;
        Ok(())
    }

    /// 惰性地按到达顺序产出 `[offset, offset + size)` 的各段数据，并消费它们
    ///
    /// 最后一项总是不带 `data`，`read_size` 为累计读取字节数。
    pub fn read_iter(&mut self, size: usize, offset: usize) -> ReadIter<'_, S> {
        ReadIter {
            reader: self,
            requested_size: size,
            offset,
            skipped: false,
            read_size: 0,
            done: false,
        }
    }

    /// 缓冲为空且源已耗尽时返回 true
    pub fn is_end(&mut self) -> Result<bool> {
        if self.buffered > 0 {
            return Ok(false);
        }
        Ok(!self.pull()?)
    }

    /// 读取当前位置的 varint，不消费
    pub fn peek_varint(&mut self) -> Result<Decoded> {
        let head = self.read(varint::MAX_BYTES, 0)?;
        varint::decode(&head, 0)
    }

    /// 从源拉取一个非空 chunk；源耗尽时返回 false
    fn pull(&mut self) -> Result<bool> {
        while !self.exhausted {
            match self.source.next() {
                Some(chunk) => {
                    let chunk = chunk?;
                    if chunk.is_empty() {
                        continue;
                    }
                    self.buffered += chunk.len();
                    self.chunks.push_back(chunk);
                    return Ok(true);
                }
                None => self.exhausted = true,
            }
        }
        Ok(false)
    }

    fn fill_to(&mut self, needed: usize) -> Result<()> {
        while self.buffered < needed && self.pull()? {}
        Ok(())
    }

    /// 从前部消费至多 `n` 个字节，返回实际丢弃的字节数
    fn discard(&mut self, mut n: usize) -> Result<usize> {
        let mut discarded = 0;
        while n > 0 {
            if self.chunks.is_empty() && !self.pull()? {
                break;
            }
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            if front.len() <= n {
                let len = front.len();
                self.chunks.pop_front();
                self.buffered -= len;
                discarded += len;
                n -= len;
            } else {
                let _ = front.split_to(n);
                self.buffered -= n;
                discarded += n;
                n = 0;
            }
        }
        Ok(discarded)
    }

    /// 从前部消费至多 `max` 个字节（仅限首个 chunk 内）
    fn take_front(&mut self, max: usize) -> Result<Option<Bytes>> {
        if self.chunks.is_empty() && !self.pull()? {
            return Ok(None);
        }
        let Some(front) = self.chunks.front_mut() else {
            return Ok(None);
        };
        let part = if front.len() <= max {
            self.chunks.pop_front().unwrap_or_default()
        } else {
            front.split_to(max)
        };
        self.buffered -= part.len();
        Ok(Some(part))
    }

    fn window(&self, offset: usize, size: usize) -> Bytes {
        let end = offset.saturating_add(size).min(self.buffered);
        if offset >= end {
            return Bytes::new();
        }

        let mut start = offset;
        let mut parts = Vec::new();
        let mut pos = 0usize;
        for chunk in &self.chunks {
            let chunk_end = pos + chunk.len();
            if chunk_end > start && pos < end {
                let from = start - pos;
                let to = end.min(chunk_end) - pos;
                parts.push(chunk.slice(from..to));
                start = pos + to;
            }
            if chunk_end >= end {
                break;
            }
            pos = chunk_end;
        }

        if parts.len() == 1 {
            return parts.pop().unwrap_or_default();
        }
        let mut out = BytesMut::with_capacity(end - offset);
        for part in parts {
            out.extend_from_slice(&part);
        }
        out.freeze()
    }
}

/// `read_iter` 的单项产出
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadEntry {
    pub data: Option<Bytes>,
    pub requested_size: usize,
    pub offset: usize,
    pub read_size: usize,
}

pub struct ReadIter<'a, S> {
    reader: &'a mut StreamReader<S>,
    requested_size: usize,
    offset: usize,
    skipped: bool,
    read_size: usize,
    done: bool,
}

impl<S> ReadIter<'_, S>
where
    S: Iterator<Item = Result<Bytes>>,
{
    fn entry(&self, data: Option<Bytes>) -> ReadEntry {
        ReadEntry {
            data,
            requested_size: self.requested_size,
            offset: self.offset,
            read_size: self.read_size,
        }
    }

    fn advance(&mut self) -> Result<ReadEntry> {
        if !self.skipped {
            self.skipped = true;
            if self.reader.discard(self.offset)? < self.offset {
                self.done = true;
                return Ok(self.entry(None));
            }
        }

        let remaining = self.requested_size - self.read_size;
        if remaining > 0 {
            if let Some(part) = self.reader.take_front(remaining)? {
                self.read_size += part.len();
                return Ok(self.entry(Some(part)));
            }
        }

        self.done = true;
        Ok(self.entry(None))
    }
}

impl<S> Iterator for ReadIter<'_, S>
where
    S: Iterator<Item = Result<Bytes>>,
{
    type Item = Result<ReadEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let entry = self.advance();
        if entry.is_err() {
            self.done = true;
        }
        Some(entry)
    }
}
