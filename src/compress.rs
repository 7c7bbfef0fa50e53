//! 压缩适配层
//!
//! 加密前压缩、解密后解压，均为惰性的字节流变换：
//! 只有下游请求下一段数据时才从上游拉取。
//!
//! 上游错误（如认证失败）原样透传，不会被包装成压缩错误。

use std::cell::RefCell;
use std::fmt;
use std::io::{self, Read};
use std::rc::Rc;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::{ArchiveError, Result};
use crate::format::proto;

/// 每次向下游输出的最大字节数
const OUTPUT_CHUNK_SIZE: usize = 64 * 1024;

const BROTLI_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressAlgorithm {
    Gzip,
    Brotli,
}

impl CompressAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Brotli => "brotli",
        }
    }

    pub(crate) fn to_proto(algorithm: Option<Self>) -> proto::CompressAlgorithm {
        match algorithm {
            None => proto::CompressAlgorithm::None,
            Some(Self::Gzip) => proto::CompressAlgorithm::Gzip,
            Some(Self::Brotli) => proto::CompressAlgorithm::Brotli,
        }
    }

    pub(crate) fn from_proto(value: proto::CompressAlgorithm) -> Option<Self> {
        match value {
            proto::CompressAlgorithm::None => None,
            proto::CompressAlgorithm::Gzip => Some(Self::Gzip),
            proto::CompressAlgorithm::Brotli => Some(Self::Brotli),
        }
    }
}

impl FromStr for CompressAlgorithm {
    type Err = ArchiveError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "gzip" => Ok(Self::Gzip),
            "brotli" => Ok(Self::Brotli),
            _ => Err(ArchiveError::UnknownAlgorithm {
                kind: "compress algorithm",
                name: name.to_string(),
            }),
        }
    }
}

impl fmt::Display for CompressAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 压缩参数
///
/// 只暴露不影响流式语义的参数；flush 模式、字典、输出上限等无法覆盖。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressOptions {
    Gzip { level: u32 },
    Brotli { quality: u32, lgwin: u32 },
}

impl CompressOptions {
    pub fn gzip() -> Self {
        Self::Gzip { level: 6 }
    }

    pub fn brotli() -> Self {
        Self::Brotli {
            quality: 11,
            lgwin: 22,
        }
    }

    pub fn from_algorithm(algorithm: CompressAlgorithm) -> Self {
        match algorithm {
            CompressAlgorithm::Gzip => Self::gzip(),
            CompressAlgorithm::Brotli => Self::brotli(),
        }
    }

    pub fn algorithm(&self) -> CompressAlgorithm {
        match self {
            Self::Gzip { .. } => CompressAlgorithm::Gzip,
            Self::Brotli { .. } => CompressAlgorithm::Brotli,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Gzip { level } if level > 9 => {
                Err(ArchiveError::out_of_range("gzip.level", "between 0 and 9", level))
            }
            Self::Brotli { quality, .. } if quality > 11 => Err(ArchiveError::out_of_range(
                "brotli.quality",
                "between 0 and 11",
                quality,
            )),
            Self::Brotli { lgwin, .. } if !(10..=24).contains(&lgwin) => Err(
                ArchiveError::out_of_range("brotli.lgwin", "between 10 and 24", lgwin),
            ),
            _ => Ok(()),
        }
    }
}

type FailureSlot = Rc<RefCell<Option<ArchiveError>>>;

/// 把 chunk 迭代器适配为 `Read`，上游错误暂存到共享槽位
struct IterReader<S> {
    source: S,
    current: Bytes,
    failure: FailureSlot,
}

impl<S> Read for IterReader<S>
where
    S: Iterator<Item = Result<Bytes>>,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.current.is_empty() {
            match self.source.next() {
                None => return Ok(0),
                Some(Ok(chunk)) => self.current = chunk,
                Some(Err(e)) => {
                    *self.failure.borrow_mut() = Some(e);
                    return Err(io::Error::other("upstream failed"));
                }
            }
        }

        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current.split_to(n));
        Ok(n)
    }
}

/// 基于 `Read` 的惰性字节流变换
pub struct Transform<'a> {
    reader: Box<dyn Read + 'a>,
    failure: FailureSlot,
    algorithm: &'static str,
    done: bool,
}

impl Transform<'_> {
    fn fill(&mut self) -> Result<Option<Bytes>> {
        let mut buffer = vec![0u8; OUTPUT_CHUNK_SIZE];
        let mut filled = 0;

        while filled < buffer.len() {
            match self.reader.read(&mut buffer[filled..]) {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if let Some(failure) = self.failure.borrow_mut().take() {
                        return Err(failure);
                    }
                    return Err(ArchiveError::Compression {
                        algorithm: self.algorithm,
                        source: e,
                    });
                }
            }
        }

        if filled == 0 {
            return Ok(None);
        }
        buffer.truncate(filled);
        Ok(Some(Bytes::from(buffer)))
    }
}

impl Iterator for Transform<'_> {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.fill() {
            Ok(chunk) => chunk.map(Ok),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn adapter<S>(source: S) -> (IterReader<S>, FailureSlot) {
    let failure = FailureSlot::default();
    let reader = IterReader {
        source,
        current: Bytes::new(),
        failure: failure.clone(),
    };
    (reader, failure)
}

/// 压缩上游 chunk 流
pub fn compress<'a, S>(source: S, options: &CompressOptions) -> Transform<'a>
where
    S: Iterator<Item = Result<Bytes>> + 'a,
{
    let (input, failure) = adapter(source);
    let reader: Box<dyn Read + 'a> = match *options {
        CompressOptions::Gzip { level } => Box::new(flate2::read::GzEncoder::new(
            input,
            flate2::Compression::new(level),
        )),
        CompressOptions::Brotli { quality, lgwin } => Box::new(brotli::CompressorReader::new(
            input,
            BROTLI_BUFFER_SIZE,
            quality,
            lgwin,
        )),
    };

    Transform {
        reader,
        failure,
        algorithm: options.algorithm().name(),
        done: false,
    }
}

/// 解压上游 chunk 流
pub fn decompress<'a, S>(source: S, algorithm: CompressAlgorithm) -> Transform<'a>
where
    S: Iterator<Item = Result<Bytes>> + 'a,
{
    let (input, failure) = adapter(source);
    let reader: Box<dyn Read + 'a> = match algorithm {
        CompressAlgorithm::Gzip => Box::new(flate2::read::GzDecoder::new(input)),
        CompressAlgorithm::Brotli => {
            Box::new(brotli::Decompressor::new(input, BROTLI_BUFFER_SIZE))
        }
    };

    Transform {
        reader,
        failure,
        algorithm: algorithm.name(),
        done: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(chunks: Vec<&'static [u8]>) -> impl Iterator<Item = Result<Bytes>> {
        chunks.into_iter().map(|c| Ok(Bytes::from_static(c)))
    }

    fn collect(transform: Transform<'_>) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for chunk in transform {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    #[test]
    fn gzip_and_brotli_restore_input() {
        let input: Vec<&'static [u8]> = vec![b"hello ", b"compressed ", b"world"];
        for options in [CompressOptions::gzip(), CompressOptions::brotli()] {
            let compressed = collect(compress(source(input.clone()), &options)).unwrap();
            assert!(!compressed.is_empty());

            let restored = collect(decompress(
                std::iter::once(Ok(Bytes::from(compressed))),
                options.algorithm(),
            ))
            .unwrap();
            assert_eq!(restored, b"hello compressed world");
        }
    }

    #[test]
    fn upstream_errors_pass_through() {
        let failing = vec![
            Ok(Bytes::from_static(b"abc")),
            Err(ArchiveError::Authentication),
        ];
        let err = collect(compress(failing.into_iter(), &CompressOptions::gzip())).unwrap_err();
        assert!(matches!(err, ArchiveError::Authentication));
    }

    #[test]
    fn corrupt_input_is_a_compression_error() {
        let garbage = std::iter::once(Ok(Bytes::from_static(b"definitely not gzip")));
        let err = collect(decompress(garbage, CompressAlgorithm::Gzip)).unwrap_err();
        assert!(matches!(err, ArchiveError::Compression { algorithm: "gzip", .. }));
    }

    #[test]
    fn validates_levels() {
        assert!(CompressOptions::Gzip { level: 10 }.validate().is_err());
        assert!(CompressOptions::Brotli { quality: 12, lgwin: 22 }.validate().is_err());
        assert!(CompressOptions::Brotli { quality: 5, lgwin: 9 }.validate().is_err());
        assert!(CompressOptions::brotli().validate().is_ok());
    }

    #[test]
    fn unknown_name_is_a_type_error() {
        let err = "zstd".parse::<CompressAlgorithm>().unwrap_err();
        assert_eq!(err.class(), crate::ErrorClass::Type);
    }
}
