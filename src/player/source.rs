use crate::core::{PlayerError, Result};
use bytes::{Buf, Bytes};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 字节源：容器解析从这里拉取原始数据
///
/// `read` 返回 0 表示数据已经结束。
pub trait ByteSource: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn description(&self) -> String;
}

/// 本地文件
pub struct FileSource {
    path: PathBuf,
    file: File,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        info!("正在打开文件: {}", path.display());
        let file = File::open(&path).map_err(|e| {
            PlayerError::DemuxError(format!("无法打开文件 {}: {}", path.display(), e))
        })?;
        Ok(Self { path, file })
    }
}

impl ByteSource for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn description(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// 一整块内存缓冲
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn remaining(&self) -> usize {
        self.data.len()
    }
}

impl ByteSource for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.data.len());
        self.data.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }

    fn description(&self) -> String {
        format!("memory:{} bytes", self.data.len())
    }
}

enum Chunk {
    Data(Bytes),
    End,
}

/// 向 [`ChunkSource`] 推送数据块的句柄
///
/// 网络线程持有它；`finish()` 或全部句柄 drop 后，读端返回流结束。
#[derive(Clone)]
pub struct ChunkFeeder {
    tx: Sender<Chunk>,
}

impl ChunkFeeder {
    /// 推送一个数据块；读端已关闭时返回 false
    pub fn feed(&self, chunk: impl Into<Bytes>) -> bool {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return true;
        }
        self.tx.send(Chunk::Data(chunk)).is_ok()
    }

    pub fn finish(&self) {
        let _ = self.tx.send(Chunk::End);
    }
}

/// 由外部推送的数据块组成的字节源
///
/// 没有数据时 `read` 阻塞等待下一个块；设置了超时则超时后返回 `TimedOut`。
pub struct ChunkSource {
    rx: Receiver<Chunk>,
    current: Bytes,
    ended: bool,
    timeout: Option<Duration>,
    received: u64,
}

impl ChunkSource {
    pub fn channel() -> (ChunkFeeder, ChunkSource) {
        let (tx, rx) = unbounded();
        (
            ChunkFeeder { tx },
            ChunkSource {
                rx,
                current: Bytes::new(),
                ended: false,
                timeout: None,
                received: 0,
            },
        )
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 已收到的字节总数
    pub fn received(&self) -> u64 {
        self.received
    }

    fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        let chunk = match self.timeout {
            Some(timeout) => match self.rx.recv_timeout(timeout) {
                Ok(chunk) => chunk,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "等待数据块超时"))
                }
                Err(RecvTimeoutError::Disconnected) => Chunk::End,
            },
            None => self.rx.recv().unwrap_or(Chunk::End),
        };

        match chunk {
            Chunk::Data(bytes) => {
                self.received += bytes.len() as u64;
                Ok(Some(bytes))
            }
            Chunk::End => {
                debug!("数据块流结束（共 {} 字节）", self.received);
                self.ended = true;
                Ok(None)
            }
        }
    }
}

impl ByteSource for ChunkSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.current.is_empty() {
            if self.ended {
                return Ok(0);
            }
            match self.next_chunk()? {
                Some(bytes) => self.current = bytes,
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.current.len());
        self.current.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }

    fn description(&self) -> String {
        "chunks".to_string()
    }
}

/// 把字节源读到底（测试与小文件使用）
pub fn read_to_end(source: &mut dyn ByteSource, chunk_size: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let n = source.read(&mut buf)?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::thread;

    #[test]
    fn memory_source_reads_in_pieces() {
        let mut source = MemorySource::new(&b"hello world"[..]);
        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"hell");
        assert_eq!(read_to_end(&mut source, 3).unwrap(), b"o world".to_vec());
        assert_eq!(source.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn file_source_reads_file() {
        let path = std::env::temp_dir().join(format!("streamplay-source-{}.bin", std::process::id()));
        File::create(&path).unwrap().write_all(b"container bytes").unwrap();

        let mut source = FileSource::open(&path).unwrap();
        assert_eq!(read_to_end(&mut source, 5).unwrap(), b"container bytes".to_vec());
        assert!(source.description().contains("streamplay-source"));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file_is_a_demux_error() {
        assert!(matches!(
            FileSource::open("/nonexistent/streamplay/input.mkv"),
            Err(PlayerError::DemuxError(_))
        ));
    }

    #[test]
    fn chunk_source_spans_chunk_boundaries() {
        let (feeder, mut source) = ChunkSource::channel();
        feeder.feed(&b"abc"[..]);
        feeder.feed(Vec::<u8>::new());
        feeder.feed(&b"defgh"[..]);
        feeder.finish();

        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(source.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"defg");
        assert_eq!(source.read(&mut buf).unwrap(), 1);
        assert_eq!(source.read(&mut buf).unwrap(), 0);
        assert_eq!(source.received(), 8);
    }

    #[test]
    fn chunk_source_blocks_until_fed() {
        let (feeder, mut source) = ChunkSource::channel();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            feeder.feed(&b"late"[..]);
            // feeder drop 也代表结束
        });

        assert_eq!(read_to_end(&mut source, 16).unwrap(), b"late".to_vec());
        producer.join().unwrap();
    }

    #[test]
    fn chunk_source_times_out() {
        let (_feeder, source) = ChunkSource::channel();
        let mut source = source.with_timeout(Duration::from_millis(10));
        let mut buf = [0u8; 4];
        let err = source.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
