use crate::core::{MulticastConfig, PlayerError, Result};
use crate::player::log_ctx;
use crate::player::source::ChunkFeeder;
use bytes::Bytes;
use log::{debug, error, info, warn};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// 读超时，用于周期性检查停止标志
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// 网络统计信息
#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    /// 接收字节数
    pub bytes_received: u64,
    /// 接收的数据报个数
    pub datagrams: u64,
    /// 平均带宽（字节/秒）
    pub current_bandwidth: f64,
    /// 连接持续时间
    pub connection_duration: Duration,
}

#[derive(Default)]
struct Counters {
    bytes: AtomicU64,
    datagrams: AtomicU64,
}

/// UDP 组播接收器
///
/// 在独立线程中接收数据报，原样作为数据块推给 [`ChunkFeeder`]；
/// 停止或出错时对 feeder 调用 `finish()`，读端随之看到流结束。
pub struct MulticastReceiver {
    local_addr: SocketAddr,
    counters: Arc<Counters>,
    stop: Arc<AtomicBool>,
    started: Instant,
    handle: Option<JoinHandle<()>>,
}

impl MulticastReceiver {
    /// 绑定端口并加入组播组
    ///
    /// 端口设置 SO_REUSEADDR，同一台机器上的多个接收端可以收同一个组播组。
    pub fn bind(config: &MulticastConfig) -> Result<UdpSocket> {
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port);
        let bind_error =
            |e: io::Error| PlayerError::NetworkError(format!("绑定 UDP 端口 {} 失败: {}", config.port, e));
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_error)?;
        socket.set_reuse_address(true).map_err(bind_error)?;
        socket.bind(&SockAddr::from(addr)).map_err(bind_error)?;
        let socket: UdpSocket = socket.into();

        if config.group.is_multicast() {
            socket
                .join_multicast_v4(&config.group, &Ipv4Addr::UNSPECIFIED)
                .map_err(|e| {
                    PlayerError::NetworkError(format!("加入组播组 {} 失败: {}", config.group, e))
                })?;
            info!("🌐 已加入组播组 {}:{}", config.group, config.port);
        } else {
            warn!("{} 不是组播地址，按普通 UDP 接收", config.group);
        }
        Ok(socket)
    }

    /// 按配置加入组播组并开始接收
    pub fn start(config: &MulticastConfig, feeder: ChunkFeeder) -> Result<Self> {
        let socket = Self::bind(config)?;
        Self::from_socket(socket, config.datagram_size, feeder)
    }

    /// 使用已经绑定好的 socket 开始接收
    pub fn from_socket(socket: UdpSocket, datagram_size: usize, feeder: ChunkFeeder) -> Result<Self> {
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        let local_addr = socket.local_addr()?;
        let counters = Arc::new(Counters::default());
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let counters = counters.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name("multicast-rx".to_string())
                .spawn(move || receive_loop(socket, datagram_size.max(1), feeder, counters, stop))?
        };

        Ok(Self {
            local_addr,
            counters,
            stop,
            started: Instant::now(),
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> NetworkStats {
        let bytes_received = self.counters.bytes.load(Ordering::Relaxed);
        let connection_duration = self.started.elapsed();
        let secs = connection_duration.as_secs_f64();
        NetworkStats {
            bytes_received,
            datagrams: self.counters.datagrams.load(Ordering::Relaxed),
            current_bandwidth: if secs > 0.0 {
                bytes_received as f64 / secs
            } else {
                0.0
            },
            connection_duration,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// 停止接收并等待线程退出
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            let stats = self.stats();
            info!(
                "{} 🔌 组播接收停止（{} 个数据报，{} 字节，{:.2} KB/s）",
                log_ctx(),
                stats.datagrams,
                stats.bytes_received,
                stats.current_bandwidth / 1024.0
            );
        }
    }
}

impl Drop for MulticastReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop(
    socket: UdpSocket,
    datagram_size: usize,
    feeder: ChunkFeeder,
    counters: Arc<Counters>,
    stop: Arc<AtomicBool>,
) {
    info!("{} 📡 组播接收线程启动", log_ctx());
    let mut buf = vec![0u8; datagram_size];

    while !stop.load(Ordering::Acquire) {
        match socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                let count = counters.datagrams.fetch_add(1, Ordering::Relaxed) + 1;
                counters.bytes.fetch_add(n as u64, Ordering::Relaxed);
                if count <= 5 || count % 100 == 0 {
                    debug!("{} 📊 数据报 #{}（{} 字节，来自 {}）", log_ctx(), count, n, from);
                }
                if !feeder.feed(Bytes::copy_from_slice(&buf[..n])) {
                    info!("{} 读端已关闭，停止接收", log_ctx());
                    break;
                }
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) => {
                error!("{} ❌ 接收数据报失败: {}", log_ctx(), e);
                break;
            }
        }
    }

    feeder.finish();
}
