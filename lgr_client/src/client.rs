//! 数据记录器服务客户端

use std::io;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::protocol::{self, decode_frame, encode_frame, msg_type, DEFAULT_PORT};
use crate::session::{AdviseEvent, AdviseSession, SessionError, SessionState};

/// 客户端错误
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    ConnectionFailed(#[from] io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("timeout")]
    Timeout,
}

/// 客户端配置
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// 写入每条出站消息的会话号
    pub session: u32,
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            session: 1,
            timeout_secs: 5,
        }
    }
}

/// 数据记录器服务客户端
pub struct LgrClient {
    config: ClientConfig,
}

impl LgrClient {
    /// 创建新客户端
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// 连接到服务器
    pub async fn connect(&self) -> Result<TcpStream, ClientError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!("Connecting to {}", addr);
        let stream = timeout(
            Duration::from_secs(self.config.timeout_secs),
            TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| ClientError::Timeout)??;
        stream.set_nodelay(true)?;
        info!("Connected to {}", addr);
        Ok(stream)
    }

    /// 把会话出站队列中的命令全部发出
    pub async fn flush_outbound<S>(
        &self,
        stream: &mut S,
        session: &mut AdviseSession,
    ) -> Result<(), ClientError>
    where
        S: AsyncWrite + Unpin,
    {
        let mut sent = false;
        while let Some(mut msg) = session.poll_outbound() {
            msg.set_session(self.config.session);
            let data = encode_frame(&msg);
            debug!(
                "Sending {} ({} bytes): {:02x?}",
                msg_type::name(msg.msg_type()),
                data.len(),
                &data
            );
            stream.write_all(&data).await?;
            sent = true;
        }
        if sent {
            stream.flush().await?;
        }
        Ok(())
    }

    /// 驱动会话直到其回到 Standby
    ///
    /// 会话未启动时先启动。每个会话事件连同会话本身交给 `on_event`，
    /// 回调里可以取记录或调用 `finish()`。回调返回错误时会话被结束，
    /// 中止命令发出后返回该错误。
    pub async fn run_advise<S, F>(
        &self,
        stream: &mut S,
        session: &mut AdviseSession,
        mut on_event: F,
    ) -> Result<(), ClientError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        F: FnMut(&mut AdviseSession, AdviseEvent) -> io::Result<()>,
    {
        if session.state() == SessionState::Standby {
            session.start()?;
        }

        let mut buf = BytesMut::with_capacity(64 * 1024);
        let mut read_buf = vec![0u8; 16 * 1024];
        let mut pending_error: Option<ClientError> = None;

        loop {
            while let Some(event) = session.poll_event() {
                if let Err(e) = on_event(session, event) {
                    warn!("Event handler failed: {}", e);
                    session.finish();
                    // 尽力发送中止
                    let _ = self.flush_outbound(stream, session).await;
                    return Err(e.into());
                }
            }

            if let Err(e) = self.flush_outbound(stream, session).await {
                if session.state() == SessionState::Standby {
                    return Err(e);
                }
                warn!("Send failed: {}", e);
                session.on_disconnected();
                pending_error = Some(e);
                continue;
            }

            if session.state() == SessionState::Standby {
                return match pending_error {
                    Some(e) => Err(e),
                    None => Ok(()),
                };
            }

            let n = match stream.read(&mut read_buf).await {
                Ok(0) => {
                    info!("Server closed the connection");
                    session.on_disconnected();
                    pending_error = Some(ClientError::ConnectionClosed);
                    continue;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!("Receive failed: {}", e);
                    session.on_disconnected();
                    pending_error = Some(e.into());
                    continue;
                }
            };

            buf.extend_from_slice(&read_buf[..n]);
            debug!("Received {} bytes, buffer size: {}", n, buf.len());

            loop {
                match decode_frame(&mut buf) {
                    Ok(Some(msg)) => {
                        debug!(
                            "Received {} ({} bytes)",
                            msg_type::name(msg.msg_type()),
                            msg.body().len()
                        );
                        session.handle_message(&msg);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Corrupt stream: {}", e);
                        session.on_disconnected();
                        pending_error = Some(e.into());
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        notification_message, AdviseContCmd, AdviseStartAck, AdviseStartCmd, START_RESULT_OK,
    };
    use crate::session::{AdviseConfig, AdviseFailure};
    use lgrtab::{standard_factory, Message, TableDesc, ValueDesc, WireType};
    use tokio::io::{duplex, DuplexStream};

    async fn read_frame(stream: &mut DuplexStream, buf: &mut BytesMut) -> Option<Message> {
        loop {
            if let Some(msg) = decode_frame(buf).unwrap() {
                return Some(msg);
            }
            let mut chunk = [0u8; 1024];
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    fn session() -> AdviseSession {
        let config = AdviseConfig {
            table_name: "Public".to_string(),
            cache_size_controller: 2,
            ..Default::default()
        };
        AdviseSession::new(config, standard_factory())
    }

    #[tokio::test]
    async fn test_run_advise_until_finish() {
        let (mut client_end, mut server_end) = duplex(4096);

        let server = tokio::spawn(async move {
            let mut buf = BytesMut::new();
            let mut start = read_frame(&mut server_end, &mut buf).await.unwrap();
            assert_eq!(start.session(), 1);
            let cmd = AdviseStartCmd::read(&mut start).unwrap();

            let mut table = TableDesc::new("", "Public");
            table.push(ValueDesc::new("Count", WireType::UInt2));
            let ack = AdviseStartAck {
                tran_no: cmd.tran_no,
                result: START_RESULT_OK,
            };
            let frame = encode_frame(&ack.to_message(Some(&table), false));
            server_end.write_all(&frame).await.unwrap();

            let mut record_no = 1u32;
            let mut controls = Vec::new();
            loop {
                let first = record_no.to_be_bytes();
                let second = (record_no + 1).to_be_bytes();
                let records = [
                    (record_no, 0i64, &first[2..]),
                    (record_no + 1, 0i64, &second[2..]),
                ];
                let frame = encode_frame(&notification_message(cmd.tran_no, &records));
                server_end.write_all(&frame).await.unwrap();
                record_no += 2;

                let mut cont = read_frame(&mut server_end, &mut buf).await.unwrap();
                let cont = AdviseContCmd::read(&mut cont).unwrap();
                controls.push(cont.abort);
                if cont.abort {
                    break;
                }
            }
            controls
        });

        let client = LgrClient::new(ClientConfig::default());
        let mut session = session();
        let mut seen = Vec::new();
        client
            .run_advise(&mut client_end, &mut session, |session, event| {
                if event == AdviseEvent::RecordsReady {
                    while let Some(record) = session.get_next_record() {
                        seen.push(record.record_no());
                    }
                    if seen.len() >= 6 {
                        session.finish();
                    }
                }
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(session.state(), SessionState::Standby);
        // 前两批回复继续，第三批之后中止
        assert_eq!(server.await.unwrap(), vec![false, false, true]);
    }

    #[tokio::test]
    async fn test_disconnect_reports_failure() {
        let (mut client_end, mut server_end) = duplex(4096);

        let server = tokio::spawn(async move {
            let mut buf = BytesMut::new();
            let _ = read_frame(&mut server_end, &mut buf).await.unwrap();
            drop(server_end);
        });

        let client = LgrClient::new(ClientConfig::default());
        let mut session = session();
        let mut events = Vec::new();
        let result = client
            .run_advise(&mut client_end, &mut session, |_, event| {
                events.push(event);
                Ok(())
            })
            .await;

        server.await.unwrap();
        assert!(matches!(result, Err(ClientError::ConnectionClosed)));
        assert_eq!(
            events,
            vec![AdviseEvent::Failed(AdviseFailure::ConnectionFailed)]
        );
    }

    #[tokio::test]
    async fn test_denial_ends_run() {
        let (mut client_end, mut server_end) = duplex(4096);

        let server = tokio::spawn(async move {
            let mut buf = BytesMut::new();
            let mut start = read_frame(&mut server_end, &mut buf).await.unwrap();
            let cmd = AdviseStartCmd::read(&mut start).unwrap();
            let ack = AdviseStartAck {
                tran_no: cmd.tran_no,
                result: 2,
            };
            let frame = encode_frame(&ack.to_message(None, false));
            server_end.write_all(&frame).await.unwrap();
            server_end
        });

        let client = LgrClient::new(ClientConfig::default());
        let mut session = session();
        let mut events = Vec::new();
        client
            .run_advise(&mut client_end, &mut session, |_, event| {
                events.push(event);
                Ok(())
            })
            .await
            .unwrap();

        let _server_end = server.await.unwrap();
        assert_eq!(
            events,
            vec![AdviseEvent::Failed(AdviseFailure::InvalidTableName)]
        );
    }
}
