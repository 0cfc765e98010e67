//! 数据记录器 RPC 协议 (advise / record-blocks)
//!
//! 帧结构：
//! ```text
//! struct frame {
//!     magic[2]: [u8; 2],    // 0xBD 0xBD
//!     version: u8,          // 协议版本
//!     reserved: u8,
//!     msg_type: u32,        // 消息类型 (大端)
//!     session: u32,         // 会话号 (大端)
//!     payload_len: u32,     // 负载长度 (大端)
//!     payload: [u8],        // 消息体
//! }
//! ```
//!
//! 消息体用 `lgrtab::Message` 的类型化原语读写，整数均为大端。

use std::io;

use bytes::{Buf, BytesMut};
use lgrtab::{ColumnSelector, Message, TableDesc, WireError};
use thiserror::Error;

/// 协议魔数
pub const HEADER_MAGIC_0: u8 = 0xBD;
pub const HEADER_MAGIC_1: u8 = 0xBD;

/// 协议版本
pub const PROTOCOL_VERSION: u8 = 0x01;

/// 帧头长度 (16字节)
pub const HEADER_SIZE: usize = 16;

/// 单帧负载上限
pub const MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// 默认端口
pub const DEFAULT_PORT: u16 = 6785;

/// 从该接口版本起，启动应答码 4 表示排序选项无效
pub const ORDER_OPTION_VERSION: u32 = 3;

/// 启动应答结果码：成功
pub const START_RESULT_OK: u32 = 1;

/// 通知中的服务端状态
pub const SERVER_STATE_OK: u32 = 1;
pub const SERVER_STATE_TABLE_DELETED: u32 = 3;
pub const SERVER_STATE_SHUT_DOWN: u32 = 4;

/// 消息类型码
pub mod msg_type {
    pub const ADVISE_START_CMD: u32 = 0x0101;
    pub const ADVISE_START_ACK: u32 = 0x0102;
    pub const ADVISE_NOT: u32 = 0x0103;
    pub const ADVISE_CONT_CMD: u32 = 0x0104;
    pub const RECORD_BLOCKS_CMD: u32 = 0x0105;
    pub const RECORD_BLOCKS_ACK: u32 = 0x0106;
    pub const SESSION_CLOSED: u32 = 0xFF01;
    pub const SECURITY_BLOCKED: u32 = 0xFF02;
    pub const UNSUPPORTED_MSG: u32 = 0xFF03;

    pub fn name(code: u32) -> &'static str {
        match code {
            ADVISE_START_CMD => "advise-start-cmd",
            ADVISE_START_ACK => "advise-start-ack",
            ADVISE_NOT => "advise-not",
            ADVISE_CONT_CMD => "advise-cont-cmd",
            RECORD_BLOCKS_CMD => "record-blocks-cmd",
            RECORD_BLOCKS_ACK => "record-blocks-ack",
            SESSION_CLOSED => "session-closed",
            SECURITY_BLOCKED => "security-blocked",
            UNSUPPORTED_MSG => "unsupported",
            _ => "unknown",
        }
    }
}

/// 协议错误
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid magic header")]
    InvalidMagic,
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed message: {0}")]
    Wire(#[from] WireError),
    #[error("unknown option code {0}")]
    UnknownCode(u32),
}

/// 编码为帧
pub fn encode_frame(msg: &Message) -> Vec<u8> {
    let body = msg.body();
    let mut buf = Vec::with_capacity(HEADER_SIZE + body.len());

    buf.push(HEADER_MAGIC_0);
    buf.push(HEADER_MAGIC_1);
    buf.push(PROTOCOL_VERSION);
    buf.push(0);
    buf.extend_from_slice(&msg.msg_type().to_be_bytes());
    buf.extend_from_slice(&msg.session().to_be_bytes());
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(body);

    buf
}

/// 从缓冲区解码一帧；数据不足时返回 `Ok(None)`
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Message>, ProtocolError> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    if buf[0] != HEADER_MAGIC_0 || buf[1] != HEADER_MAGIC_1 {
        return Err(ProtocolError::InvalidMagic);
    }

    let payload_len = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]) as usize;
    if payload_len > MAX_PAYLOAD {
        return Err(ProtocolError::FrameTooLarge(payload_len));
    }

    let total_len = HEADER_SIZE + payload_len;
    if buf.len() < total_len {
        return Ok(None);
    }

    let msg_type = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let session = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
    let msg = Message::with_body(msg_type, session, &buf[HEADER_SIZE..total_len]);

    buf.advance(total_len);

    Ok(Some(msg))
}

/// 起始位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOption {
    /// 指定文件标记和记录号
    AtRecord { file_mark: u32, record_no: u32 },
    /// 不早于该时间（Unix 纳秒）的第一条记录
    AtTime(i64),
    /// 最新一条记录
    AtNewest,
    /// 最新记录之后的下一条
    AfterNewest,
    /// 相对最新记录的时间偏移（纳秒）
    RelativeToNewest(i64),
    /// 最新记录之前第 N 条；由客户端根据记录块索引换算为 `AtRecord`
    AtOffsetFromNewest(u32),
}

impl StartOption {
    /// 线路码；`AtOffsetFromNewest` 没有线路码
    pub fn code(&self) -> Option<u32> {
        match self {
            StartOption::AtRecord { .. } => Some(1),
            StartOption::AtTime(_) => Some(2),
            StartOption::AtNewest => Some(3),
            StartOption::AfterNewest => Some(4),
            StartOption::RelativeToNewest(_) => Some(5),
            StartOption::AtOffsetFromNewest(_) => None,
        }
    }

    fn write(&self, msg: &mut Message) {
        match *self {
            StartOption::AtRecord {
                file_mark,
                record_no,
            } => {
                msg.write_u32(1);
                msg.write_u32(file_mark);
                msg.write_u32(record_no);
            }
            StartOption::AtTime(nsec) => {
                msg.write_u32(2);
                msg.write_i64(nsec);
            }
            StartOption::AtNewest => msg.write_u32(3),
            StartOption::AfterNewest => msg.write_u32(4),
            StartOption::RelativeToNewest(nsec) => {
                msg.write_u32(5);
                msg.write_i64(nsec);
            }
            // 未换算时按最新记录处理
            StartOption::AtOffsetFromNewest(_) => msg.write_u32(3),
        }
    }

    fn read(msg: &mut Message) -> Result<Self, ProtocolError> {
        let option = match msg.read_u32()? {
            1 => StartOption::AtRecord {
                file_mark: msg.read_u32()?,
                record_no: msg.read_u32()?,
            },
            2 => StartOption::AtTime(msg.read_i64()?),
            3 => StartOption::AtNewest,
            4 => StartOption::AfterNewest,
            5 => StartOption::RelativeToNewest(msg.read_i64()?),
            other => return Err(ProtocolError::UnknownCode(other)),
        };
        Ok(option)
    }
}

/// 记录排序方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderOption {
    /// 按采集顺序
    #[default]
    Collected,
    /// 按记录号顺序，允许缺口
    LoggedWithHoles,
    /// 按记录号顺序，等待缺口补齐
    LoggedWithoutHoles,
    /// 实时：每次通知只含最新一条
    RealTime,
}

impl OrderOption {
    pub fn code(self) -> u32 {
        match self {
            OrderOption::Collected => 1,
            OrderOption::LoggedWithHoles => 2,
            OrderOption::LoggedWithoutHoles => 3,
            OrderOption::RealTime => 4,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(OrderOption::Collected),
            2 => Some(OrderOption::LoggedWithHoles),
            3 => Some(OrderOption::LoggedWithoutHoles),
            4 => Some(OrderOption::RealTime),
            _ => None,
        }
    }
}

/// 启动命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdviseStartCmd {
    pub tran_no: u32,
    pub table_name: String,
    pub start: StartOption,
    pub order: OrderOption,
    /// 每次通知的最大记录数
    pub cache_size: u32,
    pub value_descriptions: bool,
    pub columns: Vec<ColumnSelector>,
}

impl AdviseStartCmd {
    /// 实时模式下批量大小固定为 1
    pub fn batch_size(&self) -> u32 {
        if self.order == OrderOption::RealTime {
            1
        } else {
            self.cache_size
        }
    }

    pub fn to_message(&self) -> Message {
        let mut msg = Message::new(msg_type::ADVISE_START_CMD, 0);
        msg.write_u32(self.tran_no);
        msg.write_wstr(&self.table_name);
        self.start.write(&mut msg);
        msg.write_u32(self.order.code());
        msg.write_u32(self.batch_size());
        msg.write_bool(self.value_descriptions);
        msg.write_u32(self.columns.len() as u32);
        for column in &self.columns {
            column.write(&mut msg);
        }
        msg
    }

    pub fn read(msg: &mut Message) -> Result<Self, ProtocolError> {
        let tran_no = msg.read_u32()?;
        let table_name = msg.read_wstr()?;
        let start = StartOption::read(msg)?;
        let order_code = msg.read_u32()?;
        let order =
            OrderOption::from_code(order_code).ok_or(ProtocolError::UnknownCode(order_code))?;
        let cache_size = msg.read_u32()?;
        let value_descriptions = msg.read_bool()?;
        let count = msg.read_u32()? as usize;
        let mut columns = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            columns.push(ColumnSelector::read(msg)?);
        }
        Ok(Self {
            tran_no,
            table_name,
            start,
            order,
            cache_size,
            value_descriptions,
            columns,
        })
    }
}

/// 启动应答头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdviseStartAck {
    pub tran_no: u32,
    pub result: u32,
}

impl AdviseStartAck {
    /// 读取应答头；成功时表定义紧随其后
    pub fn read(msg: &mut Message) -> Result<Self, ProtocolError> {
        Ok(Self {
            tran_no: msg.read_u32()?,
            result: msg.read_u32()?,
        })
    }

    /// 构造应答；`table` 仅在成功时写入
    pub fn to_message(&self, table: Option<&TableDesc>, with_descriptions: bool) -> Message {
        let mut msg = Message::new(msg_type::ADVISE_START_ACK, 0);
        msg.write_u32(self.tran_no);
        msg.write_u32(self.result);
        if let Some(table) = table {
            table.write(&mut msg, with_descriptions);
        }
        msg
    }
}

/// 通知头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdviseNotHeader {
    pub tran_no: u32,
    pub server_state: u32,
    /// 仅在状态正常时有效
    pub record_count: u32,
}

impl AdviseNotHeader {
    pub fn read(msg: &mut Message) -> Result<Self, ProtocolError> {
        let tran_no = msg.read_u32()?;
        let server_state = msg.read_u32()?;
        let record_count = if server_state == SERVER_STATE_OK {
            msg.read_u32()?
        } else {
            0
        };
        Ok(Self {
            tran_no,
            server_state,
            record_count,
        })
    }
}

/// 构造一条通知：每条记录为 (记录号, Unix 纳秒时间戳, 打包数据)
pub fn notification_message(tran_no: u32, records: &[(u32, i64, &[u8])]) -> Message {
    let mut msg = Message::new(msg_type::ADVISE_NOT, 0);
    msg.write_u32(tran_no);
    msg.write_u32(SERVER_STATE_OK);
    msg.write_u32(records.len() as u32);
    for (record_no, stamp, packed) in records {
        msg.write_u32(*record_no);
        msg.write_i64(*stamp);
        msg.write_bytes(packed);
    }
    msg
}

/// 构造一条状态异常的通知
pub fn server_state_message(tran_no: u32, server_state: u32) -> Message {
    let mut msg = Message::new(msg_type::ADVISE_NOT, 0);
    msg.write_u32(tran_no);
    msg.write_u32(server_state);
    msg
}

/// 继续/中止命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdviseContCmd {
    pub tran_no: u32,
    pub abort: bool,
}

impl AdviseContCmd {
    pub fn to_message(&self) -> Message {
        let mut msg = Message::new(msg_type::ADVISE_CONT_CMD, 0);
        msg.write_u32(self.tran_no);
        msg.write_bool(self.abort);
        msg
    }

    pub fn read(msg: &mut Message) -> Result<Self, ProtocolError> {
        Ok(Self {
            tran_no: msg.read_u32()?,
            abort: msg.read_bool()?,
        })
    }
}

/// 记录块索引查询
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordBlocksCmd {
    pub tran_no: u32,
    pub table_name: String,
}

impl RecordBlocksCmd {
    pub fn to_message(&self) -> Message {
        let mut msg = Message::new(msg_type::RECORD_BLOCKS_CMD, 0);
        msg.write_u32(self.tran_no);
        msg.write_wstr(&self.table_name);
        msg
    }

    pub fn read(msg: &mut Message) -> Result<Self, ProtocolError> {
        Ok(Self {
            tran_no: msg.read_u32()?,
            table_name: msg.read_wstr()?,
        })
    }
}

/// 连续记录块，`end` 含在内
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordBlock {
    pub file_mark: u32,
    pub begin: u32,
    pub end: u32,
}

impl RecordBlock {
    pub fn len(&self) -> u32 {
        self.end.wrapping_sub(self.begin).wrapping_add(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 记录块索引应答，块按从旧到新排列
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordBlocksAck {
    pub tran_no: u32,
    pub result: u32,
    pub blocks: Vec<RecordBlock>,
}

impl RecordBlocksAck {
    pub fn read(msg: &mut Message) -> Result<Self, ProtocolError> {
        let tran_no = msg.read_u32()?;
        let result = msg.read_u32()?;
        let mut blocks = Vec::new();
        if result == START_RESULT_OK {
            let count = msg.read_u32()? as usize;
            blocks.reserve(count.min(1024));
            for _ in 0..count {
                blocks.push(RecordBlock {
                    file_mark: msg.read_u32()?,
                    begin: msg.read_u32()?,
                    end: msg.read_u32()?,
                });
            }
        }
        Ok(Self {
            tran_no,
            result,
            blocks,
        })
    }

    pub fn to_message(&self) -> Message {
        let mut msg = Message::new(msg_type::RECORD_BLOCKS_ACK, 0);
        msg.write_u32(self.tran_no);
        msg.write_u32(self.result);
        if self.result == START_RESULT_OK {
            msg.write_u32(self.blocks.len() as u32);
            for block in &self.blocks {
                msg.write_u32(block.file_mark);
                msg.write_u32(block.begin);
                msg.write_u32(block.end);
            }
        }
        msg
    }
}

/// 从最新块向旧块累加，直到覆盖 `offset` 条记录
///
/// 索引为空时从表头开始；索引不足 `offset` 条时从最旧块开头开始。
pub fn resolve_offset_from_newest(blocks: &[RecordBlock], offset: u32) -> StartOption {
    let mut remaining = offset.max(1);
    for block in blocks.iter().rev() {
        let len = block.len();
        if remaining <= len {
            return StartOption::AtRecord {
                file_mark: block.file_mark,
                record_no: block.end.wrapping_add(1).wrapping_sub(remaining),
            };
        }
        remaining -= len;
    }

    match blocks.first() {
        Some(oldest) => StartOption::AtRecord {
            file_mark: oldest.file_mark,
            record_no: oldest.begin,
        },
        None => StartOption::AtRecord {
            file_mark: 0,
            record_no: 0,
        },
    }
}
