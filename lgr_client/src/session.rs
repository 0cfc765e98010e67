//! 表数据订阅会话 (advise)
//!
//! 纯状态机，不做任何 I/O：
//! - 出站命令放入队列，由传输层通过 [`AdviseSession::poll_outbound`] 取走发送
//! - 收到的消息交给 [`AdviseSession::handle_message`]
//! - 会话事件由 [`AdviseSession::poll_event`] 取出
//!
//! 流控：服务端每发一次通知就等待一条继续命令。读缓冲区被消费空后
//! 才发送继续命令，因此同一时刻至多只有一批记录在途。

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use lgrtab::{ColumnSelector, Message, Record, TableDesc, ValueFactory};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::protocol::{
    self, msg_type, AdviseContCmd, AdviseNotHeader, AdviseStartAck, AdviseStartCmd, OrderOption,
    RecordBlocksAck, RecordBlocksCmd, StartOption, ORDER_OPTION_VERSION, SERVER_STATE_OK,
    SERVER_STATE_SHUT_DOWN, SERVER_STATE_TABLE_DELETED, START_RESULT_OK,
};

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// 空闲，可以启动
    Standby,
    /// 已发出启动命令（或记录块查询），等待应答
    Connecting,
    /// 已收到表定义，等待第一次通知
    Started,
    /// 正在接收通知
    Active,
}

/// 会话失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdviseFailure {
    ConnectionFailed,
    InvalidTableName,
    InvalidColumnName,
    InvalidStartOption,
    InvalidOrderOption,
    InvalidArrayAddress,
    SecurityBlocked,
    SessionFailed,
    Unsupported,
    TableDeleted,
    StationShutDown,
    Unknown,
}

impl AdviseFailure {
    /// 启动应答结果码映射；码 4 的含义取决于接口版本
    pub fn from_start_result(code: u32, interface_version: u32) -> Self {
        match code {
            2 => AdviseFailure::InvalidTableName,
            3 => AdviseFailure::InvalidColumnName,
            4 if interface_version < ORDER_OPTION_VERSION => AdviseFailure::InvalidColumnName,
            4 => AdviseFailure::InvalidOrderOption,
            5 => AdviseFailure::InvalidStartOption,
            7 => AdviseFailure::InvalidArrayAddress,
            _ => AdviseFailure::Unknown,
        }
    }
}

impl fmt::Display for AdviseFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            AdviseFailure::ConnectionFailed => "connection to the server failed",
            AdviseFailure::InvalidTableName => "invalid table name",
            AdviseFailure::InvalidColumnName => "invalid column name",
            AdviseFailure::InvalidStartOption => "invalid start option",
            AdviseFailure::InvalidOrderOption => "invalid order option",
            AdviseFailure::InvalidArrayAddress => "invalid array address",
            AdviseFailure::SecurityBlocked => "blocked by server security",
            AdviseFailure::SessionFailed => "server closed the session",
            AdviseFailure::Unsupported => "operation not supported by the server",
            AdviseFailure::TableDeleted => "table was deleted on the server",
            AdviseFailure::StationShutDown => "station is shutting down",
            AdviseFailure::Unknown => "unknown failure",
        };
        f.write_str(text)
    }
}

/// 会话事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdviseEvent {
    /// 表定义已就绪
    Started,
    /// 读缓冲区有新记录
    RecordsReady,
    /// 会话失败，已回到 Standby
    Failed(AdviseFailure),
}

/// 会话调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session can only be started from standby (state: {0:?})")]
    InvalidState(SessionState),
    #[error("cache size controller must be at least 1")]
    InvalidCacheSize,
    #[error("table name is empty")]
    EmptyTableName,
}

/// 会话配置
#[derive(Debug, Clone)]
pub struct AdviseConfig {
    pub station_name: String,
    pub table_name: String,
    /// 空表示全部列
    pub columns: Vec<ColumnSelector>,
    pub order: OrderOption,
    pub start: StartOption,
    /// 每次通知的最大记录数，同时是回收池上限
    pub cache_size_controller: u32,
    /// 服务端接口版本
    pub interface_version: u32,
    /// 表定义中是否包含列说明
    pub value_descriptions: bool,
}

impl Default for AdviseConfig {
    fn default() -> Self {
        Self {
            station_name: String::new(),
            table_name: String::new(),
            columns: Vec::new(),
            order: OrderOption::Collected,
            start: StartOption::AtNewest,
            cache_size_controller: 10,
            interface_version: ORDER_OPTION_VERSION,
            value_descriptions: false,
        }
    }
}

/// 会话统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdviseStats {
    /// 从原型克隆出的记录数
    pub records_allocated: u64,
    /// 从回收池复用的记录数
    pub records_recycled: u64,
    pub notifications: u64,
    pub continues_sent: u64,
}

impl fmt::Display for AdviseStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "notifications={}, allocated={}, recycled={}, continues={}",
            self.notifications, self.records_allocated, self.records_recycled, self.continues_sent
        )
    }
}

/// 表数据订阅会话
pub struct AdviseSession {
    config: AdviseConfig,
    factory: Arc<dyn ValueFactory>,
    state: SessionState,
    /// 事务号，每次启动递增；旧事务的消息被忽略
    tran_no: u32,
    table: Option<Arc<TableDesc>>,
    prototype: Option<Record>,
    read_buffer: VecDeque<Record>,
    recycle: VecDeque<Record>,
    current: Option<Record>,
    current_block: Vec<Record>,
    /// 已收到通知、尚未回复继续命令
    continue_owed: bool,
    /// 最近收到的记录 (文件标记, 记录号)
    last_received: Option<(u32, u32)>,
    outbound: VecDeque<Message>,
    events: VecDeque<AdviseEvent>,
    stats: AdviseStats,
}

impl AdviseSession {
    pub fn new(config: AdviseConfig, factory: Arc<dyn ValueFactory>) -> Self {
        Self {
            config,
            factory,
            state: SessionState::Standby,
            tran_no: 0,
            table: None,
            prototype: None,
            read_buffer: VecDeque::new(),
            recycle: VecDeque::new(),
            current: None,
            current_block: Vec::new(),
            continue_owed: false,
            last_received: None,
            outbound: VecDeque::new(),
            events: VecDeque::new(),
            stats: AdviseStats::default(),
        }
    }

    pub fn config(&self) -> &AdviseConfig {
        &self.config
    }

    /// 修改配置，下次启动时生效
    pub fn config_mut(&mut self) -> &mut AdviseConfig {
        &mut self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn tran_no(&self) -> u32 {
        self.tran_no
    }

    /// 服务端返回的表定义
    pub fn table(&self) -> Option<&Arc<TableDesc>> {
        self.table.as_ref()
    }

    pub fn stats(&self) -> AdviseStats {
        self.stats
    }

    /// 最近收到的记录 (文件标记, 记录号)，用于断线后续传
    pub fn last_received(&self) -> Option<(u32, u32)> {
        self.last_received
    }

    /// 读缓冲区中未消费的记录数
    pub fn unread(&self) -> usize {
        self.read_buffer.len()
    }

    /// 回收池中的记录数
    pub fn recycled(&self) -> usize {
        self.recycle.len()
    }

    /// 启动会话
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Standby {
            return Err(SessionError::InvalidState(self.state));
        }
        if self.config.cache_size_controller == 0 {
            return Err(SessionError::InvalidCacheSize);
        }
        if self.config.table_name.is_empty() {
            return Err(SessionError::EmptyTableName);
        }

        self.tran_no = self.tran_no.wrapping_add(1);
        self.reset_buffers();
        // 旧记录按上一事务的表定义构造
        self.recycle.clear();
        self.events.clear();
        self.table = None;
        self.prototype = None;
        self.last_received = None;
        self.state = SessionState::Connecting;

        info!(
            "Starting advise on table {} (tran {}, start {:?}, order {:?})",
            self.config.table_name, self.tran_no, self.config.start, self.config.order
        );

        match self.config.start {
            StartOption::AtOffsetFromNewest(_) => {
                let cmd = RecordBlocksCmd {
                    tran_no: self.tran_no,
                    table_name: self.config.table_name.clone(),
                };
                self.outbound.push_back(cmd.to_message());
            }
            start => self.send_start(start),
        }
        Ok(())
    }

    /// 结束会话：向服务端发送中止，之后到达的消息全部忽略
    pub fn finish(&mut self) {
        if self.state == SessionState::Standby {
            return;
        }
        info!(
            "Finishing advise on table {} (tran {}): {}",
            self.config.table_name, self.tran_no, self.stats
        );
        let cmd = AdviseContCmd {
            tran_no: self.tran_no,
            abort: true,
        };
        self.outbound.clear();
        self.outbound.push_back(cmd.to_message());
        self.events.clear();
        self.state = SessionState::Standby;
        self.reset_buffers();
    }

    /// 传输层断开
    pub fn on_disconnected(&mut self) {
        if self.state == SessionState::Standby {
            return;
        }
        self.fail(AdviseFailure::ConnectionFailed);
    }

    pub fn poll_outbound(&mut self) -> Option<Message> {
        self.outbound.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<AdviseEvent> {
        self.events.pop_front()
    }

    /// 处理一条入站消息
    pub fn handle_message(&mut self, msg: &Message) {
        if self.state == SessionState::Standby {
            debug!(
                "Ignoring {} while in standby",
                msg_type::name(msg.msg_type())
            );
            return;
        }

        let mut msg = msg.clone();
        msg.rewind();
        let tracked = matches!(
            msg.msg_type(),
            msg_type::ADVISE_START_ACK | msg_type::ADVISE_NOT | msg_type::RECORD_BLOCKS_ACK
        );
        if tracked && !self.is_current_message(&mut msg) {
            return;
        }
        match msg.msg_type() {
            msg_type::ADVISE_START_ACK => self.on_start_ack(&mut msg),
            msg_type::ADVISE_NOT => self.on_notification(&mut msg),
            msg_type::RECORD_BLOCKS_ACK => self.on_record_blocks(&mut msg),
            msg_type::SESSION_CLOSED => self.fail(AdviseFailure::SessionFailed),
            msg_type::SECURITY_BLOCKED => self.fail(AdviseFailure::SecurityBlocked),
            msg_type::UNSUPPORTED_MSG => self.fail(AdviseFailure::Unsupported),
            other => debug!("Ignoring message type 0x{:04X}", other),
        }
    }

    /// 取下一条记录；上一次返回的记录进入回收池
    pub fn get_next_record(&mut self) -> Option<&Record> {
        if let Some(previous) = self.current.take() {
            self.recycle_record(previous);
        }
        let record = self.read_buffer.pop_front()?;
        self.current = Some(record);
        if self.read_buffer.is_empty() {
            self.send_continue();
        }
        self.current.as_ref()
    }

    /// 一次取走读缓冲区中的全部记录；上一批记录进入回收池
    pub fn get_next_block(&mut self) -> &[Record] {
        let previous: Vec<Record> = self.current_block.drain(..).collect();
        for record in previous {
            self.recycle_record(record);
        }
        if !self.read_buffer.is_empty() {
            self.current_block.extend(self.read_buffer.drain(..));
            self.send_continue();
        }
        &self.current_block
    }

    fn send_start(&mut self, start: StartOption) {
        let cmd = AdviseStartCmd {
            tran_no: self.tran_no,
            table_name: self.config.table_name.clone(),
            start,
            order: self.config.order,
            cache_size: self.config.cache_size_controller,
            value_descriptions: self.config.value_descriptions,
            columns: self.config.columns.clone(),
        };
        debug!("Sending start command: {:?}", cmd);
        self.outbound.push_back(cmd.to_message());
    }

    fn send_continue(&mut self) {
        if !self.continue_owed || self.state == SessionState::Standby {
            return;
        }
        self.continue_owed = false;
        let cmd = AdviseContCmd {
            tran_no: self.tran_no,
            abort: false,
        };
        self.outbound.push_back(cmd.to_message());
        self.stats.continues_sent += 1;
    }

    fn recycle_record(&mut self, record: Record) {
        self.recycle.push_back(record);
        let bound = self.config.cache_size_controller.max(1) as usize;
        while self.recycle.len() > bound {
            self.recycle.pop_front();
        }
    }

    fn reset_buffers(&mut self) {
        let unread: Vec<Record> = self.read_buffer.drain(..).collect();
        for record in unread {
            self.recycle_record(record);
        }
        self.current = None;
        self.current_block.clear();
        self.continue_owed = false;
    }

    fn fail(&mut self, failure: AdviseFailure) {
        warn!(
            "Advise on table {} failed: {}",
            self.config.table_name, failure
        );
        self.state = SessionState::Standby;
        self.outbound.clear();
        self.reset_buffers();
        self.events.push_back(AdviseEvent::Failed(failure));
    }

    fn is_current(&self, tran_no: u32) -> bool {
        if tran_no != self.tran_no {
            debug!(
                "Ignoring stale message (tran {}, current {})",
                tran_no, self.tran_no
            );
            return false;
        }
        true
    }

    /// 先只读事务号：旧事务的消息即使残缺也直接丢弃
    fn is_current_message(&mut self, msg: &mut Message) -> bool {
        let tran_no = msg.read_u32();
        msg.rewind();
        match tran_no {
            Ok(tran_no) => self.is_current(tran_no),
            Err(e) => {
                warn!("Malformed {}: {}", msg_type::name(msg.msg_type()), e);
                self.fail(AdviseFailure::Unknown);
                false
            }
        }
    }

    fn on_record_blocks(&mut self, msg: &mut Message) {
        let ack = match RecordBlocksAck::read(msg) {
            Ok(ack) => ack,
            Err(e) => {
                warn!("Malformed record blocks ack: {}", e);
                return self.fail(AdviseFailure::Unknown);
            }
        };
        if self.state != SessionState::Connecting {
            return;
        }
        if ack.result != START_RESULT_OK {
            return self.fail(AdviseFailure::from_start_result(
                ack.result,
                self.config.interface_version,
            ));
        }

        let offset = match self.config.start {
            StartOption::AtOffsetFromNewest(offset) => offset,
            _ => 1,
        };
        let start = protocol::resolve_offset_from_newest(&ack.blocks, offset);
        debug!(
            "Resolved offset {} over {} blocks to {:?}",
            offset,
            ack.blocks.len(),
            start
        );
        self.send_start(start);
    }

    fn on_start_ack(&mut self, msg: &mut Message) {
        let ack = match AdviseStartAck::read(msg) {
            Ok(ack) => ack,
            Err(e) => {
                warn!("Malformed start ack: {}", e);
                return self.fail(AdviseFailure::Unknown);
            }
        };
        if self.state != SessionState::Connecting {
            return;
        }
        if ack.result != START_RESULT_OK {
            return self.fail(AdviseFailure::from_start_result(
                ack.result,
                self.config.interface_version,
            ));
        }

        let mut table = TableDesc::new(&self.config.station_name, &self.config.table_name);
        if let Err(e) = table.read(msg, self.config.value_descriptions) {
            warn!("Malformed table definition: {}", e);
            return self.fail(AdviseFailure::Unknown);
        }
        let table = Arc::new(table);
        let prototype = match Record::new(Arc::clone(&table), self.factory.as_ref()) {
            Ok(record) => record,
            Err(e) => {
                warn!("Cannot build record layout: {}", e);
                return self.fail(AdviseFailure::Unknown);
            }
        };

        info!(
            "Advise started on table {}: {} columns, {} bytes per record",
            table.table_name,
            prototype.len(),
            prototype.buffer().len()
        );
        self.table = Some(table);
        self.prototype = Some(prototype);
        self.state = SessionState::Started;
        self.events.push_back(AdviseEvent::Started);
    }

    fn on_notification(&mut self, msg: &mut Message) {
        let header = match AdviseNotHeader::read(msg) {
            Ok(header) => header,
            Err(e) => {
                warn!("Malformed notification: {}", e);
                return self.fail(AdviseFailure::Unknown);
            }
        };
        if !matches!(self.state, SessionState::Started | SessionState::Active) {
            debug!("Ignoring notification in state {:?}", self.state);
            return;
        }
        match header.server_state {
            SERVER_STATE_OK => {}
            SERVER_STATE_TABLE_DELETED => return self.fail(AdviseFailure::TableDeleted),
            SERVER_STATE_SHUT_DOWN => return self.fail(AdviseFailure::StationShutDown),
            _ => return self.fail(AdviseFailure::Unknown),
        }

        let had_unread = !self.read_buffer.is_empty();
        for _ in 0..header.record_count {
            let mut record = match self.take_record() {
                Some(record) => record,
                None => return self.fail(AdviseFailure::Unknown),
            };
            if let Err(e) = record.read(msg, false, false) {
                warn!("Malformed record in notification: {}", e);
                self.recycle_record(record);
                return self.fail(AdviseFailure::Unknown);
            }
            self.last_received = Some((record.file_mark(), record.record_no()));
            self.read_buffer.push_back(record);
        }

        self.stats.notifications += 1;
        self.state = SessionState::Active;
        self.continue_owed = true;
        debug!(
            "Notification with {} records, {} unread",
            header.record_count,
            self.read_buffer.len()
        );

        if self.read_buffer.is_empty() {
            self.send_continue();
        } else if !had_unread {
            self.events.push_back(AdviseEvent::RecordsReady);
        }
    }

    /// 先从回收池取，池空时克隆原型
    fn take_record(&mut self) -> Option<Record> {
        if let Some(record) = self.recycle.pop_front() {
            self.stats.records_recycled += 1;
            return Some(record);
        }
        let prototype = self.prototype.as_ref()?;
        self.stats.records_allocated += 1;
        Some(prototype.clone())
    }
}
