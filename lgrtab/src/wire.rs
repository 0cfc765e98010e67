//! 消息通道
//!
//! 协议消息的类型化读写原语。多字节整数均为大端；
//! `wstr` 为 UTF-8 文本加单个 NUL 结束符。

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// 消息读取错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("truncated message: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },
    #[error("string field is not valid utf-8")]
    BadString,
}

/// 一条协议消息：消息类型 + 会话号 + 消息体（带读游标）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    msg_type: u32,
    session: u32,
    body: BytesMut,
    read_pos: usize,
}

impl Message {
    pub fn new(msg_type: u32, session: u32) -> Self {
        Self {
            msg_type,
            session,
            body: BytesMut::new(),
            read_pos: 0,
        }
    }

    /// 由已有消息体构造（用于解码）
    pub fn with_body(msg_type: u32, session: u32, body: &[u8]) -> Self {
        Self {
            msg_type,
            session,
            body: BytesMut::from(body),
            read_pos: 0,
        }
    }

    pub fn msg_type(&self) -> u32 {
        self.msg_type
    }

    pub fn session(&self) -> u32 {
        self.session
    }

    pub fn set_session(&mut self, session: u32) {
        self.session = session;
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// 未读字节数
    pub fn remaining(&self) -> usize {
        self.body.len() - self.read_pos
    }

    /// 读游标回到开头
    pub fn rewind(&mut self) {
        self.read_pos = 0;
    }

    fn take(&mut self, need: usize) -> Result<&[u8], WireError> {
        let got = self.remaining();
        if got < need {
            return Err(WireError::Truncated { need, got });
        }
        let start = self.read_pos;
        self.read_pos += need;
        Ok(&self.body[start..start + need])
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        Ok(self.take(2)?.get_u16())
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        Ok(self.take(4)?.get_u32())
    }

    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        Ok(self.take(4)?.get_i32())
    }

    pub fn read_i64(&mut self) -> Result<i64, WireError> {
        Ok(self.take(8)?.get_i64())
    }

    /// 读取 NUL 结束的字符串
    pub fn read_wstr(&mut self) -> Result<String, WireError> {
        let rest = &self.body[self.read_pos..];
        let Some(len) = rest.iter().position(|&b| b == 0) else {
            return Err(WireError::Truncated {
                need: rest.len() + 1,
                got: rest.len(),
            });
        };
        let text = std::str::from_utf8(&rest[..len])
            .map_err(|_| WireError::BadString)?
            .to_string();
        self.read_pos += len + 1;
        Ok(text)
    }

    /// 读取定长字节到 dest
    pub fn read_bytes(&mut self, dest: &mut [u8]) -> Result<(), WireError> {
        let src = self.take(dest.len())?;
        dest.copy_from_slice(src);
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) {
        self.body.put_u8(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.body.put_u8(u8::from(v));
    }

    pub fn write_u16(&mut self, v: u16) {
        self.body.put_u16(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.body.put_u32(v);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.body.put_i32(v);
    }

    pub fn write_i64(&mut self, v: i64) {
        self.body.put_i64(v);
    }

    pub fn write_wstr(&mut self, s: &str) {
        self.body.put_slice(s.as_bytes());
        self.body.put_u8(0);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.body.put_slice(data);
    }
}
