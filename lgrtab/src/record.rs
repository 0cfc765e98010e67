//! 记录
//!
//! 一条记录拥有一个定长打包缓冲区和一组绑定到该缓冲区的值，
//! 值的顺序与表描述一致（相邻的字符数组元素合并为一个字符串值）。
//!
//! 导出入口共享半开区间 `[begin, end)`，按值下标计。

use std::fmt::Write as _;
use std::ops::Range;
use std::sync::Arc;

use crc32fast::Hasher;
use quick_xml::escape::escape;
use serde_json::{Map, Value as Json};
use thiserror::Error;

use crate::constants::{CRLF, ISO_TIME_FORMAT};
use crate::desc::{TableDesc, ValueDesc};
use crate::factory::ValueFactory;
use crate::options::{CsvOptions, JsonOptions, Tob1Options, XmlOptions};
use crate::time::{format_stamp, unix_nsec_to_logger};
use crate::value::{Scalar, Value, ValueError};
use crate::wire::{Message, WireError};
use crate::wire_type::WireType;

/// 记录错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error("malformed record: {0}")]
    Wire(#[from] WireError),
    #[error("record byte count {got} does not match table width {expected}")]
    ByteCountMismatch { expected: usize, got: usize },
    #[error("records belong to different tables")]
    TableMismatch,
}

/// 表中的一条记录
#[derive(Debug, Clone)]
pub struct Record {
    table: Arc<TableDesc>,
    buffer: Vec<u8>,
    values: Vec<Value>,
    record_no: u32,
    file_mark: u32,
    /// Unix 纪元纳秒
    stamp: i64,
    all_native: bool,
}

impl Record {
    /// 由表描述构造记录
    ///
    /// 第一遍为每个列描述创建值，创建前先询问上一个值能否并入该列（字符数组合并）；
    /// 第二遍按顺序为每个值分配缓冲区区间。
    pub fn new(table: Arc<TableDesc>, factory: &dyn ValueFactory) -> Result<Self, RecordError> {
        let mut values: Vec<Value> = Vec::with_capacity(table.len());
        for desc in table.columns() {
            if let Some(prev) = values.last_mut() {
                if prev.combine_with_adjacent_values(desc) {
                    continue;
                }
            }
            values.push(factory.make_value(desc)?);
        }

        let mut offset = 0;
        let mut all_native = true;
        for value in &mut values {
            value.bind(offset);
            offset += value.width();
            all_native &= value.is_tob1_native();
        }

        Ok(Self {
            table,
            buffer: vec![0; offset],
            values,
            record_no: 0,
            file_mark: 0,
            stamp: 0,
            all_native,
        })
    }

    pub fn table(&self) -> &Arc<TableDesc> {
        &self.table
    }

    pub fn record_no(&self) -> u32 {
        self.record_no
    }

    pub fn set_record_no(&mut self, record_no: u32) {
        self.record_no = record_no;
    }

    pub fn file_mark(&self) -> u32 {
        self.file_mark
    }

    pub fn set_file_mark(&mut self, file_mark: u32) {
        self.file_mark = file_mark;
    }

    pub fn stamp(&self) -> i64 {
        self.stamp
    }

    pub fn set_stamp(&mut self, stamp: i64) {
        self.stamp = stamp;
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// 值个数（合并后）
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 所有值都已是 TOB1 格式
    pub fn is_all_native(&self) -> bool {
        self.all_native
    }

    /// 从消息读取：记录号、[文件标记]、时间戳、[字节数]、打包数据
    ///
    /// 失败时记录内容不变。
    pub fn read(
        &mut self,
        msg: &mut Message,
        has_file_mark: bool,
        has_byte_count: bool,
    ) -> Result<(), RecordError> {
        let record_no = msg.read_u32()?;
        let file_mark = if has_file_mark {
            msg.read_u32()?
        } else {
            self.file_mark
        };
        let stamp = msg.read_i64()?;
        if has_byte_count {
            let got = msg.read_u32()? as usize;
            if got != self.buffer.len() {
                return Err(RecordError::ByteCountMismatch {
                    expected: self.buffer.len(),
                    got,
                });
            }
        }
        msg.read_bytes(&mut self.buffer)?;

        self.record_no = record_no;
        self.file_mark = file_mark;
        self.stamp = stamp;
        Ok(())
    }

    /// 从原始缓冲区读取，元数据由调用方提供
    pub fn read_raw(
        &mut self,
        record_no: u32,
        file_mark: u32,
        stamp: i64,
        bytes: &[u8],
    ) -> Result<(), RecordError> {
        if bytes.len() != self.buffer.len() {
            return Err(RecordError::ByteCountMismatch {
                expected: self.buffer.len(),
                got: bytes.len(),
            });
        }
        self.buffer.copy_from_slice(bytes);
        self.record_no = record_no;
        self.file_mark = file_mark;
        self.stamp = stamp;
        Ok(())
    }

    /// 深拷贝另一条同表记录
    pub fn copy_from(&mut self, other: &Record) -> Result<(), RecordError> {
        let same_table = Arc::ptr_eq(&self.table, &other.table) || self.table == other.table;
        if !same_table || self.buffer.len() != other.buffer.len() {
            return Err(RecordError::TableMismatch);
        }
        self.buffer.copy_from_slice(&other.buffer);
        self.values.clone_from(&other.values);
        self.record_no = other.record_no;
        self.file_mark = other.file_mark;
        self.stamp = other.stamp;
        self.all_native = other.all_native;
        Ok(())
    }

    pub fn value(&self, index: usize) -> Option<ValueRef<'_>> {
        self.values.get(index).map(|value| ValueRef {
            value,
            buffer: &self.buffer,
        })
    }

    pub fn value_mut(&mut self, index: usize) -> Option<ValueMut<'_>> {
        let value = self.values.get(index)?;
        Some(ValueMut {
            value,
            buffer: &mut self.buffer,
        })
    }

    /// 按名称查找值下标；名称可带下标（如 `Temp(2)`），合并字符串用数组名
    pub fn find_value(&self, name: &str) -> Option<usize> {
        self.values
            .iter()
            .position(|v| v.name() == name)
            .or_else(|| self.values.iter().position(|v| v.desc().name == name))
    }

    pub fn set_to_null(&mut self) -> Result<(), RecordError> {
        for value in &self.values {
            value.set_to_null(&mut self.buffer)?;
        }
        Ok(())
    }

    /// 时间戳、记录号和缓冲区的 CRC-32
    pub fn calc_sig(&self) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(&self.stamp.to_be_bytes());
        hasher.update(&self.record_no.to_be_bytes());
        hasher.update(&self.buffer);
        hasher.finalize()
    }

    pub fn format_time(&self, pattern: &str, midnight_is_2400: bool) -> String {
        format_stamp(self.stamp, pattern, midnight_is_2400)
    }

    fn span(&self, begin: usize, end: usize) -> Range<usize> {
        let end = end.min(self.values.len());
        begin.min(end)..end
    }

    fn is_whole(&self, range: &Range<usize>) -> bool {
        range.start == 0 && range.end == self.values.len()
    }

    /// TOB1 行：`[SECONDS NANOSECONDS] [RECORD] 值...`，低字节在前
    pub fn write_tob1(&self, begin: usize, end: usize, opts: &Tob1Options, out: &mut Vec<u8>) {
        if opts.include_time() {
            let (secs, nsec) = unix_nsec_to_logger(self.stamp);
            out.extend_from_slice(&(secs as u32).to_le_bytes());
            out.extend_from_slice(&nsec.to_le_bytes());
        }
        if opts.include_record_no() {
            out.extend_from_slice(&self.record_no.to_le_bytes());
        }

        let range = self.span(begin, end);
        if self.all_native && self.is_whole(&range) {
            out.extend_from_slice(&self.buffer);
            return;
        }
        for value in &self.values[range] {
            value.write_tob1(&self.buffer, out);
        }
    }

    /// 分隔文本行，以 CRLF 结束
    pub fn write_csv(&self, begin: usize, end: usize, opts: &CsvOptions, out: &mut String) {
        let mut first = true;
        let mut sep = |out: &mut String| {
            if !first {
                out.push(',');
            }
            first = false;
        };

        if opts.include_time() {
            sep(out);
            let time = self.format_time(opts.time_pattern(), opts.midnight_is_2400());
            if opts.quote_strings() {
                let _ = write!(out, "\"{}\"", time);
            } else {
                out.push_str(&time);
            }
        }
        if opts.include_record_no() {
            sep(out);
            let _ = write!(out, "{}", self.record_no);
        }
        for value in &self.values[self.span(begin, end)] {
            sep(out);
            value.format_text(&self.buffer, out, opts);
        }
        out.push_str(CRLF);
    }

    /// CSIXML `<r>` 节点
    pub fn write_xml(&self, begin: usize, end: usize, opts: &XmlOptions, out: &mut String) {
        out.push_str("<r");
        if opts.include_record_no() {
            let _ = write!(out, " no=\"{}\"", self.record_no);
        }
        if opts.include_time() {
            let time = self.format_time(opts.time_pattern(), opts.midnight_is_2400());
            let _ = write!(out, " time=\"{}\"", escape(time.as_str()));
        }
        out.push('>');

        let range = self.span(begin, end);
        for (i, value) in self.values[range.clone()].iter().enumerate() {
            let text = value.xml_text(&self.buffer);
            if opts.include_value_name() {
                let name = value.display_name(opts.include_array_id());
                let _ = write!(out, "<v n=\"{}\"", escape(name.as_str()));
                write_units_process(out, value.desc(), opts);
                let _ = write!(out, ">{}</v>", escape(text.as_str()));
            } else {
                let tag = range.start + i + 1;
                let _ = write!(out, "<v{}", tag);
                write_units_process(out, value.desc(), opts);
                let _ = write!(out, ">{}</v{}>", escape(text.as_str()), tag);
            }
        }
        out.push_str("</r>");
    }

    /// CSIJSON 数据行：`{"no":..,"time":..,"vals":[..]}`
    pub fn write_json(&self, begin: usize, end: usize, opts: &JsonOptions) -> Json {
        let mut row = Map::new();
        if opts.include_time() {
            let time = self.format_time(ISO_TIME_FORMAT, opts.midnight_is_2400());
            row.insert("time".to_string(), Json::String(time));
        }
        if opts.include_record_no() {
            row.insert("no".to_string(), Json::from(self.record_no));
        }
        let vals = self.values[self.span(begin, end)]
            .iter()
            .map(|v| v.to_json(&self.buffer))
            .collect();
        row.insert("vals".to_string(), Json::Array(vals));
        Json::Object(row)
    }
}

fn write_units_process(out: &mut String, desc: &ValueDesc, opts: &XmlOptions) {
    if !opts.include_units_process() {
        return;
    }
    if !desc.units.is_empty() {
        let _ = write!(out, " units=\"{}\"", escape(desc.units.as_str()));
    }
    if !desc.process.is_empty() {
        let _ = write!(out, " process=\"{}\"", escape(desc.process.as_str()));
    }
}

/// 记录中某个值的只读视图
#[derive(Debug, Clone, Copy)]
pub struct ValueRef<'a> {
    value: &'a Value,
    buffer: &'a [u8],
}

impl<'a> ValueRef<'a> {
    pub fn name(&self) -> String {
        self.value.name()
    }

    pub fn desc(&self) -> &'a Arc<ValueDesc> {
        self.value.desc()
    }

    pub fn wire_type(&self) -> WireType {
        self.value.wire_type()
    }

    pub fn get(&self) -> Scalar {
        self.value.decode(self.buffer)
    }

    pub fn to_json(&self) -> Json {
        self.value.to_json(self.buffer)
    }

    pub fn format_text(&self, opts: &CsvOptions) -> String {
        let mut out = String::new();
        self.value.format_text(self.buffer, &mut out, opts);
        out
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.value.bytes(self.buffer)
    }
}

/// 记录中某个值的可写视图
#[derive(Debug)]
pub struct ValueMut<'a> {
    value: &'a Value,
    buffer: &'a mut [u8],
}

impl ValueMut<'_> {
    pub fn get(&self) -> Scalar {
        self.value.decode(self.buffer)
    }

    pub fn set(&mut self, scalar: &Scalar) -> Result<(), ValueError> {
        self.value.encode(self.buffer, scalar)
    }

    pub fn set_json(&mut self, json: &Json) -> Result<(), ValueError> {
        self.value.set_json(self.buffer, json)
    }

    pub fn set_to_null(&mut self) -> Result<(), ValueError> {
        self.value.set_to_null(self.buffer)
    }
}
