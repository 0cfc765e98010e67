//! 值编解码
//!
//! `Value` 不持有数据，只记录自己在记录缓冲区中的位置；所有读写都以记录缓冲区为参数。
//! 线路类型是封闭集合，各操作对 `WireType` 做穷尽匹配。

use std::fmt;
use std::fmt::Write as _;
use std::ops::Range;
use std::sync::Arc;

use serde_json::{Number, Value as Json};
use thiserror::Error;

use crate::constants::{
    FS2_NAN, ISO_TIME_FORMAT, LOGGER_EPOCH_OFFSET_SECS, NSEC_PER_SEC, NSEC_PER_USEC_TICK,
};
use crate::desc::ValueDesc;
use crate::fs2;
use crate::options::CsvOptions;
use crate::time::{format_stamp, logger_to_unix_nsec, parse_stamp, unix_nsec_to_logger};
use crate::wire_type::{ByteOrder, Family, WireType};

/// 值错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValueError {
    #[error("unsupported value type code {0}")]
    UnsupportedType(u32),
    #[error("value is not bound to a record buffer")]
    Unbound,
    #[error("{value} out of range for {wire_type}")]
    OutOfRange { value: String, wire_type: WireType },
    #[error("cannot convert {value} to {wire_type}")]
    Conversion { value: String, wire_type: WireType },
}

/// 解码后的标量
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    /// 8 位布尔组
    Bits(u8),
    Text(String),
    /// Unix 纪元纳秒
    Stamp(i64),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::UInt(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", float_text(*v, false)),
            Scalar::Bool(v) => write!(f, "{}", v),
            Scalar::Bits(v) => write!(f, "{:08b}", v),
            Scalar::Text(v) => write!(f, "{}", v),
            Scalar::Stamp(v) => write!(f, "{}", format_stamp(*v, ISO_TIME_FORMAT, false)),
        }
    }
}

impl Scalar {
    fn as_i128(&self) -> Option<i128> {
        match self {
            Scalar::Int(v) => Some(i128::from(*v)),
            Scalar::UInt(v) => Some(i128::from(*v)),
            Scalar::Float(v) if v.is_finite() => Some(v.round() as i128),
            Scalar::Float(_) => None,
            Scalar::Bool(v) => Some(if *v { -1 } else { 0 }),
            Scalar::Bits(v) => Some(i128::from(*v)),
            Scalar::Text(s) => {
                let s = s.trim();
                s.parse::<i128>().ok().or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite())
                        .map(|v| v.round() as i128)
                })
            }
            Scalar::Stamp(v) => Some(i128::from(*v)),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(*v as f64),
            Scalar::UInt(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            Scalar::Bool(v) => Some(if *v { -1.0 } else { 0.0 }),
            Scalar::Bits(v) => Some(f64::from(*v)),
            Scalar::Text(s) => parse_float_text(s),
            Scalar::Stamp(_) => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(v) => Some(*v),
            Scalar::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "on" => Some(true),
                "false" | "off" => Some(false),
                other => parse_float_text(other).map(|v| v != 0.0),
            },
            Scalar::Stamp(_) => None,
            other => other.as_f64().map(|v| v != 0.0),
        }
    }

    fn as_stamp(&self) -> Option<i64> {
        match self {
            Scalar::Stamp(v) | Scalar::Int(v) => Some(*v),
            Scalar::UInt(v) => i64::try_from(*v).ok(),
            Scalar::Text(s) => parse_stamp(s),
            _ => None,
        }
    }

    fn as_bits(&self) -> Option<u8> {
        match self {
            Scalar::Bits(v) => Some(*v),
            Scalar::Text(s) if s.len() == 8 && s.chars().all(|c| c == '0' || c == '1') => {
                u8::from_str_radix(s, 2).ok()
            }
            other => other.as_i128().and_then(|v| u8::try_from(v).ok()),
        }
    }
}

/// 绑定到记录缓冲区某一段的值
#[derive(Debug, Clone)]
pub struct Value {
    desc: Arc<ValueDesc>,
    wire_type: WireType,
    /// 存储宽度；合并后的字符串为字符个数
    width: usize,
    offset: Option<usize>,
}

impl Value {
    pub fn new(desc: Arc<ValueDesc>, wire_type: WireType) -> Self {
        Self {
            desc,
            wire_type,
            width: wire_type.width(),
            offset: None,
        }
    }

    pub fn desc(&self) -> &Arc<ValueDesc> {
        &self.desc
    }

    pub fn wire_type(&self) -> WireType {
        self.wire_type
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    pub fn is_bound(&self) -> bool {
        self.offset.is_some()
    }

    /// 绑定到缓冲区偏移
    pub fn bind(&mut self, offset: usize) {
        self.offset = Some(offset);
    }

    pub fn range(&self) -> Option<Range<usize>> {
        self.offset.map(|start| start..start + self.width)
    }

    /// 值名称；合并后的字符串去掉末维下标
    pub fn name(&self) -> String {
        if self.desc.should_be_merged() {
            self.desc.merged_name()
        } else {
            self.desc.full_name()
        }
    }

    /// 名称，可选择是否带数组下标
    pub fn display_name(&self, include_array_id: bool) -> String {
        if include_array_id {
            self.name()
        } else {
            self.desc.name.clone()
        }
    }

    /// 若 next 是同一字符数组的后续元素则并入本值，宽度加一
    pub fn combine_with_adjacent_values(&mut self, next: &ValueDesc) -> bool {
        if !self.wire_type.is_ascii()
            || !self.desc.should_be_merged()
            || !next.should_be_merged()
            || next.start_of_merge()
            || !self.desc.same_merge_prefix(next)
        {
            return false;
        }
        self.width += 1;
        true
    }

    pub fn is_tob1_native(&self) -> bool {
        self.wire_type.is_tob1_native()
    }

    /// 文本导出时需要加引号
    pub fn quote_when_formatting(&self) -> bool {
        matches!(
            self.wire_type.family(),
            Family::Ascii | Family::Stamp | Family::Bits
        )
    }

    pub fn tob1_type_name(&self) -> String {
        if self.wire_type.is_ascii() {
            format!("ASCII({})", self.width)
        } else {
            self.wire_type.tob1_type_name().to_string()
        }
    }

    pub fn tob1_width(&self) -> usize {
        if self.wire_type.is_ascii() {
            self.width
        } else {
            self.wire_type.tob1_width()
        }
    }

    /// 本值在缓冲区中的字节
    pub fn bytes<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        self.range()
            .and_then(|range| buf.get(range))
            .unwrap_or(&[])
    }

    fn slot_mut<'a>(&self, buf: &'a mut [u8]) -> Result<&'a mut [u8], ValueError> {
        let range = self.range().ok_or(ValueError::Unbound)?;
        buf.get_mut(range).ok_or(ValueError::Unbound)
    }

    pub fn decode(&self, buf: &[u8]) -> Scalar {
        let b = self.bytes(buf);
        let order = self.wire_type.byte_order();

        use WireType::*;
        match self.wire_type {
            UInt1 => Scalar::UInt(u64::from(fixed::<1>(b)[0])),
            Int1 => Scalar::Int(i64::from(fixed::<1>(b)[0] as i8)),
            UInt2 | UInt2Lsf => Scalar::UInt(u64::from(u16::from_ne_bytes(swapped(fixed(b), order)))),
            Int2 | Int2Lsf => Scalar::Int(i64::from(i16::from_ne_bytes(swapped(fixed(b), order)))),
            UInt4 | UInt4Lsf => Scalar::UInt(u64::from(u32::from_ne_bytes(swapped(fixed(b), order)))),
            Int4 | Int4Lsf => Scalar::Int(i64::from(i32::from_ne_bytes(swapped(fixed(b), order)))),
            UInt8 | UInt8Lsf => Scalar::UInt(u64::from_ne_bytes(swapped(fixed(b), order))),
            Int8 | Int8Lsf => Scalar::Int(i64::from_ne_bytes(swapped(fixed(b), order))),
            Ieee4 | Ieee4Lsf => {
                Scalar::Float(f64::from(f32::from_ne_bytes(swapped(fixed(b), order))))
            }
            Ieee8 | Ieee8Lsf => Scalar::Float(f64::from_ne_bytes(swapped(fixed(b), order))),
            Fs2 => Scalar::Float(fs2::decode(u16::from_be_bytes(fixed(b)))),
            Bool | Bool2 | Bool4 => Scalar::Bool(b.iter().any(|&x| x != 0)),
            Bool8 => Scalar::Bits(fixed::<1>(b)[0]),
            Ascii | AsciiZ => Scalar::Text(ascii_text(b)),
            Sec => {
                let secs = i32::from_be_bytes(fixed(b));
                Scalar::Stamp(logger_to_unix_nsec(i64::from(secs), 0))
            }
            USec => {
                let mut raw = [0u8; 8];
                raw[2..].copy_from_slice(&fixed::<6>(b));
                let ticks = u64::from_be_bytes(raw) as i64;
                Scalar::Stamp(
                    (LOGGER_EPOCH_OFFSET_SECS * NSEC_PER_SEC)
                        .saturating_add(ticks.saturating_mul(NSEC_PER_USEC_TICK)),
                )
            }
            NSec | NSecLsf => {
                let secs = i32::from_ne_bytes(swapped(fixed_at(b, 0), order));
                let nsec = i32::from_ne_bytes(swapped(fixed_at(b, 4), order));
                Scalar::Stamp(logger_to_unix_nsec(i64::from(secs), i64::from(nsec)))
            }
        }
    }

    pub fn encode(&self, buf: &mut [u8], value: &Scalar) -> Result<(), ValueError> {
        let order = self.wire_type.byte_order();
        let dest = self.slot_mut(buf)?;

        use WireType::*;
        match self.wire_type {
            UInt1 => dest[0] = self.to_int::<u8>(value)?,
            Int1 => dest[0] = self.to_int::<i8>(value)? as u8,
            UInt2 | UInt2Lsf => put(dest, self.to_int::<u16>(value)?.to_ne_bytes(), order),
            Int2 | Int2Lsf => put(dest, self.to_int::<i16>(value)?.to_ne_bytes(), order),
            UInt4 | UInt4Lsf => put(dest, self.to_int::<u32>(value)?.to_ne_bytes(), order),
            Int4 | Int4Lsf => put(dest, self.to_int::<i32>(value)?.to_ne_bytes(), order),
            UInt8 | UInt8Lsf => put(dest, self.to_int::<u64>(value)?.to_ne_bytes(), order),
            Int8 | Int8Lsf => put(dest, self.to_int::<i64>(value)?.to_ne_bytes(), order),
            Ieee4 | Ieee4Lsf => put(dest, (self.to_float(value)? as f32).to_ne_bytes(), order),
            Ieee8 | Ieee8Lsf => put(dest, self.to_float(value)?.to_ne_bytes(), order),
            Fs2 => dest.copy_from_slice(&fs2::encode(self.to_float(value)?).to_be_bytes()),
            Bool | Bool2 | Bool4 => {
                let on = value.as_bool().ok_or_else(|| self.conversion(value))?;
                dest.fill(if on { 0xFF } else { 0x00 });
            }
            Bool8 => dest[0] = value.as_bits().ok_or_else(|| self.conversion(value))?,
            Ascii | AsciiZ => {
                let text = match value {
                    Scalar::Text(s) => s.clone(),
                    other => other.to_string(),
                };
                let bytes = latin1_bytes(&text);
                let n = bytes.len().min(dest.len().saturating_sub(1));
                dest.fill(0);
                dest[..n].copy_from_slice(&bytes[..n]);
            }
            Sec => {
                let (secs, _) = unix_nsec_to_logger(self.to_stamp(value)?);
                let secs = i32::try_from(secs).map_err(|_| self.out_of_range(value))?;
                dest.copy_from_slice(&secs.to_be_bytes());
            }
            USec => {
                let since_epoch = self
                    .to_stamp(value)?
                    .saturating_sub(LOGGER_EPOCH_OFFSET_SECS * NSEC_PER_SEC);
                let ticks = since_epoch.div_euclid(NSEC_PER_USEC_TICK);
                if !(0..1i64 << 48).contains(&ticks) {
                    return Err(self.out_of_range(value));
                }
                dest.copy_from_slice(&ticks.to_be_bytes()[2..]);
            }
            NSec | NSecLsf => {
                let (secs, nsec) = unix_nsec_to_logger(self.to_stamp(value)?);
                let secs = i32::try_from(secs).map_err(|_| self.out_of_range(value))?;
                let (head, tail) = dest.split_at_mut(4);
                put(head, secs.to_ne_bytes(), order);
                put(tail, (nsec as i32).to_ne_bytes(), order);
            }
        }
        Ok(())
    }

    /// 写入空值：整数/布尔/时间为 0，浮点为 NaN，FS2 为保留的 NaN 位型
    pub fn set_to_null(&self, buf: &mut [u8]) -> Result<(), ValueError> {
        let order = self.wire_type.byte_order();
        let dest = self.slot_mut(buf)?;
        match self.wire_type {
            WireType::Ieee4 | WireType::Ieee4Lsf => put(dest, f32::NAN.to_ne_bytes(), order),
            WireType::Ieee8 | WireType::Ieee8Lsf => put(dest, f64::NAN.to_ne_bytes(), order),
            WireType::Fs2 => dest.copy_from_slice(&FS2_NAN.to_be_bytes()),
            _ => dest.fill(0),
        }
        Ok(())
    }

    /// 分隔文本格式化
    pub fn format_text(&self, buf: &[u8], out: &mut String, opts: &CsvOptions) {
        let quote = opts.quote_strings() && self.quote_when_formatting();
        match self.decode(buf) {
            Scalar::Int(v) => {
                let _ = write!(out, "{}", v);
            }
            Scalar::UInt(v) => {
                let _ = write!(out, "{}", v);
            }
            Scalar::Float(v) => out.push_str(&float_text(v, self.is_single_precision())),
            Scalar::Bool(v) => out.push_str(if v { "-1" } else { "0" }),
            Scalar::Bits(v) => push_quoted(out, &format!("{:08b}", v), quote),
            Scalar::Text(v) => push_quoted(out, &v, quote),
            Scalar::Stamp(v) if opts.embedded_as_string() => {
                let text = format_stamp(v, opts.time_pattern(), opts.midnight_is_2400());
                push_quoted(out, &text, quote);
            }
            Scalar::Stamp(v) => out.push_str(&logger_seconds_text(v)),
        }
    }

    /// 结构化读取：数值为数字，布尔为布尔，其余为字符串
    pub fn to_json(&self, buf: &[u8]) -> Json {
        match self.decode(buf) {
            Scalar::Int(v) => Json::from(v),
            Scalar::UInt(v) => Json::from(v),
            Scalar::Float(v) => {
                let single = self.is_single_precision();
                let text = float_text(v, single);
                text.parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Json::Number)
                    .unwrap_or(Json::String(text))
            }
            Scalar::Bool(v) => Json::Bool(v),
            Scalar::Bits(v) => Json::String(format!("{:08b}", v)),
            Scalar::Text(v) => Json::String(v),
            Scalar::Stamp(v) => Json::String(format_stamp(v, ISO_TIME_FORMAT, false)),
        }
    }

    /// 结构化写入；null 写入空值
    pub fn set_json(&self, buf: &mut [u8], value: &Json) -> Result<(), ValueError> {
        let scalar = match value {
            Json::Null => return self.set_to_null(buf),
            Json::Bool(v) => Scalar::Bool(*v),
            Json::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Scalar::Int(v)
                } else if let Some(v) = n.as_u64() {
                    Scalar::UInt(v)
                } else {
                    Scalar::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Json::String(s) => Scalar::Text(s.clone()),
            other => {
                return Err(ValueError::Conversion {
                    value: other.to_string(),
                    wire_type: self.wire_type,
                })
            }
        };
        self.encode(buf, &scalar)
    }

    /// XML 节点文本
    pub fn xml_text(&self, buf: &[u8]) -> String {
        match self.decode(buf) {
            Scalar::Float(v) => float_text(v, self.is_single_precision()),
            Scalar::Bool(v) => v.to_string(),
            Scalar::Stamp(v) => format_stamp(v, ISO_TIME_FORMAT, false),
            other => other.to_string(),
        }
    }

    /// 追加 TOB1 格式字节（低字节在前）
    pub fn write_tob1(&self, buf: &[u8], out: &mut Vec<u8>) {
        let b = self.bytes(buf);
        if self.is_tob1_native() {
            out.extend_from_slice(b);
            return;
        }

        match self.wire_type {
            WireType::NSec => {
                for start in [0, 4] {
                    let mut half: [u8; 4] = fixed_at(b, start);
                    half.reverse();
                    out.extend_from_slice(&half);
                }
            }
            WireType::USec => {
                let ns = match self.decode(buf) {
                    Scalar::Stamp(v) => v,
                    _ => 0,
                };
                let (secs, nsec) = unix_nsec_to_logger(ns);
                out.extend_from_slice(&(secs as i32).to_le_bytes());
                out.extend_from_slice(&(nsec as i32).to_le_bytes());
            }
            _ => out.extend(b.iter().rev()),
        }
    }

    fn is_single_precision(&self) -> bool {
        matches!(
            self.wire_type,
            WireType::Ieee4 | WireType::Ieee4Lsf | WireType::Fs2
        )
    }

    fn to_int<T: TryFrom<i128>>(&self, value: &Scalar) -> Result<T, ValueError> {
        let v = value.as_i128().ok_or_else(|| self.conversion(value))?;
        T::try_from(v).map_err(|_| self.out_of_range(value))
    }

    fn to_float(&self, value: &Scalar) -> Result<f64, ValueError> {
        value.as_f64().ok_or_else(|| self.conversion(value))
    }

    fn to_stamp(&self, value: &Scalar) -> Result<i64, ValueError> {
        value.as_stamp().ok_or_else(|| self.conversion(value))
    }

    fn conversion(&self, value: &Scalar) -> ValueError {
        ValueError::Conversion {
            value: value.to_string(),
            wire_type: self.wire_type,
        }
    }

    fn out_of_range(&self, value: &Scalar) -> ValueError {
        ValueError::OutOfRange {
            value: value.to_string(),
            wire_type: self.wire_type,
        }
    }
}

/// 取前 N 字节，不足补零
fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    let n = bytes.len().min(N);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

fn fixed_at<const N: usize>(bytes: &[u8], start: usize) -> [u8; N] {
    fixed(bytes.get(start..).unwrap_or(&[]))
}

/// 线路字节序与主机字节序互换
fn swapped<const N: usize>(mut bytes: [u8; N], order: ByteOrder) -> [u8; N] {
    if order.needs_swap() {
        bytes.reverse();
    }
    bytes
}

fn put<const N: usize>(dest: &mut [u8], native: [u8; N], order: ByteOrder) {
    dest[..N].copy_from_slice(&swapped(native, order));
}

/// 遇到 NUL 或到达最大长度结束
fn ascii_text(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| char::from(b))
        .collect()
}

fn latin1_bytes(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

fn parse_float_text(text: &str) -> Option<f64> {
    match text.trim().to_ascii_uppercase().as_str() {
        "NAN" => Some(f64::NAN),
        "INF" | "+INF" => Some(f64::INFINITY),
        "-INF" => Some(f64::NEG_INFINITY),
        other => other.parse::<f64>().ok(),
    }
}

/// 浮点文本：NAN / INF / -INF，单精度按 f32 最短表示
pub fn float_text(v: f64, single: bool) -> String {
    if v.is_nan() {
        "NAN".to_string()
    } else if v == f64::INFINITY {
        "INF".to_string()
    } else if v == f64::NEG_INFINITY {
        "-INF".to_string()
    } else if single {
        format!("{}", v as f32)
    } else {
        format!("{}", v)
    }
}

/// 1990 纪元秒数文本，带小数部分
fn logger_seconds_text(ns: i64) -> String {
    let (secs, frac) = unix_nsec_to_logger(ns);
    if frac == 0 {
        secs.to_string()
    } else {
        format!("{}.{:09}", secs, frac)
            .trim_end_matches('0')
            .to_string()
    }
}

fn push_quoted(out: &mut String, text: &str, quote: bool) {
    if quote {
        out.push('"');
        out.push_str(&text.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(text);
    }
}
