//! 各导出格式的选项
//!
//! 每种格式一组布尔选项，打包在一个 u32 标志字中（位定义见 constants.rs）

use crate::constants::{
    DEFAULT_TIME_FORMAT, ISO_TIME_FORMAT, OPT_EMBEDDED_AS_STRING, OPT_INCLUDE_ARRAY_ID,
    OPT_INCLUDE_RECORD_NO, OPT_INCLUDE_TIME, OPT_INCLUDE_UNITS_PROCESS, OPT_INCLUDE_VALUE_NAME,
    OPT_MIDNIGHT_IS_2400, OPT_QUOTE_STRINGS,
};
use crate::time::is_valid_pattern;

fn set_flag(flags: &mut u32, mask: u32, on: bool) {
    if on {
        *flags |= mask;
    } else {
        *flags &= !mask;
    }
}

/// TOB1 二进制选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tob1Options {
    flags: u32,
}

impl Default for Tob1Options {
    fn default() -> Self {
        Self {
            flags: OPT_INCLUDE_TIME | OPT_INCLUDE_RECORD_NO,
        }
    }
}

impl Tob1Options {
    pub fn from_flags(flags: u32) -> Self {
        Self { flags }
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn include_time(&self) -> bool {
        self.flags & OPT_INCLUDE_TIME != 0
    }

    pub fn set_include_time(&mut self, on: bool) {
        set_flag(&mut self.flags, OPT_INCLUDE_TIME, on);
    }

    pub fn include_record_no(&self) -> bool {
        self.flags & OPT_INCLUDE_RECORD_NO != 0
    }

    pub fn set_include_record_no(&mut self, on: bool) {
        set_flag(&mut self.flags, OPT_INCLUDE_RECORD_NO, on);
    }
}

/// 分隔文本变体
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsvFormat {
    /// 带四行文件头
    Toa5,
    /// 无文件头
    Noh,
    /// 自定义选项，无文件头
    Custom,
}

/// 分隔文本选项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvOptions {
    flags: u32,
    format: CsvFormat,
    time_pattern: String,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self::toa5()
    }
}

impl CsvOptions {
    const STANDARD_FLAGS: u32 =
        OPT_INCLUDE_TIME | OPT_INCLUDE_RECORD_NO | OPT_QUOTE_STRINGS | OPT_EMBEDDED_AS_STRING;

    pub fn toa5() -> Self {
        Self {
            flags: Self::STANDARD_FLAGS,
            format: CsvFormat::Toa5,
            time_pattern: DEFAULT_TIME_FORMAT.to_string(),
        }
    }

    pub fn noh() -> Self {
        Self {
            format: CsvFormat::Noh,
            ..Self::toa5()
        }
    }

    /// 自定义格式；格式串无效时使用默认格式
    pub fn custom(flags: u32, time_pattern: &str) -> Self {
        let mut opts = Self {
            flags,
            format: CsvFormat::Custom,
            time_pattern: DEFAULT_TIME_FORMAT.to_string(),
        };
        opts.set_time_pattern(time_pattern);
        opts
    }

    pub fn format(&self) -> CsvFormat {
        self.format
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn time_pattern(&self) -> &str {
        &self.time_pattern
    }

    /// 设置时间格式串，无效格式串返回 false 且不修改
    pub fn set_time_pattern(&mut self, pattern: &str) -> bool {
        if !is_valid_pattern(pattern) {
            return false;
        }
        self.time_pattern = pattern.to_string();
        true
    }

    pub fn include_time(&self) -> bool {
        self.flags & OPT_INCLUDE_TIME != 0
    }

    pub fn set_include_time(&mut self, on: bool) {
        set_flag(&mut self.flags, OPT_INCLUDE_TIME, on);
    }

    pub fn include_record_no(&self) -> bool {
        self.flags & OPT_INCLUDE_RECORD_NO != 0
    }

    pub fn set_include_record_no(&mut self, on: bool) {
        set_flag(&mut self.flags, OPT_INCLUDE_RECORD_NO, on);
    }

    pub fn midnight_is_2400(&self) -> bool {
        self.flags & OPT_MIDNIGHT_IS_2400 != 0
    }

    pub fn set_midnight_is_2400(&mut self, on: bool) {
        set_flag(&mut self.flags, OPT_MIDNIGHT_IS_2400, on);
    }

    pub fn quote_strings(&self) -> bool {
        self.flags & OPT_QUOTE_STRINGS != 0
    }

    pub fn set_quote_strings(&mut self, on: bool) {
        set_flag(&mut self.flags, OPT_QUOTE_STRINGS, on);
    }

    pub fn embedded_as_string(&self) -> bool {
        self.flags & OPT_EMBEDDED_AS_STRING != 0
    }

    pub fn set_embedded_as_string(&mut self, on: bool) {
        set_flag(&mut self.flags, OPT_EMBEDDED_AS_STRING, on);
    }
}

/// CSIXML 选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XmlOptions {
    flags: u32,
}

impl Default for XmlOptions {
    fn default() -> Self {
        Self {
            flags: OPT_INCLUDE_TIME | OPT_INCLUDE_RECORD_NO | OPT_INCLUDE_VALUE_NAME,
        }
    }
}

impl XmlOptions {
    pub fn from_flags(flags: u32) -> Self {
        Self { flags }
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn time_pattern(&self) -> &'static str {
        ISO_TIME_FORMAT
    }

    pub fn include_time(&self) -> bool {
        self.flags & OPT_INCLUDE_TIME != 0
    }

    pub fn set_include_time(&mut self, on: bool) {
        set_flag(&mut self.flags, OPT_INCLUDE_TIME, on);
    }

    pub fn include_record_no(&self) -> bool {
        self.flags & OPT_INCLUDE_RECORD_NO != 0
    }

    pub fn set_include_record_no(&mut self, on: bool) {
        set_flag(&mut self.flags, OPT_INCLUDE_RECORD_NO, on);
    }

    pub fn include_value_name(&self) -> bool {
        self.flags & OPT_INCLUDE_VALUE_NAME != 0
    }

    pub fn set_include_value_name(&mut self, on: bool) {
        set_flag(&mut self.flags, OPT_INCLUDE_VALUE_NAME, on);
    }

    pub fn midnight_is_2400(&self) -> bool {
        self.flags & OPT_MIDNIGHT_IS_2400 != 0
    }

    pub fn set_midnight_is_2400(&mut self, on: bool) {
        set_flag(&mut self.flags, OPT_MIDNIGHT_IS_2400, on);
    }

    pub fn include_array_id(&self) -> bool {
        self.flags & OPT_INCLUDE_ARRAY_ID != 0
    }

    pub fn set_include_array_id(&mut self, on: bool) {
        set_flag(&mut self.flags, OPT_INCLUDE_ARRAY_ID, on);
    }

    pub fn include_units_process(&self) -> bool {
        self.flags & OPT_INCLUDE_UNITS_PROCESS != 0
    }

    pub fn set_include_units_process(&mut self, on: bool) {
        set_flag(&mut self.flags, OPT_INCLUDE_UNITS_PROCESS, on);
    }
}

/// CSIJSON 选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonOptions {
    flags: u32,
}

impl Default for JsonOptions {
    fn default() -> Self {
        Self {
            flags: OPT_INCLUDE_TIME | OPT_INCLUDE_RECORD_NO,
        }
    }
}

impl JsonOptions {
    pub fn from_flags(flags: u32) -> Self {
        Self { flags }
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn include_time(&self) -> bool {
        self.flags & OPT_INCLUDE_TIME != 0
    }

    pub fn set_include_time(&mut self, on: bool) {
        set_flag(&mut self.flags, OPT_INCLUDE_TIME, on);
    }

    pub fn include_record_no(&self) -> bool {
        self.flags & OPT_INCLUDE_RECORD_NO != 0
    }

    pub fn set_include_record_no(&mut self, on: bool) {
        set_flag(&mut self.flags, OPT_INCLUDE_RECORD_NO, on);
    }

    pub fn midnight_is_2400(&self) -> bool {
        self.flags & OPT_MIDNIGHT_IS_2400 != 0
    }

    pub fn set_midnight_is_2400(&mut self, on: bool) {
        set_flag(&mut self.flags, OPT_MIDNIGHT_IS_2400, on);
    }

    pub fn include_array_id(&self) -> bool {
        self.flags & OPT_INCLUDE_ARRAY_ID != 0
    }

    pub fn set_include_array_id(&mut self, on: bool) {
        set_flag(&mut self.flags, OPT_INCLUDE_ARRAY_ID, on);
    }
}
