//! 常量定义
//!
//! 表格数据格式使用的纪元、哨兵值和标志位

/// 记录器纪元 (1990-01-01T00:00:00Z) 相对 Unix 纪元的秒数
pub const LOGGER_EPOCH_OFFSET_SECS: i64 = 631_152_000;
/// 每秒纳秒数
pub const NSEC_PER_SEC: i64 = 1_000_000_000;
/// USec 时间戳的 tick 长度（百微秒）
pub const NSEC_PER_USEC_TICK: i64 = 100_000;

/// 表签名种子
pub const SIG_SEED: u16 = 0xAAAA;

/// FS2 特殊值
pub const FS2_POS_INF: u16 = 0x1FFF;
pub const FS2_NEG_INF: u16 = 0x9FFF;
pub const FS2_NAN: u16 = 0x9FFE;
/// FS2 可表示的最大幅值
pub const FS2_MAX_MAGNITUDE: f64 = 7999.0;

/// 默认时间戳格式 (chrono 格式串)
pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
/// XML/JSON 使用的 ISO-8601 格式
pub const ISO_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// 行结束符
pub const CRLF: &str = "\r\n";

/// 导出选项标志位:
/// ```text
///   bit 0: 输出时间戳
///   bit 1: 输出记录号
///   bit 2: 午夜显示为 24:00
///   bit 3: 字符串加引号
///   bit 4: 内嵌时间戳以字符串输出
///   bit 5: 输出值名称
///   bit 6: 名称带数组下标
///   bit 7: 输出单位/处理方式属性
/// ```
pub const OPT_INCLUDE_TIME: u32 = 0x01;
pub const OPT_INCLUDE_RECORD_NO: u32 = 0x02;
pub const OPT_MIDNIGHT_IS_2400: u32 = 0x04;
pub const OPT_QUOTE_STRINGS: u32 = 0x08;
pub const OPT_EMBEDDED_AS_STRING: u32 = 0x10;
pub const OPT_INCLUDE_VALUE_NAME: u32 = 0x20;
pub const OPT_INCLUDE_ARRAY_ID: u32 = 0x40;
pub const OPT_INCLUDE_UNITS_PROCESS: u32 = 0x80;
