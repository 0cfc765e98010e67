//! lgrtab - 数据记录器表数据模型与编解码
//!
//! 特性：
//! - 列描述：服务端表定义解码、数组地址、布局签名
//! - 值编解码：完整线路类型目录，双字节序，空值规则
//! - 字符数组合并：N 个单字节元素合并为一个字符串值
//! - 多格式导出：TOB1、TOA5/NOH/自定义 CSV、CSIXML、CSIJSON

pub mod address;
pub mod constants;
pub mod desc;
pub mod factory;
pub mod fs2;
pub mod header;
pub mod options;
pub mod record;
pub mod time;
pub mod value;
pub mod wire;
pub mod wire_type;
pub mod writer;

#[cfg(test)]
mod tests;

pub use address::{AddressError, AddressIter, ColumnAddress};
pub use desc::{ColumnSelector, DescError, TableDesc, ValueDesc};
pub use factory::{standard_factory, StandardValueFactory, ValueFactory};
pub use header::{EnvironmentLine, FileHeader};
pub use options::{CsvFormat, CsvOptions, JsonOptions, Tob1Options, XmlOptions};
pub use record::{Record, RecordError, ValueMut, ValueRef};
pub use value::{Scalar, Value, ValueError};
pub use wire::{Message, WireError};
pub use wire_type::{ByteOrder, WireType};
pub use writer::{OutputFormat, TableWriter};
