//! 列描述与表描述
//!
//! 由服务端表定义消息解码而来，创建后只读，由表内所有记录和值共享。

use std::sync::Arc;

use thiserror::Error;

use crate::address::{AddressError, ColumnAddress};
use crate::constants::SIG_SEED;
use crate::header::FileHeader;
use crate::wire::{Message, WireError};
use crate::wire_type::WireType;

/// 描述解码错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescError {
    #[error("malformed table definition: {0}")]
    Wire(#[from] WireError),
    #[error("column '{name}' has unsupported type code {code}")]
    UnsupportedType { name: String, code: u32 },
    #[error("no column named '{0}'")]
    UnknownColumn(String),
    #[error("column '{name}': {source}")]
    Address {
        name: String,
        #[source]
        source: AddressError,
    },
}

/// 单个标量列的描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueDesc {
    pub name: String,
    /// 线路类型码
    pub type_code: u32,
    /// 修改命令码，0 表示只读
    pub modifying_cmd: u32,
    pub units: String,
    pub process: String,
    pub description: String,
    /// 数组下标，空表示标量
    pub subscripts: Vec<u32>,
}

impl ValueDesc {
    pub fn new(name: &str, wire_type: WireType) -> Self {
        Self {
            name: name.to_string(),
            type_code: wire_type.code(),
            modifying_cmd: 0,
            units: String::new(),
            process: String::new(),
            description: String::new(),
            subscripts: Vec::new(),
        }
    }

    pub fn with_subscripts(mut self, subscripts: &[u32]) -> Self {
        self.subscripts = subscripts.to_vec();
        self
    }

    pub fn with_units(mut self, units: &str, process: &str) -> Self {
        self.units = units.to_string();
        self.process = process.to_string();
        self
    }

    /// 已识别的线路类型
    pub fn wire_type(&self) -> Option<WireType> {
        WireType::try_from(self.type_code).ok()
    }

    pub fn is_array(&self) -> bool {
        !self.subscripts.is_empty()
    }

    pub fn is_settable(&self) -> bool {
        self.modifying_cmd != 0
    }

    /// 字符数组元素，需要合并为字符串
    pub fn should_be_merged(&self) -> bool {
        self.is_array() && self.wire_type().is_some_and(WireType::is_ascii)
    }

    /// 字符数组中每个字符串的首个元素
    pub fn start_of_merge(&self) -> bool {
        self.should_be_merged() && self.subscripts.last() == Some(&1)
    }

    /// 同一数组、除末维外下标相同
    pub fn same_merge_prefix(&self, other: &ValueDesc) -> bool {
        let n = self.subscripts.len();
        n > 0
            && self.name == other.name
            && other.subscripts.len() == n
            && self.subscripts[..n - 1] == other.subscripts[..n - 1]
    }

    /// 带下标的完整名称，如 `Temp(1,2)`
    pub fn full_name(&self) -> String {
        format_name(&self.name, &self.subscripts)
    }

    /// 合并后字符串值的名称（去掉末维下标）
    pub fn merged_name(&self) -> String {
        match self.subscripts.split_last() {
            Some((_, prefix)) => format_name(&self.name, prefix),
            None => self.name.clone(),
        }
    }

    pub fn read(msg: &mut Message, with_descriptions: bool) -> Result<Self, DescError> {
        let name = msg.read_wstr()?;
        let type_code = msg.read_u32()?;
        let modifying_cmd = msg.read_u32()?;
        let units = msg.read_wstr()?;
        let process = msg.read_wstr()?;
        let description = if with_descriptions {
            msg.read_wstr()?
        } else {
            String::new()
        };
        let count = msg.read_u32()? as usize;
        let mut subscripts = Vec::with_capacity(count.min(16));
        for _ in 0..count {
            subscripts.push(msg.read_u32()?);
        }

        if WireType::try_from(type_code).is_err() {
            return Err(DescError::UnsupportedType {
                name,
                code: type_code,
            });
        }

        Ok(Self {
            name,
            type_code,
            modifying_cmd,
            units,
            process,
            description,
            subscripts,
        })
    }

    pub fn write(&self, msg: &mut Message, with_descriptions: bool) {
        msg.write_wstr(&self.name);
        msg.write_u32(self.type_code);
        msg.write_u32(self.modifying_cmd);
        msg.write_wstr(&self.units);
        msg.write_wstr(&self.process);
        if with_descriptions {
            msg.write_wstr(&self.description);
        }
        msg.write_u32(self.subscripts.len() as u32);
        for sub in &self.subscripts {
            msg.write_u32(*sub);
        }
    }
}

fn format_name(name: &str, subscripts: &[u32]) -> String {
    if subscripts.is_empty() {
        return name.to_string();
    }
    let subs: Vec<String> = subscripts.iter().map(|s| s.to_string()).collect();
    format!("{}({})", name, subs.join(","))
}

/// 列选择器：列名 + 可选数组地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSelector {
    pub name: String,
    pub address: Option<ColumnAddress>,
}

impl ColumnSelector {
    pub fn whole(name: &str) -> Self {
        Self {
            name: name.to_string(),
            address: None,
        }
    }

    pub fn element(name: &str, address: ColumnAddress) -> Self {
        Self {
            name: name.to_string(),
            address: Some(address),
        }
    }

    pub fn subscripts(&self) -> &[u32] {
        self.address
            .as_ref()
            .map(ColumnAddress::subscripts)
            .unwrap_or(&[])
    }

    pub fn write(&self, msg: &mut Message) {
        msg.write_wstr(&self.name);
        let subs = self.subscripts();
        msg.write_u32(subs.len() as u32);
        for sub in subs {
            msg.write_u32(*sub);
        }
    }

    pub fn read(msg: &mut Message) -> Result<Self, WireError> {
        let name = msg.read_wstr()?;
        let count = msg.read_u32()? as usize;
        let mut subs = Vec::with_capacity(count.min(16));
        for _ in 0..count {
            subs.push(msg.read_u32()?);
        }
        if subs.is_empty() {
            return Ok(Self::whole(&name));
        }
        // 线路上的地址无法得知数组边界，以自身为边界
        let address = ColumnAddress::from_subscripts(&subs, &subs).ok();
        Ok(Self { name, address })
    }
}

/// 表描述
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDesc {
    pub station_name: String,
    pub table_name: String,
    pub header: FileHeader,
    columns: Vec<Arc<ValueDesc>>,
}

impl TableDesc {
    pub fn new(station_name: &str, table_name: &str) -> Self {
        Self {
            station_name: station_name.to_string(),
            table_name: table_name.to_string(),
            header: FileHeader {
                station_name: station_name.to_string(),
                ..FileHeader::default()
            },
            columns: Vec::new(),
        }
    }

    pub fn push(&mut self, column: ValueDesc) {
        self.columns.push(Arc::new(column));
    }

    pub fn columns(&self) -> &[Arc<ValueDesc>] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// 从表定义消息解码列描述；失败时保持原有列不变
    pub fn read(&mut self, msg: &mut Message, with_descriptions: bool) -> Result<(), DescError> {
        let count = msg.read_u32()? as usize;
        let mut columns = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            columns.push(Arc::new(ValueDesc::read(msg, with_descriptions)?));
        }
        self.columns = columns;
        Ok(())
    }

    pub fn write(&self, msg: &mut Message, with_descriptions: bool) {
        msg.write_u32(self.columns.len() as u32);
        for column in &self.columns {
            column.write(msg, with_descriptions);
        }
    }

    /// 打包记录长度；字符数组按每个元素 1 字节计
    pub fn get_record_len(&self) -> usize {
        let mut len = 0;
        let mut i = 0;
        while i < self.columns.len() {
            let column = &self.columns[i];
            if column.start_of_merge() {
                let run = self.merge_run_len(i);
                len += run;
                i += run;
                continue;
            }
            len += column.wire_type().map(WireType::width).unwrap_or(0);
            i += 1;
        }
        len
    }

    /// 从 start 开始可合并的连续字符元素个数
    fn merge_run_len(&self, start: usize) -> usize {
        let first = &self.columns[start];
        1 + self.columns[start + 1..]
            .iter()
            .take_while(|c| c.should_be_merged() && !c.start_of_merge() && first.same_merge_prefix(c))
            .count()
    }

    /// 列布局签名，覆盖 [begin, end) 范围内的类型、宽度和名称
    pub fn get_sig(&self, begin: usize, end: usize) -> u16 {
        let end = end.min(self.columns.len());
        let mut sig = SIG_SEED;
        for column in self.columns.get(begin..end).unwrap_or(&[]) {
            let width = column.wire_type().map(WireType::width).unwrap_or(0) as u32;
            sig = calc_sig(&column.type_code.to_be_bytes(), sig);
            sig = calc_sig(&width.to_be_bytes(), sig);
            sig = calc_sig(column.name.as_bytes(), sig);
        }
        sig
    }

    /// 按名称查找首个列索引
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// 数组边界：同名列中各维的最大下标
    pub fn array_dims(&self, name: &str) -> Option<Vec<u32>> {
        let mut dims: Option<Vec<u32>> = None;
        for column in self.columns.iter().filter(|c| c.name == name) {
            match dims.as_mut() {
                None => dims = Some(column.subscripts.clone()),
                Some(d) => {
                    for (bound, sub) in d.iter_mut().zip(&column.subscripts) {
                        *bound = (*bound).max(*sub);
                    }
                }
            }
        }
        dims
    }

    /// 选择器展开为列索引；只给出地址时从该元素开始直到数组末尾
    pub fn columns_for(&self, selector: &ColumnSelector) -> Result<Vec<usize>, DescError> {
        let Some(dims) = self.array_dims(&selector.name) else {
            return Err(DescError::UnknownColumn(selector.name.clone()));
        };

        if dims.is_empty() {
            return Ok(self.find_column(&selector.name).into_iter().collect());
        }

        let start = match &selector.address {
            Some(addr) => ColumnAddress::from_subscripts(addr.subscripts(), &dims),
            None => ColumnAddress::first(&dims),
        }
        .map_err(|source| DescError::Address {
            name: selector.name.clone(),
            source,
        })?;

        let indices = start
            .iter_from()
            .filter_map(|addr| {
                self.columns
                    .iter()
                    .position(|c| c.name == selector.name && c.subscripts == addr.subscripts())
            })
            .collect();
        Ok(indices)
    }

    /// 合并感知的字段名称列表，与记录中的值一一对应
    pub fn field_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut run: Option<&ValueDesc> = None;
        for column in &self.columns {
            if !column.should_be_merged() {
                run = None;
                names.push(column.full_name());
                continue;
            }
            let continues = !column.start_of_merge()
                && run.is_some_and(|first| first.same_merge_prefix(column));
            if !continues {
                run = Some(column);
                names.push(column.merged_name());
            }
        }
        names
    }
}

/// 记录器签名算法
pub fn calc_sig(data: &[u8], seed: u16) -> u16 {
    let mut sig = seed;
    for &byte in data {
        let j = sig;
        sig = (sig << 1) & 0x01FF;
        if sig >= 0x100 {
            sig += 1;
        }
        sig = ((sig + (j >> 8) + u16::from(byte)) & 0xFF) | (j << 8);
    }
    sig
}
