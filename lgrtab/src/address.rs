//! 数组列地址
//!
//! 多维数组列的下标与线性偏移换算。下标从 1 开始，偏移从 0 开始，
//! 按行优先排列（最高位下标变化最慢）。

use std::fmt;

use thiserror::Error;

/// 地址错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid array address: expected {expected} subscripts, got {got}")]
    WrongDimensionCount { expected: usize, got: usize },
    #[error("invalid array address: subscript {value} of dimension {dim} not in 1..={bound}")]
    OutOfRange { dim: usize, value: u32, bound: u32 },
    #[error("invalid array address: offset {offset} beyond {len} elements")]
    OffsetOutOfRange { offset: usize, len: usize },
    #[error("invalid array bounds: {0:?}")]
    InvalidBounds(Vec<u32>),
    #[error("invalid array address text '{0}'")]
    Parse(String),
}

/// 数组列中某个元素的地址
///
/// 所有修改操作先校验再提交，实例不会持有非法地址。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnAddress {
    subscripts: Vec<u32>,
    bounds: Vec<u32>,
}

impl ColumnAddress {
    /// 数组首元素地址 (1,1,...)
    pub fn first(bounds: &[u32]) -> Result<Self, AddressError> {
        check_bounds(bounds)?;
        Ok(Self {
            subscripts: vec![1; bounds.len()],
            bounds: bounds.to_vec(),
        })
    }

    /// 由下标列表构造
    pub fn from_subscripts(subscripts: &[u32], bounds: &[u32]) -> Result<Self, AddressError> {
        check_bounds(bounds)?;
        check_subscripts(subscripts, bounds)?;
        Ok(Self {
            subscripts: subscripts.to_vec(),
            bounds: bounds.to_vec(),
        })
    }

    /// 解析文本下标，接受 `(1,2)`、`1,2` 或 `1 2`
    pub fn parse(text: &str, bounds: &[u32]) -> Result<Self, AddressError> {
        let subscripts = parse_subscripts(text)?;
        Self::from_subscripts(&subscripts, bounds)
    }

    /// 由线性偏移构造
    pub fn from_offset(offset: usize, bounds: &[u32]) -> Result<Self, AddressError> {
        check_bounds(bounds)?;
        let len = element_count(bounds);
        if offset >= len {
            return Err(AddressError::OffsetOutOfRange { offset, len });
        }

        let mut subscripts = vec![0u32; bounds.len()];
        let mut rest = offset;
        for (i, &bound) in bounds.iter().enumerate().rev() {
            let bound = bound as usize;
            subscripts[i] = (rest % bound) as u32 + 1;
            rest /= bound;
        }

        Ok(Self {
            subscripts,
            bounds: bounds.to_vec(),
        })
    }

    pub fn subscripts(&self) -> &[u32] {
        &self.subscripts
    }

    pub fn bounds(&self) -> &[u32] {
        &self.bounds
    }

    /// 数组元素总数
    pub fn element_count(&self) -> usize {
        element_count(&self.bounds)
    }

    /// 当前地址的线性偏移
    pub fn offset(&self) -> usize {
        self.subscripts
            .iter()
            .zip(&self.bounds)
            .fold(0usize, |acc, (&sub, &bound)| {
                acc * bound as usize + (sub - 1) as usize
            })
    }

    /// 偏移是否落在数组范围内
    pub fn is_valid_address(&self, offset: usize) -> bool {
        let mut remaining = offset;
        for &bound in self.bounds.iter().rev() {
            remaining /= bound as usize;
        }
        remaining == 0
    }

    /// 替换下标，非法时保持原值
    pub fn set_subscripts(&mut self, subscripts: &[u32]) -> Result<(), AddressError> {
        check_subscripts(subscripts, &self.bounds)?;
        self.subscripts.clear();
        self.subscripts.extend_from_slice(subscripts);
        Ok(())
    }

    /// 设置为指定偏移
    pub fn set_offset(&mut self, offset: usize) -> Result<(), AddressError> {
        let next = Self::from_offset(offset, &self.bounds)?;
        self.subscripts = next.subscripts;
        Ok(())
    }

    /// 按行优先前进到下一个元素；已是最后一个元素时返回 false 且不修改
    pub fn next_address(&mut self) -> bool {
        let Some(dim) = (0..self.bounds.len())
            .rev()
            .find(|&i| self.subscripts[i] < self.bounds[i])
        else {
            return false;
        };

        self.subscripts[dim] += 1;
        for sub in &mut self.subscripts[dim + 1..] {
            *sub = 1;
        }
        true
    }

    /// 从当前地址开始的行优先遍历
    pub fn iter_from(&self) -> AddressIter {
        AddressIter {
            next: Some(self.clone()),
        }
    }
}

impl fmt::Display for ColumnAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, sub) in self.subscripts.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", sub)?;
        }
        write!(f, ")")
    }
}

/// 行优先地址迭代器
#[derive(Debug, Clone)]
pub struct AddressIter {
    next: Option<ColumnAddress>,
}

impl Iterator for AddressIter {
    type Item = ColumnAddress;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        let mut following = current.clone();
        if following.next_address() {
            self.next = Some(following);
        }
        Some(current)
    }
}

/// 数组元素总数
pub fn element_count(bounds: &[u32]) -> usize {
    bounds.iter().map(|&b| b as usize).product()
}

/// 解析下标文本
pub fn parse_subscripts(text: &str) -> Result<Vec<u32>, AddressError> {
    let inner = text
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .trim();
    if inner.is_empty() {
        return Err(AddressError::Parse(text.to_string()));
    }

    inner
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u32>()
                .map_err(|_| AddressError::Parse(text.to_string()))
        })
        .collect()
}

fn check_bounds(bounds: &[u32]) -> Result<(), AddressError> {
    if bounds.is_empty() || bounds.contains(&0) {
        return Err(AddressError::InvalidBounds(bounds.to_vec()));
    }
    Ok(())
}

fn check_subscripts(subscripts: &[u32], bounds: &[u32]) -> Result<(), AddressError> {
    if subscripts.len() != bounds.len() {
        return Err(AddressError::WrongDimensionCount {
            expected: bounds.len(),
            got: subscripts.len(),
        });
    }
    for (dim, (&value, &bound)) in subscripts.iter().zip(bounds).enumerate() {
        if value == 0 || value > bound {
            return Err(AddressError::OutOfRange { dim, value, bound });
        }
    }
    Ok(())
}
