//! 值工厂
//!
//! 记录构造时按列描述创建值。会话和记录通过 `Arc<dyn ValueFactory>` 共享同一个工厂。

use std::sync::Arc;

use crate::desc::ValueDesc;
use crate::value::{Value, ValueError};
use crate::wire_type::WireType;

pub trait ValueFactory: Send + Sync {
    /// 按类型码创建未绑定的值
    fn make_value(&self, desc: &Arc<ValueDesc>) -> Result<Value, ValueError>;
}

/// 支持完整线路类型目录的工厂
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardValueFactory;

impl ValueFactory for StandardValueFactory {
    fn make_value(&self, desc: &Arc<ValueDesc>) -> Result<Value, ValueError> {
        let wire_type = WireType::try_from(desc.type_code).map_err(ValueError::UnsupportedType)?;
        Ok(Value::new(Arc::clone(desc), wire_type))
    }
}

pub fn standard_factory() -> Arc<dyn ValueFactory> {
    Arc::new(StandardValueFactory)
}
