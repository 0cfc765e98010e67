//! 订阅任务配置
//!
//! 支持从 JSON 任务文件读取，命令行参数覆盖文件中的同名项。

use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use lgr_client::{OrderOption, StartOption, DEFAULT_PORT, ORDER_OPTION_VERSION};
use lgrtab::address::parse_subscripts;
use lgrtab::{ColumnAddress, ColumnSelector, FileHeader, OutputFormat};
use serde::{Deserialize, Serialize};

/// 订阅任务（JSON 格式）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailJob {
    /// 服务端地址
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// 会话号
    #[serde(default = "default_session")]
    pub session: u32,

    /// 站点名，写入文件头
    #[serde(default)]
    pub station: String,

    /// 表名
    #[serde(default)]
    pub table: String,

    /// 列选择，如 `"Temp"`、`"Status(2,3)"`；为空表示全部列
    #[serde(default)]
    pub columns: Vec<String>,

    /// 输出格式: toa5 / noh / custom / tob1 / xml / json
    #[serde(default = "default_format")]
    pub format: String,

    /// 起始位置，见 [`parse_start`]
    #[serde(default = "default_start")]
    pub start: String,

    /// 排序方式，见 [`parse_order`]
    #[serde(default = "default_order")]
    pub order: String,

    /// 每次通知的最大记录数
    #[serde(default = "default_cache_size")]
    pub cache_size: u32,

    /// 输出文件，缺省写标准输出
    #[serde(default)]
    pub output: Option<String>,

    /// 追加到已有文件
    #[serde(default)]
    pub append: bool,

    /// 失败后重试间隔（秒），0 表示不重试
    #[serde(default = "default_retry_secs")]
    pub retry_secs: u64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_interface_version")]
    pub interface_version: u32,

    /// 请求列说明
    #[serde(default)]
    pub value_descriptions: bool,

    /// 文件头环境信息
    #[serde(default)]
    pub environment: FileHeader,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_session() -> u32 {
    1
}

fn default_format() -> String {
    "toa5".to_string()
}

fn default_start() -> String {
    "newest".to_string()
}

fn default_order() -> String {
    "collected".to_string()
}

fn default_cache_size() -> u32 {
    10
}

fn default_retry_secs() -> u64 {
    10
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_interface_version() -> u32 {
    ORDER_OPTION_VERSION
}

impl Default for TailJob {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            session: default_session(),
            station: String::new(),
            table: String::new(),
            columns: Vec::new(),
            format: default_format(),
            start: default_start(),
            order: default_order(),
            cache_size: default_cache_size(),
            output: None,
            append: false,
            retry_secs: default_retry_secs(),
            timeout_secs: default_timeout_secs(),
            interface_version: default_interface_version(),
            value_descriptions: false,
            environment: FileHeader::default(),
        }
    }
}

impl TailJob {
    /// 从 JSON 文件加载任务
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("cannot read job file {}", path.display()))?;
        let job: TailJob = serde_json::from_str(&content)
            .with_context(|| format!("invalid job file {}", path.display()))?;
        Ok(job)
    }

    /// 校验并解析全部文本选项
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.table.is_empty() {
            bail!("table name is required");
        }
        if self.cache_size == 0 {
            bail!("cache size must be at least 1");
        }
        let format = self.output_format()?;
        if self.append && !format.is_delimited() {
            bail!("--append only works with toa5, noh or custom output");
        }
        if self.append && self.output.is_none() {
            bail!("--append needs an output file");
        }
        self.start_option()?;
        self.order_option()?;
        self.column_selectors()?;
        Ok(())
    }

    pub fn output_format(&self) -> anyhow::Result<OutputFormat> {
        self.format.parse::<OutputFormat>().map_err(anyhow::Error::msg)
    }

    pub fn start_option(&self) -> anyhow::Result<StartOption> {
        parse_start(&self.start)
    }

    pub fn order_option(&self) -> anyhow::Result<OrderOption> {
        parse_order(&self.order)
    }

    pub fn column_selectors(&self) -> anyhow::Result<Vec<ColumnSelector>> {
        self.columns.iter().map(|c| parse_column(c)).collect()
    }
}

/// 解析起始位置：
/// `newest` | `after-newest` | `record:F:N` | `time:RFC3339` | `relative:SECS` | `offset:N`
pub fn parse_start(text: &str) -> anyhow::Result<StartOption> {
    let text = text.trim();
    let (kind, arg) = match text.split_once(':') {
        Some((kind, arg)) => (kind, arg),
        None => (text, ""),
    };

    let option = match kind.to_ascii_lowercase().as_str() {
        "newest" => StartOption::AtNewest,
        "after-newest" => StartOption::AfterNewest,
        "record" => {
            let (mark, no) = arg
                .split_once(':')
                .with_context(|| format!("expected record:FILE_MARK:RECORD_NO, got '{}'", text))?;
            StartOption::AtRecord {
                file_mark: mark.trim().parse().context("bad file mark")?,
                record_no: no.trim().parse().context("bad record number")?,
            }
        }
        "time" => {
            let nsec = lgrtab::time::parse_stamp(arg)
                .with_context(|| format!("bad timestamp '{}'", arg))?;
            StartOption::AtTime(nsec)
        }
        "relative" => {
            let secs: f64 = arg.trim().parse().context("bad relative seconds")?;
            StartOption::RelativeToNewest((secs * 1e9).round() as i64)
        }
        "offset" => StartOption::AtOffsetFromNewest(arg.trim().parse().context("bad offset")?),
        _ => bail!("unknown start option '{}'", text),
    };
    Ok(option)
}

/// 解析排序方式：`collected` | `holes` | `no-holes` | `real-time`
pub fn parse_order(text: &str) -> anyhow::Result<OrderOption> {
    let order = match text.trim().to_ascii_lowercase().as_str() {
        "collected" => OrderOption::Collected,
        "holes" | "logged-with-holes" => OrderOption::LoggedWithHoles,
        "no-holes" | "logged-without-holes" => OrderOption::LoggedWithoutHoles,
        "real-time" | "realtime" => OrderOption::RealTime,
        other => bail!("unknown order option '{}'", other),
    };
    Ok(order)
}

/// 解析列选择：`Name` 或 `Name(i,j)`
pub fn parse_column(text: &str) -> anyhow::Result<ColumnSelector> {
    let text = text.trim();
    match text.find('(') {
        None => {
            if text.is_empty() {
                bail!("empty column name");
            }
            Ok(ColumnSelector::whole(text))
        }
        Some(pos) => {
            let name = text[..pos].trim();
            let subscripts = parse_subscripts(&text[pos..])?;
            // 数组边界在表定义返回前未知
            let address = ColumnAddress::from_subscripts(&subscripts, &subscripts)?;
            Ok(ColumnSelector::element(name, address))
        }
    }
}
