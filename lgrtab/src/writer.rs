//! 表文件写入器
//!
//! 把一串同表记录写成完整的 TOA5 / NOH / 自定义 CSV / TOB1 / CSIXML / CSIJSON 文件。
//!
//! ```text
//! TOA5:   环境行 / 字段名 / 单位 / 处理方式，随后每条记录一行 CSV
//! TOB1:   环境行 / 字段名 / 单位 / 处理方式 / 数据类型，随后二进制行
//! CSIXML: <head> 描述字段，<data> 内每条记录一个 <r>
//! CSIJSON: {"head":{...},"data":[行, 行, ...]}
//! ```

use std::fmt::Write as _;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::Arc;

use quick_xml::escape::escape;
use serde_json::{json, Value as Json};
use tracing::debug;

use crate::constants::{CRLF, DEFAULT_TIME_FORMAT};
use crate::desc::TableDesc;
use crate::header::quote_field;
use crate::options::{CsvOptions, JsonOptions, Tob1Options, XmlOptions};
use crate::record::Record;
use crate::value::Value;

/// 输出格式及其选项
#[derive(Debug, Clone, PartialEq)]
pub enum OutputFormat {
    Toa5,
    Noh,
    Custom(CsvOptions),
    Tob1(Tob1Options),
    Xml(XmlOptions),
    Json(JsonOptions),
}

impl OutputFormat {
    /// 文件头中的格式名
    pub fn name(&self) -> &'static str {
        match self {
            OutputFormat::Toa5 => "TOA5",
            OutputFormat::Noh => "NOH",
            OutputFormat::Custom(_) => "CUSTOM",
            OutputFormat::Tob1(_) => "TOB1",
            OutputFormat::Xml(_) => "CSIXML",
            OutputFormat::Json(_) => "CSIJSON",
        }
    }

    /// 是否为 CSV 类文本格式（可以追加到已有文件）
    pub fn is_delimited(&self) -> bool {
        matches!(
            self,
            OutputFormat::Toa5 | OutputFormat::Noh | OutputFormat::Custom(_)
        )
    }

    fn csv_options(&self) -> Option<CsvOptions> {
        match self {
            OutputFormat::Toa5 => Some(CsvOptions::toa5()),
            OutputFormat::Noh => Some(CsvOptions::noh()),
            OutputFormat::Custom(opts) => Some(opts.clone()),
            _ => None,
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "toa5" => Ok(OutputFormat::Toa5),
            "noh" => Ok(OutputFormat::Noh),
            "custom" => Ok(OutputFormat::Custom(CsvOptions::custom(
                CsvOptions::noh().flags(),
                DEFAULT_TIME_FORMAT,
            ))),
            "tob1" => Ok(OutputFormat::Tob1(Tob1Options::default())),
            "xml" | "csixml" => Ok(OutputFormat::Xml(XmlOptions::default())),
            "json" | "csijson" => Ok(OutputFormat::Json(JsonOptions::default())),
            other => Err(format!("unknown output format '{}'", other)),
        }
    }
}

/// 表文件写入器
pub struct TableWriter<W: Write> {
    out: W,
    format: OutputFormat,
    table: Arc<TableDesc>,
    header_written: bool,
    rows: u64,
    text: String,
    binary: Vec<u8>,
}

impl<W: Write> TableWriter<W> {
    pub fn new(out: W, table: Arc<TableDesc>, format: OutputFormat) -> Self {
        Self {
            out,
            format,
            table,
            header_written: false,
            rows: 0,
            text: String::new(),
            binary: Vec::new(),
        }
    }

    pub fn format(&self) -> &OutputFormat {
        &self.format
    }

    /// 已写入的记录数
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// 追加到已有文件时跳过文件头
    pub fn skip_header(&mut self) {
        self.header_written = true;
    }

    /// 按记录的值布局写文件头；已写过则忽略
    pub fn write_header(&mut self, record: &Record) -> io::Result<()> {
        if self.header_written {
            return Ok(());
        }
        self.header_written = true;

        self.text.clear();
        match self.format.clone() {
            OutputFormat::Toa5 => self.toa5_header(record),
            OutputFormat::Noh | OutputFormat::Custom(_) => {}
            OutputFormat::Tob1(opts) => self.tob1_header(record, opts),
            OutputFormat::Xml(opts) => self.xml_header(record, opts),
            OutputFormat::Json(opts) => self.json_header(record, opts)?,
        }
        self.out.write_all(self.text.as_bytes())?;
        debug!(
            "{} header written for table {}",
            self.format.name(),
            self.table.table_name
        );
        Ok(())
    }

    pub fn write_record(&mut self, record: &Record) -> io::Result<()> {
        self.write_header(record)?;
        let end = record.len();

        self.text.clear();
        match &self.format {
            OutputFormat::Tob1(opts) => {
                self.binary.clear();
                record.write_tob1(0, end, opts, &mut self.binary);
                self.out.write_all(&self.binary)?;
            }
            OutputFormat::Xml(opts) => {
                record.write_xml(0, end, opts, &mut self.text);
                self.text.push_str(CRLF);
                self.out.write_all(self.text.as_bytes())?;
            }
            OutputFormat::Json(opts) => {
                if self.rows > 0 {
                    self.out.write_all(b",")?;
                }
                let row = record.write_json(0, end, opts);
                serde_json::to_writer(&mut self.out, &row)?;
            }
            other => {
                let opts = other.csv_options().unwrap_or_default();
                record.write_csv(0, end, &opts, &mut self.text);
                self.out.write_all(self.text.as_bytes())?;
            }
        }
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    /// 写结尾并返回底层输出；没有写过文件头的结构化格式不写结尾
    pub fn finish(mut self) -> io::Result<W> {
        if self.header_written {
            match self.format {
                OutputFormat::Xml(_) => self.out.write_all(b"</data>\r\n</csixml>\r\n")?,
                OutputFormat::Json(_) => self.out.write_all(b"]}")?,
                _ => {}
            }
        }
        self.out.flush()?;
        Ok(self.out)
    }

    fn environment_line(&self, format: &str) -> String {
        let mut line = self
            .table
            .header
            .environment_line(format, &self.table.table_name);
        line.push_str(CRLF);
        line
    }

    fn toa5_header(&mut self, record: &Record) {
        let mut text = self.environment_line("TOA5");
        let values = record.values();
        push_row(&mut text, &["TIMESTAMP", "RECORD"], values, |v| v.name());
        push_row(&mut text, &["TS", "RN"], values, |v| v.desc().units.clone());
        push_row(&mut text, &["", ""], values, |v| v.desc().process.clone());
        self.text = text;
    }

    fn tob1_header(&mut self, record: &Record, opts: Tob1Options) {
        let mut text = self.environment_line("TOB1");
        let values = record.values();

        let mut names = Vec::new();
        let mut units = Vec::new();
        let mut types = Vec::new();
        if opts.include_time() {
            names.extend(["SECONDS", "NANOSECONDS"]);
            units.extend(["SECONDS", "NANOSECONDS"]);
            types.extend(["ULONG", "ULONG"]);
        }
        if opts.include_record_no() {
            names.push("RECORD");
            units.push("RN");
            types.push("ULONG");
        }
        let blanks = vec![""; names.len()];

        push_row(&mut text, &names, values, |v| v.name());
        push_row(&mut text, &units, values, |v| v.desc().units.clone());
        push_row(&mut text, &blanks, values, |v| v.desc().process.clone());
        push_row(&mut text, &types, values, Value::tob1_type_name);
        self.text = text;
    }

    fn xml_header(&mut self, record: &Record, opts: XmlOptions) {
        let header = &self.table.header;
        let text = &mut self.text;
        text.push_str("<?xml version=\"1.0\" standalone=\"yes\"?>\r\n");
        text.push_str("<csixml version=\"1.0\">\r\n<head>\r\n<environment>\r\n");
        for (tag, content) in [
            ("station-name", header.station_name.as_str()),
            ("table-name", self.table.table_name.as_str()),
            ("model", header.model.as_str()),
            ("serial-no", header.serial_no.as_str()),
            ("os-version", header.os_version.as_str()),
            ("dld-name", header.dld_name.as_str()),
            ("dld-sig", header.dld_sig.as_str()),
        ] {
            let _ = write!(text, "<{0}>{1}</{0}>\r\n", tag, escape(content));
        }
        text.push_str("</environment>\r\n<fields>\r\n");
        for value in record.values() {
            let desc = value.desc();
            let name = value.display_name(opts.include_array_id());
            let _ = write!(
                text,
                "<field name=\"{}\" type=\"{}\"",
                escape(name.as_str()),
                value.wire_type().xml_type_name()
            );
            if value.wire_type().is_ascii() {
                let _ = write!(text, " string-len=\"{}\"", value.width());
            }
            if !desc.units.is_empty() {
                let _ = write!(text, " units=\"{}\"", escape(desc.units.as_str()));
            }
            if !desc.process.is_empty() {
                let _ = write!(text, " process=\"{}\"", escape(desc.process.as_str()));
            }
            text.push_str("/>\r\n");
        }
        text.push_str("</fields>\r\n</head>\r\n<data>\r\n");
    }

    fn json_header(&mut self, record: &Record, opts: JsonOptions) -> io::Result<()> {
        let mut environment = serde_json::to_value(&self.table.header)?;
        if let Json::Object(map) = &mut environment {
            map.insert(
                "table_name".to_string(),
                Json::String(self.table.table_name.clone()),
            );
        }

        let fields: Vec<Json> = record
            .values()
            .iter()
            .map(|value| {
                let desc = value.desc();
                let mut field = json!({
                    "name": value.display_name(opts.include_array_id()),
                    "type": value.wire_type().xml_type_name(),
                    "units": desc.units,
                    "process": desc.process,
                    "settable": desc.is_settable(),
                });
                if value.wire_type().is_ascii() {
                    field["string_len"] = Json::from(value.width());
                }
                field
            })
            .collect();

        let head = json!({
            "signature": self.table.get_sig(0, self.table.len()),
            "environment": environment,
            "fields": fields,
        });
        let _ = write!(self.text, "{{\"head\":{},\"data\":[", head);
        Ok(())
    }
}

/// 一行带引号的 CSV 头：固定前导字段 + 每个值的一个字段
fn push_row<F>(text: &mut String, lead: &[&str], values: &[Value], field: F)
where
    F: Fn(&Value) -> String,
{
    let fields: Vec<String> = lead
        .iter()
        .map(|s| quote_field(s))
        .chain(values.iter().map(|v| quote_field(&field(v))))
        .collect();
    text.push_str(&fields.join(","));
    text.push_str(CRLF);
}
