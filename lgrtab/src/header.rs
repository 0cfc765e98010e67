//! 文件头环境信息
//!
//! TOA5/TOB1 文件首行以及 CSIXML/CSIJSON `environment` 节点中的元数据

use serde::{Deserialize, Serialize};

/// 文件头环境信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileHeader {
    pub station_name: String,
    pub model: String,
    pub serial_no: String,
    pub os_version: String,
    pub dld_name: String,
    pub dld_sig: String,
}

/// 从已有文件首行解析出的信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentLine {
    pub file_format: String,
    pub header: FileHeader,
    pub table_name: String,
}

impl FileHeader {
    /// 生成环境行（不含行结束符），如 `"TOA5","stn","CR1000",...,"Public"`
    pub fn environment_line(&self, file_format: &str, table_name: &str) -> String {
        let fields = [
            file_format,
            &self.station_name,
            &self.model,
            &self.serial_no,
            &self.os_version,
            &self.dld_name,
            &self.dld_sig,
            table_name,
        ];
        fields
            .iter()
            .map(|f| quote_field(f))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// 解析环境行
    pub fn parse_environment_line(line: &str) -> Option<EnvironmentLine> {
        let fields = split_quoted(line.trim_end_matches(['\r', '\n']));
        if fields.len() < 8 {
            return None;
        }
        let mut it = fields.into_iter();
        let file_format = it.next()?;
        let header = FileHeader {
            station_name: it.next()?,
            model: it.next()?,
            serial_no: it.next()?,
            os_version: it.next()?,
            dld_name: it.next()?,
            dld_sig: it.next()?,
        };
        let table_name = it.next()?;
        Some(EnvironmentLine {
            file_format,
            header,
            table_name,
        })
    }
}

/// 加双引号，内部引号加倍
pub fn quote_field(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

/// 按逗号拆分带引号的 CSV 行
pub fn split_quoted(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    fields.push(current);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_line() {
        let header = FileHeader {
            station_name: "Tower \"A\"".to_string(),
            model: "CR1000X".to_string(),
            serial_no: "1234".to_string(),
            os_version: "CR1000X.Std.05".to_string(),
            dld_name: "CPU:met.CR1X".to_string(),
            dld_sig: "4321".to_string(),
        };
        let line = header.environment_line("TOA5", "Hourly");
        assert!(line.starts_with("\"TOA5\",\"Tower \"\"A\"\"\",\"CR1000X\""));

        let parsed = FileHeader::parse_environment_line(&format!("{}\r\n", line)).unwrap();
        assert_eq!(parsed.file_format, "TOA5");
        assert_eq!(parsed.header, header);
        assert_eq!(parsed.table_name, "Hourly");
    }

    #[test]
    fn test_parse_short_line() {
        assert!(FileHeader::parse_environment_line("\"TOA5\",\"x\"").is_none());
    }
}
