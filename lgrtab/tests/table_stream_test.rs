//! 表数据流模拟测试
//!
//! 测试流程：
//! 1. 构造服务端表定义消息并解码为 TableDesc
//! 2. 逐条构造通知记录并解码
//! 3. 同一批记录分别写成 TOA5 / TOB1 / CSIXML / CSIJSON 文件
//! 4. 读回文件，验证记录数和数值一致

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;

use lgrtab::header::split_quoted;
use lgrtab::{
    FileHeader, JsonOptions, Message, OutputFormat, Record, Scalar, StandardValueFactory,
    TableDesc, TableWriter, Tob1Options, ValueDesc, WireType, XmlOptions,
};

const RECORDS: u32 = 100;
const BASE_STAMP: i64 = 1_700_000_000_000_000_000;

/// 服务端表定义：温度、电池电压（FS2）、计数、状态字符串和采样时间
fn schema_message() -> Message {
    let mut table = TableDesc::new("Tower", "Ten_Min");
    table.push(ValueDesc::new("AirT", WireType::Ieee4).with_units("degC", "Avg"));
    table.push(ValueDesc::new("Batt", WireType::Fs2).with_units("V", "Min"));
    table.push(ValueDesc::new("Count", WireType::UInt4Lsf).with_units("", "Tot"));
    for i in 1..=8 {
        table.push(ValueDesc::new("Status", WireType::Ascii).with_subscripts(&[i]));
    }
    table.push(ValueDesc::new("Flag", WireType::Bool));
    table.push(ValueDesc::new("Sampled", WireType::NSecLsf));

    let mut msg = Message::new(0, 0);
    table.write(&mut msg, true);
    msg
}

fn decode_table() -> Arc<TableDesc> {
    let mut msg = schema_message();
    let mut table = TableDesc::new("Tower", "Ten_Min");
    table.read(&mut msg, true).expect("解码表定义失败");
    table.header = FileHeader {
        station_name: "Tower".to_string(),
        model: "CR1000X".to_string(),
        serial_no: "4242".to_string(),
        os_version: "Std.05".to_string(),
        dld_name: "CPU:tower.CR1X".to_string(),
        dld_sig: "1234".to_string(),
    };
    Arc::new(table)
}

/// 模拟服务端打包一条记录，返回通知中的记录片段
fn server_record(prototype: &Record, record_no: u32) -> Message {
    let mut record = prototype.clone();
    let stamp = BASE_STAMP + i64::from(record_no) * 600 * 1_000_000_000;
    {
        let mut v = record.value_mut(0).unwrap();
        v.set(&Scalar::Float(20.0 + f64::from(record_no) / 4.0)).unwrap();
    }
    record
        .value_mut(1)
        .unwrap()
        .set(&Scalar::Float(12.5))
        .unwrap();
    record
        .value_mut(2)
        .unwrap()
        .set(&Scalar::UInt(u64::from(record_no) * 3))
        .unwrap();
    record
        .value_mut(3)
        .unwrap()
        .set(&Scalar::Text(format!("ok-{}", record_no)))
        .unwrap();
    record
        .value_mut(4)
        .unwrap()
        .set(&Scalar::Bool(record_no % 2 == 0))
        .unwrap();
    record
        .value_mut(5)
        .unwrap()
        .set(&Scalar::Stamp(stamp))
        .unwrap();

    let mut msg = Message::new(0, 0);
    msg.write_u32(record_no);
    msg.write_i64(stamp);
    msg.write_bytes(record.buffer());
    msg
}

fn received_records(table: &Arc<TableDesc>) -> Vec<Record> {
    let prototype = Record::new(Arc::clone(table), &StandardValueFactory).unwrap();
    (1..=RECORDS)
        .map(|no| {
            let mut msg = server_record(&prototype, no);
            let mut record = prototype.clone();
            record.read(&mut msg, false, false).expect("解码记录失败");
            record
        })
        .collect()
}

fn temp_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("lgrtab_stream_test");
    fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

fn write_file(path: &PathBuf, table: &Arc<TableDesc>, format: OutputFormat, records: &[Record]) {
    let file = BufWriter::new(File::create(path).unwrap());
    let mut writer = TableWriter::new(file, Arc::clone(table), format);
    for record in records {
        writer.write_record(record).unwrap();
    }
    writer.finish().unwrap();
}

#[test]
fn test_schema_decodes_with_merge() {
    let table = decode_table();
    assert_eq!(table.len(), 3 + 8 + 2);
    assert_eq!(
        table.field_names(),
        vec!["AirT", "Batt", "Count", "Status", "Flag", "Sampled"]
    );
    assert_eq!(table.get_record_len(), 4 + 2 + 4 + 8 + 1 + 8);

    let record = Record::new(Arc::clone(&table), &StandardValueFactory).unwrap();
    assert_eq!(record.len(), 6);
    assert_eq!(record.buffer().len(), table.get_record_len());
    assert!(!record.is_all_native());
}

#[test]
fn test_toa5_file() {
    let table = decode_table();
    let records = received_records(&table);
    let path = temp_path("ten_min.dat");
    write_file(&path, &table, OutputFormat::Toa5, &records);

    let text = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    println!("TOA5: {} lines, {} bytes", lines.len(), text.len());
    assert_eq!(lines.len(), 4 + RECORDS as usize);

    let env = FileHeader::parse_environment_line(lines[0]).unwrap();
    assert_eq!(env.file_format, "TOA5");
    assert_eq!(env.table_name, "Ten_Min");
    assert_eq!(env.header.model, "CR1000X");

    let last = split_quoted(lines.last().unwrap());
    assert_eq!(last[1], RECORDS.to_string());
    assert_eq!(last[2], "45");
    assert_eq!(last[3], "12.5");
    assert_eq!(last[4], "300");
    assert_eq!(last[5], "ok-100");
    assert_eq!(last[6], "-1");

    let _ = fs::remove_file(&path);
}

#[test]
fn test_tob1_file() {
    let table = decode_table();
    let records = received_records(&table);
    let path = temp_path("ten_min.tob");
    write_file(&path, &table, OutputFormat::Tob1(Tob1Options::default()), &records);

    let bytes = fs::read(&path).unwrap();
    let mut header_end = 0;
    for _ in 0..5 {
        let next = bytes[header_end..]
            .windows(2)
            .position(|w| w == b"\r\n")
            .unwrap();
        header_end += next + 2;
    }
    // 信封 12 字节 + IEEE4 4 + FP2 2 + UINT4 4 + ASCII(8) 8 + BOOL 1 + NSec 8
    let row_len = 12 + 4 + 2 + 4 + 8 + 1 + 8;
    assert_eq!(bytes.len() - header_end, row_len * RECORDS as usize);

    // 第一行的记录号和计数值（低字节在前）
    let row = &bytes[header_end..header_end + row_len];
    assert_eq!(u32::from_le_bytes(row[8..12].try_into().unwrap()), 1);
    assert_eq!(f32::from_le_bytes(row[12..16].try_into().unwrap()), 20.25);
    assert_eq!(u32::from_le_bytes(row[18..22].try_into().unwrap()), 3);

    let _ = fs::remove_file(&path);
}

#[test]
fn test_json_file() {
    let table = decode_table();
    let records = received_records(&table);
    let path = temp_path("ten_min.json");
    write_file(&path, &table, OutputFormat::Json(JsonOptions::default()), &records);

    let doc: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    let data = doc["data"].as_array().unwrap();
    assert_eq!(data.len(), RECORDS as usize);
    assert_eq!(data[0]["no"], 1);
    assert_eq!(data[0]["vals"][3], "ok-1");
    assert_eq!(data[1]["vals"][4], true);
    assert_eq!(doc["head"]["fields"][3]["string_len"], 8);

    let _ = fs::remove_file(&path);
}

#[test]
fn test_xml_file() {
    let table = decode_table();
    let records = received_records(&table);
    let path = temp_path("ten_min.xml");
    write_file(&path, &table, OutputFormat::Xml(XmlOptions::default()), &records);

    let text = fs::read_to_string(&path).unwrap();
    assert_eq!(text.matches("<r ").count(), RECORDS as usize);
    assert!(text.contains("<field name=\"Status\" type=\"xsd:string\" string-len=\"8\"/>"));
    assert!(text.contains("<v n=\"Status\">ok-7</v>"));

    let _ = fs::remove_file(&path);
}
