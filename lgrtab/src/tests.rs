//! 单元测试模块
//!
//! 记录构造、通知解码和各格式导出的测试用例

use std::sync::Arc;

use serde_json::json;

use crate::constants::{CRLF, LOGGER_EPOCH_OFFSET_SECS, NSEC_PER_SEC};
use crate::desc::{TableDesc, ValueDesc};
use crate::factory::StandardValueFactory;
use crate::options::{CsvOptions, JsonOptions, Tob1Options, XmlOptions};
use crate::record::{Record, RecordError};
use crate::value::Scalar;
use crate::wire::{Message, WireError};
use crate::wire_type::WireType;
use crate::writer::{OutputFormat, TableWriter};

const STAMP: i64 = 1_700_000_000_000_000_000;

fn temp_stamp_table() -> Arc<TableDesc> {
    let mut table = TableDesc::new("stn", "Public");
    table.push(ValueDesc::new("Temp", WireType::Int4).with_units("degC", "Smp"));
    table.push(ValueDesc::new("Stamp", WireType::NSec));
    Arc::new(table)
}

fn label_table(n: u32) -> Arc<TableDesc> {
    let mut table = TableDesc::new("stn", "Labels");
    for i in 1..=n {
        table.push(ValueDesc::new("Label", WireType::Ascii).with_subscripts(&[i]));
    }
    Arc::new(table)
}

fn new_record(table: &Arc<TableDesc>) -> Record {
    Record::new(Arc::clone(table), &StandardValueFactory).unwrap()
}

/// 通知中的一条记录：记录号、时间戳、打包数据
fn notification_record(record_no: u32, stamp: i64, packed: &[u8]) -> Message {
    let mut msg = Message::new(0, 0);
    msg.write_u32(record_no);
    msg.write_i64(stamp);
    msg.write_bytes(packed);
    msg
}

fn filled_record() -> Record {
    let table = temp_stamp_table();
    let mut record = new_record(&table);
    let mut packed = vec![0x00, 0x00, 0x00, 0x19];
    packed.extend_from_slice(&[0; 8]);
    let mut msg = notification_record(5, STAMP, &packed);
    record.read(&mut msg, false, false).unwrap();
    record
        .value_mut(1)
        .unwrap()
        .set(&Scalar::Stamp(STAMP))
        .unwrap();
    record
}

#[test]
fn test_notification_scenario() {
    let table = temp_stamp_table();
    let mut record = new_record(&table);
    assert_eq!(record.buffer().len(), table.get_record_len());

    let mut packed = vec![0x00, 0x00, 0x00, 0x19];
    packed.extend_from_slice(&[0; 8]);
    let mut msg = notification_record(5, STAMP, &packed);
    record.read(&mut msg, false, false).unwrap();

    assert_eq!(record.record_no(), 5);
    assert_eq!(record.value(0).unwrap().get(), Scalar::Int(25));
    let time = record.format_time("%Y-%m-%dT%H:%M:%S%.f", false);
    println!("record 5 at {}", time);
    assert!(time.starts_with("2023-11-14T22:13:20"));
    assert_eq!(msg.remaining(), 0);
}

#[test]
fn test_label_array_merges() {
    let table = label_table(4);
    let mut record = new_record(&table);
    assert_eq!(record.len(), 1);
    assert_eq!(record.values()[0].width(), 4);
    assert_eq!(record.values()[0].name(), "Label");

    record.read_raw(1, 0, STAMP, &[0x48, 0x49, 0x00, 0x00]).unwrap();
    assert_eq!(record.value(0).unwrap().get(), Scalar::Text("HI".into()));
}

#[test]
fn test_single_element_array_stays_unmerged() {
    let table = label_table(1);
    let mut record = new_record(&table);
    assert_eq!(record.len(), 1);
    assert_eq!(record.values()[0].width(), 1);

    record.read_raw(1, 0, 0, b"A").unwrap();
    assert_eq!(record.value(0).unwrap().get(), Scalar::Text("A".into()));
}

#[test]
fn test_two_string_rows_merge_separately() {
    let mut table = TableDesc::new("stn", "t");
    for row in 1..=2 {
        for col in 1..=3 {
            table.push(ValueDesc::new("Names", WireType::Ascii).with_subscripts(&[row, col]));
        }
    }
    table.push(ValueDesc::new("Batt", WireType::Ieee4));
    let table = Arc::new(table);
    let record = new_record(&table);

    let names: Vec<String> = record.values().iter().map(|v| v.name()).collect();
    assert_eq!(names, vec!["Names(1)", "Names(2)", "Batt"]);
    assert_eq!(record.buffer().len(), 3 + 3 + 4);
    assert_eq!(table.field_names(), names);
}

#[test]
fn test_partial_string_run_keeps_its_name() {
    // 从 Label(2) 开始选择的列
    let mut table = TableDesc::new("stn", "Labels");
    for i in 2..=4 {
        table.push(ValueDesc::new("Label", WireType::Ascii).with_subscripts(&[i]));
    }
    table.push(ValueDesc::new("Batt", WireType::Ieee4));
    let table = Arc::new(table);
    let record = new_record(&table);

    let names: Vec<String> = record.values().iter().map(|v| v.name()).collect();
    assert_eq!(names, vec!["Label", "Batt"]);
    assert_eq!(record.values()[0].width(), 3);
    assert_eq!(table.field_names(), names);
}

#[test]
fn test_read_failures_leave_record_unchanged() {
    let table = temp_stamp_table();
    let mut record = filled_record();
    let before = record.buffer().to_vec();

    // 数据不足
    let mut msg = notification_record(6, STAMP, &[1, 2, 3]);
    assert!(matches!(
        record.read(&mut msg, false, false),
        Err(RecordError::Wire(WireError::Truncated { .. }))
    ));
    assert_eq!(record.record_no(), 5);
    assert_eq!(record.buffer(), &before[..]);

    // 字节数与表宽度不符
    let mut msg = Message::new(0, 0);
    msg.write_u32(7);
    msg.write_u32(3);
    msg.write_i64(STAMP);
    msg.write_u32(11);
    msg.write_bytes(&[0; 11]);
    assert_eq!(
        record.read(&mut msg, true, true),
        Err(RecordError::ByteCountMismatch {
            expected: 12,
            got: 11
        })
    );

    // 完整的带文件标记和字节数的格式
    let mut fresh = new_record(&table);
    let mut msg = Message::new(0, 0);
    msg.write_u32(7);
    msg.write_u32(3);
    msg.write_i64(STAMP);
    msg.write_u32(12);
    msg.write_bytes(&before);
    fresh.read(&mut msg, true, true).unwrap();
    assert_eq!(fresh.file_mark(), 3);
    assert_eq!(fresh.record_no(), 7);
}

#[test]
fn test_copy_from() {
    let source = filled_record();
    let mut target = new_record(source.table());
    target.copy_from(&source).unwrap();
    assert_eq!(target.buffer(), source.buffer());
    assert_eq!(target.record_no(), 5);
    assert_eq!(target.calc_sig(), source.calc_sig());

    let mut other = new_record(&label_table(2));
    assert_eq!(other.copy_from(&source), Err(RecordError::TableMismatch));
}

#[test]
fn test_calc_sig_tracks_content() {
    let a = filled_record();
    let mut b = a.clone();
    assert_eq!(a.calc_sig(), b.calc_sig());
    b.set_record_no(6);
    assert_ne!(a.calc_sig(), b.calc_sig());

    let mut c = a.clone();
    c.value_mut(0).unwrap().set(&Scalar::Int(26)).unwrap();
    assert_ne!(a.calc_sig(), c.calc_sig());
}

#[test]
fn test_find_value_and_null() {
    let mut record = filled_record();
    assert_eq!(record.find_value("Stamp"), Some(1));
    assert_eq!(record.find_value("Missing"), None);

    record.set_to_null().unwrap();
    assert_eq!(record.value(0).unwrap().get(), Scalar::Int(0));
    assert_eq!(
        record.value(1).unwrap().get(),
        Scalar::Stamp(LOGGER_EPOCH_OFFSET_SECS * NSEC_PER_SEC)
    );
}

#[test]
fn test_tob1_native_fast_path() {
    let mut table = TableDesc::new("stn", "Fast");
    table.push(ValueDesc::new("A", WireType::Int4Lsf));
    table.push(ValueDesc::new("B", WireType::Ieee4Lsf));
    table.push(ValueDesc::new("C", WireType::Fs2));
    for i in 1..=3 {
        table.push(ValueDesc::new("D", WireType::Ascii).with_subscripts(&[i]));
    }
    table.push(ValueDesc::new("E", WireType::NSecLsf));
    let table = Arc::new(table);

    let mut record = new_record(&table);
    assert!(record.is_all_native());
    let raw: Vec<u8> = (0..record.buffer().len() as u8).collect();
    record.read_raw(1, 0, STAMP, &raw).unwrap();

    let bare = Tob1Options::from_flags(0);
    let mut out = Vec::new();
    record.write_tob1(0, record.len(), &bare, &mut out);
    assert_eq!(out, raw);

    // 部分区间逐值输出
    let mut out = Vec::new();
    record.write_tob1(1, 3, &bare, &mut out);
    assert_eq!(out, raw[4..4 + 4 + 2].to_vec());
}

#[test]
fn test_tob1_envelope_and_swap() {
    let record = filled_record();
    assert!(!record.is_all_native());

    let mut out = Vec::new();
    record.write_tob1(0, 1, &Tob1Options::default(), &mut out);
    let secs = (STAMP / NSEC_PER_SEC - LOGGER_EPOCH_OFFSET_SECS) as u32;
    let mut expected = secs.to_le_bytes().to_vec();
    expected.extend_from_slice(&0u32.to_le_bytes());
    expected.extend_from_slice(&5u32.to_le_bytes());
    expected.extend_from_slice(&25i32.to_le_bytes());
    assert_eq!(out, expected);
}

#[test]
fn test_csv_rows() {
    let record = filled_record();
    let mut row = String::new();
    record.write_csv(0, record.len(), &CsvOptions::toa5(), &mut row);
    assert_eq!(
        row,
        format!("\"2023-11-14 22:13:20\",5,25,\"2023-11-14 22:13:20\"{}", CRLF)
    );

    let mut opts = CsvOptions::custom(0, "%H:%M");
    opts.set_include_time(true);
    let mut row = String::new();
    record.write_csv(0, 1, &opts, &mut row);
    assert_eq!(row, "22:13,25\r\n");
}

#[test]
fn test_csv_midnight_as_2400() {
    let mut record = filled_record();
    // 2023-11-15 00:00:00
    record.set_stamp(1_700_006_400_000_000_000);
    let mut opts = CsvOptions::custom(0, "%Y-%m-%d %H:%M:%S");
    opts.set_include_time(true);
    opts.set_midnight_is_2400(true);
    let mut row = String::new();
    record.write_csv(0, 0, &opts, &mut row);
    assert_eq!(row, "2023-11-14 24:00:00\r\n");
}

#[test]
fn test_xml_row() {
    let record = filled_record();
    let mut out = String::new();
    record.write_xml(0, record.len(), &XmlOptions::default(), &mut out);
    assert_eq!(
        out,
        "<r no=\"5\" time=\"2023-11-14T22:13:20\">\
         <v n=\"Temp\">25</v><v n=\"Stamp\">2023-11-14T22:13:20</v></r>"
    );

    let mut opts = XmlOptions::from_flags(0);
    opts.set_include_units_process(true);
    let mut out = String::new();
    record.write_xml(0, 1, &opts, &mut out);
    assert_eq!(out, "<r><v1 units=\"degC\" process=\"Smp\">25</v1></r>");
}

#[test]
fn test_json_row() {
    let record = filled_record();
    let row = record.write_json(0, record.len(), &JsonOptions::default());
    assert_eq!(
        row,
        json!({"no": 5, "time": "2023-11-14T22:13:20", "vals": [25, "2023-11-14T22:13:20"]})
    );
}

#[test]
fn test_writer_toa5() {
    let record = filled_record();
    let mut writer = TableWriter::new(Vec::new(), Arc::clone(record.table()), OutputFormat::Toa5);
    writer.write_record(&record).unwrap();
    writer.write_record(&record).unwrap();
    assert_eq!(writer.rows(), 2);
    let text = String::from_utf8(writer.finish().unwrap()).unwrap();

    let lines: Vec<&str> = text.split(CRLF).collect();
    println!("{}", text);
    assert_eq!(lines[0], "\"TOA5\",\"stn\",\"\",\"\",\"\",\"\",\"\",\"Public\"");
    assert_eq!(lines[1], "\"TIMESTAMP\",\"RECORD\",\"Temp\",\"Stamp\"");
    assert_eq!(lines[2], "\"TS\",\"RN\",\"degC\",\"\"");
    assert_eq!(lines[3], "\"\",\"\",\"Smp\",\"\"");
    assert_eq!(lines[4], lines[5]);
    assert_eq!(lines.len(), 7);
}

#[test]
fn test_writer_skip_header_for_append() {
    let record = filled_record();
    let mut writer = TableWriter::new(Vec::new(), Arc::clone(record.table()), OutputFormat::Toa5);
    writer.skip_header();
    writer.write_record(&record).unwrap();
    let text = String::from_utf8(writer.finish().unwrap()).unwrap();
    assert!(text.starts_with("\"2023-11-14 22:13:20\",5,25"));
}

#[test]
fn test_writer_tob1() {
    let record = filled_record();
    let format = OutputFormat::Tob1(Tob1Options::default());
    let mut writer = TableWriter::new(Vec::new(), Arc::clone(record.table()), format);
    writer.write_record(&record).unwrap();
    let bytes = writer.finish().unwrap();

    let header_end = bytes
        .windows(2)
        .enumerate()
        .filter(|(_, w)| *w == b"\r\n")
        .map(|(i, _)| i + 2)
        .nth(4)
        .unwrap();
    let header = String::from_utf8_lossy(&bytes[..header_end]);
    assert!(header.starts_with("\"TOB1\""));
    assert!(header.contains("\"ULONG\",\"ULONG\",\"ULONG\",\"LONG\",\"NSec\""));
    assert_eq!(bytes.len() - header_end, 12 + 4 + 8);
}

#[test]
fn test_writer_json_document() {
    let record = filled_record();
    let format = OutputFormat::Json(JsonOptions::default());
    let mut writer = TableWriter::new(Vec::new(), Arc::clone(record.table()), format);
    writer.write_record(&record).unwrap();
    writer.write_record(&record).unwrap();
    let bytes = writer.finish().unwrap();

    let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(doc["head"]["environment"]["table_name"], "Public");
    assert_eq!(doc["head"]["fields"][0]["name"], "Temp");
    assert_eq!(doc["head"]["fields"][0]["units"], "degC");
    assert_eq!(doc["data"].as_array().unwrap().len(), 2);
    assert_eq!(doc["data"][1]["vals"][0], 25);
}

#[test]
fn test_writer_xml_document() {
    let record = filled_record();
    let format = OutputFormat::Xml(XmlOptions::default());
    let mut writer = TableWriter::new(Vec::new(), Arc::clone(record.table()), format);
    writer.write_record(&record).unwrap();
    let text = String::from_utf8(writer.finish().unwrap()).unwrap();

    assert!(text.starts_with("<?xml"));
    assert!(text.contains("<table-name>Public</table-name>"));
    assert!(text.contains("<field name=\"Temp\" type=\"xsd:int\" units=\"degC\" process=\"Smp\"/>"));
    assert!(text.contains("<r no=\"5\""));
    assert!(text.ends_with("</data>\r\n</csixml>\r\n"));
}

#[test]
fn test_output_format_names() {
    assert_eq!("toa5".parse::<OutputFormat>().unwrap(), OutputFormat::Toa5);
    assert!(matches!("CSIJSON".parse::<OutputFormat>(), Ok(OutputFormat::Json(_))));
    assert!("parquet".parse::<OutputFormat>().is_err());
    assert!(OutputFormat::Noh.is_delimited());
    assert!(!OutputFormat::Tob1(Tob1Options::default()).is_delimited());
}
