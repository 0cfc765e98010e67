//! 订阅会话端到端测试
//!
//! 在本机端口上跑一个模拟服务端：
//! 1. 应答记录块查询，客户端据此换算起始记录
//! 2. 应答启动命令并下发表定义
//! 3. 每收到一条继续命令下发一批记录，直到收到中止
//! 客户端把收到的记录写成 TOA5 文本并校验。

use std::sync::Arc;

use bytes::BytesMut;
use lgr_client::protocol::{
    decode_frame, encode_frame, notification_message, AdviseContCmd, AdviseStartAck,
    AdviseStartCmd, RecordBlock, RecordBlocksAck, RecordBlocksCmd, START_RESULT_OK,
};
use lgr_client::{
    msg_type, AdviseConfig, AdviseEvent, AdviseSession, ClientConfig, LgrClient, OrderOption,
    StartOption,
};
use lgrtab::{standard_factory, Message, OutputFormat, TableDesc, TableWriter, ValueDesc, WireType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const NEWEST: u32 = 40;
const BATCH: u32 = 4;

async fn read_frame(stream: &mut TcpStream, buf: &mut BytesMut) -> Option<Message> {
    loop {
        if let Some(msg) = decode_frame(buf).unwrap() {
            return Some(msg);
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn server_table() -> TableDesc {
    let mut table = TableDesc::new("Tower", "Hourly");
    table.push(ValueDesc::new("Temp", WireType::Int2).with_units("degC", "Smp"));
    table.push(ValueDesc::new("Wind", WireType::Ieee4).with_units("m/s", "Avg"));
    table
}

/// 记录 n 的打包数据：Temp = n, Wind = n / 2
fn packed(record_no: u32) -> Vec<u8> {
    let mut bytes = (record_no as i16).to_be_bytes().to_vec();
    bytes.extend_from_slice(&(record_no as f32 / 2.0).to_be_bytes());
    bytes
}

fn stamp(record_no: u32) -> i64 {
    1_700_000_000_000_000_000 + i64::from(record_no) * 3_600_000_000_000
}

async fn serve(mut stream: TcpStream) -> Vec<AdviseContCmd> {
    let mut buf = BytesMut::new();

    let mut query = read_frame(&mut stream, &mut buf).await.unwrap();
    assert_eq!(query.msg_type(), msg_type::RECORD_BLOCKS_CMD);
    let query = RecordBlocksCmd::read(&mut query).unwrap();
    assert_eq!(query.table_name, "Hourly");
    let blocks = RecordBlocksAck {
        tran_no: query.tran_no,
        result: START_RESULT_OK,
        blocks: vec![RecordBlock {
            file_mark: 0,
            begin: 1,
            end: NEWEST,
        }],
    };
    stream
        .write_all(&encode_frame(&blocks.to_message()))
        .await
        .unwrap();

    let mut start = read_frame(&mut stream, &mut buf).await.unwrap();
    let cmd = AdviseStartCmd::read(&mut start).unwrap();
    assert_eq!(cmd.cache_size, BATCH);
    let mut next = match cmd.start {
        StartOption::AtRecord { record_no, .. } => record_no,
        other => panic!("unexpected start option {:?}", other),
    };
    let ack = AdviseStartAck {
        tran_no: cmd.tran_no,
        result: START_RESULT_OK,
    };
    stream
        .write_all(&encode_frame(&ack.to_message(Some(&server_table()), false)))
        .await
        .unwrap();

    let mut controls = Vec::new();
    loop {
        let last = (next + BATCH - 1).min(NEWEST);
        let data: Vec<(u32, Vec<u8>)> = (next..=last).map(|n| (n, packed(n))).collect();
        let records: Vec<(u32, i64, &[u8])> = data
            .iter()
            .map(|(n, bytes)| (*n, stamp(*n), &bytes[..]))
            .collect();
        stream
            .write_all(&encode_frame(&notification_message(cmd.tran_no, &records)))
            .await
            .unwrap();
        next = last + 1;

        let Some(mut msg) = read_frame(&mut stream, &mut buf).await else {
            break;
        };
        let cont = AdviseContCmd::read(&mut msg).unwrap();
        controls.push(cont);
        if cont.abort {
            break;
        }
    }
    controls
}

#[tokio::test]
async fn test_tail_last_records_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve(stream).await
    });

    let client = LgrClient::new(ClientConfig {
        host: "127.0.0.1".to_string(),
        port,
        session: 7,
        timeout_secs: 5,
    });
    let mut stream = client.connect().await.unwrap();

    let config = AdviseConfig {
        station_name: "Tower".to_string(),
        table_name: "Hourly".to_string(),
        order: OrderOption::LoggedWithHoles,
        start: StartOption::AtOffsetFromNewest(10),
        cache_size_controller: BATCH,
        ..Default::default()
    };
    let mut session = AdviseSession::new(config, standard_factory());

    let mut writer: Option<TableWriter<Vec<u8>>> = None;
    client
        .run_advise(&mut stream, &mut session, |session, event| {
            match event {
                AdviseEvent::Started => {
                    let table = Arc::clone(session.table().unwrap());
                    writer = Some(TableWriter::new(Vec::new(), table, OutputFormat::Toa5));
                }
                AdviseEvent::RecordsReady => {
                    let mut done = false;
                    if let Some(writer) = writer.as_mut() {
                        for record in session.get_next_block() {
                            writer.write_record(record)?;
                            done = record.record_no() == NEWEST;
                        }
                    }
                    if done {
                        session.finish();
                    }
                }
                AdviseEvent::Failed(failure) => panic!("session failed: {}", failure),
            }
            Ok(())
        })
        .await
        .unwrap();

    let controls = server.await.unwrap();
    assert_eq!(controls.iter().filter(|c| !c.abort).count(), 2);
    assert!(controls.last().unwrap().abort);

    let stats = session.stats();
    assert_eq!(stats.notifications, 3);
    // 上一批在下一次取块时才回收，最多同时存在两批
    assert!(stats.records_allocated <= 2 * u64::from(BATCH));
    assert!(stats.records_recycled > 0);

    let writer = writer.unwrap();
    assert_eq!(writer.rows(), 10);
    let text = String::from_utf8(writer.finish().unwrap()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4 + 10);
    assert!(lines[1].contains("\"Temp\",\"Wind\""));
    assert!(lines[4].ends_with(",31,31,15.5"));
    assert!(lines[13].ends_with(",40,40,20"));
}
