//! 订阅表数据并写入文件（带自动重连）

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use lgr_client::{
    AdviseConfig, AdviseEvent, AdviseSession, ClientConfig, ClientError, LgrClient, StartOption,
};
use lgrtab::{standard_factory, FileHeader, OutputFormat, TableDesc, TableWriter};
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::config::TailJob;

/// 一次会话的结果
enum Outcome {
    /// 用户中断
    Stopped,
    /// 会话失败，可以重试
    Failed(String),
}

/// 输出端：首次收到表定义时创建写入器
struct Sink {
    format: OutputFormat,
    environment: FileHeader,
    output: Option<String>,
    append: bool,
    writer: Option<TableWriter<Box<dyn Write + Send>>>,
    /// 写入器对应的表布局签名
    layout_sig: u16,
    rows: u64,
}

impl Sink {
    fn new(job: &TailJob, format: OutputFormat) -> Self {
        Self {
            format,
            environment: job.environment.clone(),
            output: job.output.clone(),
            append: job.append,
            writer: None,
            layout_sig: 0,
            rows: 0,
        }
    }

    fn on_started(&mut self, table: &Arc<TableDesc>) -> io::Result<()> {
        let sig = table.get_sig(0, table.len());
        if self.writer.is_some() {
            if sig != self.layout_sig {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "table definition changed on the server",
                ));
            }
            debug!("Table layout unchanged (sig {:04X}), keep writing", sig);
            return Ok(());
        }

        let mut table = TableDesc::clone(table);
        table.header = self.environment.clone();
        if table.header.station_name.is_empty() {
            table.header.station_name = table.station_name.clone();
        }
        let table = Arc::new(table);

        let skip_header = self.append && self.check_append(&table)?;
        let out: Box<dyn Write + Send> = match &self.output {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(self.append)
                    .write(true)
                    .truncate(!self.append)
                    .open(path)?;
                info!("Writing {} to {}", self.format.name(), path);
                Box::new(BufWriter::new(file))
            }
            None => Box::new(io::stdout()),
        };

        let mut writer = TableWriter::new(out, table, self.format.clone());
        if skip_header {
            writer.skip_header();
        }
        self.writer = Some(writer);
        self.layout_sig = sig;
        Ok(())
    }

    /// 已有文件的表名必须一致；文件为空时照常写文件头
    fn check_append(&self, table: &TableDesc) -> io::Result<bool> {
        let Some(path) = &self.output else {
            return Ok(false);
        };
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        if fs::metadata(path)?.len() == 0 {
            return Ok(false);
        }
        if self.format != OutputFormat::Toa5 {
            return Ok(true);
        }

        let mut first = String::new();
        BufReader::new(file).read_line(&mut first)?;
        let env = FileHeader::parse_environment_line(first.trim_end()).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "existing file has no TOA5 header")
        })?;
        if env.table_name != table.table_name {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "existing file holds table {}, not {}",
                    env.table_name, table.table_name
                ),
            ));
        }
        info!("Appending to {} (table {})", path, env.table_name);
        Ok(true)
    }

    fn on_records(&mut self, session: &mut AdviseSession) -> io::Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        let block = session.get_next_block();
        for record in block {
            writer.write_record(record)?;
        }
        writer.flush()?;
        self.rows += block.len() as u64;
        debug!("Wrote {} records ({} total)", block.len(), self.rows);
        Ok(())
    }

    fn finish(self) -> io::Result<()> {
        if let Some(writer) = self.writer {
            writer.finish()?;
        }
        Ok(())
    }
}

/// 运行订阅任务直到 Ctrl+C 或不可重试的失败
pub async fn run_tail(job: TailJob) -> Result<()> {
    job.validate()?;
    let format = job.output_format()?;

    let client = LgrClient::new(ClientConfig {
        host: job.host.clone(),
        port: job.port,
        session: job.session,
        timeout_secs: job.timeout_secs,
    });
    let config = AdviseConfig {
        station_name: job.station.clone(),
        table_name: job.table.clone(),
        columns: job.column_selectors()?,
        order: job.order_option()?,
        start: job.start_option()?,
        cache_size_controller: job.cache_size,
        interface_version: job.interface_version,
        value_descriptions: job.value_descriptions,
    };
    let mut session = AdviseSession::new(config, standard_factory());
    let mut sink = Sink::new(&job, format);

    info!(
        "lgrcat: Tailing table {} from {}:{} as {}",
        job.table,
        job.host,
        job.port,
        sink.format.name()
    );
    info!("lgrcat: Press Ctrl+C to stop");

    let mut attempts = 0u64;
    loop {
        let outcome = run_once(&client, &mut session, &mut sink).await;
        let reason = match outcome {
            Ok(Outcome::Stopped) => break,
            Ok(Outcome::Failed(reason)) => reason,
            Err(e) => {
                sink.finish().context("cannot finish output")?;
                return Err(e);
            }
        };

        if job.retry_secs == 0 {
            sink.finish().context("cannot finish output")?;
            bail!("session failed: {}", reason);
        }

        // 从最后收到的记录之后续传
        if let Some((file_mark, record_no)) = session.last_received() {
            session.config_mut().start = StartOption::AtRecord {
                file_mark,
                record_no: record_no.wrapping_add(1),
            };
        }
        attempts += 1;
        warn!(
            "lgrcat: {}, retrying in {}s (attempt #{})",
            reason, job.retry_secs, attempts
        );

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(job.retry_secs)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("lgrcat: Ctrl+C received during retry wait");
                break;
            }
        }
    }

    info!(
        "lgrcat: Finished, {} records written. {}",
        sink.rows,
        session.stats()
    );
    sink.finish().context("cannot finish output")?;
    Ok(())
}

/// 连接并运行一次会话
async fn run_once(
    client: &LgrClient,
    session: &mut AdviseSession,
    sink: &mut Sink,
) -> Result<Outcome> {
    let mut stream = tokio::select! {
        connected = client.connect() => match connected {
            Ok(stream) => stream,
            Err(e) => return Ok(Outcome::Failed(e.to_string())),
        },
        _ = tokio::signal::ctrl_c() => return Ok(Outcome::Stopped),
    };

    let mut failure: Option<String> = None;
    let mut sink_failed = false;
    let handler = |session: &mut AdviseSession, event: AdviseEvent| -> io::Result<()> {
        let result = match event {
            AdviseEvent::Started => match session.table() {
                Some(table) => {
                    let table = Arc::clone(table);
                    sink.on_started(&table)
                }
                None => Ok(()),
            },
            AdviseEvent::RecordsReady => sink.on_records(session),
            AdviseEvent::Failed(reason) => {
                failure = Some(reason.to_string());
                Ok(())
            }
        };
        sink_failed |= result.is_err();
        result
    };

    let result = tokio::select! {
        result = client.run_advise(&mut stream, session, handler) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    match result {
        None => {
            info!("lgrcat: Ctrl+C received, stopping...");
            session.finish();
            if let Err(e) = client.flush_outbound(&mut stream, session).await {
                warn!("lgrcat: Cannot deliver abort: {}", e);
            }
            Ok(Outcome::Stopped)
        }
        Some(Ok(())) => Ok(Outcome::Failed(
            failure.unwrap_or_else(|| "session ended".to_string()),
        )),
        Some(Err(ClientError::ConnectionFailed(e))) if sink_failed => {
            Err(anyhow::Error::new(e).context("cannot write output"))
        }
        Some(Err(e)) => Ok(Outcome::Failed(failure.unwrap_or_else(|| e.to_string()))),
    }
}
