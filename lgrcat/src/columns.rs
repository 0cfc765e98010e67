//! 查询并打印表定义

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{bail, Result};
use lgr_client::{
    AdviseConfig, AdviseEvent, AdviseSession, ClientConfig, LgrClient, OrderOption, StartOption,
};
use lgrtab::{standard_factory, TableDesc};
use tracing::info;

use crate::config::TailJob;

/// 启动一次只取表定义的会话，收到定义后立即中止
pub async fn run_columns(job: TailJob) -> Result<()> {
    if job.table.is_empty() {
        bail!("table name is required");
    }

    let client = LgrClient::new(ClientConfig {
        host: job.host.clone(),
        port: job.port,
        session: job.session,
        timeout_secs: job.timeout_secs,
    });
    let mut stream = client.connect().await?;

    let config = AdviseConfig {
        station_name: job.station.clone(),
        table_name: job.table.clone(),
        order: OrderOption::RealTime,
        start: StartOption::AfterNewest,
        cache_size_controller: 1,
        interface_version: job.interface_version,
        value_descriptions: true,
        ..Default::default()
    };
    let mut session = AdviseSession::new(config, standard_factory());

    let mut table: Option<Arc<TableDesc>> = None;
    let mut failure = None;
    client
        .run_advise(&mut stream, &mut session, |session, event| {
            match event {
                AdviseEvent::Started => {
                    table = session.table().cloned();
                    session.finish();
                }
                AdviseEvent::Failed(reason) => failure = Some(reason),
                AdviseEvent::RecordsReady => {}
            }
            Ok(())
        })
        .await?;

    if let Some(reason) = failure {
        bail!("cannot read table {}: {}", job.table, reason);
    }
    let Some(table) = table else {
        bail!("server returned no table definition");
    };
    info!("Table {} has {} columns", table.table_name, table.len());

    let stdout = io::stdout();
    let mut out = stdout.lock();
    print_columns(&mut out, &table)?;
    out.flush()?;
    Ok(())
}

/// 每列一行：名称、类型、单位、处理方式、说明
pub fn print_columns<W: Write>(out: &mut W, table: &TableDesc) -> io::Result<()> {
    writeln!(
        out,
        "{:<24} {:<10} {:<10} {:<8} {}",
        "NAME", "TYPE", "UNITS", "PROCESS", "DESCRIPTION"
    )?;
    for column in table.columns() {
        let type_name = column
            .wire_type()
            .map(|t| format!("{:?}", t))
            .unwrap_or_else(|| format!("#{}", column.type_code));
        writeln!(
            out,
            "{:<24} {:<10} {:<10} {:<8} {}",
            column.full_name(),
            type_name,
            column.units,
            column.process,
            column.description
        )?;
    }
    Ok(())
}
