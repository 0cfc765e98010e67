//! lgrcat - 数据记录器表数据抓取工具
//!
//! 两个子命令:
//! 1. tail: 订阅一张表，把记录持续写成 TOA5 / TOB1 / CSIXML / CSIJSON 文件
//! 2. columns: 打印表定义
//!
//! 任务参数可以来自 JSON 任务文件，命令行参数优先。

mod columns;
mod config;
mod tail;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::TailJob;

#[derive(Parser)]
#[command(name = "lgrcat")]
#[command(about = "Stream a data-logger table into TOA5, TOB1, CSIXML or CSIJSON files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 详细输出
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// 连接参数
#[derive(Args)]
struct ServerArgs {
    /// 服务端地址
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// 服务端端口
    #[arg(short, long)]
    port: Option<u16>,

    /// 表名
    #[arg(short, long)]
    table: Option<String>,

    /// JSON 任务文件
    #[arg(short = 'C', long)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// 订阅表并写入文件
    Tail {
        #[command(flatten)]
        server: ServerArgs,

        /// 输出格式: toa5 | noh | custom | tob1 | xml | json
        #[arg(short, long)]
        format: Option<String>,

        /// 起始位置: newest | after-newest | record:F:N | time:RFC3339 | relative:SECS | offset:N
        #[arg(short, long)]
        start: Option<String>,

        /// 排序方式: collected | holes | no-holes | real-time
        #[arg(long)]
        order: Option<String>,

        /// 每次通知的最大记录数
        #[arg(long)]
        cache: Option<u32>,

        /// 只订阅这些列，如 Temp 或 Status(2)
        #[arg(short = 'c', long = "column")]
        columns: Vec<String>,

        /// 输出文件（缺省为标准输出）
        #[arg(short, long)]
        output: Option<String>,

        /// 追加到已有文件
        #[arg(short, long)]
        append: bool,

        /// 失败后重试间隔（秒），0 表示不重试
        #[arg(long)]
        retry_secs: Option<u64>,
    },

    /// 打印表定义
    Columns {
        #[command(flatten)]
        server: ServerArgs,
    },
}

/// 读取任务文件并用命令行参数覆盖
fn load_job(server: ServerArgs) -> Result<TailJob> {
    let mut job = match &server.config {
        Some(path) => {
            info!("lgrcat: Loading job from {}", path);
            TailJob::from_file(path)?
        }
        None => TailJob::default(),
    };
    if let Some(host) = server.host {
        job.host = host;
    }
    if let Some(port) = server.port {
        job.port = port;
    }
    if let Some(table) = server.table {
        job.table = table;
    }
    Ok(job)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 设置日志
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Tail {
            server,
            format,
            start,
            order,
            cache,
            columns,
            output,
            append,
            retry_secs,
        } => {
            let mut job = load_job(server)?;
            if let Some(format) = format {
                job.format = format;
            }
            if let Some(start) = start {
                job.start = start;
            }
            if let Some(order) = order {
                job.order = order;
            }
            if let Some(cache) = cache {
                job.cache_size = cache;
            }
            if !columns.is_empty() {
                job.columns = columns;
            }
            if output.is_some() {
                job.output = output;
            }
            job.append |= append;
            if let Some(retry_secs) = retry_secs {
                job.retry_secs = retry_secs;
            }
            tail::run_tail(job).await?;
        }
        Commands::Columns { server } => {
            let job = load_job(server)?;
            columns::run_columns(job).await?;
        }
    }

    Ok(())
}
