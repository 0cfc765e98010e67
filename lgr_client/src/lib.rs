//! 数据记录器表数据订阅客户端库
//!
//! 通过 advise 会话从数据记录器服务端流式接收表记录，带信用式流控。
//!
//! # 示例
//!
//! ```rust,no_run
//! use lgr_client::{AdviseConfig, AdviseEvent, AdviseSession, ClientConfig, LgrClient};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = LgrClient::new(ClientConfig {
//!         host: "192.168.1.100".to_string(),
//!         ..Default::default()
//!     });
//!     let mut stream = client.connect().await.unwrap();
//!
//!     let config = AdviseConfig {
//!         table_name: "Public".to_string(),
//!         ..Default::default()
//!     };
//!     let mut session = AdviseSession::new(config, lgrtab::standard_factory());
//!
//!     client
//!         .run_advise(&mut stream, &mut session, |session, event| {
//!             if event == AdviseEvent::RecordsReady {
//!                 for record in session.get_next_block() {
//!                     println!("{} {}", record.record_no(), record.stamp());
//!                 }
//!             }
//!             Ok(())
//!         })
//!         .await
//!         .unwrap();
//! }
//! ```

pub mod client;
pub mod protocol;
pub mod session;

pub use client::{ClientConfig, ClientError, LgrClient};
pub use protocol::{
    msg_type, OrderOption, ProtocolError, RecordBlock, StartOption, DEFAULT_PORT,
    ORDER_OPTION_VERSION, PROTOCOL_VERSION,
};
pub use session::{
    AdviseConfig, AdviseEvent, AdviseFailure, AdviseSession, AdviseStats, SessionError,
    SessionState,
};
