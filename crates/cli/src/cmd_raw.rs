//! `downlink raw` - follow a process's verbatim stdout/stderr.

use downlink_client::{ClientConfig, LogStream};
use downlink_protocol::Subject;
use uuid::Uuid;

use crate::cmd_tail;

pub async fn run(config: ClientConfig, process_id: Uuid) -> anyhow::Result<()> {
    let stream = LogStream::open(config, Subject::ProcessRaw(process_id))?;
    cmd_tail::follow(&stream).await
}
